use crate::prelude::*;
use crate::coordinator::{ChannelData, CycleStats};

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const PUBLISH_ATTEMPTS: u32 = 3;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// `state` carries the whole snapshot as one JSON object; with
    /// `individual` each field also gets its own `state/<key>` topic.
    pub fn for_snapshot(snapshot: &TelemetrySnapshot, individual: bool) -> Result<Vec<Message>> {
        let mut r = vec![Message {
            topic: "state".to_owned(),
            retain: false,
            payload: snapshot.to_json()?,
        }];

        if individual {
            for (key, value) in snapshot.iter() {
                let payload = match value {
                    Value::Text(text) => text.clone(),
                    other => serde_json::to_string(other)?,
                };
                r.push(Message {
                    topic: format!("state/{}", key),
                    retain: false,
                    payload,
                });
            }
        }

        Ok(r)
    }

    pub fn availability(online: bool) -> Message {
        Message {
            topic: "LWT".to_owned(),
            retain: true,
            payload: if online { "online" } else { "offline" }.to_owned(),
        }
    }
} // }}}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    shutdown: Arc<AtomicBool>,
    channels: Channels,
    shared_stats: Arc<Mutex<CycleStats>>,
    // last availability sent for the inverter, None until the first cycle
    availability: Arc<Mutex<Option<bool>>>,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels, shared_stats: Arc<Mutex<CycleStats>>) -> Self {
        Self {
            config,
            channels,
            shutdown: Arc::new(AtomicBool::new(false)),
            shared_stats,
            availability: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = self.config.mqtt();

        if !c.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let client_id = format!("pi30-bridge-{}", self.config.inverter().name());
        let mut options = MqttOptions::new(client_id, c.host(), c.port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host(), c.port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(self.receiver(eventloop, client.clone()), self.sender(client))?;

        Ok(())
    }

    /// Run after every ConnAck. A new session starts from the broker's retained
    /// state, which after a drop is the last will's `offline`, so discovery and
    /// the last known availability go out again.
    async fn setup(&self, client: AsyncClient) -> Result<()> {
        for msg in self.connect_messages()? {
            if let Err(err) = client
                .publish(&msg.topic, QoS::AtLeastOnce, msg.retain, msg.payload)
                .await
            {
                warn!("publish to {} failed: {}", msg.topic, err);
            }
        }

        Ok(())
    }

    /// Retained messages for a fresh connection, with full topics.
    fn connect_messages(&self) -> Result<Vec<Message>> {
        let mut r = Vec::new();

        if self.config.homeassistant_enabled() {
            let ha = home_assistant::Config::new(&self.config.inverter(), &self.config.mqtt());
            r.extend(ha.all()?);
        }

        if let Some(online) = self.current_availability() {
            let mut message = Message::availability(online);
            message.topic = self.lwt_topic();
            r.push(message);
        }

        Ok(r)
    }

    fn current_availability(&self) -> Option<bool> {
        self.availability.lock().ok().and_then(|a| *a)
    }

    /// Records the inverter's availability. True when it differs from the
    /// last value recorded.
    fn mark_available(&self, online: bool) -> bool {
        match self.availability.lock() {
            Ok(mut current) => current.replace(online) != Some(online),
            Err(_) => true,
        }
    }

    // drives the connection; nothing is subscribed so incoming traffic is ignored
    async fn receiver(&self, mut eventloop: EventLoop, client: AsyncClient) -> Result<()> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Ok(event) = tokio::time::timeout(Duration::from_secs(1), eventloop.poll()).await {
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        // publishing waits on this loop, so it can't run inline
                        let this = self.clone();
                        let client = client.clone();
                        tokio::spawn(async move {
                            if let Err(err) = this.setup(client).await {
                                error!("mqtt setup failed: {}", err);
                            }
                        });
                    }
                    Err(e) => {
                        if !self.shutdown.load(Ordering::Relaxed) {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                    _ => {} // keepalives etc
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // scheduler -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut receiver = self.channels.telemetry.subscribe();
        let individual = self.config.mqtt().publish_individual();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Shutdown) | Err(RecvError::Closed) => {
                    info!("MQTT sender received shutdown signal");
                    self.shutdown.store(true, Ordering::Relaxed);
                    let _ = client.disconnect().await;
                    break;
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("mqtt sender lagged, dropped {} snapshots", n);
                }
                Ok(ChannelData::Snapshot(snapshot)) => {
                    let mut messages = Message::for_snapshot(&snapshot, individual)?;
                    if self.mark_available(true) {
                        messages.push(Message::availability(true));
                    }
                    for message in messages {
                        self.publish(&client, message).await;
                    }
                }
                Ok(ChannelData::Unavailable(reason)) => {
                    if self.mark_available(false) {
                        info!("marking inverter unavailable: {}", reason);
                        self.publish(&client, Message::availability(false)).await;
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    async fn publish(&self, client: &AsyncClient, message: Message) {
        let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
        debug!("publishing: {} = {}", topic, message.payload);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match client
                .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                .await
            {
                Ok(_) => {
                    if let Ok(mut stats) = self.shared_stats.lock() {
                        stats.mqtt_messages_sent += 1;
                    }
                    return;
                }
                Err(err) => {
                    error!(
                        "MQTT publish to {} failed: {:?} (attempt {}/{})",
                        topic, err, attempt, PUBLISH_ATTEMPTS
                    );
                    if let Ok(mut stats) = self.shared_stats.lock() {
                        stats.mqtt_errors += 1;
                    }
                    if attempt < PUBLISH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
