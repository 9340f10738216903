use crate::prelude::*;
use crate::coordinator::ChannelData;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

#[derive(Clone)]
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
    coordinator: Coordinator,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels, coordinator: Coordinator) -> Self {
        Self {
            config,
            channels,
            coordinator,
        }
    }

    /// Polls on the configured interval until a Shutdown arrives. A slow
    /// cycle pushes the next tick back instead of bunching them up.
    pub async fn start(&self) -> Result<()> {
        let period = self.config.scheduler().interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut receiver = self.channels.telemetry.subscribe();

        info!("polling {} every {}s", self.coordinator.port(), period.as_secs());

        loop {
            tokio::select! {
                _ = interval.tick() => self.poll_once().await,
                message = receiver.recv() => match message {
                    Ok(ChannelData::Shutdown) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(n)) => warn!("scheduler lagged {} messages", n),
                    Ok(_) => {} // our own snapshots
                },
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    /// One cycle, result broadcast to the sinks.
    pub async fn poll_once(&self) {
        let data = match self.coordinator.poll().await {
            Ok(snapshot) => {
                info!("{}: {} fields", self.coordinator.port(), snapshot.len());
                ChannelData::Snapshot(snapshot)
            }
            Err(err @ Error::Busy { .. }) => {
                warn!("{}, skipping this tick", err);
                return;
            }
            Err(err) => {
                warn!("{}", err);
                ChannelData::Unavailable(err.to_string())
            }
        };

        // no subscribers is fine
        let _ = self.channels.telemetry.send(data);
    }

    pub fn stop(&self) {
        let _ = self.channels.telemetry.send(ChannelData::Shutdown);
    }
}
