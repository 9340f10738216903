pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod home_assistant;
pub mod mqtt;
pub mod options;
pub mod pi30;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;

pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;

use std::io::Write;
use std::time::Duration;

/// How long a stopped task gets to wind down before it is abandoned.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// The long running pieces of the daemon.
#[derive(Clone)]
pub struct Components {
    pub coordinator: Coordinator,
    pub scheduler: Scheduler,
    pub mqtt: Option<Mqtt>,
    pub channels: Channels,
}

impl Components {
    pub fn new(config: ConfigWrapper, channels: Channels, coordinator: Coordinator) -> Self {
        let scheduler = Scheduler::new(config.clone(), channels.clone(), coordinator.clone());
        let mqtt = config
            .mqtt()
            .enabled()
            .then(|| Mqtt::new(config.clone(), channels.clone(), coordinator.stats.clone()));

        Self {
            coordinator,
            scheduler,
            mqtt,
            channels,
        }
    }

    /// Shutdown goes out on the telemetry channel, so the scheduler and the
    /// mqtt sender both see it.
    pub fn stop(&self) {
        info!("Stopping all components...");
        self.scheduler.stop();
    }
}

/// Logs as `[time level module] message`, filtered by RUST_LOG or `level`.
pub fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// `--check`: one validation round trip.
pub async fn check(config: ConfigWrapper) -> Result<(), Error> {
    Coordinator::from_config(&config).validate().await
}

/// `--once`: one poll cycle.
pub async fn once(config: ConfigWrapper) -> Result<TelemetrySnapshot, Error> {
    let coordinator = Coordinator::from_config(&config);
    let result = coordinator.poll().await;
    coordinator.print_stats();
    result
}

/// Daemon entry point: polls the configured inverter until `shutdown_rx`
/// fires.
pub async fn app(shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    let coordinator = Coordinator::from_config(&config);
    start(shutdown_rx, config, Channels::new(), coordinator).await
}

/// Runs the daemon against an already built coordinator.
pub async fn start(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: ConfigWrapper,
    channels: Channels,
    coordinator: Coordinator,
) -> Result<()> {
    info!("pi30-bridge {} starting", CARGO_PKG_VERSION);

    // a failed check is not fatal; the inverter may just be asleep
    if let Err(err) = coordinator.validate().await {
        warn!("{}, polling anyway", err);
    }

    let components = Components::new(config, channels, coordinator);

    let mut handles = Vec::new();

    if let Some(mqtt) = components.mqtt.clone() {
        info!("  Starting MQTT client...");
        handles.push(tokio::spawn(async move {
            if let Err(e) = mqtt.start().await {
                error!("MQTT task failed: {}", e);
            }
        }));
    }

    info!("  Starting Scheduler...");
    let scheduler = components.scheduler.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler task failed: {}", e);
        }
    }));

    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    components.stop();

    for handle in handles {
        match tokio::time::timeout(STOP_GRACE, handle).await {
            Ok(Err(e)) => error!("Error waiting for task: {}", e),
            Err(_) => warn!("task did not stop within {}s", STOP_GRACE.as_secs()),
            Ok(Ok(())) => {}
        }
    }

    info!("Shutdown complete, final statistics:");
    components.coordinator.print_stats();

    Ok(())
}
