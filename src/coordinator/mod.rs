use crate::prelude::*;

pub mod cycle;
pub mod validation;

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum ChannelData {
    Snapshot(TelemetrySnapshot),
    /// A cycle produced nothing; carries the reason.
    Unavailable(String),
    Shutdown,
}

#[derive(Default, Debug)]
pub struct CycleStats {
    pub cycles: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub exchanges: u64,
    pub empty_responses: u64,
    pub rejected_frames: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
}

impl CycleStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Cycles run: {}", self.cycles);
        info!("  Cycles without data: {}", self.cycles_failed);
        info!("  Cycles skipped (busy): {}", self.cycles_skipped);
        info!("  Exchanges:");
        info!("    Total: {}", self.exchanges);
        info!("    Empty responses: {}", self.empty_responses);
        info!("    Rejected frames: {}", self.rejected_frames);
        info!("  MQTT:");
        info!("    Messages sent: {}", self.mqtt_messages_sent);
        info!("    Errors: {}", self.mqtt_errors);
    }

    fn record(&mut self, report: &cycle::CycleReport) {
        self.cycles += 1;
        self.exchanges += report.exchanges() as u64;
        self.empty_responses += report.empty_responses() as u64;
        self.rejected_frames += report.rejected as u64;
        if report.responses == 0 {
            self.cycles_failed += 1;
        }
    }
}

/// Owns the inverter link and serialises access to it. Cloning shares the
/// link, the in-progress guard and the stats.
#[derive(Clone)]
pub struct Coordinator {
    link: Arc<dyn Exchange>,
    busy: Arc<tokio::sync::Mutex<()>>,
    pub stats: Arc<Mutex<CycleStats>>,
}

impl Coordinator {
    pub fn new(link: Arc<dyn Exchange>) -> Self {
        Self {
            link,
            busy: Arc::new(tokio::sync::Mutex::new(())),
            stats: Arc::new(Mutex::new(CycleStats::default())),
        }
    }

    pub fn from_config(config: &ConfigWrapper) -> Self {
        Self::new(Arc::new(Session::from_config(&config.inverter())))
    }

    pub fn port(&self) -> &str {
        self.link.port()
    }

    /// Runs one full cycle on a blocking worker. Returns [`Error::Busy`]
    /// straight away if another cycle still holds the port, and
    /// [`Error::NoData`] if the inverter did not answer anything.
    ///
    /// The port stays held until the worker finishes, even if this future is
    /// dropped first.
    pub async fn poll(&self) -> Result<TelemetrySnapshot, Error> {
        let guard = match self.busy.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.cycles_skipped += 1;
                }
                return Err(Error::Busy {
                    port: self.port().to_owned(),
                });
            }
        };

        let link = self.link.clone();
        let stats = self.stats.clone();
        let report = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let report = cycle::run(link.as_ref());
            if let Ok(mut stats) = stats.lock() {
                stats.record(&report);
            }
            report
        })
        .await?;

        if report.responses == 0 {
            return Err(Error::NoData {
                port: self.port().to_owned(),
            });
        }

        debug!(
            "{}: cycle complete, {} fields from {} responses",
            self.port(),
            report.snapshot.len(),
            report.responses
        );
        Ok(report.snapshot)
    }

    /// One QPIGS round trip to check the inverter is there. Waits for any
    /// running cycle rather than skipping.
    pub async fn validate(&self) -> Result<(), Error> {
        let guard = self.busy.clone().lock_owned().await;

        let link = self.link.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            validation::validate_connection(link.as_ref())
        })
        .await?
    }

    pub fn print_stats(&self) {
        if let Ok(stats) = self.stats.lock() {
            stats.print_summary();
        }
    }
}
