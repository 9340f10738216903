use crate::prelude::*;
use crate::pi30::packet::Pv2Status;
use crate::telemetry::SnapshotBuilder;

/// Result of one pass over the command catalog.
#[derive(Debug)]
pub struct CycleReport {
    pub snapshot: TelemetrySnapshot,
    /// Exchanges that returned any bytes at all.
    pub responses: usize,
    /// Non-empty responses no parser accepted.
    pub rejected: usize,
}

impl CycleReport {
    pub fn exchanges(&self) -> usize {
        Command::ALL.len()
    }

    pub fn empty_responses(&self) -> usize {
        self.exchanges() - self.responses
    }
}

/// Sends every query in turn and merges whatever parsed into one snapshot.
/// Blocks for the whole cycle; one failed exchange does not stop the rest.
pub fn run(link: &dyn Exchange) -> CycleReport {
    let mut builder = SnapshotBuilder::new();
    let mut responses = 0;
    let mut rejected = 0;

    for command in Command::ALL {
        let raw = link.exchange(command);
        if !raw.is_empty() {
            responses += 1;
        }

        match Response::parse(command, &raw) {
            Some(response) => {
                builder.merge(&response);
            }
            // no second MPPT tracker: the inverter NAKs or stays silent
            None if command == Command::Qpigs2 && (!raw.is_frame() || raw.is_nak()) => {
                debug!("{}: {} not answered, reporting PV2 as zero", link.port(), command);
                builder.merge(&Pv2Status::not_installed());
            }
            None => {
                if !raw.is_empty() {
                    rejected += 1;
                    debug!("{}: discarded {} response {:?}", link.port(), command, raw.as_str());
                }
            }
        }
    }

    CycleReport {
        snapshot: builder.build(),
        responses,
        rejected,
    }
}
