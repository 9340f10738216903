use crate::prelude::*;
use crate::coordinator::ChannelData;

#[derive(Debug, Clone)]
pub struct Channels {
    /// Scheduler -> sinks. Shutdown travels on the same channel.
    pub telemetry: broadcast::Sender<ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            telemetry: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(256).0
    }
}
