pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::{
    channels::Channels,
    config::{self, Config, ConfigWrapper},
    coordinator::{self, Coordinator, CycleStats},
    error::Error,
    home_assistant, mqtt,
    options::Options,
    pi30::{
        self,
        command::Command,
        packet::{RawResponse, Record, Response},
        session::{Exchange, Session},
    },
    telemetry::{self, TelemetrySnapshot, Value},
};
