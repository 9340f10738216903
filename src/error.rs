use thiserror::Error;

/// Failures the core reports to its callers. Transport and frame problems
/// never show up here; they are absorbed per exchange.
#[derive(Debug, Error)]
pub enum Error {
    /// Every exchange of a poll cycle came back empty.
    #[error("no response from inverter on {port}")]
    NoData { port: String },

    /// The validation query did not get a response frame.
    #[error("cannot connect to inverter on {port}: unexpected response {response:?}")]
    CannotConnect { port: String, response: String },

    /// Another poll cycle still owns the port.
    #[error("poll cycle already in progress on {port}")]
    Busy { port: String },

    #[error("poll worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
