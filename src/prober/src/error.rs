use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Probe to {0} timed out")]
    Timeout(String),

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Condition handler failed: {0}")]
    Handler(String),

    #[error("Prober manager is already started")]
    AlreadyStarted,

    #[error("failed to get lock")]
    FailedToGetLock,
}
