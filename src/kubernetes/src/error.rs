use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Get Namespace Error")]
    GetNamespace,

    #[error("Invalid uid: {0}")]
    InvalidUid(String),

    #[error("Invalid probe address: {0}")]
    InvalidProbeAddress(String),
}
