use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid CIDR: {0}")]
    InvalidCIDR(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address {addr} is out of subnet {subnet}")]
    OutOfSubnet { addr: String, subnet: String },

    #[error("Address {0} is the network or broadcast address of its subnet")]
    ReservedAddress(String),

    #[error("Protocol mismatch")]
    ProtocolMismatch,

    #[error("Range could not be empty")]
    EmptyRanges,

    #[error("Requested address {0} is not in the range set")]
    NotContains(String),

    #[error("Requested address {0} is the gateway of its subnet")]
    Gateway(String),

    #[error("Requested address {0} is not available")]
    RequestedAddressUnavailable(String),

    #[error("No IP addresses available in pool {0}")]
    NoAvailableAddress(String),

    #[error("The requirement to select a pool can't be empty")]
    EmptyRequirement,

    #[error("Allocation record was modified concurrently")]
    Conflict,

    #[error("Store error: {0}")]
    Store(String),

    #[error("failed to get lock")]
    FailedToGetLock,
}

impl Error {
    /// Whether the whole operation may be retried after re-reading the ledger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict)
    }
}
