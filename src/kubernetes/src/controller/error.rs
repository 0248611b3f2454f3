use kube::core::admission::SerializePatchError;
use thiserror::Error;
use vlbd_trace::error::TraceableError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("std::io::Error")]
    StdIo(#[from] std::io::Error),

    #[error("failed to get lock")]
    FailedToGetLock,

    #[error("config error")]
    Config(#[from] ConfigError),

    #[error("SerializationError: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("SerializePatchError: {0}")]
    SerializePatch(#[source] SerializePatchError),

    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Kube Library Error: {0}")]
    KubeLibrary(#[source] crate::error::Error),

    #[error("Ipam Error: {0}")]
    Ipam(#[source] vlbd_ipam::error::Error),

    #[error("Prober Error: {0}")]
    Prober(#[source] vlbd_prober::error::Error),

    #[error("Trace Error: {0}")]
    Trace(#[source] vlbd_trace::error::Error),

    #[error("Certificate Error: {0}")]
    Cert(#[source] vlbd_cert::util::Error),

    #[error("Metrics Error: {0}")]
    Metrics(#[source] prometheus::Error),

    #[error("Server Error: {0}")]
    Server(String),

    #[error("No matched IPPool with requirement {0}")]
    NoMatchedPool(String),

    #[error("No available address in IPPool {0}")]
    NoAvailableAddress(String),

    #[error("Service {0} has not got an external IP yet")]
    WaitExternalIp(String),

    #[error("No running backend servers")]
    NoRunningBackendServer,

    #[error("All {0} backend servers are not healthy")]
    AllBackendServersNotHealthy(usize),

    #[error("Allocator of IPPool {0} is not found")]
    AllocatorNotFound(String),

    #[error("Service {0} is not found")]
    ServiceNotFound(String),

    #[error("IPPool {0} still has allocated addresses")]
    PoolInUse(String),

    #[error("Migration Error: {0}")]
    Migration(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    FailedToRead(String, #[source] std::io::Error),
    #[error("failed to load: {0}")]
    FailedToLoad(#[source] serde_yaml::Error),
}

/// How a failed pass is followed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not ready; requeued after a short delay.
    Requeue,
    /// Not ready; another object's change re-triggers the pass.
    WaitForSignal,
    /// Returned to the runtime.
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoMatchedPool(_) | Error::NoAvailableAddress(_) | Error::WaitExternalIp(_) => {
                ErrorKind::Requeue
            }
            Error::Ipam(e) => match e {
                vlbd_ipam::error::Error::NoAvailableAddress(_) => ErrorKind::Requeue,
                e if e.is_retryable() => ErrorKind::Requeue,
                _ => ErrorKind::Fatal,
            },
            Error::Kube(kube::Error::Api(ae)) if ae.code == 409 => ErrorKind::Requeue,
            Error::NoRunningBackendServer | Error::AllBackendServersNotHealthy(_) => {
                ErrorKind::WaitForSignal
            }
            _ => ErrorKind::Fatal,
        }
    }

    /// Short reason written into the Ready condition.
    pub fn reason(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Requeue => "Allocating",
            ErrorKind::WaitForSignal => "WaitingForBackend",
            ErrorKind::Fatal => "Error",
        }
    }
}

impl From<vlbd_ipam::error::Error> for Error {
    fn from(e: vlbd_ipam::error::Error) -> Self {
        match e {
            vlbd_ipam::error::Error::NoAvailableAddress(pool) => Error::NoAvailableAddress(pool),
            e => Error::Ipam(e),
        }
    }
}

impl TraceableError for &Error {
    fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

impl TraceableError for Error {
    fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest(
        err,
        expected,
        case(Error::NoMatchedPool("default".to_string()), ErrorKind::Requeue),
        case(Error::from(vlbd_ipam::error::Error::NoAvailableAddress("p1".to_string())), ErrorKind::Requeue),
        case(Error::from(vlbd_ipam::error::Error::Conflict), ErrorKind::Requeue),
        case(Error::WaitExternalIp("default/lb1".to_string()), ErrorKind::Requeue),
        case(Error::NoRunningBackendServer, ErrorKind::WaitForSignal),
        case(Error::AllBackendServersNotHealthy(2), ErrorKind::WaitForSignal),
        case(Error::from(vlbd_ipam::error::Error::InvalidCIDR("x".to_string())), ErrorKind::Fatal),
        case(Error::AllocatorNotFound("p1".to_string()), ErrorKind::Fatal),
    )]
    fn works_error_kind(err: Error, expected: ErrorKind) {
        assert_eq!(expected, err.kind());
    }

    #[test]
    fn works_error_from_ipam_no_available_address() {
        let err = Error::from(vlbd_ipam::error::Error::NoAvailableAddress("p1".to_string()));
        assert_eq!("No available address in IPPool p1", err.to_string());
    }
}
