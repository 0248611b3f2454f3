use thiserror::Error;

pub trait TraceableError: std::error::Error {
    fn metric_label(&self) -> String;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install the global subscriber: {0}")]
    Init(String),
}
