use jobsys_core::ErrorRecord;
use thiserror::Error;

/// Pool-level errors, raised synchronously to the caller of the offending
/// operation.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("job pool is shut down")]
    Shutdown,

    #[error("a job pool must be created inside a Tokio runtime")]
    Runtime,

    #[error("worker transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Job-level errors, delivered only through the job's own handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job's own logic failed. Only message and stack text survive the
    /// worker boundary.
    #[error("job failed: {0}")]
    Execution(#[from] ErrorRecord),

    /// The worker went away mid-dispatch, the dispatch could not be
    /// delivered, or the pool was terminated before the job could run.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The result did not deserialize into the awaited type.
    #[error("result decode error: {0}")]
    Decode(String),
}

impl JobError {
    /// The boundary-translated record, when the job's own logic failed.
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            Self::Execution(record) => Some(record),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Execution(record) => &record.message,
            Self::Protocol(msg) | Self::Decode(msg) => msg,
        }
    }
}

/// Failures of the channel between a slot and its execution context.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("execution context is closed")]
    Closed,

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
