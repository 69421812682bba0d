use thiserror::Error;

/// Errors that can occur while configuring or running the consumption
/// subsystem.
///
/// Startup-phase errors (`Configuration`, `DuplicateBinding`,
/// `InvalidBinding`, `Bind`, `TopologyConflict`) are fatal: the process
/// must not start consuming against a partial or ambiguous topology.
///
/// `ConnectionRetryable` marks transient broker failures and is the only
/// variant retried by [`retry_with_backoff`](crate::retry). A terminal
/// `Connection` error means retries were exhausted.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Malformed or missing topology configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A consumer id was registered twice.
    #[error("duplicate binding for consumer '{0}'")]
    DuplicateBinding(String),

    /// A binding violated its own contract (e.g. zero concurrency).
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// Endpoint declaration or consumer attachment failed.
    #[error("bind failed: {0}")]
    Bind(String),

    /// An endpoint already exists with conflicting parameters.
    #[error("topology conflict: {0}")]
    TopologyConflict(String),

    /// Broker connection failed and retries are exhausted.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Transient broker connection failure, eligible for retry.
    #[error("transient connection failure: {0}")]
    ConnectionRetryable(String),

    /// Transport-level failure outside the connect path.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A supervisor operation was invoked in the wrong lifecycle state.
    #[error("invalid supervisor state: {0}")]
    InvalidState(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkerError>;
