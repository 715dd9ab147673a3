//! Error types for the work queue system

/// Result type for work queue operations
pub type Result<T> = std::result::Result<T, WorkError>;

/// Errors that can occur while producing, processing or supervising work
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkError {
    /// The queue was closed; used for orderly shutdown signaling
    #[error("Queue is closed")]
    Closed,

    /// The handler failed while processing an item
    #[error("Handler failed on item #{sequence}: {source}")]
    HandlerFailure {
        /// Sequence number of the item that failed
        sequence: u64,
        /// What the handler returned (or the panic it raised)
        #[source]
        source: Box<WorkError>,
    },

    /// Invalid capacity or worker count
    #[error("Invalid configuration for '{parameter}': {message}")]
    CapacityMisuse {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// An external broker call failed
    #[error("Broker unavailable during '{operation}': {message}")]
    BrokerUnavailable {
        /// Broker operation that failed
        operation: String,
        /// Error message
        message: String,
    },

    /// The supervisor deadline elapsed before the work finished
    #[error("Deadline exceeded after {timeout_ms}ms")]
    DeadlineExceeded {
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Work was cancelled
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Reason for cancellation
        reason: String,
    },

    /// A worker caught a panic raised by the handler
    #[error("Worker #{worker_id} caught a panic: {message}")]
    WorkerPanic {
        /// ID of the worker
        worker_id: usize,
        /// Panic message
        message: String,
    },

    /// Failed to spawn a worker or producer thread
    #[error("Failed to spawn thread '{name}': {message}")]
    SpawnError {
        /// Name of the thread that failed to spawn
        name: String,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Rate limit budget exhausted for a key
    #[error("Too many requests for '{key}'")]
    TooManyRequests {
        /// Rate limit key
        key: String,
    },

    /// A deadline timer was used after it fired or was disarmed
    #[error("Timer error: {0}")]
    Timer(#[from] crate::core::timer::TimerError),

    /// Payload could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error
    #[error("{0}")]
    Other(String),
}

impl WorkError {
    /// Wrap a handler error with the sequence number of its item
    pub fn handler_failure(sequence: u64, source: WorkError) -> Self {
        WorkError::HandlerFailure {
            sequence,
            source: Box::new(source),
        }
    }

    /// Create a capacity misuse error
    pub fn capacity_misuse(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        WorkError::CapacityMisuse {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a broker unavailable error
    pub fn broker_unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        WorkError::BrokerUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a deadline exceeded error
    pub fn deadline_exceeded(timeout_ms: u64) -> Self {
        WorkError::DeadlineExceeded { timeout_ms }
    }

    /// Create a cancelled error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        WorkError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a worker panic error
    pub fn worker_panic(worker_id: usize, message: impl Into<String>) -> Self {
        WorkError::WorkerPanic {
            worker_id,
            message: message.into(),
        }
    }

    /// Create a spawn error with source
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        WorkError::SpawnError {
            name: name.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        WorkError::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a too many requests error
    pub fn too_many_requests(key: impl Into<String>) -> Self {
        WorkError::TooManyRequests { key: key.into() }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        WorkError::Other(msg.into())
    }

    /// Sequence number of the failing item, for handler failures
    pub fn sequence(&self) -> Option<u64> {
        match self {
            WorkError::HandlerFailure { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    /// The innermost error, looking through handler failure wrappers
    pub fn root_cause(&self) -> &WorkError {
        match self {
            WorkError::HandlerFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
