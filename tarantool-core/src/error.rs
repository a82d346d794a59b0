//! Error types for Tarantool client operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// The main error type for Tarantool client operations.
#[derive(Debug, Error)]
pub enum TarantoolError {
    /// A connect cycle could not reach any configured node, or a single
    /// connection could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// Every connection known to the active selection strategy is dead.
    #[error("no available connections")]
    NoAvailableConnections,

    /// A pending request was not answered before its deadline.
    #[error("request {sync_id} timed out after {} ms", elapsed.as_millis())]
    RequestTimeout {
        /// Sync id of the timed out request.
        sync_id: u64,
        /// Time elapsed between submission and the timeout firing.
        elapsed: Duration,
    },

    /// The transport closed while a request was pending on it.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A single retry attempt exceeded its request timeout.
    #[error("attempt timed out after {} ms", .0.as_millis())]
    AttemptTimeout(Duration),

    /// A bounded retry policy ran out of attempts.
    #[error("attempts limit reached: {attempts}")]
    AttemptsLimitReached {
        /// Number of retries that were allowed.
        attempts: u32,
        /// The last failure observed.
        #[source]
        source: Box<TarantoolError>,
    },

    /// An unbounded retry policy exceeded its operation timeout.
    #[error("operation timeout exceeded: {} ms", timeout.as_millis())]
    OperationTimeoutExceeded {
        /// The configured operation timeout.
        timeout: Duration,
        /// The last failure observed.
        #[source]
        source: Box<TarantoolError>,
    },

    /// A caller-supplied retry predicate failed while classifying an error.
    #[error("retry predicate failed: {message}")]
    RetryPredicate {
        /// What the predicate reported.
        message: String,
        /// The failure the predicate was asked to classify.
        #[source]
        cause: Box<TarantoolError>,
    },

    /// The client or connection manager has been closed.
    #[error("client is closed")]
    ClientClosed,

    /// Malformed or unexpected data on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error response.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: u32,
        /// Server error message.
        message: String,
    },

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TarantoolError {
    /// Returns `true` for transient network-class failures.
    ///
    /// These are the failures the "network errors only" retry classifier
    /// considers retryable.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            TarantoolError::Connection(_)
                | TarantoolError::NoAvailableConnections
                | TarantoolError::RequestTimeout { .. }
                | TarantoolError::ConnectionLost(_)
                | TarantoolError::AttemptTimeout(_)
                | TarantoolError::Io(_)
        )
    }

    /// Returns `true` if this error ends a retrying operation for good.
    pub fn is_retry_terminal(&self) -> bool {
        matches!(
            self,
            TarantoolError::AttemptsLimitReached { .. }
                | TarantoolError::OperationTimeoutExceeded { .. }
                | TarantoolError::RetryPredicate { .. }
        )
    }
}

/// A specialized `Result` type for Tarantool client operations.
pub type Result<T> = std::result::Result<T, TarantoolError>;
