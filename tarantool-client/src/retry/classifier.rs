//! Classification of failures into retryable and terminal.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tarantool_core::TarantoolError;

/// Error type a fallible classification predicate may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Predicate = dyn Fn(&TarantoolError) -> Result<bool, BoxError> + Send + Sync;

/// Decides whether a failed attempt may be retried.
///
/// A predicate that returns an error or panics does not count as "not
/// retryable": the retry policy stops with [`TarantoolError::RetryPredicate`],
/// which carries the predicate's message and the failure it was classifying.
#[derive(Clone)]
pub struct ErrorClassifier {
    predicate: Arc<Predicate>,
}

impl ErrorClassifier {
    /// Retries network-class failures only.
    ///
    /// See [`TarantoolError::is_network_error`].
    pub fn network_errors() -> Self {
        Self::custom(TarantoolError::is_network_error)
    }

    /// Retries every failure except those that end retrying by definition:
    /// exhausted retry budgets, predicate failures and a closed client.
    pub fn any_error() -> Self {
        Self::custom(|error| {
            !error.is_retry_terminal() && !matches!(error, TarantoolError::ClientClosed)
        })
    }

    /// Creates a classifier from an infallible predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&TarantoolError) -> bool + Send + Sync + 'static,
    {
        Self::fallible(move |error| Ok(predicate(error)))
    }

    /// Creates a classifier from a predicate that may itself fail.
    pub fn fallible<F>(predicate: F) -> Self
    where
        F: Fn(&TarantoolError) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Retries when either classifier would.
    pub fn or(self, other: ErrorClassifier) -> Self {
        Self::fallible(move |error| Ok(self.test(error)? || other.test(error)?))
    }

    /// Retries only when both classifiers would.
    pub fn and(self, other: ErrorClassifier) -> Self {
        Self::fallible(move |error| Ok(self.test(error)? && other.test(error)?))
    }

    /// Runs the predicate, turning a panic into an error.
    pub fn test(&self, error: &TarantoolError) -> Result<bool, BoxError> {
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(error))) {
            Ok(result) => result,
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        }
    }

    /// Classifies an owned failure.
    ///
    /// Returns `Ok((retryable, error))`, handing the failure back, or the
    /// terminal [`TarantoolError::RetryPredicate`] wrapping it.
    pub fn classify(&self, error: TarantoolError) -> Result<(bool, TarantoolError), TarantoolError> {
        match self.test(&error) {
            Ok(retryable) => Ok((retryable, error)),
            Err(predicate_error) => {
                tracing::error!(
                    error = %error,
                    predicate_error = %predicate_error,
                    "retry predicate failed"
                );
                Err(TarantoolError::RetryPredicate {
                    message: predicate_error.to_string(),
                    cause: Box::new(error),
                })
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::network_errors()
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorClassifier")
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("predicate panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("predicate panicked: {}", message)
    } else {
        "predicate panicked".to_string()
    }
}
