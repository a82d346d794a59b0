//! Retry policies and their factories.

use std::time::Duration;

use rand::Rng;
use tarantool_core::TarantoolError;

use super::classifier::ErrorClassifier;
use crate::config::{ClientConfig, RetryKind, RetryOn};

/// What to do after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Run another attempt after the given delay.
    Retry {
        /// Pause before the next attempt.
        delay: Duration,
    },
    /// Give up and surface the error to the caller.
    Stop(TarantoolError),
}

/// Decides, attempt by attempt, whether a failing operation is retried.
///
/// A policy carries per-operation state (remaining attempts, backoff
/// progress) and must not be shared between concurrent operations; use a
/// [`RetryPolicyFactory`] to get a fresh one per operation.
pub trait RetryPolicy: Send + std::fmt::Debug {
    /// Timeout for the next attempt, given the time elapsed since the first one.
    fn attempt_timeout(&self, elapsed: Duration) -> Duration;

    /// Handles a failed attempt.
    fn on_failure(&mut self, error: TarantoolError, elapsed: Duration) -> RetryDecision;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Box<P> {
    fn attempt_timeout(&self, elapsed: Duration) -> Duration {
        (**self).attempt_timeout(elapsed)
    }

    fn on_failure(&mut self, error: TarantoolError, elapsed: Duration) -> RetryDecision {
        (**self).on_failure(error, elapsed)
    }
}

/// Produces a fresh [`RetryPolicy`] for every logical operation.
pub trait RetryPolicyFactory: Send + Sync + std::fmt::Debug {
    /// Creates a policy in its initial state.
    fn create(&self) -> Box<dyn RetryPolicy>;
}

/// Calculates the next backoff duration with jitter applied.
fn calculate_backoff_with_jitter(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
) -> Duration {
    let base_backoff = current_backoff.as_secs_f64() * multiplier;

    let jitter_factor = if jitter > 0.0 {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    let jittered_backoff = (base_backoff * jitter_factor).max(0.0);

    std::cmp::min(Duration::from_secs_f64(jittered_backoff), max_backoff)
}

/// Delay schedule between attempts.
///
/// The first delay is `initial`; each following one is multiplied by
/// `multiplier` and capped at `max`. A multiplier of 1.0 gives a fixed delay.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Backoff {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Exponentially growing delay.
    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier,
            jitter: 0.0,
        }
    }

    /// Randomizes every delay by up to `jitter` (0.0..=1.0) of its value.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    fn schedule(&self) -> BackoffState {
        BackoffState {
            backoff: self.clone(),
            next: self.initial,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(Duration::ZERO)
    }
}

#[derive(Debug)]
struct BackoffState {
    backoff: Backoff,
    next: Duration,
}

impl BackoffState {
    fn next_delay(&mut self) -> Duration {
        let max = self.backoff.max;
        let delay = if self.backoff.jitter > 0.0 {
            calculate_backoff_with_jitter(self.next, 1.0, max, self.backoff.jitter)
        } else {
            self.next.min(max)
        };
        if self.backoff.multiplier > 1.0 {
            self.next = calculate_backoff_with_jitter(self.next, self.backoff.multiplier, max, 0.0);
        }
        delay
    }
}

/// Retries up to a fixed number of times.
///
/// With `attempts = N` an operation that keeps failing is tried N + 1 times
/// before the policy stops with [`TarantoolError::AttemptsLimitReached`].
#[derive(Debug)]
pub struct AttemptsBoundRetryPolicy {
    attempts: u32,
    remaining: u32,
    attempt_timeout: Duration,
    classifier: ErrorClassifier,
    backoff: BackoffState,
}

impl AttemptsBoundRetryPolicy {
    /// Returns the number of retries left.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl RetryPolicy for AttemptsBoundRetryPolicy {
    fn attempt_timeout(&self, _elapsed: Duration) -> Duration {
        self.attempt_timeout
    }

    fn on_failure(&mut self, error: TarantoolError, _elapsed: Duration) -> RetryDecision {
        let error = match self.classifier.classify(error) {
            Ok((true, error)) => error,
            Ok((false, error)) => return RetryDecision::Stop(error),
            Err(terminal) => return RetryDecision::Stop(terminal),
        };

        if self.remaining == 0 {
            return RetryDecision::Stop(TarantoolError::AttemptsLimitReached {
                attempts: self.attempts,
                source: Box::new(error),
            });
        }

        self.remaining -= 1;
        RetryDecision::Retry {
            delay: self.backoff.next_delay(),
        }
    }
}

/// Retries until the operation timeout elapses.
#[derive(Debug)]
pub struct InfiniteRetryPolicy {
    operation_timeout: Duration,
    request_timeout: Duration,
    classifier: ErrorClassifier,
    backoff: BackoffState,
}

impl RetryPolicy for InfiniteRetryPolicy {
    fn attempt_timeout(&self, elapsed: Duration) -> Duration {
        self.request_timeout
            .min(self.operation_timeout.saturating_sub(elapsed))
    }

    fn on_failure(&mut self, error: TarantoolError, elapsed: Duration) -> RetryDecision {
        let error = match self.classifier.classify(error) {
            Ok((true, error)) => error,
            Ok((false, error)) => return RetryDecision::Stop(error),
            Err(terminal) => return RetryDecision::Stop(terminal),
        };

        if elapsed >= self.operation_timeout {
            return RetryDecision::Stop(TarantoolError::OperationTimeoutExceeded {
                timeout: self.operation_timeout,
                source: Box::new(error),
            });
        }

        // The last delay is clipped to the deadline so one final attempt runs there.
        let remaining = self.operation_timeout - elapsed;
        RetryDecision::Retry {
            delay: self.backoff.next_delay().min(remaining),
        }
    }
}

/// Factory of [`AttemptsBoundRetryPolicy`].
#[derive(Debug, Clone)]
pub struct AttemptsBoundRetryPolicyFactory {
    attempts: u32,
    attempt_timeout: Duration,
    classifier: ErrorClassifier,
    backoff: Backoff,
}

impl AttemptsBoundRetryPolicyFactory {
    /// Creates a factory allowing `attempts` retries per operation.
    pub fn new(attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            attempts,
            attempt_timeout,
            classifier: ErrorClassifier::default(),
            backoff: Backoff::default(),
        }
    }

    /// Sets which failures are retried.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the delay schedule between attempts.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl RetryPolicyFactory for AttemptsBoundRetryPolicyFactory {
    fn create(&self) -> Box<dyn RetryPolicy> {
        Box::new(AttemptsBoundRetryPolicy {
            attempts: self.attempts,
            remaining: self.attempts,
            attempt_timeout: self.attempt_timeout,
            classifier: self.classifier.clone(),
            backoff: self.backoff.schedule(),
        })
    }
}

/// Factory of [`InfiniteRetryPolicy`].
#[derive(Debug, Clone)]
pub struct InfiniteRetryPolicyFactory {
    operation_timeout: Duration,
    request_timeout: Duration,
    classifier: ErrorClassifier,
    backoff: Backoff,
}

impl InfiniteRetryPolicyFactory {
    /// Creates a factory whose operations give up after `operation_timeout`.
    ///
    /// Each attempt is bounded by `request_timeout` and by the time left
    /// until the operation deadline, whichever is shorter.
    pub fn new(operation_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            operation_timeout,
            request_timeout,
            classifier: ErrorClassifier::default(),
            backoff: Backoff::default(),
        }
    }

    /// Sets which failures are retried.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the delay schedule between attempts.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl RetryPolicyFactory for InfiniteRetryPolicyFactory {
    fn create(&self) -> Box<dyn RetryPolicy> {
        Box::new(InfiniteRetryPolicy {
            operation_timeout: self.operation_timeout,
            request_timeout: self.request_timeout,
            classifier: self.classifier.clone(),
            backoff: self.backoff.schedule(),
        })
    }
}

/// Builds the policy factory described by a client configuration.
///
/// Returns `None` when retries are disabled.
pub fn policy_factory_from_config(config: &ClientConfig) -> Option<std::sync::Arc<dyn RetryPolicyFactory>> {
    let retry = config.retry();
    let classifier = match retry.retry_on() {
        RetryOn::NetworkErrors => ErrorClassifier::network_errors(),
        RetryOn::AnyError => ErrorClassifier::any_error(),
    };
    let backoff = Backoff::exponential(retry.delay(), retry.max_delay(), retry.multiplier())
        .with_jitter(retry.jitter());

    match retry.kind() {
        RetryKind::Disabled => None,
        RetryKind::AttemptsBound => Some(std::sync::Arc::new(
            AttemptsBoundRetryPolicyFactory::new(retry.max_attempts(), config.attempt_timeout())
                .with_classifier(classifier)
                .with_backoff(backoff),
        )),
        RetryKind::Infinite => Some(std::sync::Arc::new(
            InfiniteRetryPolicyFactory::new(retry.operation_timeout(), config.attempt_timeout())
                .with_classifier(classifier)
                .with_backoff(backoff),
        )),
    }
}
