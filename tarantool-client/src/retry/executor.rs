//! Driving an operation through a retry policy.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tarantool_core::{Result, TarantoolError};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::policy::{RetryDecision, RetryPolicy};
use crate::runtime::{Runtime, TokioRuntime};

/// Runs an operation on the calling task, retrying it as the policy allows.
///
/// `operation` is invoked once per attempt and must produce a fresh future
/// every time. Each attempt is bounded by the policy's attempt timeout; an
/// attempt that exceeds it fails with [`TarantoolError::AttemptTimeout`] and
/// is classified like any other failure.
pub async fn execute<P, F, Fut, T>(policy: P, operation: F) -> Result<T>
where
    P: RetryPolicy,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(policy, operation, &TokioRuntime).await
}

/// Runs an operation on `runtime`, retrying it as the policy allows.
///
/// Attempts, delays and timeouts all happen on a task spawned onto the
/// runtime; the returned handle only waits for the final outcome. Dropping
/// the handle does not cancel the operation.
pub fn wrap_operation<P, F, Fut, T, R>(policy: P, operation: F, runtime: &R) -> OperationHandle<T>
where
    P: RetryPolicy + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send,
    T: Send + 'static,
    R: Runtime + Clone,
{
    let (sender, receiver) = oneshot::channel();
    let task_runtime = runtime.clone();
    runtime.spawn(async move {
        let result = run(policy, operation, &task_runtime).await;
        let _ = sender.send(result);
    });
    OperationHandle { receiver }
}

async fn run<P, F, Fut, T, R>(mut policy: P, mut operation: F, runtime: &R) -> Result<T>
where
    P: RetryPolicy,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Runtime,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let attempt_timeout = policy.attempt_timeout(started.elapsed());

        let error = match tokio::time::timeout(attempt_timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Ok(Err(error)) => error,
            Err(_) => TarantoolError::AttemptTimeout(attempt_timeout),
        };

        let message = error.to_string();
        match policy.on_failure(error, started.elapsed()) {
            RetryDecision::Retry { delay } => {
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "retrying operation"
                );
                if !delay.is_zero() {
                    runtime.sleep(delay).await;
                }
            }
            RetryDecision::Stop(error) => {
                tracing::debug!(attempts = attempt, error = %error, "giving up on operation");
                return Err(error);
            }
        }
    }
}

/// Handle to the outcome of an operation started with [`wrap_operation`].
#[derive(Debug)]
pub struct OperationHandle<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(TarantoolError::Connection(
                    "retrying operation was dropped by its runtime".to_string(),
                ))
            })
        })
    }
}
