//! Retrying client decorator.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tarantool_core::{Packet, Result, TarantoolError};

use crate::client::TarantoolClient;
use crate::config::ClientConfig;
use crate::retry::{policy_factory_from_config, wrap_operation, OperationHandle, RetryPolicyFactory};
use crate::runtime::{Runtime, TokioRuntime};

/// Client that retries every operation of an inner client.
///
/// Each call gets a fresh policy from the factory, so concurrent calls never
/// share retry state. Failures of the inner client, including connection loss
/// and missing connections, reach the policy as ordinary failures.
pub struct RetryingTarantoolClient<C, R = TokioRuntime> {
    inner: Arc<C>,
    policies: Arc<dyn RetryPolicyFactory>,
    runtime: R,
}

impl<C, R: std::fmt::Debug> std::fmt::Debug for RetryingTarantoolClient<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTarantoolClient")
            .field("policies", &self.policies)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl<C> RetryingTarantoolClient<C>
where
    C: TarantoolClient + 'static,
{
    /// Wraps `inner`, creating a policy from `policies` for every call.
    pub fn new(inner: C, policies: Arc<dyn RetryPolicyFactory>) -> Self {
        Self {
            inner: Arc::new(inner),
            policies,
            runtime: TokioRuntime,
        }
    }

    /// Wraps `inner` with the retry policy described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if retries are disabled in `config`.
    pub fn from_config(inner: C, config: &ClientConfig) -> Result<Self> {
        let policies = policy_factory_from_config(config).ok_or_else(|| {
            TarantoolError::Configuration("retry policy is disabled".to_string())
        })?;
        Ok(Self::new(inner, policies))
    }
}

impl<C, R> RetryingTarantoolClient<C, R>
where
    C: TarantoolClient + 'static,
    R: Runtime + Clone,
{
    /// Runs retries on `runtime` instead of the current Tokio runtime.
    pub fn with_runtime<R2: Runtime + Clone>(self, runtime: R2) -> RetryingTarantoolClient<C, R2> {
        RetryingTarantoolClient {
            inner: self.inner,
            policies: self.policies,
            runtime,
        }
    }

    /// Returns the wrapped client.
    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    /// Runs a custom operation against the wrapped client under a fresh policy.
    ///
    /// `operation` is invoked once per attempt.
    pub fn wrap<T, F, Fut>(&self, mut operation: F) -> OperationHandle<T>
    where
        T: Send + 'static,
        F: FnMut(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        let inner = Arc::clone(&self.inner);
        wrap_operation(
            self.policies.create(),
            move || operation(Arc::clone(&inner)),
            &self.runtime,
        )
    }
}

#[async_trait]
impl<C, R> TarantoolClient for RetryingTarantoolClient<C, R>
where
    C: TarantoolClient + 'static,
    R: Runtime + Clone,
{
    async fn execute(&self, request: Packet) -> Result<Packet> {
        self.wrap(move |client| {
            let request = request.clone();
            async move { client.execute(request).await }
        })
        .await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
