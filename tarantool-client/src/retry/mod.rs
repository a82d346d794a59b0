//! Retry policy framework.
//!
//! A [`RetryPolicy`] decides after each failed attempt whether to try again
//! and how long to wait first. Two policies are provided:
//!
//! - [`AttemptsBoundRetryPolicy`] allows a fixed number of retries and then
//!   fails with [`AttemptsLimitReached`](tarantool_core::TarantoolError::AttemptsLimitReached).
//! - [`InfiniteRetryPolicy`] retries until an operation deadline and then
//!   fails with [`OperationTimeoutExceeded`](tarantool_core::TarantoolError::OperationTimeoutExceeded).
//!
//! Both wrap the last failure as the error source. Which failures count as
//! retryable is decided by an [`ErrorClassifier`].
//!
//! Policies hold per-operation state. Create one per logical operation
//! through a [`RetryPolicyFactory`] and run it with [`execute`] (on the
//! calling task) or [`wrap_operation`] (on a [`Runtime`](crate::Runtime)).

mod classifier;
mod executor;
mod policy;

pub use classifier::{BoxError, ErrorClassifier};
pub use executor::{execute, wrap_operation, OperationHandle};
pub use policy::{
    policy_factory_from_config, AttemptsBoundRetryPolicy, AttemptsBoundRetryPolicyFactory, Backoff,
    InfiniteRetryPolicy, InfiniteRetryPolicyFactory, RetryDecision, RetryPolicy, RetryPolicyFactory,
};
