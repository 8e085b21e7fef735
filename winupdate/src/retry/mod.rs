//! Retry utilities with attempt and wall-clock budgets.
//!
//! Provides the retry primitive shared by staging and execution:
//! - [`RetryPolicy`] describing attempts, overall timeout and delays
//! - [`run_with_retry`] driving an attempt function under a policy
//! - [`RetryError`] preserving the last underlying error on exhaustion

mod policy;
mod runner;

pub use policy::{BackoffStrategy, JitterStrategy, RetryPolicy};
pub use runner::{run_with_retry, RetryError, RetryOutcome};
