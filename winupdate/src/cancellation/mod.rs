//! Cooperative cancellation for provisioning runs.
//!
//! A [`CancellationToken`] is handed to every workflow invocation. Retry
//! loops check it before each attempt and race it against in-flight remote
//! calls and delays, so a cancelled run unwinds promptly.

mod token;

pub use token::CancellationToken;
