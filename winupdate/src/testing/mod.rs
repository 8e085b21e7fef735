//! Testing utilities for provisioning workflows.
//!
//! This module provides:
//! - An in-memory communicator with scripted responses
//! - Assertions for workflow results

mod assertions;
mod fake;

pub use assertions::{assert_exit, assert_forward_path, assert_provision_failed, assert_provisioned};
pub use fake::{FakeCommunicator, FakeRun};
