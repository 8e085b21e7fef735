//! Test assertions for workflow results.

use crate::errors::ProvisionError;
use crate::provisioner::{ExitOutcome, WorkflowResult, WorkflowState};

/// Asserts that the run succeeded and returns its result.
pub fn assert_provisioned(result: Result<WorkflowResult, ProvisionError>) -> WorkflowResult {
    match result {
        Ok(result) => result,
        Err(err) => panic!("Expected provisioning to succeed, got error: {err}"),
    }
}

/// Asserts that the run failed and returns its error.
pub fn assert_provision_failed(result: Result<WorkflowResult, ProvisionError>) -> ProvisionError {
    match result {
        Ok(result) => panic!(
            "Expected provisioning to fail, got exit code {} ({})",
            result.final_exit_code, result.classification
        ),
        Err(err) => err,
    }
}

/// Asserts the final exit code and its classification.
pub fn assert_exit(result: &WorkflowResult, exit_code: u32, classification: ExitOutcome) {
    assert_eq!(
        (result.final_exit_code, result.classification),
        (exit_code, classification),
        "Expected exit code {exit_code} ({classification}), got {} ({})",
        result.final_exit_code,
        result.classification
    );
}

/// Asserts that the run ended in `Done` without back edges.
pub fn assert_forward_path(result: &WorkflowResult) {
    assert_eq!(result.states.first(), Some(&WorkflowState::Start));
    assert_eq!(result.states.last(), Some(&WorkflowState::Done));
    for pair in result.states.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "Invalid transition {} -> {} in {:?}",
            pair[0],
            pair[1],
            result.states
        );
    }
}
