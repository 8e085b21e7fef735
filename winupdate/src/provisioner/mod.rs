//! The Windows update workflow.
//!
//! A run moves through three components in order:
//! - [`Stager`] uploads the [`Payload`] under the upload retry policy
//! - [`Executor`] runs it with PowerShell under the update retry policy
//! - [`Provisioner`] sequences both and reports whether a restart is pending

mod command;
mod config;
mod executor;
mod payload;
mod stager;
mod workflow;

pub use command::{
    decode_command, encode_command, encode_utf16le, powershell_command, quote_single,
    CommandDecodeError, InvocationBuilder, POWERSHELL_PREFIX,
};
pub use config::{
    PreparedConfig, ProvisionerConfig, UpdateSelection, DEFAULT_RESTART_TIMEOUT,
    DEFAULT_UPDATE_RETRY_ATTEMPTS, DEFAULT_UPDATE_RETRY_DELAY, DEFAULT_UPDATE_TIMEOUT,
    DEFAULT_UPLOAD_RETRY_ATTEMPTS, DEFAULT_UPLOAD_RETRY_DELAY, DEFAULT_UPLOAD_TIMEOUT,
};
pub use executor::{
    ExecutionAttemptError, ExecutionReport, Executor, ExitOutcome, EXIT_RESTART_PENDING,
    EXIT_SUCCESS, EXIT_SUCCESS_REBOOT_REQUIRED,
};
pub use payload::Payload;
pub use stager::{unique_stage_name, StageReport, StagedLocation, Stager, STAGED_NAME_PREFIX};
pub use workflow::{Provisioner, WorkflowResult, WorkflowState};
