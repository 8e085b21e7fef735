//! # Winupdate
//!
//! Installs Windows updates on a remote machine by staging an update
//! script through a communicator and running it with PowerShell.
//!
//! A run is a short, strictly ordered workflow:
//!
//! - **Staging**: upload the script under a unique name, retrying with its
//!   own attempt and time budget
//! - **Execution**: run the staged script as an encoded command, retrying
//!   until it returns an accepted exit code
//! - **Report**: return the exit code and whether the target still needs
//!   a restart, which is left to the caller
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use winupdate::prelude::*;
//!
//! let config = ProvisionerConfig::new().prepare()?;
//! let provisioner = Provisioner::new(config, Arc::new(LocalCommunicator::new()))
//!     .with_status_sink(Arc::new(LoggingStatusSink::default()));
//!
//! let result = provisioner
//!     .provision(&Payload::from(script), &CancellationToken::new())
//!     .await?;
//! println!("exit code {}", result.final_exit_code);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod communicator;
pub mod errors;
pub mod events;
pub mod observability;
pub mod provisioner;
pub mod retry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::communicator::{
        CommandOutput, Communicator, CommunicatorError, Credentials, LocalCommunicator,
        RemoteCommand,
    };
    pub use crate::errors::{ConfigError, ProvisionError};
    pub use crate::events::{LoggingStatusSink, NoOpStatusSink, StatusSink};
    pub use crate::provisioner::{
        ExitOutcome, Payload, PreparedConfig, Provisioner, ProvisionerConfig, StagedLocation,
        WorkflowResult, WorkflowState,
    };
    pub use crate::retry::{run_with_retry, RetryError, RetryPolicy};
}
