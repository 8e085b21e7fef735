//! An in-memory communicator with scripted behavior.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::communicator::{CommandOutput, Communicator, CommunicatorError, RemoteCommand};

/// A scripted response to a `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeRun {
    /// The command exits with this code.
    Exit(u32),
    /// The command exits with this code after writing to stdout.
    Output {
        /// Text written to stdout.
        stdout: String,
        /// The exit code.
        exit_code: u32,
    },
    /// The transport fails.
    Fail(String),
}

#[derive(Debug, Default)]
struct FakeState {
    runs: VecDeque<FakeRun>,
    uploads_to_fail: usize,
    upload_count: usize,
    run_count: usize,
    stored: HashMap<String, Vec<u8>>,
    names: Vec<String>,
    discarded: Vec<String>,
    commands: Vec<RemoteCommand>,
}

/// A communicator that keeps staged files in memory and answers commands
/// from a script.
///
/// Script runs consume [`FakeRun`] responses in order and fall back to the
/// default exit code once the script is empty.
#[derive(Debug)]
pub struct FakeCommunicator {
    state: Mutex<FakeState>,
    default_exit_code: u32,
    fail_all_uploads: bool,
    empty_locations: bool,
    run_delay: Duration,
}

impl Default for FakeCommunicator {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            default_exit_code: 0,
            fail_all_uploads: false,
            empty_locations: false,
            run_delay: Duration::ZERO,
        }
    }
}

impl FakeCommunicator {
    /// Creates a communicator whose uploads succeed and whose runs exit 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a communicator whose script runs return `codes` in order.
    #[must_use]
    pub fn with_exit_codes(codes: impl IntoIterator<Item = u32>) -> Self {
        Self::new().with_runs(codes.into_iter().map(FakeRun::Exit))
    }

    /// Queues scripted run responses.
    #[must_use]
    pub fn with_runs(self, runs: impl IntoIterator<Item = FakeRun>) -> Self {
        self.state.lock().runs.extend(runs);
        self
    }

    /// Sets the exit code used once the script is exhausted.
    #[must_use]
    pub fn with_default_exit_code(mut self, code: u32) -> Self {
        self.default_exit_code = code;
        self
    }

    /// Makes the first `count` uploads fail.
    #[must_use]
    pub fn failing_uploads(self, count: usize) -> Self {
        self.state.lock().uploads_to_fail = count;
        self
    }

    /// Makes every upload fail.
    #[must_use]
    pub fn always_failing_uploads(mut self) -> Self {
        self.fail_all_uploads = true;
        self
    }

    /// Makes uploads succeed with an empty location.
    #[must_use]
    pub fn with_empty_locations(mut self) -> Self {
        self.empty_locations = true;
        self
    }

    /// Delays every run.
    #[must_use]
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Returns the number of upload calls.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.state.lock().upload_count
    }

    /// Returns the number of run calls.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.state.lock().run_count
    }

    /// Returns every command run, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.state.lock().commands.clone()
    }

    /// Returns the names passed to upload, in order.
    #[must_use]
    pub fn upload_names(&self) -> Vec<String> {
        self.state.lock().names.clone()
    }

    /// Returns the content stored at `location`.
    #[must_use]
    pub fn stored(&self, location: &str) -> Option<Vec<u8>> {
        self.state.lock().stored.get(location).cloned()
    }

    /// Returns the names discarded after failed uploads.
    #[must_use]
    pub fn discarded(&self) -> Vec<String> {
        self.state.lock().discarded.clone()
    }
}

#[async_trait]
impl Communicator for FakeCommunicator {
    async fn upload(&self, name: &str, content: &[u8]) -> Result<String, CommunicatorError> {
        let fail = {
            let mut state = self.state.lock();
            state.upload_count += 1;
            state.names.push(name.to_string());
            if state.uploads_to_fail > 0 {
                state.uploads_to_fail -= 1;
                true
            } else {
                self.fail_all_uploads
            }
        };

        if fail {
            return Err(CommunicatorError::Upload {
                name: name.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        if self.empty_locations {
            return Ok(String::new());
        }

        let location = format!("C:\\Windows\\Temp\\{name}");
        self.state
            .lock()
            .stored
            .insert(location.clone(), content.to_vec());
        Ok(location)
    }

    async fn discard(&self, name: &str) -> Result<(), CommunicatorError> {
        self.state.lock().discarded.push(name.to_string());
        Ok(())
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, CommunicatorError> {
        let response = {
            let mut state = self.state.lock();
            state.run_count += 1;
            state.commands.push(command.clone());
            state
                .runs
                .pop_front()
                .unwrap_or(FakeRun::Exit(self.default_exit_code))
        };

        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }

        match response {
            FakeRun::Exit(code) => Ok(CommandOutput::with_exit_code(code)),
            FakeRun::Output { stdout, exit_code } => Ok(CommandOutput {
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
                exit_code,
            }),
            FakeRun::Fail(reason) => Err(CommunicatorError::Transport(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_exit_codes_then_default() {
        let fake = FakeCommunicator::with_exit_codes([1, 101]).with_default_exit_code(7);
        let command = RemoteCommand::new("PowerShell x");

        assert_eq!(fake.run(&command).await.unwrap().exit_code, 1);
        assert_eq!(fake.run(&command).await.unwrap().exit_code, 101);
        assert_eq!(fake.run(&command).await.unwrap().exit_code, 7);
        assert_eq!(fake.run_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failures_and_output() {
        let fake = FakeCommunicator::new().with_runs([
            FakeRun::Fail("winrm dropped".to_string()),
            FakeRun::Output {
                stdout: "Installed".to_string(),
                exit_code: 101,
            },
        ]);
        let command = RemoteCommand::new("PowerShell x");

        assert!(fake.run(&command).await.is_err());
        let output = fake.run(&command).await.unwrap();
        assert_eq!(output.exit_code, 101);
        assert_eq!(output.stdout, b"Installed");
        assert_eq!(fake.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_uploads_then_store() {
        let fake = FakeCommunicator::new().failing_uploads(1);

        assert!(fake.upload("a.ps1", b"data").await.is_err());
        let location = fake.upload("b.ps1", b"data").await.unwrap();

        assert_eq!(fake.stored(&location), Some(b"data".to_vec()));
        assert_eq!(fake.upload_count(), 2);
        assert_eq!(fake.upload_names(), vec!["a.ps1", "b.ps1"]);
    }
}
