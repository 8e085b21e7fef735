//! Provisioner configuration and defaulting.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::communicator::Credentials;
use crate::errors::ConfigError;
use crate::retry::RetryPolicy;

/// Time to wait for the target to come back after a restart.
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Attempts to upload the update script.
pub const DEFAULT_UPLOAD_RETRY_ATTEMPTS: u32 = 5;

/// Delay between upload attempts.
pub const DEFAULT_UPLOAD_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Budget for uploading the update script.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Attempts to run the update script.
pub const DEFAULT_UPDATE_RETRY_ATTEMPTS: u32 = 3;

/// Budget for the update script to finish.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Delay between update script runs.
pub const DEFAULT_UPDATE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// User-facing provisioner options.
///
/// Zero or negative durations and zero attempt counts mean "use the
/// default" and are resolved by [`ProvisionerConfig::prepare`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Account used to run the update script.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for `username`.
    #[serde(default)]
    pub password: Option<String>,
    /// Update category IDs (UUIDs, not names).
    #[serde(default)]
    pub category_ids: Vec<String>,
    /// Cab files already present on the target to install.
    #[serde(default)]
    pub cab_files: Vec<String>,
    /// Install every available update.
    #[serde(default)]
    pub install_all: bool,
    /// Include hidden updates.
    #[serde(default)]
    pub include_hidden: bool,
    /// Install optional updates.
    #[serde(default)]
    pub install_optional: bool,
    /// Install recommended updates.
    #[serde(default)]
    pub install_recommended: bool,
    /// Install important updates.
    #[serde(default)]
    pub install_important: bool,
    /// Budget for the update script, in seconds.
    #[serde(default = "default_update_timeout")]
    pub update_timeout_seconds: f64,
    /// Attempts to run the update script.
    #[serde(default = "default_update_retry_attempts")]
    pub update_retry_attempts: u32,
    /// Delay between update script runs, in seconds.
    #[serde(default = "default_update_retry_delay")]
    pub update_retry_delay_seconds: f64,
    /// Attempts to upload the update script.
    #[serde(default = "default_upload_retry_attempts")]
    pub upload_retry_attempts: u32,
    /// Delay between upload attempts, in seconds.
    #[serde(default = "default_upload_retry_delay")]
    pub upload_retry_delay_seconds: f64,
    /// Budget for uploading the update script, in seconds.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: f64,
    /// Budget for the restart, in seconds.
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_seconds: f64,
    /// Tells the caller not to restart the target after updates.
    #[serde(default)]
    pub disable_restart: bool,
}

fn default_update_timeout() -> f64 {
    DEFAULT_UPDATE_TIMEOUT.as_secs_f64()
}

fn default_update_retry_attempts() -> u32 {
    DEFAULT_UPDATE_RETRY_ATTEMPTS
}

fn default_update_retry_delay() -> f64 {
    DEFAULT_UPDATE_RETRY_DELAY.as_secs_f64()
}

fn default_upload_retry_attempts() -> u32 {
    DEFAULT_UPLOAD_RETRY_ATTEMPTS
}

fn default_upload_retry_delay() -> f64 {
    DEFAULT_UPLOAD_RETRY_DELAY.as_secs_f64()
}

fn default_upload_timeout() -> f64 {
    DEFAULT_UPLOAD_TIMEOUT.as_secs_f64()
}

fn default_restart_timeout() -> f64 {
    DEFAULT_RESTART_TIMEOUT.as_secs_f64()
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            category_ids: Vec::new(),
            cab_files: Vec::new(),
            install_all: false,
            include_hidden: false,
            install_optional: false,
            install_recommended: false,
            install_important: false,
            update_timeout_seconds: default_update_timeout(),
            update_retry_attempts: default_update_retry_attempts(),
            update_retry_delay_seconds: default_update_retry_delay(),
            upload_retry_attempts: default_upload_retry_attempts(),
            upload_retry_delay_seconds: default_upload_retry_delay(),
            upload_timeout_seconds: default_upload_timeout(),
            restart_timeout_seconds: default_restart_timeout(),
            disable_restart: false,
        }
    }
}

impl std::fmt::Debug for ProvisionerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("category_ids", &self.category_ids)
            .field("cab_files", &self.cab_files)
            .field("install_all", &self.install_all)
            .field("update_timeout_seconds", &self.update_timeout_seconds)
            .field("update_retry_attempts", &self.update_retry_attempts)
            .field("upload_retry_attempts", &self.upload_retry_attempts)
            .field("upload_timeout_seconds", &self.upload_timeout_seconds)
            .field("disable_restart", &self.disable_restart)
            .finish_non_exhaustive()
    }
}

impl ProvisionerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the upload attempt and time budgets.
    #[must_use]
    pub fn with_upload_budget(mut self, attempts: u32, timeout: Duration, delay: Duration) -> Self {
        self.upload_retry_attempts = attempts;
        self.upload_timeout_seconds = timeout.as_secs_f64();
        self.upload_retry_delay_seconds = delay.as_secs_f64();
        self
    }

    /// Sets the update attempt and time budgets.
    #[must_use]
    pub fn with_update_budget(mut self, attempts: u32, timeout: Duration, delay: Duration) -> Self {
        self.update_retry_attempts = attempts;
        self.update_timeout_seconds = timeout.as_secs_f64();
        self.update_retry_delay_seconds = delay.as_secs_f64();
        self
    }

    /// Sets the credentials used to run the update script.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Adds update category IDs.
    #[must_use]
    pub fn with_category_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.category_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Adds cab files to install.
    #[must_use]
    pub fn with_cab_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cab_files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Marks a pending restart as one the caller should skip.
    #[must_use]
    pub fn with_restart_disabled(mut self, disabled: bool) -> Self {
        self.disable_restart = disabled;
        self
    }

    /// Applies defaults, validates, and freezes the configuration.
    ///
    /// Every problem found is reported in a single [`ConfigError`].
    pub fn prepare(self) -> Result<PreparedConfig, ConfigError> {
        let mut errors = ConfigError::new();

        for id in &self.category_ids {
            if Uuid::parse_str(id).is_err() {
                errors.push(format!("invalid update category UUID format: {id}"));
            }
        }

        for cab in &self.cab_files {
            if cab.trim().is_empty() || cab.contains('\0') {
                errors.push(format!("invalid file path for provided cab file: {cab:?}"));
            }
        }

        if self.password.is_some() && self.username.is_none() {
            errors.push("password is set but username is missing");
        }

        errors.into_result()?;

        let specified = self.install_important
            || self.install_optional
            || self.install_recommended
            || !self.cab_files.is_empty()
            || !self.category_ids.is_empty();

        let selection = UpdateSelection {
            explicit: specified || self.install_all || self.include_hidden,
            install_all: self.install_all || !specified,
            include_hidden: self.include_hidden,
            install_optional: self.install_optional,
            install_recommended: self.install_recommended,
            install_important: self.install_important,
            category_ids: self.category_ids,
            cab_files: self.cab_files,
        };

        let credentials = self.username.map(|username| Credentials {
            username,
            password: self.password,
        });

        let upload_policy = RetryPolicy::new(
            attempts_or(self.upload_retry_attempts, DEFAULT_UPLOAD_RETRY_ATTEMPTS),
            seconds_or(self.upload_timeout_seconds, DEFAULT_UPLOAD_TIMEOUT),
        )
        .with_delay(seconds_or(self.upload_retry_delay_seconds, DEFAULT_UPLOAD_RETRY_DELAY));

        let update_policy = RetryPolicy::new(
            attempts_or(self.update_retry_attempts, DEFAULT_UPDATE_RETRY_ATTEMPTS),
            seconds_or(self.update_timeout_seconds, DEFAULT_UPDATE_TIMEOUT),
        )
        .with_delay(seconds_or(self.update_retry_delay_seconds, DEFAULT_UPDATE_RETRY_DELAY));

        Ok(PreparedConfig {
            upload_policy,
            update_policy,
            restart_timeout: seconds_or(self.restart_timeout_seconds, DEFAULT_RESTART_TIMEOUT),
            selection,
            credentials,
            disable_restart: self.disable_restart,
        })
    }
}

fn attempts_or(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn seconds_or(value: f64, default: Duration) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(default)
    } else {
        default
    }
}

/// Which updates the script should install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSelection {
    /// Whether the user asked for something specific.
    pub explicit: bool,
    /// Install every available update.
    pub install_all: bool,
    /// Include hidden updates.
    pub include_hidden: bool,
    /// Install optional updates.
    pub install_optional: bool,
    /// Install recommended updates.
    pub install_recommended: bool,
    /// Install important updates.
    pub install_important: bool,
    /// Update category IDs.
    pub category_ids: Vec<String>,
    /// Cab files to install.
    pub cab_files: Vec<String>,
}

/// Validated configuration with resolved defaults.
///
/// Built once by [`ProvisionerConfig::prepare`] and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedConfig {
    /// Budget for staging the script.
    pub upload_policy: RetryPolicy,
    /// Budget for running the script.
    pub update_policy: RetryPolicy,
    /// How long the caller should allow a pending restart to take.
    pub restart_timeout: Duration,
    /// Which updates to install.
    pub selection: UpdateSelection,
    /// Credentials to run the script as.
    pub credentials: Option<Credentials>,
    /// Whether the caller should skip a pending restart.
    pub disable_restart: bool,
}

impl Default for PreparedConfig {
    fn default() -> Self {
        Self {
            upload_policy: RetryPolicy::new(DEFAULT_UPLOAD_RETRY_ATTEMPTS, DEFAULT_UPLOAD_TIMEOUT)
                .with_delay(DEFAULT_UPLOAD_RETRY_DELAY),
            update_policy: RetryPolicy::new(DEFAULT_UPDATE_RETRY_ATTEMPTS, DEFAULT_UPDATE_TIMEOUT)
                .with_delay(DEFAULT_UPDATE_RETRY_DELAY),
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
            selection: UpdateSelection {
                install_all: true,
                ..UpdateSelection::default()
            },
            credentials: None,
            disable_restart: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_documented_values() {
        let prepared = ProvisionerConfig::new().prepare().unwrap();

        assert_eq!(prepared.upload_policy.max_attempts, 5);
        assert_eq!(prepared.upload_policy.base_delay, Duration::from_secs(30));
        assert_eq!(prepared.upload_policy.overall_timeout, Duration::from_secs(300));
        assert_eq!(prepared.update_policy.max_attempts, 3);
        assert_eq!(prepared.update_policy.overall_timeout, Duration::from_secs(4 * 3600));
        assert_eq!(prepared.restart_timeout, Duration::from_secs(3600));
        assert!(!prepared.disable_restart);
        assert_eq!(prepared, PreparedConfig::default());
    }

    #[test]
    fn test_zero_and_negative_values_use_defaults() {
        let mut config = ProvisionerConfig::new();
        config.upload_retry_attempts = 0;
        config.update_retry_attempts = 0;
        config.upload_timeout_seconds = -1.0;
        config.update_timeout_seconds = 0.0;
        config.upload_retry_delay_seconds = f64::NAN;

        let prepared = config.prepare().unwrap();

        assert_eq!(prepared.upload_policy.max_attempts, DEFAULT_UPLOAD_RETRY_ATTEMPTS);
        assert_eq!(prepared.update_policy.max_attempts, DEFAULT_UPDATE_RETRY_ATTEMPTS);
        assert_eq!(prepared.upload_policy.overall_timeout, DEFAULT_UPLOAD_TIMEOUT);
        assert_eq!(prepared.update_policy.overall_timeout, DEFAULT_UPDATE_TIMEOUT);
        assert_eq!(prepared.upload_policy.base_delay, DEFAULT_UPLOAD_RETRY_DELAY);
    }

    #[test]
    fn test_policies_are_independent() {
        let prepared = ProvisionerConfig::new()
            .with_upload_budget(2, Duration::from_secs(10), Duration::from_secs(1))
            .with_update_budget(7, Duration::from_secs(600), Duration::from_secs(5))
            .prepare()
            .unwrap();

        assert_eq!(prepared.upload_policy.max_attempts, 2);
        assert_eq!(prepared.update_policy.max_attempts, 7);
        assert_ne!(prepared.upload_policy, prepared.update_policy);
    }

    #[test]
    fn test_no_selection_installs_all_implicitly() {
        let prepared = ProvisionerConfig::new().prepare().unwrap();

        assert!(prepared.selection.install_all);
        assert!(!prepared.selection.explicit);
    }

    #[test]
    fn test_specific_selection_is_explicit() {
        let mut config = ProvisionerConfig::new();
        config.install_important = true;

        let prepared = config.prepare().unwrap();

        assert!(prepared.selection.explicit);
        assert!(!prepared.selection.install_all);
        assert!(prepared.selection.install_important);
    }

    #[test]
    fn test_invalid_values_are_accumulated() {
        let mut config = ProvisionerConfig::new()
            .with_category_ids(["not-a-uuid", "28bc880e-0592-4cbf-8f95-c79b17911d5f", "nope"])
            .with_cab_files(["", "C:\\updates\\kb.cab"]);
        config.password = Some("secret".to_string());

        let err = config.prepare().unwrap_err();

        assert_eq!(err.problems.len(), 4);
        assert!(err.problems[0].contains("not-a-uuid"));
        assert!(err.problems[1].contains("nope"));
        assert!(err.problems[2].contains("cab file"));
        assert!(err.problems[3].contains("username"));
    }

    #[test]
    fn test_credentials_carried_into_prepared() {
        let prepared = ProvisionerConfig::new()
            .with_credentials("Administrator", Some("pw".to_string()))
            .prepare()
            .unwrap();

        let credentials = prepared.credentials.unwrap();
        assert_eq!(credentials.username, "Administrator");
        assert_eq!(credentials.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ProvisionerConfig = serde_json::from_value(serde_json::json!({
            "upload_retry_attempts": 2,
            "disable_restart": true,
            "category_ids": ["28bc880e-0592-4cbf-8f95-c79b17911d5f"]
        }))
        .unwrap();

        assert_eq!(config.upload_retry_attempts, 2);
        assert_eq!(config.update_retry_attempts, DEFAULT_UPDATE_RETRY_ATTEMPTS);
        assert!(config.disable_restart);

        let prepared = config.prepare().unwrap();
        assert!(prepared.selection.explicit);
        assert!(prepared.disable_restart);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ProvisionerConfig::new().with_credentials("admin", Some("hunter2".to_string()));
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
