//! Unified error types for the volctl-core library.
//!
//! Uses SNAFU for context-rich error handling. Errors never cross the
//! [`crate::manager::DriveManager`] boundary: the facade turns them into
//! [`crate::manager::ActionOutcome`] messages.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The command could not be started (missing executable, spawn error).
    #[snafu(display("failed to launch '{command}': {message}"))]
    CommandLaunch { command: String, message: String },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Command was killed after exceeding its deadline.
    #[snafu(display("command '{command}' timed out after {timeout_secs}s"))]
    CommandTimeout { command: String, timeout_secs: u64 },

    /// User cancelled the administrator approval prompt.
    #[snafu(display("authentication cancelled by user"))]
    AuthenticationCancelled,

    /// Elevation failed or the OS refused access.
    #[snafu(display("permission denied running '{command}': {message}"))]
    PermissionDenied { command: String, message: String },

    /// Unmount of the root volume or a protected system volume was refused.
    #[snafu(display("refusing to unmount {identifier}: {mount_point} is a protected system volume"))]
    UnsafeOperationRejected {
        identifier: String,
        mount_point: String,
    },

    /// No device with this identifier is known to the system.
    #[snafu(display("device {identifier} not found"))]
    DeviceNotFound { identifier: String },

    /// Every mount strategy failed.
    #[snafu(display("failed to mount {identifier}: {reason}. Try in Terminal: {hint}"))]
    MountFailed {
        identifier: String,
        reason: String,
        hint: String,
    },

    /// Standard and forced unmount both failed.
    #[snafu(display("failed to unmount {identifier}: {reason}. Try in Terminal: {hint}"))]
    UnmountFailed {
        identifier: String,
        reason: String,
        hint: String,
    },

    /// The eject command failed.
    #[snafu(display("failed to eject {identifier}: {reason}. Try in Terminal: {hint}"))]
    EjectFailed {
        identifier: String,
        reason: String,
        hint: String,
    },

    /// Config file exists but cannot be read.
    #[snafu(display("failed to read config at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`crate::config::EngineConfig`].
    #[snafu(display("failed to parse config at {}", path.display()))]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Platform config directory could not be determined.
    #[snafu(display("could not determine config directory"))]
    ConfigDirNotFound,
}

impl Error {
    /// Returns true if the error was raised before any OS command ran.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::UnsafeOperationRejected { .. }
                | Error::ConfigRead { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigDirNotFound
        )
    }

    /// Returns true for permission-class failures (declined prompt, refused access).
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationCancelled | Error::PermissionDenied { .. }
        )
    }

    /// Short reason text suitable for one line of a batch report.
    pub fn reason(&self) -> String {
        match self {
            Error::MountFailed { reason, .. }
            | Error::UnmountFailed { reason, .. }
            | Error::EjectFailed { reason, .. } => reason.clone(),
            Error::CommandExit { stderr, code, .. } if stderr.trim().is_empty() => {
                format!("exit code {code}")
            }
            Error::CommandExit { stderr, .. } => stderr.trim().to_string(),
            other => other.to_string(),
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for config read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }
}
