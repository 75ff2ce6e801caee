//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use crate::error::{ConfigDirNotFoundSnafu, ConfigParseSnafu, IoResultExt, Result};
use crate::executor::{ExecutionContext, PrivilegeEscalation};

/// Deadline for one unprivileged command (seconds).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Deadline for one elevated command, prompt time included (seconds).
pub const DEFAULT_ELEVATED_TIMEOUT_SECS: u64 = 120;

/// Pause between devices in a bulk operation (milliseconds).
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 500;

/// Parent directory of manual EFI mount points.
pub const DEFAULT_EFI_MOUNT_ROOT: &str = "/Volumes";

/// Number of `diskNs1` candidates scanned for EFI partitions.
pub const DEFAULT_EFI_SCAN_DISKS: u32 = 14;

/// Filesystem types tried, in order, by the manual EFI mount.
pub const DEFAULT_EFI_FILESYSTEMS: &[&str] = &["msdos", "hfs", "exfat", "fat32"];

/// Mount namespaces the unmount guard refuses besides `/`.
pub const DEFAULT_PROTECTED_PREFIXES: &[&str] = &["/System/Volumes"];

/// File name looked up under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Tunables of the discovery and mount engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub escalation: PrivilegeEscalation,
    pub command_timeout_secs: u64,
    pub elevated_timeout_secs: u64,
    pub batch_pause_ms: u64,
    pub efi_mount_root: PathBuf,
    pub efi_filesystems: Vec<String>,
    pub efi_scan_disks: u32,
    pub protected_mount_prefixes: Vec<String>,
    /// Refresh the catalog after facade actions that reached the OS.
    pub refresh_after_action: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escalation: PrivilegeEscalation::platform_default(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            elevated_timeout_secs: DEFAULT_ELEVATED_TIMEOUT_SECS,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
            efi_mount_root: PathBuf::from(DEFAULT_EFI_MOUNT_ROOT),
            efi_filesystems: DEFAULT_EFI_FILESYSTEMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            efi_scan_disks: DEFAULT_EFI_SCAN_DISKS,
            protected_mount_prefixes: DEFAULT_PROTECTED_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            refresh_after_action: true,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_escalation(mut self, escalation: PrivilegeEscalation) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_timeouts(mut self, command_secs: u64, elevated_secs: u64) -> Self {
        self.command_timeout_secs = command_secs;
        self.elevated_timeout_secs = elevated_secs;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_efi_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.efi_mount_root = root.into();
        self
    }

    pub fn with_refresh_after_action(mut self, refresh: bool) -> Self {
        self.refresh_after_action = refresh;
        self
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Dedicated manual mount directory for an EFI partition.
    pub fn efi_mount_dir(&self, identifier: &str) -> PathBuf {
        self.efi_mount_root.join(format!("EFI-{identifier}"))
    }

    /// Candidate EFI identifiers `disk0s1 .. disk<N-1>s1`.
    pub fn efi_candidates(&self) -> Vec<String> {
        (0..self.efi_scan_disks)
            .map(|n| format!("disk{n}s1"))
            .collect()
    }

    /// Returns true if unmounting `mount_point` must be refused.
    ///
    /// Matches on path components, so `/System/VolumesX` is not protected.
    pub fn is_protected_mount_point(&self, mount_point: &str) -> bool {
        let path = Path::new(mount_point.trim());
        path == Path::new("/")
            || self
                .protected_mount_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix))
    }

    /// Real executor honouring the escalation and deadline settings.
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::with_escalation(self.escalation).with_timeouts(
            Duration::from_secs(self.command_timeout_secs),
            Duration::from_secs(self.elevated_timeout_secs),
        )
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).config_read_context(path)?;
        serde_json::from_str(&text).context(ConfigParseSnafu { path })
    }

    /// Loads `<config_dir>/volctl/config.json`, or defaults when absent.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }
}

/// Platform location of the configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context(ConfigDirNotFoundSnafu)?;
    Ok(dir.join("volctl").join(CONFIG_FILE_NAME))
}
