//! Mount and unmount orchestration.
//!
//! Single-device operations walk an ordered chain of strategies and stop
//! at the first that works. Bulk operations run the single-device operation
//! over a filtered copy of the catalog and aggregate per-device outcomes
//! into a [`BatchReport`].

use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::commands::{self, device_path};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::record::{DeviceCatalog, DeviceRecord};

/// Successful end of a single-device action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCompleted {
    pub message: String,
    /// False when the device was already in the requested state.
    pub changed: bool,
}

impl ActionCompleted {
    fn changed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: true,
        }
    }

    fn unchanged(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: false,
        }
    }
}

fn label(record: &DeviceRecord) -> String {
    format!("{} ({})", record.display_name, record.identifier)
}

/// Runs mount and unmount strategies through a [`CommandExecutor`].
pub struct MountOrchestrator {
    executor: Arc<dyn CommandExecutor>,
    config: Arc<EngineConfig>,
}

impl MountOrchestrator {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: Arc<EngineConfig>) -> Self {
        Self { executor, config }
    }

    /// Mounts a device.
    ///
    /// Strategy order: standard mount, whole-disk mount, then (EFI only)
    /// manual mounts with each configured filesystem type. An already
    /// mounted device returns immediately without running anything.
    pub fn mount(&self, record: &DeviceRecord) -> Result<ActionCompleted> {
        if record.is_mounted {
            debug!(identifier = %record.identifier, "already mounted");
            return Ok(ActionCompleted::unchanged(format!(
                "{} is already mounted at {}",
                label(record),
                record.mount_point
            )));
        }

        let id = &record.identifier;
        let standard = match self.executor.run_checked(&commands::mount_volume(id), false) {
            Ok(_) => {
                info!(identifier = %id, "mounted");
                return Ok(ActionCompleted::changed(format!("Mounted {}", label(record))));
            }
            Err(e) => e,
        };
        warn!(identifier = %id, error = %standard, "standard mount failed");

        let mut last_error = match self.executor.run_checked(&commands::mount_disk(id), false) {
            Ok(_) => {
                info!(identifier = %id, "mounted with whole-disk mount");
                return Ok(ActionCompleted::changed(format!("Mounted {}", label(record))));
            }
            Err(e) => e,
        };
        warn!(identifier = %id, error = %last_error, "whole-disk mount failed");

        if record.is_efi {
            match self.manual_efi_mount(record) {
                Ok(done) => return Ok(done),
                Err(Some(e)) => last_error = e,
                Err(None) => {}
            }
        }

        Err(Error::MountFailed {
            identifier: id.clone(),
            reason: last_error.reason(),
            hint: format!("sudo diskutil mount {}", device_path(id)),
        })
    }

    /// Manual EFI mount into the dedicated directory.
    ///
    /// `Err(None)` means no filesystem type was configured.
    fn manual_efi_mount(&self, record: &DeviceRecord) -> std::result::Result<ActionCompleted, Option<Error>> {
        let id = &record.identifier;
        let dir = self.config.efi_mount_dir(id);

        if dir.exists() {
            // A stale mount on the directory would shadow the new one.
            let released = self.executor.run(&commands::unmount_path(&dir), true);
            debug!(dir = %dir.display(), released = released.success, "released EFI directory");
        }
        self.executor
            .run_checked(&commands::make_dir(&dir), true)
            .map_err(Some)?;

        let mut last_error = None;
        for fs_type in &self.config.efi_filesystems {
            match self
                .executor
                .run_checked(&commands::mount_with_type(fs_type, id, &dir), true)
            {
                Ok(_) => {
                    info!(identifier = %id, fs_type, dir = %dir.display(), "mounted EFI manually");
                    return Ok(ActionCompleted::changed(format!(
                        "Mounted {} ({fs_type}) at {}",
                        label(record),
                        dir.display()
                    )));
                }
                // A declined prompt or refused credential fails the next type too.
                Err(e) if e.is_permission() => return Err(Some(e)),
                Err(e) => {
                    debug!(identifier = %id, fs_type, error = %e, "manual mount attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error)
    }

    /// Refuses unmounting the root volume or a protected system volume.
    pub fn check_unmount_allowed(&self, record: &DeviceRecord) -> Result<()> {
        if record.is_mounted && self.config.is_protected_mount_point(&record.mount_point) {
            warn!(identifier = %record.identifier, mount_point = %record.mount_point, "refusing protected unmount");
            return Err(Error::UnsafeOperationRejected {
                identifier: record.identifier.clone(),
                mount_point: record.mount_point.clone(),
            });
        }
        Ok(())
    }

    /// Unmounts a device: standard first, then forced with elevation.
    ///
    /// The protected-volume guard runs before anything else.
    pub fn unmount(&self, record: &DeviceRecord) -> Result<ActionCompleted> {
        self.check_unmount_allowed(record)?;
        if !record.is_mounted {
            debug!(identifier = %record.identifier, "already unmounted");
            return Ok(ActionCompleted::unchanged(format!(
                "{} is not mounted",
                label(record)
            )));
        }

        let id = &record.identifier;
        match self
            .executor
            .run_checked(&commands::unmount_volume(id, false), false)
        {
            Ok(_) => {
                info!(identifier = %id, "unmounted");
                return Ok(ActionCompleted::changed(format!("Unmounted {}", label(record))));
            }
            Err(e) => warn!(identifier = %id, error = %e, "standard unmount failed"),
        }

        match self
            .executor
            .run_checked(&commands::unmount_volume(id, true), true)
        {
            Ok(_) => {
                info!(identifier = %id, "force-unmounted");
                Ok(ActionCompleted::changed(format!(
                    "Force-unmounted {}",
                    label(record)
                )))
            }
            Err(e) => Err(Error::UnmountFailed {
                identifier: id.clone(),
                reason: e.reason(),
                hint: format!("sudo diskutil unmount force {}", device_path(id)),
            }),
        }
    }

    /// Ejects the disk holding `record`.
    ///
    /// Ejecting takes every volume of the disk offline, so the guard covers
    /// all `siblings` on the same disk, not just the record itself.
    pub fn eject(&self, record: &DeviceRecord, siblings: &DeviceCatalog) -> Result<ActionCompleted> {
        self.check_unmount_allowed(record)?;
        let disk = record.parent_disk();
        for sibling in siblings.iter().filter(|r| r.parent_disk() == disk) {
            self.check_unmount_allowed(sibling)?;
        }

        let id = &record.identifier;
        match self.executor.run_checked(&commands::eject_disk(id), true) {
            Ok(_) => {
                info!(identifier = %id, "ejected");
                Ok(ActionCompleted::changed(format!("Ejected {}", label(record))))
            }
            Err(e) => {
                warn!(identifier = %id, error = %e, "eject failed");
                Err(Error::EjectFailed {
                    identifier: id.clone(),
                    reason: e.reason(),
                    hint: format!("sudo diskutil eject {}", device_path(id)),
                })
            }
        }
    }

    /// Mounts every unmounted external device.
    pub fn mount_all_external(&self, catalog: &DeviceCatalog) -> BatchReport {
        let targets = catalog.select(|r| !r.is_internal && !r.is_mounted);
        self.run_batch(BatchVerb::Mount, targets)
    }

    /// Unmounts every mounted external device.
    pub fn unmount_all_external(&self, catalog: &DeviceCatalog) -> BatchReport {
        let targets = catalog.select(|r| !r.is_internal && r.is_mounted);
        self.run_batch(BatchVerb::Unmount, targets)
    }

    /// Mounts every batch-selected device that is not mounted.
    pub fn mount_selected(&self, catalog: &DeviceCatalog) -> BatchReport {
        let targets = catalog.select(|r| r.selected_for_batch && !r.is_mounted);
        self.run_batch(BatchVerb::Mount, targets)
    }

    /// Unmounts every batch-selected device that is mounted.
    ///
    /// Protected volumes in the selection show up as failed entries.
    pub fn unmount_selected(&self, catalog: &DeviceCatalog) -> BatchReport {
        let targets = catalog.select(|r| r.selected_for_batch && r.is_mounted);
        self.run_batch(BatchVerb::Unmount, targets)
    }

    /// Mounts every unmounted device in the catalog.
    pub fn mount_all(&self, catalog: &DeviceCatalog) -> BatchReport {
        let targets = catalog.select(|r| !r.is_mounted);
        self.run_batch(BatchVerb::Mount, targets)
    }

    /// Unmounts every mounted device except protected system volumes.
    pub fn unmount_all(&self, catalog: &DeviceCatalog) -> BatchReport {
        let targets = catalog
            .select(|r| r.is_mounted && !self.config.is_protected_mount_point(&r.mount_point));
        self.run_batch(BatchVerb::Unmount, targets)
    }

    fn run_batch(&self, verb: BatchVerb, targets: Vec<DeviceRecord>) -> BatchReport {
        let pause = self.config.batch_pause();
        let mut entries = Vec::with_capacity(targets.len());

        for (i, record) in targets.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                thread::sleep(pause);
            }
            let outcome = match verb {
                BatchVerb::Mount => self.mount(record),
                BatchVerb::Unmount => self.unmount(record),
            };
            entries.push(BatchEntry::new(record, outcome));
        }

        let report = BatchReport { verb, entries };
        info!(
            verb = %verb,
            attempted = report.entries.len(),
            failed = report.failed_count(),
            "batch finished"
        );
        report
    }
}

/// Action applied by a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchVerb {
    Mount,
    Unmount,
}

impl BatchVerb {
    fn past_tense(self) -> &'static str {
        match self {
            BatchVerb::Mount => "Mounted",
            BatchVerb::Unmount => "Unmounted",
        }
    }
}

impl fmt::Display for BatchVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchVerb::Mount => f.write_str("mount"),
            BatchVerb::Unmount => f.write_str("unmount"),
        }
    }
}

/// Outcome for one device of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub identifier: String,
    pub display_name: String,
    pub success: bool,
    /// Completion message on success, failure reason otherwise.
    pub detail: String,
    /// Whether any OS command ran for this device.
    pub reached_os: bool,
}

impl BatchEntry {
    fn new(record: &DeviceRecord, outcome: Result<ActionCompleted>) -> Self {
        let (success, detail, reached_os) = match outcome {
            Ok(done) => (true, done.message, done.changed),
            Err(e) => (false, e.reason(), !e.is_preflight()),
        };
        Self {
            identifier: record.identifier.clone(),
            display_name: record.display_name.clone(),
            success,
            detail,
            reached_os,
        }
    }

    /// One report line: `[OK] Name (id)` or `[FAILED] Name (id): reason`.
    pub fn line(&self) -> String {
        if self.success {
            format!("[OK] {} ({})", self.display_name, self.identifier)
        } else {
            format!(
                "[FAILED] {} ({}): {}",
                self.display_name, self.identifier, self.detail
            )
        }
    }
}

/// Aggregate result of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Nothing matched the filter.
    NoOp,
    Success,
    /// At least one success and at least one failure.
    Partial,
    Failed,
}

/// Per-device outcomes of one bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub verb: BatchVerb,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.success).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.entries.len() - self.failed_count()
    }

    pub fn status(&self) -> BatchStatus {
        match (self.succeeded_count(), self.failed_count()) {
            (0, 0) => BatchStatus::NoOp,
            (_, 0) => BatchStatus::Success,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::Partial,
        }
    }

    /// True only when no device failed.
    pub fn success(&self) -> bool {
        matches!(self.status(), BatchStatus::NoOp | BatchStatus::Success)
    }

    /// Whether any device reached the OS.
    pub fn reached_os(&self) -> bool {
        self.entries.iter().any(|e| e.reached_os)
    }

    /// Headline followed by one line per attempted device.
    pub fn message(&self) -> String {
        let total = self.entries.len();
        let headline = match self.status() {
            BatchStatus::NoOp => return format!("No devices to {}", self.verb),
            BatchStatus::Success => format!("{} {total} device(s)", self.verb.past_tense()),
            BatchStatus::Partial => format!(
                "{} {} of {total} device(s); {} failed",
                self.verb.past_tense(),
                self.succeeded_count(),
                self.failed_count()
            ),
            BatchStatus::Failed => format!("Failed to {} {total} device(s)", self.verb),
        };

        let mut lines = vec![headline];
        lines.extend(self.entries.iter().map(BatchEntry::line));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, ScriptedExecutor};

    fn config() -> Arc<EngineConfig> {
        Arc::new(
            EngineConfig::new()
                .with_batch_pause(std::time::Duration::ZERO)
                .with_efi_mount_root("/nonexistent-volctl-test"),
        )
    }

    fn orchestrator(executor: ScriptedExecutor) -> (Arc<ScriptedExecutor>, MountOrchestrator) {
        let executor = Arc::new(executor);
        (executor.clone(), MountOrchestrator::new(executor, config()))
    }

    fn device(id: &str, name: &str, mount_point: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(id).with_mount_point(mount_point);
        record.display_name = name.to_string();
        record
    }

    #[test]
    fn test_mount_already_mounted_is_noop() {
        let (executor, orchestrator) = orchestrator(ScriptedExecutor::new());
        let done = orchestrator
            .mount(&device("disk4s2", "BACKUP", "/Volumes/BACKUP"))
            .unwrap();
        assert!(!done.changed);
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn test_mount_standard() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new().on("diskutil mount /dev/disk4s2", CommandOutput::ok("")),
        );
        let done = orchestrator.mount(&device("disk4s2", "BACKUP", "")).unwrap();
        assert!(done.changed);
        assert_eq!(done.message, "Mounted BACKUP (disk4s2)");
        assert_eq!(executor.call_count(), 1);
    }

    #[test]
    fn test_mount_falls_back_to_whole_disk() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("diskutil mount /dev/disk4s2", CommandOutput::exit(1, "busy"))
                .on("diskutil mountDisk /dev/disk4s2", CommandOutput::ok("")),
        );
        assert!(orchestrator.mount(&device("disk4s2", "BACKUP", "")).is_ok());
        assert_eq!(executor.call_count(), 2);
    }

    #[test]
    fn test_efi_manual_mount_chain() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("mkdir -p /nonexistent-volctl-test/EFI-disk0s1", CommandOutput::ok(""))
                .on_mode(
                    "mount -t msdos /dev/disk0s1 /nonexistent-volctl-test/EFI-disk0s1",
                    true,
                    CommandOutput::ok(""),
                ),
        );
        let mut efi = device("disk0s1", "EFI System Partition", "");
        efi.is_efi = true;

        let done = orchestrator.mount(&efi).unwrap();
        assert!(done.changed);
        assert!(done.message.contains("(msdos)"), "{}", done.message);
        let calls: Vec<String> = executor.calls().into_iter().map(|c| c.command).collect();
        assert_eq!(
            calls,
            [
                "diskutil mount /dev/disk0s1",
                "diskutil mountDisk /dev/disk0s1",
                "mkdir -p /nonexistent-volctl-test/EFI-disk0s1",
                "mount -t msdos /dev/disk0s1 /nonexistent-volctl-test/EFI-disk0s1",
            ]
        );
    }

    #[test]
    fn test_efi_manual_mount_tries_each_filesystem() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("mkdir -p /nonexistent-volctl-test/EFI-disk1s1", CommandOutput::ok("")),
        );
        let mut efi = device("disk1s1", "EFI System Partition", "");
        efi.is_efi = true;

        let err = orchestrator.mount(&efi).unwrap_err();
        assert!(matches!(err, Error::MountFailed { .. }));
        assert!(err.to_string().contains("sudo diskutil mount /dev/disk1s1"));
        assert_eq!(executor.count_prefix("mount -t "), 4);
        assert!(executor.calls().iter().filter(|c| c.command.starts_with("mount -t ")).all(|c| c.elevated));
    }

    #[test]
    fn test_efi_manual_mount_stops_on_cancel() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("mkdir -p /nonexistent-volctl-test/EFI-disk1s1", CommandOutput::ok(""))
                .on(
                    "mount -t msdos /dev/disk1s1 /nonexistent-volctl-test/EFI-disk1s1",
                    CommandOutput::exit(1, "execution error: User canceled. (-128)"),
                ),
        );
        let mut efi = device("disk1s1", "EFI System Partition", "");
        efi.is_efi = true;

        let err = orchestrator.mount(&efi).unwrap_err();
        assert!(err.reason().contains("cancelled"));
        assert_eq!(executor.count_prefix("mount -t "), 1);
    }

    #[test]
    fn test_non_efi_skips_manual_mount() {
        let (executor, orchestrator) = orchestrator(ScriptedExecutor::new());
        let err = orchestrator.mount(&device("disk4s2", "BACKUP", "")).unwrap_err();
        assert!(matches!(err, Error::MountFailed { .. }));
        assert_eq!(executor.call_count(), 2);
    }

    #[test]
    fn test_unmount_root_rejected_without_calls() {
        let (executor, orchestrator) = orchestrator(ScriptedExecutor::new());
        for mount_point in ["/", "/System/Volumes/Data", "/System/Volumes/VM"] {
            let err = orchestrator
                .unmount(&device("disk3s1", "Macintosh HD", mount_point))
                .unwrap_err();
            assert!(err.is_preflight());
        }
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn test_unmount_forced_fallback() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("diskutil unmount /dev/disk4s2", CommandOutput::exit(1, "in use"))
                .on_mode("diskutil unmount force /dev/disk4s2", true, CommandOutput::ok("")),
        );
        let done = orchestrator
            .unmount(&device("disk4s2", "BACKUP", "/Volumes/BACKUP"))
            .unwrap();
        assert_eq!(done.message, "Force-unmounted BACKUP (disk4s2)");
        assert_eq!(executor.call_count(), 2);
    }

    #[test]
    fn test_unmount_failure_has_hint() {
        let (_, orchestrator) = orchestrator(ScriptedExecutor::new());
        let err = orchestrator
            .unmount(&device("disk4s2", "BACKUP", "/Volumes/BACKUP"))
            .unwrap_err();
        assert!(matches!(err, Error::UnmountFailed { .. }));
        assert!(err.to_string().contains("sudo diskutil unmount force /dev/disk4s2"));
    }

    #[test]
    fn test_efi_manual_mount_stops_on_wrong_password() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("mkdir -p /nonexistent-volctl-test/EFI-disk1s1", CommandOutput::ok(""))
                .on(
                    "mount -t msdos /dev/disk1s1 /nonexistent-volctl-test/EFI-disk1s1",
                    CommandOutput::exit(1, "sudo: 1 incorrect password attempt"),
                ),
        );
        let mut efi = device("disk1s1", "EFI System Partition", "");
        efi.is_efi = true;

        let err = orchestrator.mount(&efi).unwrap_err();
        assert!(err.reason().contains("incorrect password"), "{}", err.reason());
        assert_eq!(executor.count_prefix("mount -t "), 1);
    }

    #[test]
    fn test_eject_runs_elevated() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new().on_mode("diskutil eject /dev/disk4s2", true, CommandOutput::ok("")),
        );
        let record = device("disk4s2", "BACKUP", "/Volumes/BACKUP");
        let catalog = DeviceCatalog::from_records(vec![record.clone()]);

        let done = orchestrator.eject(&record, &catalog).unwrap();
        assert!(done.changed);
        assert_eq!(done.message, "Ejected BACKUP (disk4s2)");
        assert_eq!(executor.calls()[0].command, "diskutil eject /dev/disk4s2");
        assert!(executor.calls()[0].elevated);
    }

    #[test]
    fn test_eject_refuses_disk_holding_protected_volume() {
        let (executor, orchestrator) = orchestrator(ScriptedExecutor::new());
        let data = device("disk3s3", "Spare", "");
        let catalog = DeviceCatalog::from_records(vec![
            device("disk3s1s1", "Macintosh HD", "/"),
            data.clone(),
        ]);

        let err = orchestrator.eject(&data, &catalog).unwrap_err();
        assert!(err.is_preflight());
        assert!(matches!(err, Error::UnsafeOperationRejected { ref mount_point, .. } if mount_point == "/"));
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn test_eject_failure_has_hint() {
        let (_, orchestrator) = orchestrator(
            ScriptedExecutor::new().on("diskutil eject /dev/disk4s2", CommandOutput::exit(1, "Disk is busy")),
        );
        let record = device("disk4s2", "BACKUP", "/Volumes/BACKUP");
        let err = orchestrator
            .eject(&record, &DeviceCatalog::default())
            .unwrap_err();
        assert!(matches!(err, Error::EjectFailed { .. }));
        assert_eq!(err.reason(), "Disk is busy");
        assert!(err.to_string().contains("sudo diskutil eject /dev/disk4s2"));
    }

    #[test]
    fn test_unmount_not_mounted_is_noop() {
        let (executor, orchestrator) = orchestrator(ScriptedExecutor::new());
        let done = orchestrator.unmount(&device("disk4s2", "BACKUP", "")).unwrap();
        assert!(!done.changed);
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn test_unmount_selected_partial() {
        let (_, orchestrator) = orchestrator(
            ScriptedExecutor::new()
                .on("diskutil unmount /dev/disk4s2", CommandOutput::ok(""))
                .on("diskutil unmount /dev/disk5s2", CommandOutput::ok("")),
        );
        let catalog = DeviceCatalog::from_records(vec![
            device("disk4s2", "A", "/Volumes/A"),
            device("disk5s2", "B", "/Volumes/B"),
            device("disk6s2", "C", "/Volumes/C"),
            device("disk7s2", "D", "/Volumes/D"),
        ])
        .with_selection(|id| id != "disk7s2");

        let report = orchestrator.unmount_selected(&catalog);
        assert_eq!(report.status(), BatchStatus::Partial);
        assert!(!report.success());
        assert_eq!(report.entries.len(), 3);

        let message = report.message();
        assert!(message.starts_with("Unmounted 2 of 3 device(s); 1 failed"));
        assert_eq!(message.matches("[OK]").count(), 2);
        assert_eq!(message.matches("[FAILED]").count(), 1);
        assert!(message.contains("[FAILED] C (disk6s2): "));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (executor, orchestrator) = orchestrator(ScriptedExecutor::new());
        let catalog = DeviceCatalog::from_records(vec![device("disk4s2", "A", "/Volumes/A")]);
        let report = orchestrator.mount_all_external(&catalog);
        assert_eq!(report.status(), BatchStatus::NoOp);
        assert!(report.success());
        assert!(!report.reached_os());
        assert_eq!(report.message(), "No devices to mount");
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn test_unmount_all_skips_protected() {
        let (executor, orchestrator) = orchestrator(
            ScriptedExecutor::new().on("diskutil unmount /dev/disk4s2", CommandOutput::ok("")),
        );
        let mut external = device("disk4s2", "A", "/Volumes/A");
        external.is_internal = false;
        let catalog = DeviceCatalog::from_records(vec![
            device("disk3s1s1", "Macintosh HD", "/"),
            external,
        ]);
        let report = orchestrator.unmount_all(&catalog);
        assert_eq!(report.status(), BatchStatus::Success);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(executor.call_count(), 1);
    }
}
