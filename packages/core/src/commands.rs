//! OS command surface.
//!
//! Builders for every external command the engine runs. Output of the
//! inventory commands is the parsing contract of [`crate::parser`].

use std::path::Path;

use crate::executor::CommandLine;

/// Device node path for an identifier (`disk2s1` -> `/dev/disk2s1`).
pub fn device_path(identifier: &str) -> String {
    if identifier.starts_with("/dev/") {
        identifier.to_string()
    } else {
        format!("/dev/{identifier}")
    }
}

/// Partition-table listing.
pub fn list_partitions() -> CommandLine {
    CommandLine::new("diskutil").arg("list")
}

/// Free-space / mounted-volume listing.
pub fn free_space() -> CommandLine {
    CommandLine::new("df").arg("-h")
}

/// Kernel mount table.
pub fn mount_table() -> CommandLine {
    CommandLine::new("mount")
}

/// Per-device info query.
pub fn device_info(identifier: &str) -> CommandLine {
    CommandLine::new("diskutil")
        .arg("info")
        .arg(device_path(identifier))
}

/// Standard single-partition mount.
pub fn mount_volume(identifier: &str) -> CommandLine {
    CommandLine::new("diskutil")
        .arg("mount")
        .arg(device_path(identifier))
}

/// Whole-disk mount variant.
pub fn mount_disk(identifier: &str) -> CommandLine {
    CommandLine::new("diskutil")
        .arg("mountDisk")
        .arg(device_path(identifier))
}

/// Manual mount with an explicit filesystem type.
pub fn mount_with_type(fs_type: &str, identifier: &str, dir: &Path) -> CommandLine {
    CommandLine::new("mount")
        .args(["-t", fs_type])
        .arg(device_path(identifier))
        .arg(dir.display().to_string())
}

/// Unmount, optionally forced.
pub fn unmount_volume(identifier: &str, force: bool) -> CommandLine {
    let cmd = CommandLine::new("diskutil").arg("unmount");
    let cmd = if force { cmd.arg("force") } else { cmd };
    cmd.arg(device_path(identifier))
}

/// Ejects the media holding `identifier` (every volume on that disk).
pub fn eject_disk(identifier: &str) -> CommandLine {
    CommandLine::new("diskutil")
        .arg("eject")
        .arg(device_path(identifier))
}

/// Releases whatever is mounted on `dir`.
pub fn unmount_path(dir: &Path) -> CommandLine {
    CommandLine::new("umount").arg(dir.display().to_string())
}

/// Creates `dir` and its parents.
pub fn make_dir(dir: &Path) -> CommandLine {
    CommandLine::new("mkdir")
        .arg("-p")
        .arg(dir.display().to_string())
}
