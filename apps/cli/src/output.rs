//! Catalog rendering for the terminal.

use volctl_core::{DeviceCatalog, DeviceRecord};

/// One human-readable line per record.
pub fn record_line(record: &DeviceRecord) -> String {
    let location = if record.is_internal {
        "internal"
    } else {
        "external"
    };
    let mount = if record.is_mounted {
        record.mount_point.as_str()
    } else {
        "(not mounted)"
    };
    let mut flags = Vec::new();
    if record.is_efi {
        flags.push("EFI");
    }
    if record.selected_for_batch {
        flags.push("selected");
    }
    let flags = if flags.is_empty() {
        "-".to_string()
    } else {
        flags.join(",")
    };

    format!(
        "{:<12} {:<28} {:>10} {:<10} {:<8} {:<6} {}",
        record.identifier,
        record.display_name,
        record.capacity,
        record.filesystem.to_string(),
        location,
        flags,
        mount
    )
}

pub fn catalog_lines(catalog: &DeviceCatalog) -> Vec<String> {
    if catalog.is_empty() {
        return vec!["No devices found".to_string()];
    }
    catalog.iter().map(record_line).collect()
}

pub fn catalog_json(catalog: &DeviceCatalog) -> serde_json::Result<String> {
    serde_json::to_string_pretty(catalog.records())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line() {
        let mut record = DeviceRecord::new("disk2s1").with_mount_point("/Volumes/EFI");
        record.display_name = "EFI".to_string();
        record.is_efi = true;
        record.capacity = "209.7 MB".to_string();

        let line = record_line(&record);
        assert!(line.starts_with("disk2s1 "));
        assert!(line.contains("209.7 MB"));
        assert!(line.contains("internal"));
        assert!(line.contains(" EFI "));
        assert!(line.ends_with("/Volumes/EFI"));
    }

    #[test]
    fn test_empty_catalog() {
        assert_eq!(catalog_lines(&DeviceCatalog::default()), ["No devices found"]);
    }

    #[test]
    fn test_catalog_json_field_names() {
        let catalog = DeviceCatalog::from_records(vec![DeviceRecord::new("disk4s2")]);
        let json = catalog_json(&catalog).unwrap();
        assert!(json.contains("\"isEFI\": false"));
        assert!(json.contains("\"displayName\": \"Disk disk4s2\""));
        assert!(json.contains("\"mountPoint\": \"\""));
    }
}
