//! Device records and the catalog snapshot.
//!
//! A [`DeviceRecord`] describes one whole disk or partition as reconciled
//! from the inventory commands. A [`DeviceCatalog`] is the ordered, unique
//! set of records produced by one discovery cycle. Catalogs are never edited
//! after construction; a refresh builds a new one.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::MetadataValue;

/// Display name used for EFI partitions without a better label.
pub const EFI_DISPLAY_NAME: &str = "EFI System Partition";

/// Returns true if a mount-point text means "not mounted".
///
/// Inventory tools print several placeholders instead of an empty value.
/// This is the only place that rule lives.
pub fn is_placeholder_mount_point(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty()
        || trimmed == "(null)"
        || trimmed.contains("Not applicable")
        || trimmed.contains("Not mounted")
}

/// Normalises a reported mount point: placeholders become empty.
pub fn normalize_mount_point(text: &str) -> String {
    if is_placeholder_mount_point(text) {
        String::new()
    } else {
        text.trim().to_string()
    }
}

/// Generated fallback name for a device without any label.
pub fn fallback_name(identifier: &str) -> String {
    format!("Disk {identifier}")
}

/// Filesystem family of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilesystemKind {
    #[serde(rename = "APFS")]
    Apfs,
    #[serde(rename = "HFS+")]
    HfsPlus,
    #[serde(rename = "NTFS")]
    Ntfs,
    #[serde(rename = "exFAT")]
    ExFat,
    #[serde(rename = "FAT32")]
    Fat32,
    #[serde(rename = "EFI")]
    Efi,
    Encrypted,
    /// Reported but not one of the known families.
    Other(String),
    #[default]
    Unknown,
}

impl FilesystemKind {
    /// Maps a bundle / personality string to a filesystem family.
    ///
    /// Order matters: `exfat` must be tested before the generic `fat`.
    pub fn from_bundle(text: &str) -> Self {
        let lowered = text.trim().to_ascii_lowercase();
        if lowered.is_empty() || lowered == "(null)" {
            FilesystemKind::Unknown
        } else if lowered.contains("apfs") {
            FilesystemKind::Apfs
        } else if lowered.contains("hfs") {
            FilesystemKind::HfsPlus
        } else if lowered.contains("ntfs") {
            FilesystemKind::Ntfs
        } else if lowered.contains("exfat") {
            FilesystemKind::ExFat
        } else if lowered.contains("fat") {
            FilesystemKind::Fat32
        } else if lowered.contains("crypto") {
            FilesystemKind::Encrypted
        } else {
            FilesystemKind::Other(text.trim().to_string())
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, FilesystemKind::Unknown)
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FilesystemKind::Apfs => "APFS",
            FilesystemKind::HfsPlus => "HFS+",
            FilesystemKind::Ntfs => "NTFS",
            FilesystemKind::ExFat => "exFAT",
            FilesystemKind::Fat32 => "FAT32",
            FilesystemKind::Efi => "EFI",
            FilesystemKind::Encrypted => "Encrypted",
            FilesystemKind::Other(s) => s,
            FilesystemKind::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// One physical or logical storage unit or partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// OS device name (e.g. "disk2s1"). Unique within a catalog.
    pub identifier: String,
    /// Best-effort human label.
    pub display_name: String,
    /// Size as reported, e.g. "209.7 MB". "Unknown" when not reported.
    pub capacity: String,
    /// Size in bytes when the report carried an exact count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,
    pub filesystem: FilesystemKind,
    /// Mount point, empty when unmounted.
    pub mount_point: String,
    pub is_internal: bool,
    #[serde(rename = "isEFI")]
    pub is_efi: bool,
    pub is_mounted: bool,
    /// Partitions of a whole-disk record, in listing order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_partitions: Vec<String>,
    /// Batch-selection scratch flag; never derived from the OS.
    #[serde(default)]
    pub selected_for_batch: bool,
    /// Every field the info query reported, typed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl DeviceRecord {
    /// Creates an unmounted record carrying only defaults.
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            display_name: fallback_name(&identifier),
            identifier,
            capacity: "Unknown".to_string(),
            capacity_bytes: None,
            filesystem: FilesystemKind::Unknown,
            mount_point: String::new(),
            is_internal: true,
            is_efi: false,
            is_mounted: false,
            child_partitions: Vec::new(),
            selected_for_batch: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the mount point, applying the placeholder rule.
    pub fn set_mount_point(&mut self, text: &str) {
        self.mount_point = normalize_mount_point(text);
        self.is_mounted = !self.mount_point.is_empty();
    }

    pub fn with_mount_point(mut self, text: &str) -> Self {
        self.set_mount_point(text);
        self
    }

    /// True if the display name is the generated `"Disk <id>"` fallback.
    pub fn has_fallback_name(&self) -> bool {
        self.display_name.is_empty() || self.display_name == fallback_name(&self.identifier)
    }

    pub fn has_unknown_capacity(&self) -> bool {
        self.capacity.is_empty() || self.capacity == "Unknown"
    }

    /// True if the reported size is zero.
    pub fn is_zero_sized(&self) -> bool {
        self.capacity_bytes == Some(0) || is_zero_capacity_text(&self.capacity)
    }

    /// Whole-disk identifier this record belongs to (`disk2s1` -> `disk2`).
    pub fn parent_disk(&self) -> &str {
        parent_disk(&self.identifier)
    }

    /// Fills gaps in this record from a later, less authoritative report.
    ///
    /// Identity and mount state are kept; the EFI flag is OR-ed so a
    /// speculative EFI classification survives the merge.
    pub fn absorb(&mut self, later: DeviceRecord) {
        let later_has_capacity = !later.has_unknown_capacity();
        let later_has_name = !later.has_fallback_name();

        if later.is_efi && !self.is_efi {
            self.is_efi = true;
            if self.filesystem.is_unknown() {
                self.filesystem = FilesystemKind::Efi;
            }
        }
        if self.filesystem.is_unknown() && !later.filesystem.is_unknown() {
            self.filesystem = later.filesystem;
        }
        if self.has_unknown_capacity() && later_has_capacity {
            self.capacity = later.capacity;
            self.capacity_bytes = later.capacity_bytes;
        }
        if self.has_fallback_name() && later_has_name {
            self.display_name = later.display_name;
        } else if self.has_fallback_name() && self.is_efi {
            self.display_name = EFI_DISPLAY_NAME.to_string();
        }
        if self.child_partitions.is_empty() {
            self.child_partitions = later.child_partitions;
        }
        for (key, value) in later.metadata {
            self.metadata.entry(key).or_insert(value);
        }
    }

    /// Structured-document view of the record.
    pub fn to_value(&self) -> MetadataValue {
        let mut map = BTreeMap::new();
        map.insert("identifier".to_string(), self.identifier.as_str().into());
        map.insert("displayName".to_string(), self.display_name.as_str().into());
        map.insert("capacity".to_string(), self.capacity.as_str().into());
        if let Some(bytes) = self.capacity_bytes {
            map.insert("capacityBytes".to_string(), bytes.into());
        }
        map.insert("filesystemType".to_string(), self.filesystem.to_string().into());
        map.insert("mountPoint".to_string(), self.mount_point.as_str().into());
        map.insert("isInternal".to_string(), self.is_internal.into());
        map.insert("isEFI".to_string(), self.is_efi.into());
        map.insert("isMounted".to_string(), self.is_mounted.into());
        map.insert(
            "childPartitions".to_string(),
            self.child_partitions.clone().into(),
        );
        map.insert("selectedForBatch".to_string(), self.selected_for_batch.into());
        if !self.metadata.is_empty() {
            map.insert(
                "metadata".to_string(),
                MetadataValue::Map(self.metadata.clone()),
            );
        }
        MetadataValue::Map(map)
    }
}

/// Whole-disk part of an identifier: `disk2s1` -> `disk2`, `disk8s4s1` -> `disk8`.
pub fn parent_disk(identifier: &str) -> &str {
    let id = identifier.strip_prefix("/dev/").unwrap_or(identifier);
    let Some(rest) = id.strip_prefix("disk") else {
        return id;
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    &id[..4 + digits]
}

/// Numeric index of the whole disk (`disk12s3` -> 12).
pub fn disk_index(identifier: &str) -> Option<u32> {
    parent_disk(identifier)
        .strip_prefix("disk")
        .and_then(|n| n.parse().ok())
}

/// True for an identifier naming a whole disk rather than a slice.
pub fn is_whole_disk(identifier: &str) -> bool {
    let id = identifier.strip_prefix("/dev/").unwrap_or(identifier);
    id.starts_with("disk") && parent_disk(id) == id
}

/// True for size texts such as `0 B`, `0B`, `Zero KB` or `(zero)`.
pub fn is_zero_capacity_text(text: &str) -> bool {
    let lowered = text.trim().to_ascii_lowercase();
    if lowered.contains("(zero)") || lowered.starts_with("zero") {
        return true;
    }
    let number: String = lowered
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    !number.is_empty() && number.parse::<f64>().is_ok_and(|n| n == 0.0)
}

/// Compares identifiers with embedded numbers in numeric order
/// (`disk2` < `disk10`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_number(&mut left);
                let rn = take_number(&mut right);
                let ord = ln
                    .trim_start_matches('0')
                    .len()
                    .cmp(&rn.trim_start_matches('0').len())
                    .then_with(|| ln.trim_start_matches('0').cmp(rn.trim_start_matches('0')));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        out.push(c);
        chars.next();
    }
    out
}

/// Canonical catalog order: mounted first, EFI first, then name, then identifier.
pub fn catalog_order(a: &DeviceRecord, b: &DeviceRecord) -> Ordering {
    b.is_mounted
        .cmp(&a.is_mounted)
        .then_with(|| b.is_efi.cmp(&a.is_efi))
        .then_with(|| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        })
        .then_with(|| natural_cmp(&a.identifier, &b.identifier))
}

/// Ordered, identifier-unique result of one discovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCatalog {
    records: Vec<DeviceRecord>,
}

impl DeviceCatalog {
    /// Builds a catalog, dropping later duplicates and applying the canonical order.
    pub fn from_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let mut unique: Vec<DeviceRecord> = Vec::new();
        for record in records {
            match unique.iter_mut().find(|r| r.identifier == record.identifier) {
                Some(existing) => existing.absorb(record),
                None => unique.push(record),
            }
        }
        unique.sort_by(catalog_order);
        Self { records: unique }
    }

    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&DeviceRecord> {
        let id = identifier.strip_prefix("/dev/").unwrap_or(identifier);
        self.records.iter().find(|r| r.identifier == id)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    }

    /// Cloned records matching `filter`, for batch loops that must not hold the catalog.
    pub fn select<F>(&self, filter: F) -> Vec<DeviceRecord>
    where
        F: Fn(&DeviceRecord) -> bool,
    {
        self.records.iter().filter(|r| filter(r)).cloned().collect()
    }

    /// Copy of the catalog with `selected_for_batch` set from `selected`.
    pub fn with_selection(&self, selected: impl Fn(&str) -> bool) -> Self {
        let records = self
            .records
            .iter()
            .cloned()
            .map(|mut r| {
                r.selected_for_batch = selected(&r.identifier);
                r
            })
            .collect();
        Self { records }
    }

    /// Structured-document view of the catalog.
    pub fn to_value(&self) -> MetadataValue {
        MetadataValue::List(self.records.iter().map(DeviceRecord::to_value).collect())
    }
}

impl<'a> IntoIterator for &'a DeviceCatalog {
    type Item = &'a DeviceRecord;
    type IntoIter = std::slice::Iter<'a, DeviceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str, mounted: bool, efi: bool) -> DeviceRecord {
        let mut r = DeviceRecord::new(id);
        r.display_name = name.to_string();
        r.is_efi = efi;
        if mounted {
            r.set_mount_point(&format!("/Volumes/{name}"));
        }
        r
    }

    #[test]
    fn test_placeholder_mount_points() {
        for text in [
            "",
            "   ",
            "Not applicable",
            "Not applicable (none)",
            "Not applicable (no file system)",
            "(null)",
            "Not mounted",
            "Volume Not mounted yet",
        ] {
            assert!(is_placeholder_mount_point(text), "{text:?}");
            let r = DeviceRecord::new("disk2s1").with_mount_point(text);
            assert!(!r.is_mounted);
            assert!(r.mount_point.is_empty());
        }
        assert!(!is_placeholder_mount_point("/Volumes/EFI"));
        assert!(DeviceRecord::new("disk2s1").with_mount_point("/").is_mounted);
    }

    #[test]
    fn test_parent_disk() {
        assert_eq!(parent_disk("disk2s1"), "disk2");
        assert_eq!(parent_disk("disk12"), "disk12");
        assert_eq!(parent_disk("disk8s4s1"), "disk8");
        assert_eq!(parent_disk("/dev/disk3s2"), "disk3");
        assert_eq!(disk_index("disk12s3"), Some(12));
        assert!(is_whole_disk("disk4"));
        assert!(!is_whole_disk("disk4s1"));
    }

    #[test]
    fn test_zero_capacity() {
        assert!(is_zero_capacity_text("0 B"));
        assert!(is_zero_capacity_text("0B"));
        assert!(is_zero_capacity_text("Zero KB"));
        assert!(is_zero_capacity_text("0 B (zero)"));
        assert!(!is_zero_capacity_text("209.7 MB"));
        assert!(!is_zero_capacity_text("Unknown"));
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("disk2s1", "disk10s1"), Ordering::Less);
        assert_eq!(natural_cmp("disk2s10", "disk2s2"), Ordering::Greater);
        assert_eq!(natural_cmp("disk2", "disk2"), Ordering::Equal);
        assert_eq!(natural_cmp("disk2", "disk2s1"), Ordering::Less);
    }

    #[test]
    fn test_filesystem_from_bundle() {
        assert_eq!(FilesystemKind::from_bundle("apfs"), FilesystemKind::Apfs);
        assert_eq!(FilesystemKind::from_bundle("exfat"), FilesystemKind::ExFat);
        assert_eq!(FilesystemKind::from_bundle("msdos FAT32"), FilesystemKind::Fat32);
        assert_eq!(FilesystemKind::from_bundle("hfs"), FilesystemKind::HfsPlus);
        assert_eq!(FilesystemKind::from_bundle(""), FilesystemKind::Unknown);
        assert_eq!(
            FilesystemKind::from_bundle("udf"),
            FilesystemKind::Other("udf".to_string())
        );
    }

    #[test]
    fn test_catalog_dedup_and_order() {
        let catalog = DeviceCatalog::from_records(vec![
            record("disk4s1", "backup", false, false),
            record("disk0s1", "EFI", false, true),
            record("disk3s1", "Data", true, false),
            record("disk3s1", "Duplicate", false, false),
            record("disk2s1", "EFI", true, true),
            record("disk5s1", "archive", false, false),
        ]);

        let ids: Vec<&str> = catalog.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, ["disk2s1", "disk3s1", "disk0s1", "disk5s1", "disk4s1"]);
        assert_eq!(catalog.get("disk3s1").map(|r| r.display_name.as_str()), Some("Data"));
        assert_eq!(catalog.get("/dev/disk3s1").map(|r| r.identifier.as_str()), Some("disk3s1"));
    }

    #[test]
    fn test_absorb_keeps_mount_data_and_ors_efi() {
        let mut first = DeviceRecord::new("disk2s1").with_mount_point("/Volumes/EFI");
        let mut later = DeviceRecord::new("disk2s1");
        later.is_efi = true;
        later.display_name = EFI_DISPLAY_NAME.to_string();
        later.capacity = "209.7 MB".to_string();

        first.absorb(later);
        assert!(first.is_mounted);
        assert_eq!(first.mount_point, "/Volumes/EFI");
        assert!(first.is_efi);
        assert_eq!(first.filesystem, FilesystemKind::Efi);
        assert_eq!(first.capacity, "209.7 MB");
        assert_eq!(first.display_name, EFI_DISPLAY_NAME);
    }

    #[test]
    fn test_with_selection_and_value() {
        let catalog = DeviceCatalog::from_records(vec![
            record("disk2s1", "A", true, false),
            record("disk3s1", "B", true, false),
        ]);
        let selected = catalog.with_selection(|id| id == "disk3s1");
        assert!(selected.get("disk3s1").is_some_and(|r| r.selected_for_batch));
        assert!(selected.get("disk2s1").is_some_and(|r| !r.selected_for_batch));
        assert!(catalog.iter().all(|r| !r.selected_for_batch));

        let value = selected.to_value();
        let list = value.as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            list[0].get("identifier").and_then(|v| v.as_str()),
            Some("disk2s1")
        );
        assert_eq!(list[0].get("isMounted").and_then(|v| v.as_bool()), Some(true));
    }
}
