//! Parsers for inventory command output.
//!
//! Every function here is pure: it takes the text a command printed and
//! returns structured values. Malformed lines are skipped and missing fields
//! fall back to defaults; nothing in this module returns an error.
//!
//! Classification of a device (EFI or not, internal or external, which name
//! to show) is driven by the ordered rule tables below. The first rule that
//! has an opinion wins.

use tracing::debug;

use crate::record::{
    DeviceRecord, EFI_DISPLAY_NAME, FilesystemKind, disk_index, is_placeholder_mount_point,
    is_zero_capacity_text, parent_disk,
};
use crate::value::MetadataValue;

/// Size texts of the standard EFI partition layouts (100, 200, 300 MiB).
pub const EFI_SIZE_TEXTS: &[&str] = &["104.9 MB", "209.7 MB", "314.6 MB"];

/// Byte counts of the standard EFI partition layouts.
pub const EFI_SIZE_BYTES: &[u64] = &[104_857_600, 209_715_200, 314_572_800];

/// Info keys carrying a size, in preference order.
const SIZE_KEYS: &[&str] = &["Disk Size", "Volume Size", "Total Size", "Size"];

/// Info keys carrying the filesystem bundle, in preference order.
const BUNDLE_KEYS: &[&str] = &["Type (Bundle)", "File System Personality", "File System"];

/// Info keys carrying an explicit partition type.
const PARTITION_TYPE_KEYS: &[&str] = &["Partition Type", "Content (IOContent)"];

/// Protocol substrings and the locality they imply.
const PROTOCOL_RULES: &[(&str, bool)] = &[
    ("USB", false),
    ("SATA", true),
    ("PCI", true),
    ("NVME", true),
];

/// Disks with an index up to this value are assumed internal by the
/// last-resort heuristic.
const INTERNAL_DISK_INDEX_MAX: u32 = 1;

/// Ordered `Key: Value` fields of one info query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoFields {
    fields: Vec<(String, String)>,
}

impl InfoFields {
    /// First value reported for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value among `keys`, in key order.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Splits info output into `Key: Value` pairs.
///
/// Only the first `:` separates key from value, so values such as
/// `/Volumes/A:B` survive. Lines without a separator are ignored.
pub fn parse_info_fields(text: &str) -> InfoFields {
    let fields = text
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect();
    InfoFields { fields }
}

/// One mounted device from the free-space listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceEntry {
    pub identifier: String,
    pub capacity: String,
    pub mount_point: String,
}

/// Parses `df -h` output.
///
/// The header locates the "Mounted on" column (index 8 on macOS, 5 on
/// Linux); everything from there to the end of the line is the mount point.
pub fn parse_df(text: &str) -> Vec<FreeSpaceEntry> {
    let mut mount_column: Option<usize> = None;
    let mut entries = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("Filesystem") {
            mount_column = trimmed.split_whitespace().position(|t| t == "Mounted");
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let Some(device) = tokens.first().and_then(|d| d.strip_prefix("/dev/")) else {
            continue;
        };
        let column = mount_column.unwrap_or(if tokens.len() >= 9 { 8 } else { 5 });
        let Some(mount_point) = rest_after_fields(trimmed, column) else {
            debug!(line = trimmed, "df line has no mount point column");
            continue;
        };
        if is_placeholder_mount_point(mount_point) {
            continue;
        }

        entries.push(FreeSpaceEntry {
            identifier: device.to_string(),
            capacity: tokens.get(1).map(|s| s.to_string()).unwrap_or_default(),
            mount_point: mount_point.to_string(),
        });
    }

    entries
}

/// Returns the line remainder after skipping `n` whitespace-separated fields.
fn rest_after_fields(line: &str, n: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    let rest = rest.trim_end();
    if rest.is_empty() { None } else { Some(rest) }
}

/// One line of the kernel mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTableEntry {
    pub identifier: String,
    pub mount_point: String,
    pub fs_type: Option<String>,
}

/// Parses `mount` output in both BSD (`dev on /x (fs, opts)`) and Linux
/// (`dev on /x type fs (opts)`) layouts. Only device paths are kept.
pub fn parse_mount_table(text: &str) -> Vec<MountTableEntry> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (device, rest) = line.split_once(" on ")?;
            let identifier = device.trim().strip_prefix("/dev/")?;

            let (mount_point, fs_type) = if let Some((mp, after)) = rest.split_once(" type ") {
                (mp, after.split_whitespace().next().map(str::to_string))
            } else if let Some(open) = rest.rfind(" (") {
                let options = rest[open + 2..].trim_end_matches(')');
                let fs = options
                    .split(',')
                    .next()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                (&rest[..open], fs)
            } else {
                (rest, None)
            };

            let mount_point = mount_point.trim();
            if is_placeholder_mount_point(mount_point) {
                return None;
            }
            Some(MountTableEntry {
                identifier: identifier.to_string(),
                mount_point: mount_point.to_string(),
                fs_type,
            })
        })
        .collect()
}

/// One row of the partition-table listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPartition {
    pub identifier: String,
    /// Whole disk this row belongs to.
    pub parent: String,
    /// Row number; 0 is the whole disk / partition scheme.
    pub index: u32,
    pub type_name: String,
    pub name: String,
    pub size: String,
    /// Locality from the disk header, when it said.
    pub internal_hint: Option<bool>,
}

impl ListedPartition {
    pub fn is_whole_disk(&self) -> bool {
        self.index == 0 || self.identifier == self.parent
    }

    /// True if the row's type names an EFI system partition.
    pub fn is_efi_typed(&self) -> bool {
        self.type_name.contains("EFI")
    }
}

/// Parses `diskutil list` output into rows for every disk and partition.
pub fn parse_partition_list(text: &str) -> Vec<ListedPartition> {
    let mut rows = Vec::new();
    let mut current_disk = String::new();
    let mut internal_hint: Option<bool> = None;
    let mut name_column: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("/dev/") {
            let device = trimmed.split_whitespace().next().unwrap_or_default();
            current_disk = device
                .trim_start_matches("/dev/")
                .trim_end_matches(':')
                .to_string();
            internal_hint = if trimmed.contains("(internal") {
                Some(true)
            } else if trimmed.contains("(external") || trimmed.contains("disk image") {
                Some(false)
            } else {
                None
            };
            continue;
        }

        if trimmed.starts_with("#:") {
            name_column = line.find("NAME");
            continue;
        }

        if let Some(row) = parse_list_row(line, name_column, &current_disk, internal_hint) {
            rows.push(row);
        }
    }

    rows
}

fn parse_list_row(
    line: &str,
    name_column: Option<usize>,
    current_disk: &str,
    internal_hint: Option<bool>,
) -> Option<ListedPartition> {
    let trimmed = line.trim_start();
    let (index_text, _) = trimmed.split_once(':')?;
    let index: u32 = index_text.trim().parse().ok()?;

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let identifier = *tokens.last()?;
    if !identifier.starts_with("disk") {
        debug!(line, "listing row without identifier");
        return None;
    }
    let size = format!(
        "{} {}",
        tokens[tokens.len() - 3].trim_start_matches(['*', '+']),
        tokens[tokens.len() - 2]
    );

    // Body between "N:" and the size column holds TYPE then NAME.
    let colon = line.find(':')?;
    let id_start = line.rfind(identifier)?;
    let unit_start = line[..id_start].rfind(tokens[tokens.len() - 2])?;
    let size_start = line[..unit_start].rfind(tokens[tokens.len() - 3])?;
    let body_end = size_start.max(colon + 1);
    let (type_name, name) = match name_column.filter(|c| *c > colon && *c <= body_end) {
        Some(col) => (
            line.get(colon + 1..col).unwrap_or_default().trim(),
            line.get(col..body_end).unwrap_or_default().trim(),
        ),
        None => {
            let body = line.get(colon + 1..body_end).unwrap_or_default().trim();
            body.split_once(char::is_whitespace)
                .map(|(t, n)| (t, n.trim()))
                .unwrap_or((body, ""))
        }
    };

    let parent = if current_disk.is_empty() {
        parent_disk(identifier).to_string()
    } else {
        current_disk.to_string()
    };

    Some(ListedPartition {
        identifier: identifier.to_string(),
        parent,
        index,
        type_name: type_name.to_string(),
        name: name.to_string(),
        size,
        internal_hint,
    })
}

/// Splits a size field into display text and an exact byte count.
///
/// `"209.7 MB (209715200 Bytes) (exactly 409600 512-Byte-Units)"` gives
/// `("209.7 MB", Some(209715200))`.
pub fn parse_capacity(text: &str) -> (String, Option<u64>) {
    let display = text.split('(').next().unwrap_or_default().trim().to_string();
    let bytes = text
        .split('(')
        .skip(1)
        .find_map(|part| {
            let number = part.trim().strip_suffix(')')?.trim().strip_suffix("Bytes")?;
            number.trim().replace(',', "").parse::<u64>().ok()
        });
    (display, bytes)
}

/// Returns true if the size matches one of the standard EFI layouts.
pub fn is_efi_sized(display: &str, bytes: Option<u64>) -> bool {
    if bytes.is_some_and(|b| EFI_SIZE_BYTES.contains(&b)) {
        return true;
    }
    let compact: String = display.split_whitespace().collect::<Vec<_>>().join(" ");
    EFI_SIZE_TEXTS.iter().any(|t| compact.contains(t))
}

fn is_placeholder_name(text: &str) -> bool {
    let trimmed = text.trim();
    is_placeholder_mount_point(trimmed) || trimmed == "NO NAME"
}

fn usable_name(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !is_placeholder_name(v))
        .map(|v| v.trim().to_string())
}

/// Last path segment of a mount point, `None` for `/`.
pub fn mount_point_label(mount_point: &str) -> Option<String> {
    let segment = mount_point.trim().trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() || segment == "." {
        None
    } else {
        Some(segment.to_string())
    }
}

/// Which rule decided a device's locality. Exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalityRule {
    Protocol,
    InternalField,
    DeviceLocation,
    RemovableMedia,
    ListingHeader,
    DiskIndex,
}

/// Decides internal (true) vs external (false) and the rule that decided.
///
/// Rules in priority order: protocol text, the explicit `Internal` field,
/// `Device Location`, `Removable Media`, the listing header hint, and
/// finally the unreliable low-disk-index heuristic.
pub fn classify_locality(
    identifier: &str,
    fields: &InfoFields,
    listing_hint: Option<bool>,
) -> (bool, LocalityRule) {
    if let Some(protocol) = fields.get_any(&["Protocol", "Bus Protocol"]) {
        let upper = protocol.to_ascii_uppercase();
        if let Some((_, internal)) = PROTOCOL_RULES.iter().find(|(p, _)| upper.contains(p)) {
            return (*internal, LocalityRule::Protocol);
        }
    }
    match fields.get("Internal").map(str::trim) {
        Some(v) if v.starts_with("Yes") => return (true, LocalityRule::InternalField),
        Some(v) if v.starts_with("No") => return (false, LocalityRule::InternalField),
        _ => {}
    }
    match fields.get("Device Location").map(str::trim) {
        Some("Internal") => return (true, LocalityRule::DeviceLocation),
        Some("External") => return (false, LocalityRule::DeviceLocation),
        _ => {}
    }
    if let Some(removable) = fields.get_any(&["Removable Media", "Media Removal"]) {
        if removable.contains("Removable") || removable.starts_with("Yes") {
            return (false, LocalityRule::RemovableMedia);
        }
    }
    if let Some(internal) = listing_hint {
        return (internal, LocalityRule::ListingHeader);
    }
    let internal = disk_index(identifier).is_none_or(|i| i <= INTERNAL_DISK_INDEX_MAX);
    (internal, LocalityRule::DiskIndex)
}

/// Returns true if any EFI rule matches.
pub fn classify_efi(fields: &InfoFields, capacity: &str, capacity_bytes: Option<u64>) -> bool {
    let bundle_says = fields
        .get_any(BUNDLE_KEYS)
        .is_some_and(|b| b.contains("EFI") || b.contains("msdos"));
    let partition_type_says = PARTITION_TYPE_KEYS
        .iter()
        .filter_map(|k| fields.get(k))
        .any(|v| v.contains("EFI"));
    bundle_says || partition_type_says || is_efi_sized(capacity, capacity_bytes)
}

/// Builds a record from one info query.
///
/// `mount_point_override` replaces the reported mount point (the
/// mounted-volumes pass knows it better); `listing_hint` is the locality
/// the partition listing gave for the parent disk.
pub fn classify(
    identifier: &str,
    fields: &InfoFields,
    mount_point_override: Option<&str>,
    listing_hint: Option<bool>,
) -> DeviceRecord {
    let mut record = DeviceRecord::new(identifier);

    let reported_mount = fields.get("Mount Point").unwrap_or_default();
    record.set_mount_point(mount_point_override.unwrap_or(reported_mount));

    if let Some(size) = fields
        .get_any(SIZE_KEYS)
        .filter(|s| !s.contains("(null)") && !s.trim().is_empty())
    {
        let (display, bytes) = parse_capacity(size);
        record.capacity = if display.is_empty() {
            "Unknown".to_string()
        } else {
            display
        };
        record.capacity_bytes = bytes.or(is_zero_capacity_text(size).then_some(0));
    }

    record.is_efi = classify_efi(fields, &record.capacity, record.capacity_bytes);
    record.filesystem = if record.is_efi {
        FilesystemKind::Efi
    } else {
        fields
            .get_any(BUNDLE_KEYS)
            .map(FilesystemKind::from_bundle)
            .unwrap_or_default()
    };

    let (internal, rule) = classify_locality(identifier, fields, listing_hint);
    record.is_internal = internal;
    debug!(identifier, internal, ?rule, efi = record.is_efi, "classified device");

    if let Some(name) = usable_name(fields.get("Volume Name"))
        .or_else(|| usable_name(fields.get("Device / Media Name")))
        .or_else(|| mount_point_label(&record.mount_point))
        .or_else(|| record.is_efi.then(|| EFI_DISPLAY_NAME.to_string()))
    {
        record.display_name = name;
    }

    record.metadata = fields
        .iter()
        .map(|(k, v)| (k.to_string(), MetadataValue::from_field_text(v)))
        .collect();

    record
}
