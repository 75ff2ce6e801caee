//! Device discovery.
//!
//! [`DeviceCatalogBuilder`] runs three passes over the inventory commands
//! and merges them into one [`DeviceCatalog`]:
//!
//! 1. mounted volumes, from the free-space listing (authoritative for
//!    mount state);
//! 2. enumerated partitions, from the partition-table listing, for
//!    unmounted data partitions;
//! 3. candidate EFI identifiers, inspected one by one.
//!
//! A failing command empties its pass; it never aborts the cycle.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::commands;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::parser::{
    InfoFields, ListedPartition, classify, mount_point_label, parse_df, parse_info_fields,
    parse_mount_table, parse_partition_list,
};
use crate::record::{
    DeviceCatalog, DeviceRecord, is_whole_disk, is_zero_capacity_text, parent_disk,
};

/// Listing type or name markers of pseudo and system partitions.
pub const SKIPPED_PARTITION_MARKERS: &[&str] = &[
    "Recovery",
    "VM",
    "Preboot",
    "Update",
    "Snapshot",
    "Apple_APFS_ISC",
    "Apple_APFS_Recovery",
];

/// Listing types that are containers rather than mountable volumes.
const CONTAINER_TYPES: &[&str] = &["Apple_APFS", "Apple_CoreStorage"];

/// Returns true if a listing row names a pseudo/system partition.
pub fn is_skipped_partition(row: &ListedPartition) -> bool {
    if CONTAINER_TYPES.contains(&row.type_name.as_str()) {
        return true;
    }
    SKIPPED_PARTITION_MARKERS.iter().any(|marker| {
        row.type_name.contains(marker)
            || row
                .name
                .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .any(|word| word == *marker)
    })
}

/// Live mount state read once per cycle.
///
/// `None` when the mount table could not be read; records then keep the
/// mount point the info query reported.
#[derive(Debug, Default)]
struct MountState {
    table: Option<HashMap<String, String>>,
}

impl MountState {
    fn mount_override(&self, identifier: &str) -> Option<&str> {
        self.table
            .as_ref()
            .map(|t| t.get(identifier).map(String::as_str).unwrap_or_default())
    }

    fn is_mounted(&self, identifier: &str) -> bool {
        self.table
            .as_ref()
            .is_some_and(|t| t.contains_key(identifier))
    }
}

/// Builds catalogs from the inventory commands.
pub struct DeviceCatalogBuilder {
    executor: Arc<dyn CommandExecutor>,
    config: Arc<EngineConfig>,
}

impl DeviceCatalogBuilder {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: Arc<EngineConfig>) -> Self {
        Self { executor, config }
    }

    /// Runs one discovery cycle.
    pub fn build(&self) -> DeviceCatalog {
        let mounts = self.read_mount_table();
        let listing = self.read_partition_list();

        let mounted = self.mounted_volumes_pass(&listing);
        let partitions = self.enumerated_partitions_pass(&listing, &mounts, &mounted);
        let efi = self.candidate_efi_pass(&listing, &mounts);
        debug!(
            mounted = mounted.len(),
            partitions = partitions.len(),
            efi = efi.len(),
            "discovery passes finished"
        );

        let catalog = merge_passes([mounted, partitions, efi], &listing);
        info!(devices = catalog.len(), "catalog built");
        catalog
    }

    /// Queries a single device, for identifiers absent from the catalog.
    ///
    /// Returns [`Error::DeviceNotFound`] when the info query rejects the
    /// identifier.
    pub fn inspect(&self, identifier: &str) -> Result<DeviceRecord> {
        let identifier = identifier.strip_prefix("/dev/").unwrap_or(identifier);
        let fields = match self.query_info(identifier) {
            Ok(fields) => fields,
            Err(Error::CommandExit { .. }) => {
                return Err(Error::DeviceNotFound {
                    identifier: identifier.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        if fields.is_empty() {
            return Err(Error::DeviceNotFound {
                identifier: identifier.to_string(),
            });
        }

        let mut record = classify(identifier, &fields, None, None);
        if is_whole_disk(identifier) {
            record.child_partitions = children_of(identifier, &self.read_partition_list());
        }
        Ok(record)
    }

    fn query_info(&self, identifier: &str) -> Result<InfoFields> {
        let output = self
            .executor
            .run_checked(&commands::device_info(identifier), false)?;
        Ok(parse_info_fields(&output.stdout))
    }

    fn read_mount_table(&self) -> MountState {
        match self.executor.run_checked(&commands::mount_table(), false) {
            Ok(output) => MountState {
                table: Some(
                    parse_mount_table(&output.stdout)
                        .into_iter()
                        .map(|e| (e.identifier, e.mount_point))
                        .collect(),
                ),
            },
            Err(e) => {
                warn!(error = %e, "mount table unavailable");
                MountState::default()
            }
        }
    }

    fn read_partition_list(&self) -> Vec<ListedPartition> {
        match self.executor.run_checked(&commands::list_partitions(), false) {
            Ok(output) => parse_partition_list(&output.stdout),
            Err(e) => {
                warn!(error = %e, "partition listing unavailable");
                Vec::new()
            }
        }
    }

    /// Pass 1: every mounted device in the free-space listing.
    fn mounted_volumes_pass(&self, listing: &[ListedPartition]) -> Vec<DeviceRecord> {
        let output = match self.executor.run_checked(&commands::free_space(), false) {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "free-space listing unavailable");
                return Vec::new();
            }
        };

        parse_df(&output.stdout)
            .into_iter()
            .map(|entry| {
                let hint = listing_hint(&entry.identifier, listing);
                let mut record = match self.query_info(&entry.identifier) {
                    Ok(fields) => classify(&entry.identifier, &fields, Some(entry.mount_point.as_str()), hint),
                    Err(e) => {
                        debug!(identifier = %entry.identifier, error = %e, "info unavailable for mounted volume");
                        let mut record =
                            DeviceRecord::new(&entry.identifier).with_mount_point(&entry.mount_point);
                        if let Some(label) = mount_point_label(&entry.mount_point) {
                            record.display_name = label;
                        }
                        record
                    }
                };
                if !entry.capacity.is_empty() {
                    record.capacity = entry.capacity;
                }
                record
            })
            .collect()
    }

    /// Pass 2: unmounted, non-EFI data partitions from the partition listing.
    fn enumerated_partitions_pass(
        &self,
        listing: &[ListedPartition],
        mounts: &MountState,
        mounted: &[DeviceRecord],
    ) -> Vec<DeviceRecord> {
        listing
            .iter()
            .filter(|row| !row.is_whole_disk() && !row.is_efi_typed())
            .filter(|row| !is_skipped_partition(row))
            .filter(|row| !is_zero_capacity_text(&row.size))
            .filter(|row| !mounts.is_mounted(&row.identifier))
            .filter(|row| !mounted.iter().any(|r| r.identifier == row.identifier))
            .filter_map(|row| {
                let fields = match self.query_info(&row.identifier) {
                    Ok(fields) => fields,
                    Err(e) => {
                        debug!(identifier = %row.identifier, error = %e, "skipping partition");
                        return None;
                    }
                };
                let mut record = classify(
                    &row.identifier,
                    &fields,
                    mounts.mount_override(&row.identifier),
                    row.internal_hint,
                );
                if record.has_fallback_name() && !row.name.is_empty() {
                    record.display_name = row.name.clone();
                }
                let keep = !record.is_mounted && !record.is_efi && !record.is_zero_sized();
                keep.then_some(record)
            })
            .collect()
    }

    /// Pass 3: `disk0s1 .. disk<N-1>s1` plus EFI-typed listing rows.
    fn candidate_efi_pass(
        &self,
        listing: &[ListedPartition],
        mounts: &MountState,
    ) -> Vec<DeviceRecord> {
        let mut candidates = self.config.efi_candidates();
        for row in listing.iter().filter(|r| r.is_efi_typed()) {
            if !candidates.contains(&row.identifier) {
                candidates.push(row.identifier.clone());
            }
        }

        candidates
            .iter()
            .filter_map(|identifier| {
                // A failed query means there is no such device.
                let fields = self.query_info(identifier).ok()?;
                if fields.is_empty() {
                    return None;
                }
                let record = classify(
                    identifier,
                    &fields,
                    mounts.mount_override(identifier),
                    listing_hint(identifier, listing),
                );
                record.is_efi.then_some(record)
            })
            .collect()
    }
}

/// Merges pass results into a catalog.
///
/// Passes are given in priority order: the first record seen for an
/// identifier keeps its identity and mount data, later ones only fill gaps
/// (see [`DeviceRecord::absorb`]). Whole-disk records get their child
/// partitions from the listing.
pub fn merge_passes<I>(passes: I, listing: &[ListedPartition]) -> DeviceCatalog
where
    I: IntoIterator<Item = Vec<DeviceRecord>>,
{
    let mut records: Vec<DeviceRecord> = passes.into_iter().flatten().collect();
    for record in records
        .iter_mut()
        .filter(|r| r.child_partitions.is_empty() && is_whole_disk(&r.identifier))
    {
        record.child_partitions = children_of(&record.identifier, listing);
    }
    DeviceCatalog::from_records(records)
}

fn children_of(disk: &str, listing: &[ListedPartition]) -> Vec<String> {
    listing
        .iter()
        .filter(|p| p.parent == disk && !p.is_whole_disk())
        .map(|p| p.identifier.clone())
        .collect()
}

fn listing_hint(identifier: &str, listing: &[ListedPartition]) -> Option<bool> {
    listing
        .iter()
        .find(|p| p.identifier == identifier)
        .map(|p| p.internal_hint)
        .unwrap_or_else(|| {
            let disk = parent_disk(identifier);
            listing
                .iter()
                .find(|p| p.parent == disk)
                .and_then(|p| p.internal_hint)
        })
}
