//! volctl-core: Core library for volume discovery and mounting.
//!
//! This library reconciles the output of several OS inventory commands into
//! one catalog of storage devices, classifies each device (internal or
//! external, EFI system partition, mounted or not) and runs mount/unmount
//! actions against it with fallback chains and privilege escalation.
//!
//! # Modules
//!
//! - [`executor`]: Command execution and privilege escalation
//! - [`commands`]: The OS command surface
//! - [`parser`]: Parsing of inventory command output
//! - [`record`]: Device records and catalogs
//! - [`value`]: Typed metadata values
//! - [`catalog`]: Discovery passes and merging
//! - [`mount`]: Mount/unmount strategies and bulk operations
//! - [`manager`]: The `DriveManager` facade
//! - [`config`]: Engine configuration
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use volctl_core::{DriveManager, EngineConfig};
//!
//! let manager = DriveManager::with_config(EngineConfig::load_default().unwrap());
//! manager.refresh_blocking();
//!
//! for record in manager.snapshot().iter().filter(|r| !r.is_internal) {
//!     println!("{} {}", record.identifier, record.display_name);
//! }
//!
//! let outcome = manager.mount_all_external();
//! println!("{}", outcome.message);
//! ```

pub mod catalog;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod mount;
pub mod parser;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use catalog::DeviceCatalogBuilder;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use executor::{CommandExecutor, ExecutionContext, PrivilegeEscalation};
pub use manager::{ActionOutcome, DriveManager, RefreshHandle};
pub use mount::{BatchReport, BatchStatus, MountOrchestrator};
pub use record::{DeviceCatalog, DeviceRecord, FilesystemKind};
pub use value::MetadataValue;
