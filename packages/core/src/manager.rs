//! The drive manager facade.
//!
//! [`DriveManager`] owns the cached [`DeviceCatalog`], the busy flag and the
//! batch selection. It is a cheap-to-clone handle: every clone shares the
//! same state, so one instance can be constructed at startup and passed to
//! whatever needs it.
//!
//! Discovery runs on a background thread. The new catalog is swapped in
//! under a single write lock, so readers see either the old or the new
//! catalog and never a partial one. Refresh requests that arrive while a
//! cycle is running are coalesced into a single follow-up cycle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::DeviceCatalogBuilder;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::mount::{ActionCompleted, BatchReport, MountOrchestrator};
use crate::record::{DeviceCatalog, DeviceRecord};

/// Result of a public action: never an error, always a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    fn from_result(result: &Result<ActionCompleted>) -> Self {
        match result {
            Ok(done) => Self {
                success: true,
                message: done.message.clone(),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }

    fn from_report(report: &BatchReport) -> Self {
        Self {
            success: report.success(),
            message: report.message(),
        }
    }
}

/// Completion handle of a [`DriveManager::refresh`] call.
pub struct RefreshHandle {
    rx: Receiver<usize>,
}

impl RefreshHandle {
    /// Blocks until the refresh finishes; returns the new catalog size.
    pub fn wait(self) -> Option<usize> {
        self.rx.recv().ok()
    }

    /// Like [`RefreshHandle::wait`] with an upper bound.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<usize> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking check.
    pub fn try_result(&self) -> Option<usize> {
        self.rx.try_recv().ok()
    }
}

/// Refresh bookkeeping, guarded by one lock.
#[derive(Default)]
struct RefreshState {
    busy: bool,
    /// A request arrived while a cycle was running; run one more.
    rerun_requested: bool,
    /// Callers answered by the cycle in flight.
    current: Vec<Sender<usize>>,
    /// Callers that arrived mid-cycle and wait for the rerun.
    next: Vec<Sender<usize>>,
}

struct Shared {
    builder: DeviceCatalogBuilder,
    orchestrator: MountOrchestrator,
    config: Arc<EngineConfig>,
    catalog: RwLock<Arc<DeviceCatalog>>,
    selection: Mutex<BTreeSet<String>>,
    refresh: Mutex<RefreshState>,
}

impl Shared {
    /// Runs discovery cycles until no request arrived during the last one.
    ///
    /// A caller is only answered by a cycle that started after its request,
    /// so an action's refresh always sees the action's effect.
    fn run_refresh(&self) {
        loop {
            let size = self.build_and_swap();

            let (done, again) = {
                let mut state = self.refresh.lock();
                let done = std::mem::take(&mut state.current);
                let again = std::mem::take(&mut state.rerun_requested);
                if again {
                    state.current = std::mem::take(&mut state.next);
                } else {
                    state.busy = false;
                }
                (done, again)
            };
            for waiter in done {
                let _ = waiter.send(size);
            }
            info!(devices = size, "catalog refreshed");

            if !again {
                break;
            }
            debug!("refresh requested mid-cycle, running again");
        }
    }

    fn build_and_swap(&self) -> usize {
        let catalog = Arc::new(self.builder.build());
        let size = catalog.len();
        *self.catalog.write() = catalog.clone();

        let mut selection = self.selection.lock();
        let before = selection.len();
        selection.retain(|id| catalog.contains(id));
        if selection.len() != before {
            debug!(pruned = before - selection.len(), "pruned vanished selections");
        }
        size
    }
}

/// Facade over discovery, the catalog cache and mount orchestration.
#[derive(Clone)]
pub struct DriveManager {
    shared: Arc<Shared>,
}

impl DriveManager {
    /// Creates a manager with an empty catalog. Call [`DriveManager::refresh`]
    /// to populate it.
    pub fn new(executor: Arc<dyn CommandExecutor>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Self {
            shared: Arc::new(Shared {
                builder: DeviceCatalogBuilder::new(executor.clone(), config.clone()),
                orchestrator: MountOrchestrator::new(executor, config.clone()),
                config,
                catalog: RwLock::new(Arc::new(DeviceCatalog::default())),
                selection: Mutex::new(BTreeSet::new()),
                refresh: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Creates a manager running real commands per `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        let executor = Arc::new(config.execution_context());
        Self::new(executor, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Starts a discovery cycle on a background thread.
    ///
    /// If a cycle is already running, the request is queued behind it: the
    /// running cycle finishes, one more cycle runs for every request that
    /// arrived meanwhile, and the handle completes with that one.
    pub fn refresh(&self) -> RefreshHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let start = {
            let mut state = self.shared.refresh.lock();
            if state.busy {
                state.rerun_requested = true;
                state.next.push(tx);
                false
            } else {
                state.busy = true;
                state.current.push(tx);
                true
            }
        };

        if start {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name("volctl-refresh".into())
                .spawn(move || shared.run_refresh());
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn refresh thread, refreshing inline");
                self.shared.run_refresh();
            }
        } else {
            debug!("refresh in flight, queued a rerun");
        }

        RefreshHandle { rx }
    }

    /// Runs a refresh and waits for it. Returns the catalog size.
    pub fn refresh_blocking(&self) -> usize {
        self.refresh()
            .wait()
            .unwrap_or_else(|| self.shared.catalog.read().len())
    }

    pub fn is_busy(&self) -> bool {
        self.shared.refresh.lock().busy
    }

    /// Current catalog with batch-selection flags applied.
    pub fn snapshot(&self) -> DeviceCatalog {
        let catalog = self.shared.catalog.read().clone();
        let selection = self.shared.selection.lock();
        catalog.with_selection(|id| selection.contains(id))
    }

    /// Looks up a record in the current catalog. Never runs a command.
    pub fn get_by_id(&self, identifier: &str) -> Option<DeviceRecord> {
        let id = identifier.strip_prefix("/dev/").unwrap_or(identifier);
        let mut record = self.shared.catalog.read().get(id).cloned()?;
        record.selected_for_batch = self.shared.selection.lock().contains(id);
        Some(record)
    }

    /// Flips the batch flag of `identifier`; returns the new state.
    pub fn toggle_selection(&self, identifier: &str) -> bool {
        let mut selection = self.shared.selection.lock();
        if selection.remove(identifier) {
            false
        } else {
            selection.insert(identifier.to_string());
            true
        }
    }

    /// Flags every device in the current catalog.
    pub fn select_all(&self) {
        let ids: Vec<String> = self
            .shared
            .catalog
            .read()
            .iter()
            .map(|r| r.identifier.clone())
            .collect();
        self.shared.selection.lock().extend(ids);
    }

    pub fn clear_selection(&self) {
        self.shared.selection.lock().clear();
    }

    /// Replaces the selection.
    pub fn set_selection<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = self.shared.selection.lock();
        selection.clear();
        selection.extend(identifiers.into_iter().map(|id| {
            let id: String = id.into();
            id.strip_prefix("/dev/").map(str::to_string).unwrap_or(id)
        }));
    }

    pub fn selection(&self) -> Vec<String> {
        self.shared.selection.lock().iter().cloned().collect()
    }

    /// Mounts one device.
    pub fn mount(&self, identifier: &str) -> ActionOutcome {
        let result = self
            .resolve(identifier)
            .and_then(|record| self.shared.orchestrator.mount(&record));
        self.finish(result)
    }

    /// Unmounts one device.
    pub fn unmount(&self, identifier: &str) -> ActionOutcome {
        let result = self
            .resolve(identifier)
            .and_then(|record| self.shared.orchestrator.unmount(&record));
        self.finish(result)
    }

    /// Ejects the disk holding one device.
    ///
    /// Refused when any volume on that disk is protected.
    pub fn eject(&self, identifier: &str) -> ActionOutcome {
        let catalog = self.shared.catalog.read().clone();
        let result = self
            .resolve(identifier)
            .and_then(|record| self.shared.orchestrator.eject(&record, &catalog));
        self.finish(result)
    }

    pub fn mount_selected(&self) -> ActionOutcome {
        self.run_batch(MountOrchestrator::mount_selected)
    }

    pub fn unmount_selected(&self) -> ActionOutcome {
        self.run_batch(MountOrchestrator::unmount_selected)
    }

    pub fn mount_all_external(&self) -> ActionOutcome {
        self.run_batch(MountOrchestrator::mount_all_external)
    }

    pub fn unmount_all_external(&self) -> ActionOutcome {
        self.run_batch(MountOrchestrator::unmount_all_external)
    }

    pub fn mount_all(&self) -> ActionOutcome {
        self.run_batch(MountOrchestrator::mount_all)
    }

    pub fn unmount_all(&self) -> ActionOutcome {
        self.run_batch(MountOrchestrator::unmount_all)
    }

    /// Catalog record, or a single-device lookup for unknown identifiers.
    fn resolve(&self, identifier: &str) -> Result<DeviceRecord> {
        let id = identifier.strip_prefix("/dev/").unwrap_or(identifier);
        if let Some(record) = self.shared.catalog.read().get(id) {
            return Ok(record.clone());
        }
        debug!(identifier = id, "not in catalog, probing");
        self.shared.builder.inspect(id)
    }

    fn finish(&self, result: Result<ActionCompleted>) -> ActionOutcome {
        let reached_os = match &result {
            Ok(done) => done.changed,
            Err(e) => matches!(
                e,
                Error::MountFailed { .. } | Error::UnmountFailed { .. } | Error::EjectFailed { .. }
            ),
        };
        if reached_os {
            self.refresh_after_action();
        }
        ActionOutcome::from_result(&result)
    }

    fn run_batch<F>(&self, op: F) -> ActionOutcome
    where
        F: FnOnce(&MountOrchestrator, &DeviceCatalog) -> BatchReport,
    {
        // Batch loops act on a copy, never on the live catalog.
        let catalog = self.snapshot();
        let report = op(&self.shared.orchestrator, &catalog);
        if report.reached_os() {
            self.refresh_after_action();
        }
        ActionOutcome::from_report(&report)
    }

    fn refresh_after_action(&self) {
        if self.shared.config.refresh_after_action {
            self.refresh_blocking();
        }
    }
}
