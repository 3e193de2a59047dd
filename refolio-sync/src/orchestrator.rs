//! Cycle orchestration.
//!
//! One [`SyncOrchestrator`] owns everything a sync needs: the remote
//! source, the local store, the state database, the applied snapshots,
//! progress, and the single-flight lock. [`SyncOrchestrator::sync_all`]
//! runs one full cycle over a set of libraries, sequentially per library,
//! with the fixed phase order index, diff, merge, apply, hydrate,
//! finalize. Per-operation failures are absorbed by the phases; only
//! whole-cycle conditions (unreachable remote, store enumeration failure,
//! busy engine) surface as errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use refolio_model::{LibraryId, Tree};

use crate::diff::{ChangeDetector, DiffStats};
use crate::errors::{Result, SyncError};
use crate::executor::{unfiled_key, StructuralExecutor};
use crate::hydrate::Hydrator;
use crate::lock::{CancelFlag, SyncLock};
use crate::planner::plan;
use crate::progress::{ProgressReporter, SyncPhase};
use crate::shadow::{ShadowSnapshot, ShadowStore};
use crate::source::{ingest, RemoteSource};
use crate::state::{AsyncStateDatabase, LibraryState};
use crate::store::LocalStore;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Operations per concurrent store batch.
    pub batch_size: usize,
    /// Directory holding the per-library applied snapshots.
    pub snapshot_dir: PathBuf,
    /// Path of the sync state database.
    pub database_path: PathBuf,
    /// Trust the remote version counter to skip digest checks.
    pub version_hint: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            snapshot_dir: PathBuf::from(".refolio/snapshots"),
            database_path: PathBuf::from(".refolio/sync.db"),
            version_hint: false,
        }
    }
}

/// Outcome of one library's cycle.
#[derive(Debug, Clone)]
pub struct LibraryReport {
    pub library: LibraryId,
    /// What the diff found.
    pub stats: DiffStats,
    /// Structural operations applied.
    pub applied: usize,
    /// Operations that failed and were skipped (structural or hydration).
    pub failed: usize,
    /// Leaf payloads written.
    pub hydrated: usize,
    /// Snapshot defects repaired during ingestion and tree building.
    pub warnings: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

impl LibraryReport {
    fn new(library: LibraryId, warnings: usize) -> Self {
        Self {
            library,
            stats: DiffStats::default(),
            applied: 0,
            failed: 0,
            hydrated: 0,
            warnings,
            cancelled: false,
            duration: Duration::default(),
        }
    }
}

/// Coordinates sync cycles across libraries.
pub struct SyncOrchestrator {
    config: SyncConfig,
    source: Arc<dyn RemoteSource>,
    store: Arc<dyn LocalStore>,
    state: AsyncStateDatabase,
    snapshots: ShadowStore,
    progress: Arc<ProgressReporter>,
    lock: SyncLock,
    cancel: CancelFlag,
}

impl SyncOrchestrator {
    /// Engine backed by the on-disk state database from the config.
    pub async fn new(
        config: SyncConfig,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let state = AsyncStateDatabase::open(&config.database_path).await?;
        Ok(Self::assemble(config, source, store, state))
    }

    /// Engine with an in-memory state database, for tests and one-shot
    /// runs. Applied snapshots still go to `config.snapshot_dir`.
    pub async fn ephemeral(
        config: SyncConfig,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        let state = AsyncStateDatabase::open_in_memory().await?;
        Ok(Self::assemble(config, source, store, state))
    }

    fn assemble(
        config: SyncConfig,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn LocalStore>,
        state: AsyncStateDatabase,
    ) -> Self {
        let snapshots = ShadowStore::new(config.snapshot_dir.clone());
        Self {
            config,
            source,
            store,
            state,
            snapshots,
            progress: Arc::new(ProgressReporter::new()),
            lock: SyncLock::new(),
            cancel: CancelFlag::new(),
        }
    }

    /// Live progress, shareable with UI code.
    pub fn progress(&self) -> Arc<ProgressReporter> {
        Arc::clone(&self.progress)
    }

    /// Handle for requesting cancellation of a running cycle.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.lock.is_locked()
    }

    /// Durable per-library state, every library ever synced.
    pub async fn library_states(&self) -> Result<Vec<LibraryState>> {
        self.state.all().await
    }

    /// Runs one cycle over `libraries`, sequentially.
    ///
    /// Returns one report per library processed. A pending cancellation
    /// stops the run at the next boundary, resets progress, and comes back
    /// as a short report list (the interrupted library's report carries
    /// the cancelled flag). A second concurrent call fails fast with
    /// [`SyncError::AlreadySyncing`].
    pub async fn sync_all(&self, libraries: &[LibraryId]) -> Result<Vec<LibraryReport>> {
        let Some(_guard) = self.lock.try_acquire() else {
            return Err(SyncError::AlreadySyncing);
        };
        self.progress.reset();
        info!("Starting sync cycle over {} libraries", libraries.len());

        let mut reports = Vec::with_capacity(libraries.len());
        for library in libraries {
            if self.cancel.acknowledge() {
                info!("Sync cancelled before {}", library);
                self.progress.reset();
                return Ok(reports);
            }
            match self.sync_library(library).await {
                Ok(report) => {
                    let cancelled = report.cancelled;
                    reports.push(report);
                    if cancelled {
                        self.cancel.acknowledge();
                        self.progress.reset();
                        return Ok(reports);
                    }
                }
                Err(e) => {
                    error!("Sync of {} failed: {}", library, e);
                    if let Err(state_err) = self.state.abort_sync(library).await {
                        warn!("Failed to record aborted sync for {}: {}", library, state_err);
                    }
                    self.progress.clear(library);
                    self.cancel.acknowledge();
                    return Err(e);
                }
            }
        }

        // Drain any request that arrived too late to observe.
        self.cancel.acknowledge();
        Ok(reports)
    }

    async fn sync_library(&self, library: &LibraryId) -> Result<LibraryReport> {
        let started = Instant::now();
        info!("Syncing library {}", library);
        self.state.begin_sync(library).await?;

        // Index: fetch the remote listings and enumerate the local mirror.
        self.progress.update(library, SyncPhase::Index, 0.0);
        let collections = self.source.fetch_collections(library).await?;
        self.progress.update(library, SyncPhase::Index, 0.3);
        let items = self.source.fetch_items(library).await?;
        self.progress.update(library, SyncPhase::Index, 0.6);

        let (nodes, ingest_warnings) = ingest(library, collections, items);
        let (remote_tree, build_warnings) = Tree::build(nodes);
        let warnings = ingest_warnings.len() + build_warnings.len();
        if warnings > 0 {
            warn!("{} snapshot warnings for {}", warnings, library);
        }

        // The default container is local furniture: the diff never sees it,
        // and anything filed under it counts as top level, exactly as the
        // remote listed it.
        let stored = self.store.list_nodes(library).await?;
        let unfiled = unfiled_key(library);
        let local_nodes: Vec<_> = stored
            .iter()
            .filter(|node| node.key != unfiled)
            .map(|node| {
                let mut local = node.to_node();
                if node.parent.as_ref() == Some(&unfiled) {
                    local.parent_keys.clear();
                }
                local
            })
            .collect();
        let (local_tree, _) = Tree::build(local_nodes);
        self.phase_done(library, SyncPhase::Index).await;

        let mut report = LibraryReport::new(library.clone(), warnings);

        // Diff the actual local contents against the fresh remote tree.
        if self.cancel.is_requested() {
            return self.abort(library, report, started).await;
        }
        let detector = ChangeDetector::with_version_hint(self.config.version_hint);
        let changes = detector.diff(Some(&local_tree), &remote_tree);
        report.stats = changes.stats();
        info!(
            "Library {}: {} created, {} updated, {} moved, {} deleted",
            library,
            report.stats.created,
            report.stats.updated,
            report.stats.moved,
            report.stats.deleted
        );
        self.phase_done(library, SyncPhase::Diff).await;

        // Merge prep: load the applied snapshot and order the plan.
        if self.cancel.is_requested() {
            return self.abort(library, report, started).await;
        }
        let base_tree = self
            .snapshots
            .load(library)
            .await
            .map(|snapshot| snapshot.to_tree());
        if base_tree.is_none() {
            debug!(
                "No applied snapshot for {}; merges fall back to remote",
                library
            );
        }
        let ops = plan(&changes);
        self.phase_done(library, SyncPhase::Merge).await;

        // Apply the structural plan.
        if self.cancel.is_requested() {
            return self.abort(library, report, started).await;
        }
        let mut executor =
            StructuralExecutor::new(Arc::clone(&self.store), self.config.batch_size);
        let progress = Arc::clone(&self.progress);
        let callback_library = library.clone();
        let apply = executor
            .execute(ops, &self.cancel, move |ratio| {
                progress.update(&callback_library, SyncPhase::Apply, ratio);
            })
            .await;
        report.applied = apply.completed;
        report.failed += apply.failed;
        if apply.cancelled {
            return self.abort(library, report, started).await;
        }
        self.phase_done(library, SyncPhase::Apply).await;

        // Hydrate payloads for what the apply touched.
        let hydrator = Hydrator::new(Arc::clone(&self.store), self.config.batch_size);
        let progress = Arc::clone(&self.progress);
        let callback_library = library.clone();
        let hydrated = hydrator
            .hydrate(&apply.touched, base_tree.as_ref(), &self.cancel, move |ratio| {
                progress.update(&callback_library, SyncPhase::Hydrate, ratio);
            })
            .await;
        report.hydrated = hydrated.hydrated;
        report.failed += hydrated.failed;
        if hydrated.cancelled {
            return self.abort(library, report, started).await;
        }
        self.phase_done(library, SyncPhase::Hydrate).await;

        // Finalize: persist the applied snapshot, then the completion mark.
        if self.cancel.is_requested() {
            return self.abort(library, report, started).await;
        }
        let snapshot = ShadowSnapshot::from_tree(library.clone(), &remote_tree);
        self.snapshots.save(&snapshot).await?;
        self.state.finish_sync(library, Utc::now()).await?;
        self.phase_done(library, SyncPhase::Finalize).await;

        report.duration = started.elapsed();
        info!("Library {} synced in {:?}", library, report.duration);
        Ok(report)
    }

    /// Marks a phase fully complete, in memory and in the state database.
    async fn phase_done(&self, library: &LibraryId, phase: SyncPhase) {
        let fraction = self.progress.update(library, phase, 1.0);
        if let Err(e) = self.state.update_progress(library, fraction).await {
            warn!("Failed to persist progress for {}: {}", library, e);
        }
    }

    async fn abort(
        &self,
        library: &LibraryId,
        mut report: LibraryReport,
        started: Instant,
    ) -> Result<LibraryReport> {
        info!("Sync of {} cancelled", library);
        report.cancelled = true;
        report.duration = started.elapsed();
        self.state.abort_sync(library).await?;
        Ok(report)
    }
}
