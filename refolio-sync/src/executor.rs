//! Batched execution of a structural plan against the local store.
//!
//! Operations run phase by phase in plan order. Within a phase they are
//! chunked into batches of `batch_size`; one batch's operations run
//! concurrently and the next batch starts only after the previous one
//! settled, which bounds concurrent store calls and keeps the handle
//! cache coherent (it is read before a batch launches and written after
//! it settles). Individual operation failures are logged and skipped; the
//! next cycle's diff picks up whatever was left undone.
//!
//! Only containers live at top level: a leaf the remote lists without any
//! parent is placed under a per-library default container, created on
//! first need and reused across cycles.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use refolio_model::{GlobalKey, LibraryId, Node, NodeKind};

use crate::lock::CancelFlag;
use crate::planner::PlannedOp;
use crate::store::{Handle, LocalStore};

/// Native key reserved for the per-library container that collects leaves
/// the remote lists without any parent. The `@` keeps it outside the
/// remote's key space; the node is local furniture, never part of a diff
/// baseline and never reported to the remote.
pub const UNFILED_NATIVE_KEY: &str = "@unfiled";

const UNFILED_LABEL: &str = "Unfiled";

/// Key of the default container for one library.
pub fn unfiled_key(library: &LibraryId) -> GlobalKey {
    GlobalKey::new(library, UNFILED_NATIVE_KEY)
}

/// A node the executor created or updated, queued for hydration.
#[derive(Debug, Clone)]
pub struct TouchedNode {
    pub key: GlobalKey,
    pub handle: Handle,
    /// The remote state that triggered the touch.
    pub remote: Node,
}

/// What one plan execution accomplished.
///
/// `completed + failed` accounts for every operation the plan contained.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Leaf nodes needing payload hydration, in touch order.
    pub touched: Vec<TouchedNode>,
    pub completed: usize,
    pub failed: usize,
    /// Created nodes whose deferred re-attach did not land; they sit at
    /// top level until the next cycle's diff moves them.
    pub misplaced: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    handle: Handle,
    /// Observed placement: `Some(None)` is top level, `None` means the
    /// placement was never seen and must not short-circuit a move.
    placement: Option<Option<Handle>>,
}

struct CreateOutput {
    node: Node,
    handle: Handle,
    parent: Option<Handle>,
    /// Parent key that could not be resolved at create time.
    missing_parent: Option<GlobalKey>,
}

struct UpdateOutput {
    node: Node,
    handle: Handle,
}

struct MoveOutput {
    key: GlobalKey,
    handle: Handle,
    parent: Option<Handle>,
}

/// Applies planned operations to a [`LocalStore`].
///
/// One executor serves one cycle: the key to handle cache starts empty,
/// fills from creates and lookups, and is dropped with the executor.
pub struct StructuralExecutor {
    store: Arc<dyn LocalStore>,
    cache: HashMap<GlobalKey, CacheEntry>,
    batch_size: usize,
}

impl StructuralExecutor {
    pub fn new(store: Arc<dyn LocalStore>, batch_size: usize) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Runs the plan. Cancellation is polled before every batch; a batch
    /// in flight always completes.
    pub async fn execute(
        &mut self,
        ops: Vec<PlannedOp>,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(f32),
    ) -> ApplyReport {
        let total = ops.len();
        let mut report = ApplyReport::default();
        if total == 0 {
            on_progress(1.0);
            return report;
        }

        let mut creates: Vec<(Node, Option<GlobalKey>)> = Vec::new();
        let mut updates: Vec<Node> = Vec::new();
        let mut moves: Vec<(GlobalKey, Option<GlobalKey>, bool)> = Vec::new();
        let mut deletes: Vec<GlobalKey> = Vec::new();
        for op in ops {
            match op {
                PlannedOp::Create { node, parent } => creates.push((node, parent)),
                PlannedOp::Update { node } => updates.push(node),
                PlannedOp::Move {
                    key,
                    new_parent,
                    container,
                } => moves.push((key, new_parent, container)),
                PlannedOp::Delete { key, .. } => deletes.push(key),
            }
        }
        info!(
            "Executing plan: {} creates, {} updates, {} moves, {} deletes (batch size {})",
            creates.len(),
            updates.len(),
            moves.len(),
            deletes.len(),
            self.batch_size
        );

        let mut done = 0usize;
        // Creates whose parent was missing at create time; re-attached at
        // the start of the moves phase, once the parent batch has settled.
        let mut deferred: Vec<(GlobalKey, GlobalKey)> = Vec::new();

        for batch in creates.chunks(self.batch_size) {
            if cancel.is_requested() {
                report.cancelled = true;
                return report;
            }
            self.run_create_batch(batch, &mut report, &mut deferred).await;
            done += batch.len();
            on_progress(done as f32 / total as f32);
        }

        for batch in updates.chunks(self.batch_size) {
            if cancel.is_requested() {
                report.cancelled = true;
                return report;
            }
            self.run_update_batch(batch, &mut report).await;
            done += batch.len();
            on_progress(done as f32 / total as f32);
        }

        if cancel.is_requested() {
            report.cancelled = true;
            return report;
        }
        // The create already counted as completed; a failed attach only
        // leaves the node misplaced, never double-counts the operation.
        for (child, parent) in std::mem::take(&mut deferred) {
            if !self.attach(&child, &parent).await {
                report.misplaced += 1;
            }
        }

        for batch in moves.chunks(self.batch_size) {
            if cancel.is_requested() {
                report.cancelled = true;
                return report;
            }
            self.run_move_batch(batch, &mut report).await;
            done += batch.len();
            on_progress(done as f32 / total as f32);
        }

        for batch in deletes.chunks(self.batch_size) {
            if cancel.is_requested() {
                report.cancelled = true;
                return report;
            }
            self.run_delete_batch(batch, &mut report).await;
            done += batch.len();
            on_progress(done as f32 / total as f32);
        }

        info!(
            "Plan executed: {} completed, {} failed, {} touched",
            report.completed,
            report.failed,
            report.touched.len()
        );
        report
    }

    async fn run_create_batch(
        &mut self,
        batch: &[(Node, Option<GlobalKey>)],
        report: &mut ApplyReport,
        deferred: &mut Vec<(GlobalKey, GlobalKey)>,
    ) {
        let mut futs = Vec::with_capacity(batch.len());
        for (node, parent_key) in batch {
            let store = Arc::clone(&self.store);
            let node = node.clone();
            let parent_key = parent_key.clone();
            let mut cached_parent = parent_key
                .as_ref()
                .and_then(|key| self.cache.get(key))
                .map(|entry| entry.handle.clone());
            if parent_key.is_none() && !node.is_container() {
                // Parentless leaves are filed under the default container,
                // never left at top level.
                cached_parent = self.default_container_for(&node.key).await;
            }

            futs.push(async move {
                let mut parent = cached_parent;
                let mut missing_parent = None;
                if parent.is_none() {
                    if let Some(key) = &parent_key {
                        match store.find_by_key(key).await {
                            Ok(Some(handle)) => parent = Some(handle),
                            Ok(None) => missing_parent = Some(key.clone()),
                            Err(e) => {
                                warn!("Parent lookup failed for {}: {}", key, e);
                                missing_parent = Some(key.clone());
                            }
                        }
                    }
                }

                let label = node.display_title();
                let handle = match store.create(&node, &label, parent.as_ref()).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("Create failed for {}: {}", node.key, e);
                        return None;
                    }
                };
                // Containers never hydrate, so their payload is written
                // here; leaf payloads arrive through the merge pass.
                if node.is_container() {
                    if let Err(e) = store.write_payload(&handle, &node.payload).await {
                        warn!("Payload write failed for {}: {}", node.key, e);
                        return None;
                    }
                }
                Some(CreateOutput {
                    node,
                    handle,
                    parent,
                    missing_parent,
                })
            });
        }

        for output in join_all(futs).await {
            match output {
                Some(output) => {
                    report.completed += 1;
                    if let Some(parent_key) = output.missing_parent {
                        deferred.push((output.node.key.clone(), parent_key));
                    }
                    self.cache.insert(
                        output.node.key.clone(),
                        CacheEntry {
                            handle: output.handle.clone(),
                            placement: Some(output.parent),
                        },
                    );
                    if !output.node.is_container() {
                        report.touched.push(TouchedNode {
                            key: output.node.key.clone(),
                            handle: output.handle,
                            remote: output.node,
                        });
                    }
                }
                None => report.failed += 1,
            }
        }
    }

    async fn run_update_batch(&mut self, batch: &[Node], report: &mut ApplyReport) {
        let mut futs = Vec::with_capacity(batch.len());
        for node in batch {
            let store = Arc::clone(&self.store);
            let node = node.clone();
            let cached = self.cache.get(&node.key).map(|entry| entry.handle.clone());

            futs.push(async move {
                let handle = match resolve(&store, cached, &node.key).await {
                    Some(handle) => handle,
                    None => {
                        warn!("Update target {} not found locally, skipping", node.key);
                        return None;
                    }
                };
                let label = node.display_title();
                if let Err(e) = store.set_label(&handle, &label).await {
                    warn!("Label update failed for {}: {}", node.key, e);
                    return None;
                }
                if let Err(e) = store.set_version(&handle, node.version).await {
                    warn!("Version stamp failed for {}: {}", node.key, e);
                    return None;
                }
                if node.is_container() {
                    if let Err(e) = store.write_payload(&handle, &node.payload).await {
                        warn!("Payload write failed for {}: {}", node.key, e);
                        return None;
                    }
                }
                Some(UpdateOutput { node, handle })
            });
        }

        for output in join_all(futs).await {
            match output {
                Some(output) => {
                    report.completed += 1;
                    self.cache
                        .entry(output.node.key.clone())
                        .or_insert_with(|| CacheEntry {
                            handle: output.handle.clone(),
                            placement: None,
                        });
                    if !output.node.is_container() {
                        report.touched.push(TouchedNode {
                            key: output.node.key.clone(),
                            handle: output.handle,
                            remote: output.node,
                        });
                    }
                }
                None => report.failed += 1,
            }
        }
    }

    async fn run_move_batch(
        &mut self,
        batch: &[(GlobalKey, Option<GlobalKey>, bool)],
        report: &mut ApplyReport,
    ) {
        let mut futs = Vec::with_capacity(batch.len());
        for (key, new_parent, container) in batch {
            let store = Arc::clone(&self.store);
            let key = key.clone();
            let new_parent = new_parent.clone();
            let cached = self.cache.get(&key).cloned();
            let mut cached_parent = new_parent
                .as_ref()
                .and_then(|parent| self.cache.get(parent))
                .map(|entry| entry.handle.clone());
            if new_parent.is_none() && !*container {
                // A leaf dropped from every parent files under the default
                // container; only containers move to top level.
                cached_parent = self.default_container_for(&key).await;
            }

            futs.push(async move {
                let handle = match resolve(&store, cached.as_ref().map(|e| e.handle.clone()), &key).await
                {
                    Some(handle) => handle,
                    None => {
                        warn!("Move target {} not found locally, skipping", key);
                        return None;
                    }
                };

                let mut target = cached_parent;
                if target.is_none() {
                    if let Some(parent_key) = &new_parent {
                        match resolve(&store, None, parent_key).await {
                            Some(parent) => target = Some(parent),
                            None => {
                                warn!("Move parent {} not found locally, skipping", parent_key);
                                return None;
                            }
                        }
                    }
                }

                // Already in place: nothing to write.
                if let Some(entry) = &cached {
                    if entry.placement.as_ref() == Some(&target) {
                        debug!("Move of {} is a no-op", key);
                        return Some(MoveOutput {
                            key,
                            handle,
                            parent: target,
                        });
                    }
                }

                match store.set_parent(&handle, target.as_ref()).await {
                    Ok(()) => Some(MoveOutput {
                        key,
                        handle,
                        parent: target,
                    }),
                    Err(e) => {
                        warn!("Move failed for {}: {}", key, e);
                        None
                    }
                }
            });
        }

        for output in join_all(futs).await {
            match output {
                Some(output) => {
                    report.completed += 1;
                    self.cache.insert(
                        output.key,
                        CacheEntry {
                            handle: output.handle,
                            placement: Some(output.parent),
                        },
                    );
                }
                None => report.failed += 1,
            }
        }
    }

    async fn run_delete_batch(&mut self, batch: &[GlobalKey], report: &mut ApplyReport) {
        let mut futs = Vec::with_capacity(batch.len());
        for key in batch {
            let store = Arc::clone(&self.store);
            let key = key.clone();
            let cached = self.cache.get(&key).map(|entry| entry.handle.clone());

            futs.push(async move {
                let handle = match resolve(&store, cached, &key).await {
                    Some(handle) => handle,
                    None => {
                        // Already gone; deletion is idempotent.
                        debug!("Delete target {} already absent", key);
                        return (key, true);
                    }
                };
                match store.remove(&handle).await {
                    Ok(()) => (key, true),
                    Err(e) => {
                        warn!("Delete failed for {}: {}", key, e);
                        (key, false)
                    }
                }
            });
        }

        for (key, ok) in join_all(futs).await {
            if ok {
                report.completed += 1;
                self.cache.remove(&key);
            } else {
                report.failed += 1;
            }
        }
    }

    /// Re-attaches a deferred create under its now-existing parent.
    /// Returns false when the attach could not be applied.
    async fn attach(&mut self, child: &GlobalKey, parent: &GlobalKey) -> bool {
        let child_handle = match self.lookup(child).await {
            Some(handle) => handle,
            None => {
                warn!("Deferred attach: {} not found locally", child);
                return false;
            }
        };
        let parent_handle = match self.lookup(parent).await {
            Some(handle) => handle,
            None => {
                warn!("Deferred attach: parent {} still missing for {}", parent, child);
                return false;
            }
        };

        if let Some(entry) = self.cache.get(child) {
            if entry.placement.as_ref() == Some(&Some(parent_handle.clone())) {
                return true;
            }
        }
        match self.store.set_parent(&child_handle, Some(&parent_handle)).await {
            Ok(()) => {
                debug!("Re-attached {} under {}", child, parent);
                self.cache.insert(
                    child.clone(),
                    CacheEntry {
                        handle: child_handle,
                        placement: Some(Some(parent_handle)),
                    },
                );
                true
            }
            Err(e) => {
                warn!("Deferred attach failed for {}: {}", child, e);
                false
            }
        }
    }

    /// Handle of the default container for `child`'s library, creating the
    /// container on first use. `None` means the store refused it and the
    /// child stays at top level this cycle.
    async fn default_container_for(&mut self, child: &GlobalKey) -> Option<Handle> {
        let key = unfiled_key(&LibraryId::new(child.library()));
        if let Some(handle) = self.lookup(&key).await {
            return Some(handle);
        }
        let node = Node::new(key.clone(), NodeKind::Collection);
        match self.store.create(&node, UNFILED_LABEL, None).await {
            Ok(handle) => {
                debug!("Created default container for {}", child.library());
                self.cache.insert(
                    key,
                    CacheEntry {
                        handle: handle.clone(),
                        placement: Some(None),
                    },
                );
                Some(handle)
            }
            Err(e) => {
                warn!(
                    "Default container create failed for {}: {}",
                    child.library(),
                    e
                );
                None
            }
        }
    }

    async fn lookup(&mut self, key: &GlobalKey) -> Option<Handle> {
        if let Some(entry) = self.cache.get(key) {
            return Some(entry.handle.clone());
        }
        match self.store.find_by_key(key).await {
            Ok(Some(handle)) => {
                self.cache.insert(
                    key.clone(),
                    CacheEntry {
                        handle: handle.clone(),
                        placement: None,
                    },
                );
                Some(handle)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Lookup failed for {}: {}", key, e);
                None
            }
        }
    }
}

/// Cache-then-store handle resolution usable inside batch futures.
async fn resolve(
    store: &Arc<dyn LocalStore>,
    cached: Option<Handle>,
    key: &GlobalKey,
) -> Option<Handle> {
    if cached.is_some() {
        return cached;
    }
    match store.find_by_key(key).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Lookup failed for {}: {}", key, e);
            None
        }
    }
}
