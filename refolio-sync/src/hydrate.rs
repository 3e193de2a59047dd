//! Payload hydration for nodes the executor touched.
//!
//! Structural apply leaves payloads alone; hydration fills them in
//! afterwards, batch by batch like the executor. Every touched node gets
//! the three-way merge of its current local payload, the fresh remote
//! payload, and the base from the last applied snapshot, so local
//! annotations survive remote edits. A node without any stored payload
//! yet (just created, or never hydrated) takes the remote payload as-is.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use refolio_model::{Payload, Tree};

use crate::executor::TouchedNode;
use crate::lock::CancelFlag;
use crate::merge::merge;
use crate::store::LocalStore;

/// What one hydration pass accomplished.
#[derive(Debug, Default)]
pub struct HydrateReport {
    pub hydrated: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Writes merged payloads for touched nodes.
pub struct Hydrator {
    store: Arc<dyn LocalStore>,
    batch_size: usize,
}

impl Hydrator {
    pub fn new(store: Arc<dyn LocalStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Hydrates `touched` in batches, merging against `base` (the last
    /// applied remote snapshot). Cancellation is polled between batches;
    /// progress ticks as each node settles, not once per batch.
    pub async fn hydrate(
        &self,
        touched: &[TouchedNode],
        base: Option<&Tree>,
        cancel: &CancelFlag,
        on_progress: impl Fn(f32),
    ) -> HydrateReport {
        let total = touched.len();
        let mut report = HydrateReport::default();
        if total == 0 {
            on_progress(1.0);
            return report;
        }

        let done = AtomicUsize::new(0);
        for batch in touched.chunks(self.batch_size) {
            if cancel.is_requested() {
                report.cancelled = true;
                return report;
            }

            let mut futs = Vec::with_capacity(batch.len());
            for node in batch {
                let store = Arc::clone(&self.store);
                let node = node.clone();
                let base_payload = base
                    .and_then(|tree| tree.node(&node.key))
                    .map(|n| n.payload.clone());
                let done = &done;
                let on_progress = &on_progress;

                futs.push(async move {
                    let ok = hydrate_one(&*store, &node, base_payload).await;
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    on_progress(finished as f32 / total as f32);
                    ok
                });
            }

            for ok in join_all(futs).await {
                if ok {
                    report.hydrated += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        info!("Hydrated {} nodes ({} failed)", report.hydrated, report.failed);
        report
    }
}

/// Merges and writes one node's payload. A node without any stored payload
/// takes the remote payload as-is.
async fn hydrate_one(
    store: &dyn LocalStore,
    node: &TouchedNode,
    base_payload: Option<Payload>,
) -> bool {
    let local = match store.read_payload(&node.handle).await {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Payload read failed for {}: {}", node.key, e);
            return false;
        }
    };
    let merged = match local {
        Some(local) => merge(&local, &node.remote.payload, base_payload.as_ref()),
        None => node.remote.payload.clone(),
    };
    let label = merged
        .display_title()
        .unwrap_or_else(|| node.key.native().to_string());

    if let Err(e) = store.write_payload(&node.handle, &merged).await {
        warn!("Payload write failed for {}: {}", node.key, e);
        return false;
    }
    if let Err(e) = store.set_label(&node.handle, &label).await {
        warn!("Label refresh failed for {}: {}", node.key, e);
        return false;
    }
    true
}
