//! Local store abstraction.
//!
//! The engine writes the mirror through [`LocalStore`], a thin seam over
//! whatever actually persists nodes locally (an outliner workspace, a
//! database, a folder of files). Stores deal in opaque [`Handle`]s; the
//! key stamp written at create time is what makes a node findable again
//! in later cycles. [`MemoryStore`] is the in-memory implementation used
//! by the test suite, with per-key failure injection to exercise the
//! engine's skip-and-continue paths.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use refolio_model::{GlobalKey, LibraryId, Node, NodeKind, Payload};

use crate::errors::{Result, SyncError};

/// Opaque identifier of a node inside the local store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored node as enumerated by [`LocalStore::list_nodes`].
#[derive(Debug, Clone)]
pub struct StoredNode {
    pub handle: Handle,
    pub key: GlobalKey,
    pub kind: NodeKind,
    pub parent: Option<GlobalKey>,
    pub version: u64,
    pub payload: Payload,
}

impl StoredNode {
    /// Model view of this stored node, used for the local snapshot.
    pub fn to_node(&self) -> Node {
        let mut node = Node::new(self.key.clone(), self.kind).with_version(self.version);
        if let Some(parent) = &self.parent {
            node = node.with_parent(parent.clone());
        }
        node.with_payload(self.payload.clone())
    }
}

/// Write access to the local mirror.
///
/// Structural operations take handles; `find_by_key` bridges from the
/// stable key space back to handles between cycles. Implementations must
/// be safe to call concurrently within one batch.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Creates a node under `parent` (or at top level), stamped with the
    /// node's key, kind, and version, showing `label`.
    async fn create(&self, node: &Node, label: &str, parent: Option<&Handle>) -> Result<Handle>;

    /// Looks up a previously created node by its key stamp.
    async fn find_by_key(&self, key: &GlobalKey) -> Result<Option<Handle>>;

    async fn set_label(&self, handle: &Handle, label: &str) -> Result<()>;

    /// Refreshes the stamped remote version after applying an update.
    async fn set_version(&self, handle: &Handle, version: u64) -> Result<()>;

    /// Reparents a node; `None` moves it to top level.
    async fn set_parent(&self, handle: &Handle, parent: Option<&Handle>) -> Result<()>;

    async fn remove(&self, handle: &Handle) -> Result<()>;

    async fn read_payload(&self, handle: &Handle) -> Result<Option<Payload>>;

    async fn write_payload(&self, handle: &Handle, payload: &Payload) -> Result<()>;

    /// Enumerates every stored node belonging to `library`.
    ///
    /// This is the ground truth the diff runs against, so it must reflect
    /// whatever previous cycles actually managed to apply.
    async fn list_nodes(&self, library: &LibraryId) -> Result<Vec<StoredNode>>;
}

#[derive(Debug, Clone)]
struct Entry {
    key: GlobalKey,
    kind: NodeKind,
    label: String,
    parent: Option<Handle>,
    version: u64,
    payload: Option<Payload>,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Handle, Entry>,
    by_key: HashMap<GlobalKey, Handle>,
    next_id: u64,
    failing: HashSet<GlobalKey>,
}

impl Inner {
    fn entry(&self, handle: &Handle) -> Result<&Entry> {
        self.entries
            .get(handle)
            .ok_or_else(|| SyncError::Store(format!("unknown handle {}", handle)))
    }

    fn entry_mut(&mut self, handle: &Handle) -> Result<&mut Entry> {
        self.entries
            .get_mut(handle)
            .ok_or_else(|| SyncError::Store(format!("unknown handle {}", handle)))
    }

    fn check_key(&self, key: &GlobalKey) -> Result<()> {
        if self.failing.contains(key) {
            return Err(SyncError::Store(format!("injected failure for {}", key)));
        }
        Ok(())
    }

    fn check_handle(&self, handle: &Handle) -> Result<()> {
        let entry = self.entry(handle)?;
        self.check_key(&entry.key)
    }
}

/// In-memory [`LocalStore`] used by the test suite.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation touching `key` fail until cleared.
    pub async fn fail_key(&self, key: &GlobalKey) {
        self.inner.write().await.failing.insert(key.clone());
    }

    pub async fn clear_failures(&self) {
        self.inner.write().await.failing.clear();
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn contains_key(&self, key: &GlobalKey) -> bool {
        self.inner.read().await.by_key.contains_key(key)
    }

    pub async fn label_of(&self, key: &GlobalKey) -> Option<String> {
        let inner = self.inner.read().await;
        let handle = inner.by_key.get(key)?;
        inner.entries.get(handle).map(|e| e.label.clone())
    }

    pub async fn version_of(&self, key: &GlobalKey) -> Option<u64> {
        let inner = self.inner.read().await;
        let handle = inner.by_key.get(key)?;
        inner.entries.get(handle).map(|e| e.version)
    }

    pub async fn payload_of(&self, key: &GlobalKey) -> Option<Payload> {
        let inner = self.inner.read().await;
        let handle = inner.by_key.get(key)?;
        inner.entries.get(handle).and_then(|e| e.payload.clone())
    }

    /// Key of the parent the node currently sits under, if any.
    pub async fn parent_key_of(&self, key: &GlobalKey) -> Option<GlobalKey> {
        let inner = self.inner.read().await;
        let handle = inner.by_key.get(key)?;
        let parent = inner.entries.get(handle)?.parent.as_ref()?;
        inner.entries.get(parent).map(|e| e.key.clone())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn create(&self, node: &Node, label: &str, parent: Option<&Handle>) -> Result<Handle> {
        let mut inner = self.inner.write().await;
        inner.check_key(&node.key)?;
        if inner.by_key.contains_key(&node.key) {
            return Err(SyncError::Store(format!("{} already exists", node.key)));
        }

        inner.next_id += 1;
        let handle = Handle::new(format!("node-{}", inner.next_id));
        let seq = inner.next_id;
        inner.entries.insert(
            handle.clone(),
            Entry {
                key: node.key.clone(),
                kind: node.kind,
                label: label.to_string(),
                parent: parent.cloned(),
                version: node.version,
                payload: None,
                seq,
            },
        );
        inner.by_key.insert(node.key.clone(), handle.clone());
        Ok(handle)
    }

    async fn find_by_key(&self, key: &GlobalKey) -> Result<Option<Handle>> {
        let inner = self.inner.read().await;
        inner.check_key(key)?;
        Ok(inner.by_key.get(key).cloned())
    }

    async fn set_label(&self, handle: &Handle, label: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_handle(handle)?;
        inner.entry_mut(handle)?.label = label.to_string();
        Ok(())
    }

    async fn set_version(&self, handle: &Handle, version: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_handle(handle)?;
        inner.entry_mut(handle)?.version = version;
        Ok(())
    }

    async fn set_parent(&self, handle: &Handle, parent: Option<&Handle>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_handle(handle)?;
        inner.entry_mut(handle)?.parent = parent.cloned();
        Ok(())
    }

    async fn remove(&self, handle: &Handle) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_handle(handle)?;
        if let Some(entry) = inner.entries.remove(handle) {
            inner.by_key.remove(&entry.key);
        }
        Ok(())
    }

    async fn read_payload(&self, handle: &Handle) -> Result<Option<Payload>> {
        let inner = self.inner.read().await;
        inner.check_handle(handle)?;
        Ok(inner.entry(handle)?.payload.clone())
    }

    async fn write_payload(&self, handle: &Handle, payload: &Payload) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_handle(handle)?;
        inner.entry_mut(handle)?.payload = Some(payload.clone());
        Ok(())
    }

    async fn list_nodes(&self, library: &LibraryId) -> Result<Vec<StoredNode>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<(&Handle, &Entry)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.key.in_library(library))
            .collect();
        // Creation order keeps enumeration deterministic.
        entries.sort_by_key(|(_, entry)| entry.seq);

        let nodes = entries
            .into_iter()
            .map(|(handle, entry)| {
                let parent = entry
                    .parent
                    .as_ref()
                    .and_then(|p| inner.entries.get(p))
                    .map(|p| p.key.clone());
                StoredNode {
                    handle: handle.clone(),
                    key: entry.key.clone(),
                    kind: entry.kind,
                    parent,
                    version: entry.version,
                    payload: entry.payload.clone().unwrap_or_default(),
                }
            })
            .collect();
        Ok(nodes)
    }
}
