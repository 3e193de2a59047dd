//! Persisted applied-state snapshots.
//!
//! After a cycle fully completes, the remote tree that was applied is
//! written to disk, one JSON file per library. The next cycle loads it as
//! the merge base for hydration and for nothing else: the diff always
//! runs against the store's actual contents, so a stale or missing
//! snapshot can cost merge quality but never correctness.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use refolio_model::{LibraryId, Node, Tree};

use crate::errors::Result;

const SNAPSHOT_FORMAT: u32 = 1;

/// The remote tree as last applied for one library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowSnapshot {
    pub format: u32,
    pub library: LibraryId,
    pub captured_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
}

impl ShadowSnapshot {
    /// Captures a tree as the new applied snapshot.
    pub fn from_tree(library: LibraryId, tree: &Tree) -> Self {
        Self {
            format: SNAPSHOT_FORMAT,
            library,
            captured_at: Utc::now(),
            nodes: tree.flatten(),
        }
    }

    /// Rebuilds the snapshot tree. Warnings are dropped; the snapshot was
    /// written from an already-repaired tree.
    pub fn to_tree(&self) -> Tree {
        Tree::build(self.nodes.clone()).0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// One snapshot file per library under a state directory.
#[derive(Debug, Clone)]
pub struct ShadowStore {
    dir: PathBuf,
}

impl ShadowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, library: &LibraryId) -> PathBuf {
        self.dir
            .join(format!("{}.json", encode_stem(library.as_str())))
    }

    /// Loads the applied snapshot for one library.
    ///
    /// Missing, unreadable, corrupt, and future-format files all come back
    /// as `None`: hydration then degrades to remote-wins for that cycle
    /// instead of failing it.
    pub async fn load(&self, library: &LibraryId) -> Option<ShadowSnapshot> {
        let path = self.path_for(library);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read snapshot {}: {}", path.display(), e);
                return None;
            }
        };
        let snapshot: ShadowSnapshot = match serde_json::from_slice(&data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Corrupt snapshot {}: {}", path.display(), e);
                return None;
            }
        };
        if snapshot.format != SNAPSHOT_FORMAT {
            warn!(
                "Snapshot {} has unsupported format {}",
                path.display(),
                snapshot.format
            );
            return None;
        }
        debug!(
            "Loaded snapshot for {} ({} nodes)",
            library,
            snapshot.node_count()
        );
        Some(snapshot)
    }

    /// Persists a snapshot atomically: write a temp file, then rename over
    /// the old one. The single-flight lock guarantees one writer, so a
    /// fixed temp name per library is enough.
    pub async fn save(&self, snapshot: &ShadowSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&snapshot.library);
        let tmp = path.with_extension("json.tmp");

        let data = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;
        debug!(
            "Saved snapshot for {} ({} nodes)",
            snapshot.library,
            snapshot.node_count()
        );
        Ok(())
    }

    /// Drops the snapshot for one library, if present.
    pub async fn remove(&self, library: &LibraryId) -> Result<()> {
        match fs::remove_file(self.path_for(library)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Filename-safe form of a library identifier. Alphanumerics, `.`, `_` and
/// `-` pass through; every other byte becomes `%XX`, so distinct
/// identifiers never collide and no path separators survive.
fn encode_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use refolio_model::{GlobalKey, NodeKind, Payload};
    use tempfile::tempdir;

    fn lib() -> LibraryId {
        LibraryId::new("lib")
    }

    fn sample_tree() -> Tree {
        let c1 = GlobalKey::new(&lib(), "C1");
        let (tree, warnings) = Tree::build(vec![
            Node::new(c1.clone(), NodeKind::Collection)
                .with_payload(Payload::with_title("Papers")),
            Node::new(GlobalKey::new(&lib(), "I1"), NodeKind::Item)
                .with_parent(c1)
                .with_version(3)
                .with_payload(Payload::with_title("A Paper")),
        ]);
        assert!(warnings.is_empty());
        tree
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());

        let snapshot = ShadowSnapshot::from_tree(lib(), &sample_tree());
        store.save(&snapshot).await.unwrap();

        let loaded = store.load(&lib()).await.unwrap();
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.nodes, snapshot.nodes);

        let tree = loaded.to_tree();
        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree.primary_parent_of(&GlobalKey::new(&lib(), "I1")),
            Some(&GlobalKey::new(&lib(), "C1"))
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());
        assert!(store.load(&lib()).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_none() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());

        std::fs::write(dir.path().join("lib.json"), b"{ not json").unwrap();
        assert!(store.load(&lib()).await.is_none());
    }

    #[tokio::test]
    async fn test_future_format_is_none() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());

        let mut snapshot = ShadowSnapshot::from_tree(lib(), &sample_tree());
        snapshot.format = 99;
        store.save(&snapshot).await.unwrap();

        assert!(store.load(&lib()).await.is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_previous() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());

        store
            .save(&ShadowSnapshot::from_tree(lib(), &sample_tree()))
            .await
            .unwrap();
        let (empty, _) = Tree::build(Vec::new());
        store
            .save(&ShadowSnapshot::from_tree(lib(), &empty))
            .await
            .unwrap();

        let loaded = store.load(&lib()).await.unwrap();
        assert_eq!(loaded.node_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_filename_confines_hostile_library_ids() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());

        // Separators and dot-dot segments must not escape the directory.
        let hostile = LibraryId::new("../escape/u:1");
        let (tree, _) = Tree::build(vec![Node::new(
            GlobalKey::new(&hostile, "I1"),
            NodeKind::Item,
        )
        .with_payload(Payload::with_title("Paper"))]);
        store
            .save(&ShadowSnapshot::from_tree(hostile.clone(), &tree))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with(".json"));
        assert!(!entries[0].contains('/'));

        let loaded = store.load(&hostile).await.unwrap();
        assert_eq!(loaded.library, hostile);
        assert_eq!(loaded.node_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path());

        store.remove(&lib()).await.unwrap();
        store
            .save(&ShadowSnapshot::from_tree(lib(), &sample_tree()))
            .await
            .unwrap();
        store.remove(&lib()).await.unwrap();
        assert!(store.load(&lib()).await.is_none());
    }
}
