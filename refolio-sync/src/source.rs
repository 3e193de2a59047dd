//! Remote library sources and snapshot ingestion.
//!
//! A [`RemoteSource`] answers two questions per library: which collections
//! exist and which items exist (notes and attachments are item records with
//! a kind tag). [`ingest`] converts those raw records into model [`Node`]s,
//! prefixing keys with the library, ordering parents primary-first, and
//! skipping records the remote sent without a key. Conversion never fails;
//! defects are reported as [`IngestWarning`]s.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use refolio_model::{Creator, GlobalKey, LibraryId, Node, NodeKind, Payload};

use crate::errors::{Result, SyncError};

/// A collection record as the remote service reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub key: Option<String>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// Native key of the parent collection, if nested.
    #[serde(default)]
    pub parent: Option<String>,
}

impl CollectionRecord {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// An item record: a regular item, a note, or an attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemRecord {
    pub key: Option<String>,
    #[serde(default)]
    pub version: u64,
    /// Remote type tag; `note` and `attachment` map to their own kinds.
    #[serde(default)]
    pub item_type: Option<String>,
    /// Native key of the item this note or attachment hangs off.
    #[serde(default)]
    pub parent_item: Option<String>,
    /// Native keys of the collections containing this item, remote order.
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub creators: Vec<Creator>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Body text, for note records.
    #[serde(default)]
    pub note: Option<String>,
    /// Remote fields the model does not name, carried through verbatim.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl ItemRecord {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// Records skipped while converting a remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestWarning {
    KeylessCollection { name: Option<String> },
    KeylessItem { title: Option<String> },
}

impl std::fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestWarning::KeylessCollection { name } => {
                write!(f, "collection without key ({:?})", name)
            }
            IngestWarning::KeylessItem { title } => {
                write!(f, "item without key ({:?})", title)
            }
        }
    }
}

/// Read access to one remote service.
///
/// Implementations wrap a concrete API client; the engine only ever asks
/// for full per-library listings and does the rest itself.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_collections(&self, library: &LibraryId) -> Result<Vec<CollectionRecord>>;

    async fn fetch_items(&self, library: &LibraryId) -> Result<Vec<ItemRecord>>;
}

/// Converts raw remote records into model nodes, collections first.
///
/// Item parents are ordered primary-first: the owning item (for notes and
/// attachments), then containing collections in remote order. Records
/// without a key cannot be addressed and are skipped with a warning.
pub fn ingest(
    library: &LibraryId,
    collections: Vec<CollectionRecord>,
    items: Vec<ItemRecord>,
) -> (Vec<Node>, Vec<IngestWarning>) {
    let mut nodes = Vec::with_capacity(collections.len() + items.len());
    let mut warnings = Vec::new();

    for record in collections {
        let Some(native) = record.key.as_deref().filter(|k| !k.is_empty()) else {
            warn!("Skipping keyless collection in {}", library);
            warnings.push(IngestWarning::KeylessCollection { name: record.name });
            continue;
        };
        let mut node = Node::new(GlobalKey::new(library, native), NodeKind::Collection)
            .with_version(record.version);
        if let Some(parent) = record.parent.as_deref().filter(|p| !p.is_empty()) {
            node = node.with_parent(GlobalKey::new(library, parent));
        }
        node.payload.title = record.name;
        nodes.push(node);
    }

    for record in items {
        let Some(native) = record.key.as_deref().filter(|k| !k.is_empty()) else {
            warn!("Skipping keyless item in {}", library);
            warnings.push(IngestWarning::KeylessItem { title: record.title });
            continue;
        };
        let key = GlobalKey::new(library, native);
        let kind = kind_of(&record);

        let mut parents = Vec::new();
        if let Some(parent) = record.parent_item.as_deref().filter(|p| !p.is_empty()) {
            parents.push(GlobalKey::new(library, parent));
        }
        for collection in &record.collections {
            if !collection.is_empty() {
                parents.push(GlobalKey::new(library, collection));
            }
        }

        let mut node = Node::new(key, kind).with_version(record.version);
        node.parent_keys = parents;
        node.payload = payload_of(record);
        nodes.push(node);
    }

    (nodes, warnings)
}

fn kind_of(record: &ItemRecord) -> NodeKind {
    match record.item_type.as_deref() {
        Some("note") => NodeKind::Note,
        Some("attachment") => NodeKind::Attachment,
        _ => NodeKind::Item,
    }
}

fn payload_of(record: ItemRecord) -> Payload {
    let mut payload = Payload {
        item_type: record.item_type,
        title: record.title,
        creators: record.creators,
        date: record.date,
        publisher: record.publisher,
        doi: record.doi,
        url: record.url,
        filename: record.filename,
        tags: record.tags,
        notes: Vec::new(),
        extra: record.extra,
    };
    if let Some(body) = record.note {
        if !body.is_empty() {
            payload.notes.push(body);
        }
    }
    payload
}

#[derive(Debug, Clone, Default)]
struct Fixture {
    collections: Vec<CollectionRecord>,
    items: Vec<ItemRecord>,
    unreachable: bool,
}

/// In-memory [`RemoteSource`] serving fixed snapshots.
///
/// The test double for the engine, and the reference for what a real
/// service adapter has to provide. Snapshots are replaced wholesale with
/// [`StaticRemote::put_library`]; `set_unreachable` simulates connectivity
/// failures and `set_latency` slow links.
#[derive(Debug, Default)]
pub struct StaticRemote {
    libraries: RwLock<HashMap<LibraryId, Fixture>>,
    latency: RwLock<Option<std::time::Duration>>,
}

impl StaticRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the served snapshot for one library.
    pub async fn put_library(
        &self,
        library: &LibraryId,
        collections: Vec<CollectionRecord>,
        items: Vec<ItemRecord>,
    ) {
        let mut libraries = self.libraries.write().await;
        let fixture = libraries.entry(library.clone()).or_default();
        fixture.collections = collections;
        fixture.items = items;
    }

    /// Makes fetches for one library fail until cleared.
    pub async fn set_unreachable(&self, library: &LibraryId, unreachable: bool) {
        let mut libraries = self.libraries.write().await;
        libraries.entry(library.clone()).or_default().unreachable = unreachable;
    }

    /// Delays every fetch by `latency`.
    pub async fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.write().await = Some(latency);
    }

    async fn fixture(&self, library: &LibraryId) -> Result<Fixture> {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let libraries = self.libraries.read().await;
        let Some(fixture) = libraries.get(library) else {
            return Err(SyncError::Remote(format!("unknown library {}", library)));
        };
        if fixture.unreachable {
            return Err(SyncError::Remote(format!("library {} unreachable", library)));
        }
        Ok(fixture.clone())
    }
}

#[async_trait]
impl RemoteSource for StaticRemote {
    async fn fetch_collections(&self, library: &LibraryId) -> Result<Vec<CollectionRecord>> {
        Ok(self.fixture(library).await?.collections)
    }

    async fn fetch_items(&self, library: &LibraryId) -> Result<Vec<ItemRecord>> {
        Ok(self.fixture(library).await?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> LibraryId {
        LibraryId::new("lib")
    }

    #[test]
    fn test_ingest_orders_collections_first_and_parents_primary_first() {
        let collections = vec![CollectionRecord::new("C1", "Papers")];
        let mut item = ItemRecord::new("I1", "A Paper");
        item.collections = vec!["C1".to_string()];
        let mut note = ItemRecord::new("N1", "");
        note.item_type = Some("note".to_string());
        note.parent_item = Some("I1".to_string());
        note.collections = vec!["C1".to_string()];
        note.note = Some("remember this".to_string());

        let (nodes, warnings) = ingest(&lib(), collections, vec![item, note]);

        assert!(warnings.is_empty());
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].kind, NodeKind::Collection);
        assert_eq!(nodes[1].kind, NodeKind::Item);
        assert_eq!(nodes[2].kind, NodeKind::Note);

        // The owning item outranks the containing collection.
        assert_eq!(
            nodes[2].parent_keys,
            vec![GlobalKey::new(&lib(), "I1"), GlobalKey::new(&lib(), "C1")]
        );
        assert_eq!(nodes[2].payload.notes, vec!["remember this".to_string()]);
    }

    #[test]
    fn test_ingest_skips_keyless_records() {
        let collections = vec![CollectionRecord {
            name: Some("No Key".to_string()),
            ..CollectionRecord::default()
        }];
        let items = vec![ItemRecord {
            title: Some("Ghost".to_string()),
            ..ItemRecord::default()
        }];

        let (nodes, warnings) = ingest(&lib(), collections, items);

        assert!(nodes.is_empty());
        assert_eq!(
            warnings,
            vec![
                IngestWarning::KeylessCollection {
                    name: Some("No Key".to_string())
                },
                IngestWarning::KeylessItem {
                    title: Some("Ghost".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_kind_mapping_from_item_type() {
        let mut attachment = ItemRecord::new("A1", "scan.pdf");
        attachment.item_type = Some("attachment".to_string());
        let mut note = ItemRecord::new("N1", "");
        note.item_type = Some("note".to_string());
        let plain = ItemRecord::new("I1", "Paper");

        let (nodes, _) = ingest(&lib(), Vec::new(), vec![attachment, note, plain]);

        assert_eq!(nodes[0].kind, NodeKind::Attachment);
        assert_eq!(nodes[1].kind, NodeKind::Note);
        assert_eq!(nodes[2].kind, NodeKind::Item);
    }

    #[test]
    fn test_ingest_prefixes_keys_with_library() {
        let (nodes, _) = ingest(
            &LibraryId::new("group-9"),
            vec![CollectionRecord::new("C1", "Shared")],
            Vec::new(),
        );
        assert_eq!(nodes[0].key.as_str(), "group-9:C1");
    }

    #[tokio::test]
    async fn test_static_remote_serves_and_fails() {
        let remote = StaticRemote::new();
        let library = lib();

        remote
            .put_library(
                &library,
                vec![CollectionRecord::new("C1", "Papers")],
                vec![ItemRecord::new("I1", "A Paper")],
            )
            .await;

        let collections = remote.fetch_collections(&library).await.unwrap();
        assert_eq!(collections.len(), 1);
        let items = remote.fetch_items(&library).await.unwrap();
        assert_eq!(items.len(), 1);

        remote.set_unreachable(&library, true).await;
        assert!(remote.fetch_items(&library).await.is_err());

        remote.set_unreachable(&library, false).await;
        assert!(remote.fetch_items(&library).await.is_ok());

        // A library never configured is an error, not an empty snapshot.
        assert!(remote
            .fetch_collections(&LibraryId::new("other"))
            .await
            .is_err());
    }
}
