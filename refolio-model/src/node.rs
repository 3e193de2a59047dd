//! The unit of reconciliation: one remote record mirrored locally.

use serde::{Deserialize, Serialize};

use crate::key::GlobalKey;
use crate::payload::Payload;

/// What kind of entity a node mirrors.
///
/// Only collections are containers; items, notes, and attachments are
/// leaves even when notes or attachments hang off an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Collection,
    Item,
    Note,
    Attachment,
}

impl NodeKind {
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Collection)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Collection => "collection",
            NodeKind::Item => "item",
            NodeKind::Note => "note",
            NodeKind::Attachment => "attachment",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in a library snapshot.
///
/// `parent_keys` lists resolved parents with the primary parent first: for
/// a note or attachment the item it hangs off, for an item the collections
/// that contain it, for a collection its parent collection. An empty list
/// means top level. `version` is the remote's monotonically increasing
/// change counter; it is a change signal only and never feeds conflict
/// resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: GlobalKey,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_keys: Vec<GlobalKey>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
}

impl Node {
    pub fn new(key: GlobalKey, kind: NodeKind) -> Self {
        Self {
            key,
            kind,
            parent_keys: Vec::new(),
            version: 0,
            payload: Payload::default(),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_parent(mut self, parent: GlobalKey) -> Self {
        self.parent_keys.push(parent);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// The parent that determines placement in the mirrored hierarchy.
    pub fn primary_parent(&self) -> Option<&GlobalKey> {
        self.parent_keys.first()
    }

    /// Label to show for this node, falling back to the native key when the
    /// payload offers nothing better.
    pub fn display_title(&self) -> String {
        self.payload
            .display_title()
            .unwrap_or_else(|| self.key.native().to_string())
    }
}
