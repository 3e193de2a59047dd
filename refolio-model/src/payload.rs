//! Node payloads: the content half of a mirrored node.
//!
//! Structure (parents, kind) lives on [`crate::Node`]; everything the remote
//! record says about the entity itself lives here. The named fields cover
//! the bibliographic core and the annotation lists the merge policy cares
//! about. Remote fields we do not model ride along in `extra` untouched, so
//! nothing the service sends is dropped on the floor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A creator entry on a bibliographic record (author, editor, translator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    #[serde(default = "default_creator_role")]
    pub role: String,
}

fn default_creator_role() -> String {
    "author".to_string()
}

impl Creator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: default_creator_role(),
        }
    }

    pub fn with_role(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

/// Content of a node.
///
/// The bibliographic core (`item_type` through `filename`) belongs to the
/// remote authority outright. `tags` and `notes` are lists of independent
/// entries that local edits may extend. Unrecognized remote fields land in
/// `extra` keyed by their remote name; keeping them in a sorted map makes
/// serialization and digests deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creators: Vec<Creator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Attachment linkage: the stored file name, when the node is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Content digest over the canonical JSON form of the payload.
    ///
    /// Field order is fixed by the struct and `extra` is sorted, so two
    /// payloads digest equal exactly when they compare equal.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Best human-readable label this payload offers, if any.
    pub fn display_title(&self) -> Option<String> {
        if let Some(title) = &self.title {
            if !title.is_empty() {
                return Some(title.clone());
            }
        }
        if let Some(name) = &self.filename {
            if !name.is_empty() {
                return Some(name.clone());
            }
        }
        self.creators.first().map(|c| c.name.clone())
    }

    /// Names of the fields that differ between `self` and `other`.
    ///
    /// Extension fields are reported under their remote name. Used for
    /// change reporting only; equality itself goes through digests.
    pub fn changed_fields(&self, other: &Payload) -> Vec<String> {
        let mut changed = Vec::new();

        macro_rules! check {
            ($field:ident) => {
                if self.$field != other.$field {
                    changed.push(stringify!($field).to_string());
                }
            };
        }

        check!(item_type);
        check!(title);
        check!(creators);
        check!(date);
        check!(publisher);
        check!(doi);
        check!(url);
        check!(filename);
        check!(tags);
        check!(notes);

        let mut extra_keys: Vec<&String> = self.extra.keys().collect();
        for key in other.extra.keys() {
            if !self.extra.contains_key(key) {
                extra_keys.push(key);
            }
        }
        extra_keys.sort();
        for key in extra_keys {
            if self.extra.get(key) != other.extra.get(key) {
                changed.push(key.clone());
            }
        }

        changed
    }

    pub fn is_empty(&self) -> bool {
        *self == Payload::default()
    }
}
