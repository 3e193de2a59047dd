//! Three-way payload merge.
//!
//! Hydration writes payloads with this merge so that pulling fresh remote
//! content never tramples local annotations. The base side comes from the
//! last applied remote snapshot; comparing against it is what tells a
//! local edit apart from a stale copy of an old remote value.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use refolio_model::Payload;

/// Merges a locally stored payload with the fresh remote one.
///
/// Without a `base` there is no way to tell local edits from staleness,
/// so the remote wins outright for every field. With a base:
///
/// * bibliographic core fields always take the remote value;
/// * `tags` and `notes` merge by union, remote order first, local entries
///   appended when they are new since the base;
/// * extension fields keep whichever side changed relative to the base,
///   remote winning when both changed.
pub fn merge(local: &Payload, remote: &Payload, base: Option<&Payload>) -> Payload {
    let Some(base) = base else {
        return remote.clone();
    };

    Payload {
        item_type: remote.item_type.clone(),
        title: remote.title.clone(),
        creators: remote.creators.clone(),
        date: remote.date.clone(),
        publisher: remote.publisher.clone(),
        doi: remote.doi.clone(),
        url: remote.url.clone(),
        filename: remote.filename.clone(),
        tags: merge_entries(&local.tags, &remote.tags, &base.tags),
        notes: merge_entries(&local.notes, &remote.notes, &base.notes),
        extra: merge_extra(&local.extra, &remote.extra, &base.extra),
    }
}

/// Union merge for list fields.
///
/// Remote entries come first in remote order. Local entries follow when
/// they are neither in the base (so they are local additions) nor already
/// present (no duplicates). A local entry that is in the base but missing
/// from the remote was deleted remotely and stays deleted.
pub fn merge_entries<T: Clone + PartialEq>(local: &[T], remote: &[T], base: &[T]) -> Vec<T> {
    let mut merged: Vec<T> = remote.to_vec();
    for entry in local {
        if !base.contains(entry) && !merged.contains(entry) {
            merged.push(entry.clone());
        }
    }
    merged
}

fn merge_extra(
    local: &BTreeMap<String, Value>,
    remote: &BTreeMap<String, Value>,
    base: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let keys: BTreeSet<&String> = remote.keys().chain(local.keys()).collect();
    let mut merged = BTreeMap::new();
    for key in keys {
        let remote_value = remote.get(key);
        // Any remote change relative to the base wins, including remote
        // additions and removals; otherwise the local value stands.
        let winner = if remote_value != base.get(key) {
            remote_value
        } else {
            local.get(key)
        };
        if let Some(value) = winner {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(title: &str) -> Payload {
        Payload::with_title(title)
    }

    fn tagged(title: &str, tags: &[&str]) -> Payload {
        let mut p = payload(title);
        p.tags = tags.iter().map(|t| t.to_string()).collect();
        p
    }

    #[test]
    fn test_merge_identity() {
        let mut x = tagged("Paper", &["rust"]);
        x.extra.insert("volume".to_string(), Value::from("12"));

        assert_eq!(merge(&x, &x, Some(&x)), x);
        assert_eq!(merge(&x, &x, None), x);
    }

    #[test]
    fn test_core_fields_always_take_remote() {
        // The local side renamed the title; the remote did not change it.
        // Core fields are remote-owned, so the local rename is overwritten.
        let base = payload("Original");
        let local = payload("My Rename");
        let remote = payload("Original");

        let merged = merge(&local, &remote, Some(&base));
        assert_eq!(merged.title.as_deref(), Some("Original"));
    }

    #[test]
    fn test_extension_field_local_edit_survives() {
        let mut base = payload("Paper");
        base.extra.insert("rating".to_string(), Value::from(3));
        let mut local = base.clone();
        local.extra.insert("rating".to_string(), Value::from(5));
        let remote = base.clone();

        let merged = merge(&local, &remote, Some(&base));
        assert_eq!(merged.extra.get("rating"), Some(&Value::from(5)));
    }

    #[test]
    fn test_extension_field_remote_change_beats_local() {
        let mut base = payload("Paper");
        base.extra.insert("rating".to_string(), Value::from(3));
        let mut local = base.clone();
        local.extra.insert("rating".to_string(), Value::from(5));
        let mut remote = base.clone();
        remote.extra.insert("rating".to_string(), Value::from(1));

        let merged = merge(&local, &remote, Some(&base));
        assert_eq!(merged.extra.get("rating"), Some(&Value::from(1)));
    }

    #[test]
    fn test_extension_field_remote_removal_sticks() {
        let mut base = payload("Paper");
        base.extra.insert("legacy".to_string(), Value::from("x"));
        let local = base.clone();
        let remote = payload("Paper");

        let merged = merge(&local, &remote, Some(&base));
        assert!(!merged.extra.contains_key("legacy"));
    }

    #[test]
    fn test_extension_field_local_addition_survives() {
        let base = payload("Paper");
        let mut local = base.clone();
        local.extra.insert("my-note".to_string(), Value::from("keep"));
        let remote = base.clone();

        let merged = merge(&local, &remote, Some(&base));
        assert_eq!(merged.extra.get("my-note"), Some(&Value::from("keep")));
    }

    #[test]
    fn test_list_union_keeps_both_sides_additions() {
        let base = tagged("Paper", &["Shared"]);
        let local = tagged("Paper", &["Shared", "Local"]);
        let remote = tagged("Paper", &["Shared", "Remote"]);

        let merged = merge(&local, &remote, Some(&base));
        assert_eq!(merged.tags, vec!["Shared", "Remote", "Local"]);
    }

    #[test]
    fn test_list_remote_deletion_not_resurrected() {
        let base = tagged("Paper", &["Shared"]);
        let local = tagged("Paper", &["Shared"]);
        let remote = tagged("Paper", &[]);

        let merged = merge(&local, &remote, Some(&base));
        assert!(merged.tags.is_empty());
    }

    #[test]
    fn test_list_same_addition_on_both_sides_not_duplicated() {
        let merged = merge_entries(
            &["New".to_string()],
            &["New".to_string()],
            &[] as &[String],
        );
        assert_eq!(merged, vec!["New"]);
    }

    #[test]
    fn test_notes_merge_like_tags() {
        let mut base = payload("Paper");
        base.notes.push("from remote".to_string());
        let mut local = base.clone();
        local.notes.push("my annotation".to_string());
        let remote = base.clone();

        let merged = merge(&local, &remote, Some(&base));
        assert_eq!(merged.notes, vec!["from remote", "my annotation"]);
    }

    #[test]
    fn test_missing_base_means_remote_wins_everywhere() {
        let local = tagged("Mine", &["local-tag"]);
        let remote = tagged("Theirs", &["remote-tag"]);

        let merged = merge(&local, &remote, None);
        assert_eq!(merged, remote);
    }
}
