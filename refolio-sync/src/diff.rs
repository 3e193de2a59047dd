//! Structural diff between two library snapshots.
//!
//! The diff walks the newer tree for creations, updates, and moves, and
//! the older tree for deletions. Payload equality goes through content
//! digests; the remote version counter is only ever a fast-path hint and
//! never decides a conflict. Both inputs are plain [`Tree`]s, so the same
//! detector serves local-vs-remote and snapshot-vs-snapshot comparisons.

use serde::{Deserialize, Serialize};
use tracing::debug;

use refolio_model::{GlobalKey, Node, Tree};

/// A node whose payload changed between snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedNode {
    /// The newer state of the node.
    pub node: Node,
    /// Names of the fields that differ, for reporting.
    pub changed_fields: Vec<String>,
}

/// A node whose primary parent changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovedNode {
    pub key: GlobalKey,
    pub old_parent: Option<GlobalKey>,
    pub new_parent: Option<GlobalKey>,
}

/// A node that disappeared from the newer snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedNode {
    pub key: GlobalKey,
    pub container: bool,
    /// Child count in the older snapshot, used to order deletions.
    pub child_count: usize,
}

/// Everything that changed between two snapshots.
///
/// Buckets are split container/leaf because downstream phases treat them
/// differently. Within a bucket, order follows the newer snapshot for
/// creations, updates, and moves, and the older snapshot for deletions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub created_containers: Vec<Node>,
    pub created_leaves: Vec<Node>,
    pub updated_containers: Vec<UpdatedNode>,
    pub updated_leaves: Vec<UpdatedNode>,
    pub moved_containers: Vec<MovedNode>,
    pub moved_leaves: Vec<MovedNode>,
    pub deleted_containers: Vec<DeletedNode>,
    pub deleted_leaves: Vec<DeletedNode>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    pub fn change_count(&self) -> usize {
        self.stats().total()
    }

    pub fn stats(&self) -> DiffStats {
        DiffStats {
            created: self.created_containers.len() + self.created_leaves.len(),
            updated: self.updated_containers.len() + self.updated_leaves.len(),
            moved: self.moved_containers.len() + self.moved_leaves.len(),
            deleted: self.deleted_containers.len() + self.deleted_leaves.len(),
        }
    }
}

/// Summary counts of one diff, for logs and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub created: usize,
    pub updated: usize,
    pub moved: usize,
    pub deleted: usize,
}

impl DiffStats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.moved + self.deleted
    }
}

/// Computes snapshot diffs.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    version_hint: bool,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the version fast path: nodes whose remote version counter
    /// did not change skip the digest comparison. Nodes whose version did
    /// change still compare digests, so the payload stays the ground truth.
    pub fn with_version_hint(version_hint: bool) -> Self {
        Self { version_hint }
    }

    /// Diffs `prev` against `next`.
    ///
    /// `None` for `prev` means nothing is mirrored yet; every node in
    /// `next` comes back as a creation.
    pub fn diff(&self, prev: Option<&Tree>, next: &Tree) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for node in next.iter() {
            match prev.and_then(|tree| tree.node(&node.key)) {
                None => {
                    if node.is_container() {
                        changes.created_containers.push(node.clone());
                    } else {
                        changes.created_leaves.push(node.clone());
                    }
                }
                Some(before) => self.compare(before, node, &mut changes),
            }
        }

        if let Some(prev) = prev {
            for node in prev.iter() {
                if next.contains(&node.key) {
                    continue;
                }
                let deleted = DeletedNode {
                    key: node.key.clone(),
                    container: node.is_container(),
                    child_count: prev.child_count(&node.key),
                };
                if node.is_container() {
                    changes.deleted_containers.push(deleted);
                } else {
                    changes.deleted_leaves.push(deleted);
                }
            }
        }

        debug!("Computed diff: {:?}", changes.stats());
        changes
    }

    fn compare(&self, before: &Node, after: &Node, changes: &mut ChangeSet) {
        // A node can move and change content in the same diff; both are
        // recorded independently.
        let old_parent = before.primary_parent();
        let new_parent = after.primary_parent();
        if old_parent != new_parent {
            let moved = MovedNode {
                key: after.key.clone(),
                old_parent: old_parent.cloned(),
                new_parent: new_parent.cloned(),
            };
            if after.is_container() {
                changes.moved_containers.push(moved);
            } else {
                changes.moved_leaves.push(moved);
            }
        }

        let unchanged = if self.version_hint && before.version == after.version {
            true
        } else {
            before.payload.digest() == after.payload.digest()
        };
        if !unchanged {
            let updated = UpdatedNode {
                node: after.clone(),
                changed_fields: before.payload.changed_fields(&after.payload),
            };
            if after.is_container() {
                changes.updated_containers.push(updated);
            } else {
                changes.updated_leaves.push(updated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refolio_model::{LibraryId, NodeKind, Payload};

    fn key(native: &str) -> GlobalKey {
        GlobalKey::new(&LibraryId::new("lib"), native)
    }

    fn collection(native: &str, title: &str) -> Node {
        Node::new(key(native), NodeKind::Collection).with_payload(Payload::with_title(title))
    }

    fn item(native: &str, title: &str) -> Node {
        Node::new(key(native), NodeKind::Item).with_payload(Payload::with_title(title))
    }

    fn tree(nodes: Vec<Node>) -> Tree {
        let (tree, warnings) = Tree::build(nodes);
        assert!(warnings.is_empty());
        tree
    }

    #[test]
    fn test_first_sync_is_all_creations_in_snapshot_order() {
        let next = tree(vec![
            collection("C1", "Papers"),
            item("I1", "First").with_parent(key("C1")),
            item("I2", "Second").with_parent(key("C1")),
        ]);

        let changes = ChangeDetector::new().diff(None, &next);

        assert_eq!(changes.created_containers.len(), 1);
        assert_eq!(changes.created_leaves.len(), 2);
        assert_eq!(changes.created_leaves[0].key, key("I1"));
        assert_eq!(changes.created_leaves[1].key, key("I2"));
        assert_eq!(changes.stats().total(), 3);
        assert!(changes.deleted_containers.is_empty());
    }

    #[test]
    fn test_identical_snapshots_diff_empty() {
        let nodes = vec![
            collection("C1", "Papers"),
            item("I1", "Paper").with_parent(key("C1")),
        ];
        let a = tree(nodes.clone());
        let b = tree(nodes);

        let changes = ChangeDetector::new().diff(Some(&a), &b);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_payload_change_reports_fields() {
        let a = tree(vec![item("I1", "Old")]);
        let mut newer = item("I1", "New");
        newer.payload.tags.push("added".to_string());
        let b = tree(vec![newer]);

        let changes = ChangeDetector::new().diff(Some(&a), &b);

        assert_eq!(changes.updated_leaves.len(), 1);
        let updated = &changes.updated_leaves[0];
        assert_eq!(updated.node.key, key("I1"));
        assert_eq!(updated.changed_fields, vec!["title", "tags"]);
        assert!(changes.moved_leaves.is_empty());
    }

    #[test]
    fn test_parent_change_is_a_move_not_an_update() {
        let a = tree(vec![
            collection("C1", "One"),
            collection("C2", "Two"),
            item("I1", "Paper").with_parent(key("C1")),
        ]);
        let b = tree(vec![
            collection("C1", "One"),
            collection("C2", "Two"),
            item("I1", "Paper").with_parent(key("C2")),
        ]);

        let changes = ChangeDetector::new().diff(Some(&a), &b);

        assert!(changes.updated_leaves.is_empty());
        assert_eq!(changes.moved_leaves.len(), 1);
        let moved = &changes.moved_leaves[0];
        assert_eq!(moved.old_parent, Some(key("C1")));
        assert_eq!(moved.new_parent, Some(key("C2")));
    }

    #[test]
    fn test_move_and_update_both_recorded() {
        let a = tree(vec![
            collection("C1", "One"),
            collection("C2", "Two"),
            item("I1", "Old").with_parent(key("C1")),
        ]);
        let b = tree(vec![
            collection("C1", "One"),
            collection("C2", "Two"),
            item("I1", "New").with_parent(key("C2")),
        ]);

        let changes = ChangeDetector::new().diff(Some(&a), &b);
        assert_eq!(changes.moved_leaves.len(), 1);
        assert_eq!(changes.updated_leaves.len(), 1);
    }

    #[test]
    fn test_deletion_carries_child_count() {
        let a = tree(vec![
            collection("C1", "Papers"),
            item("I1", "One").with_parent(key("C1")),
            item("I2", "Two").with_parent(key("C1")),
        ]);
        let b = tree(vec![]);

        let changes = ChangeDetector::new().diff(Some(&a), &b);

        assert_eq!(changes.deleted_containers.len(), 1);
        assert_eq!(changes.deleted_containers[0].child_count, 2);
        assert!(changes.deleted_containers[0].container);
        assert_eq!(changes.deleted_leaves.len(), 2);
        assert_eq!(changes.deleted_leaves[0].child_count, 0);
    }

    #[test]
    fn test_creations_and_deletions_are_symmetric() {
        let a = tree(vec![item("I1", "Stays"), item("I2", "Goes")]);
        let b = tree(vec![item("I1", "Stays"), item("I3", "Arrives")]);

        let forward = ChangeDetector::new().diff(Some(&a), &b);
        let backward = ChangeDetector::new().diff(Some(&b), &a);

        let created_forward: Vec<&GlobalKey> =
            forward.created_leaves.iter().map(|n| &n.key).collect();
        let deleted_backward: Vec<&GlobalKey> =
            backward.deleted_leaves.iter().map(|d| &d.key).collect();
        assert_eq!(created_forward, vec![&key("I3")]);
        assert_eq!(deleted_backward, created_forward);

        let deleted_forward: Vec<&GlobalKey> =
            forward.deleted_leaves.iter().map(|d| &d.key).collect();
        let created_backward: Vec<&GlobalKey> =
            backward.created_leaves.iter().map(|n| &n.key).collect();
        assert_eq!(deleted_forward, created_backward);
    }

    #[test]
    fn test_version_hint_fast_path() {
        let a = tree(vec![item("I1", "Old").with_version(4)]);
        let b = tree(vec![item("I1", "New").with_version(4)]);

        // Same version: the hinted detector trusts it and skips digests.
        let hinted = ChangeDetector::with_version_hint(true).diff(Some(&a), &b);
        assert!(hinted.is_empty());

        // The default detector still sees the payload change.
        let plain = ChangeDetector::new().diff(Some(&a), &b);
        assert_eq!(plain.updated_leaves.len(), 1);

        // A bumped version alone is not a change; payloads decide.
        let c = tree(vec![item("I1", "Old").with_version(9)]);
        let bumped = ChangeDetector::with_version_hint(true).diff(Some(&a), &c);
        assert!(bumped.is_empty());
    }
}
