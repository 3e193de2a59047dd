//! In-memory snapshot of one library as a tree.
//!
//! A [`Tree`] is built from a flat list of nodes in one pass: index by key,
//! resolve parent references against the snapshot itself, then stitch the
//! bidirectional adjacency. Construction never fails; malformed input is
//! repaired and reported as [`TreeWarning`]s so one bad record cannot veto
//! a whole snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::key::GlobalKey;
use crate::node::Node;

/// Non-fatal defects repaired while building a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeWarning {
    /// A later node reused an existing key; the first occurrence wins.
    DuplicateKey(GlobalKey),
    /// A node listed itself as its own parent; the link was dropped.
    SelfParent(GlobalKey),
}

impl fmt::Display for TreeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeWarning::DuplicateKey(key) => write!(f, "duplicate key {}", key),
            TreeWarning::SelfParent(key) => write!(f, "self-parent on {}", key),
        }
    }
}

/// One library snapshot with parent and child links resolved.
///
/// Containers without a resolved parent are roots; leaves without one are
/// orphans (kept visible rather than dropped). Insertion order of the
/// original node list is preserved and drives every iteration order here,
/// so identical input produces identical traversals.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: HashMap<GlobalKey, Node>,
    children: HashMap<GlobalKey, Vec<GlobalKey>>,
    order: Vec<GlobalKey>,
    roots: Vec<GlobalKey>,
    orphans: Vec<GlobalKey>,
}

impl Tree {
    /// Builds a tree from a flat snapshot.
    ///
    /// Duplicate keys keep their first occurrence, self-parent links are
    /// dropped (both warned), and parent references to keys absent from the
    /// snapshot are dropped quietly. A node that ends up with no resolved
    /// parent becomes a root when it is a container and an orphan otherwise.
    pub fn build(nodes: Vec<Node>) -> (Self, Vec<TreeWarning>) {
        let mut warnings = Vec::new();
        let mut order: Vec<GlobalKey> = Vec::with_capacity(nodes.len());
        let mut map: HashMap<GlobalKey, Node> = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if map.contains_key(&node.key) {
                warn!("Duplicate key {} in snapshot, keeping first occurrence", node.key);
                warnings.push(TreeWarning::DuplicateKey(node.key));
                continue;
            }
            order.push(node.key.clone());
            map.insert(node.key.clone(), node);
        }

        // Resolve parent links against the snapshot itself.
        let mut resolved: HashMap<GlobalKey, Vec<GlobalKey>> = HashMap::with_capacity(order.len());
        for key in &order {
            let Some(node) = map.get(key) else { continue };
            let mut parents = Vec::new();
            for parent in &node.parent_keys {
                if parent == key {
                    warn!("Node {} lists itself as parent, dropping link", key);
                    warnings.push(TreeWarning::SelfParent(key.clone()));
                    continue;
                }
                if !map.contains_key(parent) {
                    debug!("Dropping dangling parent {} of {}", parent, key);
                    continue;
                }
                if !parents.contains(parent) {
                    parents.push(parent.clone());
                }
            }
            resolved.insert(key.clone(), parents);
        }

        let mut children: HashMap<GlobalKey, Vec<GlobalKey>> = HashMap::new();
        let mut roots = Vec::new();
        let mut orphans = Vec::new();
        for key in &order {
            let parents = resolved.remove(key).unwrap_or_default();
            for parent in &parents {
                children.entry(parent.clone()).or_default().push(key.clone());
            }
            let Some(node) = map.get_mut(key) else { continue };
            if parents.is_empty() {
                if node.is_container() {
                    roots.push(key.clone());
                } else {
                    orphans.push(key.clone());
                }
            }
            node.parent_keys = parents;
        }

        let tree = Self {
            nodes: map,
            children,
            order,
            roots,
            orphans,
        };
        (tree, warnings)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &GlobalKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &GlobalKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Keys in snapshot insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &GlobalKey> {
        self.order.iter()
    }

    /// Nodes in snapshot insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|key| self.nodes.get(key))
    }

    /// Top-level containers, in insertion order.
    pub fn roots(&self) -> &[GlobalKey] {
        &self.roots
    }

    /// Leaves without a resolved parent, in insertion order.
    pub fn orphans(&self) -> &[GlobalKey] {
        &self.orphans
    }

    pub fn children_of(&self, key: &GlobalKey) -> &[GlobalKey] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn child_count(&self, key: &GlobalKey) -> usize {
        self.children.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Resolved primary parent of a node, if it has one.
    pub fn primary_parent_of(&self, key: &GlobalKey) -> Option<&GlobalKey> {
        self.nodes.get(key).and_then(|node| node.primary_parent())
    }

    /// Preorder traversal from `start`.
    ///
    /// A visited guard makes this terminate even if parent links form a
    /// cycle; each reachable key appears exactly once.
    pub fn depth_first(&self, start: &GlobalKey) -> Vec<GlobalKey> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.visit(start, &mut visited, &mut out);
        out
    }

    /// Every node exactly once, in deterministic preorder: roots first,
    /// then orphans, then anything only reachable through a cycle.
    pub fn flatten(&self) -> Vec<Node> {
        let mut visited = HashSet::new();
        let mut keys = Vec::with_capacity(self.order.len());
        for root in &self.roots {
            self.visit(root, &mut visited, &mut keys);
        }
        for orphan in &self.orphans {
            self.visit(orphan, &mut visited, &mut keys);
        }
        for key in &self.order {
            if !visited.contains(key) {
                self.visit(key, &mut visited, &mut keys);
            }
        }
        keys.iter()
            .filter_map(|key| self.nodes.get(key).cloned())
            .collect()
    }

    fn visit(&self, key: &GlobalKey, visited: &mut HashSet<GlobalKey>, out: &mut Vec<GlobalKey>) {
        if !self.nodes.contains_key(key) || !visited.insert(key.clone()) {
            return;
        }
        out.push(key.clone());
        if let Some(children) = self.children.get(key) {
            for child in children {
                self.visit(child, visited, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::LibraryId;
    use crate::node::NodeKind;

    fn key(native: &str) -> GlobalKey {
        GlobalKey::new(&LibraryId::new("lib"), native)
    }

    fn collection(native: &str) -> Node {
        Node::new(key(native), NodeKind::Collection)
    }

    fn item(native: &str) -> Node {
        Node::new(key(native), NodeKind::Item)
    }

    #[test]
    fn test_build_stitches_parents_and_children() {
        let (tree, warnings) = Tree::build(vec![
            collection("C1"),
            item("I1").with_parent(key("C1")),
            item("I2").with_parent(key("C1")),
        ]);

        assert!(warnings.is_empty());
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.roots(), &[key("C1")]);
        assert_eq!(tree.children_of(&key("C1")), &[key("I1"), key("I2")]);
        assert_eq!(tree.child_count(&key("C1")), 2);
        assert_eq!(tree.primary_parent_of(&key("I1")), Some(&key("C1")));
    }

    #[test]
    fn test_duplicate_key_keeps_first() {
        let first = item("I1").with_payload(crate::Payload::with_title("first"));
        let second = item("I1").with_payload(crate::Payload::with_title("second"));

        let (tree, warnings) = Tree::build(vec![first, second]);

        assert_eq!(tree.len(), 1);
        assert_eq!(warnings, vec![TreeWarning::DuplicateKey(key("I1"))]);
        let kept = tree.node(&key("I1")).unwrap();
        assert_eq!(kept.payload.title.as_deref(), Some("first"));
    }

    #[test]
    fn test_self_parent_link_dropped() {
        let (tree, warnings) = Tree::build(vec![collection("C1").with_parent(key("C1"))]);

        assert_eq!(warnings, vec![TreeWarning::SelfParent(key("C1"))]);
        assert_eq!(tree.roots(), &[key("C1")]);
        assert!(tree.node(&key("C1")).unwrap().parent_keys.is_empty());
    }

    #[test]
    fn test_dangling_parent_makes_leaf_an_orphan() {
        let (tree, warnings) = Tree::build(vec![item("I1").with_parent(key("GONE"))]);

        assert!(warnings.is_empty());
        assert_eq!(tree.orphans(), &[key("I1")]);
        assert!(tree.roots().is_empty());
        assert_eq!(tree.primary_parent_of(&key("I1")), None);
    }

    #[test]
    fn test_parent_cycle_does_not_hang_traversal() {
        let (tree, _) = Tree::build(vec![
            collection("A").with_parent(key("B")),
            collection("B").with_parent(key("A")),
        ]);

        // Neither is a root, so flatten falls back to insertion order.
        assert!(tree.roots().is_empty());
        let flat = tree.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].key, key("A"));

        let walk = tree.depth_first(&key("A"));
        assert_eq!(walk, vec![key("A"), key("B")]);
    }

    #[test]
    fn test_flatten_is_preorder_and_covers_orphans() {
        let (tree, _) = Tree::build(vec![
            collection("C2"),
            collection("C1"),
            item("I1").with_parent(key("C1")),
            item("LOOSE"),
        ]);

        let flat: Vec<GlobalKey> = tree.flatten().into_iter().map(|n| n.key).collect();
        assert_eq!(flat, vec![key("C2"), key("C1"), key("I1"), key("LOOSE")]);
    }

    #[test]
    fn test_multi_parent_leaf_listed_once() {
        let (tree, _) = Tree::build(vec![
            collection("C1"),
            collection("C2"),
            item("I1").with_parent(key("C1")).with_parent(key("C2")),
        ]);

        assert_eq!(tree.child_count(&key("C1")), 1);
        assert_eq!(tree.child_count(&key("C2")), 1);
        let flat = tree.flatten();
        assert_eq!(flat.len(), 3);
        assert_eq!(tree.primary_parent_of(&key("I1")), Some(&key("C1")));
    }

    #[test]
    fn test_empty_tree() {
        let (tree, warnings) = Tree::build(Vec::new());
        assert!(tree.is_empty());
        assert!(warnings.is_empty());
        assert!(tree.flatten().is_empty());
    }
}
