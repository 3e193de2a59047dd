//! Operation planning: from a diff to an ordered list of store operations.
//!
//! Planning is pure and deterministic. The phase order is fixed (creates,
//! updates, moves, deletes) and within each phase ordering guarantees that
//! parents exist before their children arrive and that no container is
//! removed while known children remain.

use serde::{Deserialize, Serialize};
use tracing::debug;

use refolio_model::{GlobalKey, Node};

use crate::diff::ChangeSet;

/// One structural operation against the local store.
///
/// Creates embed the full node; moves carry the key, the new parent key
/// (resolved by the executor at apply time), and whether the moved node
/// is a container, which decides where a parentless move lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlannedOp {
    Create {
        node: Node,
        parent: Option<GlobalKey>,
    },
    Update {
        node: Node,
    },
    Move {
        key: GlobalKey,
        new_parent: Option<GlobalKey>,
        container: bool,
    },
    Delete {
        key: GlobalKey,
        container: bool,
    },
}

impl PlannedOp {
    pub fn key(&self) -> &GlobalKey {
        match self {
            PlannedOp::Create { node, .. } => &node.key,
            PlannedOp::Update { node } => &node.key,
            PlannedOp::Move { key, .. } => key,
            PlannedOp::Delete { key, .. } => key,
        }
    }
}

/// Orders a diff into an executable plan.
///
/// Creates run containers before leaves, both preserving diff order.
/// Deletes run leaves first, then containers ascending by child count
/// (emptiest first, ties keeping encounter order).
pub fn plan(changes: &ChangeSet) -> Vec<PlannedOp> {
    let mut ops = Vec::with_capacity(changes.change_count());

    for node in changes
        .created_containers
        .iter()
        .chain(&changes.created_leaves)
    {
        ops.push(PlannedOp::Create {
            node: node.clone(),
            parent: node.primary_parent().cloned(),
        });
    }

    for updated in changes
        .updated_containers
        .iter()
        .chain(&changes.updated_leaves)
    {
        ops.push(PlannedOp::Update {
            node: updated.node.clone(),
        });
    }

    for moved in &changes.moved_containers {
        ops.push(PlannedOp::Move {
            key: moved.key.clone(),
            new_parent: moved.new_parent.clone(),
            container: true,
        });
    }
    for moved in &changes.moved_leaves {
        ops.push(PlannedOp::Move {
            key: moved.key.clone(),
            new_parent: moved.new_parent.clone(),
            container: false,
        });
    }

    for deleted in &changes.deleted_leaves {
        ops.push(PlannedOp::Delete {
            key: deleted.key.clone(),
            container: false,
        });
    }
    let mut containers = changes.deleted_containers.clone();
    containers.sort_by_key(|deleted| deleted.child_count);
    for deleted in containers {
        ops.push(PlannedOp::Delete {
            key: deleted.key,
            container: true,
        });
    }

    debug!("Planned {} operations", ops.len());
    ops
}
