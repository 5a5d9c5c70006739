//! Serializable nested snapshots of a shadow tree.
//!
//! The arena form of [`FileTree`] is convenient to mutate but awkward to
//! read. A [`TreeSnapshot`] is the same tree as nested values, which is what
//! the CLI writes as JSON and what a replica can be seeded from.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;
use crate::meta::MetaData;
use crate::node::{FileNode, NodeUuid};
use crate::tree::FileTree;

/// A node and, recursively, its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Stable identity of the node.
    pub uuid: NodeUuid,
    /// Name of the node.
    pub name: String,
    /// Metadata of the node.
    pub meta: MetaData,
    /// Children in discovery order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<TreeSnapshot>,
}

impl TreeSnapshot {
    /// Counts this node and everything below it.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.subs.iter().map(Self::node_count).sum::<usize>()
    }
}

impl FileTree {
    /// Captures the tree as nested values.
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        self.snapshot_node(self.root())
    }

    /// Rebuilds a tree from a snapshot, keeping every UUID.
    ///
    /// # Errors
    ///
    /// Returns the [`TreeError`] of the first node that cannot be inserted:
    /// a repeated UUID, a duplicate sibling name, or an invalid name.
    pub fn from_snapshot(snapshot: TreeSnapshot) -> Result<Self, TreeError> {
        let TreeSnapshot {
            uuid,
            name,
            meta,
            subs,
        } = snapshot;
        let mut tree = Self::with_root(FileNode::with_uuid(uuid, name, meta));

        let mut pending: VecDeque<(NodeUuid, TreeSnapshot)> =
            subs.into_iter().map(|child| (uuid, child)).collect();
        while let Some((parent, child)) = pending.pop_front() {
            let TreeSnapshot {
                uuid,
                name,
                meta,
                subs,
            } = child;
            tree.insert_child(parent, FileNode::with_uuid(uuid, name, meta))?;
            pending.extend(subs.into_iter().map(|grandchild| (uuid, grandchild)));
        }
        Ok(tree)
    }

    fn snapshot_node(&self, node: &FileNode) -> TreeSnapshot {
        TreeSnapshot {
            uuid: node.uuid,
            name: node.name.clone(),
            meta: node.meta.clone(),
            subs: self
                .children(&node.uuid)
                .map(|child| self.snapshot_node(child))
                .collect(),
        }
    }
}
