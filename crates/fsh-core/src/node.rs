//! Shadow tree nodes and their identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::meta::MetaData;

/// The stable identity of a node.
///
/// Assigned once when the node is created and never reassigned. Renames and
/// moves keep it, which is what lets a remote replica follow a node across
/// relocations.
///
/// # Examples
///
/// ```
/// use fsh_core::NodeUuid;
///
/// let id = NodeUuid::new();
/// let parsed: NodeUuid = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeUuid(pub Uuid);

impl NodeUuid {
    /// Generates a fresh random identity.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NodeUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for NodeUuid {
    #[inline]
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A file or directory in the shadow tree.
///
/// Nodes live in the arena of a [`FileTree`](crate::FileTree) and refer to
/// each other by UUID. A node handed out by a lookup is a read-only view;
/// every structural change goes through the tree's mutators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Stable identity.
    pub uuid: NodeUuid,

    /// Current last path segment.
    pub name: String,

    /// Identity of the parent; `None` only for the root.
    pub parent_uuid: Option<NodeUuid>,

    /// Direct children in discovery order.
    pub subs: Vec<NodeUuid>,

    /// Metadata as of the last create or write.
    pub meta: MetaData,
}

impl FileNode {
    /// Creates a detached node with a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>, meta: MetaData) -> Self {
        Self::with_uuid(NodeUuid::new(), name, meta)
    }

    /// Creates a detached node with a known identity.
    #[must_use]
    pub fn with_uuid(uuid: NodeUuid, name: impl Into<String>, meta: MetaData) -> Self {
        Self {
            uuid,
            name: name.into(),
            parent_uuid: None,
            subs: Vec::new(),
            meta,
        }
    }

    /// Returns `true` if the node is a directory.
    #[inline]
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.meta.is_dir
    }

    /// Returns `true` if the node has no parent.
    #[inline]
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_uuid.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_uuid_is_unique() {
        assert_ne!(NodeUuid::new(), NodeUuid::new());
    }

    #[test]
    fn test_node_uuid_parse_roundtrip() {
        let id = NodeUuid::new();
        let parsed = NodeUuid::from_str(&id.to_string()).expect("parse");
        assert_eq!(parsed, id);
        assert!(NodeUuid::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_new_node_is_detached() {
        let node = FileNode::new("file.txt", MetaData::default());
        assert!(node.is_root());
        assert!(!node.is_dir());
        assert!(node.subs.is_empty());
    }
}
