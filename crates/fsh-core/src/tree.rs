//! The shadow tree: an arena of [`FileNode`]s linked by UUID.
//!
//! # Design
//!
//! Nodes are stored in a single `FxHashMap` keyed by [`NodeUuid`]. Structure
//! is expressed through `parent_uuid` back-references and ordered `subs`
//! lists, so re-linking a node during a move touches two `subs` vectors and
//! one field, independent of subtree size.
//!
//! ```text
//! nodes: { R: FileNode{subs:[A,B]}, A: FileNode{parent:R}, B: FileNode{parent:R, subs:[C]}, C: ... }
//!
//!         R
//!        / \
//!       A   B
//!           |
//!           C
//! ```
//!
//! # Path keys
//!
//! Lookups by path take a *tree key*: a relative path whose first segment is
//! the root's name (`fs-shadow/docs/readme.md`). Watchers compute keys by
//! excluding the root's parent directory from absolute paths.
//!
//! # Invariants
//!
//! Every mutator validates before it changes anything, so an error always
//! leaves the tree as it was. After every successful mutation:
//!
//! - UUIDs are unique (they are the arena keys)
//! - every non-root node's parent exists and lists it exactly once in `subs`
//! - every node is reachable from the root through exactly one parent
//! - sibling names are unique
//!
//! [`FileTree::check_consistency`] verifies all of them.

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::TreeError;
use crate::event::EventType;
use crate::meta::MetaData;
use crate::node::{FileNode, NodeUuid};
use crate::path::ShadowPath;
use crate::transaction::EventTransaction;

/// An in-memory mirror of a directory hierarchy.
///
/// # Examples
///
/// ```
/// use fsh_core::{FileNode, FileTree, MetaData, ShadowPath};
///
/// let mut tree = FileTree::new("root");
/// let root = tree.root_uuid();
/// let docs = tree.insert_child(root, FileNode::new("docs", MetaData::directory()))?.uuid;
/// tree.insert_child(docs, FileNode::new("a.txt", MetaData::for_content(b"a")))?;
///
/// let found = tree.search(&ShadowPath::new("root/docs/a.txt")).unwrap();
/// assert_eq!(found.name, "a.txt");
/// assert_eq!(tree.path_of(&found.uuid).unwrap().as_str(), "root/docs/a.txt");
/// # Ok::<(), fsh_core::TreeError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTree {
    root: NodeUuid,
    nodes: FxHashMap<NodeUuid, FileNode>,
}

impl FileTree {
    /// Creates a tree holding only a directory root with the given name.
    #[must_use]
    pub fn new(root_name: impl Into<String>) -> Self {
        Self::with_root(FileNode::new(root_name, MetaData::directory()))
    }

    /// Creates a tree from a root node.
    ///
    /// Any parent or children the node claims are discarded.
    #[must_use]
    pub fn with_root(mut root: FileNode) -> Self {
        root.parent_uuid = None;
        root.subs.clear();
        root.meta.is_dir = true;
        root.meta.sum = None;

        let uuid = root.uuid;
        let mut nodes = FxHashMap::default();
        nodes.insert(uuid, root);
        Self { root: uuid, nodes }
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> &FileNode {
        &self.nodes[&self.root]
    }

    /// Returns the root's identity.
    #[inline]
    #[must_use]
    pub const fn root_uuid(&self) -> NodeUuid {
        self.root
    }

    /// Returns the number of nodes, including the root.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Resolves a tree key by walking from the root.
    ///
    /// The first segment must match the root's name. Returns `None` as soon
    /// as a segment has no matching child.
    #[must_use]
    pub fn search(&self, key: &ShadowPath) -> Option<&FileNode> {
        let mut segments = key.segments();
        let root = self.root();
        if segments.next()? != root.name {
            return None;
        }

        let mut current = root;
        for segment in segments {
            current = self.child_named(current, segment)?;
        }
        Some(current)
    }

    /// Looks a node up by identity.
    #[inline]
    #[must_use]
    pub fn search_by_uuid(&self, uuid: &NodeUuid) -> Option<&FileNode> {
        self.nodes.get(uuid)
    }

    /// Returns the tree key of a node.
    #[must_use]
    pub fn path_of(&self, uuid: &NodeUuid) -> Option<ShadowPath> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(uuid)?;
        loop {
            names.push(current.name.as_str());
            match current.parent_uuid {
                Some(parent) if names.len() <= self.nodes.len() => {
                    current = self.nodes.get(&parent)?;
                }
                Some(_) => return None,
                None => break,
            }
        }

        let mut path = ShadowPath::new("");
        for name in names.iter().rev() {
            path = path.join(name);
        }
        Some(path)
    }

    /// Returns the direct children of a node, in discovery order.
    ///
    /// Unknown UUIDs yield no children.
    pub fn children(&self, uuid: &NodeUuid) -> impl Iterator<Item = &FileNode> {
        self.nodes
            .get(uuid)
            .map(|node| node.subs.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Iterates every node, depth-first and parents before children.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Attaches a detached node as the last child of `parent`.
    ///
    /// The node keeps its UUID. A parent that was recorded as a file is
    /// promoted to a directory, since it now has children.
    ///
    /// # Errors
    ///
    /// - [`TreeError::InvalidName`] if the node's name is not a single segment
    /// - [`TreeError::DuplicateUuid`] if the node's UUID is already in the tree
    /// - [`TreeError::UuidNotFound`] if `parent` is not in the tree
    /// - [`TreeError::AlreadyExists`] if `parent` has a child with that name
    pub fn insert_child(
        &mut self,
        parent: NodeUuid,
        mut node: FileNode,
    ) -> Result<&FileNode, TreeError> {
        validate_name(&node.name)?;
        if self.nodes.contains_key(&node.uuid) {
            return Err(TreeError::DuplicateUuid(node.uuid));
        }
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or(TreeError::UuidNotFound(parent))?;
        if self.child_named(parent_node, &node.name).is_some() {
            return Err(TreeError::AlreadyExists {
                path: self.key_for_child(parent, &node.name),
            });
        }

        node.parent_uuid = Some(parent);
        node.subs.clear();
        if node.meta.is_dir {
            node.meta.sum = None;
        }

        let uuid = node.uuid;
        self.nodes.insert(uuid, node);
        self.link(parent, uuid);
        self.node(uuid)
    }

    /// Replaces a node's metadata.
    ///
    /// A node with children stays a directory whatever the new metadata says.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UuidNotFound`] if the node does not exist.
    pub fn update_meta(
        &mut self,
        uuid: NodeUuid,
        mut meta: MetaData,
    ) -> Result<&FileNode, TreeError> {
        let node = self
            .nodes
            .get_mut(&uuid)
            .ok_or(TreeError::UuidNotFound(uuid))?;
        if !node.subs.is_empty() || uuid == self.root {
            meta.is_dir = true;
        }
        if meta.is_dir {
            meta.sum = None;
        }
        node.meta = meta;
        Ok(&*node)
    }

    /// Changes a node's name in place, keeping its parent and position.
    ///
    /// An existing sibling with the new name is replaced, as `rename(2)` does.
    ///
    /// # Errors
    ///
    /// See [`FileTree::reparent`].
    pub fn rename_node(&mut self, uuid: NodeUuid, name: &str) -> Result<&FileNode, TreeError> {
        if uuid == self.root {
            return Err(TreeError::RootImmutable);
        }
        let parent = self
            .nodes
            .get(&uuid)
            .ok_or(TreeError::UuidNotFound(uuid))?
            .parent_uuid
            .ok_or(TreeError::RootImmutable)?;
        self.reparent(uuid, parent, Some(name))
    }

    /// Moves a node under a new parent, optionally renaming it.
    ///
    /// UUID and metadata are preserved. When the parent does not change the
    /// node keeps its position among its siblings; otherwise it becomes the
    /// new parent's last child. An existing sibling with the target name is
    /// replaced, together with its subtree.
    ///
    /// # Errors
    ///
    /// - [`TreeError::RootImmutable`] if `uuid` is the root
    /// - [`TreeError::UuidNotFound`] if the node or the new parent is missing
    /// - [`TreeError::InvalidName`] if the new name is not a single segment
    /// - [`TreeError::InvalidMove`] if the new parent lies inside the node's
    ///   subtree, or the replaced sibling contains the node
    pub fn reparent(
        &mut self,
        uuid: NodeUuid,
        new_parent: NodeUuid,
        new_name: Option<&str>,
    ) -> Result<&FileNode, TreeError> {
        if uuid == self.root {
            return Err(TreeError::RootImmutable);
        }
        let (old_parent, name) = {
            let node = self.nodes.get(&uuid).ok_or(TreeError::UuidNotFound(uuid))?;
            let old_parent = node.parent_uuid.ok_or(TreeError::RootImmutable)?;
            (old_parent, new_name.unwrap_or(node.name.as_str()).to_owned())
        };
        validate_name(&name)?;

        let target = self
            .nodes
            .get(&new_parent)
            .ok_or(TreeError::UuidNotFound(new_parent))?;
        if self.is_within(new_parent, uuid) {
            return Err(TreeError::InvalidMove {
                node: uuid,
                target: new_parent,
            });
        }
        let victim = self
            .child_named(target, &name)
            .map(|sibling| sibling.uuid)
            .filter(|sibling| *sibling != uuid);
        if let Some(victim) = victim {
            if self.is_within(uuid, victim) {
                return Err(TreeError::InvalidMove {
                    node: uuid,
                    target: victim,
                });
            }
        }

        if let Some(victim) = victim {
            self.remove_subtree(victim);
        }
        if old_parent != new_parent {
            self.unlink(old_parent, uuid);
            self.link(new_parent, uuid);
        }
        let node = self
            .nodes
            .get_mut(&uuid)
            .ok_or(TreeError::UuidNotFound(uuid))?;
        node.name = name;
        node.parent_uuid = Some(new_parent);
        Ok(&*node)
    }

    /// Removes a node and its whole subtree, returning the removed node.
    ///
    /// # Errors
    ///
    /// - [`TreeError::RootImmutable`] if `uuid` is the root
    /// - [`TreeError::UuidNotFound`] if the node does not exist
    pub fn detach(&mut self, uuid: NodeUuid) -> Result<FileNode, TreeError> {
        if uuid == self.root {
            return Err(TreeError::RootImmutable);
        }
        if !self.nodes.contains_key(&uuid) {
            return Err(TreeError::UuidNotFound(uuid));
        }
        self.remove_subtree(uuid)
            .ok_or(TreeError::UuidNotFound(uuid))
    }

    /// Replays a transaction produced by another tree.
    ///
    /// Nodes are addressed by UUID, so a replica that applies the same
    /// transactions in the same order ends up with the same identities as
    /// the origin. Returns the affected node as it is after the mutation
    /// (the removed node, for [`EventType::Remove`]).
    ///
    /// A `Create` without a parent refreshes the root, which is how the
    /// initial transaction of a watcher is absorbed.
    ///
    /// # Errors
    ///
    /// Any error of the underlying mutator. The tree is unchanged on error.
    pub fn apply(&mut self, tx: &EventTransaction) -> Result<FileNode, TreeError> {
        tracing::trace!(kind = %tx.kind, uuid = %tx.uuid, name = %tx.name, "applying transaction");
        match tx.kind {
            EventType::Create => match tx.parent_uuid {
                Some(parent) => self
                    .insert_child(parent, FileNode::with_uuid(tx.uuid, &tx.name, tx.meta.clone()))
                    .cloned(),
                None if tx.uuid == self.root => self.update_meta(tx.uuid, tx.meta.clone()).cloned(),
                None => Err(TreeError::RootImmutable),
            },
            EventType::Write => self.update_meta(tx.uuid, tx.meta.clone()).cloned(),
            EventType::Remove => self.detach(tx.uuid),
            EventType::Rename => self.rename_node(tx.uuid, &tx.name).cloned(),
            EventType::Move => {
                let parent = tx.parent_uuid.ok_or(TreeError::RootImmutable)?;
                self.reparent(tx.uuid, parent, Some(&tx.name)).cloned()
            }
        }
    }

    /// Verifies every structural invariant of the tree.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Inconsistent`] describing the first violation.
    pub fn check_consistency(&self) -> Result<(), TreeError> {
        let root = self
            .nodes
            .get(&self.root)
            .ok_or_else(|| TreeError::Inconsistent("root node is missing".to_owned()))?;
        if root.parent_uuid.is_some() {
            return Err(TreeError::Inconsistent("root node has a parent".to_owned()));
        }

        let mut seen: FxHashSet<NodeUuid> = FxHashSet::default();
        let mut stack = vec![self.root];
        while let Some(uuid) = stack.pop() {
            if !seen.insert(uuid) {
                return Err(TreeError::Inconsistent(format!(
                    "node {uuid} is reachable from more than one parent"
                )));
            }
            let node = self
                .nodes
                .get(&uuid)
                .ok_or_else(|| TreeError::Inconsistent(format!("dangling child {uuid}")))?;
            if uuid != self.root {
                validate_name(&node.name)
                    .map_err(|e| TreeError::Inconsistent(format!("node {uuid}: {e}")))?;
            }

            let mut names: FxHashSet<&str> = FxHashSet::default();
            for child_id in &node.subs {
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    TreeError::Inconsistent(format!("node {uuid} lists missing child {child_id}"))
                })?;
                if child.parent_uuid != Some(uuid) {
                    return Err(TreeError::Inconsistent(format!(
                        "child {child_id} does not point back to parent {uuid}"
                    )));
                }
                if !names.insert(child.name.as_str()) {
                    return Err(TreeError::Inconsistent(format!(
                        "duplicate name {:?} under {uuid}",
                        child.name
                    )));
                }
                stack.push(*child_id);
            }
        }

        if seen.len() != self.nodes.len() {
            return Err(TreeError::Inconsistent(format!(
                "{} nodes are not reachable from the root",
                self.nodes.len() - seen.len()
            )));
        }
        Ok(())
    }

    /// Compares names, kinds, and hierarchy, ignoring identities and
    /// checksums.
    ///
    /// Two trees built from the same ordered event sequence by different
    /// backends compare equal here even though their UUIDs differ.
    #[must_use]
    pub fn structurally_eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self.root(), other.root())];
        while let Some((left, right)) = stack.pop() {
            if left.name != right.name
                || left.meta.is_dir != right.meta.is_dir
                || left.subs.len() != right.subs.len()
            {
                return false;
            }
            for (l, r) in self.children(&left.uuid).zip(other.children(&right.uuid)) {
                stack.push((l, r));
            }
        }
        true
    }

    /// Returns a human-readable rendering of the tree for debugging.
    #[must_use]
    pub fn dump(&self) -> TreeDump<'_> {
        TreeDump {
            tree: self,
            show_uuids: false,
            show_meta: false,
        }
    }

    fn node(&self, uuid: NodeUuid) -> Result<&FileNode, TreeError> {
        self.nodes.get(&uuid).ok_or(TreeError::UuidNotFound(uuid))
    }

    fn child_named<'a>(&'a self, parent: &FileNode, name: &str) -> Option<&'a FileNode> {
        parent
            .subs
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|child| child.name == name)
    }

    fn key_for_child(&self, parent: NodeUuid, name: &str) -> camino::Utf8PathBuf {
        self.path_of(&parent)
            .unwrap_or_else(|| ShadowPath::new(""))
            .join(name)
            .as_path()
            .to_owned()
    }

    /// Returns `true` if `candidate` is `ancestor` or lies beneath it.
    fn is_within(&self, candidate: NodeUuid, ancestor: NodeUuid) -> bool {
        let mut current = Some(candidate);
        let mut steps = 0;
        while let Some(uuid) = current {
            if uuid == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.nodes.get(&uuid).and_then(|node| node.parent_uuid);
        }
        false
    }

    fn link(&mut self, parent: NodeUuid, child: NodeUuid) {
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.subs.push(child);
            parent.meta.is_dir = true;
            parent.meta.sum = None;
        }
    }

    fn unlink(&mut self, parent: NodeUuid, child: NodeUuid) {
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.subs.retain(|id| *id != child);
        }
    }

    /// Drops a node and everything below it from the arena.
    fn remove_subtree(&mut self, uuid: NodeUuid) -> Option<FileNode> {
        let parent = self.nodes.get(&uuid)?.parent_uuid;
        if let Some(parent) = parent {
            self.unlink(parent, uuid);
        }

        let removed = self.nodes.remove(&uuid)?;
        let mut stack = removed.subs.clone();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.subs);
            }
        }
        Some(removed)
    }
}

/// Rejects names that are not exactly one path segment.
fn validate_name(name: &str) -> Result<(), TreeError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains(std::path::MAIN_SEPARATOR);
    if invalid {
        Err(TreeError::InvalidName(name.to_owned()))
    } else {
        Ok(())
    }
}

/// Depth-first iterator over a [`FileTree`], created by [`FileTree::iter`].
#[derive(Debug)]
pub struct Iter<'a> {
    tree: &'a FileTree,
    stack: Vec<NodeUuid>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a FileNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let uuid = self.stack.pop()?;
            if let Some(node) = self.tree.nodes.get(&uuid) {
                self.stack.extend(node.subs.iter().rev());
                return Some(node);
            }
        }
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = &'a FileNode;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A printable view of a tree, created by [`FileTree::dump`].
///
/// ```text
/// fs-shadow/
/// ├── folder/
/// │   └── inner.txt
/// └── file.txt
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TreeDump<'a> {
    tree: &'a FileTree,
    show_uuids: bool,
    show_meta: bool,
}

impl TreeDump<'_> {
    /// Appends each node's UUID.
    #[must_use]
    pub const fn with_uuids(mut self) -> Self {
        self.show_uuids = true;
        self
    }

    /// Appends size and a short checksum to file entries.
    #[must_use]
    pub const fn with_meta(mut self) -> Self {
        self.show_meta = true;
        self
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, node: &FileNode) -> fmt::Result {
        f.write_str(&node.name)?;
        if node.is_dir() {
            f.write_str("/")?;
        } else if self.show_meta {
            write!(f, " ({} bytes", node.meta.size)?;
            if let Some(sum) = &node.meta.sum {
                write!(f, ", {}", sum.short())?;
            }
            f.write_str(")")?;
        }
        if self.show_uuids {
            write!(f, " [{}]", node.uuid)?;
        }
        writeln!(f)
    }
}

impl fmt::Display for TreeDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.tree.root();
        self.write_node(f, root)?;

        // (node, prefix of its line, last among siblings)
        let mut stack: VecDeque<(&FileNode, String, bool)> = VecDeque::new();
        let children: Vec<_> = self.tree.children(&root.uuid).collect();
        let count = children.len();
        for (index, child) in children.into_iter().enumerate().rev() {
            stack.push_front((child, String::new(), index + 1 == count));
        }

        while let Some((node, prefix, last)) = stack.pop_front() {
            let branch = if last { "└── " } else { "├── " };
            write!(f, "{prefix}{branch}")?;
            self.write_node(f, node)?;

            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            let children: Vec<_> = self.tree.children(&node.uuid).collect();
            let count = children.len();
            for (index, child) in children.into_iter().enumerate().rev() {
                stack.push_front((child, child_prefix.clone(), index + 1 == count));
            }
        }
        Ok(())
    }
}
