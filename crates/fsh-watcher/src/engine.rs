//! The reconciliation engine.
//!
//! [`TreeEngine`] owns a shadow tree and turns path-addressed [`Event`]s
//! into tree mutations and [`EventTransaction`]s. It is synchronous and
//! holds no channels: the [`TreeWatcher`](crate::TreeWatcher) actor drives
//! it from a single task, which is what makes it the tree's only writer.
//!
//! # Path keys
//!
//! The engine knows the watched root both as a filesystem path
//! (`/home/me/fs-shadow`) and as the tree's root name (`fs-shadow`). Event
//! paths are turned into tree keys before lookup:
//!
//! ```text
//! /home/me/fs-shadow/docs/a.txt  ──exclude /home/me──►  fs-shadow/docs/a.txt
//! docs/a.txt                     ──under root name──►  fs-shadow/docs/a.txt
//! /elsewhere/a.txt               ──────────────────►  OutsideRoot
//! ```
//!
//! # Reconciliation rules
//!
//! | Event                                   | Mutation              | Transaction |
//! |-----------------------------------------|-----------------------|-------------|
//! | `Create` of an unknown path             | insert                | `Create`    |
//! | `Create` of a known path                | refresh metadata      | `Write`     |
//! | `Write`                                 | refresh metadata      | `Write`     |
//! | `Remove`                                | detach subtree        | `Remove`    |
//! | relocation, same parent                 | rename                | `Rename`    |
//! | relocation, different parent            | reparent              | `Move`      |
//! | relocation out of the root              | detach subtree        | `Remove`    |
//! | relocation into the root                | insert (or refresh)   | `Create`    |

use camino::Utf8PathBuf;
use fsh_core::{
    Event, EventTransaction, EventType, FileNode, FileTree, MetaData, NodeUuid, ShadowPath,
    TreeError,
};

use crate::collector::MetaCollector;
use crate::error::WatchError;

/// A shadow tree together with the rules for changing it.
#[derive(Debug)]
pub struct TreeEngine<M> {
    tree: FileTree,
    /// The watched root as given by the backend.
    root: ShadowPath,
    /// Everything above the root; excluded from absolute paths to form keys.
    parent: ShadowPath,
    /// The root's name as a one-segment key.
    root_key: ShadowPath,
    collector: M,
}

impl<M: MetaCollector> TreeEngine<M> {
    /// Creates an engine whose tree holds only the root.
    ///
    /// The root's metadata comes from the collector.
    ///
    /// # Errors
    ///
    /// - [`WatchError::InvalidRoot`] if the root path has no name
    /// - [`WatchError::Tree`] if the root's metadata cannot be collected
    pub fn new(root: ShadowPath, collector: M) -> Result<Self, WatchError> {
        let name = root.name();
        if name.is_empty() {
            return Err(WatchError::InvalidRoot(root.as_path().to_owned()));
        }
        let mut tree = FileTree::new(name);
        let meta = collector
            .collect(root.as_path(), Some(&tree.root().meta))
            .map_err(|source| TreeError::io(root.as_path(), source))?;
        tree.update_meta(tree.root_uuid(), meta)?;
        Self::with_tree(root, tree, collector)
    }

    /// Creates an engine around an existing tree.
    ///
    /// # Errors
    ///
    /// - [`WatchError::InvalidRoot`] if the root path has no name
    /// - [`WatchError::Tree`] if the tree's root name differs from the
    ///   root path's name, or the tree is inconsistent
    pub fn with_tree(root: ShadowPath, tree: FileTree, collector: M) -> Result<Self, WatchError> {
        let name = root.name();
        if name.is_empty() {
            return Err(WatchError::InvalidRoot(root.as_path().to_owned()));
        }
        let root_key = ShadowPath::new(name);
        let parent = root.parent_path();
        let mut engine = Self {
            tree: FileTree::new(name),
            root,
            parent,
            root_key,
            collector,
        };
        engine.restore(tree)?;
        Ok(engine)
    }

    /// Returns the tree.
    #[inline]
    #[must_use]
    pub const fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Returns the watched root path.
    #[inline]
    #[must_use]
    pub const fn root_path(&self) -> &ShadowPath {
        &self.root
    }

    /// Describes the root node as a `Create` transaction.
    ///
    /// A replica applying it to a tree with the same root UUID refreshes
    /// the root's metadata; a replica built from it via
    /// [`EventTransaction::to_node`] shares the root's identity.
    #[must_use]
    pub fn initial_transaction(&self) -> EventTransaction {
        EventTransaction::from_node(self.tree.root(), EventType::Create)
    }

    /// Converts an event path to a tree key.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::OutsideRoot`] if the path does not lie under the
    /// watched root.
    pub fn key(&self, path: &ShadowPath) -> Result<ShadowPath, TreeError> {
        let key = if path.is_absolute() {
            if !path.starts_with(&self.root) {
                return Err(self.outside(path));
            }
            path.exclude_path(&self.parent)
                .ok_or_else(|| self.outside(path))?
        } else {
            self.root_key.join_path(path)
        };
        if key.starts_with(&self.root_key) {
            Ok(key)
        } else {
            Err(self.outside(path))
        }
    }

    /// Returns the node at an event path.
    #[must_use]
    pub fn search_by_path(&self, path: &ShadowPath) -> Option<&FileNode> {
        self.key(path).ok().and_then(|key| self.tree.search(&key))
    }

    /// Returns the node with the given identity.
    #[must_use]
    pub fn search_by_uuid(&self, uuid: &NodeUuid) -> Option<&FileNode> {
        self.tree.search_by_uuid(uuid)
    }

    /// Adds a node at `path` under its already-known parent.
    ///
    /// `extra` is used as the node's metadata instead of collecting it.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if the parent is not in the tree
    /// - [`TreeError::AlreadyExists`] if the path is already in the tree
    /// - [`TreeError::Io`] if metadata collection fails
    pub fn create(
        &mut self,
        path: &ShadowPath,
        extra: Option<MetaData>,
    ) -> Result<FileNode, TreeError> {
        let key = self.key(path)?;
        let parent_key = key.parent_path();
        let parent = self
            .tree
            .search(&parent_key)
            .ok_or_else(|| TreeError::not_found(parent_key.as_path()))?
            .uuid;
        let meta = match extra {
            Some(meta) => meta,
            None => self.collect(&key, None)?,
        };

        let node = self.tree.insert_child(parent, FileNode::new(key.name(), meta))?;
        tracing::debug!(path = %key, uuid = %node.uuid, is_dir = node.is_dir(), "created node");
        Ok(node.clone())
    }

    /// Refreshes the metadata of the node at `path`.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if the path is not in the tree
    /// - [`TreeError::Io`] if metadata collection fails
    pub fn write(
        &mut self,
        path: &ShadowPath,
        extra: Option<MetaData>,
    ) -> Result<FileNode, TreeError> {
        let key = self.key(path)?;
        let (uuid, current) = {
            let node = self.lookup(&key)?;
            (node.uuid, node.meta.clone())
        };
        let meta = match extra {
            Some(meta) => meta,
            None => self.collect(&key, Some(&current))?,
        };

        let node = self.tree.update_meta(uuid, meta)?;
        tracing::debug!(
            path = %key,
            uuid = %uuid,
            sum = %node.meta.sum.map(|sum| sum.short()).unwrap_or_default(),
            "wrote node"
        );
        Ok(node.clone())
    }

    /// Removes the node at `path` with its subtree.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if the path is not in the tree
    /// - [`TreeError::RootImmutable`] for the root
    pub fn remove(&mut self, path: &ShadowPath) -> Result<FileNode, TreeError> {
        let key = self.key(path)?;
        let uuid = self.lookup(&key)?.uuid;
        let removed = self.tree.detach(uuid)?;
        tracing::debug!(path = %key, uuid = %uuid, "removed node");
        Ok(removed)
    }

    /// Moves the node at `from` so that it ends up at `to`.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if the node or the new parent is missing
    /// - [`TreeError::InvalidMove`] for a move into the node's own subtree
    /// - [`TreeError::RootImmutable`] for the root
    pub fn move_node(&mut self, from: &ShadowPath, to: &ShadowPath) -> Result<FileNode, TreeError> {
        let from_key = self.key(from)?;
        let to_key = self.key(to)?;
        let uuid = self.lookup(&from_key)?.uuid;
        let parent_key = to_key.parent_path();
        let parent = self.lookup(&parent_key)?.uuid;

        let node = self.tree.reparent(uuid, parent, Some(to_key.name()))?;
        tracing::debug!(from = %from_key, to = %to_key, uuid = %uuid, "moved node");
        Ok(node.clone())
    }

    /// Gives the node at `from` the last segment of `to` as its name.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if the node is missing
    /// - [`TreeError::InvalidName`] if `to` has no last segment
    /// - [`TreeError::RootImmutable`] for the root
    /// - [`TreeError::InvalidMove`] if `to` lies under a different parent;
    ///   use [`TreeEngine::move_node`] for that
    pub fn rename(&mut self, from: &ShadowPath, to: &ShadowPath) -> Result<FileNode, TreeError> {
        let from_key = self.key(from)?;
        let to_key = self.key(to)?;
        let uuid = self.lookup(&from_key)?.uuid;

        let to_parent = to_key.parent_path();
        if to_parent != from_key.parent_path() {
            let target = self.lookup(&to_parent)?.uuid;
            return Err(TreeError::InvalidMove { node: uuid, target });
        }

        let node = self.tree.rename_node(uuid, to_key.name())?;
        tracing::debug!(from = %from_key, name = %node.name, uuid = %uuid, "renamed node");
        Ok(node.clone())
    }

    /// Classifies an event, applies it, and describes the result.
    ///
    /// Exactly one mutation is applied. See the module documentation for
    /// the rules.
    ///
    /// # Errors
    ///
    /// Any error of the mutation, plus [`TreeError::MissingDestination`] for
    /// a relocation without a destination.
    pub fn handle(
        &mut self,
        event: &Event,
        extra: Option<MetaData>,
    ) -> Result<EventTransaction, TreeError> {
        let (node, kind) = match event.kind {
            EventType::Create => self.create_or_write(&event.from_path, extra)?,
            EventType::Write => (self.write(&event.from_path, extra)?, EventType::Write),
            EventType::Remove => (self.remove(&event.from_path)?, EventType::Remove),
            EventType::Rename | EventType::Move => {
                let to = event
                    .to_path
                    .as_ref()
                    .ok_or_else(|| TreeError::MissingDestination {
                        kind: event.kind,
                        path: event.from_path.as_path().to_owned(),
                    })?;
                self.relocate(&event.from_path, to, extra)?
            }
        };
        Ok(EventTransaction::from_node(&node, kind))
    }

    /// Replays a transaction from another tree.
    ///
    /// # Errors
    ///
    /// Any error of [`FileTree::apply`]; the tree is unchanged on error.
    pub fn apply(&mut self, tx: &EventTransaction) -> Result<EventTransaction, TreeError> {
        let stored = self.tree.apply(tx)?;
        tracing::debug!(kind = %tx.kind, uuid = %tx.uuid, name = %tx.name, "applied transaction");
        Ok(EventTransaction::from_node(&stored, tx.kind))
    }

    /// Replaces the tree wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Inconsistent`] if the tree's root name differs
    /// from the watched root's name or the tree violates an invariant. The
    /// current tree is kept on error.
    pub fn restore(&mut self, tree: FileTree) -> Result<(), TreeError> {
        if tree.root().name != self.root_key.as_str() {
            return Err(TreeError::Inconsistent(format!(
                "restored root {:?} does not match watched root {:?}",
                tree.root().name,
                self.root_key.as_str()
            )));
        }
        tree.check_consistency()?;
        tracing::info!(root = %self.root, nodes = tree.node_count(), "restored tree");
        self.tree = tree;
        Ok(())
    }

    fn create_or_write(
        &mut self,
        path: &ShadowPath,
        extra: Option<MetaData>,
    ) -> Result<(FileNode, EventType), TreeError> {
        let key = self.key(path)?;
        if self.tree.search(&key).is_some() {
            Ok((self.write(path, extra)?, EventType::Write))
        } else {
            Ok((self.create(path, extra)?, EventType::Create))
        }
    }

    fn relocate(
        &mut self,
        from: &ShadowPath,
        to: &ShadowPath,
        extra: Option<MetaData>,
    ) -> Result<(FileNode, EventType), TreeError> {
        match (self.key(from), self.key(to)) {
            (Ok(from_key), Ok(to_key)) => {
                if from_key.parent_path() == to_key.parent_path() {
                    Ok((self.rename(from, to)?, EventType::Rename))
                } else {
                    Ok((self.move_node(from, to)?, EventType::Move))
                }
            }
            (Ok(_), Err(_)) => Ok((self.remove(from)?, EventType::Remove)),
            (Err(_), Ok(_)) => self.create_or_write(to, extra),
            (Err(err), Err(_)) => Err(err),
        }
    }

    fn lookup(&self, key: &ShadowPath) -> Result<&FileNode, TreeError> {
        self.tree
            .search(key)
            .ok_or_else(|| TreeError::not_found(key.as_path()))
    }

    fn collect(&self, key: &ShadowPath, current: Option<&MetaData>) -> Result<MetaData, TreeError> {
        let path = self.parent.join_path(key);
        self.collector
            .collect(path.as_path(), current)
            .map_err(|source| TreeError::io(path.as_path(), source))
    }

    fn outside(&self, path: &ShadowPath) -> TreeError {
        tracing::trace!(path = %path, root = %self.root, "path outside watched root");
        TreeError::OutsideRoot {
            path: Utf8PathBuf::from(path.as_str()),
        }
    }
}
