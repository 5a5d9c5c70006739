//! Backend constructors.
//!
//! Both constructors return a [`TreeWatcher`] in the `Created` state
//! together with the initial transaction describing the root, so a replica
//! can be seeded before any other transaction arrives.

use std::sync::Arc;

use camino::Utf8Path;
use fsh_core::{EventTransaction, FileTree, ShadowPath, WatchConfig};

use crate::collector::{FsCollector, VirtualCollector};
use crate::engine::TreeEngine;
use crate::error::WatchError;
use crate::filter::{CompositeFilter, PathFilter};
use crate::scan::{TreeWalker, populate};
use crate::source::{FsSource, VirtualFeeder, virtual_source};
use crate::watcher::{Backend, TreeWatcher};

impl TreeWatcher {
    /// Mirrors a directory on disk.
    ///
    /// The OS notifier is set up first and the existing tree scanned
    /// afterwards, so nothing that changes during the scan is missed.
    /// Entries that could not be scanned are reported on the error queue.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Config`] if the configuration is invalid
    /// - [`WatchError::PathNotFound`] or [`WatchError::NotADirectory`] if
    ///   `path` is not an existing directory
    /// - [`WatchError::InvalidRoot`] if `path` resolves to the filesystem root
    /// - [`WatchError::Notify`] if the OS notifier cannot be set up
    pub async fn new_real(
        path: impl AsRef<Utf8Path>,
        config: &WatchConfig,
    ) -> Result<(Self, EventTransaction), WatchError> {
        let filter = CompositeFilter::from_config(config);
        Self::new_real_with_filter(path, config, filter).await
    }

    /// Mirrors a directory on disk, mirroring only what `filter` accepts.
    ///
    /// The filter replaces the one built from `skip_hidden` and
    /// `ignore_names`.
    ///
    /// # Errors
    ///
    /// See [`TreeWatcher::new_real`].
    pub async fn new_real_with_filter<F: PathFilter>(
        path: impl AsRef<Utf8Path>,
        config: &WatchConfig,
        filter: F,
    ) -> Result<(Self, EventTransaction), WatchError> {
        let path = path.as_ref();
        config.validate()?;
        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }
        if !path.is_dir() {
            return Err(WatchError::NotADirectory(path.to_owned()));
        }
        let root = ShadowPath::from_fs(path)?;
        if root.name().is_empty() {
            return Err(WatchError::InvalidRoot(root.as_path().to_owned()));
        }

        let walker = TreeWalker::new(root.as_path(), Arc::new(filter))
            .with_recursive(config.recursive)
            .with_follow_links(config.follow_links);
        let source = FsSource::start(walker.clone(), config)?;

        let collector = FsCollector::new(config.compute_checksums);
        let scan_root = root.clone();
        let (engine, backlog) = tokio::task::spawn_blocking(move || {
            let mut engine = TreeEngine::new(scan_root, collector)?;
            let errors = populate(&mut engine, &walker);
            Ok::<_, WatchError>((engine, errors))
        })
        .await
        .map_err(|err| WatchError::Source(format!("initial scan failed: {err}")))??;

        tracing::info!(
            root = %root,
            nodes = engine.tree().node_count(),
            unreadable = backlog.len(),
            "initial scan complete"
        );
        let initial = engine.initial_transaction();
        let watcher = Self::spawn(Backend::Real, engine, source, config, backlog);
        Ok((watcher, initial))
    }

    /// Mirrors a tree that exists only as a stream of events.
    ///
    /// `path` names the root and is never looked up on disk. The tree starts
    /// from `seed` when given (its root must carry `path`'s last segment) and
    /// from a bare root otherwise. Events and transactions are supplied
    /// through the returned [`VirtualFeeder`]; once every feeder clone is
    /// dropped the watcher's task ends.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Config`] if the configuration is invalid
    /// - [`WatchError::InvalidRoot`] if `path` has no last segment
    /// - [`WatchError::Tree`] if `seed` does not match `path` or is
    ///   inconsistent
    #[allow(clippy::unused_async)] // Async for API consistency with new_real()
    pub async fn new_virtual(
        path: impl Into<ShadowPath>,
        seed: Option<FileTree>,
        config: &WatchConfig,
    ) -> Result<(Self, VirtualFeeder, EventTransaction), WatchError> {
        config.validate()?;
        let root = path.into();
        let engine = match seed {
            Some(tree) => TreeEngine::with_tree(root, tree, VirtualCollector)?,
            None => TreeEngine::new(root, VirtualCollector)?,
        };

        let (source, feeder) = virtual_source(config.raw_capacity);
        let initial = engine.initial_transaction();
        tracing::info!(
            root = %engine.root_path(),
            nodes = engine.tree().node_count(),
            "virtual tree ready"
        );
        let watcher = Self::spawn(Backend::Virtual, engine, source, config, Vec::new());
        Ok((watcher, feeder, initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsh_core::{EventType, FileNode, MetaData};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_real_rejects_missing_path() {
        let dir = TempDir::new().expect("tempdir");
        let missing = Utf8Path::from_path(dir.path()).expect("utf8").join("missing");
        let err = TreeWatcher::new_real(&missing, &WatchConfig::default())
            .await
            .unwrap_err();
        match err {
            WatchError::PathNotFound(path) => assert_eq!(path, missing),
            other => panic!("Expected PathNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_real_rejects_file() {
        let dir = TempDir::new().expect("tempdir");
        let file = Utf8Path::from_path(dir.path()).expect("utf8").join("file.txt");
        fs::write(&file, b"x").expect("write");
        let err = TreeWatcher::new_real(&file, &WatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_new_real_rejects_invalid_config() {
        let dir = TempDir::new().expect("tempdir");
        let config = WatchConfig {
            raw_capacity: 0,
            ..WatchConfig::default()
        };
        let err = TreeWatcher::new_real(Utf8Path::from_path(dir.path()).expect("utf8"), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
    }

    #[tokio::test]
    async fn test_new_real_scans_existing_tree() {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8Path::from_path(dir.path()).expect("utf8");
        fs::create_dir(root.join("docs")).expect("mkdir");
        fs::write(root.join("docs/a.txt"), b"a").expect("write");
        fs::create_dir(root.join(".git")).expect("mkdir");

        let (mut watcher, initial) = TreeWatcher::new_real(root, &WatchConfig::default())
            .await
            .expect("watcher");
        assert_eq!(watcher.backend(), Backend::Real);
        assert_eq!(initial.kind, EventType::Create);
        assert_eq!(initial.parent_uuid, None);

        let tree = watcher.tree().await.expect("tree");
        assert_eq!(tree.root_uuid(), initial.uuid);
        // root, docs, a.txt; .git is ignored by default
        assert_eq!(tree.node_count(), 3);
        watcher.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_new_virtual_never_touches_disk() {
        let (watcher, _feeder, initial) =
            TreeWatcher::new_virtual("/does/not/exist", None, &WatchConfig::default())
                .await
                .expect("watcher");
        assert_eq!(watcher.backend(), Backend::Virtual);
        assert_eq!(initial.name, "exist");
        assert!(initial.meta.is_dir);
    }

    #[tokio::test]
    async fn test_new_virtual_with_seed() {
        let mut seed = FileTree::new("project");
        seed.insert_child(seed.root_uuid(), FileNode::new("kept.txt", MetaData::default()))
            .expect("seed");
        let (watcher, _feeder, initial) =
            TreeWatcher::new_virtual("/remote/project", Some(seed.clone()), &WatchConfig::default())
                .await
                .expect("watcher");
        assert_eq!(initial.uuid, seed.root_uuid());
        assert!(watcher.search_by_path("kept.txt").await.expect("search").is_some());

        let err = TreeWatcher::new_virtual("/remote/other", Some(seed), &WatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Tree(_)));
    }

    #[tokio::test]
    async fn test_new_virtual_rejects_unnamed_root() {
        let err = TreeWatcher::new_virtual("/", None, &WatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::InvalidRoot(_)));
    }
}
