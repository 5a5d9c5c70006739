//! Directory enumeration for the real backend.
//!
//! [`TreeWalker`] lists the entries under the watched root (or under one of
//! its subdirectories) in the order a tree must be built: every directory
//! before its contents, siblings sorted by name. It is used for the initial
//! scan and again whenever a directory appears, so a directory moved in from
//! outside is mirrored together with everything inside it.
//!
//! Unlike a source-code scanner this walker applies no ignore files: what is
//! mirrored is decided by the [`PathFilter`] alone, against paths relative
//! to the watched root.

use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use fsh_core::{ShadowPath, TreeError};
use ignore::WalkBuilder;

use crate::collector::MetaCollector;
use crate::engine::TreeEngine;
use crate::error::WatchError;
use crate::filter::PathFilter;

/// Walks the watched root, honoring a [`PathFilter`].
#[derive(Clone)]
pub struct TreeWalker {
    /// The watched root.
    root: Utf8PathBuf,
    filter: Arc<dyn PathFilter>,
    /// Whether to descend below the root's direct children.
    recursive: bool,
    /// Whether to follow symbolic links.
    follow_links: bool,
}

impl TreeWalker {
    /// Creates a recursive walker for `root` that does not follow links.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, filter: Arc<dyn PathFilter>) -> Self {
        Self {
            root: root.into(),
            filter,
            recursive: true,
            follow_links: false,
        }
    }

    /// Configures whether subdirectories are descended into.
    #[must_use]
    pub const fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Configures whether to follow symbolic links.
    ///
    /// By default, symbolic links are not followed.
    #[must_use]
    pub const fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Returns the root directory being walked.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns `true` if the entry at the absolute path `path` passes the
    /// filter. Paths outside the root never do.
    #[must_use]
    pub fn accepts(&self, path: &Utf8Path) -> bool {
        path.strip_prefix(&self.root)
            .is_ok_and(|relative| self.filter.should_process(relative))
    }

    /// Lists every entry below the root.
    ///
    /// Returns the accepted paths in build order together with the errors of
    /// entries that could not be read. Entries that vanish during the walk
    /// are left out silently.
    #[must_use]
    pub fn collect_paths(&self) -> (Vec<Utf8PathBuf>, Vec<WatchError>) {
        self.collect_below(&self.root)
    }

    /// Lists every entry below `start`, which must lie under the root.
    ///
    /// A non-recursive walker lists nothing below a subdirectory.
    #[must_use]
    pub fn collect_below(&self, start: &Utf8Path) -> (Vec<Utf8PathBuf>, Vec<WatchError>) {
        let mut paths = Vec::new();
        let mut errors = Vec::new();
        if !start.starts_with(&self.root) || (!self.recursive && start != self.root) {
            return (paths, errors);
        }

        for result in self.build_walker(start) {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) if err.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => {
                    tracing::debug!(error = %err, "entry vanished during walk");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read entry");
                    errors.push(WatchError::Walk(err));
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            match Utf8Path::from_path(entry.path()) {
                Some(path) => paths.push(path.to_owned()),
                None => errors.push(WatchError::non_utf8_path(entry.path())),
            }
        }

        tracing::trace!(start = %start, entries = paths.len(), "walk complete");
        (paths, errors)
    }

    fn build_walker(&self, start: &Utf8Path) -> ignore::Walk {
        let root = self.root.clone();
        let filter = Arc::clone(&self.filter);

        let mut builder = WalkBuilder::new(start);
        builder
            // The filter alone decides what is mirrored
            .standard_filters(false)
            .follow_links(self.follow_links)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                match entry.path().strip_prefix(&root).ok().and_then(Utf8Path::from_path) {
                    Some(relative) => filter.should_process(relative),
                    // Reported by the walk loop
                    None => true,
                }
            });
        if !self.recursive {
            builder.max_depth(Some(1));
        }
        builder.build()
    }
}

impl std::fmt::Debug for TreeWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWalker")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("follow_links", &self.follow_links)
            .finish_non_exhaustive()
    }
}

/// Adds every entry the walker finds to the engine's tree.
///
/// Entries that disappear between the walk and the metadata read are
/// skipped. Any other failure is returned, and the entry (with its subtree)
/// is left out.
pub fn populate<M: MetaCollector>(
    engine: &mut TreeEngine<M>,
    walker: &TreeWalker,
) -> Vec<WatchError> {
    let (paths, mut errors) = walker.collect_paths();
    for path in paths {
        match engine.create(&ShadowPath::from(path.as_path()), None) {
            Ok(_) => {}
            Err(TreeError::Io { ref source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path, "entry vanished before it was read");
            }
            // Children of an entry that failed to read
            Err(err) if err.is_not_found() => {
                tracing::debug!(path = %path, "skipping entry under unreadable parent");
            }
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "failed to mirror entry");
                errors.push(err.into());
            }
        }
    }
    tracing::debug!(
        root = %walker.root(),
        nodes = engine.tree().node_count(),
        "initial scan complete"
    );
    errors
}
