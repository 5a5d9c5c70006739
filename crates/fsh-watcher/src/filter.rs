//! Path filtering for the real backend.
//!
//! Filters decide which entries under the watched root are mirrored at all.
//! The same filter is consulted by the initial scan and by the notification
//! source, so an entry that was never scanned is never reported either.
//!
//! Filters see paths *relative to the watched root* (`docs/readme.md`, not
//! `/home/me/project/docs/readme.md`), so a filter never matches on the
//! location of the root itself.
//!
//! # Examples
//!
//! ```
//! use fsh_watcher::{CompositeFilter, HiddenFilter, NameFilter, PathFilter};
//! use camino::Utf8Path;
//!
//! let filter = CompositeFilter::new()
//!     .and(HiddenFilter)
//!     .and(NameFilter::new(["target"]));
//!
//! assert!(filter.should_process(Utf8Path::new("src/main.rs")));
//! assert!(!filter.should_process(Utf8Path::new(".cache/blob")));
//! assert!(!filter.should_process(Utf8Path::new("target/debug/app")));
//! ```

use camino::Utf8Path;
use fsh_core::WatchConfig;
use smallvec::SmallVec;

/// A predicate deciding whether an entry is mirrored.
///
/// Filters must be [`Send`] and [`Sync`]: the initial scan consults them
/// from a blocking thread while the notification source holds a shared
/// reference.
pub trait PathFilter: Send + Sync + 'static {
    /// Returns `true` if the entry at `path` (relative to the watched root)
    /// should be mirrored.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl PathFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Rejects entries with a dot-prefixed component anywhere in their path.
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenFilter;

impl PathFilter for HiddenFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        !path
            .components()
            .any(|component| component.as_str().starts_with('.') && component.as_str().len() > 1)
    }
}

/// Rejects entries with a component equal to one of the given names.
///
/// A rejected directory hides its whole subtree.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    names: SmallVec<[String; 4]>,
}

impl NameFilter {
    /// Creates a filter rejecting the given entry names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl PathFilter for NameFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        !path
            .components()
            .any(|component| self.names.iter().any(|name| name == component.as_str()))
    }
}

/// A composite filter that combines multiple filters with AND logic.
///
/// An empty composite accepts everything.
#[derive(Default)]
pub struct CompositeFilter {
    filters: Vec<Box<dyn PathFilter>>,
}

impl CompositeFilter {
    /// Creates a new empty composite filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the filter described by a watcher configuration.
    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        let mut filter = Self::new();
        if config.skip_hidden {
            filter = filter.and(HiddenFilter);
        }
        if !config.ignore_names.is_empty() {
            filter = filter.and(NameFilter::new(config.ignore_names.iter().cloned()));
        }
        filter
    }

    /// Adds a filter to the composite.
    #[must_use]
    pub fn and<F: PathFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Returns the number of filters in the composite.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if the composite holds no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl PathFilter for CompositeFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }
}

impl<F: PathFilter + ?Sized> PathFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

impl<F: PathFilter + ?Sized> PathFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_filter() {
        let filter = AcceptAllFilter;
        assert!(filter.should_process(Utf8Path::new("anything.txt")));
        assert!(filter.should_process(Utf8Path::new(".hidden")));
        assert!(filter.should_process(Utf8Path::new("")));
    }

    #[test]
    fn test_hidden_filter() {
        let filter = HiddenFilter;
        assert!(filter.should_process(Utf8Path::new("src/app.rs")));
        assert!(!filter.should_process(Utf8Path::new(".env")));
        assert!(!filter.should_process(Utf8Path::new("src/.cache/x")));
        assert!(filter.should_process(Utf8Path::new("src/file.with.dots")));
    }

    #[test]
    fn test_name_filter_matches_whole_components() {
        let filter = NameFilter::new([".git", "node_modules"]);
        assert!(!filter.should_process(Utf8Path::new(".git")));
        assert!(!filter.should_process(Utf8Path::new(".git/HEAD")));
        assert!(!filter.should_process(Utf8Path::new("web/node_modules/pkg/index.js")));
        assert!(filter.should_process(Utf8Path::new(".gitignore")));
        assert!(filter.should_process(Utf8Path::new("my_node_modules/x")));
    }

    #[test]
    fn test_composite_filter_empty() {
        let filter = CompositeFilter::new();
        assert!(filter.is_empty());
        assert!(filter.should_process(Utf8Path::new("anything")));
    }

    #[test]
    fn test_composite_filter_from_config() {
        let config = WatchConfig {
            skip_hidden: true,
            ignore_names: vec!["target".to_owned()],
            ..WatchConfig::default()
        };
        let filter = CompositeFilter::from_config(&config);
        assert_eq!(filter.len(), 2);
        assert!(filter.should_process(Utf8Path::new("src/lib.rs")));
        assert!(!filter.should_process(Utf8Path::new(".hidden")));
        assert!(!filter.should_process(Utf8Path::new("target/x")));
    }

    #[test]
    fn test_default_config_ignores_git() {
        let filter = CompositeFilter::from_config(&WatchConfig::default());
        assert!(!filter.should_process(Utf8Path::new(".git/index")));
        assert!(filter.should_process(Utf8Path::new(".env")));
    }

    #[test]
    fn test_arc_filter() {
        let filter: std::sync::Arc<dyn PathFilter> = std::sync::Arc::new(HiddenFilter);
        assert!(filter.should_process(Utf8Path::new("a")));
        assert!(!filter.should_process(Utf8Path::new(".a")));
    }
}
