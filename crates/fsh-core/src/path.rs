//! Normalised path handling for the shadow tree.
//!
//! [`ShadowPath`] is the single path type used by the event model, the tree,
//! and the watchers. Paths are normalised lexically on construction so two
//! spellings of the same location compare equal without touching the disk:
//!
//! - `.` segments are dropped
//! - `..` segments fold into their predecessor where one exists
//! - repeated and trailing separators collapse
//!
//! # Examples
//!
//! ```
//! use fsh_core::ShadowPath;
//!
//! let path = ShadowPath::new("/tmp/fs-shadow/./docs//readme.md");
//! assert_eq!(path.as_str(), "/tmp/fs-shadow/docs/readme.md");
//! assert_eq!(path.name(), "readme.md");
//! assert_eq!(path.parent_path().as_str(), "/tmp/fs-shadow/docs");
//!
//! let relative = path.exclude_path(&ShadowPath::new("/tmp")).unwrap();
//! assert_eq!(relative.as_str(), "fs-shadow/docs/readme.md");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A lexically normalised, UTF-8 filesystem path.
///
/// Keeps the caller's original spelling alongside the normalised form.
/// Equality, ordering, and hashing use the normalised form only.
///
/// # Invariant
///
/// `path.parent_path().join(path.name()) == path` for every path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ShadowPath {
    /// The input as given by the caller.
    original: String,
    /// The normalised path.
    inner: Utf8PathBuf,
}

impl ShadowPath {
    /// Creates a path from any string-like input, normalising it lexically.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        let original = path.as_ref().to_owned();
        let inner = normalize(Utf8Path::new(&original));
        Self { original, inner }
    }

    /// Creates a path for a location that must exist on disk.
    ///
    /// The path is canonicalised, resolving symbolic links.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the path does not exist or cannot be resolved
    /// to a UTF-8 path.
    pub fn from_fs(path: &Utf8Path) -> std::io::Result<Self> {
        let canonical = path.canonicalize_utf8()?;
        Ok(Self {
            original: path.as_str().to_owned(),
            inner: normalize(&canonical),
        })
    }

    /// Returns the normalised path as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    /// Returns the normalised path.
    #[inline]
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.inner
    }

    /// Returns the input this path was created from, before normalisation.
    #[inline]
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Returns the last segment, or `""` for the filesystem root and the
    /// empty path.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.file_name().unwrap_or("")
    }

    /// Returns every segment except the last.
    ///
    /// The parent of a root or empty path is the path itself.
    #[must_use]
    pub fn parent_path(&self) -> Self {
        match self.inner.parent() {
            Some(parent) if !self.name().is_empty() => Self::from_normalized(parent.to_owned()),
            _ => self.clone(),
        }
    }

    /// Appends a single segment.
    ///
    /// An empty segment leaves the path unchanged.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        if segment.is_empty() {
            return self.clone();
        }
        Self::from_normalized(normalize(&self.inner.join(segment)))
    }

    /// Appends every segment of a relative path.
    #[must_use]
    pub fn join_path(&self, other: &Self) -> Self {
        other.segments().fold(self.clone(), |acc, segment| acc.join(segment))
    }

    /// Returns an iterator over the named segments of the path.
    ///
    /// Root and prefix components are skipped.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.components().filter_map(|component| match component {
            Utf8Component::Normal(segment) => Some(segment),
            Utf8Component::ParentDir => Some(".."),
            _ => None,
        })
    }

    /// Returns the number of named segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Returns `true` if the path starts at a filesystem root.
    #[inline]
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.inner.has_root()
    }

    /// Returns `true` if the path has no components at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.as_str().is_empty()
    }

    /// Returns `true` if `prefix` is a whole-segment prefix of this path.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.inner.starts_with(&prefix.inner)
    }

    /// Computes this path relative to an ancestor.
    ///
    /// Returns `None` if `prefix` is not an ancestor of (or equal to) this
    /// path. Excluding the path itself yields the empty path.
    ///
    /// # Examples
    ///
    /// ```
    /// use fsh_core::ShadowPath;
    ///
    /// let path = ShadowPath::new("/tmp/fs-shadow/file.txt");
    /// let key = path.exclude_path(&ShadowPath::new("/tmp")).unwrap();
    /// assert_eq!(key.as_str(), "fs-shadow/file.txt");
    ///
    /// assert!(path.exclude_path(&ShadowPath::new("/var")).is_none());
    /// ```
    #[must_use]
    pub fn exclude_path(&self, prefix: &Self) -> Option<Self> {
        self.inner
            .strip_prefix(&prefix.inner)
            .ok()
            .map(|rest| Self::from_normalized(rest.to_owned()))
    }

    fn from_normalized(inner: Utf8PathBuf) -> Self {
        Self {
            original: inner.as_str().to_owned(),
            inner,
        }
    }
}

/// Normalises a path without consulting the filesystem.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut prefix: Option<&str> = None;
    let mut absolute = false;
    let mut segments: SmallVec<[&str; 16]> = SmallVec::new();

    for component in path.components() {
        match component {
            Utf8Component::Prefix(p) => prefix = Some(p.as_str()),
            Utf8Component::RootDir => absolute = true,
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                // `..` above the root is the root itself
                _ if absolute => {}
                _ => segments.push(".."),
            },
            Utf8Component::Normal(segment) => segments.push(segment),
        }
    }

    let mut out = Utf8PathBuf::new();
    if let Some(prefix) = prefix {
        out.push(prefix);
    }
    if absolute {
        out.push(std::path::MAIN_SEPARATOR_STR);
    }
    for segment in segments {
        out.push(segment);
    }
    out
}

impl PartialEq for ShadowPath {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for ShadowPath {}

impl Hash for ShadowPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl PartialOrd for ShadowPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShadowPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}

impl fmt::Display for ShadowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<Utf8Path> for ShadowPath {
    fn as_ref(&self) -> &Utf8Path {
        &self.inner
    }
}

impl From<&str> for ShadowPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ShadowPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&String> for ShadowPath {
    fn from(path: &String) -> Self {
        Self::new(path)
    }
}

impl From<&Utf8Path> for ShadowPath {
    fn from(path: &Utf8Path) -> Self {
        Self::new(path.as_str())
    }
}

impl From<Utf8PathBuf> for ShadowPath {
    fn from(path: Utf8PathBuf) -> Self {
        Self::new(path.as_str())
    }
}

impl From<&ShadowPath> for ShadowPath {
    fn from(path: &ShadowPath) -> Self {
        path.clone()
    }
}

impl From<ShadowPath> for String {
    fn from(path: ShadowPath) -> Self {
        path.inner.into_string()
    }
}
