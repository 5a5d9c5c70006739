//! Metadata collection.
//!
//! The engine asks a [`MetaCollector`] for a node's metadata whenever an
//! event does not carry it. The real backend stats the file and hashes its
//! content; the virtual backend never touches disk and keeps whatever it
//! already knows.

use std::fs;
use std::io;

use camino::Utf8Path;
use fsh_core::{Checksum, MetaData};

/// Source of node metadata.
pub trait MetaCollector: Send + 'static {
    /// Returns the metadata of the entry at `path`.
    ///
    /// `current` is the metadata the tree holds for the entry, if it is
    /// already known.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of a failed stat or read.
    fn collect(&self, path: &Utf8Path, current: Option<&MetaData>) -> io::Result<MetaData>;
}

/// Collects metadata from the local filesystem.
///
/// Symbolic links are followed; a dangling link is described by the link
/// itself.
#[derive(Debug, Clone, Copy)]
pub struct FsCollector {
    checksums: bool,
}

impl FsCollector {
    /// Creates a collector, hashing file content if `checksums` is set.
    #[must_use]
    pub const fn new(checksums: bool) -> Self {
        Self { checksums }
    }
}

impl Default for FsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MetaCollector for FsCollector {
    fn collect(&self, path: &Utf8Path, _current: Option<&MetaData>) -> io::Result<MetaData> {
        let metadata = fs::metadata(path).or_else(|_| fs::symlink_metadata(path))?;
        let modified_at = metadata.modified().ok();

        if metadata.is_dir() {
            return Ok(MetaData {
                is_dir: true,
                sum: None,
                size: 0,
                modified_at,
            });
        }

        let sum = if self.checksums && metadata.is_file() {
            Some(Checksum::of_file(path)?)
        } else {
            None
        };
        Ok(MetaData {
            is_dir: false,
            sum,
            size: metadata.len(),
            modified_at,
        })
    }
}

/// Metadata source for the virtual backend.
///
/// Returns the metadata already in the tree, or the default for a new node.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualCollector;

impl MetaCollector for VirtualCollector {
    fn collect(&self, _path: &Utf8Path, current: Option<&MetaData>) -> io::Result<MetaData> {
        Ok(current.cloned().unwrap_or_default())
    }
}
