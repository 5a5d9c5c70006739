//! Error types for the fsh-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while building, running, or talking to a tree watcher.

use camino::Utf8PathBuf;
use fsh_core::{ConfigError, DecodeError, EventType, NodeUuid, TreeError};

/// Errors that can occur during tree watching.
///
/// # Error Recovery Strategy
///
/// - **Tree errors** ([`WatchError::Tree`]): Recoverable - the event is
///   skipped, the tree is unchanged, and the watcher keeps running
/// - **Decode errors** ([`WatchError::Decode`]): Recoverable - the record is
///   rejected
/// - **Source errors** ([`WatchError::Source`]): Recoverable - the source
///   reported a problem (for example a notification queue overflow) but
///   keeps delivering
/// - **Dropped output** ([`WatchError::OutputDropped`]): Recoverable - a
///   replica reading the event queue has missed a transaction and should
///   resynchronise from a snapshot
/// - **Walk errors** ([`WatchError::Walk`]): Recoverable - the unreadable
///   entry is left out of the tree
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - skip
///   and continue
/// - **Closed** ([`WatchError::Closed`]): Fatal - the watcher has stopped
/// - **Setup errors** ([`WatchError::Notify`], [`WatchError::PathNotFound`],
///   [`WatchError::NotADirectory`], [`WatchError::InvalidRoot`],
///   [`WatchError::Config`], [`WatchError::Io`]): Fatal - the watcher could
///   not be built
///
/// # Examples
///
/// ```
/// use fsh_watcher::WatchError;
///
/// fn handle_error(err: &WatchError) {
///     if err.is_fatal() {
///         eprintln!("watcher stopped: {err}");
///     } else {
///         eprintln!("warning: {err}");
///     }
/// }
/// # handle_error(&WatchError::Closed);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// A change could not be applied to the shadow tree.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A transaction record could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The watcher has been stopped.
    #[error("watcher is closed")]
    Closed,

    /// The notification source reported a failure while running.
    #[error("notification source error: {0}")]
    Source(String),

    /// Failed to initialize the OS notifier.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The specified path does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// The specified path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// The root has no name to key the tree with (for example `/`).
    #[error("cannot mirror a root without a name: {0}")]
    InvalidRoot(Utf8PathBuf),

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An entry could not be read during directory enumeration.
    #[error("directory walk error: {0}")]
    Walk(#[from] ignore::Error),

    /// A transaction was dropped because the event queue was full.
    #[error("event queue full, dropped {kind} transaction for {uuid}")]
    OutputDropped {
        /// Kind of the dropped transaction.
        kind: EventType,
        /// Node the dropped transaction referred to.
        uuid: NodeUuid,
    },

    /// The watcher configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if the watcher can keep running after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Tree(_)
                | Self::Decode(_)
                | Self::Source(_)
                | Self::NonUtf8Path(_)
                | Self::Walk(_)
                | Self::OutputDropped { .. }
        )
    }

    /// Returns `true` if this error is fatal (watching should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the file path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Tree(err) => err.path(),
            Self::PathNotFound(path) | Self::NotADirectory(path) | Self::InvalidRoot(path) => {
                Some(path)
            }
            Self::Decode(_)
            | Self::Closed
            | Self::Source(_)
            | Self::Notify(_)
            | Self::NonUtf8Path(_)
            | Self::Walk(_)
            | Self::OutputDropped { .. }
            | Self::Config(_)
            | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_watch_error_path_not_found() {
        let err = WatchError::path_not_found("src/missing");
        assert!(!err.is_recoverable());
        assert!(err.is_fatal());
        assert_eq!(err.path().map(|p| p.as_str()), Some("src/missing"));
        assert!(err.to_string().contains("src/missing"));
    }

    #[test]
    fn test_watch_error_closed() {
        let err = WatchError::Closed;
        assert!(err.is_fatal());
        assert!(err.path().is_none());
        assert_eq!(err.to_string(), "watcher is closed");
    }

    #[test]
    fn test_tree_errors_are_recoverable() {
        let err = WatchError::from(TreeError::not_found("fs-shadow/a.txt"));
        assert!(err.is_recoverable());
        assert_eq!(err.path().map(|p| p.as_str()), Some("fs-shadow/a.txt"));
        assert_eq!(err.to_string(), "no node at path: fs-shadow/a.txt");
    }

    #[test]
    fn test_watch_error_non_utf8() {
        let err = WatchError::non_utf8_path(PathBuf::from("test"));
        assert!(err.is_recoverable());
        assert!(err.path().is_none());
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_output_dropped_display() {
        let uuid = NodeUuid::new();
        let err = WatchError::OutputDropped {
            kind: EventType::Write,
            uuid,
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains(&uuid.to_string()));
        assert!(err.to_string().contains("write"));
    }

    #[test]
    fn test_watch_error_io() {
        let err = WatchError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "access denied",
        ));
        assert!(err.is_fatal());
        assert!(err.path().is_none());
        assert!(err.to_string().contains("I/O error"));
    }
}
