//! Error types for the fsh-core crate.
//!
//! - [`TreeError`] for failed lookups and mutations of a shadow tree
//! - [`DecodeError`] for malformed transaction bytes
//! - [`ConfigError`] for configuration loading

use camino::Utf8PathBuf;

use crate::node::NodeUuid;

/// Errors raised by shadow tree lookups and mutations.
///
/// A mutation that returns an error has left the tree unchanged.
///
/// # Error Recovery Strategy
///
/// Every variant is recoverable from the tree's point of view: the tree is
/// still consistent and later mutations can proceed. Watchers report these
/// errors and keep running.
///
/// # Examples
///
/// ```
/// use fsh_core::TreeError;
///
/// let err = TreeError::not_found("fs-shadow/missing.txt");
/// assert!(err.is_not_found());
/// assert!(err.to_string().contains("missing.txt"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// No node exists at the given path.
    #[error("no node at path: {path}")]
    NotFound {
        /// The path that could not be resolved.
        path: Utf8PathBuf,
    },

    /// No node has the given UUID.
    #[error("no node with uuid: {0}")]
    UuidNotFound(NodeUuid),

    /// A sibling with the same name already exists.
    #[error("node already exists at path: {path}")]
    AlreadyExists {
        /// The path of the existing node.
        path: Utf8PathBuf,
    },

    /// A node with the same UUID is already part of the tree.
    #[error("duplicate node uuid: {0}")]
    DuplicateUuid(NodeUuid),

    /// The destination of a move lies inside the subtree being moved.
    #[error("cannot move {node} into its own subtree ({target})")]
    InvalidMove {
        /// The node being moved.
        node: NodeUuid,
        /// The requested new parent.
        target: NodeUuid,
    },

    /// The root node cannot be removed, moved, or renamed.
    #[error("the root node cannot be removed, moved, or renamed")]
    RootImmutable,

    /// A path does not lie under the tree's root.
    #[error("path is outside the watched root: {path}")]
    OutsideRoot {
        /// The offending path.
        path: Utf8PathBuf,
    },

    /// A name is empty, `.`, `..`, or contains a separator.
    #[error("invalid node name: {0:?}")]
    InvalidName(String),

    /// A relocation event is missing its destination path.
    #[error("{kind} event for {path} has no destination path")]
    MissingDestination {
        /// The event kind.
        kind: crate::EventType,
        /// The source path of the event.
        path: Utf8PathBuf,
    },

    /// Metadata could not be collected from the filesystem.
    #[error("failed to collect metadata for {path}: {source}")]
    Io {
        /// The path whose metadata was requested.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot or restored tree violates a tree invariant.
    #[error("invalid tree: {0}")]
    Inconsistent(String),
}

impl TreeError {
    /// Creates a new [`TreeError::NotFound`] error.
    #[inline]
    pub fn not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates a new [`TreeError::Io`] error.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if a path or UUID could not be resolved.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UuidNotFound(_))
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::NotFound { path }
            | Self::AlreadyExists { path }
            | Self::OutsideRoot { path }
            | Self::MissingDestination { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::UuidNotFound(_)
            | Self::DuplicateUuid(_)
            | Self::InvalidMove { .. }
            | Self::RootImmutable
            | Self::InvalidName(_)
            | Self::Inconsistent(_) => None,
        }
    }
}

/// Errors raised while decoding an [`EventTransaction`](crate::EventTransaction).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input was empty.
    #[error("empty transaction record")]
    Empty,

    /// The version byte is not one this build understands.
    #[error("unsupported transaction wire version: {0}")]
    UnsupportedVersion(u8),

    /// The record body could not be decoded.
    #[error("malformed transaction record: {0}")]
    Malformed(#[from] bincode::error::DecodeError),

    /// The record decoded but bytes were left over.
    #[error("{0} trailing bytes after transaction record")]
    TrailingBytes(usize),

    /// A length-prefixed frame was cut short.
    #[error("truncated frame: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes announced by the frame header.
        expected: usize,
        /// Bytes actually available.
        found: usize,
    },

    /// Reading a frame from its source failed.
    #[error("failed to read transaction frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use fsh_core::ConfigError;
///
/// let error = ConfigError::InvalidOption {
///     option: "event_capacity".to_owned(),
///     reason: "must be positive".to_owned(),
/// };
/// assert!(error.to_string().contains("event_capacity"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = TreeError::not_found("root/missing");
        assert!(err.is_not_found());
        assert_eq!(err.path().map(|p| p.as_str()), Some("root/missing"));
        assert_eq!(err.to_string(), "no node at path: root/missing");
    }

    #[test]
    fn test_uuid_not_found_has_no_path() {
        let err = TreeError::UuidNotFound(NodeUuid::new());
        assert!(err.is_not_found());
        assert!(err.path().is_none());
    }

    #[test]
    fn test_io_error_carries_source() {
        let err = TreeError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("/tmp/x"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::UnsupportedVersion(9).to_string(),
            "unsupported transaction wire version: 9"
        );
        assert!(DecodeError::TrailingBytes(3).to_string().contains('3'));
    }

    #[test]
    fn test_invalid_option_display() {
        let error = ConfigError::InvalidOption {
            option: "raw_capacity".to_owned(),
            reason: "must be positive".to_owned(),
        };
        let msg = error.to_string();
        assert!(msg.contains("raw_capacity"));
        assert!(msg.contains("must be positive"));
    }
}
