//! Core types for fs-shadow: a mirror of a directory tree kept in memory.
//!
//! This crate provides the pieces every watcher backend shares:
//!
//! - [`ShadowPath`] - lexically normalised UTF-8 paths
//! - [`Event`] and [`EventType`] - raw, path-addressed change notifications
//! - [`FileTree`] and [`FileNode`] - the UUID-addressed shadow tree
//! - [`EventTransaction`] - applied changes and their binary wire format
//! - [`TreeSnapshot`] - nested, serializable views of a tree
//! - Configuration ([`Config`], [`WatchConfig`]) and error types
//!
//! # Example
//!
//! ```
//! use fsh_core::{EventTransaction, EventType, FileNode, FileTree, MetaData};
//!
//! let mut origin = FileTree::new("fs-shadow");
//! let mut replica = FileTree::with_root(origin.root().clone());
//!
//! let created = origin
//!     .insert_child(origin.root_uuid(), FileNode::new("a.txt", MetaData::for_content(b"a")))?
//!     .clone();
//! let wire = EventTransaction::from_node(&created, EventType::Create).encode()?;
//!
//! replica.apply(&EventTransaction::decode(&wire)?)?;
//! assert_eq!(replica, origin);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod meta;
pub mod node;
pub mod path;
pub mod snapshot;
pub mod transaction;
pub mod tree;

pub use config::{Config, OverflowPolicy, WatchConfig};
pub use error::{ConfigError, DecodeError, TreeError};
pub use event::{Event, EventType};
pub use meta::{Checksum, MetaData, checksum};
pub use node::{FileNode, NodeUuid};
pub use path::ShadowPath;
pub use snapshot::TreeSnapshot;
pub use transaction::{EncodeError, EventTransaction, FrameReader, WIRE_VERSION, write_frame};
pub use tree::{FileTree, TreeDump};
