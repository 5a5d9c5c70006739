//! Tree watchers for fs-shadow.
//!
//! A [`TreeWatcher`] keeps a [`FileTree`](fsh_core::FileTree) in step with
//! a stream of changes and describes every change it applies as an
//! [`EventTransaction`](fsh_core::EventTransaction). Two backends share the
//! same contract:
//!
//! - **Real** ([`TreeWatcher::new_real`]): scans a directory on disk, then
//!   follows OS notifications for it via `notify`
//! - **Virtual** ([`TreeWatcher::new_virtual`]): never touches disk; events
//!   and transactions are pushed in through a [`VirtualFeeder`], for example
//!   as they arrive from a remote peer
//!
//! Fed the same changes, both backends build structurally equal trees, and a
//! virtual watcher replaying a real watcher's transactions ends up with the
//! same UUIDs as well.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────┐  commands   ┌──────────────────────────────┐
//!  caller ──────►│ TreeWatcher  │────────────►│ watcher task                 │
//!                │ (handle)     │◄────────────│  ┌────────────┐              │
//!                └──────┬───────┘   replies   │  │ TreeEngine │ (one writer) │
//!                       ▲                     │  └─────▲──────┘              │
//!         events/errors │                     │        │                     │
//!                       └─────────────────────│────────┤                     │
//!                                             │  NotificationSource          │
//!                                             │  (FsSource | VirtualSource)  │
//!                                             └──────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! fsh-cli ──► fsh-watcher ──► fsh-core
//! ```
//!
//! # Usage
//!
//! ## Mirroring a directory
//!
//! ```no_run
//! use fsh_core::WatchConfig;
//! use fsh_watcher::TreeWatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (mut watcher, root) = TreeWatcher::new_real("./project", &WatchConfig::default()).await?;
//!     println!("root: {root}");
//!
//!     watcher
//!         .watch(|output| match output {
//!             Ok(tx) => println!("{tx}"),
//!             Err(err) => eprintln!("warning: {err}"),
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Replaying into a replica
//!
//! ```no_run
//! use fsh_core::{FileTree, WatchConfig};
//! use fsh_watcher::TreeWatcher;
//!
//! # async fn example(records: Vec<Vec<u8>>) -> Result<(), fsh_watcher::WatchError> {
//! let config = WatchConfig::default();
//! let (origin, _root) = TreeWatcher::new_real("./project", &config).await?;
//! let seed = FileTree::with_root(origin.tree().await?.root().clone());
//!
//! let (mut replica, feeder, _) = TreeWatcher::new_virtual("/replica/project", Some(seed), &config).await?;
//! replica.start().await?;
//! for record in &records {
//!     feeder.send_encoded(record).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod backend;
pub mod collector;
pub mod engine;
pub mod error;
pub mod filter;
pub mod pairing;
pub mod scan;
pub mod source;
pub mod watcher;

pub use collector::{FsCollector, MetaCollector, VirtualCollector};
pub use engine::TreeEngine;
pub use error::WatchError;
pub use filter::{AcceptAllFilter, CompositeFilter, HiddenFilter, NameFilter, PathFilter};
pub use pairing::{Pairing, RenamePairer};
pub use scan::{TreeWalker, populate};
pub use source::{
    FsSource, Notification, NotificationSource, SourceItem, VirtualFeeder, VirtualSource,
    virtual_source,
};
pub use watcher::{Backend, TreeWatcher, WatcherState};
