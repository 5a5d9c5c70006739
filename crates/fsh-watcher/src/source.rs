//! Notification sources.
//!
//! A [`NotificationSource`] is whatever feeds a watcher: the OS notifier for
//! the real backend, or a [`VirtualFeeder`] for the virtual one. Sources
//! deliver [`SourceItem`]s in the order the changes happened; the watcher
//! consumes them one at a time.
//!
//! # Real backend
//!
//! ```text
//! ┌──────────────────────────── notify thread ───────────────────────────┐
//! │  RecommendedWatcher ──► callback ──blocking_send──┐                  │
//! └───────────────────────────────────────────────────│──────────────────┘
//!                                                     ▼
//! ┌──────────────────────────── watcher task ────────────────────────────┐
//! │  raw mpsc ──► classify ──► RenamePairer ──► PathFilter ──► ready     │
//! │                  │                                           │       │
//! │                  └── new directory ──► TreeWalker ───────────┘       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Raw notifications are translated into [`Event`]s: rename halves are
//! paired, filtered-out entries are dropped, and a directory that appears
//! is enumerated so its contents are mirrored too.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use fsh_core::{Event, EventTransaction, MetaData, WatchConfig};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::pairing::{Pairing, RenamePairer};
use crate::scan::TreeWalker;

/// A path-addressed event, optionally carrying the node's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The change.
    pub event: Event,
    /// Metadata to use instead of collecting it.
    pub extra: Option<MetaData>,
}

impl Notification {
    /// Creates a notification without metadata.
    #[must_use]
    pub const fn new(event: Event) -> Self {
        Self { event, extra: None }
    }
}

/// One item delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceItem {
    /// A raw event, to be reconciled against the tree.
    Event(Notification),
    /// A transaction from another tree, to be replayed.
    Transaction(EventTransaction),
}

/// Something that feeds a watcher.
pub trait NotificationSource: Send + 'static {
    /// Waits for the next item.
    ///
    /// Returns `None` once the source is exhausted. An `Err` item reports a
    /// problem without ending the source.
    fn next(&mut self) -> impl Future<Output = Option<Result<SourceItem, WatchError>>> + Send;
}

// ============================================================================
// Virtual source
// ============================================================================

/// Creates a connected virtual source and feeder.
///
/// The source is exhausted once every feeder clone has been dropped.
#[must_use]
pub fn virtual_source(capacity: usize) -> (VirtualSource, VirtualFeeder) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (VirtualSource { rx }, VirtualFeeder { tx })
}

/// The receiving half of a virtual backend.
#[derive(Debug)]
pub struct VirtualSource {
    rx: mpsc::Receiver<SourceItem>,
}

impl NotificationSource for VirtualSource {
    async fn next(&mut self) -> Option<Result<SourceItem, WatchError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Pushes events and transactions into a virtual backend.
///
/// Items are processed in the order they are sent. Sending waits while the
/// watcher's input queue is full.
#[derive(Debug, Clone)]
pub struct VirtualFeeder {
    tx: mpsc::Sender<SourceItem>,
}

impl VirtualFeeder {
    /// Sends an event; the watcher collects no metadata for it.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn send(&self, event: Event) -> Result<(), WatchError> {
        self.push(SourceItem::Event(Notification::new(event))).await
    }

    /// Sends an event together with the node's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn send_with_meta(&self, event: Event, meta: MetaData) -> Result<(), WatchError> {
        self.push(SourceItem::Event(Notification {
            event,
            extra: Some(meta),
        }))
        .await
    }

    /// Sends a transaction to replay.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn send_transaction(&self, tx: EventTransaction) -> Result<(), WatchError> {
        self.push(SourceItem::Transaction(tx)).await
    }

    /// Decodes a wire record and sends it as a transaction to replay.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Decode`] if the record is malformed (nothing is
    /// sent), or [`WatchError::Closed`] if the watcher has stopped.
    pub async fn send_encoded(&self, record: &[u8]) -> Result<(), WatchError> {
        let tx = EventTransaction::decode(record)?;
        self.send_transaction(tx).await
    }

    /// Returns `true` if the watcher has stopped reading.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn push(&self, item: SourceItem) -> Result<(), WatchError> {
        self.tx.send(item).await.map_err(|_| WatchError::Closed)
    }
}

// ============================================================================
// Real source
// ============================================================================

type RawEvent = notify::Result<notify::Event>;

/// Translates OS notifications for a directory into [`Event`]s.
///
/// The OS notifier stops when the source is dropped.
pub struct FsSource {
    /// Kept alive for its callback; never read.
    _watcher: RecommendedWatcher,
    raw: mpsc::Receiver<RawEvent>,
    walker: TreeWalker,
    pairer: RenamePairer,
    ready: VecDeque<Result<SourceItem, WatchError>>,
}

impl std::fmt::Debug for FsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsSource")
            .field("root", &self.walker.root())
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl FsSource {
    /// Starts watching the walker's root.
    ///
    /// Changes are queued from this point on, so a scan started afterwards
    /// misses nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Notify`] if the OS notifier cannot be set up.
    pub fn start(walker: TreeWalker, config: &WatchConfig) -> Result<Self, WatchError> {
        let (raw_tx, raw) = mpsc::channel(config.raw_capacity.max(1));

        let mut watcher = notify::recommended_watcher(move |result: RawEvent| {
            // The receiver is gone once the source has been dropped
            let _ = raw_tx.blocking_send(result);
        })?;

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(walker.root().as_std_path(), mode)?;
        tracing::info!(path = %walker.root(), recursive = config.recursive, "watching directory");

        Ok(Self {
            _watcher: watcher,
            raw,
            walker,
            pairer: RenamePairer::new(std::time::Duration::from_millis(config.rename_window_ms)),
            ready: VecDeque::new(),
        })
    }

    /// Returns the watched root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        self.walker.root()
    }

    fn classify(&mut self, event: notify::Event) {
        if event.need_rescan() {
            self.ready.push_back(Err(WatchError::Source(
                "notifications were lost; the tree may be stale".to_owned(),
            )));
        }
        let tracker = event.attrs.tracker();

        let mut paths = Vec::with_capacity(event.paths.len());
        for path in event.paths {
            match Utf8PathBuf::from_path_buf(path) {
                Ok(path) => paths.push(path),
                Err(path) => {
                    tracing::warn!(path = %path.display(), "skipping non-UTF-8 path");
                    self.ready.push_back(Err(WatchError::non_utf8_path(path)));
                    return;
                }
            }
        }
        tracing::trace!(kind = ?event.kind, ?paths, ?tracker, "raw notification");

        match event.kind {
            EventKind::Create(kind) => {
                self.flush();
                for path in paths {
                    let is_dir = match kind {
                        CreateKind::Folder => true,
                        CreateKind::File => false,
                        _ => path.is_dir(),
                    };
                    self.created(path, is_dir);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.renamed(mode, paths, tracker),
            EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => {}
            EventKind::Modify(_) => {
                self.flush();
                for path in paths {
                    self.emit_if_accepted(&path, Event::write(path.as_path()));
                }
            }
            EventKind::Remove(_) => {
                self.flush();
                for path in paths {
                    self.emit_if_accepted(&path, Event::remove(path.as_path()));
                }
            }
            EventKind::Any | EventKind::Other => {}
        }
    }

    fn renamed(&mut self, mode: RenameMode, paths: Vec<Utf8PathBuf>, tracker: Option<usize>) {
        match mode {
            RenameMode::From => {
                for path in paths {
                    self.pairer.from_half(path, tracker, Instant::now());
                }
            }
            RenameMode::To => {
                for path in paths {
                    let pairing = self.pairer.to_half(path, tracker);
                    self.resolve(pairing);
                }
            }
            RenameMode::Both => {
                let mut paths = paths.into_iter();
                if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                    if self.pairer.both(from.clone(), to.clone(), tracker) {
                        self.resolve(Pairing::Relocated { from, to });
                    }
                }
            }
            // Which half this is can only be told from the disk
            RenameMode::Any | RenameMode::Other => {
                for path in paths {
                    if path.exists() {
                        let pairing = self.pairer.to_half(path, tracker);
                        self.resolve(pairing);
                    } else {
                        self.pairer.from_half(path, tracker, Instant::now());
                    }
                }
            }
        }
    }

    fn resolve(&mut self, pairing: Pairing) {
        match pairing {
            Pairing::Relocated { from, to } => {
                match (self.walker.accepts(&from), self.walker.accepts(&to)) {
                    (true, true) => self.emit(Event::relocate(from.as_path(), to.as_path())),
                    (true, false) => self.emit(Event::remove(from.as_path())),
                    (false, true) => {
                        let is_dir = to.is_dir();
                        self.created(to, is_dir);
                    }
                    (false, false) => {}
                }
            }
            Pairing::MovedOut(path) => self.emit_if_accepted(&path, Event::remove(path.as_path())),
            Pairing::MovedIn(path) => {
                let is_dir = path.is_dir();
                self.created(path, is_dir);
            }
        }
    }

    fn created(&mut self, path: Utf8PathBuf, is_dir: bool) {
        if !self.walker.accepts(&path) {
            return;
        }
        self.emit(Event::create(path.as_path()));
        if is_dir {
            let (entries, errors) = self.walker.collect_below(&path);
            tracing::debug!(path = %path, entries = entries.len(), "enumerated new directory");
            for entry in entries {
                self.emit(Event::create(entry.as_path()));
            }
            self.ready.extend(errors.into_iter().map(Err));
        }
    }

    /// Resolves every pending rename source as a move out of the tree.
    fn flush(&mut self) {
        for pairing in self.pairer.drain() {
            self.resolve(pairing);
        }
    }

    fn expire(&mut self) {
        for pairing in self.pairer.expire(Instant::now()) {
            self.resolve(pairing);
        }
    }

    fn emit_if_accepted(&mut self, path: &Utf8Path, event: Event) {
        if self.walker.accepts(path) {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: Event) {
        self.ready.push_back(Ok(SourceItem::Event(Notification::new(event))));
    }
}

impl NotificationSource for FsSource {
    async fn next(&mut self) -> Option<Result<SourceItem, WatchError>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }

            let deadline = self.pairer.next_deadline();
            tokio::select! {
                raw = self.raw.recv() => match raw {
                    Some(Ok(event)) => self.classify(event),
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "notifier error");
                        self.ready.push_back(Err(WatchError::Source(err.to_string())));
                    }
                    None if self.pairer.is_empty() => return None,
                    None => self.flush(),
                },
                () = sleep_until(deadline) => self.expire(),
            }
        }
    }
}

/// Sleeps until `deadline`, or forever without one.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
