//! The tree watcher.
//!
//! [`TreeWatcher`] is a handle to a task that owns a [`TreeEngine`] and a
//! [`NotificationSource`]. Every read and write of the tree goes through that
//! task, either as an item from the source or as a command from the handle,
//! so the tree has exactly one writer and needs no locking.
//!
//! # Lifecycle
//!
//! ```text
//!   new_real / new_virtual          start()            stop() / close()
//! ───────────────────────► Created ────────► Running ─────────────────► Stopped
//!                             │                                           ▲
//!                             └───────────────── stop() ──────────────────┘
//! ```
//!
//! While `Created` the task answers commands but does not consume its
//! source; notifications queue up upstream. Once `Stopped`, every call fails
//! with [`WatchError::Closed`] and nothing more is sent on either queue.
//!
//! # Output queues
//!
//! Transactions and errors are delivered on two bounded queues. What the
//! task does when a queue is full is set by [`OverflowPolicy`]:
//!
//! - [`OverflowPolicy::Block`]: the task waits for room. Keep draining the
//!   queues while awaiting commands, or a full queue stalls both. A
//!   transaction still waiting when the watcher stops is counted in
//!   [`TreeWatcher::dropped`], and a `handler` or `apply` call waiting on it
//!   fails with [`WatchError::Closed`].
//! - [`OverflowPolicy::DropAndReport`]: the item is dropped, counted in
//!   [`TreeWatcher::dropped`], and a dropped transaction is reported as
//!   [`WatchError::OutputDropped`] if the error queue has room.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fsh_core::{
    Event, EventTransaction, FileNode, FileTree, MetaData, NodeUuid, OverflowPolicy, ShadowPath,
    TreeError, WatchConfig,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::MetaCollector;
use crate::engine::TreeEngine;
use crate::error::WatchError;
use crate::source::{Notification, NotificationSource, SourceItem};

/// Capacity of the command queue between handle and task.
const COMMAND_CAPACITY: usize = 32;

/// The kind of notification source a watcher is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// OS notifications for a directory on disk.
    Real,
    /// Events and transactions supplied through a
    /// [`VirtualFeeder`](crate::VirtualFeeder).
    Virtual,
}

/// Lifecycle state of a [`TreeWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    /// Built; commands are served but the source is not consumed yet.
    Created,
    /// Consuming the source.
    Running,
    /// Terminal.
    Stopped,
}

type Reply<T> = oneshot::Sender<Result<T, WatchError>>;

#[derive(Debug)]
enum Mutation {
    Create(ShadowPath, Option<MetaData>),
    Write(ShadowPath, Option<MetaData>),
    Remove(ShadowPath),
    Move(ShadowPath, ShadowPath),
    Rename(ShadowPath, ShadowPath),
}

#[derive(Debug)]
enum Command {
    Start,
    Handle {
        event: Event,
        extra: Option<MetaData>,
        reply: Reply<EventTransaction>,
    },
    Apply {
        tx: EventTransaction,
        reply: Reply<EventTransaction>,
    },
    Mutate {
        op: Mutation,
        reply: Reply<FileNode>,
    },
    Restore {
        tree: FileTree,
        reply: Reply<()>,
    },
    SearchPath {
        path: ShadowPath,
        reply: oneshot::Sender<Option<FileNode>>,
    },
    SearchUuid {
        uuid: NodeUuid,
        reply: oneshot::Sender<Option<FileNode>>,
    },
    Tree {
        reply: oneshot::Sender<FileTree>,
    },
}

/// A live mirror of a directory tree.
///
/// Built by [`TreeWatcher::new_real`] or [`TreeWatcher::new_virtual`]. All
/// methods taking `&self` may be called concurrently; they are served one
/// at a time, in between source items.
///
/// Dropping the watcher cancels its task without waiting for it; call
/// [`TreeWatcher::stop`] to wait.
///
/// # Examples
///
/// ```no_run
/// use fsh_core::{Event, WatchConfig};
/// use fsh_watcher::TreeWatcher;
///
/// # async fn example() -> Result<(), fsh_watcher::WatchError> {
/// let (mut watcher, feeder, _root_tx) =
///     TreeWatcher::new_virtual("/remote/project", None, &WatchConfig::default()).await?;
/// watcher.start().await?;
///
/// feeder.send(Event::create("README.md")).await?;
/// if let Some(tx) = watcher.recv_event().await {
///     println!("{tx}");
/// }
///
/// watcher.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct TreeWatcher {
    backend: Backend,
    root: ShadowPath,
    state: WatcherState,
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<EventTransaction>,
    errors: mpsc::Receiver<WatchError>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for TreeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWatcher")
            .field("backend", &self.backend)
            .field("root", &self.root)
            .field("state", &self.state)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TreeWatcher {
    /// Spawns the task for an engine and a source.
    ///
    /// `backlog` holds errors found while building the engine; they are
    /// delivered on the error queue ahead of everything else.
    pub(crate) fn spawn<M, S>(
        backend: Backend,
        engine: TreeEngine<M>,
        source: S,
        config: &WatchConfig,
        backlog: Vec<WatchError>,
    ) -> Self
    where
        M: MetaCollector,
        S: NotificationSource,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (error_tx, error_rx) = mpsc::channel(config.error_capacity.max(1));
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let root = engine.root_path().clone();

        let actor = Actor {
            engine,
            source,
            commands: command_rx,
            events: event_tx,
            errors: error_tx,
            cancel: cancel.clone(),
            overflow: config.overflow,
            dropped: Arc::clone(&dropped),
            consuming: false,
            backlog: backlog.into(),
        };
        let task = tokio::spawn(actor.run());

        Self {
            backend,
            root,
            state: WatcherState::Created,
            commands: command_tx,
            events: event_rx,
            errors: error_rx,
            cancel,
            task: Some(task),
            dropped,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Starts consuming the notification source.
    ///
    /// Starting a running watcher does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn start(&mut self) -> Result<(), WatchError> {
        match self.state {
            WatcherState::Running => Ok(()),
            WatcherState::Stopped => Err(WatchError::Closed),
            WatcherState::Created => {
                self.commands
                    .send(Command::Start)
                    .await
                    .map_err(|_| WatchError::Closed)?;
                self.state = WatcherState::Running;
                tracing::info!(root = %self.root, backend = ?self.backend, "watcher started");
                Ok(())
            }
        }
    }

    /// Starts the watcher and hands every output to `on_output` until the
    /// watcher ends.
    ///
    /// The watcher ends when the source is exhausted or
    /// [`TreeWatcher::shutdown_handle`] is cancelled. Outputs still queued at
    /// that point are delivered before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher had already stopped.
    pub async fn watch<F>(&mut self, mut on_output: F) -> Result<(), WatchError>
    where
        F: FnMut(Result<EventTransaction, WatchError>),
    {
        self.start().await?;
        while let Some(output) = self.next_output().await {
            on_output(output);
        }
        self.stop().await
    }

    /// Stops the watcher and waits for its task to finish.
    ///
    /// Nothing is sent on either queue once this returns. Items already
    /// queued can still be received. Stopping twice does nothing.
    ///
    /// # Errors
    ///
    /// Currently always succeeds; a task that panicked is logged.
    pub async fn stop(&mut self) -> Result<(), WatchError> {
        if self.state == WatcherState::Stopped {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "watcher task failed");
            }
        }
        self.state = WatcherState::Stopped;
        tracing::info!(root = %self.root, dropped = self.dropped(), "watcher stopped");
        Ok(())
    }

    /// Stops the watcher and releases it.
    ///
    /// # Errors
    ///
    /// See [`TreeWatcher::stop`].
    pub async fn close(mut self) -> Result<(), WatchError> {
        self.stop().await
    }

    /// Returns a token that ends the watcher's task when cancelled.
    ///
    /// Useful for stopping a [`TreeWatcher::watch`] loop from a signal
    /// handler.
    #[must_use]
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ------------------------------------------------------------------------
    // Output queues
    // ------------------------------------------------------------------------

    /// Returns the transaction queue.
    pub fn events(&mut self) -> &mut mpsc::Receiver<EventTransaction> {
        &mut self.events
    }

    /// Returns the error queue.
    pub fn errors(&mut self) -> &mut mpsc::Receiver<WatchError> {
        &mut self.errors
    }

    /// Receives the next transaction.
    ///
    /// Returns `None` once the watcher's task has ended and the queue is
    /// drained.
    pub async fn recv_event(&mut self) -> Option<EventTransaction> {
        self.events.recv().await
    }

    /// Receives the next error.
    pub async fn recv_error(&mut self) -> Option<WatchError> {
        self.errors.recv().await
    }

    /// Receives the next transaction or error, whichever is ready first.
    ///
    /// Returns `None` once both queues are closed and drained.
    pub async fn next_output(&mut self) -> Option<Result<EventTransaction, WatchError>> {
        tokio::select! {
            biased;
            Some(tx) = self.events.recv() => Some(Ok(tx)),
            Some(err) = self.errors.recv() => Some(Err(err)),
            else => None,
        }
    }

    /// Returns how many outputs were dropped, either under
    /// [`OverflowPolicy::DropAndReport`] or by stopping while blocked on a
    /// full queue.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> WatcherState {
        self.state
    }

    /// Returns `true` if the watcher is consuming its source.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == WatcherState::Running && self.task.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Returns the watched root.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> &ShadowPath {
        &self.root
    }

    /// Returns the backend kind.
    #[inline]
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Reconciles one event against the tree.
    ///
    /// The resulting transaction is returned and also queued on the event
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Tree`] if the event cannot be applied, or
    /// [`WatchError::Closed`] if the watcher has stopped, including when it
    /// stops before the applied transaction could be queued.
    pub async fn handler(
        &self,
        event: Event,
        extra: Option<MetaData>,
    ) -> Result<EventTransaction, WatchError> {
        self.request(|reply| Command::Handle { event, extra, reply })
            .await?
    }

    /// Replays a transaction from another tree.
    ///
    /// The transaction is returned and also queued on the event queue.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Tree`] if the transaction does not fit the tree,
    /// or [`WatchError::Closed`] if the watcher has stopped.
    pub async fn apply(&self, tx: EventTransaction) -> Result<EventTransaction, WatchError> {
        self.request(|reply| Command::Apply { tx, reply }).await?
    }

    /// Adds a node at `path`. Nothing is queued.
    ///
    /// # Errors
    ///
    /// See [`TreeEngine::create`]; [`WatchError::Closed`] after stop.
    pub async fn create(
        &self,
        path: impl Into<ShadowPath>,
        extra: Option<MetaData>,
    ) -> Result<FileNode, WatchError> {
        self.mutate(Mutation::Create(path.into(), extra)).await
    }

    /// Refreshes the metadata of the node at `path`. Nothing is queued.
    ///
    /// # Errors
    ///
    /// See [`TreeEngine::write`]; [`WatchError::Closed`] after stop.
    pub async fn write(
        &self,
        path: impl Into<ShadowPath>,
        extra: Option<MetaData>,
    ) -> Result<FileNode, WatchError> {
        self.mutate(Mutation::Write(path.into(), extra)).await
    }

    /// Removes the node at `path`. Nothing is queued.
    ///
    /// # Errors
    ///
    /// See [`TreeEngine::remove`]; [`WatchError::Closed`] after stop.
    pub async fn remove(&self, path: impl Into<ShadowPath>) -> Result<FileNode, WatchError> {
        self.mutate(Mutation::Remove(path.into())).await
    }

    /// Moves the node at `from` to `to`. Nothing is queued.
    ///
    /// # Errors
    ///
    /// See [`TreeEngine::move_node`]; [`WatchError::Closed`] after stop.
    pub async fn move_node(
        &self,
        from: impl Into<ShadowPath>,
        to: impl Into<ShadowPath>,
    ) -> Result<FileNode, WatchError> {
        self.mutate(Mutation::Move(from.into(), to.into())).await
    }

    /// Renames the node at `from` to the last segment of `to`. Nothing is
    /// queued.
    ///
    /// # Errors
    ///
    /// See [`TreeEngine::rename`]; [`WatchError::Closed`] after stop.
    pub async fn rename(
        &self,
        from: impl Into<ShadowPath>,
        to: impl Into<ShadowPath>,
    ) -> Result<FileNode, WatchError> {
        self.mutate(Mutation::Rename(from.into(), to.into())).await
    }

    /// Replaces the tree wholesale.
    ///
    /// # Errors
    ///
    /// See [`TreeEngine::restore`]; [`WatchError::Closed`] after stop.
    pub async fn restore(&self, tree: FileTree) -> Result<(), WatchError> {
        self.request(|reply| Command::Restore { tree, reply }).await?
    }

    /// Returns a copy of the node at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn search_by_path(
        &self,
        path: impl Into<ShadowPath>,
    ) -> Result<Option<FileNode>, WatchError> {
        let path = path.into();
        self.request(|reply| Command::SearchPath { path, reply }).await
    }

    /// Returns a copy of the node with the given identity.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn search_by_uuid(&self, uuid: NodeUuid) -> Result<Option<FileNode>, WatchError> {
        self.request(|reply| Command::SearchUuid { uuid, reply }).await
    }

    /// Returns a copy of the whole tree.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn tree(&self) -> Result<FileTree, WatchError> {
        self.request(|reply| Command::Tree { reply }).await
    }

    /// Renders the tree for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Closed`] if the watcher has stopped.
    pub async fn dump(&self) -> Result<String, WatchError> {
        let tree = self.tree().await?;
        let dump = tree.dump().to_string();
        tracing::debug!(root = %self.root, "tree dump:\n{dump}");
        Ok(dump)
    }

    async fn mutate(&self, op: Mutation) -> Result<FileNode, WatchError> {
        self.request(|reply| Command::Mutate { op, reply }).await?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, WatchError> {
        if self.state == WatcherState::Stopped {
            return Err(WatchError::Closed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| WatchError::Closed)?;
        response.await.map_err(|_| WatchError::Closed)
    }
}

impl Drop for TreeWatcher {
    fn drop(&mut self) {
        // The task notices on its next turn; Drop cannot await it.
        self.cancel.cancel();
    }
}

// ============================================================================
// Task
// ============================================================================

struct Actor<M, S> {
    engine: TreeEngine<M>,
    source: S,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<EventTransaction>,
    errors: mpsc::Sender<WatchError>,
    cancel: CancellationToken,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
    consuming: bool,
    backlog: std::collections::VecDeque<WatchError>,
}

impl<M: MetaCollector, S: NotificationSource> Actor<M, S> {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let errors = self.errors.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    // Every handle is gone
                    None => break,
                },
                permit = errors.reserve(), if !self.backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(err) = self.backlog.pop_front() {
                            permit.send(err);
                        }
                    }
                    Err(_) => self.backlog.clear(),
                },
                item = self.source.next(), if self.consuming => match item {
                    Some(Ok(item)) => self.process(item).await,
                    Some(Err(err)) => self.report(err).await,
                    None => {
                        tracing::info!(
                            root = %self.engine.root_path(),
                            "notification source exhausted"
                        );
                        break;
                    }
                },
            }
        }
        tracing::debug!(
            root = %self.engine.root_path(),
            nodes = self.engine.tree().node_count(),
            "watcher task finished"
        );
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Start => self.consuming = true,
            Command::Handle { event, extra, reply } => {
                let result = match self.engine.handle(&event, extra) {
                    Ok(tx) => self.emit(tx.clone()).await.map(|()| tx),
                    Err(err) => Err(err.into()),
                };
                let _ = reply.send(result);
            }
            Command::Apply { tx, reply } => {
                let result = match self.engine.apply(&tx) {
                    Ok(tx) => self.emit(tx.clone()).await.map(|()| tx),
                    Err(err) => Err(err.into()),
                };
                let _ = reply.send(result);
            }
            Command::Mutate { op, reply } => {
                let _ = reply.send(self.mutate(op).map_err(WatchError::from));
            }
            Command::Restore { tree, reply } => {
                let _ = reply.send(self.engine.restore(tree).map_err(WatchError::from));
            }
            Command::SearchPath { path, reply } => {
                let _ = reply.send(self.engine.search_by_path(&path).cloned());
            }
            Command::SearchUuid { uuid, reply } => {
                let _ = reply.send(self.engine.search_by_uuid(&uuid).cloned());
            }
            Command::Tree { reply } => {
                let _ = reply.send(self.engine.tree().clone());
            }
        }
    }

    fn mutate(&mut self, op: Mutation) -> Result<FileNode, TreeError> {
        match op {
            Mutation::Create(path, extra) => self.engine.create(&path, extra),
            Mutation::Write(path, extra) => self.engine.write(&path, extra),
            Mutation::Remove(path) => self.engine.remove(&path),
            Mutation::Move(from, to) => self.engine.move_node(&from, &to),
            Mutation::Rename(from, to) => self.engine.rename(&from, &to),
        }
    }

    async fn process(&mut self, item: SourceItem) {
        let result = match item {
            SourceItem::Event(Notification { event, extra }) => {
                self.engine.handle(&event, extra).inspect_err(|err| {
                    tracing::warn!(event = %event, error = %err, "failed to reconcile event");
                })
            }
            SourceItem::Transaction(tx) => self.engine.apply(&tx).inspect_err(|err| {
                tracing::warn!(tx = %tx, error = %err, "failed to apply transaction");
            }),
        };
        match result {
            // A transaction lost to shutdown is already counted
            Ok(tx) => {
                let _ = self.emit(tx).await;
            }
            Err(err) => self.report(err.into()).await,
        }
    }

    /// Queues a transaction that has already been applied to the tree.
    ///
    /// Fails with [`WatchError::Closed`] if the watcher is cancelled while
    /// waiting for room; the loss is counted in `dropped`.
    async fn emit(&mut self, tx: EventTransaction) -> Result<(), WatchError> {
        match self.overflow {
            OverflowPolicy::Block => {
                let cancel = self.cancel.clone();
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = self.events.reserve() => Some(permit),
                };
                match permit {
                    Some(Ok(permit)) => permit.send(tx),
                    Some(Err(_)) => tracing::trace!("event queue receiver dropped"),
                    None => {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(
                            kind = %tx.kind,
                            uuid = %tx.uuid,
                            dropped,
                            "watcher stopped before transaction was queued"
                        );
                        return Err(WatchError::Closed);
                    }
                }
            }
            OverflowPolicy::DropAndReport => match self.events.try_send(tx) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(tx)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        kind = %tx.kind,
                        uuid = %tx.uuid,
                        dropped,
                        "event queue full, dropping transaction"
                    );
                    let _ = self.errors.try_send(WatchError::OutputDropped {
                        kind: tx.kind,
                        uuid: tx.uuid,
                    });
                }
            },
        }
        Ok(())
    }

    async fn report(&mut self, err: WatchError) {
        match self.overflow {
            OverflowPolicy::Block => {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {}
                    _ = self.errors.send(err) => {}
                }
            }
            OverflowPolicy::DropAndReport => {
                if let Err(TrySendError::Full(err)) = self.errors.try_send(err) {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(error = %err, dropped, "error queue full, dropping error");
                }
            }
        }
    }
}
