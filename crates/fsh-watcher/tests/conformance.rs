//! Conformance suite run against both backends.
//!
//! Every scenario drives a [`Harness`], which performs each step on disk for
//! the real backend and as an injected event for the virtual one, then waits
//! until the watcher's tree reflects it.

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use fsh_core::{
    Event, EventTransaction, EventType, FileNode, FileTree, MetaData, WatchConfig, checksum,
};
use fsh_watcher::{Backend, TreeWatcher, VirtualFeeder, WatchError};
use tempfile::TempDir;

const ROOT_NAME: &str = "fs-shadow";
const TIMEOUT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

struct Harness {
    watcher: TreeWatcher,
    initial: EventTransaction,
    /// Real backend only; keeps the fixture alive.
    _dir: Option<TempDir>,
    feeder: Option<VirtualFeeder>,
    root: Utf8PathBuf,
    /// A directory outside the watched root.
    outside: Utf8PathBuf,
    /// Every transaction received so far.
    log: Vec<EventTransaction>,
    errors: Vec<WatchError>,
}

impl Harness {
    async fn all() -> Vec<Self> {
        let mut harnesses = vec![Self::real().await, Self::virtual_backend().await];
        for harness in &mut harnesses {
            harness.watcher.start().await.expect("start");
        }
        harnesses
    }

    async fn real() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(dir.path().canonicalize().expect("canonical"))
            .expect("utf8 temp dir");
        let root = base.join(ROOT_NAME);
        fs::create_dir(&root).expect("mkdir root");

        let (watcher, initial) = TreeWatcher::new_real(&root, &WatchConfig::default())
            .await
            .expect("real watcher");
        Self {
            watcher,
            initial,
            _dir: Some(dir),
            feeder: None,
            root,
            outside: base,
            log: Vec::new(),
            errors: Vec::new(),
        }
    }

    async fn virtual_backend() -> Self {
        let root = Utf8PathBuf::from("/virtual").join(ROOT_NAME);
        let (watcher, feeder, initial) =
            TreeWatcher::new_virtual(root.as_path(), None, &WatchConfig::default())
                .await
                .expect("virtual watcher");
        Self {
            watcher,
            initial,
            _dir: None,
            feeder: Some(feeder),
            root,
            outside: Utf8PathBuf::from("/elsewhere"),
            log: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn is_real(&self) -> bool {
        self.watcher.backend() == Backend::Real
    }

    fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }

    async fn feed(&self, event: Event, meta: Option<MetaData>) {
        let feeder = self.feeder.as_ref().expect("virtual backend");
        match meta {
            Some(meta) => feeder.send_with_meta(event, meta).await,
            None => feeder.send(event).await,
        }
        .expect("feed");
    }

    async fn create_file(&mut self, relative: &str, content: &[u8]) -> FileNode {
        let path = self.path(relative);
        if self.is_real() {
            fs::write(&path, content).expect("write file");
        } else {
            self.feed(Event::create(path.as_path()), Some(MetaData::for_content(content)))
                .await;
        }
        self.wait_for(relative, |node| node.is_some_and(|n| !n.is_dir())).await
    }

    async fn create_dir(&mut self, relative: &str) -> FileNode {
        let path = self.path(relative);
        if self.is_real() {
            fs::create_dir(&path).expect("mkdir");
        } else {
            self.feed(Event::create(path.as_path()), Some(MetaData::directory())).await;
        }
        self.wait_for(relative, |node| node.is_some_and(FileNode::is_dir)).await
    }

    async fn write_file(&mut self, relative: &str, content: &[u8]) -> FileNode {
        let path = self.path(relative);
        if self.is_real() {
            fs::write(&path, content).expect("write file");
        } else {
            self.feed(Event::write(path.as_path()), Some(MetaData::for_content(content)))
                .await;
        }
        let sum = checksum(content);
        self.wait_for(relative, |node| node.is_some_and(|n| n.meta.sum == Some(sum)))
            .await
    }

    /// Renames or moves within the root.
    async fn relocate(&mut self, from: &str, to: &str) -> FileNode {
        let (from_path, to_path) = (self.path(from), self.path(to));
        if self.is_real() {
            fs::rename(&from_path, &to_path).expect("rename");
        } else {
            self.feed(Event::relocate(from_path.as_path(), to_path.as_path()), None).await;
        }
        self.wait_absent(from).await;
        self.wait_for(to, |node| node.is_some()).await
    }

    async fn move_out(&mut self, relative: &str) {
        let path = self.path(relative);
        let target = self.outside.join(path.file_name().expect("named entry"));
        if self.is_real() {
            fs::rename(&path, &target).expect("move out");
        } else {
            self.feed(Event::moved(path.as_path(), target.as_path()), None).await;
        }
        self.wait_absent(relative).await;
    }

    async fn remove(&mut self, relative: &str) {
        let path = self.path(relative);
        if self.is_real() {
            if path.is_dir() {
                fs::remove_dir_all(&path).expect("remove dir");
            } else {
                fs::remove_file(&path).expect("remove file");
            }
        } else {
            self.feed(Event::remove(path.as_path()), None).await;
        }
        self.wait_absent(relative).await;
    }

    async fn wait_absent(&mut self, relative: &str) {
        self.wait_until(relative, Option::is_none).await;
    }

    async fn wait_for(
        &mut self,
        relative: &str,
        pred: impl Fn(Option<&FileNode>) -> bool,
    ) -> FileNode {
        self.wait_until(relative, |node| pred(node.as_ref())).await;
        self.watcher
            .search_by_path(self.path(relative).as_path())
            .await
            .expect("search")
            .expect("node present")
    }

    async fn wait_until(&mut self, relative: &str, pred: impl Fn(&Option<FileNode>) -> bool) {
        let path = self.path(relative);
        let backend = self.watcher.backend();
        tokio::time::timeout(TIMEOUT, async {
            loop {
                self.drain();
                let node = self.watcher.search_by_path(path.as_path()).await.expect("search");
                if pred(&node) {
                    return;
                }
                tokio::time::sleep(POLL).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{backend:?} backend: condition on {relative} not met in time"));
    }

    /// Lets outstanding notifications settle, then collects every output.
    async fn settle(&mut self) {
        if self.is_real() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.drain();
    }

    fn drain(&mut self) {
        while let Ok(tx) = self.watcher.events().try_recv() {
            self.log.push(tx);
        }
        while let Ok(err) = self.watcher.errors().try_recv() {
            self.errors.push(err);
        }
    }

    async fn root_names(&self) -> Vec<String> {
        let tree = self.watcher.tree().await.expect("tree");
        tree.children(&tree.root_uuid()).map(|n| n.name.clone()).collect()
    }
}

#[tokio::test]
async fn test_create_rename_move_out() {
    for mut h in Harness::all().await {
        let created = h.create_file("test1", b"").await;
        assert_eq!(h.root_names().await, vec!["test1"]);

        let renamed = h.relocate("test1", "test1-rename").await;
        assert_eq!(renamed.uuid, created.uuid);
        assert_eq!(h.root_names().await, vec!["test1-rename"]);

        h.move_out("test1-rename").await;
        assert!(h.root_names().await.is_empty());
        h.watcher.stop().await.expect("stop");
    }
}

#[tokio::test]
async fn test_file_lifecycle() {
    for mut h in Harness::all().await {
        let created = h.create_file("file.txt", b"").await;
        h.relocate("file.txt", "file-rename.txt").await;

        let written = h.write_file("file-rename.txt", b"test").await;
        assert_eq!(written.uuid, created.uuid);
        assert_ne!(written.meta.sum, created.meta.sum);

        h.remove("file-rename.txt").await;
        assert!(h.root_names().await.is_empty());
        assert!(h.watcher.search_by_uuid(created.uuid).await.expect("search").is_none());
        h.watcher.stop().await.expect("stop");
    }
}

#[tokio::test]
async fn test_handler_dispatch() {
    for mut h in [Harness::real().await, Harness::virtual_backend().await] {
        // Not started: the real notifier's own report of the file stays queued
        if h.is_real() {
            fs::write(h.path("new-file.txt"), b"new").expect("write");
        }
        let tx = h
            .watcher
            .handler(Event::create("new-file.txt"), None)
            .await
            .expect("handler");
        assert_eq!(tx.kind, EventType::Create);
        assert_eq!(tx.name, "new-file.txt");
        assert_eq!(tx.parent_uuid, Some(h.initial.uuid));
        assert_eq!(h.root_names().await, vec!["new-file.txt"]);

        assert_eq!(h.watcher.events().try_recv().ok(), Some(tx));
        assert!(h.watcher.events().try_recv().is_err());
        h.watcher.stop().await.expect("stop");
    }
}

#[tokio::test]
async fn test_identity_stable_across_moves() {
    for mut h in Harness::all().await {
        let a = h.create_dir("a").await;
        let b = h.create_dir("b").await;
        let file = h.create_file("a/f.txt", b"f").await;

        assert_eq!(h.relocate("a/f.txt", "a/g.txt").await.uuid, file.uuid);
        let moved = h.relocate("a/g.txt", "b/g.txt").await;
        assert_eq!(moved.uuid, file.uuid);
        assert_eq!(moved.parent_uuid, Some(b.uuid));

        let moved_dir = h.relocate("a", "b/a").await;
        assert_eq!(moved_dir.uuid, a.uuid);
        assert_eq!(h.root_names().await, vec!["b"]);
        h.watcher.stop().await.expect("stop");
    }
}

#[tokio::test]
async fn test_path_uuid_duality() {
    for mut h in Harness::all().await {
        h.create_dir("docs").await;
        h.create_dir("docs/nested").await;
        h.create_file("docs/nested/deep.txt", b"deep").await;
        h.create_file("top.txt", b"top").await;
        h.relocate("top.txt", "docs/top.txt").await;

        let tree = h.watcher.tree().await.expect("tree");
        tree.check_consistency().expect("consistent");
        assert_eq!(tree.node_count(), 5);
        for node in &tree {
            let path = tree.path_of(&node.uuid).expect("path");
            assert_eq!(tree.search(&path).map(|n| n.uuid), Some(node.uuid));
            assert_eq!(tree.search_by_uuid(&node.uuid), Some(node));
        }
        h.watcher.stop().await.expect("stop");
    }
}

#[tokio::test]
async fn test_closed_after_stop() {
    for mut h in Harness::all().await {
        h.watcher.stop().await.expect("stop");
        assert!(!h.watcher.is_running());
        assert!(matches!(
            h.watcher.handler(Event::create("late.txt"), None).await,
            Err(WatchError::Closed)
        ));
        assert!(matches!(h.watcher.create("late.txt", None).await, Err(WatchError::Closed)));
        assert!(matches!(h.watcher.tree().await, Err(WatchError::Closed)));
        assert!(h.watcher.recv_event().await.is_none());
    }
}

#[tokio::test]
async fn test_backends_build_equal_trees() {
    let mut trees = Vec::new();
    for mut h in Harness::all().await {
        h.create_dir("src").await;
        h.create_file("src/main.rs", b"fn main() {}").await;
        h.create_file("README.md", b"# readme").await;
        h.create_dir("old").await;
        h.relocate("old", "src/old").await;
        h.relocate("README.md", "README").await;
        h.write_file("src/main.rs", b"fn main() { run() }").await;
        h.remove("src/old").await;

        trees.push(h.watcher.tree().await.expect("tree"));
        h.watcher.stop().await.expect("stop");
    }

    let (real, virtual_tree) = (&trees[0], &trees[1]);
    assert!(
        real.structurally_eq(virtual_tree),
        "real:\n{}\nvirtual:\n{}",
        real.dump(),
        virtual_tree.dump()
    );
}

#[tokio::test]
async fn test_replay_reproduces_origin() {
    let mut origin = Harness::real().await;
    origin.watcher.start().await.expect("start");
    origin.create_dir("dir").await;
    origin.create_file("dir/a.txt", b"a").await;
    origin.create_file("b.txt", b"b").await;
    origin.relocate("b.txt", "dir/b.txt").await;
    origin.relocate("dir/a.txt", "dir/c.txt").await;
    origin.settle().await;
    let origin_tree = origin.watcher.tree().await.expect("tree");
    origin.drain();

    let seed = FileTree::with_root(origin.initial.to_node());
    let (mut replica, feeder, _) = TreeWatcher::new_virtual(
        Utf8Path::new("/replica").join(ROOT_NAME).as_path(),
        Some(seed),
        &WatchConfig::default(),
    )
    .await
    .expect("replica");
    replica.start().await.expect("start");

    for tx in &origin.log {
        let record = tx.encode().expect("encode");
        assert_eq!(&EventTransaction::decode(&record).expect("decode"), tx);
        feeder.send_encoded(&record).await.expect("send");
    }
    for tx in &origin.log {
        let echoed = tokio::time::timeout(TIMEOUT, replica.next_output())
            .await
            .expect("replayed in time")
            .expect("output")
            .expect("applied");
        assert_eq!(&echoed, tx);
    }

    let replica_tree = replica.tree().await.expect("tree");
    assert!(replica_tree.structurally_eq(&origin_tree));
    for node in &origin_tree {
        assert_eq!(replica_tree.path_of(&node.uuid), origin_tree.path_of(&node.uuid));
    }

    replica.stop().await.expect("stop");
    origin.watcher.stop().await.expect("stop");
}
