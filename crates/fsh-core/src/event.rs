//! Change kinds and raw change notifications.
//!
//! Every watcher backend reduces what it observes to an [`Event`]: a change
//! kind plus the path (or paths, for relocations) it affected. Events are
//! unresolved: they carry paths, not node identities, and are turned into
//! tree mutations by the reconciliation engine.
//!
//! # Event Flow
//!
//! ```text
//! OS notification / remote peer
//!        │
//!        ▼
//!   Event { kind, from_path, to_path }
//!        │
//!        ▼
//!   tree mutation ──► EventTransaction
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::ShadowPath;

/// The closed set of changes a shadow tree can undergo.
///
/// The discriminants are part of the wire format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventType {
    /// A file or directory appeared.
    Create = 0,
    /// A file's content or metadata changed.
    Write = 1,
    /// A file or directory (and its subtree) disappeared.
    Remove = 2,
    /// A node changed its name but kept its parent.
    Rename = 3,
    /// A node changed its parent, and possibly its name.
    Move = 4,
}

impl EventType {
    /// All event types, in discriminant order.
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Write,
        Self::Remove,
        Self::Rename,
        Self::Move,
    ];

    /// Returns a short lowercase label for the event type.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Move => "move",
        }
    }

    /// Returns `true` for event types that carry a destination path.
    #[inline]
    #[must_use]
    pub const fn is_relocation(self) -> bool {
        matches!(self, Self::Rename | Self::Move)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A raw change notification, before it is resolved against a tree.
///
/// `to_path` is only set for [`EventType::Rename`] and [`EventType::Move`].
///
/// # Examples
///
/// ```
/// use fsh_core::{Event, EventType};
///
/// let event = Event::relocate("/w/a.txt", "/w/b.txt");
/// assert_eq!(event.kind, EventType::Rename);
///
/// let event = Event::relocate("/w/a.txt", "/w/sub/a.txt");
/// assert_eq!(event.kind, EventType::Move);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// The kind of change.
    #[serde(rename = "type")]
    pub kind: EventType,

    /// The path the change happened at (the source, for relocations).
    pub from_path: ShadowPath,

    /// The destination of a relocation.
    pub to_path: Option<ShadowPath>,
}

impl Event {
    /// Creates an event of the given kind without a destination.
    #[must_use]
    pub fn new(kind: EventType, from_path: impl Into<ShadowPath>) -> Self {
        Self {
            kind,
            from_path: from_path.into(),
            to_path: None,
        }
    }

    /// Creates a [`EventType::Create`] event.
    #[must_use]
    pub fn create(path: impl Into<ShadowPath>) -> Self {
        Self::new(EventType::Create, path)
    }

    /// Creates a [`EventType::Write`] event.
    #[must_use]
    pub fn write(path: impl Into<ShadowPath>) -> Self {
        Self::new(EventType::Write, path)
    }

    /// Creates a [`EventType::Remove`] event.
    #[must_use]
    pub fn remove(path: impl Into<ShadowPath>) -> Self {
        Self::new(EventType::Remove, path)
    }

    /// Creates a [`EventType::Rename`] event.
    #[must_use]
    pub fn rename(from: impl Into<ShadowPath>, to: impl Into<ShadowPath>) -> Self {
        Self {
            kind: EventType::Rename,
            from_path: from.into(),
            to_path: Some(to.into()),
        }
    }

    /// Creates a [`EventType::Move`] event.
    #[must_use]
    pub fn moved(from: impl Into<ShadowPath>, to: impl Into<ShadowPath>) -> Self {
        Self {
            kind: EventType::Move,
            from_path: from.into(),
            to_path: Some(to.into()),
        }
    }

    /// Creates a relocation event, classified by whether the parent changes.
    ///
    /// Same parent yields [`EventType::Rename`]; a different parent yields
    /// [`EventType::Move`].
    #[must_use]
    pub fn relocate(from: impl Into<ShadowPath>, to: impl Into<ShadowPath>) -> Self {
        let from = from.into();
        let to = to.into();
        if from.parent_path() == to.parent_path() {
            Self::rename(from, to)
        } else {
            Self::moved(from, to)
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.to_path {
            Some(to) => write!(f, "{} {} -> {}", self.kind, self.from_path, to),
            None => write!(f, "{} {}", self.kind, self.from_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(Event::create("a").kind, EventType::Create);
        assert_eq!(Event::write("a").kind, EventType::Write);
        assert_eq!(Event::remove("a").kind, EventType::Remove);
        assert!(Event::remove("a").to_path.is_none());
        assert_eq!(Event::rename("a", "b").kind, EventType::Rename);
        assert_eq!(Event::moved("a", "d/a").kind, EventType::Move);
    }

    #[test]
    fn test_relocate_classifies_by_parent() {
        let rename = Event::relocate("/w/x", "/w/y");
        assert_eq!(rename.kind, EventType::Rename);
        assert_eq!(rename.to_path.as_ref().map(ShadowPath::as_str), Some("/w/y"));

        let moved = Event::relocate("/w/x", "/other/x");
        assert_eq!(moved.kind, EventType::Move);
    }

    #[test]
    fn test_discriminants_are_stable() {
        let values: Vec<u8> = EventType::ALL.iter().map(|kind| *kind as u8).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::create("/w/a").to_string(), "create /w/a");
        assert_eq!(Event::rename("/w/a", "/w/b").to_string(), "rename /w/a -> /w/b");
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&Event::create("new-file.txt")).expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"create","from_path":"new-file.txt","to_path":null}"#
        );
    }
}
