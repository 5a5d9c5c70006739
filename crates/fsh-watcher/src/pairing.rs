//! Pairing of split rename notifications.
//!
//! Most platforms report a rename as two notifications, one for the old
//! name and one for the new. [`RenamePairer`] joins them back into a single
//! relocation:
//!
//! ```text
//! From(a, cookie 7) ──► pending
//! To(b, cookie 7)   ──► Relocated { a → b }
//!
//! From(c)           ──► pending ──(window elapses)──► MovedOut(c)
//! To(d)             ──────────────────────────────►  MovedIn(d)
//! ```
//!
//! Halves carrying a tracker (inotify's cookie) only pair with the same
//! tracker. Untracked halves pair with the most recent untracked source.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

/// Most recent pairings remembered to drop the redundant `Both` notification
/// some backends emit after the two halves.
const PAIRED_MEMORY: usize = 64;

/// The outcome of a rename half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing {
    /// Both halves seen: the entry moved within the watched tree.
    Relocated {
        /// The old path.
        from: Utf8PathBuf,
        /// The new path.
        to: Utf8PathBuf,
    },
    /// Only the source was seen: the entry left the watched tree.
    MovedOut(Utf8PathBuf),
    /// Only the destination was seen: the entry came from outside.
    MovedIn(Utf8PathBuf),
}

#[derive(Debug)]
struct PendingFrom {
    path: Utf8PathBuf,
    tracker: Option<usize>,
    at: Instant,
}

/// Joins rename halves that arrive as separate notifications.
#[derive(Debug)]
pub struct RenamePairer {
    window: Duration,
    pending: VecDeque<PendingFrom>,
    paired: VecDeque<(Option<usize>, Utf8PathBuf, Utf8PathBuf)>,
}

impl RenamePairer {
    /// Creates a pairer that waits `window` for a destination.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: VecDeque::new(),
            paired: VecDeque::new(),
        }
    }

    /// Returns `true` if no source is waiting for its destination.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records the source half of a rename.
    pub fn from_half(&mut self, path: Utf8PathBuf, tracker: Option<usize>, now: Instant) {
        tracing::trace!(path = %path, ?tracker, "rename source pending");
        self.pending.push_back(PendingFrom {
            path,
            tracker,
            at: now,
        });
    }

    /// Resolves the destination half of a rename.
    pub fn to_half(&mut self, path: Utf8PathBuf, tracker: Option<usize>) -> Pairing {
        let position = match tracker {
            Some(_) => self.pending.iter().position(|p| p.tracker == tracker),
            None => self.pending.iter().rposition(|p| p.tracker.is_none()),
        };
        match position.and_then(|i| self.pending.remove(i)) {
            Some(from) => {
                self.remember(tracker, from.path.clone(), path.clone());
                Pairing::Relocated {
                    from: from.path,
                    to: path,
                }
            }
            None => Pairing::MovedIn(path),
        }
    }

    /// Records a rename reported with both halves at once.
    ///
    /// Returns `false` if the same pair was already joined from its halves.
    pub fn both(&mut self, from: Utf8PathBuf, to: Utf8PathBuf, tracker: Option<usize>) -> bool {
        let seen = self
            .paired
            .iter()
            .any(|(t, f, d)| (tracker.is_none() || *t == tracker) && *f == from && *d == to);
        if seen {
            return false;
        }
        // A later `To` for this pair must not be joined again
        if let Some(i) = self.pending.iter().position(|p| p.path == from && p.tracker == tracker) {
            self.pending.remove(i);
        }
        self.remember(tracker, from, to);
        true
    }

    /// Turns sources older than the window into [`Pairing::MovedOut`].
    pub fn expire(&mut self, now: Instant) -> Vec<Pairing> {
        let mut expired = Vec::new();
        while let Some(front) = self.pending.front() {
            if now.saturating_duration_since(front.at) < self.window {
                break;
            }
            if let Some(from) = self.pending.pop_front() {
                tracing::trace!(path = %from.path, "rename source expired");
                expired.push(Pairing::MovedOut(from.path));
            }
        }
        expired
    }

    /// Turns every pending source into [`Pairing::MovedOut`].
    pub fn drain(&mut self) -> Vec<Pairing> {
        self.pending
            .drain(..)
            .map(|from| Pairing::MovedOut(from.path))
            .collect()
    }

    /// Returns when the oldest pending source expires.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().map(|p| p.at + self.window)
    }

    fn remember(&mut self, tracker: Option<usize>, from: Utf8PathBuf, to: Utf8PathBuf) {
        if self.paired.len() == PAIRED_MEMORY {
            self.paired.pop_front();
        }
        self.paired.push_back((tracker, from, to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(50);

    fn p(s: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(s)
    }

    #[test]
    fn test_tracked_halves_pair() {
        let mut pairer = RenamePairer::new(WINDOW);
        let now = Instant::now();
        pairer.from_half(p("/w/a"), Some(1), now);
        pairer.from_half(p("/w/b"), Some(2), now);

        assert_eq!(
            pairer.to_half(p("/w/b2"), Some(2)),
            Pairing::Relocated { from: p("/w/b"), to: p("/w/b2") }
        );
        assert_eq!(
            pairer.to_half(p("/w/a2"), Some(1)),
            Pairing::Relocated { from: p("/w/a"), to: p("/w/a2") }
        );
        assert!(pairer.is_empty());
    }

    #[test]
    fn test_unmatched_tracker_is_move_in() {
        let mut pairer = RenamePairer::new(WINDOW);
        pairer.from_half(p("/w/a"), Some(1), Instant::now());
        assert_eq!(pairer.to_half(p("/w/x"), Some(9)), Pairing::MovedIn(p("/w/x")));
        assert!(!pairer.is_empty());
    }

    #[test]
    fn test_untracked_pairs_with_most_recent() {
        let mut pairer = RenamePairer::new(WINDOW);
        let now = Instant::now();
        pairer.from_half(p("/w/old"), None, now);
        pairer.from_half(p("/w/new"), None, now);
        assert_eq!(
            pairer.to_half(p("/w/dest"), None),
            Pairing::Relocated { from: p("/w/new"), to: p("/w/dest") }
        );
    }

    #[test]
    fn test_expire_after_window() {
        let mut pairer = RenamePairer::new(WINDOW);
        let start = Instant::now();
        pairer.from_half(p("/w/a"), Some(1), start);
        pairer.from_half(p("/w/b"), Some(2), start + Duration::from_millis(30));

        assert_eq!(pairer.next_deadline(), Some(start + WINDOW));
        assert!(pairer.expire(start + Duration::from_millis(10)).is_empty());
        assert_eq!(
            pairer.expire(start + Duration::from_millis(60)),
            vec![Pairing::MovedOut(p("/w/a"))]
        );
        assert_eq!(pairer.drain(), vec![Pairing::MovedOut(p("/w/b"))]);
        assert_eq!(pairer.next_deadline(), None);
    }

    #[test]
    fn test_both_after_halves_is_redundant() {
        let mut pairer = RenamePairer::new(WINDOW);
        pairer.from_half(p("/w/a"), Some(3), Instant::now());
        pairer.to_half(p("/w/b"), Some(3));

        assert!(!pairer.both(p("/w/a"), p("/w/b"), Some(3)));
        assert!(pairer.both(p("/w/c"), p("/w/d"), None));
    }

    #[test]
    fn test_both_consumes_pending_half() {
        let mut pairer = RenamePairer::new(WINDOW);
        pairer.from_half(p("/w/a"), Some(4), Instant::now());
        assert!(pairer.both(p("/w/a"), p("/w/b"), Some(4)));
        assert!(pairer.is_empty());
    }
}
