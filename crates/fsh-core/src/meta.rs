//! Node metadata and content checksums.

use std::fmt;
use std::fs::File;
use std::io;
use std::time::SystemTime;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

/// A BLAKE3 digest of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    /// Hashes a file's content by streaming it from disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or read.
    pub fn of_file(path: &Utf8Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(file)?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Returns the digest as a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;

        self.0.iter().fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }

    /// Returns the first eight hex digits, for log lines and tree dumps.
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Computes the checksum of an in-memory buffer.
///
/// # Examples
///
/// ```
/// use fsh_core::checksum;
///
/// assert_eq!(checksum(b"abc"), checksum(b"abc"));
/// assert_ne!(checksum(b"abc"), checksum(b"abcd"));
/// ```
#[must_use]
pub fn checksum(bytes: &[u8]) -> Checksum {
    Checksum(*blake3::hash(bytes).as_bytes())
}

/// Metadata attached to every node.
///
/// `sum` is always `None` for directories. Nodes built from a virtual
/// source carry whatever metadata the peer supplied, which may be the
/// default (unknown size, no checksum, no timestamp).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaData {
    /// Whether the node is a directory.
    pub is_dir: bool,

    /// Content checksum of a file.
    pub sum: Option<Checksum>,

    /// Size in bytes as reported by the filesystem.
    pub size: u64,

    /// Last modification time, if known.
    #[serde(default, with = "epoch_time")]
    pub modified_at: Option<SystemTime>,
}

impl MetaData {
    /// Metadata for a directory with nothing else known.
    #[must_use]
    pub const fn directory() -> Self {
        Self {
            is_dir: true,
            sum: None,
            size: 0,
            modified_at: None,
        }
    }

    /// Metadata for a file with the given content.
    #[must_use]
    pub fn for_content(bytes: &[u8]) -> Self {
        Self {
            is_dir: false,
            sum: Some(checksum(bytes)),
            size: bytes.len() as u64,
            modified_at: None,
        }
    }

    /// Sets the modification time.
    #[must_use]
    pub const fn with_modified_at(mut self, at: SystemTime) -> Self {
        self.modified_at = Some(at);
        self
    }
}

/// `Option<SystemTime>` as `(seconds, nanoseconds)` since the Unix epoch.
///
/// Seconds are signed so times before 1970 survive; nanoseconds are always
/// in `0..1_000_000_000` and count forward from the seconds.
mod epoch_time {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub(super) fn to_parts(at: SystemTime) -> Option<(i64, u32)> {
        match at.duration_since(UNIX_EPOCH) {
            Ok(after) => Some((i64::try_from(after.as_secs()).ok()?, after.subsec_nanos())),
            Err(err) => {
                let before = err.duration();
                let secs = i64::try_from(before.as_secs()).ok()?;
                match before.subsec_nanos() {
                    0 => Some((-secs, 0)),
                    nanos => Some((-secs - 1, 1_000_000_000 - nanos)),
                }
            }
        }
    }

    pub(super) fn from_parts(secs: i64, nanos: u32) -> Option<SystemTime> {
        if nanos >= 1_000_000_000 {
            return None;
        }
        let whole = Duration::from_secs(secs.unsigned_abs());
        let base = if secs >= 0 {
            UNIX_EPOCH.checked_add(whole)?
        } else {
            UNIX_EPOCH.checked_sub(whole)?
        };
        base.checked_add(Duration::from_nanos(u64::from(nanos)))
    }

    #[allow(clippy::ref_option)] // Signature required by `#[serde(with)]`
    pub(super) fn serialize<S: Serializer>(
        at: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let parts = match at {
            Some(at) => Some(
                to_parts(*at).ok_or_else(|| S::Error::custom("modification time out of range"))?,
            ),
            None => None,
        };
        parts.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        match Option::<(i64, u32)>::deserialize(deserializer)? {
            Some((secs, nanos)) => from_parts(secs, nanos)
                .map(Some)
                .ok_or_else(|| D::Error::custom("modification time out of range")),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_checksum_differs_for_different_content() {
        assert_ne!(checksum(b""), checksum(b"test"));
        assert_eq!(checksum(b"test"), checksum(b"test"));
    }

    #[test]
    fn test_checksum_of_file_matches_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        let mut file = File::create(&path).expect("create");
        file.write_all(b"hello shadow").expect("write");
        drop(file);

        let utf8 = Utf8Path::from_path(&path).expect("utf8");
        let from_file = Checksum::of_file(utf8).expect("hash file");
        assert_eq!(from_file, checksum(b"hello shadow"));
    }

    #[test]
    fn test_checksum_hex() {
        let sum = checksum(b"abc");
        assert_eq!(sum.to_hex().len(), 64);
        assert_eq!(sum.short().len(), 8);
        assert!(sum.to_hex().starts_with(&sum.short()));
    }

    #[test]
    fn test_metadata_constructors() {
        let dir = MetaData::directory();
        assert!(dir.is_dir);
        assert!(dir.sum.is_none());

        let file = MetaData::for_content(b"1234");
        assert!(!file.is_dir);
        assert_eq!(file.size, 4);
        assert_eq!(file.sum, Some(checksum(b"1234")));
    }

    #[test]
    fn test_epoch_parts_before_and_after_1970() {
        use std::time::{Duration, UNIX_EPOCH};

        let before = UNIX_EPOCH - Duration::new(86_400, 250);
        assert_eq!(epoch_time::to_parts(before), Some((-86_401, 999_999_750)));
        assert_eq!(epoch_time::from_parts(-86_401, 999_999_750), Some(before));

        let after = UNIX_EPOCH + Duration::new(5, 7);
        assert_eq!(epoch_time::to_parts(after), Some((5, 7)));
        assert_eq!(epoch_time::to_parts(UNIX_EPOCH), Some((0, 0)));
        assert!(epoch_time::from_parts(0, 1_000_000_000).is_none());
    }

    #[test]
    fn test_pre_epoch_modified_at_serializes() {
        use std::time::{Duration, UNIX_EPOCH};

        let meta = MetaData::for_content(b"x")
            .with_modified_at(UNIX_EPOCH - Duration::from_secs(86_400));
        let json = serde_json::to_string(&meta).expect("serialize");
        let back: MetaData = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, meta);
    }
}
