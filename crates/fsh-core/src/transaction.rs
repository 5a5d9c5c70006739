//! Resolved changes and their binary wire format.
//!
//! An [`EventTransaction`] is what a watcher emits after it has applied an
//! [`Event`](crate::Event) to its tree: the affected node's identity, its
//! (new) parent and name, and its metadata. Transactions are addressed by
//! UUID, not by path, so a replica can apply them with
//! [`FileTree::apply`](crate::FileTree::apply) regardless of what the paths
//! looked like on the originating machine.
//!
//! # Wire format
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ version │ bincode body (standard config, varint ints)  │
//! │  1 byte │ name, kind, uuid, parent_uuid, meta          │
//! └─────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Records carry no length of their own. When several are stored in one
//! stream they are framed with a little-endian `u32` length prefix by
//! [`write_frame`] and read back with [`FrameReader`].

use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

pub use bincode::error::EncodeError;

use crate::error::DecodeError;
use crate::event::EventType;
use crate::meta::MetaData;
use crate::node::{FileNode, NodeUuid};

/// The version byte written in front of every encoded transaction.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on the size of a single record body.
const MAX_RECORD_LEN: usize = 1 << 20;

fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_RECORD_LEN>()
}

/// A change that has been applied to a shadow tree.
///
/// For [`EventType::Remove`] the metadata is the node's last known state.
/// For [`EventType::Create`] without a parent the transaction describes the
/// root itself.
///
/// # Examples
///
/// ```
/// use fsh_core::{EventTransaction, EventType, FileNode, MetaData};
///
/// let node = FileNode::new("new-file.txt", MetaData::for_content(b""));
/// let tx = EventTransaction::from_node(&node, EventType::Create);
///
/// let bytes = tx.encode()?;
/// assert_eq!(EventTransaction::decode(&bytes)?, tx);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTransaction {
    /// Name of the node after the change.
    pub name: String,

    /// The kind of change.
    #[serde(rename = "type")]
    pub kind: EventType,

    /// Identity of the affected node.
    pub uuid: NodeUuid,

    /// Parent of the node after the change (before it, for removals).
    pub parent_uuid: Option<NodeUuid>,

    /// Metadata of the node after the change.
    pub meta: MetaData,
}

impl EventTransaction {
    /// Describes a change to `node`, using its current name, parent, and
    /// metadata.
    #[must_use]
    pub fn from_node(node: &FileNode, kind: EventType) -> Self {
        Self {
            name: node.name.clone(),
            kind,
            uuid: node.uuid,
            parent_uuid: node.parent_uuid,
            meta: node.meta.clone(),
        }
    }

    /// Builds the detached node this transaction describes.
    #[must_use]
    pub fn to_node(&self) -> FileNode {
        let mut node = FileNode::with_uuid(self.uuid, &self.name, self.meta.clone());
        node.parent_uuid = self.parent_uuid;
        node
    }

    /// Encodes the transaction as a versioned binary record.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if the record exceeds the size limit.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let body = bincode::serde::encode_to_vec(self, wire_config())?;
        let mut record = Vec::with_capacity(body.len() + 1);
        record.push(WIRE_VERSION);
        record.extend_from_slice(&body);
        Ok(record)
    }

    /// Decodes a record produced by [`EventTransaction::encode`].
    ///
    /// The whole input must be consumed.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Empty`] for empty input
    /// - [`DecodeError::UnsupportedVersion`] for an unknown version byte
    /// - [`DecodeError::Malformed`] if the body does not decode
    /// - [`DecodeError::TrailingBytes`] if bytes remain after the body
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&version, body) = bytes.split_first().ok_or(DecodeError::Empty)?;
        if version != WIRE_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let (tx, read): (Self, usize) = bincode::serde::decode_from_slice(body, wire_config())?;
        if read != body.len() {
            return Err(DecodeError::TrailingBytes(body.len() - read));
        }
        Ok(tx)
    }
}

impl fmt::Display for EventTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.kind, self.name, self.uuid)
    }
}

/// Writes one record with a little-endian `u32` length prefix.
///
/// # Errors
///
/// Returns an I/O error if writing fails, or `InvalidInput` if the record
/// is longer than `u32::MAX` bytes.
pub fn write_frame<W: Write>(writer: &mut W, record: &[u8]) -> io::Result<()> {
    let len = u32::try_from(record.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large to frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(record)
}

/// Reads length-prefixed transaction records from a byte stream.
///
/// Yields `None` at a clean end of stream and an error for a frame cut
/// short. Iteration can continue after a [`DecodeError::Malformed`] record,
/// since its frame was consumed whole.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a reader.
    pub const fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next raw record, without decoding it.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if the stream ends inside a
    /// frame, or [`DecodeError::Io`] if reading fails.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let mut header = [0_u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => return Ok(None),
            4 => {}
            found => {
                return Err(DecodeError::Truncated {
                    expected: header.len(),
                    found,
                });
            }
        }

        let expected = u32::from_le_bytes(header) as usize;
        let mut record = Vec::new();
        (&mut self.reader)
            .take(expected as u64)
            .read_to_end(&mut record)?;
        if record.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                found: record.len(),
            });
        }
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<EventTransaction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(EventTransaction::decode(&record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: EventType) -> EventTransaction {
        let mut node = FileNode::new("new-file.txt", MetaData::for_content(b"test"));
        node.parent_uuid = Some(NodeUuid::new());
        EventTransaction::from_node(&node, kind)
    }

    #[test]
    fn test_encode_starts_with_version() {
        let bytes = sample(EventType::Create).encode().expect("encode");
        assert_eq!(bytes[0], WIRE_VERSION);
        assert!(bytes.len() > 1);
    }

    #[test]
    fn test_decode_restores_every_kind() {
        for kind in EventType::ALL {
            let tx = sample(kind);
            let decoded = EventTransaction::decode(&tx.encode().expect("encode")).expect("decode");
            assert_eq!(decoded, tx);
        }
    }

    #[test]
    fn test_decode_root_transaction() {
        let root = FileNode::new("fs-shadow", MetaData::directory());
        let tx = EventTransaction::from_node(&root, EventType::Create);
        let decoded = EventTransaction::decode(&tx.encode().expect("encode")).expect("decode");
        assert!(decoded.parent_uuid.is_none());
        assert!(decoded.meta.is_dir);
    }

    #[test]
    fn test_decode_keeps_pre_epoch_modified_at() {
        use std::time::{Duration, UNIX_EPOCH};

        let old = UNIX_EPOCH - Duration::new(86_400, 500);
        let node = FileNode::new("old.txt", MetaData::for_content(b"x").with_modified_at(old));
        let tx = EventTransaction::from_node(&node, EventType::Create);

        let decoded = EventTransaction::decode(&tx.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.meta.modified_at, Some(old));
        assert!(serde_json::to_string(&tx).is_ok());
    }

    #[test]
    fn test_decode_rejects_empty_input() {
        assert!(matches!(EventTransaction::decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut bytes = sample(EventType::Write).encode().expect("encode");
        bytes[0] = 7;
        assert!(matches!(
            EventTransaction::decode(&bytes),
            Err(DecodeError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing() {
        let bytes = sample(EventType::Remove).encode().expect("encode");
        assert!(matches!(
            EventTransaction::decode(&bytes[..bytes.len() - 3]),
            Err(DecodeError::Malformed(_))
        ));

        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0, 0]);
        assert!(matches!(
            EventTransaction::decode(&padded),
            Err(DecodeError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(EventTransaction::decode(&[WIRE_VERSION, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_to_node_keeps_identity() {
        let tx = sample(EventType::Move);
        let node = tx.to_node();
        assert_eq!(node.uuid, tx.uuid);
        assert_eq!(node.parent_uuid, tx.parent_uuid);
        assert_eq!(node.name, tx.name);
        assert!(node.subs.is_empty());
    }

    #[test]
    fn test_frames_read_back_in_order() {
        let txs = [
            sample(EventType::Create),
            sample(EventType::Write),
            sample(EventType::Remove),
        ];
        let mut stream = Vec::new();
        for tx in &txs {
            write_frame(&mut stream, &tx.encode().expect("encode")).expect("frame");
        }

        let read: Vec<_> = FrameReader::new(stream.as_slice())
            .collect::<Result<_, _>>()
            .expect("read frames");
        assert_eq!(read, txs);
    }

    #[test]
    fn test_frame_reader_reports_truncation() {
        let record = sample(EventType::Create).encode().expect("encode");
        let mut stream = Vec::new();
        write_frame(&mut stream, &record).expect("frame");
        stream.truncate(stream.len() - 1);

        let mut reader = FrameReader::new(stream.as_slice());
        assert!(matches!(
            reader.next(),
            Some(Err(DecodeError::Truncated { expected, found })) if found + 1 == expected
        ));

        let mut reader = FrameReader::new(&[1_u8, 0][..]);
        assert!(matches!(
            reader.next(),
            Some(Err(DecodeError::Truncated { expected: 4, found: 2 }))
        ));
    }

    #[test]
    fn test_json_shape() {
        let tx = sample(EventType::Create);
        let value = serde_json::to_value(&tx).expect("serialize");
        assert_eq!(value["type"], "create");
        assert_eq!(value["name"], "new-file.txt");
        assert_eq!(value["uuid"], tx.uuid.to_string());
    }
}
