//! The transaction log: identifiers, operations, entries, and the frame codec.
//!
//! Every committed Update transaction is recorded as one [`LogEntry`] — its
//! identifier plus the ordered list of bucket operations it performed. The
//! log is the durable representation of the store: the materialized bucket
//! state is rebuilt from it on open, and replication ships slices of it
//! between a primary's Export and a replica's Import.
//!
//! # Frame encoding
//!
//! Entries are written as self-delimiting frames so a reader can decode them
//! one at a time without knowing the total stream length:
//!
//! ```text
//! [magic "TLG1": 4][id: u64 LE][payload_len: u32 LE][payload]
//! ```
//!
//! The payload is the op list: a varint op count followed by each op as a
//! 1-byte kind tag plus its length-prefixed fields (bucket name, key, value).
//! No frame ever spans a partially committed transaction.

use std::fmt;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::value::{decode_str, decode_varint, encode_str, encode_varint, Value};

/// Magic prefix of every log frame.
pub const FRAME_MAGIC: &[u8; 4] = b"TLG1";

/// Fixed frame header size: magic + id + payload length.
pub const FRAME_HEADER_LEN: usize = 16;

/// Identifier of a committed Update transaction.
///
/// Assigned by the store at commit: strictly increasing, contiguous, never
/// reused. `TxnId::ZERO` is the identifier of an empty store — no transaction
/// ever carries it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(u64);

impl TxnId {
    /// The identifier before any commit; also the initial replication
    /// checkpoint of a fresh replica.
    pub const ZERO: TxnId = TxnId(0);

    /// Wraps a raw identifier.
    pub const fn new(raw: u64) -> Self {
        TxnId(raw)
    }

    /// Returns the raw integer form.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the identifier that follows this one.
    pub const fn next(self) -> TxnId {
        TxnId(self.0 + 1)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bucket-level operation recorded by an Update transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Create an empty bucket.
    CreateBucket {
        /// The bucket name.
        bucket: String,
    },
    /// Insert or overwrite a key.
    Put {
        /// The bucket the key lives in.
        bucket: String,
        /// The key.
        key: String,
        /// The value written.
        value: Value,
    },
    /// Remove a key entirely (idempotent).
    Delete {
        /// The bucket the key lives in.
        bucket: String,
        /// The key removed.
        key: String,
    },
}

const OP_CREATE_BUCKET: u8 = 1;
const OP_PUT: u8 = 2;
const OP_DELETE: u8 = 3;

impl Op {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Op::CreateBucket { bucket } => {
                buf.push(OP_CREATE_BUCKET);
                encode_str(bucket, buf)?;
            },
            Op::Put { bucket, key, value } => {
                buf.push(OP_PUT);
                encode_str(bucket, buf)?;
                encode_str(key, buf)?;
                value.encode(buf)?;
            },
            Op::Delete { bucket, key } => {
                buf.push(OP_DELETE);
                encode_str(bucket, buf)?;
                encode_str(key, buf)?;
            },
        }
        Ok(())
    }

    fn decode(reader: &mut impl Read) -> Result<Op> {
        let kind = reader
            .read_u8()
            .map_err(|_| Error::Decode { reason: "truncated op kind".to_string() })?;

        match kind {
            OP_CREATE_BUCKET => Ok(Op::CreateBucket { bucket: decode_str(reader)? }),
            OP_PUT => Ok(Op::Put {
                bucket: decode_str(reader)?,
                key: decode_str(reader)?,
                value: Value::decode(reader)?,
            }),
            OP_DELETE => Ok(Op::Delete { bucket: decode_str(reader)?, key: decode_str(reader)? }),
            other => Err(Error::Decode { reason: format!("unknown op kind: {other}") }),
        }
    }
}

/// One committed transaction: its identifier and full operation set, in the
/// order the caller composed them.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// The transaction identifier assigned at commit.
    pub id: TxnId,
    /// The ordered bucket operations the transaction performed.
    pub ops: Vec<Op>,
}

impl LogEntry {
    /// Encodes the entry as one self-delimiting frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the op payload exceeds the u32
    /// frame limit, or [`Error::Io`] if the sink write fails.
    pub fn encode(&self, sink: &mut dyn Write) -> Result<()> {
        let mut payload = Vec::new();
        encode_varint(self.ops.len() as u32, &mut payload);
        for op in &self.ops {
            op.encode(&mut payload)?;
        }

        let payload_len = u32::try_from(payload.len()).map_err(|_| Error::InvalidValue {
            reason: format!("log entry payload of {} bytes exceeds frame limit", payload.len()),
        })?;

        sink.write_all(FRAME_MAGIC)?;
        sink.write_u64::<LittleEndian>(self.id.raw())?;
        sink.write_u32::<LittleEndian>(payload_len)?;
        sink.write_all(&payload)?;
        Ok(())
    }

    /// Decodes one frame from a reader.
    ///
    /// Returns `Ok(None)` on a clean end of stream (zero bytes before the
    /// next frame).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the frame is truncated, carries a bad
    /// magic, or its payload is malformed.
    pub fn decode(reader: &mut impl Read) -> Result<Option<LogEntry>> {
        Self::decode_frame(reader).map_err(|err| Error::Decode { reason: err.into_reason() })
    }

    /// Frame decoding with the truncated/malformed distinction intact. Log
    /// recovery needs it; the public surface folds both into a decode error.
    fn decode_frame(reader: &mut impl Read) -> std::result::Result<Option<LogEntry>, FrameError> {
        let truncated_io = |err: std::io::Error| FrameError::Truncated(err.to_string());

        let mut header = [0u8; FRAME_HEADER_LEN];
        match read_exact_or_eof(reader, &mut header).map_err(truncated_io)? {
            HeaderRead::Eof => return Ok(None),
            HeaderRead::Partial => {
                return Err(FrameError::Truncated("truncated frame header".to_string()));
            },
            HeaderRead::Full => {},
        }

        if &header[..4] != FRAME_MAGIC {
            return Err(FrameError::Malformed("invalid frame magic".to_string()));
        }

        let mut fields = Cursor::new(&header[4..]);
        let id = fields.read_u64::<LittleEndian>().map_err(truncated_io)?;
        let payload_len = fields.read_u32::<LittleEndian>().map_err(truncated_io)? as usize;

        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .map_err(|_| FrameError::Truncated(format!("truncated frame payload for {id}")))?;

        // Every byte the header promised is present from here on; a parse
        // failure inside the payload is corrupt content, not a torn tail.
        let malformed = |err: Error| FrameError::Malformed(err.to_string());

        let mut payload = Cursor::new(payload);
        let op_count = decode_varint(&mut payload).map_err(malformed)?;
        let mut ops = Vec::with_capacity(op_count as usize);
        for _ in 0..op_count {
            ops.push(Op::decode(&mut payload).map_err(malformed)?);
        }

        if (payload.position() as usize) != payload.get_ref().len() {
            return Err(FrameError::Malformed(format!(
                "frame for {id} contains unexpected trailing bytes"
            )));
        }

        Ok(Some(LogEntry { id: TxnId::new(id), ops }))
    }
}

/// A frame cut short by end of input versus one whose bytes are all present
/// but do not parse. Only the former is a recoverable log tail.
enum FrameError {
    Truncated(String),
    Malformed(String),
}

impl FrameError {
    fn into_reason(self) -> String {
        match self {
            FrameError::Truncated(reason) | FrameError::Malformed(reason) => reason,
        }
    }
}

enum HeaderRead {
    Full,
    Partial,
    Eof,
}

/// Reads exactly `buf.len()` bytes, distinguishing a clean EOF (no bytes)
/// from a torn one (some bytes, then EOF).
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<HeaderRead> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 { HeaderRead::Eof } else { HeaderRead::Partial });
        }
        filled += n;
    }
    Ok(HeaderRead::Full)
}

/// Decodes a complete stream of frames (e.g. an Import response) into
/// entries, in stream order.
///
/// # Errors
///
/// Returns [`Error::Decode`] on any malformed or truncated frame — a
/// replication stream, unlike a recovered log file, has no legitimate
/// partial tail.
pub fn decode_stream(reader: &mut impl Read) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    while let Some(entry) = LogEntry::decode(reader)? {
        entries.push(entry);
    }
    Ok(entries)
}

/// Decodes a recovered log file, tolerating a torn final frame.
///
/// Returns the decoded entries plus the byte length of the clean prefix. A
/// frame cut short by end of input (crash between append and sync) is not an
/// error — the caller truncates the backing store to the clean length. A
/// frame whose bytes are all present but malformed is fail-stop: committed
/// entries may follow it, so nothing can be truncated.
pub(crate) fn decode_log_bytes(bytes: &[u8]) -> Result<(Vec<LogEntry>, usize)> {
    let mut entries = Vec::new();
    let mut clean_len = 0usize;
    let mut cursor = Cursor::new(bytes);

    loop {
        match LogEntry::decode_frame(&mut cursor) {
            Ok(Some(entry)) => {
                entries.push(entry);
                clean_len = cursor.position() as usize;
            },
            Ok(None) => return Ok((entries, clean_len)),
            Err(FrameError::Truncated(_)) => return Ok((entries, clean_len)),
            Err(FrameError::Malformed(reason)) => return Err(Error::Corrupted { reason }),
        }
    }
}

/// The ordered, append-only record of committed transactions, addressable by
/// identifier.
///
/// Kept in memory behind the store's log lock; durability is the backend's
/// append stream. Appends and exports are serialized by the owning store, so
/// Export only ever observes fully committed entries.
#[derive(Debug, Default)]
pub(crate) struct TransactionLog {
    entries: Vec<LogEntry>,
    highest: TxnId,
}

impl TransactionLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rebuilds from recovered entries. Identifiers must already be strictly
    /// increasing and contiguous (the decode path enforces frame integrity;
    /// the store enforces ordering as it replays).
    pub(crate) fn from_entries(entries: Vec<LogEntry>) -> Self {
        let highest = entries.last().map_or(TxnId::ZERO, |entry| entry.id);
        Self { entries, highest }
    }

    pub(crate) fn highest(&self) -> TxnId {
        self.highest
    }

    pub(crate) fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.id, self.highest.next(), "log identifiers must be contiguous");
        self.highest = entry.id;
        self.entries.push(entry);
    }

    /// Writes every entry with identifier strictly greater than `since` into
    /// the sink, in increasing order.
    ///
    /// An empty result is valid ("already current"); `since` beyond the
    /// highest committed identifier is [`Error::InvalidTransactionId`].
    pub(crate) fn export_to(&self, since: TxnId, sink: &mut dyn Write) -> Result<()> {
        if since > self.highest {
            return Err(Error::InvalidTransactionId {
                requested: since.raw(),
                highest: self.highest.raw(),
            });
        }

        // Identifiers are contiguous from 1, so the slice offset is direct.
        let start = since.raw() as usize;
        for entry in &self.entries[start..] {
            entry.encode(sink)?;
        }
        Ok(())
    }
}
