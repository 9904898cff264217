//! Typed values and their byte encoding.
//!
//! A [`Value`] is a tagged variant rather than an opaque dynamic payload:
//! callers convert to a concrete shape through explicit, fallible views
//! (`as_bytes`, `as_int`, ...) and a mismatch surfaces [`Error::InvalidType`]
//! instead of a runtime downcast.
//!
//! The wire form is self-delimiting: a 1-byte tag, a varint payload length,
//! then the payload (integers little-endian). The same encoding is used for
//! values at rest in the transaction log and for values in flight between a
//! primary's Export and a replica's Import.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// Maximum encoded payload size for a single value (u32 frame limit).
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// A typed value stored under a key in a bucket.
///
/// Values round-trip losslessly through [`encode`](Value::encode) /
/// [`decode`](Value::decode) and compare equal after a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Arbitrary bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// Boolean flag.
    Bool(bool),
}

// Wire tags. Never reuse a retired tag.
const TAG_BYTES: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_UINT: u8 = 4;
const TAG_BOOL: u8 = 5;

impl Value {
    /// Returns the name of the stored variant, for error reporting.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Bool(_) => "bool",
        }
    }

    /// Views the value as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidType`] if the value is not `Bytes`.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(Error::InvalidType { expected: "bytes", found: other.type_name() }),
        }
    }

    /// Views the value as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidType`] if the value is not `Text`.
    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(Error::InvalidType { expected: "text", found: other.type_name() }),
        }
    }

    /// Views the value as a signed integer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidType`] if the value is not `Int`.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(Error::InvalidType { expected: "int", found: other.type_name() }),
        }
    }

    /// Views the value as an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidType`] if the value is not `Uint`.
    pub fn as_uint(&self) -> Result<u64> {
        match self {
            Value::Uint(v) => Ok(*v),
            other => Err(Error::InvalidType { expected: "uint", found: other.type_name() }),
        }
    }

    /// Views the value as a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidType`] if the value is not `Bool`.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(Error::InvalidType { expected: "bool", found: other.type_name() }),
        }
    }

    /// Encodes the value into `buf` as tag + varint length + payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the payload exceeds [`MAX_VALUE_LEN`].
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Value::Bytes(b) => {
                check_len(b.len())?;
                buf.push(TAG_BYTES);
                encode_varint(b.len() as u32, buf);
                buf.extend_from_slice(b);
            },
            Value::Text(s) => {
                check_len(s.len())?;
                buf.push(TAG_TEXT);
                encode_varint(s.len() as u32, buf);
                buf.extend_from_slice(s.as_bytes());
            },
            Value::Int(v) => {
                buf.push(TAG_INT);
                encode_varint(8, buf);
                buf.extend_from_slice(&v.to_le_bytes());
            },
            Value::Uint(v) => {
                buf.push(TAG_UINT);
                encode_varint(8, buf);
                buf.extend_from_slice(&v.to_le_bytes());
            },
            Value::Bool(v) => {
                buf.push(TAG_BOOL);
                encode_varint(1, buf);
                buf.push(u8::from(*v));
            },
        }
        Ok(())
    }

    /// Decodes one value from a reader positioned at its tag byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the tag is unknown, the payload is
    /// truncated, or the payload does not match the tag's shape.
    pub fn decode(reader: &mut impl Read) -> Result<Value> {
        let tag = reader.read_u8().map_err(|_| decode_err("truncated value tag"))?;
        let len = decode_varint(reader)? as usize;

        match tag {
            TAG_BYTES => {
                let mut payload = vec![0u8; len];
                reader.read_exact(&mut payload).map_err(|_| decode_err("truncated bytes value"))?;
                Ok(Value::Bytes(payload))
            },
            TAG_TEXT => {
                let mut payload = vec![0u8; len];
                reader.read_exact(&mut payload).map_err(|_| decode_err("truncated text value"))?;
                let text = String::from_utf8(payload)
                    .map_err(|_| decode_err("text value is not valid UTF-8"))?;
                Ok(Value::Text(text))
            },
            TAG_INT => {
                if len != 8 {
                    return Err(decode_err("int value must be 8 bytes"));
                }
                let v = reader
                    .read_i64::<LittleEndian>()
                    .map_err(|_| decode_err("truncated int value"))?;
                Ok(Value::Int(v))
            },
            TAG_UINT => {
                if len != 8 {
                    return Err(decode_err("uint value must be 8 bytes"));
                }
                let v = reader
                    .read_u64::<LittleEndian>()
                    .map_err(|_| decode_err("truncated uint value"))?;
                Ok(Value::Uint(v))
            },
            TAG_BOOL => {
                if len != 1 {
                    return Err(decode_err("bool value must be 1 byte"));
                }
                let v = reader.read_u8().map_err(|_| decode_err("truncated bool value"))?;
                match v {
                    0 => Ok(Value::Bool(false)),
                    1 => Ok(Value::Bool(true)),
                    other => Err(decode_err(&format!("invalid bool payload: {other}"))),
                }
            },
            other => Err(decode_err(&format!("unknown value tag: {other}"))),
        }
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_VALUE_LEN {
        return Err(Error::InvalidValue {
            reason: format!("payload of {len} bytes exceeds frame limit"),
        });
    }
    Ok(())
}

fn decode_err(reason: &str) -> Error {
    Error::Decode { reason: reason.to_string() }
}

// ============================================================================
// Varint Utilities
// ============================================================================

/// Encodes a u32 as a varint (1-5 bytes).
pub(crate) fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decodes a varint from a reader.
pub(crate) fn decode_varint(reader: &mut impl Read) -> Result<u32> {
    let mut value: u32 = 0;

    for shift in (0..35).step_by(7) {
        let byte = reader.read_u8().map_err(|_| decode_err("truncated varint"))?;
        value |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(decode_err("varint too long"))
}

/// Encodes a length-prefixed string (varint length + UTF-8 bytes).
pub(crate) fn encode_str(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    check_len(s.len())?;
    encode_varint(s.len() as u32, buf);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Decodes a length-prefixed string.
pub(crate) fn decode_str(reader: &mut impl Read) -> Result<String> {
    let len = decode_varint(reader)? as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|_| decode_err("truncated string"))?;
    String::from_utf8(payload).map_err(|_| decode_err("string is not valid UTF-8"))
}
