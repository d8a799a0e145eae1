//! Typed value encoding for the game protocol.
//!
//! Every value on the wire is `[type tag][payload]`. Strings and byte arrays
//! carry a compact-integer length prefix; fixed-width integers use the byte
//! order the server expects (int16/int32 big-endian, int64 little-endian,
//! floats little-endian).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Maximum number of bytes a compact integer may occupy (32 bits / 7 bits per byte).
pub const MAX_COMPACT_LEN: usize = 5;

/// Decoding failures. All variants are "malformed message" conditions and are
/// fatal for the connection that produced the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ended before a complete value could be read.
    #[error("malformed message: truncated at offset {offset} (needed {needed} more bytes)")]
    Truncated {
        /// Reader position when the shortfall was detected.
        offset: usize,
        /// Number of bytes missing.
        needed: usize,
    },
    /// A value header carried a tag outside the known set.
    #[error("malformed message: unknown type tag {0:#04x}")]
    UnknownTag(u8),
    /// A frame started with a byte that is neither the message nor the ping magic.
    #[error("malformed message: unknown frame magic {0:#04x}")]
    UnknownMagic(u8),
    /// A compact integer did not terminate within 32 bits.
    #[error("malformed message: compact integer overflows 32 bits")]
    CompactOverflow,
    /// A string payload was not valid UTF-8.
    #[error("malformed message: string is not valid UTF-8")]
    InvalidUtf8,
    /// A bool payload was neither 0 nor 1.
    #[error("malformed message: invalid bool byte {0}")]
    InvalidBool(u8),
}

/// Type tag of a protocol value, without the payload.
///
/// Block schemas describe their extra arguments as a list of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ValueKind {
    /// UTF-8 string.
    String = 0,
    /// Unsigned byte.
    Byte = 1,
    /// Signed 16-bit integer.
    Int16 = 2,
    /// Signed 32-bit integer.
    Int32 = 3,
    /// Signed 64-bit integer.
    Int64 = 4,
    /// 32-bit float.
    Float32 = 5,
    /// 64-bit float.
    Float64 = 6,
    /// Boolean.
    Bool = 7,
    /// Raw byte array.
    Bytes = 8,
}

impl ValueKind {
    /// Wire tag for this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::String),
            1 => Ok(Self::Byte),
            2 => Ok(Self::Int16),
            3 => Ok(Self::Int32),
            4 => Ok(Self::Int64),
            5 => Ok(Self::Float32),
            6 => Ok(Self::Float64),
            7 => Ok(Self::Bool),
            8 => Ok(Self::Bytes),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A typed protocol value.
///
/// Equality and hashing treat floats by their bit pattern, so a value always
/// equals itself (including NaN) and `0.0` differs from `-0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 string.
    String(String),
    /// Unsigned byte.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// Raw byte array.
    Bytes(Vec<u8>),
}

impl Value {
    /// Kind (type tag) of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Byte(_) => ValueKind::Byte,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Append `[tag][payload]` to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind().tag());
        self.encode_untagged(out);
    }

    /// Append only the payload; the reader must already know the kind.
    pub fn encode_untagged(&self, out: &mut Vec<u8>) {
        match self {
            Value::String(s) => {
                write_compact(out, s.len() as u32);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Byte(b) => out.push(*b),
            Value::Int16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Bool(v) => out.push(u8::from(*v)),
            Value::Bytes(bytes) => {
                write_compact(out, bytes.len() as u32);
                out.extend_from_slice(bytes);
            }
        }
    }

    /// Read one tagged value.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let kind = ValueKind::from_tag(reader.read_u8()?)?;
        Self::decode_untagged(reader, kind)
    }

    /// Read a payload of a known kind.
    pub fn decode_untagged(reader: &mut ByteReader<'_>, kind: ValueKind) -> Result<Self, CodecError> {
        let value = match kind {
            ValueKind::String => {
                let len = reader.read_compact()? as usize;
                let bytes = reader.read_slice(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Value::String(s.to_owned())
            }
            ValueKind::Byte => Value::Byte(reader.read_u8()?),
            ValueKind::Int16 => Value::Int16(i16::from_be_bytes(reader.read_array()?)),
            ValueKind::Int32 => Value::Int32(i32::from_be_bytes(reader.read_array()?)),
            ValueKind::Int64 => Value::Int64(i64::from_le_bytes(reader.read_array()?)),
            ValueKind::Float32 => Value::Float32(f32::from_le_bytes(reader.read_array()?)),
            ValueKind::Float64 => Value::Float64(f64::from_le_bytes(reader.read_array()?)),
            ValueKind::Bool => match reader.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(CodecError::InvalidBool(other)),
            },
            ValueKind::Bytes => {
                let len = reader.read_compact()? as usize;
                Value::Bytes(reader.read_slice(len)?.to_vec())
            }
        };
        Ok(value)
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any integer kind to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the byte-array payload, if this is a byte array.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Byte(v) => v.hash(state),
            Value::Int16(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Bytes(b) => b.hash(state),
        }
    }
}

/// Append a compact (7-bit continuation) unsigned integer.
pub fn write_compact(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read a compact integer from the start of `bytes`, returning the value and
/// the number of bytes consumed.
pub fn read_compact(bytes: &[u8]) -> Result<(u32, usize), CodecError> {
    let mut reader = ByteReader::new(bytes);
    let value = reader.read_compact()?;
    Ok((value, reader.position()))
}

/// Bounds-checked cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    /// Read exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Borrow the next `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a compact integer.
    pub fn read_compact(&mut self) -> Result<u32, CodecError> {
        let mut value: u32 = 0;
        for index in 0..MAX_COMPACT_LEN {
            let byte = self.read_u8()?;
            let group = u32::from(byte & 0x7F);
            // The fifth byte only has room for the top 4 bits.
            if index == MAX_COMPACT_LEN - 1 && (byte & 0x80 != 0 || group > 0x0F) {
                return Err(CodecError::CompactOverflow);
            }
            value |= group << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::CompactOverflow)
    }
}
