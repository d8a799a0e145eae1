#![warn(missing_docs)]
//! Wire-level primitives shared across the workspace: typed protocol values,
//! compact integers and message frames.

pub mod codec;
pub mod frame;

pub use codec::{read_compact, write_compact, ByteReader, CodecError, Value, ValueKind};
pub use frame::{decode_frame, encode_frame, Frame, MESSAGE_MAGIC, PING_MAGIC};
