//! Message framing.
//!
//! Frame format: `[magic: u8][message id: compact][arguments: tagged values...]`.
//! A ping frame is the single byte `PING_MAGIC`.

use crate::codec::{write_compact, ByteReader, CodecError, Value};

/// Leading byte of every protocol message.
pub const MESSAGE_MAGIC: u8 = 0x6B;

/// Leading (and only) byte of a keep-alive ping.
pub const PING_MAGIC: u8 = 0x3F;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alive; answered with an identical ping.
    Ping,
    /// Protocol message with its ordered arguments.
    Message {
        /// Numeric message id from the session's message table.
        id: u32,
        /// Ordered, typed arguments.
        args: Vec<Value>,
    },
}

/// Encode a frame to bytes.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::Ping => vec![PING_MAGIC],
        Frame::Message { id, args } => {
            let mut out = Vec::with_capacity(8 + args.len() * 5);
            out.push(MESSAGE_MAGIC);
            write_compact(&mut out, *id);
            for arg in args {
                arg.encode(&mut out);
            }
            out
        }
    }
}

/// Decode a complete frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let mut reader = ByteReader::new(bytes);
    match reader.read_u8()? {
        PING_MAGIC => Ok(Frame::Ping),
        MESSAGE_MAGIC => {
            let id = reader.read_compact()?;
            let mut args = Vec::new();
            while !reader.is_empty() {
                args.push(Value::decode(&mut reader)?);
            }
            Ok(Frame::Message { id, args })
        }
        other => Err(CodecError::UnknownMagic(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout() {
        let frame = Frame::Message {
            id: 200,
            args: vec![Value::Byte(1), Value::Bool(true)],
        };
        let bytes = encode_frame(&frame);
        assert_eq!(bytes, vec![MESSAGE_MAGIC, 0xC8, 0x01, 1, 1, 7, 1]);
        assert_eq!(decode_frame(&bytes).expect("decode"), frame);
    }

    #[test]
    fn test_message_without_args() {
        let frame = Frame::Message { id: 3, args: vec![] };
        let bytes = encode_frame(&frame);
        assert_eq!(bytes, vec![MESSAGE_MAGIC, 3]);
        assert_eq!(decode_frame(&bytes).expect("decode"), frame);
    }

    #[test]
    fn test_ping() {
        assert_eq!(encode_frame(&Frame::Ping), vec![PING_MAGIC]);
        assert_eq!(decode_frame(&[PING_MAGIC]).expect("decode"), Frame::Ping);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_frame(&[]), Err(CodecError::Truncated { .. })));
        assert_eq!(decode_frame(&[0x00, 1]), Err(CodecError::UnknownMagic(0)));
        assert!(matches!(
            decode_frame(&[MESSAGE_MAGIC]),
            Err(CodecError::Truncated { .. })
        ));
        assert_eq!(
            decode_frame(&[MESSAGE_MAGIC, 1, 99]),
            Err(CodecError::UnknownTag(99))
        );
    }
}
