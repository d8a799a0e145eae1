//! Typed protocol messages.
//!
//! Message ids are not fixed: the bootstrap [`MessageTable`] maps the names
//! below to the ids a given server uses. Arguments are ordered tagged values
//! (see `tilesync_core::Frame`).

use thiserror::Error;
use tilesync_core::{decode_frame, encode_frame, CodecError, Frame, Value, ValueKind};
use tilesync_world::{Block, BlockError, BlockSchema, Layer, Position, Structure, StructureError};
use tracing::trace;

use crate::bootstrap::MessageTable;

/// World snapshot sent once after joining.
pub const INIT: &str = "init";
/// Client acknowledgement of [`INIT`].
pub const INIT_RECEIVED: &str = "init_received";
/// Block placement, in both directions.
pub const BLOCK_PLACED: &str = "block_placed";
/// Another player entered the world.
pub const PLAYER_JOINED: &str = "player_joined";
/// A player left the world.
pub const PLAYER_LEFT: &str = "player_left";

/// Largest world edge the protocol can address (positions travel as u16).
pub const MAX_WORLD_DIMENSION: u32 = u16::MAX as u32;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame itself is malformed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The message table has no id for a message we need to send.
    #[error("message {0:?} is not in the message table")]
    UnknownMessageName(&'static str),
    /// A known message carried arguments of the wrong shape.
    #[error("malformed {message} message: {reason}")]
    UnexpectedArguments {
        /// Message name.
        message: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// Layer byte other than 0 or 1.
    #[error("invalid layer {0}")]
    InvalidLayer(u8),
    /// A position does not fit the wire's u16 coordinates.
    #[error("position ({x}, {y}) cannot be encoded")]
    PositionOverflow {
        /// X coordinate.
        x: u32,
        /// Y coordinate.
        y: u32,
    },
    /// Block id or extra data rejected by the schema.
    #[error(transparent)]
    Block(#[from] BlockError),
    /// The world snapshot could not be decoded.
    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// One block written at one or more positions of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlaced {
    /// Player who placed the block. Present on server broadcasts only.
    pub player_id: Option<i32>,
    /// Target layer.
    pub layer: Layer,
    /// Block written at every position.
    pub block: Block,
    /// Target cells.
    pub positions: Vec<Position>,
}

/// Contents of the [`INIT`] message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSnapshot {
    /// Id the server assigned to this connection.
    pub player_id: i32,
    /// World title.
    pub title: String,
    /// World owner's name.
    pub owner: String,
    /// Play counter.
    pub play_count: i32,
    /// Full grid.
    pub world: Structure,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Keep-alive; must be answered.
    Ping,
    /// Initial world snapshot.
    Init(InitSnapshot),
    /// Broadcast of a placement (ours or another player's).
    BlockPlaced(BlockPlaced),
    /// Player entered.
    PlayerJoined {
        /// Player id.
        id: i32,
        /// Display name.
        name: String,
    },
    /// Player left.
    PlayerLeft {
        /// Player id.
        id: i32,
    },
    /// Message this client does not handle.
    Unknown {
        /// Wire id.
        id: u32,
        /// Name from the message table, if any.
        name: Option<String>,
    },
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Keep-alive reply.
    Ping,
    /// Acknowledges [`INIT`].
    InitReceived,
    /// Place one block at a batch of positions.
    PlaceBlocks(BlockPlaced),
}

struct Args {
    message: &'static str,
    values: std::vec::IntoIter<Value>,
}

impl Args {
    fn new(message: &'static str, values: Vec<Value>) -> Self {
        Self {
            message,
            values: values.into_iter(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::UnexpectedArguments {
            message: self.message,
            reason: reason.into(),
        }
    }

    fn take<T>(
        &mut self,
        field: &str,
        kind: ValueKind,
        extract: impl FnOnce(Value) -> Option<T>,
    ) -> Result<T, ProtocolError> {
        match self.values.next() {
            Some(value) if value.kind() == kind => {
                extract(value).ok_or_else(|| self.error(format!("{field}: expected {kind}")))
            }
            Some(value) => Err(self.error(format!(
                "{field}: expected {kind}, found {}",
                value.kind()
            ))),
            None => Err(self.error(format!("missing {field}"))),
        }
    }

    fn int32(&mut self, field: &str) -> Result<i32, ProtocolError> {
        self.take(field, ValueKind::Int32, |v| match v {
            Value::Int32(v) => Some(v),
            _ => None,
        })
    }

    fn byte(&mut self, field: &str) -> Result<u8, ProtocolError> {
        self.take(field, ValueKind::Byte, |v| match v {
            Value::Byte(v) => Some(v),
            _ => None,
        })
    }

    fn string(&mut self, field: &str) -> Result<String, ProtocolError> {
        self.take(field, ValueKind::String, |v| match v {
            Value::String(v) => Some(v),
            _ => None,
        })
    }

    fn bytes(&mut self, field: &str) -> Result<Vec<u8>, ProtocolError> {
        self.take(field, ValueKind::Bytes, |v| match v {
            Value::Bytes(v) => Some(v),
            _ => None,
        })
    }

    fn rest(self) -> Vec<Value> {
        self.values.collect()
    }

    fn finish(mut self) -> Result<(), ProtocolError> {
        match self.values.next() {
            None => Ok(()),
            Some(extra) => Err(self.error(format!("unexpected trailing {}", extra.kind()))),
        }
    }
}

fn message_id(table: &MessageTable, name: &'static str) -> Result<u32, ProtocolError> {
    table.id(name).ok_or(ProtocolError::UnknownMessageName(name))
}

fn encode_positions(positions: &[Position]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(positions.len() * 4);
    for &(x, y) in positions {
        let (wx, wy) = match (u16::try_from(x), u16::try_from(y)) {
            (Ok(wx), Ok(wy)) => (wx, wy),
            _ => return Err(ProtocolError::PositionOverflow { x, y }),
        };
        out.extend_from_slice(&wx.to_le_bytes());
        out.extend_from_slice(&wy.to_le_bytes());
    }
    Ok(out)
}

fn decode_positions(args: &Args, bytes: &[u8]) -> Result<Vec<Position>, ProtocolError> {
    if bytes.len() % 4 != 0 {
        return Err(args.error(format!(
            "positions length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|pair| {
            let x = u16::from_le_bytes([pair[0], pair[1]]);
            let y = u16::from_le_bytes([pair[2], pair[3]]);
            (u32::from(x), u32::from(y))
        })
        .collect())
}

fn push_placement(args: &mut Vec<Value>, placed: &BlockPlaced) -> Result<(), ProtocolError> {
    let block_id = i32::try_from(placed.block.id()).map_err(|_| {
        ProtocolError::UnexpectedArguments {
            message: BLOCK_PLACED,
            reason: format!("block id {} does not fit int32", placed.block.id()),
        }
    })?;
    args.push(Value::Byte(placed.layer as u8));
    args.push(Value::Int32(block_id));
    args.push(Value::Bytes(encode_positions(&placed.positions)?));
    args.extend(placed.block.data().iter().cloned());
    Ok(())
}

fn read_placement(
    schema: &BlockSchema,
    mut args: Args,
    player_id: Option<i32>,
) -> Result<BlockPlaced, ProtocolError> {
    let layer_byte = args.byte("layer")?;
    let layer = Layer::try_from(layer_byte).map_err(ProtocolError::InvalidLayer)?;
    let raw_id = args.int32("block_id")?;
    let id = u32::try_from(raw_id).map_err(|_| args.error(format!("negative block id {raw_id}")))?;
    let positions = args.bytes("positions")?;
    let positions = decode_positions(&args, &positions)?;
    let block = Block::new(schema, id, args.rest())?;
    Ok(BlockPlaced {
        player_id,
        layer,
        block,
        positions,
    })
}

fn read_dimension(args: &Args, field: &str, value: i32) -> Result<u32, ProtocolError> {
    u32::try_from(value)
        .ok()
        .filter(|v| (1..=MAX_WORLD_DIMENSION).contains(v))
        .ok_or_else(|| args.error(format!("{field} {value} out of range")))
}

/// Encode a client message into a frame.
pub fn encode_client_message(
    table: &MessageTable,
    message: &ClientMessage,
) -> Result<Vec<u8>, ProtocolError> {
    let frame = match message {
        ClientMessage::Ping => Frame::Ping,
        ClientMessage::InitReceived => Frame::Message {
            id: message_id(table, INIT_RECEIVED)?,
            args: Vec::new(),
        },
        ClientMessage::PlaceBlocks(placed) => {
            let mut args = Vec::with_capacity(3 + placed.block.data().len());
            push_placement(&mut args, placed)?;
            Frame::Message {
                id: message_id(table, BLOCK_PLACED)?,
                args,
            }
        }
    };
    Ok(encode_frame(&frame))
}

/// Decode a frame sent by a client.
///
/// Used by server-side tooling such as test harnesses.
pub fn decode_client_message(
    table: &MessageTable,
    schema: &BlockSchema,
    bytes: &[u8],
) -> Result<Option<ClientMessage>, ProtocolError> {
    let (id, args) = match decode_frame(bytes)? {
        Frame::Ping => return Ok(Some(ClientMessage::Ping)),
        Frame::Message { id, args } => (id, args),
    };
    match table.name(id) {
        Some(INIT_RECEIVED) => {
            Args::new(INIT_RECEIVED, args).finish()?;
            Ok(Some(ClientMessage::InitReceived))
        }
        Some(BLOCK_PLACED) => {
            let placed = read_placement(schema, Args::new(BLOCK_PLACED, args), None)?;
            Ok(Some(ClientMessage::PlaceBlocks(placed)))
        }
        _ => Ok(None),
    }
}

/// Encode a server message into a frame.
///
/// A [`BlockPlaced`] without a player id is broadcast as player 0.
pub fn encode_server_message(
    table: &MessageTable,
    message: &ServerMessage,
) -> Result<Vec<u8>, ProtocolError> {
    let frame = match message {
        ServerMessage::Ping => Frame::Ping,
        ServerMessage::Init(init) => Frame::Message {
            id: message_id(table, INIT)?,
            args: vec![
                Value::Int32(init.player_id),
                Value::String(init.title.clone()),
                Value::String(init.owner.clone()),
                Value::Int32(init.play_count),
                Value::Int32(init.world.width() as i32),
                Value::Int32(init.world.height() as i32),
                Value::Bytes(init.world.encode_id_stream()),
            ],
        },
        ServerMessage::BlockPlaced(placed) => {
            let mut args = Vec::with_capacity(4 + placed.block.data().len());
            args.push(Value::Int32(placed.player_id.unwrap_or_default()));
            push_placement(&mut args, placed)?;
            Frame::Message {
                id: message_id(table, BLOCK_PLACED)?,
                args,
            }
        }
        ServerMessage::PlayerJoined { id, name } => Frame::Message {
            id: message_id(table, PLAYER_JOINED)?,
            args: vec![Value::Int32(*id), Value::String(name.clone())],
        },
        ServerMessage::PlayerLeft { id } => Frame::Message {
            id: message_id(table, PLAYER_LEFT)?,
            args: vec![Value::Int32(*id)],
        },
        ServerMessage::Unknown { id, .. } => Frame::Message {
            id: *id,
            args: Vec::new(),
        },
    };
    Ok(encode_frame(&frame))
}

/// Decode a frame sent by the server.
///
/// Ids the table does not know, and known names this client does not
/// handle, come back as [`ServerMessage::Unknown`].
pub fn decode_server_message(
    table: &MessageTable,
    schema: &BlockSchema,
    bytes: &[u8],
) -> Result<ServerMessage, ProtocolError> {
    let (id, args) = match decode_frame(bytes)? {
        Frame::Ping => return Ok(ServerMessage::Ping),
        Frame::Message { id, args } => (id, args),
    };
    let name = table.name(id);
    trace!(id, ?name, args = args.len(), "decoding server message");

    match name {
        Some(INIT) => {
            let mut args = Args::new(INIT, args);
            let player_id = args.int32("player_id")?;
            let title = args.string("title")?;
            let owner = args.string("owner")?;
            let play_count = args.int32("play_count")?;
            let width = args.int32("width")?;
            let width = read_dimension(&args, "width", width)?;
            let height = args.int32("height")?;
            let height = read_dimension(&args, "height", height)?;
            let data = args.bytes("world_data")?;
            args.finish()?;
            let world = Structure::decode_id_stream(schema, width, height, &data)?;
            Ok(ServerMessage::Init(InitSnapshot {
                player_id,
                title,
                owner,
                play_count,
                world,
            }))
        }
        Some(BLOCK_PLACED) => {
            let mut args = Args::new(BLOCK_PLACED, args);
            let player_id = args.int32("player_id")?;
            let placed = read_placement(schema, args, Some(player_id))?;
            Ok(ServerMessage::BlockPlaced(placed))
        }
        Some(PLAYER_JOINED) => {
            let mut args = Args::new(PLAYER_JOINED, args);
            let id = args.int32("id")?;
            let name = args.string("name")?;
            args.finish()?;
            Ok(ServerMessage::PlayerJoined { id, name })
        }
        Some(PLAYER_LEFT) => {
            let mut args = Args::new(PLAYER_LEFT, args);
            let id = args.int32("id")?;
            args.finish()?;
            Ok(ServerMessage::PlayerLeft { id })
        }
        other => Ok(ServerMessage::Unknown {
            id,
            name: other.map(str::to_string),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_core::{PING_MAGIC, MESSAGE_MAGIC};
    use tilesync_world::BlockEntry;

    fn table() -> MessageTable {
        MessageTable::new([
            (INIT, 0),
            (INIT_RECEIVED, 1),
            (BLOCK_PLACED, 2),
            (PLAYER_JOINED, 3),
            (PLAYER_LEFT, 4),
            ("chat", 5),
        ])
        .expect("table")
    }

    fn schema() -> BlockSchema {
        BlockSchema::new(vec![
            BlockEntry::simple(0, "empty"),
            BlockEntry::simple(1, "stone"),
            BlockEntry::with_args(2, "sign", vec![ValueKind::String, ValueKind::Int32]),
        ])
        .expect("schema")
    }

    #[test]
    fn test_place_blocks_wire_layout() {
        let schema = schema();
        let placed = BlockPlaced {
            player_id: None,
            layer: Layer::Foreground,
            block: Block::named(&schema, "stone").unwrap(),
            positions: vec![(1, 2), (258, 0)],
        };
        let bytes = encode_client_message(&table(), &ClientMessage::PlaceBlocks(placed)).unwrap();
        assert_eq!(
            bytes,
            vec![
                MESSAGE_MAGIC,
                2,
                1, 1, // Byte 1
                3, 0, 0, 0, 1, // Int32 1
                8, 8, 1, 0, 2, 0, 2, 1, 0, 0, // Bytes, 8 long
            ]
        );
    }

    #[test]
    fn test_client_placement_roundtrip_with_extra_data() {
        let schema = schema();
        let block = Block::new(&schema, 2, vec![Value::String("hi".into()), Value::Int32(-5)]).unwrap();
        let placed = BlockPlaced {
            player_id: None,
            layer: Layer::Background,
            block,
            positions: vec![(0, 0), (65535, 65535)],
        };
        let message = ClientMessage::PlaceBlocks(placed);
        let bytes = encode_client_message(&table(), &message).unwrap();
        let decoded = decode_client_message(&table(), &schema, &bytes).unwrap();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn test_server_broadcast_carries_player_id() {
        let schema = schema();
        let placed = BlockPlaced {
            player_id: Some(42),
            layer: Layer::Foreground,
            block: Block::named(&schema, "stone").unwrap(),
            positions: vec![(3, 4)],
        };
        let message = ServerMessage::BlockPlaced(placed);
        let bytes = encode_server_message(&table(), &message).unwrap();
        assert_eq!(decode_server_message(&table(), &schema, &bytes).unwrap(), message);
    }

    #[test]
    fn test_init_roundtrip() {
        let schema = schema();
        let mut world = Structure::new(4, 3).unwrap();
        world
            .set(Layer::Foreground, 2, 1, Block::named(&schema, "stone").unwrap())
            .unwrap();
        let message = ServerMessage::Init(InitSnapshot {
            player_id: 7,
            title: "Arena".into(),
            owner: "host".into(),
            play_count: 12,
            world,
        });
        let bytes = encode_server_message(&table(), &message).unwrap();
        assert_eq!(decode_server_message(&table(), &schema, &bytes).unwrap(), message);
    }

    #[test]
    fn test_ping_and_unknown() {
        let schema = schema();
        assert_eq!(
            decode_server_message(&table(), &schema, &[PING_MAGIC]).unwrap(),
            ServerMessage::Ping
        );
        assert_eq!(
            encode_client_message(&table(), &ClientMessage::Ping).unwrap(),
            vec![PING_MAGIC]
        );

        let chat = encode_frame(&Frame::Message {
            id: 5,
            args: vec![Value::String("hello".into())],
        });
        assert_eq!(
            decode_server_message(&table(), &schema, &chat).unwrap(),
            ServerMessage::Unknown {
                id: 5,
                name: Some("chat".into())
            }
        );

        let unlisted = encode_frame(&Frame::Message { id: 99, args: vec![] });
        assert!(matches!(
            decode_server_message(&table(), &schema, &unlisted).unwrap(),
            ServerMessage::Unknown { id: 99, name: None }
        ));
    }

    #[test]
    fn test_malformed_arguments() {
        let schema = schema();
        let wrong_kind = encode_frame(&Frame::Message {
            id: 4,
            args: vec![Value::String("x".into())],
        });
        assert!(matches!(
            decode_server_message(&table(), &schema, &wrong_kind),
            Err(ProtocolError::UnexpectedArguments { message: PLAYER_LEFT, .. })
        ));

        let odd_positions = encode_frame(&Frame::Message {
            id: 2,
            args: vec![
                Value::Int32(1),
                Value::Byte(0),
                Value::Int32(1),
                Value::Bytes(vec![1, 2, 3]),
            ],
        });
        assert!(matches!(
            decode_server_message(&table(), &schema, &odd_positions),
            Err(ProtocolError::UnexpectedArguments { .. })
        ));

        let bad_layer = encode_frame(&Frame::Message {
            id: 2,
            args: vec![
                Value::Int32(1),
                Value::Byte(2),
                Value::Int32(1),
                Value::Bytes(vec![]),
            ],
        });
        assert!(matches!(
            decode_server_message(&table(), &schema, &bad_layer),
            Err(ProtocolError::InvalidLayer(2))
        ));

        let missing_data = encode_frame(&Frame::Message {
            id: 2,
            args: vec![
                Value::Int32(1),
                Value::Byte(0),
                Value::Int32(2),
                Value::Bytes(vec![]),
            ],
        });
        assert!(matches!(
            decode_server_message(&table(), &schema, &missing_data),
            Err(ProtocolError::Block(BlockError::InvalidBlockData { id: 2, .. }))
        ));
    }

    #[test]
    fn test_init_rejects_bad_dimensions() {
        let schema = schema();
        let frame = encode_frame(&Frame::Message {
            id: 0,
            args: vec![
                Value::Int32(1),
                Value::String("t".into()),
                Value::String("o".into()),
                Value::Int32(0),
                Value::Int32(0),
                Value::Int32(5),
                Value::Bytes(vec![]),
            ],
        });
        assert!(matches!(
            decode_server_message(&table(), &schema, &frame),
            Err(ProtocolError::UnexpectedArguments { message: INIT, .. })
        ));
    }

    #[test]
    fn test_missing_table_entry() {
        let table = MessageTable::new([(INIT, 0)]).unwrap();
        assert!(matches!(
            encode_client_message(&table, &ClientMessage::InitReceived),
            Err(ProtocolError::UnknownMessageName(INIT_RECEIVED))
        ));
    }

    #[test]
    fn test_position_overflow() {
        let schema = schema();
        let placed = BlockPlaced {
            player_id: None,
            layer: Layer::Background,
            block: Block::named(&schema, "stone").unwrap(),
            positions: vec![(70_000, 1)],
        };
        assert!(matches!(
            encode_client_message(&table(), &ClientMessage::PlaceBlocks(placed)),
            Err(ProtocolError::PositionOverflow { x: 70_000, y: 1 })
        ));
    }
}
