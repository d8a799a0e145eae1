//! Fuzz-style property tests for protocol decoding
//!
//! These tests validate that message decoders handle arbitrary
//! network input gracefully without crashing.

use proptest::prelude::*;
use tilesync_core::{encode_frame, Frame, Value, ValueKind};
use tilesync_net::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    BlockPlaced, ClientMessage, MessageTable, ServerMessage, BLOCK_PLACED, INIT, INIT_RECEIVED,
    PLAYER_JOINED, PLAYER_LEFT,
};
use tilesync_world::{Block, BlockEntry, BlockSchema, Layer};

fn table() -> MessageTable {
    MessageTable::new([
        (INIT, 10),
        (INIT_RECEIVED, 11),
        (BLOCK_PLACED, 12),
        (PLAYER_JOINED, 13),
        (PLAYER_LEFT, 14),
    ])
    .expect("table")
}

fn schema() -> BlockSchema {
    BlockSchema::new(vec![
        BlockEntry::simple(0, "empty"),
        BlockEntry::simple(1, "stone"),
        BlockEntry::with_args(2, "label", vec![ValueKind::String]),
    ])
    .expect("schema")
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z]{0,8}".prop_map(Value::String),
        any::<u8>().prop_map(Value::Byte),
        any::<i32>().prop_map(Value::Int32),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

proptest! {
    /// Property: Arbitrary bytes don't crash the server message decoder
    #[test]
    fn arbitrary_bytes_dont_crash_server(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_server_message(&table(), &schema(), &random_bytes);
    }

    /// Property: Arbitrary bytes don't crash the client message decoder
    #[test]
    fn arbitrary_bytes_dont_crash_client(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_client_message(&table(), &schema(), &random_bytes);
    }

    /// Property: Well-framed messages with arbitrary arguments never panic
    #[test]
    fn arbitrary_arguments_dont_crash(
        id in 10u32..16,
        args in prop::collection::vec(arb_value(), 0..8),
    ) {
        let bytes = encode_frame(&Frame::Message { id, args });
        let _result = decode_server_message(&table(), &schema(), &bytes);
    }

    /// Property: Placements roundtrip in both directions
    #[test]
    fn placements_roundtrip(
        positions in prop::collection::vec((any::<u16>(), any::<u16>()), 0..32),
        foreground in any::<bool>(),
        label in prop::option::of("[ -~]{0,16}"),
        player_id in any::<i32>(),
    ) {
        let schema = schema();
        let block = match label {
            Some(text) => Block::new(&schema, 2, vec![Value::String(text)]).unwrap(),
            None => Block::named(&schema, "stone").unwrap(),
        };
        let placed = BlockPlaced {
            player_id: None,
            layer: if foreground { Layer::Foreground } else { Layer::Background },
            block,
            positions: positions.iter().map(|&(x, y)| (u32::from(x), u32::from(y))).collect(),
        };

        let outbound = ClientMessage::PlaceBlocks(placed.clone());
        let bytes = encode_client_message(&table(), &outbound).unwrap();
        prop_assert_eq!(decode_client_message(&table(), &schema, &bytes).unwrap(), Some(outbound));

        let echo = ServerMessage::BlockPlaced(BlockPlaced { player_id: Some(player_id), ..placed });
        let bytes = encode_server_message(&table(), &echo).unwrap();
        prop_assert_eq!(decode_server_message(&table(), &schema, &bytes).unwrap(), echo);
    }
}
