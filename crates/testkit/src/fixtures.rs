use serde_json::{json, Map};
use tilesync_core::Value;
use tilesync_net::{
    Bootstrap, InitSnapshot, BLOCK_PLACED, INIT, INIT_RECEIVED, PLAYER_JOINED, PLAYER_LEFT,
};
use tilesync_world::{Block, Layer, Structure};

/// Player id the fixture server assigns to the client under test.
pub const TEST_PLAYER_ID: i32 = 7;

/// Bootstrap document used across tests.
///
/// Blocks: `empty`, `basic_white`, `basic_black`, `brick`, `coin_door`
/// (one int32 argument), `sign` (string + byte). `white` aliases
/// `basic_white`.
pub fn test_bootstrap_json() -> String {
    let messages: Map<String, serde_json::Value> = [
        (INIT, 0),
        (INIT_RECEIVED, 1),
        (BLOCK_PLACED, 2),
        (PLAYER_JOINED, 3),
        (PLAYER_LEFT, 4),
        ("chat", 5),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), json!(id)))
    .collect();

    json!({
        "blocks": [
            {"id": 0, "name": "empty"},
            {"id": 1, "name": "basic_white"},
            {"id": 2, "name": "basic_black"},
            {"id": 3, "name": "brick"},
            {"id": 43, "name": "coin_door", "args": ["int32"]},
            {"id": 385, "name": "sign", "args": ["string", "byte"]}
        ],
        "aliases": {"white": "basic_white"},
        "messages": messages,
    })
    .to_string()
}

/// Parsed [`test_bootstrap_json`].
pub fn test_bootstrap() -> Bootstrap {
    Bootstrap::from_json_str(&test_bootstrap_json()).expect("fixture bootstrap")
}

/// Block from the fixture schema by name.
pub fn test_block(bootstrap: &Bootstrap, name: &str) -> Block {
    Block::named(&bootstrap.schema, name).expect("fixture block")
}

/// Coin door requiring `coins`.
pub fn coin_door(bootstrap: &Bootstrap, coins: i32) -> Block {
    Block::from_name(&bootstrap.schema, "coin_door", vec![Value::Int32(coins)]).expect("coin door")
}

/// Empty `width` x `height` world snapshot for [`TEST_PLAYER_ID`].
pub fn empty_init(width: u32, height: u32) -> InitSnapshot {
    InitSnapshot {
        player_id: TEST_PLAYER_ID,
        title: "Test World".into(),
        owner: "tester".into(),
        play_count: 3,
        world: Structure::new(width, height).expect("fixture world"),
    }
}

/// Foreground-only fragment from columns of block names; `columns[x][y]`.
pub fn foreground_fragment(bootstrap: &Bootstrap, columns: &[&[&str]]) -> Structure {
    let width = columns.len() as u32;
    let height = columns.first().map_or(0, |column| column.len()) as u32;
    let mut fragment = Structure::new(width, height).expect("fixture fragment");
    for (x, column) in columns.iter().enumerate() {
        for (y, name) in column.iter().enumerate() {
            fragment
                .set(Layer::Foreground, x as u32, y as u32, test_block(bootstrap, name))
                .expect("fixture cell");
        }
    }
    fragment
}
