use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tilesync_core::{Value, ValueKind};

use crate::schema::{BlockSchema, EMPTY_BLOCK_ID};

/// Errors raised while constructing blocks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// The name is not in the schema (after alias resolution).
    #[error("unresolved block name {0:?}")]
    UnresolvedBlockName(String),
    /// The id is not in the schema.
    #[error("unknown block id {0}")]
    UnknownBlockId(u32),
    /// Extra data does not match the schema's argument kinds.
    #[error("block {id} expects arguments {expected:?}, got {found:?}")]
    InvalidBlockData {
        /// Block id.
        id: u32,
        /// Kinds required by the schema.
        expected: Vec<ValueKind>,
        /// Kinds supplied.
        found: Vec<ValueKind>,
    },
}

/// Grid layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Layer {
    /// Layer 0.
    Background = 0,
    /// Layer 1.
    Foreground = 1,
}

impl Layer {
    /// Both layers in serialization order.
    pub const ALL: [Layer; 2] = [Layer::Background, Layer::Foreground];

    /// Index into per-layer storage.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Layer {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Layer::Background),
            1 => Ok(Layer::Foreground),
            other => Err(other),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Background => f.write_str("background"),
            Layer::Foreground => f.write_str("foreground"),
        }
    }
}

/// A cell value: block id plus the extra data its schema entry requires.
///
/// Blocks are immutable; a cell is changed by replacing its block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    id: u32,
    data: Vec<Value>,
}

impl Block {
    /// The empty block (id 0, no data).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a block, checking `data` against the schema's arity for `id`.
    pub fn new(schema: &BlockSchema, id: u32, data: Vec<Value>) -> Result<Self, BlockError> {
        if !schema.contains(id) {
            return Err(BlockError::UnknownBlockId(id));
        }
        let expected = schema.arity(id);
        let matches = expected.len() == data.len()
            && expected.iter().zip(&data).all(|(kind, value)| value.kind() == *kind);
        if !matches {
            return Err(BlockError::InvalidBlockData {
                id,
                expected: expected.to_vec(),
                found: data.iter().map(Value::kind).collect(),
            });
        }
        Ok(Self { id, data })
    }

    /// Build a block from its name (case-sensitive, aliases applied first).
    pub fn from_name(schema: &BlockSchema, name: &str, data: Vec<Value>) -> Result<Self, BlockError> {
        let id = schema
            .id_by_name(name)
            .ok_or_else(|| BlockError::UnresolvedBlockName(name.to_string()))?;
        Self::new(schema, id, data)
    }

    /// Shorthand for a block without extra data.
    pub fn named(schema: &BlockSchema, name: &str) -> Result<Self, BlockError> {
        Self::from_name(schema, name, Vec::new())
    }

    /// Numeric id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Ordered extra data.
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Whether this is the empty block.
    pub fn is_empty(&self) -> bool {
        self.id == EMPTY_BLOCK_ID
    }

    /// Same id and pointwise-equal data.
    pub fn is_same_as(&self, other: &Block) -> bool {
        self == other
    }

    /// Canonical name according to `schema`.
    pub fn name<'s>(&self, schema: &'s BlockSchema) -> Option<&'s str> {
        schema.name_of(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BlockEntry;

    fn schema() -> BlockSchema {
        BlockSchema::new(vec![
            BlockEntry::simple(0, "empty"),
            BlockEntry::simple(1, "basic_white"),
            BlockEntry::with_args(2, "coin_door", vec![ValueKind::Int32]),
        ])
        .expect("schema")
        .with_aliases([("white".to_string(), "basic_white".to_string())])
    }

    #[test]
    fn test_from_name_resolves_aliases() {
        let schema = schema();
        let block = Block::named(&schema, "white").expect("alias");
        assert_eq!(block.id(), 1);
        assert_eq!(block.name(&schema), Some("basic_white"));
    }

    #[test]
    fn test_unknown_name_is_an_error() {
        let schema = schema();
        assert_eq!(
            Block::named(&schema, "BASIC_WHITE"),
            Err(BlockError::UnresolvedBlockName("BASIC_WHITE".to_string()))
        );
    }

    #[test]
    fn test_arity_is_enforced() {
        let schema = schema();
        assert!(matches!(
            Block::new(&schema, 2, vec![]),
            Err(BlockError::InvalidBlockData { id: 2, .. })
        ));
        assert!(matches!(
            Block::new(&schema, 2, vec![Value::String("10".into())]),
            Err(BlockError::InvalidBlockData { .. })
        ));
        assert_eq!(
            Block::new(&schema, 9, vec![]),
            Err(BlockError::UnknownBlockId(9))
        );
        let door = Block::new(&schema, 2, vec![Value::Int32(10)]).expect("door");
        assert_eq!(door.data(), &[Value::Int32(10)]);
    }

    #[test]
    fn test_same_as_compares_data() {
        let schema = schema();
        let a = Block::new(&schema, 2, vec![Value::Int32(10)]).expect("a");
        let b = Block::new(&schema, 2, vec![Value::Int32(10)]).expect("b");
        let c = Block::new(&schema, 2, vec![Value::Int32(11)]).expect("c");
        assert!(a.is_same_as(&b));
        assert!(!a.is_same_as(&c));
        assert!(Block::empty().is_empty());
        assert!(!a.is_same_as(&Block::empty()));
    }

    #[test]
    fn test_layer_from_byte() {
        assert_eq!(Layer::try_from(0), Ok(Layer::Background));
        assert_eq!(Layer::try_from(1), Ok(Layer::Foreground));
        assert_eq!(Layer::try_from(2), Err(2));
    }
}
