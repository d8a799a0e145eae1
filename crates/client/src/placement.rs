//! Block placements as scheduler values.

use serde::{Deserialize, Serialize};
use tilesync_net::BlockPlaced;
use tilesync_world::{Block, CellChange, Layer};

use crate::scheduler::{SchedulePolicy, ScheduleError};

/// One desired cell write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockPlacement {
    /// Target layer.
    pub layer: Layer,
    /// Target x.
    pub x: u32,
    /// Target y.
    pub y: u32,
    /// Block to write.
    pub block: Block,
}

impl From<CellChange> for BlockPlacement {
    fn from(change: CellChange) -> Self {
        Self {
            layer: change.layer,
            x: change.x,
            y: change.y,
            block: change.block,
        }
    }
}

impl From<BlockPlacement> for CellChange {
    fn from(placement: BlockPlacement) -> Self {
        Self {
            layer: placement.layer,
            x: placement.x,
            y: placement.y,
            block: placement.block,
        }
    }
}

/// Which inbound broadcasts retire a pending placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMatch {
    /// Any broadcast for the same cell.
    #[default]
    Cell,
    /// Only a broadcast writing the same block to the same cell.
    Content,
}

/// Scheduler key for a [`BlockPlacement`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlacementKey {
    /// Layer.
    pub layer: Layer,
    /// X.
    pub x: u32,
    /// Y.
    pub y: u32,
    /// Block, in [`ConfirmMatch::Content`] mode.
    pub block: Option<Block>,
}

/// Policy binding placements to a grid of fixed size.
#[derive(Debug, Clone)]
pub struct PlacementPolicy {
    width: u32,
    height: u32,
    confirm: ConfirmMatch,
}

impl PlacementPolicy {
    /// Policy for a `width` x `height` world.
    pub fn new(width: u32, height: u32, confirm: ConfirmMatch) -> Self {
        Self {
            width,
            height,
            confirm,
        }
    }

    /// Matching mode.
    pub fn confirm_match(&self) -> ConfirmMatch {
        self.confirm
    }
}

impl SchedulePolicy for PlacementPolicy {
    type Key = PlacementKey;
    type Value = BlockPlacement;

    fn key(&self, value: &BlockPlacement) -> PlacementKey {
        PlacementKey {
            layer: value.layer,
            x: value.x,
            y: value.y,
            block: match self.confirm {
                ConfirmMatch::Cell => None,
                ConfirmMatch::Content => Some(value.block.clone()),
            },
        }
    }

    fn verify(&self, value: &BlockPlacement) -> Result<(), ScheduleError> {
        if value.x >= self.width || value.y >= self.height {
            return Err(ScheduleError::InvalidEnqueue(format!(
                "({}, {}) is outside the {}x{} world",
                value.x, value.y, self.width, self.height
            )));
        }
        Ok(())
    }

    fn can_coalesce(&self, a: &BlockPlacement, b: &BlockPlacement) -> bool {
        a.layer == b.layer && a.block == b.block
    }
}

/// Fold a coalesced batch into one outgoing message.
///
/// Every placement must share the first one's layer and block; the
/// scheduler only groups placements that do.
pub fn placement_message(batch: &[BlockPlacement]) -> Option<BlockPlaced> {
    let first = batch.first()?;
    debug_assert!(batch
        .iter()
        .all(|p| p.layer == first.layer && p.block == first.block));
    Some(BlockPlaced {
        player_id: None,
        layer: first.layer,
        block: first.block.clone(),
        positions: batch.iter().map(|p| (p.x, p.y)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_world::{BlockEntry, BlockSchema};

    fn schema() -> BlockSchema {
        BlockSchema::new(vec![
            BlockEntry::simple(0, "empty"),
            BlockEntry::simple(1, "a"),
            BlockEntry::simple(2, "b"),
        ])
        .unwrap()
    }

    fn place(schema: &BlockSchema, layer: Layer, x: u32, y: u32, name: &str) -> BlockPlacement {
        BlockPlacement {
            layer,
            x,
            y,
            block: Block::named(schema, name).unwrap(),
        }
    }

    #[test]
    fn test_cell_key_ignores_content() {
        let schema = schema();
        let policy = PlacementPolicy::new(4, 4, ConfirmMatch::Cell);
        let a = place(&schema, Layer::Foreground, 1, 1, "a");
        let b = place(&schema, Layer::Foreground, 1, 1, "b");
        assert_eq!(policy.key(&a), policy.key(&b));
        assert_ne!(
            policy.key(&a),
            policy.key(&place(&schema, Layer::Background, 1, 1, "a"))
        );
    }

    #[test]
    fn test_content_key_includes_block() {
        let schema = schema();
        let policy = PlacementPolicy::new(4, 4, ConfirmMatch::Content);
        let a = place(&schema, Layer::Foreground, 1, 1, "a");
        let b = place(&schema, Layer::Foreground, 1, 1, "b");
        assert_ne!(policy.key(&a), policy.key(&b));
    }

    #[test]
    fn test_verify_bounds() {
        let schema = schema();
        let policy = PlacementPolicy::new(2, 3, ConfirmMatch::Cell);
        assert!(policy.verify(&place(&schema, Layer::Background, 1, 2, "a")).is_ok());
        assert!(policy.verify(&place(&schema, Layer::Background, 2, 0, "a")).is_err());
        assert!(policy.verify(&place(&schema, Layer::Background, 0, 3, "a")).is_err());
    }

    #[test]
    fn test_batch_becomes_one_message() {
        let schema = schema();
        let batch = vec![
            place(&schema, Layer::Foreground, 0, 0, "a"),
            place(&schema, Layer::Foreground, 1, 0, "a"),
        ];
        let message = placement_message(&batch).unwrap();
        assert_eq!(message.layer, Layer::Foreground);
        assert_eq!(message.positions, vec![(0, 0), (1, 0)]);
        assert!(placement_message(&[]).is_none());
    }
}
