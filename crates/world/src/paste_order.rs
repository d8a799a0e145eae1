//! Orderings over a set of changed cells.
//!
//! Each strategy turns a set of positions into a finite sequence of batches;
//! every batch is a group of positions sent with the same timing. Layers at
//! the same coordinate always travel together.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::structure::CellChange;

/// Grid coordinate `(x, y)`.
pub type Position = (u32, u32);

/// How [`PasteOrder::Random`] randomizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomMode {
    /// Pick one of the deterministic strategies at random.
    #[default]
    PickStrategy,
    /// Draw positions uniformly without replacement, one per batch.
    Shuffle,
}

/// Paste-order strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasteOrder {
    /// One batch holding everything.
    #[default]
    AllAtOnce,
    /// Rows top to bottom, left to right within a row.
    RowMajor,
    /// Columns left to right, top to bottom within a column.
    ColumnMajor,
    /// Clockwise rings of the bounding box, outside in.
    SpiralClockwise,
    /// Randomized order.
    Random(RandomMode),
}

impl PasteOrder {
    /// Strategies that always produce the same sequence for the same input.
    pub const DETERMINISTIC: [PasteOrder; 4] = [
        PasteOrder::AllAtOnce,
        PasteOrder::RowMajor,
        PasteOrder::ColumnMajor,
        PasteOrder::SpiralClockwise,
    ];

    /// Lazily enumerate batches over `positions`. Each call starts over.
    pub fn batches<'a>(
        &self,
        positions: &'a BTreeSet<Position>,
    ) -> Box<dyn Iterator<Item = Vec<Position>> + 'a> {
        self.batches_with_rng(positions, &mut rand::thread_rng())
    }

    /// Like [`PasteOrder::batches`] with an explicit random source.
    pub fn batches_with_rng<'a, R: Rng + ?Sized>(
        &self,
        positions: &'a BTreeSet<Position>,
        rng: &mut R,
    ) -> Box<dyn Iterator<Item = Vec<Position>> + 'a> {
        match self {
            PasteOrder::AllAtOnce => {
                if positions.is_empty() {
                    Box::new(std::iter::empty())
                } else {
                    Box::new(std::iter::once(positions.iter().copied().collect()))
                }
            }
            PasteOrder::ColumnMajor => Box::new(positions.iter().map(|&p| vec![p])),
            PasteOrder::RowMajor => {
                let mut rows: Vec<Position> = positions.iter().copied().collect();
                rows.sort_by_key(|&(x, y)| (y, x));
                Box::new(rows.into_iter().map(|p| vec![p]))
            }
            PasteOrder::SpiralClockwise => Box::new(Spiral::new(positions).map(|p| vec![p])),
            PasteOrder::Random(RandomMode::PickStrategy) => {
                let choice = *PasteOrder::DETERMINISTIC
                    .choose(rng)
                    .unwrap_or(&PasteOrder::AllAtOnce);
                choice.batches_with_rng(positions, rng)
            }
            PasteOrder::Random(RandomMode::Shuffle) => {
                let mut shuffled: Vec<Position> = positions.iter().copied().collect();
                shuffled.shuffle(rng);
                Box::new(shuffled.into_iter().map(|p| vec![p]))
            }
        }
    }
}

/// Clockwise ring walk over the bounding box of a position set, emitting only
/// positions that belong to the set.
struct Spiral<'a> {
    positions: &'a BTreeSet<Position>,
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
    ring: VecDeque<Position>,
}

impl<'a> Spiral<'a> {
    fn new(positions: &'a BTreeSet<Position>) -> Self {
        let (mut left, mut top, mut right, mut bottom) = (0i64, 0i64, -1i64, -1i64);
        if let Some(&(x, y)) = positions.iter().next() {
            (left, top, right, bottom) = (x.into(), y.into(), x.into(), y.into());
            for &(x, y) in positions {
                left = left.min(x.into());
                right = right.max(x.into());
                top = top.min(y.into());
                bottom = bottom.max(y.into());
            }
        }
        Self {
            positions,
            left,
            top,
            right,
            bottom,
            ring: VecDeque::new(),
        }
    }

    fn push(&mut self, x: i64, y: i64) {
        let p = (x as u32, y as u32);
        if self.positions.contains(&p) {
            self.ring.push_back(p);
        }
    }

    /// Queue the current ring and shrink; false once the ring has degenerated.
    fn next_ring(&mut self) -> bool {
        let (l, t, r, b) = (self.left, self.top, self.right, self.bottom);
        if l > r || t > b {
            return false;
        }
        for x in l..=r {
            self.push(x, t);
        }
        for y in t + 1..=b {
            self.push(r, y);
        }
        if b > t {
            for x in (l..r).rev() {
                self.push(x, b);
            }
        }
        if l < r {
            for y in (t + 1..b).rev() {
                self.push(l, y);
            }
        }
        self.left += 1;
        self.top += 1;
        self.right -= 1;
        self.bottom -= 1;
        true
    }
}

impl Iterator for Spiral<'_> {
    type Item = Position;

    fn next(&mut self) -> Option<Self::Item> {
        while self.ring.is_empty() {
            if !self.next_ring() {
                return None;
            }
        }
        self.ring.pop_front()
    }
}

/// Distinct positions touched by a change set.
pub fn positions_of(changes: &[CellChange]) -> BTreeSet<Position> {
    changes.iter().map(|c| (c.x, c.y)).collect()
}

/// Regroup `changes` into batches following `order`. Changes sharing a
/// coordinate (one per layer) land in the same batch in their original order.
pub fn order_changes(order: PasteOrder, changes: Vec<CellChange>) -> Vec<Vec<CellChange>> {
    let positions = positions_of(&changes);
    let mut by_position: BTreeMap<Position, Vec<CellChange>> = BTreeMap::new();
    for change in changes {
        by_position.entry((change.x, change.y)).or_default().push(change);
    }
    order
        .batches(&positions)
        .map(|batch| {
            batch
                .into_iter()
                .flat_map(|p| by_position.remove(&p).unwrap_or_default())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Layer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grid(width: u32, height: u32) -> BTreeSet<Position> {
        (0..width)
            .flat_map(|x| (0..height).map(move |y| (x, y)))
            .collect()
    }

    fn flatten(order: PasteOrder, positions: &BTreeSet<Position>) -> Vec<Position> {
        order.batches(positions).flatten().collect()
    }

    #[test]
    fn test_deterministic_orders_are_total_and_unique() {
        let mut sparse = grid(5, 4);
        sparse.retain(|&(x, y)| (x * 7 + y * 3) % 4 != 0);
        for positions in [grid(1, 1), grid(4, 3), grid(3, 6), sparse] {
            for order in PasteOrder::DETERMINISTIC {
                let emitted = flatten(order, &positions);
                assert_eq!(emitted.len(), positions.len(), "{order:?}");
                let unique: BTreeSet<_> = emitted.iter().copied().collect();
                assert_eq!(unique, positions, "{order:?}");
            }
        }
    }

    #[test]
    fn test_all_at_once_is_single_batch() {
        let positions = grid(3, 3);
        let batches: Vec<_> = PasteOrder::AllAtOnce.batches(&positions).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 9);
        assert_eq!(PasteOrder::AllAtOnce.batches(&BTreeSet::new()).count(), 0);
    }

    #[test]
    fn test_row_and_column_major() {
        let positions = grid(2, 2);
        assert_eq!(
            flatten(PasteOrder::RowMajor, &positions),
            vec![(0, 0), (1, 0), (0, 1), (1, 1)]
        );
        assert_eq!(
            flatten(PasteOrder::ColumnMajor, &positions),
            vec![(0, 0), (0, 1), (1, 0), (1, 1)]
        );
    }

    #[test]
    fn test_spiral_on_three_by_three() {
        let positions = grid(3, 3);
        assert_eq!(
            flatten(PasteOrder::SpiralClockwise, &positions),
            vec![
                (0, 0),
                (1, 0),
                (2, 0),
                (2, 1),
                (2, 2),
                (1, 2),
                (0, 2),
                (0, 1),
                (1, 1)
            ]
        );
    }

    #[test]
    fn test_spiral_on_single_row_and_column() {
        let row = grid(4, 1);
        assert_eq!(
            flatten(PasteOrder::SpiralClockwise, &row),
            vec![(0, 0), (1, 0), (2, 0), (3, 0)]
        );
        let column = grid(1, 3);
        assert_eq!(
            flatten(PasteOrder::SpiralClockwise, &column),
            vec![(0, 0), (0, 1), (0, 2)]
        );
    }

    #[test]
    fn test_strategies_are_restartable() {
        let positions = grid(4, 5);
        for order in PasteOrder::DETERMINISTIC {
            assert_eq!(flatten(order, &positions), flatten(order, &positions));
        }
    }

    #[test]
    fn test_random_adds_no_positions() {
        let positions = grid(4, 4);
        let mut rng = StdRng::seed_from_u64(7);
        for mode in [RandomMode::PickStrategy, RandomMode::Shuffle] {
            let emitted: Vec<_> = PasteOrder::Random(mode)
                .batches_with_rng(&positions, &mut rng)
                .flatten()
                .collect();
            assert_eq!(emitted.len(), positions.len());
            assert_eq!(emitted.into_iter().collect::<BTreeSet<_>>(), positions);
        }
    }

    #[test]
    fn test_order_changes_keeps_layers_together() {
        let stone = Block::default();
        let change = |layer, x, y| CellChange {
            layer,
            x,
            y,
            block: stone.clone(),
        };
        let changes = vec![
            change(Layer::Background, 1, 0),
            change(Layer::Background, 0, 0),
            change(Layer::Foreground, 1, 0),
        ];
        let batches = order_changes(PasteOrder::ColumnMajor, changes);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!((batches[0][0].x, batches[0][0].y), (0, 0));
        assert_eq!(batches[1].len(), 2);
        assert_eq!(batches[1][0].layer, Layer::Background);
        assert_eq!(batches[1][1].layer, Layer::Foreground);
    }
}
