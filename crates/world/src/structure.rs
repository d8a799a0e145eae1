//! Two-layer block grids.
//!
//! Cells are addressed `[layer][x][y]` and stored column-major (x outer,
//! y inner), the same order the block stream serializer walks them.

use std::collections::BTreeMap;

use thiserror::Error;
use tilesync_core::CodecError;

use crate::block::{Block, BlockError, Layer};

/// Errors raised by structure construction, mutation and (de)serialization.
#[derive(Debug, Error)]
pub enum StructureError {
    /// Width or height was zero.
    #[error("invalid structure dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// A coordinate fell outside the grid.
    #[error("position ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
        /// Grid width.
        width: u32,
        /// Grid height.
        height: u32,
    },
    /// A palette entry is missing or names a block the schema does not know.
    #[error("palette entry {index} ({name:?}) does not resolve to a known block")]
    UnknownBlockInPalette {
        /// Palette index referenced by the data or declared in the palette.
        index: usize,
        /// Name at that index, if the index exists.
        name: Option<String>,
    },
    /// The block stream does not match the declared dimensions.
    #[error("structure data does not match its {width}x{height} header: {reason}")]
    TruncatedStructure {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// What went wrong.
        reason: String,
    },
    /// The file envelope could not be parsed.
    #[error("invalid structure file: {0}")]
    InvalidStructureFile(String),
    /// The file was written by an unsupported format version.
    #[error("unsupported structure format version {0}")]
    UnsupportedVersion(u32),
    /// A block could not be built from stored data.
    #[error(transparent)]
    Block(#[from] BlockError),
}

impl StructureError {
    pub(crate) fn truncated(width: u32, height: u32, reason: impl ToString) -> Self {
        Self::TruncatedStructure {
            width,
            height,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_codec(width: u32, height: u32, err: CodecError) -> Self {
        Self::truncated(width, height, err)
    }
}

/// One cell that differs between a fragment and its paste target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellChange {
    /// Layer of the cell.
    pub layer: Layer,
    /// Target x.
    pub x: u32,
    /// Target y.
    pub y: u32,
    /// Block to write.
    pub block: Block,
}

/// Fixed-size two-layer grid of blocks with free-form metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    width: u32,
    height: u32,
    cells: [Vec<Block>; 2],
    meta: BTreeMap<String, String>,
}

impl Structure {
    /// Grid of empty blocks.
    pub fn new(width: u32, height: u32) -> Result<Self, StructureError> {
        if width == 0 || height == 0 {
            return Err(StructureError::InvalidDimensions { width, height });
        }
        let area = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            cells: [vec![Block::empty(); area], vec![Block::empty(); area]],
            meta: BTreeMap::new(),
        })
    }

    /// Width in cells.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in cells.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Free-form metadata (creator, name, ...), round-tripped verbatim.
    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    /// Mutable metadata.
    pub fn meta_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.meta
    }

    /// Whether `(x, y)` lies inside the grid.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        x as usize * self.height as usize + y as usize
    }

    fn out_of_bounds(&self, x: i64, y: i64) -> StructureError {
        StructureError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        }
    }

    /// Block at a cell, or `None` outside the grid.
    pub fn get(&self, layer: Layer, x: u32, y: u32) -> Option<&Block> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(&self.cells[layer.index()][self.index(x, y)])
    }

    /// Replace a cell, returning the previous block.
    pub fn set(&mut self, layer: Layer, x: u32, y: u32, block: Block) -> Result<Block, StructureError> {
        if x >= self.width || y >= self.height {
            return Err(self.out_of_bounds(i64::from(x), i64::from(y)));
        }
        let index = self.index(x, y);
        Ok(std::mem::replace(&mut self.cells[layer.index()][index], block))
    }

    /// Apply one change; returns whether the cell actually changed.
    pub fn apply(&mut self, change: &CellChange) -> Result<bool, StructureError> {
        let previous = self.set(change.layer, change.x, change.y, change.block.clone())?;
        Ok(previous != change.block)
    }

    /// Fresh traversal of `(layer, x, y, block)`: background then foreground,
    /// x outer, y inner.
    pub fn blocks(&self) -> impl Iterator<Item = (Layer, u32, u32, &Block)> + '_ {
        let height = self.height as usize;
        Layer::ALL.into_iter().flat_map(move |layer| {
            self.cells[layer.index()]
                .iter()
                .enumerate()
                .map(move |(i, block)| (layer, (i / height) as u32, (i % height) as u32, block))
        })
    }

    /// Fresh traversal of each layer's cells in column-major order.
    pub fn layers(&self) -> impl Iterator<Item = (Layer, &[Block])> + '_ {
        Layer::ALL
            .into_iter()
            .map(move |layer| (layer, self.cells[layer.index()].as_slice()))
    }

    /// Number of non-empty cells across both layers.
    pub fn non_empty_count(&self) -> usize {
        self.blocks().filter(|(_, _, _, block)| !block.is_empty()).count()
    }

    /// Extract the closed rectangle spanned by two corners.
    ///
    /// Corners may come in any order and are clamped to the grid, so
    /// `copy(0, 0, i32::MAX, i32::MAX)` copies everything.
    pub fn copy(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> Structure {
        let clamp_x = |v: i32| v.clamp(0, self.width as i32 - 1) as u32;
        let clamp_y = |v: i32| v.clamp(0, self.height as i32 - 1) as u32;
        let (min_x, max_x) = (clamp_x(x1.min(x2)), clamp_x(x1.max(x2)));
        let (min_y, max_y) = (clamp_y(y1.min(y2)), clamp_y(y1.max(y2)));

        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let area = width as usize * height as usize;
        let mut cells = [Vec::with_capacity(area), Vec::with_capacity(area)];
        for layer in Layer::ALL {
            let source = &self.cells[layer.index()];
            for x in min_x..=max_x {
                let column = self.index(x, min_y);
                cells[layer.index()]
                    .extend_from_slice(&source[column..column + height as usize]);
            }
        }
        Structure {
            width,
            height,
            cells,
            meta: self.meta.clone(),
        }
    }

    /// Cells of `fragment` that would change this grid if pasted with its
    /// top-left corner at `(origin_x, origin_y)`.
    ///
    /// Empty fragment cells are skipped unless `write_empty` is set. Target
    /// cells outside this grid are skipped.
    pub fn diff(
        &self,
        fragment: &Structure,
        origin_x: i32,
        origin_y: i32,
        write_empty: bool,
    ) -> Vec<CellChange> {
        self.diff_by(fragment, origin_x, origin_y, write_empty, |change, current| {
            current != &change.block
        })
    }

    /// Like [`Structure::diff`], with the caller deciding whether a
    /// candidate write differs from the cell's current block.
    pub fn diff_by<F>(
        &self,
        fragment: &Structure,
        origin_x: i32,
        origin_y: i32,
        write_empty: bool,
        mut differs: F,
    ) -> Vec<CellChange>
    where
        F: FnMut(&CellChange, &Block) -> bool,
    {
        fragment
            .blocks()
            .filter_map(|(layer, x, y, block)| {
                if block.is_empty() && !write_empty {
                    return None;
                }
                let tx = i64::from(origin_x) + i64::from(x);
                let ty = i64::from(origin_y) + i64::from(y);
                if !self.contains(tx, ty) {
                    return None;
                }
                let (tx, ty) = (tx as u32, ty as u32);
                let current = &self.cells[layer.index()][self.index(tx, ty)];
                let change = CellChange {
                    layer,
                    x: tx,
                    y: ty,
                    block: block.clone(),
                };
                differs(&change, current).then_some(change)
            })
            .collect()
    }

    /// Diff and apply in one step; returns the applied changes.
    pub fn paste(
        &mut self,
        fragment: &Structure,
        origin_x: i32,
        origin_y: i32,
        write_empty: bool,
    ) -> Vec<CellChange> {
        let changes = self.diff(fragment, origin_x, origin_y, write_empty);
        for change in &changes {
            let index = self.index(change.x, change.y);
            self.cells[change.layer.index()][index] = change.block.clone();
        }
        changes
    }
}
