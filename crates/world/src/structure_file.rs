//! Palette-compressed structure files.
//!
//! Layout of the block stream: for each layer (background, foreground), for
//! each x, for each y: `[palette index: compact][extra data...]`, where the
//! extra data is written untagged because the schema dictates its kinds. The
//! stream is base64-encoded into a JSON envelope next to the palette.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tilesync_core::{write_compact, ByteReader, Value};
use tracing::debug;

use crate::block::{Block, BlockError, Layer};
use crate::schema::{BlockSchema, EMPTY_BLOCK_ID, EMPTY_BLOCK_NAME};
use crate::structure::{Structure, StructureError};

/// Generator tag written into new files.
pub const STRUCTURE_GENERATOR: &str = "tilesync";

/// Current file format version.
pub const STRUCTURE_FORMAT_VERSION: u32 = 1;

/// Serialized structure envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureFile {
    /// Tool that wrote the file.
    pub generator: String,
    /// Format version.
    pub version: u32,
    /// Structure metadata, verbatim.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Distinct block names; index 0 is always "empty".
    pub palette: Vec<String>,
    /// Base64 block stream.
    pub data: String,
}

impl Structure {
    /// Serialize into a palette-compressed file.
    pub fn serialize(&self, schema: &BlockSchema) -> Result<StructureFile, StructureError> {
        let mut palette = vec![EMPTY_BLOCK_NAME.to_string()];
        let mut palette_map: HashMap<u32, u32> = HashMap::from([(EMPTY_BLOCK_ID, 0)]);

        for (_, _, _, block) in self.blocks() {
            if palette_map.contains_key(&block.id()) {
                continue;
            }
            let name = block
                .name(schema)
                .ok_or(BlockError::UnknownBlockId(block.id()))?;
            palette_map.insert(block.id(), palette.len() as u32);
            palette.push(name.to_string());
        }

        let mut stream = Vec::with_capacity(self.width() as usize * self.height() as usize * 2);
        self.write_cells(&mut stream, |block| palette_map[&block.id()]);

        debug!(
            width = self.width(),
            height = self.height(),
            palette = palette.len(),
            bytes = stream.len(),
            "serialized structure"
        );

        Ok(StructureFile {
            generator: STRUCTURE_GENERATOR.to_string(),
            version: STRUCTURE_FORMAT_VERSION,
            meta: self.meta().clone(),
            width: self.width(),
            height: self.height(),
            palette,
            data: STANDARD.encode(&stream),
        })
    }

    /// Rebuild a structure from a file.
    pub fn deserialize(schema: &BlockSchema, file: &StructureFile) -> Result<Structure, StructureError> {
        if file.version != STRUCTURE_FORMAT_VERSION {
            return Err(StructureError::UnsupportedVersion(file.version));
        }

        let ids = file
            .palette
            .iter()
            .enumerate()
            .map(|(index, name)| {
                schema
                    .id_by_name(name)
                    .ok_or_else(|| StructureError::UnknownBlockInPalette {
                        index,
                        name: Some(name.clone()),
                    })
            })
            .collect::<Result<Vec<u32>, _>>()?;

        let stream = STANDARD.decode(&file.data).map_err(|err| {
            StructureError::InvalidStructureFile(format!("block data is not base64: {err}"))
        })?;

        let mut structure = Self::read_cells(schema, file.width, file.height, &stream, |index| {
            ids.get(index as usize)
                .copied()
                .ok_or_else(|| StructureError::UnknownBlockInPalette {
                    index: index as usize,
                    name: None,
                })
        })?;
        *structure.meta_mut() = file.meta.clone();
        Ok(structure)
    }

    /// Serialize straight to JSON.
    pub fn to_json(&self, schema: &BlockSchema) -> Result<String, StructureError> {
        let file = self.serialize(schema)?;
        serde_json::to_string(&file).map_err(|err| StructureError::InvalidStructureFile(err.to_string()))
    }

    /// Parse a JSON structure file.
    pub fn from_json(schema: &BlockSchema, input: &str) -> Result<Structure, StructureError> {
        let file: StructureFile = serde_json::from_str(input)
            .map_err(|err| StructureError::InvalidStructureFile(err.to_string()))?;
        Self::deserialize(schema, &file)
    }

    /// Block stream keyed by raw block ids instead of a palette, as carried by
    /// the server's world snapshot.
    pub fn encode_id_stream(&self) -> Vec<u8> {
        let mut stream = Vec::new();
        self.write_cells(&mut stream, Block::id);
        stream
    }

    /// Inverse of [`Structure::encode_id_stream`].
    pub fn decode_id_stream(
        schema: &BlockSchema,
        width: u32,
        height: u32,
        stream: &[u8],
    ) -> Result<Structure, StructureError> {
        Self::read_cells(schema, width, height, stream, Ok)
    }

    fn write_cells(&self, out: &mut Vec<u8>, mut index_of: impl FnMut(&Block) -> u32) {
        for (_, _, _, block) in self.blocks() {
            write_compact(out, index_of(block));
            for value in block.data() {
                value.encode_untagged(out);
            }
        }
    }

    fn read_cells(
        schema: &BlockSchema,
        width: u32,
        height: u32,
        stream: &[u8],
        mut resolve: impl FnMut(u32) -> Result<u32, StructureError>,
    ) -> Result<Structure, StructureError> {
        // Every cell takes at least one byte; reject short streams before allocating.
        let cells = 2 * u64::from(width) * u64::from(height);
        if (stream.len() as u64) < cells {
            return Err(StructureError::truncated(
                width,
                height,
                format!("{} bytes cannot hold {cells} cells", stream.len()),
            ));
        }

        let mut structure = Structure::new(width, height)?;
        let mut reader = ByteReader::new(stream);
        let codec_err = |err| StructureError::from_codec(width, height, err);

        for layer in Layer::ALL {
            for x in 0..width {
                for y in 0..height {
                    let index = reader.read_compact().map_err(codec_err)?;
                    let id = resolve(index)?;
                    let data = schema
                        .arity(id)
                        .iter()
                        .map(|kind| Value::decode_untagged(&mut reader, *kind))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(codec_err)?;
                    structure.set(layer, x, y, Block::new(schema, id, data)?)?;
                }
            }
        }

        if !reader.is_empty() {
            return Err(StructureError::truncated(
                width,
                height,
                format!("{} trailing bytes after the last cell", reader.remaining()),
            ));
        }
        Ok(structure)
    }
}
