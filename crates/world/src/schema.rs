use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tilesync_core::ValueKind;

/// Id reserved for the empty block.
pub const EMPTY_BLOCK_ID: u32 = 0;
/// Name reserved for the empty block.
pub const EMPTY_BLOCK_NAME: &str = "empty";

/// One block definition from the server's bootstrap data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// Numeric id used on the wire.
    pub id: u32,
    /// Canonical name (e.g. "basic_white").
    pub name: String,
    /// Kinds of the extra arguments this block carries, in order.
    #[serde(default)]
    pub args: Vec<ValueKind>,
}

impl BlockEntry {
    /// Entry without extra arguments.
    pub fn simple(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    /// Entry with extra arguments.
    pub fn with_args(id: u32, name: &str, args: Vec<ValueKind>) -> Self {
        Self {
            id,
            name: name.to_string(),
            args,
        }
    }
}

/// Errors raised while building a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two entries share an id.
    #[error("duplicate block id {0}")]
    DuplicateId(u32),
    /// Two entries share a name.
    #[error("duplicate block name {0:?}")]
    DuplicateName(String),
    /// Id 0 must exist and be named "empty".
    #[error("block id 0 must be defined as {EMPTY_BLOCK_NAME:?}")]
    MissingEmpty,
    /// Bootstrap JSON could not be parsed.
    #[error("failed to parse block schema: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialized block tables: `{ "blocks": [...], "aliases": {...} }`.
///
/// Other documents embed it with `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDocument {
    /// Block entries.
    pub blocks: Vec<BlockEntry>,
    /// Legacy name redirects.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl SchemaDocument {
    /// Validate the entries and attach the aliases.
    pub fn build(self) -> Result<BlockSchema, SchemaError> {
        Ok(BlockSchema::new(self.blocks)?.with_aliases(self.aliases))
    }
}

/// Immutable block lookup tables for one session.
///
/// Maps names to ids (case-sensitive) and ids to the kinds of their extra
/// arguments. Deprecated names can be redirected to their canonical name
/// through the alias table.
#[derive(Debug, Clone)]
pub struct BlockSchema {
    entries: Vec<BlockEntry>,
    by_id: HashMap<u32, usize>,
    name_to_id: HashMap<String, u32>,
    aliases: HashMap<String, String>,
}

impl BlockSchema {
    /// Build a schema from bootstrap entries.
    pub fn new(entries: Vec<BlockEntry>) -> Result<Self, SchemaError> {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut name_to_id = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id, index).is_some() {
                return Err(SchemaError::DuplicateId(entry.id));
            }
            if name_to_id.insert(entry.name.clone(), entry.id).is_some() {
                return Err(SchemaError::DuplicateName(entry.name.clone()));
            }
        }
        match by_id.get(&EMPTY_BLOCK_ID) {
            Some(&index) if entries[index].name == EMPTY_BLOCK_NAME && entries[index].args.is_empty() => {}
            _ => return Err(SchemaError::MissingEmpty),
        }
        Ok(Self {
            entries,
            by_id,
            name_to_id,
            aliases: HashMap::new(),
        })
    }

    /// Attach a legacy-name alias table (`deprecated -> canonical`).
    pub fn with_aliases<I>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.aliases.extend(aliases);
        self
    }

    /// Parse `{ "blocks": [...], "aliases": {...} }`. Unknown fields are ignored.
    pub fn from_json_str(input: &str) -> Result<Self, SchemaError> {
        serde_json::from_str::<SchemaDocument>(input)?.build()
    }

    /// Apply the alias table to `name`.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Resolve a block id by name, following aliases.
    pub fn id_by_name(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(self.canonical_name(name)).copied()
    }

    /// Canonical name of a block id.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.entry(id).map(|entry| entry.name.as_str())
    }

    /// Extra-argument kinds for `id`; empty for plain or unknown blocks.
    pub fn arity(&self, id: u32) -> &[ValueKind] {
        self.entry(id).map(|entry| entry.args.as_slice()).unwrap_or(&[])
    }

    /// Whether `id` is defined.
    pub fn contains(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Full entry for `id`.
    pub fn entry(&self, id: u32) -> Option<&BlockEntry> {
        self.by_id.get(&id).map(|&index| &self.entries[index])
    }

    /// Number of defined blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no blocks are defined (never the case for a valid schema).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
