//! Session bootstrap data: block and message tables fetched once from the
//! game backend and treated as read-only for the session's lifetime.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tilesync_world::{BlockSchema, SchemaDocument, SchemaError};
use tracing::debug;

/// Errors emitted while loading bootstrap data.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Wrap IO errors when reading from disk.
    #[error("failed to read bootstrap data: {0}")]
    Io(#[from] std::io::Error),
    /// Wrap serde parsing issues.
    #[error("failed to parse bootstrap data: {0}")]
    Parse(#[from] serde_json::Error),
    /// Block table is inconsistent.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Two message names share an id.
    #[error("message id {id} is assigned to both {first:?} and {second:?}")]
    DuplicateMessageId {
        /// Shared id.
        id: u32,
        /// One name.
        first: String,
        /// The other name.
        second: String,
    },
}

/// Message name <-> id table.
#[derive(Debug, Clone, Default)]
pub struct MessageTable {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
}

impl MessageTable {
    /// Build from `(name, id)` pairs.
    pub fn new<I, S>(entries: I) -> Result<Self, BootstrapError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (name, id) in entries {
            let name = name.into();
            if let Some(existing) = table.by_id.get(&id) {
                if *existing != name {
                    return Err(BootstrapError::DuplicateMessageId {
                        id,
                        first: existing.clone(),
                        second: name,
                    });
                }
            }
            table.by_id.insert(id, name.clone());
            table.by_name.insert(name, id);
        }
        Ok(table)
    }

    /// Id assigned to `name`.
    pub fn id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Name assigned to `id`.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Number of known messages.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct BootstrapDocument {
    #[serde(flatten)]
    schema: SchemaDocument,
    messages: HashMap<String, u32>,
}

/// Everything the client needs from the backend before joining a world.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// Block lookup tables.
    pub schema: Arc<BlockSchema>,
    /// Message lookup table.
    pub messages: Arc<MessageTable>,
}

impl Bootstrap {
    /// Assemble from already-built tables.
    pub fn new(schema: BlockSchema, messages: MessageTable) -> Self {
        Self {
            schema: Arc::new(schema),
            messages: Arc::new(messages),
        }
    }

    /// Parse `{ "blocks": [...], "aliases": {...}, "messages": {...} }`.
    pub fn from_json_str(input: &str) -> Result<Self, BootstrapError> {
        let doc: BootstrapDocument = serde_json::from_str(input)?;
        let schema = doc.schema.build()?;
        let messages = MessageTable::new(doc.messages)?;
        debug!(
            blocks = schema.len(),
            messages = messages.len(),
            "loaded bootstrap tables"
        );
        Ok(Self::new(schema, messages))
    }

    /// Load a bootstrap document from disk.
    pub fn from_file(path: &Path) -> Result<Self, BootstrapError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
