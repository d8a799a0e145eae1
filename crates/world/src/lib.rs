//! Tile-grid data model: block schema, blocks, two-layer structures with a
//! palette-compressed file format, and paste-order strategies.

mod block;
mod paste_order;
mod schema;
mod structure;
mod structure_file;

pub use block::*;
pub use paste_order::*;
pub use schema::*;
pub use structure::*;
pub use structure_file::*;
