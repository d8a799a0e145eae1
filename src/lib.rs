#![warn(missing_docs)]
//! tilesync - client for a tile-grid multiplayer world.
//!
//! Mirrors a remote world locally and pushes edits to it through a
//! scheduler that treats the server's broadcast echo as the only
//! acknowledgment. The member crates are re-exported here:
//!
//! - [`core`]: typed protocol values and frames
//! - [`world`]: block schema, structures and paste orders
//! - [`net`]: bootstrap tables, protocol messages, the transport seam
//! - [`client`]: scheduler, world mirror and session task

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

pub use tilesync_client as client;
pub use tilesync_core as core;
pub use tilesync_net as net;
pub use tilesync_world as world;

pub use tilesync_client::{
    BlockPlacement, ClientConfig, ConfirmMatch, PasteOptions, SchedulerConfig, Session,
    SessionHandle, WorldError, WorldEvent, WorldSnapshot,
};
pub use tilesync_net::{Bootstrap, ChannelTransport, Transport};
pub use tilesync_world::{Block, BlockSchema, CellChange, Layer, PasteOrder, Structure};

/// Join a world using a bootstrap document and a TOML config on disk.
///
/// A missing or unreadable config falls back to defaults; a bad bootstrap
/// document is an error.
pub async fn join<T: Transport>(
    transport: T,
    bootstrap_path: &Path,
    config_path: &Path,
) -> Result<SessionHandle> {
    let bootstrap = Bootstrap::from_file(bootstrap_path)
        .with_context(|| format!("failed to load bootstrap from {}", bootstrap_path.display()))?;
    let config = ClientConfig::load_from_path(config_path);
    info!(
        blocks = bootstrap.schema.len(),
        messages = bootstrap.messages.len(),
        "bootstrap loaded"
    );
    Session::start(transport, bootstrap, config).await
}
