#![warn(missing_docs)]
//! Protocol layer: bootstrap tables, typed messages and the transport seam.

mod bootstrap;
mod protocol;
mod transport;

pub use bootstrap::{Bootstrap, BootstrapError, MessageTable};
pub use protocol::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    BlockPlaced, ClientMessage, InitSnapshot, ProtocolError, ServerMessage, BLOCK_PLACED, INIT,
    INIT_RECEIVED, MAX_WORLD_DIMENSION, PLAYER_JOINED, PLAYER_LEFT,
};
pub use transport::{ChannelTransport, Transport};
