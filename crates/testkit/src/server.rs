//! Scripted in-process server for session tests.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tilesync_net::{
    decode_client_message, encode_server_message, BlockPlaced, Bootstrap, ChannelTransport,
    ClientMessage, InitSnapshot, ServerMessage, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// How the scripted server reacts to the client.
#[derive(Debug, Clone)]
pub struct EchoOptions {
    /// Broadcast each placement back with the client's player id.
    pub echo: bool,
    /// Swallow this many placement messages before echoing.
    pub drop_first: usize,
    /// Ping the client right after the snapshot.
    pub ping_after_init: bool,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            echo: true,
            drop_first: 0,
            ping_after_init: false,
        }
    }
}

/// Server side of a [`ChannelTransport`] pair: sends the snapshot, records
/// every client message and echoes placements.
pub struct EchoServer {
    inject: mpsc::Sender<ServerMessage>,
    log: Arc<Mutex<Vec<(Instant, ClientMessage)>>>,
    task: JoinHandle<Result<()>>,
}

impl EchoServer {
    /// Spawn a server and return the client's end of the connection.
    pub fn spawn(bootstrap: Bootstrap, init: InitSnapshot, options: EchoOptions) -> (ChannelTransport, Self) {
        let (client, server) = ChannelTransport::pair();
        let (inject, injected) = mpsc::channel(64);
        let log = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(
            server,
            bootstrap,
            init,
            options,
            injected,
            Arc::clone(&log),
        ));
        (client, Self { inject, log, task })
    }

    /// Push a message to the client.
    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        self.inject
            .send(message)
            .await
            .context("echo server has stopped")
    }

    /// Everything the client sent so far.
    pub fn received(&self) -> Vec<ClientMessage> {
        self.received_at().into_iter().map(|(_, message)| message).collect()
    }

    /// Everything the client sent so far, with arrival times.
    pub fn received_at(&self) -> Vec<(Instant, ClientMessage)> {
        self.log.lock().expect("log poisoned").clone()
    }

    /// Placement messages the client sent so far.
    pub fn placements(&self) -> Vec<BlockPlaced> {
        self.placements_at().into_iter().map(|(_, placed)| placed).collect()
    }

    /// Placement messages with arrival times.
    pub fn placements_at(&self) -> Vec<(Instant, BlockPlaced)> {
        self.received_at()
            .into_iter()
            .filter_map(|(at, message)| match message {
                ClientMessage::PlaceBlocks(placed) => Some((at, placed)),
                _ => None,
            })
            .collect()
    }

    /// Number of pings the client answered.
    pub fn pongs(&self) -> usize {
        self.received()
            .iter()
            .filter(|message| matches!(message, ClientMessage::Ping))
            .count()
    }

    /// Disconnect the client and wait for the server task.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.inject);
        self.task.await.context("echo server task panicked")?
    }
}

async fn serve(
    mut transport: ChannelTransport,
    bootstrap: Bootstrap,
    init: InitSnapshot,
    options: EchoOptions,
    mut injected: mpsc::Receiver<ServerMessage>,
    log: Arc<Mutex<Vec<(Instant, ClientMessage)>>>,
) -> Result<()> {
    let player_id = init.player_id;
    let table = Arc::clone(&bootstrap.messages);
    transport
        .send(encode_server_message(&table, &ServerMessage::Init(init))?)
        .await?;
    if options.ping_after_init {
        transport
            .send(encode_server_message(&table, &ServerMessage::Ping)?)
            .await?;
    }

    let mut dropped = 0;
    loop {
        tokio::select! {
            frame = transport.recv() => {
                let Some(bytes) = frame? else {
                    debug!("client disconnected");
                    return Ok(());
                };
                let Some(message) = decode_client_message(&table, &bootstrap.schema, &bytes)? else {
                    continue;
                };
                log.lock().expect("log poisoned").push((Instant::now(), message.clone()));

                if let ClientMessage::PlaceBlocks(placed) = message {
                    if !options.echo {
                        continue;
                    }
                    if dropped < options.drop_first {
                        dropped += 1;
                        debug!(dropped, "swallowing placement");
                        continue;
                    }
                    let echo = ServerMessage::BlockPlaced(BlockPlaced {
                        player_id: Some(player_id),
                        ..placed
                    });
                    transport.send(encode_server_message(&table, &echo)?).await?;
                }
            }
            message = injected.recv() => match message {
                Some(message) => transport.send(encode_server_message(&table, &message)?).await?,
                None => return Ok(()),
            },
        }
    }
}
