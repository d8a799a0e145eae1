//! Per-connection session loop.
//!
//! One task owns the [`World`] and its scheduler. Inbound frames, caller
//! commands, scheduler ticks and inter-batch timers are all handled from a
//! single `select!`, so they never interleave.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tilesync_net::{
    decode_server_message, encode_client_message, Bootstrap, ClientMessage, InitSnapshot,
    ServerMessage, Transport,
};
use tilesync_world::{CellChange, PasteOrder, Structure};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ClientConfig;
use crate::placement::{placement_message, BlockPlacement};
use crate::world::{PasteOptions, Player, World, WorldError};

/// Something that happened to the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    /// A cell was written by a broadcast (ours or another player's).
    BlockChanged {
        /// Who placed it.
        player_id: Option<i32>,
        /// The written cell.
        change: CellChange,
    },
    /// A player entered.
    PlayerJoined(Player),
    /// A player left.
    PlayerLeft(Player),
    /// The session ended; no further events follow.
    Closed,
}

/// Point-in-time copy of the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    /// Our player id.
    pub player_id: i32,
    /// World title.
    pub title: String,
    /// Owner name.
    pub owner: String,
    /// Play counter.
    pub play_count: i32,
    /// Grid contents.
    pub grid: Structure,
    /// Known players.
    pub players: Vec<Player>,
    /// Placements awaiting their echo.
    pub pending: usize,
}

#[derive(Debug, Clone)]
enum SessionStatus {
    Running,
    Closed,
    Failed {
        reason: String,
        unsent: Vec<BlockPlacement>,
    },
}

impl SessionStatus {
    fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }
}

enum Command {
    Paste {
        x: i32,
        y: i32,
        fragment: Structure,
        options: PasteOptions,
        reply: oneshot::Sender<Result<Vec<Vec<CellChange>>, WorldError>>,
    },
    Place {
        placement: BlockPlacement,
        reply: oneshot::Sender<Result<(), WorldError>>,
    },
    Copy {
        corners: (i32, i32, i32, i32),
        reply: oneshot::Sender<Structure>,
    },
    Snapshot {
        reply: oneshot::Sender<WorldSnapshot>,
    },
    Pending {
        reply: oneshot::Sender<usize>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Session actor state. Created and driven by [`Session::start`].
pub struct Session<T: Transport> {
    transport: T,
    bootstrap: Bootstrap,
    config: ClientConfig,
    world: World,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<WorldEvent>,
    outbox: VecDeque<Vec<BlockPlacement>>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl<T: Transport> Session<T> {
    /// Join the world on `transport`: wait for the snapshot, acknowledge it
    /// and hand the connection to a background task.
    #[instrument(skip_all)]
    pub async fn start(
        mut transport: T,
        bootstrap: Bootstrap,
        config: ClientConfig,
    ) -> Result<SessionHandle> {
        let init = timeout(config.init_timeout(), wait_for_init(&mut transport, &bootstrap))
            .await
            .context("timed out waiting for world snapshot")??;

        info!(
            player_id = init.player_id,
            title = %init.title,
            width = init.world.width(),
            height = init.world.height(),
            "joined world"
        );

        let ack = encode_client_message(&bootstrap.messages, &ClientMessage::InitReceived)?;
        transport
            .send(ack)
            .await
            .context("failed to acknowledge world snapshot")?;

        let world = World::from_init(
            bootstrap.schema.clone(),
            init,
            &config.scheduler,
            config.confirm,
        );
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(SessionStatus::Running);

        let handle = SessionHandle {
            commands: command_tx,
            events: event_tx.clone(),
            status: status_rx,
            default_order: config.paste_order,
        };

        let mut session = Session {
            transport,
            bootstrap,
            config,
            world,
            commands: command_rx,
            events: event_tx,
            outbox: VecDeque::new(),
            idle_waiters: Vec::new(),
        };

        tokio::spawn(async move {
            let status = match session.run().await {
                Ok(()) => {
                    session.shutdown();
                    info!("session closed");
                    SessionStatus::Closed
                }
                Err(err) => {
                    // Placements survive a broken connection so they can be resubmitted.
                    let unsent = session.world.take_pending();
                    session.shutdown();
                    warn!(
                        error = %format!("{err:#}"),
                        unsent = unsent.len(),
                        "session ended with error"
                    );
                    SessionStatus::Failed {
                        reason: format!("{err:#}"),
                        unsent,
                    }
                }
            };
            status_tx.send_replace(status);
        });

        Ok(handle)
    }

    async fn run(&mut self) -> Result<()> {
        let mut ticker = interval(self.config.scheduler.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let next_batch = sleep(Duration::ZERO);
        tokio::pin!(next_batch);
        let mut batch_armed = false;

        loop {
            tokio::select! {
                frame = self.transport.recv() => {
                    match frame.context("transport receive failed")? {
                        Some(bytes) => self.handle_frame(&bytes).await?,
                        None => bail!("server closed the connection"),
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            return Ok(());
                        }
                    }
                    None => {
                        debug!("all session handles dropped");
                        return Ok(());
                    }
                },
                // The next tick waits until this one's batches are out.
                _ = ticker.tick(), if !batch_armed => {
                    self.outbox.extend(self.world.tick(Instant::now()));
                    batch_armed = self.send_next_batch(next_batch.as_mut()).await?;
                }
                _ = &mut next_batch, if batch_armed => {
                    batch_armed = self.send_next_batch(next_batch.as_mut()).await?;
                }
            }
        }
    }

    /// Send the next still-pending batch; returns whether the batch timer
    /// was armed for another one.
    async fn send_next_batch(&mut self, timer: Pin<&mut Sleep>) -> Result<bool> {
        while let Some(batch) = self.outbox.pop_front() {
            // Echoes can retire entries between the tick and their turn to go out.
            let batch: Vec<BlockPlacement> = batch
                .into_iter()
                .filter(|placement| self.world.is_pending(placement))
                .collect();
            let Some(placed) = placement_message(&batch) else {
                continue;
            };

            trace!(
                layer = %placed.layer,
                block = placed.block.id(),
                cells = placed.positions.len(),
                "sending placement"
            );
            let frame =
                encode_client_message(&self.bootstrap.messages, &ClientMessage::PlaceBlocks(placed))?;
            self.transport
                .send(frame)
                .await
                .context("failed to send block placement")?;

            if self.outbox.is_empty() {
                return Ok(false);
            }
            timer.reset(Instant::now() + self.config.scheduler.inter_batch_delay());
            return Ok(true);
        }
        Ok(false)
    }

    async fn handle_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let message = decode_server_message(&self.bootstrap.messages, &self.bootstrap.schema, bytes)
            .context("malformed server message")?;

        match message {
            ServerMessage::Ping => {
                let pong = encode_client_message(&self.bootstrap.messages, &ClientMessage::Ping)?;
                self.transport
                    .send(pong)
                    .await
                    .context("failed to answer ping")?;
            }
            ServerMessage::BlockPlaced(placed) => {
                let changes = self.world.apply_block_placed(&placed)?;
                for change in changes {
                    let _ = self.events.send(WorldEvent::BlockChanged {
                        player_id: placed.player_id,
                        change,
                    });
                }
                self.notify_if_idle();
            }
            ServerMessage::PlayerJoined { id, name } => {
                let player = self.world.player_joined(id, name)?;
                info!(id, name = %player.name, "player joined");
                let _ = self.events.send(WorldEvent::PlayerJoined(player));
            }
            ServerMessage::PlayerLeft { id } => match self.world.player_left(id)? {
                Some(player) => {
                    info!(id, name = %player.name, "player left");
                    let _ = self.events.send(WorldEvent::PlayerLeft(player));
                }
                None => debug!(id, "unknown player left"),
            },
            ServerMessage::Init(_) => warn!("ignoring repeated world snapshot"),
            ServerMessage::Unknown { id, name } => {
                debug!(id, ?name, "ignoring unhandled message");
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Paste {
                x,
                y,
                fragment,
                options,
                reply,
            } => {
                let _ = reply.send(self.world.paste(x, y, &fragment, options));
            }
            Command::Place { placement, reply } => {
                let _ = reply.send(self.world.place(placement));
            }
            Command::Copy {
                corners: (x1, y1, x2, y2),
                reply,
            } => {
                let _ = reply.send(self.world.copy(x1, y1, x2, y2));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.world.pending_len());
            }
            Command::WaitIdle { reply } => {
                if self.world.is_idle() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::Close { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn snapshot(&self) -> WorldSnapshot {
        let mut players: Vec<Player> = self.world.players().cloned().collect();
        players.sort_by_key(|p| p.id);
        WorldSnapshot {
            player_id: self.world.player_id(),
            title: self.world.title().to_string(),
            owner: self.world.owner().to_string(),
            play_count: self.world.play_count(),
            grid: self.world.grid().clone(),
            players,
            pending: self.world.pending_len(),
        }
    }

    fn notify_if_idle(&mut self) {
        if self.world.is_idle() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Stop scheduling: pending placements and queued batches are dropped,
    /// drain waiters are released with an error.
    fn shutdown(&mut self) {
        if self.world.is_closed() {
            return;
        }
        self.world.close();
        self.outbox.clear();
        self.idle_waiters.clear();
        let _ = self.events.send(WorldEvent::Closed);
    }
}

async fn wait_for_init<T: Transport>(transport: &mut T, bootstrap: &Bootstrap) -> Result<InitSnapshot> {
    loop {
        let Some(bytes) = transport.recv().await? else {
            bail!("transport closed before world snapshot");
        };
        let message = decode_server_message(&bootstrap.messages, &bootstrap.schema, &bytes)
            .context("malformed message before world snapshot")?;
        match message {
            ServerMessage::Init(init) => return Ok(init),
            ServerMessage::Ping => {
                let pong = encode_client_message(&bootstrap.messages, &ClientMessage::Ping)?;
                transport.send(pong).await?;
            }
            other => debug!(?other, "ignoring message before world snapshot"),
        }
    }
}

/// Cloneable front door to a running session.
///
/// Every call is a message to the session task; once the session has ended
/// calls fail with [`WorldError::WorldClosed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<WorldEvent>,
    status: watch::Receiver<SessionStatus>,
    default_order: PasteOrder,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Paste { .. } => "Paste",
            Command::Place { .. } => "Place",
            Command::Copy { .. } => "Copy",
            Command::Snapshot { .. } => "Snapshot",
            Command::Pending { .. } => "Pending",
            Command::WaitIdle { .. } => "WaitIdle",
            Command::Close { .. } => "Close",
        };
        f.write_str(name)
    }
}

impl SessionHandle {
    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R, WorldError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| WorldError::WorldClosed)?;
        response.await.map_err(|_| WorldError::WorldClosed)
    }

    /// Paste `fragment` with its top-left corner at `(x, y)`, skipping empty
    /// cells, in the configured order.
    pub async fn paste(&self, x: i32, y: i32, fragment: Structure) -> Result<Vec<Vec<CellChange>>, WorldError> {
        let options = PasteOptions {
            write_empty: false,
            order: self.default_order,
        };
        self.paste_with(x, y, fragment, options).await
    }

    /// Paste with explicit options.
    pub async fn paste_with(
        &self,
        x: i32,
        y: i32,
        fragment: Structure,
        options: PasteOptions,
    ) -> Result<Vec<Vec<CellChange>>, WorldError> {
        self.request(|reply| Command::Paste {
            x,
            y,
            fragment,
            options,
            reply,
        })
        .await?
    }

    /// Paste including empty cells.
    pub async fn fill(&self, x: i32, y: i32, fragment: Structure) -> Result<Vec<Vec<CellChange>>, WorldError> {
        let options = PasteOptions {
            write_empty: true,
            order: self.default_order,
        };
        self.paste_with(x, y, fragment, options).await
    }

    /// Schedule one cell write.
    pub async fn place(&self, placement: BlockPlacement) -> Result<(), WorldError> {
        self.request(|reply| Command::Place { placement, reply }).await?
    }

    /// Copy a rectangle of the current grid.
    pub async fn copy(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Structure, WorldError> {
        self.request(|reply| Command::Copy {
            corners: (x1, y1, x2, y2),
            reply,
        })
        .await
    }

    /// Current world state.
    pub async fn snapshot(&self) -> Result<WorldSnapshot, WorldError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Placements awaiting their echo.
    pub async fn pending(&self) -> Result<usize, WorldError> {
        self.request(|reply| Command::Pending { reply }).await
    }

    /// Resolve once every pending placement has been confirmed.
    pub async fn wait_idle(&self) -> Result<(), WorldError> {
        self.request(|reply| Command::WaitIdle { reply }).await
    }

    /// Receive world events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.events.subscribe()
    }

    /// Stop the session, dropping pending placements. Closing twice is fine.
    pub async fn close(&self) {
        if self.request(|reply| Command::Close { reply }).await.is_err() {
            debug!("session already closed");
        }
    }

    /// Whether the session task has ended.
    pub fn is_closed(&self) -> bool {
        !self.status.borrow().is_running()
    }

    /// Placements that were still awaiting their echo when the session
    /// failed, oldest first. Empty while running and after [`close`].
    ///
    /// Feed them to [`SessionHandle::place`] on a new session to resume.
    ///
    /// [`close`]: SessionHandle::close
    pub fn unsent(&self) -> Vec<BlockPlacement> {
        match &*self.status.borrow() {
            SessionStatus::Failed { unsent, .. } => unsent.clone(),
            _ => Vec::new(),
        }
    }

    /// Wait for the session to end; errors carry the reason it failed.
    pub async fn closed(&self) -> Result<()> {
        let mut status = self.status.clone();
        let status = status
            .wait_for(|status| !status.is_running())
            .await
            .map_err(|_| anyhow!("session task ended without reporting status"))?
            .clone();
        match status {
            SessionStatus::Failed { reason, .. } => Err(anyhow!(reason)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use tilesync_net::ChannelTransport;
    use tilesync_testkit::{empty_init, foreground_fragment, test_bootstrap};

    #[tokio::test(start_paused = true)]
    async fn test_outbox_holds_at_most_one_tick_of_batches() {
        let bootstrap = test_bootstrap();
        let (client, _server) = ChannelTransport::pair();
        let config = ClientConfig {
            scheduler: SchedulerConfig {
                tick_interval_ms: 10,
                inter_batch_delay_ms: 50,
                retry_window_ms: 100,
                coalesce: false,
                ..SchedulerConfig::default()
            },
            ..ClientConfig::default()
        };
        let mut world = World::from_init(
            bootstrap.schema.clone(),
            empty_init(5, 4),
            &config.scheduler,
            config.confirm,
        );
        let column: &[&str] = &["brick"; 4];
        let fragment = foreground_fragment(&bootstrap, &vec![column; 5]);
        world.paste(0, 0, &fragment, PasteOptions::default()).unwrap();

        let (_commands_tx, commands) = mpsc::channel(1);
        let (events, _) = broadcast::channel(16);
        let mut session = Session {
            transport: client,
            bootstrap,
            config,
            world,
            commands,
            events,
            outbox: VecDeque::new(),
            idle_waiters: Vec::new(),
        };

        // Nothing is ever echoed, so every tick finds all twenty cells due again.
        let ran = timeout(Duration::from_secs(5), session.run()).await;
        assert!(ran.is_err(), "session should still be running");
        assert_eq!(session.world.pending_len(), 20);
        assert!(session.outbox.len() <= 20, "outbox grew to {}", session.outbox.len());
    }
}
