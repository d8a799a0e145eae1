//! Live mirror of a remote world.
//!
//! The grid only changes when the server says so: local pastes go through
//! the scheduler and land in the grid when their broadcast echo arrives.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tilesync_net::{BlockPlaced, InitSnapshot};
use tilesync_world::{
    order_changes, Block, BlockError, BlockSchema, CellChange, Layer, PasteOrder, Structure,
    StructureError,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::placement::{BlockPlacement, ConfirmMatch, PlacementPolicy};
use crate::scheduler::{ScheduleError, Scheduler};

/// Errors raised by world operations.
#[derive(Debug, Error)]
pub enum WorldError {
    /// The world was torn down.
    #[error("world is closed")]
    WorldClosed,
    /// A placement was rejected before scheduling.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// Grid access failed.
    #[error(transparent)]
    Structure(#[from] StructureError),
    /// A block could not be built.
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// A player present in the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Server-assigned id.
    pub id: i32,
    /// Display name.
    pub name: String,
}

/// Options for [`World::paste`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasteOptions {
    /// Also write empty fragment cells.
    pub write_empty: bool,
    /// Batch order for the changed cells.
    pub order: PasteOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Live,
    Closed,
}

/// World state plus the outgoing placement scheduler.
#[derive(Debug)]
pub struct World {
    schema: Arc<BlockSchema>,
    player_id: i32,
    title: String,
    owner: String,
    play_count: i32,
    grid: Structure,
    players: HashMap<i32, Player>,
    scheduler: Scheduler<PlacementPolicy>,
    lifecycle: Lifecycle,
}

impl World {
    /// Build from the server's initial snapshot.
    pub fn from_init(
        schema: Arc<BlockSchema>,
        init: InitSnapshot,
        scheduler: &SchedulerConfig,
        confirm: ConfirmMatch,
    ) -> Self {
        let policy = PlacementPolicy::new(init.world.width(), init.world.height(), confirm);
        debug!(
            title = %init.title,
            width = init.world.width(),
            height = init.world.height(),
            "world created from snapshot"
        );
        Self {
            schema,
            player_id: init.player_id,
            title: init.title,
            owner: init.owner,
            play_count: init.play_count,
            grid: init.world,
            players: HashMap::new(),
            scheduler: Scheduler::new(policy, scheduler),
            lifecycle: Lifecycle::Live,
        }
    }

    /// Our own player id.
    pub fn player_id(&self) -> i32 {
        self.player_id
    }

    /// World title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Owner name.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Play counter at join time.
    pub fn play_count(&self) -> i32 {
        self.play_count
    }

    /// Block schema shared with the session.
    pub fn schema(&self) -> &Arc<BlockSchema> {
        &self.schema
    }

    /// Current grid.
    pub fn grid(&self) -> &Structure {
        &self.grid
    }

    /// Block at a cell.
    pub fn block(&self, layer: Layer, x: u32, y: u32) -> Option<&Block> {
        self.grid.get(layer, x, y)
    }

    /// Whether the world was closed.
    pub fn is_closed(&self) -> bool {
        self.lifecycle == Lifecycle::Closed
    }

    fn ensure_live(&self) -> Result<(), WorldError> {
        match self.lifecycle {
            Lifecycle::Live => Ok(()),
            Lifecycle::Closed => Err(WorldError::WorldClosed),
        }
    }

    /// Schedule the cells of `fragment` that differ from the grid, counting
    /// writes still awaiting their echo as already applied.
    ///
    /// Returns once every change is admitted, without waiting for
    /// confirmation. The result lists the admitted changes in batch order.
    /// Nothing is admitted if any change is rejected.
    pub fn paste(
        &mut self,
        x: i32,
        y: i32,
        fragment: &Structure,
        options: PasteOptions,
    ) -> Result<Vec<Vec<CellChange>>, WorldError> {
        self.ensure_live()?;
        // A cell with a write in flight will hold that block once echoed.
        let in_flight: HashMap<(Layer, u32, u32), &Block> = self
            .scheduler
            .pending()
            .map(|p| ((p.layer, p.x, p.y), &p.block))
            .collect();
        let changes = self
            .grid
            .diff_by(fragment, x, y, options.write_empty, |change, current| {
                match in_flight.get(&(change.layer, change.x, change.y)) {
                    Some(pending) => *pending != &change.block,
                    None => current != &change.block,
                }
            });
        let batches = order_changes(options.order, changes);

        let placements: Vec<BlockPlacement> = batches
            .iter()
            .flatten()
            .cloned()
            .map(BlockPlacement::from)
            .collect();
        for placement in &placements {
            self.scheduler.verify(placement)?;
        }
        for placement in placements {
            self.admit(placement);
        }
        debug!(
            x,
            y,
            cells = batches.iter().map(Vec::len).sum::<usize>(),
            pending = self.scheduler.pending_len(),
            "paste admitted"
        );
        Ok(batches)
    }

    /// Paste writing empty cells too.
    pub fn fill(&mut self, x: i32, y: i32, fragment: &Structure) -> Result<Vec<Vec<CellChange>>, WorldError> {
        self.paste(
            x,
            y,
            fragment,
            PasteOptions {
                write_empty: true,
                ..PasteOptions::default()
            },
        )
    }

    /// Schedule a single cell write.
    pub fn place(&mut self, placement: BlockPlacement) -> Result<(), WorldError> {
        self.ensure_live()?;
        self.scheduler.verify(&placement)?;
        self.admit(placement);
        Ok(())
    }

    fn admit(&mut self, placement: BlockPlacement) {
        if self.scheduler.policy().confirm_match() == ConfirmMatch::Content {
            // Content keys differ per block; drop older writes to the cell so the newest wins.
            self.scheduler.cancel_where(|pending| {
                pending.layer == placement.layer
                    && pending.x == placement.x
                    && pending.y == placement.y
                    && pending.block != placement.block
            });
        }
        // Already verified.
        if let Err(err) = self.scheduler.enqueue(placement) {
            warn!(%err, "placement rejected after verification");
        }
    }

    /// Copy a rectangle of the current grid.
    pub fn copy(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> Structure {
        self.grid.copy(x1, y1, x2, y2)
    }

    /// Apply an inbound placement broadcast and retire matching entries.
    ///
    /// Positions outside the grid are skipped. Returns the cells written.
    pub fn apply_block_placed(&mut self, placed: &BlockPlaced) -> Result<Vec<CellChange>, WorldError> {
        self.ensure_live()?;
        let mut applied = Vec::with_capacity(placed.positions.len());
        for &(x, y) in &placed.positions {
            let placement = BlockPlacement {
                layer: placed.layer,
                x,
                y,
                block: placed.block.clone(),
            };
            if self.grid.get(placement.layer, x, y).is_none() {
                warn!(
                    x,
                    y,
                    player = ?placed.player_id,
                    "ignoring placement outside the world"
                );
                continue;
            }
            let key = self.scheduler.key_of(&placement);
            self.scheduler.confirm(&key);
            let change = CellChange::from(placement);
            self.grid.apply(&change)?;
            applied.push(change);
        }
        Ok(applied)
    }

    /// Record a player joining.
    pub fn player_joined(&mut self, id: i32, name: String) -> Result<Player, WorldError> {
        self.ensure_live()?;
        let player = Player { id, name };
        if let Some(previous) = self.players.insert(id, player.clone()) {
            debug!(id, old = %previous.name, "player id reused");
        }
        Ok(player)
    }

    /// Record a player leaving; unknown ids yield `None`.
    pub fn player_left(&mut self, id: i32) -> Result<Option<Player>, WorldError> {
        self.ensure_live()?;
        Ok(self.players.remove(&id))
    }

    /// Player by id.
    pub fn player(&self, id: i32) -> Option<&Player> {
        self.players.get(&id)
    }

    /// All known players, in no particular order.
    pub fn players(&self) -> impl Iterator<Item = &Player> + '_ {
        self.players.values()
    }

    /// Placements due at `now`, one inner vector per outgoing message.
    pub fn tick(&mut self, now: Instant) -> Vec<Vec<BlockPlacement>> {
        if self.is_closed() {
            return Vec::new();
        }
        self.scheduler.tick(now)
    }

    /// Whether this exact placement is still awaiting its echo.
    pub fn is_pending(&self, placement: &BlockPlacement) -> bool {
        self.scheduler.get(&self.scheduler.key_of(placement)) == Some(placement)
    }

    /// Number of placements awaiting their echo.
    pub fn pending_len(&self) -> usize {
        self.scheduler.pending_len()
    }

    /// True when no placement is pending.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// Remove every pending placement, oldest first.
    pub fn take_pending(&mut self) -> Vec<BlockPlacement> {
        let pending = self.scheduler.pending().cloned().collect();
        self.scheduler.clear();
        pending
    }

    /// Tear down: pending placements are dropped and later mutations fail.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        let dropped = self.scheduler.pending_len();
        self.scheduler.clear();
        self.lifecycle = Lifecycle::Closed;
        debug!(dropped, "world closed");
    }
}
