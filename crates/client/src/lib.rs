#![warn(missing_docs)]
//! Client side of a tile-grid session: the world mirror, the placement
//! scheduler and the task that ties them to a transport.

mod config;
mod placement;
mod scheduler;
mod session;
mod world;

pub use config::{ClientConfig, SchedulerConfig};
pub use placement::{placement_message, BlockPlacement, ConfirmMatch, PlacementKey, PlacementPolicy};
pub use scheduler::{ScheduleError, SchedulePolicy, Scheduler};
pub use session::{Session, SessionHandle, WorldEvent, WorldSnapshot};
pub use world::{PasteOptions, Player, World, WorldError};
