//! Strata Engine: the world-persistence and generation core of a 2D
//! tile-based game.
//!
//! The world is an infinite plane of tiles partitioned into slices and
//! regions. Regions are loaded, generated, saved and evicted by a small
//! pipeline of background workers coordinated through per-region state
//! machines; the single tick thread owns residency and all world-facing
//! mutation. See [`world::HostWorld`] for the entry point.

pub mod constants;
pub mod persistence;
pub mod stats;
pub mod thread_pool;
pub mod world;

pub use persistence::{Document, PersistenceError, PersistenceResult, WorldLoader};
pub use stats::{LoadTracker, WorldStats};
pub use thread_pool::{Scheduler, SchedulerConfig};
pub use world::{
    Entity, HostWorld, Lifecycle, Position, Region, RegionPos, RegionStore, Slice, SlicePos,
    TileId, TileRegistry, WallId, WorldConfig,
};
