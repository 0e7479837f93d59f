//! The world core: coordinates, slices, regions, residency, generation and
//! the host-side façade.
//!
//! Regions are the unit of storage, generation, anchoring and eviction. The
//! tick thread drives [`host::HostWorld::tick`]; the loader and generator
//! run on the shared worker pool and own a region's slice data only while
//! they hold the corresponding permit.

pub mod coords;
pub mod entity;
pub mod generation;
pub mod host;
pub mod region;
pub mod region_store;
pub mod slice;
pub mod structure;
pub mod tile;
pub mod tile_entity;

pub use coords::{Position, RegionPos, SlicePos};
pub use entity::{Component, ComponentCodec, Entity, EntityBody, EntityData};
pub use generation::{GenContext, PerlinTerrainGenerator, RegionGenerator, WorldGenerator};
pub use host::{HostWorld, WorldConfig};
pub use region::{Lifecycle, Region, RegionTickResult};
pub use region_store::RegionStore;
pub use slice::Slice;
pub use structure::{QueuedStructure, Structure, StructureRegistry, StructureRegistryBuilder};
pub use tile::{Tile, TileId, TileRegistry, TileRegistryBuilder, WallId};
pub use tile_entity::TileEntityData;
