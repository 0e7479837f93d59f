use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::tiles;

/// Dense numeric id of a tile kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId(pub u16);

impl TileId {
    pub const AIR: TileId = TileId(tiles::AIR);
    pub const BARRIER: TileId = TileId(tiles::BARRIER);
    pub const STONE: TileId = TileId(tiles::STONE);
    pub const DIRT: TileId = TileId(tiles::DIRT);
    pub const GRASS: TileId = TileId(tiles::GRASS);
    pub const GLOW: TileId = TileId(tiles::GLOW);
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile:{}", self.0)
    }
}

/// Dense numeric id of a wall kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WallId(pub u16);

impl WallId {
    pub const NONE: WallId = WallId(crate::constants::walls::NONE);
    pub const STONE: WallId = WallId(crate::constants::walls::STONE);
    pub const DIRT: WallId = WallId(crate::constants::walls::DIRT);
}

/// Static properties of a tile kind.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: TileId,
    pub name: String,
    pub solid: bool,
    /// Light emitted by the tile itself; the random tick refreshes the
    /// stored light byte from this.
    pub luminance: u8,
}

/// Registry of tile kinds. Built once during bootstrap and frozen; no
/// registration is possible after construction.
#[derive(Debug)]
pub struct TileRegistry {
    by_id: Vec<Tile>,
    by_name: HashMap<String, TileId>,
}

impl TileRegistry {
    /// Builds the registry holding the engine's base tiles. Ids are assigned
    /// in registration order and match the constants in `constants::tiles`.
    pub fn with_defaults() -> Self {
        let mut b = TileRegistryBuilder::new();
        b.register("air", false, 0);
        b.register("barrier", true, 0);
        b.register("stone", true, 0);
        b.register("dirt", true, 0);
        b.register("grass", true, 0);
        b.register("glow", true, 11);
        b.freeze()
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.by_id.get(id.0 as usize)
    }

    pub fn id_of(&self, name: &str) -> Option<TileId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Registration-phase counterpart of [`TileRegistry`]. Dropped (via
/// [`TileRegistryBuilder::freeze`]) before the world starts ticking, which
/// is what makes late registration impossible.
#[derive(Debug, Default)]
pub struct TileRegistryBuilder {
    tiles: Vec<Tile>,
}

impl TileRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tile kind and returns its assigned id.
    pub fn register(&mut self, name: &str, solid: bool, luminance: u8) -> TileId {
        let id = TileId(self.tiles.len() as u16);
        self.tiles.push(Tile {
            id,
            name: name.to_owned(),
            solid,
            luminance,
        });
        id
    }

    pub fn freeze(self) -> TileRegistry {
        let by_name = self
            .tiles
            .iter()
            .map(|t| (t.name.clone(), t.id))
            .collect();
        TileRegistry {
            by_id: self.tiles,
            by_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ids_match_constants() {
        let reg = TileRegistry::with_defaults();
        assert_eq!(reg.id_of("air"), Some(TileId::AIR));
        assert_eq!(reg.id_of("barrier"), Some(TileId::BARRIER));
        assert_eq!(reg.id_of("grass"), Some(TileId::GRASS));
        assert_eq!(
            reg.get(TileId::GLOW).expect("glow registered").luminance,
            11
        );
    }

    #[test]
    fn barrier_is_solid() {
        let reg = TileRegistry::with_defaults();
        assert!(reg.get(TileId::BARRIER).expect("barrier registered").solid);
    }
}
