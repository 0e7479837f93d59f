use std::collections::HashMap;

use crate::constants::world::{DEFAULT_LIGHT, SLICE_AREA, SLICE_SIZE};
use crate::world::tile::{TileId, WallId};
use crate::world::tile_entity::TileEntityData;

/// A square of `SLICE_SIZE x SLICE_SIZE` tiles.
///
/// Slices hold dense rows for tile ids, wall ids and light bytes, plus a
/// sparse map of tile entities. They have no lifecycle of their own; they
/// are created with their region and dropped with it.
#[derive(Debug, Clone)]
pub struct Slice {
    tiles: Vec<TileId>,
    walls: Vec<WallId>,
    light: Vec<u8>,
    tile_entities: HashMap<(u8, u8), TileEntityData>,
}

impl Slice {
    /// Creates a slice filled with the given tile, no walls, default light.
    pub fn filled(tile: TileId) -> Self {
        Self {
            tiles: vec![tile; SLICE_AREA],
            walls: vec![WallId::NONE; SLICE_AREA],
            light: vec![DEFAULT_LIGHT; SLICE_AREA],
            tile_entities: HashMap::new(),
        }
    }

    /// Creates an air-filled slice.
    pub fn empty() -> Self {
        Self::filled(TileId::AIR)
    }

    /// Rebuilds a slice from raw persisted rows. Lengths must match
    /// `SLICE_AREA`; the caller validates before construction.
    pub fn from_rows(tiles: Vec<TileId>, walls: Vec<WallId>, light: Vec<u8>) -> Self {
        debug_assert_eq!(tiles.len(), SLICE_AREA);
        debug_assert_eq!(walls.len(), SLICE_AREA);
        debug_assert_eq!(light.len(), SLICE_AREA);
        Self {
            tiles,
            walls,
            light,
            tile_entities: HashMap::new(),
        }
    }

    #[inline]
    fn index(x: usize, y: usize) -> usize {
        debug_assert!(
            x < SLICE_SIZE && y < SLICE_SIZE,
            "slice coordinates out of bounds: ({}, {})",
            x,
            y
        );
        y * SLICE_SIZE + x
    }

    pub fn tile(&self, x: usize, y: usize) -> TileId {
        self.tiles[Self::index(x, y)]
    }

    pub fn set_tile(&mut self, x: usize, y: usize, tile: TileId) {
        self.tiles[Self::index(x, y)] = tile;
    }

    pub fn wall(&self, x: usize, y: usize) -> WallId {
        self.walls[Self::index(x, y)]
    }

    pub fn set_wall(&mut self, x: usize, y: usize, wall: WallId) {
        self.walls[Self::index(x, y)] = wall;
    }

    pub fn light(&self, x: usize, y: usize) -> u8 {
        self.light[Self::index(x, y)]
    }

    pub fn set_light(&mut self, x: usize, y: usize, level: u8) {
        self.light[Self::index(x, y)] = level;
    }

    pub fn tile_entity(&self, x: usize, y: usize) -> Option<&TileEntityData> {
        self.tile_entities.get(&(x as u8, y as u8))
    }

    /// Sets or clears the tile entity at the given local coordinates,
    /// returning the previous occupant if any.
    pub fn set_tile_entity(
        &mut self,
        x: usize,
        y: usize,
        te: Option<TileEntityData>,
    ) -> Option<TileEntityData> {
        debug_assert!(x < SLICE_SIZE && y < SLICE_SIZE);
        match te {
            Some(te) => self.tile_entities.insert((x as u8, y as u8), te),
            None => self.tile_entities.remove(&(x as u8, y as u8)),
        }
    }

    /// Iterates tile entities as `((x, y), data)`.
    pub fn tile_entities(&self) -> impl Iterator<Item = ((u8, u8), &TileEntityData)> {
        self.tile_entities.iter().map(|(&pos, te)| (pos, te))
    }

    /// Raw tile-id row, for the persistence steps.
    pub fn tiles_raw(&self) -> impl Iterator<Item = u16> + '_ {
        self.tiles.iter().map(|t| t.0)
    }

    /// Raw wall-id row, for the persistence steps.
    pub fn walls_raw(&self) -> impl Iterator<Item = u16> + '_ {
        self.walls.iter().map(|w| w.0)
    }

    /// Raw light row, for the persistence steps.
    pub fn light_raw(&self) -> &[u8] {
        &self.light
    }
}
