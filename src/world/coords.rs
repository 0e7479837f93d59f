use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::constants::world::{
    REGION_SIZE, REGION_SIZE_MASK, REGION_SIZE_SHIFT, SLICE_SIZE, SLICE_SIZE_MASK,
    SLICE_SIZE_SHIFT,
};

/// Converts a tile coordinate to the coordinate of the slice containing it.
///
/// Arithmetic shift, so this is floor division and behaves correctly for
/// negative coordinates.
#[inline]
pub fn slice_coord_from_tile(tile: i32) -> i32 {
    tile >> SLICE_SIZE_SHIFT
}

/// Converts a slice coordinate to the coordinate of the region containing it.
#[inline]
pub fn region_coord_from_slice(slice: i32) -> i32 {
    slice >> REGION_SIZE_SHIFT
}

/// Converts a tile coordinate to the coordinate of the region containing it.
#[inline]
pub fn region_coord_from_tile(tile: i32) -> i32 {
    tile >> (SLICE_SIZE_SHIFT + REGION_SIZE_SHIFT)
}

/// The coordinate of a tile local to its slice, in `0..SLICE_SIZE`.
#[inline]
pub fn tile_in_slice(tile: i32) -> usize {
    (tile & SLICE_SIZE_MASK) as usize
}

/// The coordinate of a slice local to its region, in `0..REGION_SIZE`.
#[inline]
pub fn slice_in_region(slice: i32) -> usize {
    (slice & REGION_SIZE_MASK) as usize
}

/// Converts a continuous coordinate to the tile containing it. Rounds toward
/// negative infinity, not toward zero.
#[inline]
pub fn tile_floor(c: f32) -> i32 {
    c.floor() as i32
}

/// Position of a slice in the world, in slice lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlicePos {
    pub x: i32,
    pub y: i32,
}

impl SlicePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The slice containing the given global tile coordinates.
    pub fn from_tile(tx: i32, ty: i32) -> Self {
        Self::new(slice_coord_from_tile(tx), slice_coord_from_tile(ty))
    }

    /// The region this slice belongs to.
    pub fn region(&self) -> RegionPos {
        RegionPos::new(region_coord_from_slice(self.x), region_coord_from_slice(self.y))
    }

    /// This slice's index within its region, as `(x, y)` in `0..REGION_SIZE`.
    pub fn local_in_region(&self) -> (usize, usize) {
        (slice_in_region(self.x), slice_in_region(self.y))
    }
}

impl fmt::Display for SlicePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slice[{},{}]", self.x, self.y)
    }
}

/// Position of a region in the world, in region lengths. Used as the key of
/// the region store's map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPos {
    pub x: i32,
    pub y: i32,
}

impl RegionPos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The region containing the given global tile coordinates.
    pub fn from_tile(tx: i32, ty: i32) -> Self {
        Self::new(region_coord_from_tile(tx), region_coord_from_tile(ty))
    }

    /// Folds both coordinates into a single integer key. Nearby regions
    /// never collide, and the low bits disperse well in the small tables
    /// the region map almost always has.
    pub fn key(&self) -> i64 {
        ((self.x as i64) << 18) ^ self.y as i64
    }

    /// The x-offset of this region's first slice, in slice lengths.
    pub fn offset_x(&self) -> i32 {
        self.x * REGION_SIZE as i32
    }

    /// The y-offset of this region's first slice, in slice lengths.
    pub fn offset_y(&self) -> i32 {
        self.y * REGION_SIZE as i32
    }

    /// The eight neighbouring region positions.
    pub fn neighbours(&self) -> [RegionPos; 8] {
        let (x, y) = (self.x, self.y);
        [
            RegionPos::new(x - 1, y - 1),
            RegionPos::new(x, y - 1),
            RegionPos::new(x + 1, y - 1),
            RegionPos::new(x - 1, y),
            RegionPos::new(x + 1, y),
            RegionPos::new(x - 1, y + 1),
            RegionPos::new(x, y + 1),
            RegionPos::new(x + 1, y + 1),
        ]
    }
}

impl Hash for RegionPos {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i64(self.key());
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region[{},{}]", self.x, self.y)
    }
}

/// A position in the world: a slice plus continuous local coordinates within
/// that slice, carrying sub-tile fractions.
///
/// A position is *aligned* when its local coordinates lie in
/// `[0, SLICE_SIZE)`; accessors that index tiles additionally require the
/// local coordinates to be whole numbers (*tile-aligned*).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub slice_x: i32,
    pub slice_y: i32,
    pub local_x: f32,
    pub local_y: f32,
}

impl Position {
    pub fn new(slice_x: i32, slice_y: i32, local_x: f32, local_y: f32) -> Self {
        Self {
            slice_x,
            slice_y,
            local_x,
            local_y,
        }
    }

    /// Builds an aligned position from global tile coordinates.
    pub fn from_tile(tx: i32, ty: i32) -> Self {
        Self {
            slice_x: slice_coord_from_tile(tx),
            slice_y: slice_coord_from_tile(ty),
            local_x: tile_in_slice(tx) as f32,
            local_y: tile_in_slice(ty) as f32,
        }
    }

    /// Builds an aligned position from continuous world coordinates.
    pub fn from_world(x: f32, y: f32) -> Self {
        let mut pos = Self::new(0, 0, x, y);
        pos.align();
        pos
    }

    /// The global x-coordinate of the tile this position is in.
    pub fn tile_x(&self) -> i32 {
        (self.slice_x << SLICE_SIZE_SHIFT) + tile_floor(self.local_x)
    }

    /// The global y-coordinate of the tile this position is in.
    pub fn tile_y(&self) -> i32 {
        (self.slice_y << SLICE_SIZE_SHIFT) + tile_floor(self.local_y)
    }

    /// The slice this position is in, assuming the position is aligned.
    pub fn slice(&self) -> SlicePos {
        SlicePos::new(self.slice_x, self.slice_y)
    }

    /// Whether the local coordinates are whole tile numbers within slice
    /// bounds. Tile accessors require this.
    pub fn is_tile_aligned(&self) -> bool {
        self.local_x.fract() == 0.0
            && self.local_y.fract() == 0.0
            && self.local_x >= 0.0
            && self.local_y >= 0.0
            && (self.local_x as usize) < SLICE_SIZE
            && (self.local_y as usize) < SLICE_SIZE
    }

    /// The tile-local coordinates, valid when [`Self::is_tile_aligned`].
    pub fn local_tile(&self) -> (usize, usize) {
        (self.local_x as usize, self.local_y as usize)
    }

    /// Renormalises so that the local coordinates lie in `[0, SLICE_SIZE)`,
    /// moving whole-slice overflow into the slice coordinates.
    pub fn align(&mut self) {
        let sx = tile_floor(self.local_x) >> SLICE_SIZE_SHIFT;
        let sy = tile_floor(self.local_y) >> SLICE_SIZE_SHIFT;
        self.slice_x += sx;
        self.slice_y += sy;
        self.local_x -= (sx << SLICE_SIZE_SHIFT) as f32;
        self.local_y -= (sy << SLICE_SIZE_SHIFT) as f32;
    }

    /// Offsets this position by continuous world deltas and realigns.
    pub fn add(&mut self, dx: f32, dy: f32) {
        self.local_x += dx;
        self.local_y += dy;
        self.align();
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})+({},{})",
            self.slice_x, self.slice_y, self.local_x, self.local_y
        )
    }
}
