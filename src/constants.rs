// Strata Engine constants.
//
// Every size and timing constant used by the region core lives here; both
// the world code and the persistence format reference these, so do not
// redefine them elsewhere.

/// Core world sizing. Slices and regions are square and power-of-two sized
/// so that all coordinate conversions reduce to shifts and masks.
pub mod world {
    /// The length of an edge of a slice, in tiles.
    pub const SLICE_SIZE: usize = 16;
    /// log2(SLICE_SIZE).
    pub const SLICE_SIZE_SHIFT: u32 = SLICE_SIZE.trailing_zeros();
    /// SLICE_SIZE - 1, usable as a coordinate mask.
    pub const SLICE_SIZE_MASK: i32 = SLICE_SIZE as i32 - 1;
    /// Tiles per slice.
    pub const SLICE_AREA: usize = SLICE_SIZE * SLICE_SIZE;

    /// The length of an edge of a region, in slices.
    pub const REGION_SIZE: usize = 16;
    /// log2(REGION_SIZE).
    pub const REGION_SIZE_SHIFT: u32 = REGION_SIZE.trailing_zeros();
    /// REGION_SIZE - 1, usable as a coordinate mask.
    pub const REGION_SIZE_MASK: i32 = REGION_SIZE as i32 - 1;
    /// Slices per region.
    pub const REGION_AREA: usize = REGION_SIZE * REGION_SIZE;

    /// The length of an edge of a region, in tiles.
    pub const REGION_SIZE_IN_TILES: usize = REGION_SIZE * SLICE_SIZE;
    /// log2(REGION_SIZE_IN_TILES).
    pub const REGION_TILE_SHIFT: u32 = REGION_SIZE_IN_TILES.trailing_zeros();

    /// Light level assumed for tiles with no stored light value.
    pub const DEFAULT_LIGHT: u8 = 15;
}

/// Timing constants.
pub mod timing {
    /// Game ticks per second.
    pub const TICKS_PER_SECOND: u64 = 60;

    /// How many ticks a region with no anchors remains resident before it
    /// may be evicted.
    pub const UNLOAD_GRACE_TICKS: i32 = 10 * TICKS_PER_SECOND as i32;

    /// Periodic saves are phase-spread over an 8x8 grid of region
    /// coordinates, one second apart, repeating every 64 seconds.
    pub const SAVE_STAGGER_WINDOW: u64 = 8 * 8 * TICKS_PER_SECOND;
}

/// Tile id constants (raw u16 values). Ids are dense; the registry in
/// `world::tile` maps them to names.
pub mod tiles {
    pub const AIR: u16 = 0;
    /// Sentinel non-traversable tile reported for unmounted regions.
    pub const BARRIER: u16 = 1;
    pub const STONE: u16 = 2;
    pub const DIRT: u16 = 3;
    pub const GRASS: u16 = 4;
    pub const GLOW: u16 = 5;

    /// Games define their own tiles starting from this id.
    pub const GAME_TILE_START: u16 = 100;
}

/// Wall id constants. Walls share the dense-id discipline of tiles.
pub mod walls {
    pub const NONE: u16 = 0;
    pub const STONE: u16 = 1;
    pub const DIRT: u16 = 2;
}
