use noise::{NoiseFn, Perlin};

use crate::constants::world::{DEFAULT_LIGHT, REGION_SIZE, REGION_SIZE_IN_TILES, SLICE_SIZE};
use crate::world::coords::{slice_coord_from_tile, slice_in_region, tile_in_slice, RegionPos};
use crate::world::generation::{GenContext, RegionGenerator};
use crate::world::region::Region;
use crate::world::structure::QueuedStructure;
use crate::world::tile::{TileId, WallId};

/// Vertical amplitude of the large terrain features, in tiles.
const HILL_AMPLITUDE: f64 = 24.0;
/// Vertical amplitude of the small detail features, in tiles.
const DETAIL_AMPLITUDE: f64 = 6.0;
/// Thickness of the dirt layer under the surface.
const DIRT_DEPTH: i32 = 3;
/// How far below the surface seeded glow pockets sit.
const POCKET_DEPTH: i32 = 12;
/// One column in this many seeds a glow pocket.
const POCKET_RATE: u64 = 64;

/// Default terrain generator: a Perlin surface curve with grass on top,
/// dirt below, stone underneath, and occasional glow pockets seeded under
/// the surface (possibly crossing into neighbouring regions).
pub struct PerlinTerrainGenerator {
    height_noise: Perlin,
    detail_noise: Perlin,
}

impl PerlinTerrainGenerator {
    pub fn new(seed: u64) -> Self {
        let folded = (seed ^ (seed >> 32)) as u32;
        Self {
            height_noise: Perlin::new(folded),
            detail_noise: Perlin::new(folded.wrapping_add(1)),
        }
    }

    /// Surface height at a global tile column, in tiles. Zero is "sea
    /// level"; regions far above are all air, far below all stone.
    pub fn surface_height(&self, world_x: i32) -> i32 {
        let x = world_x as f64;
        let hills = self.height_noise.get([x * 0.01, 0.0]) * HILL_AMPLITUDE;
        let detail = self.detail_noise.get([x * 0.05, 0.0]) * DETAIL_AMPLITUDE;
        (hills + detail).floor() as i32
    }

    fn column_seeds_pocket(seed: u64, world_x: i32) -> bool {
        let mixed = (world_x as i64 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ seed;
        mixed % POCKET_RATE == 0
    }
}

impl RegionGenerator for PerlinTerrainGenerator {
    fn generate(&self, ctx: &GenContext<'_>, region: &Region) {
        let edge = REGION_SIZE_IN_TILES as i32;
        let base_x = region.pos().x * edge;
        let base_y = region.pos().y * edge;

        let heights: Vec<i32> = (0..edge).map(|tx| self.surface_height(base_x + tx)).collect();

        for sy in 0..REGION_SIZE {
            for sx in 0..REGION_SIZE {
                region.with_slice_mut(sx, sy, |slice| {
                    for ty in 0..SLICE_SIZE {
                        let world_y = base_y + (sy * SLICE_SIZE + ty) as i32;
                        for tx in 0..SLICE_SIZE {
                            let surface = heights[sx * SLICE_SIZE + tx];
                            let (tile, wall) = if world_y < surface - DIRT_DEPTH {
                                (TileId::STONE, WallId::STONE)
                            } else if world_y < surface {
                                (TileId::DIRT, WallId::DIRT)
                            } else if world_y == surface {
                                (TileId::GRASS, WallId::NONE)
                            } else {
                                (TileId::AIR, WallId::NONE)
                            };
                            slice.set_tile(tx, ty, tile);
                            slice.set_wall(tx, ty, wall);
                            slice.set_light(
                                tx,
                                ty,
                                if world_y > surface { DEFAULT_LIGHT } else { 0 },
                            );
                        }
                    }
                });
            }
        }

        // Seed glow pockets under the surface. Pocket centres near a region
        // edge land in the neighbouring region and are routed there.
        for tx in 0..edge {
            let world_x = base_x + tx;
            if !Self::column_seeds_pocket(ctx.seed, world_x) {
                continue;
            }
            let pocket_x = world_x + 2;
            let pocket_y = heights[tx as usize] - POCKET_DEPTH;
            // Only the region whose vertical span contains the pocket seeds
            // it, so each pocket is queued exactly once.
            if pocket_y < base_y || pocket_y >= base_y + edge {
                continue;
            }
            let target = RegionPos::from_tile(pocket_x, pocket_y);
            let origin = region.pos();
            ctx.add_structure(
                target,
                QueuedStructure::new(
                    "glow_pocket",
                    slice_in_region(slice_coord_from_tile(pocket_x)) as u8,
                    slice_in_region(slice_coord_from_tile(pocket_y)) as u8,
                    tile_in_slice(pocket_x) as u8,
                    tile_in_slice(pocket_y) as u8,
                    origin.x - target.x,
                    origin.y - target.y,
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::structure::ClearingQueue;

    fn generate(pos: RegionPos, seed: u64) -> (Region, Vec<(RegionPos, QueuedStructure)>) {
        let region = Region::new(pos);
        assert!(region.get_load_permit());
        let remote = ClearingQueue::new();
        let gen = PerlinTerrainGenerator::new(seed);
        let ctx = GenContext::new(seed, &region, &remote);
        gen.generate(&ctx, &region);
        let routed = remote.drain();
        (region, routed)
    }

    #[test]
    fn surface_column_is_layered() {
        // The surface always sits well within one region of sea level, so
        // generating the two regions around y = 0 covers every sample.
        let (above, _) = generate(RegionPos::new(0, 0), 42);
        let (below, _) = generate(RegionPos::new(0, -1), 42);
        let gen = PerlinTerrainGenerator::new(42);

        let tx = 0;
        let surface = gen.surface_height(tx);
        assert!(surface.abs() < REGION_SIZE_IN_TILES as i32 - DIRT_DEPTH - 2);

        let read = |world_y: i32| {
            let region = if world_y >= 0 { &above } else { &below };
            region.with_slice(
                slice_in_region(slice_coord_from_tile(tx)),
                slice_in_region(slice_coord_from_tile(world_y)),
                |s| s.tile(tile_in_slice(tx), tile_in_slice(world_y)),
            )
        };
        assert_eq!(read(surface), TileId::GRASS);
        assert_eq!(read(surface + 1), TileId::AIR);
        assert_eq!(read(surface - 1), TileId::DIRT);
        assert_eq!(read(surface - DIRT_DEPTH - 1), TileId::STONE);
    }

    #[test]
    fn generation_is_deterministic() {
        let (a, routed_a) = generate(RegionPos::new(3, -1), 777);
        let (b, routed_b) = generate(RegionPos::new(3, -1), 777);
        for sx in 0..REGION_SIZE {
            for sy in 0..REGION_SIZE {
                let ta = a.with_slice(sx, sy, |s| s.tiles_raw().collect::<Vec<_>>());
                let tb = b.with_slice(sx, sy, |s| s.tiles_raw().collect::<Vec<_>>());
                assert_eq!(ta, tb);
            }
        }
        assert_eq!(routed_a, routed_b);
    }

    #[test]
    fn deep_region_is_solid_stone() {
        let (region, _) = generate(RegionPos::new(0, -4), 9);
        region.with_slice(7, 7, |s| {
            assert_eq!(s.tile(3, 3), TileId::STONE);
            assert_eq!(s.light(3, 3), 0);
        });
    }

    #[test]
    fn sky_region_is_air() {
        let (region, _) = generate(RegionPos::new(0, 4), 9);
        region.with_slice(7, 7, |s| {
            assert_eq!(s.tile(3, 3), TileId::AIR);
            assert_eq!(s.light(3, 3), DEFAULT_LIGHT);
        });
    }
}
