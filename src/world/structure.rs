use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants::world::SLICE_SIZE;
use crate::world::region::Region;
use crate::world::tile::TileId;

/// A thread-safe append/drain queue.
///
/// Any thread may [`add`](Self::add); draining empties the queue in one
/// swap. Writes made before an `add` happen-before reads of that element
/// during a drain, via the queue's lock.
#[derive(Debug, Default)]
pub struct ClearingQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> ClearingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, value: T) {
        self.items.lock().push(value);
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Removes and returns the queued elements, in insertion order.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Clone> ClearingQueue<T> {
    /// Copies the queued elements without draining them.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

/// A structure awaiting placement in a region, queued by the generator.
/// Structures may target the generating region itself or one of its
/// neighbours; they are applied once the target region is prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedStructure {
    /// Registry name of the structure.
    pub name: String,
    /// Slice coordinates relative to the target region, in slice lengths.
    pub slice_x: u8,
    pub slice_y: u8,
    /// Tile coordinates relative to that slice, in tile lengths.
    pub tile_x: u8,
    pub tile_y: u8,
    /// Offset of the originating region from the target, in region lengths.
    pub offset_x: i32,
    pub offset_y: i32,
}

impl QueuedStructure {
    pub fn new(
        name: impl Into<String>,
        slice_x: u8,
        slice_y: u8,
        tile_x: u8,
        tile_y: u8,
        offset_x: i32,
        offset_y: i32,
    ) -> Self {
        Self {
            name: name.into(),
            slice_x,
            slice_y,
            tile_x,
            tile_y,
            offset_x,
            offset_y,
        }
    }
}

/// A placeable structure. Implementations stamp tiles into the target
/// region; coordinates passed to [`place`](Self::place) are the queued
/// slice/tile coordinates, already relative to `region`.
pub trait Structure: Send + Sync {
    fn place(&self, region: &Region, slice_x: usize, slice_y: usize, tile_x: usize, tile_y: usize);
}

/// Registry of placeable structures, keyed by name. Built during bootstrap
/// and frozen; structures queued under an unknown name are dropped with a
/// warning.
pub struct StructureRegistry {
    structures: HashMap<String, Box<dyn Structure>>,
}

impl StructureRegistry {
    /// Registry holding the engine's built-in structures.
    pub fn with_defaults() -> Self {
        let mut b = StructureRegistryBuilder::new();
        b.register("glow_pocket", GlowPocket { radius: 1 });
        b.freeze()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Structure> {
        self.structures.get(name).map(|s| s.as_ref())
    }

    /// Applies a queued structure to the region it targets.
    pub fn apply(&self, region: &Region, queued: &QueuedStructure) {
        match self.get(&queued.name) {
            Some(structure) => structure.place(
                region,
                queued.slice_x as usize,
                queued.slice_y as usize,
                queued.tile_x as usize,
                queued.tile_y as usize,
            ),
            None => log::warn!(
                "dropping structure '{}' queued for {}: not registered",
                queued.name,
                region.pos()
            ),
        }
    }
}

/// Registration-phase counterpart of [`StructureRegistry`].
#[derive(Default)]
pub struct StructureRegistryBuilder {
    structures: HashMap<String, Box<dyn Structure>>,
}

impl StructureRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, structure: impl Structure + 'static) {
        self.structures.insert(name.to_owned(), Box::new(structure));
    }

    pub fn freeze(self) -> StructureRegistry {
        StructureRegistry {
            structures: self.structures,
        }
    }
}

/// Built-in structure: a small square pocket of glow tiles.
pub struct GlowPocket {
    pub radius: i32,
}

impl Structure for GlowPocket {
    fn place(&self, region: &Region, slice_x: usize, slice_y: usize, tile_x: usize, tile_y: usize) {
        let size = SLICE_SIZE as i32;
        let edge = crate::constants::world::REGION_SIZE_IN_TILES as i32;
        let cx = slice_x as i32 * size + tile_x as i32;
        let cy = slice_y as i32 * size + tile_y as i32;
        for dy in -self.radius..=self.radius {
            for dx in -self.radius..=self.radius {
                let (tx, ty) = (cx + dx, cy + dy);
                // Clip to the region; structures never wrap around its edge.
                if tx < 0 || ty < 0 || tx >= edge || ty >= edge {
                    continue;
                }
                let (sx, sy) = ((tx / size) as usize, (ty / size) as usize);
                region.with_slice_mut(sx, sy, |slice| {
                    slice.set_tile(
                        (tx % size) as usize,
                        (ty % size) as usize,
                        TileId::GLOW,
                    );
                });
            }
        }
    }
}
