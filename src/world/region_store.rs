use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;

use crate::persistence::WorldLoader;
use crate::world::coords::{RegionPos, SlicePos};
use crate::world::generation::WorldGenerator;
use crate::world::region::{Lifecycle, Region};
use crate::world::structure::{QueuedStructure, StructureRegistry};
use crate::world::tile::TileRegistry;

/// Owns every resident region and drives residency policy.
///
/// Membership is a concurrent map; the per-tick pass iterates a snapshot,
/// so the map's structure is never mutated mid-iteration. Anchoring and
/// de-anchoring are tick-thread operations; background jobs only reach
/// regions through the `Arc`s handed to them.
pub struct RegionStore {
    regions: DashMap<RegionPos, Arc<Region>>,
    loader: Arc<WorldLoader>,
    generator: Arc<WorldGenerator>,
    tiles: Arc<TileRegistry>,
    structures: Arc<StructureRegistry>,
}

impl RegionStore {
    pub fn new(
        loader: Arc<WorldLoader>,
        generator: Arc<WorldGenerator>,
        tiles: Arc<TileRegistry>,
        structures: Arc<StructureRegistry>,
    ) -> Self {
        Self {
            regions: DashMap::new(),
            loader,
            generator,
            tiles,
            structures,
        }
    }

    pub fn get(&self, pos: RegionPos) -> Option<Arc<Region>> {
        self.regions.get(&pos).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the region at `pos`, creating an empty `New` entry if none
    /// is resident.
    pub fn get_or_create(&self, pos: RegionPos) -> Arc<Region> {
        Arc::clone(
            self.regions
                .entry(pos)
                .or_insert_with(|| Arc::new(Region::new(pos)))
                .value(),
        )
    }

    pub fn resident_count(&self) -> usize {
        self.regions.len()
    }

    /// Snapshot of the resident regions, for iteration.
    pub fn snapshot(&self) -> Vec<Arc<Region>> {
        self.regions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Anchors the region containing `slice`, creating and loading it if
    /// necessary and padding the frontier around it. Tick thread only.
    pub fn anchor_slice(&self, slice: SlicePos) {
        let pos = slice.region();
        let region = self.get_or_create(pos);
        if region.anchor_slice() {
            region.set_active(true);
            // The neighbours learn about the new anchored region so they
            // refuse eviction while it stays anchored.
            for n in pos.neighbours() {
                self.get_or_create(n).add_active_neighbour();
            }
        }
        self.ensure_resident(&region);
    }

    /// Releases one anchor on the region containing `slice`. Tick thread
    /// only.
    pub fn de_anchor_slice(&self, slice: SlicePos) {
        let pos = slice.region();
        let region = match self.get(pos) {
            Some(r) => r,
            None => {
                log::warn!("de-anchor of slice {} in non-resident {}", slice, pos);
                return;
            }
        };
        if region.de_anchor_slice() {
            region.set_active(false);
            for n in pos.neighbours() {
                match self.get(n) {
                    Some(neighbour) => neighbour.remove_active_neighbour(),
                    None => log::warn!("neighbour {} of de-anchored {} not resident", n, pos),
                }
            }
        }
    }

    /// Kicks off loading (and, through the load callback, generation) if
    /// this region has not started loading yet.
    fn ensure_resident(&self, region: &Arc<Region>) {
        if !region.get_load_permit() {
            return;
        }
        let generator = Arc::clone(&self.generator);
        self.loader.load_region(
            Arc::clone(region),
            true,
            Box::new(move |region, success| {
                if !success {
                    log::warn!("load of {} failed; region stays unmounted", region);
                    return;
                }
                if !region.is_prepared() {
                    generator.generate(
                        region,
                        Box::new(|region, ok| {
                            if !ok {
                                log::debug!("generation handoff for {} backed off", region);
                            }
                        }),
                    );
                }
            }),
        );
    }

    /// Queues a structure against the region at `target`, creating the
    /// entry if the region is not resident. Tick thread only.
    pub fn route_structure(&self, target: RegionPos, structure: QueuedStructure) {
        self.get_or_create(target).add_structure(structure);
    }

    /// The per-tick pass: updates prepared regions, schedules staggered and
    /// pre-eviction saves, evicts expired regions, and prunes entries that
    /// never mounted.
    ///
    /// `pre_save` runs just before any save of a region is scheduled; the
    /// second argument is `true` for a pre-eviction save. The host world
    /// uses it to sync live entities into the region.
    pub fn update_regions<R: Rng>(
        &self,
        world_age: u64,
        rng: &mut R,
        mut pre_save: impl FnMut(&Arc<Region>, bool),
    ) {
        let mut to_remove: Vec<RegionPos> = Vec::new();

        for region in self.snapshot() {
            match region.lifecycle() {
                Lifecycle::Prepared => {
                    let tick = region.update(world_age, rng, &self.tiles, &self.structures);

                    if tick.save_due {
                        pre_save(&region, false);
                        self.loader
                            .save_region(Arc::clone(&region), false, Box::new(|_, _| {}));
                    }

                    if tick.unload
                        && region.anchored_slices() == 0
                        && region.active_neighbours() == 0
                    {
                        self.advance_eviction(&region, &mut pre_save, &mut to_remove);
                    }
                }
                Lifecycle::New => {
                    // Placeholder entries (frontier padding, structure
                    // targets) are pruned once nothing references them.
                    if region.anchored_slices() == 0
                        && region.active_neighbours() == 0
                        && !region.has_queued_structures()
                    {
                        to_remove.push(region.pos());
                    }
                }
                Lifecycle::Loading | Lifecycle::Generating => {
                    if region.load_failed() && region.anchored_slices() == 0 {
                        to_remove.push(region.pos());
                    }
                }
            }
        }

        for pos in to_remove {
            log::debug!("evicting {}", pos);
            self.regions.remove(&pos);
        }
    }

    /// Eviction is a two-phase affair: first schedule a final save, then
    /// remove the region once that save has verifiably landed. A save that
    /// fails (or was coalesced into one we cannot observe) is simply
    /// rescheduled on a later tick.
    fn advance_eviction(
        &self,
        region: &Arc<Region>,
        pre_save: &mut impl FnMut(&Arc<Region>, bool),
        to_remove: &mut Vec<RegionPos>,
    ) {
        if region.begin_eviction_save() {
            pre_save(region, true);
            self.loader.save_region(
                Arc::clone(region),
                false,
                Box::new(|region, ok| {
                    if ok {
                        region.mark_eviction_saved();
                    } else {
                        region.reset_eviction();
                    }
                }),
            );
        } else if region.is_save_idle() {
            if region.eviction_saved() {
                to_remove.push(region.pos());
            } else {
                region.reset_eviction();
            }
        }
    }

    /// Synchronously saves every prepared region and drops the store's
    /// contents. Called on shutdown after the loader stopped accepting
    /// loads.
    pub fn close(&self, mut pre_save: impl FnMut(&Arc<Region>, bool)) {
        for region in self.snapshot() {
            if region.is_prepared() {
                pre_save(&region, true);
                self.loader
                    .save_region(Arc::clone(&region), true, Box::new(|_, _| {}));
                region.wait_until_saved();
            }
        }
        self.regions.clear();
    }
}
