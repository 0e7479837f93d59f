//! World generation: the generator contract and the background handoff
//! that drives registered generators under the region's generation permit.

mod terrain;

pub use terrain::PerlinTerrainGenerator;

use std::sync::Arc;

use crate::persistence::RegionCallback;
use crate::stats::{bump, WorldStats};
use crate::thread_pool::Scheduler;
use crate::world::coords::RegionPos;
use crate::world::region::Region;
use crate::world::structure::{ClearingQueue, QueuedStructure, StructureRegistry};

/// What a generator sees while it runs: the world seed plus a sink for
/// structures, including ones that target neighbouring regions.
pub struct GenContext<'a> {
    pub seed: u64,
    region: &'a Region,
    remote: &'a ClearingQueue<(RegionPos, QueuedStructure)>,
}

impl<'a> GenContext<'a> {
    pub(crate) fn new(
        seed: u64,
        region: &'a Region,
        remote: &'a ClearingQueue<(RegionPos, QueuedStructure)>,
    ) -> GenContext<'a> {
        GenContext {
            seed,
            region,
            remote,
        }
    }

    /// Queues a structure against `target`. Structures for the region being
    /// generated are queued on it directly; structures for other regions
    /// are routed through the tick thread, which owns region residency.
    pub fn add_structure(&self, target: RegionPos, structure: QueuedStructure) {
        if target == self.region.pos() {
            self.region.add_structure(structure);
        } else {
            self.remote.add((target, structure));
        }
    }
}

/// A terrain generator: a pure function of region and seed, writing tile,
/// wall and light data into the region's slices and queueing structures.
///
/// The engine guarantees exclusive slice access for the duration of the
/// call; implementations must not block on other regions.
pub trait RegionGenerator: Send + Sync {
    fn generate(&self, ctx: &GenContext<'_>, region: &Region);
}

/// Drives the registered generators on the shared scheduler.
///
/// Registration happens at bootstrap in a fixed order; generation for one
/// region runs all generators back to back under a single generation
/// permit.
pub struct WorldGenerator {
    scheduler: Scheduler,
    generators: Vec<Arc<dyn RegionGenerator>>,
    structures: Arc<StructureRegistry>,
    seed: u64,
    remote: ClearingQueue<(RegionPos, QueuedStructure)>,
    stats: Arc<WorldStats>,
}

impl WorldGenerator {
    pub fn new(
        scheduler: Scheduler,
        structures: Arc<StructureRegistry>,
        seed: u64,
        stats: Arc<WorldStats>,
    ) -> Self {
        Self {
            scheduler,
            generators: Vec::new(),
            structures,
            seed,
            remote: ClearingQueue::new(),
            stats,
        }
    }

    /// Registers a generator. Generators run in registration order.
    /// Bootstrap only.
    pub fn add_generator(&mut self, generator: impl RegionGenerator + 'static) {
        self.generators.push(Arc::new(generator));
    }

    /// Asynchronously generates a region (or, for an already-generated
    /// region with queued structures, implants those structures).
    pub fn generate(self: &Arc<Self>, region: Arc<Region>, callback: RegionCallback) {
        bump(&self.stats.gen.requests);
        let this = Arc::clone(self);
        let job = move || this.do_generate(region, callback);
        if let Err(job) = self.scheduler.execute(job) {
            job();
        }
    }

    fn do_generate(&self, region: Arc<Region>, callback: RegionCallback) {
        bump(&self.stats.gen.started);
        if !region.get_generation_permit() {
            // Someone else owns this step; back off.
            bump(&self.stats.gen.aborted);
            callback(region, false);
            return;
        }

        if !region.is_generated() {
            let ctx = GenContext {
                seed: self.seed,
                region: &region,
                remote: &self.remote,
            };
            for generator in &self.generators {
                generator.generate(&ctx, &region);
            }
            log::debug!("generated {}", region);
        }
        // Apply whatever is queued against this region while we still hold
        // exclusive access.
        region.implant_structures(&self.structures);
        region.set_generated();
        bump(&self.stats.gen.completed);
        callback(region, true);
    }

    /// Takes the structures queued for regions other than the one that was
    /// being generated. Drained by the tick thread, which routes them.
    pub fn drain_remote_structures(&self) -> Vec<(RegionPos, QueuedStructure)> {
        self.remote.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_pool::SchedulerConfig;
    use crate::world::tile::TileId;
    use crossbeam_channel::bounded;

    struct Checkerboard;

    impl RegionGenerator for Checkerboard {
        fn generate(&self, ctx: &GenContext<'_>, region: &Region) {
            region.with_slice_mut(0, 0, |s| {
                s.set_tile(0, 0, TileId::STONE);
            });
            // One local structure and one remote.
            ctx.add_structure(
                region.pos(),
                QueuedStructure::new("glow_pocket", 1, 1, 8, 8, 0, 0),
            );
            ctx.add_structure(
                RegionPos::new(region.pos().x + 1, region.pos().y),
                QueuedStructure::new("glow_pocket", 0, 0, 2, 2, -1, 0),
            );
        }
    }

    fn generator() -> (Arc<WorldGenerator>, Scheduler) {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let stats = Arc::new(WorldStats::default());
        let mut gen = WorldGenerator::new(
            scheduler.clone(),
            Arc::new(StructureRegistry::with_defaults()),
            1234,
            stats,
        );
        gen.add_generator(Checkerboard);
        (Arc::new(gen), scheduler)
    }

    #[test]
    fn generation_prepares_region_and_routes_structures() {
        let (gen, scheduler) = generator();
        let region = Arc::new(Region::new(RegionPos::new(0, 0)));
        assert!(region.get_load_permit());

        let (tx, rx) = bounded(1);
        gen.generate(
            Arc::clone(&region),
            Box::new(move |_, ok| {
                let _ = tx.send(ok);
            }),
        );
        assert!(rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("generation completes"));

        assert!(region.is_prepared());
        assert!(region.is_generated());
        region.with_slice(0, 0, |s| assert_eq!(s.tile(0, 0), TileId::STONE));
        // The local structure was implanted under the permit.
        region.with_slice(1, 1, |s| assert_eq!(s.tile(8, 8), TileId::GLOW));
        assert!(!region.has_queued_structures());

        let remote = gen.drain_remote_structures();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].0, RegionPos::new(1, 0));
        assert!(scheduler.shutdown());
    }

    #[test]
    fn generation_permit_is_exclusive() {
        let (gen, scheduler) = generator();
        let region = Arc::new(Region::new(RegionPos::new(0, 0)));
        assert!(region.get_load_permit());
        assert!(region.get_generation_permit());

        let (tx, rx) = bounded(1);
        gen.generate(
            Arc::clone(&region),
            Box::new(move |_, ok| {
                let _ = tx.send(ok);
            }),
        );
        // The permit is already held, so the handoff backs off.
        assert!(!rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("callback fires"));
        assert!(!region.is_prepared());
        assert!(scheduler.shutdown());
    }
}
