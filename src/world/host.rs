use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::persistence::{PersistenceResult, RegionFiles, WorldLoader, WorldLoaderBuilder};
use crate::thread_pool::{Scheduler, SchedulerConfig};
use crate::world::coords::{Position, SlicePos};
use crate::world::entity::{ComponentCodec, Entity, EntityData};
use crate::world::generation::{PerlinTerrainGenerator, WorldGenerator};
use crate::world::region_store::RegionStore;
use crate::world::slice::Slice;
use crate::world::structure::StructureRegistry;
use crate::world::tile::{TileId, TileRegistry, WallId};
use crate::world::tile_entity::TileEntityData;

/// Configuration for a hosted world.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Root directory holding the world's on-disk state.
    pub world_root: PathBuf,
    /// Dimension name; regions live under `dimensions/<name>/`.
    pub dimension: String,
    /// World seed fed to the generators.
    pub seed: u64,
    /// Worker pool sizing.
    pub scheduler: SchedulerConfig,
}

impl WorldConfig {
    pub fn new(world_root: impl Into<PathBuf>) -> Self {
        Self {
            world_root: world_root.into(),
            dimension: "overworld".to_owned(),
            seed: 0,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// The host-side world: owns the region store, the background pipeline and
/// the live entity set, and exposes tile and entity access to game code.
///
/// All methods taking `&mut self` belong to the tick thread. Tile reads
/// against regions that are not prepared observe barrier tiles rather than
/// world content.
pub struct HostWorld {
    seed: u64,
    clock: Arc<AtomicU64>,
    rng: StdRng,
    scheduler: Scheduler,
    loader: Arc<WorldLoader>,
    generator: Arc<WorldGenerator>,
    store: RegionStore,
    codec: ComponentCodec,

    entities: HashMap<u64, Entity>,
    pending_additions: Vec<Entity>,
    pending_removals: Vec<u64>,
    next_entity_id: u64,
    closed: bool,
}

impl HostWorld {
    /// Bootstraps a world: registries, loader steps and the default
    /// generator are all registered here, then frozen.
    pub fn new(config: WorldConfig) -> PersistenceResult<Self> {
        let scheduler = Scheduler::new(config.scheduler.clone());
        let files = RegionFiles::open(&config.world_root, &config.dimension)?;
        let clock = Arc::new(AtomicU64::new(0));
        let loader = WorldLoaderBuilder::new(files, scheduler.clone(), Arc::clone(&clock))
            .with_standard_steps()
            .build();

        let tiles = Arc::new(TileRegistry::with_defaults());
        let structures = Arc::new(StructureRegistry::with_defaults());
        let mut generator = WorldGenerator::new(
            scheduler.clone(),
            Arc::clone(&structures),
            config.seed,
            Arc::clone(loader.stats()),
        );
        generator.add_generator(PerlinTerrainGenerator::new(config.seed));
        let generator = Arc::new(generator);

        let store = RegionStore::new(
            Arc::clone(&loader),
            Arc::clone(&generator),
            tiles,
            structures,
        );

        Ok(Self {
            seed: config.seed,
            clock,
            rng: StdRng::seed_from_u64(config.seed),
            scheduler,
            loader,
            generator,
            store,
            codec: ComponentCodec::with_defaults(),
            entities: HashMap::new(),
            pending_additions: Vec::new(),
            pending_removals: Vec::new(),
            next_entity_id: 0,
            closed: false,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The world age, in ticks.
    pub fn age(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    pub fn loader(&self) -> &Arc<WorldLoader> {
        &self.loader
    }

    // ---- anchoring ------------------------------------------------------

    /// Anchors a slice: a client needs it resident. Tick thread only.
    pub fn anchor_slice(&mut self, slice: SlicePos) {
        self.store.anchor_slice(slice);
    }

    /// Releases a slice anchor. Tick thread only; calls must pair with
    /// [`Self::anchor_slice`].
    pub fn de_anchor_slice(&mut self, slice: SlicePos) {
        self.store.de_anchor_slice(slice);
    }

    // ---- tile access ----------------------------------------------------

    /// Runs `f` with the slice at `pos`, or with `None` when the owning
    /// region is not prepared.
    pub fn with_slice_at<T>(&self, pos: SlicePos, f: impl FnOnce(Option<&Slice>) -> T) -> T {
        match self.store.get(pos.region()) {
            Some(region) if region.is_prepared() => {
                let (sx, sy) = pos.local_in_region();
                region.with_slice(sx, sy, |slice| f(Some(slice)))
            }
            _ => f(None),
        }
    }

    fn aligned(pos: &Position, op: &str) -> bool {
        if pos.is_tile_aligned() {
            return true;
        }
        debug_assert!(false, "{} at non-tile-aligned position {}", op, pos);
        log::error!("{} at non-tile-aligned position {}; skipped", op, pos);
        false
    }

    /// The tile at a tile-aligned position. Reads of unmounted regions
    /// observe [`TileId::BARRIER`].
    pub fn get_tile_at(&self, pos: Position) -> TileId {
        if !Self::aligned(&pos, "get_tile_at") {
            return TileId::BARRIER;
        }
        let (tx, ty) = pos.local_tile();
        self.with_slice_at(pos.slice(), |slice| match slice {
            Some(slice) => slice.tile(tx, ty),
            None => TileId::BARRIER,
        })
    }

    /// The wall at a tile-aligned position; `NONE` for unmounted regions.
    pub fn get_wall_at(&self, pos: Position) -> WallId {
        if !Self::aligned(&pos, "get_wall_at") {
            return WallId::NONE;
        }
        let (tx, ty) = pos.local_tile();
        self.with_slice_at(pos.slice(), |slice| match slice {
            Some(slice) => slice.wall(tx, ty),
            None => WallId::NONE,
        })
    }

    /// The light level at a tile-aligned position; dark for unmounted
    /// regions.
    pub fn get_light_at(&self, pos: Position) -> u8 {
        if !Self::aligned(&pos, "get_light_at") {
            return 0;
        }
        let (tx, ty) = pos.local_tile();
        self.with_slice_at(pos.slice(), |slice| match slice {
            Some(slice) => slice.light(tx, ty),
            None => 0,
        })
    }

    pub fn get_tile_entity_at(&self, pos: Position) -> Option<TileEntityData> {
        if !Self::aligned(&pos, "get_tile_entity_at") {
            return None;
        }
        let (tx, ty) = pos.local_tile();
        self.with_slice_at(pos.slice(), |slice| {
            slice.and_then(|s| s.tile_entity(tx, ty).cloned())
        })
    }

    /// Sets a tile. Tick thread only; a write into an unprepared region is
    /// dropped with a log rather than silently absorbed.
    pub fn set_tile_at(&mut self, pos: Position, tile: TileId) {
        if !Self::aligned(&pos, "set_tile_at") {
            return;
        }
        self.mutate_slice(pos, "set_tile_at", |slice, tx, ty| slice.set_tile(tx, ty, tile));
    }

    /// Sets a wall. Tick thread only.
    pub fn set_wall_at(&mut self, pos: Position, wall: WallId) {
        if !Self::aligned(&pos, "set_wall_at") {
            return;
        }
        self.mutate_slice(pos, "set_wall_at", |slice, tx, ty| slice.set_wall(tx, ty, wall));
    }

    /// Sets or clears a tile entity. Tick thread only.
    pub fn set_tile_entity_at(&mut self, pos: Position, te: Option<TileEntityData>) {
        if !Self::aligned(&pos, "set_tile_entity_at") {
            return;
        }
        self.mutate_slice(pos, "set_tile_entity_at", |slice, tx, ty| {
            let _ = slice.set_tile_entity(tx, ty, te);
        });
    }

    fn mutate_slice(&mut self, pos: Position, op: &str, f: impl FnOnce(&mut Slice, usize, usize)) {
        let slice_pos = pos.slice();
        let (tx, ty) = pos.local_tile();
        match self.store.get(slice_pos.region()) {
            Some(region) if region.is_prepared() => {
                let (sx, sy) = slice_pos.local_in_region();
                region.with_slice_mut(sx, sy, |slice| f(slice, tx, ty));
            }
            _ => log::warn!("{} into unprepared {}; dropped", op, slice_pos.region()),
        }
    }

    // ---- entities -------------------------------------------------------

    pub fn allocate_entity_id(&mut self) -> u64 {
        self.next_entity_id += 1;
        self.next_entity_id
    }

    /// Buffers an entity for addition at the start of the next tick, so
    /// the live set never changes mid-iteration.
    pub fn add_entity(&mut self, entity: Entity) {
        self.pending_additions.push(entity);
    }

    /// Buffers an entity removal, applied at the start of the next tick.
    pub fn remove_entity(&mut self, id: u64) {
        self.pending_removals.push(id);
    }

    pub fn entity(&self, id: u64) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // ---- the tick -------------------------------------------------------

    /// One main-loop step: flush entity buffers, route generator output,
    /// wake dormant entities, update entities, then update regions and
    /// sweep for evictions.
    pub fn tick(&mut self) {
        let age = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        for id in self.pending_removals.drain(..) {
            self.entities.remove(&id);
        }
        for entity in self.pending_additions.drain(..) {
            self.entities.insert(entity.id, entity);
        }

        for (target, structure) in self.generator.drain_remote_structures() {
            self.store.route_structure(target, structure);
        }

        for region in self.store.snapshot() {
            if region.is_prepared() {
                if let Some(dormant) = region.take_entities_for_import() {
                    for data in dormant {
                        self.next_entity_id += 1;
                        let entity = Entity::import(self.next_entity_id, &data, &self.codec);
                        self.entities.insert(entity.id, entity);
                    }
                }
            }
        }

        for entity in self.entities.values_mut() {
            entity.update();
        }

        let Self {
            store,
            entities,
            rng,
            ..
        } = self;
        store.update_regions(age, rng, |region, evicting| {
            let pos = region.pos();
            let bound: Vec<EntityData> = entities
                .values()
                .filter(|e| e.body.pos.slice().region() == pos)
                .map(Entity::export)
                .collect();
            if evicting {
                entities.retain(|_, e| e.body.pos.slice().region() != pos);
            }
            region.set_entities(bound);
        });
    }

    /// Deterministic shutdown: stop accepting loads, drain them, save every
    /// prepared region synchronously, then drain the worker pool.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.loader.shutdown();
        self.loader.tracker().wait_until_idle();

        let Self {
            store, entities, ..
        } = self;
        store.close(|region, _| {
            let pos = region.pos();
            let bound: Vec<EntityData> = entities
                .values()
                .filter(|e| e.body.pos.slice().region() == pos)
                .map(Entity::export)
                .collect();
            entities.retain(|_, e| e.body.pos.slice().region() != pos);
            region.set_entities(bound);
        });

        if !self.scheduler.shutdown() {
            log::warn!("worker pool did not drain cleanly on close");
        }
    }
}

impl Drop for HostWorld {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::entity::Inert;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn world(root: &TempDir, seed: u64) -> HostWorld {
        let mut config = WorldConfig::new(root.path());
        config.seed = seed;
        HostWorld::new(config).expect("world bootstraps")
    }

    fn tick_until(world: &mut HostWorld, mut cond: impl FnMut(&HostWorld) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond(world) {
            assert!(Instant::now() < deadline, "condition never became true");
            world.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn cold_load_turns_barrier_into_terrain() {
        let root = TempDir::new().expect("temp dir");
        let mut w = world(&root, 99);

        let deep = Position::from_tile(8, -700);
        assert_eq!(w.get_tile_at(deep), TileId::BARRIER);

        // Anchor the slice containing the deep tile; region (0, -3) is
        // solid stone at that depth.
        w.anchor_slice(SlicePos::from_tile(8, -700));
        tick_until(&mut w, |w| w.get_tile_at(deep) != TileId::BARRIER);
        assert_eq!(w.get_tile_at(deep), TileId::STONE);
        w.close();
    }

    #[test]
    fn set_tile_roundtrips_through_save_and_load() {
        let root = TempDir::new().expect("temp dir");
        let pos = Position::from_tile(5, -600);
        {
            let mut w = world(&root, 7);
            w.anchor_slice(SlicePos::from_tile(5, -600));
            tick_until(&mut w, |w| w.get_tile_at(pos) != TileId::BARRIER);
            w.set_tile_at(pos, TileId::GLOW);
            w.set_tile_entity_at(
                pos,
                Some(TileEntityData::new("chest", json!({"slots": []}))),
            );
            w.close();
        }
        {
            let mut w = world(&root, 7);
            w.anchor_slice(SlicePos::from_tile(5, -600));
            tick_until(&mut w, |w| w.get_tile_at(pos) != TileId::BARRIER);
            assert_eq!(w.get_tile_at(pos), TileId::GLOW);
            let te = w.get_tile_entity_at(pos).expect("tile entity survives");
            assert_eq!(te.kind, "chest");
            w.close();
        }
    }

    #[test]
    fn writes_into_unmounted_regions_are_dropped() {
        let root = TempDir::new().expect("temp dir");
        let mut w = world(&root, 1);
        let pos = Position::from_tile(100_000, 100_000);
        w.set_tile_at(pos, TileId::GLOW);
        assert_eq!(w.get_tile_at(pos), TileId::BARRIER);
        w.close();
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "non-tile-aligned")]
    fn misaligned_tile_access_fails_fast() {
        let root = TempDir::new().expect("temp dir");
        let w = world(&root, 1);
        let _ = w.get_tile_at(Position::new(0, 0, 1.5, 2.0));
    }

    #[test]
    fn entity_additions_are_deferred_to_the_tick() {
        let root = TempDir::new().expect("temp dir");
        let mut w = world(&root, 3);
        let id = w.allocate_entity_id();
        w.add_entity(
            Entity::new(id, Position::from_tile(0, 0))
                .with_core(Box::new(Inert::new(json!({})))),
        );
        assert_eq!(w.entity_count(), 0);
        w.tick();
        assert_eq!(w.entity_count(), 1);

        w.remove_entity(id);
        assert_eq!(w.entity_count(), 1);
        w.tick();
        assert_eq!(w.entity_count(), 0);
        w.close();
    }

    #[test]
    fn entities_hibernate_with_their_region() {
        let root = TempDir::new().expect("temp dir");
        let slice = SlicePos::from_tile(40, -600);
        {
            let mut w = world(&root, 11);
            w.anchor_slice(slice);
            tick_until(&mut w, |w| {
                w.get_tile_at(Position::from_tile(40, -600)) != TileId::BARRIER
            });
            let id = w.allocate_entity_id();
            w.add_entity(
                Entity::new(id, Position::from_tile(40, -600))
                    .with_core(Box::new(Inert::new(json!({"name": "totem"})))),
            );
            w.tick();
            assert_eq!(w.entity_count(), 1);
            w.close();
        }
        {
            let mut w = world(&root, 11);
            w.anchor_slice(slice);
            tick_until(&mut w, |w| w.entity_count() == 1);
            let entity = w.entities.values().next().expect("entity woke up");
            let export = entity.export();
            assert_eq!(
                export.core.expect("core component").payload["name"],
                "totem"
            );
            w.close();
        }
    }
}
