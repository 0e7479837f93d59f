use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};
use rand::Rng;

use crate::constants::timing::{SAVE_STAGGER_WINDOW, TICKS_PER_SECOND, UNLOAD_GRACE_TICKS};
use crate::constants::world::{REGION_SIZE, SLICE_SIZE};
use crate::world::coords::RegionPos;
use crate::world::entity::EntityData;
use crate::world::slice::Slice;
use crate::world::structure::{ClearingQueue, QueuedStructure, StructureRegistry};
use crate::world::tile::TileRegistry;

/// Lifecycle states of a region.
///
/// - `New`: freshly constructed, not usable. Transitions to `Loading` via
///   [`Region::get_load_permit`].
/// - `Loading`: owned by the world loader. Also occupied by a region whose
///   on-disk data was read but which still needs generation or structure
///   processing. Transitions to `Generating` via
///   [`Region::get_generation_permit`], or directly to `Prepared` via
///   [`Region::set_generated`] when no generation is needed.
/// - `Generating`: owned by the world generator. Transitions to `Prepared`
///   via [`Region::set_generated`].
/// - `Prepared`: loaded and generated; safe for world code to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    New = 0,
    Loading = 1,
    Generating = 2,
    Prepared = 3,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::New,
            1 => Lifecycle::Loading,
            2 => Lifecycle::Generating,
            _ => Lifecycle::Prepared,
        }
    }
}

/// Save states, kept separate from [`Lifecycle`] because a save can overlap
/// any lifecycle state past `New`.
///
/// - `Idle`: not being saved.
/// - `Saving`: a saver currently owns the save slot.
/// - `Waiting`: a saver owns the slot and at least one more save was
///   requested meanwhile; those requests are coalesced into one catch-up.
/// - `IdleWaiter`: the save finished but the coalesced catch-up has not yet
///   claimed the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveState {
    Idle,
    Saving,
    Waiting,
    IdleWaiter,
}

/// What a region's per-tick update asks of the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegionTickResult {
    /// The unload countdown expired; the region may be evicted this tick.
    pub unload: bool,
    /// The staggered save interval came up for this region.
    pub save_due: bool,
}

/// A square of `REGION_SIZE x REGION_SIZE` slices: the unit of storage,
/// generation, anchoring and eviction.
///
/// Thread roles: the tick thread owns the residency fields (anchors,
/// neighbour count, unload countdown); loader and generator workers own the
/// slice grid while they hold the corresponding permit; savers read the
/// slice grid concurrently with the tick thread, which is why every slice
/// sits behind its own lock. A serialised snapshot may interleave mid-tick
/// state across slices but is always consistent within one slice.
pub struct Region {
    pos: RegionPos,
    slices: Vec<RwLock<Slice>>,

    state: AtomicU8,
    generated: AtomicBool,
    load_failed: AtomicBool,

    save_state: Mutex<SaveState>,
    save_cond: Condvar,

    /// Slices inside this region currently anchored by clients. Mutated by
    /// the tick thread only.
    anchored_slices: AtomicU32,
    /// Neighbouring regions that are currently anchored. Mutated by the
    /// tick thread only.
    active_neighbours: AtomicU32,
    /// Ticks until unload; `-1` while the region is anchored.
    ticks_to_unload: AtomicI32,
    /// Whether this region contributes to the residency frontier.
    active: AtomicBool,
    /// World age at which this region was last persisted.
    last_saved: AtomicU64,

    /// Eviction bookkeeping: a final save has been scheduled / completed.
    eviction_save_queued: AtomicBool,
    eviction_saved: AtomicBool,

    structures: ClearingQueue<QueuedStructure>,

    /// Entities bound to this region, as of load or the latest pre-save
    /// sync. Drained into the live world once per residency.
    entities: Mutex<Vec<EntityData>>,
    entities_imported: AtomicBool,
}

impl Region {
    pub fn new(pos: RegionPos) -> Self {
        let slices = (0..REGION_SIZE * REGION_SIZE)
            .map(|_| RwLock::new(Slice::empty()))
            .collect();
        Self {
            pos,
            slices,
            state: AtomicU8::new(Lifecycle::New as u8),
            generated: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            save_state: Mutex::new(SaveState::Idle),
            save_cond: Condvar::new(),
            anchored_slices: AtomicU32::new(0),
            active_neighbours: AtomicU32::new(0),
            ticks_to_unload: AtomicI32::new(-1),
            active: AtomicBool::new(false),
            last_saved: AtomicU64::new(0),
            eviction_save_queued: AtomicBool::new(false),
            eviction_saved: AtomicBool::new(false),
            structures: ClearingQueue::new(),
            entities: Mutex::new(Vec::new()),
            entities_imported: AtomicBool::new(false),
        }
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    // ---- lifecycle state machine ----------------------------------------

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempts to claim the load permit. Loader use only; a `false` return
    /// means another thread owns loading (or the region is past it).
    pub fn get_load_permit(&self) -> bool {
        self.transition(Lifecycle::New, Lifecycle::Loading)
    }

    /// Attempts to claim the generation permit. Generator use only.
    pub fn get_generation_permit(&self) -> bool {
        self.transition(Lifecycle::Loading, Lifecycle::Generating)
    }

    /// Marks the loader steps as complete. The region remains in `Loading`;
    /// preparation completes via [`Self::set_generated`] (already-generated
    /// data) or through the generator's permit.
    pub fn set_loaded(&self) {
        let s = self.lifecycle();
        if s != Lifecycle::Loading {
            log::warn!("set_loaded on {} in unexpected state {:?}", self.pos, s);
        }
    }

    /// Marks the region as generated and completes preparation where
    /// possible. Invoked by the loader when on-disk data was already
    /// generated, and by the generator when it finishes.
    ///
    /// When invoked from `Loading` with structures still queued, the region
    /// stays in `Loading` so the generator can claim a permit and implant
    /// them. A repeated call on a prepared region is rejected.
    pub fn set_generated(&self) {
        self.generated.store(true, Ordering::Release);
        match self.lifecycle() {
            Lifecycle::Loading => {
                if !self.has_queued_structures() {
                    self.transition(Lifecycle::Loading, Lifecycle::Prepared);
                }
            }
            Lifecycle::Generating => {
                self.transition(Lifecycle::Generating, Lifecycle::Prepared);
            }
            s => log::warn!("set_generated on {} in state {:?} ignored", self.pos, s),
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.lifecycle() == Lifecycle::Prepared
    }

    pub fn is_generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    /// Marks a failed load. The region is never mounted; the store prunes
    /// it once its anchors are released.
    pub fn mark_load_failed(&self) {
        self.load_failed.store(true, Ordering::Release);
    }

    pub fn load_failed(&self) -> bool {
        self.load_failed.load(Ordering::Acquire)
    }

    // ---- save state machine ---------------------------------------------

    /// Attempts to claim the save slot.
    ///
    /// Returns `true` iff the caller now owns the slot and must follow up
    /// with [`Self::finish_saving`]. Returns `false` when a save is already
    /// in flight; the request is then coalesced into the in-flight saver's
    /// catch-up pass. Claiming the slot acquires the region's save lock,
    /// which makes every modification published before this call visible to
    /// the granted save.
    pub fn get_save_permit(&self) -> bool {
        if self.lifecycle() == Lifecycle::New {
            log::warn!("save requested for {} before loading began", self.pos);
            return false;
        }
        let mut st = self.save_state.lock();
        match *st {
            SaveState::Idle | SaveState::IdleWaiter => {
                *st = SaveState::Saving;
                true
            }
            SaveState::Saving => {
                *st = SaveState::Waiting;
                false
            }
            SaveState::Waiting => false,
        }
    }

    /// Releases the save slot. Returns `true` when another save was
    /// requested while this one ran; the caller must then re-acquire the
    /// permit and run one catch-up save.
    pub fn finish_saving(&self) -> bool {
        let mut st = self.save_state.lock();
        let again = match *st {
            SaveState::Waiting => {
                *st = SaveState::IdleWaiter;
                true
            }
            SaveState::Saving => {
                *st = SaveState::Idle;
                false
            }
            other => {
                log::warn!("finish_saving on {} in save state {:?}", self.pos, other);
                false
            }
        };
        self.save_cond.notify_all();
        again
    }

    /// Blocks until no save is in flight or owed.
    pub fn wait_until_saved(&self) {
        let mut st = self.save_state.lock();
        while *st != SaveState::Idle {
            self.save_cond.wait(&mut st);
        }
    }

    pub fn is_save_idle(&self) -> bool {
        *self.save_state.lock() == SaveState::Idle
    }

    pub fn last_saved(&self) -> u64 {
        self.last_saved.load(Ordering::Relaxed)
    }

    pub fn set_last_saved(&self, world_age: u64) {
        self.last_saved.store(world_age, Ordering::Relaxed);
    }

    // ---- residency ------------------------------------------------------

    /// Anchors one slice. Tick thread only. Returns `true` when the region
    /// went from unanchored to anchored.
    pub(crate) fn anchor_slice(&self) -> bool {
        let first = self.anchored_slices.fetch_add(1, Ordering::Relaxed) == 0;
        if first {
            self.ticks_to_unload.store(-1, Ordering::Relaxed);
            self.reset_eviction();
        }
        first
    }

    /// Releases one slice anchor. Tick thread only. Returns `true` when the
    /// region went from anchored to unanchored.
    pub(crate) fn de_anchor_slice(&self) -> bool {
        match self
            .anchored_slices
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
        {
            Ok(prev) => prev == 1,
            Err(_) => {
                log::error!("unbalanced de_anchor_slice on {}", self.pos);
                false
            }
        }
    }

    pub fn anchored_slices(&self) -> u32 {
        self.anchored_slices.load(Ordering::Relaxed)
    }

    pub(crate) fn add_active_neighbour(&self) {
        self.active_neighbours.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remove_active_neighbour(&self) {
        if self
            .active_neighbours
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .is_err()
        {
            log::error!("unbalanced remove_active_neighbour on {}", self.pos);
        }
    }

    pub fn active_neighbours(&self) -> u32 {
        self.active_neighbours.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn ticks_to_unload(&self) -> i32 {
        self.ticks_to_unload.load(Ordering::Relaxed)
    }

    /// Whether every eviction condition currently holds.
    pub fn eviction_ready(&self) -> bool {
        self.anchored_slices() == 0
            && self.active_neighbours() == 0
            && self.ticks_to_unload() == 0
            && self.is_prepared()
            && self.is_save_idle()
    }

    /// Claims the right to schedule this region's final pre-eviction save.
    /// Returns `false` when one is already queued.
    pub(crate) fn begin_eviction_save(&self) -> bool {
        !self.eviction_save_queued.swap(true, Ordering::AcqRel)
    }

    /// Records that the pre-eviction save reached disk.
    pub(crate) fn mark_eviction_saved(&self) {
        self.eviction_saved.store(true, Ordering::Release);
    }

    pub(crate) fn eviction_saved(&self) -> bool {
        self.eviction_saved.load(Ordering::Acquire)
    }

    /// Clears eviction bookkeeping, on re-anchor or after a failed final
    /// save (which will be rescheduled).
    pub(crate) fn reset_eviction(&self) {
        self.eviction_save_queued.store(false, Ordering::Release);
        self.eviction_saved.store(false, Ordering::Release);
    }

    // ---- per-tick update ------------------------------------------------

    /// Advances the region by one tick. Tick thread only; the store calls
    /// this for every prepared region.
    pub fn update<R: Rng>(
        &self,
        world_age: u64,
        rng: &mut R,
        tiles: &TileRegistry,
        structures: &StructureRegistry,
    ) -> RegionTickResult {
        let mut result = RegionTickResult::default();
        if !self.is_prepared() {
            return result;
        }

        if self.anchored_slices() == 0 {
            let t = self.ticks_to_unload.load(Ordering::Relaxed);
            if t > 0 {
                self.ticks_to_unload.store(t - 1, Ordering::Relaxed);
            } else if t == -1 {
                self.ticks_to_unload
                    .store(UNLOAD_GRACE_TICKS, Ordering::Relaxed);
            } else {
                result.unload = true;
            }
        } else {
            self.ticks_to_unload.store(-1, Ordering::Relaxed);
            self.tick_tile(rng, tiles);

            // Periodic saves are phase-spread over an 8x8 grid of region
            // coordinates so nearby regions hit the disk on different
            // seconds.
            if world_age % SAVE_STAGGER_WINDOW == self.save_phase() {
                result.save_due = true;
            }
        }

        self.implant_structures(structures);
        result
    }

    fn save_phase(&self) -> u64 {
        (((self.pos.y & 7) * 8 + (self.pos.x & 7)) as u64) * TICKS_PER_SECOND
    }

    /// Updates one random tile. With 65536 tiles per region a given tile is
    /// touched on average once every ~18 minutes of anchored time.
    fn tick_tile<R: Rng>(&self, rng: &mut R, tiles: &TileRegistry) {
        let sx = rng.gen_range(0..REGION_SIZE);
        let sy = rng.gen_range(0..REGION_SIZE);
        let tx = rng.gen_range(0..SLICE_SIZE);
        let ty = rng.gen_range(0..SLICE_SIZE);
        self.with_slice_mut(sx, sy, |slice| {
            if let Some(tile) = tiles.get(slice.tile(tx, ty)) {
                if tile.luminance > slice.light(tx, ty) {
                    slice.set_light(tx, ty, tile.luminance);
                }
            }
        });
    }

    // ---- structures -----------------------------------------------------

    /// Queues a structure for placement in this region. Thread-safe.
    pub fn add_structure(&self, structure: QueuedStructure) {
        self.structures.add(structure);
    }

    pub fn has_queued_structures(&self) -> bool {
        !self.structures.is_empty()
    }

    /// Drains the structure queue, applying each entry. Called with the
    /// region prepared (tick thread) or under the generation permit.
    pub fn implant_structures(&self, registry: &StructureRegistry) {
        for queued in self.structures.drain() {
            registry.apply(self, &queued);
        }
    }

    /// Drains the structure queue without applying, for persistence.
    pub(crate) fn drain_structures(&self) -> Vec<QueuedStructure> {
        self.structures.drain()
    }

    /// Snapshot of the queued structures, for persistence; leaves the queue
    /// populated.
    pub(crate) fn snapshot_structures(&self) -> Vec<QueuedStructure> {
        self.structures.snapshot()
    }

    // ---- slices ---------------------------------------------------------

    /// Runs `f` with shared access to the slice at region-local `(sx, sy)`.
    pub fn with_slice<T>(&self, sx: usize, sy: usize, f: impl FnOnce(&Slice) -> T) -> T {
        f(&self.slices[Self::slice_index(sx, sy)].read())
    }

    /// Runs `f` with exclusive access to the slice at region-local
    /// `(sx, sy)`.
    pub fn with_slice_mut<T>(&self, sx: usize, sy: usize, f: impl FnOnce(&mut Slice) -> T) -> T {
        f(&mut self.slices[Self::slice_index(sx, sy)].write())
    }

    #[inline]
    fn slice_index(sx: usize, sy: usize) -> usize {
        debug_assert!(
            sx < REGION_SIZE && sy < REGION_SIZE,
            "slice index out of bounds: ({}, {})",
            sx,
            sy
        );
        sy * REGION_SIZE + sx
    }

    // ---- region-bound entities ------------------------------------------

    /// Replaces the region's bound-entity list (pre-save sync).
    pub fn set_entities(&self, entities: Vec<EntityData>) {
        *self.entities.lock() = entities;
    }

    pub(crate) fn push_entities(&self, entities: Vec<EntityData>) {
        self.entities.lock().extend(entities);
    }

    /// Snapshot of the bound entities, for persistence.
    pub fn entities_snapshot(&self) -> Vec<EntityData> {
        self.entities.lock().clone()
    }

    /// Takes the bound entities for import into the live world. Yields the
    /// list only once per residency.
    pub(crate) fn take_entities_for_import(&self) -> Option<Vec<EntityData>> {
        if self.entities_imported.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut *self.entities.lock()))
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("pos", &self.pos)
            .field("lifecycle", &self.lifecycle())
            .field("generated", &self.is_generated())
            .field("anchored_slices", &self.anchored_slices())
            .field("ticks_to_unload", &self.ticks_to_unload())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn region() -> Region {
        Region::new(RegionPos::new(0, 0))
    }

    #[test]
    fn load_permit_granted_once() {
        let r = region();
        assert_eq!(r.lifecycle(), Lifecycle::New);
        assert!(r.get_load_permit());
        assert!(!r.get_load_permit());
        assert_eq!(r.lifecycle(), Lifecycle::Loading);
    }

    #[test]
    fn generation_permit_requires_loading() {
        let r = region();
        assert!(!r.get_generation_permit());
        assert!(r.get_load_permit());
        assert!(r.get_generation_permit());
        assert!(!r.get_generation_permit());
        assert_eq!(r.lifecycle(), Lifecycle::Generating);
    }

    #[test]
    fn generator_completion_prepares() {
        let r = region();
        r.get_load_permit();
        r.get_generation_permit();
        r.set_generated();
        assert!(r.is_prepared());
        assert!(r.is_generated());
    }

    #[test]
    fn loaded_generated_region_prepares_without_generator() {
        let r = region();
        r.get_load_permit();
        r.set_loaded();
        r.set_generated();
        assert!(r.is_prepared());
    }

    #[test]
    fn queued_structures_hold_region_in_loading() {
        let r = region();
        r.get_load_permit();
        r.add_structure(QueuedStructure::new("glow_pocket", 0, 0, 4, 4, 0, 0));
        r.set_generated();
        assert_eq!(r.lifecycle(), Lifecycle::Loading);
        assert!(r.is_generated());
        // The generator claims the permit to implant, then finishes.
        assert!(r.get_generation_permit());
        let _ = r.drain_structures();
        r.set_generated();
        assert!(r.is_prepared());
    }

    #[test]
    fn double_generate_is_rejected() {
        let r = region();
        r.get_load_permit();
        r.get_generation_permit();
        r.set_generated();
        assert!(r.is_prepared());
        r.set_generated();
        assert!(r.is_prepared());
    }

    #[test]
    fn save_permit_coalesces() {
        let r = region();
        r.get_load_permit();

        assert!(r.get_save_permit());
        // Requests while saving coalesce into a single catch-up.
        assert!(!r.get_save_permit());
        assert!(!r.get_save_permit());
        assert!(!r.get_save_permit());

        assert!(r.finish_saving());
        assert!(r.get_save_permit());
        assert!(!r.finish_saving());
        assert!(r.is_save_idle());
    }

    #[test]
    fn save_permit_refused_before_loading() {
        let r = region();
        assert!(!r.get_save_permit());
    }

    #[test]
    fn concurrent_save_requests_run_exactly_two_saves() {
        let r = Arc::new(region());
        r.get_load_permit();

        let saves = Arc::new(std::sync::atomic::AtomicU32::new(0));
        // All requests race for the permit before the winner is allowed to
        // finish, so every one of them lands while the save is in flight.
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let r = r.clone();
                let saves = saves.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let granted = r.get_save_permit();
                    barrier.wait();
                    if granted {
                        loop {
                            saves.fetch_add(1, Ordering::Relaxed);
                            if !r.finish_saving() {
                                break;
                            }
                            if !r.get_save_permit() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("saver thread panicked");
        }

        // The in-flight save plus exactly one coalesced catch-up.
        assert_eq!(saves.load(Ordering::Relaxed), 2);
        assert!(r.is_save_idle());
        r.wait_until_saved();
    }

    #[test]
    fn unload_countdown_runs_grace_then_expires() {
        let r = region();
        r.get_load_permit();
        r.get_generation_permit();
        r.set_generated();

        let mut rng = StdRng::seed_from_u64(1);
        let tiles = TileRegistry::with_defaults();
        let structures = StructureRegistry::with_defaults();

        // First unanchored tick arms the countdown.
        assert!(!r.update(0, &mut rng, &tiles, &structures).unload);
        assert_eq!(r.ticks_to_unload(), UNLOAD_GRACE_TICKS);

        for age in 1..=UNLOAD_GRACE_TICKS as u64 {
            assert!(!r.update(age, &mut rng, &tiles, &structures).unload);
        }
        assert_eq!(r.ticks_to_unload(), 0);
        assert!(r
            .update(UNLOAD_GRACE_TICKS as u64 + 1, &mut rng, &tiles, &structures)
            .unload);
        assert!(r.eviction_ready());
    }

    #[test]
    fn anchoring_cancels_countdown() {
        let r = region();
        r.get_load_permit();
        r.get_generation_permit();
        r.set_generated();

        let mut rng = StdRng::seed_from_u64(2);
        let tiles = TileRegistry::with_defaults();
        let structures = StructureRegistry::with_defaults();

        r.update(0, &mut rng, &tiles, &structures);
        assert_eq!(r.ticks_to_unload(), UNLOAD_GRACE_TICKS);

        assert!(r.anchor_slice());
        assert_eq!(r.ticks_to_unload(), -1);
        r.update(1, &mut rng, &tiles, &structures);
        assert_eq!(r.ticks_to_unload(), -1);

        assert!(!r.anchor_slice());
        assert!(!r.de_anchor_slice());
        assert!(r.de_anchor_slice());
        assert_eq!(r.anchored_slices(), 0);
    }

    #[test]
    fn save_phase_staggers_across_grid() {
        let r00 = Region::new(RegionPos::new(0, 0));
        let r10 = Region::new(RegionPos::new(1, 0));
        let r01 = Region::new(RegionPos::new(0, 1));
        assert_eq!(r00.save_phase(), 0);
        assert_eq!(r10.save_phase(), TICKS_PER_SECOND);
        assert_eq!(r01.save_phase(), 8 * TICKS_PER_SECOND);
        // Negative coordinates mask onto the same 8x8 grid.
        let rn = Region::new(RegionPos::new(-1, -1));
        assert_eq!(rn.save_phase(), (7 * 8 + 7) as u64 * TICKS_PER_SECOND);
    }

    #[test]
    fn entities_import_only_once_per_residency() {
        let r = region();
        r.push_entities(vec![]);
        assert!(r.take_entities_for_import().is_some());
        assert!(r.take_entities_for_import().is_none());
    }
}
