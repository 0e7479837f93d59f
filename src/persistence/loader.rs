use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::persistence::steps::{
    EntityStep, RegionIoStep, SliceStep, StructureStep, TileEntityStep,
};
use crate::persistence::{Document, PersistenceError, PersistenceResult, RegionFiles};
use crate::stats::{bump, LoadTracker, WorldStats};
use crate::thread_pool::Scheduler;
use crate::world::region::Region;

/// Completion callback for load and save requests, invoked with the region
/// and whether the operation succeeded. Always invoked, including on
/// cancellation, so the requester can reconcile its bookkeeping.
pub type RegionCallback = Box<dyn FnOnce(Arc<Region>, bool) + Send + 'static>;

/// Manages the loading and saving of regions for one dimension.
///
/// Each load or save request becomes a job on the shared scheduler. Loader
/// and saver steps registered at bootstrap run in registration order; the
/// save path holds the region's save permit and honours its coalescing
/// contract.
///
/// Saves read the region without a defensive copy, so a document may mix
/// state from two adjacent ticks; what is guaranteed is that every
/// modification published before the final granted permit reaches disk.
pub struct WorldLoader {
    files: RegionFiles,
    scheduler: Scheduler,
    loaders: Vec<Arc<dyn RegionIoStep>>,
    savers: Vec<Arc<dyn RegionIoStep>>,
    cancel_loads: AtomicBool,
    stats: Arc<WorldStats>,
    tracker: Arc<LoadTracker>,
    clock: Arc<AtomicU64>,
}

impl WorldLoader {
    /// Asynchronously loads a region. The caller must already hold the
    /// region's load permit.
    ///
    /// `generate` records whether the requester intends to hand the region
    /// to the generator afterwards; the callback receives the region and a
    /// success flag either way.
    pub fn load_region(self: &Arc<Self>, region: Arc<Region>, generate: bool, callback: RegionCallback) {
        bump(&self.stats.load.requests);
        self.tracker.start_op();
        let this = Arc::clone(self);
        let job = move || this.do_load(region, generate, callback);
        if let Err(job) = self.scheduler.execute(job) {
            // Rejected by a shut-down pool; run inline so the callback
            // still fires and the tracker drains.
            job();
        }
    }

    fn do_load(&self, region: Arc<Region>, generate: bool, callback: RegionCallback) {
        bump(&self.stats.load.started);

        let result = self.run_load(&region, generate);
        match &result {
            Ok(()) => bump(&self.stats.load.completed),
            Err(e @ PersistenceError::Cancelled) => {
                log::debug!("load of {} dropped: {}", region, e);
                bump(&self.stats.load.aborted);
                region.mark_load_failed();
            }
            Err(e) => {
                log::error!("loading {} failed: {}", region, e);
                bump(&self.stats.load.failed);
                region.mark_load_failed();
            }
        }

        self.tracker.end_op();
        callback(region, result.is_ok());
    }

    /// The load itself. A step error leaves the region's state untouched;
    /// the caller flags the region so the store can prune it.
    fn run_load(&self, region: &Arc<Region>, generate: bool) -> PersistenceResult<()> {
        if self.cancel_loads.load(Ordering::Acquire) {
            return Err(PersistenceError::Cancelled);
        }

        match self.files.read(region.pos())? {
            Some(doc) => {
                let was_generated = doc.opt_bool("generated").unwrap_or(false);
                for step in &self.loaders {
                    step.load(region, &doc, was_generated)?;
                }
                region.set_loaded();
                if was_generated {
                    // Completes preparation unless structures are still
                    // queued, in which case the generator takes over.
                    region.set_generated();
                }
                log::debug!(
                    "loaded {} (generated={}, generate={})",
                    region,
                    was_generated,
                    generate
                );
            }
            None => {
                // Nothing on disk; the region is "loaded" empty and the
                // generator will fill it.
                region.set_loaded();
            }
        }
        Ok(())
    }

    /// Saves a region, on the current thread or a worker.
    ///
    /// The request is dropped silently when the region's save permit is
    /// refused; the save that holds the permit will cover it with its
    /// catch-up pass.
    pub fn save_region(
        self: &Arc<Self>,
        region: Arc<Region>,
        use_current_thread: bool,
        callback: RegionCallback,
    ) {
        bump(&self.stats.save.requests);
        if !region.get_save_permit() {
            return;
        }
        if use_current_thread {
            self.do_save(region, callback);
        } else {
            let this = Arc::clone(self);
            let job = move || this.do_save(region, callback);
            if let Err(job) = self.scheduler.execute(job) {
                // The permit is held; run inline rather than lose the save.
                job();
            }
        }
    }

    /// Runs one save, plus one catch-up pass per coalesced concurrent
    /// request. The caller must hold the save permit.
    fn do_save(&self, region: Arc<Region>, callback: RegionCallback) {
        let mut success = true;
        loop {
            bump(&self.stats.save.started);
            let generated = region.is_generated();
            let mut doc = Document::new();
            doc.put_bool("generated", generated);

            let mut ok = true;
            for step in &self.savers {
                if let Err(e) = step.save(&region, &mut doc, generated) {
                    log::error!("saving {} failed: {}", region, e);
                    ok = false;
                    break;
                }
            }
            if ok {
                match self.files.write(region.pos(), &doc) {
                    Ok(()) => {
                        region.set_last_saved(self.clock.load(Ordering::Relaxed));
                        bump(&self.stats.save.completed);
                    }
                    Err(e) => {
                        log::error!("writing {} failed: {}", region, e);
                        ok = false;
                    }
                }
            }
            if !ok {
                bump(&self.stats.save.failed);
                success = false;
                // Keep looping if another save was requested; it may
                // succeed where this pass failed.
            }

            if !region.finish_saving() {
                break;
            }
            // A save was requested while this one ran; claim the slot for
            // the catch-up pass unless a third party already has.
            if !region.get_save_permit() {
                break;
            }
        }
        callback(region, success);
    }

    /// Requests shutdown: loads that have not yet started abort with
    /// failure, while saves are allowed to drain.
    pub fn shutdown(&self) {
        self.cancel_loads.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> &Arc<WorldStats> {
        &self.stats
    }

    pub fn tracker(&self) -> &Arc<LoadTracker> {
        &self.tracker
    }
}

/// Bootstrap-time registration of loader and saver steps. Registration is
/// single-threaded; [`build`](Self::build) freezes the step lists.
pub struct WorldLoaderBuilder {
    files: RegionFiles,
    scheduler: Scheduler,
    loaders: Vec<Arc<dyn RegionIoStep>>,
    savers: Vec<Arc<dyn RegionIoStep>>,
    stats: Arc<WorldStats>,
    tracker: Arc<LoadTracker>,
    clock: Arc<AtomicU64>,
}

impl WorldLoaderBuilder {
    pub fn new(files: RegionFiles, scheduler: Scheduler, clock: Arc<AtomicU64>) -> Self {
        Self {
            files,
            scheduler,
            loaders: Vec::new(),
            savers: Vec::new(),
            stats: Arc::new(WorldStats::default()),
            tracker: Arc::new(LoadTracker::new()),
            clock,
        }
    }

    /// Registers the engine's standard steps, in their standard order.
    pub fn with_standard_steps(mut self) -> Self {
        self.add_loader_and_saver(SliceStep);
        self.add_loader_and_saver(TileEntityStep);
        self.add_loader_and_saver(EntityStep);
        self.add_loader_and_saver(StructureStep);
        self
    }

    pub fn add_loader(&mut self, step: impl RegionIoStep + 'static) {
        self.loaders.push(Arc::new(step));
    }

    pub fn add_saver(&mut self, step: impl RegionIoStep + 'static) {
        self.savers.push(Arc::new(step));
    }

    pub fn add_loader_and_saver(&mut self, step: impl RegionIoStep + 'static) {
        let step: Arc<dyn RegionIoStep> = Arc::new(step);
        self.loaders.push(Arc::clone(&step));
        self.savers.push(step);
    }

    pub fn build(self) -> Arc<WorldLoader> {
        Arc::new(WorldLoader {
            files: self.files,
            scheduler: self.scheduler,
            loaders: self.loaders,
            savers: self.savers,
            cancel_loads: AtomicBool::new(false),
            stats: self.stats,
            tracker: self.tracker,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_pool::SchedulerConfig;
    use crate::world::coords::RegionPos;
    use crate::world::tile::TileId;
    use crossbeam_channel::bounded;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        loader: Arc<WorldLoader>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().expect("temp dir");
        let files = RegionFiles::open(root.path(), "overworld").expect("open region dir");
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let clock = Arc::new(AtomicU64::new(0));
        let loader = WorldLoaderBuilder::new(files, scheduler.clone(), clock)
            .with_standard_steps()
            .build();
        Fixture {
            _root: root,
            loader,
            scheduler,
        }
    }

    fn loading_region(pos: RegionPos) -> Arc<Region> {
        let region = Arc::new(Region::new(pos));
        assert!(region.get_load_permit());
        region
    }

    #[test]
    fn missing_file_loads_empty_and_succeeds() {
        let f = fixture();
        let region = loading_region(RegionPos::new(0, 0));
        let (tx, rx) = bounded(1);
        f.loader.load_region(
            region,
            true,
            Box::new(move |r, ok| {
                let _ = tx.send((r.is_generated(), ok));
            }),
        );
        let (generated, ok) = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("load completes");
        assert!(ok);
        assert!(!generated);
        assert_eq!(f.loader.stats().load.snapshot().completed, 1);
        f.loader.tracker().wait_until_idle();
        assert!(f.scheduler.shutdown());
    }

    #[test]
    fn save_then_load_roundtrips_region_content() {
        let f = fixture();
        let pos = RegionPos::new(2, -3);

        let region = loading_region(pos);
        region.set_loaded();
        region.set_generated();
        region.with_slice_mut(5, 5, |s| s.set_tile(1, 2, TileId::GRASS));

        let (tx, rx) = bounded(1);
        f.loader.save_region(
            Arc::clone(&region),
            true,
            Box::new(move |_, ok| {
                let _ = tx.send(ok);
            }),
        );
        assert!(rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("save completes"));
        region.wait_until_saved();

        let fresh = loading_region(pos);
        let (tx, rx) = bounded(1);
        f.loader.load_region(
            Arc::clone(&fresh),
            false,
            Box::new(move |_, ok| {
                let _ = tx.send(ok);
            }),
        );
        assert!(rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("load completes"));
        assert!(fresh.is_generated());
        assert!(fresh.is_prepared());
        fresh.with_slice(5, 5, |s| assert_eq!(s.tile(1, 2), TileId::GRASS));
        assert!(f.scheduler.shutdown());
    }

    #[test]
    fn shutdown_aborts_unstarted_loads() {
        let f = fixture();
        f.loader.shutdown();

        let region = loading_region(RegionPos::new(9, 9));
        let (tx, rx) = bounded(1);
        f.loader.load_region(
            region,
            true,
            Box::new(move |_, ok| {
                let _ = tx.send(ok);
            }),
        );
        assert!(!rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("callback fires"));
        assert_eq!(f.loader.stats().load.snapshot().aborted, 1);
        f.loader.tracker().wait_until_idle();
        assert!(f.scheduler.shutdown());
    }

    #[test]
    fn corrupt_file_reports_failure_and_leaves_region_unmounted() {
        let f = fixture();
        let pos = RegionPos::new(1, 1);
        let path = {
            let root = f._root.path();
            root.join("dimensions").join("overworld").join("r_1_1.region")
        };
        std::fs::write(&path, b"definitely not gzip").expect("write corrupt file");

        let region = loading_region(pos);
        let (tx, rx) = bounded(1);
        f.loader.load_region(
            Arc::clone(&region),
            true,
            Box::new(move |_, ok| {
                let _ = tx.send(ok);
            }),
        );
        assert!(!rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("callback fires"));
        assert!(region.load_failed());
        assert!(!region.is_prepared());
        assert_eq!(f.loader.stats().load.snapshot().failed, 1);
        assert!(f.scheduler.shutdown());
    }

    #[test]
    fn coalesced_saves_run_at_most_twice() {
        let f = fixture();
        let pos = RegionPos::new(0, 5);
        let region = loading_region(pos);
        region.set_loaded();
        region.set_generated();

        let (tx, rx) = bounded(64);
        for _ in 0..64 {
            let tx = tx.clone();
            f.loader.save_region(
                Arc::clone(&region),
                false,
                Box::new(move |_, ok| {
                    let _ = tx.send(ok);
                }),
            );
        }
        // The permit is claimed at request time, so request 1 owns the save
        // slot and requests 2..64 coalesce into its catch-up pass: exactly
        // one callback, exactly two save passes.
        assert!(rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("winning save completes"));
        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(300))
            .is_err());
        region.wait_until_saved();

        assert_eq!(f.loader.stats().save.snapshot().started, 2);
        assert_eq!(f.loader.stats().save.snapshot().requests, 64);
        assert!(f.scheduler.shutdown());
    }
}
