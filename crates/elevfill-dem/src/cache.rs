//! Process-wide cache of opened tile datasets.
//!
//! ## Thread Safety
//!
//! `DatasetCache` is shared by reference (or `Arc`) between query threads:
//! - Lookups of loaded tiles take a read lock only, so they run concurrently
//! - Multiple threads requesting the same missing tile coordinate, with only
//!   one performing the acquisition while others wait for its outcome
//! - Different tiles are acquired in parallel; no lock is held while a tile
//!   is downloaded, extracted or decoded
//!
//! A failed acquisition is delivered to every waiter and is never cached;
//! the next request for that tile tries again.

use crate::acquire::{record_acquisition, AcquisitionSource, TileAcquirer};
use crate::cancel::CancelToken;
use crate::error::AcquisitionError;
use crate::raster::{Raster, RasterReader};
use crate::tile::TileId;
use crate::{DemError, Result};
use elevfill_metrics::metric_defs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default maximum number of open datasets.
///
/// A 1/3 arc-second tile holds ~117 million f32 samples (~466 MB).
pub const DEFAULT_CACHE_CAPACITY: usize = 8;

/// An opened tile: where it lives on disk and its elevation band.
#[derive(Debug)]
pub struct TileRecord {
    tile: TileId,
    path: PathBuf,
    source: AcquisitionSource,
    raster: Raster,
}

impl TileRecord {
    pub fn tile(&self) -> TileId {
        self.tile
    }

    /// Local raster file the dataset was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How the raster was obtained when the record was created.
    pub fn source(&self) -> AcquisitionSource {
        self.source
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }
}

/// Cache usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that led an acquisition.
    pub misses: u64,
    /// Lookups that waited on another caller's acquisition.
    pub coalesced: u64,
    /// Datasets acquired and opened.
    pub acquisitions: u64,
    /// Acquisitions that failed.
    pub failures: u64,
    /// Datasets evicted to respect the capacity.
    pub evictions: u64,
    /// Datasets currently held.
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    acquisitions: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

/// A loaded dataset and its recency stamp.
#[derive(Debug)]
struct Entry {
    record: Arc<TileRecord>,
    last_used: AtomicU64,
}

/// One in-flight acquisition that other callers can wait on.
#[derive(Debug, Default)]
struct Flight {
    outcome: Mutex<Option<Result<Arc<TileRecord>>>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, outcome: Result<Arc<TileRecord>>) {
        if let Ok(mut slot) = self.outcome.lock() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Arc<TileRecord>> {
        let mut slot = self.outcome.lock().map_err(|_| DemError::CacheLockPoisoned)?;
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.done.wait(slot).map_err(|_| DemError::CacheLockPoisoned)?;
        }
    }
}

/// Completes a flight even if the leader unwinds mid-acquisition.
struct FlightGuard<'a> {
    cache: &'a DatasetCache,
    tile: TileId,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(mut self, outcome: Result<Arc<TileRecord>>) -> Result<Arc<TileRecord>> {
        self.finished = true;
        self.cache.end_flight(&self.tile);
        self.flight.complete(outcome.clone());
        outcome
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(tile = %self.tile, "acquisition aborted");
            self.cache.end_flight(&self.tile);
            self.flight.complete(Err(DemError::AcquisitionAborted { tile: self.tile }));
        }
    }
}

/// Bounded LRU cache of opened datasets keyed by tile.
#[derive(Debug)]
pub struct DatasetCache {
    acquirer: TileAcquirer,
    reader: Arc<dyn RasterReader>,
    cancel: CancelToken,
    capacity: usize,
    /// Loaded datasets.
    tiles: RwLock<HashMap<TileId, Entry>>,
    /// Acquisitions in progress.
    in_flight: Mutex<HashMap<TileId, Arc<Flight>>>,
    /// Monotonic recency clock.
    clock: AtomicU64,
    counters: Counters,
}

impl DatasetCache {
    /// Cache holding at most `capacity` datasets (at least one).
    pub fn new(acquirer: TileAcquirer, reader: Arc<dyn RasterReader>, capacity: usize) -> Self {
        Self {
            acquirer,
            reader,
            cancel: CancelToken::new(),
            capacity: capacity.max(1),
            tiles: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Use `cancel` for every acquisition this cache performs.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts in-flight downloads when cancelled.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn acquirer(&self) -> &TileAcquirer {
        &self.acquirer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The dataset for `tile`, acquiring and opening it on first use.
    pub fn get(&self, tile: &TileId) -> Result<Arc<TileRecord>> {
        if let Some(record) = self.lookup(tile)? {
            return Ok(record);
        }

        let (flight, leader) = {
            let mut in_flight = self.in_flight.lock().map_err(|_| DemError::CacheLockPoisoned)?;
            // The previous leader may have finished since the lookup.
            if let Some(record) = self.lookup(tile)? {
                return Ok(record);
            }
            match in_flight.get(tile) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    in_flight.insert(*tile, flight.clone());
                    (flight, true)
                }
            }
        };

        if !leader {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(tile = %tile, "waiting for in-flight acquisition");
            return flight.wait();
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::CACHE_MISSES.name).increment(1);

        let guard = FlightGuard {
            cache: self,
            tile: *tile,
            flight,
            finished: false,
        };
        let outcome = self.load(tile).and_then(|record| {
            self.insert(*tile, record.clone())?;
            Ok(record)
        });
        if let Err(e) = &outcome {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_defs::ACQUISITION_FAILURES.name).increment(1);
            warn!(tile = %tile, error = %e, "tile acquisition failed");
        }
        guard.finish(outcome)
    }

    /// True if the dataset for `tile` is loaded.
    pub fn contains(&self, tile: &TileId) -> bool {
        self.tiles.read().map(|t| t.contains_key(tile)).unwrap_or(false)
    }

    /// Number of loaded datasets.
    pub fn len(&self) -> usize {
        self.tiles.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every loaded dataset. Files on disk are kept.
    pub fn clear(&self) {
        if let Ok(mut tiles) = self.tiles.write() {
            tiles.clear();
        }
        metrics::gauge!(metric_defs::CACHE_ENTRIES.name).set(0.0);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            acquisitions: self.counters.acquisitions.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lookup(&self, tile: &TileId) -> Result<Option<Arc<TileRecord>>> {
        let tiles = self.tiles.read().map_err(|_| DemError::CacheLockPoisoned)?;
        Ok(tiles.get(tile).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_defs::CACHE_HITS.name).increment(1);
            entry.record.clone()
        }))
    }

    /// Acquire the raster file and decode it.
    fn load(&self, tile: &TileId) -> Result<Arc<TileRecord>> {
        let started = Instant::now();
        let (path, source) = self.acquirer.acquire(tile, &self.cancel)?;

        let raster = self.reader.open(&path).map_err(|e| DemError::Acquisition {
            tile: *tile,
            source: AcquisitionError::Raster {
                path: path.clone(),
                source: e,
            },
        })?;

        record_acquisition(source);
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!(metric_defs::ACQUISITION_TIME.name)
            .record(started.elapsed().as_secs_f64());

        let (width, height) = raster.dimensions();
        info!(
            tile = %tile,
            source = source.as_str(),
            width,
            height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "opened dataset"
        );

        Ok(Arc::new(TileRecord {
            tile: *tile,
            path,
            source,
            raster,
        }))
    }

    /// Store a freshly loaded dataset, evicting the least recently used
    /// entries beyond capacity.
    fn insert(&self, tile: TileId, record: Arc<TileRecord>) -> Result<()> {
        let mut tiles = self.tiles.write().map_err(|_| DemError::CacheLockPoisoned)?;

        while tiles.len() >= self.capacity {
            let oldest = tiles
                .iter()
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| *key);
            match oldest {
                Some(key) => {
                    tiles.remove(&key);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_defs::CACHE_EVICTIONS.name).increment(1);
                    debug!(tile = %key, "evicted dataset");
                }
                None => break,
            }
        }

        tiles.insert(
            tile,
            Entry {
                record,
                last_used: AtomicU64::new(self.tick()),
            },
        );
        metrics::gauge!(metric_defs::CACHE_ENTRIES.name).set(tiles.len() as f64);
        Ok(())
    }

    fn end_flight(&self, tile: &TileId) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(tile);
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RasterError;
    use crate::raster::GeoTransform;
    use crate::remote::{Probe, TileStore};
    use std::fs;
    use std::io::Write;
    use std::sync::{mpsc, Barrier};
    use tempfile::TempDir;

    /// Store with no archives at all.
    #[derive(Debug)]
    struct EmptyStore;

    impl TileStore for EmptyStore {
        fn probe(&self, _url: &str) -> std::result::Result<Probe, AcquisitionError> {
            Ok(Probe::Absent { status: 404 })
        }

        fn fetch(
            &self,
            _url: &str,
            _sink: &mut dyn Write,
            _cancel: &CancelToken,
        ) -> std::result::Result<u64, AcquisitionError> {
            unreachable!("absent tiles are never fetched")
        }
    }

    /// Reader producing a 1x1 raster and counting opens.
    #[derive(Debug, Default)]
    struct CountingReader {
        opens: AtomicU64,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RasterReader for CountingReader {
        fn open(&self, _path: &Path) -> std::result::Result<Raster, RasterError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            if self.fail.load(Ordering::SeqCst) {
                return Err(RasterError::InvalidGeoTiff("broken".to_string()));
            }
            Raster::new(1, 1, vec![7.0], GeoTransform::north_up(0.0, 1.0, 1.0, 1.0), None)
        }
    }

    fn tile(north: u32, west: u32) -> TileId {
        TileId { north, west }
    }

    fn place(root: &Path, tile: TileId) {
        fs::create_dir_all(tile.raster_dir(root)).unwrap();
        fs::write(tile.raster_path(root), b"raster").unwrap();
    }

    fn cache(root: &Path, reader: Arc<CountingReader>, capacity: usize) -> DatasetCache {
        DatasetCache::new(TileAcquirer::new(root, Arc::new(EmptyStore)), reader, capacity)
    }

    #[test]
    fn test_second_get_is_a_hit() {
        let dir = TempDir::new().unwrap();
        let t = tile(40, 106);
        place(dir.path(), t);
        let reader = Arc::new(CountingReader::default());
        let cache = cache(dir.path(), reader.clone(), 4);

        let first = cache.get(&t).unwrap();
        // Removing the files proves the second lookup never touches disk.
        fs::remove_dir_all(t.raster_dir(dir.path())).unwrap();
        let second = cache.get(&t).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reader.opens.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_concurrent_gets_open_once() {
        let dir = TempDir::new().unwrap();
        let t = tile(40, 106);
        place(dir.path(), t);
        let reader = Arc::new(CountingReader::default());
        let cache = Arc::new(cache(dir.path(), reader.clone(), 4));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get(&t).map(|r| r.raster().sample(0, 0))
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), Some(7.0));
        }
        assert_eq!(reader.opens.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.acquisitions, 1);
        assert_eq!(stats.hits + stats.coalesced, 7);
    }

    #[test]
    fn test_lru_eviction() {
        let dir = TempDir::new().unwrap();
        let (a, b, c) = (tile(40, 106), tile(40, 105), tile(39, 105));
        for t in [a, b, c] {
            place(dir.path(), t);
        }
        let reader = Arc::new(CountingReader::default());
        let cache = cache(dir.path(), reader.clone(), 2);

        cache.get(&a).unwrap();
        cache.get(&b).unwrap();
        cache.get(&a).unwrap(); // a is now most recent
        cache.get(&c).unwrap(); // evicts b

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().evictions, 1);

        cache.get(&b).unwrap();
        assert_eq!(reader.opens.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_failure_not_cached() {
        let dir = TempDir::new().unwrap();
        let t = tile(40, 106);
        place(dir.path(), t);
        let reader = Arc::new(CountingReader::default());
        reader.fail.store(true, Ordering::SeqCst);
        let cache = cache(dir.path(), reader.clone(), 4);

        let err = cache.get(&t).unwrap_err();
        assert!(matches!(
            err,
            DemError::Acquisition {
                source: AcquisitionError::Raster { .. },
                ..
            }
        ));
        assert!(cache.is_empty());

        reader.fail.store(false, Ordering::SeqCst);
        let record = cache.get(&t).unwrap();
        assert_eq!(record.raster().sample(0, 0), Some(7.0));
        assert_eq!(reader.opens.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_absent_tile_reported() {
        let dir = TempDir::new().unwrap();
        let cache = cache(dir.path(), Arc::new(CountingReader::default()), 4);
        let err = cache.get(&tile(10, 30)).unwrap_err();
        assert!(matches!(err, DemError::TileNotFound { status: 404, .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let t = tile(40, 106);
        place(dir.path(), t);
        let cache = cache(dir.path(), Arc::new(CountingReader::default()), 4);
        cache.get(&t).unwrap();
        cache.clear();
        assert!(!cache.contains(&t));
        assert!(t.raster_path(dir.path()).is_file());
    }

    /// Reader whose first open panics once released; later opens succeed.
    #[derive(Debug)]
    struct CrashingReader {
        calls: AtomicU64,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl RasterReader for CrashingReader {
        fn open(&self, _path: &Path) -> std::result::Result<Raster, RasterError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
                panic!("decoder crashed");
            }
            Raster::new(1, 1, vec![7.0], GeoTransform::north_up(0.0, 1.0, 1.0, 1.0), None)
        }
    }

    #[test]
    fn test_waiters_see_aborted_acquisition() {
        let dir = TempDir::new().unwrap();
        let t = tile(40, 106);
        place(dir.path(), t);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let reader = Arc::new(CrashingReader {
            calls: AtomicU64::new(0),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let cache = Arc::new(DatasetCache::new(
            TileAcquirer::new(dir.path(), Arc::new(EmptyStore)),
            reader,
            4,
        ));

        let leader = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.get(&t).map(|_| ()))
        };
        entered_rx.recv().unwrap();
        let waiter = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.get(&t).map(|_| ()))
        };
        while cache.stats().coalesced == 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        release_tx.send(()).unwrap();

        assert!(leader.join().is_err());
        match waiter.join().unwrap() {
            Err(DemError::AcquisitionAborted { tile }) => assert_eq!(tile, t),
            other => panic!("expected aborted acquisition, got {other:?}"),
        }

        // The aborted flight is gone; the next request acquires again.
        let record = cache.get(&t).unwrap();
        assert_eq!(record.raster().sample(0, 0), Some(7.0));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let dir = TempDir::new().unwrap();
        let cache = cache(dir.path(), Arc::new(CountingReader::default()), 0);
        assert_eq!(cache.capacity(), 1);
    }
}
