//! Making a tile's raster available on local storage.
//!
//! Resolution order, first success wins:
//!
//! 1. `{root}/{name}/{name}.img` already extracted
//! 2. `{root}/{name}.zip` present, extract it
//! 3. `HEAD {base}/{name}.zip`, download to `{root}/{name}.zip`, extract it
//!
//! Downloads are written to a temporary file in the root, verified, then
//! renamed into place. Extraction happens in a temporary sibling directory
//! that is renamed to `{name}/` only once the raster is present. An
//! interrupted acquisition therefore never leaves a complete-looking archive
//! or tile directory behind.

use crate::cancel::CancelToken;
use crate::error::AcquisitionError;
use crate::remote::{Probe, TileStore, DEFAULT_BASE_URL};
use crate::retry::RetryPolicy;
use crate::tile::TileId;
use crate::{DemError, Result};
use elevfill_metrics::metric_defs;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do when `{name}/` exists but holds no raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Refuse to extract over it.
    #[default]
    Fail,
    /// Remove the directory and extract afresh.
    Replace,
}

/// Where an acquired raster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionSource {
    /// Already extracted on disk.
    Extracted,
    /// Extracted from an archive found on disk.
    Archive,
    /// Downloaded from the remote store and extracted.
    Remote,
}

impl AcquisitionSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AcquisitionSource::Extracted => "extracted",
            AcquisitionSource::Archive => "archive",
            AcquisitionSource::Remote => "remote",
        }
    }
}

/// Counters for acquisition work done this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Archives extracted (local or downloaded).
    pub archives_extracted: usize,
    /// Archives downloaded.
    pub tiles_downloaded: usize,
    /// Archive bytes downloaded.
    pub bytes_downloaded: u64,
    /// Existence checks answered "absent".
    pub tiles_absent: usize,
}

#[derive(Debug, Default)]
struct Counters {
    archives_extracted: AtomicUsize,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    tiles_absent: AtomicUsize,
}

/// Result of the remote step.
enum Remote {
    Absent(u16),
    Downloaded(u64),
}

/// Ensures tile rasters exist below a DEM root directory.
#[derive(Debug)]
pub struct TileAcquirer {
    root: PathBuf,
    base_url: String,
    store: Arc<dyn TileStore>,
    retry: RetryPolicy,
    on_collision: CollisionPolicy,
    counters: Counters,
}

impl TileAcquirer {
    /// Acquirer rooted at `root` fetching missing archives from `store`.
    pub fn new<P: AsRef<Path>>(root: P, store: Arc<dyn TileStore>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url: DEFAULT_BASE_URL.to_string(),
            store,
            retry: RetryPolicy::default(),
            on_collision: CollisionPolicy::default(),
            counters: Counters::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_collision_policy(mut self, on_collision: CollisionPolicy) -> Self {
        self.on_collision = on_collision;
        self
    }

    /// The DEM root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            archives_extracted: self.counters.archives_extracted.load(Ordering::Relaxed),
            tiles_downloaded: self.counters.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.counters.bytes_downloaded.load(Ordering::Relaxed),
            tiles_absent: self.counters.tiles_absent.load(Ordering::Relaxed),
        }
    }

    /// Path of the tile's raster, acquiring it first if needed.
    pub fn ensure_local(&self, tile: &TileId, cancel: &CancelToken) -> Result<PathBuf> {
        self.acquire(tile, cancel).map(|(path, _)| path)
    }

    /// Like [`ensure_local`](Self::ensure_local), also reporting where the
    /// raster came from.
    pub fn acquire(
        &self,
        tile: &TileId,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, AcquisitionSource)> {
        let raster = tile.raster_path(&self.root);
        if raster.is_file() {
            debug!(tile = %tile, path = %raster.display(), "raster already extracted");
            return Ok((raster, AcquisitionSource::Extracted));
        }

        let wrap = |source: AcquisitionError| DemError::Acquisition { tile: *tile, source };

        let archive = tile.archive_path(&self.root);
        if archive.is_file() {
            self.extract(tile, &archive, cancel).map_err(wrap)?;
            return Ok((raster, AcquisitionSource::Archive));
        }

        let url = tile.url(&self.base_url);
        let remote = self
            .retry
            .run(cancel, |_| match self.store.probe(&url)? {
                Probe::Absent { status } => Ok(Remote::Absent(status)),
                Probe::Present { .. } => self.download(tile, &url, &archive, cancel).map(Remote::Downloaded),
            })
            .map_err(wrap)?;

        match remote {
            Remote::Absent(status) => {
                self.counters.tiles_absent.fetch_add(1, Ordering::Relaxed);
                info!(tile = %tile, status, "tile not available from remote store");
                Err(DemError::TileNotFound { tile: *tile, status })
            }
            Remote::Downloaded(_) => {
                self.extract(tile, &archive, cancel).map_err(wrap)?;
                Ok((raster, AcquisitionSource::Remote))
            }
        }
    }

    /// Stream `url` into a temporary file, verify it, rename it to `archive`.
    fn download(
        &self,
        tile: &TileId,
        url: &str,
        archive: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<u64, AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        fs::create_dir_all(&self.root).map_err(|e| AcquisitionError::io(&self.root, e))?;

        info!("Downloading {} from {}", archive.display(), url);
        let mut part = tempfile::Builder::new()
            .prefix(&format!(".{}.", tile.name()))
            .suffix(".zip.part")
            .tempfile_in(&self.root)
            .map_err(|e| AcquisitionError::io(&self.root, e))?;

        let bytes = {
            let mut writer = BufWriter::new(part.as_file_mut());
            let bytes = self.store.fetch(url, &mut writer, cancel)?;
            writer.flush().map_err(|e| AcquisitionError::Write {
                url: url.to_string(),
                source: Arc::new(e),
            })?;
            bytes
        };
        part.as_file()
            .sync_all()
            .map_err(|e| AcquisitionError::io(part.path(), e))?;

        verify_archive(part.path(), &tile.raster_file_name())?;

        part.persist(archive)
            .map_err(|e| AcquisitionError::io(archive, e.error))?;

        self.counters.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        debug!(tile = %tile, bytes, "archive downloaded");
        Ok(bytes)
    }

    /// Extract `archive` into `{root}/{name}/` via a staging directory.
    fn extract(
        &self,
        tile: &TileId,
        archive: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<(), AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }

        let target = tile.raster_dir(&self.root);
        if target.exists() {
            match self.on_collision {
                CollisionPolicy::Fail => return Err(AcquisitionError::Collision { path: target }),
                CollisionPolicy::Replace => {
                    warn!(path = %target.display(), "replacing incomplete tile directory");
                    fs::remove_dir_all(&target).map_err(|e| AcquisitionError::io(&target, e))?;
                }
            }
        }

        info!("Extracting {} contents to {}", archive.display(), target.display());
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", tile.name()))
            .suffix(".extract")
            .tempdir_in(&self.root)
            .map_err(|e| AcquisitionError::io(&self.root, e))?;

        let file = File::open(archive).map_err(|e| AcquisitionError::io(archive, e))?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| AcquisitionError::corrupt(archive, e))?;
        zip.extract(staging.path())
            .map_err(|e| AcquisitionError::corrupt(archive, e))?;

        let entry = tile.raster_file_name();
        if !staging.path().join(&entry).is_file() {
            return Err(AcquisitionError::MissingRaster {
                path: archive.to_path_buf(),
                entry,
            });
        }

        fs::rename(staging.path(), &target).map_err(|e| AcquisitionError::io(&target, e))?;
        // The staging path no longer exists; dropping the guard is a no-op.
        drop(staging);

        self.counters.archives_extracted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Check that `path` is a readable zip holding `entry`.
fn verify_archive(path: &Path, entry: &str) -> std::result::Result<(), AcquisitionError> {
    let file = File::open(path).map_err(|e| AcquisitionError::io(path, e))?;
    let mut zip =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| AcquisitionError::corrupt(path, e))?;
    let found = match zip.by_name(entry) {
        Ok(_) => Ok(()),
        Err(zip::result::ZipError::FileNotFound) => Err(AcquisitionError::MissingRaster {
            path: path.to_path_buf(),
            entry: entry.to_string(),
        }),
        Err(e) => Err(AcquisitionError::corrupt(path, e)),
    };
    found
}

/// Record a completed acquisition.
pub(crate) fn record_acquisition(source: AcquisitionSource) {
    metrics::counter!(metric_defs::ACQUISITIONS.name, "source" => source.as_str()).increment(1);
}
