//! Elevation queries on top of the dataset cache.

use crate::acquire::TileAcquirer;
use crate::cache::DatasetCache;
use crate::cancel::CancelToken;
use crate::config::DemConfig;
use crate::raster::default_reader;
use crate::remote::HttpTileStore;
use crate::tile::{Coordinate, TileId};
use crate::{DemError, Result};
use elevfill_metrics::metric_defs;
use std::sync::Arc;
use tracing::{debug, info};

/// Error handling for multi-point operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Stop at the first error.
    FailFast,
    /// Answer every point; errors are reported per point.
    #[default]
    BestEffort,
}

/// A track point whose elevation may be unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    /// Elevation in meters, `None` if missing.
    pub elevation: Option<f64>,
}

impl TrackPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            elevation: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

/// Outcome of [`ElevationResolver::fill_missing`].
#[derive(Debug, Clone, Default)]
pub struct FillReport {
    /// Points given an elevation.
    pub filled: usize,
    /// Points that already had one and were left alone.
    pub already_present: usize,
    /// Points where no elevation exists (absent tile or no-data pixel).
    pub missing: usize,
    /// Points that failed for any other reason.
    pub failed: usize,
    /// Index and error of every point left without an elevation.
    pub errors: Vec<(usize, DemError)>,
}

impl FillReport {
    /// True if every point now has an elevation.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Answers elevation queries for arbitrary coordinates.
///
/// Cheap to share: clones use the same cache.
#[derive(Debug, Clone)]
pub struct ElevationResolver {
    cache: Arc<DatasetCache>,
}

impl ElevationResolver {
    pub fn new(cache: Arc<DatasetCache>) -> Self {
        Self { cache }
    }

    /// Resolver backed by the USGS store over HTTPS, reading rasters with
    /// [`default_reader`](crate::default_reader).
    pub fn from_config(config: &DemConfig) -> Result<Self> {
        config.validate()?;
        let store = HttpTileStore::new(config.request_timeout())?;
        let acquirer = TileAcquirer::new(&config.root, Arc::new(store))
            .with_base_url(config.base_url.clone())
            .with_retry(config.retry_policy())
            .with_collision_policy(config.on_collision);
        let cache = DatasetCache::new(acquirer, default_reader(), config.cache_capacity);
        info!(
            root = %config.root.display(),
            capacity = config.cache_capacity,
            "elevation resolver ready"
        );
        Ok(Self::new(Arc::new(cache)))
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    /// Token that aborts in-flight acquisitions.
    pub fn cancel_token(&self) -> &CancelToken {
        self.cache.cancel_token()
    }

    /// Elevation in meters at `coord`.
    ///
    /// Absent tiles fail with [`DemError::TileNotFound`] and no-data pixels
    /// with [`DemError::NoData`]; [`DemError::is_missing_data`] is true for
    /// both.
    pub fn query(&self, coord: Coordinate) -> Result<f32> {
        self.sample(coord).inspect_err(|e| {
            metrics::counter!(metric_defs::QUERY_FAILURES.name).increment(1);
            debug!(lat = coord.lat, lon = coord.lon, error = %e, "elevation query failed");
        })
    }

    /// Validate `lat`/`lon` and query.
    pub fn query_lat_lon(&self, lat: f64, lon: f64) -> Result<f32> {
        self.query(Coordinate::new(lat, lon)?)
    }

    /// Query several coordinates in order.
    ///
    /// With [`BatchMode::FailFast`] the output ends at the first error,
    /// which is its last element. With [`BatchMode::BestEffort`] there is
    /// one result per coordinate.
    pub fn query_batch(&self, coords: &[Coordinate], mode: BatchMode) -> Vec<Result<f32>> {
        let mut results = Vec::with_capacity(coords.len());
        for coord in coords {
            let result = self.query(*coord);
            let stop = result.is_err() && mode == BatchMode::FailFast;
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    /// Fill the elevation of every point that lacks one.
    ///
    /// Points with an elevation are not touched. In [`BatchMode::FailFast`]
    /// the first error is returned and later points are left as they were;
    /// in [`BatchMode::BestEffort`] errors are collected in the report.
    pub fn fill_missing(&self, points: &mut [TrackPoint], mode: BatchMode) -> Result<FillReport> {
        let mut report = FillReport::default();

        for (i, point) in points.iter_mut().enumerate() {
            if point.elevation.is_some() {
                report.already_present += 1;
                continue;
            }
            match self.query_lat_lon(point.lat, point.lon) {
                Ok(elevation) => {
                    point.elevation = Some(f64::from(elevation));
                    report.filled += 1;
                }
                Err(e) if mode == BatchMode::FailFast => return Err(e),
                Err(e) => {
                    if e.is_missing_data() {
                        report.missing += 1;
                    } else {
                        report.failed += 1;
                    }
                    report.errors.push((i, e));
                }
            }
        }

        info!(
            filled = report.filled,
            already_present = report.already_present,
            missing = report.missing,
            failed = report.failed,
            "filled missing elevations"
        );
        Ok(report)
    }

    fn sample(&self, coord: Coordinate) -> Result<f32> {
        let tile = TileId::locate(coord);
        let record = self.cache.get(&tile)?;
        let raster = record.raster();

        let (row, col) = raster.index(coord.lon, coord.lat);
        let value = raster.sample(row, col).ok_or_else(|| {
            let (width, height) = raster.dimensions();
            DemError::DataInconsistency {
                tile,
                lat: coord.lat,
                lon: coord.lon,
                row,
                col,
                width,
                height,
            }
        })?;

        if raster.is_no_data(value) {
            return Err(DemError::NoData {
                lat: coord.lat,
                lon: coord.lon,
            });
        }
        Ok(value)
    }
}
