//! # elevfill-dem
//!
//! Elevation lookup backed by USGS NED 1/3 arc-second tiles that are fetched
//! on demand and kept on local storage.
//!
//! ## Overview
//!
//! The contiguous US is covered by 1x1 degree tiles named after their
//! northeast corner, e.g. `USGS_NED_13_n40w106_IMG` for latitude 39°N to
//! 40°N and longitude 106°W to 105°W. Answering a query involves:
//!
//! 1. Mapping the coordinate to its tile ([`TileId::locate`])
//! 2. Making the tile's raster available under the DEM root
//!    ([`TileAcquirer`]): an extracted raster is used as is, a local
//!    archive is extracted, anything else is downloaded from the remote
//!    store first
//! 3. Opening the raster once and keeping it in a bounded, thread-safe
//!    cache ([`DatasetCache`])
//! 4. Sampling the pixel containing the coordinate ([`ElevationResolver`])
//!
//! ### Raster formats
//!
//! Published tiles are ERDAS Imagine files. They are read through GDAL
//! when the crate is built with the `gdal` feature; without it the
//! built-in reader handles GeoTIFF content only (see [`default_reader`]).
//!
//! ### Local layout
//!
//! ```text
//! {root}/USGS_NED_13_n40w106_IMG.zip
//! {root}/USGS_NED_13_n40w106_IMG/USGS_NED_13_n40w106_IMG.img
//! ```
//!
//! ## Examples
//!
//! ```no_run
//! use elevfill_dem::{BatchMode, DemConfig, ElevationResolver, TrackPoint};
//!
//! let resolver = ElevationResolver::from_config(&DemConfig::default())?;
//!
//! // Single query; downloads the tile on first use
//! let elevation = resolver.query_lat_lon(39.7392, -104.9903)?;
//! println!("Denver: {} meters", elevation);
//!
//! // Fill a track, leaving known elevations alone
//! let mut track = vec![
//!     TrackPoint::new(39.7392, -104.9903),
//!     TrackPoint::new(39.7400, -104.9910).with_elevation(1609.0),
//! ];
//! let report = resolver.fill_missing(&mut track, BatchMode::BestEffort)?;
//! println!("filled {} points", report.filled);
//! # Ok::<(), elevfill_dem::DemError>(())
//! ```

mod acquire;
mod cache;
mod cancel;
mod config;
mod error;
#[cfg(feature = "gdal")]
mod gdal_reader;
mod raster;
mod remote;
mod resolver;
mod retry;
mod tile;

pub use acquire::{AcquisitionSource, AcquisitionStats, CollisionPolicy, TileAcquirer};
pub use cache::{CacheStats, DatasetCache, TileRecord, DEFAULT_CACHE_CAPACITY};
pub use cancel::CancelToken;
pub use config::{default_root, DemConfig, RetryConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::{AcquisitionError, DemError, RasterError};
#[cfg(feature = "gdal")]
pub use gdal_reader::GdalReader;
pub use raster::{default_reader, GeoTiffReader, GeoTransform, Raster, RasterReader};
pub use remote::{classify_status, HttpTileStore, Probe, TileStore, DEFAULT_BASE_URL};
pub use resolver::{BatchMode, ElevationResolver, FillReport, TrackPoint};
pub use retry::RetryPolicy;
pub use tile::{Coordinate, TileId};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
