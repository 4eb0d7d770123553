//! Error types for the DEM crate.
//!
//! Every error is `Clone` so one failed acquisition can be handed to all
//! callers that were waiting on it; foreign sources are held behind `Arc`.

use crate::tile::TileId;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Why an elevation query could not be answered.
#[derive(Debug, Clone, Error)]
pub enum DemError {
    /// Latitude/longitude not finite or outside the WGS84 range.
    #[error("Invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// The tile definitively does not exist in the remote store.
    #[error("Tile {tile} is not available from the remote store (HTTP {status})")]
    TileNotFound {
        /// Tile that was looked up.
        tile: TileId,
        /// Status returned by the existence check.
        status: u16,
    },

    /// The tile could not be made available locally or could not be opened.
    #[error("Failed to acquire tile {tile}: {source}")]
    Acquisition {
        /// Tile being acquired.
        tile: TileId,
        /// Underlying failure.
        #[source]
        source: AcquisitionError,
    },

    /// The pixel computed for a coordinate lies outside the raster of the
    /// tile it was mapped to.
    #[error(
        "Pixel (row {row}, col {col}) for ({lat}, {lon}) is outside the {width}x{height} raster of tile {tile}"
    )]
    DataInconsistency {
        /// Tile the coordinate mapped to.
        tile: TileId,
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
        /// Computed row.
        row: i64,
        /// Computed column.
        col: i64,
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
    },

    /// The raster holds its no-data marker at this coordinate.
    #[error("No elevation data at coordinate ({lat}, {lon})")]
    NoData {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// Cache lock was poisoned (a thread panicked while holding the lock).
    #[error("Dataset cache lock was poisoned")]
    CacheLockPoisoned,

    /// The thread acquiring the tile for this caller panicked before it
    /// produced a result.
    #[error("Acquisition of tile {tile} was aborted")]
    AcquisitionAborted {
        /// Tile that was being acquired.
        tile: TileId,
    },

    /// Configuration file could not be read.
    #[error("Failed to read configuration {}: {source}", .path.display())]
    ConfigRead {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[source] Arc<serde_yaml::Error>),

    /// Configuration values are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] Arc<reqwest::Error>),
}

impl DemError {
    /// True for outcomes that mean "there is no elevation here" rather than
    /// a malfunction: an absent tile or a no-data pixel.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, DemError::TileNotFound { .. } | DemError::NoData { .. })
    }

    /// True if repeating the query later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DemError::Acquisition { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The tile involved in this error, if any.
    pub fn tile(&self) -> Option<TileId> {
        match self {
            DemError::TileNotFound { tile, .. }
            | DemError::Acquisition { tile, .. }
            | DemError::DataInconsistency { tile, .. }
            | DemError::AcquisitionAborted { tile } => Some(*tile),
            _ => None,
        }
    }
}

/// Environmental failures while making a tile available.
#[derive(Debug, Clone, Error)]
pub enum AcquisitionError {
    /// Transport-level HTTP failure (DNS, connect, timeout, reset).
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: Arc<reqwest::Error>,
    },

    /// The server answered with a status that is neither success nor a
    /// definitive absence.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The body ended before `Content-Length` bytes arrived.
    #[error("Download of {url} truncated: received {received} of {expected} bytes")]
    Truncated {
        /// Requested URL.
        url: String,
        /// Bytes received.
        received: u64,
        /// Bytes announced.
        expected: u64,
    },

    /// The response body could not be read.
    #[error("Failed reading body of {url}: {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Underlying read error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The downloaded bytes could not be written out.
    #[error("Failed writing download of {url}: {source}")]
    Write {
        /// Requested URL.
        url: String,
        /// Underlying write error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Filesystem failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The archive could not be read.
    #[error("Corrupt archive {}: {source}", .path.display())]
    CorruptArchive {
        /// Archive path.
        path: PathBuf,
        /// Underlying zip error.
        #[source]
        source: Arc<zip::result::ZipError>,
    },

    /// The archive is readable but does not hold the tile's raster.
    #[error("Archive {} does not contain {entry}", .path.display())]
    MissingRaster {
        /// Archive path.
        path: PathBuf,
        /// Expected entry name.
        entry: String,
    },

    /// The extraction target already exists but holds no raster.
    #[error("Extraction target {} already exists", .path.display())]
    Collision {
        /// Existing directory.
        path: PathBuf,
    },

    /// The raster file exists but could not be decoded.
    #[error("Failed to open raster {}: {source}", .path.display())]
    Raster {
        /// Raster path.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: RasterError,
    },

    /// The caller cancelled the acquisition.
    #[error("Acquisition cancelled")]
    Cancelled,
}

impl AcquisitionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AcquisitionError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn http(url: &str, source: reqwest::Error) -> Self {
        AcquisitionError::Http {
            url: url.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        AcquisitionError::CorruptArchive {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// True for failures worth retrying after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            AcquisitionError::Http { source, .. } => !source.is_builder(),
            AcquisitionError::Status { status, .. } => *status == 429 || *status >= 500,
            AcquisitionError::Truncated { .. } | AcquisitionError::Body { .. } => true,
            AcquisitionError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Failures decoding a raster file.
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    /// I/O error reading the file.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[source] Arc<tiff::TiffError>),

    /// Missing or malformed georeferencing.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// The file is in a format this reader cannot decode.
    #[error("Unsupported raster format: {0}")]
    UnsupportedFormat(String),

    /// The GDAL driver failed to open or read the dataset.
    #[error("GDAL error: {0}")]
    Driver(String),
}

impl From<io::Error> for RasterError {
    fn from(e: io::Error) -> Self {
        RasterError::Io(Arc::new(e))
    }
}

impl From<tiff::TiffError> for RasterError {
    fn from(e: tiff::TiffError) -> Self {
        RasterError::TiffDecode(Arc::new(e))
    }
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for RasterError {
    fn from(e: gdal::errors::GdalError) -> Self {
        RasterError::Driver(e.to_string())
    }
}
