//! Opened elevation datasets and the readers that produce them.

use crate::error::RasterError;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

/// Leading bytes of an ERDAS Imagine (HFA) file.
const HFA_MAGIC: &[u8] = b"EHFA_HEADER_TAG";

/// Affine pixel-to-geographic transform in GDAL coefficient order.
///
/// `lon = x0 + col * dx + row * rx`, `lat = y0 + col * ry + row * dy`,
/// where (`x0`, `y0`) is the outer corner of pixel (0, 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub x0: f64,
    pub dx: f64,
    pub rx: f64,
    pub y0: f64,
    pub ry: f64,
    pub dy: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels and no rotation.
    pub fn north_up(west: f64, north: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            x0: west,
            dx: pixel_width,
            rx: 0.0,
            y0: north,
            ry: 0.0,
            dy: -pixel_height,
        }
    }

    /// Build from the six coefficients GDAL reports for a dataset.
    pub fn from_gdal(c: [f64; 6]) -> Self {
        Self {
            x0: c[0],
            dx: c[1],
            rx: c[2],
            y0: c[3],
            ry: c[4],
            dy: c[5],
        }
    }

    /// Pixel (row, col) containing `(lon, lat)`.
    ///
    /// Inverts the affine transform and floors, so any point inside a
    /// pixel's footprint maps to that pixel. The result may lie outside the
    /// raster grid; callers check.
    #[allow(clippy::cast_possible_truncation)]
    pub fn index(&self, lon: f64, lat: f64) -> (i64, i64) {
        let det = self.dx * self.dy - self.rx * self.ry;
        let px = lon - self.x0;
        let py = lat - self.y0;
        let col = (self.dy * px - self.rx * py) / det;
        let row = (self.dx * py - self.ry * px) / det;
        (row.floor() as i64, col.floor() as i64)
    }

    /// Geographic coordinate `(lon, lat)` of the centre of pixel (row, col).
    pub fn pixel_center(&self, row: u32, col: u32) -> (f64, f64) {
        let c = f64::from(col) + 0.5;
        let r = f64::from(row) + 0.5;
        (
            self.x0 + c * self.dx + r * self.rx,
            self.y0 + c * self.ry + r * self.dy,
        )
    }

    fn is_invertible(&self) -> bool {
        let det = self.dx * self.dy - self.rx * self.ry;
        det.is_finite() && det != 0.0
    }
}

/// An opened raster: its single elevation band held in memory together with
/// the georeferencing needed to address it.
pub struct Raster {
    /// Elevation samples in row-major order (north to south, west to east).
    data: Vec<f32>,
    width: u32,
    height: u32,
    transform: GeoTransform,
    no_data: Option<f32>,
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("transform", &self.transform)
            .field("no_data", &self.no_data)
            .finish()
    }
}

impl Raster {
    /// Assemble a raster from decoded samples.
    pub fn new(
        width: u32,
        height: u32,
        data: Vec<f32>,
        transform: GeoTransform,
        no_data: Option<f32>,
    ) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(RasterError::InvalidGeoTiff(format!(
                "expected {expected} samples for {width}x{height}, found {}",
                data.len()
            )));
        }
        if !transform.is_invertible() {
            return Err(RasterError::InvalidGeoTiff(format!(
                "degenerate geotransform {transform:?}"
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            transform,
            no_data,
        })
    }

    /// Pixel (row, col) for a geographic coordinate; may be off-grid.
    pub fn index(&self, lon: f64, lat: f64) -> (i64, i64) {
        self.transform.index(lon, lat)
    }

    /// Sample at (row, col), or `None` if the index is outside the grid.
    pub fn sample(&self, row: i64, col: i64) -> Option<f32> {
        let row = u32::try_from(row).ok().filter(|r| *r < self.height)?;
        let col = u32::try_from(col).ok().filter(|c| *c < self.width)?;
        Some(self.data[row as usize * self.width as usize + col as usize])
    }

    /// True if `value` is this raster's no-data marker (or NaN).
    pub fn is_no_data(&self, value: f32) -> bool {
        if value.is_nan() {
            return true;
        }
        match self.no_data {
            Some(nd) if nd.is_nan() => false,
            Some(nd) => value == nd,
            None => false,
        }
    }

    /// Dimensions in pixels as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    pub fn no_data(&self) -> Option<f32> {
        self.no_data
    }

    /// Approximate heap footprint of the band.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Opens raster files into memory.
pub trait RasterReader: Send + Sync + fmt::Debug {
    /// Decode the file at `path` and read its elevation band.
    fn open(&self, path: &Path) -> Result<Raster, RasterError>;
}

/// Reader used when none is supplied: GDAL when built with the `gdal`
/// feature, which handles the ERDAS Imagine rasters USGS publishes, and the
/// pure-Rust GeoTIFF decoder otherwise.
pub fn default_reader() -> Arc<dyn RasterReader> {
    #[cfg(feature = "gdal")]
    {
        Arc::new(crate::gdal_reader::GdalReader::new())
    }
    #[cfg(not(feature = "gdal"))]
    {
        Arc::new(GeoTiffReader::new())
    }
}

/// Reads single-band GeoTIFF content.
///
/// The decoder identifies the format from the file contents, so the raster
/// may carry the `.img` extension of the tile layout. ERDAS Imagine files
/// are recognised and rejected with [`RasterError::UnsupportedFormat`].
#[derive(Debug, Clone)]
pub struct GeoTiffReader {
    /// Upper bound for the decoding buffers.
    max_buffer_bytes: usize,
}

impl Default for GeoTiffReader {
    fn default() -> Self {
        // 1/3 arc-second tiles are 10812 x 10812 f32 samples, ~466 MB.
        Self {
            max_buffer_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl GeoTiffReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_buffer_bytes(max_buffer_bytes: usize) -> Self {
        Self { max_buffer_bytes }
    }

    fn read_transform<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Result<GeoTransform, RasterError> {
        if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
            if m.len() >= 16 {
                // Row-major 4x4 matrix mapping (col, row, 0, 1) to (x, y, z, 1).
                return Ok(GeoTransform {
                    x0: m[3],
                    dx: m[0],
                    rx: m[1],
                    y0: m[7],
                    ry: m[4],
                    dy: m[5],
                });
            }
        }

        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);
        match (tiepoint, scale) {
            (Ok(tiepoint), Ok(scale)) if tiepoint.len() >= 6 && scale.len() >= 2 => {
                // Tiepoint: [i, j, k, x, y, z], pixel (i, j) sits at (x, y).
                let (i, j) = (tiepoint[0], tiepoint[1]);
                let (x, y) = (tiepoint[3], tiepoint[4]);
                let (sx, sy) = (scale[0], scale[1]);
                Ok(GeoTransform::north_up(x - i * sx, y + j * sy, sx, sy))
            }
            _ => Err(RasterError::InvalidGeoTiff(
                "missing ModelTransformation or ModelTiepoint/ModelPixelScale tags".to_string(),
            )),
        }
    }

    fn read_no_data<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').parse().ok())
    }

    fn decode_band<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Result<Vec<f32>, RasterError> {
        let result = decoder.read_image()?;

        Ok(match result {
            DecodingResult::F32(data) => data,
            DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
            DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
            DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
            DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
            DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        })
    }
}

impl RasterReader for GeoTiffReader {
    fn open(&self, path: &Path) -> Result<Raster, RasterError> {
        let mut file = std::io::BufReader::new(std::fs::File::open(path)?);

        let mut magic = [0u8; HFA_MAGIC.len()];
        let read = file.read(&mut magic)?;
        if magic[..read] == *HFA_MAGIC {
            return Err(RasterError::UnsupportedFormat(format!(
                "{} is ERDAS Imagine; build with the `gdal` feature to read it",
                path.display()
            )));
        }
        file.seek(SeekFrom::Start(0))?;
        let mut limits = Limits::default();
        limits.decoding_buffer_size = self.max_buffer_bytes;
        limits.intermediate_buffer_size = self.max_buffer_bytes;
        limits.ifd_value_size = self.max_buffer_bytes;
        let mut decoder = Decoder::new(file)?.with_limits(limits);

        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(RasterError::InvalidGeoTiff(format!(
                    "expected a single elevation band, found {other:?}"
                )))
            }
        }

        let (width, height) = decoder.dimensions()?;
        let transform = Self::read_transform(&mut decoder)?;
        let no_data = Self::read_no_data(&mut decoder);
        let data = Self::decode_band(&mut decoder)?;

        Raster::new(width, height, data, transform, no_data)
    }
}
