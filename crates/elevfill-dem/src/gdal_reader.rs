//! Raster reader backed by the GDAL library.

use crate::error::RasterError;
use crate::raster::{GeoTransform, Raster, RasterReader};
use gdal::Dataset;
use std::path::Path;
use tracing::debug;

/// Reads the first band of any raster GDAL has a driver for, including the
/// ERDAS Imagine (`.img`) files of the published tiles.
#[derive(Debug, Clone, Default)]
pub struct GdalReader;

impl GdalReader {
    pub fn new() -> Self {
        Self
    }
}

impl RasterReader for GdalReader {
    fn open(&self, path: &Path) -> Result<Raster, RasterError> {
        let dataset = Dataset::open(path)?;
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();
        debug!(path = %path.display(), width, height, ?transform, "opened dataset");

        let band = dataset.rasterband(1)?;
        let no_data = band.no_data_value().map(|v| v as f32);
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let dimension = |v: usize| {
            u32::try_from(v)
                .map_err(|_| RasterError::Driver(format!("raster dimension {v} out of range")))
        };
        Raster::new(dimension(width)?, dimension(height)?, buffer.data, transform, no_data)
    }
}
