//! Tile addressing: coordinate to USGS NED 1-degree tile.
//!
//! Tiles are named after their northeast corner, e.g. `n40w106` covers
//! latitude 39°N to 40°N and longitude 106°W to 105°W. The index rule is
//! applied literally for every valid coordinate, including the southern and
//! eastern hemispheres where the names no longer describe a real USGS
//! product; such tiles simply do not exist in the remote store.

use crate::{DemError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// A validated WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude, positive north.
    pub lat: f64,
    /// Longitude, positive east.
    pub lon: f64,
}

impl Coordinate {
    /// Validate a latitude/longitude pair.
    ///
    /// Fails with [`DemError::InvalidCoordinate`] for non-finite values or
    /// values outside [-90, 90] × [-180, 180].
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite()
            || !lon.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lon)
        {
            return Err(DemError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }
}

/// Identifier of a 1°×1° tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    /// `n` index of the tile name.
    pub north: u32,
    /// `w` index of the tile name.
    pub west: u32,
}

impl TileId {
    /// Map a validated coordinate to its tile.
    ///
    /// `index = ceil(v)` for `v > 0`, otherwise `|floor(v)|`, for latitude
    /// and longitude alike. A coordinate on an integer degree line keeps that
    /// integer (`ceil(40.0) == 40`).
    pub fn locate(coord: Coordinate) -> Self {
        Self {
            north: grid_index(coord.lat),
            west: grid_index(coord.lon),
        }
    }

    /// Validate `lat`/`lon` and map them to a tile.
    pub fn resolve(lat: f64, lon: f64) -> Result<Self> {
        Coordinate::new(lat, lon).map(Self::locate)
    }

    /// Canonical tile name, e.g. `USGS_NED_13_n40w106_IMG`.
    pub fn name(&self) -> String {
        format!("USGS_NED_13_n{:02}w{:03}_IMG", self.north, self.west)
    }

    /// Parse a canonical tile name (optionally followed by an extension).
    pub fn from_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("USGS_NED_13_n")?;
        let (indices, _) = rest.split_once("_IMG")?;
        let (north, west) = indices.split_once('w')?;
        if north.len() < 2 || west.len() < 3 {
            return None;
        }
        if !north.bytes().chain(west.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            north: north.parse().ok()?,
            west: west.parse().ok()?,
        })
    }

    /// `{root}/{name}.zip`
    pub fn archive_path(&self, root: &Path) -> PathBuf {
        root.join(format!("{}.zip", self.name()))
    }

    /// `{root}/{name}/`
    pub fn raster_dir(&self, root: &Path) -> PathBuf {
        root.join(self.name())
    }

    /// `{root}/{name}/{name}.img`
    pub fn raster_path(&self, root: &Path) -> PathBuf {
        self.raster_dir(root).join(self.raster_file_name())
    }

    /// File name of the raster inside the archive and the tile directory.
    pub fn raster_file_name(&self) -> String {
        format!("{}.img", self.name())
    }

    /// Remote archive URL below `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}.zip", base_url.trim_end_matches('/'), self.name())
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grid_index(v: f64) -> u32 {
    if v > 0.0 {
        v.ceil() as u32
    } else {
        v.floor().abs() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_western_hemisphere() {
        let tile = TileId::resolve(39.5, -105.2).unwrap();
        assert_eq!(tile, TileId { north: 40, west: 106 });
        assert_eq!(tile.name(), "USGS_NED_13_n40w106_IMG");
    }

    #[test]
    fn test_locate_applies_rule_literally() {
        // Southern latitude takes |floor|, positive longitude takes ceil.
        let tile = TileId::resolve(-39.5, 105.2).unwrap();
        assert_eq!(tile, TileId { north: 40, west: 106 });
    }

    #[test]
    fn test_locate_on_degree_lines() {
        let tile = TileId::resolve(40.0, -105.0).unwrap();
        assert_eq!(tile, TileId { north: 40, west: 105 });

        let tile = TileId::resolve(0.0, 0.0).unwrap();
        assert_eq!(tile, TileId { north: 0, west: 0 });
        assert_eq!(tile.name(), "USGS_NED_13_n00w000_IMG");

        let tile = TileId::resolve(-0.0, -0.0).unwrap();
        assert_eq!(tile, TileId { north: 0, west: 0 });
    }

    #[test]
    fn test_locate_extremes() {
        assert_eq!(TileId::resolve(90.0, 180.0).unwrap(), TileId { north: 90, west: 180 });
        assert_eq!(TileId::resolve(-90.0, -180.0).unwrap(), TileId { north: 90, west: 180 });
        assert_eq!(TileId::resolve(0.1, -0.1).unwrap(), TileId { north: 1, west: 1 });
    }

    #[test]
    fn test_locate_is_deterministic() {
        let coords = [(47.6062, -122.3321), (39.5, -105.2), (-33.8688, 151.2093)];
        for (lat, lon) in coords {
            assert_eq!(TileId::resolve(lat, lon).unwrap(), TileId::resolve(lat, lon).unwrap());
        }
    }

    #[test]
    fn test_invalid_coordinates() {
        for (lat, lon) in [
            (90.0001, 0.0),
            (-91.0, 0.0),
            (0.0, 180.5),
            (0.0, -181.0),
            (f64::NAN, 0.0),
            (0.0, f64::INFINITY),
        ] {
            assert!(
                matches!(TileId::resolve(lat, lon), Err(DemError::InvalidCoordinate { .. })),
                "({lat}, {lon}) should be rejected"
            );
        }
    }

    #[test]
    fn test_paths() {
        let tile = TileId { north: 40, west: 106 };
        let root = Path::new("/dem");
        assert_eq!(
            tile.archive_path(root),
            PathBuf::from("/dem/USGS_NED_13_n40w106_IMG.zip")
        );
        assert_eq!(
            tile.raster_path(root),
            PathBuf::from("/dem/USGS_NED_13_n40w106_IMG/USGS_NED_13_n40w106_IMG.img")
        );
    }

    #[test]
    fn test_url() {
        let tile = TileId { north: 40, west: 106 };
        assert_eq!(
            tile.url("https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/13/IMG/"),
            "https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/13/IMG/USGS_NED_13_n40w106_IMG.zip"
        );
    }

    #[test]
    fn test_from_name() {
        let tile = TileId { north: 7, west: 66 };
        assert_eq!(TileId::from_name(&tile.name()), Some(tile));
        assert_eq!(
            TileId::from_name("USGS_NED_13_n40w106_IMG.zip"),
            Some(TileId { north: 40, west: 106 })
        );
        assert_eq!(TileId::from_name("USGS_13_n48w123_20240327.tif"), None);
        assert_eq!(TileId::from_name("USGS_NED_13_n4w106_IMG"), None);
        assert_eq!(TileId::from_name("USGS_NED_13_n40wx06_IMG"), None);
    }
}
