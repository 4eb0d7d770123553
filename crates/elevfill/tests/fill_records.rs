//! Record filling against pre-extracted tiles and a store with no archives.

use elevfill::{fill_records, CliError};
use elevfill_dem::{
    AcquisitionError, BatchMode, CancelToken, DatasetCache, ElevationResolver, GeoTransform,
    Probe, Raster, RasterError, RasterReader, TileAcquirer, TileId, TileStore,
};
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug)]
struct NoArchives;

impl TileStore for NoArchives {
    fn probe(&self, _url: &str) -> Result<Probe, AcquisitionError> {
        Ok(Probe::Absent { status: 404 })
    }

    fn fetch(
        &self,
        _url: &str,
        _sink: &mut dyn Write,
        _cancel: &CancelToken,
    ) -> Result<u64, AcquisitionError> {
        unreachable!("absent tiles are never fetched")
    }
}

/// Every tile is a single 1° pixel of 1609.25 m.
#[derive(Debug)]
struct FlatReader;

impl RasterReader for FlatReader {
    fn open(&self, path: &Path) -> Result<Raster, RasterError> {
        let tile = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(TileId::from_name)
            .ok_or_else(|| RasterError::InvalidGeoTiff("unexpected name".into()))?;
        let transform =
            GeoTransform::north_up(-f64::from(tile.west), f64::from(tile.north), 1.0, 1.0);
        Raster::new(1, 1, vec![1609.25], transform, None)
    }
}

const DENVER: TileId = TileId { north: 40, west: 105 };

fn resolver(root: &Path) -> ElevationResolver {
    std::fs::create_dir_all(DENVER.raster_dir(root)).unwrap();
    std::fs::write(DENVER.raster_path(root), b"").unwrap();
    let acquirer = TileAcquirer::new(root, Arc::new(NoArchives));
    ElevationResolver::new(Arc::new(DatasetCache::new(acquirer, Arc::new(FlatReader), 2)))
}

fn fill(input: &str, mode: BatchMode) -> (Result<elevfill::FillSummary, CliError>, String) {
    let dir = TempDir::new().unwrap();
    let resolver = resolver(dir.path());
    let mut output = Vec::new();
    let result = fill_records(Cursor::new(input), &mut output, &resolver, mode);
    (result, String::from_utf8(output).unwrap())
}

const TRACK: &str = "\
# morning ride
39.7392 -104.9903
39.7400 -104.9910 1600.5

25.5 -80.5
39.75 -104.99
";

#[test]
fn test_best_effort_fills_and_passes_through() {
    let (result, output) = fill(TRACK, BatchMode::BestEffort);
    let summary = result.unwrap();

    assert_eq!(
        output,
        "\
# morning ride
39.7392 -104.9903 1609.25
39.7400 -104.9910 1600.5

25.5 -80.5
39.75 -104.99 1609.25
"
    );
    assert_eq!(summary.lines, 6);
    assert_eq!(summary.report.filled, 2);
    assert_eq!(summary.report.already_present, 1);
    assert_eq!(summary.report.missing, 1);
}

#[test]
fn test_fail_fast_reports_line() {
    let (result, output) = fill(TRACK, BatchMode::FailFast);
    match result.unwrap_err() {
        CliError::Lookup { line, source } => {
            assert_eq!(line, 5);
            assert!(source.is_missing_data());
        }
        other => panic!("expected lookup error, got {other:?}"),
    }
    assert!(output.is_empty());
}

#[test]
fn test_malformed_line() {
    let input = "39.7392 -104.9903\nnot a record\n";

    let (result, output) = fill(input, BatchMode::BestEffort);
    assert_eq!(result.unwrap().malformed, 1);
    assert_eq!(output, "39.7392 -104.9903 1609.25\nnot a record\n");

    let (result, _) = fill(input, BatchMode::FailFast);
    assert!(matches!(result, Err(CliError::Malformed { line: 2, .. })));
}

/// Writer whose reader has gone away.
struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_broken_pipe_is_recognised() {
    let dir = TempDir::new().unwrap();
    let resolver = resolver(dir.path());
    let err = fill_records(
        Cursor::new("39.7 -104.9\n"),
        ClosedPipe,
        &resolver,
        BatchMode::BestEffort,
    )
    .unwrap_err();
    assert!(err.is_broken_pipe());
}
