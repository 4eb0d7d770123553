//! Line-oriented record parsing and filling.

use crate::{CliError, Result};
use elevfill_dem::{BatchMode, ElevationResolver, FillReport, TrackPoint};
use std::io::{BufRead, Write};
use tracing::{info, warn};

/// One input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Blank line or comment, copied through unchanged.
    Verbatim(String),
    /// A coordinate, keeping the original text of its fields.
    Point {
        lat: String,
        lon: String,
        /// Elevation text as given, if any.
        elevation: Option<String>,
        point: TrackPoint,
    },
}

impl Record {
    /// Output line, using `elevation` for points that had none.
    fn render(&self, elevation: Option<f64>) -> String {
        match self {
            Record::Verbatim(line) => line.clone(),
            Record::Point {
                lat,
                lon,
                elevation: Some(given),
                ..
            } => format!("{lat} {lon} {given}"),
            Record::Point { lat, lon, .. } => match elevation {
                Some(e) => format!("{lat} {lon} {e:.2}"),
                None => format!("{lat} {lon}"),
            },
        }
    }
}

/// Parse one line; `line_number` is 1-based and used in errors.
pub fn parse_record(line: &str, line_number: usize) -> Result<Record> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Record::Verbatim(line.to_string()));
    }

    let malformed = |message: String| CliError::Malformed {
        line: line_number,
        message,
    };

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(malformed(format!(
            "expected `lat lon [elevation]`, found {} fields",
            fields.len()
        )));
    }

    let number = |name: &str, text: &str| {
        text.parse::<f64>()
            .map_err(|_| malformed(format!("invalid {name} {text:?}")))
    };
    let lat = number("latitude", fields[0])?;
    let lon = number("longitude", fields[1])?;
    let mut point = TrackPoint::new(lat, lon);
    let elevation = match fields.get(2) {
        Some(text) => {
            point.elevation = Some(number("elevation", text)?);
            Some(text.to_string())
        }
        None => None,
    };

    Ok(Record::Point {
        lat: fields[0].to_string(),
        lon: fields[1].to_string(),
        elevation,
        point,
    })
}

/// Counts for one run.
#[derive(Debug, Default)]
pub struct FillSummary {
    /// Lines read.
    pub lines: usize,
    /// Lines that were neither records nor comments, copied through.
    pub malformed: usize,
    /// Per-point outcome of the fill.
    pub report: FillReport,
}

/// Read records from `input`, fill missing elevations and write every line
/// to `output` in input order.
///
/// In [`BatchMode::BestEffort`] malformed lines are copied through and
/// points without data are written without an elevation. In
/// [`BatchMode::FailFast`] the first such line ends the run with an error
/// and nothing is written.
pub fn fill_records<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    resolver: &ElevationResolver,
    mode: BatchMode,
) -> Result<FillSummary> {
    let mut summary = FillSummary::default();
    let mut records = Vec::new();
    let mut points = Vec::new();
    // Index into `points` for each record that is a point.
    let mut point_index = Vec::new();

    for (i, line) in input.lines().enumerate() {
        let line = line.map_err(|e| CliError::Input {
            path: "-".into(),
            source: e,
        })?;
        summary.lines += 1;
        let record = match parse_record(&line, i + 1) {
            Ok(record) => record,
            Err(e) if mode == BatchMode::FailFast => return Err(e),
            Err(e) => {
                warn!(error = %e, "copying malformed line through");
                summary.malformed += 1;
                Record::Verbatim(line)
            }
        };
        if let Record::Point { point, .. } = &record {
            point_index.push(Some(points.len()));
            points.push(*point);
        } else {
            point_index.push(None);
        }
        records.push(record);
    }

    info!(lines = summary.lines, points = points.len(), "read records");

    summary.report = resolver.fill_missing(&mut points, mode).map_err(|source| {
        // Fail-fast stops at the first point still lacking an elevation.
        let line = point_index
            .iter()
            .position(|idx| matches!(idx, Some(p) if points[*p].elevation.is_none()))
            .map_or(0, |i| i + 1);
        CliError::Lookup { line, source }
    })?;

    for (record, idx) in records.iter().zip(&point_index) {
        let elevation = idx.and_then(|p| points[p].elevation);
        writeln!(output, "{}", record.render(elevation)).map_err(CliError::Output)?;
    }
    output.flush().map_err(CliError::Output)?;

    if !summary.report.is_complete() {
        warn!(
            missing = summary.report.missing,
            failed = summary.report.failed,
            "some records have no elevation"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let record = parse_record("39.7392  -104.9903", 1).unwrap();
        match record {
            Record::Point {
                lat,
                lon,
                elevation,
                point,
            } => {
                assert_eq!(lat, "39.7392");
                assert_eq!(lon, "-104.9903");
                assert_eq!(elevation, None);
                assert_eq!(point, TrackPoint::new(39.7392, -104.9903));
            }
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_point_with_elevation() {
        let record = parse_record("39.7 -104.9 1609.3", 1).unwrap();
        assert!(matches!(
            record,
            Record::Point { point: TrackPoint { elevation: Some(e), .. }, .. } if e == 1609.3
        ));
    }

    #[test]
    fn test_parse_verbatim() {
        assert_eq!(parse_record("", 1).unwrap(), Record::Verbatim(String::new()));
        assert_eq!(
            parse_record("  # track 1", 2).unwrap(),
            Record::Verbatim("  # track 1".into())
        );
    }

    #[test]
    fn test_parse_malformed() {
        for line in ["39.7", "39.7 -104.9 1609 extra", "north -104.9", "39.7 -104.9 high"] {
            let err = parse_record(line, 7).unwrap_err();
            assert!(matches!(err, CliError::Malformed { line: 7, .. }), "{line}");
        }
    }

    #[test]
    fn test_render() {
        let record = parse_record("39.70 -104.90", 1).unwrap();
        assert_eq!(record.render(Some(1609.25)), "39.70 -104.90 1609.25");
        assert_eq!(record.render(None), "39.70 -104.90");

        let given = parse_record("39.70 -104.90 1600", 1).unwrap();
        assert_eq!(given.render(Some(1.0)), "39.70 -104.90 1600");
    }
}
