//! # elevfill
//!
//! Command line front end that fills missing elevations of coordinate
//! records from USGS NED tiles.
//!
//! Input is one record per line, `lat lon [elevation]`, whitespace
//! separated. Blank lines and `#` comments are copied through. Records that
//! already carry an elevation are left alone; the rest are looked up and
//! written back as `lat lon elevation`, or as `lat lon` when no elevation
//! could be found.

mod args;
mod error;
mod records;

pub use args::Args;
pub use error::CliError;
pub use records::{fill_records, parse_record, FillSummary, Record};

use elevfill_dem::ElevationResolver;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// Read the configured input, fill it through `resolver` and write stdout.
pub fn run(args: &Args, resolver: &ElevationResolver) -> Result<FillSummary> {
    let input: Box<dyn BufRead> = match args.input_path() {
        Some(path) => {
            let file = File::open(path).map_err(|e| CliError::Input {
                path: path.to_path_buf(),
                source: e,
            })?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };
    let output = BufWriter::new(io::stdout().lock());

    fill_records(input, output, resolver, args.batch_mode())
}
