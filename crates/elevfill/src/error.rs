use elevfill_dem::DemError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end an elevfill run.
#[derive(Debug, Error)]
pub enum CliError {
    /// Input file could not be opened or read.
    #[error("Failed to read input {}: {source}", .path.display())]
    Input {
        /// Input path, `-` for stdin.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Output could not be written.
    #[error("Failed to write output: {0}")]
    Output(#[source] io::Error),

    /// A line is not a `lat lon [elevation]` record.
    #[error("Line {line}: {message}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// What is wrong with it.
        message: String,
    },

    /// Elevation lookup failed.
    #[error("Line {line}: {source}")]
    Lookup {
        /// 1-based line number of the record.
        line: usize,
        #[source]
        source: DemError,
    },

    /// Configuration or resolver setup failed.
    #[error(transparent)]
    Dem(#[from] DemError),
}

impl CliError {
    /// True if stdout was closed by the reader, e.g. `elevfill | head`.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, CliError::Output(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}
