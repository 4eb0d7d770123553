//! Remote tile store access.
//!
//! Archives are served by the USGS National Map S3 bucket:
//! `https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/13/IMG/{name}.zip`.
//! Existence is checked with `HEAD`; the archive is then streamed with `GET`.

use crate::cancel::CancelToken;
use crate::error::AcquisitionError;
use crate::{DemError, Result};
use elevfill_metrics::metric_defs;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// USGS staged-products location of the 1/3 arc-second IMG archives.
pub const DEFAULT_BASE_URL: &str = "https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/13/IMG";

/// Read size while streaming an archive to disk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The archive exists.
    Present {
        /// Announced archive size, when the server sends it.
        content_length: Option<u64>,
    },
    /// The store answered definitively that the archive does not exist.
    Absent {
        /// Status returned by the server.
        status: u16,
    },
}

/// Map an HTTP status to a probe outcome.
///
/// Success means present. Server errors and throttling are transient
/// failures rather than proof of absence; anything else is absent.
pub fn classify_status(
    url: &str,
    status: u16,
    content_length: Option<u64>,
) -> std::result::Result<Probe, AcquisitionError> {
    match status {
        200..=299 => Ok(Probe::Present { content_length }),
        429 | 500..=599 => Err(AcquisitionError::Status {
            url: url.to_string(),
            status,
        }),
        _ => Ok(Probe::Absent { status }),
    }
}

/// Source of tile archives.
pub trait TileStore: Send + Sync + fmt::Debug {
    /// Check whether the archive at `url` exists.
    fn probe(&self, url: &str) -> std::result::Result<Probe, AcquisitionError>;

    /// Stream the archive at `url` into `sink`, returning the byte count.
    ///
    /// Implementations check `cancel` between chunks and fail with
    /// [`AcquisitionError::Cancelled`] once it is set.
    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn Write,
        cancel: &CancelToken,
    ) -> std::result::Result<u64, AcquisitionError>;
}

/// [`TileStore`] over HTTPS with a blocking `reqwest` client.
pub struct HttpTileStore {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl fmt::Debug for HttpTileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTileStore")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTileStore {
    /// Build a client whose requests, body included, are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("elevfill/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DemError::HttpClient(Arc::new(e)))?;
        Ok(Self { client, timeout })
    }
}

impl TileStore for HttpTileStore {
    fn probe(&self, url: &str) -> std::result::Result<Probe, AcquisitionError> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| AcquisitionError::http(url, e))?;
        let status = response.status().as_u16();
        debug!(url, status, "HEAD");
        classify_status(url, status, response.content_length())
    }

    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn Write,
        cancel: &CancelToken,
    ) -> std::result::Result<u64, AcquisitionError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| AcquisitionError::http(url, e))?;

        if !response.status().is_success() {
            return Err(AcquisitionError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let expected = response.content_length();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AcquisitionError::Cancelled);
            }
            let n = response.read(&mut buf).map_err(|e| AcquisitionError::Body {
                url: url.to_string(),
                source: Arc::new(e),
            })?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).map_err(|e| AcquisitionError::Write {
                url: url.to_string(),
                source: Arc::new(e),
            })?;
            received += n as u64;
            metrics::counter!(metric_defs::BYTES_DOWNLOADED.name).increment(n as u64);
        }

        if let Some(expected) = expected {
            if received != expected {
                return Err(AcquisitionError::Truncated {
                    url: url.to_string(),
                    received,
                    expected,
                });
            }
        }

        debug!(url, bytes = received, "GET complete");
        Ok(received)
    }
}
