//! Metric declarations for the elevation lookup engine.
//!
//! Every metric recorded by `elevfill-dem` is declared here as a [`Metric`]
//! constant so names, units and label keys live in one place. The crate
//! re-exports the `metrics` facade; install any recorder to collect them.
//!
//! ```rust
//! use elevfill_metrics::{metric_defs, MetricKind};
//!
//! assert_eq!(metric_defs::CACHE_HITS.kind, MetricKind::Counter);
//! metrics::counter!(metric_defs::CACHE_HITS.name).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Built with the const constructors so declarations can be `const` items.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "elevfill.cache.hits").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declares a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declares a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declares a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for tile acquisition and lookup.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Label carried by acquisition metrics: `extracted`, `archive` or `remote`.
    pub const SOURCE_LABELS: &[&str] = &["source"];

    // ========================================================================
    // Dataset cache
    // ========================================================================

    /// Queries served from an already-open dataset.
    pub const CACHE_HITS: Metric = Metric::counter("elevfill.cache.hits")
        .with_description("Dataset lookups served from memory")
        .with_unit(Unit::Count);

    /// Queries that had to acquire and open a dataset.
    pub const CACHE_MISSES: Metric = Metric::counter("elevfill.cache.misses")
        .with_description("Dataset lookups that required acquisition")
        .with_unit(Unit::Count);

    /// Datasets dropped to stay within the configured capacity.
    pub const CACHE_EVICTIONS: Metric = Metric::counter("elevfill.cache.evictions")
        .with_description("Datasets evicted from the cache")
        .with_unit(Unit::Count);

    /// Number of datasets currently open.
    pub const CACHE_ENTRIES: Metric = Metric::gauge("elevfill.cache.entries")
        .with_description("Datasets currently held open")
        .with_unit(Unit::Count);

    // ========================================================================
    // Tile acquisition
    // ========================================================================

    /// Completed acquisitions, by where the raster came from.
    ///
    /// Labels: source
    pub const ACQUISITIONS: Metric = Metric::counter("elevfill.acquire.completed")
        .with_description("Tiles made available on local storage")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Acquisitions that ended in an error (including definitive absence).
    pub const ACQUISITION_FAILURES: Metric = Metric::counter("elevfill.acquire.failed")
        .with_description("Tile acquisitions that failed")
        .with_unit(Unit::Count);

    /// Wall time spent acquiring and opening a tile.
    pub const ACQUISITION_TIME: Metric = Metric::histogram("elevfill.acquire.time_s")
        .with_description("Time to acquire and open a tile")
        .with_unit(Unit::Seconds);

    /// Retries performed after transient failures.
    pub const ACQUISITION_RETRIES: Metric = Metric::counter("elevfill.acquire.retries")
        .with_description("Retries after transient acquisition failures")
        .with_unit(Unit::Count);

    /// Archive bytes received from the remote store.
    pub const BYTES_DOWNLOADED: Metric = Metric::counter("elevfill.remote.bytes_downloaded")
        .with_description("Archive bytes downloaded")
        .with_unit(Unit::Bytes);

    // ========================================================================
    // Queries
    // ========================================================================

    /// Elevation queries that could not be answered.
    pub const QUERY_FAILURES: Metric = Metric::counter("elevfill.query.unavailable")
        .with_description("Elevation queries without a value")
        .with_unit(Unit::Count);

    /// Every metric, for bulk registration.
    pub const ALL: &[&Metric] = &[
        &CACHE_HITS,
        &CACHE_MISSES,
        &CACHE_EVICTIONS,
        &CACHE_ENTRIES,
        &ACQUISITIONS,
        &ACQUISITION_FAILURES,
        &ACQUISITION_TIME,
        &ACQUISITION_RETRIES,
        &BYTES_DOWNLOADED,
        &QUERY_FAILURES,
    ];
}

/// Describes all metrics.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
