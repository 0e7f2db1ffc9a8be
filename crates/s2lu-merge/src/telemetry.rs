//! Metric declarations.
//!
//! Every metric the merge job records is declared here as a [`Metric`]
//! constant so names and labels stay consistent between the recording sites
//! and whatever exporter the host installs. Nothing is exported by default;
//! without a recorder the `metrics` macros are no-ops.
//!
//! ```rust,ignore
//! use s2lu_merge::telemetry::{describe_metrics, metric_defs};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::INVOCATIONS.name, "rule" => "mask").increment(1);
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
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
#[derive(Debug, Clone)]
pub struct Metric {
    /// Name passed to the `metrics` macros.
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys recorded with the metric.
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

    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

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

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metrics recorded by the merge job.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Notifications handled, successful or not.
    ///
    /// Labels: rule
    pub const INVOCATIONS: Metric = Metric::counter("s2lu.invocations")
        .with_description("Notifications handled")
        .with_unit(Unit::Count)
        .with_labels(&["rule"]);

    /// Failed invocations.
    ///
    /// Labels: stage (parse, fetch-source, load-reference, align, merge, write),
    /// error (not_found, format, geometry_mismatch, write)
    pub const FAILURES: Metric = Metric::counter("s2lu.failures")
        .with_description("Failed invocations by stage and error kind")
        .with_unit(Unit::Count)
        .with_labels(&["stage", "error"]);

    /// Source pixels that overlapped the reference raster.
    ///
    /// Labels: rule
    pub const PIXELS_MERGED: Metric = Metric::counter("s2lu.pixels.merged")
        .with_description("Source pixels overlapping the reference raster")
        .with_unit(Unit::Count)
        .with_labels(&["rule"]);

    /// Time spent aligning and merging one scene.
    pub const MERGE_DURATION: Metric = Metric::histogram("s2lu.merge.duration_ms")
        .with_description("Time spent aligning and merging one scene")
        .with_unit(Unit::Milliseconds);

    /// Bytes written to output storage.
    pub const OUTPUT_BYTES: Metric = Metric::counter("s2lu.output.bytes")
        .with_description("Bytes written to output storage")
        .with_unit(Unit::Bytes);

    /// Urban cover of the last scene merged with the urban-cover rule.
    ///
    /// Labels: tile
    pub const URBAN_COVER: Metric = Metric::gauge("s2lu.urban_cover_percent")
        .with_description("Urban cover of the last merged scene")
        .with_unit(Unit::Percent)
        .with_labels(&["tile"]);

    /// Every metric above.
    pub const ALL: &[Metric] = &[
        INVOCATIONS,
        FAILURES,
        PIXELS_MERGED,
        MERGE_DURATION,
        OUTPUT_BYTES,
        URBAN_COVER,
    ];
}

/// Register descriptions for every metric; call once at startup.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
