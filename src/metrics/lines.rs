//! Conversion of aggregated buckets into ingestion lines.
//!
//! Four metrics are produced per cycle: host units split by label plus their
//! grand total, and host counts split by label plus their grand total.

use crate::models::{HostUnitBuckets, MetricLine};

/// Default metric key prefix.
pub const DEFAULT_METRIC_PREFIX: &str = "threesixty-perf";

/// The four metric keys emitted per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKeys {
    pub host_units: String,
    pub total_host_units: String,
    pub hosts: String,
    pub total_hosts: String,
}

impl MetricKeys {
    /// Derive all keys from a common prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            host_units: format!("{prefix}.license.hostunits"),
            total_host_units: format!("{prefix}.license.totalhostunits"),
            hosts: format!("{prefix}.infra.hosts"),
            total_hosts: format!("{prefix}.infra.totalhosts"),
        }
    }
}

impl Default for MetricKeys {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_METRIC_PREFIX)
    }
}

/// Format buckets as metric lines.
///
/// Output order: one host-unit line per label, the host-unit total, one
/// host-count line per label, the host-count total. Labels keep their
/// aggregation order.
pub fn format_lines(buckets: &HostUnitBuckets, tag_key: &str, keys: &MetricKeys) -> Vec<MetricLine> {
    let mut lines = Vec::with_capacity(buckets.len() * 2 + 2);

    for (label, units) in buckets.units_by_label() {
        lines.push(MetricLine::split(&keys.host_units, tag_key, label, units));
    }
    lines.push(MetricLine::total(&keys.total_host_units, buckets.total_units()));

    for (label, hosts) in buckets.hosts_by_label() {
        lines.push(MetricLine::split(&keys.hosts, tag_key, label, hosts as f64));
    }
    lines.push(MetricLine::total(&keys.total_hosts, buckets.total_hosts() as f64));

    lines
}
