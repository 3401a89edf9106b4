//! Data models for the host-unit aggregator.
//!
//! This module contains the host records read from the inventory API,
//! the query window, the per-label buckets built during aggregation and
//! the metric lines sent back to the ingestion endpoint.
//!
//! Metric lines backslash-escape `"` and `\` inside dimension values, so a
//! tag value holding either character is not emitted verbatim.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Label used for hosts without a matching tag.
pub const FALLBACK_LABEL: &str = "other";

/// A key/value tag attached to a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag origin (e.g. `CONTEXTLESS`, `AWS`). Not used for matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Tag key.
    pub key: String,
    /// Tag value. Key-only tags have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Tag {
    /// Creates a contextless key/value tag.
    #[allow(dead_code)] // Used by tests
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            context: None,
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// A host as returned by the infrastructure inventory endpoint.
///
/// Only the fields the aggregation needs are modelled; everything else in
/// the payload is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// License units consumed by this host. Missing or null counts as 0.
    #[serde(default, deserialize_with = "null_as_default")]
    pub consumed_host_units: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,
}

/// Reads an explicit `null` as the type's default, so one sparse host
/// record cannot fail the whole inventory response.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Host {
    /// Creates a bare host with the given units and tags.
    #[allow(dead_code)] // Used by tests
    pub fn new(consumed_host_units: f64, tags: Vec<Tag>) -> Self {
        Self {
            entity_id: None,
            display_name: None,
            consumed_host_units,
            tags,
        }
    }

    /// Returns the split label for this host.
    ///
    /// The first tag whose key contains `tag_key` and that carries a value
    /// wins; hosts without such a tag fall back to [`FALLBACK_LABEL`].
    pub fn split_label(&self, tag_key: &str) -> &str {
        self.tags
            .iter()
            .filter(|tag| tag.key.contains(tag_key))
            .find_map(|tag| tag.value.as_deref())
            .unwrap_or(FALLBACK_LABEL)
    }
}

/// Time range handed to the inventory query, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Builds a window lagging behind `now`.
    ///
    /// The lag gives newly provisioned hosts time to show up in the
    /// inventory with their tags applied.
    pub fn lagging(now: DateTime<Utc>, start_minutes: u32, end_minutes: u32) -> Self {
        Self {
            start: now - Duration::minutes(i64::from(start_minutes)),
            end: now - Duration::minutes(i64::from(end_minutes)),
        }
    }

    /// Window start as epoch milliseconds.
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    /// Window end as epoch milliseconds.
    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// Running totals for one split label.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub label: String,
    pub units: f64,
    pub hosts: u64,
}

/// Per-label totals for one poll cycle.
///
/// Buckets are created lazily and keep the order in which their label was
/// first seen.
#[derive(Debug, Clone, Default)]
pub struct HostUnitBuckets {
    buckets: Vec<Bucket>,
    index: HashMap<String, usize>,
}

impl HostUnitBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one host's units to the bucket for `label`.
    pub fn record(&mut self, label: &str, units: f64) {
        let slot = match self.index.get(label) {
            Some(&slot) => slot,
            None => {
                self.buckets.push(Bucket {
                    label: label.to_string(),
                    units: 0.0,
                    hosts: 0,
                });
                self.index.insert(label.to_string(), self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };

        let bucket = &mut self.buckets[slot];
        bucket.units += units;
        bucket.hosts += 1;
    }

    /// Looks up the bucket for a label.
    #[allow(dead_code)] // Used by tests
    pub fn get(&self, label: &str) -> Option<&Bucket> {
        self.index.get(label).map(|&slot| &self.buckets[slot])
    }

    /// Buckets in first-seen order.
    #[allow(dead_code)] // Used by tests
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Label → summed units, in first-seen order.
    pub fn units_by_label(&self) -> impl Iterator<Item = (&str, f64)> {
        self.buckets.iter().map(|b| (b.label.as_str(), b.units))
    }

    /// Label → host count, in first-seen order.
    pub fn hosts_by_label(&self) -> impl Iterator<Item = (&str, u64)> {
        self.buckets.iter().map(|b| (b.label.as_str(), b.hosts))
    }

    pub fn total_units(&self) -> f64 {
        self.buckets.iter().map(|b| b.units).sum()
    }

    pub fn total_hosts(&self) -> u64 {
        self.buckets.iter().map(|b| b.hosts).sum()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[allow(dead_code)] // Used by tests
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// A single record in the metric ingestion line protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    /// Metric key, e.g. `threesixty-perf.license.hostunits`.
    pub key: String,
    /// Optional dimension as (name, value).
    pub dimension: Option<(String, String)>,
    pub value: f64,
}

impl MetricLine {
    /// A line without dimensions.
    pub fn total(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            dimension: None,
            value,
        }
    }

    /// A line with a single dimension.
    pub fn split(
        key: impl Into<String>,
        dimension: impl Into<String>,
        label: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            key: key.into(),
            dimension: Some((dimension.into(), label.into())),
            value,
        }
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if let Some((name, value)) = &self.dimension {
            write!(f, ",{}=\"{}\"", name, escape_dimension_value(value))?;
        }
        write!(f, " {:.2}", self.value)
    }
}

/// Escapes characters that would terminate a quoted dimension value.
///
/// Labels containing `"` or `\` therefore differ byte-wise from a plain
/// `"{label}"` rendering; all other labels are written verbatim.
fn escape_dimension_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
