//! Reduction of host records into per-label buckets.
//!
//! Aggregation is a pure function of the host list and the tag key: each
//! call builds its own buckets and nothing is shared between cycles.

use crate::models::{Host, HostUnitBuckets};

/// Sum consumed host units and host counts per split label.
///
/// Every host lands in exactly one bucket: the value of its first tag whose
/// key contains `tag_key`, or `"other"` when no such tag exists.
pub fn aggregate(hosts: &[Host], tag_key: &str) -> HostUnitBuckets {
    let mut buckets = HostUnitBuckets::new();

    for host in hosts {
        buckets.record(host.split_label(tag_key), host.consumed_host_units);
    }

    buckets
}
