//! Metric line generation.

pub mod lines;

pub use lines::{format_lines, MetricKeys};
