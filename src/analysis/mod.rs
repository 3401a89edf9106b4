//! Host-unit aggregation.

pub mod aggregator;

pub use aggregator::*;
