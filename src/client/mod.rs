//! HTTP access to the monitoring environment.
//!
//! This module provides the inventory query and the metric ingestion call,
//! together with the typed errors they return.

pub mod environment;
pub mod error;

pub use environment::EnvironmentClient;
pub use error::ClientError;
