//! Error types for the environment client.

use reqwest::StatusCode;
use thiserror::Error;

/// Longest response body kept in an error, in bytes.
const MAX_BODY_LEN: usize = 512;

/// The client could not be constructed.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid environment URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to create HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// The host inventory could not be read.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Host inventory request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Host inventory returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Host inventory response could not be parsed: {0}")]
    Decode(#[source] reqwest::Error),
}

/// A single metric line was not accepted.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Metric ingestion request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Metric ingestion returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Trims a response body to something that fits on one log line.
pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_BODY_LEN {
        return body.to_string();
    }

    let mut end = MAX_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
