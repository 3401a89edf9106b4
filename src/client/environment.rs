//! Client for the environment's inventory and ingestion APIs.

use crate::client::error::{truncate_body, ClientError, FetchError, IngestError};
use crate::config::EnvironmentConfig;
use crate::models::{Host, TimeWindow};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const HOSTS_PATH: &str = "api/v1/entity/infrastructure/hosts";
const INGEST_PATH: &str = "api/v2/metrics/ingest";

/// Body returned by the ingestion endpoint on 202.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    #[serde(default)]
    lines_ok: u64,
    #[serde(default)]
    lines_invalid: u64,
}

/// HTTP client bound to one environment.
pub struct EnvironmentClient {
    http: Client,
    hosts_url: Url,
    ingest_url: Url,
    auth_header: String,
}

impl EnvironmentClient {
    /// Create a client for `<api_url>/e/<tenant>`.
    pub fn new(config: &EnvironmentConfig) -> Result<Self, ClientError> {
        let base = environment_url(&config.api_url, &config.tenant)?;
        let join = |path: &str| {
            base.join(path).map_err(|source| ClientError::InvalidUrl {
                url: format!("{base}{path}"),
                source,
            })
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            hosts_url: join(HOSTS_PATH)?,
            ingest_url: join(INGEST_PATH)?,
            auth_header: format!("Api-Token {}", config.api_token),
        })
    }

    /// Inventory endpoint this client queries.
    pub fn hosts_url(&self) -> &Url {
        &self.hosts_url
    }

    /// Fetch the hosts seen during `window`.
    pub async fn fetch_hosts(&self, window: &TimeWindow) -> Result<Vec<Host>, FetchError> {
        let params = [
            ("includeDetails", "false".to_string()),
            ("startTimestamp", window.start_millis().to_string()),
            ("endTimestamp", window.end_millis().to_string()),
        ];

        debug!(
            "Querying host inventory from {} to {}",
            window.start, window.end
        );

        let response = self
            .http
            .get(self.hosts_url.clone())
            .query(&params)
            .header(AUTHORIZATION, &self.auth_header)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        response.json::<Vec<Host>>().await.map_err(FetchError::Decode)
    }

    /// Send one metric line. Only 202 Accepted counts as success.
    pub async fn ingest_line(&self, line: &str) -> Result<(), IngestError> {
        let response = self
            .http
            .post(self.ingest_url.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line.to_string())
            .send()
            .await
            .map_err(IngestError::Transport)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status != StatusCode::ACCEPTED {
            return Err(IngestError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        let summary: IngestResponse = serde_json::from_str(&body).unwrap_or_default();
        if summary.lines_invalid > 0 {
            warn!(
                "Ingestion accepted the request but flagged {} invalid line(s): {}",
                summary.lines_invalid, line
            );
        } else {
            debug!("Ingested {} line(s)", summary.lines_ok);
        }

        Ok(())
    }
}

/// Builds `<api_url>/e/<tenant>/` with a trailing slash so that relative
/// API paths join beneath it.
fn environment_url(api_url: &str, tenant: &str) -> Result<Url, ClientError> {
    let url = format!("{}/e/{}/", api_url.trim_end_matches('/'), tenant.trim());
    Url::parse(&url).map_err(|source| ClientError::InvalidUrl { url, source })
}
