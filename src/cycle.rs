//! One poll cycle: fetch → aggregate → format → ingest.
//!
//! Failures never escape a cycle. A failed inventory fetch abandons the
//! cycle before anything is ingested; a failed ingestion only affects its
//! own line.

use crate::analysis::aggregate;
use crate::client::{ClientError, EnvironmentClient};
use crate::config::Config;
use crate::metrics::{format_lines, MetricKeys};
use crate::models::TimeWindow;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// What to do with the formatted lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// POST every line to the ingestion endpoint.
    Send,
    /// Keep the lines in the report without sending them.
    DryRun,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The host-unit feature is switched off.
    Disabled,
    /// The inventory could not be read; nothing was ingested.
    FetchFailed { reason: String },
    /// Lines were produced (and sent, unless in dry-run mode).
    Completed(CycleReport),
}

impl CycleOutcome {
    /// True when the fetch failed or any line was rejected.
    pub fn has_failures(&self) -> bool {
        match self {
            CycleOutcome::Disabled => false,
            CycleOutcome::FetchFailed { .. } => true,
            CycleOutcome::Completed(report) => report.failed > 0,
        }
    }
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub hosts: usize,
    pub buckets: usize,
    /// Formatted lines, in emission order.
    pub lines: Vec<String>,
    pub ingested: usize,
    pub failed: usize,
}

/// Host-unit aggregation bound to one environment.
pub struct HostUnitCycle {
    client: EnvironmentClient,
    enabled: bool,
    tag_key: String,
    keys: MetricKeys,
    window_start_minutes: u32,
    window_end_minutes: u32,
}

impl HostUnitCycle {
    /// Build from a validated configuration.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let client = EnvironmentClient::new(&config.environment)?;
        let hu = &config.hostunits;

        Ok(Self {
            client,
            enabled: hu.enabled,
            tag_key: hu.tag_key.clone(),
            keys: MetricKeys::with_prefix(&hu.metric_prefix),
            window_start_minutes: hu.window_start_minutes,
            window_end_minutes: hu.window_end_minutes,
        })
    }

    /// Run a single cycle with `now` as the reference time.
    pub async fn run(&self, now: DateTime<Utc>, mode: IngestMode) -> CycleOutcome {
        if !self.enabled {
            info!("Host-unit metrics disabled, skipping cycle");
            return CycleOutcome::Disabled;
        }

        let window = TimeWindow::lagging(now, self.window_start_minutes, self.window_end_minutes);

        let hosts = match self.client.fetch_hosts(&window).await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Error fetching host units: {}", e);
                return CycleOutcome::FetchFailed {
                    reason: e.to_string(),
                };
            }
        };
        debug!("Fetched {} hosts from {}", hosts.len(), self.client.hosts_url());

        let buckets = aggregate(&hosts, &self.tag_key);
        let lines: Vec<String> = format_lines(&buckets, &self.tag_key, &self.keys)
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut report = CycleReport {
            hosts: hosts.len(),
            buckets: buckets.len(),
            ..CycleReport::default()
        };

        if mode == IngestMode::Send {
            for line in &lines {
                match self.client.ingest_line(line).await {
                    Ok(()) => report.ingested += 1,
                    Err(e) => {
                        warn!("Ingesting metric line failed: {} ({})", e, line);
                        report.failed += 1;
                    }
                }
            }
        }
        report.lines = lines;

        info!(
            hosts = report.hosts,
            buckets = report.buckets,
            lines = report.lines.len(),
            ingested = report.ingested,
            failed = report.failed,
            "Host-unit cycle complete"
        );

        CycleOutcome::Completed(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const HOSTS_PATH: &str = "/e/abc12345/api/v1/entity/infrastructure/hosts";
    const INGEST_PATH: &str = "/e/abc12345/api/v2/metrics/ingest";

    const SAMPLE_HOSTS: &str = r#"[
        {"entityId": "HOST-1", "consumedHostUnits": 2.5,
         "tags": [{"context": "CONTEXTLESS", "key": "env", "value": "prod"}]},
        {"entityId": "HOST-2", "consumedHostUnits": 1.0, "tags": []}
    ]"#;

    fn config_for(server: &Server) -> Config {
        let mut config = Config::default();
        config.environment.api_url = server.url();
        config.environment.tenant = "abc12345".to_string();
        config.environment.api_token = "dt0c01.secret".to_string();
        config.hostunits.tag_key = "env".to_string();
        config
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// Requests seen by [`spawn_hangup_server`], as (request line, body).
    type Seen = Arc<Mutex<Vec<(String, String)>>>;

    /// Reads one request, returning its request line and body.
    async fn read_request(socket: &mut TcpStream) -> Option<(String, String)> {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data).to_string();
            let Some(end) = text.find("\r\n\r\n") else {
                continue;
            };
            let head = &text[..end];
            let length = head
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            if data.len() >= end + 4 + length {
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let body = String::from_utf8_lossy(&data[end + 4..end + 4 + length]).to_string();
                return Some((request_line, body));
            }
        }
    }

    /// Plain HTTP server that closes the connection without answering on
    /// selected requests, which the client sees as a transport failure.
    ///
    /// GET is answered with `hosts_body`, or dropped when it is `None`.
    /// POSTs are answered with 202, except the 1-based numbers in `drop_posts`.
    async fn spawn_hangup_server(
        hosts_body: Option<&'static str>,
        drop_posts: Vec<usize>,
    ) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            let mut posts = 0;
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some((request_line, body)) = read_request(&mut socket).await else {
                    continue;
                };
                log.lock().unwrap().push((request_line.clone(), body));

                let (status, reply) = if request_line.starts_with("GET") {
                    match hosts_body {
                        Some(hosts) => ("200 OK", hosts),
                        None => continue,
                    }
                } else {
                    posts += 1;
                    if drop_posts.contains(&posts) {
                        continue;
                    }
                    ("202 Accepted", r#"{"linesOk": 1, "linesInvalid": 0}"#)
                };

                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), seen)
    }

    fn hangup_config(api_url: String) -> Config {
        let mut config = Config::default();
        config.environment.api_url = api_url;
        config.environment.tenant = "abc12345".to_string();
        config.environment.api_token = "dt0c01.secret".to_string();
        config.environment.timeout_seconds = 5;
        config.hostunits.tag_key = "env".to_string();
        config
    }

    #[tokio::test]
    async fn test_cycle_ingests_every_line() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", HOSTS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(SAMPLE_HOSTS)
            .create_async()
            .await;
        let ingest = server
            .mock("POST", INGEST_PATH)
            .with_status(202)
            .expect(6)
            .create_async()
            .await;

        let cycle = HostUnitCycle::new(&config_for(&server)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        ingest.assert_async().await;
        let CycleOutcome::Completed(report) = outcome else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.hosts, 2);
        assert_eq!(report.buckets, 2);
        assert_eq!(report.ingested, 6);
        assert_eq!(report.failed, 0);
        assert!(report
            .lines
            .contains(&r#"threesixty-perf.license.hostunits,env="prod" 2.50"#.to_string()));
        assert!(report
            .lines
            .contains(&"threesixty-perf.license.totalhostunits 3.50".to_string()));
        assert!(report
            .lines
            .contains(&r#"threesixty-perf.infra.hosts,env="other" 1.00"#.to_string()));
        assert!(report
            .lines
            .contains(&"threesixty-perf.infra.totalhosts 2.00".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_line_does_not_stop_the_rest() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", HOSTS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(SAMPLE_HOSTS)
            .create_async()
            .await;
        let rejected = server
            .mock("POST", INGEST_PATH)
            .match_body("threesixty-perf.license.totalhostunits 3.50")
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"invalid"}}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", INGEST_PATH)
            .match_body(Matcher::Regex("^threesixty-perf\\.(license\\.hostunits|infra\\.)".to_string()))
            .with_status(202)
            .expect(5)
            .create_async()
            .await;

        let cycle = HostUnitCycle::new(&config_for(&server)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        rejected.assert_async().await;
        accepted.assert_async().await;
        assert!(outcome.has_failures());
        let CycleOutcome::Completed(report) = outcome else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.ingested, 5);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_ingestion() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", HOSTS_PATH)
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let ingest = server
            .mock("POST", INGEST_PATH)
            .with_status(202)
            .expect(0)
            .create_async()
            .await;

        let cycle = HostUnitCycle::new(&config_for(&server)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        ingest.assert_async().await;
        assert!(matches!(outcome, CycleOutcome::FetchFailed { .. }));
        assert!(outcome.has_failures());
    }

    #[tokio::test]
    async fn test_fetch_transport_failure_skips_ingestion() {
        let (url, seen) = spawn_hangup_server(None, vec![]).await;

        let cycle = HostUnitCycle::new(&hangup_config(url)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        assert!(matches!(outcome, CycleOutcome::FetchFailed { .. }));
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|(line, _)| line.starts_with("GET ")));
    }

    #[tokio::test]
    async fn test_undecodable_inventory_skips_ingestion() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", HOSTS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;
        let ingest = server
            .mock("POST", INGEST_PATH)
            .with_status(202)
            .expect(0)
            .create_async()
            .await;

        let cycle = HostUnitCycle::new(&config_for(&server)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        ingest.assert_async().await;
        let CycleOutcome::FetchFailed { reason } = outcome else {
            panic!("fetch should have failed");
        };
        assert!(reason.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_dropped_ingest_connection_does_not_stop_the_rest() {
        let (url, seen) = spawn_hangup_server(Some(SAMPLE_HOSTS), vec![4]).await;

        let cycle = HostUnitCycle::new(&hangup_config(url)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        let CycleOutcome::Completed(report) = outcome else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.ingested, 5);
        assert_eq!(report.failed, 1);

        let posted: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(line, _)| line.starts_with("POST "))
            .map(|(_, body)| body.clone())
            .collect();
        assert_eq!(posted.len(), 6);
        assert_eq!(posted[3], r#"threesixty-perf.infra.hosts,env="prod" 1.00"#);
        assert_eq!(posted[5], "threesixty-perf.infra.totalhosts 2.00");
    }

    #[tokio::test]
    async fn test_empty_inventory_sends_zero_totals() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", HOSTS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let ingest = server
            .mock("POST", INGEST_PATH)
            .with_status(202)
            .expect(2)
            .create_async()
            .await;

        let cycle = HostUnitCycle::new(&config_for(&server)).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        ingest.assert_async().await;
        let CycleOutcome::Completed(report) = outcome else {
            panic!("cycle did not complete");
        };
        assert_eq!(
            report.lines,
            vec![
                "threesixty-perf.license.totalhostunits 0.00".to_string(),
                "threesixty-perf.infra.totalhosts 0.00".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", HOSTS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(SAMPLE_HOSTS)
            .create_async()
            .await;
        let ingest = server
            .mock("POST", INGEST_PATH)
            .expect(0)
            .create_async()
            .await;

        let cycle = HostUnitCycle::new(&config_for(&server)).unwrap();
        let outcome = cycle.run(now(), IngestMode::DryRun).await;

        ingest.assert_async().await;
        let CycleOutcome::Completed(report) = outcome else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.lines.len(), 6);
        assert_eq!(report.ingested, 0);
    }

    #[tokio::test]
    async fn test_disabled_makes_no_requests() {
        let mut server = Server::new_async().await;
        let any = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.hostunits.enabled = false;

        let cycle = HostUnitCycle::new(&config).unwrap();
        let outcome = cycle.run(now(), IngestMode::Send).await;

        any.assert_async().await;
        assert_eq!(outcome, CycleOutcome::Disabled);
        assert!(!outcome.has_failures());
    }
}
