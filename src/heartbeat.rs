use crate::model::{HeartbeatAck, HeartbeatReport, ReportMetrics};
use crate::{metrics, wg};
use anyhow::Result;
use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response from backend: {0}")]
    NoResponse(#[source] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("malformed backend response: {0}")]
    Malformed(#[source] reqwest::Error),
}

pub struct BackendClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub async fn send_heartbeat(
        &self,
        report: &HeartbeatReport,
    ) -> Result<HeartbeatAck, TransportError> {
        let mut request = self
            .client
            .post(endpoint_at(&self.base_url, "/agent/heartbeat"))
            .json(report);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("X-API-Key", key);
        }
        let response = request.send().await.map_err(TransportError::NoResponse)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response.json().await.map_err(TransportError::Malformed)
    }
}

fn endpoint_at(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Periodic report loop. The interval is anchored at loop start, so a slow
/// send delays its own cycle but does not push later ticks. Exactly one
/// attempt per cycle; a failed cycle is logged and the next tick proceeds
/// independently.
pub async fn run_reporter(
    client: BackendClient,
    server_id: String,
    interface: String,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        // The first tick completes immediately, giving the startup report.
        interval.tick().await;
        let status = wg::simple_status(&interface).await;
        let sample = metrics::sample().await;
        let report = HeartbeatReport {
            server_id: server_id.clone(),
            wg_running: status.running,
            load: sample.load_percent,
            active_peers: status.peer_count,
            metrics: ReportMetrics::from(sample),
        };
        match client.send_heartbeat(&report).await {
            Ok(ack) if ack.success => {
                debug!(
                    "heartbeat ok (tunnel {}, {} peers)",
                    if status.running { "up" } else { "down" },
                    status.peer_count
                );
            }
            Ok(_) => warn!("heartbeat rejected by backend"),
            Err(err) => warn!("heartbeat failed: {err}"),
        }
    }
}
