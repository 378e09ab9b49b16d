use crate::model::{HealthVerdict, PeerRecord, TunnelSnapshot};
use crate::{health, wg};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde::Serialize;

/// Thin read-only queries over the same computations the agent already
/// runs. No side effects.
#[derive(Clone)]
pub struct ApiState {
    pub interface: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(verdict))
        .route("/peers", get(peers))
        .route("/service", get(service))
        .route("/port", get(port))
        .with_state(state)
}

pub async fn serve(listen_port: u16, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", listen_port))
        .await
        .with_context(|| format!("failed to bind status port {listen_port}"))?;
    info!("status endpoints listening on 127.0.0.1:{listen_port}");
    axum::serve(listener, router(state))
        .await
        .context("status server failed")
}

async fn status(State(state): State<ApiState>) -> Json<TunnelSnapshot> {
    Json(wg::snapshot(&state.interface).await)
}

async fn verdict(State(state): State<ApiState>) -> Json<HealthVerdict> {
    let snapshot = wg::snapshot(&state.interface).await;
    Json(health::classify(&snapshot))
}

async fn peers(State(state): State<ApiState>) -> Json<Vec<PeerRecord>> {
    Json(wg::snapshot(&state.interface).await.peers)
}

#[derive(Serialize)]
struct ServiceStatus {
    active: bool,
}

async fn service(State(state): State<ApiState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        active: wg::interface_up(&state.interface).await,
    })
}

#[derive(Serialize)]
struct PortStatus {
    listening: bool,
    port: Option<u16>,
}

async fn port(State(state): State<ApiState>) -> Json<PortStatus> {
    let snapshot = wg::snapshot(&state.interface).await;
    Json(PortStatus {
        listening: snapshot.listening_port.is_some(),
        port: snapshot.listening_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Runs against a host without the tunnel tool: every query must still
    // answer with the degraded defaults instead of failing.
    #[tokio::test]
    async fn health_endpoint_answers_when_tool_is_absent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(ApiState {
            interface: "wg-test".to_string(),
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "down");

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["peerCount"], 0);
        assert_eq!(body["interfaceUp"], false);
    }
}
