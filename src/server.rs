use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use ::time::{format_description::well_known, OffsetDateTime};

use crate::{
    events::{event_channel, EventReceiver},
    netdetect::{InterfaceSelector, InterfaceSource},
    scanner::{self, ScanConfig, ScanOverrides},
    subnet,
    types::{ConnectionState, DiscoveredHost, ScanEvent, ScanOutcome, SessionState},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>,
    source: Arc<dyn InterfaceSource>,
    defaults: ScanConfig,
}

#[derive(Debug, Default)]
struct ServerState {
    session_id: u64,
    status: Status,
    hosts: Vec<HostRecord>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Status {
    pub session_id: u64,
    pub state: SessionState,
    pub connection: Option<ConnectionState>,
    pub progress_ticks: u64,
    pub hosts_found: u64,
    pub outcome: Option<ScanOutcome>,
}

/// A discovered host as the host environment stores it.
#[derive(Debug, Clone, Serialize)]
pub struct HostRecord {
    pub address: String,
    pub hostname: Option<String>,
    pub label: String,
    pub discovered_at: String,
}

impl From<DiscoveredHost> for HostRecord {
    fn from(host: DiscoveredHost) -> Self {
        Self {
            address: host.address.to_string(),
            label: host.display_name(),
            hostname: host.hostname,
            discovered_at: now_rfc3339(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    /// Interface name to sweep; the first usable one when absent.
    #[serde(default)]
    pub interface: Option<String>,
    /// Explicit `a.b.c.d/nn` network, bypassing interface lookup.
    #[serde(default)]
    pub target: Option<String>,
    /// Applied on top of the server's configured defaults.
    #[serde(default)]
    pub config: Option<ScanOverrides>,
}

impl AppState {
    pub fn new(source: Arc<dyn InterfaceSource>, defaults: ScanConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            source,
            defaults,
        }
    }

    /// Fold one event of session `id` into the shared status. Events of a
    /// superseded session are dropped.
    async fn apply(&self, id: u64, event: ScanEvent) {
        let mut s = self.inner.write().await;
        if s.session_id != id {
            return;
        }
        match event {
            ScanEvent::StateChanged { state } => {
                s.status.connection = Some(state);
                match state {
                    ConnectionState::Scanning => s.status.state = SessionState::Scanning,
                    // Terminal: no ScanComplete follows.
                    ConnectionState::NotConnected => {
                        s.status.state = SessionState::NotConnected;
                        s.cancel = None;
                    }
                }
            }
            ScanEvent::Progress => s.status.progress_ticks += 1,
            ScanEvent::HostDiscovered { host } => {
                s.status.hosts_found += 1;
                s.hosts.push(host.into());
            }
            ScanEvent::ScanComplete { summary } => {
                s.status.state = summary.outcome.session_state();
                s.status.outcome = Some(summary.outcome);
                s.cancel = None;
            }
        }
    }

    /// Drain one session's events in order.
    async fn consume(self, id: u64, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            self.apply(id, event).await;
        }
    }

    /// Cancel any running session and reset the status for a new one.
    async fn begin(&self, cancel: CancellationToken) -> u64 {
        let mut s = self.inner.write().await;
        if let Some(old) = s.cancel.take() {
            old.cancel();
        }
        s.session_id += 1;
        s.status = Status {
            session_id: s.session_id,
            ..Status::default()
        };
        s.hosts.clear();
        s.cancel = Some(cancel);
        s.session_id
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/hosts", get(get_hosts))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .with_state(state);

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    info!(%bind, "serving discovery API");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_hosts(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.hosts.clone()))
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.cancel.as_ref() {
        Some(token) => {
            token.cancel();
            StatusCode::ACCEPTED
        }
        None => StatusCode::CONFLICT,
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let config = req
        .config
        .unwrap_or_default()
        .apply(app.defaults.clone());

    // Validate an explicit target before touching the running session.
    let target = match req.target.as_deref().map(str::parse::<Ipv4Net>) {
        None => None,
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, format!("invalid target: {e}")).into_response()
        }
        Some(Ok(net)) => match subnet::resolve(net.addr(), net.prefix_len()) {
            Ok(_) => Some(net),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
    };

    let cancel = CancellationToken::new();
    let id = app.begin(cancel.clone()).await;
    let (tx, rx) = event_channel();
    tokio::spawn(app.clone().consume(id, rx));

    let prober = config.prober();
    match target {
        Some(net) => {
            tokio::spawn(async move {
                let res = scanner::scan_network(
                    net.addr(),
                    net.prefix_len(),
                    prober.as_ref(),
                    &config,
                    &tx,
                    &cancel,
                )
                .await;
                match res {
                    Ok(report) => info!(state = ?report.state, "network sweep ended"),
                    Err(e) => warn!(error = %e, "scan rejected"),
                }
            });
        }
        None => {
            let selector = req
                .interface
                .map(InterfaceSelector::Name)
                .unwrap_or_default();
            let handle = scanner::spawn_discovery(app.source.clone(), selector, prober, config, tx, cancel);
            let app2 = app.clone();
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(report)) => info!(state = ?report.state, "discovery session ended"),
                    Ok(Err(e)) => {
                        warn!(error = %e, "local network cannot be scanned");
                        let mut s = app2.inner.write().await;
                        if s.session_id == id {
                            s.status.state = SessionState::Failed;
                            s.status.outcome = Some(ScanOutcome::Failed {
                                reason: e.to_string(),
                            });
                            s.cancel = None;
                        }
                    }
                    Err(e) => warn!(error = %e, "discovery task panicked"),
                }
            });
        }
    }

    let status = Status {
        session_id: id,
        ..Status::default()
    };
    (StatusCode::ACCEPTED, Json(status)).into_response()
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdetect::StaticInterfaces;
    use crate::types::ScanSummary;
    use std::net::Ipv4Addr;

    fn app() -> AppState {
        AppState::new(Arc::new(StaticInterfaces::default()), ScanConfig::default())
    }

    #[tokio::test]
    async fn folds_events_into_status() {
        let app = app();
        let id = app.begin(CancellationToken::new()).await;

        app.apply(id, ScanEvent::StateChanged { state: ConnectionState::Scanning }).await;
        app.apply(id, ScanEvent::Progress).await;
        app.apply(
            id,
            ScanEvent::HostDiscovered {
                host: DiscoveredHost::new(Ipv4Addr::new(192, 168, 1, 9), Some("media-server".into())),
            },
        )
        .await;

        {
            let s = app.inner.read().await;
            assert_eq!(s.status.state, SessionState::Scanning);
            assert_eq!(s.status.progress_ticks, 1);
            assert_eq!(s.hosts.len(), 1);
            assert_eq!(s.hosts[0].label, "media-s...");
            assert!(s.cancel.is_some());
        }

        let mut summary = ScanSummary::failed("x");
        summary.outcome = ScanOutcome::Completed;
        app.apply(id, ScanEvent::ScanComplete { summary }).await;
        let s = app.inner.read().await;
        assert_eq!(s.status.state, SessionState::Completed);
        assert!(s.cancel.is_none());
    }

    #[tokio::test]
    async fn not_connected_ends_the_session() {
        let app = app();
        let id = app.begin(CancellationToken::new()).await;
        app.apply(id, ScanEvent::StateChanged { state: ConnectionState::NotConnected }).await;

        let s = app.inner.read().await;
        assert_eq!(s.status.state, SessionState::NotConnected);
        assert!(s.cancel.is_none());
    }

    #[tokio::test]
    async fn stale_session_events_are_ignored() {
        let app = app();
        let first = app.begin(CancellationToken::new()).await;
        let old_token = app.inner.read().await.cancel.clone().unwrap();
        let second = app.begin(CancellationToken::new()).await;
        assert!(old_token.is_cancelled());

        app.apply(first, ScanEvent::Progress).await;
        let s = app.inner.read().await;
        assert_eq!(s.status.session_id, second);
        assert_eq!(s.status.progress_ticks, 0);
    }
}
