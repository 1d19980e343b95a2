use crate::error::SubnetError;
use crate::events::{emit, EventSender};
use crate::netdetect::{select_interface, InterfaceSelector, InterfaceSource, LocalInterface};
use crate::ports::default_probe_ports;
use crate::prober::{self, ProbeMethod, ProbeResult, Prober};
use crate::subnet::{self, progress_interval, SubnetRange, PROGRESS_TICKS};
use crate::types::{ConnectionState, DiscoveredHost, ScanEvent, ScanOutcome, ScanSummary, SessionState};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_MAX_HOSTS: u64 = 128;

/// Tunables for one discovery session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-candidate reachability budget.
    pub timeout_ms: u64,
    /// Cap on `HostDiscovered` events per session.
    pub max_hosts: u64,
    /// Probes in flight at once; 1 sweeps strictly one address at a time.
    pub concurrency: usize,
    pub progress_ticks: u64,
    /// End the sweep once `max_hosts` hosts were reported instead of
    /// probing the rest of the range silently.
    pub stop_at_cap: bool,
    pub method: ProbeMethod,
    pub probe_ports: Vec<u16>,
    pub resolve_hostnames: bool,
    pub lookup_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_hosts: DEFAULT_MAX_HOSTS,
            concurrency: 1,
            progress_ticks: PROGRESS_TICKS,
            stop_at_cap: false,
            method: ProbeMethod::Tcp,
            probe_ports: default_probe_ports(),
            resolve_hostnames: true,
            lookup_timeout_ms: 500,
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The prober this configuration describes.
    pub fn prober(&self) -> Arc<dyn Prober> {
        let lookup = self
            .resolve_hostnames
            .then(|| Duration::from_millis(self.lookup_timeout_ms));
        prober::for_method(self.method, self.probe_ports.clone(), lookup)
    }
}

/// Partial `ScanConfig`: fields left out keep the value they are applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanOverrides {
    pub timeout_ms: Option<u64>,
    pub max_hosts: Option<u64>,
    pub concurrency: Option<usize>,
    pub progress_ticks: Option<u64>,
    pub stop_at_cap: Option<bool>,
    pub method: Option<ProbeMethod>,
    pub probe_ports: Option<Vec<u16>>,
    pub resolve_hostnames: Option<bool>,
    pub lookup_timeout_ms: Option<u64>,
}

impl ScanOverrides {
    pub fn apply(self, mut base: ScanConfig) -> ScanConfig {
        if let Some(v) = self.timeout_ms {
            base.timeout_ms = v;
        }
        if let Some(v) = self.max_hosts {
            base.max_hosts = v;
        }
        if let Some(v) = self.concurrency {
            base.concurrency = v;
        }
        if let Some(v) = self.progress_ticks {
            base.progress_ticks = v;
        }
        if let Some(v) = self.stop_at_cap {
            base.stop_at_cap = v;
        }
        if let Some(v) = self.method {
            base.method = v;
        }
        if let Some(v) = self.probe_ports {
            base.probe_ports = v;
        }
        if let Some(v) = self.resolve_hostnames {
            base.resolve_hostnames = v;
        }
        if let Some(v) = self.lookup_timeout_ms {
            base.lookup_timeout_ms = v;
        }
        base
    }
}

/// Mutable counters of one sweep, owned by the coordinator loop alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    pub state: SessionState,
    pub candidates: u64,
    pub probed: u64,
    pub hosts_found: u64,
    pub hosts_reachable: u64,
    pub progress_interval: u64,
    pub progress_counter: u64,
    pub progress_ticks: u64,
}

impl ScanSession {
    pub fn new(range: &SubnetRange, config: &ScanConfig) -> Self {
        let candidates = range.host_count();
        let interval = progress_interval(candidates, config.progress_ticks);
        Self {
            state: SessionState::Idle,
            candidates,
            probed: 0,
            hosts_found: 0,
            hosts_reachable: 0,
            progress_interval: interval,
            progress_counter: interval,
            progress_ticks: 0,
        }
    }

    /// Ticks a full sweep emits: one every `progress_interval` positions,
    /// the last landing on the end of the range.
    pub fn expected_ticks(&self) -> u64 {
        self.candidates / self.progress_interval
    }

    /// Register that the sweep reached `position`; true when a progress
    /// notification is due.
    pub fn tick(&mut self, position: u64) -> bool {
        if position != self.progress_counter {
            return false;
        }
        self.progress_counter += self.progress_interval;
        self.progress_ticks += 1;
        true
    }

    /// Count a reachable host; true when it may still be reported.
    pub fn admit(&mut self, max_hosts: u64) -> bool {
        self.hosts_reachable += 1;
        if self.hosts_found >= max_hosts {
            return false;
        }
        self.hosts_found += 1;
        true
    }

    fn summary(&self, outcome: ScanOutcome) -> ScanSummary {
        ScanSummary {
            outcome,
            probed: self.probed,
            candidates: self.candidates,
            hosts_found: self.hosts_found,
            hosts_reachable: self.hosts_reachable,
            progress_ticks: self.progress_ticks,
        }
    }
}

/// Sweep every address of `range`, reporting hosts, progress and a
/// single `ScanComplete` through `events`.
///
/// Probes run `config.concurrency` at a time but results are consumed in
/// offset order, so emission order matches a sequential sweep. Probe
/// failures are skipped; the sweep only ends early on cancellation or,
/// with `stop_at_cap`, once the host cap is reached.
pub async fn run_scan(
    range: SubnetRange,
    prober: &dyn Prober,
    config: &ScanConfig,
    events: &EventSender,
    cancel: &CancellationToken,
) -> ScanSummary {
    let mut session = ScanSession::new(&range, config);
    session.state = SessionState::Scanning;
    let timeout = config.timeout();
    let concurrency = config.concurrency.clamp(1, 1_024);

    info!(
        range = %range,
        candidates = session.candidates,
        concurrency,
        "host sweep started"
    );

    let probes = stream::iter(
        (0..session.candidates).filter_map(move |offset| range.address_at(offset).map(|a| (offset, a))),
    )
    .map(move |(offset, addr)| async move { (offset, addr, prober.probe(addr, timeout).await) })
    .buffered(concurrency);
    tokio::pin!(probes);

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break ScanOutcome::Cancelled,
            next = probes.next() => next,
        };
        let Some((offset, addr, result)) = next else {
            // Final tick lands on the end of the range.
            if session.tick(session.candidates) {
                emit(events, ScanEvent::Progress);
            }
            break ScanOutcome::Completed;
        };

        if session.tick(offset) {
            emit(events, ScanEvent::Progress);
        }
        session.probed += 1;

        match result {
            ProbeResult::Reachable { hostname } => {
                if session.admit(config.max_hosts) {
                    debug!(%addr, hostname = ?hostname, "host discovered");
                    emit(
                        events,
                        ScanEvent::HostDiscovered {
                            host: DiscoveredHost::new(addr, hostname),
                        },
                    );
                } else {
                    trace!(%addr, "host cap reached; not reported");
                }
                if config.stop_at_cap && session.hosts_found >= config.max_hosts {
                    info!(max_hosts = config.max_hosts, "host cap reached; stopping sweep");
                    break ScanOutcome::Completed;
                }
            }
            other => trace!(%addr, result = ?other, "no host"),
        }
    };

    session.state = outcome.session_state();
    let summary = session.summary(outcome);
    info!(
        outcome = ?summary.outcome,
        probed = summary.probed,
        hosts = summary.hosts_found,
        "host sweep finished"
    );
    emit(
        events,
        ScanEvent::ScanComplete {
            summary: summary.clone(),
        },
    );
    summary
}

/// What a discovery session did, for callers that want more than events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub state: SessionState,
    pub interface: Option<LocalInterface>,
    pub range: Option<SubnetRange>,
    pub summary: Option<ScanSummary>,
}

impl SessionReport {
    fn not_connected() -> Self {
        Self {
            state: SessionState::NotConnected,
            interface: None,
            range: None,
            summary: None,
        }
    }
}

/// Full session: find the local interface, announce connectivity, then
/// sweep its subnet.
///
/// - No usable IPv4 address: `StateChanged(NotConnected)` and nothing else.
/// - Interfaces cannot be listed: `StateChanged(NotConnected)` followed by
///   a failed `ScanComplete`; the fault is never returned.
/// - Otherwise `StateChanged(Scanning)` and the events of `run_scan`.
///
/// Only a prefix the resolver rejects is returned as an error, before any
/// event is emitted.
pub async fn discover(
    source: &dyn InterfaceSource,
    selector: &InterfaceSelector,
    prober: &dyn Prober,
    config: &ScanConfig,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<SessionReport, SubnetError> {
    let interfaces = match source.interfaces() {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "interface enumeration failed");
            emit(
                events,
                ScanEvent::StateChanged {
                    state: ConnectionState::NotConnected,
                },
            );
            let summary = ScanSummary::failed(e.to_string());
            emit(
                events,
                ScanEvent::ScanComplete {
                    summary: summary.clone(),
                },
            );
            return Ok(SessionReport {
                state: SessionState::Failed,
                summary: Some(summary),
                ..SessionReport::not_connected()
            });
        }
    };

    let Some(iface) = select_interface(&interfaces, selector) else {
        info!(?selector, "no usable IPv4 address; not scanning");
        emit(
            events,
            ScanEvent::StateChanged {
                state: ConnectionState::NotConnected,
            },
        );
        return Ok(SessionReport::not_connected());
    };

    let range = subnet::resolve(iface.address, iface.prefix_len)?;
    info!(interface = %iface.name, address = %iface.address, %range, "local network found");
    emit(
        events,
        ScanEvent::StateChanged {
            state: ConnectionState::Scanning,
        },
    );

    let summary = run_scan(range, prober, config, events, cancel).await;
    Ok(SessionReport {
        state: summary.outcome.session_state(),
        interface: Some(iface),
        range: Some(range),
        summary: Some(summary),
    })
}

/// Run `discover` on a background task so the caller's context is never
/// blocked. Dropping every clone of `events` ends the consumer's stream.
pub fn spawn_discovery(
    source: Arc<dyn InterfaceSource>,
    selector: InterfaceSelector,
    prober: Arc<dyn Prober>,
    config: ScanConfig,
    events: EventSender,
    cancel: CancellationToken,
) -> JoinHandle<Result<SessionReport, SubnetError>> {
    tokio::spawn(async move {
        discover(
            source.as_ref(),
            &selector,
            prober.as_ref(),
            &config,
            &events,
            &cancel,
        )
        .await
    })
}

/// Sweep an explicit address and prefix, bypassing interface lookup.
pub async fn scan_network(
    address: Ipv4Addr,
    prefix_len: u8,
    prober: &dyn Prober,
    config: &ScanConfig,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<SessionReport, SubnetError> {
    let range = subnet::resolve(address, prefix_len)?;
    emit(
        events,
        ScanEvent::StateChanged {
            state: ConnectionState::Scanning,
        },
    );
    let summary = run_scan(range, prober, config, events, cancel).await;
    Ok(SessionReport {
        state: summary.outcome.session_state(),
        interface: None,
        range: Some(range),
        summary: Some(summary),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(prefix: u8) -> ScanSession {
        let range = subnet::resolve(Ipv4Addr::new(192, 168, 0, 1), prefix).unwrap();
        ScanSession::new(&range, &ScanConfig::default())
    }

    #[test]
    fn defaults() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_millis(50));
        assert_eq!(cfg.max_hosts, 128);
        assert_eq!(cfg.concurrency, 1);
        assert!(!cfg.stop_at_cap);
    }

    #[test]
    fn config_fills_missing_fields() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"max_hosts": 4, "method": "ping"}"#).unwrap();
        assert_eq!(cfg.max_hosts, 4);
        assert_eq!(cfg.method, ProbeMethod::Ping);
        assert_eq!(cfg.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn overrides_keep_unset_fields_of_base() {
        let base = ScanConfig {
            max_hosts: 0,
            probe_ports: vec![8443],
            concurrency: 8,
            ..ScanConfig::default()
        };
        let patch: ScanOverrides = serde_json::from_str(r#"{"timeout_ms": 500}"#).unwrap();
        let cfg = patch.apply(base.clone());
        assert_eq!(cfg.timeout_ms, 500);
        assert_eq!(cfg.max_hosts, 0);
        assert_eq!(cfg.probe_ports, vec![8443]);
        assert_eq!(cfg.concurrency, 8);

        assert_eq!(ScanOverrides::default().apply(base.clone()), base);
    }

    #[test]
    fn tick_cadence_for_slash_24() {
        let mut s = session_for(24);
        assert_eq!(s.progress_interval, 4);
        let due: Vec<u64> = (0..=256).filter(|&p| s.tick(p)).collect();
        assert_eq!(due.len(), 64);
        assert_eq!(due.first(), Some(&4));
        assert_eq!(due.last(), Some(&256));
        assert_eq!(s.progress_ticks, s.expected_ticks());
    }

    #[test]
    fn single_address_session() {
        let mut s = session_for(32);
        assert_eq!(s.candidates, 1);
        assert_eq!(s.progress_interval, 1);
        assert!(!s.tick(0));
        assert!(s.tick(1));
        assert_eq!(s.expected_ticks(), 1);
    }

    #[test]
    fn admit_counts_past_the_cap() {
        let mut s = session_for(24);
        assert!(s.admit(2));
        assert!(s.admit(2));
        assert!(!s.admit(2));
        assert_eq!(s.hosts_found, 2);
        assert_eq!(s.hosts_reachable, 3);
    }
}
