use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Hostnames at or above this length are shortened by `DiscoveredHost::display_name`.
const DISPLAY_NAME_LIMIT: usize = 9;
const DISPLAY_NAME_KEEP: usize = 7;

/// One reachable host found during a sweep.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
}

impl DiscoveredHost {
    pub fn new(address: Ipv4Addr, hostname: Option<String>) -> Self {
        Self { address, hostname }
    }

    /// Hostname if one resolved, otherwise the dotted-quad address.
    pub fn name(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }

    /// Short label for tight layouts: names of 9 or more characters keep
    /// their first 7 characters followed by `...`.
    pub fn display_name(&self) -> String {
        let name = self.name();
        if name.chars().count() < DISPLAY_NAME_LIMIT {
            name
        } else {
            let mut short: String = name.chars().take(DISPLAY_NAME_KEEP).collect();
            short.push_str("...");
            short
        }
    }
}

/// Renders as `hostname:address`, split by consumers on the first `:`.
impl fmt::Display for DiscoveredHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name(), self.address)
    }
}

/// Connectivity reported to the host environment once per session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    NotConnected,
    Scanning,
}

/// Lifecycle of a single discovery session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    NotConnected,
    Scanning,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Scanning)
    }
}

/// Why a session reached `ScanComplete`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScanOutcome {
    /// Every candidate was probed, or the sweep stopped at the host cap.
    Completed,
    /// The cancellation token fired before the sweep finished.
    Cancelled,
    /// An internal fault (e.g. interfaces could not be listed) ended the session.
    Failed { reason: String },
}

impl ScanOutcome {
    pub fn session_state(&self) -> SessionState {
        match self {
            ScanOutcome::Completed => SessionState::Completed,
            ScanOutcome::Cancelled => SessionState::Cancelled,
            ScanOutcome::Failed { .. } => SessionState::Failed,
        }
    }
}

/// Counters carried by the terminal `ScanComplete` event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub outcome: ScanOutcome,
    /// Candidates whose probe finished.
    pub probed: u64,
    /// Candidates in the swept range.
    pub candidates: u64,
    /// `HostDiscovered` events emitted (never above the cap).
    pub hosts_found: u64,
    /// Reachable hosts seen, including those suppressed by the cap.
    pub hosts_reachable: u64,
    pub progress_ticks: u64,
}

impl ScanSummary {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: ScanOutcome::Failed {
                reason: reason.into(),
            },
            probed: 0,
            candidates: 0,
            hosts_found: 0,
            hosts_reachable: 0,
            progress_ticks: 0,
        }
    }
}

/// Everything a session emits, in emission order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ScanEvent {
    StateChanged { state: ConnectionState },
    Progress,
    HostDiscovered { host: DiscoveredHost },
    ScanComplete { summary: ScanSummary },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text_uses_hostname_then_address() {
        let host = DiscoveredHost::new(Ipv4Addr::new(192, 168, 1, 7), Some("printer".into()));
        assert_eq!(host.to_string(), "printer:192.168.1.7");
    }

    #[test]
    fn wire_text_falls_back_to_address() {
        let host = DiscoveredHost::new(Ipv4Addr::new(10, 0, 0, 2), None);
        assert_eq!(host.to_string(), "10.0.0.2:10.0.0.2");
    }

    #[test]
    fn display_name_truncates_long_names() {
        let short = DiscoveredHost::new(Ipv4Addr::LOCALHOST, Some("nas-01".into()));
        assert_eq!(short.display_name(), "nas-01");

        let eight = DiscoveredHost::new(Ipv4Addr::LOCALHOST, Some("abcdefgh".into()));
        assert_eq!(eight.display_name(), "abcdefgh");

        let long = DiscoveredHost::new(Ipv4Addr::LOCALHOST, Some("living-room-tv".into()));
        assert_eq!(long.display_name(), "living-...");
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Scanning.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::NotConnected.is_terminal());
        assert_eq!(
            ScanOutcome::Failed { reason: "x".into() }.session_state(),
            SessionState::Failed
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&ScanEvent::Progress).unwrap();
        assert_eq!(json, r#"{"event":"progress"}"#);
    }
}
