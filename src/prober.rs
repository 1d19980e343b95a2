use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

/// Outcome of one reachability probe. Only `Reachable` is reported; the
/// other two are skipped by the coordinator without further handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable { hostname: Option<String> },
    Unreachable,
    /// The probe could not be carried out for this candidate at all.
    LookupFailed,
}

impl ProbeResult {
    pub fn reachable(hostname: Option<String>) -> Self {
        ProbeResult::Reachable { hostname }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeResult::Reachable { .. })
    }
}

/// Tests one address within a time budget. Implementations never fail;
/// every error maps to `Unreachable` or `LookupFailed`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> ProbeResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    /// TCP connect to a handful of ports; accepted or refused means alive.
    #[default]
    Tcp,
    /// One ICMP echo through the system `ping` tool.
    Ping,
}

/// Build the prober for `method`. `lookup_timeout = None` disables
/// reverse name lookups.
pub fn for_method(
    method: ProbeMethod,
    ports: Vec<u16>,
    lookup_timeout: Option<Duration>,
) -> Arc<dyn Prober> {
    match method {
        ProbeMethod::Tcp => Arc::new(TcpProber::new(ports, lookup_timeout)),
        ProbeMethod::Ping => Arc::new(PingProber::new(lookup_timeout)),
    }
}

/// Reverse DNS for discovered hosts, one resolver shared by all lookups.
pub struct HostnameLookup {
    resolver: TokioResolver,
    timeout: Duration,
}

impl HostnameLookup {
    /// Resolver from the system configuration. `None` when the system
    /// configuration cannot be read; hosts are then reported without names.
    pub fn from_system(timeout: Duration) -> Option<Self> {
        match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => Some(Self {
                resolver: builder.build(),
                timeout,
            }),
            Err(e) => {
                warn!(error = %e, "no system resolver; hostnames disabled");
                None
            }
        }
    }

    /// Best-effort PTR lookup bounded by the lookup budget.
    pub async fn reverse(&self, addr: Ipv4Addr) -> Option<String> {
        let lookup = match time::timeout(self.timeout, self.resolver.reverse_lookup(IpAddr::V4(addr))).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "no reverse name");
                return None;
            }
            Err(_) => {
                debug!(%addr, "reverse lookup timed out");
                return None;
            }
        };
        lookup
            .iter()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .find(|name| !name.is_empty())
    }
}

async fn lookup_name(lookup: Option<&HostnameLookup>, addr: Ipv4Addr) -> Option<String> {
    match lookup {
        Some(l) => l.reverse(addr).await,
        None => None,
    }
}

/// Reachability through TCP connects, raced across a port list.
pub struct TcpProber {
    ports: Vec<u16>,
    lookup: Option<HostnameLookup>,
}

impl TcpProber {
    pub fn new(ports: Vec<u16>, lookup_timeout: Option<Duration>) -> Self {
        Self {
            ports,
            lookup: lookup_timeout.and_then(HostnameLookup::from_system),
        }
    }

    async fn knock(addr: Ipv4Addr, port: u16) -> bool {
        match TcpStream::connect(SocketAddrV4::new(addr, port)).await {
            Ok(_) => true,
            // A RST comes from a live host with nothing listening.
            Err(e) => e.kind() == io::ErrorKind::ConnectionRefused,
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> ProbeResult {
        let mut knocks: FuturesUnordered<_> = self
            .ports
            .iter()
            .map(|&port| Self::knock(addr, port))
            .collect();

        let alive = time::timeout(timeout, async {
            while let Some(up) = knocks.next().await {
                if up {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if !alive {
            return ProbeResult::Unreachable;
        }
        ProbeResult::reachable(lookup_name(self.lookup.as_ref(), addr).await)
    }
}

/// Reachability through a single system `ping`.
#[derive(Default)]
pub struct PingProber {
    lookup: Option<HostnameLookup>,
}

impl PingProber {
    pub fn new(lookup_timeout: Option<Duration>) -> Self {
        Self {
            lookup: lookup_timeout.and_then(HostnameLookup::from_system),
        }
    }

    fn command(addr: Ipv4Addr, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");

        #[cfg(target_os = "windows")]
        {
            let wait_ms = timeout.as_millis().max(1).to_string();
            cmd.args(["-n", "1", "-w", wait_ms.as_str()]);
        }

        // -W takes whole seconds here; the outer timeout enforces the real budget.
        #[cfg(not(target_os = "windows"))]
        {
            let wait_secs = timeout.as_secs().max(1).to_string();
            cmd.args(["-c", "1", "-W", wait_secs.as_str()]);
        }

        cmd.arg(addr.to_string()).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> ProbeResult {
        let output = match time::timeout(timeout, Self::command(addr, timeout).output()).await {
            Err(_) => return ProbeResult::Unreachable,
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "ping could not be run");
                return ProbeResult::LookupFailed;
            }
            Ok(Ok(output)) => output,
        };
        if !output.status.success() {
            return ProbeResult::Unreachable;
        }
        ProbeResult::reachable(lookup_name(self.lookup.as_ref(), addr).await)
    }
}
