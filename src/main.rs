use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lan_discovery::events::{event_channel, spawn_dispatcher, ScanObserver};
use lan_discovery::netdetect::{InterfaceSelector, SystemInterfaces};
use lan_discovery::ports;
use lan_discovery::prober::ProbeMethod;
use lan_discovery::scanner::{self, ScanConfig, SessionReport};
use lan_discovery::server::{self, AppState};
use lan_discovery::types::{ConnectionState, DiscoveredHost, ScanSummary};

use anyhow::{Context, Result};
use clap::Parser;
use ipnet::Ipv4Net;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// lan-discovery — find the hosts that answer on your local IPv4 network.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-discovery",
    version,
    about = "Sweep the local IPv4 subnet and list every host that answers.",
    long_about = None
)]
struct Cli {
    /// Network to sweep (e.g., 192.168.1.0/24). If omitted, use the active interface's subnet.
    #[arg(long)]
    target: Option<Ipv4Net>,

    /// Interface to take the local address from (e.g., wlan0).
    #[arg(long)]
    interface: Option<String>,

    /// Reachability budget per address in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = scanner::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Probes in flight at once. 1 sweeps addresses strictly in order.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Report at most this many hosts.
    #[arg(long = "max-hosts", default_value_t = scanner::DEFAULT_MAX_HOSTS)]
    max_hosts: u64,

    /// Stop sweeping once --max-hosts hosts were reported.
    #[arg(long = "stop-at-cap", default_value_t = false)]
    stop_at_cap: bool,

    /// How reachability is tested.
    #[arg(long, value_enum, default_value_t = ProbeMethod::Tcp)]
    method: ProbeMethod,

    /// Ports knocked by the TCP probe: a list like "22,80,8000-8010" or a path to a ports file.
    #[arg(long = "probe-ports")]
    probe_ports: Option<String>,

    /// Skip reverse name lookups for discovered hosts.
    #[arg(long = "no-hostnames", default_value_t = false)]
    no_hostnames: bool,

    /// Budget for each reverse name lookup in milliseconds.
    #[arg(long = "lookup-timeout-ms", default_value_t = 500)]
    lookup_timeout_ms: u64,

    /// Write the session report and hosts as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the discovery HTTP API on this address (e.g., 127.0.0.1:8080) instead of sweeping once.
    #[arg(long)]
    serve: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn scan_config(&self) -> Result<ScanConfig> {
        let probe_ports = match self.probe_ports.as_deref() {
            None => ports::default_probe_ports(),
            Some(list) if Path::new(list).is_file() => ports::load_ports_from_path(list)?,
            Some(list) => ports::parse_ports_str(list).context("invalid --probe-ports")?,
        };
        Ok(ScanConfig {
            timeout_ms: self.timeout_ms,
            max_hosts: self.max_hosts,
            concurrency: self.concurrency,
            stop_at_cap: self.stop_at_cap,
            method: self.method,
            probe_ports,
            resolve_hostnames: !self.no_hostnames,
            lookup_timeout_ms: self.lookup_timeout_ms,
            ..ScanConfig::default()
        })
    }

    fn selector(&self) -> InterfaceSelector {
        self.interface
            .clone()
            .map(InterfaceSelector::Name)
            .unwrap_or_default()
    }
}

/// Prints as the sweep goes and keeps what it printed.
#[derive(Debug, Default)]
struct ConsoleObserver {
    hosts: Vec<DiscoveredHost>,
    progress: u64,
    summary: Option<ScanSummary>,
}

impl ScanObserver for ConsoleObserver {
    fn on_state_changed(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::NotConnected => println!("Not connected to a local IPv4 network."),
            ConnectionState::Scanning => println!("Scanning local network..."),
        }
    }

    fn on_progress(&mut self) {
        self.progress += 1;
        debug!(ticks = self.progress, "progress");
    }

    fn on_host_discovered(&mut self, host: DiscoveredHost) {
        println!("  + {}", host);
        self.hosts.push(host);
    }

    fn on_scan_complete(&mut self, summary: ScanSummary) {
        self.summary = Some(summary);
    }
}

#[derive(Debug, Serialize)]
struct DiscoveryResults<'a> {
    report: &'a SessionReport,
    hosts: &'a [DiscoveredHost],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(?cli, "parsed arguments");

    let config = cli.scan_config()?;

    if let Some(bind) = cli.serve.as_deref() {
        let state = AppState::new(Arc::new(SystemInterfaces), config);
        tokio::select! {
            res = server::spawn_server(bind, state) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    // Ctrl-C cancels the sweep; the session still completes.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let (tx, rx) = event_channel();
    let dispatcher = spawn_dispatcher(rx, ConsoleObserver::default());
    let prober = config.prober();

    let task = match cli.target {
        Some(net) => tokio::spawn(async move {
            scanner::scan_network(
                net.addr(),
                net.prefix_len(),
                prober.as_ref(),
                &config,
                &tx,
                &cancel,
            )
            .await
        }),
        None => scanner::spawn_discovery(
            Arc::new(SystemInterfaces),
            cli.selector(),
            prober,
            config,
            tx,
            cancel,
        ),
    };

    let report = task.await.context("scan task failed")??;
    let console = dispatcher.await.context("event dispatcher failed")?;

    print_hosts_table(&console.hosts);
    if let Some(summary) = console.summary.as_ref() {
        println!(
            "\nOutcome: {:?} (probed {} of {}, {} reachable, {} progress ticks)",
            summary.outcome,
            summary.probed,
            summary.candidates,
            summary.hosts_reachable,
            console.progress
        );
    }

    if let Some(path) = cli.output.as_deref() {
        let results = DiscoveryResults {
            report: &report,
            hosts: &console.hosts,
        };
        write_results_json(path, &results)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

const NAME_COLUMN_MAX: usize = 60;

/// First `max` characters of `s`.
fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn print_hosts_table(hosts: &[DiscoveredHost]) {
    let addr_w = hosts
        .iter()
        .map(|h| h.address.to_string().len())
        .max()
        .unwrap_or(0)
        .max("address".len());
    let name_w = hosts
        .iter()
        .map(|h| h.name().chars().count().min(NAME_COLUMN_MAX))
        .max()
        .unwrap_or(0)
        .max("hostname".len());

    println!("\nHosts found: {}", hosts.len());
    println!(
        "{:<addr_w$}  {:<name_w$}",
        "address",
        "hostname",
        addr_w = addr_w,
        name_w = name_w
    );
    println!(
        "{:-<addr_w$}  {:-<name_w$}",
        "",
        "",
        addr_w = addr_w,
        name_w = name_w
    );
    for h in hosts {
        let name = clip(h.hostname.as_deref().unwrap_or_default(), NAME_COLUMN_MAX);
        println!(
            "{:<addr_w$}  {:<name_w$}",
            h.address.to_string(),
            name,
            addr_w = addr_w,
            name_w = name_w
        );
    }
}

fn write_results_json(path: &Path, results: &DiscoveryResults<'_>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_counts_characters_not_bytes() {
        let name = "é".repeat(61);
        let clipped = clip(&name, NAME_COLUMN_MAX);
        assert_eq!(clipped.chars().count(), 60);
        assert_eq!(clip("nas-01", NAME_COLUMN_MAX), "nas-01");
    }
}
