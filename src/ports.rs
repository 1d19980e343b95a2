use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Ports knocked by the TCP reachability probe when none are configured.
///
/// A refused connection proves a host is up as well as an accepted one, so
/// the list favours services that phones, printers, PCs and routers expose.
pub const DEFAULT_PROBE_PORTS: &[u16] = &[7, 22, 53, 80, 135, 139, 443, 445, 554, 8080, 62078];

/// Parse a probe port list into deduplicated TCP ports (1..=65535).
///
/// Entries are separated by newlines or commas. Each entry is a port
/// (`80`) or an inclusive range (`8000-8002`); `#` starts a comment.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");
        for entry in line.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some((a, b)) = entry.split_once('-') {
                let start = parse_port(a.trim())
                    .with_context(|| format!("line {line_no}: invalid range start: {a}"))?;
                let end = parse_port(b.trim())
                    .with_context(|| format!("line {line_no}: invalid range end: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                out.extend((start..=end).filter(|p| seen.insert(*p)));
                continue;
            }
            let port = parse_port(entry)
                .with_context(|| format!("line {line_no}: invalid port: {entry}"))?;
            if seen.insert(port) {
                out.push(port);
            }
        }
    }

    Ok(out)
}

/// Load a probe port list from a file.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

pub fn default_probe_ports() -> Vec<u16> {
    DEFAULT_PROBE_PORTS.to_vec()
}

fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.parse()?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
