use crate::error::SubnetError;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// Narrowest network accepted: the first octet is never host space.
pub const MIN_PREFIX_LEN: u8 = 8;

/// Evenly spaced progress notifications per sweep.
pub const PROGRESS_TICKS: u64 = 64;

/// Scannable block derived from a local address and prefix length.
///
/// `base` always has its host bits cleared. The range covers all
/// `2^host_bits` addresses, network and broadcast included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubnetRange {
    base: Ipv4Addr,
    host_bits: u8,
}

/// Derive the scannable range for `local` inside a `/prefix_len` network.
///
/// Prefix lengths above 32 are invalid; lengths below 8 are rejected
/// rather than expanded into a sweep across the first octet.
pub fn resolve(local: Ipv4Addr, prefix_len: u8) -> Result<SubnetRange, SubnetError> {
    if prefix_len > 32 {
        return Err(SubnetError::InvalidPrefix(prefix_len));
    }
    if prefix_len < MIN_PREFIX_LEN {
        return Err(SubnetError::PrefixTooWide(prefix_len));
    }
    let net = Ipv4Net::new(local, prefix_len).map_err(|_| SubnetError::InvalidPrefix(prefix_len))?;
    Ok(SubnetRange {
        base: net.network(),
        host_bits: 32 - prefix_len,
    })
}

impl SubnetRange {
    pub fn base(&self) -> Ipv4Addr {
        self.base
    }

    pub fn host_bits(&self) -> u8 {
        self.host_bits
    }

    pub fn prefix_len(&self) -> u8 {
        32 - self.host_bits
    }

    /// Number of candidate addresses, `2^host_bits`.
    pub fn host_count(&self) -> u64 {
        1u64 << self.host_bits
    }

    /// `base + offset`, or `None` past the end of the range.
    pub fn address_at(&self, offset: u64) -> Option<Ipv4Addr> {
        if offset >= self.host_count() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.base) + offset as u32))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let delta = u32::from(addr).wrapping_sub(u32::from(self.base)) as u64;
        u32::from(addr) >= u32::from(self.base) && delta < self.host_count()
    }

    /// Candidate addresses in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (0..self.host_count()).filter_map(move |offset| self.address_at(offset))
    }
}

impl fmt::Display for SubnetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix_len())
    }
}

/// Offsets between progress ticks for a sweep of `host_count` candidates.
/// Never zero, so tiny ranges tick on every address.
pub fn progress_interval(host_count: u64, ticks: u64) -> u64 {
    (host_count / ticks.max(1)).max(1)
}
