use crate::error::InterfaceError;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::ipv4_mask_to_prefix;
use serde::Serialize;
use std::net::Ipv4Addr;

/// One IPv4 address bound to a local interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInterface {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl LocalInterface {
    pub fn new(name: impl Into<String>, address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            name: name.into(),
            address,
            prefix_len,
        }
    }

    /// Loopback, unspecified and link-local addresses cannot reach a LAN.
    pub fn is_usable(&self) -> bool {
        !(self.address.is_loopback() || self.address.is_unspecified() || self.address.is_link_local())
    }
}

/// Source of local interface addresses, injected so sessions can run
/// against a fixed set in tests or a user-supplied network.
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> Result<Vec<LocalInterface>, InterfaceError>;
}

/// Reads the host's interfaces through `if-addrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<LocalInterface>, InterfaceError> {
        let mut out = Vec::new();
        for iface in get_if_addrs()? {
            if let IfAddr::V4(v4) = iface.addr {
                // A malformed netmask falls back to the common /24.
                let prefix_len = ipv4_mask_to_prefix(v4.netmask).unwrap_or(24);
                out.push(LocalInterface::new(iface.name, v4.ip, prefix_len));
            }
        }
        // Sort for stable output
        out.sort_by_key(|i| (u32::from(i.address), i.prefix_len));
        Ok(out)
    }
}

/// Fixed interface list.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<LocalInterface>);

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> Result<Vec<LocalInterface>, InterfaceError> {
        Ok(self.0.clone())
    }
}

/// How the scanner picks the interface to sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InterfaceSelector {
    /// First usable IPv4 address.
    #[default]
    Auto,
    /// First usable IPv4 address on the named interface.
    Name(String),
    /// The interface carrying exactly this address.
    Address(Ipv4Addr),
}

/// Pick the interface to sweep, or `None` when no usable address exists.
pub fn select_interface(
    interfaces: &[LocalInterface],
    selector: &InterfaceSelector,
) -> Option<LocalInterface> {
    interfaces
        .iter()
        .filter(|i| i.is_usable())
        .find(|i| match selector {
            InterfaceSelector::Auto => true,
            InterfaceSelector::Name(name) => &i.name == name,
            InterfaceSelector::Address(addr) => i.address == *addr,
        })
        .cloned()
}
