use thiserror::Error;

/// Input errors from the subnet resolver. A scan never starts on these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubnetError {
    #[error("invalid prefix length /{0} (must be 0..=32)")]
    InvalidPrefix(u8),

    /// Only the low three octets are treated as host space.
    #[error("prefix length /{0} is wider than /8 and is not scanned")]
    PrefixTooWide(u8),
}

/// Failures while listing local network interfaces. Absorbed by the
/// coordinator; they surface only as a failed `ScanComplete`.
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("failed to enumerate network interfaces: {0}")]
    Enumeration(#[from] std::io::Error),
}
