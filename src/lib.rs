//! Library crate for lan-discovery: local subnet host discovery.
pub mod error;
pub mod events;
pub mod netdetect;
pub mod ports;
pub mod prober;
pub mod scanner;
pub mod server;
pub mod subnet;
pub mod types;
