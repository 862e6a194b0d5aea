//! Tunnel Pilot - WireGuard tunnel lifecycle orchestration
//!
//! Drives an existing WireGuard installation through connect, disconnect and
//! reconnect, confirms sessions by handshake and public IP, edits the peer
//! endpoint in place, and manages an outbound firewall killswitch.
//!
//! # Architecture
//!
//! - `config`: Settings file handling (TOML)
//! - `platform`: External command execution and the service/process adapters
//! - `vpn`: Tunnel config, verification, killswitch and the connection controller
//!
//! # Usage
//!
//! ```bash
//! tunnel-pilot connect
//! tunnel-pilot endpoint 203.0.113.7:2408 --reconnect
//! tunnel-pilot killswitch on
//! ```

pub mod config;
pub mod platform;
pub mod vpn;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use vpn::{ConnectionController, ConnectionState, ErrorKind, OperationResult, VpnError};
