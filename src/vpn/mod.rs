//! Tunnel lifecycle: config files, verification, killswitch and the
//! controller that ties them together.

pub mod controller;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod killswitch;
pub mod public_ip;
pub mod tunnel;

pub use controller::{ConnectionController, ConnectionState, OperationResult};
pub use error::{ErrorKind, VpnError};
pub use killswitch::{KillswitchManager, KillswitchState};
pub use public_ip::{IpCheckResult, PublicIpVerifier};
pub use tunnel::TunnelConfig;
