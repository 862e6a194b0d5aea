//! Error taxonomy reported across the controller boundary

use super::public_ip::PublicIpError;
use super::tunnel::TunnelConfigError;
use crate::platform::PlatformError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VpnError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    TunnelConfig(#[from] TunnelConfigError),
    #[error(transparent)]
    PublicIp(#[from] PublicIpError),
    #[error(
        "Endpoint port {port} would be blocked by the enabled killswitch (allows UDP {allowed}); disable the killswitch first"
    )]
    KillswitchConflict { port: u16, allowed: u16 },
    #[error("Operation cancelled")]
    Cancelled,
}

/// Stable, machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotInstalled,
    ConfigNotFound,
    ConfigMalformed,
    ExternalCommandFailed,
    AllProvidersFailed,
    PlatformUnsupported,
    InvalidArgument,
    KillswitchConflict,
    Cancelled,
    Io,
}

impl VpnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VpnError::Platform(e) => match e {
                PlatformError::NotInstalled { .. } => ErrorKind::NotInstalled,
                PlatformError::UnsupportedPlatform(_) => ErrorKind::PlatformUnsupported,
                PlatformError::CommandFailed { .. }
                | PlatformError::TimedOut { .. }
                | PlatformError::SpawnError { .. } => ErrorKind::ExternalCommandFailed,
            },
            VpnError::TunnelConfig(e) => match e {
                TunnelConfigError::NotFound(_) => ErrorKind::ConfigNotFound,
                TunnelConfigError::Malformed { .. } => ErrorKind::ConfigMalformed,
                TunnelConfigError::InvalidEndpoint(_) => ErrorKind::InvalidArgument,
                TunnelConfigError::Io(_) => ErrorKind::Io,
            },
            VpnError::PublicIp(e) => match e {
                PublicIpError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
                PublicIpError::Cancelled => ErrorKind::Cancelled,
                PublicIpError::ClientError(_) => ErrorKind::Io,
            },
            VpnError::KillswitchConflict { .. } => ErrorKind::KillswitchConflict,
            VpnError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_kind_mapping() {
        let err: VpnError = PlatformError::NotInstalled {
            program: "wg-quick".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotInstalled);

        let err: VpnError = PlatformError::TimedOut {
            command: "wg".to_string(),
            timeout: std::time::Duration::from_secs(1),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ExternalCommandFailed);

        let err: VpnError = TunnelConfigError::NotFound(PathBuf::from("/cfg")).into();
        assert_eq!(err.kind(), ErrorKind::ConfigNotFound);

        let err: VpnError = PublicIpError::AllProvidersFailed { failures: vec![] }.into();
        assert_eq!(err.kind(), ErrorKind::AllProvidersFailed);

        assert_eq!(VpnError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_transparent_messages() {
        let err: VpnError = PlatformError::CommandFailed {
            command: "wireguard.exe".to_string(),
            message: "Access is denied.".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Access is denied.");
    }

    #[test]
    fn test_kind_serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::ConfigMalformed).unwrap(),
            "\"ConfigMalformed\""
        );
    }
}
