//! Platform-specific tunnel control
//!
//! Two control surfaces exist for the external WireGuard tooling:
//!
//! - `service`: the tunnel runs as a managed OS service keyed by tunnel name
//!   (`wireguard.exe /installtunnelservice`), with a status tool (`wg.exe`)
//! - `process`: a single up/down command keyed by config path (`wg-quick`)
//!
//! The variant is picked once at startup from [`PlatformSettings`] and used
//! for every operation afterwards.

pub mod command;
pub mod process;
pub mod service;

pub use command::{CommandRunner, SystemRunner};
pub use process::ProcessAdapter;
pub use service::ServiceAdapter;

use crate::config::{PlatformMode, PlatformSettings};
use crate::vpn::tunnel::TunnelConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("WireGuard not installed ({program} not found)")]
    NotInstalled { program: String },
    #[error("{message}")]
    CommandFailed { command: String, message: String },
    #[error("{command} timed out after {}s", timeout.as_secs_f32())]
    TimedOut { command: String, timeout: Duration },
    #[error("Failed to launch {command}: {source}")]
    SpawnError {
        command: String,
        source: std::io::Error,
    },
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl PlatformError {
    /// True when this is a command failure whose diagnostic text contains any
    /// of `needles`, compared case-insensitively.
    pub fn mentions(&self, needles: &[&str]) -> bool {
        match self {
            PlatformError::CommandFailed { message, .. } => {
                let lower = message.to_lowercase();
                needles
                    .iter()
                    .any(|needle| lower.contains(&needle.to_lowercase()))
            }
            _ => false,
        }
    }
}

/// Tunnel control surface selected for this process
pub enum PlatformAdapter<R> {
    Service(ServiceAdapter<R>),
    Process(ProcessAdapter<R>),
}

impl<R: CommandRunner> PlatformAdapter<R> {
    pub fn from_settings(settings: &PlatformSettings, runner: Arc<R>) -> Self {
        match settings.mode.resolve() {
            PlatformMode::Service => PlatformAdapter::Service(ServiceAdapter::new(
                runner,
                settings.service_manager.clone(),
                settings.status_tool.clone(),
            )),
            _ => PlatformAdapter::Process(ProcessAdapter::new(runner, settings.quick_tool.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlatformAdapter::Service(_) => "service",
            PlatformAdapter::Process(_) => "process",
        }
    }

    pub async fn connect(&self, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        match self {
            PlatformAdapter::Service(adapter) => adapter.connect(tunnel).await,
            PlatformAdapter::Process(adapter) => adapter.connect(tunnel).await,
        }
    }

    pub async fn disconnect(&self, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        match self {
            PlatformAdapter::Service(adapter) => adapter.disconnect(tunnel).await,
            PlatformAdapter::Process(adapter) => adapter.disconnect(tunnel).await,
        }
    }

    /// Free-text runtime statistics of the tunnel
    pub async fn query(&self) -> Result<String, PlatformError> {
        match self {
            PlatformAdapter::Service(adapter) => adapter.query().await,
            PlatformAdapter::Process(_) => Err(PlatformError::UnsupportedPlatform(
                "raw tunnel state is only available with service-based control".to_string(),
            )),
        }
    }

    /// Whether `query` can be attempted at all
    pub fn supports_query(&self) -> bool {
        match self {
            PlatformAdapter::Service(adapter) => adapter.status_tool_available(),
            PlatformAdapter::Process(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::NotInstalled {
            program: "wireguard.exe".to_string(),
        };
        assert_eq!(err.to_string(), "WireGuard not installed (wireguard.exe not found)");

        let err = PlatformError::CommandFailed {
            command: "wg-quick up /tmp/wg0.conf".to_string(),
            message: "RTNETLINK answers: Operation not permitted".to_string(),
        };
        assert_eq!(err.to_string(), "RTNETLINK answers: Operation not permitted");

        let err = PlatformError::TimedOut {
            command: "wg".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "wg timed out after 1.5s");

        let err = PlatformError::UnsupportedPlatform("linux".to_string());
        assert_eq!(err.to_string(), "Unsupported platform: linux");
    }

    #[test]
    fn test_mentions_is_case_insensitive() {
        let err = PlatformError::CommandFailed {
            command: "wireguard.exe".to_string(),
            message: "Tunnel ALREADY Installed and running".to_string(),
        };
        assert!(err.mentions(&["already installed"]));
        assert!(!err.mentions(&["not found"]));

        let err = PlatformError::NotInstalled {
            program: "already installed".to_string(),
        };
        assert!(!err.mentions(&["already installed"]));
    }

    #[test]
    fn test_from_settings_honors_explicit_mode() {
        let runner = Arc::new(FakeRunner::new(|_, _| Ok("ok".to_string())));

        let mut settings = PlatformSettings::default();
        settings.mode = PlatformMode::Service;
        let adapter = PlatformAdapter::from_settings(&settings, runner.clone());
        assert_eq!(adapter.name(), "service");

        settings.mode = PlatformMode::Process;
        let adapter = PlatformAdapter::from_settings(&settings, runner);
        assert_eq!(adapter.name(), "process");
        assert!(!adapter.supports_query());
    }

    #[tokio::test]
    async fn test_process_adapter_query_is_unsupported() {
        let runner = Arc::new(FakeRunner::new(|_, _| Ok("ok".to_string())).with_installed(&["wg-quick"]));
        let adapter = PlatformAdapter::Process(ProcessAdapter::new(runner.clone(), "wg-quick".to_string()));

        let result = adapter.query().await;
        assert!(matches!(result, Err(PlatformError::UnsupportedPlatform(_))));
        assert!(runner.calls().is_empty());
    }
}
