//! Service-based tunnel control (Windows WireGuard)
//!
//! `wireguard.exe /installtunnelservice <config>` registers and starts the
//! tunnel as a service; `/uninstalltunnelservice <name>` removes it again.
//! Both are normalized so that repeating them is not an error.

use super::command::CommandRunner;
use super::PlatformError;
use crate::vpn::tunnel::TunnelConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const ALREADY_RUNNING: &str = "already running";
pub const ALREADY_STOPPED: &str = "already stopped";

const ALREADY_INSTALLED_MARKERS: &[&str] = &["already installed"];
const NOT_INSTALLED_MARKERS: &[&str] = &["service name is invalid", "not found"];

pub struct ServiceAdapter<R> {
    runner: Arc<R>,
    manager: String,
    status_tool: String,
}

impl<R: CommandRunner> ServiceAdapter<R> {
    pub fn new(runner: Arc<R>, manager: String, status_tool: String) -> Self {
        Self {
            runner,
            manager,
            status_tool,
        }
    }

    pub async fn connect(&self, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        let manager = self.require(&self.manager)?;
        let args = vec![
            "/installtunnelservice".to_string(),
            tunnel.path().display().to_string(),
        ];

        info!("Installing tunnel service for {}", tunnel.name());
        match self.runner.run(&manager, &args).await {
            Ok(output) => Ok(output),
            Err(e) if e.mentions(ALREADY_INSTALLED_MARKERS) => {
                info!("Tunnel service {} already installed", tunnel.name());
                debug!("Install diagnostic: {}", e);
                Ok(ALREADY_RUNNING.to_string())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn disconnect(&self, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        let manager = self.require(&self.manager)?;
        let args = vec!["/uninstalltunnelservice".to_string(), tunnel.name().to_string()];

        info!("Uninstalling tunnel service {}", tunnel.name());
        match self.runner.run(&manager, &args).await {
            Ok(output) => Ok(output),
            Err(e) if e.mentions(NOT_INSTALLED_MARKERS) => {
                info!("Tunnel service {} not installed", tunnel.name());
                debug!("Uninstall diagnostic: {}", e);
                Ok(ALREADY_STOPPED.to_string())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn query(&self) -> Result<String, PlatformError> {
        let tool = self.require(&self.status_tool)?;
        self.runner.run(&tool, &[]).await
    }

    pub fn status_tool_available(&self) -> bool {
        self.runner.locate(&self.status_tool).is_some()
    }

    fn require(&self, program: &str) -> Result<PathBuf, PlatformError> {
        self.runner
            .locate(program)
            .ok_or_else(|| PlatformError::NotInstalled {
                program: program.to_string(),
            })
    }
}
