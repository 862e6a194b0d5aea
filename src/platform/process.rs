//! Process-based tunnel control (`wg-quick up|down <config>`)

use super::command::CommandRunner;
use super::PlatformError;
use crate::vpn::tunnel::TunnelConfig;
use std::sync::Arc;
use tracing::info;

pub struct ProcessAdapter<R> {
    runner: Arc<R>,
    program: String,
}

impl<R: CommandRunner> ProcessAdapter<R> {
    pub fn new(runner: Arc<R>, program: String) -> Self {
        Self { runner, program }
    }

    pub async fn connect(&self, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        self.run("up", tunnel).await
    }

    pub async fn disconnect(&self, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        self.run("down", tunnel).await
    }

    async fn run(&self, action: &str, tunnel: &TunnelConfig) -> Result<String, PlatformError> {
        let program = self
            .runner
            .locate(&self.program)
            .ok_or_else(|| PlatformError::NotInstalled {
                program: self.program.clone(),
            })?;

        info!("Running {} {} for {}", self.program, action, tunnel.name());
        let args = vec![action.to_string(), tunnel.path().display().to_string()];
        let output = self.runner.run(&program, &args).await?;
        info!("{} {} succeeded", self.program, action);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{command_failed, FakeRunner};
    use std::path::Path;

    fn tunnel() -> TunnelConfig {
        TunnelConfig::from_content(Path::new("/etc/wireguard/wg0.conf"), "Endpoint = 1.2.3.4:51820\n")
            .unwrap()
    }

    #[tokio::test]
    async fn test_up_and_down_use_config_path() {
        let runner = Arc::new(FakeRunner::new(|_, _| Ok(String::new())).with_installed(&["wg-quick"]));
        let adapter = ProcessAdapter::new(runner.clone(), "wg-quick".to_string());

        adapter.connect(&tunnel()).await.unwrap();
        adapter.disconnect(&tunnel()).await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "wg-quick up /etc/wireguard/wg0.conf",
                "wg-quick down /etc/wireguard/wg0.conf",
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_are_not_normalized() {
        let runner = Arc::new(
            FakeRunner::new(|_, _| Err(command_failed("wg-quick: `wg0' is not a WireGuard interface")))
                .with_installed(&["wg-quick"]),
        );
        let adapter = ProcessAdapter::new(runner, "wg-quick".to_string());

        let err = adapter.disconnect(&tunnel()).await.unwrap_err();
        assert!(err.to_string().contains("is not a WireGuard interface"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_installed() {
        let runner = Arc::new(FakeRunner::new(|_, _| Ok(String::new())));
        let adapter = ProcessAdapter::new(runner.clone(), "wg-quick".to_string());

        let err = adapter.connect(&tunnel()).await.unwrap_err();
        assert!(matches!(err, PlatformError::NotInstalled { .. }));
        assert!(runner.calls().is_empty());
    }
}
