//! Connection lifecycle controller
//!
//! Composes the platform adapter, handshake monitor, public IP verifier,
//! killswitch and endpoint editor into the caller-facing operations. Every
//! operation returns an [`OperationResult`]; nothing is raised to the caller.
//!
//! # State machine
//!
//! ```text
//! Disconnected|Failed --connect--> Connecting --ok--> Connected
//! Connected|Failed --disconnect--> Disconnecting --ok--> Disconnected
//! any --reconnect--> Reconnecting --ok--> Connected
//! any failure --> Failed --> Disconnected
//! ```
//!
//! The state lives in memory only. A fresh controller starts `Disconnected`
//! whatever the OS says, which is why connect and disconnect always call the
//! adapter and rely on its idempotency normalization.
//!
//! State-changing operations hold one lock for their whole duration, so
//! concurrent callers queue instead of interleaving external commands.

use super::endpoint;
use super::error::{ErrorKind, VpnError};
use super::handshake::HandshakeMonitor;
use super::killswitch::KillswitchManager;
use super::public_ip::{IpCheckResult, PublicIpVerifier};
use super::tunnel::TunnelConfig;
use crate::config::{Settings, SettleSettings, TunnelSettings};
use crate::platform::{CommandRunner, PlatformAdapter, SystemRunner};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
    /// Reported, then immediately left for `Disconnected`
    Failed,
}

/// Uniform result envelope of every caller-facing operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Whether a handshake was observed after bringing the tunnel up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake: Option<bool>,
    /// Non-fatal problem encountered along the way
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl OperationResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: &VpnError) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            kind: Some(error.kind()),
            ..Default::default()
        }
    }

    fn from_ip(check: IpCheckResult) -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
        .with_ip(check)
    }

    fn with_ip(mut self, check: IpCheckResult) -> Self {
        self.ip = Some(check.ip);
        self.source = Some(check.source);
        self
    }
}

struct Session {
    /// Last killswitch state set through this controller
    killswitch_enabled: bool,
}

pub struct ConnectionController<R> {
    tunnel: TunnelSettings,
    runner: Arc<R>,
    adapter: PlatformAdapter<R>,
    handshake: HandshakeMonitor,
    verifier: PublicIpVerifier,
    killswitch: KillswitchManager<R>,
    settle: SettleSettings,
    dns_flush: Vec<String>,
    verify_public_ip: bool,
    session: Mutex<Session>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionController<SystemRunner> {
    /// Controller driving real processes.
    pub fn from_settings(settings: &Settings) -> Result<Self, VpnError> {
        let runner = Arc::new(SystemRunner::new(settings.platform.command_timeout()));
        Self::new(settings, runner)
    }
}

impl<R: CommandRunner> ConnectionController<R> {
    pub fn new(settings: &Settings, runner: Arc<R>) -> Result<Self, VpnError> {
        let adapter = PlatformAdapter::from_settings(&settings.platform, runner.clone());
        let killswitch = KillswitchManager::from_settings(&settings.killswitch, runner.clone());
        let verifier = PublicIpVerifier::from_settings(&settings.public_ip)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        info!(
            "Controller ready: {} control, config dir {}",
            adapter.name(),
            settings.tunnel.config_dir.display()
        );

        Ok(Self {
            tunnel: settings.tunnel.clone(),
            runner,
            adapter,
            handshake: HandshakeMonitor::from_settings(&settings.handshake),
            verifier,
            killswitch,
            settle: settings.settle.clone(),
            dns_flush: settings.platform.dns_flush.clone(),
            verify_public_ip: settings.verify_public_ip,
            session: Mutex::new(Session {
                killswitch_enabled: false,
            }),
            state,
        })
    }

    /// Replace the platform-detected killswitch.
    pub fn with_killswitch(mut self, killswitch: KillswitchManager<R>) -> Self {
        self.killswitch = killswitch;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn connect(&self) -> OperationResult {
        self.connect_with_cancel(&CancellationToken::new()).await
    }

    /// Bring the tunnel up. Cancelling skips the remaining settle and
    /// verification phases; the adapter call itself always completes.
    pub async fn connect_with_cancel(&self, cancel: &CancellationToken) -> OperationResult {
        let _session = self.session.lock().await;
        info!("Connect requested (state: {:?})", self.state());
        self.transition(ConnectionState::Connecting);

        match self.bring_up(self.settle.after_connect_ms, false, cancel).await {
            Ok(result) => {
                self.transition(ConnectionState::Connected);
                result
            }
            Err(e) => self.fail("Connect", e),
        }
    }

    pub async fn disconnect(&self) -> OperationResult {
        self.disconnect_with_cancel(&CancellationToken::new()).await
    }

    pub async fn disconnect_with_cancel(&self, cancel: &CancellationToken) -> OperationResult {
        let _session = self.session.lock().await;
        info!("Disconnect requested (state: {:?})", self.state());
        self.transition(ConnectionState::Disconnecting);

        match self.tear_down().await {
            Ok(output) => {
                self.settle(self.settle.after_disconnect_ms, cancel).await;
                self.transition(ConnectionState::Disconnected);
                OperationResult::success(output)
            }
            Err(e) => self.fail("Disconnect", e),
        }
    }

    pub async fn reconnect(&self) -> OperationResult {
        self.reconnect_with_cancel(&CancellationToken::new()).await
    }

    /// Disconnect (failures ignored), pause, then connect. Cancelling before
    /// the connect phase leaves the tunnel down.
    pub async fn reconnect_with_cancel(&self, cancel: &CancellationToken) -> OperationResult {
        let _session = self.session.lock().await;
        info!("Reconnect requested (state: {:?})", self.state());
        self.transition(ConnectionState::Reconnecting);

        let teardown_warning = match self.tear_down().await {
            Ok(output) => {
                debug!("Disconnect phase: {}", output.trim());
                None
            }
            Err(e) => {
                warn!("Disconnect phase failed (continuing): {}", e);
                Some(format!("disconnect phase failed: {}", e))
            }
        };

        if !self.settle(self.settle.reconnect_gap_ms, cancel).await {
            info!("Reconnect cancelled before connect phase");
            self.transition(ConnectionState::Disconnected);
            return OperationResult::failure(&VpnError::Cancelled);
        }

        match self.bring_up(self.settle.after_reconnect_ms, true, cancel).await {
            Ok(mut result) => {
                self.transition(ConnectionState::Connected);
                result.warning = match (teardown_warning, result.warning.take()) {
                    (Some(teardown), Some(verify)) => Some(format!("{}; {}", teardown, verify)),
                    (teardown, verify) => teardown.or(verify),
                };
                result
            }
            Err(e) => self.fail("Reconnect", e),
        }
    }

    /// Public IP as seen from outside. Does not touch the connection state.
    pub async fn status(&self) -> OperationResult {
        self.status_with_cancel(&CancellationToken::new()).await
    }

    pub async fn status_with_cancel(&self, cancel: &CancellationToken) -> OperationResult {
        match self.verifier.check(cancel).await {
            Ok(check) => OperationResult::from_ip(check),
            Err(e) => OperationResult::failure(&e.into()),
        }
    }

    /// Raw runtime statistics from the status tool
    pub async fn raw_state(&self) -> OperationResult {
        match self.adapter.query().await {
            Ok(text) => OperationResult::success(text),
            Err(e) => OperationResult::failure(&e.into()),
        }
    }

    /// Rewrite the tunnel endpoint. Takes effect on the next (re)connect.
    pub async fn set_endpoint(&self, new_endpoint: &str) -> OperationResult {
        let session = self.session.lock().await;

        match self.apply_endpoint(&session, new_endpoint) {
            Ok(()) => OperationResult::success("endpoint updated; reconnect to apply"),
            Err(e) => {
                warn!("Endpoint update failed: {}", e);
                OperationResult::failure(&e)
            }
        }
    }

    pub async fn set_killswitch(&self, enabled: bool) -> OperationResult {
        let mut session = self.session.lock().await;

        match self.killswitch.set_enabled(enabled).await {
            Ok(()) => {
                session.killswitch_enabled = enabled;
                OperationResult::success(if enabled {
                    "killswitch enabled"
                } else {
                    "killswitch disabled"
                })
            }
            Err(e) => {
                error!("Killswitch update failed: {}", e);
                OperationResult::failure(&e.into())
            }
        }
    }

    pub async fn killswitch_state(&self) -> OperationResult {
        let _session = self.session.lock().await;

        match self.killswitch.state().await {
            Ok(state) => OperationResult::success(state.to_string()),
            Err(e) => OperationResult::failure(&e.into()),
        }
    }

    async fn bring_up(
        &self,
        settle_ms: u64,
        flush_dns: bool,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, VpnError> {
        let tunnel = self.load_tunnel()?;
        let output = self.adapter.connect(&tunnel).await?;
        info!(
            "Tunnel {} up via {} ({} control)",
            tunnel.name(),
            tunnel.endpoint(),
            self.adapter.name()
        );

        let mut result = OperationResult::success(output);
        if !self.settle(settle_ms, cancel).await {
            info!("Verification skipped (cancelled)");
            result.warning = Some("verification cancelled".to_string());
            return Ok(result);
        }

        if flush_dns {
            self.flush_dns().await;
        }

        result.handshake = Some(self.handshake.wait(&self.adapter, cancel).await);

        if self.verify_public_ip {
            match self.verifier.check(cancel).await {
                Ok(check) => result = result.with_ip(check),
                Err(e) => {
                    warn!("Public IP verification failed: {}", e);
                    result.warning = Some(e.to_string());
                }
            }
        }

        Ok(result)
    }

    async fn tear_down(&self) -> Result<String, VpnError> {
        let tunnel = self.load_tunnel()?;
        let output = self.adapter.disconnect(&tunnel).await?;
        info!("Tunnel {} down", tunnel.name());
        Ok(output)
    }

    fn apply_endpoint(&self, session: &Session, new_endpoint: &str) -> Result<(), VpnError> {
        let port = endpoint::validate_endpoint(new_endpoint)?;

        if session.killswitch_enabled {
            if let Some(allowed) = self.killswitch.allowed_port() {
                if allowed != port {
                    return Err(VpnError::KillswitchConflict { port, allowed });
                }
            }
        }

        let path = TunnelConfig::locate(&self.tunnel)?;
        endpoint::set_endpoint(&path, new_endpoint)?;
        Ok(())
    }

    fn load_tunnel(&self) -> Result<TunnelConfig, VpnError> {
        let path = TunnelConfig::locate(&self.tunnel)?;
        Ok(TunnelConfig::load(&path)?)
    }

    /// Wait out a settle window. Returns false if cancelled.
    async fn settle(&self, millis: u64, cancel: &CancellationToken) -> bool {
        if millis == 0 {
            return !cancel.is_cancelled();
        }

        debug!("Settling for {}ms", millis);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep(Duration::from_millis(millis)) => true,
        }
    }

    async fn flush_dns(&self) {
        let Some((program, args)) = self.dns_flush.split_first() else {
            return;
        };
        let Some(path) = self.runner.locate(program) else {
            debug!("{} not available, skipping DNS flush", program);
            return;
        };

        match self.runner.run(&path, args).await {
            Ok(_) => debug!("DNS cache flushed"),
            Err(e) => warn!("DNS flush failed (ignored): {}", e),
        }
    }

    fn fail(&self, operation: &str, error: VpnError) -> OperationResult {
        error!("{} failed: {}", operation, error);
        self.transition(ConnectionState::Failed);
        self.transition(ConnectionState::Disconnected);
        OperationResult::failure(&error)
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        debug!("State {:?} -> {:?}", previous, next);
    }
}
