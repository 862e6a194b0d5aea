//! Outbound killswitch through the Windows firewall
//!
//! Three named rules together permit only tunnel traffic:
//!
//! | Rule | Action | Scope |
//! |------|--------|-------|
//! | allow-tunnel | Allow | tunnel interface alias |
//! | allow-endpoint | Allow | UDP remote port |
//! | block-all | Block | none |
//!
//! Enabling and disabling both converge on a target set, so a partially
//! applied or duplicated rule set is repaired by repeating the call. The
//! allowed UDP port comes from settings and does not follow the tunnel's
//! configured endpoint.

use crate::config::KillswitchSettings;
use crate::platform::{CommandRunner, PlatformError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DUPLICATE_RULE_MARKERS: &[&str] = &["already exists"];
const MISSING_RULE_MARKERS: &[&str] = &["no msft_netfirewallrule objects found", "not found"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillswitchState {
    Enabled,
    Disabled,
    /// Some but not all rules present
    Partial { present: usize },
}

impl fmt::Display for KillswitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillswitchState::Enabled => write!(f, "enabled"),
            KillswitchState::Disabled => write!(f, "disabled"),
            KillswitchState::Partial { present } => {
                write!(f, "partial ({} of {} rules present)", present, RULE_COUNT)
            }
        }
    }
}

const RULE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RuleScope {
    Interface(String),
    UdpPort(u16),
    Unscoped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FirewallRule {
    name: String,
    allow: bool,
    scope: RuleScope,
}

impl FirewallRule {
    fn create_script(&self) -> String {
        let action = if self.allow { "Allow" } else { "Block" };
        let scope = match &self.scope {
            RuleScope::Interface(alias) => format!(" -InterfaceAlias {}", quote(alias)),
            RuleScope::UdpPort(port) => format!(" -Protocol UDP -RemotePort {}", port),
            RuleScope::Unscoped => String::new(),
        };
        format!(
            "New-NetFirewallRule -DisplayName {} -Direction Outbound -Action {}{} -Profile Any -ErrorAction Stop | Out-Null",
            quote(&self.name),
            action,
            scope
        )
    }

    fn count_script(&self) -> String {
        format!(
            "@(Get-NetFirewallRule -DisplayName {} -ErrorAction SilentlyContinue).Count",
            quote(&self.name)
        )
    }

    fn remove_script(&self) -> String {
        format!(
            "Get-NetFirewallRule -DisplayName {} -ErrorAction SilentlyContinue | Remove-NetFirewallRule",
            quote(&self.name)
        )
    }
}

/// Single-quoted PowerShell literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub enum KillswitchManager<R> {
    Firewall(FirewallKillswitch<R>),
    /// No firewall surface on this platform; every call fails without side effects.
    Unsupported { platform: String },
}

impl<R: CommandRunner> KillswitchManager<R> {
    /// Firewall-backed on Windows, unsupported elsewhere.
    pub fn from_settings(settings: &KillswitchSettings, runner: Arc<R>) -> Self {
        if cfg!(windows) {
            KillswitchManager::Firewall(FirewallKillswitch::new(settings, runner))
        } else {
            KillswitchManager::Unsupported {
                platform: std::env::consts::OS.to_string(),
            }
        }
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), PlatformError> {
        match self {
            KillswitchManager::Firewall(firewall) if enabled => firewall.enable().await,
            KillswitchManager::Firewall(firewall) => firewall.disable().await,
            KillswitchManager::Unsupported { platform } => Err(unsupported(platform)),
        }
    }

    pub async fn state(&self) -> Result<KillswitchState, PlatformError> {
        match self {
            KillswitchManager::Firewall(firewall) => firewall.state().await,
            KillswitchManager::Unsupported { platform } => Err(unsupported(platform)),
        }
    }

    /// UDP port the allow-endpoint rule lets through
    pub fn allowed_port(&self) -> Option<u16> {
        match self {
            KillswitchManager::Firewall(firewall) => Some(firewall.endpoint_port),
            KillswitchManager::Unsupported { .. } => None,
        }
    }
}

fn unsupported(platform: &str) -> PlatformError {
    PlatformError::UnsupportedPlatform(format!("killswitch is Windows-only (running on {})", platform))
}

pub struct FirewallKillswitch<R> {
    runner: Arc<R>,
    shell: String,
    rules: [FirewallRule; RULE_COUNT],
    endpoint_port: u16,
}

impl<R: CommandRunner> FirewallKillswitch<R> {
    pub fn new(settings: &KillswitchSettings, runner: Arc<R>) -> Self {
        let rules = [
            FirewallRule {
                name: settings.allow_tunnel_rule.clone(),
                allow: true,
                scope: RuleScope::Interface(settings.interface_alias.clone()),
            },
            FirewallRule {
                name: settings.allow_endpoint_rule.clone(),
                allow: true,
                scope: RuleScope::UdpPort(settings.endpoint_port),
            },
            FirewallRule {
                name: settings.block_all_rule.clone(),
                allow: false,
                scope: RuleScope::Unscoped,
            },
        ];

        Self {
            runner,
            shell: settings.shell.clone(),
            rules,
            endpoint_port: settings.endpoint_port,
        }
    }

    async fn enable(&self) -> Result<(), PlatformError> {
        info!("Enabling killswitch");
        for rule in &self.rules {
            match self.count(rule).await? {
                1 => debug!("Rule {} already present", rule.name),
                0 => self.create(rule).await?,
                n => {
                    warn!("Rule {} present {} times, recreating", rule.name, n);
                    self.remove(rule).await?;
                    self.create(rule).await?;
                }
            }
        }
        info!("Killswitch enabled");
        Ok(())
    }

    async fn disable(&self) -> Result<(), PlatformError> {
        info!("Disabling killswitch");
        for rule in &self.rules {
            self.remove(rule).await?;
        }
        info!("Killswitch disabled");
        Ok(())
    }

    async fn state(&self) -> Result<KillswitchState, PlatformError> {
        let mut present = 0;
        for rule in &self.rules {
            if self.count(rule).await? > 0 {
                present += 1;
            }
        }

        Ok(match present {
            0 => KillswitchState::Disabled,
            RULE_COUNT => KillswitchState::Enabled,
            present => KillswitchState::Partial { present },
        })
    }

    async fn count(&self, rule: &FirewallRule) -> Result<usize, PlatformError> {
        let output = self.powershell(rule.count_script()).await?;
        output
            .trim()
            .parse()
            .map_err(|_| PlatformError::CommandFailed {
                command: format!("count rule {}", rule.name),
                message: format!("unexpected rule count output: {:?}", output.trim()),
            })
    }

    async fn create(&self, rule: &FirewallRule) -> Result<(), PlatformError> {
        match self.powershell(rule.create_script()).await {
            Ok(_) => {
                debug!("Created rule {}", rule.name);
                Ok(())
            }
            Err(e) if e.mentions(DUPLICATE_RULE_MARKERS) => {
                debug!("Rule {} already exists", rule.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, rule: &FirewallRule) -> Result<(), PlatformError> {
        match self.powershell(rule.remove_script()).await {
            Ok(_) => {
                debug!("Removed rule {}", rule.name);
                Ok(())
            }
            Err(e) if e.mentions(MISSING_RULE_MARKERS) => {
                debug!("Rule {} not present", rule.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn powershell(&self, script: String) -> Result<String, PlatformError> {
        let shell = self
            .runner
            .locate(&self.shell)
            .ok_or_else(|| PlatformError::NotInstalled {
                program: self.shell.clone(),
            })?;
        let args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script,
        ];
        self.runner.run(&shell, &args).await
    }
}
