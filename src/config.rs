//! Configuration handling for tunnel-pilot
//!
//! Settings are read once at startup and handed to each component. Every
//! field has a default so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tunnel: TunnelSettings,
    pub platform: PlatformSettings,
    pub handshake: HandshakeSettings,
    pub public_ip: PublicIpSettings,
    pub killswitch: KillswitchSettings,
    pub settle: SettleSettings,
    /// Check the public IP after a successful connect or reconnect
    pub verify_public_ip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Directory holding the writable tunnel config
    pub config_dir: PathBuf,
    /// File names tried in order inside `config_dir`
    pub candidates: Vec<String>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            config_dir: app_dir().join("wireguard-config"),
            candidates: vec!["config.conf".to_string(), "config.wg".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformMode {
    /// Service-based on Windows, process-based elsewhere
    #[default]
    Auto,
    Service,
    Process,
}

impl PlatformMode {
    /// Resolve `Auto` against the running OS.
    pub fn resolve(self) -> PlatformMode {
        match self {
            PlatformMode::Auto if cfg!(windows) => PlatformMode::Service,
            PlatformMode::Auto => PlatformMode::Process,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub mode: PlatformMode,
    /// Tunnel service manager (service-based control)
    pub service_manager: String,
    /// Runtime status tool (service-based control)
    pub status_tool: String,
    /// Up/down tool (process-based control)
    pub quick_tool: String,
    /// Upper bound for any single external command
    pub command_timeout_ms: u64,
    /// Resolver cache flush command, run best-effort after reconnect
    pub dns_flush: Vec<String>,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        let dns_flush = if cfg!(windows) {
            vec!["ipconfig".to_string(), "/flushdns".to_string()]
        } else {
            vec!["resolvectl".to_string(), "flush-caches".to_string()]
        };

        Self {
            mode: PlatformMode::Auto,
            service_manager: r"C:\Program Files\WireGuard\wireguard.exe".to_string(),
            status_tool: r"C:\Program Files\WireGuard\wg.exe".to_string(),
            quick_tool: "wg-quick".to_string(),
            command_timeout_ms: 30_000,
            dns_flush,
        }
    }
}

impl PlatformSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 600,
            timeout_ms: 8_000,
        }
    }
}

impl HandshakeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicIpSettings {
    /// IP-echo endpoints, queried in order
    pub providers: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for PublicIpSettings {
    fn default() -> Self {
        Self {
            providers: vec![
                "https://api.ipify.org?format=json".to_string(),
                "https://ifconfig.me/ip".to_string(),
                "https://ipinfo.io/ip".to_string(),
            ],
            timeout_ms: 3_000,
        }
    }
}

impl PublicIpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KillswitchSettings {
    /// Shell used to reach the firewall cmdlets
    pub shell: String,
    pub allow_tunnel_rule: String,
    pub allow_endpoint_rule: String,
    pub block_all_rule: String,
    /// Interface alias pattern of the tunnel adapter
    pub interface_alias: String,
    /// UDP remote port allowed through. Not derived from the tunnel endpoint.
    pub endpoint_port: u16,
}

impl Default for KillswitchSettings {
    fn default() -> Self {
        Self {
            shell: "powershell".to_string(),
            allow_tunnel_rule: "TunnelPilot-Allow-Tunnel".to_string(),
            allow_endpoint_rule: "TunnelPilot-Allow-Endpoint".to_string(),
            block_all_rule: "TunnelPilot-Block-NonTunnel".to_string(),
            interface_alias: "WireGuard Tunnel*".to_string(),
            endpoint_port: 2408,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleSettings {
    pub after_connect_ms: u64,
    pub after_disconnect_ms: u64,
    /// Pause between the two halves of a reconnect
    pub reconnect_gap_ms: u64,
    pub after_reconnect_ms: u64,
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            after_connect_ms: 1_000,
            after_disconnect_ms: 600,
            reconnect_gap_ms: 900,
            after_reconnect_ms: 1_200,
        }
    }
}

impl SettleSettings {
    /// All windows zero
    pub fn none() -> Self {
        Self {
            after_connect_ms: 0,
            after_disconnect_ms: 0,
            reconnect_gap_ms: 0,
            after_reconnect_ms: 0,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = default_settings_path();
        if default_path.exists() {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Per-user application directory
fn app_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunnel-pilot")
}

/// Default location of the settings file
pub fn default_settings_path() -> PathBuf {
    app_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.handshake.poll_interval(), Duration::from_millis(600));
        assert_eq!(settings.handshake.timeout(), Duration::from_secs(8));
        assert_eq!(settings.public_ip.timeout(), Duration::from_secs(3));
        assert_eq!(settings.public_ip.providers.len(), 3);
        assert_eq!(settings.killswitch.endpoint_port, 2408);
        assert_eq!(settings.tunnel.candidates, vec!["config.conf", "config.wg"]);
        assert!(!settings.verify_public_ip);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            verify_public_ip = true

            [handshake]
            timeout_ms = 2000

            [platform]
            mode = "process"
            "#,
        )
        .unwrap();

        assert!(settings.verify_public_ip);
        assert_eq!(settings.handshake.timeout_ms, 2000);
        assert_eq!(settings.handshake.poll_interval_ms, 600);
        assert_eq!(settings.platform.mode, PlatformMode::Process);
        assert_eq!(settings.platform.quick_tool, "wg-quick");
    }

    #[test]
    fn test_mode_resolution() {
        assert_eq!(PlatformMode::Service.resolve(), PlatformMode::Service);
        assert_eq!(PlatformMode::Process.resolve(), PlatformMode::Process);
        assert_ne!(PlatformMode::Auto.resolve(), PlatformMode::Auto);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.killswitch.endpoint_port = 51820;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.killswitch.endpoint_port, 51820);
        assert_eq!(loaded.platform.mode, PlatformMode::Auto);
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[handshake\n").unwrap();

        let result = Settings::load(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let result = Settings::load_or_default(Some(Path::new("/nonexistent/tunnel-pilot.toml")));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
