//! Persisted tunnel configuration
//!
//! The config file is re-read at the start of every operation that needs it,
//! since the endpoint editor may rewrite it between calls.

use super::endpoint;
use crate::config::TunnelSettings;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelConfigError {
    #[error("WireGuard config not found. Put \"config.conf\" here: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Malformed config {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("Invalid endpoint {0:?}: expected host:port")]
    InvalidEndpoint(String),
    #[error("Config file I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    path: PathBuf,
    name: String,
    endpoint: String,
}

impl TunnelConfig {
    /// First existing candidate file inside the configured directory
    pub fn locate(settings: &TunnelSettings) -> Result<PathBuf, TunnelConfigError> {
        settings
            .candidates
            .iter()
            .map(|candidate| settings.config_dir.join(candidate))
            .find(|path| path.is_file())
            .ok_or_else(|| TunnelConfigError::NotFound(settings.config_dir.clone()))
    }

    pub fn load(path: &Path) -> Result<Self, TunnelConfigError> {
        let content = read_config(path)?;
        Self::from_content(path, &content)
    }

    pub fn from_content(path: &Path, content: &str) -> Result<Self, TunnelConfigError> {
        let endpoint = endpoint::find_endpoint(content).ok_or_else(|| {
            TunnelConfigError::Malformed {
                path: path.to_path_buf(),
                reason: "Endpoint= not found".to_string(),
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            name: tunnel_name(path),
            endpoint: endpoint.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Service name of the tunnel, derived from the file name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// File name without a `.conf`/`.wg` extension (case-insensitive)
pub fn tunnel_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let lower = file_name.to_ascii_lowercase();
    for extension in [".conf", ".wg"] {
        if lower.ends_with(extension) {
            return file_name[..file_name.len() - extension.len()].to_string();
        }
    }
    file_name
}

pub(crate) fn read_config(path: &Path) -> Result<String, TunnelConfigError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TunnelConfigError::NotFound(path.to_path_buf()),
        _ => TunnelConfigError::Io(e),
    })
}
