//! Public IP check with provider fallback
//!
//! Queries IP-echo services in order and returns the first valid IPv4
//! address. Used as connectivity evidence that does not depend on the
//! tunnel's own reporting. IPv6 answers are treated as unusable.

use crate::config::PublicIpSettings;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PublicIpError {
    #[error("Public IP check failed (DNS or firewall): {}", summarize(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },
    #[error("Public IP check cancelled")]
    Cancelled,
    #[error("HTTP client setup failed: {0}")]
    ClientError(#[from] reqwest::Error),
}

/// Why one provider did not produce an address
#[derive(Error, Debug)]
pub enum ProviderFailure {
    #[error("{provider}: timed out after {}ms", timeout.as_millis())]
    Timeout { provider: String, timeout: Duration },
    #[error("{provider}: {message}")]
    Http { provider: String, message: String },
    #[error("{provider}: HTTP {status}")]
    Status { provider: String, status: u16 },
    #[error("{provider}: unusable response {body:?}")]
    Invalid { provider: String, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpCheckResult {
    pub ip: String,
    /// Provider URL that answered
    pub source: String,
}

pub struct PublicIpVerifier {
    client: Client,
    providers: Vec<String>,
    timeout: Duration,
}

impl PublicIpVerifier {
    pub fn new(providers: Vec<String>, timeout: Duration) -> Result<Self, PublicIpError> {
        let client = Client::builder()
            .user_agent(concat!("tunnel-pilot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            providers,
            timeout,
        })
    }

    pub fn from_settings(settings: &PublicIpSettings) -> Result<Self, PublicIpError> {
        Self::new(settings.providers.clone(), settings.timeout())
    }

    pub async fn check(&self, cancel: &CancellationToken) -> Result<IpCheckResult, PublicIpError> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PublicIpError::Cancelled),
                attempt = self.query(provider) => attempt,
            };

            match attempt {
                Ok(ip) => {
                    info!("Public IP {} (via {})", ip, provider);
                    return Ok(IpCheckResult {
                        ip: ip.to_string(),
                        source: provider.clone(),
                    });
                }
                Err(failure) => {
                    warn!("IP provider failed: {}", failure);
                    failures.push(failure);
                }
            }
        }

        Err(PublicIpError::AllProvidersFailed { failures })
    }

    async fn query(&self, provider: &str) -> Result<Ipv4Addr, ProviderFailure> {
        debug!("Querying {}", provider);

        let response = self
            .client
            .get(provider)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderFailure::Status {
                provider: provider.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.classify(provider, e))?;
        parse_ip_response(&body).ok_or_else(|| ProviderFailure::Invalid {
            provider: provider.to_string(),
            body: body.trim().chars().take(64).collect(),
        })
    }

    fn classify(&self, provider: &str, error: reqwest::Error) -> ProviderFailure {
        if error.is_timeout() {
            ProviderFailure::Timeout {
                provider: provider.to_string(),
                timeout: self.timeout,
            }
        } else {
            ProviderFailure::Http {
                provider: provider.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// Extract an IPv4 address from a bare-text body or a JSON object with an
/// `ip` or `origin` field.
pub fn parse_ip_response(body: &str) -> Option<Ipv4Addr> {
    let body = body.trim();

    let candidate = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => ["ip", "origin"]
            .iter()
            .filter_map(|key| fields.get(*key).and_then(Value::as_str))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_string(),
        Ok(_) => String::new(),
        Err(_) => body.to_string(),
    };

    candidate.trim().parse().ok()
}

fn summarize(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
