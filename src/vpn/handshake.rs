//! Handshake confirmation
//!
//! After the tunnel is brought up we poll the status tool until it reports a
//! completed handshake or transfer counters. This is advisory: a missing
//! status tool, a failing query, or a timeout all just mean "no evidence".

use crate::config::HandshakeSettings;
use crate::platform::{CommandRunner, PlatformAdapter};
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct HandshakeMonitor {
    poll_interval: Duration,
    timeout: Duration,
}

impl HandshakeMonitor {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn from_settings(settings: &HandshakeSettings) -> Self {
        Self::new(settings.poll_interval(), settings.timeout())
    }

    /// Poll until a session marker shows up. Returns false on timeout,
    /// cancellation, or when the status tool is unavailable.
    pub async fn wait<R: CommandRunner>(
        &self,
        adapter: &PlatformAdapter<R>,
        cancel: &CancellationToken,
    ) -> bool {
        if !adapter.supports_query() {
            debug!("Status tool unavailable, skipping handshake check");
            return false;
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let query = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Handshake wait cancelled");
                    return false;
                }
                query = timeout_at(deadline, adapter.query()) => query,
            };

            match query {
                Ok(Ok(output)) if has_session_evidence(&output) => {
                    info!(
                        "Handshake confirmed after {} poll(s), {:?}",
                        polls,
                        started.elapsed()
                    );
                    return true;
                }
                Ok(Ok(_)) => debug!("No handshake yet (poll {})", polls),
                Ok(Err(e)) => debug!("Status query failed (poll {}): {}", polls, e),
                Err(_) => {
                    debug!("Status query still running at deadline (poll {})", polls);
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Handshake wait cancelled");
                    return false;
                }
                _ = sleep_until((now + self.poll_interval).min(deadline)) => {}
            }
        }

        warn!("No handshake within {:?}", self.timeout);
        false
    }
}

/// True when status output shows a live session: a latest-handshake line
/// that is not `(none)`, or transfer counters.
pub fn has_session_evidence(output: &str) -> bool {
    output.lines().any(|line| {
        let line = line.trim().to_ascii_lowercase();
        (line.starts_with("latest handshake:") && !line.contains("(none)"))
            || line.starts_with("transfer:")
    })
}
