//! Fixed-window rate limiting per client key.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ForgeError;
use forgeconf::LimitsConfig;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Admits at most `limit` calls per client per window. Excess calls are
/// rejected, never queued.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clients: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: DashMap::new(),
        }
    }

    pub fn from_config(config: &LimitsConfig) -> Self {
        Self::new(config.requests_per_window, config.window())
    }

    /// Count one call for `client`.
    pub fn check(&self, client: &str) -> Result<(), ForgeError> {
        let now = Instant::now();
        let mut entry = self.clients.entry(client.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        if entry.count >= self.limit {
            let retry_after = entry.reset_at.saturating_duration_since(now);
            tracing::warn!(client, limit = self.limit, "Rate limit exceeded");
            return Err(ForgeError::RateLimited {
                client: client.to_string(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Forget windows that have already expired.
    pub fn prune(&self) {
        let now = Instant::now();
        self.clients.retain(|_, w| w.reset_at > now);
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
