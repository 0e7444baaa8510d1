use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

use crate::metrics::RATE_LIMIT_ENTRIES;

// Rate limit entry - tracks requests per client IP
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

/// Fixed window counter keyed by client IP.
///
/// The check and the increment run under the map's shard lock, so two
/// requests from the same IP never see a half-updated entry.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    limit: u32,      // max requests allowed per window
    window: Duration, // duration of one window
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn check(&self, ip: &str) -> bool {
        self.check_at(ip, Instant::now())
    }

    // Returns false once `ip` went over the limit inside the current window
    pub fn check_at(&self, ip: &str, now: Instant) -> bool {
        let mut entry = self
            .entries
            .entry(ip.to_string())
            .or_insert_with(|| {
                RATE_LIMIT_ENTRIES.inc();
                RateLimitEntry {
                    count: 0,
                    window_start: now,
                }
            });

        // window expired..? reset it
        if now.saturating_duration_since(entry.window_start) > self.window {
            entry.count = 1;
            entry.window_start = now;
            return true;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.limit
    }

    /// Drops entries whose window started more than two windows before `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let stale_after = self.window * 2;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) <= stale_after);
        RATE_LIMIT_ENTRIES.set(self.entries.len() as f64);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Sweeper - runs every `sweep_interval` for the life of the process
pub async fn sweeper(limiter: Arc<RateLimiter>, sweep_interval: Duration) {
    // interval() panics on a zero period
    let sweep_interval = sweep_interval.max(Duration::from_secs(1));
    let mut interval = interval(sweep_interval);

    tracing::info!(interval = ?sweep_interval, "rate limit sweeper started");

    loop {
        interval.tick().await;

        let removed = limiter.sweep_at(Instant::now());
        if removed > 0 {
            tracing::debug!(removed, remaining = limiter.len(), "swept stale rate limit entries");
        }
    }
}
