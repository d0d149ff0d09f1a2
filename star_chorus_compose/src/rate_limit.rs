// Per-client fixed-window rate limiting.
//
// Each client key gets a counter that resets when its window expires. The
// caller passes `now` so tests can step time without sleeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client per window.
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            max_requests: 60,
            window_secs: 60,
        }
    }
}

#[derive(Debug)]
struct Window {
    count: u32,
    start: Instant,
}

/// Per-client windows plus the time expired ones were last swept.
#[derive(Debug, Default)]
struct Windows {
    by_client: HashMap<String, Window>,
    last_sweep: Option<Instant>,
}

impl Windows {
    fn sweep(&mut self, now: Instant, window_len: Duration) {
        self.by_client
            .retain(|_, w| now.saturating_duration_since(w.start) < window_len);
        self.last_sweep = Some(now);
    }
}

pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        FixedWindowLimiter {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    fn window_len(&self) -> Duration {
        Duration::from_secs(self.config.window_secs.max(1))
    }

    /// Record one request for `key`. Returns `Err(retry_after_secs)` when the
    /// client is over its limit for the current window.
    ///
    /// Expired windows of other clients are swept at most once per window
    /// length, so the map only holds clients seen in the last two windows.
    pub fn check(&self, key: &str, now: Instant) -> Result<(), u64> {
        if !self.config.enabled {
            return Ok(());
        }
        let window_len = self.window_len();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let last_sweep = windows.last_sweep;
        match last_sweep {
            Some(at) if now.saturating_duration_since(at) < window_len => {}
            Some(_) => windows.sweep(now, window_len),
            None => windows.last_sweep = Some(now),
        }

        let window = windows
            .by_client
            .entry(key.to_string())
            .or_insert(Window { count: 0, start: now });

        let elapsed = now.saturating_duration_since(window.start);
        if elapsed >= window_len {
            window.count = 0;
            window.start = now;
        }

        if window.count >= self.config.max_requests {
            let remaining = window_len.saturating_sub(now.saturating_duration_since(window.start));
            return Err(remaining.as_secs().max(1));
        }
        window.count += 1;
        Ok(())
    }

    /// Drop windows that expired before `now`.
    pub fn cleanup(&self, now: Instant) {
        let window_len = self.window_len();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.sweep(now, window_len);
    }

    /// Number of clients currently holding a window.
    pub fn tracked_clients(&self) -> usize {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.by_client.len()
    }
}
