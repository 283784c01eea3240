//! Per-IP rate limiting
//!
//! Fixed one-hour windows per client IP. The tracking map is bounded and
//! self-evicting: stale windows are purged whenever the map grows past
//! its cap, so a scan of many source addresses cannot grow it without
//! limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Tracked IPs before a purge of expired windows is forced.
const MAX_TRACKED: usize = 200_000;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request limiter keyed by client IP.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Limiter allowing `limit` requests per hour per IP.
    pub fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(3600))
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        RateLimiter {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `ip`; true when still within budget.
    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.len() > MAX_TRACKED {
            let window = self.window;
            entries.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = entries.entry(ip.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count += 1;
        entry.count <= self.limit
    }

    pub fn tracked(&self) -> usize {
        self.entries.lock().len()
    }
}
