//! Fixed-window rate limiting per operation kind

use super::OperationKind;

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Allows `max_requests` per `window` for each kind independently
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<OperationKind, Window>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    /// Count one request; on denial returns the time until the window resets
    pub fn try_acquire(&self, kind: OperationKind) -> Result<(), Duration> {
        let now = Instant::now();
        // The entry guard holds the shard lock until this call returns
        let mut window = self.windows.entry(kind).or_insert_with(|| Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count < self.max_requests {
            window.count += 1;
            Ok(())
        } else {
            Err((window.started + self.window).saturating_duration_since(now))
        }
    }
}
