//! Fixed-window per-client request rate limiting (C5).
use std::sync::Mutex;
use std::time::Instant;

use crate::constants::RATE_LIMIT_WINDOW;

struct Window {
    started_at: Instant,
    count: u32,
}

/// Limits the number of requests a single client connection may issue per
/// rolling fixed window.
pub struct RateLimiter {
    max_per_window: u32,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// Builds a limiter allowing `max_per_window` requests per
    /// `RATE_LIMIT_WINDOW`.
    pub fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            window: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Records a request attempt, returning `true` if it is allowed under
    /// the current window and `false` if the caller should be rejected.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        if window.started_at.elapsed() >= RATE_LIMIT_WINDOW {
            window.started_at = Instant::now();
            window.count = 0;
        }
        if window.count >= self.max_per_window {
            return false;
        }
        window.count += 1;
        true
    }

    /// Zeroes the current count and restarts the window, discarding any
    /// in-progress accounting.
    pub fn reset(&self) {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        window.started_at = Instant::now();
        window.count = 0;
    }
}
