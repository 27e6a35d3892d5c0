//! Fixed-window rate limiter.
//!
//! Injected into the dispatcher as a collaborator so throttling can be
//! reasoned about and tested apart from dispatch logic. One counter per
//! window; the window resets when its duration has fully elapsed.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Fixed-window counter limiter.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<Window>,
}

struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

impl RateLimiter {
    /// Allow up to `max_per_window` acquisitions per `window`.
    pub fn new(max_per_window: u32, window: std::time::Duration) -> Self {
        Self {
            max_per_window,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
            state: Mutex::new(Window {
                started_at: Utc::now(),
                count: 0,
            }),
        }
    }

    /// Per-minute convenience constructor.
    pub fn per_minute(max: u32) -> Self {
        Self::new(max, std::time::Duration::from_secs(60))
    }

    /// A limiter that never denies.
    pub fn unlimited() -> Self {
        Self::per_minute(u32::MAX)
    }

    /// Try to take one send slot at the current time.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    /// Deterministic variant used by the dispatcher and tests.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap();
        if now - state.started_at >= self.window {
            state.started_at = now;
            state.count = 0;
        }
        if state.count >= self.max_per_window {
            return false;
        }
        state.count += 1;
        true
    }
}
