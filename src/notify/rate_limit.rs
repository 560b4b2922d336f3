//! Fixed-window admission control for notification processing.
//!
//! Guards against bulk-import storms (e.g. an admin importing thousands of
//! bans at once) flooding every process in the fleet. A dropped
//! notification only delays enforcement on this process; the authoritative
//! row already exists, so nothing is lost.
//!
//! This is deliberately a blunt fixed-window counter rather than a token
//! bucket: bursts straddling a window boundary can admit up to twice the
//! per-window maximum, which is acceptable here.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counter exposing only `admit()`.
///
/// This is the one piece of state touched directly from the listener task
/// (before the hop onto the moderation actor, to decide whether to hop at
/// all), hence the explicit mutex.
#[derive(Debug)]
pub struct NotifyRateLimiter {
    window: Duration,
    max_admits: u32,
    state: Mutex<Window>,
}

impl NotifyRateLimiter {
    pub fn new(window: Duration, max_admits: u32) -> NotifyRateLimiter {
        NotifyRateLimiter {
            window,
            max_admits,
            state: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Admit or reject one notification.
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Admission decision at an explicit instant. Split out so the window
    /// arithmetic is testable without sleeping.
    pub fn admit_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 1;
            true
        } else {
            state.count += 1;
            state.count <= self.max_admits
        }
    }
}
