//! Lobby countdown derived from the challenge's creation time
//!
//! Remaining time is always recomputed from `created_at` and the current
//! wall clock, so a client that was suspended catches up on the next tick
//! instead of drifting.

use crate::types::now_ms;
use std::sync::Arc;

/// Seconds left in the lobby.
///
/// `max(0, total - floor((now - created_at) / 1000))`. A `now` earlier than
/// `created_at` (clock skew) counts as zero elapsed time.
pub fn remaining(created_at_ms: i64, now_ms: i64, total_seconds: u64) -> u64 {
    let elapsed_ms = now_ms.saturating_sub(created_at_ms).max(0);
    let elapsed_secs = (elapsed_ms / 1000) as u64;
    total_seconds.saturating_sub(elapsed_secs)
}

/// Wall-clock source in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_ms()
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Countdown bound to a fixed start instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownClock {
    pub created_at_ms: i64,
    pub total_seconds: u64,
}

impl CountdownClock {
    pub fn new(created_at_ms: i64, total_seconds: u64) -> Self {
        Self {
            created_at_ms,
            total_seconds,
        }
    }

    pub fn remaining_at(&self, now_ms: i64) -> u64 {
        remaining(self.created_at_ms, now_ms, self.total_seconds)
    }

    pub fn is_elapsed_at(&self, now_ms: i64) -> bool {
        self.remaining_at(now_ms) == 0
    }
}
