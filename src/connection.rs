//! Push channel lifecycle
//!
//! `Connecting -> Connected -> Disconnected -> Connecting -> ...`
//!
//! The polling fallback only runs while the channel is not live.

use rand::Rng;
use std::time::Duration;

/// Push channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Exponential reconnect backoff with up to 25% added jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt. Grows until it hits `max`.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        let base = self.min.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_ms = (base.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        (base + Duration::from_millis(jitter)).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Owns the push channel state and the reconnect schedule
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    backoff: Backoff,
}

impl ConnectionStateMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Connecting,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while frames are flowing; gates the polling fallback.
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// An open attempt starts. Returns true if the state changed.
    pub fn begin_connect(&mut self) -> bool {
        self.transition(ConnectionState::Connecting)
    }

    /// A frame arrived. The first one after an open attempt makes the channel live.
    pub fn on_frame(&mut self) -> bool {
        if self.state == ConnectionState::Connected {
            return false;
        }
        self.backoff.reset();
        self.transition(ConnectionState::Connected)
    }

    /// Transport error or close. Returns the delay before the next open attempt.
    pub fn on_disconnect(&mut self) -> Duration {
        self.transition(ConnectionState::Disconnected);
        self.backoff.next_delay()
    }

    /// Manual reconnect: restart from `Connecting` with a fresh backoff.
    pub fn reconnect(&mut self) {
        self.backoff.reset();
        self.transition(ConnectionState::Connecting);
    }

    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }
        self.state = next;
        true
    }
}
