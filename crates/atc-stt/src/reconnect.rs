//! Exponential backoff with a fatal escalation window (`spec.md` §4.4).
//!
//! Mirrors the shape of the teacher's `sonos::retry::with_retry` — a small
//! piece of state threaded through successive attempts — but stateful
//! across calls rather than a single bounded retry loop, since the STT
//! connection is long-lived and reconnect attempts are spread over time.

use std::time::{Duration, Instant};

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const FATAL_WINDOW: Duration = Duration::from_secs(5 * 60);
const COOLDOWN: Duration = Duration::from_secs(5 * 60);
const FATAL_FAILURE_COUNT: u32 = 5;

pub struct ReconnectState {
    backoff: Duration,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    last_failure: Option<Instant>,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self {
            backoff: BASE_BACKOFF,
            consecutive_failures: 0,
            window_start: None,
            last_failure: None,
        }
    }

    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }

    /// A successful message resets the backoff and failure counter.
    pub fn record_success(&mut self) {
        self.backoff = BASE_BACKOFF;
        self.consecutive_failures = 0;
        self.window_start = None;
    }

    /// Record a reconnectable failure. Returns the delay to sleep before
    /// the next reconnect attempt, or `Err` if 5 failures occurred within a
    /// 5-minute window (the caller should surface a fatal error).
    pub fn record_failure(&mut self) -> Result<Duration, u32> {
        let now = Instant::now();
        if let Some(last) = self.last_failure {
            if now.duration_since(last) > COOLDOWN {
                self.consecutive_failures = 0;
                self.window_start = None;
            }
        }
        self.last_failure = Some(now);
        let window_start = *self.window_start.get_or_insert(now);
        self.consecutive_failures += 1;

        if now.duration_since(window_start) <= FATAL_WINDOW
            && self.consecutive_failures >= FATAL_FAILURE_COUNT
        {
            return Err(self.consecutive_failures);
        }

        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        Ok(delay)
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap_and_resets_on_success() {
        let mut state = ReconnectState::new();
        assert_eq!(state.record_failure().unwrap(), Duration::from_secs(1));
        assert_eq!(state.record_failure().unwrap(), Duration::from_secs(2));
        assert_eq!(state.record_failure().unwrap(), Duration::from_secs(4));
        state.record_success();
        assert_eq!(state.current_backoff(), BASE_BACKOFF);
    }

    #[test]
    fn five_failures_within_window_escalate_to_fatal() {
        let mut state = ReconnectState::new();
        for _ in 0..4 {
            assert!(state.record_failure().is_ok());
        }
        assert_eq!(state.record_failure(), Err(5));
    }

    #[test]
    fn backoff_delay_returned_is_always_at_most_the_cap() {
        let mut state = ReconnectState::new();
        while let Ok(delay) = state.record_failure() {
            assert!(delay <= MAX_BACKOFF);
        }
    }
}
