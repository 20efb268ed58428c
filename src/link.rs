use std::time::Duration;

/// Lifecycle of a protocol connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Transport is up and writable; subscriptions are being re-established
    Resubscribing,
    Connected,
}

/// Exponential reconnect schedule: 1s, 2s, 4s, ... capped at `max`
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay to wait before the next attempt; zero right after a reset
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure and grow the delay
    pub(crate) fn fail(&mut self) {
        self.current = if self.current.is_zero() {
            self.initial
        } else {
            (self.current * 2).min(self.max)
        };
    }

    pub(crate) fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.current(), Duration::ZERO);

        let mut delays = Vec::new();
        for _ in 0..6 {
            backoff.fail();
            delays.push(backoff.current().as_secs());
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);

        backoff.reset();
        assert_eq!(backoff.current(), Duration::ZERO);
    }
}
