use std::time::Duration;

use crate::ClientConfig;

/// Delays between repeated readiness beacons: doubling from the initial
/// delay, then held at the cap. Never ends.
#[derive(Debug, Clone)]
pub struct ReadyBackoff {
    next: Duration,
    max: Duration,
}

impl ReadyBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff)
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.max);
        delay
    }
}

impl Iterator for ReadyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps_at_ten_seconds() {
        let delays: Vec<u64> = ReadyBackoff::from_config(&ClientConfig::default())
            .take(7)
            .map(|delay| delay.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn initial_above_cap_is_clamped() {
        let mut backoff = ReadyBackoff::new(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
