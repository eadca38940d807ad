use std::env;
use std::time::Duration;

const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Delay before the first repeated readiness beacon.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let initial_ms = lookup("FRAME_READY_INITIAL_BACKOFF_MS")
            .and_then(|val| val.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS);
        let max_ms = lookup("FRAME_READY_MAX_BACKOFF_MS")
            .and_then(|val| val.parse().ok())
            .unwrap_or(DEFAULT_MAX_BACKOFF_MS)
            .max(initial_ms);
        Self {
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}
