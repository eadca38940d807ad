use std::env;
use std::time::Duration;

const DEFAULT_RECOVERY_THRESHOLD_MS: u64 = 5_000;
const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;
const DEFAULT_LANGUAGE: &str = "en";

/// Host endpoint tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// A readiness beacon arriving later than this after a transfer means the
    /// transfer was lost.
    pub recovery_threshold: Duration,
    /// Re-handshakes allowed per url before giving up.
    pub max_recovery_attempts: u32,
    /// Skips the sandbox attribute and the origin check.
    pub disable_sandbox: bool,
    /// Sent as `set-language` on every new channel.
    pub language: String,
}

impl HostConfig {
    /// Load configuration from `FRAME_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let recovery_threshold_ms = lookup("FRAME_RECOVERY_THRESHOLD_MS")
            .and_then(|val| val.parse().ok())
            .unwrap_or(DEFAULT_RECOVERY_THRESHOLD_MS);
        let max_recovery_attempts = lookup("FRAME_MAX_RECOVERY_ATTEMPTS")
            .and_then(|val| val.parse().ok())
            .unwrap_or(DEFAULT_MAX_RECOVERY_ATTEMPTS);
        let disable_sandbox = lookup("FRAME_DISABLE_SANDBOX")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let language = lookup("FRAME_LANGUAGE")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        Self {
            recovery_threshold: Duration::from_millis(recovery_threshold_ms),
            max_recovery_attempts,
            disable_sandbox,
            language,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            recovery_threshold: Duration::from_millis(DEFAULT_RECOVERY_THRESHOLD_MS),
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            disable_sandbox: false,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(HostConfig::from_lookup(lookup(&[])), HostConfig::default());
        let config = HostConfig::default();
        assert_eq!(config.recovery_threshold, Duration::from_millis(5_000));
        assert_eq!(config.max_recovery_attempts, 3);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = HostConfig::from_lookup(lookup(&[
            ("FRAME_RECOVERY_THRESHOLD_MS", "2500"),
            ("FRAME_MAX_RECOVERY_ATTEMPTS", "5"),
            ("FRAME_DISABLE_SANDBOX", "TRUE"),
            ("FRAME_LANGUAGE", "fi"),
        ]));
        assert_eq!(config.recovery_threshold, Duration::from_millis(2_500));
        assert_eq!(config.max_recovery_attempts, 5);
        assert!(config.disable_sandbox);
        assert_eq!(config.language, "fi");
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = HostConfig::from_lookup(lookup(&[
            ("FRAME_RECOVERY_THRESHOLD_MS", "soon"),
            ("FRAME_MAX_RECOVERY_ATTEMPTS", "-1"),
            ("FRAME_DISABLE_SANDBOX", "yes please"),
            ("FRAME_LANGUAGE", "  "),
        ]));
        assert_eq!(config, HostConfig::default());
    }
}
