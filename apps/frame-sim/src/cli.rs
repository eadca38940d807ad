use std::time::Duration;

use clap::{builder::BoolishValueParser, Args, Parser, ValueEnum};
use frame_client::ClientConfig;
use frame_host::HostConfig;

use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "frame-sim",
    about = "Drive a course page and an exercise iframe through the port handshake",
    version
)]
pub struct Cli {
    #[arg(
        long = "log-level",
        value_enum,
        env = "FRAME_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub log_level: LogLevel,

    #[arg(long, value_enum, default_value_t = Scenario::Connect)]
    pub scenario: Scenario,

    #[arg(long, default_value = "https://courses.example")]
    pub host_origin: String,

    #[arg(long, default_value = "https://service.example/iframe")]
    pub iframe_url: String,

    #[command(flatten)]
    pub host: HostArgs,

    #[command(flatten)]
    pub client: ClientArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum Scenario {
    /// Handshake, one state update and a few replies.
    Connect,
    /// The iframe reloads once without telling the host.
    SilentReload,
    /// The iframe keeps reloading until the host gives up.
    ReloadLoop,
}

/// Flags take precedence over the `FRAME_*` variables read by [`HostConfig::from_env`].
#[derive(Args, Debug, Clone, Default)]
pub struct HostArgs {
    #[arg(long, value_name = "MS", help = "Beacon gap that counts as a lost port")]
    pub recovery_threshold_ms: Option<u64>,

    #[arg(long, value_name = "N")]
    pub max_recovery_attempts: Option<u32>,

    #[arg(
        long,
        value_parser = BoolishValueParser::new(),
        help = "Skip the sandbox attribute and the origin check"
    )]
    pub disable_sandbox: Option<bool>,

    #[arg(long)]
    pub language: Option<String>,
}

impl HostArgs {
    pub fn apply(&self, mut config: HostConfig) -> HostConfig {
        if let Some(ms) = self.recovery_threshold_ms {
            config.recovery_threshold = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_recovery_attempts {
            config.max_recovery_attempts = attempts;
        }
        if let Some(disable) = self.disable_sandbox {
            config.disable_sandbox = disable;
        }
        if let Some(language) = self.language.as_ref().filter(|l| !l.trim().is_empty()) {
            config.language = language.clone();
        }
        config
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ClientArgs {
    #[arg(long, value_name = "MS")]
    pub initial_backoff_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    pub max_backoff_ms: Option<u64>,
}

impl ClientArgs {
    pub fn apply(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(ms) = self.initial_backoff_ms.filter(|ms| *ms > 0) {
            config.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_backoff_ms {
            config.max_backoff = Duration::from_millis(ms);
        }
        config.max_backoff = config.max_backoff.max(config.initial_backoff);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_host_config() {
        let cli = Cli::parse_from([
            "frame-sim",
            "--recovery-threshold-ms",
            "250",
            "--disable-sandbox",
            "yes",
            "--language",
            "fi",
        ]);
        let config = cli.host.apply(HostConfig::default());
        assert_eq!(config.recovery_threshold, Duration::from_millis(250));
        assert!(config.disable_sandbox);
        assert_eq!(config.language, "fi");
        assert_eq!(config.max_recovery_attempts, 3);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::parse_from(["frame-sim", "--scenario", "reload-loop"]);
        assert_eq!(cli.scenario, Scenario::ReloadLoop);
        assert_eq!(cli.host.apply(HostConfig::default()), HostConfig::default());
        assert_eq!(
            cli.client.apply(ClientConfig::default()),
            ClientConfig::default()
        );
    }

    #[test]
    fn client_cap_follows_initial_delay() {
        let args = ClientArgs {
            initial_backoff_ms: Some(4_000),
            max_backoff_ms: Some(1_000),
        };
        let config = args.apply(ClientConfig::default());
        assert_eq!(config.max_backoff, Duration::from_millis(4_000));
    }
}
