//! Parent-page side of the exercise iframe protocol.
//!
//! A [`HostEndpoint`] owns one iframe instance: it answers the iframe's
//! readiness beacon with a transferred [`transport_port::MessagePort`], forwards
//! state through a [`StateReconciler`], dispatches inbound messages and re-runs
//! the handshake when a transferred port is presumed lost.

use std::fmt;

use thiserror::Error;

mod config;
mod endpoint;
mod handler;
mod iframe;
mod reconciler;

pub use config::HostConfig;
pub use endpoint::HostEndpoint;
pub use handler::IframeMessageHandler;
pub use iframe::{IframeElement, SANDBOX_POLICY};
pub use reconciler::StateReconciler;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("iframe has no target url")]
    MissingUrl,
    #[error("host endpoint was detached")]
    Detached,
}

pub type HostResult<T> = Result<T, HostError>;

/// Handshake progress of one iframe instance, as the embedding page sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No channel primitive in this context; the endpoint stays inert.
    Unavailable,
    AwaitingReady,
    /// A port was handed over; `attempt` is 1 for the initial transfer.
    PortTransferred { attempt: u32 },
    /// The iframe has sent at least one valid message over the current port.
    Established { attempt: u32 },
    /// Recovery budget exhausted. Only a new url clears this.
    Failed { recoveries: u32 },
}

impl ConnectionStatus {
    pub fn is_failed(self) -> bool {
        matches!(self, ConnectionStatus::Failed { .. })
    }

    /// User-facing notice for the affected exercise, if any.
    pub fn banner(self) -> Option<&'static str> {
        match self {
            ConnectionStatus::Failed { .. } => Some(
                "Could not establish a connection to the exercise. Reload the page to try again.",
            ),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Unavailable => f.write_str("unavailable"),
            ConnectionStatus::AwaitingReady => f.write_str("awaiting-ready"),
            ConnectionStatus::PortTransferred { attempt } => {
                write!(f, "port-transferred(attempt {attempt})")
            }
            ConnectionStatus::Established { attempt } => write!(f, "established(attempt {attempt})"),
            ConnectionStatus::Failed { recoveries } => {
                write!(f, "failed(after {recoveries} recoveries)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failure_shows_a_banner() {
        assert!(ConnectionStatus::Failed { recoveries: 3 }.banner().is_some());
        assert!(ConnectionStatus::Failed { recoveries: 3 }.is_failed());
        for status in [
            ConnectionStatus::Unavailable,
            ConnectionStatus::AwaitingReady,
            ConnectionStatus::PortTransferred { attempt: 2 },
            ConnectionStatus::Established { attempt: 1 },
        ] {
            assert_eq!(status.banner(), None, "{status}");
        }
    }
}
