//! Iframe side of the exercise protocol.
//!
//! [`ClientEndpoint::mount`] announces readiness to the parent page, retries on
//! a capped exponential backoff until a port arrives, then exchanges messages
//! over that port only.

use exercise_proto::ProtocolError;
use thiserror::Error;
use transport_port::TransportError;

mod backoff;
mod config;
mod endpoint;

pub use backoff::ReadyBackoff;
pub use config::ClientConfig;
pub use endpoint::{ClientEndpoint, ParentMessageHandler};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("no communication port received yet")]
    NotConnected,
    #[error("client endpoint was unmounted")]
    Unmounted,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type ClientResult<T> = Result<T, ClientError>;
