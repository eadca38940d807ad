//! Wire protocol between a course page and the exercise service iframes it embeds.
//! Keeping it in a dedicated crate lets both endpoints, and any binding
//! generator, share the exact message shapes without pulling in runtime code.
//!
//! Two disjoint families exist: [`MessageFromIframe`] (iframe → host) and
//! [`MessageToIframe`] (host → iframe). Both are discriminated by the `message`
//! field; `set-state` additionally carries a `view_type` tag.

use thiserror::Error;

mod guards;
mod messages;
mod state;

pub use guards::*;
pub use messages::*;
pub use state::*;

/// Untargeted beacon an iframe broadcasts until it receives a port.
pub const READY_BEACON: &str = "ready";
/// Data accompanying the transferred port.
pub const PORT_TRANSFER: &str = "communication-port";
/// Discriminator field shared by every message.
pub const DISCRIMINATOR: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message is not an object")]
    NotAnObject,
    #[error("message has no string `message` discriminator")]
    MissingDiscriminator,
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),
    #[error("{0} does not belong to this message family")]
    WrongFamily(MessageKind),
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: MessageKind, reason: String },
    #[error("failed to encode {kind} message: {reason}")]
    Encode { kind: MessageKind, reason: String },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// True when `value` is the bare readiness beacon.
pub fn is_ready_beacon(value: &serde_json::Value) -> bool {
    value.as_str() == Some(READY_BEACON)
}

/// True when `value` is the literal sent alongside a port transfer.
pub fn is_port_transfer(value: &serde_json::Value) -> bool {
    value.as_str() == Some(PORT_TRANSFER)
}
