//! In-process model of the browser messaging primitives exercise iframes rely on:
//! browsing-context windows with `postMessage`, and entangled message ports that
//! move between contexts through a transfer list.
//!
//! Payloads are JSON values and every post clones them, so no context ever holds
//! a reference into another one.

use thiserror::Error;

mod port;
mod window;

pub use port::{
    ChannelFactory, LocalChannelFactory, MessageChannel, MessagePort, PortId, PortReceiver,
    UnsupportedChannels,
};
pub use window::{
    EventStream, ListenerGuard, MessageEvent, OpenedLink, Window, WindowId, OPAQUE_ORIGIN,
    WILDCARD_TARGET,
};

/// Structured-clone stand-in: everything crossing a context boundary is a JSON value.
pub type Payload = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("message port is closed")]
    PortClosed,
    #[error("{0} was already started")]
    AlreadyStarted(PortId),
    #[error("{0} is closed")]
    WindowClosed(WindowId),
    #[error("message channels are not available in this context")]
    Unsupported,
}

pub type TransportResult<T> = Result<T, TransportError>;
