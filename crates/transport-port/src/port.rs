use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::{Payload, TransportError, TransportResult};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

fn next_port_id() -> PortId {
    PortId(NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Shared entanglement state of the two ports of one channel.
#[derive(Debug)]
struct Link {
    open: AtomicBool,
    closed: Notify,
}

impl Link {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) -> bool {
        if self.open.swap(false, Ordering::AcqRel) {
            self.closed.notify_waiters();
            true
        } else {
            false
        }
    }
}

/// A pair of entangled ports. Whatever is posted on one arrives on the other,
/// in send order.
#[derive(Debug)]
pub struct MessageChannel {
    pub port1: MessagePort,
    pub port2: MessagePort,
}

impl MessageChannel {
    pub fn new() -> Self {
        let link = Arc::new(Link {
            open: AtomicBool::new(true),
            closed: Notify::new(),
        });
        let (to_port1, port1_inbox) = mpsc::unbounded_channel();
        let (to_port2, port2_inbox) = mpsc::unbounded_channel();
        let id1 = next_port_id();
        let id2 = next_port_id();
        Self {
            port1: MessagePort::new(id1, id2, to_port2, port1_inbox, Arc::clone(&link)),
            port2: MessagePort::new(id2, id1, to_port1, port2_inbox, link),
        }
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One end of a [`MessageChannel`]. Cloning yields another handle to the same
/// end, the way a JS reference to a `MessagePort` would.
#[derive(Clone)]
pub struct MessagePort {
    inner: Arc<PortInner>,
}

struct PortInner {
    id: PortId,
    peer: PortId,
    outbound: mpsc::UnboundedSender<Payload>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Payload>>>,
    link: Arc<Link>,
}

impl MessagePort {
    fn new(
        id: PortId,
        peer: PortId,
        outbound: mpsc::UnboundedSender<Payload>,
        inbox: mpsc::UnboundedReceiver<Payload>,
        link: Arc<Link>,
    ) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id,
                peer,
                outbound,
                inbox: Mutex::new(Some(inbox)),
                link,
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.inner.id
    }

    pub fn peer(&self) -> PortId {
        self.inner.peer
    }

    pub fn is_entangled(&self) -> bool {
        self.inner.link.is_open()
    }

    /// Queues `data` for the entangled port. Messages wait in the peer's inbox
    /// until it is started.
    pub fn post_message(&self, data: Payload) -> TransportResult<()> {
        if !self.inner.link.is_open() {
            return Err(TransportError::PortClosed);
        }
        self.inner
            .outbound
            .send(data)
            .map_err(|_| TransportError::PortClosed)
    }

    /// Begins delivery of queued and future messages. Each port can be started once.
    pub fn start(&self) -> TransportResult<PortReceiver> {
        let rx = self
            .inner
            .inbox
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted(self.inner.id))?;
        Ok(PortReceiver {
            port: self.inner.id,
            rx,
            link: Arc::clone(&self.inner.link),
        })
    }

    /// Disentangles both ends. Pending receives on either side resolve to `None`.
    pub fn close(&self) {
        if self.inner.link.close() {
            trace!(target: "transport.port", port = %self.inner.id, peer = %self.inner.peer, "port closed");
        }
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("entangled", &self.inner.link.is_open())
            .finish()
    }
}

/// Inbound half of a started port.
#[derive(Debug)]
pub struct PortReceiver {
    port: PortId,
    rx: mpsc::UnboundedReceiver<Payload>,
    link: Arc<Link>,
}

impl PortReceiver {
    pub fn port(&self) -> PortId {
        self.port
    }

    /// Next message, or `None` once the channel was closed or the peer dropped.
    pub async fn recv(&mut self) -> Option<Payload> {
        let link = Arc::clone(&self.link);
        let closed = link.closed.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        if !link.is_open() {
            return None;
        }
        tokio::select! {
            biased;
            _ = closed => None,
            message = self.rx.recv() => message.filter(|_| link.is_open()),
        }
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        if !self.link.is_open() {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

/// Source of fresh channels. Missing support is reported, not panicked on.
pub trait ChannelFactory: Send + Sync {
    fn create_channel(&self) -> TransportResult<MessageChannel>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChannelFactory;

impl ChannelFactory for LocalChannelFactory {
    fn create_channel(&self) -> TransportResult<MessageChannel> {
        Ok(MessageChannel::new())
    }
}

/// Factory for contexts without a channel primitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedChannels;

impl ChannelFactory for UnsupportedChannels {
    fn create_channel(&self) -> TransportResult<MessageChannel> {
        Err(TransportError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn messages_queue_until_started_and_keep_order() {
        let channel = MessageChannel::new();
        channel.port1.post_message(json!({"n": 1})).expect("post 1");
        channel.port1.post_message(json!({"n": 2})).expect("post 2");

        let mut rx = channel.port2.start().expect("start");
        assert_eq!(rx.recv().await, Some(json!({"n": 1})));
        assert_eq!(rx.recv().await, Some(json!({"n": 2})));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn port_can_only_be_started_once() {
        let channel = MessageChannel::new();
        let _rx = channel.port2.start().expect("first start");
        assert_eq!(
            channel.port2.start().unwrap_err(),
            TransportError::AlreadyStarted(channel.port2.id())
        );
    }

    #[tokio::test]
    async fn close_wakes_pending_receivers_and_rejects_posts() {
        let channel = MessageChannel::new();
        let mut rx = channel.port2.start().expect("start");
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;

        channel.port1.close();
        let received = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("receiver woke")
            .expect("join");
        assert_eq!(received, None);
        assert_eq!(
            channel.port2.post_message(json!("late")),
            Err(TransportError::PortClosed)
        );
        assert!(!channel.port1.is_entangled());
    }

    #[test]
    fn unsupported_factory_reports_missing_capability() {
        assert_eq!(
            UnsupportedChannels.create_channel().unwrap_err(),
            TransportError::Unsupported
        );
        let channel = LocalChannelFactory.create_channel().expect("channel");
        assert_eq!(channel.port1.peer(), channel.port2.id());
    }
}
