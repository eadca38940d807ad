use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

use crate::{MessagePort, Payload, TransportError, TransportResult};

/// Origin reported by a context sandboxed without `allow-same-origin`.
pub const OPAQUE_ORIGIN: &str = "null";
/// Target origin accepted by every receiver.
pub const WILDCARD_TARGET: &str = "*";

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// A window-level `message` event as seen by a listener.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Payload,
    pub origin: String,
    pub source: Option<WindowId>,
    pub ports: Vec<MessagePort>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedLink {
    pub url: String,
    pub target: String,
    pub features: String,
}

/// A browsing context. Cloning shares the same context.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    id: WindowId,
    origin: String,
    listeners: RwLock<HashMap<u64, mpsc::UnboundedSender<MessageEvent>>>,
    next_listener: AtomicU64,
    closed: AtomicBool,
    opened: Mutex<Vec<OpenedLink>>,
}

impl Window {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed)),
                origin: origin.into(),
                listeners: RwLock::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                opened: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A context with an opaque origin, like a sandboxed iframe document.
    pub fn opaque() -> Self {
        Self::new(OPAQUE_ORIGIN)
    }

    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Registers a `message` listener. The listener stays attached until the
    /// guard is dropped.
    pub fn add_listener(&self) -> (ListenerGuard, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().insert(id, tx);
        (
            ListenerGuard {
                window: Arc::downgrade(&self.inner),
                window_id: self.inner.id,
                id,
            },
            EventStream { rx },
        )
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Dispatches `data` to this window's listeners as if posted by `source`.
    /// A `target_origin` that is neither `*` nor this window's origin drops the
    /// message without error.
    pub fn post_message(
        &self,
        data: Payload,
        target_origin: &str,
        source: &Window,
        transfer: Vec<MessagePort>,
    ) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::WindowClosed(self.inner.id));
        }
        if target_origin != WILDCARD_TARGET && target_origin != self.inner.origin {
            trace!(
                target: "transport.window",
                window = %self.inner.id,
                target_origin,
                origin = %self.inner.origin,
                "target origin mismatch; message dropped"
            );
            return Ok(());
        }

        let event = MessageEvent {
            data,
            origin: source.origin().to_string(),
            source: Some(source.id()),
            ports: transfer,
        };
        let listeners = self.inner.listeners.read();
        for sender in listeners.values() {
            let _ = sender.send(event.clone());
        }
        Ok(())
    }

    /// Stand-in for `window.open`; the request is recorded.
    pub fn open(&self, url: &str, target: &str, features: &str) {
        self.inner.opened.lock().push(OpenedLink {
            url: url.to_string(),
            target: target.to_string(),
            features: features.to_string(),
        });
    }

    pub fn opened_links(&self) -> Vec<OpenedLink> {
        self.inner.opened.lock().clone()
    }

    /// Tears the context down: listeners are dropped and further posts fail.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.listeners.write().clear();
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Window {}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener attached. Dropping it detaches synchronously.
#[derive(Debug)]
pub struct ListenerGuard {
    window: Weak<WindowInner>,
    window_id: WindowId,
    id: u64,
}

impl ListenerGuard {
    pub fn window_id(&self) -> WindowId {
        self.window_id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(window) = self.window.upgrade() {
            window.listeners.write().remove(&self.id);
        }
    }
}

/// Events delivered to one listener.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<MessageEvent>,
}

impl EventStream {
    /// Next event, or `None` once the listener was detached and drained.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageChannel;
    use serde_json::json;

    #[tokio::test]
    async fn events_carry_source_origin_and_ports() {
        let parent = Window::new("https://courses.example");
        let frame = Window::opaque();
        let (_guard, mut events) = parent.add_listener();

        let channel = MessageChannel::new();
        let port_id = channel.port2.id();
        parent
            .post_message(json!("ready"), WILDCARD_TARGET, &frame, vec![channel.port2])
            .expect("post");

        let event = events.recv().await.expect("event");
        assert_eq!(event.data, json!("ready"));
        assert_eq!(event.origin, OPAQUE_ORIGIN);
        assert_eq!(event.source, Some(frame.id()));
        assert_eq!(event.ports.len(), 1);
        assert_eq!(event.ports[0].id(), port_id);
    }

    #[tokio::test]
    async fn mismatched_target_origin_is_dropped_silently() {
        let parent = Window::new("https://courses.example");
        let frame = Window::opaque();
        let (_guard, mut events) = parent.add_listener();

        parent
            .post_message(json!("ready"), "https://elsewhere.example", &frame, Vec::new())
            .expect("dropped without error");
        parent
            .post_message(json!("second"), "https://courses.example", &frame, Vec::new())
            .expect("post");

        assert_eq!(events.recv().await.expect("event").data, json!("second"));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropping_guard_detaches_listener() {
        let window = Window::opaque();
        let (guard, mut events) = window.add_listener();
        assert_eq!(window.listener_count(), 1);

        drop(guard);
        assert_eq!(window.listener_count(), 0);
        window
            .post_message(json!("ignored"), WILDCARD_TARGET, &window, Vec::new())
            .expect("post");
        assert!(events.recv().await.is_none());
    }

    #[test]
    fn closed_window_rejects_posts() {
        let window = Window::opaque();
        let other = Window::opaque();
        window.close();
        assert_eq!(
            window.post_message(json!("x"), WILDCARD_TARGET, &other, Vec::new()),
            Err(TransportError::WindowClosed(window.id()))
        );
    }
}
