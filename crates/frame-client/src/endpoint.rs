use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use exercise_proto::{
    decode_to_iframe_lenient, is_port_transfer, CurrentStateMessage, HeightChangedMessage,
    MessageFromIframe, OpenLinkMessage, ToIframe, READY_BEACON,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, Sleep};
use tracing::{debug, error, info, trace, warn};
use transport_port::{
    EventStream, ListenerGuard, MessageEvent, MessagePort, Payload, PortReceiver, Window,
    WILDCARD_TARGET,
};

use crate::{ClientConfig, ClientError, ClientResult, ReadyBackoff};

/// Receives host → iframe messages once a port is connected.
pub trait ParentMessageHandler: Send + 'static {
    fn on_message(&mut self, message: ToIframe, port: &MessagePort) -> anyhow::Result<()>;
}

impl<F> ParentMessageHandler for F
where
    F: FnMut(ToIframe, &MessagePort) -> anyhow::Result<()> + Send + 'static,
{
    fn on_message(&mut self, message: ToIframe, port: &MessagePort) -> anyhow::Result<()> {
        self(message, port)
    }
}

impl ParentMessageHandler for tokio::sync::mpsc::UnboundedSender<ToIframe> {
    fn on_message(&mut self, message: ToIframe, _port: &MessagePort) -> anyhow::Result<()> {
        self.send(message)
            .map_err(|_| anyhow::anyhow!("consumer dropped"))
    }
}

/// The exercise document's side of the connection.
pub struct ClientEndpoint {
    window: Window,
    port: watch::Receiver<Option<MessagePort>>,
    listener: Option<ListenerGuard>,
    alive: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ClientEndpoint {
    /// Registers the message listener on `window`, sends the first readiness
    /// beacon to `parent` and starts the retry timer. Needs a tokio runtime.
    pub fn mount<H>(window: Window, parent: Window, config: ClientConfig, handler: H) -> Self
    where
        H: ParentMessageHandler,
    {
        let (listener, events) = window.add_listener();
        let (port_tx, port) = watch::channel(None);
        let alive = Arc::new(AtomicBool::new(true));

        let mut backoff = ReadyBackoff::from_config(&config);
        let first_delay = backoff.next_delay();
        let client = ClientLoop {
            window: window.clone(),
            parent,
            handler,
            alive: Arc::clone(&alive),
            backoff,
            beacons: 0,
            retry: Some(Box::pin(sleep(first_delay))),
            port: port_tx,
            inbound: None,
        };
        client.announce();
        debug!(
            target: "frame.client",
            window = %window.id(),
            parent = %client.parent.id(),
            "client endpoint mounted"
        );
        let task = tokio::spawn(client.run(events));

        Self {
            window,
            port,
            listener: Some(listener),
            alive,
            task: Some(task),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn is_connected(&self) -> bool {
        self.port.borrow().is_some()
    }

    pub fn port(&self) -> Option<MessagePort> {
        self.port.borrow().clone()
    }

    /// Resolves once the host's port has been accepted.
    pub async fn wait_connected(&self) -> ClientResult<MessagePort> {
        let mut port = self.port.clone();
        let connected = port
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ClientError::Unmounted)?;
        connected.clone().ok_or(ClientError::NotConnected)
    }

    pub fn send(&self, message: &MessageFromIframe) -> ClientResult<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(ClientError::Unmounted);
        }
        let port = self.port().ok_or(ClientError::NotConnected)?;
        port.post_message(message.to_value()?)?;
        trace!(target: "frame.client", kind = %message.kind(), "message sent");
        Ok(())
    }

    pub fn report_height(&self, height_px: f64) -> ClientResult<()> {
        self.send(&MessageFromIframe::HeightChanged(HeightChangedMessage {
            data: height_px,
        }))
    }

    pub fn open_link(&self, url: impl Into<String>) -> ClientResult<()> {
        self.send(&MessageFromIframe::OpenLink(OpenLinkMessage { data: url.into() }))
    }

    pub fn send_current_state(&self, data: Value, valid: bool) -> ClientResult<()> {
        self.send(&MessageFromIframe::CurrentState(CurrentStateMessage {
            data,
            valid,
        }))
    }

    pub fn request_repository_exercises(&self) -> ClientResult<()> {
        self.send(&MessageFromIframe::RequestRepositoryExercises)
    }

    /// Detaches the listener and cancels the retry timer. The host is not told.
    pub fn unmount(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Release);
        if self.listener.take().is_some() {
            debug!(target: "frame.client", window = %self.window.id(), "client endpoint unmounted");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ClientEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ClientLoop<H> {
    window: Window,
    parent: Window,
    handler: H,
    alive: Arc<AtomicBool>,
    backoff: ReadyBackoff,
    beacons: u32,
    /// Pending beacon retry; `None` once connected.
    retry: Option<Pin<Box<Sleep>>>,
    port: watch::Sender<Option<MessagePort>>,
    inbound: Option<PortReceiver>,
}

impl<H: ParentMessageHandler> ClientLoop<H> {
    async fn run(mut self, mut events: EventStream) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = retry_elapsed(&mut self.retry) => self.retry_beacon(),
                message = next_inbound(&mut self.inbound) => self.handle_inbound(message),
            }
        }
        trace!(target: "frame.client", "client loop stopped");
    }

    /// Readiness goes to every origin: a sandboxed document cannot name its parent's.
    fn announce(&self) {
        let result = self.parent.post_message(
            Value::from(READY_BEACON),
            WILDCARD_TARGET,
            &self.window,
            Vec::new(),
        );
        if let Err(err) = result {
            warn!(target: "frame.client", error = %err, "readiness beacon not delivered");
        }
    }

    fn retry_beacon(&mut self) {
        self.beacons += 1;
        self.announce();
        let delay = self.backoff.next_delay();
        debug!(
            target: "frame.client",
            beacons = self.beacons,
            next_in_ms = delay.as_millis() as u64,
            "no port yet; readiness repeated"
        );
        if let Some(retry) = self.retry.as_mut() {
            retry.as_mut().reset(Instant::now() + delay);
        }
    }

    fn handle_event(&mut self, event: MessageEvent) {
        if event.source != Some(self.parent.id()) {
            trace!(target: "frame.client", source = ?event.source, "message from non-parent window ignored");
            return;
        }
        if !is_port_transfer(&event.data) {
            trace!(target: "frame.client", "unrelated window message ignored");
            return;
        }
        if self.port.borrow().is_some() {
            debug!(target: "frame.client", "already connected; later port transfer ignored");
            return;
        }
        let Some(port) = event.ports.into_iter().next() else {
            warn!(target: "frame.client", "port transfer without a port");
            return;
        };
        let inbound = match port.start() {
            Ok(inbound) => inbound,
            Err(err) => {
                error!(target: "frame.client", error = %err, "cannot start transferred port");
                return;
            }
        };

        self.retry = None;
        info!(
            target: "frame.client",
            port = %port.id(),
            beacons = self.beacons + 1,
            "communication port received"
        );
        self.inbound = Some(inbound);
        self.port.send_replace(Some(port));
    }

    fn handle_inbound(&mut self, message: Option<Payload>) {
        let Some(data) = message else {
            debug!(target: "frame.client", "communication port closed by host");
            self.inbound = None;
            return;
        };
        let message = match decode_to_iframe_lenient(&data) {
            Ok(message) => message,
            Err(err) => {
                warn!(target: "frame.client", error = %err, "dropping unsupported message from host");
                return;
            }
        };
        if !self.alive.load(Ordering::Acquire) {
            return;
        }
        let Some(port) = self.port.borrow().clone() else {
            return;
        };
        let handler = &mut self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(message, &port))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(target: "frame.client", error = %err, "host message handler failed");
            }
            Err(payload) => {
                error!(
                    target: "frame.client",
                    panic = panic_message(payload.as_ref()),
                    "host message handler panicked"
                );
            }
        }
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(inbound: &mut Option<PortReceiver>) -> Option<Payload> {
    match inbound {
        Some(inbound) => inbound.recv().await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
