use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use exercise_proto::{
    is_ready_beacon, IframeState, MessageFromIframe, MessageToIframe, PORT_TRANSFER,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use transport_port::{
    ChannelFactory, EventStream, ListenerGuard, LocalChannelFactory, MessageChannel, MessageEvent,
    MessagePort, Payload, PortReceiver, Window, OPAQUE_ORIGIN, WILDCARD_TARGET,
};
use url::Url;
use uuid::Uuid;

use crate::{
    ConnectionStatus, HostConfig, HostError, HostResult, IframeElement, IframeMessageHandler,
    StateReconciler, SANDBOX_POLICY,
};

enum Command {
    Post(IframeState),
    SetLanguage(String),
    Send(MessageToIframe),
    Navigate,
}

/// Handle to the task driving one iframe instance.
///
/// Dropping the handle (or calling [`detach`](HostEndpoint::detach)) removes
/// the window listener before returning; no handler runs afterwards.
pub struct HostEndpoint {
    iframe: IframeElement,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    listener: Option<ListenerGuard>,
    alive: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl HostEndpoint {
    /// Starts listening for the iframe's readiness beacon on `host_window`.
    /// Must be called from within a tokio runtime.
    pub fn attach<H>(
        host_window: Window,
        iframe: IframeElement,
        config: HostConfig,
        handler: H,
    ) -> HostResult<Self>
    where
        H: IframeMessageHandler,
    {
        Self::attach_with_channels(
            host_window,
            iframe,
            config,
            Arc::new(LocalChannelFactory),
            handler,
        )
    }

    pub fn attach_with_channels<H>(
        host_window: Window,
        iframe: IframeElement,
        config: HostConfig,
        channels: Arc<dyn ChannelFactory>,
        handler: H,
    ) -> HostResult<Self>
    where
        H: IframeMessageHandler,
    {
        if iframe.src().trim().is_empty() {
            return Err(HostError::MissingUrl);
        }
        iframe.set_sandbox((!config.disable_sandbox).then_some(SANDBOX_POLICY));

        let (listener, events) = host_window.add_listener();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::AwaitingReady);
        let alive = Arc::new(AtomicBool::new(true));

        let mut host = HostLoop {
            language: config.language.clone(),
            config,
            host_window,
            iframe: iframe.clone(),
            channels,
            handler,
            alive: Arc::clone(&alive),
            link: None,
            handshake: Handshake::default(),
            reconciler: StateReconciler::with_equality(IframeState::equivalent),
            desired: None,
            status: status_tx,
        };
        host.open_channel();
        let initial = *host.status.borrow();
        debug!(
            target: "frame.host",
            window = %listener.window_id(),
            src = %iframe.src(),
            status = %initial,
            "host endpoint attached"
        );
        let task = tokio::spawn(host.run(events, command_rx));

        Ok(Self {
            iframe,
            commands,
            status,
            listener: Some(listener),
            alive,
            task: Some(task),
        })
    }

    /// Forwards `state` unless it equals the last state sent on this channel.
    pub fn post(&self, state: IframeState) -> HostResult<()> {
        self.command(Command::Post(state))
    }

    /// Always sent, with no deduplication.
    pub fn set_language(&self, language: impl Into<String>) -> HostResult<()> {
        self.command(Command::SetLanguage(language.into()))
    }

    /// Sends a host → iframe message. `set-state` goes through [`post`](Self::post).
    pub fn send(&self, message: MessageToIframe) -> HostResult<()> {
        match message {
            MessageToIframe::SetState(state) => self.post(state),
            other => self.command(Command::Send(other)),
        }
    }

    /// Points the iframe at `url`. The current channel, recovery counter and
    /// state snapshot are discarded; the next readiness beacon starts over.
    pub fn navigate(&self, url: impl Into<String>) -> HostResult<()> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(HostError::MissingUrl);
        }
        self.iframe.set_src(url);
        self.command(Command::Navigate)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn iframe(&self) -> &IframeElement {
        &self.iframe
    }

    pub fn detach(mut self) {
        self.shutdown();
    }

    fn command(&self, command: Command) -> HostResult<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(HostError::Detached);
        }
        self.commands.send(command).map_err(|_| HostError::Detached)
    }

    fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(listener) = self.listener.take() {
            drop(listener);
            debug!(target: "frame.host", src = %self.iframe.src(), "host endpoint detached");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HostEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counters for the handshake of the current url.
#[derive(Debug, Default)]
struct Handshake {
    sent_at: Option<Instant>,
    recoveries: u32,
    established: bool,
    failed: bool,
}

impl Handshake {
    fn attempt(&self) -> u32 {
        self.recoveries + 1
    }
}

/// The channel currently owned by the host.
struct LiveChannel {
    id: Uuid,
    port: MessagePort,
    /// The end still waiting to be transferred.
    pending: Option<MessagePort>,
    inbound: PortReceiver,
    drained: bool,
}

struct HostLoop<H> {
    config: HostConfig,
    host_window: Window,
    iframe: IframeElement,
    channels: Arc<dyn ChannelFactory>,
    handler: H,
    alive: Arc<AtomicBool>,
    link: Option<LiveChannel>,
    handshake: Handshake,
    reconciler: StateReconciler<IframeState>,
    desired: Option<IframeState>,
    language: String,
    status: watch::Sender<ConnectionStatus>,
}

impl<H: IframeMessageHandler> HostLoop<H> {
    async fn run(mut self, mut events: EventStream, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                message = next_inbound(&mut self.link) => self.handle_inbound(message),
            }
        }
        if let Some(live) = self.link.take() {
            live.port.close();
        }
        trace!(target: "frame.host", "host loop stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Post(state) => {
                self.desired = Some(state);
                self.flush_state();
            }
            Command::SetLanguage(language) => {
                self.language = language;
                self.send_language();
            }
            Command::Send(message) => {
                if let Some(port) = self.transferred_port() {
                    send_message(&port, &message);
                } else {
                    warn!(
                        target: "frame.host",
                        kind = %message.kind(),
                        "no transferred channel; message dropped"
                    );
                }
            }
            Command::Navigate => self.reset_for_navigation(),
        }
    }

    fn handle_event(&mut self, event: MessageEvent) {
        let content = self.iframe.content_window();
        if content.as_ref().map(Window::id) != event.source || event.source.is_none() {
            if is_ready_beacon(&event.data) {
                warn!(
                    target: "frame.host",
                    source = ?event.source,
                    origin = %event.origin,
                    "readiness beacon from a window other than the iframe; ignored"
                );
            }
            return;
        }
        if !self.origin_allowed(&event.origin) {
            warn!(
                target: "frame.host",
                origin = %event.origin,
                host_origin = %self.host_window.origin(),
                "message from iframe with unexpected origin; ignored"
            );
            return;
        }
        if is_ready_beacon(&event.data) {
            self.on_ready();
        } else {
            warn!(
                target: "frame.host",
                data = %event.data,
                "unsupported window message from iframe"
            );
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.config.disable_sandbox || origin == OPAQUE_ORIGIN || origin == self.host_window.origin()
    }

    fn on_ready(&mut self) {
        if self.handshake.failed {
            debug!(target: "frame.host", "connection failed for this url; readiness ignored");
            return;
        }
        let Some(sent_at) = self.handshake.sent_at else {
            self.transfer();
            return;
        };

        let elapsed = sent_at.elapsed();
        if elapsed < self.config.recovery_threshold {
            debug!(
                target: "frame.host",
                elapsed_ms = elapsed.as_millis() as u64,
                "duplicate readiness within threshold; ignored"
            );
            return;
        }
        if self.handshake.recoveries >= self.config.max_recovery_attempts {
            error!(
                target: "frame.host",
                src = %self.iframe.src(),
                recoveries = self.handshake.recoveries,
                "could not establish a connection with the iframe; giving up"
            );
            self.handshake.failed = true;
            if let Some(live) = self.link.take() {
                live.port.close();
            }
            self.status.send_replace(ConnectionStatus::Failed {
                recoveries: self.handshake.recoveries,
            });
            return;
        }

        self.handshake.recoveries += 1;
        warn!(
            target: "frame.host",
            elapsed_ms = elapsed.as_millis() as u64,
            attempt = self.handshake.attempt(),
            "transferred port presumed lost; re-running handshake"
        );
        self.open_channel();
        self.reconciler.invalidate();
        self.transfer();
    }

    /// Replaces the current channel, closing the old one.
    fn open_channel(&mut self) {
        if let Some(old) = self.link.take() {
            old.port.close();
            debug!(target: "frame.host", channel = %old.id, "channel discarded");
        }
        let MessageChannel { port1, port2 } = match self.channels.create_channel() {
            Ok(channel) => channel,
            Err(err) => {
                warn!(target: "frame.host", error = %err, "cannot create a message channel");
                self.status.send_replace(ConnectionStatus::Unavailable);
                return;
            }
        };
        let inbound = match port1.start() {
            Ok(inbound) => inbound,
            Err(err) => {
                error!(target: "frame.host", error = %err, "cannot start retained port");
                return;
            }
        };
        let id = Uuid::new_v4();
        trace!(target: "frame.host", channel = %id, port = %port1.id(), "channel created");
        self.link = Some(LiveChannel {
            id,
            port: port1,
            pending: Some(port2),
            inbound,
            drained: false,
        });
    }

    fn transfer(&mut self) {
        if self.link.as_ref().map_or(true, |live| live.pending.is_none()) {
            self.open_channel();
        }
        let Some(live) = self.link.as_mut() else {
            debug!(target: "frame.host", "no channel available; readiness ignored");
            return;
        };
        let Some(content) = self.iframe.content_window() else {
            error!(
                target: "frame.host",
                src = %self.iframe.src(),
                "iframe has no content window; port not transferred"
            );
            return;
        };
        let Some(port) = live.pending.take() else {
            return;
        };

        let result = content.post_message(
            Value::from(PORT_TRANSFER),
            WILDCARD_TARGET,
            &self.host_window,
            vec![port.clone()],
        );
        if let Err(err) = result {
            warn!(target: "frame.host", error = %err, "port transfer failed");
            live.pending = Some(port);
            return;
        }

        let channel = live.id;
        self.handshake.sent_at = Some(Instant::now());
        self.handshake.established = false;
        let attempt = self.handshake.attempt();
        info!(
            target: "frame.host",
            channel = %channel,
            port = %port.id(),
            attempt,
            "communication port transferred"
        );
        self.status
            .send_replace(ConnectionStatus::PortTransferred { attempt });
        self.send_language();
        self.flush_state();
    }

    fn transferred_port(&self) -> Option<MessagePort> {
        self.link
            .as_ref()
            .filter(|live| live.pending.is_none())
            .map(|live| live.port.clone())
    }

    fn send_language(&mut self) {
        if let Some(port) = self.transferred_port() {
            send_message(&port, &MessageToIframe::set_language(self.language.clone()));
        }
    }

    /// Sends the desired state if the reconciler lets it through. Before a
    /// transfer the state is held and sent right after it.
    fn flush_state(&mut self) {
        let (Some(state), Some(port)) = (self.desired.clone(), self.transferred_port()) else {
            return;
        };
        if !self.reconciler.should_send(&state) {
            return;
        }
        if send_message(&port, &MessageToIframe::SetState(state.clone())) {
            self.reconciler.record(state);
        }
    }

    fn reset_for_navigation(&mut self) {
        info!(target: "frame.host", src = %self.iframe.src(), "iframe navigated; handshake reset");
        self.handshake = Handshake::default();
        self.reconciler.reset();
        self.status.send_replace(ConnectionStatus::AwaitingReady);
        self.open_channel();
    }

    fn handle_inbound(&mut self, message: Option<Payload>) {
        let Some(data) = message else {
            if let Some(live) = self.link.as_mut() {
                live.drained = true;
                debug!(target: "frame.host", channel = %live.id, "channel closed by peer");
            }
            return;
        };
        let message = match MessageFromIframe::from_value(&data) {
            Ok(message) => message,
            Err(err) => {
                warn!(target: "frame.host", error = %err, "dropping malformed message from iframe");
                return;
            }
        };
        if !self.handshake.established {
            self.handshake.established = true;
            self.status.send_replace(ConnectionStatus::Established {
                attempt: self.handshake.attempt(),
            });
        }

        match message {
            MessageFromIframe::HeightChanged(height) => self.set_height(height.data),
            MessageFromIframe::OpenLink(link) => self.open_link(&link.data),
            other => self.dispatch(other),
        }
    }

    fn set_height(&self, height: f64) {
        if !height.is_finite() || height < 0.0 {
            warn!(target: "frame.host", height, "ignoring invalid iframe height");
            return;
        }
        trace!(target: "frame.host", height, "iframe height changed");
        self.iframe.set_height_px(height);
    }

    fn open_link(&self, link: &str) {
        match Url::parse(link) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                debug!(target: "frame.host", url = %url, "opening link from iframe");
                self.host_window
                    .open(url.as_str(), "_blank", "noopener,noreferrer");
            }
            Ok(url) => {
                warn!(target: "frame.host", scheme = url.scheme(), "refusing to open non-http link");
            }
            Err(err) => {
                warn!(target: "frame.host", error = %err, "refusing to open unparsable link");
            }
        }
    }

    fn dispatch(&mut self, message: MessageFromIframe) {
        if !self.alive.load(Ordering::Acquire) {
            return;
        }
        let Some(port) = self.link.as_ref().map(|live| live.port.clone()) else {
            return;
        };
        let kind = message.kind();
        let handler = &mut self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(message, &port))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(target: "frame.host", kind = %kind, error = %err, "iframe message handler failed");
            }
            Err(payload) => {
                error!(
                    target: "frame.host",
                    kind = %kind,
                    panic = panic_message(payload.as_ref()),
                    "iframe message handler panicked"
                );
            }
        }
    }
}

/// Resolves with the next message on the live channel; pends forever without one.
async fn next_inbound(link: &mut Option<LiveChannel>) -> Option<Payload> {
    match link {
        Some(live) if !live.drained => live.inbound.recv().await,
        _ => std::future::pending().await,
    }
}

fn send_message(port: &MessagePort, message: &MessageToIframe) -> bool {
    let payload = match message.to_value() {
        Ok(payload) => payload,
        Err(err) => {
            error!(target: "frame.host", error = %err, "cannot encode message");
            return false;
        }
    };
    match port.post_message(payload) {
        Ok(()) => {
            trace!(target: "frame.host", kind = %message.kind(), port = %port.id(), "message sent");
            true
        }
        Err(err) => {
            warn!(target: "frame.host", kind = %message.kind(), error = %err, "message not sent");
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore(_: MessageFromIframe, _: &MessagePort) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let from_str = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(from_str.as_ref()), "boom");
        let from_string = panic::catch_unwind(|| panic!("{}", 42)).unwrap_err();
        assert_eq!(panic_message(from_string.as_ref()), "42");
    }

    #[tokio::test]
    async fn attach_rejects_blank_url() {
        let err = HostEndpoint::attach(
            Window::new("https://courses.example"),
            IframeElement::new("  "),
            HostConfig::default(),
            ignore,
        )
        .err();
        assert_eq!(err, Some(HostError::MissingUrl));
    }

    #[tokio::test]
    async fn sandbox_attribute_follows_config() {
        let iframe = IframeElement::new("https://service.example/iframe");
        let host = HostEndpoint::attach(
            Window::new("https://courses.example"),
            iframe.clone(),
            HostConfig::default(),
            ignore,
        )
        .expect("attach");
        assert_eq!(iframe.sandbox().as_deref(), Some(SANDBOX_POLICY));
        host.detach();

        let config = HostConfig {
            disable_sandbox: true,
            ..HostConfig::default()
        };
        let _host = HostEndpoint::attach(
            Window::new("https://courses.example"),
            iframe.clone(),
            config,
            ignore,
        )
        .expect("attach");
        assert_eq!(iframe.sandbox(), None);
    }
}
