use anyhow::anyhow;
use exercise_proto::MessageFromIframe;
use tokio::sync::mpsc;
use transport_port::MessagePort;

/// Receives application-level messages from the iframe.
///
/// `height-changed` and `open-link` are handled by the endpoint and never
/// reach this trait. The port is the host's end of the current channel, for
/// replies such as `upload-result`.
pub trait IframeMessageHandler: Send + 'static {
    fn on_message(&mut self, message: MessageFromIframe, port: &MessagePort) -> anyhow::Result<()>;
}

impl<F> IframeMessageHandler for F
where
    F: FnMut(MessageFromIframe, &MessagePort) -> anyhow::Result<()> + Send + 'static,
{
    fn on_message(&mut self, message: MessageFromIframe, port: &MessagePort) -> anyhow::Result<()> {
        self(message, port)
    }
}

/// Hands messages to an async consumer.
impl IframeMessageHandler for mpsc::UnboundedSender<MessageFromIframe> {
    fn on_message(&mut self, message: MessageFromIframe, _port: &MessagePort) -> anyhow::Result<()> {
        self.send(message)
            .map_err(|err| anyhow!("consumer dropped before {}", err.0.kind()))
    }
}
