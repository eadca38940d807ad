use std::sync::Arc;
use std::time::Duration;

use exercise_proto::{MessageFromIframe, READY_BEACON};
use frame_host::{HostConfig, HostEndpoint, IframeElement};
use parking_lot::Mutex;
use serde_json::json;
use test_timeout::tokio_timeout_test;
use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};
use transport_port::{Window, WILDCARD_TARGET};

/// Records the target of every event that passes the filter.
#[derive(Clone, Default)]
struct Targets(Arc<Mutex<Vec<String>>>);

impl<S: Subscriber> Layer<S> for Targets {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.0.lock().push(event.metadata().target().to_string());
    }
}

#[tokio_timeout_test(10, paused)]
async fn host_events_can_be_selected_by_component_target() {
    let targets = Targets::default();
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("frame.host=debug"))
        .with(targets.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let host_window = Window::new("https://courses.example");
    let frame_window = Window::opaque();
    let (_frame_listener, _frame_events) = frame_window.add_listener();
    let iframe =
        IframeElement::with_content_window("https://service.example/iframe", frame_window.clone());
    let (tx, _inbound) = mpsc::unbounded_channel::<MessageFromIframe>();
    let _host = HostEndpoint::attach(host_window.clone(), iframe, HostConfig::default(), tx)
        .expect("attach");

    host_window
        .post_message(json!(READY_BEACON), WILDCARD_TARGET, &frame_window, Vec::new())
        .expect("ready");
    tokio::time::sleep(Duration::from_millis(1)).await;

    let seen = targets.0.lock().clone();
    assert!(seen.len() >= 2, "attach and transfer are logged: {seen:?}");
    assert!(seen.iter().all(|target| target == "frame.host"), "{seen:?}");
}
