use std::fmt;
use std::time::Duration;

use anyhow::Context;
use exercise_proto::{
    AnswerExerciseData, AnswerExerciseState, CurrentStateMessage, IframeState, MessageFromIframe,
    MessageKind, MessageToIframe, RepositoryExercisesMessage, ToIframe, UserInformation,
};
use frame_client::{ClientConfig, ClientEndpoint};
use frame_host::{ConnectionStatus, HostConfig, HostEndpoint, IframeElement};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use transport_port::{MessagePort, Window};

use crate::cli::Scenario;

/// Time allowed for one round of messages between the two tasks.
const SETTLE: Duration = Duration::from_millis(50);
/// Extra wait on top of the recovery threshold before a reloaded frame mounts.
const RELOAD_MARGIN: Duration = Duration::from_millis(100);

pub struct SimOptions {
    pub scenario: Scenario,
    pub host_origin: String,
    pub iframe_url: String,
    pub host: HostConfig,
    pub client: ClientConfig,
}

pub struct Report {
    pub scenario: Scenario,
    pub status: ConnectionStatus,
    pub reloads: u32,
    pub received: Vec<MessageKind>,
    pub sandbox: Option<String>,
    pub height_px: Option<f64>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario: {:?}", self.scenario)?;
        writeln!(f, "status:   {}", self.status)?;
        writeln!(f, "reloads:  {}", self.reloads)?;
        writeln!(f, "sandbox:  {}", self.sandbox.as_deref().unwrap_or("(none)"))?;
        if let Some(height) = self.height_px {
            writeln!(f, "height:   {height}px")?;
        }
        let received: Vec<&str> = self.received.iter().map(|kind| kind.as_str()).collect();
        write!(f, "received: [{}]", received.join(", "))?;
        if let Some(banner) = self.status.banner() {
            write!(f, "\n\n{banner}")?;
        }
        Ok(())
    }
}

pub async fn run(options: SimOptions) -> anyhow::Result<Report> {
    let host_window = Window::new(options.host_origin.clone());
    let frame_window = Window::opaque();
    let iframe = IframeElement::with_content_window(options.iframe_url.clone(), frame_window.clone());
    let threshold = options.host.recovery_threshold;
    let max_recoveries = options.host.max_recovery_attempts;

    let (kinds_tx, mut kinds_rx) = mpsc::unbounded_channel();
    let host = HostEndpoint::attach(
        host_window.clone(),
        iframe.clone(),
        options.host,
        move |message: MessageFromIframe, port: &MessagePort| -> anyhow::Result<()> {
            course_page(message, port, &kinds_tx)
        },
    )
    .context("attaching host endpoint")?;
    let mut status = host.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(target: "frame.sim", status = %current, "connection status changed");
        }
    });

    let mut client = mount(&frame_window, &host_window, &options.client);
    connect(&client, options.client.max_backoff).await?;
    host.post(sample_state()).context("posting state")?;
    sleep(SETTLE).await;
    client.report_height(480.0).context("reporting height")?;
    client
        .request_repository_exercises()
        .context("requesting repository exercises")?;
    sleep(SETTLE).await;

    let reloads = match options.scenario {
        Scenario::Connect => 0,
        Scenario::SilentReload => 1,
        Scenario::ReloadLoop => max_recoveries + 1,
    };
    for reload in 1..=reloads {
        client.unmount();
        sleep(threshold + RELOAD_MARGIN).await;
        info!(target: "frame.sim", reload, "iframe reloaded");
        client = mount(&frame_window, &host_window, &options.client);
        if let Err(err) = connect(&client, threshold).await {
            warn!(target: "frame.sim", reload, error = %err, "reloaded iframe stayed disconnected");
        }
        sleep(SETTLE).await;
        if host.status().is_failed() {
            break;
        }
    }

    let mut received = Vec::new();
    while let Ok(kind) = kinds_rx.try_recv() {
        received.push(kind);
    }
    let report = Report {
        scenario: options.scenario,
        status: host.status(),
        reloads,
        received,
        sandbox: iframe.sandbox(),
        height_px: iframe.height_px(),
    };
    client.unmount();
    host.detach();
    Ok(report)
}

fn mount(frame: &Window, parent: &Window, config: &ClientConfig) -> ClientEndpoint {
    ClientEndpoint::mount(frame.clone(), parent.clone(), config.clone(), exercise_frame)
}

async fn connect(client: &ClientEndpoint, within: Duration) -> anyhow::Result<()> {
    let port = timeout(within, client.wait_connected())
        .await
        .context("no port transferred in time")??;
    debug!(target: "frame.sim", port = %port.id(), "iframe connected");
    Ok(())
}

/// Iframe side: answers every state with its current answer.
fn exercise_frame(message: ToIframe, port: &MessagePort) -> anyhow::Result<()> {
    match message {
        ToIframe::Known(MessageToIframe::SetState(state)) => {
            info!(target: "frame.sim", view_type = state.view_type(), "iframe rendering state");
            let reply = MessageFromIframe::CurrentState(CurrentStateMessage {
                data: json!({ "selected_option": null }),
                valid: false,
            });
            port.post_message(reply.to_value()?)?;
        }
        ToIframe::Known(other) => {
            info!(target: "frame.sim", kind = %other.kind(), "iframe received message");
        }
        ToIframe::ForwardCompatibleSetState(raw) => {
            warn!(target: "frame.sim", view_type = ?raw.get("view_type"), "iframe cannot render state");
        }
    }
    Ok(())
}

/// Host side: records what arrived and serves repository exercise requests.
fn course_page(
    message: MessageFromIframe,
    port: &MessagePort,
    kinds: &mpsc::UnboundedSender<MessageKind>,
) -> anyhow::Result<()> {
    let kind = message.kind();
    kinds
        .send(kind)
        .map_err(|_| anyhow::anyhow!("report collector dropped"))?;
    if let MessageFromIframe::RequestRepositoryExercises = message {
        let reply = MessageToIframe::RepositoryExercises(RepositoryExercisesMessage {
            repository_exercises: Vec::new(),
        });
        port.post_message(reply.to_value()?)?;
    }
    Ok(())
}

fn sample_state() -> IframeState {
    IframeState::AnswerExercise(AnswerExerciseState {
        exercise_task_id: "task-1".into(),
        user_information: UserInformation {
            pseudonymous_id: "sim-user".into(),
            signed_in: true,
        },
        user_variables: None,
        data: AnswerExerciseData {
            public_spec: json!({ "options": ["a", "b", "c"] }),
            previous_submission: None,
        },
    })
}
