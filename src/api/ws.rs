use crate::api::routes::AppState;
use crate::models::{RunInfo, RunStatus};
use crate::services::{RunManager, StreamChunk};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ClientCommand {
    message: String,
    #[serde(default)]
    action: String,
}

#[derive(Debug, Serialize)]
struct ServerFrame {
    channel: &'static str,
    message: &'static str,
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processes: Option<Vec<RunInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Vec<StreamChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RunStatus>,
}

/// Serializes writes from concurrent subscriptions onto one socket.
pub struct WsWriter<S> {
    sink: Arc<Mutex<S>>,
}

impl<S> Clone for WsWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
        }
    }
}

impl<S> WsWriter<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    async fn send(&self, frame: &ServerFrame) -> Result<(), String> {
        let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| e.to_string())
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    tracing::debug!(%conn_id, "WebSocket connected");

    let (sink, mut stream) = socket.split();
    let writer = WsWriter::new(sink);
    // Dropping the set aborts the polling tasks; the runs themselves keep going.
    let mut subscriptions = JoinSet::new();

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%conn_id, "WebSocket receive error: {}", err);
                break;
            }
        };

        let command: ClientCommand = match serde_json::from_str(text.as_str()) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(%conn_id, "Ignoring malformed WebSocket command: {}", err);
                continue;
            }
        };

        let runs = state.runs.runs().clone();
        let interval = state.ws_interval;
        match command.message.as_str() {
            "get-processes" => {
                subscriptions.spawn(watch_processes(writer.clone(), runs, command.action, interval));
            }
            "get-process" => {
                subscriptions.spawn(watch_process(writer.clone(), runs, command.action, interval));
            }
            other => tracing::warn!(%conn_id, "Unknown WebSocket command '{}'", other),
        }
    }

    subscriptions.abort_all();
    tracing::debug!(%conn_id, "WebSocket closed");
}

/// Pushes the running runs of an action until none are left, then sends
/// the full run list once as `send-processes-finished`.
pub async fn watch_processes<S>(
    writer: WsWriter<S>,
    runs: Arc<RunManager>,
    action_id: String,
    every: Duration,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;

        let running = runs.running(&action_id);
        let finished = running.is_empty();
        let frame = ServerFrame {
            channel: "processes",
            message: if finished {
                "send-processes-finished"
            } else {
                "send-processes"
            },
            processes: Some(if finished {
                runs.list_by_action(&action_id)
            } else {
                running
            }),
            action: action_id.clone(),
            data: None,
            status: None,
        };

        if let Err(err) = writer.send(&frame).await {
            tracing::debug!(action_id, "Stopping processes subscription: {}", err);
            return;
        }
        if finished {
            return;
        }
    }
}

/// Pushes one run's streams while it is active, then its final state once.
pub async fn watch_process<S>(
    writer: WsWriter<S>,
    runs: Arc<RunManager>,
    run_id: String,
    every: Duration,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;

        let Some(handle) = runs.get(&run_id) else {
            tracing::warn!(run_id, "Subscription for unknown run");
            return;
        };
        let status = handle.status();
        let data = match handle.streams().read(0, None) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(run_id, "Failed to read run streams: {}", err);
                return;
            }
        };

        let active = matches!(status, RunStatus::Created | RunStatus::Running);
        let frame = ServerFrame {
            channel: "process",
            message: if active {
                "send-process"
            } else {
                "send-process-finished"
            },
            action: run_id.clone(),
            processes: None,
            data: Some(data),
            status: Some(status),
        };

        if let Err(err) = writer.send(&frame).await {
            tracing::debug!(run_id, "Stopping process subscription: {}", err);
            return;
        }
        if !active {
            return;
        }
    }
}
