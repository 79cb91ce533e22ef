//! WebSocket event stream with backpressure support.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crowdmon_events::{Subscription, SubscriptionFilter};
use crowdmon_media::kind_for_extension;
use crowdmon_models::{ClientCommand, CommandKind, Event, JobId, MediaKind};

use crate::metrics;
use crate::state::AppState;
use crate::storage::LocalStorage;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Configuration for WebSocket backpressure.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Send an event with backpressure handling.
///
/// A slow client blocks this connection's loop, which in turn lets its
/// subscription fall behind and drop the oldest events.
async fn send_event(tx: &mpsc::Sender<Message>, event: &Event) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, event_type = event.event_type(), "Failed to serialise event");
            return true;
        }
    };
    let sent = match tx.try_send(Message::Text(json)) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(msg).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    };
    if sent {
        metrics::record_ws_message_sent(event.event_type());
    }
    sent
}

/// Event stream endpoint.
///
/// GET /ws
pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    ws.on_upgrade(|socket| async move {
        handle_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut subscription = state.orchestrator.subscribe(SubscriptionFilter::All);
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    heartbeat.tick().await;

    info!("Observer connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if !send_event(&tx, &event).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(ack) = handle_command(&state, &mut subscription, &text).await {
                        if !send_event(&tx, &ack).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    }

    info!(dropped = subscription.dropped(), "Observer disconnected");
    drop(tx);
    let _ = send_task.await;
}

/// Apply a client command and build its acknowledgement.
///
/// Malformed commands are logged and not acknowledged.
async fn handle_command(
    state: &AppState,
    subscription: &mut Subscription,
    text: &str,
) -> Option<Event> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed client command");
            return None;
        }
    };
    let kind = command.kind();
    metrics::record_ws_message_received(command_name(kind));

    let ack = match command {
        ClientCommand::StartJob { asset_ref, kind } => {
            start_job(state, subscription, &asset_ref, kind.as_deref()).await
        }
        ClientCommand::StopJob { job_id } => match state.orchestrator.cancel(&job_id) {
            Ok(outcome) => {
                let note = outcome
                    .is_already_terminal()
                    .then(|| format!("job already {}", outcome.state().as_str()));
                Event::command_ack(CommandKind::StopJob, outcome.is_acknowledged(), Some(job_id), note)
            }
            Err(e) => Event::command_ack(CommandKind::StopJob, false, Some(job_id), Some(e.to_string())),
        },
        ClientCommand::WatchJob { job_id } => match state.orchestrator.status(&job_id) {
            Ok(_) => {
                subscription.watch_job(job_id.clone());
                Event::command_ack(CommandKind::WatchJob, true, Some(job_id), None)
            }
            Err(e) => Event::command_ack(CommandKind::WatchJob, false, Some(job_id), Some(e.to_string())),
        },
        ClientCommand::WatchAll => {
            subscription.watch_all();
            Event::command_ack(CommandKind::WatchAll, true, None, None)
        }
    };
    Some(ack)
}

async fn start_job(
    state: &AppState,
    subscription: &mut Subscription,
    asset_ref: &str,
    requested: Option<&str>,
) -> Event {
    let reject = |reason: String| Event::command_ack(CommandKind::StartJob, false, None, Some(reason));

    if !LocalStorage::is_valid_ref(asset_ref) || state.storage.upload_path(asset_ref).is_none() {
        return reject(format!("unknown asset {asset_ref}"));
    }

    let kind = match requested {
        Some(kind) => match kind.parse::<MediaKind>() {
            Ok(kind) => kind,
            Err(e) => return reject(e),
        },
        None => {
            let extension = Path::new(asset_ref)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or_default();
            match kind_for_extension(extension) {
                Some(kind) => kind,
                None => return reject(format!("cannot infer media kind of {asset_ref}")),
            }
        }
    };

    match state.orchestrator.submit(asset_ref, kind).await {
        Ok(job_id) => {
            watch_started(subscription, &job_id);
            Event::command_ack(CommandKind::StartJob, true, Some(job_id), None)
        }
        Err(e) => reject(e.to_string()),
    }
}

/// A narrowed connection also follows the jobs it starts itself.
fn watch_started(subscription: &mut Subscription, job_id: &JobId) {
    if matches!(subscription.filter(), SubscriptionFilter::Jobs(_)) {
        subscription.watch_job(job_id.clone());
    }
}

fn command_name(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::StartJob => "start_job",
        CommandKind::StopJob => "stop_job",
        CommandKind::WatchJob => "watch_job",
        CommandKind::WatchAll => "watch_all",
    }
}
