use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use simjob_core::job::Job;
use simjob_core::progress::ProgressEvent;
use simjob_core::types::JobId;
use simjob_events::{relay_stream, Subscription};

use crate::error::AppResult;
use crate::state::AppState;
use crate::ws::manager::RelayManager;

/// Interval between keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /api/v1/jobs/{id}/events
///
/// Upgrade to a WebSocket that streams the job's progress. The first frame
/// is the stored snapshot; live events follow until a terminal one, after
/// which the server closes the socket. Unknown jobs are rejected with 404
/// before the upgrade.
pub async fn job_events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    // Subscribe before reading the snapshot so no transition falls between.
    let subscription = state.publisher.subscribe(job_id);
    let job = state.jobs.get_status(job_id).await?;

    Ok(ws.on_upgrade(move |socket| relay(socket, job, subscription, state.relays)))
}

/// Drive one relay connection until the sequence ends, the client leaves,
/// or the server shuts down.
async fn relay(socket: WebSocket, job: Job, subscription: Subscription, relays: Arc<RelayManager>) {
    let job_id = job.id;
    let conn_id = relays.add();
    let shutdown = relays.shutdown_token();
    tracing::info!(conn_id = %conn_id, job_id = %job_id, "Progress relay connected");

    let (mut sink, mut inbound) = socket.split();
    let mut events = Box::pin(relay_stream(ProgressEvent::from_job(&job), subscription));
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                let text = event.to_message().to_string();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(conn_id = %conn_id, "Relay sink closed");
                    break;
                }
            }
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Relay receive error");
                    break;
                }
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    relays.remove(&conn_id);
    tracing::info!(conn_id = %conn_id, job_id = %job_id, "Progress relay disconnected");
}
