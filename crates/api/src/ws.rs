//! WebSocket stream of job lifecycle events.
//!
//! Each connection subscribes to the [`EventBus`] and receives every
//! [`JobEvent`] as a JSON text frame, or only those for one job when
//! `?job_id=` is given. The stream is push-only; inbound frames other than
//! close are ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use evalhub_core::types::JobId;
use evalhub_events::{EventBus, JobEvent};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::extract::ApiQuery;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Only forward events for this job.
    pub job_id: Option<JobId>,
}

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.event_bus, query.job_id))
}

/// Manage a single WebSocket connection after upgrade.
///
/// A spawned sender task forwards bus events to the sink while the current
/// task drains inbound frames until the client goes away.
async fn handle_socket(socket: WebSocket, bus: Arc<EventBus>, job_filter: Option<JobId>) {
    let conn_id = uuid::Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, job_id = ?job_filter, "WebSocket connected");

    let mut events = bus.subscribe();
    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn_id = %conn_id, skipped, "WebSocket subscriber lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !wants(job_filter, &event) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "Failed to encode job event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

fn wants(filter: Option<JobId>, event: &JobEvent) -> bool {
    filter.is_none_or(|id| id == event.job_id)
}

#[cfg(test)]
mod tests {
    use evalhub_core::status::JobStatus;
    use evalhub_core::types::new_job_id;

    use super::*;

    #[test]
    fn filter_selects_one_job() {
        let id = new_job_id();
        let event = JobEvent::new("job.created", id, JobStatus::Pending);

        assert!(wants(None, &event));
        assert!(wants(Some(id), &event));
        assert!(!wants(Some(new_job_id()), &event));
    }
}
