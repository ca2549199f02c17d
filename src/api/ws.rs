//! WebSocket push of job transitions.
//!
//! Every accepted or rejected job event recorded in the transition log is
//! forwarded to connected clients, plus a heartbeat every 30s.

use crate::history::TransitionEntry;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsEvent {
    /// A job event was decided (status change or rejection).
    Transition(TransitionEntry),
    /// Some transitions were dropped because the client fell behind.
    Lagged { skipped: u64 },
    Heartbeat,
}

/// WebSocket upgrade handler for `/api/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.history.subscribe();

    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        // First tick fires immediately
        heartbeat.tick().await;
        loop {
            let event = tokio::select! {
                received = rx.recv() => match received {
                    Ok(entry) => WsEvent::Transition(entry),
                    Err(RecvError::Lagged(skipped)) => WsEvent::Lagged { skipped },
                    Err(RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => WsEvent::Heartbeat,
            };
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break; // client gone
            }
        }
    });

    // Axum answers pings itself; we only watch for the close.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, Trigger};

    #[test]
    fn transition_event_is_tagged() {
        let entry = TransitionEntry::new("job-1", Trigger::Start, JobStatus::Idle, JobStatus::Scraping);
        let json = serde_json::to_value(WsEvent::Transition(entry)).unwrap();
        assert_eq!(json["type"], "Transition");
        assert_eq!(json["data"]["job_id"], "job-1");
        assert_eq!(json["data"]["to"], "SCRAPING");
    }

    #[test]
    fn heartbeat_has_no_data() {
        let json = serde_json::to_value(WsEvent::Heartbeat).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Heartbeat"}));
    }
}
