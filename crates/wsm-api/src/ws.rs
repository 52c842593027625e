use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use wsm_daemon::{EventEnvelope, WorkspaceEvent};

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Replay buffered envelopes with a greater sequence number after the snapshot.
    pub since: Option<u64>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.since))
}

/// Sends a `snapshot` frame, then any buffered envelopes after `since`, then every
/// published envelope until the client goes away.
async fn handle_socket(socket: WebSocket, state: AppState, since: Option<u64>) {
    let (mut sender, mut receiver) = socket.split();
    let bus = state.manager.events();

    // Subscribe before taking the snapshot so no event falls between the two.
    let mut events = bus.subscribe();
    let snapshot = bus.envelope(WorkspaceEvent::Snapshot(Box::new(state.manager.snapshot())));

    state.ws_clients.on_connect();
    debug!(target: "wsm::api", clients = state.ws_clients.active(), since = ?since, "WebSocket client connected");

    let mut open = send(&mut sender, &snapshot).await;
    let mut replayed_to = 0;
    if let Some(since) = since {
        for envelope in bus.recent_since(since, usize::MAX) {
            if !open {
                break;
            }
            replayed_to = envelope.seq;
            open = send(&mut sender, &envelope).await;
        }
    }

    while open {
        tokio::select! {
            event = events.recv() => match event {
                // Already sent during replay
                Ok(envelope) if envelope.seq <= replayed_to => {}
                Ok(envelope) => open = send(&mut sender, &envelope).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "wsm::api", skipped, "WebSocket client lagging, skipping ahead");
                }
                Err(RecvError::Closed) => open = false,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => open = false,
                Some(Ok(_)) => {}
            },
        }
    }

    state.ws_clients.on_disconnect();
    debug!(target: "wsm::api", clients = state.ws_clients.active(), "WebSocket client disconnected");
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, envelope: &EventEnvelope) -> bool {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            warn!(target: "wsm::api", error = %e, event = envelope.event.event_type(), "Dropping unserializable event");
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
