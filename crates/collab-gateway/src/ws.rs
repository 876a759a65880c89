//! Session Gateway WebSocket front door (C10). One axum route upgrades to a
//! socket per connection; inbound frames drive collaborations and Context
//! Store / Cost Governor operations, and every event published for that
//! connection's session is translated and forwarded out as it happens.

use crate::session::{handle_message, GatewayState, OpOutcome};
use crate::wire::{translate_event, ClientMessage, ConnectionState, ServerMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use uuid::Uuid;

const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Two consecutive missed pongs terminates the connection (§4.10).
const MAX_MISSED_PINGS: u32 = 2;

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/ws", get(websocket_handler)).with_state(state)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let session_id = Uuid::new_v4().to_string();
    tracing::info!(session_id = %session_id, "gateway connection opened");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(256);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let conn = Arc::new(Mutex::new(ConnectionState::new(session_id.clone())));

    let ping_tx = tx.clone();
    let ping_conn = conn.clone();
    let ping_task = tokio::spawn(async move {
        let mut ticker = interval(PING_INTERVAL);
        loop {
            ticker.tick().await;
            {
                let mut guard = ping_conn.lock().await;
                if guard.missed_pings >= MAX_MISSED_PINGS {
                    break;
                }
                guard.missed_pings += 1;
            }
            if ping_tx.send(Message::Ping(Vec::new())).await.is_err() {
                break;
            }
        }
    });

    // Every event this session's collaborations publish is forwarded for the
    // whole life of the connection, not just while one collaboration is
    // running, so status/progress frames from a later chat reach the client
    // without a fresh subscription per call.
    spawn_event_forwarder(state.event_bus.clone(), session_id.clone(), tx.clone());

    let receive_tx = tx.clone();
    let receive_conn = conn.clone();
    let receive_state = state.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(&receive_state, &receive_conn, &text, &receive_tx).await;
                }
                Message::Pong(_) => {
                    receive_conn.lock().await.missed_pings = 0;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = receive_task => {},
        _ = ping_task => {},
    }

    if let Some(task) = conn.lock().await.running_task.take() {
        task.abort();
    }
    tracing::info!(session_id = %session_id, "gateway connection closed");
}

async fn handle_text_message(
    state: &GatewayState,
    conn: &Arc<Mutex<ConnectionState>>,
    text: &str,
    tx: &mpsc::Sender<Message>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            // Unknown/malformed frames are logged and acknowledged with a
            // generic error; the connection stays open (§4.10).
            tracing::warn!(error = %e, "malformed or unrecognized client frame");
            send(tx, ServerMessage::Error { message: format!("malformed request: {e}"), target: None }).await;
            return;
        }
    };

    let mut guard = conn.lock().await;
    let outcome = handle_message(state, &mut guard, conn.clone(), message).await;
    drop(guard);

    match outcome {
        Ok(OpOutcome::Reply(reply)) => send(tx, reply).await,
        Ok(OpOutcome::None) => {}
        Err(e) => send(tx, ServerMessage::Error { message: e.to_string(), target: None }).await,
    }
}

/// Subscribes to the session's event channel for the life of the connection
/// and forwards every translatable event out as it is published.
fn spawn_event_forwarder(event_bus: Arc<collab_core::EventBus>, session_id: String, tx: mpsc::Sender<Message>) {
    let mut events = event_bus.subscribe(&session_id);
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Some(frame) = translate_event(&event) {
                if !send(&tx, frame).await {
                    break;
                }
            }
        }
    });
}

async fn send(tx: &mpsc::Sender<Message>, frame: ServerMessage) -> bool {
    let text = serde_json::to_string(&frame).unwrap_or_default();
    tx.send(Message::Text(text)).await.is_ok()
}
