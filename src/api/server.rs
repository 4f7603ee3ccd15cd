// =============================================================================
// UI server — push-based state updates over a websocket
// =============================================================================
//
// Browser clients connect to `/socket` and receive one JSON message per
// state mutation, `{"type": "SET_<FIELD>", "payload": value}`:
//   1. The full scalar snapshot immediately on connect (`write_all`).
//   2. Dirty-only updates on a `proc_update_res` cadence (`write_updates`),
//      fanned out to every connected client.
//
// The dirty bits are global, so the periodic projection runs once per tick
// and broadcasts; per-client catch-up happens only at connect time.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::Config;

struct UiState {
    app: Arc<AppState>,
    clients: Mutex<HashMap<Uuid, UnboundedSender<String>>>,
}

/// Build the UI router: the push websocket plus permissive CORS for
/// development dashboards.
fn router(ui: Arc<UiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/socket", get(ws_handler))
        .layer(cors)
        .with_state(ui)
}

/// Bind the UI server and run it alongside the periodic update broadcast.
/// Returns only on a bind or serve failure.
pub async fn run_ui_server(app: Arc<AppState>, config: Config) -> Result<()> {
    let ui = Arc::new(UiState {
        app,
        clients: Mutex::new(HashMap::new()),
    });

    // Periodic dirty-state broadcast.
    let broadcast_ui = ui.clone();
    let tick = tokio::time::Duration::from_millis(config.proc_update_res.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            broadcast_updates(&broadcast_ui);
        }
    });

    let bind_addr = format!("{}:{}", config.ui_host_ip, config.ui_host_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind UI server on {bind_addr}"))?;
    info!(addr = %bind_addr, "UI server listening");

    axum::serve(listener, router(ui))
        .await
        .context("UI server failed")
}

/// Project dirty scalars once and fan the messages out to every client.
fn broadcast_updates(ui: &Arc<UiState>) {
    let mut payloads = Vec::new();
    ui.app.write_updates(&mut |msg| {
        if let Ok(json) = serde_json::to_string(msg) {
            payloads.push(json);
        }
    });

    if payloads.is_empty() {
        return;
    }

    let clients = ui.clients.lock();
    for tx in clients.values() {
        for payload in &payloads {
            // A failed send means the client task is gone; it unregisters
            // itself on exit.
            let _ = tx.send(payload.clone());
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ui): State<Arc<UiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, ui))
}

/// One UI client connection: full snapshot on connect, then queued pushes.
async fn handle_client(socket: WebSocket, ui: Arc<UiState>) {
    let client_id = Uuid::new_v4();
    info!(client = %client_id, "UI client connected");

    let (mut sender, mut receiver) = socket.split();

    // Full snapshot before the client is registered for updates, so it
    // cannot observe a gap between snapshot and stream.
    let mut snapshot = Vec::new();
    ui.app.write_all(&mut |msg| {
        if let Ok(json) = serde_json::to_string(msg) {
            snapshot.push(json);
        }
    });
    for payload in snapshot {
        if sender.send(Message::Text(payload)).await.is_err() {
            warn!(client = %client_id, "UI client dropped during snapshot");
            return;
        }
    }

    let (tx, mut rx) = unbounded_channel::<String>();
    ui.clients.lock().insert(client_id, tx);

    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // The UI socket is push-only; inbound payloads are
                        // ignored.
                        debug!(client = %client_id, "ignoring inbound UI message");
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "UI socket error");
                        break;
                    }
                }
            }
        }
    }

    ui.clients.lock().remove(&client_id);
    info!(client = %client_id, "UI client disconnected");
}
