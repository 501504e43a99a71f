//! WebSocket endpoint
//!
//! One task per connection reads inbound frames and hands them to the
//! [`EventHandler`]; a forwarder task drains the session's outbound queue
//! into the socket as binary messages.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::json;

use super::EventHandler;

/// Shared state handed to axum handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<EventHandler>,
}

impl AppState {
    pub fn new(handler: EventHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

/// Routes: `/ws` for clients, `/health` for liveness probes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(socket, state.handler))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = state.handler.pipeline();
    let engine = pipeline.engine();
    let (width, height) = engine.dimensions();
    Json(json!({
        "status": if engine.is_fatal() { "failed" } else { "ok" },
        "backend": engine.backend_name(),
        "width": width,
        "height": height,
        "encoding": pipeline.encoder().format().name(),
        "sessions": pipeline.sessions().len(),
        "renders": engine.render_count(),
    }))
}

async fn run_connection(socket: WebSocket, handler: Arc<EventHandler>) {
    let sessions = Arc::clone(handler.pipeline().sessions());
    let (session, mut outbound_rx) = sessions.connect();
    let id = session.id();

    let (mut ws_tx, mut ws_rx) = socket.split();

    let outbound = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if ws_tx.send(Message::Binary(payload)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session = %id, "WebSocket read failed: {}", e);
                break;
            }
        };
        let outcome = match msg {
            Message::Text(text) => handler.handle_text(id, text.as_str()).await,
            Message::Binary(data) => handler.handle_binary(id, &data).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        tracing::trace!(session = %id, ?outcome, "Message handled");
    }

    sessions.on_disconnect(id);
    outbound.abort();
    tracing::debug!(
        session = %id,
        connected_ms = session.age().as_millis() as u64,
        "Connection closed"
    );
}
