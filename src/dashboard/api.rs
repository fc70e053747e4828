//! Dashboard HTTP API
//!
//! Snapshot and order endpoints plus the render-command WebSocket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use super::types::{ApiResponse, ClientMessage, WsMessage};
use super::DashboardState;
use crate::polymarket::OrderRequest;

/// Create the API router with all endpoints
pub fn create_router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/overlay", get(get_overlay))
        .route("/api/order", post(post_order))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// GET /api/overlay - Current overlay snapshot
async fn get_overlay(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.engine.snapshot()))
}

/// POST /api/order - One-shot market order
async fn post_order(
    State(state): State<DashboardState>,
    Json(request): Json<OrderRequest>,
) -> impl IntoResponse {
    match state.engine.place_order(request).await {
        Ok(outcome) => Json(ApiResponse::success(outcome)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

/// WebSocket upgrade handler
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<DashboardState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Outgoing message type for WebSocket
enum OutgoingMessage {
    Text(String),
    Pong(Vec<u8>),
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: DashboardState) {
    tracing::info!("🖥️ New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the replay so nothing falls in between
    let mut commands = state.surface.subscribe();
    let mut snapshots = state.engine.subscribe();

    for json in state.surface.replay() {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<OutgoingMessage>(64);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                OutgoingMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutgoingMessage::Pong(data) => sender.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Ok(json) => {
                        if out_tx.send(OutgoingMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagging, replaying state");
                        for json in state.surface.replay() {
                            if out_tx.send(OutgoingMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Ok(json) = serde_json::to_string(&WsMessage::Snapshot(snapshot)) {
                    if out_tx.send(OutgoingMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if out_tx.send(OutgoingMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => handle_client_message(&state, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    tracing::info!("🖥️ WebSocket connection closed");
}

async fn handle_client_message(state: &DashboardState, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed client message");
            return;
        }
    };
    if let ClientMessage::Crosshair(event) = &msg {
        state.surface.inject(*event);
        return;
    }
    if let Some(command) = msg.into_command() {
        if let Err(e) = state.engine.send(command).await {
            tracing::warn!(error = %e, "Client command not delivered");
        }
    }
}
