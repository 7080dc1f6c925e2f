// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::handlers;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};
use crate::session::ConnectionId;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Router,
};
use chatroom_common::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

/// Create the application router: the WebSocket endpoint plus the room API
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.settings.cors_origin.as_deref());

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .merge(handlers::rooms::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(_)) => {
            warn!("cors_origin is not a valid header value, allowing any origin");
            layer.allow_origin(Any)
        },
        None => layer.allow_origin(Any),
    }
}

/// Handler for WebSocket connections
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Runs the coordinator's disconnect if the connection task is dropped
/// before it could do so itself.
struct DisconnectGuard {
    coordinator: Option<Arc<Coordinator>>,
    connection_id: ConnectionId,
}

impl DisconnectGuard {
    fn new(coordinator: Arc<Coordinator>, connection_id: ConnectionId) -> Self {
        Self {
            coordinator: Some(coordinator),
            connection_id,
        }
    }

    async fn disconnect(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.disconnect(self.connection_id).await;
        }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        let connection_id = self.connection_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { coordinator.disconnect(connection_id).await });
            },
            Err(_) => error!(%connection_id, "no runtime left to close the session"),
        }
    }
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();

    // Events queued for this client, written by a dedicated task
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerEvent>(state.settings.outbound_buffer);

    let coordinator = state.coordinator.clone();
    let connection_id = coordinator.connect(outbound_tx);
    let guard = DisconnectGuard::new(coordinator.clone(), connection_id);

    ::metrics::counter!(WS_CONNECTION).increment(1);
    ::metrics::gauge!(WS_ACTIVE).increment(1.0);
    info!(%connection_id, "user connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "failed to serialize event");
                    continue;
                },
            };
            if tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = rx.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!(%connection_id, error = %e, "websocket read failed");
                break;
            },
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => coordinator.dispatch(connection_id, event).await,
                Err(e) => {
                    coordinator.emit_error(connection_id, format!("Malformed event: {e}"));
                },
            },
            Message::Close(_) => break,
            _ => {}, // pings are answered by axum; binary frames are not part of the protocol
        }
    }

    guard.disconnect().await;

    ::metrics::counter!(WS_DISCONNECTION).increment(1);
    ::metrics::gauge!(WS_ACTIVE).decrement(1.0);
    info!(%connection_id, "user disconnected");

    send_task.abort();
}
