use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{future, SinkExt, StreamExt};
use tower_http::cors::CorsLayer;

use crate::connection::{serve, QueueCapacity};
use crate::hub::HubHandle;
use crate::states::Services;

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub services: Services,
    pub capacity: QueueCapacity,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, app_state))
}

/// The game endpoint at `/ws`.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (sink, stream) = socket.split();

    // A Close frame and a transport error both end the inbound stream
    let inbound = stream
        .take_while(|frame| {
            let open = match frame {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    false
                }
            };
            future::ready(open)
        })
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
                _ => None, // ping/pong
            })
        });
    let outbound =
        sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));

    serve(
        Box::pin(inbound),
        Box::pin(outbound),
        app_state.hub,
        app_state.services,
        app_state.capacity,
    )
    .await;
}
