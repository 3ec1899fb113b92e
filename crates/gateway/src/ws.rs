//! WebSocket endpoint for client devices.
//!
//! Flow:
//! 1. Client connects to `/v1/ws`
//! 2. Client sends `join` (with a credential for members, without for guests)
//! 3. Gateway replies `joined-ack`, or `error` + close on a bad credential
//! 4. Message loop: inbound frames are handled strictly in arrival order;
//!    outbound frames flow from the engine through a bounded queue
//! 5. On close the engine runs disconnect handling (walk cleanup etc.)

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use st_domain::error::Error;
use st_protocol::{ClientMessage, ServerMessage};

use crate::state::AppState;

/// Close code for a rejected credential (policy violation).
const CLOSE_POLICY: u16 = 1008;

/// GET /v1/ws: upgrade to WebSocket.
pub async fn client_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let connection_id = uuid::Uuid::new_v4().to_string();

    // 1. Wait for join.
    let timeout = Duration::from_secs(state.config.server.join_timeout_secs);
    let Some(join) = wait_for_join(&mut ws_stream, timeout).await else {
        tracing::debug!(connection_id = %connection_id, "socket closed before join");
        return;
    };

    // 2. Outbound queue, drained by the writer task.
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerMessage>(state.config.server.outbound_queue);

    // 3. Resolve identity and register.
    let identity = match state
        .engine
        .connect(
            &connection_id,
            join.credential.as_deref(),
            join.username.as_deref(),
            outbound_tx,
        )
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "join rejected");
            reject(&mut ws_sink, &e).await;
            return;
        }
    };

    // Writer task: forwards outbound queue messages to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: one frame at a time, in arrival order.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => state.engine.handle(&connection_id, client_msg).await,
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "unparseable frame");
                    state
                        .engine
                        .send(&connection_id, ServerMessage::error(&Error::Json(e)));
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // axum answers WS-level pings itself.
                state.engine.registry().touch(&connection_id);
            }
            Message::Binary(_) => {
                tracing::debug!(connection_id = %connection_id, "ignoring binary frame");
            }
        }
    }

    // Cleanup: deregister (drops the last queue sender), then stop the writer.
    state.engine.disconnect(&connection_id).await;
    writer.abort();
    tracing::info!(
        connection_id = %connection_id,
        identity_id = %identity.id,
        "socket closed"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct JoinData {
    credential: Option<String>,
    username: Option<String>,
}

/// Wait for the `join` frame, ignoring anything else sent before it.
async fn wait_for_join(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    timeout: Duration,
) -> Option<JoinData> {
    let join = tokio::time::timeout(timeout, async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(ClientMessage::Join {
                        credential,
                        username,
                    }) = serde_json::from_str::<ClientMessage>(&text)
                    {
                        return Some(JoinData {
                            credential,
                            username,
                        });
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    join.unwrap_or(None)
}

async fn reject(sink: &mut (impl SinkExt<Message> + Unpin), err: &Error) {
    let _ = send_ws_message(sink, &ServerMessage::error(err)).await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: err.kind().into(),
        })))
        .await;
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
