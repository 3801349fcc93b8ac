//! WebSocket Connection Handler
//!
//! Upgrades `GET /ws?token=...`, authenticates the socket and hands it to the
//! connection pumps. Refused sockets are closed with a code the client can act
//! on (see [`HandshakeError::close_code`]).

use std::panic::{catch_unwind, AssertUnwindSafe};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;

use super::auth::TokenVerifier;
use super::connection::{Connection, ConnectionSettings};
use crate::shared::error::HandshakeError;
use crate::startup::AppState;

/// Query parameters accepted on upgrade
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.settings.websocket.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

/// Resolve the user behind a token. Panics inside the verifier are caught
/// and reported as an internal error instead of taking the task down.
pub fn authenticate(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
) -> Result<String, HandshakeError> {
    let token = token.ok_or(HandshakeError::MissingToken)?;

    catch_unwind(AssertUnwindSafe(|| verifier.verify(token))).unwrap_or_else(|_| {
        tracing::error!("Panic while authenticating socket");
        Err(HandshakeError::Internal)
    })
}

/// Handle individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, token: Option<String>, state: AppState) {
    let user_id = match authenticate(state.verifier.as_ref(), token.as_deref()) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::debug!(error = %e, code = e.close_code(), "Socket refused");
            refuse(&mut socket, &e).await;
            return;
        }
    };

    let connection = Connection::open(
        user_id,
        ConnectionSettings::from(&state.settings.websocket),
    );
    tracing::debug!(
        connection_id = %connection.id(),
        user_id = %connection.user_id(),
        "New WebSocket connection"
    );

    // Split socket for concurrent read/write
    let (sink, stream) = socket.split();
    connection
        .serve(state.hub.clone(), state.chat.clone(), sink, stream)
        .await;
}

async fn refuse(socket: &mut WebSocket, error: &HandshakeError) {
    let frame = CloseFrame {
        code: error.close_code(),
        reason: error.to_string().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}
