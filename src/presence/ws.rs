//! The `user-status` WebSocket: a connection whose only job is existing.
//!
//! While the socket stays open the user counts as online; the record is
//! removed on any kind of disconnect and the TTL catches the rest. The
//! session also sits on the shared `online_users` topic so future presence
//! broadcasts have somewhere to land; no inbound application messages are
//! expected on this channel.

use axum::debug_handler;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::Topic;
use crate::error::{AppError, AppResult};
use crate::{auth, AppState};

#[debug_handler]
pub async fn user_status_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user = auth::authenticate(&state.verifier, &state.db_pool, &headers)
        .await
        .ok_or(AppError::AuthRejected)?;

    // Presence degrades instead of denying: a flaky backend should not
    // keep the user from connecting.
    if let Err(e) = state.presence.mark_online(user.id).await {
        warn!(user_id = user.id, error = %e, "could not mark user online");
    }

    let session = Uuid::now_v7();
    info!(user_id = user.id, %session, "presence session online");

    Ok(ws.on_upgrade(move |socket| run(state, socket, user.id, session)))
}

async fn run(state: AppState, socket: WebSocket, user_id: i64, session: Uuid) {
    // Deferred past the upgrade so a client lost mid-handshake never
    // occupies the topic map. `online_users` sees no regular publishes, so
    // an abandoned entry there would otherwise linger indefinitely.
    let mut events = state.topics.subscribe(Topic::OnlineUsers, session).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Nothing meaningful arrives here; drain and ignore.
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Some(event) => {
                    let Ok(frame) = serde_json::to_string(&*event) else {
                        continue;
                    };
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Unregister before the task is considered torn down, so no stale
    // presence or dead subscriber outlives the socket.
    if let Err(e) = state.presence.mark_offline(user_id).await {
        warn!(user_id, error = %e, "could not mark user offline");
    }
    state.topics.unsubscribe(&Topic::OnlineUsers, &session).await;
    info!(user_id, %session, "presence session closed");
}
