//! Per-connection chat session.
//!
//! The handshake settles everything up front: resolve the bearer token,
//! check the room exists, check membership, and only then accept the
//! upgrade. A denied connection never reaches the socket stage and gets a
//! distinct refusal reason. The topic subscription waits for the upgrade to
//! complete, so a client that vanishes mid-handshake leaves nothing behind
//! to garbage-collect. After that the session is a single task
//! multiplexing two streams: frames from its own client
//! (validate, persist, publish) and events from the topic (serialize, write
//! out). Per-message failures answer the sender with an error frame and
//! leave the session open; only the transport closing ends it.

use std::sync::Arc;

use axum::debug_handler;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::{RoomEvent, Topic};
use crate::error::{AppError, AppResult};
use crate::notify::MessageNotice;
use crate::store::users::User;
use crate::store::{chats, messages};
use crate::{auth, AppState};

/// The one inbound frame shape the protocol recognizes.
#[derive(Debug, Deserialize)]
struct Inbound {
    message: String,
}

#[derive(Debug, Serialize)]
struct Outbound<'a> {
    message: &'a str,
    username: &'a str,
}

#[derive(Debug, Serialize)]
struct ErrorFrame<'a> {
    error: &'a str,
}

#[debug_handler]
pub async fn chat_ws(
    Path(chat_id): Path<i64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user = auth::authenticate(&state.verifier, &state.db_pool, &headers)
        .await
        .ok_or(AppError::AuthRejected)?;

    let chat = chats::chat(&state.db_pool, chat_id)
        .await?
        .ok_or(AppError::RoomNotFound)?;

    // Re-checked on every connection attempt. Open sessions are not
    // revisited; a removal bites when the user next connects.
    if !chats::is_member(&state.db_pool, chat.id, user.id).await? {
        return Err(AppError::NotMember);
    }

    let session = Uuid::now_v7();
    info!(chat_id = chat.id, user_id = user.id, %session, "chat session joined");

    Ok(ws.on_upgrade(move |socket| run(state, socket, user, chat.id, session)))
}

async fn run(state: AppState, socket: WebSocket, user: User, chat_id: i64, session: Uuid) {
    // Subscribed only once the upgrade has completed; an event published in
    // the handshake window is missed, which the fan-out contract allows.
    let topic = Topic::Chat(chat_id);
    let mut events = state.topics.subscribe(topic.clone(), session).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if handle_inbound(&state, &mut sink, &user, chat_id, text.as_str())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Pings are answered by axum; binary frames are not part
                // of the protocol.
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Some(event) => {
                    let RoomEvent::Message { message, username, .. } = &*event;
                    let Ok(frame) = serde_json::to_string(&Outbound { message, username }) else {
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

    state.topics.unsubscribe(&topic, &session).await;
    info!(chat_id, user_id = user.id, %session, "chat session closed");
}

/// One inbound text frame: validate, persist, publish, notify. Errors are
/// reported back to this client only; Err here means the socket itself is
/// gone and the session should wind down.
async fn handle_inbound(
    state: &AppState,
    sink: &mut SplitSink<WebSocket, Message>,
    user: &User,
    chat_id: i64,
    text: &str,
) -> Result<(), axum::Error> {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(_) => {
            // Session-local: the frame is refused, the connection lives on.
            return send_error(sink, "malformed frame: expected {\"message\": \"...\"}").await;
        }
    };

    let stored = match messages::create(&state.db_pool, chat_id, user.id, &inbound.message).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(chat_id, user_id = user.id, error = %e, "message persist failed");
            // Nothing is published for content that never made it to disk.
            return send_error(sink, "message not delivered, try again").await;
        }
    };

    state
        .topics
        .publish(
            &Topic::Chat(chat_id),
            RoomEvent::Message {
                message: inbound.message,
                username: user.username.clone(),
                sender_id: user.id,
            },
        )
        .await;

    // Fire-and-forget; a notification failure never touches delivery.
    let notify = Arc::clone(&state.notify);
    let pool = state.db_pool.clone();
    let sender_id = user.id;
    let sender_username = user.username.clone();
    tokio::spawn(async move {
        let recipients = match chats::member_ids(&pool, chat_id).await {
            Ok(ids) => ids.into_iter().filter(|id| *id != sender_id).collect(),
            Err(e) => {
                warn!(chat_id, error = %e, "could not resolve notification recipients");
                return;
            }
        };
        notify
            .message_stored(MessageNotice {
                chat_id,
                message_id: stored.id,
                sender_id,
                sender_username,
                recipients,
            })
            .await;
    });

    Ok(())
}

async fn send_error(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: &str,
) -> Result<(), axum::Error> {
    let frame = serde_json::to_string(&ErrorFrame { error: reason })
        .unwrap_or_else(|_| String::from("{\"error\":\"internal\"}"));
    sink.send(Message::Text(frame.into())).await
}
