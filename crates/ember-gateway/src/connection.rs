use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use ember_types::events::{GatewayCommand, GatewayEvent};

use crate::Gateway;
use crate::sessions::SessionSender;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to present its Identify token.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_MESSAGE_LEN: usize = 4000;

/// Handle a single WebSocket connection: Identify handshake, session
/// registration, heartbeat loop, command dispatch, guaranteed cleanup.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Register the session and go online
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    gateway.sessions.register(session_id, user_id, tx);
    gateway.presence.mark_online(user_id);

    // Step 3: Send Ready
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let ready_ok = match serde_json::to_string(&ready) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    };
    if !ready_ok {
        cleanup(&gateway, session_id, user_id);
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let gateway_recv = gateway.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&gateway_recv, session_id, user_id, &username_recv, cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            log_snippet(&text)
                        );
                        reply(
                            &gateway_recv,
                            session_id,
                            GatewayEvent::Error {
                                message: "malformed command".into(),
                            },
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    // Each heartbeat round-trip refreshes the online marker
                    gateway_recv.presence.mark_online(user_id);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    cleanup(&gateway, session_id, user_id);
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Runs on every exit path once the session was registered: drop the
/// session, drop the presence marker when no other device remains, and
/// tell the rooms the session was in.
fn cleanup(gateway: &Gateway, session_id: Uuid, user_id: Uuid) {
    let Some((_, rooms)) = gateway.sessions.unregister(session_id) else {
        return;
    };

    // Another device may still be connected
    if gateway.sessions.sessions_for_user(user_id).is_empty() {
        gateway.presence.mark_offline(user_id);
    }

    for room in rooms {
        gateway.relay.deliver_to_room(
            room,
            &GatewayEvent::PresenceUpdate {
                chat_id: room,
                user_id,
                online: false,
            },
        );
    }
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use ember_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Truncate raw client input for logging. Floors to a char boundary so a
/// multibyte character straddling the cutoff cannot panic the slice.
fn log_snippet(text: &str) -> &str {
    const MAX_LOG_BYTES: usize = 200;
    if text.len() <= MAX_LOG_BYTES {
        return text;
    }
    let mut end = MAX_LOG_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn reply(gateway: &Gateway, session_id: Uuid, event: GatewayEvent) {
    if let Some(tx) = gateway.sessions.sender(session_id) {
        let _ = tx.send(event);
    }
}

fn reply_error(tx: &Option<SessionSender>, message: &str) {
    if let Some(tx) = tx {
        let _ = tx.send(GatewayEvent::Error {
            message: message.into(),
        });
    }
}

async fn handle_command(
    gateway: &Gateway,
    session_id: Uuid,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    let own_tx = gateway.sessions.sender(session_id);

    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinRoom { chat_id } => {
            let db = gateway.db.clone();
            let allowed = tokio::task::spawn_blocking(move || {
                db.is_chat_participant(&chat_id.to_string(), &user_id.to_string())
            })
            .await;

            match allowed {
                Ok(Ok(true)) => {
                    gateway.sessions.join_room(session_id, chat_id);
                    info!("{} ({}) joined room {}", username, user_id, chat_id);
                    reply(gateway, session_id, GatewayEvent::RoomJoined { chat_id });
                    gateway.relay.deliver_to_room(
                        chat_id,
                        &GatewayEvent::PresenceUpdate {
                            chat_id,
                            user_id,
                            online: true,
                        },
                    );
                }
                Ok(Ok(false)) => {
                    warn!("{} ({}) denied room {}", username, user_id, chat_id);
                    reply_error(&own_tx, "not a participant of this chat");
                }
                Ok(Err(e)) => {
                    error!("Participant check failed for {}: {}", chat_id, e);
                    reply_error(&own_tx, "storage unavailable");
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    reply_error(&own_tx, "storage unavailable");
                }
            }
        }

        GatewayCommand::LeaveRoom { chat_id } => {
            gateway.sessions.leave_room(session_id, chat_id);
        }

        GatewayCommand::SendMessage { chat_id, content } => {
            if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
                reply_error(&own_tx, "message must be 1-4000 bytes");
                return;
            }

            let db = gateway.db.clone();
            let message_id = Uuid::new_v4();
            let body = content.clone();
            let persisted = tokio::task::spawn_blocking(move || {
                let cid = chat_id.to_string();
                let uid = user_id.to_string();
                if !db.is_chat_participant(&cid, &uid)? {
                    return Ok(None);
                }
                db.insert_message(&message_id.to_string(), &cid, &uid, &body)?;
                db.chat_participants(&cid)
            })
            .await;

            let participants = match persisted {
                Ok(Ok(Some(pair))) => pair,
                Ok(Ok(None)) => {
                    reply_error(&own_tx, "not a participant of this chat");
                    return;
                }
                Ok(Err(e)) => {
                    error!("Failed to persist message in {}: {}", chat_id, e);
                    reply_error(&own_tx, "storage unavailable");
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    reply_error(&own_tx, "storage unavailable");
                    return;
                }
            };

            let event = GatewayEvent::MessageCreate {
                id: message_id,
                chat_id,
                sender_id: user_id,
                sender_username: username.to_string(),
                content,
                sent_at: chrono::Utc::now(),
            };
            gateway.relay.deliver_to_room(chat_id, &event);

            // The counterpart may not be connected at all; the durable copy
            // is already written, so this only decides whether to ping them.
            for participant in [participants.0, participants.1] {
                if let Ok(pid) = participant.parse::<Uuid>() {
                    if pid != user_id {
                        gateway.relay.offline_fallback(pid, &event);
                    }
                }
            }
        }

        GatewayCommand::Typing { chat_id, is_typing } => {
            if !gateway.sessions.is_in_room(session_id, chat_id) {
                return;
            }
            gateway.relay.deliver_to_room(
                chat_id,
                &GatewayEvent::Typing {
                    chat_id,
                    user_id,
                    is_typing,
                },
            );
        }

        GatewayCommand::MarkRead { message_id } => {
            let db = gateway.db.clone();
            let marked = tokio::task::spawn_blocking(move || {
                db.mark_message_read(&message_id.to_string(), &user_id.to_string())
            })
            .await;

            match marked {
                Ok(Ok(Some((chat_id, sender_id)))) => {
                    let (Ok(chat_id), Ok(sender_id)) =
                        (chat_id.parse::<Uuid>(), sender_id.parse::<Uuid>())
                    else {
                        return;
                    };
                    gateway.relay.deliver_to_user(
                        sender_id,
                        &GatewayEvent::MessageRead {
                            message_id,
                            chat_id,
                        },
                    );
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!("Failed to mark {} read: {}", message_id, e),
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }

        GatewayCommand::CallSignal {
            target_user_id,
            signal,
        } => {
            info!(
                "{} ({}) -> call signal to {}",
                username, user_id, target_user_id
            );
            gateway.relay.deliver_to_user(
                target_user_id,
                &GatewayEvent::CallSignal {
                    from_user_id: user_id,
                    signal,
                },
            );
        }

        GatewayCommand::EndCall { target_user_id } => {
            info!("{} ({}) hung up on {}", username, user_id, target_user_id);
            gateway.relay.deliver_to_user(
                target_user_id,
                &GatewayEvent::CallEnded {
                    from_user_id: user_id,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::log_snippet;

    #[test]
    fn log_snippet_never_splits_a_multibyte_char() {
        // A three-byte char straddling the 200-byte cutoff
        let mut raw = "a".repeat(199);
        raw.push('€');
        raw.push_str(&"b".repeat(50));

        let snippet = log_snippet(&raw);
        assert_eq!(snippet, "a".repeat(199));
    }

    #[test]
    fn log_snippet_passes_short_input_through() {
        assert_eq!(log_snippet("not json"), "not json");

        let exact = "x".repeat(200);
        assert_eq!(log_snippet(&exact), exact);

        let long = "x".repeat(300);
        assert_eq!(log_snippet(&long), "x".repeat(200));
    }
}
