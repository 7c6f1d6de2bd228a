use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use ember_db::models::parse_timestamp;
use ember_types::api::{MessageResponse, SendMessageRequest};
use ember_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::{ApiError, join_error};
use crate::middleware::Claims;

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `sent_at` timestamp of the oldest
    /// message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let cid = chat_id.to_string();
    let uid = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || {
        if !db.is_chat_participant(&cid, &uid)? {
            return Ok(None);
        }
        db.get_messages(&cid, limit, before.as_deref()).map(Some)
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Unavailable)?
    .ok_or(ApiError::Unauthorized)?;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| MessageResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt message id '{}': {}", row.id, e);
                Uuid::default()
            }),
            chat_id,
            sender_id: row.sender_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt sender id '{}' on message '{}': {}", row.sender_id, row.id, e);
                Uuid::default()
            }),
            sender_username: row.sender_username,
            content: row.content,
            sent_at: parse_timestamp(&row.sent_at),
            read_at: row.read_at.as_deref().map(parse_timestamp),
        })
        .collect();

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.is_empty() || req.content.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::Invalid("message must be 1-4000 bytes".into()));
    }

    let message_id = Uuid::new_v4();
    let sender_id = claims.sub;

    // Persist first; the relay below is best-effort and the stored copy is
    // what reconnecting clients fetch.
    let db = state.db.clone();
    let cid = chat_id.to_string();
    let uid = sender_id.to_string();
    let mid = message_id.to_string();
    let body = req.content.clone();
    let participants = tokio::task::spawn_blocking(move || {
        if !db.is_chat_participant(&cid, &uid)? {
            return Ok(None);
        }
        db.insert_message(&mid, &cid, &uid, &body)?;
        db.chat_participants(&cid)
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Unavailable)?
    .ok_or(ApiError::Unauthorized)?;

    let now = chrono::Utc::now();
    let event = GatewayEvent::MessageCreate {
        id: message_id,
        chat_id,
        sender_id,
        sender_username: claims.username.clone(),
        content: req.content.clone(),
        sent_at: now,
    };
    state.gateway.relay.deliver_to_room(chat_id, &event);

    for participant in [participants.0, participants.1] {
        if let Ok(pid) = participant.parse::<Uuid>() {
            if pid != sender_id {
                state.gateway.relay.offline_fallback(pid, &event);
            }
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            chat_id,
            sender_id,
            sender_username: claims.username.clone(),
            content: req.content,
            sent_at: now,
            read_at: None,
        }),
    ))
}
