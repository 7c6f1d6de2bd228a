use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use ember_db::models::parse_timestamp;
use ember_types::api::{MatchResponse, SwipeRequest, SwipeResponse};
use ember_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::{ApiError, join_error};
use crate::middleware::Claims;

pub async fn swipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SwipeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let actor_id = claims.sub;
    let target_id = req.target_id;

    let outcome =
        tokio::task::spawn_blocking(move || engine.swipe(actor_id, target_id, req.liked))
            .await
            .map_err(join_error)??;

    // Tell both sides the moment the match forms. Whoever is offline gets
    // the notification-gateway fallback instead of a live event.
    if outcome.newly_matched {
        if let (Some(match_id), Some(chat_id)) = (outcome.match_id, outcome.chat_id) {
            let db = state.db.clone();
            let target_name =
                tokio::task::spawn_blocking(move || db.get_username_by_id(&target_id.to_string()))
                    .await
                    .map_err(join_error)?
                    .map_err(ApiError::Unavailable)?;

            state.gateway.relay.deliver_to_user(
                actor_id,
                &GatewayEvent::MatchCreated {
                    match_id,
                    chat_id,
                    other_user_id: target_id,
                    other_username: target_name,
                },
            );
            state.gateway.relay.deliver_to_user(
                target_id,
                &GatewayEvent::MatchCreated {
                    match_id,
                    chat_id,
                    other_user_id: actor_id,
                    other_username: claims.username.clone(),
                },
            );
        }
    }

    Ok(Json(SwipeResponse {
        matched: outcome.matched,
        match_id: outcome.match_id,
        chat_id: outcome.chat_id,
    }))
}

pub async fn unmatch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(match_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let requester_id = claims.sub;

    let torn = tokio::task::spawn_blocking(move || engine.unmatch(match_id, requester_id))
        .await
        .map_err(join_error)??;

    state
        .gateway
        .relay
        .deliver_to_user(torn.other_user_id, &GatewayEvent::Unmatched { match_id });

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let user_id = claims.sub;

    let rows = tokio::task::spawn_blocking(move || engine.matches_for_user(user_id))
        .await
        .map_err(join_error)??;

    let matches: Vec<MatchResponse> = rows
        .into_iter()
        .map(|row| MatchResponse {
            match_id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt match id '{}': {}", row.id, e);
                Uuid::default()
            }),
            chat_id: row.chat_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt chat id '{}' on match '{}': {}", row.chat_id, row.id, e);
                Uuid::default()
            }),
            other_user_id: row.other_user_id.parse().unwrap_or_else(|e| {
                warn!(
                    "Corrupt user id '{}' on match '{}': {}",
                    row.other_user_id, row.id, e
                );
                Uuid::default()
            }),
            other_username: row.other_username,
            matched_at: parse_timestamp(&row.matched_at),
        })
        .collect();

    Ok(Json(matches))
}
