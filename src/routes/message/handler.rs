use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use super::model::{ChatMessage, Message, MessageType, validate_content};
use crate::AppState;
use crate::error::AppError;
use crate::routes::group::Group;
use crate::utils::{ApiResponse, Claims, success_to_api_response};

#[derive(Debug, Deserialize)]
pub struct SendTextMessageRequest {
    pub message_text: String,
}

/// GET /groups/{group_id}/messages — full ascending history, members only.
#[axum::debug_handler]
pub async fn get_group_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ChatMessage>>>, AppError> {
    Group::find_by_id(&state.pool, &state.redis, &group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;

    if !Group::is_member(&state.pool, &group_id, &claims.sub).await? {
        return Err(AppError::Forbidden(
            "not a member of this group".into(),
        ));
    }

    let messages = Message::history(
        &state.pool,
        &state.redis,
        &group_id,
        state.config.history_cache_secs,
    )
    .await?;

    Ok(success_to_api_response(messages))
}

/// POST /groups/{group_id}/messages — text-only fallback send. Persists and
/// returns the enriched record; does not broadcast to the room (that is the
/// WebSocket path's job).
#[axum::debug_handler]
pub async fn send_group_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<String>,
    Json(req): Json<SendTextMessageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ChatMessage>>), AppError> {
    Group::find_by_id(&state.pool, &state.redis, &group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;

    if !Group::is_member(&state.pool, &group_id, &claims.sub).await? {
        return Err(AppError::Forbidden(
            "not a member of this group".into(),
        ));
    }

    let content = validate_content(MessageType::Text, Some(&req.message_text), None)?;
    let stored = Message::append(&state.pool, &group_id, &claims.sub, content).await?;

    Message::invalidate_history_cache(&state.redis, &group_id).await;

    let enriched = Message::get_enriched(&state.pool, &stored.message_id)
        .await?
        .ok_or_else(|| AppError::Enrichment("sender profile not found".into()))?;

    Ok((StatusCode::CREATED, success_to_api_response(enriched)))
}
