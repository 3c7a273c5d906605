use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use super::model::{CreateGroupRequest, Group, GroupInfo, GroupMember, ToggleMembershipRequest};
use crate::AppState;
use crate::error::AppError;
use crate::utils::{ApiResponse, Claims, success_to_api_response};

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub group_id: String,
}

#[axum::debug_handler]
pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GroupInfo>>), AppError> {
    let group = Group::create(&state.pool, req, claims.sub).await?;
    Ok((
        StatusCode::CREATED,
        success_to_api_response(GroupInfo::from(group)),
    ))
}

#[axum::debug_handler]
pub async fn find_by_id(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Json<ApiResponse<GroupInfo>>, AppError> {
    let group = Group::find_by_id(&state.pool, &state.redis, &query.group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;

    Ok(success_to_api_response(GroupInfo::from(group)))
}

#[axum::debug_handler]
pub async fn find_by_name(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<ApiResponse<Vec<GroupInfo>>>, AppError> {
    let groups = Group::find_by_name(&state.pool, &query.name).await?;
    let group_infos = groups.into_iter().map(GroupInfo::from).collect::<Vec<_>>();
    Ok(success_to_api_response(group_infos))
}

#[axum::debug_handler]
pub async fn toggle_membership(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleMembershipRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let is_member =
        Group::toggle_membership(&state.pool, &state.redis, &req.group_id, &claims.sub).await?;

    Ok(success_to_api_response(serde_json::json!({
        "is_member": is_member
    })))
}

#[axum::debug_handler]
pub async fn list_members(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<GroupMember>>>, AppError> {
    Group::find_by_id(&state.pool, &state.redis, &group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;

    let members = Group::members(&state.pool, &group_id).await?;
    Ok(success_to_api_response(members))
}
