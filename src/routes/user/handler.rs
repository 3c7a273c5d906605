use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use super::model::{
    LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UpdateProfileRequest, User,
};
use crate::AppState;
use crate::error::AppError;
use crate::utils::{
    ApiResponse, Claims, generate_token, success_to_api_response, verify_password,
};

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub user_id: String,
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegisterResponse>>), AppError> {
    if !req.user_id.chars().all(|c| c.is_alphanumeric() || c == '_') || req.user_id.is_empty() {
        return Err(AppError::Validation(
            "user_id may only contain letters, digits and underscores".into(),
        ));
    }

    let user = match User::create(&state.pool, req).await {
        Ok(user) => user,
        Err(AppError::Storage(sqlx::Error::Database(db))) if db.is_unique_violation() => {
            return Err(AppError::Conflict("user already exists".into()));
        }
        Err(e) => return Err(e),
    };

    let (token, _) = generate_token(&user.user_id, &state.config)
        .map_err(|e| AppError::Enrichment(format!("failed to generate token: {}", e)))?;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(RegisterResponse {
            user_id: user.user_id,
            display_name: user.display_name,
            token,
        }),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, AppError> {
    let user = User::find_by_id(&state.pool, &req.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|e| AppError::Enrichment(format!("password verification failed: {}", e)))?;
    if !valid {
        return Err(AppError::Unauthorized);
    }

    let (token, _) = generate_token(&user.user_id, &state.config)
        .map_err(|e| AppError::Enrichment(format!("failed to generate token: {}", e)))?;

    Ok(success_to_api_response(LoginResponse {
        user_id: user.user_id,
        token,
    }))
}

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<ApiResponse<super::PublicProfile>>, AppError> {
    let profile = User::public_profile(&state.pool, &query.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    Ok(success_to_api_response(profile))
}

#[axum::debug_handler]
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<super::PublicProfile>>, AppError> {
    let profile = User::update_profile(&state.pool, &claims.sub, req).await?;
    Ok(success_to_api_response(profile))
}
