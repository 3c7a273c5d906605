use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::AppError;
use crate::utils::hash_password;

pub mod roles {
    pub const FARMER: &str = "farmer";
    pub const CONSUMER: &str = "consumer";
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// The view of a user exposed to other clients. Never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PublicProfile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub display_name: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl User {
    pub async fn create(pool: &PgPool, req: RegisterRequest) -> Result<Self, AppError> {
        if req.role != roles::FARMER && req.role != roles::CONSUMER {
            return Err(AppError::Validation(
                "role must be 'farmer' or 'consumer'".into(),
            ));
        }
        if req.display_name.trim().is_empty() {
            return Err(AppError::Validation("display_name must not be empty".into()));
        }

        let password_hash = hash_password(&req.password)
            .map_err(|e| AppError::Enrichment(format!("failed to hash password: {}", e)))?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, display_name, avatar_url, role, password_hash)
            VALUES ($1, $2, NULL, $3, $4)
            RETURNING user_id, display_name, avatar_url, role, password_hash
            "#,
        )
        .bind(&req.user_id)
        .bind(req.display_name.trim())
        .bind(&req.role)
        .bind(&password_hash)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, display_name, avatar_url, role, password_hash
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Profile lookup used for message enrichment. Tolerates a missing user
    /// by returning None rather than an error.
    pub async fn public_profile(
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Option<PublicProfile>, AppError> {
        let profile = sqlx::query_as::<_, PublicProfile>(
            r#"
            SELECT user_id, display_name, avatar_url
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(profile)
    }

    pub async fn update_profile(
        pool: &PgPool,
        user_id: &str,
        req: UpdateProfileRequest,
    ) -> Result<PublicProfile, AppError> {
        if let Some(name) = &req.display_name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("display_name must not be empty".into()));
            }
        }

        let profile = sqlx::query_as::<_, PublicProfile>(
            r#"
            UPDATE users
            SET display_name = COALESCE($2, display_name),
                avatar_url = COALESCE($3, avatar_url)
            WHERE user_id = $1
            RETURNING user_id, display_name, avatar_url
            "#,
        )
        .bind(user_id)
        .bind(req.display_name.as_deref().map(str::trim))
        .bind(&req.avatar_url)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

        Ok(profile)
    }
}
