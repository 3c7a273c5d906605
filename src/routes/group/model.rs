use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::user::model::roles;

pub mod group_types {
    pub const CATEGORY: &str = "category";
    pub const LOCATION: &str = "location";
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub description: String,
    pub group_type: String,
    pub category: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub member_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: String,
    pub group_type: String,
    pub category: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleMembershipRequest {
    pub group_id: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct GroupMember {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub name: String,
    pub description: String,
    pub group_type: String,
    pub category: Option<String>,
    pub location_name: Option<String>,
    pub creator_id: String,
    pub member_count: i32,
}

const GROUP_CACHE_EXPIRE: u64 = 600;
const GROUP_ID_CACHE_PREFIX: &str = "group:id:";

/// The creator's membership is permanent; a toggle by the creator fails
/// instead of shrinking the member set below the creator.
fn ensure_not_creator(group: &Group, user_id: &str) -> Result<(), AppError> {
    if group.creator_id == user_id {
        return Err(AppError::Forbidden("creator cannot leave the group".into()));
    }
    Ok(())
}

fn membership_after_toggle(was_member: bool) -> bool {
    !was_member
}

impl From<Group> for GroupInfo {
    fn from(group: Group) -> Self {
        Self {
            group_id: group.group_id,
            name: group.name,
            description: group.description,
            group_type: group.group_type,
            category: group.category,
            location_name: group.location_name,
            creator_id: group.creator_id,
            member_count: group.member_count,
        }
    }
}

impl Group {
    pub async fn create(
        pool: &PgPool,
        req: CreateGroupRequest,
        creator_id: String,
    ) -> Result<Self, AppError> {
        if req.name.trim().is_empty() {
            return Err(AppError::Validation("name must not be empty".into()));
        }
        match req.group_type.as_str() {
            group_types::CATEGORY => {
                if req.category.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(AppError::Validation(
                        "category is required for category-based groups".into(),
                    ));
                }
            }
            group_types::LOCATION => {
                if req.location_name.as_deref().map(str::trim).unwrap_or("").is_empty()
                    || req.latitude.is_none()
                    || req.longitude.is_none()
                {
                    return Err(AppError::Validation(
                        "location_name, latitude and longitude are required for location-based groups".into(),
                    ));
                }
            }
            _ => {
                return Err(AppError::Validation(
                    "group_type must be 'category' or 'location'".into(),
                ));
            }
        }

        // Only farmers open communities.
        let creator_role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM users WHERE user_id = $1",
        )
        .bind(&creator_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

        if creator_role != roles::FARMER {
            return Err(AppError::Forbidden("only farmers can create groups".into()));
        }

        let group_id = Uuid::new_v4().to_string();

        // The creator membership row lands in the same transaction, so the
        // creator-is-always-a-member invariant holds from the first read.
        let mut tx = pool.begin().await?;

        let group = sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO groups (
                group_id, name, description, group_type, category,
                location_name, latitude, longitude, creator_id, created_at, member_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), 1)
            RETURNING
                group_id, name, description, group_type, category,
                location_name, latitude, longitude, creator_id, created_at, member_count
            "#,
        )
        .bind(&group_id)
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(&req.group_type)
        .bind(&req.category)
        .bind(&req.location_name)
        .bind(req.latitude)
        .bind(req.longitude)
        .bind(&creator_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, joined_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(&group_id)
        .bind(&creator_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(group)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        group_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let cache_key = format!("{}{}", GROUP_ID_CACHE_PREFIX, group_id);

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;

            if let Ok(json_str) = cached {
                if let Ok(group) = serde_json::from_str::<Group>(&json_str) {
                    tracing::debug!("Get group from cache: {}", cache_key);
                    return Ok(Some(group));
                }
            }
        }

        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT
                group_id, name, description, group_type, category,
                location_name, latitude, longitude, creator_id, created_at, member_count
            FROM groups
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(pool)
        .await?;

        if let Some(ref g) = group {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                if let Ok(json_str) = serde_json::to_string(g) {
                    let _: Result<(), redis::RedisError> =
                        conn.set_ex(&cache_key, json_str, GROUP_CACHE_EXPIRE).await;
                    tracing::debug!("Set group to cache: {}", cache_key);
                }
            }
        }

        Ok(group)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Vec<Self>, AppError> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT
                group_id, name, description, group_type, category,
                location_name, latitude, longitude, creator_id, created_at, member_count
            FROM groups
            WHERE name LIKE $1
            "#,
        )
        .bind(format!("%{}%", name))
        .fetch_all(pool)
        .await?;

        Ok(groups)
    }

    pub async fn is_member(
        pool: &PgPool,
        group_id: &str,
        user_id: &str,
    ) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members
                WHERE group_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Idempotent membership flip: a member leaves, a non-member joins.
    /// The add/remove is a single row insert/delete, so concurrent toggles
    /// by the same user cannot lose each other's updates. The creator can
    /// never leave.
    pub async fn toggle_membership(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        group_id: &str,
        user_id: &str,
    ) -> Result<bool, AppError> {
        let group = Self::find_by_id(pool, redis, group_id)
            .await?
            .ok_or_else(|| AppError::NotFound("group not found".into()))?;

        ensure_not_creator(&group, user_id)?;

        let mut tx = pool.begin().await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM group_members
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let was_member = removed > 0;
        if was_member {
            sqlx::query(
                r#"
                UPDATE groups
                SET member_count = member_count - 1
                WHERE group_id = $1
                "#,
            )
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        } else {
            let inserted = sqlx::query(
                r#"
                INSERT INTO group_members (group_id, user_id, joined_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (group_id, user_id) DO NOTHING
                "#,
            )
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted > 0 {
                sqlx::query(
                    r#"
                    UPDATE groups
                    SET member_count = member_count + 1
                    WHERE group_id = $1
                    "#,
                )
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        // Member count changed, drop the stale cached group.
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = format!("{}{}", GROUP_ID_CACHE_PREFIX, group_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }

        Ok(membership_after_toggle(was_member))
    }

    pub async fn members(pool: &PgPool, group_id: &str) -> Result<Vec<GroupMember>, AppError> {
        let members = sqlx::query_as::<_, GroupMember>(
            r#"
            SELECT u.user_id, u.display_name, u.avatar_url, gm.joined_at
            FROM group_members gm
            JOIN users u ON gm.user_id = u.user_id
            WHERE gm.group_id = $1
            ORDER BY gm.joined_at ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_group(creator_id: &str) -> Group {
        Group {
            group_id: "g-1".into(),
            name: "Highland Teff Growers".into(),
            description: "".into(),
            group_type: group_types::CATEGORY.into(),
            category: Some("grains".into()),
            location_name: None,
            latitude: None,
            longitude: None,
            creator_id: creator_id.into(),
            created_at: Utc::now(),
            member_count: 1,
        }
    }

    #[test]
    fn creator_can_never_leave() {
        let group = test_group("farmer-a");
        assert!(matches!(
            ensure_not_creator(&group, "farmer-a"),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn non_creator_passes_the_guard() {
        let group = test_group("farmer-a");
        assert!(ensure_not_creator(&group, "consumer-b").is_ok());
    }

    #[test]
    fn toggle_is_an_idempotent_flip() {
        assert!(!membership_after_toggle(true));
        assert!(membership_after_toggle(false));
        for start in [true, false] {
            assert_eq!(
                membership_after_toggle(membership_after_toggle(start)),
                start
            );
        }
    }
}
