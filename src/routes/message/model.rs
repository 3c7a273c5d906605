use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Audio,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "audio" => Some(MessageType::Audio),
            _ => None,
        }
    }
}

/// A message as stored. Append-only: rows are never updated or deleted.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub message_id: String,
    pub seq: i64,
    pub group_id: String,
    pub sender_id: String,
    pub message_type: String,
    pub message_text: Option<String>,
    pub file_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A stored message enriched with the sender's public profile, ready for
/// direct client consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub group_id: String,
    pub sender: SenderProfile,
    pub message_type: MessageType,
    pub message_text: Option<String>,
    pub file_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct EnrichedRow {
    message_id: String,
    seq: i64,
    group_id: String,
    sender_id: String,
    display_name: String,
    avatar_url: Option<String>,
    message_type: String,
    message_text: Option<String>,
    file_url: Option<String>,
    sent_at: DateTime<Utc>,
}

impl TryFrom<EnrichedRow> for ChatMessage {
    type Error = AppError;

    fn try_from(row: EnrichedRow) -> Result<Self, AppError> {
        let message_type = MessageType::parse(&row.message_type).ok_or_else(|| {
            AppError::Enrichment(format!("unknown message type: {}", row.message_type))
        })?;
        Ok(ChatMessage {
            message_id: row.message_id,
            group_id: row.group_id,
            sender: SenderProfile {
                user_id: row.sender_id,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
            },
            message_type,
            message_text: row.message_text,
            file_url: row.file_url,
            sent_at: row.sent_at,
        })
    }
}

/// Message body after validation: exactly one of text / file URL populated,
/// consistent with the type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedContent {
    pub message_type: MessageType,
    pub message_text: Option<String>,
    pub file_url: Option<String>,
}

pub fn validate_content(
    message_type: MessageType,
    message_text: Option<&str>,
    file_url: Option<&str>,
) -> Result<ValidatedContent, AppError> {
    match message_type {
        MessageType::Text => {
            let text = message_text.map(str::trim).unwrap_or("");
            if text.is_empty() {
                return Err(AppError::Validation("messageText must not be empty".into()));
            }
            Ok(ValidatedContent {
                message_type,
                message_text: Some(text.to_string()),
                file_url: None,
            })
        }
        MessageType::Image | MessageType::Audio => {
            let url = file_url.map(str::trim).unwrap_or("");
            if url.is_empty() {
                return Err(AppError::Validation(
                    "fileUrl is required for image and audio messages".into(),
                ));
            }
            Ok(ValidatedContent {
                message_type,
                message_text: None,
                file_url: Some(url.to_string()),
            })
        }
    }
}

const HISTORY_CACHE_PREFIX: &str = "msg:history:";

/// History order: ascending sent time, with `seq` (physical insertion
/// order) breaking ties between equal timestamps.
fn history_order(a: &EnrichedRow, b: &EnrichedRow) -> std::cmp::Ordering {
    a.sent_at.cmp(&b.sent_at).then_with(|| a.seq.cmp(&b.seq))
}

impl Message {
    /// Durable append. The timestamp is assigned by the database at write
    /// time; `seq` records physical insertion order and breaks timestamp
    /// ties in history reads.
    pub async fn append(
        pool: &PgPool,
        group_id: &str,
        sender_id: &str,
        content: ValidatedContent,
    ) -> Result<Self, AppError> {
        let message_id = Uuid::new_v4().to_string();

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (message_id, group_id, sender_id, message_type, message_text, file_url, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING message_id, seq, group_id, sender_id, message_type, message_text, file_url, sent_at
            "#,
        )
        .bind(&message_id)
        .bind(group_id)
        .bind(sender_id)
        .bind(content.message_type.as_str())
        .bind(&content.message_text)
        .bind(&content.file_url)
        .fetch_one(pool)
        .await?;

        Ok(message)
    }

    /// Read-after-write enrichment: join the sender's public profile fields.
    /// Returns None when the sender no longer exists.
    pub async fn get_enriched(
        pool: &PgPool,
        message_id: &str,
    ) -> Result<Option<ChatMessage>, AppError> {
        let row = sqlx::query_as::<_, EnrichedRow>(
            r#"
            SELECT
                m.message_id, m.seq, m.group_id, m.sender_id,
                u.display_name, u.avatar_url,
                m.message_type, m.message_text, m.file_url, m.sent_at
            FROM messages m
            JOIN users u ON m.sender_id = u.user_id
            WHERE m.message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(pool)
        .await?;

        row.map(ChatMessage::try_from).transpose()
    }

    /// Full group history, ascending by sent time, insertion order breaking
    /// ties. Served from the redis cache when fresh.
    pub async fn history(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        group_id: &str,
        cache_secs: u64,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let cache_key = format!("{}{}", HISTORY_CACHE_PREFIX, group_id);

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;

            if let Ok(json_str) = cached {
                if let Ok(messages) = serde_json::from_str::<Vec<ChatMessage>>(&json_str) {
                    tracing::debug!("Get history from cache: {}", cache_key);
                    return Ok(messages);
                }
            }
        }

        let mut rows = sqlx::query_as::<_, EnrichedRow>(
            r#"
            SELECT
                m.message_id, m.seq, m.group_id, m.sender_id,
                u.display_name, u.avatar_url,
                m.message_type, m.message_text, m.file_url, m.sent_at
            FROM messages m
            JOIN users u ON m.sender_id = u.user_id
            WHERE m.group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;

        rows.sort_by(history_order);

        let messages = rows
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            if let Ok(json_str) = serde_json::to_string(&messages) {
                let _: Result<(), redis::RedisError> =
                    conn.set_ex(&cache_key, json_str, cache_secs).await;
                tracing::debug!("Set history to cache: {}", cache_key);
            }
        }

        Ok(messages)
    }

    /// Drop the cached history after an append so the next read sees the
    /// new message.
    pub async fn invalidate_history_cache(redis: &Arc<RedisClient>, group_id: &str) {
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = format!("{}{}", HISTORY_CACHE_PREFIX, group_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_is_trimmed() {
        let content =
            validate_content(MessageType::Text, Some("  hello market  "), None).unwrap();
        assert_eq!(content.message_text.as_deref(), Some("hello market"));
        assert_eq!(content.file_url, None);
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(validate_content(MessageType::Text, Some("   "), None).is_err());
        assert!(validate_content(MessageType::Text, None, None).is_err());
    }

    #[test]
    fn image_requires_file_url() {
        assert!(validate_content(MessageType::Image, None, None).is_err());
        assert!(validate_content(MessageType::Audio, Some("ignored"), None).is_err());
    }

    #[test]
    fn media_message_drops_text() {
        let content = validate_content(
            MessageType::Image,
            Some("caption that should not persist"),
            Some("https://cdn.example.com/tomatoes.jpg"),
        )
        .unwrap();
        assert_eq!(content.message_text, None);
        assert_eq!(
            content.file_url.as_deref(),
            Some("https://cdn.example.com/tomatoes.jpg")
        );
    }

    fn history_row(seq: i64, sent_at: DateTime<Utc>) -> EnrichedRow {
        EnrichedRow {
            message_id: format!("m-{}", seq),
            seq,
            group_id: "g-1".into(),
            sender_id: "farmer-a".into(),
            display_name: "Abebe".into(),
            avatar_url: None,
            message_type: "text".into(),
            message_text: Some("hello".into()),
            file_url: None,
            sent_at,
        }
    }

    #[test]
    fn history_is_non_decreasing_in_sent_at() {
        let base = Utc::now();
        let mut rows = vec![
            history_row(3, base + chrono::Duration::seconds(2)),
            history_row(1, base),
            history_row(2, base + chrono::Duration::seconds(1)),
        ];
        rows.sort_by(history_order);

        let order: Vec<i64> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(rows.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let at = Utc::now();
        let mut rows = vec![history_row(7, at), history_row(5, at), history_row(6, at)];
        rows.sort_by(history_order);

        let order: Vec<i64> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(order, vec![5, 6, 7]);
    }

    #[test]
    fn message_type_round_trip() {
        for (s, t) in [
            ("text", MessageType::Text),
            ("image", MessageType::Image),
            ("audio", MessageType::Audio),
        ] {
            assert_eq!(MessageType::parse(s), Some(t));
            assert_eq!(t.as_str(), s);
        }
        assert_eq!(MessageType::parse("video"), None);
    }
}
