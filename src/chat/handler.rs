//! WebSocket gateway and broadcast coordinator. Each connection runs its
//! own task; a bad message is reported to its sender and never disturbs
//! other connections. The flow per message is persist → enrich → fan-out,
//! so a broadcast is only ever made from a durable record.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::AppState;
use crate::chat::protocol::{ClientEvent, ErrorCode, ServerEvent};
use crate::chat::rooms::{self, ConnId};
use crate::error::AppError;
use crate::routes::group::Group;
use crate::routes::message::{Message, MessageType, validate_content};
use crate::utils::{Claims, verify_token};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// GET /chat/ws?token=<jwt> — the browser cannot set headers on the upgrade
/// request, so the token travels as a query parameter.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match verify_token(&query.token, &state.config) {
        Ok(claims) => ws.on_upgrade(move |socket| handle_socket(socket, state, claims)),
        Err(e) => {
            tracing::debug!("websocket auth failed: {}", e);
            AppError::Unauthorized.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let conn = rooms::next_conn_id();
    tracing::debug!("chat connection {} opened for user {}", conn, claims.sub);

    // Events destined for this client are funneled through one channel so
    // broadcasts from other connections' tasks and this task's own error
    // reports share a single writer.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (mut sender, mut receiver) = socket.split();

    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(WsMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(ClientEvent::JoinRoom { group_id }) => {
                    state.rooms.join(conn, &group_id, tx.clone()).await;
                    tracing::debug!("connection {} joined room {}", conn, group_id);
                }
                Ok(ClientEvent::SendMessage {
                    group_id,
                    message_type,
                    message_text,
                    file_url,
                }) => {
                    if let Err(e) = handle_incoming_message(
                        &state,
                        conn,
                        &claims.sub,
                        &group_id,
                        message_type,
                        message_text.as_deref(),
                        file_url.as_deref(),
                    )
                    .await
                    {
                        report_to_sender(&tx, e);
                    }
                }
                // Malformed payloads are logged and dropped, never fatal.
                Err(e) => {
                    tracing::debug!("ignoring malformed chat payload from {}: {}", conn, e);
                }
            },
            Ok(WsMessage::Close(frame)) => {
                tracing::debug!("connection {} closed: {:?}", conn, frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("connection {} errored: {}", conn, e);
                break;
            }
        }
    }

    state.rooms.disconnect(conn).await;
    drop(tx);
    let _ = forward_task.await;
    tracing::debug!("chat connection {} cleaned up", conn);
}

/// Validate → persist → enrich → broadcast. Any failure is returned to the
/// caller, which reports it to the sending connection only. A failure after
/// the insert leaves the row durable; the room simply never hears about it.
async fn handle_incoming_message(
    state: &AppState,
    conn: ConnId,
    sender_id: &str,
    group_id: &str,
    message_type: MessageType,
    message_text: Option<&str>,
    file_url: Option<&str>,
) -> Result<(), AppError> {
    let content = validate_content(message_type, message_text, file_url)?;

    Group::find_by_id(&state.pool, &state.redis, group_id)
        .await?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;

    // Sends are membership-gated just like history reads.
    if !Group::is_member(&state.pool, group_id, sender_id).await? {
        return Err(AppError::Forbidden("not a member of this group".into()));
    }

    let stored = Message::append(&state.pool, group_id, sender_id, content).await?;
    Message::invalidate_history_cache(&state.redis, group_id).await;

    let enriched = Message::get_enriched(&state.pool, &stored.message_id)
        .await?
        .ok_or_else(|| AppError::Enrichment("sender profile not found".into()))?;

    let event = serde_json::to_string(&ServerEvent::NewMessage(enriched))
        .map_err(|e| AppError::Enrichment(format!("failed to serialize event: {}", e)))?;

    let delivered = state.rooms.broadcast(group_id, &event).await;
    tracing::debug!(
        "message {} from connection {} delivered to {} connection(s) in room {}",
        stored.message_id,
        conn,
        delivered,
        group_id
    );

    Ok(())
}

fn report_to_sender(tx: &mpsc::UnboundedSender<String>, err: AppError) {
    let code = match err {
        AppError::Validation(_) | AppError::Conflict(_) => ErrorCode::Validation,
        AppError::NotFound(_) => ErrorCode::NotFound,
        AppError::Forbidden(_) | AppError::Unauthorized => ErrorCode::Forbidden,
        AppError::Storage(_) | AppError::Enrichment(_) => ErrorCode::Server,
    };

    // Storage and enrichment details stay in the logs; the client gets
    // generic wording.
    let error = match &err {
        AppError::Storage(e) => {
            tracing::error!("message persistence failed: {}", e);
            "message could not be stored".to_string()
        }
        AppError::Enrichment(msg) => {
            tracing::error!("message enrichment failed: {}", msg);
            "message stored but could not be delivered".to_string()
        }
        other => other.to_string(),
    };

    let event = ServerEvent::MessageError { code, error };
    if let Ok(json) = serde_json::to_string(&event) {
        // The connection may already be gone; dropping the report is fine.
        let _ = tx.send(json);
    }
}
