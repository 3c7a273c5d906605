//! Wire protocol for the chat WebSocket. Events are JSON envelopes tagged
//! on `type`, with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::routes::message::{ChatMessage, MessageType};

/// Client → Server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Enroll this connection in the broadcast room for a group.
    #[serde(rename = "joinRoom", rename_all = "camelCase")]
    JoinRoom { group_id: String },
    /// Send a message into a group. Sender identity comes from the
    /// authenticated connection, never from the payload.
    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        group_id: String,
        message_type: MessageType,
        #[serde(default)]
        message_text: Option<String>,
        #[serde(default)]
        file_url: Option<String>,
    },
}

/// Server → Client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A freshly persisted message, fanned out to every connection in the
    /// group's room, sender included.
    #[serde(rename = "newMessage")]
    NewMessage(ChatMessage),
    /// A failure report, delivered only to the offending connection.
    #[serde(rename = "messageError")]
    MessageError { code: ErrorCode, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    Validation,
    Forbidden,
    #[serde(rename = "notFound")]
    NotFound,
    Server,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_room() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"joinRoom","groupId":"g-1"}"#).unwrap();
        assert_eq!(
            ev,
            ClientEvent::JoinRoom {
                group_id: "g-1".into()
            }
        );
    }

    #[test]
    fn parses_text_send() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"type":"sendMessage","groupId":"g-1","messageType":"text","messageText":"Hello"}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            ClientEvent::SendMessage {
                group_id: "g-1".into(),
                message_type: MessageType::Text,
                message_text: Some("Hello".into()),
                file_url: None,
            }
        );
    }

    #[test]
    fn parses_image_send_without_text() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"type":"sendMessage","groupId":"g-1","messageType":"image","fileUrl":"https://cdn.example.com/a.jpg"}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::SendMessage {
                message_type,
                message_text,
                file_url,
                ..
            } => {
                assert_eq!(message_type, MessageType::Image);
                assert_eq!(message_text, None);
                assert_eq!(file_url.as_deref(), Some("https://cdn.example.com/a.jpg"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"leaveRoom","groupId":"g"}"#).is_err());
    }

    #[test]
    fn error_codes_are_distinct_on_the_wire() {
        for (code, wire) in [
            (ErrorCode::Validation, "validation"),
            (ErrorCode::Forbidden, "forbidden"),
            (ErrorCode::NotFound, "notFound"),
            (ErrorCode::Server, "server"),
        ] {
            assert_eq!(serde_json::to_value(code).unwrap(), wire);
        }
    }

    #[test]
    fn serializes_message_error() {
        let ev = ServerEvent::MessageError {
            code: ErrorCode::Validation,
            error: "messageText must not be empty".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "messageError");
        assert_eq!(json["code"], "validation");
    }
}
