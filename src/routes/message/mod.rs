pub mod handler;
pub mod model;

pub use handler::{get_group_messages, send_group_message};
pub use model::{ChatMessage, Message, MessageType, SenderProfile, validate_content};
