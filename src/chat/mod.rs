pub mod handler;
pub mod protocol;
pub mod rooms;

pub use handler::ws_handler;
pub use rooms::RoomRegistry;
