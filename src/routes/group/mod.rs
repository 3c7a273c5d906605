pub mod handler;
pub mod model;

pub use handler::{create_group, find_by_id, find_by_name, list_members, toggle_membership};
pub use model::{Group, GroupInfo, GroupMember};
