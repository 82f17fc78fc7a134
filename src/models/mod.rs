pub mod capsule;
pub mod group;
pub mod share;

pub use capsule::{parse_unlock_time, timestamp, Capsule, MediaAttachment, MediaKind};
pub use group::{Group, GroupMember};
pub use share::CapsuleShare;
