pub mod capsules;
pub mod export;
pub mod groups;
