use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::capsule::timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleShare {
    pub capsule_id: String,
    pub shared_with: String,
    pub shared_by: String,
    pub shared_at: String,
}

impl CapsuleShare {
    pub fn new(capsule_id: String, shared_with: String, shared_by: String) -> Self {
        Self {
            capsule_id,
            shared_with,
            shared_by,
            shared_at: timestamp(Utc::now()),
        }
    }
}
