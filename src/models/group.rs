use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::capsule::timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub is_private: bool,
    pub created_at: String,
}

impl Group {
    pub fn new(created_by: String, name: String, description: String, is_private: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            created_by,
            is_private,
            created_at: timestamp(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    pub joined_at: String,
}

impl GroupMember {
    pub fn new(group_id: String, user_id: String) -> Self {
        Self {
            group_id,
            user_id,
            joined_at: timestamp(Utc::now()),
        }
    }
}
