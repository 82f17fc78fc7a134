use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum MediaKind {
    #[serde(rename = "image")]
    #[sqlx(rename = "image")]
    Image,
    #[serde(rename = "video")]
    #[sqlx(rename = "video")]
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub caption: String,
    pub description: String,
    pub location: Option<String>,
    pub audio_url: Option<String>,
    pub end_time: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Capsule {
    pub fn new(
        user_id: String,
        group_id: Option<String>,
        caption: String,
        description: String,
        end_time: DateTime<Utc>,
    ) -> Self {
        let now = timestamp(Utc::now());
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            group_id,
            caption,
            description,
            location: None,
            audio_url: None,
            end_time: timestamp(end_time),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Unlock time as stored. A value that fails to parse keeps the capsule
    /// locked forever rather than exposing its media.
    pub fn unlocks_at(&self) -> Option<DateTime<Utc>> {
        self.end_time.parse().ok()
    }

    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        self.unlocks_at().is_some_and(|end| now >= end)
    }

    pub fn unlocks_in(&self, now: DateTime<Utc>) -> Option<String> {
        let end = self.unlocks_at()?;
        if now >= end {
            return None;
        }
        let diff = end - now;
        Some(if diff.num_days() > 0 {
            format!("in {} days", diff.num_days())
        } else if diff.num_hours() > 0 {
            format!("in {} hours", diff.num_hours())
        } else {
            format!("in {} minutes", diff.num_minutes().max(1))
        })
    }
}

/// Canonical storage form for every timestamp column.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 as well as the zone-less `YYYY-MM-DDTHH:MM[:SS]` that
/// browser `datetime-local` inputs produce; the latter is read as UTC.
pub fn parse_unlock_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
