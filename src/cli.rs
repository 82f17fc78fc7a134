use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{parse_unlock_time, timestamp, MediaAttachment, MediaKind};
use crate::routes::capsules::{insert_capsule, validate_new_capsule, CapsuleForm};

#[derive(Parser, Debug)]
#[command(version, about = "Time capsule API server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Import legacy capsule documents from a JSON array.
    Import {
        /// Path to the exported documents.
        file: PathBuf,
        /// Owner id assigned to documents that carry none.
        #[arg(long)]
        user: String,
    },
}

/// Dates arrive either as plain strings or as `{"$date": ...}` wrappers.
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyDate {
    Plain(String),
    Wrapped {
        #[serde(rename = "$date")]
        date: String,
    },
}

impl LegacyDate {
    fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            LegacyDate::Plain(s) | LegacyDate::Wrapped { date: s } => parse_unlock_time(s),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyFile {
    file_type: String,
    file_data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyCapsule {
    #[serde(default)]
    caption: String,
    #[serde(default)]
    description: String,
    end_time: LegacyDate,
    created_at: Option<LegacyDate>,
    user_id: Option<String>,
    /// Group capsules recorded their author here instead of in `userId`.
    created_by: Option<String>,
    group_id: Option<String>,
    location: Option<String>,
    audio_url: Option<String>,
    file_type: Option<String>,
    file_data: Option<String>,
    file_url: Option<String>,
    #[serde(default)]
    files: Vec<LegacyFile>,
}

fn media_kind(raw: &str) -> Option<MediaKind> {
    match raw {
        "image" => Some(MediaKind::Image),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

impl LegacyCapsule {
    fn media(&self) -> Vec<MediaAttachment> {
        let single = self
            .file_type
            .as_deref()
            .and_then(media_kind)
            .zip(self.file_data.clone().or_else(|| self.file_url.clone()))
            .map(|(kind, url)| MediaAttachment { kind, url });

        single
            .into_iter()
            .chain(self.files.iter().filter_map(|f| {
                media_kind(&f.file_type).map(|kind| MediaAttachment {
                    kind,
                    url: f.file_data.clone(),
                })
            }))
            .collect()
    }

    fn owner<'a>(&'a self, default_user: &'a str) -> &'a str {
        [&self.user_id, &self.created_by]
            .into_iter()
            .find_map(|id| id.as_deref().map(str::trim).filter(|s| !s.is_empty()))
            .unwrap_or(default_user)
    }
}

pub async fn import_capsules(
    pool: &SqlitePool,
    file_path: &Path,
    default_user: &str,
) -> Result<usize, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(file_path)?;
    let documents: Vec<LegacyCapsule> = serde_json::from_str(&content)?;

    let mut imported = 0;
    let mut tx = pool.begin().await?;

    for doc in documents {
        let Some(end_time) = doc.end_time.parse() else {
            tracing::warn!(caption = %doc.caption, "skipping capsule with unreadable endTime");
            continue;
        };

        // Groups are not part of the import; their capsules become personal.
        if doc.group_id.is_some() {
            tracing::warn!(caption = %doc.caption, "dropping group reference on imported capsule");
        }

        let form = CapsuleForm {
            caption: Some(doc.caption.clone()),
            description: Some(doc.description.clone()),
            end_time: Some(timestamp(end_time)),
            location: doc.location.clone(),
            audio_url: doc.audio_url.clone(),
            ..Default::default()
        };
        let mut new = match validate_new_capsule(doc.owner(default_user), form, None) {
            Ok(new) => new,
            Err(err) => {
                tracing::warn!(caption = %doc.caption, error = %err, "skipping invalid capsule");
                continue;
            }
        };

        if let Some(created) = doc.created_at.as_ref().and_then(LegacyDate::parse) {
            new.capsule.created_at = timestamp(created);
            new.capsule.updated_at = new.capsule.created_at.clone();
        }

        insert_capsule(&mut tx, &new.capsule, &doc.media()).await?;
        imported += 1;
    }

    tx.commit().await?;
    tracing::info!(imported, "import finished");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_media_from_single_and_list_fields() {
        let doc: LegacyCapsule = serde_json::from_value(serde_json::json!({
            "caption": "c",
            "description": "d",
            "endTime": { "$date": "2030-01-01T00:00:00Z" },
            "fileType": "image",
            "fileUrl": "/uploads/1-a.png",
            "files": [
                { "fileType": "video", "fileData": "data:video/mp4;base64,AA" },
                { "fileType": "text", "fileData": "ignored" }
            ]
        }))
        .unwrap();

        assert!(doc.end_time.parse().is_some());
        let media = doc.media();
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].kind, MediaKind::Image);
        assert_eq!(media[0].url, "/uploads/1-a.png");
        assert_eq!(media[1].kind, MediaKind::Video);
    }

    #[test]
    fn owner_prefers_user_id_then_created_by() {
        let doc: LegacyCapsule = serde_json::from_value(serde_json::json!({
            "caption": "c",
            "endTime": "2030-01-01T00:00",
            "createdBy": "author",
            "userId": " "
        }))
        .unwrap();

        assert_eq!(doc.description, "");
        assert_eq!(doc.owner("fallback"), "author");
    }
}
