use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;

use crate::access::{self, Membership, VISIBLE_TO_USER};
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::extract::ApiJson;
use crate::models::{parse_unlock_time, timestamp, Capsule, CapsuleShare, MediaAttachment};
use crate::AppState;

const MAX_CAPTION_LEN: usize = 300;
const MAX_DESCRIPTION_LEN: usize = 5000;
const MAX_LOCATION_LEN: usize = 200;
const MAX_MEDIA: usize = 20;

/// A capsule as returned to clients. Media and audio are withheld until the
/// capsule unlocks.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleView {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub caption: String,
    pub description: String,
    pub location: Option<String>,
    pub end_time: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocks_in: Option<String>,
    pub media: Vec<MediaAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl CapsuleView {
    pub async fn build(
        db: &SqlitePool,
        capsule: Capsule,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let is_unlocked = capsule.is_unlocked(now);
        let media = if is_unlocked {
            fetch_media(db, &capsule.id).await?
        } else {
            Vec::new()
        };

        Ok(Self {
            is_unlocked,
            unlocks_in: capsule.unlocks_in(now),
            media,
            audio_url: capsule.audio_url.filter(|_| is_unlocked),
            id: capsule.id,
            user_id: capsule.user_id,
            group_id: capsule.group_id,
            caption: capsule.caption,
            description: capsule.description,
            location: capsule.location,
            end_time: capsule.end_time,
            created_at: capsule.created_at,
            updated_at: capsule.updated_at,
        })
    }

    pub async fn build_all(
        db: &SqlitePool,
        capsules: Vec<Capsule>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut views = Vec::with_capacity(capsules.len());
        for capsule in capsules {
            views.push(Self::build(db, capsule, now).await?);
        }
        Ok(views)
    }
}

#[derive(Serialize)]
pub struct CapsuleResponse {
    pub success: bool,
    pub capsule: CapsuleView,
}

#[derive(Serialize)]
pub struct CapsuleListResponse {
    pub success: bool,
    pub capsules: Vec<CapsuleView>,
}

impl CapsuleListResponse {
    pub fn new(capsules: Vec<CapsuleView>) -> Json<Self> {
        Json(Self {
            success: true,
            capsules,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleForm {
    pub caption: Option<String>,
    pub description: Option<String>,
    pub end_time: Option<String>,
    #[serde(alias = "files")]
    pub media: Option<Vec<MediaForm>>,
    pub audio_url: Option<String>,
    pub location: Option<String>,
    pub group_id: Option<String>,
}

/// Accepts both `{kind, url}` and the `{fileType, fileData}` shape older
/// clients post with inline data URLs.
#[derive(Deserialize, Clone)]
pub struct MediaForm {
    #[serde(alias = "fileType")]
    pub kind: crate::models::MediaKind,
    #[serde(alias = "fileData")]
    pub url: String,
}

impl From<MediaForm> for MediaAttachment {
    fn from(form: MediaForm) -> Self {
        MediaAttachment {
            kind: form.kind,
            url: form.url,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareForm {
    pub target_user_id: Option<String>,
}

/// Validated input for a new capsule.
pub struct NewCapsule {
    pub capsule: Capsule,
    pub media: Vec<MediaAttachment>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn validate_fields(form: &CapsuleForm) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();

    if let Some(caption) = &form.caption {
        if caption.trim().is_empty() {
            errors.insert("caption".to_string(), "Caption is required".to_string());
        } else if caption.chars().count() > MAX_CAPTION_LEN {
            errors.insert(
                "caption".to_string(),
                format!("Caption must be under {MAX_CAPTION_LEN} characters"),
            );
        }
    }

    if let Some(description) = &form.description {
        if description.trim().is_empty() {
            errors.insert("description".to_string(), "Description is required".to_string());
        } else if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.insert(
                "description".to_string(),
                format!("Description must be under {MAX_DESCRIPTION_LEN} characters"),
            );
        }
    }

    if let Some(end_time) = &form.end_time {
        if parse_unlock_time(end_time).is_none() {
            errors.insert("endTime".to_string(), "Unlock time is not a valid date".to_string());
        }
    }

    if let Some(location) = &form.location {
        if location.chars().count() > MAX_LOCATION_LEN {
            errors.insert(
                "location".to_string(),
                format!("Location must be under {MAX_LOCATION_LEN} characters"),
            );
        }
    }

    if let Some(media) = &form.media {
        if media.len() > MAX_MEDIA {
            errors.insert("media".to_string(), format!("At most {MAX_MEDIA} attachments"));
        } else if media.iter().any(|m| m.url.trim().is_empty()) {
            errors.insert("media".to_string(), "Attachment url is required".to_string());
        }
    }

    errors
}

fn into_validation_error(errors: BTreeMap<String, String>) -> AppError {
    AppError::BadRequest(errors.into_values().collect::<Vec<_>>().join("; "))
}

/// Checks a create request and builds the capsule it describes. The group id
/// comes from `group_id` when the route already names one.
pub fn validate_new_capsule(
    user_id: &str,
    form: CapsuleForm,
    group_id: Option<String>,
) -> Result<NewCapsule, AppError> {
    let (Some(caption), Some(description), Some(end_time)) = (
        non_empty(&form.caption),
        non_empty(&form.description),
        non_empty(&form.end_time),
    ) else {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    };

    let errors = validate_fields(&form);
    if !errors.is_empty() {
        return Err(into_validation_error(errors));
    }

    let Some(end_time) = parse_unlock_time(end_time) else {
        return Err(AppError::BadRequest("Unlock time is not a valid date".to_string()));
    };

    let group_id = group_id.or_else(|| non_empty(&form.group_id).map(str::to_string));
    let mut capsule = Capsule::new(
        user_id.to_string(),
        group_id,
        caption.to_string(),
        description.to_string(),
        end_time,
    );
    capsule.location = non_empty(&form.location).map(str::to_string);
    capsule.audio_url = non_empty(&form.audio_url).map(str::to_string);

    let media = form
        .media
        .unwrap_or_default()
        .into_iter()
        .map(MediaAttachment::from)
        .collect();

    Ok(NewCapsule { capsule, media })
}

pub async fn fetch_media(
    db: &SqlitePool,
    capsule_id: &str,
) -> Result<Vec<MediaAttachment>, sqlx::Error> {
    sqlx::query_as("SELECT kind, url FROM capsule_media WHERE capsule_id = ? ORDER BY position")
        .bind(capsule_id)
        .fetch_all(db)
        .await
}

pub async fn fetch_capsule(db: &SqlitePool, id: &str) -> Result<Option<Capsule>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM capsules WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

async fn replace_media(
    tx: &mut Transaction<'_, Sqlite>,
    capsule_id: &str,
    media: &[MediaAttachment],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM capsule_media WHERE capsule_id = ?")
        .bind(capsule_id)
        .execute(&mut **tx)
        .await?;

    for (position, attachment) in media.iter().enumerate() {
        sqlx::query(
            "INSERT INTO capsule_media (capsule_id, position, kind, url) VALUES (?, ?, ?, ?)",
        )
        .bind(capsule_id)
        .bind(position as i64)
        .bind(attachment.kind)
        .bind(&attachment.url)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn insert_capsule(
    tx: &mut Transaction<'_, Sqlite>,
    capsule: &Capsule,
    media: &[MediaAttachment],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO capsules (id, user_id, group_id, caption, description, location, audio_url, end_time, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&capsule.id)
    .bind(&capsule.user_id)
    .bind(&capsule.group_id)
    .bind(&capsule.caption)
    .bind(&capsule.description)
    .bind(&capsule.location)
    .bind(&capsule.audio_url)
    .bind(&capsule.end_time)
    .bind(&capsule.created_at)
    .bind(&capsule.updated_at)
    .execute(&mut **tx)
    .await?;

    replace_media(tx, &capsule.id, media).await
}

/// Persists a validated capsule and returns it as a view.
pub async fn store_new_capsule(db: &SqlitePool, new: NewCapsule) -> Result<CapsuleView, AppError> {
    let mut tx = db.begin().await?;
    insert_capsule(&mut tx, &new.capsule, &new.media).await?;
    tx.commit().await?;

    tracing::info!(
        capsule_id = %new.capsule.id,
        user_id = %new.capsule.user_id,
        group_id = ?new.capsule.group_id,
        "capsule created"
    );

    Ok(CapsuleView::build(db, new.capsule, Utc::now()).await?)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/capsules", get(list_capsules).post(create_capsule))
        .route("/api/capsules/upcoming", get(upcoming_capsules))
        .route(
            "/api/capsules/{id}",
            get(show_capsule).put(update_capsule).delete(delete_capsule),
        )
        .route("/api/capsules/{id}/share", post(share_capsule))
        .route("/api/capsules/{id}/shares", get(list_shares))
}

async fn create_capsule(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(form): ApiJson<CapsuleForm>,
) -> Result<impl IntoResponse, AppError> {
    let new = validate_new_capsule(&user_id, form, None)?;

    if let Some(group_id) = &new.capsule.group_id {
        if !access::is_group_member(&state.db, group_id, &user_id).await? {
            return Err(AppError::Forbidden("Not a member of this group"));
        }
    }

    let capsule = store_new_capsule(&state.db, new).await?;
    Ok((
        StatusCode::CREATED,
        Json(CapsuleResponse {
            success: true,
            capsule,
        }),
    ))
}

async fn list_capsules(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sql = format!(
        "SELECT c.* FROM capsules c WHERE {VISIBLE_TO_USER} ORDER BY c.created_at DESC, c.rowid DESC"
    );
    let capsules: Vec<Capsule> = sqlx::query_as(&sql)
        .bind(&user_id)
        .bind(&user_id)
        .bind(&user_id)
        .fetch_all(&state.db)
        .await?;

    let views = CapsuleView::build_all(&state.db, capsules, Utc::now()).await?;
    Ok(CapsuleListResponse::new(views))
}

async fn upcoming_capsules(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let capsules: Vec<Capsule> = sqlx::query_as(
        "SELECT * FROM capsules WHERE user_id = ? AND group_id IS NULL ORDER BY end_time, rowid",
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?;

    let now = Utc::now();
    let locked = capsules.into_iter().filter(|c| !c.is_unlocked(now)).collect();
    let views = CapsuleView::build_all(&state.db, locked, now).await?;
    Ok(CapsuleListResponse::new(views))
}

async fn show_capsule(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let Some(capsule) = fetch_capsule(&state.db, &id).await? else {
        return Err(AppError::NotFound("Capsule not found"));
    };

    let membership = Membership::load(&state.db, &user_id).await?;
    if !access::can_view(&capsule, &user_id, &membership) {
        return Err(AppError::NotFound("Capsule not found"));
    }

    let capsule = CapsuleView::build(&state.db, capsule, Utc::now()).await?;
    Ok(Json(CapsuleResponse {
        success: true,
        capsule,
    }))
}

async fn update_capsule(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<CapsuleForm>,
) -> Result<impl IntoResponse, AppError> {
    let Some(mut capsule) = fetch_capsule(&state.db, &id).await? else {
        return Err(AppError::NotFound("Capsule not found or unauthorized"));
    };

    let membership = Membership::load(&state.db, &user_id).await?;
    if !access::can_edit(&capsule, &user_id, &membership) {
        return Err(AppError::NotFound("Capsule not found or unauthorized"));
    }

    let errors = validate_fields(&form);
    if !errors.is_empty() {
        return Err(into_validation_error(errors));
    }

    if let Some(caption) = non_empty(&form.caption) {
        capsule.caption = caption.to_string();
    }
    if let Some(description) = non_empty(&form.description) {
        capsule.description = description.to_string();
    }
    if let Some(end_time) = form.end_time.as_deref().and_then(parse_unlock_time) {
        capsule.end_time = timestamp(end_time);
    }
    if let Some(location) = &form.location {
        capsule.location = Some(location.trim().to_string()).filter(|s| !s.is_empty());
    }
    if let Some(audio_url) = &form.audio_url {
        capsule.audio_url = Some(audio_url.trim().to_string()).filter(|s| !s.is_empty());
    }
    capsule.updated_at = timestamp(Utc::now());

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        UPDATE capsules
        SET caption = ?, description = ?, location = ?, audio_url = ?, end_time = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&capsule.caption)
    .bind(&capsule.description)
    .bind(&capsule.location)
    .bind(&capsule.audio_url)
    .bind(&capsule.end_time)
    .bind(&capsule.updated_at)
    .bind(&capsule.id)
    .execute(&mut *tx)
    .await?;

    if let Some(media) = form.media {
        let media: Vec<MediaAttachment> = media.into_iter().map(MediaAttachment::from).collect();
        replace_media(&mut tx, &capsule.id, &media).await?;
    }
    tx.commit().await?;

    tracing::info!(capsule_id = %capsule.id, user_id = %user_id, "capsule updated");

    let capsule = CapsuleView::build(&state.db, capsule, Utc::now()).await?;
    Ok(Json(CapsuleResponse {
        success: true,
        capsule,
    }))
}

async fn delete_capsule(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM capsules WHERE id = ? AND user_id = ?")
        .bind(&id)
        .bind(&user_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Capsule not found or unauthorized"));
    }

    tracing::info!(capsule_id = %id, user_id = %user_id, "capsule deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn share_capsule(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<ShareForm>,
) -> Result<impl IntoResponse, AppError> {
    let Some(target) = non_empty(&form.target_user_id) else {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    };

    let owned: Option<Capsule> =
        sqlx::query_as("SELECT * FROM capsules WHERE id = ? AND user_id = ?")
            .bind(&id)
            .bind(&user_id)
            .fetch_optional(&state.db)
            .await?;

    if owned.is_none() {
        return Err(AppError::NotFound("Capsule not found or unauthorized"));
    }

    if target == user_id {
        return Err(AppError::BadRequest("Cannot share a capsule with its owner".to_string()));
    }

    let share = CapsuleShare::new(id, target.to_string(), user_id);
    sqlx::query(
        "INSERT OR IGNORE INTO capsule_shares (capsule_id, shared_with, shared_by, shared_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&share.capsule_id)
    .bind(&share.shared_with)
    .bind(&share.shared_by)
    .bind(&share.shared_at)
    .execute(&state.db)
    .await?;

    tracing::info!(
        capsule_id = %share.capsule_id,
        shared_with = %share.shared_with,
        "capsule shared"
    );
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn list_shares(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let owned: Option<Capsule> =
        sqlx::query_as("SELECT * FROM capsules WHERE id = ? AND user_id = ?")
            .bind(&id)
            .bind(&user_id)
            .fetch_optional(&state.db)
            .await?;

    if owned.is_none() {
        return Err(AppError::NotFound("Capsule not found or unauthorized"));
    }

    let shares: Vec<CapsuleShare> =
        sqlx::query_as("SELECT * FROM capsule_shares WHERE capsule_id = ? ORDER BY shared_at")
            .bind(&id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(serde_json::json!({ "success": true, "shares": shares })))
}
