use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::access;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::extract::ApiJson;
use crate::models::{Capsule, Group, GroupMember};
use crate::routes::capsules::{
    store_new_capsule, validate_new_capsule, CapsuleForm, CapsuleListResponse, CapsuleResponse,
    CapsuleView,
};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub is_private: bool,
    pub created_at: String,
    pub members: Vec<String>,
}

impl GroupView {
    async fn build(db: &SqlitePool, group: Group) -> Result<Self, sqlx::Error> {
        let members: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM group_members WHERE group_id = ? ORDER BY joined_at, rowid",
        )
        .bind(&group.id)
        .fetch_all(db)
        .await?;

        Ok(Self {
            id: group.id,
            name: group.name,
            description: group.description,
            created_by: group.created_by,
            is_private: group.is_private,
            created_at: group.created_at,
            members: members.into_iter().map(|(id,)| id).collect(),
        })
    }
}

#[derive(Serialize)]
struct GroupResponse {
    success: bool,
    group: GroupView,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupForm {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    is_private: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberForm {
    user_id: Option<String>,
}

fn validate_group_form(form: &GroupForm) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();

    let name = form.name.as_deref().unwrap_or("").trim();
    let description = form.description.as_deref().unwrap_or("").trim();

    if name.is_empty() || description.is_empty() {
        errors.insert("required".to_string(), "Missing required fields".to_string());
        return errors;
    }

    if name.chars().count() > 100 {
        errors.insert("name".to_string(), "Name must be under 100 characters".to_string());
    }

    if description.chars().count() > 1000 {
        errors.insert(
            "description".to_string(),
            "Description must be under 1000 characters".to_string(),
        );
    }

    errors
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/groups", get(list_groups).post(create_group))
        .route("/api/groups/{id}", get(show_group))
        .route("/api/groups/{id}/join", post(join_group))
        .route("/api/groups/{id}/share", post(add_member))
        .route(
            "/api/groups/{id}/capsules",
            get(group_capsules).post(create_group_capsule),
        )
        .route("/api/groups/{id}/upcoming", get(upcoming_group_capsules))
}

async fn fetch_group(db: &SqlitePool, id: &str) -> Result<Option<Group>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM groups WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Loads a group the caller belongs to.
async fn member_group(db: &SqlitePool, id: &str, user_id: &str) -> Result<Group, AppError> {
    let Some(group) = fetch_group(db, id).await? else {
        return Err(AppError::NotFound("Group not found"));
    };
    if !access::is_group_member(db, &group.id, user_id).await? {
        return Err(AppError::Forbidden("Not a member of this group"));
    }
    Ok(group)
}

/// Set-union insert. Returns false when the user was already a member.
async fn add_to_group(db: &SqlitePool, group_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
    let member = GroupMember::new(group_id.to_string(), user_id.to_string());
    let result = sqlx::query(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)",
    )
    .bind(&member.group_id)
    .bind(&member.user_id)
    .bind(&member.joined_at)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn create_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(form): ApiJson<GroupForm>,
) -> Result<impl IntoResponse, AppError> {
    let errors = validate_group_form(&form);
    if !errors.is_empty() {
        let message = errors.into_values().collect::<Vec<_>>().join("; ");
        return Err(AppError::BadRequest(message));
    }

    let group = Group::new(
        user_id,
        form.name.unwrap_or_default().trim().to_string(),
        form.description.unwrap_or_default().trim().to_string(),
        form.is_private,
    );
    let owner = GroupMember::new(group.id.clone(), group.created_by.clone());

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO groups (id, name, description, created_by, is_private, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&group.id)
    .bind(&group.name)
    .bind(&group.description)
    .bind(&group.created_by)
    .bind(group.is_private)
    .bind(&group.created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)")
        .bind(&owner.group_id)
        .bind(&owner.user_id)
        .bind(&owner.joined_at)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(group_id = %group.id, user_id = %group.created_by, "group created");

    let group = GroupView::build(&state.db, group).await?;
    Ok((StatusCode::CREATED, Json(GroupResponse { success: true, group })))
}

async fn list_groups(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let groups: Vec<Group> = sqlx::query_as(
        r#"
        SELECT g.* FROM groups g
        JOIN group_members gm ON gm.group_id = g.id
        WHERE gm.user_id = ?
        ORDER BY g.created_at DESC, g.rowid DESC
        "#,
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?;

    let mut views = Vec::with_capacity(groups.len());
    for group in groups {
        views.push(GroupView::build(&state.db, group).await?);
    }

    Ok(Json(serde_json::json!({ "success": true, "groups": views })))
}

async fn show_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let Some(group) = fetch_group(&state.db, &id).await? else {
        return Err(AppError::NotFound("Group not found"));
    };

    // Private groups are hidden from outsiders; public ones can be previewed
    // before joining.
    if group.is_private && !access::is_group_member(&state.db, &group.id, &user_id).await? {
        return Err(AppError::NotFound("Group not found"));
    }

    let group = GroupView::build(&state.db, group).await?;
    Ok(Json(GroupResponse { success: true, group }))
}

async fn join_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if fetch_group(&state.db, &id).await?.is_none() {
        return Err(AppError::NotFound("Group not found"));
    }

    if !add_to_group(&state.db, &id, &user_id).await? {
        return Err(AppError::BadRequest("User already added".to_string()));
    }

    tracing::info!(group_id = %id, user_id = %user_id, "joined group");
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn add_member(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<AddMemberForm>,
) -> Result<impl IntoResponse, AppError> {
    let group = member_group(&state.db, &id, &user_id).await?;

    let Some(target) = form.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    };

    if !add_to_group(&state.db, &group.id, target).await? {
        return Err(AppError::BadRequest("User already added".to_string()));
    }

    tracing::info!(group_id = %group.id, added_by = %user_id, user_id = %target, "member added");
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn group_capsules(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let group = member_group(&state.db, &id, &user_id).await?;

    let capsules: Vec<Capsule> = sqlx::query_as(
        "SELECT * FROM capsules WHERE group_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(&group.id)
    .fetch_all(&state.db)
    .await?;

    let views = CapsuleView::build_all(&state.db, capsules, Utc::now()).await?;
    Ok(CapsuleListResponse::new(views))
}

async fn create_group_capsule(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<CapsuleForm>,
) -> Result<impl IntoResponse, AppError> {
    let group = member_group(&state.db, &id, &user_id).await?;

    let new = validate_new_capsule(&user_id, form, Some(group.id))?;
    let capsule = store_new_capsule(&state.db, new).await?;

    Ok((
        StatusCode::CREATED,
        Json(CapsuleResponse {
            success: true,
            capsule,
        }),
    ))
}

async fn upcoming_group_capsules(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let group = member_group(&state.db, &id, &user_id).await?;

    let capsules: Vec<Capsule> =
        sqlx::query_as("SELECT * FROM capsules WHERE group_id = ? ORDER BY end_time, rowid")
            .bind(&group.id)
            .fetch_all(&state.db)
            .await?;

    let now = Utc::now();
    let locked = capsules.into_iter().filter(|c| !c.is_unlocked(now)).collect();
    let views = CapsuleView::build_all(&state.db, locked, now).await?;
    Ok(CapsuleListResponse::new(views))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, description: &str) -> GroupForm {
        GroupForm {
            name: Some(name.to_string()),
            description: Some(description.to_string()),
            is_private: false,
        }
    }

    #[test]
    fn requires_name_and_description() {
        let errors = validate_group_form(&form("  ", "family"));
        assert_eq!(errors.get("required").map(String::as_str), Some("Missing required fields"));
        assert!(validate_group_form(&form("Family", "Our memories")).is_empty());
    }

    #[test]
    fn name_length_limit() {
        let errors = validate_group_form(&form(&"n".repeat(101), "d"));
        assert!(errors.contains_key("name"));
    }

    #[test]
    fn reports_every_length_error_in_key_order() {
        let errors = validate_group_form(&form(&"n".repeat(101), &"d".repeat(1001)));
        let messages: Vec<&str> = errors.values().map(String::as_str).collect();
        assert_eq!(
            messages,
            vec![
                "Description must be under 1000 characters",
                "Name must be under 100 characters",
            ]
        );
    }
}
