use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{timestamp, Capsule, CapsuleShare};
use crate::routes::capsules::CapsuleView;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportCapsule {
    #[serde(flatten)]
    capsule: CapsuleView,
    shared_with: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportData {
    exported_at: String,
    capsules: Vec<ExportCapsule>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/export", get(export_data))
}

async fn export_data(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let capsules: Vec<Capsule> =
        sqlx::query_as("SELECT * FROM capsules WHERE user_id = ? ORDER BY created_at, rowid")
            .bind(&user_id)
            .fetch_all(&state.db)
            .await?;

    let now = Utc::now();
    let mut exported = Vec::with_capacity(capsules.len());

    for capsule in capsules {
        let shares: Vec<CapsuleShare> =
            sqlx::query_as("SELECT * FROM capsule_shares WHERE capsule_id = ? ORDER BY shared_at")
                .bind(&capsule.id)
                .fetch_all(&state.db)
                .await?;

        exported.push(ExportCapsule {
            capsule: CapsuleView::build(&state.db, capsule, now).await?,
            shared_with: shares.into_iter().map(|s| s.shared_with).collect(),
        });
    }

    let export = ExportData {
        exported_at: timestamp(now),
        capsules: exported,
    };

    let filename = format!("timecapsule-export-{}.json", now.format("%Y-%m-%d"));
    let content_disposition = format!("attachment; filename=\"{}\"", filename);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&content_disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    tracing::info!(user_id = %user_id, count = export.capsules.len(), "capsules exported");
    Ok((headers, Json(export)))
}
