pub mod access;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod routes;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::AuthConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub auth: AuthConfig,
}

async fn health() -> &'static str {
    "ok"
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(origins)
}

/// Build the full Axum application router.
///
/// Caller is responsible for running database migrations on `pool` beforehand.
pub fn build_app(pool: SqlitePool, auth: AuthConfig, allowed_origins: &[String]) -> Router {
    let state = AppState { db: pool, auth };

    Router::new()
        .route("/health", get(health))
        .merge(routes::capsules::router())
        .merge(routes::groups::router())
        .merge(routes::export::router())
        .layer(cors_layer(allowed_origins))
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
