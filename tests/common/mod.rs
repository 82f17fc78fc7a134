#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use timecapsule::auth::Claims;
use timecapsule::config::AuthConfig;

pub const TEST_SECRET: &str = "test-secret";

pub struct TestApp {
    pub router: Router,
    pub db: SqlitePool,
}

impl TestApp {
    pub async fn new() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("Failed to create in-memory SQLite pool");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        let auth = AuthConfig {
            jwt_secret: TEST_SECRET.to_string(),
            issuer: None,
        };
        let router = timecapsule::build_app(pool.clone(), auth, &["*".to_string()]);

        Self { router, db: pool }
    }

    /// Send a request through the app and return the response.
    pub async fn request(&self, req: Request<Body>) -> Response {
        tower::ServiceExt::oneshot(self.router.clone(), req)
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response {
        let req = with_auth(Request::builder().uri(uri), user)
            .body(Body::empty())
            .unwrap();
        self.request(req).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, user: Option<&str>) -> Response {
        self.send_json("POST", uri, body, user).await
    }

    pub async fn put_json(&self, uri: &str, body: Value, user: Option<&str>) -> Response {
        self.send_json("PUT", uri, body, user).await
    }

    pub async fn delete(&self, uri: &str, user: Option<&str>) -> Response {
        let req = with_auth(Request::builder().uri(uri).method("DELETE"), user)
            .body(Body::empty())
            .unwrap();
        self.request(req).await
    }

    async fn send_json(
        &self,
        method: &str,
        uri: &str,
        body: Value,
        user: Option<&str>,
    ) -> Response {
        let builder = Request::builder()
            .uri(uri)
            .method(method)
            .header("content-type", "application/json");
        let req = with_auth(builder, user)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.request(req).await
    }

    /// Create a capsule through the API and return its id.
    pub async fn create_capsule(&self, user: &str, caption: &str, end_time: &str) -> String {
        let resp = self
            .post_json(
                "/api/capsules",
                serde_json::json!({
                    "caption": caption,
                    "description": "A memory",
                    "endTime": end_time,
                    "media": [{ "kind": "image", "url": "/uploads/photo.jpg" }],
                    "audioUrl": "/uploads/voice.webm"
                }),
                Some(user),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        json["capsule"]["id"].as_str().unwrap().to_string()
    }

    /// Create a group through the API and return its id.
    pub async fn create_group(&self, user: &str, name: &str, is_private: bool) -> String {
        let resp = self
            .post_json(
                "/api/groups",
                serde_json::json!({
                    "name": name,
                    "description": "Shared memories",
                    "isPrivate": is_private
                }),
                Some(user),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        json["group"]["id"].as_str().unwrap().to_string()
    }
}

/// Sign a session token for `user` the way the identity provider would.
pub fn token_for(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

fn with_auth(
    builder: axum::http::request::Builder,
    user: Option<&str>,
) -> axum::http::request::Builder {
    match user {
        Some(user) => builder.header("authorization", format!("Bearer {}", token_for(user))),
        None => builder,
    }
}

pub fn past() -> String {
    (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339()
}

pub fn future() -> String {
    (chrono::Utc::now() + chrono::Duration::days(30)).to_rfc3339()
}

/// Read the full response body as a String.
pub async fn body_string(resp: Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_string(resp).await).unwrap()
}

/// Assert a JSON error response with the given status and message.
pub async fn assert_error(resp: Response, status: StatusCode, message: &str) {
    assert_eq!(resp.status(), status);
    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], message);
}
