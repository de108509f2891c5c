#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use giveback_api::images::ImageStore;
use giveback_api::routes;
use giveback_api::state::{AppState, AppStateInner};
use giveback_db::Database;
use giveback_gateway::connection::HEARTBEAT_INTERVAL;
use giveback_gateway::dispatcher::Dispatcher;

pub const BOUNDARY: &str = "giveback-test-boundary";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _uploads: TempDir,
}

pub struct TestUser {
    pub id: String,
    pub token: String,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_heartbeat(HEARTBEAT_INTERVAL).await
}

pub async fn spawn_app_with_heartbeat(heartbeat_interval: Duration) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let images = ImageStore::new(uploads.path().join("uploads")).await.unwrap();
    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        dispatcher: Dispatcher::new(),
        jwt_secret: "test-secret".to_string(),
        token_ttl: chrono::Duration::days(1),
        images,
        heartbeat_interval,
    });
    let router = routes::router(state.clone());

    TestApp {
        state,
        router,
        _uploads: uploads,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(req).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.json(Method::GET, uri, token, None).await
    }

    pub async fn multipart(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        fields: &[(&str, &str)],
        image: Option<(&str, &str, &[u8])>,
    ) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(fields, image)))
            .unwrap();
        self.send(req).await
    }

    pub async fn register(&self, username: &str) -> TestUser {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "secret1",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {}: {}", username, body);
        TestUser {
            id: body["_id"].as_str().unwrap().to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// A donation card at the given point, no image.
    pub async fn create_card(&self, owner: &TestUser, item_name: &str, lng: f64, lat: f64) -> Value {
        let (lng, lat) = (lng.to_string(), lat.to_string());
        let (status, body) = self
            .multipart(
                Method::POST,
                "/api/cards",
                &owner.token,
                &[
                    ("cardType", "donation"),
                    ("itemName", item_name),
                    ("description", "good condition"),
                    ("address", "Tel Aviv"),
                    ("longitude", &lng),
                    ("latitude", &lat),
                ],
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create card: {}", body);
        body
    }
}

pub fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, file_name, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}
