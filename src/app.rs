use std::net::SocketAddr;

use axum::{http::HeaderValue, routing::get, Json, Router};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::TraceLayer,
};

use crate::error::AppError;
use crate::state::AppState;
use crate::{auth, files, projects};

pub fn build_app(state: AppState) -> Router {
    let max_upload_bytes = state.config.storage.max_upload_bytes;
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(projects::router())
                .merge(files::router(max_upload_bytes)),
        )
        .route("/health", get(health))
        .fallback(|| async { AppError::NotFound("Not found".into()) })
        .method_not_allowed_fallback(|| async { AppError::MethodNotAllowed })
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

/// Credentialed CORS for the single frontend origin.
fn cors_layer(origin: &str) -> CorsLayer {
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request()),
        Err(e) => {
            tracing::warn!(error = %e, origin, "invalid CORS_ORIGIN; allowing any origin");
            CorsLayer::permissive()
        }
    }
}

async fn health() -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(json!({ "status": "ok", "timestamp": timestamp }))
}

pub async fn serve(app: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    struct TestApp {
        router: Router,
        state: AppState,
        _dir: TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let state = AppState::fake(dir.path()).await;
            Self {
                router: build_app(state.clone()),
                state,
                _dir: dir,
            }
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let res = self.router.clone().oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        async fn json(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let req = match body {
                Some(body) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => req.body(Body::empty()),
            };
            self.send(req.unwrap()).await
        }

        async fn register(&self, email: &str, password: &str) -> String {
            let (status, body) = self
                .json(
                    Method::POST,
                    "/api/auth/register",
                    None,
                    Some(json!({ "email": email, "password": password, "username": "tester" })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["access_token"].as_str().unwrap().to_string()
        }

        async fn create_project(&self, token: &str, name: &str) -> String {
            let (status, body) = self
                .json(
                    Method::POST,
                    "/api/projects",
                    Some(token),
                    Some(json!({ "name": name, "description": "  10x run " })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            body["id"].as_str().unwrap().to_string()
        }

        async fn upload(
            &self,
            token: &str,
            project_id: &str,
            filename: &str,
            content_type: &str,
            data: &[u8],
        ) -> (StatusCode, Value) {
            let boundary = "XcellhubBoundaryX";
            let mut body = Vec::new();
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

            let req = Request::builder()
                .method(Method::POST)
                .uri(format!("/api/files/upload/{project_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap();
            self.send(req).await
        }
    }

    #[tokio::test]
    async fn health_and_fallback() {
        let app = TestApp::new().await;
        let (status, body) = app.json(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());

        let (status, body) = app.json(Method::GET, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Not found");
    }

    #[tokio::test]
    async fn wrong_method_on_known_path_is_json_405() {
        let app = TestApp::new().await;
        let uri = format!("/api/projects/{}", uuid::Uuid::new_v4());
        let (status, body) = app.json(Method::PATCH, &uri, None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["detail"], "Method not allowed");

        let (status, body) = app.json(Method::DELETE, "/health", None, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["detail"], "Method not allowed");
    }

    #[tokio::test]
    async fn register_twice_with_same_email_fails() {
        let app = TestApp::new().await;
        app.register("ada@example.com", "pw-1").await;

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "Ada@Example.com", "password": "pw-2", "name": "Ada" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Email already registered");
    }

    #[tokio::test]
    async fn register_validates_input() {
        let app = TestApp::new().await;
        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "ada@example.com", "password": "pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Email, password and name are required");

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "not-an-email", "password": "pw", "name": "x" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid email");
    }

    #[tokio::test]
    async fn register_returns_bearer_token_and_username() {
        let app = TestApp::new().await;
        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "bo@example.com", "password": "pw", "name": "Bo" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user"]["username"], "Bo");
        assert_eq!(body["user"]["email"], "bo@example.com");
        assert!(body["user"].get("password").is_none());
    }

    #[tokio::test]
    async fn login_accepts_form_and_json_and_rejects_bad_password() {
        let app = TestApp::new().await;
        app.register("ada@example.com", "s3cret").await;

        let form = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("grant_type=password&username=ada%40example.com&password=s3cret"))
            .unwrap();
        let (status, body) = app.send(form).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["access_token"].is_string());

        let (status, _) = app
            .json(
                Method::POST,
                "/api/auth/token",
                None,
                Some(json!({ "username": "ada@example.com", "password": "s3cret" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/token",
                None,
                Some(json!({ "username": "ada@example.com", "password": "nope" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid credentials");

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/token",
                None,
                Some(json!({ "username": "ada@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Username and password are required");
    }

    #[tokio::test]
    async fn login_with_imported_bcrypt_hash_is_unauthorized() {
        let app = TestApp::new().await;
        let users = json!([{
            "id": uuid::Uuid::new_v4(),
            "email": "legacy@example.com",
            "password": "$2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy",
            "name": "Legacy",
            "createdAt": "2024-03-01T12:00:00Z",
            "updatedAt": "2024-03-01T12:00:00Z"
        }]);
        tokio::fs::write(app.state.config.users_file(), users.to_string())
            .await
            .unwrap();

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/token",
                None,
                Some(json!({ "username": "legacy@example.com", "password": "password" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid credentials");
    }

    #[tokio::test]
    async fn me_requires_a_valid_token() {
        let app = TestApp::new().await;
        let token = app.register("ada@example.com", "pw").await;

        let (status, body) = app.json(Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Not authenticated");

        let (status, body) = app
            .json(Method::GET, "/api/auth/me", Some("garbage"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid token");

        let (status, body) = app
            .json(Method::GET, "/api/auth/me", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ada@example.com");
        assert_eq!(body["username"], "tester");
        assert!(body["createdAt"].is_string());
    }

    #[tokio::test]
    async fn project_lifecycle_and_ownership() {
        let app = TestApp::new().await;
        let owner = app.register("owner@example.com", "pw").await;
        let stranger = app.register("stranger@example.com", "pw").await;

        let (status, _) = app.json(Method::GET, "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .json(Method::POST, "/api/projects/", Some(&owner), Some(json!({ "name": "  " })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Project name is required");

        let id = app.create_project(&owner, "PBMC").await;
        let uri = format!("/api/projects/{id}");

        let (status, body) = app.json(Method::GET, &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "PBMC");
        assert_eq!(body["description"], "10x run");
        assert_eq!(body["status"], "draft");
        assert_eq!(body["file_count"], 0);

        let (status, list) = app.json(Method::GET, "/api/projects/", Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        let (_, list) = app.json(Method::GET, "/api/projects", Some(&stranger), None).await;
        assert!(list.as_array().unwrap().is_empty());

        let (status, body) = app.json(Method::GET, &uri, Some(&stranger), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Access denied");

        let (status, _) = app
            .json(Method::PUT, &uri, Some(&stranger), Some(json!({ "name": "mine" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.json(Method::DELETE, &uri, Some(&stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .json(
                Method::PUT,
                &uri,
                Some(&owner),
                Some(json!({ "name": "PBMC v2", "status": "processing" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "PBMC v2");
        assert_eq!(body["status"], "processing");
        assert!(body.get("description").is_none());

        let (status, _) = app.json(Method::DELETE, &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = app.json(Method::GET, &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Project not found");
    }

    #[tokio::test]
    async fn update_checks_ownership_before_parsing_the_body() {
        let app = TestApp::new().await;
        let owner = app.register("owner@example.com", "pw").await;
        let stranger = app.register("stranger@example.com", "pw").await;
        let id = app.create_project(&owner, "PBMC").await;

        let put_raw = |token: &str| {
            Request::builder()
                .method(Method::PUT)
                .uri(format!("/api/projects/{id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap()
        };

        let (status, body) = app.send(put_raw(&stranger)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Project not found");

        let (status, _) = app.send(put_raw(&owner)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_or_malformed_project_id_is_not_found() {
        let app = TestApp::new().await;
        let token = app.register("ada@example.com", "pw").await;
        let (status, _) = app
            .json(Method::GET, "/api/projects/not-a-uuid", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .json(
                Method::GET,
                &format!("/api/projects/{}", uuid::Uuid::new_v4()),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_list_and_delete_file() {
        let app = TestApp::new().await;
        let owner = app.register("owner@example.com", "pw").await;
        let stranger = app.register("stranger@example.com", "pw").await;
        let project = app.create_project(&owner, "PBMC").await;

        let (status, file) = app
            .upload(&owner, &project, "counts.csv", "text/csv", b"cell,gene\nc1,g1\n")
            .await;
        assert_eq!(status, StatusCode::CREATED, "{file}");
        assert_eq!(file["project_id"], project.as_str());
        assert_eq!(file["original_name"], "counts.csv");
        assert_eq!(file["file_size"], 16);
        assert_eq!(file["file_type"], "text/csv");
        let filename = file["filename"].as_str().unwrap().to_string();
        assert!(filename.ends_with(".csv"));
        let blob = app.state.config.storage.upload_dir.join(&filename);
        assert!(blob.exists());

        let list_uri = format!("/api/files/project/{project}");
        let (status, files) = app.json(Method::GET, &list_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(files.as_array().unwrap().len(), 1);
        let (_, files) = app.json(Method::GET, &list_uri, Some(&stranger), None).await;
        assert!(files.as_array().unwrap().is_empty());

        let file_uri = format!("/api/files/{}", file["id"].as_str().unwrap());
        let (status, body) = app.json(Method::DELETE, &file_uri, Some(&stranger), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Access denied");

        let (status, _) = app.json(Method::DELETE, &file_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!blob.exists());
        let (_, files) = app.json(Method::GET, &list_uri, Some(&owner), None).await;
        assert!(files.as_array().unwrap().is_empty());

        let (status, body) = app.json(Method::DELETE, &file_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "File not found");
    }

    #[tokio::test]
    async fn upload_rejections() {
        let app = TestApp::new().await;
        let owner = app.register("owner@example.com", "pw").await;
        let stranger = app.register("stranger@example.com", "pw").await;
        let project = app.create_project(&owner, "PBMC").await;

        let (status, body) = app
            .upload(&owner, &project, "run.sh", "application/x-sh", b"echo hi")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], services_invalid_type());

        let (status, _) = app
            .upload(&stranger, &project, "counts.csv", "text/csv", b"x")
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = uuid::Uuid::new_v4().to_string();
        let (status, _) = app
            .upload(&owner, &missing, "counts.csv", "text/csv", b"x")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let big = vec![b'a'; app.state.config.storage.max_upload_bytes + 1];
        let (status, _) = app
            .upload(&owner, &project, "big.csv", "text/csv", &big)
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (status, body) = app
            .json(
                Method::POST,
                &format!("/api/files/upload/{project}"),
                Some(&owner),
                Some(json!({})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "No file uploaded");

        let mut entries = tokio::fs::read_dir(&app.state.config.storage.upload_dir)
            .await
            .unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    fn services_invalid_type() -> &'static str {
        crate::files::services::INVALID_TYPE
    }
}
