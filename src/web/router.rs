use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::web::{AppState, admin, auth, uploads, users};

/// Room for multipart boundaries and the `userId` field on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_settings = state.upload_settings().clone();
    let body_limit = usize::try_from(upload_settings.max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/login", post(auth::login))
        .route("/api/register", post(auth::register_user))
        .route("/api/summary", get(users::summary))
        .route("/users", get(users::list_users))
        .route("/users/:username", get(users::get_user))
        .route(
            "/api/users/:username/password",
            post(admin::update_user_password),
        )
        .route(
            "/api/users/:username/certificates",
            post(admin::add_certificate),
        )
        .route("/api/users/:username/downloads", post(admin::record_download))
        .route(
            "/upload",
            post(uploads::upload_certificate).layer(DefaultBodyLimit::max(body_limit)),
        )
        .nest_service(uploads::UPLOAD_ROUTE, ServeDir::new(upload_settings.dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use axum::{
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde_json::{Value, json};
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        models::{Role, UserRecord},
        store::{JsonFileStore, UserStore},
        web::{auth::hash_password, uploads::UploadSettings},
    };

    const BOUNDARY: &str = "pergunu-test-boundary";

    struct Harness {
        _dir: TempDir,
        upload_dir: std::path::PathBuf,
        store: Arc<JsonFileStore>,
        router: Router,
    }

    async fn harness(max_upload_bytes: u64) -> Harness {
        let dir = tempdir().expect("temp dir");
        let store = Arc::new(
            JsonFileStore::open(dir.path().join("db.json"))
                .await
                .expect("open store"),
        );
        store
            .insert(UserRecord::new(
                "admin",
                hash_password("admin123").unwrap(),
                Role::Admin,
            ))
            .await
            .unwrap();
        store
            .insert(UserRecord::new(
                "siti",
                hash_password("melati").unwrap(),
                Role::User,
            ))
            .await
            .unwrap();

        let upload_dir = dir.path().join("uploads");
        let state = AppState::with_store(
            store.clone(),
            UploadSettings {
                dir: upload_dir.clone(),
                max_bytes: max_upload_bytes,
            },
        );

        Harness {
            _dir: dir,
            upload_dir,
            store,
            router: build_router(state),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_basic(mut request: Request<Body>, username: &str, password: &str) -> Request<Body> {
        let encoded = BASE64.encode(format!("{username}:{password}"));
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Basic {encoded}").parse().unwrap(),
        );
        request
    }

    fn multipart_request(parts: &[(&str, Option<(&str, &str)>, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, file, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file {
                Some(("", content_type)) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                }
                Some((filename, content_type)) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn stored_files(dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn login_returns_role_or_error_kinds() {
        let h = harness(1024).await;

        let (status, body) = send(
            &h.router,
            json_request(
                "POST",
                "/api/login",
                json!({"username": "admin", "password": "admin123"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");
        assert_eq!(body["user"]["username"], "admin");
        assert!(body["user"].get("password").is_none());

        let (status, body) = send(
            &h.router,
            json_request(
                "POST",
                "/api/login",
                json!({"username": "admin", "password": "wrong"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["message"].is_string());

        let (status, _) = send(
            &h.router,
            json_request(
                "POST",
                "/api/login",
                json!({"username": "ghost", "password": "x"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn user_listing_strips_password_hashes() {
        let h = harness(1024).await;

        let (status, body) = send(
            &h.router,
            Request::get("/users").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let users = body.as_array().expect("array");
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|user| user.get("password").is_none()));

        let (status, body) = send(
            &h.router,
            Request::get("/api/summary").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"userCount": 2, "lastUser": "siti"}));
    }

    #[tokio::test]
    async fn registration_creates_member_and_rejects_duplicates() {
        let h = harness(1024).await;
        let payload = json!({
            "username": "budi",
            "password": "kenanga",
            "fullName": "Budi Santoso",
            "email": "budi@example.org"
        });

        let (status, body) = send(
            &h.router,
            json_request("POST", "/api/register", payload.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "user");
        assert_eq!(body["id"], 3);

        let (status, _) = send(&h.router, json_request("POST", "/api/register", payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let stored = h.store.get("budi").await.unwrap().unwrap();
        assert!(stored.password.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn certificates_require_admin_credentials() {
        let h = harness(1024).await;
        let body = json!({"title": "Kartu Anggota", "url": "/uploads/x.pdf"});

        let (status, _) = send(
            &h.router,
            json_request("POST", "/api/users/siti/certificates", body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &h.router,
            with_basic(
                json_request("POST", "/api/users/siti/certificates", body.clone()),
                "siti",
                "melati",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, updated) = send(
            &h.router,
            with_basic(
                json_request("POST", "/api/users/siti/certificates", body),
                "admin",
                "admin123",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["certificates"][0]["title"], "Kartu Anggota");
    }

    #[tokio::test]
    async fn downloads_are_counted_for_self() {
        let h = harness(1024).await;

        let (status, updated) = send(
            &h.router,
            with_basic(
                json_request(
                    "POST",
                    "/api/users/siti/downloads",
                    json!({"certificate": "/uploads/x.pdf"}),
                ),
                "siti",
                "melati",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["downloads"], 1);
        assert_eq!(updated["downloadHistory"][0]["certificate"], "/uploads/x.pdf");

        let (status, _) = send(
            &h.router,
            with_basic(
                json_request(
                    "POST",
                    "/api/users/admin/downloads",
                    json!({"certificate": "/uploads/x.pdf"}),
                ),
                "siti",
                "melati",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_can_reset_password() {
        let h = harness(1024).await;

        let (status, _) = send(
            &h.router,
            with_basic(
                json_request(
                    "POST",
                    "/api/users/siti/password",
                    json!({"password": "baru"}),
                ),
                "admin",
                "admin123",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &h.router,
            json_request(
                "POST",
                "/api/login",
                json!({"username": "siti", "password": "baru"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn pdf_upload_is_stored_and_served() {
        let h = harness(1024).await;

        let (status, body) = send(
            &h.router,
            multipart_request(&[
                ("file", Some(("Kartu Anggota.pdf", "application/pdf")), "%PDF-1.4 test"),
                ("userId", None, "2"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let path = body["path"].as_str().expect("path").to_string();
        assert!(path.starts_with("/uploads/2_"));
        assert!(path.ends_with("_Kartu_Anggota.pdf"));
        assert_eq!(body["size"], 13);
        assert_eq!(body["originalName"], "Kartu Anggota.pdf");

        let response = h
            .router
            .clone()
            .oneshot(Request::get(path.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn non_pdf_uploads_are_rejected_whatever_the_name() {
        let h = harness(1024).await;

        for (filename, content_type) in [
            ("certificate.pdf", "image/png"),
            ("scan.png", "image/png"),
            ("notes.pdf", "text/plain"),
            ("empty.pdf", "application/octet-stream"),
            // No filename at all still counts as the upload.
            ("", "image/png"),
        ] {
            let (status, _) = send(
                &h.router,
                multipart_request(&[("file", Some((filename, content_type)), "data")]),
            )
            .await;
            assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE, "{filename}");
        }

        assert!(stored_files(&h.upload_dir).is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_cleaned_up() {
        let h = harness(16).await;
        let payload = "x".repeat(64);

        let (status, _) = send(
            &h.router,
            multipart_request(&[(
                "file",
                Some(("big.pdf", "application/pdf")),
                payload.as_str(),
            )]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(stored_files(&h.upload_dir).is_empty());
    }

    #[tokio::test]
    async fn upload_requires_exactly_one_file() {
        let h = harness(1024).await;

        let (status, _) = send(&h.router, multipart_request(&[("userId", None, "2")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.router,
            multipart_request(&[
                ("file", Some(("a.pdf", "application/pdf")), "%PDF-a"),
                ("file", Some(("b.pdf", "application/pdf")), "%PDF-b"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &h.router,
            multipart_request(&[("attachment", Some(("a.pdf", "application/pdf")), "%PDF-a")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("`file`"));

        assert!(stored_files(&h.upload_dir).is_empty());
    }

    #[tokio::test]
    async fn unnamed_pdf_part_is_stored_with_fallback_name() {
        let h = harness(1024).await;

        let (status, body) = send(
            &h.router,
            multipart_request(&[("file", Some(("", "application/pdf")), "%PDF-1.4")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["filename"].as_str().unwrap().ends_with("_certificate.pdf"));
        assert_eq!(body["originalName"], "");
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_messages() {
        let h = harness(1024).await;

        let (status, body) = send(
            &h.router,
            json_request("POST", "/api/login", json!({"username": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("password"));

        let (status, body) = send(
            &h.router,
            Request::post("/api/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());

        let (status, body) = send(
            &h.router,
            Request::post("/api/login")
                .body(Body::from(r#"{"username":"admin","password":"admin123"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body["message"].is_string());

        let (status, body) = send(
            &h.router,
            Request::post("/upload")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("not a form"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn identical_uploads_get_distinct_names() {
        let h = harness(1024).await;
        let parts: &[(&str, Option<(&str, &str)>, &str)] = &[
            ("userId", None, "2"),
            ("file", Some(("same.pdf", "application/pdf")), "%PDF-1.4"),
        ];

        let (_, first) = send(&h.router, multipart_request(parts)).await;
        let (_, second) = send(&h.router, multipart_request(parts)).await;

        assert_ne!(first["filename"], second["filename"]);
        assert_eq!(stored_files(&h.upload_dir).len(), 2);
    }
}
