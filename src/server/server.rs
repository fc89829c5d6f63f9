use anyhow::Result;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::error;

use crate::downloads::{
    render_download_link, Declaration, DownloadCounterStore, DownloadStore, Registrar, TokenSecret,
};
use crate::user::{AuthTokenValue, UserManager, UserStore};

use axum_extra::extract::cookie::{Cookie, SameSite};
use tower_http::services::ServeDir;

use axum::{
    body::Body,
    extract::State,
    http::{response, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::download::serve_download;
use super::session::Session;
use super::{log_requests, state::*, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub session_token: Option<String>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct LoginBody {
    pub user_handle: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginSuccessResponse {
    token: String,
}

#[derive(Deserialize, Debug)]
struct SavedContentBody {
    pub declarations: Vec<Declaration>,
}

#[derive(Serialize)]
struct SavedContentResponse {
    registered: usize,
}

async fn home(session: Option<Session>, State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        session_token: session.map(|s| s.token),
    };
    Json(stats)
}

async fn login(
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<LoginBody>,
) -> Response {
    let mut locked_manager = user_manager.lock().unwrap();
    if let Some(credentials) = locked_manager.get_user_credentials(&body.user_handle) {
        if let Some(password_credentials) = &credentials.username_password {
            if let Ok(true) = password_credentials
                .hasher
                .verify(body.password.as_str(), password_credentials.hash.as_str())
            {
                return match locked_manager.generate_auth_token(&credentials) {
                    Ok(auth_token) => {
                        let response_body = LoginSuccessResponse {
                            token: auth_token.value.0.clone(),
                        };
                        let response_body = serde_json::to_string(&response_body).unwrap();

                        let cookie_value = HeaderValue::from_str(&format!(
                            "session_token={}; Path=/; HttpOnly",
                            auth_token.value.0.clone()
                        ))
                        .unwrap();
                        response::Builder::new()
                            .status(StatusCode::CREATED)
                            .header(axum::http::header::SET_COOKIE, cookie_value)
                            .body(Body::from(response_body))
                            .unwrap()
                    }
                    Err(err) => {
                        error!("Error with auth token generation: {}", err);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                };
            }
        }
    }
    StatusCode::FORBIDDEN.into_response()
}

async fn logout(State(user_manager): State<GuardedUserManager>, session: Session) -> Response {
    let mut locked_manager = user_manager.lock().unwrap();
    match locked_manager.delete_auth_token(session.user_id, &AuthTokenValue(session.token)) {
        Ok(()) => {
            let cookie_value = Cookie::build(Cookie::new("session_token", ""))
                .path("/")
                .expires(time::OffsetDateTime::now_utc() - time::Duration::days(1)) // Expire it in the past
                .same_site(SameSite::Lax)
                .build();

            response::Builder::new()
                .status(StatusCode::OK)
                .header(axum::http::header::SET_COOKIE, cookie_value.to_string())
                .body(Body::empty())
                .unwrap()
        }
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Write path: the authoring side posts the declarations of a saved page,
/// once per save, and the registrar persists a record per declared file.
async fn save_content(
    _session: Session,
    State(registrar): State<SharedRegistrar>,
    Json(body): Json<SavedContentBody>,
) -> Response {
    let registered = registrar.register(&body.declarations);
    Json(SavedContentResponse { registered }).into_response()
}

/// Render path: turns declarations into anchor markup without touching the
/// store. A bad declaration becomes inline error markup in its slot; the
/// rest of the page still renders.
async fn render_content(
    _session: Session,
    State(config): State<ServerConfig>,
    State(registrar): State<SharedRegistrar>,
    Json(body): Json<SavedContentBody>,
) -> Response {
    let markups: Vec<String> = body
        .declarations
        .iter()
        .map(|declaration| {
            match render_download_link(
                declaration,
                &config.download_route_prefix,
                registrar.token_secret(),
            ) {
                Ok(markup) => markup,
                Err(err) => err.inline_markup(),
            }
        })
        .collect();
    Json(markups).into_response()
}

async fn get_download_counts(
    _session: Session,
    State(download_store): State<SharedDownloadStore>,
) -> Response {
    match download_store.get_all_counts() {
        Ok(counts) => {
            let counts: BTreeMap<String, u64> = counts.into_iter().collect();
            Json(counts).into_response()
        }
        Err(err) => {
            error!("Failed to load download counts: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

impl ServerState {
    fn new(
        config: ServerConfig,
        download_store: Arc<dyn DownloadStore>,
        user_manager: UserManager,
        token_secret: TokenSecret,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            registrar: Arc::new(Registrar::new(download_store.clone(), token_secret)),
            download_store,
            user_manager: Arc::new(Mutex::new(user_manager)),
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    download_store: Arc<dyn DownloadStore>,
    user_store: Box<dyn UserStore>,
    token_secret: TokenSecret,
) -> Result<Router> {
    let user_manager = UserManager::new(user_store);
    let state = ServerState::new(config.clone(), download_store, user_manager, token_secret);

    let auth_routes: Router = Router::new()
        .route("/login", post(login))
        .route("/logout", get(logout))
        .with_state(state.clone());

    let content_routes: Router = Router::new()
        .route("/save", post(save_content))
        .route("/render", post(render_content))
        .with_state(state.clone());

    let downloads_routes: Router = Router::new()
        .route("/counts", get(get_download_counts))
        .with_state(state.clone());

    let download_route: Router = Router::new()
        .route(
            &format!("/{}/{{token}}", config.download_route_prefix),
            get(serve_download),
        )
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let app: Router = home_router
        .merge(download_route)
        .nest("/v1/auth", auth_routes)
        .nest("/v1/content", content_routes)
        .nest("/v1/downloads", downloads_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

pub async fn run_server(
    config: ServerConfig,
    download_store: Arc<dyn DownloadStore>,
    user_store: Box<dyn UserStore>,
    token_secret: TokenSecret,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, download_store, user_store, token_secret)?;

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloads::SqliteDownloadStore;
    use crate::user::SqliteUserStore;
    use axum::http::{header, Request};
    use tempfile::TempDir;
    use tower::ServiceExt; // for `oneshot`

    const TEST_SECRET: &str = "fixed-test-secret";

    struct TestHarness {
        app: Router,
        download_store: Arc<dyn DownloadStore>,
        temp_dir: TempDir,
    }

    impl TestHarness {
        fn registrar(&self) -> Registrar {
            Registrar::new(self.download_store.clone(), TokenSecret::new(TEST_SECRET))
        }

        /// Writes a real file under the harness temp dir and returns its path.
        fn write_source_file(&self, name: &str, content: &[u8]) -> String {
            let path = self.temp_dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path.to_string_lossy().into_owned()
        }

        async fn oneshot(&self, request: Request<Body>) -> Response {
            self.app.clone().oneshot(request).await.unwrap()
        }
    }

    fn make_test_harness() -> TestHarness {
        let temp_dir = TempDir::new().unwrap();
        let download_store: Arc<dyn DownloadStore> =
            Arc::new(SqliteDownloadStore::new(temp_dir.path().join("downloads.db")).unwrap());
        let user_store =
            Box::new(SqliteUserStore::new(temp_dir.path().join("user.db")).unwrap());
        let app = make_app(
            ServerConfig::default(),
            download_store.clone(),
            user_store,
            TokenSecret::new(TEST_SECRET),
        )
        .unwrap();
        TestHarness {
            app,
            download_store,
            temp_dir,
        }
    }

    async fn response_body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn responds_forbidden_on_protected_routes() {
        let harness = make_test_harness();

        let protected_get_routes = vec!["/v1/downloads/counts", "/v1/auth/logout"];
        for route in protected_get_routes.into_iter() {
            println!("Trying route {}", route);
            let request = Request::builder().uri(route).body(Body::empty()).unwrap();
            let response = harness.oneshot(request).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }

        let protected_post_routes = vec!["/v1/content/save", "/v1/content/render"];
        for route in protected_post_routes.into_iter() {
            println!("Trying route {}", route);
            let request = Request::builder()
                .method("POST")
                .uri(route)
                .body(Body::empty())
                .unwrap();
            let response = harness.oneshot(request).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let harness = make_test_harness();

        let request = Request::builder()
            .uri("/secure-download/does-not-exist")
            .body(Body::empty())
            .unwrap();
        let response = harness.oneshot(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn anonymous_download_streams_when_login_not_required() {
        let harness = make_test_harness();
        let source_path = harness.write_source_file("report.pdf", b"pdf bytes");
        harness.registrar().register(&[Declaration {
            login_required: false,
            ..Declaration::for_file(&source_path)
        }]);

        let request = Request::builder()
            .uri("/secure-download/report.pdf")
            .body(Body::empty())
            .unwrap();
        let response = harness.oneshot(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/pdf"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(response_body(response).await, b"pdf bytes");

        assert_eq!(harness.download_store.get_count("report").unwrap(), 1);
    }

    #[tokio::test]
    async fn sequential_downloads_count_up() {
        let harness = make_test_harness();
        let source_path = harness.write_source_file("notes.txt", b"notes");
        harness.registrar().register(&[Declaration {
            login_required: false,
            ..Declaration::for_file(&source_path)
        }]);

        for _ in 0..3 {
            let request = Request::builder()
                .uri("/secure-download/notes.txt")
                .body(Body::empty())
                .unwrap();
            let response = harness.oneshot(request).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(harness.download_store.get_count("notes").unwrap(), 3);
    }

    #[tokio::test]
    async fn gated_download_redirects_anonymous_requests_to_login() {
        let harness = make_test_harness();
        let source_path = harness.write_source_file("secret.zip", b"zip bytes");
        harness.registrar().register(&[Declaration {
            opaque: true,
            ..Declaration::for_file(&source_path)
        }]);

        let token = crate::downloads::derive_token(&source_path, true, &TokenSecret::new(TEST_SECRET));

        let request = Request::builder()
            .uri(format!("/secure-download/{}", token))
            .body(Body::empty())
            .unwrap();
        let response = harness.oneshot(request).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(location.starts_with("/login?return_to="));
        // Without a referrer the login flow returns to the download itself.
        assert!(location.contains(&urlencoding::encode(&format!("/secure-download/{}", token)).into_owned()));

        // No file bytes and no count for a refused download.
        assert!(response_body(response).await.len() < 256);
        assert_eq!(harness.download_store.get_count("secret").unwrap(), 0);
    }

    #[tokio::test]
    async fn gated_download_redirect_prefers_the_referrer() {
        let harness = make_test_harness();
        let source_path = harness.write_source_file("secret.zip", b"zip bytes");
        harness
            .registrar()
            .register(&[Declaration::for_file(&source_path)]);

        let request = Request::builder()
            .uri("/secure-download/secret.zip")
            .header(header::REFERER, "https://example.com/articles/42")
            .body(Body::empty())
            .unwrap();
        let response = harness.oneshot(request).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(location.contains(&urlencoding::encode("https://example.com/articles/42").into_owned()));
    }

    #[tokio::test]
    async fn missing_source_file_is_a_server_error_naming_the_path() {
        let harness = make_test_harness();
        harness.registrar().register(&[Declaration {
            login_required: false,
            ..Declaration::for_file("/nowhere/gone.pdf")
        }]);

        let request = Request::builder()
            .uri("/secure-download/gone.pdf")
            .body(Body::empty())
            .unwrap();
        let response = harness.oneshot(request).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(response_body(response).await).unwrap();
        assert!(body.contains("/nowhere/gone.pdf"));
        assert_eq!(harness.download_store.get_count("gone").unwrap(), 0);
    }

    #[tokio::test]
    async fn login_grants_access_to_gated_downloads() {
        let harness = make_test_harness();
        let source_path = harness.write_source_file("secret.zip", b"zip bytes");
        harness
            .registrar()
            .register(&[Declaration::for_file(&source_path)]);

        {
            // Seed a user through a second handle onto the same database.
            let user_store =
                SqliteUserStore::new(harness.temp_dir.path().join("user.db")).unwrap();
            let mut manager = UserManager::new(Box::new(user_store));
            manager.add_user("alice").unwrap();
            manager
                .create_password_credentials("alice", "pw123".to_owned())
                .unwrap();
        }

        let request = Request::builder()
            .method("POST")
            .uri("/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"user_handle": "alice", "password": "pw123"}"#,
            ))
            .unwrap();
        let response = harness.oneshot(request).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value =
            serde_json::from_slice(&response_body(response).await).unwrap();
        let token = body["token"].as_str().unwrap().to_owned();

        let request = Request::builder()
            .uri("/secure-download/secret.zip")
            .header("Authorization", &token)
            .body(Body::empty())
            .unwrap();
        let response = harness.oneshot(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body(response).await, b"zip bytes");
        assert_eq!(harness.download_store.get_count("secret").unwrap(), 1);
    }

    #[tokio::test]
    async fn wrong_password_is_forbidden() {
        let harness = make_test_harness();
        {
            let user_store =
                SqliteUserStore::new(harness.temp_dir.path().join("user.db")).unwrap();
            let mut manager = UserManager::new(Box::new(user_store));
            manager.add_user("alice").unwrap();
            manager
                .create_password_credentials("alice", "pw123".to_owned())
                .unwrap();
        }

        let request = Request::builder()
            .method("POST")
            .uri("/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"user_handle": "alice", "password": "wrong"}"#,
            ))
            .unwrap();
        let response = harness.oneshot(request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
