//! End-to-end session lifecycle through the HTTP router.
//!
//! These tests run the real router against a file-backed session store and a
//! mock OAuth provider, checking what the browser sees (status, body,
//! `Set-Cookie`) together with what ends up in the store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tokio_test::assert_ok;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use versecut_server::oauth::OAuthClient;
use versecut_server::provider::{Provider, ProviderParams, ProviderRegistry};
use versecut_server::routes::{create_router, AppState};
use versecut_server::session::{FileSessionStore, Session, SessionStore, MIN_SESSION_AGE};
use versecut_server::tokens::TokenService;

struct TestServer {
    provider: MockServer,
    store: Arc<FileSessionStore>,
    app: Router,
    _dir: tempfile::TempDir,
}

async fn setup() -> TestServer {
    let provider = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path().join("sessions.json")));
    let providers = ProviderRegistry::new().with(ProviderParams {
        provider: Provider::Google,
        token_url: format!("{}/token", provider.uri()),
        revoke_url: format!("{}/revoke", provider.uri()),
        client_id: "client-id".to_string(),
        client_secret: Some("client-secret".to_string()),
    });
    let service = TokenService::new(
        providers,
        store.clone(),
        OAuthClient::new().unwrap(),
        false,
    );
    TestServer {
        provider,
        store,
        app: create_router(AppState::new(service)),
        _dir: dir,
    }
}

fn post(uri: &str, cookie: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn exchange_body(remember_me: bool) -> String {
    serde_json::json!({
        "code": "code",
        "codeVerifier": "verifier",
        "redirectUri": "https://app.example/cb",
        "provider": "google",
        "rememberMe": remember_me
    })
    .to_string()
}

/// The `name=value` part of the response's `Set-Cookie` header.
fn cookie_pair(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("missing Set-Cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

fn session_id(pair: &str) -> &str {
    pair.trim_start_matches("session_id=")
}

async fn json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn mount_exchange(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn exchange_then_refresh_reuses_cookie_identifier() {
    let t = setup().await;
    mount_exchange(
        &t.provider,
        serde_json::json!({"access_token": "at-1", "expires_in": 3599, "refresh_token": "rt"}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"access_token": "at-2", "expires_in": 3599})),
        )
        .expect(2)
        .mount(&t.provider)
        .await;

    let response = t
        .app
        .clone()
        .oneshot(post("/oauth-exchange", None, exchange_body(false)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie_pair(&response);
    let id = session_id(&cookie).to_string();
    assert_eq!(json(response).await["accessToken"], "at-1");

    let created = t.store.get(&id).unwrap().unwrap();
    assert_eq!(created.used_count, 0);
    assert_eq!(created.last_used_at, None);
    assert_eq!(created.session_expires_at, created.created_at + MIN_SESSION_AGE);

    for expected_count in 1..=2 {
        let response = t
            .app
            .clone()
            .oneshot(post("/oauth-refresh", Some(&cookie), String::new()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(session_id(&cookie_pair(&response)), id);
        assert_eq!(json(response).await["accessToken"], "at-2");

        let session = t.store.get(&id).unwrap().unwrap();
        assert_eq!(session.used_count, expected_count);
        assert!(session.last_used_at.is_some());
        assert_eq!(session.refresh_token(), Some("rt"));
    }
}

#[tokio::test]
async fn sessions_survive_a_store_reopen() {
    let t = setup().await;
    mount_exchange(
        &t.provider,
        serde_json::json!({"access_token": "at", "refresh_token": "rt", "refresh_token_expires_in": 1000}),
    )
    .await;

    let response = t
        .app
        .clone()
        .oneshot(post("/oauth-exchange", None, exchange_body(true)))
        .await
        .unwrap();
    let cookie = cookie_pair(&response);

    let reopened = FileSessionStore::new(t.store.path());
    let session = reopened.get(session_id(&cookie)).unwrap().unwrap();
    assert!(session.remember_me);
    assert_eq!(session.session_expires_at, session.created_at + 1000);
}

#[tokio::test]
async fn expired_refresh_token_ends_session() {
    let t = setup().await;
    let now = chrono::Utc::now().timestamp();
    t.store
        .put(
            "stale",
            Session::new(Provider::Google, "rt".into(), Some(now - 60), true, now - 3600),
        )
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post("/oauth-refresh", Some("session_id=stale"), String::new()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(cookie_pair(&response), "session_id=");
    assert!(t.store.get("stale").unwrap().is_none());
}

#[tokio::test]
async fn revoke_ends_session_when_provider_is_down() {
    let t = setup().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&t.provider)
        .await;
    let now = chrono::Utc::now().timestamp();
    t.store
        .put("sid", Session::new(Provider::Google, "rt".into(), None, false, now))
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(post("/oauth-revoke", Some("session_id=sid"), String::new()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(cookie_pair(&response), "session_id=");
    assert!(t.store.get("sid").unwrap().is_none());

    // The cookie is dead now.
    let response = t
        .app
        .clone()
        .oneshot(post("/oauth-refresh", Some("session_id=sid"), String::new()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn concurrent_rotating_refreshes_rotate_once() {
    let t = setup().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"access_token": "at", "refresh_token": "rt-2"}))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&t.provider)
        .await;
    let now = chrono::Utc::now().timestamp();
    t.store
        .put("sid", Session::new(Provider::Google, "rt-1".into(), None, false, now))
        .unwrap();

    let (first, second) = tokio::join!(
        t.app
            .clone()
            .oneshot(post("/oauth-refresh", Some("session_id=sid"), String::new())),
        t.app
            .clone()
            .oneshot(post("/oauth-refresh", Some("session_id=sid"), String::new())),
    );
    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR]
    );
    let session = t.store.get("sid").unwrap().unwrap();
    assert_eq!(session.refresh_token(), Some("rt-2"));
    assert_eq!(session.used_count, 0);
}

#[tokio::test]
async fn health_counts_sessions() {
    let t = setup().await;
    let now = chrono::Utc::now().timestamp();
    for id in ["a", "b"] {
        assert_ok!(t
            .store
            .put(id, Session::new(Provider::Google, "rt".into(), None, false, now)));
    }

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 2);
}
