//! Recovery from expired access tokens against mock token and Drive servers.
//!
//! Drive answers 401 for a stale token; the client must obtain a new one
//! from the token server using its `session_id` cookie and retry exactly
//! once. When the session itself is gone, the client must stop calling
//! Drive until it is reset.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use versecut_client::auth::AuthClient;
use versecut_client::drive::DriveStore;
use versecut_client::error::PersistenceError;
use versecut_client::retry::Reauthenticator;

const SESSION_ID: &str = "8c1e2f4a-session";

struct Servers {
    token: MockServer,
    drive: MockServer,
}

impl Servers {
    async fn start() -> Self {
        Self {
            token: MockServer::start().await,
            drive: MockServer::start().await,
        }
    }

    fn store(&self, access_token: Option<&str>) -> DriveStore<AuthClient> {
        let auth = AuthClient::new(&self.token.uri())
            .unwrap()
            .with_session_id(SESSION_ID);
        let reauth = match access_token {
            Some(token) => Reauthenticator::with_access_token(auth, token.to_string()),
            None => Reauthenticator::new(auth),
        };
        DriveStore::new(&self.drive.uri(), reauth).unwrap()
    }

    async fn mount_refresh(&self, access_token: &str, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth-refresh"))
            .and(header("cookie", format!("session_id={SESSION_ID}").as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "accessToken": access_token,
                        "expiresInSec": 3599
                    }))
                    .set_delay(Duration::from_millis(20)),
            )
            .expect(expected_calls)
            .mount(&self.token)
            .await;
    }

    async fn mount_list(&self, access_token: &str, status: u16, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header("authorization", format!("Bearer {access_token}").as_str()))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(serde_json::json!({"files": [{"id": "f1", "name": "Sermon"}]})),
            )
            .expect(expected_calls)
            .mount(&self.drive)
            .await;
    }
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let servers = Servers::start().await;
    servers.mount_refresh("fresh", 1).await;
    servers.mount_list("expired", 401, 1).await;
    servers.mount_list("fresh", 200, 1).await;

    let store = servers.store(Some("expired"));
    let files = store.list_projects().await.unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "Sermon");
    assert!(!store.auth().is_auth_failed());
}

#[tokio::test]
async fn first_operation_fetches_a_token() {
    let servers = Servers::start().await;
    servers.mount_refresh("fresh", 1).await;
    servers.mount_list("fresh", 200, 2).await;

    let store = servers.store(None);
    assert_ok!(store.list_projects().await);
    assert_ok!(store.list_projects().await);
}

#[tokio::test]
async fn concurrent_operations_share_one_refresh() {
    let servers = Servers::start().await;
    servers.mount_refresh("fresh", 1).await;
    servers.mount_list("expired", 401, 3).await;
    servers.mount_list("fresh", 200, 3).await;

    let store = servers.store(Some("expired"));
    let (a, b, c) = tokio::join!(
        store.list_projects(),
        store.list_projects(),
        store.list_projects()
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
}

#[tokio::test]
async fn revoked_session_latches_until_reset() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth-refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"error": "no session", "code": "unauthorized"})),
        )
        .expect(1)
        .mount(&servers.token)
        .await;
    servers.mount_list("expired", 401, 1).await;
    servers.mount_list("relogged", 200, 1).await;

    let store = servers.store(Some("expired"));

    let err = store.list_projects().await.unwrap_err();
    assert_eq!(err, PersistenceError::Unauthorized);
    assert!(store.auth().is_auth_failed());

    // Latched: neither Drive nor the token server is called again.
    let err = store.load_project("f1").await.unwrap_err();
    assert_eq!(err, PersistenceError::Unauthorized);

    store.auth().reset("relogged".to_string());
    let files = store.list_projects().await.unwrap();
    assert_eq!(files[0].id, "f1");
}

#[tokio::test]
async fn rejection_after_refresh_latches() {
    let servers = Servers::start().await;
    servers.mount_refresh("fresh", 1).await;
    servers.mount_list("expired", 403, 1).await;
    servers.mount_list("fresh", 403, 1).await;

    let store = servers.store(Some("expired"));

    assert_eq!(
        store.list_projects().await.unwrap_err(),
        PersistenceError::Unauthorized
    );
    assert_eq!(
        store.list_projects().await.unwrap_err(),
        PersistenceError::Unauthorized
    );
}

#[tokio::test]
async fn token_server_outage_is_a_connect_error() {
    let servers = Servers::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth-refresh"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&servers.token)
        .await;
    servers.mount_list("expired", 401, 1).await;

    let store = servers.store(Some("expired"));
    let err = assert_err!(store.list_projects().await);

    assert!(matches!(err, PersistenceError::ConnectError(_)));
    assert!(!store.auth().is_auth_failed());
}
