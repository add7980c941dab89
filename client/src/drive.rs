//! Project storage in the Google Drive application data folder.
//!
//! Each project is one JSON file in `appDataFolder`, private to the
//! application. Every request carries the current access token and goes
//! through a [`Reauthenticator`], so an expired token costs one refresh and
//! one retry rather than an error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::retry::{Reauthenticator, TokenRefresher};

/// Drive folder that only this application can see.
const APP_DATA_FOLDER: &str = "appDataFolder";

/// MIME type of stored projects.
const PROJECT_MIME_TYPE: &str = "application/json";

/// Metadata fields requested for every file.
const FILE_FIELDS: &str = "id,name,modifiedTime";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A stored project as listed by Drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<ProjectFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    mime_type: &'a str,
    parents: [&'a str; 1],
}

/// Drive-backed store of project documents.
#[derive(Debug)]
pub struct DriveStore<R> {
    client: Client,
    base_url: Url,
    auth: Reauthenticator<R>,
}

impl<R: TokenRefresher> DriveStore<R> {
    /// Creates a store talking to the Drive API at `base_url`
    /// (normally `https://www.googleapis.com`).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ConnectError`] if the URL cannot hold
    /// API paths or the HTTP client cannot be built.
    pub fn new(base_url: &str, auth: Reauthenticator<R>) -> Result<Self, PersistenceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PersistenceError::ConnectError(format!("invalid Drive URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(PersistenceError::ConnectError(format!(
                "invalid Drive URL: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PersistenceError::ConnectError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// The re-authentication wrapper, for [`Reauthenticator::reset`] after a
    /// new sign-in.
    pub fn auth(&self) -> &Reauthenticator<R> {
        &self.auth
    }

    /// Lists all projects in the application data folder.
    pub async fn list_projects(&self) -> Result<Vec<ProjectFile>, PersistenceError> {
        let url = &self.endpoint(&["drive", "v3", "files"]);
        let query = &format!("mimeType='{PROJECT_MIME_TYPE}'");
        let fields = &format!("files({FILE_FIELDS})");
        let client = &self.client;

        let list: FileList = self
            .auth
            .run(|token| async move {
                let request = client.get(url.clone()).bearer_auth(token).query(&[
                    ("spaces", APP_DATA_FOLDER),
                    ("q", query.as_str()),
                    ("fields", fields.as_str()),
                ]);
                parse_json(execute(request).await?).await
            })
            .await?;

        debug!(count = list.files.len(), "Listed projects");
        Ok(list.files)
    }

    /// Downloads a project document.
    pub async fn load_project(&self, id: &str) -> Result<serde_json::Value, PersistenceError> {
        let url = &self.endpoint(&["drive", "v3", "files", id]);
        let client = &self.client;

        let project: serde_json::Value = self
            .auth
            .run(|token| async move {
                let request = client
                    .get(url.clone())
                    .bearer_auth(token)
                    .query(&[("alt", "media")]);
                parse_json(execute(request).await?).await
            })
            .await?;

        debug!(file_id = %id, "Loaded project");
        Ok(project)
    }

    /// Creates a new project file and uploads its content.
    pub async fn create_project(
        &self,
        name: &str,
        project: &serde_json::Value,
    ) -> Result<ProjectFile, PersistenceError> {
        let url = &self.endpoint(&["drive", "v3", "files"]);
        let metadata = &FileMetadata {
            name,
            mime_type: PROJECT_MIME_TYPE,
            parents: [APP_DATA_FOLDER],
        };
        let client = &self.client;

        let file: ProjectFile = self
            .auth
            .run(|token| async move {
                let request = client
                    .post(url.clone())
                    .bearer_auth(token)
                    .query(&[("fields", FILE_FIELDS)])
                    .json(metadata);
                parse_json(execute(request).await?).await
            })
            .await?;

        self.save_project(&file.id, project).await?;
        info!(file_id = %file.id, "Created project");
        Ok(file)
    }

    /// Replaces the content of an existing project.
    pub async fn save_project(
        &self,
        id: &str,
        project: &serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let url = &self.endpoint(&["upload", "drive", "v3", "files", id]);
        let body = &serde_json::to_vec(project)
            .map_err(|e| PersistenceError::DataError(e.to_string()))?;
        let client = &self.client;

        self.auth
            .run(|token| async move {
                let request = client
                    .patch(url.clone())
                    .bearer_auth(token)
                    .query(&[("uploadType", "media")])
                    .header(CONTENT_TYPE, PROJECT_MIME_TYPE)
                    .body(body.clone());
                execute(request).await.map(drop)
            })
            .await?;

        debug!(file_id = %id, bytes = body.len(), "Saved project");
        Ok(())
    }

    /// Deletes a project file.
    pub async fn delete_project(&self, id: &str) -> Result<(), PersistenceError> {
        let url = &self.endpoint(&["drive", "v3", "files", id]);
        let client = &self.client;

        self.auth
            .run(|token| async move {
                let request = client.delete(url.clone()).bearer_auth(token);
                execute(request).await.map(drop)
            })
            .await?;

        info!(file_id = %id, "Deleted project");
        Ok(())
    }

    /// API URL with each segment percent-encoded, so ids can't escape
    /// their path position.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejected URLs without a path to extend.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Sends a request, mapping 401/403 to `Unauthorized` and any other
/// non-success status or transport failure to `ConnectError`.
async fn execute(request: RequestBuilder) -> Result<Response, PersistenceError> {
    let response = request
        .send()
        .await
        .map_err(|e| PersistenceError::ConnectError(e.without_url().to_string()))?;

    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PersistenceError::Unauthorized),
        s if s.is_success() => Ok(response),
        s => Err(PersistenceError::ConnectError(format!(
            "drive returned status {}",
            s.as_u16()
        ))),
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, PersistenceError> {
    response
        .json()
        .await
        .map_err(|e| PersistenceError::DataError(e.without_url().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenGrant;
    use crate::error::AuthError;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticRefresher;

    impl TokenRefresher for StaticRefresher {
        async fn refresh_token(&self) -> Result<TokenGrant, AuthError> {
            Ok(TokenGrant {
                access_token: "fresh".to_string(),
                expires_in_sec: None,
            })
        }
    }

    fn store(server: &MockServer) -> DriveStore<StaticRefresher> {
        let auth = Reauthenticator::with_access_token(StaticRefresher, "token".to_string());
        DriveStore::new(&server.uri(), auth).unwrap()
    }

    #[tokio::test]
    async fn test_list_projects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("spaces", "appDataFolder"))
            .and(query_param("q", "mimeType='application/json'"))
            .and(query_param("fields", "files(id,name,modifiedTime)"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    {"id": "f1", "name": "Sermon", "modifiedTime": "2024-05-01T10:00:00.000Z"},
                    {"id": "f2", "name": "Lecture"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let files = store(&server).list_projects().await.unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, "f1");
        assert_eq!(
            files[0].modified_time.map(|t| t.timestamp()),
            Some(1_714_557_600)
        );
        assert_eq!(files[1].modified_time, None);
    }

    #[tokio::test]
    async fn test_list_projects_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        assert!(store(&server).list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/f1"))
            .and(query_param("alt", "media"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"segments": [1, 2]})),
            )
            .mount(&server)
            .await;

        let project = store(&server).load_project("f1").await.unwrap();

        assert_eq!(project["segments"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_load_project_invalid_json_is_data_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = store(&server).load_project("f1").await.unwrap_err();

        assert!(matches!(err, PersistenceError::DataError(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_connect_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/f1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let err = store(&server).delete_project("f1").await.unwrap_err();

        assert_eq!(
            err,
            PersistenceError::ConnectError("drive returned status 500".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_project_posts_metadata_then_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_json(serde_json::json!({
                "name": "Sermon",
                "mimeType": "application/json",
                "parents": ["appDataFolder"]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "new-id", "name": "Sermon"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/upload/drive/v3/files/new-id"))
            .and(query_param("uploadType", "media"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"segments": []})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "new-id"})))
            .expect(1)
            .mount(&server)
            .await;

        let file = store(&server)
            .create_project("Sermon", &serde_json::json!({"segments": []}))
            .await
            .unwrap();

        assert_eq!(file.id, "new-id");
        assert_eq!(file.name, "Sermon");
    }

    #[tokio::test]
    async fn test_delete_project() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/f1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).delete_project("f1").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_id_is_encoded_as_one_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/a%2Fb%3Fc%23d"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": 1})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/upload/drive/v3/files/a%2Fb%3Fc%23d"))
            .and(query_param("uploadType", "media"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        let project = store.load_project("a/b?c#d").await.unwrap();
        assert_eq!(project["ok"], 1);
        store
            .save_project("a/b?c#d", &serde_json::json!({"segments": []}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_base_url_path_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/proxy/drive/v3/files/f1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Reauthenticator::with_access_token(StaticRefresher, "token".to_string());
        let store = DriveStore::new(&format!("{}/proxy/", server.uri()), auth).unwrap();
        store.delete_project("f1").await.unwrap();
    }

    #[test]
    fn test_invalid_base_url_is_connect_error() {
        for url in ["not a url", "mailto:drive@example.com"] {
            let auth = Reauthenticator::with_access_token(StaticRefresher, "token".to_string());
            assert!(matches!(
                DriveStore::new(url, auth),
                Err(PersistenceError::ConnectError(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_forbidden_refreshes_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/f1"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/f1"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let project = store(&server).load_project("f1").await.unwrap();

        assert_eq!(project["ok"], true);
    }
}
