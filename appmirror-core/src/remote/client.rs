//! HTTP client for the platform console API
//!
//! Implements [`RemoteGateway`] over the console endpoints the web front-end
//! uses. Authentication yields a bearer token (older deployments) and/or
//! session cookies (newer ones); both are kept for the life of the client.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::store::layout::normalize_platform_url;
use crate::types::{AppType, Segment};

use super::gateway::{
    AppExport, ImportOutcome, ImportRequest, ImportStatus, RemoteApp, RemoteAppDetail,
    RemoteDataset, RemoteDocument, RemoteGateway, RemoteWorkspace,
};

const API_PREFIX: &str = "/console/api";

/// Console API client for one platform.
pub struct HttpGateway {
    config: RemoteConfig,
    http_client: reqwest::Client,
    base_url: String,
    access_token: Mutex<Option<String>>,
}

impl HttpGateway {
    /// Create a client for the platform at `platform_url`.
    pub fn new(platform_url: &str, config: RemoteConfig) -> Result<Self> {
        let base_url = normalize_platform_url(platform_url);
        if base_url.is_empty() {
            return Err(Error::Config("platform url is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
            access_token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn token(&self) -> Option<String> {
        self.access_token
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or(None)
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.lock() {
            *guard = token;
        }
    }

    /// Issue one request and decode a successful JSON response.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let url = self.url(path);
        let mut builder = self.http_client.request(method.clone(), &url);
        if let Some(token) = self.token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Authentication(format!("invalid access token: {}", e)))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::RemoteUnavailable(format!("{} {} failed: {}", method, path, e)))?;

        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return serde_json::from_value(Value::Null).map_err(Error::from);
            }
            let text = response
                .text()
                .await
                .map_err(|e| Error::RemoteUnavailable(format!("failed to read response: {}", e)))?;
            let raw = if text.trim().is_empty() { "null" } else { text.as_str() };
            serde_json::from_str(raw).map_err(|e| Error::Remote {
                status: status.as_u16(),
                message: format!("failed to parse response from {}: {}", path, e),
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(classify_status(status, path, error_text))
        }
    }

    /// Request with retry for idempotent calls.
    ///
    /// Retries transient failures (5xx, timeouts) with exponential backoff.
    async fn request_with_retry<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying {} (attempt {}/{}), waiting {:?}",
                    path,
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.request(method.clone(), path, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::warn!(path, error = %e, "Transient remote error");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::RemoteUnavailable("max retries exceeded".to_string())))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_with_retry(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Walk a `page`/`limit` listing until `has_more` is false.
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let limit = self.config.page_size.max(1);
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = 1usize;

        loop {
            let page_path = format!("{}{}page={}&limit={}", path, separator, page, limit);
            let body: Page<T> = self.get(&page_path).await?;
            let count = body.data.len();
            items.extend(body.data);
            if !body.has_more || count == 0 {
                break;
            }
            page += 1;
        }

        Ok(items)
    }
}

/// Map a non-success status to the error taxonomy.
fn classify_status(status: StatusCode, path: &str, body: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Authentication(format!("{} rejected ({}): {}", path, status, body))
        }
        StatusCode::NOT_FOUND => Error::RemoteNotFound(path.to_string()),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Error::RemoteUnavailable(format!("API error ({}): {}", status, body))
        }
        s => Error::Remote {
            status: s.as_u16(),
            message: body,
        },
    }
}

// ============================================
// Wire formats
// ============================================

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Deserialize)]
struct LoginData {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct WorkspacesResponse {
    #[serde(default)]
    workspaces: Vec<RemoteWorkspace>,
}

#[derive(Deserialize)]
struct WireApp {
    id: String,
    name: String,
    mode: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

impl From<WireApp> for RemoteApp {
    fn from(app: WireApp) -> Self {
        RemoteApp {
            id: app.id,
            name: app.name,
            mode: app.mode,
            updated_at: app.updated_at,
        }
    }
}

impl From<WireApp> for RemoteAppDetail {
    fn from(app: WireApp) -> Self {
        RemoteAppDetail {
            id: app.id,
            name: app.name,
            mode: app.mode,
            updated_at: app.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct ExportResponse {
    data: String,
}

#[derive(Deserialize)]
struct WireImport {
    id: String,
    status: String,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl WireImport {
    fn into_outcome(self) -> Result<ImportOutcome> {
        let status = match self.status.as_str() {
            "completed" => ImportStatus::Completed,
            "completed-with-warnings" => ImportStatus::CompletedWithWarnings,
            "pending" => ImportStatus::Pending,
            "failed" => ImportStatus::Failed,
            other => {
                return Err(Error::Remote {
                    status: 200,
                    message: format!("unknown import status: {}", other),
                })
            }
        };
        Ok(ImportOutcome {
            import_id: self.id,
            app_id: self.app_id.filter(|id| !id.is_empty()),
            status,
            error: self.error.filter(|e| !e.is_empty()),
        })
    }
}

#[derive(Deserialize)]
struct WireSegment {
    #[serde(default)]
    id: String,
    position: i64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    keywords: Option<Vec<String>>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Deserialize)]
struct CreateDocumentResponse {
    document: RemoteDocument,
}

/// Accept unix seconds (number or numeric string) or RFC 3339 timestamps.
fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Some(Value::String(s)) => match s.parse::<i64>() {
            Ok(secs) => Utc.timestamp_opt(secs, 0).single(),
            Err(_) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        },
        _ => None,
    })
}

// ============================================
// Gateway implementation
// ============================================

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn authenticate(&self, email: &str, secret: &str) -> Result<()> {
        let body = json!({
            "email": email,
            "password": secret,
            "remember_me": true,
        });
        let response: LoginResponse = self.post("/login", &body).await?;

        if response.result.as_deref().is_some_and(|r| r != "success") {
            return Err(Error::Authentication(format!(
                "login for {} was not accepted",
                email
            )));
        }
        let token = response.data.and_then(|d| d.access_token);
        self.set_token(token);
        tracing::info!(base_url = %self.base_url, email, "Authenticated");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let result: Result<Value> = self.request(Method::GET, "/logout", None).await;
        self.set_token(None);
        result.map(|_| ())
    }

    async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>> {
        let response: WorkspacesResponse = self.get("/workspaces").await?;
        Ok(response.workspaces)
    }

    async fn switch_workspace(&self, workspace_id: &str) -> Result<()> {
        let _: Value = self
            .post("/workspaces/switch", &json!({ "tenant_id": workspace_id }))
            .await?;
        Ok(())
    }

    async fn list_apps(&self) -> Result<Vec<RemoteApp>> {
        let apps: Vec<WireApp> = self.get_all_pages("/apps").await?;
        Ok(apps.into_iter().map(RemoteApp::from).collect())
    }

    async fn export_app(&self, app_id: &str) -> Result<AppExport> {
        let path = format!(
            "/apps/{}/export?include_secret=false",
            urlencoding::encode(app_id)
        );
        let export: ExportResponse = self.get(&path).await?;
        let detail = self.get_app_detail(app_id).await?;
        Ok(AppExport {
            content: export.data,
            updated_at: detail.updated_at,
        })
    }

    async fn create_app(&self, name: &str, app_type: AppType) -> Result<RemoteAppDetail> {
        let body = json!({
            "name": name,
            "mode": app_type.remote_mode(),
            "icon_type": "emoji",
            "icon": "🤖",
            "icon_background": "#FFEAD5",
            "description": "",
        });
        let app: WireApp = self.post("/apps", &body).await?;
        Ok(app.into())
    }

    async fn import_app(&self, request: ImportRequest<'_>) -> Result<ImportOutcome> {
        let mut body = json!({
            "mode": "yaml-content",
            "yaml_content": request.content,
        });
        if let Some(app_id) = request.app_id {
            body["app_id"] = json!(app_id);
        }
        if let Some(name) = request.name {
            body["name"] = json!(name);
        }
        let import: WireImport = self.post("/apps/imports", &body).await?;
        import.into_outcome()
    }

    async fn confirm_import(&self, import_id: &str) -> Result<ImportOutcome> {
        let path = format!("/apps/imports/{}/confirm", urlencoding::encode(import_id));
        let import: WireImport = self.post(&path, &json!({})).await?;
        import.into_outcome()
    }

    async fn get_app_detail(&self, app_id: &str) -> Result<RemoteAppDetail> {
        let app: WireApp = self
            .get(&format!("/apps/{}", urlencoding::encode(app_id)))
            .await?;
        Ok(app.into())
    }

    async fn list_datasets(&self) -> Result<Vec<RemoteDataset>> {
        self.get_all_pages("/datasets").await
    }

    async fn list_documents(&self, dataset_id: &str) -> Result<Vec<RemoteDocument>> {
        let path = format!("/datasets/{}/documents", urlencoding::encode(dataset_id));
        self.get_all_pages(&path).await
    }

    async fn list_segments(&self, dataset_id: &str, document_id: &str) -> Result<Vec<Segment>> {
        let path = format!(
            "/datasets/{}/documents/{}/segments",
            urlencoding::encode(dataset_id),
            urlencoding::encode(document_id)
        );
        let segments: Vec<WireSegment> = self.get_all_pages(&path).await?;
        Ok(segments
            .into_iter()
            .map(|s| Segment {
                id: s.id,
                position: s.position,
                content: s.content,
                keywords: s.keywords.unwrap_or_default(),
                answer: s.answer,
            })
            .collect())
    }

    async fn create_document(
        &self,
        dataset_id: &str,
        name: &str,
        text: &str,
    ) -> Result<RemoteDocument> {
        let path = format!(
            "/datasets/{}/document/create-by-text",
            urlencoding::encode(dataset_id)
        );
        let body = json!({
            "name": name,
            "text": text,
            "indexing_technique": "high_quality",
            "process_rule": { "mode": "automatic" },
        });
        let response: CreateDocumentResponse = self.post(&path, &body).await?;
        Ok(response.document)
    }

    async fn update_document(
        &self,
        dataset_id: &str,
        document_id: &str,
        name: &str,
        text: &str,
    ) -> Result<()> {
        let path = format!(
            "/datasets/{}/documents/{}/update-by-text",
            urlencoding::encode(dataset_id),
            urlencoding::encode(document_id)
        );
        let _: Value = self
            .post(&path, &json!({ "name": name, "text": text }))
            .await?;
        Ok(())
    }

    async fn delete_document(&self, dataset_id: &str, document_id: &str) -> Result<()> {
        let path = format!(
            "/datasets/{}/documents/{}",
            urlencoding::encode(dataset_id),
            urlencoding::encode(document_id)
        );
        let _: Value = self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn list_models(&self) -> Result<Value> {
        self.get("/workspaces/current/models/model-types/llm").await
    }

    async fn list_tools(&self) -> Result<Value> {
        self.get("/workspaces/current/tool-providers").await
    }

    async fn list_plugins(&self) -> Result<Value> {
        let path = format!(
            "/workspaces/current/plugin/list?page=1&page_size={}",
            self.config.page_size
        );
        self.get(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_normalizes_base_url() {
        let client = HttpGateway::new(
            "https://cloud.example.com/console/api/",
            RemoteConfig::default(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://cloud.example.com");
        assert_eq!(
            client.url("/apps"),
            "https://cloud.example.com/console/api/apps"
        );
    }

    #[test]
    fn test_client_rejects_empty_url() {
        assert!(HttpGateway::new("  ", RemoteConfig::default()).is_err());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "/apps", String::new()),
            Error::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "/apps/x", String::new()),
            Error::RemoteNotFound(_)
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, "/apps", String::new()).is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "/apps", "bad".into()),
            Error::Remote { status: 400, .. }
        ));
    }

    #[test]
    fn test_wire_app_timestamps() {
        let app: WireApp = serde_json::from_value(json!({
            "id": "a1",
            "name": "Flow",
            "mode": "workflow",
            "updated_at": 1_700_000_000
        }))
        .unwrap();
        assert_eq!(app.updated_at.unwrap().timestamp(), 1_700_000_000);

        let app: WireApp = serde_json::from_value(json!({
            "id": "a1",
            "name": "Flow",
            "mode": "workflow",
            "updated_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(app.updated_at.unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let app: WireApp = serde_json::from_value(json!({
            "id": "a1",
            "name": "Flow",
            "mode": "workflow"
        }))
        .unwrap();
        assert!(app.updated_at.is_none());
    }

    #[test]
    fn test_import_status_mapping() {
        let wire = WireImport {
            id: "imp".into(),
            status: "pending".into(),
            app_id: Some(String::new()),
            error: None,
        };
        let outcome = wire.into_outcome().unwrap();
        assert_eq!(outcome.status, ImportStatus::Pending);
        assert!(outcome.app_id.is_none());
        assert!(!outcome.is_complete());
    }
}
