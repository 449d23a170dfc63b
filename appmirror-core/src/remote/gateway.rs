//! The contract the reconcilers consume from the remote platform.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{AppType, Segment};

/// A workspace (tenant) visible to the authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWorkspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// One entry of the app listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteApp {
    pub id: String,
    pub name: String,
    /// Remote mode string (`workflow`, `advanced-chat`, `chat`, ...)
    pub mode: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteApp {
    pub fn app_type(&self) -> Option<AppType> {
        AppType::from_remote_mode(&self.mode)
    }
}

/// Exported DSL of an app with the remote watermark at export time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppExport {
    pub content: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Current remote state of a single app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAppDetail {
    pub id: String,
    pub name: String,
    pub mode: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parameters of an import. Without `app_id` the remote creates a new app.
#[derive(Debug, Clone, Copy)]
pub struct ImportRequest<'a> {
    pub app_id: Option<&'a str>,
    pub content: &'a str,
    pub name: Option<&'a str>,
}

/// State of an import on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportStatus {
    Completed,
    CompletedWithWarnings,
    /// Version-format mismatch; needs [`RemoteGateway::confirm_import`]
    Pending,
    Failed,
}

/// Result of an import or import confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub import_id: String,
    pub app_id: Option<String>,
    pub status: ImportStatus,
    pub error: Option<String>,
}

impl ImportOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            ImportStatus::Completed | ImportStatus::CompletedWithWarnings
        )
    }
}

/// One entry of the dataset listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub word_count: u64,
}

/// One entry of a dataset's document listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub name: String,
}

/// Remote platform operations.
///
/// A gateway is one session against one platform URL. Calls are issued
/// sequentially by the reconcilers; implementations need not support
/// concurrent use of the same session.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Log in; later calls run as this account.
    async fn authenticate(&self, email: &str, secret: &str) -> Result<()>;

    /// End the session. Best effort.
    async fn logout(&self) -> Result<()>;

    async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>>;

    /// Make `workspace_id` the scope of app, dataset and registry calls.
    async fn switch_workspace(&self, workspace_id: &str) -> Result<()>;

    async fn list_apps(&self) -> Result<Vec<RemoteApp>>;

    async fn export_app(&self, app_id: &str) -> Result<AppExport>;

    /// Create an empty app of the given type.
    async fn create_app(&self, name: &str, app_type: AppType) -> Result<RemoteAppDetail>;

    async fn import_app(&self, request: ImportRequest<'_>) -> Result<ImportOutcome>;

    async fn confirm_import(&self, import_id: &str) -> Result<ImportOutcome>;

    async fn get_app_detail(&self, app_id: &str) -> Result<RemoteAppDetail>;

    async fn list_datasets(&self) -> Result<Vec<RemoteDataset>>;

    async fn list_documents(&self, dataset_id: &str) -> Result<Vec<RemoteDocument>>;

    async fn list_segments(&self, dataset_id: &str, document_id: &str) -> Result<Vec<Segment>>;

    async fn create_document(
        &self,
        dataset_id: &str,
        name: &str,
        text: &str,
    ) -> Result<RemoteDocument>;

    async fn update_document(
        &self,
        dataset_id: &str,
        document_id: &str,
        name: &str,
        text: &str,
    ) -> Result<()>;

    async fn delete_document(&self, dataset_id: &str, document_id: &str) -> Result<()>;

    /// Snapshot of the model registry, stored verbatim.
    async fn list_models(&self) -> Result<serde_json::Value>;

    /// Snapshot of the tool registry, stored verbatim.
    async fn list_tools(&self) -> Result<serde_json::Value>;

    /// Snapshot of installed plugins, stored verbatim.
    async fn list_plugins(&self) -> Result<serde_json::Value>;
}
