//! In-memory gateway
//!
//! Holds a small fake platform (workspaces, apps, datasets, registries) and
//! records every call made against it. Compiled for tests and behind the
//! `mock` feature; the CLI never links it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::types::{AppType, Segment};

use super::gateway::{
    AppExport, ImportOutcome, ImportRequest, ImportStatus, RemoteApp, RemoteAppDetail,
    RemoteDataset, RemoteDocument, RemoteGateway, RemoteWorkspace,
};
use super::session::GatewayFactory;

/// An app held by the mock platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockApp {
    pub workspace_id: String,
    pub id: String,
    pub name: String,
    pub mode: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct MockDocument {
    id: String,
    name: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
struct MockDataset {
    workspace_id: String,
    dataset: RemoteDataset,
    documents: Vec<MockDocument>,
}

#[derive(Debug, Clone)]
struct PendingImport {
    id: String,
    app_id: Option<String>,
    content: String,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    credentials: Option<(String, String)>,
    authenticated: bool,
    workspaces: Vec<RemoteWorkspace>,
    current_workspace: Option<String>,
    apps: Vec<MockApp>,
    datasets: Vec<MockDataset>,
    models: Value,
    tools: Value,
    plugins: Value,
    failing_exports: HashSet<String>,
    registries_unavailable: bool,
    app_listing_unavailable: bool,
    pending_imports: bool,
    confirm_fails: bool,
    canonical_names: Vec<(String, String)>,
    imports: Vec<PendingImport>,
    calls: Vec<String>,
    clock: i64,
    next_id: u64,
}

impl MockState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        base_time() + Duration::seconds(self.clock)
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn require_auth(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::Authentication("not logged in".to_string()))
        }
    }

    fn workspace_scope(&self) -> Result<String> {
        self.require_auth()?;
        self.current_workspace
            .clone()
            .or_else(|| self.workspaces.first().map(|w| w.id.clone()))
            .ok_or_else(|| Error::RemoteNotFound("no workspace".to_string()))
    }

    fn app_mut(&mut self, app_id: &str) -> Result<&mut MockApp> {
        self.apps
            .iter_mut()
            .find(|a| a.id == app_id)
            .ok_or_else(|| Error::RemoteNotFound(format!("app {}", app_id)))
    }

    fn dataset_mut(&mut self, dataset_id: &str) -> Result<&mut MockDataset> {
        self.datasets
            .iter_mut()
            .find(|d| d.dataset.id == dataset_id)
            .ok_or_else(|| Error::RemoteNotFound(format!("dataset {}", dataset_id)))
    }

    fn apply_import(&mut self, import: PendingImport) -> Result<ImportOutcome> {
        let app_id = match import.app_id.clone() {
            Some(id) => id,
            None => {
                let scope = self.workspace_scope()?;
                let id = self.fresh_id("app");
                let updated_at = self.tick();
                self.apps.push(MockApp {
                    workspace_id: scope,
                    id: id.clone(),
                    name: import.name.clone().unwrap_or_else(|| "Imported".to_string()),
                    mode: AppType::Workflow.remote_mode().to_string(),
                    content: String::new(),
                    updated_at,
                });
                id
            }
        };

        let canonical = self
            .canonical_names
            .iter()
            .find(|(id, _)| *id == app_id)
            .map(|(_, name)| name.clone());
        let updated_at = self.tick();
        let app = self.app_mut(&app_id)?;
        app.content = import.content;
        app.updated_at = updated_at;
        if let Some(name) = canonical.or(import.name) {
            app.name = name;
        }

        Ok(ImportOutcome {
            import_id: import.id,
            app_id: Some(app_id),
            status: ImportStatus::Completed,
            error: None,
        })
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Fake platform shared by every session built from it.
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: impl Into<String>) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state.calls.push(call.into());
        state
    }

    // ============================================
    // Setup
    // ============================================

    /// Only accept this email/secret pair. Any pair is accepted otherwise.
    pub fn with_credentials(self, email: &str, secret: &str) -> Self {
        self.state().credentials = Some((email.to_string(), secret.to_string()));
        self
    }

    pub fn add_workspace(&self, id: &str, name: &str) {
        self.state().workspaces.push(RemoteWorkspace {
            id: id.to_string(),
            name: name.to_string(),
            role: Some("owner".to_string()),
        });
    }

    /// Change the operator's role in a workspace (`owner` by default).
    pub fn set_workspace_role(&self, id: &str, role: &str) {
        if let Some(ws) = self.state().workspaces.iter_mut().find(|w| w.id == id) {
            ws.role = Some(role.to_string());
        }
    }

    pub fn rename_workspace(&self, id: &str, name: &str) {
        if let Some(ws) = self.state().workspaces.iter_mut().find(|w| w.id == id) {
            ws.name = name.to_string();
        }
    }

    pub fn remove_workspace(&self, id: &str) {
        let mut state = self.state();
        state.workspaces.retain(|w| w.id != id);
        state.apps.retain(|a| a.workspace_id != id);
        state.datasets.retain(|d| d.workspace_id != id);
    }

    pub fn add_app(
        &self,
        workspace_id: &str,
        id: &str,
        name: &str,
        app_type: AppType,
        content: &str,
    ) {
        let mut state = self.state();
        let updated_at = state.tick();
        state.apps.push(MockApp {
            workspace_id: workspace_id.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            mode: app_type.remote_mode().to_string(),
            content: content.to_string(),
            updated_at,
        });
    }

    /// Change an app's content as another client would; bumps its watermark.
    pub fn edit_app(&self, id: &str, content: &str) {
        let mut state = self.state();
        let updated_at = state.tick();
        if let Ok(app) = state.app_mut(id) {
            app.content = content.to_string();
            app.updated_at = updated_at;
        }
    }

    pub fn remove_app(&self, id: &str) {
        self.state().apps.retain(|a| a.id != id);
    }

    pub fn app(&self, id: &str) -> Option<MockApp> {
        self.state().apps.iter().find(|a| a.id == id).cloned()
    }

    pub fn add_dataset(&self, workspace_id: &str, id: &str, name: &str) {
        self.state().datasets.push(MockDataset {
            workspace_id: workspace_id.to_string(),
            dataset: RemoteDataset {
                id: id.to_string(),
                name: name.to_string(),
                description: None,
                document_count: 0,
                word_count: 0,
            },
            documents: Vec::new(),
        });
    }

    /// Add a document made of `(position, content)` segments.
    pub fn add_document(&self, dataset_id: &str, id: &str, name: &str, segments: &[(i64, &str)]) {
        let mut state = self.state();
        if let Ok(dataset) = state.dataset_mut(dataset_id) {
            dataset.documents.push(MockDocument {
                id: id.to_string(),
                name: name.to_string(),
                segments: segments
                    .iter()
                    .map(|(position, content)| Segment {
                        id: format!("{}-seg-{}", id, position),
                        position: *position,
                        content: content.to_string(),
                        keywords: Vec::new(),
                        answer: None,
                    })
                    .collect(),
            });
            dataset.dataset.document_count = dataset.documents.len() as u64;
        }
    }

    pub fn remove_document(&self, dataset_id: &str, id: &str) {
        let mut state = self.state();
        if let Ok(dataset) = state.dataset_mut(dataset_id) {
            dataset.documents.retain(|d| d.id != id);
            dataset.dataset.document_count = dataset.documents.len() as u64;
        }
    }

    /// Documents of a dataset as `(id, name, joined segment text)`.
    pub fn documents(&self, dataset_id: &str) -> Vec<(String, String, String)> {
        self.state()
            .datasets
            .iter()
            .find(|d| d.dataset.id == dataset_id)
            .map(|d| {
                d.documents
                    .iter()
                    .map(|doc| {
                        let text = doc
                            .segments
                            .iter()
                            .map(|s| s.content.as_str())
                            .collect::<Vec<_>>()
                            .join("\n\n");
                        (doc.id.clone(), doc.name.clone(), text)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_registries(&self, models: Value, tools: Value, plugins: Value) {
        let mut state = self.state();
        state.models = models;
        state.tools = tools;
        state.plugins = plugins;
    }

    /// Make every export of `app_id` fail with a server error.
    pub fn fail_export(&self, app_id: &str) {
        self.state().failing_exports.insert(app_id.to_string());
    }

    /// Make the model/tool/plugin registries unreachable.
    pub fn fail_registries(&self) {
        self.state().registries_unavailable = true;
    }

    /// Make the app listing of every workspace fail with a server error.
    pub fn fail_app_listing(&self) {
        self.state().app_listing_unavailable = true;
    }

    /// Imports report `pending` until confirmed.
    pub fn require_import_confirmation(&self) {
        self.state().pending_imports = true;
    }

    /// Confirmations of pending imports report `failed`.
    pub fn fail_confirmations(&self) {
        self.state().confirm_fails = true;
    }

    /// Name the remote assigns to `app_id` on its next import.
    pub fn set_canonical_name(&self, app_id: &str, name: &str) {
        self.state()
            .canonical_names
            .push((app_id.to_string(), name.to_string()));
    }

    // ============================================
    // Call log
    // ============================================

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == name).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn authenticate(&self, email: &str, secret: &str) -> Result<()> {
        let mut state = self.record("authenticate");
        if let Some((expected_email, expected_secret)) = state.credentials.clone() {
            if expected_email != email || expected_secret != secret {
                state.authenticated = false;
                return Err(Error::Authentication(format!("invalid credentials for {}", email)));
            }
        }
        state.authenticated = true;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let mut state = self.record("logout");
        state.authenticated = false;
        state.current_workspace = None;
        Ok(())
    }

    async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>> {
        let state = self.record("list_workspaces");
        state.require_auth()?;
        Ok(state.workspaces.clone())
    }

    async fn switch_workspace(&self, workspace_id: &str) -> Result<()> {
        let mut state = self.record("switch_workspace");
        state.require_auth()?;
        if !state.workspaces.iter().any(|w| w.id == workspace_id) {
            return Err(Error::RemoteNotFound(format!("workspace {}", workspace_id)));
        }
        state.current_workspace = Some(workspace_id.to_string());
        Ok(())
    }

    async fn list_apps(&self) -> Result<Vec<RemoteApp>> {
        let state = self.record("list_apps");
        let scope = state.workspace_scope()?;
        if state.app_listing_unavailable {
            return Err(Error::RemoteUnavailable("app listing offline".to_string()));
        }
        Ok(state
            .apps
            .iter()
            .filter(|a| a.workspace_id == scope)
            .map(|a| RemoteApp {
                id: a.id.clone(),
                name: a.name.clone(),
                mode: a.mode.clone(),
                updated_at: Some(a.updated_at),
            })
            .collect())
    }

    async fn export_app(&self, app_id: &str) -> Result<AppExport> {
        let mut state = self.record("export_app");
        state.require_auth()?;
        if state.failing_exports.contains(app_id) {
            return Err(Error::RemoteUnavailable(format!("export of {} failed", app_id)));
        }
        let app = state.app_mut(app_id)?;
        Ok(AppExport {
            content: app.content.clone(),
            updated_at: Some(app.updated_at),
        })
    }

    async fn create_app(&self, name: &str, app_type: AppType) -> Result<RemoteAppDetail> {
        let mut state = self.record("create_app");
        let scope = state.workspace_scope()?;
        let id = state.fresh_id("app");
        let updated_at = state.tick();
        let app = MockApp {
            workspace_id: scope,
            id: id.clone(),
            name: name.to_string(),
            mode: app_type.remote_mode().to_string(),
            content: format!("app:\n  name: {}\n  mode: {}\n", name, app_type.remote_mode()),
            updated_at,
        };
        state.apps.push(app.clone());
        Ok(RemoteAppDetail {
            id,
            name: app.name,
            mode: app.mode,
            updated_at: Some(updated_at),
        })
    }

    async fn import_app(&self, request: ImportRequest<'_>) -> Result<ImportOutcome> {
        let mut state = self.record("import_app");
        state.require_auth()?;
        if let Some(app_id) = request.app_id {
            state.app_mut(app_id)?;
        }

        let import = PendingImport {
            id: state.fresh_id("import"),
            app_id: request.app_id.map(String::from),
            content: request.content.to_string(),
            name: request.name.map(String::from),
        };

        if state.pending_imports {
            let outcome = ImportOutcome {
                import_id: import.id.clone(),
                app_id: None,
                status: ImportStatus::Pending,
                error: None,
            };
            state.imports.push(import);
            return Ok(outcome);
        }
        state.apply_import(import)
    }

    async fn confirm_import(&self, import_id: &str) -> Result<ImportOutcome> {
        let mut state = self.record("confirm_import");
        state.require_auth()?;
        let position = state
            .imports
            .iter()
            .position(|i| i.id == import_id)
            .ok_or_else(|| Error::RemoteNotFound(format!("import {}", import_id)))?;
        let import = state.imports.remove(position);

        if state.confirm_fails {
            return Ok(ImportOutcome {
                import_id: import.id,
                app_id: import.app_id,
                status: ImportStatus::Failed,
                error: Some("DSL version rejected".to_string()),
            });
        }
        state.apply_import(import)
    }

    async fn get_app_detail(&self, app_id: &str) -> Result<RemoteAppDetail> {
        let mut state = self.record("get_app_detail");
        state.require_auth()?;
        let app = state.app_mut(app_id)?;
        Ok(RemoteAppDetail {
            id: app.id.clone(),
            name: app.name.clone(),
            mode: app.mode.clone(),
            updated_at: Some(app.updated_at),
        })
    }

    async fn list_datasets(&self) -> Result<Vec<RemoteDataset>> {
        let state = self.record("list_datasets");
        let scope = state.workspace_scope()?;
        Ok(state
            .datasets
            .iter()
            .filter(|d| d.workspace_id == scope)
            .map(|d| d.dataset.clone())
            .collect())
    }

    async fn list_documents(&self, dataset_id: &str) -> Result<Vec<RemoteDocument>> {
        let mut state = self.record("list_documents");
        state.require_auth()?;
        let dataset = state.dataset_mut(dataset_id)?;
        Ok(dataset
            .documents
            .iter()
            .map(|d| RemoteDocument {
                id: d.id.clone(),
                name: d.name.clone(),
            })
            .collect())
    }

    async fn list_segments(&self, dataset_id: &str, document_id: &str) -> Result<Vec<Segment>> {
        let mut state = self.record("list_segments");
        state.require_auth()?;
        let dataset = state.dataset_mut(dataset_id)?;
        dataset
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.segments.clone())
            .ok_or_else(|| Error::RemoteNotFound(format!("document {}", document_id)))
    }

    async fn create_document(
        &self,
        dataset_id: &str,
        name: &str,
        text: &str,
    ) -> Result<RemoteDocument> {
        let mut state = self.record("create_document");
        state.require_auth()?;
        let id = state.fresh_id("doc");
        let dataset = state.dataset_mut(dataset_id)?;
        dataset.documents.push(MockDocument {
            id: id.clone(),
            name: name.to_string(),
            segments: vec![Segment {
                id: format!("{}-seg-1", id),
                position: 1,
                content: text.to_string(),
                keywords: Vec::new(),
                answer: None,
            }],
        });
        dataset.dataset.document_count = dataset.documents.len() as u64;
        Ok(RemoteDocument {
            id,
            name: name.to_string(),
        })
    }

    async fn update_document(
        &self,
        dataset_id: &str,
        document_id: &str,
        name: &str,
        text: &str,
    ) -> Result<()> {
        let mut state = self.record("update_document");
        state.require_auth()?;
        let dataset = state.dataset_mut(dataset_id)?;
        let doc = dataset
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| Error::RemoteNotFound(format!("document {}", document_id)))?;
        doc.name = name.to_string();
        doc.segments = vec![Segment {
            id: format!("{}-seg-1", document_id),
            position: 1,
            content: text.to_string(),
            keywords: Vec::new(),
            answer: None,
        }];
        Ok(())
    }

    async fn delete_document(&self, dataset_id: &str, document_id: &str) -> Result<()> {
        let mut state = self.record("delete_document");
        state.require_auth()?;
        let dataset = state.dataset_mut(dataset_id)?;
        let before = dataset.documents.len();
        dataset.documents.retain(|d| d.id != document_id);
        if dataset.documents.len() == before {
            return Err(Error::RemoteNotFound(format!("document {}", document_id)));
        }
        dataset.dataset.document_count = dataset.documents.len() as u64;
        Ok(())
    }

    async fn list_models(&self) -> Result<Value> {
        let state = self.record("list_models");
        state.require_auth()?;
        if state.registries_unavailable {
            return Err(Error::RemoteUnavailable("model registry offline".to_string()));
        }
        Ok(registry_or_empty(&state.models))
    }

    async fn list_tools(&self) -> Result<Value> {
        let state = self.record("list_tools");
        state.require_auth()?;
        if state.registries_unavailable {
            return Err(Error::RemoteUnavailable("tool registry offline".to_string()));
        }
        Ok(registry_or_empty(&state.tools))
    }

    async fn list_plugins(&self) -> Result<Value> {
        let state = self.record("list_plugins");
        state.require_auth()?;
        if state.registries_unavailable {
            return Err(Error::RemoteUnavailable("plugin registry offline".to_string()));
        }
        Ok(registry_or_empty(&state.plugins))
    }
}

fn registry_or_empty(value: &Value) -> Value {
    if value.is_null() {
        json!({ "data": [] })
    } else {
        value.clone()
    }
}

/// Hands out sessions that all share one [`MockGateway`].
pub struct MockGatewayFactory {
    gateway: MockGateway,
}

impl MockGatewayFactory {
    pub fn new(gateway: MockGateway) -> Self {
        Self { gateway }
    }
}

impl GatewayFactory for MockGatewayFactory {
    fn connect(&self, _base_url: &str) -> Result<Arc<dyn RemoteGateway>> {
        Ok(Arc::new(self.gateway.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_require_login() {
        let mock = MockGateway::new().with_credentials("ops@example.com", "pw");
        mock.add_workspace("w1", "Team");

        assert!(matches!(
            mock.list_workspaces().await,
            Err(Error::Authentication(_))
        ));
        assert!(mock.authenticate("ops@example.com", "wrong").await.is_err());
        mock.authenticate("ops@example.com", "pw").await.unwrap();
        assert_eq!(mock.list_workspaces().await.unwrap().len(), 1);
        assert_eq!(mock.call_count("authenticate"), 2);
    }

    #[tokio::test]
    async fn test_pending_import_applies_on_confirm() {
        let mock = MockGateway::new();
        mock.add_workspace("w1", "Team");
        mock.add_app("w1", "a1", "Flow", AppType::Workflow, "v1");
        mock.require_import_confirmation();
        mock.authenticate("x", "y").await.unwrap();

        let outcome = mock
            .import_app(ImportRequest {
                app_id: Some("a1"),
                content: "v2",
                name: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, ImportStatus::Pending);
        assert_eq!(mock.app("a1").unwrap().content, "v1");

        let confirmed = mock.confirm_import(&outcome.import_id).await.unwrap();
        assert!(confirmed.is_complete());
        assert_eq!(mock.app("a1").unwrap().content, "v2");
    }

    #[tokio::test]
    async fn test_edits_advance_watermark() {
        let mock = MockGateway::new();
        mock.add_workspace("w1", "Team");
        mock.add_app("w1", "a1", "Flow", AppType::Workflow, "v1");
        let before = mock.app("a1").unwrap().updated_at;
        mock.edit_app("a1", "v2");
        assert!(mock.app("a1").unwrap().updated_at > before);
    }
}
