//! Remote → local reconciliation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::hashing::content_hash;
use crate::remote::{RemoteApp, RemoteGateway, SessionRegistry};
use crate::store::layout::{
    APP_CONTENT_FILE, MODELS_DIR, MODELS_FILE, PLUGINS_DIR, PLUGINS_FILE, TOOLS_DIR, TOOLS_FILE,
};
use crate::store::{Entry, Store};
use crate::types::{
    is_placeholder_id, role_can_edit, usable_remote_id, Account, App, AppType, KnowledgeBase,
    Platform, SyncMetadata, Workspace,
};

use super::{connect_workspace, create_unique, follow_rename, knowledge, login};

/// Result of a pull across one or more scopes.
#[derive(Debug, Default)]
pub struct PullReport {
    /// Accounts whose whole subtree was reconciled
    pub accounts_pulled: usize,
    pub workspaces_created: usize,
    pub workspaces_updated: usize,
    pub workspaces_deleted: usize,
    pub apps_created: usize,
    pub apps_updated: usize,
    /// Apps whose content, record and metadata already matched the remote
    pub apps_unchanged: usize,
    pub apps_deleted: usize,
    /// Model/tool/plugin snapshots written
    pub registries_refreshed: usize,
    pub knowledge_bases_pulled: usize,
    pub documents_written: usize,
    /// Documents left alone because a local copy exists
    pub documents_skipped: usize,
    pub documents_removed: usize,
    /// Errors encountered (scope → error message)
    pub errors: Vec<(String, String)>,
    /// Non-fatal problems (registry refreshes)
    pub warnings: Vec<String>,
}

impl PullReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of local entities created, changed or removed.
    pub fn changes(&self) -> usize {
        self.workspaces_created
            + self.workspaces_updated
            + self.workspaces_deleted
            + self.apps_created
            + self.apps_updated
            + self.apps_deleted
            + self.documents_written
            + self.documents_removed
    }

    fn record_error(&mut self, scope: impl Into<String>, error: &Error) {
        let scope = scope.into();
        tracing::warn!(scope = %scope, error = %error, "Pull step failed");
        self.errors.push((scope, error.to_string()));
    }
}

/// Where an app's remote identity comes from.
enum AppIdentity {
    Remote(String),
    /// Authored offline, waiting for its first push
    Pending,
    Orphan,
}

/// Resolve an app's identity; the sync metadata wins over the record.
fn app_identity(store: &Store, entry: &Entry<App>) -> AppIdentity {
    let meta = match store.read_sync_metadata(&entry.path) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(path = %entry.path.display(), error = %e, "Unreadable sync metadata");
            None
        }
    };
    if let Some(id) = meta.as_ref().and_then(|m| usable_remote_id(Some(&m.remote_id))) {
        return AppIdentity::Remote(id.to_string());
    }
    match entry.record.remote_id.as_deref().map(str::trim) {
        Some(id) if is_placeholder_id(id) => AppIdentity::Pending,
        Some(id) if !id.is_empty() => AppIdentity::Remote(id.to_string()),
        _ => AppIdentity::Orphan,
    }
}

/// Pulls remote state into the tree.
///
/// ## Usage
///
/// ```rust,ignore
/// let sessions = SessionRegistry::http(config.remote.clone());
/// let reconciler = PullReconciler::new(&store, &sessions)
///     .with_overlap(config.knowledge.overlap_chars);
///
/// let report = reconciler
///     .pull_all_with_progress(|current, total, label| {
///         println!("[{}/{}] {}", current, total, label);
///     })
///     .await?;
/// ```
pub struct PullReconciler<'a> {
    store: &'a Store,
    sessions: &'a SessionRegistry,
    overlap_chars: usize,
}

impl<'a> PullReconciler<'a> {
    pub fn new(store: &'a Store, sessions: &'a SessionRegistry) -> Self {
        Self {
            store,
            sessions,
            overlap_chars: crate::config::KnowledgeConfig::default().overlap_chars,
        }
    }

    /// Overlap used when stitching document segments.
    pub fn with_overlap(mut self, overlap_chars: usize) -> Self {
        self.overlap_chars = overlap_chars;
        self
    }

    // ============================================
    // Scopes
    // ============================================

    /// Pull every account of every platform.
    pub async fn pull_all(&self) -> Result<PullReport> {
        self.pull_all_with_progress(|_, _, _| {}).await
    }

    /// Pull every account, calling `on_progress(done, total, account)` after each one.
    ///
    /// An account that fails (bad credentials, unreachable platform) is
    /// recorded in the report; its siblings are still pulled.
    pub async fn pull_all_with_progress<F>(&self, on_progress: F) -> Result<PullReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let mut targets = Vec::new();
        for platform in self.store.list::<Platform>(self.store.root())? {
            for account in self.store.list::<Account>(&platform.path)? {
                targets.push((platform.clone(), account));
            }
        }
        self.pull_accounts(targets, on_progress).await
    }

    /// Pull every account of one platform.
    pub async fn pull_platform_with_progress<F>(
        &self,
        platform_dir: &Path,
        on_progress: F,
    ) -> Result<PullReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let platform = entry_at::<Platform>(self.store, platform_dir)?;
        let targets = self
            .store
            .list::<Account>(&platform.path)?
            .into_iter()
            .map(|account| (platform.clone(), account))
            .collect();
        self.pull_accounts(targets, on_progress).await
    }

    async fn pull_accounts<F>(
        &self,
        targets: Vec<(Entry<Platform>, Entry<Account>)>,
        mut on_progress: F,
    ) -> Result<PullReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let mut report = PullReport::default();
        let total = targets.len();

        for (i, (platform, account)) in targets.iter().enumerate() {
            let label = format!("{} @ {}", account.record.email, platform.record.name);
            match self.sync_account(platform, account, &mut report).await {
                Ok(()) => report.accounts_pulled += 1,
                Err(e) => report.record_error(format!("account {}", label), &e),
            }
            on_progress(i + 1, total, &label);
        }

        tracing::info!(
            accounts = report.accounts_pulled,
            changes = report.changes(),
            errors = report.errors.len(),
            "Pull finished"
        );
        Ok(report)
    }

    /// Pull one account: its workspaces and everything below them.
    ///
    /// Authentication failure is returned as an error.
    pub async fn pull_account(&self, account_dir: &Path) -> Result<PullReport> {
        let account = entry_at::<Account>(self.store, account_dir)?;
        let platform_dir = account_dir
            .parent()
            .ok_or_else(|| Error::NotFoundLocally(account_dir.to_path_buf()))?;
        let platform = entry_at::<Platform>(self.store, platform_dir)?;

        let mut report = PullReport::default();
        self.sync_account(&platform, &account, &mut report).await?;
        report.accounts_pulled += 1;
        Ok(report)
    }

    /// Pull one workspace: apps, registries and fully pulled knowledge bases.
    pub async fn pull_workspace(&self, workspace_dir: &Path) -> Result<PullReport> {
        let ctx = self.store.workspace_context(workspace_dir)?;
        let gateway = connect_workspace(self.store, self.sessions, &ctx).await?;

        let mut report = PullReport::default();
        self.sync_workspace_contents(gateway.as_ref(), workspace_dir, &mut report)
            .await?;
        Ok(report)
    }

    /// Re-pull a single app from the remote, overwriting its local content.
    ///
    /// Returns the app's directory, which moves if the remote renamed it.
    pub async fn pull_app(&self, app_dir: &Path) -> Result<PathBuf> {
        let entry = entry_at::<App>(self.store, app_dir)?;
        let remote_id = match app_identity(self.store, &entry) {
            AppIdentity::Remote(id) => id,
            _ => {
                return Err(Error::UnsupportedOperation(format!(
                    "{} has no remote counterpart yet; push it first",
                    entry.record.name
                )))
            }
        };

        let ctx = self.store.app_context(app_dir)?;
        let gateway = connect_workspace(self.store, self.sessions, &ctx).await?;
        let detail = gateway.get_app_detail(&remote_id).await?;
        let remote = RemoteApp {
            id: detail.id,
            name: detail.name,
            mode: detail.mode,
            updated_at: detail.updated_at,
        };
        let app_type = remote.app_type().unwrap_or(entry.record.app_type);

        let mut report = PullReport::default();
        let workspace_dir = ctx.workspace.path;
        self.upsert_app(
            gateway.as_ref(),
            &workspace_dir,
            Some(&entry),
            &remote,
            app_type,
            &mut report,
        )
        .await
    }

    /// Pull every document of one dataset into a workspace.
    ///
    /// Returns the knowledge base directory with the report.
    pub async fn pull_knowledge(
        &self,
        workspace_dir: &Path,
        dataset_id: &str,
    ) -> Result<(PathBuf, PullReport)> {
        let ctx = self.store.workspace_context(workspace_dir)?;
        let gateway = connect_workspace(self.store, self.sessions, &ctx).await?;

        let datasets =
            knowledge::refresh_dataset_listing(self.store, gateway.as_ref(), workspace_dir)
                .await?;
        let dataset = datasets
            .iter()
            .find(|d| d.id == dataset_id)
            .ok_or_else(|| Error::RemoteNotFound(format!("dataset {}", dataset_id)))?;

        let mut report = PullReport::default();
        let kb_dir = knowledge::pull_knowledge_base(
            self.store,
            gateway.as_ref(),
            workspace_dir,
            dataset,
            self.overlap_chars,
            &mut report,
        )
        .await?;
        Ok((kb_dir, report))
    }

    // ============================================
    // Reconciliation steps
    // ============================================

    async fn sync_account(
        &self,
        platform: &Entry<Platform>,
        account: &Entry<Account>,
        report: &mut PullReport,
    ) -> Result<()> {
        let gateway = login(self.store, self.sessions, platform, account).await?;
        let remote = gateway.list_workspaces().await?;
        let local = self.store.list::<Workspace>(&account.path)?;
        let mut observed = HashSet::new();

        for ws in &remote {
            observed.insert(ws.id.as_str());
            let record = Workspace {
                remote_id: ws.id.clone(),
                name: ws.name.clone(),
                role: ws.role.clone(),
            };

            let dir = match local.iter().find(|e| e.record.remote_id == ws.id) {
                Some(existing) => {
                    let path = follow_rename(self.store, &existing.path, &ws.name)?;
                    if self.store.update(&path, &record)? || path != existing.path {
                        report.workspaces_updated += 1;
                    }
                    path
                }
                None => {
                    let path = create_unique(self.store, &account.path, &record, &ws.id)?;
                    report.workspaces_created += 1;
                    tracing::info!(workspace = %ws.name, "Discovered workspace");
                    path
                }
            };

            let result = match gateway.switch_workspace(&ws.id).await {
                Ok(()) => {
                    self.sync_workspace_contents(gateway.as_ref(), &dir, report)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                if !e.is_recoverable() {
                    return Err(e);
                }
                report.record_error(format!("workspace {}", ws.name), &e);
            }
        }

        for stale in local
            .iter()
            .filter(|e| !observed.contains(e.record.remote_id.as_str()))
        {
            self.store.delete(&stale.path)?;
            report.workspaces_deleted += 1;
            tracing::info!(workspace = %stale.record.name, "Removed workspace deleted remotely");
        }

        Ok(())
    }

    /// Steps 3–6 for a workspace the gateway is already scoped to.
    ///
    /// A failed app listing is recorded and does not hold back the registries
    /// or the knowledge bases.
    async fn sync_workspace_contents(
        &self,
        gateway: &dyn RemoteGateway,
        workspace_dir: &Path,
        report: &mut PullReport,
    ) -> Result<()> {
        if let Err(e) = self.sync_apps(gateway, workspace_dir, report).await {
            if !e.is_recoverable() {
                return Err(e);
            }
            let workspace = workspace_dir.file_name().unwrap_or_default().to_string_lossy();
            report.record_error(format!("apps in {}", workspace), &e);
        }
        self.refresh_registries(gateway, workspace_dir, report).await;
        self.sync_knowledge(gateway, workspace_dir, report).await;
        Ok(())
    }

    async fn sync_apps(
        &self,
        gateway: &dyn RemoteGateway,
        workspace_dir: &Path,
        report: &mut PullReport,
    ) -> Result<()> {
        let remote_apps = gateway.list_apps().await?;
        let local = self.store.list::<App>(workspace_dir)?;
        let identities: Vec<AppIdentity> = local
            .iter()
            .map(|entry| app_identity(self.store, entry))
            .collect();

        let mut claimed: HashSet<PathBuf> = HashSet::new();
        for remote in &remote_apps {
            let Some(app_type) = remote.app_type() else {
                tracing::debug!(
                    app = %remote.name,
                    mode = %remote.mode,
                    "Skipping app of unknown mode"
                );
                continue;
            };

            let by_id = local.iter().zip(&identities).find(|(_, identity)| {
                matches!(identity, AppIdentity::Remote(id) if *id == remote.id)
            });
            let existing = by_id.map(|(entry, _)| entry).or_else(|| {
                local.iter().zip(&identities).find_map(|(entry, identity)| {
                    let adoptable = matches!(identity, AppIdentity::Orphan)
                        && entry.record.name == remote.name
                        && !claimed.contains(&entry.path);
                    adoptable.then_some(entry)
                })
            });
            if let Some(entry) = existing {
                claimed.insert(entry.path.clone());
            }

            if let Err(e) = self
                .upsert_app(gateway, workspace_dir, existing, remote, app_type, report)
                .await
            {
                if !e.is_recoverable() {
                    return Err(e);
                }
                report.record_error(format!("app {}", remote.name), &e);
            }
        }

        let remote_ids: HashSet<&str> = remote_apps.iter().map(|a| a.id.as_str()).collect();
        let remote_names: HashSet<&str> = remote_apps.iter().map(|a| a.name.as_str()).collect();
        for (entry, identity) in local.iter().zip(&identities) {
            if claimed.contains(&entry.path) {
                continue;
            }
            let stale = match identity {
                AppIdentity::Remote(id) => !remote_ids.contains(id.as_str()),
                AppIdentity::Pending => false,
                AppIdentity::Orphan => !remote_names.contains(entry.record.name.as_str()),
            };
            if stale {
                self.store.delete(&entry.path)?;
                report.apps_deleted += 1;
                tracing::info!(app = %entry.record.name, "Removed app with no remote counterpart");
            }
        }

        Ok(())
    }

    /// Export one remote app and write it over its local copy.
    async fn upsert_app(
        &self,
        gateway: &dyn RemoteGateway,
        workspace_dir: &Path,
        existing: Option<&Entry<App>>,
        remote: &RemoteApp,
        app_type: AppType,
        report: &mut PullReport,
    ) -> Result<PathBuf> {
        let export = gateway.export_app(&remote.id).await?;

        let role = self
            .store
            .get::<Workspace>(workspace_dir)?
            .and_then(|ws| ws.role);
        let record = App {
            remote_id: Some(remote.id.clone()),
            name: remote.name.clone(),
            app_type,
            readonly: !role_can_edit(role.as_deref()),
            role,
        };
        let path = match existing {
            Some(entry) => follow_rename(self.store, &entry.path, &remote.name)?,
            None => create_unique(self.store, workspace_dir, &record, &remote.id)?,
        };

        let moved = existing.is_some_and(|e| e.path != path);
        let record_changed = self.store.update(&path, &record)?;
        let content_changed = self
            .store
            .write_content(&path, APP_CONTENT_FILE, &export.content)?;

        let local_hash = content_hash(export.content.as_bytes());
        let watermark = export.updated_at.or(remote.updated_at);
        let previous = self.store.read_sync_metadata(&path).ok().flatten();
        let meta_current = previous.is_some_and(|m| {
            m.remote_id == remote.id
                && m.entity_type == app_type.as_str()
                && m.local_hash == local_hash
                && m.remote_updated_at == watermark
        });
        if !meta_current {
            self.store.write_sync_metadata(
                &path,
                &SyncMetadata {
                    remote_id: remote.id.clone(),
                    entity_type: app_type.as_str().to_string(),
                    last_synced_at: Utc::now(),
                    remote_updated_at: watermark,
                    local_hash,
                },
            )?;
        }

        if existing.is_none() {
            report.apps_created += 1;
            tracing::info!(app = %remote.name, "Pulled new app");
        } else if moved || record_changed || content_changed || !meta_current {
            report.apps_updated += 1;
            tracing::info!(app = %remote.name, "Updated app from remote");
        } else {
            report.apps_unchanged += 1;
        }
        Ok(path)
    }

    /// Overwrite the model, tool and plugin snapshots. Failures are warnings.
    async fn refresh_registries(
        &self,
        gateway: &dyn RemoteGateway,
        workspace_dir: &Path,
        report: &mut PullReport,
    ) {
        let models = gateway.list_models().await;
        self.write_registry(workspace_dir, MODELS_DIR, MODELS_FILE, models, report);
        let tools = gateway.list_tools().await;
        self.write_registry(workspace_dir, TOOLS_DIR, TOOLS_FILE, tools, report);
        let plugins = gateway.list_plugins().await;
        self.write_registry(workspace_dir, PLUGINS_DIR, PLUGINS_FILE, plugins, report);
    }

    fn write_registry(
        &self,
        workspace_dir: &Path,
        dir: &str,
        file: &str,
        fetched: Result<serde_json::Value>,
        report: &mut PullReport,
    ) {
        let written = fetched.and_then(|value| {
            self.store
                .write_snapshot(&workspace_dir.join(dir), file, &value)
        });
        match written {
            Ok(_) => report.registries_refreshed += 1,
            Err(e) => {
                tracing::warn!(registry = dir, error = %e, "Registry refresh failed");
                report.warnings.push(format!("{} registry: {}", dir, e));
            }
        }
    }

    /// Refresh the dataset listing and re-pull fully pulled knowledge bases.
    async fn sync_knowledge(
        &self,
        gateway: &dyn RemoteGateway,
        workspace_dir: &Path,
        report: &mut PullReport,
    ) {
        let datasets =
            match knowledge::refresh_dataset_listing(self.store, gateway, workspace_dir).await {
                Ok(datasets) => datasets,
                Err(e) => {
                    tracing::warn!(error = %e, "Dataset listing refresh failed");
                    report.warnings.push(format!("dataset listing: {}", e));
                    return;
                }
            };

        let tracked = match self.store.list::<KnowledgeBase>(workspace_dir) {
            Ok(list) => list,
            Err(e) => {
                report.record_error("knowledge", &e);
                return;
            }
        };

        for kb in tracked {
            if !matches!(self.store.read_sync_metadata(&kb.path), Ok(Some(_))) {
                continue;
            }
            let Some(dataset) = datasets.iter().find(|d| d.id == kb.record.remote_id) else {
                tracing::warn!(
                    kb = %kb.record.name,
                    "Knowledge base no longer listed remotely, keeping local copy"
                );
                report
                    .warnings
                    .push(format!("knowledge base {} not found remotely", kb.record.name));
                continue;
            };
            if let Err(e) = knowledge::pull_knowledge_base(
                self.store,
                gateway,
                workspace_dir,
                dataset,
                self.overlap_chars,
                report,
            )
            .await
            {
                report.record_error(format!("knowledge base {}", kb.record.name), &e);
            }
        }
    }
}

fn entry_at<R: crate::store::Record>(store: &Store, path: &Path) -> Result<Entry<R>> {
    Ok(Entry {
        path: path.to_path_buf(),
        record: store.require::<R>(path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("tree"), &dir.path().join("key")).unwrap()
    }

    fn app_entry(store: &Store, remote_id: Option<&str>, name: &str) -> Entry<App> {
        let ws = store.root().join("ws");
        fs::create_dir_all(&ws).unwrap();
        let record = App {
            remote_id: remote_id.map(String::from),
            name: name.to_string(),
            app_type: AppType::Workflow,
            role: None,
            readonly: false,
        };
        let path = store.create(&ws, &record).unwrap();
        Entry { path, record }
    }

    #[test]
    fn test_identity_prefers_sync_metadata() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let entry = app_entry(&store, None, "Flow");
        store
            .write_sync_metadata(
                &entry.path,
                &SyncMetadata {
                    remote_id: "a9".into(),
                    entity_type: "workflow".into(),
                    last_synced_at: Utc::now(),
                    remote_updated_at: None,
                    local_hash: String::new(),
                },
            )
            .unwrap();

        assert!(matches!(app_identity(&store, &entry), AppIdentity::Remote(id) if id == "a9"));
    }

    #[test]
    fn test_identity_classification() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let pending = app_entry(&store, Some("local-123"), "Draft");
        assert!(matches!(app_identity(&store, &pending), AppIdentity::Pending));

        let orphan = app_entry(&store, Some("  "), "Lost");
        assert!(matches!(app_identity(&store, &orphan), AppIdentity::Orphan));

        let known = app_entry(&store, Some("a1"), "Known");
        assert!(matches!(app_identity(&store, &known), AppIdentity::Remote(id) if id == "a1"));
    }

    #[test]
    fn test_report_changes() {
        let mut report = PullReport {
            apps_created: 1,
            apps_unchanged: 5,
            documents_written: 2,
            ..Default::default()
        };
        assert_eq!(report.changes(), 3);
        assert!(!report.has_errors());
        report.record_error("app x", &Error::RemoteUnavailable("503".into()));
        assert!(report.has_errors());
    }
}
