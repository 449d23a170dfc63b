//! Local → remote reconciliation for apps.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::hashing::content_hash;
use crate::remote::{ImportOutcome, ImportRequest, ImportStatus, RemoteGateway, SessionRegistry};
use crate::store::layout::APP_CONTENT_FILE;
use crate::store::Store;
use crate::types::{usable_remote_id, App, SyncMetadata};

use super::{connect_workspace, follow_rename, PullReconciler};

/// What to do when the remote changed since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Abort the push and pull the remote version instead
    PullFirst,
    /// Overwrite the remote version
    Force,
    /// Abort the push with [`Error::Conflict`]
    Cancel,
}

/// Details handed to a [`ConflictResolver`].
#[derive(Debug, Clone)]
pub struct PushConflict {
    pub app_path: PathBuf,
    pub app_name: String,
    pub recorded: Option<DateTime<Utc>>,
    pub remote: Option<DateTime<Utc>>,
}

/// Decides how a push proceeds after remote drift is detected.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &PushConflict) -> ConflictDecision;
}

/// Refuses every conflicting push.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnConflict;

impl ConflictResolver for AbortOnConflict {
    fn resolve(&self, _conflict: &PushConflict) -> ConflictDecision {
        ConflictDecision::Cancel
    }
}

/// A fixed decision, e.g. from a command-line flag.
impl ConflictResolver for ConflictDecision {
    fn resolve(&self, _conflict: &PushConflict) -> ConflictDecision {
        *self
    }
}

/// Result of a successful push call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Local content is now the remote's canonical version
    Pushed {
        path: PathBuf,
        remote_id: String,
        /// The app did not exist remotely before this push
        created: bool,
    },
    /// The resolver chose [`ConflictDecision::PullFirst`]; nothing was sent
    PulledInstead { path: PathBuf },
}

/// Pushes app content to the remote.
pub struct PushReconciler<'a> {
    store: &'a Store,
    sessions: &'a SessionRegistry,
    resolver: &'a dyn ConflictResolver,
}

impl<'a> PushReconciler<'a> {
    /// Reconciler that refuses conflicting pushes.
    pub fn new(store: &'a Store, sessions: &'a SessionRegistry) -> Self {
        Self {
            store,
            sessions,
            resolver: &AbortOnConflict,
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Push one app.
    ///
    /// Only workflow and chatflow apps can be pushed; anything else fails with
    /// [`Error::UnsupportedOperation`] before any network call, as do apps the
    /// operator's workspace role makes read-only. Local files are
    /// written only after the remote accepted the content.
    pub async fn push_app(&self, app_dir: &Path) -> Result<PushOutcome> {
        let app: App = self.store.require(app_dir)?;
        let meta = self.store.read_sync_metadata(app_dir)?;
        let app_type = meta
            .as_ref()
            .and_then(|m| m.app_type())
            .unwrap_or(app.app_type);

        if !app_type.supports_push() {
            return Err(Error::UnsupportedOperation(format!(
                "'{}' is a {} app; only workflow and chatflow apps can be pushed. \
                 Edit it in the platform console and pull to update the local copy.",
                app.name, app_type
            )));
        }
        if app.readonly {
            return Err(Error::UnsupportedOperation(format!(
                "'{}' is read-only for role {} in this workspace",
                app.name,
                app.role.as_deref().unwrap_or("unknown")
            )));
        }

        let content = self.store.read_content(app_dir, APP_CONTENT_FILE)?;
        let remote_id = meta
            .as_ref()
            .and_then(|m| usable_remote_id(Some(&m.remote_id)))
            .or_else(|| usable_remote_id(app.remote_id.as_deref()))
            .map(String::from);

        let ctx = self.store.app_context(app_dir)?;
        let gateway = connect_workspace(self.store, self.sessions, &ctx).await?;

        let (target_id, created) = match remote_id {
            None => {
                let detail = gateway.create_app(&app.name, app_type).await?;
                tracing::info!(app = %app.name, id = %detail.id, "Created app remotely");
                (detail.id, true)
            }
            Some(id) => {
                if let Some(meta) = &meta {
                    let detail = gateway.get_app_detail(&id).await?;
                    if detail.updated_at != meta.remote_updated_at {
                        let conflict = PushConflict {
                            app_path: app_dir.to_path_buf(),
                            app_name: app.name.clone(),
                            recorded: meta.remote_updated_at,
                            remote: detail.updated_at,
                        };
                        match self.resolver.resolve(&conflict) {
                            ConflictDecision::Force => {
                                tracing::warn!(app = %app.name, "Overwriting remote changes");
                            }
                            ConflictDecision::PullFirst => {
                                tracing::info!(
                                    app = %app.name,
                                    "Remote changed, pulling instead of pushing"
                                );
                                let path = PullReconciler::new(self.store, self.sessions)
                                    .pull_app(app_dir)
                                    .await?;
                                return Ok(PushOutcome::PulledInstead { path });
                            }
                            ConflictDecision::Cancel => {
                                return Err(Error::Conflict {
                                    path: conflict.app_path,
                                    recorded: conflict.recorded,
                                    remote: conflict.remote,
                                });
                            }
                        }
                    }
                }
                (id, false)
            }
        };

        let outcome = gateway
            .import_app(ImportRequest {
                app_id: Some(&target_id),
                content: &content,
                name: None,
            })
            .await?;
        let outcome = settle_import(gateway.as_ref(), outcome).await?;
        let final_id = outcome.app_id.unwrap_or(target_id);

        let detail = gateway.get_app_detail(&final_id).await?;
        let export = gateway.export_app(&final_id).await?;

        // Remote side done; bring the local copy in line with it
        let path = follow_rename(self.store, app_dir, &detail.name)?;
        let record = App {
            remote_id: Some(final_id.clone()),
            name: detail.name,
            app_type,
            role: app.role,
            readonly: app.readonly,
        };
        self.store.update(&path, &record)?;
        self.store
            .write_content(&path, APP_CONTENT_FILE, &export.content)?;
        self.store.write_sync_metadata(
            &path,
            &SyncMetadata {
                remote_id: final_id.clone(),
                entity_type: app_type.as_str().to_string(),
                last_synced_at: Utc::now(),
                remote_updated_at: export.updated_at.or(detail.updated_at),
                local_hash: content_hash(export.content.as_bytes()),
            },
        )?;

        tracing::info!(app = %record.name, id = %final_id, created, "Pushed app");
        Ok(PushOutcome::Pushed {
            path,
            remote_id: final_id,
            created,
        })
    }
}

/// Confirm a pending import and insist that it completed.
async fn settle_import(
    gateway: &dyn RemoteGateway,
    outcome: ImportOutcome,
) -> Result<ImportOutcome> {
    let outcome = match outcome.status {
        ImportStatus::Pending => {
            tracing::debug!(import = %outcome.import_id, "Import pending, confirming");
            gateway.confirm_import(&outcome.import_id).await?
        }
        _ => outcome,
    };

    match outcome.status {
        ImportStatus::Completed => Ok(outcome),
        ImportStatus::CompletedWithWarnings => {
            tracing::warn!(import = %outcome.import_id, "Import completed with warnings");
            Ok(outcome)
        }
        ImportStatus::Pending | ImportStatus::Failed => Err(Error::ImportFailed {
            import_id: outcome.import_id,
            reason: outcome
                .error
                .unwrap_or_else(|| format!("status {:?}", outcome.status)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resolver_cancels() {
        let conflict = PushConflict {
            app_path: PathBuf::from("studio/Flow"),
            app_name: "Flow".into(),
            recorded: None,
            remote: Some(Utc::now()),
        };
        assert_eq!(AbortOnConflict.resolve(&conflict), ConflictDecision::Cancel);
        assert_eq!(
            ConflictDecision::Force.resolve(&conflict),
            ConflictDecision::Force
        );
    }
}
