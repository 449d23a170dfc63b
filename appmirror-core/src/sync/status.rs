//! Sync status evaluation.
//!
//! Status is recomputed from disk on every call. Only [`remote_status`]
//! touches the network.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hashing::content_hash;
use crate::remote::RemoteGateway;
use crate::store::layout::{is_hidden, APP_CONTENT_FILE, META_FILE};
use crate::store::Store;
use crate::types::{usable_remote_id, App, KnowledgeBase, SyncMetadata, SyncStatus};

use super::knowledge::knowledge_hash;

/// Kind of entity reported by [`status_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    App,
    KnowledgeBase,
}

/// One line of a status listing.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub path: PathBuf,
    pub kind: EntityKind,
    pub name: String,
    pub status: SyncStatus,
}

/// Hash of the local content the metadata was recorded against.
///
/// `None` when the content itself is missing.
fn current_hash(store: &Store, path: &Path, meta: &SyncMetadata) -> Result<Option<String>> {
    if meta.entity_type == SyncMetadata::DATASET_TYPE {
        let manifest = store.read_manifest(path)?;
        return knowledge_hash(store, path, &manifest).map(Some);
    }
    match store.read_content(path, APP_CONTENT_FILE) {
        Ok(content) => Ok(Some(content_hash(content.as_bytes()))),
        Err(Error::NotFoundLocally(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Local status of an app or knowledge base.
///
/// Without sync metadata the entity has never been synced and counts as
/// locally modified. Otherwise it is synced exactly when the current content
/// hashes to the recorded `local_hash`.
pub fn status(store: &Store, path: &Path) -> Result<SyncStatus> {
    let Some(meta) = store.read_sync_metadata(path)? else {
        return Ok(SyncStatus::LocalModified);
    };
    match current_hash(store, path, &meta)? {
        Some(hash) if hash == meta.local_hash => Ok(SyncStatus::Synced),
        _ => Ok(SyncStatus::LocalModified),
    }
}

/// Status of an app including remote drift.
///
/// `gateway` must be authenticated and scoped to the app's workspace. A live
/// `updated_at` different from the recorded watermark reports
/// [`SyncStatus::RemoteModified`], even when local edits exist too.
pub async fn remote_status(
    store: &Store,
    gateway: &dyn RemoteGateway,
    app_path: &Path,
) -> Result<SyncStatus> {
    let Some(meta) = store.read_sync_metadata(app_path)? else {
        return Ok(SyncStatus::LocalModified);
    };
    let Some(remote_id) = usable_remote_id(Some(&meta.remote_id)) else {
        return Ok(SyncStatus::LocalModified);
    };

    let detail = gateway.get_app_detail(remote_id).await?;
    if detail.updated_at != meta.remote_updated_at {
        tracing::debug!(
            path = %app_path.display(),
            recorded = ?meta.remote_updated_at,
            remote = ?detail.updated_at,
            "Remote drift detected"
        );
        return Ok(SyncStatus::RemoteModified);
    }
    status(store, app_path)
}

/// Walk the tree below `root` and report every app and fully pulled
/// knowledge base. Unreadable entries are logged and skipped.
pub fn status_tree(store: &Store, root: &Path) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    walk(store, root, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn walk(store: &Store, dir: &Path, out: &mut Vec<StatusEntry>) -> Result<()> {
    if dir.join(META_FILE).exists() {
        if let Some(entry) = evaluate(store, dir) {
            out.push(entry);
            return Ok(());
        }
    }

    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for item in read_dir.flatten() {
        let path = item.path();
        if is_hidden(&item.file_name().to_string_lossy()) || !path.is_dir() {
            continue;
        }
        if let Err(e) = walk(store, &path, out) {
            tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable directory");
        }
    }
    Ok(())
}

/// Status line for `dir` if it is an app or a tracked knowledge base.
fn evaluate(store: &Store, dir: &Path) -> Option<StatusEntry> {
    let (kind, name) = match store.get::<App>(dir) {
        Ok(Some(app)) => (EntityKind::App, app.name),
        Ok(None) => match store.get::<KnowledgeBase>(dir) {
            Ok(Some(kb)) => {
                if !matches!(store.read_sync_metadata(dir), Ok(Some(_))) {
                    return None;
                }
                (EntityKind::KnowledgeBase, kb.name)
            }
            _ => return None,
        },
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Unreadable record");
            return None;
        }
    };

    match status(store, dir) {
        Ok(status) => Some(StatusEntry {
            path: dir.to_path_buf(),
            kind,
            name,
            status,
        }),
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Status unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppType;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store, PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("tree"), &dir.path().join("key")).unwrap();
        let ws = store.root().join("p/acct/ws");
        let app = store
            .create(
                &ws,
                &App {
                    remote_id: Some("a1".into()),
                    name: "Flow".into(),
                    app_type: AppType::Workflow,
                    role: None,
                    readonly: false,
                },
            )
            .unwrap();
        (dir, store, app)
    }

    fn record_sync(store: &Store, app: &Path, content: &str) {
        store.write_content(app, APP_CONTENT_FILE, content).unwrap();
        store
            .write_sync_metadata(
                app,
                &SyncMetadata {
                    remote_id: "a1".into(),
                    entity_type: "workflow".into(),
                    last_synced_at: Utc::now(),
                    remote_updated_at: None,
                    local_hash: content_hash(content.as_bytes()),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_never_synced_is_local_modified() {
        let (_dir, store, app) = setup();
        assert_eq!(status(&store, &app).unwrap(), SyncStatus::LocalModified);
    }

    #[test]
    fn test_status_follows_hash() {
        let (_dir, store, app) = setup();
        record_sync(&store, &app, "version: 1\n");
        assert_eq!(status(&store, &app).unwrap(), SyncStatus::Synced);

        store.write_content(&app, APP_CONTENT_FILE, "version: 2\n").unwrap();
        assert_eq!(status(&store, &app).unwrap(), SyncStatus::LocalModified);

        // Reverting the edit restores the synced state
        store.write_content(&app, APP_CONTENT_FILE, "version: 1\n").unwrap();
        assert_eq!(status(&store, &app).unwrap(), SyncStatus::Synced);
    }

    #[test]
    fn test_missing_content_is_local_modified() {
        let (_dir, store, app) = setup();
        record_sync(&store, &app, "x");
        fs::remove_file(app.join(APP_CONTENT_FILE)).unwrap();
        assert_eq!(status(&store, &app).unwrap(), SyncStatus::LocalModified);
    }

    #[test]
    fn test_status_tree_lists_apps() {
        let (_dir, store, app) = setup();
        record_sync(&store, &app, "x");

        let entries = status_tree(&store, store.root()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntityKind::App);
        assert_eq!(entries[0].name, "Flow");
        assert_eq!(entries[0].status, SyncStatus::Synced);
    }
}
