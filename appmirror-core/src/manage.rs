//! Operator-driven lifecycle of the tree.
//!
//! Platforms and accounts are registered by hand; apps and knowledge
//! documents can be authored offline and pushed later.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::remote::SessionRegistry;
use crate::store::layout::{normalize_platform_url, APP_CONTENT_FILE};
use crate::store::Store;
use crate::types::{
    new_placeholder_id, role_can_edit, Account, App, AppType, Document, KnowledgeBase,
    ManifestEntry, Platform,
};

/// Register a platform under the tree root.
///
/// The URL is normalized first. A platform with the same URL or the same
/// directory name is rejected.
pub fn add_platform(store: &Store, name: &str, url: &str) -> Result<PathBuf> {
    let url = normalize_platform_url(url);
    if url.is_empty() {
        return Err(Error::Config("platform url is empty".to_string()));
    }
    if let Some(existing) = store
        .list::<Platform>(store.root())?
        .into_iter()
        .find(|p| p.record.url == url)
    {
        return Err(Error::NameConflict {
            name: url,
            existing: existing.path,
        });
    }

    let record = Platform {
        name: name.trim().to_string(),
        url,
    };
    let path = store.create(store.root(), &record)?;
    tracing::info!(platform = %record.name, url = %record.url, "Added platform");
    Ok(path)
}

/// Remove a platform, its whole subtree and its cached session.
pub async fn remove_platform(
    store: &Store,
    sessions: &SessionRegistry,
    platform_dir: &Path,
) -> Result<()> {
    let platform: Platform = store.require(platform_dir)?;
    sessions.evict(&platform.url).await;
    store.delete(platform_dir)?;
    tracing::info!(platform = %platform.name, "Removed platform");
    Ok(())
}

/// Register an account on a platform and seal its password.
pub fn add_account(
    store: &Store,
    platform_dir: &Path,
    email: &str,
    password: &str,
) -> Result<PathBuf> {
    let platform: Platform = store.require(platform_dir)?;
    let email = email.trim();
    if email.is_empty() {
        return Err(Error::Config("account email is empty".to_string()));
    }

    let record = Account {
        email: email.to_string(),
        platform_url: platform.url,
    };
    let path = store.create(platform_dir, &record)?;
    store.write_secret(&path, password)?;
    tracing::info!(account = %record.email, "Added account");
    Ok(path)
}

/// Remove an account and everything mirrored for it.
pub fn remove_account(store: &Store, account_dir: &Path) -> Result<()> {
    let account: Account = store.require(account_dir)?;
    store.delete(account_dir)?;
    tracing::info!(account = %account.email, "Removed account");
    Ok(())
}

/// Author a new app offline.
///
/// The app gets a placeholder id and no sync metadata, so its status is
/// `local-modified` until the first push creates it remotely.
pub fn create_local_app(
    store: &Store,
    workspace_dir: &Path,
    name: &str,
    app_type: AppType,
    content: &str,
) -> Result<PathBuf> {
    let role = store.workspace_context(workspace_dir)?.workspace.record.role;
    let record = App {
        remote_id: Some(new_placeholder_id()),
        name: name.trim().to_string(),
        app_type,
        readonly: !role_can_edit(role.as_deref()),
        role,
    };
    let path = store.create(workspace_dir, &record)?;
    store.write_content(&path, APP_CONTENT_FILE, content)?;
    tracing::info!(app = %record.name, app_type = %app_type, "Created local app");
    Ok(path)
}

/// Author a new knowledge document offline and list it in the manifest.
pub fn create_local_document(
    store: &Store,
    kb_dir: &Path,
    name: &str,
    text: &str,
) -> Result<PathBuf> {
    store.require::<KnowledgeBase>(kb_dir)?;
    let record = Document {
        id: new_placeholder_id(),
        name: name.trim().to_string(),
        is_local: true,
    };
    let path = store.create(kb_dir, &record)?;
    store.write_content(&path, &record.content_file_name(), text)?;

    let mut manifest = store.read_manifest(kb_dir)?;
    manifest.documents.push(ManifestEntry {
        id: record.id.clone(),
        name: record.name.clone(),
        is_local: true,
        dir: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        synced_hash: None,
    });
    store.write_manifest(kb_dir, &manifest)?;
    tracing::info!(document = %record.name, "Created local document");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockGateway, MockGatewayFactory};
    use crate::types::{is_placeholder_id, SyncStatus};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("tree"), &dir.path().join("key")).unwrap()
    }

    #[test]
    fn test_add_platform_normalizes_and_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let path = add_platform(&store, "Cloud", "https://cloud.example.com/console/api/").unwrap();
        let platform: Platform = store.require(&path).unwrap();
        assert_eq!(platform.url, "https://cloud.example.com");

        let err = add_platform(&store, "Cloud again", "https://cloud.example.com").unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
        let err = add_platform(&store, "Cloud", "https://other.example.com").unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
    }

    #[test]
    fn test_add_account_seals_password() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let platform = add_platform(&store, "Cloud", "https://cloud.example.com").unwrap();

        let account = add_account(&store, &platform, "ops@example.com", "pw").unwrap();
        assert_eq!(store.read_secret(&account).unwrap(), "pw");
        let record: Account = store.require(&account).unwrap();
        assert_eq!(record.platform_url, "https://cloud.example.com");

        remove_account(&store, &account).unwrap();
        assert!(!account.exists());
    }

    #[tokio::test]
    async fn test_remove_platform_evicts_session() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mock = MockGateway::new();
        let sessions = SessionRegistry::new(Box::new(MockGatewayFactory::new(mock.clone())));
        let platform = add_platform(&store, "Cloud", "https://cloud.example.com").unwrap();
        sessions.session("https://cloud.example.com").unwrap();

        remove_platform(&store, &sessions, &platform).await.unwrap();
        assert!(!platform.exists());
        assert!(!sessions.is_cached("https://cloud.example.com"));
        assert_eq!(mock.call_count("logout"), 1);
    }

    #[test]
    fn test_local_app_is_pending_push() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let platform = add_platform(&store, "Cloud", "https://cloud.example.com").unwrap();
        let account = add_account(&store, &platform, "ops@example.com", "pw").unwrap();
        let ws = store
            .create(
                &account,
                &crate::types::Workspace {
                    remote_id: "w1".into(),
                    name: "Team".into(),
                    role: None,
                },
            )
            .unwrap();

        let app = create_local_app(&store, &ws, "Draft", AppType::Workflow, "app: {}\n").unwrap();
        let record: App = store.require(&app).unwrap();
        assert!(is_placeholder_id(record.remote_id.as_deref().unwrap()));
        assert_eq!(
            crate::sync::status(&store, &app).unwrap(),
            SyncStatus::LocalModified
        );
    }

    #[test]
    fn test_local_document_enters_manifest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let kb = store
            .create(
                store.root(),
                &KnowledgeBase {
                    remote_id: "ds1".into(),
                    name: "Docs".into(),
                    description: None,
                    document_count: 0,
                    word_count: 0,
                },
            )
            .unwrap();

        let doc = create_local_document(&store, &kb, "notes", "hello").unwrap();
        assert_eq!(store.read_content(&doc, "notes.txt").unwrap(), "hello");
        let manifest = store.read_manifest(&kb).unwrap();
        assert_eq!(manifest.documents.len(), 1);
        assert!(manifest.documents[0].is_local);
        assert_eq!(manifest.documents[0].dir, "notes");
    }
}
