//! Typed CRUD over the mirrored tree.
//!
//! Every entity is a directory holding a `.meta.json` record tagged with its
//! kind. Children of a given kind live either directly under the parent
//! directory or under a fixed container (`studio/`, `knowledge/`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{
    Account, App, Document, DocumentManifest, KnowledgeBase, Platform, SyncMetadata, Workspace,
};

use super::layout::{
    is_hidden, is_reserved_name, sanitize_name, KNOWLEDGE_DIR, MANIFEST_FILE, META_FILE,
    STUDIO_DIR, SYNC_FILE,
};
use super::secrets::{self, SecretBox};

/// A record type persisted as one directory in the tree.
pub trait Record: Serialize + DeserializeOwned {
    /// Tag written into the record file
    const KIND: &'static str;

    /// Sub-directory of the parent entity holding records of this kind
    const CONTAINER: Option<&'static str> = None;

    /// Human-readable name the directory is derived from
    fn display_name(&self) -> &str;

    /// Whether two records describe the same entity (independent of name)
    fn same_entity(&self, other: &Self) -> bool;
}

impl Record for Platform {
    const KIND: &'static str = "platform";

    fn display_name(&self) -> &str {
        &self.name
    }

    fn same_entity(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Record for Account {
    const KIND: &'static str = "account";

    fn display_name(&self) -> &str {
        &self.email
    }

    fn same_entity(&self, other: &Self) -> bool {
        self.email.eq_ignore_ascii_case(&other.email)
    }
}

impl Record for Workspace {
    const KIND: &'static str = "workspace";

    fn display_name(&self) -> &str {
        &self.name
    }

    fn same_entity(&self, other: &Self) -> bool {
        self.remote_id == other.remote_id
    }
}

impl Record for App {
    const KIND: &'static str = "app";
    const CONTAINER: Option<&'static str> = Some(STUDIO_DIR);

    fn display_name(&self) -> &str {
        &self.name
    }

    fn same_entity(&self, other: &Self) -> bool {
        match (&self.remote_id, &other.remote_id) {
            (Some(a), Some(b)) => !a.trim().is_empty() && a == b,
            _ => false,
        }
    }
}

impl Record for KnowledgeBase {
    const KIND: &'static str = "knowledge-base";
    const CONTAINER: Option<&'static str> = Some(KNOWLEDGE_DIR);

    fn display_name(&self) -> &str {
        &self.name
    }

    fn same_entity(&self, other: &Self) -> bool {
        self.remote_id == other.remote_id
    }
}

impl Record for Document {
    const KIND: &'static str = "document";

    fn display_name(&self) -> &str {
        &self.name
    }

    fn same_entity(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, R> {
    kind: &'a str,
    #[serde(flatten)]
    record: &'a R,
}

#[derive(Deserialize)]
struct Envelope<R> {
    kind: String,
    #[serde(flatten)]
    record: R,
}

/// A record together with the directory it was read from.
#[derive(Debug, Clone)]
pub struct Entry<R> {
    pub path: PathBuf,
    pub record: R,
}

impl<R> Entry<R> {
    /// Directory name of the entry.
    pub fn dir_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Ancestors of an entity below a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    pub platform: Entry<Platform>,
    pub account: Entry<Account>,
    pub workspace: Entry<Workspace>,
}

/// Handle on the mirrored tree.
pub struct Store {
    root: PathBuf,
    secrets: SecretBox,
}

impl Store {
    /// Open (or initialize) a tree at `root`, with secrets sealed under the key at `key_path`.
    pub fn open(root: &Path, key_path: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        secrets::ensure_ignore_list(root)?;
        let secrets = SecretBox::load_or_create(key_path)?;
        Ok(Self {
            root: root.to_path_buf(),
            secrets,
        })
    }

    /// Root of the tree; parent of all platforms.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding children of kind `R` under `parent`.
    pub fn container_dir<R: Record>(&self, parent: &Path) -> PathBuf {
        match R::CONTAINER {
            Some(container) => parent.join(container),
            None => parent.to_path_buf(),
        }
    }

    // ============================================
    // Records
    // ============================================

    /// Enumerate immediate children of kind `R`.
    ///
    /// Hidden entries and plain files are ignored. Children whose record is
    /// unreadable or malformed are logged and skipped, so the result is a
    /// best-effort partial list rather than an error.
    pub fn list<R: Record>(&self, parent: &Path) -> Result<Vec<Entry<R>>> {
        let dir = self.container_dir::<R>(parent);
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for item in read_dir {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Unreadable directory entry");
                    continue;
                }
            };
            let name = item.file_name().to_string_lossy().into_owned();
            let path = item.path();
            if is_hidden(&name) || !path.is_dir() {
                continue;
            }
            if !path.join(META_FILE).exists() {
                tracing::debug!(path = %path.display(), kind = R::KIND, "No record file, skipping");
                continue;
            }

            match self.read_record::<R>(&path) {
                Ok(Some(record)) => entries.push(Entry { path, record }),
                Ok(None) => {
                    tracing::debug!(
                        path = %path.display(),
                        kind = R::KIND,
                        "Record of another kind, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        kind = R::KIND,
                        error = %e,
                        "Skipping malformed record"
                    );
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Read the record at `path`, if one of kind `R` exists there.
    pub fn get<R: Record>(&self, path: &Path) -> Result<Option<R>> {
        if !path.join(META_FILE).exists() {
            return Ok(None);
        }
        self.read_record(path)
    }

    /// Read the record at `path`, failing if it is absent.
    pub fn require<R: Record>(&self, path: &Path) -> Result<R> {
        self.get::<R>(path)?
            .ok_or_else(|| Error::NotFoundLocally(path.join(META_FILE)))
    }

    fn read_record<R: Record>(&self, path: &Path) -> Result<Option<R>> {
        let meta_path = path.join(META_FILE);
        let text = fs::read_to_string(&meta_path)?;
        let envelope: Envelope<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_str(&text).map_err(|e| Error::MalformedRecord {
                path: meta_path.clone(),
                message: e.to_string(),
            })?;
        if envelope.kind != R::KIND {
            return Ok(None);
        }
        let fields = serde_json::Value::Object(envelope.record);
        let record = serde_json::from_value(fields).map_err(|e| Error::MalformedRecord {
            path: meta_path,
            message: e.to_string(),
        })?;
        Ok(Some(record))
    }

    /// Create a child entity under `parent` and return its directory.
    ///
    /// If a directory with the sanitized name already holds the same entity it
    /// is updated in place. If it holds anything else, is a plain file, or the
    /// name is one the store reserves for its own files, the call fails with
    /// [`Error::NameConflict`]; the caller decides how to resolve it.
    pub fn create<R: Record>(&self, parent: &Path, record: &R) -> Result<PathBuf> {
        self.create_as(parent, record.display_name(), record)
    }

    /// Like [`Store::create`], but the directory is derived from `dir_name`
    /// instead of the record's display name.
    pub fn create_as<R: Record>(
        &self,
        parent: &Path,
        dir_name: &str,
        record: &R,
    ) -> Result<PathBuf> {
        let name = sanitize_name(dir_name);
        let path = self.container_dir::<R>(parent).join(&name);

        if is_reserved_name(&name) || (path.exists() && !path.is_dir()) {
            return Err(Error::NameConflict {
                name,
                existing: path,
            });
        }
        if path.exists() {
            let same = match self.get::<R>(&path) {
                Ok(Some(existing)) => existing.same_entity(record),
                _ => false,
            };
            if same {
                self.update(&path, record)?;
                return Ok(path);
            }
            if !is_empty_dir(&path)? {
                return Err(Error::NameConflict {
                    name,
                    existing: path,
                });
            }
        }

        fs::create_dir_all(&path)?;
        self.write_record(&path, record)?;
        tracing::debug!(path = %path.display(), kind = R::KIND, "Created entity");
        Ok(path)
    }

    /// Overwrite the record at an existing entity directory.
    ///
    /// Returns whether the file changed.
    pub fn update<R: Record>(&self, path: &Path, record: &R) -> Result<bool> {
        if !path.is_dir() {
            return Err(Error::NotFoundLocally(path.to_path_buf()));
        }
        self.write_record(path, record)
    }

    fn write_record<R: Record>(&self, path: &Path, record: &R) -> Result<bool> {
        let envelope = EnvelopeRef {
            kind: R::KIND,
            record,
        };
        let mut text = serde_json::to_string_pretty(&envelope)?;
        text.push('\n');
        write_if_changed(&path.join(META_FILE), text.as_bytes())
    }

    /// Move an entity to the directory derived from `new_name`.
    ///
    /// Everything inside the directory (record, sync metadata, content) moves with it.
    pub fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::NotFoundLocally(path.to_path_buf()))?;
        let name = sanitize_name(new_name);
        let target = parent.join(&name);
        if target == path {
            return Ok(target);
        }
        if target.exists() || is_reserved_name(&name) {
            return Err(Error::NameConflict {
                name,
                existing: target,
            });
        }
        fs::rename(path, &target)?;
        tracing::info!(from = %path.display(), to = %target.display(), "Renamed entity");
        Ok(target)
    }

    /// Remove an entity and everything below it. Absent paths are not an error.
    pub fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Deleted entity");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ============================================
    // Content and metadata files
    // ============================================

    /// Read a content file inside an entity directory.
    pub fn read_content(&self, dir: &Path, file: &str) -> Result<String> {
        let path = dir.join(file);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFoundLocally(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn content_exists(&self, dir: &Path, file: &str) -> bool {
        dir.join(file).is_file()
    }

    /// Write a content file, skipping the write when the bytes are unchanged.
    pub fn write_content(&self, dir: &Path, file: &str, content: &str) -> Result<bool> {
        fs::create_dir_all(dir)?;
        write_if_changed(&dir.join(file), content.as_bytes())
    }

    pub fn read_sync_metadata(&self, dir: &Path) -> Result<Option<SyncMetadata>> {
        read_json_file(&dir.join(SYNC_FILE))
    }

    pub fn write_sync_metadata(&self, dir: &Path, meta: &SyncMetadata) -> Result<bool> {
        write_json_file(&dir.join(SYNC_FILE), meta)
    }

    /// Document manifest of a knowledge base; empty when none was written yet.
    pub fn read_manifest(&self, kb_dir: &Path) -> Result<DocumentManifest> {
        Ok(read_json_file(&kb_dir.join(MANIFEST_FILE))?.unwrap_or_default())
    }

    pub fn write_manifest(&self, kb_dir: &Path, manifest: &DocumentManifest) -> Result<bool> {
        write_json_file(&kb_dir.join(MANIFEST_FILE), manifest)
    }

    /// Overwrite a registry snapshot file (models, tools, plugins, dataset listing).
    pub fn write_snapshot(
        &self,
        dir: &Path,
        file: &str,
        value: &serde_json::Value,
    ) -> Result<bool> {
        fs::create_dir_all(dir)?;
        write_json_file(&dir.join(file), value)
    }

    pub fn read_snapshot(&self, dir: &Path, file: &str) -> Result<Option<serde_json::Value>> {
        read_json_file(&dir.join(file))
    }

    // ============================================
    // Secrets
    // ============================================

    /// Seal the account password into the account directory.
    pub fn write_secret(&self, account_dir: &Path, secret: &str) -> Result<()> {
        secrets::write_secret(&self.secrets, account_dir, secret)
    }

    pub fn read_secret(&self, account_dir: &Path) -> Result<String> {
        secrets::read_secret(&self.secrets, account_dir)
    }

    // ============================================
    // Ancestry
    // ============================================

    /// Resolve platform and account above a workspace directory.
    pub fn workspace_context(&self, workspace_dir: &Path) -> Result<WorkspaceContext> {
        let workspace = self.entry_at::<Workspace>(workspace_dir)?;
        let account_dir = parent_of(workspace_dir)?;
        let account = self.entry_at::<Account>(account_dir)?;
        let platform = self.entry_at::<Platform>(parent_of(account_dir)?)?;
        Ok(WorkspaceContext {
            platform,
            account,
            workspace,
        })
    }

    /// Resolve the ancestors of an app directory (`<workspace>/studio/<app>`).
    pub fn app_context(&self, app_dir: &Path) -> Result<WorkspaceContext> {
        let studio = parent_of(app_dir)?;
        self.workspace_context(parent_of(studio)?)
    }

    /// Resolve the ancestors of a knowledge base directory (`<workspace>/knowledge/<kb>`).
    pub fn knowledge_context(&self, kb_dir: &Path) -> Result<WorkspaceContext> {
        let knowledge = parent_of(kb_dir)?;
        self.workspace_context(parent_of(knowledge)?)
    }

    fn entry_at<R: Record>(&self, path: &Path) -> Result<Entry<R>> {
        let record = self.require::<R>(path)?;
        Ok(Entry {
            path: path.to_path_buf(),
            record,
        })
    }
}

fn parent_of(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| Error::NotFoundLocally(path.to_path_buf()))
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_str(&text).map_err(|e| Error::MalformedRecord {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Some(value))
}

fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<bool> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    write_if_changed(path, text.as_bytes())
}

/// Atomically replace `path` with `bytes` unless it already holds them.
fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == bytes {
            return Ok(false);
        }
    }
    let dir = parent_of(path)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppType;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("tree"), &dir.path().join("secret.key")).unwrap()
    }

    fn app(remote_id: Option<&str>, name: &str) -> App {
        App {
            remote_id: remote_id.map(String::from),
            name: name.to_string(),
            app_type: AppType::Workflow,
            role: None,
            readonly: false,
        }
    }

    #[test]
    fn test_create_and_list_apps_under_studio() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ws = store.root().join("ws");
        fs::create_dir_all(&ws).unwrap();

        let path = store.create(&ws, &app(Some("a1"), "Support  Flow")).unwrap();
        assert_eq!(path, ws.join("studio").join("Support Flow"));

        let apps = store.list::<App>(&ws).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].record.remote_id.as_deref(), Some("a1"));
        assert_eq!(apps[0].dir_name(), "Support Flow");
    }

    #[test]
    fn test_create_conflict_with_unrelated_entity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ws = store.root().join("ws");

        store.create(&ws, &app(Some("a1"), "Flow")).unwrap();
        let err = store.create(&ws, &app(Some("a2"), "Flow")).unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));

        // Same entity re-created: updated in place
        let mut renamed_role = app(Some("a1"), "Flow");
        renamed_role.role = Some("owner".into());
        store.create(&ws, &renamed_role).unwrap();
        let got: App = store.require(&ws.join("studio/Flow")).unwrap();
        assert_eq!(got.role.as_deref(), Some("owner"));
    }

    #[test]
    fn test_create_refuses_store_file_names() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kb_dir = store.root().join("ws/knowledge/Docs");
        fs::create_dir_all(&kb_dir).unwrap();
        store
            .write_manifest(&kb_dir, &DocumentManifest::default())
            .unwrap();

        let doc = Document {
            id: "d1".into(),
            name: "manifest.json".into(),
            is_local: false,
        };
        let err = store.create(&kb_dir, &doc).unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
        assert!(kb_dir.join(MANIFEST_FILE).is_file());

        // Reserved even before the file itself exists
        let empty_kb = store.root().join("ws/knowledge/Empty");
        let err = store.create(&empty_kb, &doc).unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
        assert!(!empty_kb.join(MANIFEST_FILE).exists());

        // A plain file under any other name is not an entity directory either
        fs::write(kb_dir.join("notes"), "loose").unwrap();
        let loose = Document {
            id: "d2".into(),
            name: "notes".into(),
            is_local: false,
        };
        assert!(matches!(
            store.create(&kb_dir, &loose),
            Err(Error::NameConflict { .. })
        ));
    }

    #[test]
    fn test_rename_refuses_store_file_names() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ws = store.root().join("ws");
        let path = store
            .create(
                &ws,
                &KnowledgeBase {
                    remote_id: "k1".into(),
                    name: "Docs".into(),
                    description: None,
                    document_count: 0,
                    word_count: 0,
                },
            )
            .unwrap();

        let err = store.rename(&path, "Datasets.json").unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
        assert!(path.is_dir());
    }

    #[test]
    fn test_list_skips_malformed_and_hidden() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ws = store.root().join("ws");

        store.create(&ws, &app(Some("a1"), "Good")).unwrap();
        let bad = ws.join("studio/Bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(META_FILE), "{not json").unwrap();
        fs::create_dir_all(ws.join("studio/.cache")).unwrap();
        fs::create_dir_all(ws.join("studio/no-record")).unwrap();

        let apps = store.list::<App>(&ws).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].record.name, "Good");
    }

    #[test]
    fn test_list_ignores_other_kinds() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let account = store.root().join("p").join("acct");
        fs::create_dir_all(&account).unwrap();
        store
            .create(
                &account,
                &Workspace {
                    remote_id: "w1".into(),
                    name: "Team".into(),
                    role: None,
                },
            )
            .unwrap();

        assert_eq!(store.list::<Workspace>(&account).unwrap().len(), 1);
        assert!(store.list::<Account>(&account).unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ws = store.root().join("ws");
        let path = store.create(&ws, &app(None, "Orphan")).unwrap();

        store.delete(&path).unwrap();
        store.delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_write_content_reports_changes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let target = store.root().join("x");

        assert!(store.write_content(&target, "app.yml", "a: 1\n").unwrap());
        assert!(!store.write_content(&target, "app.yml", "a: 1\n").unwrap());
        assert!(store.write_content(&target, "app.yml", "a: 2\n").unwrap());
        assert_eq!(store.read_content(&target, "app.yml").unwrap(), "a: 2\n");
        assert!(matches!(
            store.read_content(&target, "missing.yml"),
            Err(Error::NotFoundLocally(_))
        ));
    }

    #[test]
    fn test_rename_moves_everything() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ws = store.root().join("ws");
        let path = store.create(&ws, &app(Some("a1"), "Old")).unwrap();
        store.write_content(&path, "app.yml", "dsl").unwrap();

        let moved = store.rename(&path, "New Name").unwrap();
        assert_eq!(moved, ws.join("studio/New Name"));
        assert!(!path.exists());
        assert_eq!(store.read_content(&moved, "app.yml").unwrap(), "dsl");
    }

    #[test]
    fn test_open_writes_ignore_list() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ignore = fs::read_to_string(store.root().join(".gitignore")).unwrap();
        assert!(ignore.lines().any(|l| l == ".secret"));
    }

    #[test]
    fn test_secret_round_trip_is_encrypted() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let account = store.root().join("acct");
        fs::create_dir_all(&account).unwrap();

        store.write_secret(&account, "s3cret").unwrap();
        let raw = fs::read_to_string(account.join(".secret")).unwrap();
        assert!(!raw.contains("s3cret"));
        assert_eq!(store.read_secret(&account).unwrap(), "s3cret");
    }
}
