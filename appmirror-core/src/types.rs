//! Core domain types for appmirror
//!
//! These types are the records persisted in the local tree. Each directory in
//! the tree holds exactly one of them (see [`crate::store`]).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Platform** | A deployment of the remote platform, identified by its base URL |
//! | **Account** | Operator credentials on a Platform |
//! | **Workspace** | A remote tenant the Account belongs to |
//! | **App** | An application definition; its content is the DSL document |
//! | **KnowledgeBase** | A remote dataset holding Documents |
//! | **Document** | A text artifact inside a KnowledgeBase |
//! | **Segment** | A remote chunk of a Document; never persisted locally |
//! | **Watermark** | Last known remote `updated_at`, used to detect drift |
//! | **Orphan** | A local entity with no recoverable remote identifier |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of ids generated locally for entities that have never been pushed.
pub const PLACEHOLDER_PREFIX: &str = "local-";

/// Generate a placeholder id for an offline-authored entity.
pub fn new_placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4())
}

/// Whether an id was generated locally rather than assigned by the remote.
pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Returns the id only if it can address a remote entity.
pub fn usable_remote_id(id: Option<&str>) -> Option<&str> {
    id.map(str::trim)
        .filter(|id| !id.is_empty() && !is_placeholder_id(id))
}

// ============================================
// Hierarchy containers
// ============================================

/// Root container: one deployment of the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operator-chosen display name
    pub name: String,
    /// Normalized base URL (no trailing slash, no API suffix)
    pub url: String,
}

/// Operator credentials on a platform. The password lives in `.secret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub platform_url: String,
}

/// A remote tenant. `remote_id` is stable; names may change remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub remote_id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Workspace roles allowed to change apps.
const EDITING_ROLES: &[&str] = &["owner", "admin", "editor"];

/// Whether a workspace role may modify apps. No role known yet counts as
/// editing, so trees built offline stay pushable.
pub fn role_can_edit(role: Option<&str>) -> bool {
    match role {
        Some(role) => EDITING_ROLES.contains(&role),
        None => true,
    }
}

// ============================================
// Apps
// ============================================

/// Application flavour. Serialized with the local (kebab-case) names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppType {
    Chatbot,
    TextGeneration,
    Agent,
    Chatflow,
    Workflow,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Chatbot => "chatbot",
            AppType::TextGeneration => "text-generation",
            AppType::Agent => "agent",
            AppType::Chatflow => "chatflow",
            AppType::Workflow => "workflow",
        }
    }

    /// Mode string used by the remote API.
    pub fn remote_mode(&self) -> &'static str {
        match self {
            AppType::Chatbot => "chat",
            AppType::TextGeneration => "completion",
            AppType::Agent => "agent-chat",
            AppType::Chatflow => "advanced-chat",
            AppType::Workflow => "workflow",
        }
    }

    /// Parse a remote mode string. Local names are accepted as well.
    pub fn from_remote_mode(mode: &str) -> Option<Self> {
        match mode {
            "chat" | "chatbot" => Some(AppType::Chatbot),
            "completion" | "text-generation" => Some(AppType::TextGeneration),
            "agent-chat" | "agent" => Some(AppType::Agent),
            "advanced-chat" | "chatflow" => Some(AppType::Chatflow),
            "workflow" => Some(AppType::Workflow),
            _ => None,
        }
    }

    /// Only workflow-style apps round-trip through the remote import endpoint.
    pub fn supports_push(&self) -> bool {
        matches!(self, AppType::Workflow | AppType::Chatflow)
    }
}

impl std::fmt::Display for AppType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppType::from_remote_mode(s).ok_or_else(|| format!("unknown app type: {}", s))
    }
}

/// An application definition. The DSL content is stored beside the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Remote id, a `local-*` placeholder, or absent for orphans
    #[serde(default)]
    pub remote_id: Option<String>,
    pub name: String,
    pub app_type: AppType,
    /// The operator's role in the owning workspace when last pulled
    #[serde(default)]
    pub role: Option<String>,
    /// Set when that role cannot modify apps; such apps are never pushed
    #[serde(default)]
    pub readonly: bool,
}

// ============================================
// Sync metadata
// ============================================

/// Sync bookkeeping for an App or a fully pulled KnowledgeBase.
///
/// This record, not the directory name, is authoritative for remote identity
/// and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub remote_id: String,
    /// App type name, or [`SyncMetadata::DATASET_TYPE`] for knowledge bases
    #[serde(rename = "type")]
    pub entity_type: String,
    pub last_synced_at: DateTime<Utc>,
    #[serde(default)]
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub local_hash: String,
}

impl SyncMetadata {
    pub const DATASET_TYPE: &'static str = "dataset";

    /// App type recorded in the metadata, if this is an app.
    pub fn app_type(&self) -> Option<AppType> {
        AppType::from_remote_mode(&self.entity_type)
    }
}

// ============================================
// Knowledge
// ============================================

/// A remote dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub remote_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub word_count: u64,
}

/// A document inside a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Remote id, or a `local-*` placeholder while `is_local`
    pub id: String,
    /// Remote name, including its extension
    pub name: String,
    #[serde(default)]
    pub is_local: bool,
}

impl Document {
    /// File name of the content file: the remote name, with `.txt` added when
    /// it has no extension.
    pub fn content_file_name(&self) -> String {
        crate::store::layout::document_file_name(&self.name)
    }
}

/// One line of a knowledge base manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_local: bool,
    /// Directory name of the document under the knowledge base
    pub dir: String,
    /// Hash of the text last exchanged with the remote; absent until then
    #[serde(default)]
    pub synced_hash: Option<String>,
}

/// Index of the documents held locally for a knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentManifest {
    #[serde(default)]
    pub documents: Vec<ManifestEntry>,
}

impl DocumentManifest {
    pub fn find(&self, id: &str) -> Option<&ManifestEntry> {
        self.documents.iter().find(|e| e.id == id)
    }
}

impl ManifestEntry {
    /// See [`Document::content_file_name`].
    pub fn content_file_name(&self) -> String {
        crate::store::layout::document_file_name(&self.name)
    }
}

/// A remote chunk of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub id: String,
    pub position: i64,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

impl Segment {
    /// Text contributed by this segment to the merged document.
    pub fn text(&self) -> String {
        match self.answer.as_deref().map(str::trim) {
            Some(answer) if !answer.is_empty() => format!("{}\n{}", self.content, answer),
            _ => self.content.clone(),
        }
    }
}

// ============================================
// Status
// ============================================

/// Agreement between a local entity and its remote counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    LocalModified,
    RemoteModified,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::LocalModified => "local-modified",
            SyncStatus::RemoteModified => "remote-modified",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_type_mode_mapping() {
        assert_eq!(AppType::from_remote_mode("advanced-chat"), Some(AppType::Chatflow));
        assert_eq!(AppType::from_remote_mode("completion"), Some(AppType::TextGeneration));
        assert_eq!(AppType::from_remote_mode("workflow"), Some(AppType::Workflow));
        assert_eq!(AppType::from_remote_mode("rag-pipeline"), None);
        assert_eq!(AppType::Chatflow.remote_mode(), "advanced-chat");
        assert_eq!("text-generation".parse::<AppType>(), Ok(AppType::TextGeneration));
    }

    #[test]
    fn test_push_capability() {
        assert!(AppType::Workflow.supports_push());
        assert!(AppType::Chatflow.supports_push());
        assert!(!AppType::Chatbot.supports_push());
        assert!(!AppType::Agent.supports_push());
        assert!(!AppType::TextGeneration.supports_push());
    }

    #[test]
    fn test_role_can_edit() {
        assert!(role_can_edit(Some("owner")));
        assert!(role_can_edit(Some("editor")));
        assert!(role_can_edit(None));
        assert!(!role_can_edit(Some("normal")));
        assert!(!role_can_edit(Some("dataset_operator")));
    }

    #[test]
    fn test_usable_remote_id() {
        assert_eq!(usable_remote_id(Some("abc")), Some("abc"));
        assert_eq!(usable_remote_id(Some("  ")), None);
        assert_eq!(usable_remote_id(Some("local-1234")), None);
        assert_eq!(usable_remote_id(None), None);
        assert!(is_placeholder_id(&new_placeholder_id()));
    }

    #[test]
    fn test_app_type_serde_names() {
        let json = serde_json::to_string(&AppType::TextGeneration).unwrap();
        assert_eq!(json, "\"text-generation\"");
        let status = serde_json::to_string(&SyncStatus::LocalModified).unwrap();
        assert_eq!(status, "\"local-modified\"");
    }

    #[test]
    fn test_document_content_file_name() {
        let doc = Document {
            id: "d1".into(),
            name: "guide.md".into(),
            is_local: false,
        };
        assert_eq!(doc.content_file_name(), "guide.md");

        let doc = Document {
            id: "d2".into(),
            name: "release notes".into(),
            is_local: false,
        };
        assert_eq!(doc.content_file_name(), "release notes.txt");
    }

    #[test]
    fn test_segment_text_with_answer() {
        let seg = Segment {
            id: "s".into(),
            position: 1,
            content: "What is it?".into(),
            keywords: vec![],
            answer: Some("A mirror.".into()),
        };
        assert_eq!(seg.text(), "What is it?\nA mirror.");
    }
}
