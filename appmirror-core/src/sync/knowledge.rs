//! Knowledge base mirroring
//!
//! Remote documents are stored as chunks (segments) that overlap by a fixed
//! window. Pull stitches them back into one text file per document and never
//! overwrites a document file that already exists locally. Documents authored
//! offline carry a placeholder id until [`push_document`] creates them
//! remotely.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::hashing::{combined_hash, content_hash};
use crate::remote::{RemoteDataset, RemoteDocument, RemoteGateway, SessionRegistry};
use crate::store::layout::{DATASETS_FILE, KNOWLEDGE_DIR};
use crate::store::Store;
use crate::types::{
    is_placeholder_id, Document, DocumentManifest, KnowledgeBase, ManifestEntry, Segment,
    SyncMetadata,
};

use super::{connect_workspace, create_unique, follow_rename, PullReport};

/// Shortest overlap accepted as a real seam between two segments.
pub const MIN_OVERLAP_CHARS: usize = 4;

// ============================================
// Stitching
// ============================================

/// Merge segments into one text without repeating their overlaps.
///
/// Segments are ordered by position. Each one is joined to the text so far by
/// looking for the longest prefix of the segment that ends the last
/// `2 * overlap_chars` characters of the output. Without such a seam the
/// segment starts a new paragraph. Lengths are counted in characters.
pub fn stitch_segments(segments: &[Segment], overlap_chars: usize) -> String {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.position);

    let window = overlap_chars.saturating_mul(2);
    let mut out = String::new();

    for segment in ordered {
        let text = segment.text();
        if text.is_empty() {
            continue;
        }
        if out.is_empty() {
            out.push_str(&text);
            continue;
        }
        match overlap_end(&out, &text, window) {
            Some(end) => out.push_str(&text[end..]),
            None => {
                out.push_str("\n\n");
                out.push_str(&text);
            }
        }
    }

    out
}

/// Byte offset in `next` just past the longest prefix that is also a suffix
/// of the last `window` characters of `acc`.
fn overlap_end(acc: &str, next: &str, window: usize) -> Option<usize> {
    if window == 0 {
        return None;
    }
    let tail_start = acc
        .char_indices()
        .rev()
        .nth(window - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &acc[tail_start..];

    // Byte offsets of every char boundary in `next`, after 1..=n chars
    let boundaries: Vec<usize> = next
        .char_indices()
        .skip(1)
        .map(|(i, _)| i)
        .chain(std::iter::once(next.len()))
        .collect();

    let max_chars = tail.chars().count().min(boundaries.len());
    (MIN_OVERLAP_CHARS..=max_chars)
        .rev()
        .map(|n| boundaries[n - 1])
        .find(|&end| tail.ends_with(&next[..end]))
}

// ============================================
// Manifest
// ============================================

/// Outcome of comparing the local manifest with a fetched document list.
#[derive(Debug, Default)]
pub struct ManifestMerge {
    /// Remote documents in remote order, with their previous entry if any
    pub remote: Vec<(RemoteDocument, Option<ManifestEntry>)>,
    /// Offline-authored entries absent remotely; kept
    pub kept_local: Vec<ManifestEntry>,
    /// Remote-sourced entries absent remotely; their directories go away
    pub dropped: Vec<ManifestEntry>,
}

/// Reconcile a manifest against the documents the remote currently holds.
pub fn merge_manifest(existing: &DocumentManifest, remote: &[RemoteDocument]) -> ManifestMerge {
    let remote_ids: HashSet<&str> = remote.iter().map(|d| d.id.as_str()).collect();
    let mut merge = ManifestMerge {
        remote: remote
            .iter()
            .map(|doc| (doc.clone(), existing.find(&doc.id).cloned()))
            .collect(),
        ..Default::default()
    };

    for entry in &existing.documents {
        if remote_ids.contains(entry.id.as_str()) {
            continue;
        }
        if entry.is_local {
            merge.kept_local.push(entry.clone());
        } else {
            merge.dropped.push(entry.clone());
        }
    }

    merge
}

/// Hash of a knowledge base's current local content: the hashes of its
/// document texts in manifest order. A missing file hashes as empty.
pub fn knowledge_hash(store: &Store, kb_dir: &Path, manifest: &DocumentManifest) -> Result<String> {
    let mut hashes = Vec::with_capacity(manifest.documents.len());
    for entry in &manifest.documents {
        hashes.push(document_hash(store, &kb_dir.join(&entry.dir), &entry.content_file_name())?);
    }
    Ok(combined_hash(hashes.iter().map(String::as_str)))
}

/// Hash the manifest records as last exchanged with the remote.
///
/// Equals [`knowledge_hash`] exactly when no document was edited since and
/// none is waiting for its first push.
pub fn recorded_hash(manifest: &DocumentManifest) -> String {
    combined_hash(
        manifest
            .documents
            .iter()
            .map(|e| e.synced_hash.as_deref().unwrap_or("")),
    )
}

fn document_hash(store: &Store, doc_dir: &Path, file: &str) -> Result<String> {
    match store.read_content(doc_dir, file) {
        Ok(text) => Ok(content_hash(text.as_bytes())),
        Err(Error::NotFoundLocally(_)) => Ok(content_hash(b"")),
        Err(e) => Err(e),
    }
}

/// Write the knowledge base's sync metadata from its manifest.
fn record_synced(store: &Store, kb_dir: &Path, remote_id: &str) -> Result<()> {
    let manifest = store.read_manifest(kb_dir)?;
    let local_hash = recorded_hash(&manifest);
    let previous = store.read_sync_metadata(kb_dir).ok().flatten();
    if previous
        .as_ref()
        .is_some_and(|m| m.remote_id == remote_id && m.local_hash == local_hash)
    {
        return Ok(());
    }
    store.write_sync_metadata(
        kb_dir,
        &SyncMetadata {
            remote_id: remote_id.to_string(),
            entity_type: SyncMetadata::DATASET_TYPE.to_string(),
            last_synced_at: Utc::now(),
            remote_updated_at: None,
            local_hash,
        },
    )?;
    Ok(())
}

// ============================================
// Pull
// ============================================

impl From<&RemoteDataset> for KnowledgeBase {
    fn from(dataset: &RemoteDataset) -> Self {
        KnowledgeBase {
            remote_id: dataset.id.clone(),
            name: dataset.name.clone(),
            description: dataset.description.clone().filter(|d| !d.is_empty()),
            document_count: dataset.document_count,
            word_count: dataset.word_count,
        }
    }
}

/// Fetch the dataset listing and store it as the workspace's snapshot.
///
/// The gateway must already be scoped to the workspace.
pub async fn refresh_dataset_listing(
    store: &Store,
    gateway: &dyn RemoteGateway,
    workspace_dir: &Path,
) -> Result<Vec<RemoteDataset>> {
    let datasets = gateway.list_datasets().await?;
    let snapshot = serde_json::to_value(&datasets)?;
    store.write_snapshot(&workspace_dir.join(KNOWLEDGE_DIR), DATASETS_FILE, &snapshot)?;
    Ok(datasets)
}

/// Pull every document of a dataset into the workspace.
///
/// The gateway must already be scoped to the workspace. Returns the knowledge
/// base directory. Per-document fetch failures are recorded in the report and
/// leave that document's file absent.
pub async fn pull_knowledge_base(
    store: &Store,
    gateway: &dyn RemoteGateway,
    workspace_dir: &Path,
    dataset: &RemoteDataset,
    overlap_chars: usize,
    report: &mut PullReport,
) -> Result<PathBuf> {
    let record = KnowledgeBase::from(dataset);
    let existing = store
        .list::<KnowledgeBase>(workspace_dir)?
        .into_iter()
        .find(|e| e.record.remote_id == dataset.id);

    let kb_dir = match existing {
        Some(entry) => {
            let path = follow_rename(store, &entry.path, &record.name)?;
            store.update(&path, &record)?;
            path
        }
        None => create_unique(store, workspace_dir, &record, &dataset.id)?,
    };

    let remote_docs = gateway.list_documents(&dataset.id).await?;
    let merge = merge_manifest(&store.read_manifest(&kb_dir)?, &remote_docs);

    for dropped in &merge.dropped {
        store.delete(&kb_dir.join(&dropped.dir))?;
        report.documents_removed += 1;
        tracing::info!(
            kb = %record.name,
            document = %dropped.name,
            "Removed document deleted remotely"
        );
    }

    let mut entries = Vec::with_capacity(merge.remote.len() + merge.kept_local.len());
    for (doc, prior) in merge.remote {
        let document = Document {
            id: doc.id.clone(),
            name: doc.name.clone(),
            is_local: false,
        };
        let prior_hash = prior.as_ref().and_then(|p| p.synced_hash.clone());
        let doc_dir = match prior.map(|p| kb_dir.join(p.dir)) {
            Some(dir) if dir.is_dir() => {
                store.update(&dir, &document)?;
                dir
            }
            _ => create_unique(store, &kb_dir, &document, &doc.id)?,
        };

        let file = document.content_file_name();
        let mut synced_hash = prior_hash;
        if store.content_exists(&doc_dir, &file) {
            tracing::debug!(document = %doc.name, "Local copy exists, not overwriting");
            report.documents_skipped += 1;
        } else {
            match gateway.list_segments(&dataset.id, &doc.id).await {
                Ok(segments) => {
                    let text = stitch_segments(&segments, overlap_chars);
                    store.write_content(&doc_dir, &file, &text)?;
                    synced_hash = Some(content_hash(text.as_bytes()));
                    report.documents_written += 1;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        document = %doc.name,
                        error = %e,
                        "Failed to fetch document segments"
                    );
                    report
                        .errors
                        .push((format!("document {}", doc.name), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        entries.push(ManifestEntry {
            id: doc.id,
            name: doc.name,
            is_local: false,
            dir: dir_name(&doc_dir),
            synced_hash,
        });
    }
    entries.extend(merge.kept_local);

    store.write_manifest(&kb_dir, &DocumentManifest { documents: entries })?;
    record_synced(store, &kb_dir, &dataset.id)?;
    report.knowledge_bases_pulled += 1;
    tracing::info!(kb = %record.name, "Pulled knowledge base");
    Ok(kb_dir)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================
// Push
// ============================================

fn kb_dir_of(doc_dir: &Path) -> Result<&Path> {
    doc_dir
        .parent()
        .ok_or_else(|| Error::NotFoundLocally(doc_dir.to_path_buf()))
}

/// Send a document's local text to the remote.
///
/// Offline-authored documents are created remotely and take over the
/// assigned id; the others are updated in place. Returns the stored record.
pub async fn push_document(
    store: &Store,
    sessions: &SessionRegistry,
    doc_dir: &Path,
) -> Result<Document> {
    let kb_dir = kb_dir_of(doc_dir)?;
    let kb: KnowledgeBase = store.require(kb_dir)?;
    let doc: Document = store.require(doc_dir)?;
    let text = store.read_content(doc_dir, &doc.content_file_name())?;
    let ctx = store.knowledge_context(kb_dir)?;

    let gateway = connect_workspace(store, sessions, &ctx).await?;
    let pushed = if doc.is_local || is_placeholder_id(&doc.id) {
        let created = gateway.create_document(&kb.remote_id, &doc.name, &text).await?;
        tracing::info!(document = %doc.name, id = %created.id, "Created document remotely");
        Document {
            id: created.id,
            name: doc.name.clone(),
            is_local: false,
        }
    } else {
        gateway
            .update_document(&kb.remote_id, &doc.id, &doc.name, &text)
            .await?;
        tracing::info!(document = %doc.name, "Updated document remotely");
        doc.clone()
    };

    store.update(doc_dir, &pushed)?;
    let synced_hash = Some(content_hash(text.as_bytes()));
    let mut manifest = store.read_manifest(kb_dir)?;
    match manifest.documents.iter_mut().find(|e| e.id == doc.id) {
        Some(entry) => {
            entry.id = pushed.id.clone();
            entry.is_local = false;
            entry.synced_hash = synced_hash;
        }
        None => manifest.documents.push(ManifestEntry {
            id: pushed.id.clone(),
            name: pushed.name.clone(),
            is_local: false,
            dir: dir_name(doc_dir),
            synced_hash,
        }),
    }
    store.write_manifest(kb_dir, &manifest)?;
    record_synced(store, kb_dir, &kb.remote_id)?;

    Ok(pushed)
}

/// Delete a document remotely (when it exists there) and locally.
pub async fn delete_document(
    store: &Store,
    sessions: &SessionRegistry,
    doc_dir: &Path,
) -> Result<()> {
    let kb_dir = kb_dir_of(doc_dir)?;
    let kb: KnowledgeBase = store.require(kb_dir)?;
    let doc: Document = store.require(doc_dir)?;

    if !doc.is_local && !is_placeholder_id(&doc.id) {
        let ctx = store.knowledge_context(kb_dir)?;
        let gateway = connect_workspace(store, sessions, &ctx).await?;
        match gateway.delete_document(&kb.remote_id, &doc.id).await {
            Ok(()) => {}
            Err(Error::RemoteNotFound(_)) => {
                tracing::debug!(document = %doc.name, "Already gone remotely");
            }
            Err(e) => return Err(e),
        }
    }

    store.delete(doc_dir)?;
    let mut manifest = store.read_manifest(kb_dir)?;
    manifest.documents.retain(|e| e.id != doc.id);
    store.write_manifest(kb_dir, &manifest)?;
    if store.read_sync_metadata(kb_dir)?.is_some() {
        record_synced(store, kb_dir, &kb.remote_id)?;
    }
    tracing::info!(document = %doc.name, "Deleted document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(position: i64, content: &str) -> Segment {
        Segment {
            id: format!("s{}", position),
            position,
            content: content.to_string(),
            keywords: vec![],
            answer: None,
        }
    }

    #[test]
    fn test_stitch_removes_overlaps() {
        let segments = vec![
            seg(1, "The quick brown fox"),
            seg(2, " brown fox jumps"),
            seg(3, " jumps over the dog"),
        ];
        assert_eq!(
            stitch_segments(&segments, 20),
            "The quick brown fox jumps over the dog"
        );
    }

    #[test]
    fn test_stitch_orders_by_position() {
        let segments = vec![seg(2, "second part"), seg(1, "first part")];
        assert_eq!(stitch_segments(&segments, 50), "first part\n\nsecond part");
    }

    #[test]
    fn test_stitch_ignores_short_overlaps() {
        // "abc" is shorter than the minimum seam
        let segments = vec![seg(1, "xyz abc"), seg(2, "abc def")];
        assert_eq!(stitch_segments(&segments, 50), "xyz abc\n\nabc def");
    }

    #[test]
    fn test_stitch_window_bounds_search() {
        // Overlap is longer than the window, so no seam is found
        let segments = vec![seg(1, "0123456789abcdef"), seg(2, "0123456789abcdef!")];
        assert_eq!(
            stitch_segments(&segments, 2),
            "0123456789abcdef\n\n0123456789abcdef!"
        );
        assert_eq!(stitch_segments(&segments, 10), "0123456789abcdef!");
    }

    #[test]
    fn test_stitch_multibyte_text() {
        let segments = vec![seg(1, "Grüße aus Köln"), seg(2, "aus Köln und Bonn")];
        assert_eq!(stitch_segments(&segments, 50), "Grüße aus Köln und Bonn");
    }

    #[test]
    fn test_stitch_includes_answers() {
        let mut qa = seg(1, "Q: what?");
        qa.answer = Some("A: this.".into());
        assert_eq!(stitch_segments(&[qa], 50), "Q: what?\nA: this.");
        assert_eq!(stitch_segments(&[], 50), "");
    }

    #[test]
    fn test_merge_manifest_keeps_local_drops_remote() {
        let existing = DocumentManifest {
            documents: vec![
                ManifestEntry {
                    id: "d1".into(),
                    name: "kept.md".into(),
                    is_local: false,
                    dir: "kept.md".into(),
                    synced_hash: None,
                },
                ManifestEntry {
                    id: "d2".into(),
                    name: "gone.md".into(),
                    is_local: false,
                    dir: "gone.md".into(),
                    synced_hash: None,
                },
                ManifestEntry {
                    id: "local-1".into(),
                    name: "draft.md".into(),
                    is_local: true,
                    dir: "draft.md".into(),
                    synced_hash: None,
                },
            ],
        };
        let remote = vec![
            RemoteDocument {
                id: "d1".into(),
                name: "kept.md".into(),
            },
            RemoteDocument {
                id: "d3".into(),
                name: "new.md".into(),
            },
        ];

        let merge = merge_manifest(&existing, &remote);
        assert_eq!(merge.remote.len(), 2);
        assert!(merge.remote[0].1.is_some());
        assert!(merge.remote[1].1.is_none());
        assert_eq!(merge.kept_local.len(), 1);
        assert_eq!(merge.kept_local[0].id, "local-1");
        assert_eq!(merge.dropped.len(), 1);
        assert_eq!(merge.dropped[0].id, "d2");
    }
}
