//! Reconciliation between the local tree and the remote platform
//!
//! ```text
//! ┌──────────────┐   pull   ┌──────────────┐
//! │    Remote    │ ───────► │    Store     │
//! │   Gateway    │ ◄─────── │  (the tree)  │
//! └──────────────┘   push   └──────────────┘
//!        ▲                         ▲
//!        └──── SessionRegistry     └──── status (local only)
//! ```
//!
//! Pull is resilient: per-entity failures are collected in a [`PullReport`]
//! and the walk continues. Push is strict: any failure aborts before local
//! state is touched.

pub mod knowledge;
mod pull;
mod push;
mod status;

pub use pull::{PullReconciler, PullReport};
pub use push::{
    AbortOnConflict, ConflictDecision, ConflictResolver, PushConflict, PushOutcome,
    PushReconciler,
};
pub use status::{remote_status, status, status_tree, EntityKind, StatusEntry};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::remote::{RemoteGateway, SessionRegistry};
use crate::store::layout::sanitize_name;
use crate::store::{Entry, Record, Store, WorkspaceContext};
use crate::types::{Account, Platform};

/// Authenticated session for an account.
pub async fn login(
    store: &Store,
    sessions: &SessionRegistry,
    platform: &Entry<Platform>,
    account: &Entry<Account>,
) -> Result<Arc<dyn RemoteGateway>> {
    let secret = store.read_secret(&account.path)?;
    let gateway = sessions.session(&platform.record.url)?;
    gateway.authenticate(&account.record.email, &secret).await?;
    Ok(gateway)
}

/// Authenticated session scoped to a workspace.
pub async fn connect_workspace(
    store: &Store,
    sessions: &SessionRegistry,
    ctx: &WorkspaceContext,
) -> Result<Arc<dyn RemoteGateway>> {
    let gateway = login(store, sessions, &ctx.platform, &ctx.account).await?;
    gateway
        .switch_workspace(&ctx.workspace.record.remote_id)
        .await?;
    Ok(gateway)
}

/// Create a record, falling back to `"<name> (<id prefix>)"` when its natural
/// directory name is taken by an unrelated entity.
pub(crate) fn create_unique<R: Record>(
    store: &Store,
    parent: &Path,
    record: &R,
    remote_id: &str,
) -> Result<PathBuf> {
    match store.create(parent, record) {
        Err(Error::NameConflict { name, .. }) => {
            let short: String = remote_id.chars().take(8).collect();
            let fallback = format!("{} ({})", name, short);
            tracing::info!(
                kind = R::KIND,
                name = %name,
                fallback = %fallback,
                "Directory name taken, using fallback"
            );
            store.create_as(parent, &fallback, record)
        }
        other => other,
    }
}

/// Follow a remote rename when the new directory name is free.
///
/// The entity keeps its current directory when the name is taken.
pub(crate) fn follow_rename(store: &Store, path: &Path, remote_name: &str) -> Result<PathBuf> {
    let current = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if sanitize_name(remote_name) == current {
        return Ok(path.to_path_buf());
    }
    match store.rename(path, remote_name) {
        Ok(renamed) => Ok(renamed),
        Err(Error::NameConflict { name, .. }) => {
            tracing::debug!(
                path = %path.display(),
                name = %name,
                "Remote rename not applied, name taken"
            );
            Ok(path.to_path_buf())
        }
        Err(e) => Err(e),
    }
}
