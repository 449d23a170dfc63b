//! # appmirror-core
//!
//! Core library for appmirror - mirrors a remote applications-as-code
//! platform into a local directory tree and reconciles both directions.
//!
//! This library provides:
//! - Domain types for platforms, accounts, workspaces, apps and knowledge bases
//! - A typed store over the on-disk tree, with encrypted account secrets
//! - The remote gateway contract and its HTTP client (plus an in-memory
//!   gateway behind the `mock` feature)
//! - Pull and push reconcilers, sync status and knowledge document stitching
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! <root>/<platform>/<account>/<workspace>/studio/<app>/app.yml
//!                                        /knowledge/<kb>/<doc>/<file>
//! ```
//!
//! Directory names are display labels only; `.sync.json` records hold the
//! remote identity and the hash the local content was last synced at.
//!
//! ## Example
//!
//! ```rust,no_run
//! use appmirror_core::{Config, PullReconciler, SessionRegistry, Store};
//!
//! # async fn run() -> appmirror_core::Result<()> {
//! let config = Config::load()?;
//! let store = Store::open(&config.store_root(), &config.key_path())?;
//! let sessions = SessionRegistry::http(config.remote.clone());
//!
//! let report = PullReconciler::new(&store, &sessions).pull_all().await?;
//! println!("{} changes, {} errors", report.changes(), report.errors.len());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use remote::{RemoteGateway, SessionRegistry};
pub use store::{Entry, Record, Store};
pub use sync::{
    ConflictDecision, PullReconciler, PullReport, PushOutcome, PushReconciler, StatusEntry,
};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod manage;
pub mod remote;
pub mod store;
pub mod sync;
pub mod types;
