//! Entity Hierarchy Store
//!
//! The only component that knows how the mirrored tree is laid out on disk.
//!
//! ```text
//! <root>/.gitignore                       contains ".secret"
//! <root>/<platform>/.meta.json
//!   <account>/.meta.json, .secret
//!     <workspace>/.meta.json
//!       studio/<app>/.meta.json, .sync.json, app.yml
//!       knowledge/datasets.json
//!       knowledge/<kb>/.meta.json, .sync.json, manifest.json
//!       knowledge/<kb>/<doc>/.meta.json, <name.ext>
//!       models/models.json, tools/tools.json, plugins/plugins.json
//! ```

pub mod layout;
mod repo;
mod secrets;

pub use repo::{Entry, Record, Store, WorkspaceContext};
pub use secrets::SecretBox;
