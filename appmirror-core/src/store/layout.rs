//! On-disk naming rules for the mirrored tree.

/// Record file present in every entity directory.
pub const META_FILE: &str = ".meta.json";
/// Sync bookkeeping for apps and fully pulled knowledge bases.
pub const SYNC_FILE: &str = ".sync.json";
/// Encrypted account password.
pub const SECRET_FILE: &str = ".secret";
/// DSL content of an app.
pub const APP_CONTENT_FILE: &str = "app.yml";
/// Document index of a knowledge base.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Ignore list at the tree root.
pub const IGNORE_FILE: &str = ".gitignore";

/// Fixed sub-containers of a workspace.
pub const STUDIO_DIR: &str = "studio";
pub const KNOWLEDGE_DIR: &str = "knowledge";
pub const TOOLS_DIR: &str = "tools";
pub const PLUGINS_DIR: &str = "plugins";
pub const MODELS_DIR: &str = "models";

/// Registry snapshots written by pull.
pub const DATASETS_FILE: &str = "datasets.json";
pub const TOOLS_FILE: &str = "tools.json";
pub const PLUGINS_FILE: &str = "plugins.json";
pub const MODELS_FILE: &str = "models.json";

/// Files the store keeps beside entity directories. No entity may take
/// these names, whatever the remote calls it.
const RESERVED_NAMES: &[&str] = &[MANIFEST_FILE, DATASETS_FILE];

const MAX_NAME_CHARS: usize = 100;

/// Turn a display name into a filesystem-safe directory name.
///
/// Path separators and characters reserved on common filesystems become `_`,
/// runs of whitespace collapse to one space, leading dots are dropped so the
/// entry is never hidden, and the result is bounded in length.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;

    for c in name.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        let safe = match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        out.push(safe);
    }

    let trimmed = out.trim_start_matches('.').trim();
    let bounded: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    let bounded = bounded.trim_end().to_string();

    if bounded.is_empty() {
        "untitled".to_string()
    } else {
        bounded
    }
}

/// Content file name of a knowledge document: the sanitized remote name,
/// with `.txt` appended when it carries no extension.
pub fn document_file_name(name: &str) -> String {
    let sanitized = sanitize_name(name);
    if std::path::Path::new(&sanitized).extension().is_some() {
        sanitized
    } else {
        format!("{}.txt", sanitized)
    }
}

/// Paths the remote serves under its base URL; stripped when a platform is added.
const URL_SUFFIXES: &[&str] = &[
    "/console/api",
    "/explore/apps",
    "/explore",
    "/apps",
    "/api",
    "/v1",
];

/// Normalize a platform URL to its base: trimmed, no trailing slash and no
/// call, API or browse path suffix.
pub fn normalize_platform_url(url: &str) -> String {
    let mut base = url.trim().trim_end_matches('/').to_string();
    loop {
        let before = base.len();
        for suffix in URL_SUFFIXES {
            if let Some(stripped) = base.strip_suffix(suffix) {
                base = stripped.trim_end_matches('/').to_string();
            }
        }
        if base.len() == before {
            break;
        }
    }
    base
}

/// Whether a sanitized directory name would shadow a store file.
///
/// Compared without case, since some filesystems fold it.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Whether a directory entry is internal to the store.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_collapses_whitespace() {
        assert_eq!(sanitize_name("  My   Support\tBot  "), "My Support Bot");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_name("line\u{0}break"), "line_break");
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_name("manifest.json"));
        assert!(is_reserved_name("Datasets.JSON"));
        assert!(!is_reserved_name("manifest.md"));
        assert!(!is_reserved_name("guide.md"));
    }

    #[test]
    fn test_sanitize_never_hidden_or_empty() {
        assert_eq!(sanitize_name(".env"), "env");
        assert_eq!(sanitize_name("..."), "untitled");
        assert_eq!(sanitize_name("   "), "untitled");
    }

    #[test]
    fn test_sanitize_bounds_length() {
        let long = "x".repeat(300);
        assert_eq!(sanitize_name(&long).chars().count(), 100);
    }

    #[test]
    fn test_normalize_platform_url() {
        assert_eq!(
            normalize_platform_url("https://cloud.example.com/"),
            "https://cloud.example.com"
        );
        assert_eq!(
            normalize_platform_url("https://cloud.example.com/console/api/"),
            "https://cloud.example.com"
        );
        assert_eq!(
            normalize_platform_url("http://localhost:5001/v1"),
            "http://localhost:5001"
        );
        assert_eq!(
            normalize_platform_url("https://dify.internal/explore/apps"),
            "https://dify.internal"
        );
        assert_eq!(
            normalize_platform_url(" https://dify.internal/team/apps "),
            "https://dify.internal/team"
        );
    }
}
