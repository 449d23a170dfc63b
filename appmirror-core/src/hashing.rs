//! Content hashing for sync metadata.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a local artifact's content.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash of several texts taken in order, as one artifact.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn combined_hash<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(b"app: demo\n");
        assert_eq!(a, content_hash(b"app: demo\n"));
        assert_ne!(a, content_hash(b"app: demo \n"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_combined_hash_respects_boundaries() {
        assert_ne!(combined_hash(["ab", "c"]), combined_hash(["a", "bc"]));
        assert_eq!(combined_hash(["x", "y"]), combined_hash(["x", "y"]));
    }
}
