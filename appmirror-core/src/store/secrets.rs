//! Encrypted-at-rest account secrets and the tree's ignore list.
//!
//! Secrets are sealed with ChaCha20-Poly1305 under a 32-byte key that lives
//! outside the mirrored tree. The sealed file holds `base64(nonce || ciphertext)`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::{Error, Result};

use super::layout::{IGNORE_FILE, SECRET_FILE};

const NONCE_LEN: usize = 12;

/// Seals and opens account secrets.
pub struct SecretBox {
    cipher: ChaCha20Poly1305,
}

impl SecretBox {
    /// Load the key at `key_path`, generating it on first use.
    pub fn load_or_create(key_path: &Path) -> Result<Self> {
        let key_bytes = if key_path.exists() {
            let bytes = fs::read(key_path)?;
            if bytes.len() != 32 {
                return Err(Error::Crypto(format!(
                    "key file {} has {} bytes, expected 32",
                    key_path.display(),
                    bytes.len()
                )));
            }
            bytes
        } else {
            if let Some(parent) = key_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let key = ChaCha20Poly1305::generate_key(&mut OsRng);
            write_private(key_path, key.as_slice())?;
            tracing::info!(path = %key_path.display(), "Generated secret encryption key");
            key.to_vec()
        };

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        Ok(Self { cipher })
    }

    /// Encrypt a secret into its on-disk text form.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`SecretBox::seal`].
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed.trim())
            .map_err(|e| Error::Crypto(format!("secret is not valid base64: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::Crypto("secret is truncated".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("secret cannot be decrypted with this key".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Crypto(format!("secret is not UTF-8: {}", e)))
    }
}

/// Write a file readable only by the owner where the platform supports it.
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

/// Path of the sealed secret inside an account directory.
pub fn secret_path(account_dir: &Path) -> PathBuf {
    account_dir.join(SECRET_FILE)
}

/// Seal `plaintext` into the account directory.
pub fn write_secret(secrets: &SecretBox, account_dir: &Path, plaintext: &str) -> Result<()> {
    let sealed = secrets.seal(plaintext)?;
    write_private(&secret_path(account_dir), sealed.as_bytes())
}

/// Read and open the account's secret.
pub fn read_secret(secrets: &SecretBox, account_dir: &Path) -> Result<String> {
    let path = secret_path(account_dir);
    if !path.exists() {
        return Err(Error::NotFoundLocally(path));
    }
    let sealed = fs::read_to_string(&path)?;
    secrets.open(&sealed)
}

/// Make sure the tree's ignore list excludes secret files.
///
/// Existing entries are preserved; the pattern is appended only when missing.
pub fn ensure_ignore_list(root: &Path) -> Result<()> {
    let path = root.join(IGNORE_FILE);
    let existing = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let pattern = SECRET_FILE;
    if existing
        .lines()
        .any(|line| line.trim() == pattern || line.trim() == format!("**/{}", pattern))
    {
        return Ok(());
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str("# account secrets\n");
    updated.push_str(pattern);
    updated.push('\n');
    fs::write(&path, updated)?;
    tracing::debug!(path = %path.display(), "Added secret pattern to ignore list");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seal_and_open() {
        let dir = TempDir::new().unwrap();
        let secrets = SecretBox::load_or_create(&dir.path().join("keys/secret.key")).unwrap();

        let sealed = secrets.seal("hunter2").unwrap();
        assert!(!sealed.contains("hunter2"));
        assert_eq!(secrets.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_key_is_reused() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("secret.key");
        let sealed = SecretBox::load_or_create(&key_path)
            .unwrap()
            .seal("pw")
            .unwrap();

        let reopened = SecretBox::load_or_create(&key_path).unwrap();
        assert_eq!(reopened.open(&sealed).unwrap(), "pw");
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = TempDir::new().unwrap();
        let a = SecretBox::load_or_create(&dir.path().join("a.key")).unwrap();
        let b = SecretBox::load_or_create(&dir.path().join("b.key")).unwrap();
        let sealed = a.seal("pw").unwrap();
        assert!(matches!(b.open(&sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_ignore_list_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IGNORE_FILE), "target/").unwrap();

        ensure_ignore_list(dir.path()).unwrap();
        ensure_ignore_list(dir.path()).unwrap();

        let text = fs::read_to_string(dir.path().join(IGNORE_FILE)).unwrap();
        assert!(text.starts_with("target/\n"));
        assert_eq!(text.lines().filter(|l| *l == SECRET_FILE).count(), 1);
    }

    #[test]
    fn test_read_missing_secret() {
        let dir = TempDir::new().unwrap();
        let secrets = SecretBox::load_or_create(&dir.path().join("k")).unwrap();
        assert!(matches!(
            read_secret(&secrets, dir.path()),
            Err(Error::NotFoundLocally(_))
        ));
    }
}
