use super::{RepositoryError, SecretRepository};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const ALGORITHM: &str = "aes-256-gcm";
const KDF_CONTEXT: &str = "action_web 2024 token store encryption key";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    alg: String,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Blobs encrypted with AES-256-GCM, one `<key>.enc` file each.
///
/// The key is derived from the passphrase and a per-write random salt with
/// BLAKE3 in key-derivation mode, so every write produces a fresh key/nonce pair.
pub struct EncryptedFileRepository {
    dir: PathBuf,
    passphrase: String,
}

impl EncryptedFileRepository {
    pub fn new(dir: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            passphrase: passphrase.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.enc", key))
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut material = Vec::with_capacity(salt.len() + self.passphrase.len());
        material.extend_from_slice(salt);
        material.extend_from_slice(self.passphrase.as_bytes());
        blake3::derive_key(KDF_CONTEXT, &material)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Envelope, RepositoryError> {
        let salt: [u8; 16] = rand::random();
        let nonce_bytes: [u8; 12] = rand::random();

        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| RepositoryError::Format(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| RepositoryError::Format(e.to_string()))?;

        Ok(Envelope {
            alg: ALGORITHM.to_string(),
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, RepositoryError> {
        if envelope.alg != ALGORITHM {
            return Err(RepositoryError::Format(format!(
                "unsupported algorithm '{}'",
                envelope.alg
            )));
        }

        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| RepositoryError::Format(format!("{}: {}", field, e)))
        };
        let salt = decode("salt", &envelope.salt)?;
        let nonce_bytes = decode("nonce", &envelope.nonce)?;
        let ciphertext = decode("ciphertext", &envelope.ciphertext)?;
        if nonce_bytes.len() != 12 {
            return Err(RepositoryError::Format("nonce must be 12 bytes".to_string()));
        }

        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| RepositoryError::Format(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| {
                RepositoryError::Decrypt("wrong passphrase or corrupted file".to_string())
            })
    }

    fn write_atomically(&self, path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| RepositoryError::Io(e.error))?;
        Ok(())
    }
}

impl SecretRepository for EncryptedFileRepository {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        let path = self.path_for(key);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope: Envelope = serde_json::from_slice(&content)
            .map_err(|e| RepositoryError::Format(e.to_string()))?;
        self.open(&envelope).map(Some)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), RepositoryError> {
        let envelope = self.seal(value)?;
        let bytes =
            serde_json::to_vec_pretty(&envelope).map_err(|e| RepositoryError::Format(e.to_string()))?;
        self.write_atomically(&self.path_for(key), &bytes)
    }

    fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn watch_path(&self, key: &str) -> Option<PathBuf> {
        Some(self.path_for(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_and_hides_plaintext() {
        let temp = TempDir::new().unwrap();
        let repo = EncryptedFileRepository::new(temp.path(), "correct horse");

        repo.put("tokens", b"[{\"name\":\"ci\"}]").unwrap();
        let raw = std::fs::read_to_string(temp.path().join("tokens.enc")).unwrap();
        assert!(!raw.contains("ci"));

        let value = repo.get("tokens").unwrap().unwrap();
        assert_eq!(value, b"[{\"name\":\"ci\"}]");
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let temp = TempDir::new().unwrap();
        EncryptedFileRepository::new(temp.path(), "right")
            .put("tokens", b"secret")
            .unwrap();

        let err = EncryptedFileRepository::new(temp.path(), "wrong")
            .get("tokens")
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Decrypt(_)));
    }

    #[test]
    fn missing_and_deleted_entries_read_as_none() {
        let temp = TempDir::new().unwrap();
        let repo = EncryptedFileRepository::new(temp.path(), "pw");
        assert!(repo.get("tokens").unwrap().is_none());

        repo.put("tokens", b"x").unwrap();
        repo.delete("tokens").unwrap();
        repo.delete("tokens").unwrap();
        assert!(repo.get("tokens").unwrap().is_none());
    }
}
