pub mod action_repository;
pub mod encrypted_file_repository;
pub mod keyring_repository;

pub use action_repository::ActionRepository;
pub use encrypted_file_repository::EncryptedFileRepository;
pub use keyring_repository::KeyringRepository;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Failed to decrypt secret: {0}")]
    Decrypt(String),

    #[error("Malformed secret envelope: {0}")]
    Format(String),
}

/// Opaque blob storage keyed by name.
pub trait SecretRepository: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), RepositoryError>;

    fn delete(&self, key: &str) -> Result<(), RepositoryError>;

    /// Local file backing `key`, if any. Used to reload on external edits.
    fn watch_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}
