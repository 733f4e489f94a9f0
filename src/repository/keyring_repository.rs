use super::{RepositoryError, SecretRepository};
use keyring::Entry;

/// Stores each blob as a base64 secret in the OS keyring under one service name.
pub struct KeyringRepository {
    service: String,
}

impl KeyringRepository {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, RepositoryError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl SecretRepository for KeyringRepository {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        match self.entry(key)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), RepositoryError> {
        self.entry(key)?.set_secret(value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
