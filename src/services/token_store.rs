use crate::models::TokenRecord;
use crate::repository::{RepositoryError, SecretRepository};
use chrono::{DateTime, Duration, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;

/// Repository key holding the serialized token list.
pub const TOKENS_KEY: &str = "web-tokens";
pub const DEFAULT_TOKEN_SIZE: usize = 32;
const MAX_TOKEN_SIZE: usize = 512;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token name cannot be empty")]
    EmptyName,

    #[error("a token named '{0}' already exists")]
    DuplicateName(String),

    #[error("token size must be between 1 and {MAX_TOKEN_SIZE} bytes, got {0}")]
    InvalidSize(usize),

    #[error("invalid token lifetime '{0}'")]
    InvalidTtl(String),

    #[error("failed to decrypt token store: {0}")]
    Decrypt(String),

    #[error("token repository error: {0}")]
    Repository(RepositoryError),

    #[error("token store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RepositoryError> for TokenError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Decrypt(msg) => TokenError::Decrypt(msg),
            other => TokenError::Repository(other),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Active records that had expired and were revoked.
    pub expired: usize,
    /// Inactive records deleted.
    pub removed: usize,
}

/// Persistent set of API tokens.
///
/// A single `RwLock` guards both the in-memory records and the write-through to
/// the repository: every mutation builds the new list, persists it, and only
/// then replaces the in-memory copy, so a failed write leaves the store unchanged.
pub struct TokenStore {
    repo: Arc<dyn SecretRepository>,
    clock: Arc<dyn Clock>,
    records: RwLock<Vec<TokenRecord>>,
}

impl TokenStore {
    /// Loads the store. An unreadable or undecryptable backing blob is an error.
    pub fn open(
        repo: Arc<dyn SecretRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        let records = load_records(repo.as_ref())?;
        Ok(Self {
            repo,
            clock,
            records: RwLock::new(records),
        })
    }

    /// Creates a token and returns its plaintext value, which is not retrievable later.
    pub fn create(
        &self,
        name: &str,
        size: Option<usize>,
        ttl: Option<Duration>,
    ) -> Result<(String, TokenRecord), TokenError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TokenError::EmptyName);
        }

        let size = size.unwrap_or(DEFAULT_TOKEN_SIZE);
        if size == 0 || size > MAX_TOKEN_SIZE {
            return Err(TokenError::InvalidSize(size));
        }

        let now = self.clock.now();
        let expires_at = match ttl {
            Some(ttl) => Some(
                now.checked_add_signed(ttl)
                    .ok_or_else(|| TokenError::InvalidTtl(ttl.to_string()))?,
            ),
            None => None,
        };

        let mut bytes = vec![0u8; size];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let record = TokenRecord {
            hash: hash_token(&token),
            name: name.to_string(),
            created_at: now,
            expires_at,
            active: true,
        };

        let mut records = self.write_lock();
        if records.iter().any(|existing| existing.name == record.name) {
            return Err(TokenError::DuplicateName(record.name));
        }

        let mut updated = records.clone();
        updated.push(record.clone());
        self.persist(&updated)?;
        *records = updated;

        tracing::info!(name = %record.name, "Created API token");
        Ok((token, record))
    }

    /// True when the token exists, is active, and has not expired.
    pub fn validate(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }

        let hash = hash_token(token);
        let now = self.clock.now();
        self.read_lock()
            .iter()
            .any(|record| record.hash == hash && record.is_valid(now))
    }

    pub fn list(&self) -> Vec<TokenRecord> {
        self.read_lock().clone()
    }

    /// Marks a token inactive. Returns whether a record matched.
    pub fn revoke(&self, name_or_token: &str) -> Result<bool, TokenError> {
        let hash = hash_token(name_or_token);
        let mut records = self.write_lock();

        let mut updated = records.clone();
        let Some(record) = updated
            .iter_mut()
            .find(|record| record.name == name_or_token || record.hash == hash)
        else {
            return Ok(false);
        };

        if record.active {
            record.active = false;
            self.persist(&updated)?;
            *records = updated;
        }
        Ok(true)
    }

    /// Removes a token entirely. Returns whether a record matched.
    pub fn delete(&self, name_or_token: &str) -> Result<bool, TokenError> {
        let hash = hash_token(name_or_token);
        let mut records = self.write_lock();

        let mut updated = records.clone();
        let before = updated.len();
        updated.retain(|record| record.name != name_or_token && record.hash != hash);
        if updated.len() == before {
            return Ok(false);
        }

        self.persist(&updated)?;
        *records = updated;
        Ok(true)
    }

    /// Revokes expired tokens, then deletes every inactive one.
    pub fn purge(&self) -> Result<PurgeReport, TokenError> {
        let now = self.clock.now();
        let mut records = self.write_lock();
        let mut updated = records.clone();
        let mut report = PurgeReport::default();

        for record in updated.iter_mut() {
            if record.active && record.is_expired(now) {
                record.active = false;
                report.expired += 1;
            }
        }

        let before = updated.len();
        updated.retain(|record| record.active);
        report.removed = before - updated.len();

        if report.expired > 0 || report.removed > 0 {
            self.persist(&updated)?;
            *records = updated;
        }
        Ok(report)
    }

    /// Re-reads the backing blob, replacing the in-memory records.
    pub fn reload(&self) -> Result<(), TokenError> {
        let mut records = self.write_lock();
        *records = load_records(self.repo.as_ref())?;
        Ok(())
    }

    /// Reloads the store whenever its backing file changes on disk.
    ///
    /// Returns `None` for repositories without a local file. The watcher stops
    /// when the returned handle is dropped.
    pub fn watch(self: &Arc<Self>) -> Result<Option<RecommendedWatcher>, TokenError> {
        let Some(path) = self.repo.watch_path(TOKENS_KEY) else {
            return Ok(None);
        };
        let Some(dir) = path.parent().map(|dir| dir.to_path_buf()) else {
            return Ok(None);
        };
        std::fs::create_dir_all(&dir).map_err(|e| TokenError::Repository(e.into()))?;

        let file_name = path.file_name().map(|name| name.to_os_string());
        let store: Weak<Self> = Arc::downgrade(self);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!("Token file watcher error: {}", err);
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            let touches_store = event
                .paths
                .iter()
                .any(|changed| changed.file_name() == file_name.as_deref());
            if !touches_store {
                return;
            }

            let Some(store) = store.upgrade() else {
                return;
            };
            match store.reload() {
                Ok(()) => tracing::debug!("Reloaded token store after external change"),
                Err(err) => tracing::warn!("Failed to reload token store: {}", err),
            }
        })
        .map_err(|e| TokenError::Repository(RepositoryError::Io(std::io::Error::other(e))))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| TokenError::Repository(RepositoryError::Io(std::io::Error::other(e))))?;
        Ok(Some(watcher))
    }

    fn persist(&self, records: &[TokenRecord]) -> Result<(), TokenError> {
        if records.is_empty() {
            self.repo.delete(TOKENS_KEY)?;
            return Ok(());
        }
        let bytes = serde_json::to_vec(records)?;
        self.repo.put(TOKENS_KEY, &bytes)?;
        Ok(())
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Vec<TokenRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Vec<TokenRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_records(repo: &dyn SecretRepository) -> Result<Vec<TokenRecord>, TokenError> {
    match repo.get(TOKENS_KEY)? {
        Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        _ => Ok(Vec::new()),
    }
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Parses a token lifetime such as `12h`, `30d`, `2w`, `6m` or `1y`.
///
/// `0` means the token never expires. Months count as 30 days and years as 365.
pub fn parse_token_ttl(raw: &str) -> Result<Option<Duration>, TokenError> {
    let raw = raw.trim();
    if raw == "0" {
        return Ok(None);
    }

    let invalid = || TokenError::InvalidTtl(raw.to_string());
    let split = raw.len().checked_sub(1).ok_or_else(invalid)?;
    if !raw.is_char_boundary(split) {
        return Err(invalid());
    }
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    let hours = match unit {
        "h" => 1,
        "d" => 24,
        "w" => 24 * 7,
        "m" => 24 * 30,
        "y" => 24 * 365,
        _ => return Err(invalid()),
    };
    amount
        .checked_mul(hours)
        .and_then(Duration::try_hours)
        .map(Some)
        .ok_or_else(invalid)
}
