use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const LAST_UPDATE: &str = "last_update";
pub const BLOCK: &str = "block";

/// Namespaced key-value persistence. `set` must be durable once it returns.
pub trait Store: Send + Sync {
    fn get_raw(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn set_raw(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;
}

impl dyn Store {
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        match self.get_raw(namespace, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        self.set_raw(namespace, key, &serde_json::to_vec(value)?)
    }
}

/// sled backed store, one tree per namespace.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match sled::open(path) {
            Ok(db) => Ok(Self { db }),
            Err(e) => Err(open_error(path, e)),
        }
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }
}

impl Store for SledStore {
    fn get_raw(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.db.open_tree(namespace)?;
        Ok(tree.get(key)?.map(|v| v.to_vec()))
    }

    fn set_raw(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let tree = self.db.open_tree(namespace)?;
        tree.insert(key, value)?;
        tree.flush()?;
        Ok(())
    }
}

fn open_error(path: &Path, e: sled::Error) -> Error {
    match e {
        sled::Error::Io(io) if io.kind() == io::ErrorKind::WouldBlock => {
            Error::DatabaseLocked(path.display().to_string())
        }
        e => Error::Storage(e),
    }
}

/// subscriber -> last processed unix timestamp
#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn Store>,
}

impl CursorStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Missing cursor reads as 0, so the first pass takes the whole feed.
    pub fn get(&self, subscriber: &str) -> Result<i64> {
        Ok(self.store.get(LAST_UPDATE, subscriber)?.unwrap_or(0))
    }

    pub fn set(&self, subscriber: &str, timestamp: i64) -> Result<()> {
        self.store.set(LAST_UPDATE, subscriber, &timestamp)
    }
}

/// `<owner>@<fragment>` -> blocked. Entries never expire.
#[derive(Clone)]
pub struct BlockRegistry {
    store: Arc<dyn Store>,
}

impl BlockRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn key(owner: &str, fragment: &str) -> String {
        format!("{owner}@{fragment}")
    }

    pub fn is_blocked(&self, owner: &str, fragment: &str) -> bool {
        let key = Self::key(owner, fragment);
        match self.store.get::<bool>(BLOCK, &key) {
            Ok(blocked) => blocked.unwrap_or(false),
            Err(e) => {
                warn!(%key, error = %e, "block lookup failed, treating as not blocked");
                false
            }
        }
    }

    pub fn set_blocked(&self, owner: &str, fragment: &str, blocked: bool) -> Result<()> {
        self.store.set(BLOCK, &Self::key(owner, fragment), &blocked)
    }
}

#[cfg(test)]
pub(crate) fn temporary_store() -> Arc<dyn Store> {
    let db = sled::Config::new().temporary(true).open().unwrap();
    Arc::new(SledStore::from_db(db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_defaults_to_zero() {
        let cursors = CursorStore::new(temporary_store());

        assert_eq!(cursors.get("chat").unwrap(), 0);

        cursors.set("chat", 1_700_000_000).unwrap();
        assert_eq!(cursors.get("chat").unwrap(), 1_700_000_000);
        assert_eq!(cursors.get("other").unwrap(), 0);
    }

    #[test]
    fn block_is_scoped_by_owner() {
        let blocks = BlockRegistry::new(temporary_store());
        blocks.set_blocked("staff", "abcfrag", true).unwrap();

        assert!(blocks.is_blocked("staff", "abcfrag"));
        assert!(!blocks.is_blocked("other", "abcfrag"));
        assert!(!blocks.is_blocked("staff", "zzz"));

        blocks.set_blocked("staff", "abcfrag", false).unwrap();
        assert!(!blocks.is_blocked("staff", "abcfrag"));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let store = temporary_store();
        store.set(LAST_UPDATE, "k", &5i64).unwrap();
        store.set(BLOCK, "k", &true).unwrap();

        assert_eq!(store.get::<i64>(LAST_UPDATE, "k").unwrap(), Some(5));
        assert_eq!(store.get::<bool>(BLOCK, "k").unwrap(), Some(true));
    }

    #[test]
    fn lock_conflict_is_reported_as_locked() {
        let busy = sled::Error::Io(io::Error::new(io::ErrorKind::WouldBlock, "could not acquire lock"));
        let err = open_error(Path::new("bot.db"), busy);

        assert!(matches!(&err, Error::DatabaseLocked(path) if path == "bot.db"));
        assert!(err.to_string().contains("/rewind"));

        let other = sled::Error::Unsupported("x".into());
        assert!(matches!(open_error(Path::new("bot.db"), other), Error::Storage(_)));
    }

    #[test]
    fn garbage_value_is_decode_error() {
        let store = temporary_store();
        store.set_raw(BLOCK, "staff@x", b"not json").unwrap();

        assert!(store.get::<bool>(BLOCK, "staff@x").is_err());
        assert!(!BlockRegistry::new(store).is_blocked("staff", "x"));
    }
}
