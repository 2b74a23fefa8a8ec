//! Session storage.
//!
//! Handlers only see the [`SessionStore`] trait. Two backends exist: an
//! in-memory map, and a redb database with an in-memory read cache for
//! sessions that must survive a restart.

use anyhow::{anyhow, Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

use super::types::{Session, SessionId};

/// Get/set/clear access to sessions keyed by session ID.
pub trait SessionStore: Send + Sync {
    /// Fetch a live session, updating its last-accessed time.
    /// Expired sessions read as `None`.
    fn get(&self, id: SessionId) -> Result<Option<Session>>;

    /// Insert or replace a session.
    fn set(&self, session: Session) -> Result<()>;

    /// Remove a session. Returns whether it existed.
    fn clear(&self, id: SessionId) -> Result<bool>;

    /// Drop every expired session. Returns the number removed.
    fn evict_expired(&self) -> Result<usize>;

    /// Number of stored sessions, expired or not.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Volatile store: sessions are lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write().map_err(|_| anyhow!("Lock poisoned"))?;
        match sessions.get_mut(&id) {
            Some(session) if session.is_expired() => {
                sessions.remove(&id);
                Ok(None)
            }
            Some(session) => {
                session.touch();
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    fn set(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| anyhow!("Lock poisoned"))?;
        sessions.insert(session.id, session);
        Ok(())
    }

    fn clear(&self, id: SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(|_| anyhow!("Lock poisoned"))?;
        Ok(sessions.remove(&id).is_some())
    }

    fn evict_expired(&self) -> Result<usize> {
        let mut sessions = self.sessions.write().map_err(|_| anyhow!("Lock poisoned"))?;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        Ok(before - sessions.len())
    }

    fn len(&self) -> Result<usize> {
        let sessions = self.sessions.read().map_err(|_| anyhow!("Lock poisoned"))?;
        Ok(sessions.len())
    }
}

/// redb table for sessions (key: session_id hex, value: MessagePack bytes).
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rp_sessions");

/// Persistent store backed by redb, with an in-memory cache.
pub struct RedbSessionStore {
    db: Database,
    cache: RwLock<HashMap<SessionId, Session>>,
    max_cache_size: usize,
}

impl RedbSessionStore {
    /// Open or create a session store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open session database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
        }
        write_txn.commit()?;

        let cache = Self::load_active_sessions(&db)?;
        debug!(sessions = cache.len(), "Loaded active sessions into cache");

        Ok(Self {
            db,
            cache: RwLock::new(cache),
            max_cache_size: 10000,
        })
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let data = rmp_serde::to_vec(session).context("Failed to serialize session")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.insert(session.id.to_hex().as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            let result = table.remove(key)?;
            result.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn cache_insert(&self, session: Session) {
        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= self.max_cache_size && !cache.contains_key(&session.id) {
                evict_cache_lru(&mut cache);
            }
            cache.insert(session.id, session);
        }
    }

    fn load_active_sessions(db: &Database) -> Result<HashMap<SessionId, Session>> {
        let mut sessions = HashMap::new();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        for entry in table.iter()? {
            let (_, value) = entry?;
            if let Ok(session) = rmp_serde::from_slice::<Session>(value.value()) {
                if !session.is_expired() {
                    sessions.insert(session.id, session);
                }
            }
        }

        Ok(sessions)
    }
}

impl SessionStore for RedbSessionStore {
    fn get(&self, id: SessionId) -> Result<Option<Session>> {
        if let Ok(mut cache) = self.cache.write() {
            if let Some(session) = cache.get_mut(&id) {
                if session.is_expired() {
                    cache.remove(&id);
                    // Left in the database for the cleanup task
                    return Ok(None);
                }
                session.touch();
                return Ok(Some(session.clone()));
            }
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        let key = id.to_hex();
        let Some(value) = table.get(key.as_str())? else {
            return Ok(None);
        };
        let mut session: Session =
            rmp_serde::from_slice(value.value()).context("Failed to deserialize session")?;
        if session.is_expired() {
            return Ok(None);
        }

        session.touch();
        self.cache_insert(session.clone());
        Ok(Some(session))
    }

    fn set(&self, session: Session) -> Result<()> {
        self.persist(&session)?;
        self.cache_insert(session);
        Ok(())
    }

    fn clear(&self, id: SessionId) -> Result<bool> {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&id);
        }
        self.remove(&id.to_hex())
    }

    fn evict_expired(&self) -> Result<usize> {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, session| !session.is_expired());
        }

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS_TABLE)?;

            let mut keys = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match rmp_serde::from_slice::<Session>(value.value()) {
                    Ok(session) if session.is_expired() => keys.push(key.value().to_string()),
                    Err(e) => {
                        warn!(
                            key = key.value(),
                            error = %e,
                            "Failed to deserialize session, marking for deletion"
                        );
                        keys.push(key.value().to_string());
                    }
                    _ => {}
                }
            }
            keys
        };

        let mut evicted = 0;
        for key in &expired {
            if self.remove(key)? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        Ok(table.len()? as usize)
    }
}

/// Drop the least recently accessed session from the cache.
fn evict_cache_lru(cache: &mut HashMap<SessionId, Session>) {
    if let Some(oldest_id) = cache
        .iter()
        .min_by_key(|(_, s)| s.last_accessed)
        .map(|(id, _)| *id)
    {
        cache.remove(&oldest_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::test_session;
    use chrono::Utc;
    use tempfile::tempdir;

    fn redb_store() -> (RedbSessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RedbSessionStore::open(dir.path().join("sessions.redb")).unwrap();
        (store, dir)
    }

    fn expired(user: &str) -> Session {
        let mut session = test_session(user);
        session.expires_at = Utc::now() - chrono::Duration::seconds(10);
        session
    }

    fn check_set_get_clear(store: &dyn SessionStore) {
        let session = test_session("bob");
        let id = session.id;
        store.set(session).unwrap();

        let retrieved = store.get(id).unwrap().unwrap();
        assert_eq!(retrieved.user, "bob");
        assert_eq!(retrieved.userinfo["sub"], "id-bob");
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.clear(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
        assert!(!store.clear(id).unwrap());
        assert!(store.is_empty().unwrap());
    }

    fn check_expiry(store: &dyn SessionStore) {
        let live = test_session("alice");
        let live_id = live.id;
        let dead = expired("mallory");
        let dead_id = dead.id;
        store.set(live).unwrap();
        store.set(dead).unwrap();

        assert!(store.get(dead_id).unwrap().is_none());
        assert_eq!(store.evict_expired().unwrap(), 1);
        assert!(store.get(live_id).unwrap().is_some());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_memory_set_get_clear() {
        check_set_get_clear(&MemorySessionStore::new());
    }

    #[test]
    fn test_memory_expiry() {
        let store = MemorySessionStore::new();
        let dead = expired("mallory");
        store.set(dead).unwrap();
        assert_eq!(store.evict_expired().unwrap(), 1);

        // Expired entries read through get() are removed eagerly.
        let dead = expired("eve");
        let id = dead.id;
        store.set(dead).unwrap();
        assert!(store.get(id).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_redb_set_get_clear() {
        let (store, _dir) = redb_store();
        check_set_get_clear(&store);
    }

    #[test]
    fn test_redb_expiry() {
        let (store, _dir) = redb_store();
        check_expiry(&store);
    }

    #[test]
    fn test_redb_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.redb");
        let session = test_session("bob");
        let id = session.id;

        {
            let store = RedbSessionStore::open(path.clone()).unwrap();
            store.set(session).unwrap();
        }

        let reopened = RedbSessionStore::open(path).unwrap();
        let restored = reopened.get(id).unwrap().unwrap();
        assert_eq!(restored.user, "bob");
        assert_eq!(restored.id_token.as_deref(), Some("h2.c2.s2"));
    }
}
