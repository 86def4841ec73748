use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// A single mutation inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put { key: String, value: String },
    Delete { key: String },
}

impl StoreOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        StoreOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        StoreOp::Delete { key: key.into() }
    }
}

/// String keyed persistent store shared by the identity and trust stores.
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// All keys, in the order they were first written.
    fn keys(&self) -> Result<Vec<String>>;

    /// Commit every op or none of them.
    fn apply(&self, ops: &[StoreOp]) -> Result<()>;
}

/// `Storage` backed by SQLite
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

impl SqliteStorage {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, []).context("creating kv table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("storage connection poisoned"))
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                StoreOp::Put { key, value } => {
                    // Upsert keeps the original rowid, so enumeration order stays
                    // first-insertion order.
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, value],
                    )?;
                }
                StoreOp::Delete { key } => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit().context("committing storage batch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn put_get_delete() {
        let store = SqliteStorage::in_memory().unwrap();

        store.apply(&[StoreOp::put("a", "1")]).unwrap();
        assert_equal!(store.get("a").unwrap(), Some("1".to_string()));

        store.apply(&[StoreOp::delete("a")]).unwrap();
        assert_equal!(store.get("a").unwrap(), None);
    }

    #[test]
    fn keys_keep_first_insertion_order() {
        let store = SqliteStorage::in_memory().unwrap();
        store
            .apply(&[
                StoreOp::put("b", "1"),
                StoreOp::put("a", "2"),
                StoreOp::put("c", "3"),
            ])
            .unwrap();
        store.apply(&[StoreOp::put("b", "updated")]).unwrap();

        assert_equal!(
            store.keys().unwrap(),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
        assert_equal!(store.get("b").unwrap(), Some("updated".to_string()));
    }

    #[test]
    fn clones_share_the_same_store() {
        let store = SqliteStorage::in_memory().unwrap();
        let other = store.clone();

        store.apply(&[StoreOp::put("k", "v")]).unwrap();
        assert_equal!(other.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("handshake.db");

        SqliteStorage::open(&path)
            .unwrap()
            .apply(&[StoreOp::put("k", "v")])
            .unwrap();

        let reopened = SqliteStorage::open(&path).unwrap();
        assert_equal!(reopened.get("k").unwrap(), Some("v".to_string()));
    }
}
