//! SQLite implementation of the storage traits.
//!
//! This is the primary storage backend for Namegraph. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{IndexEntry, IndexStore, KvStore, ListOptions};

/// SQLite-based actor state store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An index sharing this database, isolated under `namespace`.
    pub fn index(&self, namespace: impl Into<String>) -> SqliteIndex {
        SqliteIndex {
            conn: self.conn.clone(),
            namespace: namespace.into(),
        }
    }
}

/// SQLite-backed index living in the same database as a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
}

impl SqliteIndex {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Run `f` against the locked connection on the blocking pool.
async fn run_blocking<F, T>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    })
    .await
    .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let scope = scope.to_string();
        let key = key.to_string();

        run_blocking(&self.conn, move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv WHERE scope = ?1 AND key = ?2",
                    params![scope, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn put(&self, scope: &str, key: &str, value: &[u8]) -> Result<()> {
        let scope = scope.to_string();
        let key = key.to_string();
        let value = value.to_vec();

        run_blocking(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO kv (scope, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scope, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![scope, key, value, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        let scope = scope.to_string();
        let key = key.to_string();

        run_blocking(&self.conn, move |conn| {
            let changed = conn.execute(
                "DELETE FROM kv WHERE scope = ?1 AND key = ?2",
                params![scope, key],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list(&self, scope: &str, options: &ListOptions) -> Result<Vec<(String, Vec<u8>)>> {
        let scope = scope.to_string();
        let options = options.clone();

        run_blocking(&self.conn, move |conn| {
            let (sql, args) = list_query(&scope, &options);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(String, Vec<u8>)>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

/// Build the range query for [`KvStore::list`].
fn list_query(scope: &str, options: &ListOptions) -> (String, Vec<Value>) {
    let mut sql = String::from("SELECT key, value FROM kv WHERE scope = ?1");
    let mut args = vec![Value::Text(scope.to_string())];

    if let Some(prefix) = &options.prefix {
        args.push(Value::Text(prefix.clone()));
        sql.push_str(&format!(
            " AND substr(key, 1, length(?{n})) = ?{n}",
            n = args.len()
        ));
    }
    if let Some(start) = &options.start {
        args.push(Value::Text(start.clone()));
        sql.push_str(&format!(" AND key >= ?{}", args.len()));
    }
    if let Some(end) = &options.end {
        args.push(Value::Text(end.clone()));
        sql.push_str(&format!(" AND key < ?{}", args.len()));
    }

    sql.push_str(if options.reverse {
        " ORDER BY key DESC"
    } else {
        " ORDER BY key ASC"
    });

    // SQLite treats a negative limit as unbounded.
    let limit = options
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1);
    args.push(Value::Integer(limit));
    sql.push_str(&format!(" LIMIT ?{}", args.len()));

    (sql, args)
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let namespace = self.namespace.clone();
        let key = key.to_string();

        run_blocking(&self.conn, move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM index_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<IndexEntry>> {
        let namespace = self.namespace.clone();
        let key = key.to_string();

        run_blocking(&self.conn, move |conn| {
            let row: Option<(String, Vec<u8>, Option<String>)> = conn
                .query_row(
                    "SELECT key, value, metadata FROM index_entries
                     WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            row.map(row_to_entry).transpose()
        })
        .await
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let namespace = self.namespace.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let metadata = metadata.map(serde_json::to_string).transpose()?;

        run_blocking(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO index_entries (namespace, key, value, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(namespace, key) DO UPDATE SET
                    value = excluded.value,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                params![namespace, key, value, metadata, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let namespace = self.namespace.clone();
        let key = key.to_string();

        run_blocking(&self.conn, move |conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<IndexEntry>> {
        let namespace = self.namespace.clone();
        let prefix = prefix.to_string();

        run_blocking(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, metadata FROM index_entries
                 WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2
                 ORDER BY key ASC",
            )?;
            let rows = stmt
                .query_map(params![namespace, prefix], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<(String, Vec<u8>, Option<String>)>, _>>()?;
            rows.into_iter().map(row_to_entry).collect()
        })
        .await
    }
}

fn row_to_entry((key, value, metadata): (String, Vec<u8>, Option<String>)) -> Result<IndexEntry> {
    let metadata = match metadata {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            StoreError::InvalidData(format!("metadata for {}: {}", key, e))
        })?),
        None => None,
    };
    Ok(IndexEntry {
        key,
        value,
        metadata,
    })
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
