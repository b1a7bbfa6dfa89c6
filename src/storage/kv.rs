// Libro - Public-domain e-book reader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Persistent key-value stores
//!
//! The session and the library only see the [`KeyValueStore`] trait. The
//! SQLite implementation backs two logical stores in one database:
//! [`StoreTable::Preferences`] for app data and [`StoreTable::Secure`] for
//! credentials. On device builds the host app may provide its own secure
//! store (Keychain, Keystore) behind the same trait.

use crate::error::{Result, ShelfError};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// One write in an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WriteOp {
    pub fn put<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        WriteOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete<K: Into<String>>(key: K) -> Self {
        WriteOp::Delete { key: key.into() }
    }

    fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// Durable string-to-string storage
///
/// Writes to a single key are serialized by the store; `apply` makes a
/// batch visible all at once or not at all.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply all operations atomically
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()>;

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(vec![WriteOp::put(key, value)]).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.apply(vec![WriteOp::delete(key)]).await
    }
}

/// Table backing a [`SqliteStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTable {
    Preferences,
    Secure,
}

impl StoreTable {
    fn name(self) -> &'static str {
        match self {
            StoreTable::Preferences => "KeyValue",
            StoreTable::Secure => "SecureItems",
        }
    }
}

/// SQLite-backed key-value store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: StoreTable,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, table: StoreTable) -> Self {
        Self { pool, table }
    }

    pub fn preferences(pool: SqlitePool) -> Self {
        Self::new(pool, StoreTable::Preferences)
    }

    pub fn secure(pool: SqlitePool) -> Self {
        Self::new(pool, StoreTable::Secure)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", self.table.name());
        sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShelfError::storage(format!("read '{}'", key), e))
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let operation = format!(
            "write {}",
            ops.iter().map(WriteOp::key).collect::<Vec<_>>().join(", ")
        );

        let upsert = format!(
            r#"
            INSERT INTO {} (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
            self.table.name()
        );
        let remove = format!("DELETE FROM {} WHERE key = ?", self.table.name());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ShelfError::storage(operation.clone(), e))?;

        for op in &ops {
            let result = match op {
                WriteOp::Put { key, value } => {
                    sqlx::query(&upsert).bind(key).bind(value).execute(&mut *tx).await
                }
                WriteOp::Delete { key } => sqlx::query(&remove).bind(key).execute(&mut *tx).await,
            };
            result.map_err(|e| ShelfError::storage(operation.clone(), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| ShelfError::storage(operation, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;

    #[tokio::test]
    async fn test_set_get_delete() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteStore::preferences(db.pool().clone());

        assert_eq!(store.get("bookmark").await.unwrap(), None);

        store.set("bookmark", "[]").await.unwrap();
        assert_eq!(store.get("bookmark").await.unwrap().as_deref(), Some("[]"));

        store.set("bookmark", "[1]").await.unwrap();
        assert_eq!(store.get("bookmark").await.unwrap().as_deref(), Some("[1]"));

        store.delete("bookmark").await.unwrap();
        assert_eq!(store.get("bookmark").await.unwrap(), None);

        // Deleting a missing key is fine
        store.delete("bookmark").await.unwrap();
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let db = Database::new_in_memory().await.unwrap();
        let prefs = SqliteStore::preferences(db.pool().clone());
        let secure = SqliteStore::secure(db.pool().clone());

        secure.set("token", "secret").await.unwrap();
        assert_eq!(prefs.get("token").await.unwrap(), None);
        assert_eq!(secure.get("token").await.unwrap().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_apply_batch() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteStore::secure(db.pool().clone());
        store.set("refresh", "old").await.unwrap();

        store
            .apply(vec![WriteOp::put("access", "a1"), WriteOp::delete("refresh")])
            .await
            .unwrap();

        assert_eq!(store.get("access").await.unwrap().as_deref(), Some("a1"));
        assert_eq!(store.get("refresh").await.unwrap(), None);
    }
}
