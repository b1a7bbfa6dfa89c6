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


//! Local persistence
//!
//! One SQLite database holds two key-value tables: preferences (the bookmark
//! index) and secure items (the credential pair).
//!
//! # Usage Example
//! ```no_run
//! use libro_core::storage::{Database, KeyValueStore, SqliteStore};
//!
//! # async fn example() -> libro_core::error::Result<()> {
//! let db = Database::new("./libro.db").await?;
//! let prefs = SqliteStore::preferences(db.pool().clone());
//! prefs.set("bookmark", "[]").await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod kv;
pub mod migrations;

// Re-export commonly used types
pub use database::Database;
pub use kv::{KeyValueStore, SqliteStore, StoreTable, WriteOp};
