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


//! Bookmark index encoding and schema migration
//!
//! # Persisted forms
//! ```text
//! v2 (current)  {"schema_version": 2, "entries": [{"id", "title", "authorsDisplay", "coverUrl"}]}
//! v1 (legacy)   [{"id", "title", "authors", "imageUrl"}, ...]
//! v0 (legacy)   ["84", 1342, ...]
//! ```
//!
//! Legacy forms decode into v2 entries and are flagged for a one-time
//! rewrite. Anything else (unknown versions, malformed JSON) decodes as an
//! empty index.

use crate::error::Result;
use crate::models::{BookId, BookmarkEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Preferences key holding the bookmark index
pub const BOOKMARK_INDEX_KEY: &str = "bookmark";

/// Version written by this release
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    schema_version: u32,
    entries: Vec<BookmarkEntry>,
}

/// Which persisted form an index was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Current,
    /// Bare array of entry objects
    LegacyEntries,
    /// Bare array of ids
    LegacyIds,
    /// Valid JSON this release doesn't understand
    Unsupported,
    Corrupt,
}

/// Result of decoding a persisted index
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedIndex {
    pub entries: Vec<BookmarkEntry>,
    pub format: IndexFormat,
}

impl DecodedIndex {
    /// Whether the stored value should be rewritten in the current form
    pub fn needs_rewrite(&self) -> bool {
        matches!(
            self.format,
            IndexFormat::LegacyEntries | IndexFormat::LegacyIds
        )
    }
}

/// Decode a persisted bookmark index, migrating legacy forms
pub fn decode_index(raw: &str) -> DecodedIndex {
    let empty = |format| DecodedIndex {
        entries: Vec::new(),
        format,
    };

    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return empty(IndexFormat::Corrupt);
    };

    let version = match &value {
        Value::Array(_) => None,
        Value::Object(map) => match map.get("schema_version").and_then(Value::as_u64) {
            Some(version) => Some(version),
            None => return empty(IndexFormat::Corrupt),
        },
        _ => return empty(IndexFormat::Corrupt),
    };

    match (version, value) {
        (None, Value::Array(items)) => decode_legacy(items),
        (Some(v), value) if v == u64::from(SCHEMA_VERSION) => {
            match serde_json::from_value::<IndexDocument>(value) {
                Ok(doc) => DecodedIndex {
                    entries: dedup_first(doc.entries),
                    format: IndexFormat::Current,
                },
                Err(_) => empty(IndexFormat::Corrupt),
            }
        }
        _ => empty(IndexFormat::Unsupported),
    }
}

fn decode_legacy(items: Vec<Value>) -> DecodedIndex {
    let ids_only = !items.is_empty()
        && items
            .iter()
            .all(|item| item.is_string() || item.is_number());

    let entries = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(_) | Value::Number(_) => serde_json::from_value::<BookId>(item)
                .ok()
                .map(BookmarkEntry::bare),
            Value::Object(_) => serde_json::from_value::<BookmarkEntry>(item).ok(),
            _ => None,
        })
        .filter(|entry| !entry.id.is_empty())
        .collect();

    DecodedIndex {
        entries: dedup_first(entries),
        format: if ids_only {
            IndexFormat::LegacyIds
        } else {
            IndexFormat::LegacyEntries
        },
    }
}

/// Encode entries in the current form
pub fn encode_index(entries: &[BookmarkEntry]) -> Result<String> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        schema_version: u32,
        entries: &'a [BookmarkEntry],
    }

    Ok(serde_json::to_string(&Borrowed {
        schema_version: SCHEMA_VERSION,
        entries,
    })?)
}

/// Drop repeated ids, keeping the first occurrence and order
fn dedup_first(entries: Vec<BookmarkEntry>) -> Vec<BookmarkEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect()
}
