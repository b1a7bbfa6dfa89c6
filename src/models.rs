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


//! Domain records shared by the session, catalog and library modules
//!
//! Everything here is already normalized: wire-format quirks of the catalog
//! service are dealt with in `api::catalog` and never reach these types.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Catalog identifier of a book
///
/// The catalog has used both numeric and string ids over time; both
/// deserialize into the same textual form (`84` and `"84"` are equal).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    /// Create a book id, trimming surrounding whitespace
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(id.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for BookId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BookId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<u64> for BookId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for BookId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => BookId::new(s),
            RawId::Unsigned(n) => BookId(n.to_string()),
            RawId::Signed(n) => BookId(n.to_string()),
        })
    }
}

/// Normalized catalog record for one book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    /// Author names in catalog order
    pub authors: Vec<String>,
    pub cover_url: Option<String>,
    /// Where the plain-text content can be fetched from
    pub content_url: Option<String>,
    pub description: Option<String>,
    /// Server-side download counter, when reported
    pub downloads: Option<u64>,
}

impl Book {
    /// Authors joined for display ("A, B")
    pub fn authors_display(&self) -> String {
        self.authors.join(", ")
    }

    /// Minimal metadata kept in the bookmark index
    pub fn to_bookmark(&self) -> BookmarkEntry {
        BookmarkEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            authors_display: self.authors_display(),
            cover_url: self.cover_url.clone().unwrap_or_default(),
        }
    }
}

/// One saved book in the bookmark index
///
/// Canonical keys are camelCase; the aliases accept entries written by
/// earlier releases of the app (`authors`, `imageUrl`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkEntry {
    pub id: BookId,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "authors")]
    pub authors_display: String,
    #[serde(default, alias = "imageUrl")]
    pub cover_url: String,
}

impl BookmarkEntry {
    /// Entry for an id with no known display metadata
    pub fn bare(id: BookId) -> Self {
        Self {
            id,
            title: String::new(),
            authors_display: String::new(),
            cover_url: String::new(),
        }
    }
}
