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


//! Content file naming
//!
//! Every book id maps to exactly one file name. Ids made of ASCII letters,
//! digits, `-` and `_` are used as-is (`book_84.txt`, the layout earlier app
//! releases wrote); anything else is hashed so that separators, dots or
//! unicode in an id can never escape the content directory.

use crate::models::BookId;
use sha2::{Digest, Sha256};

/// Prefix shared by all content files
pub const CONTENT_FILE_PREFIX: &str = "book_";

/// Extension shared by all content files
pub const CONTENT_FILE_EXTENSION: &str = "txt";

/// Directory (inside the content directory) for in-progress downloads
pub const STAGING_DIR_NAME: &str = ".partial";

// Keeps names well under the 255-byte component limit of common filesystems
const MAX_PLAIN_ID_LENGTH: usize = 128;

/// Deterministic file name for a book's content
pub fn content_file_name(id: &BookId) -> String {
    let id = id.as_str();
    let stem = if is_plain_id(id) {
        id.to_string()
    } else {
        hex::encode(Sha256::digest(id.as_bytes()))
    };
    format!("{CONTENT_FILE_PREFIX}{stem}.{CONTENT_FILE_EXTENSION}")
}

/// Whether a file name looks like one produced by [`content_file_name`]
pub fn is_content_file_name(name: &str) -> bool {
    name.strip_prefix(CONTENT_FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(CONTENT_FILE_EXTENSION))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|stem| !stem.is_empty())
}

fn is_plain_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_PLAIN_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ids_keep_their_name() {
        assert_eq!(content_file_name(&BookId::from("84")), "book_84.txt");
        assert_eq!(
            content_file_name(&BookId::from("pg-1342_v2")),
            "book_pg-1342_v2.txt"
        );
    }

    #[test]
    fn test_unsafe_ids_are_hashed() {
        let name = content_file_name(&BookId::from("../../etc/passwd"));
        assert!(name.starts_with("book_"));
        assert!(!name.contains('/'));
        assert!(!name.contains(".."));
        // "book_" + 64 hex chars + ".txt"
        assert_eq!(name.len(), 5 + 64 + 4);
    }

    #[test]
    fn test_naming_is_deterministic() {
        let id = BookId::from("Les Misérables");
        assert_eq!(content_file_name(&id), content_file_name(&id));
        assert_ne!(
            content_file_name(&id),
            content_file_name(&BookId::from("Les Miserables"))
        );
    }

    #[test]
    fn test_is_content_file_name() {
        assert!(is_content_file_name("book_84.txt"));
        assert!(is_content_file_name(&content_file_name(&BookId::from("a b"))));
        assert!(!is_content_file_name("book_.txt"));
        assert!(!is_content_file_name("notes.txt"));
        assert!(!is_content_file_name("book_84.epub"));
    }
}
