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


//! Libro core: session handling, catalog access and the offline library
//!
//! # Modules
//! - `api`: session manager (credentials, coalesced token refresh) and catalog client
//! - `library`: bookmark index and downloaded content, kept consistent
//! - `storage`: SQLite-backed key-value stores
//! - `file`: content files on disk
//! - `download`: streaming content downloads
//! - `app`: the [`Libro`] handle wiring everything together

uniffi::setup_scaffolding!();

pub mod api;
pub mod app;
pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod library;
pub mod models;
pub mod storage;

pub use app::Libro;
pub use config::{ClientConfig, LibraryConfig, LibroConfig, SignOutPolicy};
pub use error::{ErrorKind, Result, ShelfError};
pub use models::{Book, BookId, BookmarkEntry};

/// File name the content of `book_id` is stored under
#[uniffi::export]
pub fn book_content_file_name(book_id: String) -> String {
    file::content_file_name(&BookId::new(book_id))
}

/// Version of the core library
#[uniffi::export]
pub fn core_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_content_file_name() {
        assert_eq!(book_content_file_name("84".to_string()), "book_84.txt");
        assert!(book_content_file_name("../etc/passwd".to_string()).len() > 64);
    }

    #[test]
    fn test_core_version() {
        assert!(!core_version().is_empty());
    }
}
