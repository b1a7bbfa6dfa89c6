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


//! Content file storage
//!
//! # Key Operations
//! - Deterministic path per book id
//! - Staging paths for downloads (renamed into place when complete)
//! - Existence checks, reads and deletes
//! - Listing of content files for the orphan sweep

use crate::error::{Result, ShelfError};
use crate::file::paths::{content_file_name, is_content_file_name, STAGING_DIR_NAME};
use crate::models::BookId;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory of downloaded book content, one file per book id
#[derive(Debug, Clone)]
pub struct ContentStore {
    /// Base content directory
    root: PathBuf,
}

impl ContentStore {
    /// Create a content store rooted at `root` (created lazily)
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Get the content directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of a book's content
    pub fn path_for(&self, id: &BookId) -> PathBuf {
        self.root.join(content_file_name(id))
    }

    /// Directory holding in-progress downloads
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    /// Fresh, unique staging path for a download of `id`
    pub fn staging_path_for(&self, id: &BookId) -> PathBuf {
        self.staging_dir().join(format!(
            "{}.{}.part",
            content_file_name(id),
            uuid::Uuid::new_v4()
        ))
    }

    /// Create the content and staging directories
    pub async fn ensure_directories(&self) -> Result<()> {
        ensure_directory_exists(&self.staging_dir()).await
    }

    /// Check whether content exists for `id`
    pub async fn exists(&self, id: &BookId) -> bool {
        file_exists(&self.path_for(id)).await
    }

    /// Read a book's content
    ///
    /// Returns `Ok(None)` when no content file exists.
    pub async fn read(&self, id: &BookId) -> Result<Option<String>> {
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                ShelfError::storage(
                    "read book content",
                    format!("{} is not valid UTF-8: {}", path.display(), e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShelfError::storage(
                "read book content",
                format!("{}: {}", path.display(), e),
            )),
        }
    }

    /// Write content for `id` atomically (temp file, then rename)
    pub async fn write(&self, id: &BookId, contents: &[u8]) -> Result<()> {
        self.ensure_directories().await?;
        let staging = self.staging_path_for(id);

        fs::write(&staging, contents).await.map_err(|e| {
            ShelfError::storage(
                "write book content",
                format!("{}: {}", staging.display(), e),
            )
        })?;

        self.commit_staged(&staging, id).await
    }

    /// Move a completed staging file into its final place
    pub async fn commit_staged(&self, staging: &Path, id: &BookId) -> Result<()> {
        let destination = self.path_for(id);
        if let Err(e) = fs::rename(staging, &destination).await {
            let _ = fs::remove_file(staging).await;
            return Err(ShelfError::storage(
                "store book content",
                format!("{} -> {}: {}", staging.display(), destination.display(), e),
            ));
        }
        Ok(())
    }

    /// Delete the content for `id`
    ///
    /// Returns whether a file was removed. A missing file is not an error.
    pub async fn delete(&self, id: &BookId) -> Result<bool> {
        delete_file(&self.path_for(id)).await
    }

    /// All content files currently on disk
    pub async fn stored_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ShelfError::storage(
                    "list book content",
                    format!("{}: {}", self.root.display(), e),
                ))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ShelfError::storage(
                "list book content",
                format!("{}: {}", self.root.display(), e),
            )
        })? {
            let name = entry.file_name();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && name.to_str().is_some_and(is_content_file_name) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove every leftover staging file
    ///
    /// Only call this when no download is running.
    pub async fn clear_staging(&self) -> Result<usize> {
        let staging = self.staging_dir();
        let mut entries = match fs::read_dir(&staging).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ShelfError::storage(
                    "clear staged downloads",
                    format!("{}: {}", staging.display(), e),
                ))
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if delete_file(&entry.path()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Ensure directory exists, creating parent directories as needed
pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
    if file_exists(path).await {
        return Ok(());
    }

    fs::create_dir_all(path).await.map_err(|e| {
        ShelfError::storage(
            "create directory",
            format!("{}: {}", path.display(), e),
        )
    })
}

/// Check if file exists
pub async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Delete a file, treating "not found" as nothing to do
pub async fn delete_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ShelfError::storage(
            "delete file",
            format!("{}: {}", path.display(), e),
        )),
    }
}
