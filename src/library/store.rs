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


//! Offline library: the bookmark index and the content files it references
//!
//! The index is the source of truth for what is in the library. Content
//! files are a cache: a bookmark without content is a normal state, and
//! content without a bookmark is garbage that [`OfflineLibrary::prune_orphaned_content`]
//! removes.
//!
//! # Saving a book
//! 1. Append to the index and persist it (failure aborts, nothing changed)
//! 2. Report the download counter (failure logged only)
//! 3. Download the content
//! 4. Verify the content file exists
//!
//! Failures in 3 or 4 keep the bookmark and yield
//! [`SaveOutcome::SavedWithoutContent`].
//!
//! Index read-modify-write cycles are serialized by an internal mutex.
//! Downloads run outside of it, so a finished download re-checks under the
//! mutex that the book is still bookmarked and its content was not purged
//! meanwhile; otherwise the fresh file is deleted again.

use crate::api::catalog::LibraryRemote;
use crate::config::SignOutPolicy;
use crate::error::{Result, ShelfError};
use crate::file::manager::delete_file;
use crate::file::{content_file_name, ContentStore};
use crate::library::bookmarks::{decode_index, encode_index, IndexFormat, BOOKMARK_INDEX_KEY};
use crate::models::{Book, BookId, BookmarkEntry};
use crate::storage::KeyValueStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Text shown when a book has no downloaded content
pub const CONTENT_UNAVAILABLE: &str = "Book content is not available.";

/// Text shown when downloaded content cannot be read
pub const CONTENT_UNREADABLE: &str = "Book content could not be loaded.";

/// Result of [`OfflineLibrary::add_bookmark`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The book was already in the library; nothing was done
    AlreadySaved,
    /// Bookmarked and cached for offline reading
    Saved { bytes: u64 },
    /// Bookmarked, but the content could not be stored
    SavedWithoutContent { reason: String },
}

impl SaveOutcome {
    pub fn is_fully_cached(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, SaveOutcome::SavedWithoutContent { .. })
    }
}

/// Result of [`OfflineLibrary::remove_bookmark`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The book wasn't in the library
    NotBookmarked,
    Removed,
    /// The bookmark is gone but its content file could not be deleted
    RemovedContentRetained { reason: String },
}

/// Body text for the reading screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookContent {
    Available(String),
    Unavailable,
    Unreadable,
}

impl BookContent {
    /// Text to render; the sentinel message when there is no content
    pub fn text(&self) -> &str {
        match self {
            BookContent::Available(text) => text,
            BookContent::Unavailable => CONTENT_UNAVAILABLE,
            BookContent::Unreadable => CONTENT_UNREADABLE,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, BookContent::Available(_))
    }
}

/// Everything the reading screen needs, looked up independently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingView {
    pub id: BookId,
    pub entry: Option<BookmarkEntry>,
    pub content: BookContent,
}

impl ReadingView {
    /// Both the bookmark and its content were found
    pub fn is_readable(&self) -> bool {
        self.entry.is_some() && self.content.is_available()
    }

    pub fn title(&self) -> &str {
        self.entry.as_ref().map_or("", |entry| entry.title.as_str())
    }

    pub fn authors(&self) -> &str {
        self.entry
            .as_ref()
            .map_or("", |entry| entry.authors_display.as_str())
    }
}

/// Bookmark index plus content files, kept consistent as one unit
pub struct OfflineLibrary {
    index_store: Arc<dyn KeyValueStore>,
    content: ContentStore,
    remote: Arc<dyn LibraryRemote>,
    /// Serializes index updates; counts content purges
    index_lock: Mutex<u64>,
}

impl std::fmt::Debug for OfflineLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineLibrary")
            .field("content", &self.content)
            .finish()
    }
}

impl OfflineLibrary {
    pub fn new(
        index_store: Arc<dyn KeyValueStore>,
        content: ContentStore,
        remote: Arc<dyn LibraryRemote>,
    ) -> Self {
        Self {
            index_store,
            content,
            remote,
            index_lock: Mutex::new(0),
        }
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }

    /// Saved books in display order
    ///
    /// An absent or unreadable index is an empty library.
    pub async fn list_bookmarks(&self) -> Vec<BookmarkEntry> {
        let _guard = self.index_lock.lock().await;
        self.load_index().await.unwrap_or_else(|e| {
            warn!(error = %e, "bookmark index unavailable");
            Vec::new()
        })
    }

    pub async fn is_bookmarked(&self, id: &BookId) -> bool {
        self.find_bookmark(id).await.is_some()
    }

    pub async fn find_bookmark(&self, id: &BookId) -> Option<BookmarkEntry> {
        self.list_bookmarks()
            .await
            .into_iter()
            .find(|entry| &entry.id == id)
    }

    /// Save a book for offline reading
    ///
    /// # Errors
    /// Only a failure to read or persist the index is an error; in that case
    /// nothing has changed. Download problems are reported through
    /// [`SaveOutcome::SavedWithoutContent`].
    pub async fn add_bookmark(&self, book: &Book) -> Result<SaveOutcome> {
        if book.id.is_empty() {
            return Err(ShelfError::invalid_input("Book id must not be empty"));
        }

        {
            let _guard = self.index_lock.lock().await;
            let mut entries = self.load_index().await?;
            if entries.iter().any(|entry| entry.id == book.id) {
                debug!(book_id = %book.id, "already bookmarked");
                return Ok(SaveOutcome::AlreadySaved);
            }
            entries.push(book.to_bookmark());
            self.save_index(&entries).await?;
        }
        info!(book_id = %book.id, title = %book.title, "bookmark added");

        if let Err(e) = self.remote.report_download(&book.id).await {
            warn!(book_id = %book.id, error = %e, "failed to report download");
        }

        Ok(self.fetch_content(book).await)
    }

    /// Download content again for a bookmarked book that has none
    pub async fn retry_download(&self, book: &Book) -> Result<SaveOutcome> {
        if !self.is_bookmarked(&book.id).await {
            return Err(ShelfError::invalid_input(format!(
                "Book {} is not bookmarked",
                book.id
            )));
        }
        if self.content.exists(&book.id).await {
            return Ok(SaveOutcome::AlreadySaved);
        }
        Ok(self.fetch_content(book).await)
    }

    /// Steps 3 and 4 of saving
    async fn fetch_content(&self, book: &Book) -> SaveOutcome {
        let purges = *self.index_lock.lock().await;
        let Some(url) = book.content_url.as_deref() else {
            warn!(book_id = %book.id, "book has no content URL");
            return SaveOutcome::SavedWithoutContent {
                reason: "The book has no downloadable content".to_string(),
            };
        };

        let bytes = match self.remote.download_content(url, &self.content, &book.id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(book_id = %book.id, error = %e, "content download failed");
                return SaveOutcome::SavedWithoutContent {
                    reason: e.user_message(),
                };
            }
        };

        if !self.content.exists(&book.id).await {
            warn!(book_id = %book.id, "content missing after download");
            return SaveOutcome::SavedWithoutContent {
                reason: "Downloaded content was not found on disk".to_string(),
            };
        }

        let guard = self.index_lock.lock().await;
        let reason = if *guard != purges {
            Some("The library was cleared during the download")
        } else {
            match self.load_index().await {
                Ok(entries) if !entries.iter().any(|entry| entry.id == book.id) => {
                    Some("The book was removed during the download")
                }
                Ok(_) => None,
                // Keep the file; a later prune settles it
                Err(e) => {
                    warn!(book_id = %book.id, error = %e, "could not re-check bookmark");
                    None
                }
            }
        };

        if let Some(reason) = reason {
            if let Err(e) = self.content.delete(&book.id).await {
                warn!(book_id = %book.id, error = %e, "failed to discard downloaded content");
            }
            info!(book_id = %book.id, reason, "discarded downloaded content");
            return SaveOutcome::SavedWithoutContent {
                reason: reason.to_string(),
            };
        }
        drop(guard);

        info!(book_id = %book.id, bytes, "content stored");
        SaveOutcome::Saved { bytes }
    }

    /// Remove a book and its content
    ///
    /// The content of a non-member id is deleted as well, so afterwards
    /// [`OfflineLibrary::read_content`] is `Unavailable` either way.
    pub async fn remove_bookmark(&self, id: &BookId) -> Result<RemoveOutcome> {
        let _guard = self.index_lock.lock().await;
        let mut entries = self.load_index().await?;
        let before = entries.len();
        entries.retain(|entry| &entry.id != id);
        let was_member = entries.len() != before;

        if was_member {
            self.save_index(&entries).await?;
            info!(book_id = %id, "bookmark removed");
        }

        let deleted = self.content.delete(id).await;
        match (was_member, deleted) {
            (false, Ok(orphan)) => {
                if orphan {
                    debug!(book_id = %id, "deleted orphaned content");
                }
                Ok(RemoveOutcome::NotBookmarked)
            }
            (false, Err(e)) => {
                warn!(book_id = %id, error = %e, "failed to delete orphaned content");
                Ok(RemoveOutcome::NotBookmarked)
            }
            (true, Ok(_)) => Ok(RemoveOutcome::Removed),
            (true, Err(e)) => {
                warn!(book_id = %id, error = %e, "failed to delete content");
                Ok(RemoveOutcome::RemovedContentRetained {
                    reason: e.user_message(),
                })
            }
        }
    }

    /// Content for the reading screen; never fails
    pub async fn read_content(&self, id: &BookId) -> BookContent {
        match self.content.read(id).await {
            Ok(Some(text)) => BookContent::Available(text),
            Ok(None) => BookContent::Unavailable,
            Err(e) => {
                warn!(book_id = %id, error = %e, "failed to read content");
                BookContent::Unreadable
            }
        }
    }

    pub async fn open_for_reading(&self, id: &BookId) -> ReadingView {
        let entry = self.find_bookmark(id).await;
        let content = self.read_content(id).await;
        ReadingView {
            id: id.clone(),
            entry,
            content,
        }
    }

    /// Delete content files no bookmark references, and stale staged downloads
    ///
    /// Returns the number of content files deleted. Run while no download
    /// is in flight.
    pub async fn prune_orphaned_content(&self) -> Result<usize> {
        let _guard = self.index_lock.lock().await;
        let entries = self.load_index().await?;
        let referenced: HashSet<String> = entries
            .iter()
            .map(|entry| content_file_name(&entry.id))
            .collect();

        let mut removed = 0;
        for path in self.content.stored_files().await? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if referenced.contains(&name) {
                continue;
            }
            match delete_file(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune content"),
            }
        }

        let staged = self.content.clear_staging().await?;
        if removed > 0 || staged > 0 {
            info!(removed, staged, "pruned orphaned content");
        }
        Ok(removed)
    }

    /// Apply the configured sign-out policy to the library
    pub async fn apply_sign_out_policy(&self, policy: SignOutPolicy) -> Result<()> {
        if policy == SignOutPolicy::KeepLibrary {
            return Ok(());
        }

        let mut purges = self.index_lock.lock().await;
        *purges += 1;
        if policy == SignOutPolicy::PurgeLibrary {
            self.save_index(&[]).await?;
        }

        let mut failures = 0;
        for path in self.content.stored_files().await? {
            if let Err(e) = delete_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to purge content");
                failures += 1;
            }
        }
        self.content.clear_staging().await?;

        info!(?policy, failures, "applied sign-out policy");
        if failures > 0 {
            return Err(ShelfError::storage(
                "purge content",
                format!("{} content file(s) could not be deleted", failures),
            ));
        }
        Ok(())
    }

    /// Read the index; callers hold `index_lock`
    async fn load_index(&self) -> Result<Vec<BookmarkEntry>> {
        let Some(raw) = self.index_store.get(BOOKMARK_INDEX_KEY).await? else {
            return Ok(Vec::new());
        };

        let decoded = decode_index(&raw);
        match decoded.format {
            IndexFormat::Corrupt => warn!("bookmark index is corrupt, treating as empty"),
            IndexFormat::Unsupported => {
                warn!("bookmark index has an unsupported schema, treating as empty")
            }
            _ => {}
        }

        if decoded.needs_rewrite() {
            match self.save_index(&decoded.entries).await {
                Ok(()) => info!(
                    entries = decoded.entries.len(),
                    from = ?decoded.format,
                    "migrated bookmark index"
                ),
                Err(e) => warn!(error = %e, "failed to rewrite migrated bookmark index"),
            }
        }

        Ok(decoded.entries)
    }

    async fn save_index(&self, entries: &[BookmarkEntry]) -> Result<()> {
        let encoded = encode_index(entries)?;
        self.index_store.set(BOOKMARK_INDEX_KEY, &encoded).await
    }
}
