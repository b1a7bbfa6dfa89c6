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


//! Application wiring
//!
//! [`Libro`] owns one of each component and is what UI layers hold on to:
//! the database, the [`SessionManager`], the [`CatalogClient`] and the
//! [`OfflineLibrary`]. Components receive their collaborators explicitly;
//! nothing here is global.

use crate::api::{CatalogClient, SessionManager};
use crate::config::LibroConfig;
use crate::error::Result;
use crate::file::ContentStore;
use crate::library::{OfflineLibrary, SaveOutcome};
use crate::models::BookId;
use crate::storage::{Database, SqliteStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Handle to an opened Libro data directory
#[derive(Debug)]
pub struct Libro {
    config: LibroConfig,
    database: Database,
    session: SessionManager,
    catalog: CatalogClient,
    library: Arc<OfflineLibrary>,
}

impl Libro {
    /// Open (creating if needed) the database and content directory, then
    /// restore the previous session
    pub async fn open(config: LibroConfig) -> Result<Self> {
        config.validate()?;
        let database = Database::new(&config.database_path).await?;
        Self::with_database(config, database).await
    }

    /// Same as [`Libro::open`] with an already opened database
    pub async fn with_database(config: LibroConfig, database: Database) -> Result<Self> {
        let pool = database.pool().clone();
        let session = SessionManager::new(
            config.client.clone(),
            Arc::new(SqliteStore::secure(pool.clone())),
        )?;
        let catalog = CatalogClient::new(session.clone());

        let content = ContentStore::new(&config.library.content_directory);
        content.ensure_directories().await?;
        let library = Arc::new(OfflineLibrary::new(
            Arc::new(SqliteStore::preferences(pool)),
            content,
            Arc::new(catalog.clone()),
        ));

        if let Err(e) = session.restore().await {
            warn!(error = %e, "starting signed out");
        }

        if config.library.prune_on_open {
            if let Err(e) = library.prune_orphaned_content().await {
                warn!(error = %e, "content prune failed");
            }
        }

        info!(
            authenticated = session.is_authenticated(),
            content_dir = %config.library.content_directory.display(),
            "libro opened"
        );

        Ok(Self {
            config,
            database,
            session,
            catalog,
            library,
        })
    }

    pub fn config(&self) -> &LibroConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    pub fn library(&self) -> &Arc<OfflineLibrary> {
        &self.library
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Save a book by id: look it up, then add it to the library
    ///
    /// A book already in the library is reported as saved without any
    /// network traffic.
    pub async fn save_book(&self, id: &BookId) -> Result<SaveOutcome> {
        if self.library.is_bookmarked(id).await {
            return Ok(SaveOutcome::AlreadySaved);
        }
        let book = self.catalog.fetch_book(id).await?;
        self.library.add_bookmark(&book).await
    }

    /// Sign out and apply the configured sign-out policy to the library
    pub async fn sign_out(&self) -> Result<()> {
        let signed_out = self.session.sign_out().await;
        let purged = self
            .library
            .apply_sign_out_policy(self.config.library.sign_out_policy)
            .await;
        signed_out.and(purged)
    }

    /// Release the database
    pub async fn close(self) {
        self.database.close().await;
    }
}
