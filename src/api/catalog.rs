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


//! Catalog API: book lookup, search, download counter and content fetch
//!
//! # Response normalization
//! The catalog service has shipped several response shapes. All of them are
//! folded into [`Book`] here:
//!
//! | Field   | Accepted forms                                             |
//! |---------|------------------------------------------------------------|
//! | envelope| bare object, or `{"data": …}`                              |
//! | id      | number or string                                           |
//! | authors | `[{"name": …}]`, `["…"]`, or a single string               |
//! | cover   | `cover.url`, `coverUrl`, `imageUrl`                        |
//! | content | `content.url`, `contentUrl`                                |
//!
//! # Endpoints
//! - `GET /books/{id}`
//! - `GET /books?page=&limit=&title=&authors=`
//! - `PATCH /books/{id}/downloads`
//! - plain `GET` of a book's content URL (no credentials attached)

use crate::api::client::SessionManager;
use crate::download::download_to_file;
use crate::error::{Result, ShelfError};
use crate::file::ContentStore;
use crate::models::{Book, BookId};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Page size used by the book list screen
pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Search and paging parameters for [`CatalogClient::list_books`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
    /// Matched against both title and authors
    pub filter: Option<String>,
}

impl Default for CatalogQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            filter: None,
        }
    }
}

impl CatalogQuery {
    pub fn page(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub fn with_filter<S: Into<String>>(mut self, filter: S) -> Self {
        let filter = filter.into();
        self.filter = if filter.trim().is_empty() {
            None
        } else {
            Some(filter)
        };
        self
    }

    fn to_path(&self, books_path: &str) -> String {
        let mut path = format!(
            "{}?page={}&limit={}",
            books_path,
            self.page.max(1),
            self.limit.max(1)
        );
        if let Some(filter) = &self.filter {
            let encoded = urlencoding::encode(filter.trim());
            path.push_str(&format!("&title={}&authors={}", encoded, encoded));
        }
        path
    }
}

/// One page of catalog results
#[derive(Debug, Clone, PartialEq)]
pub struct BookPage {
    pub books: Vec<Book>,
    pub page: u32,
    pub total_pages: u32,
}

impl BookPage {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// Remote operations the offline library depends on
#[async_trait]
pub trait LibraryRemote: Send + Sync {
    /// Increment the server-side download counter for `id`
    async fn report_download(&self, id: &BookId) -> Result<()>;

    /// Fetch `url` into the content store as the blob of `id`
    ///
    /// Returns the number of bytes stored.
    async fn download_content(&self, url: &str, content: &ContentStore, id: &BookId)
        -> Result<u64>;
}

/// Client for the catalog endpoints, layered over the session manager
#[derive(Debug, Clone)]
pub struct CatalogClient {
    session: SessionManager,
}

impl CatalogClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    fn book_path(&self, id: &BookId) -> String {
        format!(
            "{}/{}",
            self.session.config().paths.books.trim_end_matches('/'),
            urlencoding::encode(id.as_str())
        )
    }

    /// Fetch one book's details
    pub async fn fetch_book(&self, id: &BookId) -> Result<Book> {
        if id.is_empty() {
            return Err(ShelfError::invalid_input("Book id must not be empty"));
        }
        let value: Value = self.session.get_json(&self.book_path(id)).await?;
        normalize_book(unwrap_data(&value))
    }

    /// Fetch a page of books, optionally filtered by title/author
    pub async fn list_books(&self, query: &CatalogQuery) -> Result<BookPage> {
        let path = query.to_path(self.session.config().paths.books.trim_end_matches('/'));
        let value: Value = self.session.get_json(&path).await?;
        normalize_page(unwrap_data(&value), query.page)
    }
}

#[async_trait]
impl LibraryRemote for CatalogClient {
    async fn report_download(&self, id: &BookId) -> Result<()> {
        let path = format!("{}/downloads", self.book_path(id));
        self.session.patch(&path).await?;
        debug!(book_id = %id, "download counter reported");
        Ok(())
    }

    async fn download_content(
        &self,
        url: &str,
        content: &ContentStore,
        id: &BookId,
    ) -> Result<u64> {
        content.ensure_directories().await?;
        let staging = content.staging_path_for(id);
        let destination = content.path_for(id);
        download_to_file(self.session.http(), url, &staging, &destination).await
    }
}

// ============================================================================
// Normalization
// ============================================================================

fn unwrap_data(value: &Value) -> &Value {
    match value.get("data") {
        Some(inner) if inner.is_object() || inner.is_array() => inner,
        _ => value,
    }
}

fn invalid(message: String, value: &Value) -> ShelfError {
    let mut body = value.to_string();
    body.truncate(body.char_indices().nth(400).map_or(body.len(), |(i, _)| i));
    ShelfError::InvalidApiResponse {
        message,
        response_body: Some(body),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// `obj.url`, where `obj` may also be a bare URL string
fn nested_url(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Object(_) => string_field(&value[key], "url"),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn normalize_authors(value: Option<&Value>) -> Vec<String> {
    let name_of = |item: &Value| match item {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(_) => string_field(item, "name"),
        _ => None,
    };

    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(name_of)
            .filter(|name| !name.is_empty())
            .collect(),
        Some(single @ (Value::String(_) | Value::Object(_))) => {
            name_of(single).into_iter().filter(|n| !n.is_empty()).collect()
        }
        _ => Vec::new(),
    }
}

/// Fold one wire book object into a [`Book`]
pub fn normalize_book(value: &Value) -> Result<Book> {
    if !value.is_object() {
        return Err(invalid("Book record is not an object".to_string(), value));
    }

    let id: BookId = match value.get("id") {
        Some(raw @ (Value::String(_) | Value::Number(_))) => serde_json::from_value(raw.clone())
            .map_err(|e| invalid(format!("Invalid book id: {}", e), value))?,
        _ => return Err(invalid("Book record has no id".to_string(), value)),
    };
    if id.is_empty() {
        return Err(invalid("Book record has an empty id".to_string(), value));
    }

    let downloads = match value.get("downloads") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    Ok(Book {
        id,
        title: string_field(value, "title").unwrap_or_default(),
        authors: normalize_authors(value.get("authors")),
        cover_url: nested_url(value, "cover")
            .or_else(|| string_field(value, "coverUrl"))
            .or_else(|| string_field(value, "imageUrl")),
        content_url: nested_url(value, "content").or_else(|| string_field(value, "contentUrl")),
        description: string_field(value, "description"),
        downloads,
    })
}

fn page_number(value: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Fold a list response (`{books, page, totalPages}` or a bare array)
pub fn normalize_page(value: &Value, requested_page: u32) -> Result<BookPage> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => match value.get("books").or_else(|| value.get("items")) {
            Some(Value::Array(items)) => items,
            _ => return Err(invalid("Book list has no books array".to_string(), value)),
        },
        _ => return Err(invalid("Book list is not an object".to_string(), value)),
    };

    let books = items.iter().map(normalize_book).collect::<Result<Vec<_>>>()?;
    let page = page_number(value, &["page"]).unwrap_or(requested_page.max(1));
    let total_pages = page_number(value, &["totalPages", "total_pages"]).unwrap_or(page);

    Ok(BookPage {
        books,
        page,
        total_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::CredentialPair;
    use crate::config::ClientConfig;
    use crate::storage::{Database, SqliteStore};
    use mockito::Server;
    use serde_json::json;
    use std::sync::Arc;

    async fn catalog_for(server_url: &str) -> CatalogClient {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(SqliteStore::secure(db.pool().clone()));
        CredentialPair::new("token", Some("refresh".to_string()))
            .save(store.as_ref())
            .await
            .unwrap();
        let config = ClientConfig::builder()
            .base_url(format!("{}/v1/", server_url))
            .enable_cookies(false)
            .build();
        let session = SessionManager::new(config, store).unwrap();
        session.restore().await.unwrap();
        CatalogClient::new(session)
    }

    #[test]
    fn test_normalize_nested_shape() {
        let book = normalize_book(&json!({
            "id": 84,
            "title": "Frankenstein",
            "authors": [{"name": "Mary Shelley"}],
            "cover": {"url": "https://covers.example/84.jpg"},
            "content": {"url": "https://texts.example/84.txt"},
            "description": "A modern Prometheus",
            "downloads": 12
        }))
        .unwrap();

        assert_eq!(book.id, BookId::from("84"));
        assert_eq!(book.authors, vec!["Mary Shelley"]);
        assert_eq!(book.cover_url.as_deref(), Some("https://covers.example/84.jpg"));
        assert_eq!(book.content_url.as_deref(), Some("https://texts.example/84.txt"));
        assert_eq!(book.downloads, Some(12));
    }

    #[test]
    fn test_normalize_flat_shape() {
        let book = normalize_book(&json!({
            "id": "1342",
            "title": "Pride and Prejudice",
            "authors": ["Jane Austen"],
            "imageUrl": "https://covers.example/1342.jpg",
            "contentUrl": "https://texts.example/1342.txt"
        }))
        .unwrap();

        assert_eq!(book.id.as_str(), "1342");
        assert_eq!(book.authors_display(), "Jane Austen");
        assert_eq!(book.cover_url.as_deref(), Some("https://covers.example/1342.jpg"));
        assert_eq!(book.content_url.as_deref(), Some("https://texts.example/1342.txt"));
        assert_eq!(book.description, None);
    }

    #[test]
    fn test_normalize_rejects_missing_id() {
        let err = normalize_book(&json!({"title": "Untitled"})).unwrap_err();
        assert!(matches!(err, ShelfError::InvalidApiResponse { .. }));
    }

    #[test]
    fn test_normalize_page_with_envelope() {
        let value = json!({"data": {
            "books": [{"id": 1, "title": "A"}, {"id": 2, "title": "B"}],
            "page": 2,
            "totalPages": 7
        }});
        let page = normalize_page(unwrap_data(&value), 2).unwrap();
        assert_eq!(page.books.len(), 2);
        assert_eq!(page.page, 2);
        assert_eq!(page.total_pages, 7);
        assert!(page.has_next());
    }

    #[test]
    fn test_query_path_encodes_filter() {
        let query = CatalogQuery::page(3).with_filter("Jules Verne");
        assert_eq!(
            query.to_path("books"),
            "books?page=3&limit=5&title=Jules%20Verne&authors=Jules%20Verne"
        );
        assert_eq!(CatalogQuery::default().with_filter("  ").filter, None);
    }

    #[tokio::test]
    async fn test_fetch_book() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/books/84")
            .match_header("authorization", "Bearer token")
            .with_status(200)
            .with_body(r#"{"data": {"id": 84, "title": "Frankenstein", "authors": [{"name": "Mary Shelley"}]}}"#)
            .create_async()
            .await;

        let catalog = catalog_for(&server.url()).await;
        let book = catalog.fetch_book(&BookId::from("84")).await.unwrap();
        assert_eq!(book.title, "Frankenstein");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_books_sends_filter_for_title_and_authors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/books")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("page".into(), "1".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "5".into()),
                mockito::Matcher::UrlEncoded("title".into(), "verne".into()),
                mockito::Matcher::UrlEncoded("authors".into(), "verne".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"books": [{"id": 103, "title": "Around the World in Eighty Days"}], "page": 1, "totalPages": 1}"#)
            .create_async()
            .await;

        let catalog = catalog_for(&server.url()).await;
        let page = catalog
            .list_books(&CatalogQuery::default().with_filter("verne"))
            .await
            .unwrap();
        assert_eq!(page.books[0].id.as_str(), "103");
        assert!(!page.has_next());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_report_download_patches_counter() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", "/v1/books/84/downloads")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let catalog = catalog_for(&server.url()).await;
        catalog.report_download(&BookId::from("84")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_content_is_unauthenticated() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files/84.txt")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("You will rejoice to hear")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let content = ContentStore::new(dir.path());
        let catalog = catalog_for(&server.url()).await;
        let id = BookId::from("84");

        let bytes = catalog
            .download_content(&format!("{}/files/84.txt", server.url()), &content, &id)
            .await
            .unwrap();

        assert_eq!(bytes, 24);
        assert_eq!(
            content.read(&id).await.unwrap().as_deref(),
            Some("You will rejoice to hear")
        );
        mock.assert_async().await;
    }
}
