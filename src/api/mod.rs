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


//! Libro API client
//!
//! - `auth`: credential pair, session state and token payloads
//! - `client`: the [`SessionManager`], sole owner of the credentials and
//!   entry point for every authenticated call
//! - `catalog`: book lookup, search, download counter and content fetch

pub mod auth;
pub mod catalog;
pub mod client;

// Re-export commonly used types
pub use auth::{CredentialPair, SessionState};
pub use catalog::{BookPage, CatalogClient, CatalogQuery, LibraryRemote};
pub use client::{ApiResponse, SessionManager};
