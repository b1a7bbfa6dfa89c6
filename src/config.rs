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


//! Configuration for the API client and the offline library
//!
//! Every section has a `Default`, and every field may be omitted from a JSON
//! configuration file, so a config file only needs to name what differs:
//!
//! ```json
//! { "client": { "base_url": "https://books.example.org/v1/" },
//!   "library": { "sign_out_policy": "purge_content" } }
//! ```

use crate::error::{Result, ShelfError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default API base URL (local development server)
const DEFAULT_BASE_URL: &str = "http://localhost:8083/v1/";

/// Header carrying the refresh token alongside every authenticated call
pub const DEFAULT_REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// Endpoint paths relative to the API base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiPaths {
    pub sign_in: String,
    pub sign_up: String,
    pub refresh: String,
    pub sign_out: String,
    /// Collection path; a single book lives at `{books}/{id}`
    pub books: String,
}

impl Default for ApiPaths {
    fn default() -> Self {
        Self {
            sign_in: "auth/sign-in".to_string(),
            sign_up: "auth/sign-up".to_string(),
            refresh: "auth/refresh".to_string(),
            sign_out: "auth/sign-out".to_string(),
            books: "books".to_string(),
        }
    }
}

/// Configuration for SessionManager
/// Provides a builder pattern for client customization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub user_agent: String,
    pub enable_cookies: bool,
    /// Header name for the refresh-token side channel; `None` disables it
    pub refresh_token_header: Option<String>,
    pub paths: ApiPaths,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("Libro/{} (libro-core)", env!("CARGO_PKG_VERSION")),
            enable_cookies: true,
            refresh_token_header: Some(DEFAULT_REFRESH_TOKEN_HEADER.to_string()),
            paths: ApiPaths::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn enable_cookies(mut self, enable: bool) -> Self {
        self.config.enable_cookies = enable;
        self
    }

    pub fn refresh_token_header(mut self, header: Option<String>) -> Self {
        self.config.refresh_token_header = header;
        self
    }

    pub fn paths(mut self, paths: ApiPaths) -> Self {
        self.config.paths = paths;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// What happens to the offline library when the user signs out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutPolicy {
    /// Keep bookmarks and downloaded content
    #[default]
    KeepLibrary,
    /// Delete downloaded content, keep the bookmark index
    PurgeContent,
    /// Delete both the bookmark index and downloaded content
    PurgeLibrary,
}

/// Offline library configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding one content file per bookmarked book
    pub content_directory: PathBuf,
    pub sign_out_policy: SignOutPolicy,
    /// Sweep orphaned content files when the library is opened
    pub prune_on_open: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            content_directory: default_data_dir().join("books"),
            sign_out_policy: SignOutPolicy::default(),
            prune_on_open: true,
        }
    }
}

/// Top-level configuration for [`crate::app::Libro`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibroConfig {
    pub client: ClientConfig,
    pub library: LibraryConfig,
    /// SQLite file backing the secure store and the bookmark index
    pub database_path: PathBuf,
}

impl Default for LibroConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            library: LibraryConfig::default(),
            database_path: default_data_dir().join("libro.db"),
        }
    }
}

impl LibroConfig {
    /// Configuration rooted in one data directory
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            client: ClientConfig::default(),
            library: LibraryConfig {
                content_directory: data_dir.join("books"),
                ..LibraryConfig::default()
            },
            database_path: data_dir.join("libro.db"),
        }
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ShelfError::InvalidConfiguration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ShelfError::InvalidConfiguration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at all
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.client.base_url).map_err(|e| {
            ShelfError::InvalidConfiguration(format!(
                "Invalid base_url '{}': {}",
                self.client.base_url, e
            ))
        })?;
        if self.library.content_directory.as_os_str().is_empty() {
            return Err(ShelfError::InvalidConfiguration(
                "library.content_directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get default data directory for the platform
///
/// Note: For Android/iOS, the host app passes its own directory instead
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("Libro")
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local").join("share").join("Libro")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("Libro")
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("./libro")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
