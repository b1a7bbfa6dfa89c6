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


//! Credentials and session state
//!
//! # Credential storage
//! The active [`CredentialPair`] lives in the secure store under two
//! well-known keys and is always written in one atomic batch, so a reader
//! never observes a new access token paired with an old refresh token.
//!
//! # Wire formats
//! Sign-in and refresh answer with `{accessToken, refreshToken}`, either flat
//! or wrapped in a `{"data": …}` envelope depending on the server version.
//! Error bodies carry a `message` that is either a string or a list of
//! strings (validation errors).

use crate::error::{Result, ShelfError};
use crate::storage::kv::{KeyValueStore, WriteOp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Secure-store key of the access token
pub const ACCESS_TOKEN_KEY: &str = "libro.access-token";

/// Secure-store key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "libro.refresh-token";

// ============================================================================
// Credentials
// ============================================================================

/// The one active set of tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived bearer token attached to every authenticated call
    pub access_token: String,

    /// Longer-lived token used to obtain a new access token
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new<S: Into<String>>(access_token: S, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// Load the pair from the secure store
    ///
    /// Returns `None` if no access token is stored.
    pub async fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        let Some(access_token) = store.get(ACCESS_TOKEN_KEY).await? else {
            return Ok(None);
        };
        if access_token.is_empty() {
            return Ok(None);
        }
        let refresh_token = store
            .get(REFRESH_TOKEN_KEY)
            .await?
            .filter(|t| !t.is_empty());
        Ok(Some(Self {
            access_token,
            refresh_token,
        }))
    }

    /// Replace whatever pair is stored with this one, atomically
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let refresh = match &self.refresh_token {
            Some(token) => WriteOp::put(REFRESH_TOKEN_KEY, token.as_str()),
            None => WriteOp::delete(REFRESH_TOKEN_KEY),
        };
        store
            .apply(vec![WriteOp::put(ACCESS_TOKEN_KEY, self.access_token.as_str()), refresh])
            .await
    }

    /// Delete both keys
    pub async fn clear(store: &dyn KeyValueStore) -> Result<()> {
        store
            .apply(vec![
                WriteOp::delete(ACCESS_TOKEN_KEY),
                WriteOp::delete(REFRESH_TOKEN_KEY),
            ])
            .await
    }

    /// Pair after a refresh: servers may omit the refresh token when they
    /// don't rotate it, in which case the current one stays valid.
    pub fn refreshed_with(&self, tokens: TokenPayload) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or_else(|| self.refresh_token.clone()),
        }
    }

    /// Loggable form with both tokens masked
    pub fn masked_log_entry(&self) -> String {
        format!(
            "access: {}, refresh: {}",
            mask_secret(&self.access_token),
            self.refresh_token
                .as_deref()
                .map(mask_secret)
                .unwrap_or_else(|| "(none)".to_string())
        )
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked_log_entry())
    }
}

/// Mask a secret for logging: first 2 and last 2 chars, asterisks in between
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
}

// ============================================================================
// Session State
// ============================================================================

/// Derived, in-memory view of the session, observable by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub authenticated: bool,

    /// True until the stored credentials have been probed at start-up
    pub loading: bool,

    /// When the access token was last renewed in this process
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// State before `restore` has run
    pub fn initial() -> Self {
        Self {
            authenticated: false,
            loading: true,
            last_refreshed_at: None,
        }
    }

    pub fn signed_in() -> Self {
        Self {
            authenticated: true,
            loading: false,
            last_refreshed_at: None,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            authenticated: false,
            loading: false,
            last_refreshed_at: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

/// Sign-in request body
#[derive(Debug, Serialize)]
pub struct SignInRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Sign-up request body
#[derive(Debug, Serialize)]
pub struct SignUpRequest<'a> {
    pub fullname: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Tokens returned by sign-in and refresh
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenEnvelope {
    Wrapped { data: TokenPayload },
    Flat(TokenPayload),
}

/// Parse a token response, accepting both the flat and the enveloped form
pub fn parse_token_response(body: &str) -> Result<TokenPayload> {
    let envelope: TokenEnvelope =
        serde_json::from_str(body).map_err(|e| ShelfError::InvalidApiResponse {
            message: format!("Failed to parse token response: {}", e),
            response_body: None,
        })?;

    let tokens = match envelope {
        TokenEnvelope::Wrapped { data } => data,
        TokenEnvelope::Flat(tokens) => tokens,
    };

    if tokens.access_token.is_empty() {
        return Err(ShelfError::InvalidApiResponse {
            message: "Token response contained an empty access token".to_string(),
            response_body: None,
        });
    }
    Ok(tokens)
}

/// Extract the human-readable message from an error body
///
/// Falls back to the raw body (trimmed) when it isn't JSON, and to `None`
/// when the body is empty.
pub fn extract_error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Some(body.to_string());
    };

    let candidate = value
        .get("message")
        .or_else(|| value.get("error"))
        .or_else(|| value.pointer("/data/message"));

    match candidate {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Some(parts.join("; "))
        }
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => Some(body.to_string()),
    }
}
