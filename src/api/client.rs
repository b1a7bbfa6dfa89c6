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


//! Session manager: the single authenticated entry point to the Libro API
//!
//! This module provides an HTTP client wrapper with:
//! - Credential lifecycle (sign-in, sign-out, start-up restore)
//! - Bearer token and refresh-token side channel on every call
//! - Transparent token refresh on 401, at most once per call
//! - Coalescing of concurrent refreshes
//!
//! # Refresh protocol
//!
//! Every call snapshots the credential *generation* together with the tokens
//! it sends. The generation is bumped whenever the pair is replaced (sign-in,
//! refresh, sign-out, restore). When a call gets a 401:
//!
//! 1. If the call already used its one retry, the 401 is returned as
//!    `ShelfError::Auth`.
//! 2. If the generation moved since the call was sent, someone already
//!    replaced the pair; the call retries with the current pair.
//! 3. If a refresh is in flight, the call awaits that refresh.
//! 4. Otherwise the call starts the refresh and publishes it for others.
//!
//! A refresh that finishes after the pair was replaced (sign-in or sign-out
//! meanwhile) is discarded, and its waiters retry with the current pair.
//! A refresh that fails leaves the pair untouched; the session is not signed
//! out automatically, that decision belongs to the UI.

use crate::api::auth::{
    extract_error_message, parse_token_response, CredentialPair, SessionState, SignInRequest,
    SignUpRequest,
};
use crate::config::ClientConfig;
use crate::error::{Result, ShelfError};
use crate::storage::kv::KeyValueStore;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Retries allowed per call after a 401 (each preceded by a refresh)
const MAX_AUTH_RETRIES: u32 = 1;

/// Longest response excerpt kept in parse errors
const RESPONSE_EXCERPT_CHARS: usize = 400;

type RefreshOutcome = std::result::Result<(), RefreshFailure>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Why a refresh did not produce new credentials (cloneable, so every
/// caller joined on the same refresh can receive it)
#[derive(Debug, Clone)]
struct RefreshFailure {
    message: String,
}

impl RefreshFailure {
    fn new<S: ToString>(message: S) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Current pair plus the generation it belongs to
#[derive(Debug, Default)]
struct CredentialSlot {
    pair: Option<CredentialPair>,
    generation: u64,
}

/// Per-call bookkeeping for the 401 retry rule
#[derive(Debug, Default)]
struct CallState {
    auth_retries: u32,
}

/// A successful (2xx) API response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    endpoint: String,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Raw response body
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str::<T>(&self.body).map_err(|e| {
            let excerpt: String = self.body.chars().take(RESPONSE_EXCERPT_CHARS).collect();
            ShelfError::InvalidApiResponse {
                message: format!(
                    "Parse error for {}: {} at line {} col {}",
                    self.endpoint,
                    e,
                    e.line(),
                    e.column()
                ),
                response_body: Some(excerpt),
            }
        })
    }
}

struct SessionInner {
    /// Underlying HTTP client
    http: Client,
    /// API base URL, always ending in '/'
    base_url: Url,
    config: ClientConfig,
    secure_store: Arc<dyn KeyValueStore>,
    credentials: RwLock<CredentialSlot>,
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
    state: watch::Sender<SessionState>,
}

/// Owns the credential pair and performs every authenticated call
///
/// Cloning is cheap and yields a handle to the same session; create one per
/// process and pass it to whoever needs API access.
///
/// # Example
/// ```rust,no_run
/// use libro_core::api::SessionManager;
/// use libro_core::config::ClientConfig;
/// use libro_core::storage::{Database, SqliteStore};
/// use std::sync::Arc;
///
/// # async fn example() -> libro_core::error::Result<()> {
/// let db = Database::new("./libro.db").await?;
/// let session = SessionManager::new(
///     ClientConfig::default(),
///     Arc::new(SqliteStore::secure(db.pool().clone())),
/// )?;
/// session.restore().await?;
/// session.sign_in("reader@example.com", "hunter2").await?;
/// let book: serde_json::Value = session.get_json("books/84").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.inner.base_url.as_str())
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl SessionManager {
    /// Create a session manager; call [`SessionManager::restore`] next
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be built
    pub fn new(config: ClientConfig, secure_store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            ShelfError::InvalidConfiguration(format!("Invalid base_url '{}': {}", base, e))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ShelfError::InvalidConfiguration(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut client_builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90));

        if config.enable_cookies {
            client_builder = client_builder.cookie_store(true);
        }

        let http = client_builder.build().map_err(|e| {
            ShelfError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e))
        })?;

        let (state, _) = watch::channel(SessionState::initial());

        Ok(Self {
            inner: Arc::new(SessionInner {
                http,
                base_url,
                config,
                secure_store,
                credentials: RwLock::new(CredentialSlot::default()),
                refresh_in_flight: Mutex::new(None),
                state,
            }),
        })
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Underlying HTTP client (shares timeouts and cookies with API calls)
    pub fn http(&self) -> &Client {
        &self.inner.http
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Observe session state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    /// Copy of the active credential pair
    pub async fn credentials(&self) -> Option<CredentialPair> {
        self.inner.credentials.read().await.pair.clone()
    }

    /// Resolve an endpoint path against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.inner.endpoint(path)
    }

    /// Rebuild the session from the secure store (process start-up)
    pub async fn restore(&self) -> Result<SessionState> {
        let inner = &self.inner;
        let mut slot = inner.credentials.write().await;

        match CredentialPair::load(inner.secure_store.as_ref()).await {
            Ok(pair) => {
                let state = if pair.is_some() {
                    SessionState::signed_in()
                } else {
                    SessionState::signed_out()
                };
                debug!(authenticated = state.authenticated, "restored session");
                slot.pair = pair;
                slot.generation += 1;
                inner.state.send_replace(state);
                Ok(state)
            }
            Err(e) => {
                warn!(error = %e, "could not read stored credentials");
                inner.state.send_replace(SessionState::signed_out());
                Err(e)
            }
        }
    }

    /// Sign in and store the returned credential pair
    ///
    /// On failure the error carries the server's message (see
    /// [`ShelfError::message`]) and the stored pair is left as it was.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionState> {
        let inner = &self.inner;
        let path = inner.config.paths.sign_in.clone();
        let body = serde_json::to_value(SignInRequest { email, password })?;

        let response = inner
            .send(Method::POST, inner.endpoint(&path)?, Some(&body), None)
            .await;
        let response = match response {
            Ok(response) => read_response(response, &path).await,
            Err(e) => Err(e),
        };
        let response = response.map_err(|e| {
            warn!(error = %e, "sign-in failed");
            e
        })?;

        let tokens = parse_token_response(response.text())?;
        let pair = CredentialPair::new(tokens.access_token, tokens.refresh_token);

        {
            let mut slot = inner.credentials.write().await;
            pair.save(inner.secure_store.as_ref()).await?;
            debug!(credentials = %pair.masked_log_entry(), "stored credentials");
            slot.pair = Some(pair);
            slot.generation += 1;
        }

        let state = SessionState::signed_in();
        inner.state.send_replace(state);
        info!("signed in");
        Ok(state)
    }

    /// Register a new account; does not sign in
    pub async fn sign_up(&self, fullname: &str, email: &str, password: &str) -> Result<()> {
        let inner = &self.inner;
        let path = inner.config.paths.sign_up.clone();
        let body = serde_json::to_value(SignUpRequest {
            fullname,
            email,
            password,
        })?;

        let response = inner
            .send(Method::POST, inner.endpoint(&path)?, Some(&body), None)
            .await?;
        read_response(response, &path).await.map_err(|e| {
            warn!(error = %e, "sign-up failed");
            e
        })?;
        info!("account registered");
        Ok(())
    }

    /// Sign out: notify the server (best-effort), then drop the credentials
    ///
    /// Idempotent. The only error reported is a failure to delete the stored
    /// credentials; in-memory state is cleared regardless.
    pub async fn sign_out(&self) -> Result<()> {
        let inner = &self.inner;
        let pair = inner.credentials.read().await.pair.clone();

        if let Some(pair) = pair.as_ref() {
            let notified = match inner.endpoint(&inner.config.paths.sign_out) {
                Ok(url) => inner.send(Method::POST, url, None, Some(pair)).await,
                Err(e) => Err(e),
            };
            match notified {
                Ok(response) if response.status().is_success() => debug!("server session closed"),
                Ok(response) => warn!(status = %response.status(), "sign-out call rejected"),
                Err(e) => warn!(error = %e, "sign-out call failed"),
            }
        }

        let cleared = {
            let mut slot = inner.credentials.write().await;
            slot.pair = None;
            slot.generation += 1;
            CredentialPair::clear(inner.secure_store.as_ref()).await
        };

        inner.state.send_replace(SessionState::signed_out());
        info!("signed out");

        cleared.map_err(|e| {
            warn!(error = %e, "failed to delete stored credentials");
            e
        })
    }

    /// Perform an authenticated request
    ///
    /// Returns the response for any 2xx status. A 401 triggers one
    /// refresh-and-retry cycle (see module docs); other statuses become
    /// `ShelfError::Application`, connection failures `ShelfError::Transport`.
    pub async fn authenticated_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let inner = &self.inner;
        let url = inner.endpoint(path)?;
        let mut call = CallState::default();

        loop {
            let (generation, pair) = inner.snapshot().await;
            let response = inner
                .send(method.clone(), url.clone(), body, pair.as_ref())
                .await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return read_response(response, path).await;
            }

            let message = response
                .text()
                .await
                .ok()
                .and_then(|body| extract_error_message(&body))
                .unwrap_or_else(|| "Unauthorized".to_string());

            if call.auth_retries >= MAX_AUTH_RETRIES {
                warn!(endpoint = path, "still unauthorized after refresh");
                return Err(ShelfError::auth(message, None));
            }
            call.auth_retries += 1;

            if let Err(failure) = inner.refresh_after(generation).await {
                warn!(endpoint = path, reason = %failure.message, "token refresh failed");
                return Err(ShelfError::auth(message, Some(failure.message)));
            }
            debug!(endpoint = path, "retrying with refreshed credentials");
        }
    }

    /// Authenticated GET, deserializing the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.authenticated_request(Method::GET, path, None)
            .await?
            .json()
    }

    /// Authenticated POST with a JSON body, deserializing the JSON answer
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let body = serde_json::to_value(body)?;
        self.authenticated_request(Method::POST, path, Some(&body))
            .await?
            .json()
    }

    /// Authenticated PATCH without a body
    pub async fn patch(&self, path: &str) -> Result<ApiResponse> {
        self.authenticated_request(Method::PATCH, path, None).await
    }
}

impl SessionInner {
    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn snapshot(&self) -> (u64, Option<CredentialPair>) {
        let slot = self.credentials.read().await;
        (slot.generation, slot.pair.clone())
    }

    /// Build authentication headers from the credential pair
    fn auth_headers(&self, pair: Option<&CredentialPair>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let Some(pair) = pair else {
            return Ok(headers);
        };

        let auth_value = format!("Bearer {}", pair.access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| ShelfError::invalid_input(format!("Invalid access token: {}", e)))?,
        );

        if let (Some(header), Some(refresh)) = (
            self.config.refresh_token_header.as_deref(),
            pair.refresh_token.as_deref(),
        ) {
            let name = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                ShelfError::InvalidConfiguration(format!("Invalid refresh header name: {}", e))
            })?;
            let value = HeaderValue::from_str(refresh)
                .map_err(|e| ShelfError::invalid_input(format!("Invalid refresh token: {}", e)))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        pair: Option<&CredentialPair>,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method, url)
            .headers(self.auth_headers(pair)?);
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            ShelfError::transport(
                format!("Request failed: {}", e),
                e.is_timeout() || e.is_connect(),
            )
        })
    }

    /// Make sure the pair is newer than `seen_generation`, refreshing if needed
    ///
    /// Concurrent callers share one refresh; see module docs.
    async fn refresh_after(self: &Arc<Self>, seen_generation: u64) -> RefreshOutcome {
        let refresh = {
            let mut in_flight = self.refresh_in_flight.lock().await;

            if self.credentials.read().await.generation != seen_generation {
                return Ok(());
            }

            match in_flight.as_ref() {
                Some(refresh) => {
                    debug!("joining token refresh in progress");
                    refresh.clone()
                }
                None => {
                    let inner = Arc::clone(self);
                    let refresh = async move { inner.run_refresh().await }.boxed().shared();
                    *in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    async fn run_refresh(self: Arc<Self>) -> RefreshOutcome {
        let outcome = self.refresh_credentials().await;
        // The generation was bumped (on success) before the slot is released,
        // so late 401s for old calls retry instead of refreshing again
        self.refresh_in_flight.lock().await.take();
        outcome
    }

    async fn refresh_credentials(&self) -> RefreshOutcome {
        let (generation, current) = self.snapshot().await;
        let current = current.ok_or_else(|| RefreshFailure::new("no credentials to refresh"))?;

        info!("refreshing access token");
        let url = self
            .endpoint(&self.config.paths.refresh)
            .map_err(RefreshFailure::new)?;
        let response = self
            .send(Method::POST, url, Some(&Value::Object(Default::default())), Some(&current))
            .await
            .map_err(RefreshFailure::new)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshFailure::new(format!("failed to read refresh response: {}", e)))?;
        if !status.is_success() {
            let detail = extract_error_message(&body).unwrap_or_default();
            return Err(RefreshFailure::new(format!(
                "refresh rejected ({}): {}",
                status, detail
            )));
        }

        let tokens = parse_token_response(&body).map_err(RefreshFailure::new)?;
        let next = current.refreshed_with(tokens);

        let mut slot = self.credentials.write().await;
        if slot.generation != generation {
            // Signed out or in again while the refresh was running; the
            // result is discarded and callers retry with the current pair
            debug!("session changed during refresh, discarding refreshed tokens");
            return Ok(());
        }
        next.save(self.secure_store.as_ref())
            .await
            .map_err(RefreshFailure::new)?;
        debug!(credentials = %next.masked_log_entry(), "stored refreshed credentials");
        slot.pair = Some(next);
        slot.generation += 1;
        drop(slot);

        self.state
            .send_modify(|state| state.last_refreshed_at = Some(Utc::now()));
        Ok(())
    }
}

/// Turn a non-401 response into an `ApiResponse` or an application error
async fn read_response(response: Response, endpoint: &str) -> Result<ApiResponse> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        ShelfError::transport(format!("Failed to read response body: {}", e), true)
    })?;

    if status.is_success() {
        return Ok(ApiResponse {
            status,
            endpoint: endpoint.to_string(),
            body,
        });
    }

    let message = extract_error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    });
    Err(ShelfError::application(
        message,
        status.as_u16(),
        Some(endpoint.to_string()),
    ))
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::error::ErrorKind;
    use crate::storage::{Database, SqliteStore};
    use mockito::{Matcher, Server};

    async fn session_for(server_url: &str) -> (SessionManager, Arc<SqliteStore>) {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(SqliteStore::secure(db.pool().clone()));
        let config = ClientConfig::builder()
            .base_url(format!("{}/v1", server_url))
            .enable_cookies(false)
            .build();
        let session = SessionManager::new(config, store.clone()).unwrap();
        (session, store)
    }

    async fn signed_in_session(server_url: &str, access: &str) -> (SessionManager, Arc<SqliteStore>) {
        let (session, store) = session_for(server_url).await;
        CredentialPair::new(access, Some("refresh-1".to_string()))
            .save(store.as_ref())
            .await
            .unwrap();
        session.restore().await.unwrap();
        (session, store)
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig::builder().base_url("::nope::").build();
        let store: Arc<dyn KeyValueStore> = Arc::new(NullStore);
        let err = SessionManager::new(config, store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_endpoint_resolution_keeps_base_path() {
        let (session, _) = session_for("http://books.example.org").await;
        assert_eq!(
            session.endpoint("/auth/refresh").unwrap().as_str(),
            "http://books.example.org/v1/auth/refresh"
        );
        assert_eq!(
            session.endpoint("books/84").unwrap().as_str(),
            "http://books.example.org/v1/books/84"
        );
    }

    #[tokio::test]
    async fn test_initial_state_is_loading() {
        let (session, _) = session_for("http://books.example.org").await;
        assert_eq!(session.state(), SessionState::initial());

        let state = session.restore().await.unwrap();
        assert!(!state.authenticated);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_sign_in_stores_pair_and_attaches_bearer() {
        let mut server = Server::new_async().await;
        let sign_in = server
            .mock("POST", "/v1/auth/sign-in")
            .match_body(Matcher::Json(serde_json::json!({
                "email": "a@a.a",
                "password": "123456@aM"
            })))
            .with_status(201)
            .with_body(r#"{"data": {"accessToken": "access-abc", "refreshToken": "refresh-xyz"}}"#)
            .create_async()
            .await;
        let book = server
            .mock("GET", "/v1/books/84")
            .match_header("authorization", "Bearer access-abc")
            .match_header("x-refresh-token", "refresh-xyz")
            .with_status(200)
            .with_body(r#"{"id": 84}"#)
            .create_async()
            .await;

        let (session, store) = session_for(&server.url()).await;
        let state = session.sign_in("a@a.a", "123456@aM").await.unwrap();
        assert!(state.authenticated);
        assert!(session.is_authenticated());
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("access-abc")
        );

        let value: Value = session.get_json("/books/84").await.unwrap();
        assert_eq!(value["id"], 84);

        sign_in.assert_async().await;
        book.assert_async().await;
    }

    #[tokio::test]
    async fn test_sign_in_failure_carries_server_message() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/auth/sign-in")
            .with_status(401)
            .with_body(r#"{"message": "Credenciales incorrectas", "statusCode": 401}"#)
            .create_async()
            .await;

        let (session, store) = session_for(&server.url()).await;
        session.restore().await.unwrap();
        let err = session.sign_in("a@a.a", "wrong").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Application);
        assert_eq!(err.message(), "Credenciales incorrectas");
        assert!(!session.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_in_transport_failure() {
        let (session, _) = session_for("http://127.0.0.1:9").await;
        let err = session.sign_in("a@a.a", "123456@aM").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let mut server = Server::new_async().await;
        let stale = server
            .mock("GET", "/v1/books")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(r#"{"message": "jwt expired"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1/auth/refresh")
            .match_header("authorization", "Bearer stale")
            .match_header("x-refresh-token", "refresh-1")
            .with_status(200)
            .with_body(r#"{"accessToken": "fresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/v1/books")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"books": []}"#)
            .expect(1)
            .create_async()
            .await;

        let (session, store) = signed_in_session(&server.url(), "stale").await;
        let response = session
            .authenticated_request(Method::GET, "books", None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        stale.assert_async().await;
        refresh.assert_async().await;
        fresh.assert_async().await;

        // Refresh token was not rotated by the server and must survive
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("fresh")
        );
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("refresh-1")
        );
        assert!(session.state().last_refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_second_401_is_not_retried_again() {
        let mut server = Server::new_async().await;
        let books = server
            .mock("GET", "/v1/books")
            .with_status(401)
            .with_body(r#"{"message": "Unauthorized"}"#)
            .expect(2)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1/auth/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken": "fresh", "refreshToken": "refresh-2"}"#)
            .expect(1)
            .create_async()
            .await;

        let (session, _) = signed_in_session(&server.url(), "stale").await;
        let err = session
            .authenticated_request(Method::GET, "books", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        books.assert_async().await;
        refresh.assert_async().await;
        // No forced sign-out
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_pair_replaced_during_refresh_is_used_for_retry() {
        let mut server = Server::new_async().await;
        let _stale = server
            .mock("GET", "/v1/books")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .create_async()
            .await;
        let newer = server
            .mock("GET", "/v1/books")
            .match_header("authorization", "Bearer newer")
            .with_status(200)
            .with_body(r#"{"books": []}"#)
            .expect(1)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", "/v1/auth/refresh")
            .with_status(200)
            .with_body_from_request(|_| {
                std::thread::sleep(Duration::from_millis(300));
                br#"{"accessToken": "discarded"}"#.to_vec()
            })
            .create_async()
            .await;

        let (session, store) = signed_in_session(&server.url(), "stale").await;

        // Another sign-in lands while the refresh response is pending
        let replace = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut slot = session.inner.credentials.write().await;
            slot.pair = Some(CredentialPair::new("newer", Some("refresh-9".to_string())));
            slot.generation += 1;
        };
        let (response, ()) = tokio::join!(
            session.authenticated_request(Method::GET, "books", None),
            replace
        );

        assert_eq!(response.unwrap().status(), StatusCode::OK);
        newer.assert_async().await;
        assert_eq!(session.credentials().await.unwrap().access_token, "newer");
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("stale")
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_auth_and_keeps_pair() {
        let mut server = Server::new_async().await;
        let _books = server
            .mock("GET", "/v1/books/1")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1/auth/refresh")
            .with_status(403)
            .with_body(r#"{"message": "refresh token revoked"}"#)
            .expect(1)
            .create_async()
            .await;

        let (session, store) = signed_in_session(&server.url(), "stale").await;
        let err = session
            .authenticated_request(Method::GET, "books/1", None)
            .await
            .unwrap_err();

        refresh.assert_async().await;
        match err {
            ShelfError::Auth { refresh_failure, .. } => {
                assert!(refresh_failure.unwrap().contains("refresh token revoked"));
            }
            other => panic!("expected auth error, got {other:?}"),
        }
        assert_eq!(
            session.credentials().await,
            Some(CredentialPair::new("stale", Some("refresh-1".to_string())))
        );
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("stale")
        );
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_application_error_is_not_refreshed() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/v1/auth/refresh")
            .expect(0)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/v1/books/999")
            .with_status(404)
            .with_body(r#"{"message": "Libro no encontrado"}"#)
            .create_async()
            .await;

        let (session, _) = signed_in_session(&server.url(), "valid").await;
        let err = session
            .authenticated_request(Method::GET, "books/999", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ShelfError::Application { status_code: 404, ref message, .. } if message == "Libro no encontrado"
        ));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_sign_out_is_best_effort_and_idempotent() {
        let mut server = Server::new_async().await;
        let sign_out = server
            .mock("POST", "/v1/auth/sign-out")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let (session, store) = signed_in_session(&server.url(), "valid").await;
        session.sign_out().await.unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.credentials().await, None);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap(), None);

        // Second call has nothing to tell the server
        session.sign_out().await.unwrap();
        sign_out.assert_async().await;
    }

    #[tokio::test]
    async fn test_sign_out_without_server() {
        let (session, _) = signed_in_session("http://127.0.0.1:9", "valid").await;
        session.sign_out().await.unwrap();
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_up_reports_validation_message() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/auth/sign-up")
            .with_status(400)
            .with_body(r#"{"message": ["email must be an email"]}"#)
            .create_async()
            .await;

        let (session, _) = session_for(&server.url()).await;
        let err = session.sign_up("Ada", "not-an-email", "x").await.unwrap_err();
        assert_eq!(err.message(), "email must be an email");
    }

    #[tokio::test]
    async fn test_state_changes_are_observable() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/auth/sign-in")
            .with_status(200)
            .with_body(r#"{"accessToken": "a", "refreshToken": "r"}"#)
            .create_async()
            .await;

        let (session, _) = session_for(&server.url()).await;
        let mut rx = session.subscribe();
        session.sign_in("a@a.a", "123456@aM").await.unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow().authenticated);
    }

    /// Store that never holds anything
    struct NullStore;

    #[async_trait::async_trait]
    impl KeyValueStore for NullStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn apply(&self, _ops: Vec<crate::storage::WriteOp>) -> Result<()> {
            Ok(())
        }
    }
}
