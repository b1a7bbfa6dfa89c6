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


//! Concurrent 401 handling against a mock API server

use futures_util::future::join_all;
use libro_core::api::{CredentialPair, SessionManager};
use libro_core::storage::{Database, KeyValueStore, SqliteStore};
use libro_core::{ClientConfig, ErrorKind};
use mockito::{Mock, Server, ServerGuard};
use reqwest::Method;
use std::sync::Arc;

const CALLS: usize = 5;

async fn stale_session(server: &ServerGuard) -> (SessionManager, Arc<SqliteStore>) {
    let db = Database::new_in_memory().await.unwrap();
    let store = Arc::new(SqliteStore::secure(db.pool().clone()));
    CredentialPair::new("stale", Some("refresh-1".to_string()))
        .save(store.as_ref())
        .await
        .unwrap();

    let config = ClientConfig::builder()
        .base_url(format!("{}/v1/", server.url()))
        .enable_cookies(false)
        .build();
    let session = SessionManager::new(config, store.clone()).unwrap();
    session.restore().await.unwrap();
    (session, store)
}

fn books_mock(server: &mut ServerGuard, token: &str, status: usize) -> Mock {
    server
        .mock("GET", mockito::Matcher::Regex(r"^/v1/books/\d+$".to_string()))
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .with_status(status)
        .with_body(if status == 200 {
            r#"{"id": 1, "title": "Ok"}"#
        } else {
            r#"{"message": "jwt expired"}"#
        })
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let mut server = Server::new_async().await;
    let stale = books_mock(&mut server, "stale", 401)
        .expect(CALLS)
        .create_async()
        .await;
    let fresh = books_mock(&mut server, "fresh", 200)
        .expect(CALLS)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/v1/auth/refresh")
        .match_header("x-refresh-token", "refresh-1")
        .with_status(200)
        .with_body(r#"{"data": {"accessToken": "fresh", "refreshToken": "refresh-2"}}"#)
        .expect(1)
        .create_async()
        .await;

    let (session, store) = stale_session(&server).await;

    let calls = (1..=CALLS).map(|i| {
        let session = session.clone();
        async move {
            session
                .authenticated_request(Method::GET, &format!("books/{}", i), None)
                .await
        }
    });
    let results = join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap().status(), reqwest::StatusCode::OK);
    }
    refresh.assert_async().await;
    stale.assert_async().await;
    fresh.assert_async().await;

    assert_eq!(
        session.credentials().await,
        Some(CredentialPair::new("fresh", Some("refresh-2".to_string())))
    );
    assert_eq!(
        store.get("libro.refresh-token").await.unwrap().as_deref(),
        Some("refresh-2")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_401s_share_one_refresh() {
    let mut server = Server::new_async().await;
    let _stale = books_mock(&mut server, "stale", 401).create_async().await;
    let fresh = books_mock(&mut server, "fresh", 200)
        .expect(CALLS)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/v1/auth/refresh")
        .with_status(200)
        .with_body(r#"{"accessToken": "fresh"}"#)
        .expect(1)
        .create_async()
        .await;

    let (session, _) = stale_session(&server).await;

    let handles: Vec<_> = (1..=CALLS)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .authenticated_request(Method::GET, &format!("books/{}", i), None)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    refresh.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_callers_all_see_refresh_failure() {
    let mut server = Server::new_async().await;
    let _stale = books_mock(&mut server, "stale", 401).create_async().await;
    let refresh = server
        .mock("POST", "/v1/auth/refresh")
        .with_status(401)
        .with_body(r#"{"message": "refresh token expired"}"#)
        .expect_at_least(1)
        .create_async()
        .await;

    let (session, _) = stale_session(&server).await;

    let calls = (1..=CALLS).map(|i| {
        let session = session.clone();
        async move {
            session
                .authenticated_request(Method::GET, &format!("books/{}", i), None)
                .await
        }
    });

    for result in join_all(calls).await {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Auth);
    }
    refresh.assert_async().await;

    // Pair untouched, still signed in
    assert_eq!(
        session.credentials().await,
        Some(CredentialPair::new("stale", Some("refresh-1".to_string())))
    );
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_failed_refresh_does_not_block_a_later_one() {
    let mut server = Server::new_async().await;
    let _stale = books_mock(&mut server, "stale", 401).create_async().await;
    let refresh = server
        .mock("POST", "/v1/auth/refresh")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let (session, _) = stale_session(&server).await;

    for _ in 0..2 {
        let err = session
            .authenticated_request(Method::GET, "books/1", None)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_refreshed_pair_survives_restart() {
    let mut server = Server::new_async().await;
    let _stale = books_mock(&mut server, "stale", 401).create_async().await;
    let _fresh = books_mock(&mut server, "fresh", 200).create_async().await;
    let _refresh = server
        .mock("POST", "/v1/auth/refresh")
        .with_status(200)
        .with_body(r#"{"accessToken": "fresh", "refreshToken": "refresh-2"}"#)
        .create_async()
        .await;

    let (session, store) = stale_session(&server).await;
    session
        .authenticated_request(Method::GET, "books/1", None)
        .await
        .unwrap();

    // A second manager over the same store, as after a process restart
    let restarted = SessionManager::new(session.config().clone(), store).unwrap();
    assert!(restarted.restore().await.unwrap().authenticated);
    assert_eq!(
        restarted.credentials().await.unwrap().access_token,
        "fresh"
    );
}
