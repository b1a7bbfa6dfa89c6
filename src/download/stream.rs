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


//! HTTP streaming of book content to disk
//!
//! Content is written to a staging file and only renamed to its final path
//! once the whole body has arrived and been flushed. A failed or interrupted
//! download therefore never leaves a truncated content file behind.
//!
//! There is no resume and no retry: texts are small, and a missing content
//! file is a state the library already tolerates.

use crate::error::{Result, ShelfError};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

const DOWNLOAD_BUFF_SZ: usize = 8 * 1024; // 8KB write buffer

/// Download `url` into `staging`, then rename it to `destination`
///
/// Returns the number of bytes written. On any failure the staging file is
/// removed and `destination` is left untouched.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    staging: &Path,
    destination: &Path,
) -> Result<u64> {
    match stream_into(client, url, staging).await {
        Ok(bytes) => {
            tokio::fs::rename(staging, destination).await.map_err(|e| {
                ShelfError::storage(
                    "store downloaded content",
                    format!("{} -> {}: {}", staging.display(), destination.display(), e),
                )
            })?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(staging).await;
            Err(e)
        }
    }
}

async fn stream_into(client: &Client, url: &str, staging: &Path) -> Result<u64> {
    let response = client.get(url).send().await.map_err(|e| {
        ShelfError::transport(
            format!("Content download failed: {}", e),
            e.is_timeout() || e.is_connect(),
        )
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ShelfError::application(
            format!("Content download failed with status: {}", status),
            status.as_u16(),
            Some(url.to_string()),
        ));
    }

    let file = File::create(staging).await.map_err(|e| {
        ShelfError::storage(
            "create staging file",
            format!("{}: {}", staging.display(), e),
        )
    })?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFF_SZ, file);
    let mut written: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            ShelfError::transport(format!("Content download interrupted: {}", e), true)
        })?;
        writer.write_all(&chunk).await.map_err(|e| {
            ShelfError::storage("write staging file", format!("{}: {}", staging.display(), e))
        })?;
        written += chunk.len() as u64;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    tracing::debug!(url, bytes = written, "content download complete");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_download_renames_into_place() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/texts/84.txt")
            .with_status(200)
            .with_body("It is a truth universally acknowledged")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("84.part");
        let destination = dir.path().join("book_84.txt");
        let url = format!("{}/texts/84.txt", server.url());

        let bytes = download_to_file(&Client::new(), &url, &staging, &destination)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, 38);
        assert!(!staging.exists());
        assert_eq!(
            std::fs::read_to_string(&destination).unwrap(),
            "It is a truth universally acknowledged"
        );
    }

    #[tokio::test]
    async fn test_http_error_leaves_nothing_behind() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/texts/missing.txt")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("missing.part");
        let destination = dir.path().join("book_missing.txt");
        let url = format!("{}/texts/missing.txt", server.url());

        let err = download_to_file(&Client::new(), &url, &staging, &destination)
            .await
            .unwrap_err();

        assert!(matches!(err, ShelfError::Application { status_code: 404, .. }));
        assert!(!staging.exists());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = download_to_file(
            &Client::new(),
            "http://127.0.0.1:9/unreachable.txt",
            &dir.path().join("x.part"),
            &dir.path().join("book_x.txt"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }
}
