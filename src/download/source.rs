use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::error::DownloadError;
use crate::retry::retry_after_header;

/// An open media body.
pub struct MediaStream {
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, DownloadError>>,
}

/// Where media bytes come from.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, uri: &str) -> Result<MediaStream, DownloadError>;
}

// The same client that logged in to the album, so its cookies authorize the
// download URLs.
#[async_trait]
impl MediaSource for reqwest::Client {
    async fn open(&self, uri: &str) -> Result<MediaStream, DownloadError> {
        let response = self
            .get(uri)
            .send()
            .await
            .map_err(|e| DownloadError::Http {
                uri: uri.to_string(),
                reason: e.to_string(),
                bytes_written: 0,
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status().as_u16(),
                uri: uri.to_string(),
                retry_after: retry_after_header(response.headers()),
            });
        }

        let content_length = response.content_length();
        let owned_uri = uri.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloadError::Http {
                    uri: owned_uri.clone(),
                    reason: e.to_string(),
                    bytes_written: 0,
                })
            })
            .boxed();

        Ok(MediaStream {
            content_length,
            body,
        })
    }
}
