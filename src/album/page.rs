//! Parsing of the album's HTML pages.
//!
//! The media list is not served as an API response: each page embeds it as a
//! JSON literal assigned to `gon.media`, followed by the next `gon` field.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::AlbumError;
use super::types::{AlbumReference, MediaDescriptor, MediaKind};

const MEDIA_START: &str = "gon.media=";
const MEDIA_END: &str = ";gon.familyUserIdToColorMap=";
const PASSWORD_PROMPT: &str = "Please enter your password";
const TOKEN_MARKER: &str = "name=\"authenticity_token\" value=\"";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaData {
    pub media_files: Vec<MediaFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaFile {
    pub uuid: String,
    #[serde(default)]
    pub took_at: Option<String>,
    #[serde(default)]
    pub expiring_url: Option<String>,
    #[serde(default)]
    pub expiring_video_url: Option<String>,
    #[serde(default)]
    pub comments: Vec<RawComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawComment {
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub user: Option<CommentUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentUser {
    #[serde(default)]
    pub nickname: String,
}

/// Whether the page is the password form instead of the album.
pub fn requires_password(html: &str) -> bool {
    html.contains(PASSWORD_PROMPT)
}

/// Extract the CSRF token from the password form.
pub fn authenticity_token(html: &str) -> Result<&str, AlbumError> {
    let start = html
        .find(TOKEN_MARKER)
        .map(|i| i + TOKEN_MARKER.len())
        .ok_or_else(|| AlbumError::Protocol("password form has no authenticity_token".into()))?;
    let len = html[start..]
        .find('"')
        .ok_or_else(|| AlbumError::Protocol("unterminated authenticity_token".into()))?;
    Ok(&html[start..start + len])
}

/// Cut the `gon.media` JSON literal out of a page and deserialize it.
pub(crate) fn parse_media_data(html: &str) -> Result<MediaData, AlbumError> {
    let start = html
        .find(MEDIA_START)
        .map(|i| i + MEDIA_START.len())
        .ok_or_else(|| AlbumError::Protocol("page does not contain gon.media".into()))?;
    let len = html[start..]
        .find(MEDIA_END)
        .ok_or_else(|| AlbumError::Protocol("gon.media is not terminated".into()))?;
    Ok(serde_json::from_str(&html[start..start + len])?)
}

/// Parse a page into descriptors for `album`.
pub fn parse_page(html: &str, album: &AlbumReference) -> Result<Vec<MediaDescriptor>, AlbumError> {
    let data = parse_media_data(html)?;
    Ok(data
        .media_files
        .into_iter()
        .map(|file| file.into_descriptor(album))
        .collect())
}

impl MediaFile {
    fn into_descriptor(self, album: &AlbumReference) -> MediaDescriptor {
        let (kind, source_url) = match &self.expiring_video_url {
            Some(video) => (MediaKind::Video, Some(video.as_str())),
            None => (MediaKind::Photo, self.expiring_url.as_deref()),
        };
        let extension = source_url
            .and_then(url_extension)
            .unwrap_or_else(|| kind.default_extension().to_string());

        MediaDescriptor {
            remote_uri: album.media_download_url(&self.uuid),
            comment: render_comments(&self.comments),
            taken_at: self.took_at.as_deref().and_then(parse_took_at),
            identifier: self.uuid,
            kind,
            expected_size: None,
            remote_checksum: None,
            extension,
        }
    }
}

/// Render non-deleted comments as Markdown paragraphs.
fn render_comments(comments: &[RawComment]) -> Option<String> {
    let mut out = String::new();
    for comment in comments.iter().filter(|c| !c.is_deleted) {
        let nickname = comment.user.as_ref().map(|u| u.nickname.as_str()).unwrap_or("");
        out.push_str(&format!("**{}**: {}\n\n", nickname, comment.body));
    }
    (!out.is_empty()).then_some(out)
}

fn parse_took_at(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(took_at = raw, error = %e, "Unparseable tookAt");
            None
        }
    }
}

/// Lowercase extension of the last path segment of a URL, if it has a sane one.
fn url_extension(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
