use chrono::{DateTime, Utc};
use url::Url;

use super::error::AlbumError;

/// 1-based page number used to walk an album.
pub type PageToken = u32;

/// First page of every album.
pub const FIRST_PAGE: PageToken = 1;

/// The album to synchronize: its canonical URL and an optional password.
#[derive(Clone, PartialEq, Eq)]
pub struct AlbumReference {
    url: String,
    password: Option<String>,
}

impl std::fmt::Debug for AlbumReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbumReference")
            .field("url", &self.url)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AlbumReference {
    /// Validate and normalize an album URL of the form `https://<host>/f/<token>`.
    ///
    /// Query strings, fragments and a trailing slash are dropped. Anything that
    /// does not look like an album URL is reported as [`AlbumError::NotFound`].
    pub fn parse(raw: &str, password: Option<String>) -> Result<Self, AlbumError> {
        let not_found = || AlbumError::NotFound(format!("'{raw}' is not an album URL"));

        let parsed = Url::parse(raw.trim()).map_err(|_| not_found())?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(not_found());
        }
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            ["f", token] if token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') => {}
            _ => return Err(not_found()),
        }

        let mut canonical = parsed;
        canonical.set_query(None);
        canonical.set_fragment(None);
        let url = canonical.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            url,
            password: password.filter(|p| !p.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Same album, different password (used after prompting the user).
    pub fn with_password(&self, password: String) -> Self {
        Self {
            url: self.url.clone(),
            password: Some(password),
        }
    }

    /// Stable key under which this album's entries are stored in the index.
    pub fn key(&self) -> &str {
        &self.url
    }

    pub fn page_url(&self, page: PageToken) -> String {
        format!("{}?page={}", self.url, page)
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.url)
    }

    pub fn media_download_url(&self, identifier: &str) -> String {
        format!("{}/media_files/{}/download", self.url, identifier)
    }
}

/// Kind of media item; decides the output subfolder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Convert to the string stored in the index.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }

    /// Parse from the string stored in the index.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video => "mp4",
        }
    }
}

/// Metadata for one remote media item, as listed by the album service.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    /// Unique within the album.
    pub identifier: String,
    pub kind: MediaKind,
    pub remote_uri: String,
    pub expected_size: Option<u64>,
    /// Lowercase hex SHA-256, only when the remote side can supply one.
    pub remote_checksum: Option<String>,
    /// Rendered comment thread, `None` when nobody commented.
    pub comment: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    /// Extension without the dot, e.g. `jpg`.
    pub extension: String,
}

/// One page of listing results.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPage {
    pub items: Vec<MediaDescriptor>,
    /// `None` once the album is exhausted.
    pub next: Option<PageToken>,
}
