use std::path::PathBuf;

use crate::album::{MediaDescriptor, MediaKind};

/// Where synchronized files land under the output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn photos(&self) -> PathBuf {
        self.root.join("photos")
    }

    pub fn videos(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn comments(&self) -> PathBuf {
        self.root.join("comments")
    }

    /// Every directory files are written to.
    pub fn dirs(&self) -> [PathBuf; 3] {
        [self.photos(), self.videos(), self.comments()]
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in self.dirs() {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn media_path(&self, media: &MediaDescriptor) -> PathBuf {
        let dir = match media.kind {
            MediaKind::Photo => self.photos(),
            MediaKind::Video => self.videos(),
        };
        dir.join(format!(
            "{}.{}",
            media_file_stem(media),
            clean_filename(&media.extension)
        ))
    }

    /// Comment file for a media item; shares the media file's stem.
    pub fn comment_path(&self, media: &MediaDescriptor) -> PathBuf {
        self.comments()
            .join(format!("{}.md", media_file_stem(media)))
    }
}

/// `<YYYY-MM-DD_HHMMSS>-<identifier>` with the capture time in UTC, or just
/// the identifier when the capture time is unknown.
pub fn media_file_stem(media: &MediaDescriptor) -> String {
    let id = clean_filename(&media.identifier);
    match media.taken_at {
        Some(taken) => format!(
            "{}-{}",
            taken.format("%Y-%m-%d_%H%M%S"),
            id
        ),
        None => id,
    }
}

/// Clean a filename by removing characters that are invalid on common
/// filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}
