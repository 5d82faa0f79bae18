//! Remote album client: lists the media of a shared album page by page.

mod client;
pub mod error;
pub mod page;
pub mod types;

use async_trait::async_trait;

pub use client::{build_http_client, MiteneClient};
pub use error::{AlbumError, AuthFailure};
pub use types::{AlbumReference, MediaDescriptor, MediaKind, MediaPage, PageToken, FIRST_PAGE};

/// Source of album listings.
///
/// Enumeration is forward-only: callers start at [`FIRST_PAGE`] and follow
/// `next` until it is `None`. A failed enumeration is restarted from the
/// first page rather than resumed.
#[async_trait]
pub trait AlbumSource: Send + Sync {
    async fn list_media(
        &self,
        album: &AlbumReference,
        page: PageToken,
    ) -> Result<MediaPage, AlbumError>;
}
