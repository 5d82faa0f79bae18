use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};

use super::error::{AlbumError, AuthFailure};
use super::page;
use super::types::{AlbumReference, MediaPage, PageToken};
use super::AlbumSource;
use crate::retry::retry_after_header;

const USER_AGENT: &str = concat!("mitene-sync/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by listing and media downloads.
///
/// The cookie store carries the album session obtained at login, so media
/// requests made with the same client are authorized too.
pub fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client, AlbumError> {
    reqwest::Client::builder()
        .cookie_store(true)
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| AlbumError::Protocol(format!("failed to build HTTP client: {e}")))
}

/// [`AlbumSource`] backed by the mitene web frontend.
#[derive(Clone)]
pub struct MiteneClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl MiteneClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    async fn fetch_html(&self, url: &str) -> Result<String, AlbumError> {
        let resp = self.http.get(url).timeout(self.timeout).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AlbumError::from_response(
                status.as_u16(),
                url,
                retry_after_header(resp.headers()),
            ));
        }
        Ok(resp.text().await?)
    }

    /// Submit the password form. Cookies set by the response land in the
    /// client's jar.
    async fn login(&self, album: &AlbumReference, form_html: &str) -> Result<(), AlbumError> {
        let password = album
            .password()
            .ok_or(AlbumError::Authentication(AuthFailure::Missing))?;
        let token = page::authenticity_token(form_html)?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("session[password]", password)
            .append_pair("authenticity_token", token)
            .finish();

        let login_url = album.login_url();
        tracing::debug!(url = %login_url, "Submitting album password");
        let resp = self
            .http
            .post(&login_url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 || resp.url().path().ends_with("/login")
        {
            return Err(AlbumError::Authentication(AuthFailure::Rejected));
        }
        if !status.is_success() {
            return Err(AlbumError::from_response(
                status.as_u16(),
                &login_url,
                retry_after_header(resp.headers()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AlbumSource for MiteneClient {
    async fn list_media(
        &self,
        album: &AlbumReference,
        page: PageToken,
    ) -> Result<MediaPage, AlbumError> {
        let url = album.page_url(page);
        let mut html = self.fetch_html(&url).await?;

        if page::requires_password(&html) {
            self.login(album, &html).await?;
            html = self.fetch_html(&url).await?;
            if page::requires_password(&html) {
                return Err(AlbumError::Authentication(AuthFailure::Rejected));
            }
        }

        let items = page::parse_page(&html, album)?;
        tracing::debug!(page, items = items.len(), "Listed album page");
        let next = if items.is_empty() { None } else { Some(page + 1) };
        Ok(MediaPage { items, next })
    }
}
