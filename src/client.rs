//! Immich API client.
//!
//! Three endpoints are used:
//!
//! | Call | Endpoint | Accept |
//! |---|---|---|
//! | [`ImmichClient::get_album`] | `GET /api/albums/{id}` | `application/json` |
//! | [`ImmichClient::get_asset`] | `GET /api/assets/{id}` + `GET /api/assets/{id}/original` | json + `application/octet-stream` |
//! | [`ImmichClient::whoami`] | `GET /api/users/me` | `application/json` |
//!
//! Album and asset responses go through the [`ResponseCache`]; the identity
//! probe never does, since its point is to reach the server. Every request
//! builds its own header map from the config, so concurrent JSON and binary
//! requests cannot see each other's `accept` value.
//!
//! There are no retries: any failure is returned to the caller with the URL
//! attached.

use crate::cache::ResponseCache;
use crate::config::ImmichConfig;
use crate::types::{AlbumData, AssetImageData, AssetMetadata, UserInfo};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const ACCEPT_JSON: &str = "application/json";
pub const ACCEPT_BINARY: &str = "application/octet-stream";

/// Longest error body kept in a [`FetchErrorKind::Status`].
const MAX_ERROR_BODY: usize = 512;

/// A failed request. The message names the URL and the kind of failure;
/// the underlying transport or JSON error is only reachable through
/// [`source`](std::error::Error::source), so each cause is printed once.
#[derive(Debug)]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {} failed: {}", self.url, self.kind)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

#[derive(Error, Debug)]
pub enum FetchErrorKind {
    #[error("network error")]
    Network(#[source] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid JSON")]
    Decode(#[source] serde_json::Error),
}

impl FetchError {
    pub fn new(url: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    /// The message followed by every underlying cause, for logs.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(e) = cause {
            out.push_str(": ");
            out.push_str(&e.to_string());
            cause = e.source();
        }
        out
    }

    /// HTTP status, when the server answered with a non-success code.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            FetchErrorKind::Status { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Where renderers get album and asset data from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn album(&self, uuid: &str) -> Result<AlbumData, FetchError>;

    /// Metadata and original bytes; fails if either part fails.
    async fn asset(&self, uuid: &str) -> Result<AssetImageData, FetchError>;
}

/// HTTP client for one Immich server.
#[derive(Debug, Clone)]
pub struct ImmichClient {
    http: reqwest::Client,
    config: Arc<ImmichConfig>,
    cache: Arc<ResponseCache>,
}

impl ImmichClient {
    pub fn new(config: Arc<ImmichConfig>, cache: Arc<ResponseCache>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("immich-shortcodes/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            cache,
        })
    }

    pub fn config(&self) -> &ImmichConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    #[instrument(skip(self))]
    pub async fn get_album(&self, uuid: &str) -> Result<AlbumData, FetchError> {
        let url = self.config.api_url(&format!("albums/{uuid}"));
        self.get_json(&url).await
    }

    /// Fetch an asset's metadata and original concurrently.
    #[instrument(skip(self))]
    pub async fn get_asset(&self, uuid: &str) -> Result<AssetImageData, FetchError> {
        let metadata_url = self.config.api_url(&format!("assets/{uuid}"));
        let original_url = self.config.api_url(&format!("assets/{uuid}/original"));

        let (metadata, original) = tokio::try_join!(
            self.get_json::<AssetMetadata>(&metadata_url),
            self.get_bytes(&original_url, ACCEPT_BINARY),
        )?;
        debug!(bytes = original.len(), "asset fetched");
        Ok(AssetImageData { metadata, original })
    }

    /// Identify the API key's owner. Always goes to the server.
    #[instrument(skip(self))]
    pub async fn whoami(&self) -> Result<UserInfo, FetchError> {
        let url = self.config.api_url("users/me");
        let body = self.fetch(&url, ACCEPT_JSON).await?;
        decode(&url, &body)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        if let Some(body) = self.cache.get(url, ACCEPT_JSON).await {
            match decode(url, &body) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(url, error = %e.report(), "discarding undecodable cached response"),
            }
        }
        let body = self.fetch(url, ACCEPT_JSON).await?;
        let value = decode(url, &body)?;
        self.store(url, ACCEPT_JSON, &body).await;
        Ok(value)
    }

    async fn get_bytes(&self, url: &str, accept: &'static str) -> Result<Bytes, FetchError> {
        if let Some(body) = self.cache.get(url, accept).await {
            return Ok(body);
        }
        let body = self.fetch(url, accept).await?;
        self.store(url, accept, &body).await;
        Ok(body)
    }

    async fn store(&self, url: &str, accept: &str, body: &[u8]) {
        if let Err(e) = self.cache.put(url, accept, body).await {
            warn!(url, error = %e, "failed to write response cache");
        }
    }

    async fn fetch(&self, url: &str, accept: &'static str) -> Result<Bytes, FetchError> {
        debug!(url, accept, "fetching");
        let response = self
            .http
            .get(url)
            .headers(self.config.headers_for(accept))
            .send()
            .await
            .map_err(|e| FetchError::new(url, FetchErrorKind::Network(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::new(
                url,
                FetchErrorKind::Status {
                    status: status.as_u16(),
                    body: truncate(body, MAX_ERROR_BODY),
                },
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::new(url, FetchErrorKind::Network(e)))
    }
}

#[async_trait]
impl AssetSource for ImmichClient {
    async fn album(&self, uuid: &str) -> Result<AlbumData, FetchError> {
        self.get_album(uuid).await
    }

    async fn asset(&self, uuid: &str) -> Result<AssetImageData, FetchError> {
        self.get_asset(uuid).await
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, FetchError> {
    serde_json::from_slice(body).map_err(|e| FetchError::new(url, FetchErrorKind::Decode(e)))
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_names_url_and_cause() {
        let err = FetchError::new(
            "http://immich/api/albums/x",
            FetchErrorKind::Status {
                status: 404,
                body: "Not found".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "GET http://immich/api/albums/x failed: HTTP 404: Not found"
        );
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn decode_error_carries_url() {
        let err = decode::<AlbumData>("http://immich/api/albums/x", b"<html>").unwrap_err();
        assert_eq!(err.url, "http://immich/api/albums/x");
        assert!(matches!(err.kind, FetchErrorKind::Decode(_)));
        assert_eq!(err.status(), None);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn decode_cause_is_printed_once() {
        let err = decode::<AlbumData>("http://immich/api/albums/x", b"<html>").unwrap_err();
        let cause = std::error::Error::source(&err).unwrap().to_string();

        assert_eq!(err.to_string(), "GET http://immich/api/albums/x failed: invalid JSON");
        assert!(!err.to_string().contains(&cause));
        assert_eq!(err.report(), format!("{err}: {cause}"));
        assert_eq!(err.report().matches(&cause).count(), 1);
    }

    #[test]
    fn status_report_has_no_extra_cause() {
        let err = FetchError::new(
            "http://immich/api/users/me",
            FetchErrorKind::Status {
                status: 401,
                body: "Invalid API key".into(),
            },
        );
        assert!(std::error::Error::source(&err).is_none());
        assert_eq!(err.report(), err.to_string());
    }

    #[test]
    fn truncate_long_bodies_on_char_boundary() {
        let body = "é".repeat(400);
        let cut = truncate(body, 11);
        assert!(cut.ends_with('…'));
        assert_eq!(cut.chars().count(), 6);
        assert_eq!(truncate("short".into(), 11), "short");
    }
}
