//! # Immich Shortcodes
//!
//! Template shortcodes that embed photos from an [Immich](https://immich.app)
//! server into statically generated pages. Immich stays the source of truth;
//! the site gets plain `<img>` tags pointing at resized copies written next
//! to the rest of the output.
//!
//! # Architecture
//!
//! Every shortcode invocation runs the same short pipeline:
//!
//! ```text
//! uuid ──► client ──► (cache) ──► imaging ──► render ──► HTML fragment
//!          GET /api/...  .cache/    public/media/img/   <img> / album block
//! ```
//!
//! Configuration is resolved once when the shortcodes are registered and
//! shared read-only from then on. Albums fetch their assets concurrently with
//! a fixed upper bound, and always emit them in album order.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Options, environment fallbacks, cache duration, request headers |
//! | [`client`] | Immich HTTP client: albums, asset metadata + originals, identity probe |
//! | [`cache`] | On-disk response cache keyed by URL and accept type |
//! | [`types`] | Album, asset and user shapes returned by the API |
//! | [`imaging`] | Pure-Rust resizing, content-addressed derivatives, `<img>` markup |
//! | [`render`] | Image and album fragments |
//! | [`shortcodes`] | Registration, the plugin handle, and a small tag-expanding host |
//!
//! # Design Decisions
//!
//! ## Escaped Output
//!
//! Album names, descriptions and alt text come from whoever uses the Immich
//! server. All of it goes through [Maud](https://maud.lambda.xyz/), which
//! escapes every interpolated value, so a description containing `<script>`
//! renders as text.
//!
//! ## Content-Addressed Derivatives
//!
//! Derivative file names are derived from a hash of the original bytes and
//! the encoding quality. Re-running a build reuses every file already on disk,
//! and two shortcodes referencing the same asset share their files.
//!
//! ## Cache Before Network
//!
//! Album and asset responses are cached on disk for a configurable duration
//! (`"1d"` by default, `"*"` for forever). A warm cache makes a rebuild work
//! without the server; a broken cache entry is refetched, never fatal.
//!
//! ## No Partial Albums
//!
//! A single failing asset fails its album. A page that silently drops photos
//! is worse than a build error that names the asset URL.
//!
//! # Usage
//!
//! ```no_run
//! use immich_shortcodes::{PluginOptions, Shortcodes, register};
//!
//! # async fn run() -> Result<(), immich_shortcodes::ShortcodeError> {
//! let mut host = Shortcodes::new();
//! register(&mut host, PluginOptions::default())?; // IMMICH_BASE_URL / IMMICH_API_KEY
//! let html = host.render(r#"<main>{% immich_album "5f1e..." %}</main>"#).await?;
//! # let _ = html;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod imaging;
pub mod render;
pub mod shortcodes;
pub mod types;

pub use config::{ConfigError, ImmichConfig, PluginOptions};
pub use shortcodes::{
    AsyncShortcode, ImmichPlugin, ShortcodeHost, Shortcodes, install, register, register_with,
};

use thiserror::Error;

/// Anything a shortcode can fail with.
#[derive(Error, Debug)]
pub enum ShortcodeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Fetch(#[from] client::FetchError),
    #[error("image processing failed: {0}")]
    Image(#[from] imaging::ImageError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("unknown shortcode: {0}")]
    Unknown(String),
    #[error("template error: {0}")]
    Template(String),
}
