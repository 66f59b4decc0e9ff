//! Plugin configuration.
//!
//! Options come from code (or a TOML file) and fall back to environment
//! variables. The result is an immutable [`ImmichConfig`], resolved once at
//! registration and shared by reference with every fetch and render call.
//!
//! ## Options
//!
//! ```toml
//! # All options are optional here; api_url and api_key must come from
//! # somewhere (this file, or IMMICH_BASE_URL / IMMICH_API_KEY).
//!
//! api_url = "https://photos.example.org"   # IMMICH_BASE_URL
//! api_key = "..."                          # IMMICH_API_KEY
//! cacheDuration = "1d"                     # IMMICH_CACHE_DURATION; "*" = forever
//! cache_dir = ".cache"                     # On-disk response cache
//! output_dir = "public/media/img/"         # Where derivatives are written
//! url_path = "/media/img/"                 # How derivatives are referenced
//! widths = [300, 600]
//! formats = ["jpeg"]
//! quality = 90
//! max_concurrent_fetches = 8               # Album fan-out bound
//!
//! [headers]                                # Extra headers on every request
//! # "cf-access-client-id" = "..."
//! ```
//!
//! ## Resolution order
//!
//! For every field: explicit option, then environment variable, then the
//! default shown above. Empty strings count as absent. A missing `api_url`
//! or `api_key` is a [`ConfigError::Missing`] and aborts registration.

use crate::imaging::OutputFormat;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const BASE_URL_ENV: &str = "IMMICH_BASE_URL";
pub const API_KEY_ENV: &str = "IMMICH_API_KEY";
pub const CACHE_DURATION_ENV: &str = "IMMICH_CACHE_DURATION";

/// Header carrying the Immich API key on every request.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing required setting: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid cache duration {0:?}: expected \"*\" or <number><s|m|h|d|w|y>")]
    InvalidDuration(String),
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Raw plugin options, as passed at registration or read from a TOML file.
///
/// Every field is optional; [`ImmichConfig::resolve`] fills the gaps from the
/// environment and from defaults. Unknown keys are rejected to catch typos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginOptions {
    /// Immich server base URL, e.g. `https://photos.example.org`.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    /// How long cached responses are reused (`"1d"`, `"6h"`, `"*"`).
    #[serde(rename = "cacheDuration", alias = "cache_duration")]
    pub cache_duration: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub url_path: Option<String>,
    pub widths: Option<Vec<u32>>,
    pub formats: Option<Vec<OutputFormat>>,
    pub quality: Option<u32>,
    pub max_concurrent_fetches: Option<usize>,
    /// Extra request headers sent with every call. `x-api-key` always wins.
    pub headers: BTreeMap<String, String>,
}

impl PluginOptions {
    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Time-to-live for cached remote responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDuration {
    /// `"*"`: never refetch once cached.
    Forever,
    /// Refetch once the cached copy is at least this old. Zero disables reuse.
    Ttl(Duration),
}

impl CacheDuration {
    /// Whether a response fetched `age` ago may still be served.
    pub fn is_fresh(&self, age: Duration) -> bool {
        match self {
            CacheDuration::Forever => true,
            CacheDuration::Ttl(ttl) => age < *ttl,
        }
    }
}

impl Default for CacheDuration {
    fn default() -> Self {
        CacheDuration::Ttl(Duration::from_secs(DAY))
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

impl FromStr for CacheDuration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "*" {
            return Ok(CacheDuration::Forever);
        }
        let invalid = || ConfigError::InvalidDuration(s.to_string());

        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (amount, unit) = trimmed.split_at(split);
        let amount: u64 = amount.parse().map_err(|_| invalid())?;
        let unit_secs = match unit {
            "s" => 1,
            "m" => MINUTE,
            "h" => HOUR,
            "d" => DAY,
            "w" => 7 * DAY,
            "y" => 365 * DAY,
            _ => return Err(invalid()),
        };
        let secs = amount.checked_mul(unit_secs).ok_or_else(invalid)?;
        Ok(CacheDuration::Ttl(Duration::from_secs(secs)))
    }
}

impl fmt::Display for CacheDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheDuration::Forever => write!(f, "*"),
            CacheDuration::Ttl(ttl) => write!(f, "{}s", ttl.as_secs()),
        }
    }
}

/// Derivative policy: which variants to generate and where they go.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePolicy {
    pub widths: Vec<u32>,
    pub formats: Vec<OutputFormat>,
    /// Filesystem directory the derivatives are written to.
    pub output_dir: PathBuf,
    /// URL prefix used in `src`/`srcset` for files in `output_dir`.
    pub url_path: String,
    pub quality: u32,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            widths: vec![300, 600],
            formats: vec![OutputFormat::Jpeg],
            output_dir: PathBuf::from("public/media/img/"),
            url_path: "/media/img/".to_string(),
            quality: 90,
        }
    }
}

const DEFAULT_CACHE_DIR: &str = ".cache";
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Resolved, validated plugin configuration.
#[derive(Clone)]
pub struct ImmichConfig {
    /// Server root without a trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub cache_duration: CacheDuration,
    pub cache_dir: PathBuf,
    /// Headers sent with every request; always contains `x-api-key`.
    pub default_headers: HeaderMap,
    pub images: ImagePolicy,
    /// Upper bound on concurrently fetched assets within one album.
    pub max_concurrent_fetches: usize,
}

impl fmt::Debug for ImmichConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmichConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("cache_duration", &self.cache_duration)
            .field("cache_dir", &self.cache_dir)
            .field("images", &self.images)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .finish()
    }
}

impl ImmichConfig {
    /// Resolve options against the process environment.
    pub fn resolve(options: PluginOptions) -> Result<Self, ConfigError> {
        Self::resolve_with(options, |name| std::env::var(name).ok())
    }

    /// Resolve options, looking up environment fallbacks through `lookup`.
    pub fn resolve_with(
        options: PluginOptions,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let base_url = present(options.api_url).or_else(|| present(lookup(BASE_URL_ENV)));
        let api_key = present(options.api_key).or_else(|| present(lookup(API_KEY_ENV)));

        let (base_url, api_key) = match (base_url, api_key) {
            (Some(url), Some(key)) => (url, key),
            (url, key) => {
                let mut missing = Vec::new();
                if url.is_none() {
                    missing.push("api_url");
                }
                if key.is_none() {
                    missing.push("api_key");
                }
                return Err(ConfigError::Missing(missing));
            }
        };

        let cache_duration = match present(options.cache_duration)
            .or_else(|| present(lookup(CACHE_DURATION_ENV)))
        {
            Some(raw) => raw.parse()?,
            None => CacheDuration::default(),
        };

        let defaults = ImagePolicy::default();
        let images = ImagePolicy {
            widths: options.widths.unwrap_or(defaults.widths),
            formats: options.formats.unwrap_or(defaults.formats),
            output_dir: options.output_dir.unwrap_or(defaults.output_dir),
            url_path: options.url_path.unwrap_or(defaults.url_path),
            quality: options.quality.unwrap_or(defaults.quality),
        };

        let config = Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            default_headers: default_headers(&options.headers, api_key.trim())?,
            api_key: api_key.trim().to_string(),
            cache_duration,
            cache_dir: options
                .cache_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            images,
            max_concurrent_fetches: options
                .max_concurrent_fetches
                .unwrap_or(DEFAULT_MAX_CONCURRENT_FETCHES),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.widths.is_empty() {
            return Err(ConfigError::Validation("widths must not be empty".into()));
        }
        if self.images.widths.contains(&0) {
            return Err(ConfigError::Validation("widths must be non-zero".into()));
        }
        if self.images.formats.is_empty() {
            return Err(ConfigError::Validation("formats must not be empty".into()));
        }
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation("quality must be 1-100".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Absolute URL of an API path, e.g. `api_url("albums/abc")`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// A fresh header set for one request: the defaults plus `accept`.
    ///
    /// Each call returns its own copy, so concurrent requests with different
    /// accept types never observe each other's headers.
    pub fn headers_for(&self, accept: &'static str) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers
    }
}

fn default_headers(
    extra: &BTreeMap<String, String>,
    api_key: &str,
) -> Result<HeaderMap, ConfigError> {
    let invalid = |name: &str, reason: String| ConfigError::InvalidHeader {
        name: name.to_string(),
        reason,
    };

    let mut headers = HeaderMap::new();
    for (name, value) in extra {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    let mut key =
        HeaderValue::from_str(api_key).map_err(|e| invalid(API_KEY_HEADER, e.to_string()))?;
    key.set_sensitive(true);
    headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
    Ok(headers)
}

/// A documented options file with every default spelled out.
pub fn stock_options_toml() -> &'static str {
    STOCK_OPTIONS_TOML
}

const STOCK_OPTIONS_TOML: &str = r#"# immich-shortcodes options
#
# api_url and api_key are required, here or through the IMMICH_BASE_URL and
# IMMICH_API_KEY environment variables.

# api_url = "https://photos.example.org"
# api_key = ""

# How long fetched metadata and originals are reused: <n>s|m|h|d|w|y, or "*".
cacheDuration = "1d"

# On-disk cache of API responses.
cache_dir = ".cache"

# Generated derivatives are written to output_dir and referenced via url_path.
output_dir = "public/media/img/"
url_path = "/media/img/"

# Variant policy: one file per width and format.
widths = [300, 600]
formats = ["jpeg"]
quality = 90

# Maximum number of album assets fetched at once.
max_concurrent_fetches = 8

# Extra headers sent with every request.
[headers]
"#;
