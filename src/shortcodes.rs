//! Shortcode registration and a minimal template host.
//!
//! A host is anything that accepts named async shortcodes
//! ([`ShortcodeHost`]). [`register`] resolves the configuration, starts the
//! connectivity probe, and installs:
//!
//! | Shortcode | Output |
//! |---|---|
//! | `immich_image "<asset uuid>"` | one responsive `<img>` |
//! | `immich_album "<album uuid>"` | an `immich-album` block with every asset |
//!
//! [`Shortcodes`] is the host used by the CLI and the tests. It expands
//! Nunjucks-style tags:
//!
//! ```text
//! {% immich_image "0d8c1c7e-..." %}
//! {%- immich_album '5f1e...' -%}     dashes trim the surrounding whitespace
//! ```
//!
//! Tags naming an unregistered shortcode are left as they are.

use crate::ShortcodeError;
use crate::cache::{CacheStats, ResponseCache};
use crate::client::{FetchError, ImmichClient};
use crate::config::{ImmichConfig, PluginOptions};
use crate::imaging::{ImageBackend, ImageDeriver, RustBackend};
use crate::render::{render_album, render_image};
use crate::types::UserInfo;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const IMAGE_SHORTCODE: &str = "immich_image";
pub const ALBUM_SHORTCODE: &str = "immich_album";

/// Matches `{% name "arg" %}` and `{%- name 'arg' -%}`.
const TAG_PATTERN: &str = r#"\{%(?P<trim_before>-)?\s*(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s+(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')\s*(?P<trim_after>-)?%\}"#;

pub type ShortcodeFuture = BoxFuture<'static, Result<String, ShortcodeError>>;

/// An async shortcode: takes its single string argument, yields HTML.
pub type AsyncShortcode = Arc<dyn Fn(String) -> ShortcodeFuture + Send + Sync>;

/// Something shortcodes can be registered with.
pub trait ShortcodeHost {
    fn add_async_shortcode(&mut self, name: &str, shortcode: AsyncShortcode);
}

/// In-process shortcode registry and tag expander.
#[derive(Clone, Default)]
pub struct Shortcodes {
    registered: BTreeMap<String, AsyncShortcode>,
}

impl ShortcodeHost for Shortcodes {
    fn add_async_shortcode(&mut self, name: &str, shortcode: AsyncShortcode) {
        self.registered.insert(name.to_string(), shortcode);
    }
}

struct Tag {
    start: usize,
    end: usize,
    trim_before: bool,
    trim_after: bool,
}

impl Shortcodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.registered.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Call one shortcode directly.
    pub async fn call(&self, name: &str, arg: &str) -> Result<String, ShortcodeError> {
        let shortcode = self
            .registered
            .get(name)
            .ok_or_else(|| ShortcodeError::Unknown(name.to_string()))?;
        shortcode(arg.to_string()).await
    }

    /// Expand every registered shortcode tag in `template`.
    ///
    /// All invocations run concurrently; their output is spliced back in
    /// source order. The first failure fails the whole render.
    pub async fn render(&self, template: &str) -> Result<String, ShortcodeError> {
        let re = Regex::new(TAG_PATTERN)
            .map_err(|e| ShortcodeError::Template(format!("invalid tag pattern: {e}")))?;

        let mut tags = Vec::new();
        let mut calls = Vec::new();
        for caps in re.captures_iter(template) {
            let Some(shortcode) = self.registered.get(&caps["name"]) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let arg = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .map_or("", |m| m.as_str());

            tags.push(Tag {
                start: whole.start(),
                end: whole.end(),
                trim_before: caps.name("trim_before").is_some(),
                trim_after: caps.name("trim_after").is_some(),
            });
            calls.push(shortcode(arg.to_string()));
        }

        debug!(tags = tags.len(), "expanding shortcodes");
        let outputs = try_join_all(calls).await?;

        let mut out = String::with_capacity(template.len());
        let mut cursor = 0;
        let mut trim_next = false;
        for (tag, html) in tags.iter().zip(outputs) {
            let mut text = &template[cursor..tag.start];
            if trim_next {
                text = text.trim_start();
            }
            if tag.trim_before {
                text = text.trim_end();
            }
            out.push_str(text);
            out.push_str(&html);
            cursor = tag.end;
            trim_next = tag.trim_after;
        }
        let rest = &template[cursor..];
        out.push_str(if trim_next { rest.trim_start() } else { rest });
        Ok(out)
    }
}

/// The resolved plugin: configuration, Immich client and image deriver.
///
/// Cheap to clone; every clone shares the same config, cache and backend.
#[derive(Clone)]
pub struct ImmichPlugin {
    config: Arc<ImmichConfig>,
    client: ImmichClient,
    deriver: ImageDeriver,
}

impl ImmichPlugin {
    /// Plugin with the on-disk response cache and the pure-Rust backend.
    pub fn new(config: ImmichConfig) -> Result<Self, ShortcodeError> {
        let cache = ResponseCache::new(config.cache_dir.clone(), config.cache_duration);
        Self::with_parts(config, cache, Arc::new(RustBackend::new()))
    }

    pub fn with_parts(
        config: ImmichConfig,
        cache: ResponseCache,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self, ShortcodeError> {
        let config = Arc::new(config);
        let client = ImmichClient::new(Arc::clone(&config), Arc::new(cache))?;
        let deriver = ImageDeriver::new(backend, config.images.clone());
        Ok(Self {
            config,
            client,
            deriver,
        })
    }

    pub fn config(&self) -> &ImmichConfig {
        &self.config
    }

    pub fn client(&self) -> &ImmichClient {
        &self.client
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.client.cache().stats()
    }

    /// `immich_image`: one asset as an `<img>` fragment.
    pub async fn image(&self, uuid: &str) -> Result<String, ShortcodeError> {
        let asset = self.client.get_asset(uuid).await?;
        Ok(render_image(&self.deriver, asset).await?.into_string())
    }

    /// `immich_album`: every asset of an album, in album order.
    pub async fn album(&self, uuid: &str) -> Result<String, ShortcodeError> {
        let album = self.client.get_album(uuid).await?;
        let markup = render_album(
            &self.client,
            &self.deriver,
            &album,
            self.config.max_concurrent_fetches,
        )
        .await?;
        Ok(markup.into_string())
    }

    /// Check the server and key by asking who the key belongs to.
    pub async fn probe(&self) -> Result<UserInfo, FetchError> {
        match self.client.whoami().await {
            Ok(user) => {
                info!("Connected to Immich as {}.", user.name);
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e.report(), "could not reach Immich");
                Err(e)
            }
        }
    }

    /// Run [`probe`](Self::probe) in the background on the current tokio
    /// runtime. Returns `false` when there is no runtime to run it on.
    pub fn spawn_probe(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime, skipping connectivity probe");
            return false;
        };
        let plugin = self.clone();
        handle.spawn(async move {
            let _ = plugin.probe().await;
        });
        true
    }
}

/// Register the Immich shortcodes, falling back to the process environment
/// for unset options.
pub fn register(
    host: &mut (impl ShortcodeHost + ?Sized),
    options: PluginOptions,
) -> Result<ImmichPlugin, ShortcodeError> {
    register_with(host, options, |name| std::env::var(name).ok())
}

/// [`register`] with an explicit environment lookup.
///
/// Configuration is resolved before anything touches the host: on error no
/// shortcode is registered.
pub fn register_with(
    host: &mut (impl ShortcodeHost + ?Sized),
    options: PluginOptions,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ImmichPlugin, ShortcodeError> {
    let config = ImmichConfig::resolve_with(options, lookup)?;
    let plugin = ImmichPlugin::new(config)?;
    install(host, &plugin);
    Ok(plugin)
}

/// Start the probe and add both shortcodes for an already built plugin.
pub fn install(host: &mut (impl ShortcodeHost + ?Sized), plugin: &ImmichPlugin) {
    plugin.spawn_probe();

    let image = plugin.clone();
    host.add_async_shortcode(
        IMAGE_SHORTCODE,
        Arc::new(move |uuid| {
            let plugin = image.clone();
            async move { plugin.image(&uuid).await }.boxed()
        }),
    );

    let album = plugin.clone();
    host.add_async_shortcode(
        ALBUM_SHORTCODE,
        Arc::new(move |uuid| {
            let plugin = album.clone();
            async move { plugin.album(&uuid).await }.boxed()
        }),
    );

    debug!(base_url = %plugin.config.base_url, "registered Immich shortcodes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::time::Duration;

    fn echo(prefix: &'static str) -> AsyncShortcode {
        Arc::new(move |arg| async move { Ok::<_, ShortcodeError>(format!("<{prefix}:{arg}>")) }.boxed())
    }

    fn delayed(ms: u64) -> AsyncShortcode {
        Arc::new(move |arg| {
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, ShortcodeError>(format!("[{arg}]"))
            }
            .boxed()
        })
    }

    fn env(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    // =========================================================================
    // Template expansion
    // =========================================================================

    #[tokio::test]
    async fn expands_double_and_single_quoted_tags() {
        let mut host = Shortcodes::new();
        host.add_async_shortcode("pic", echo("pic"));

        let out = host
            .render(r#"a {% pic "one" %} b {%pic 'two'%} c"#)
            .await
            .unwrap();
        assert_eq!(out, "a <pic:one> b <pic:two> c");
    }

    #[tokio::test]
    async fn unknown_tags_are_left_alone() {
        let mut host = Shortcodes::new();
        host.add_async_shortcode("pic", echo("pic"));

        let template = r#"{% include "header.njk" %}{% pic "x" %}{% if true %}"#;
        let out = host.render(template).await.unwrap();
        assert_eq!(out, r#"{% include "header.njk" %}<pic:x>{% if true %}"#);
    }

    #[tokio::test]
    async fn dashes_trim_surrounding_whitespace() {
        let mut host = Shortcodes::new();
        host.add_async_shortcode("pic", echo("pic"));

        let out = host
            .render("<li>\n  {%- pic \"a\" -%}\n  </li>")
            .await
            .unwrap();
        assert_eq!(out, "<li><pic:a></li>");
    }

    #[tokio::test]
    async fn output_follows_source_order_not_completion_order() {
        let mut host = Shortcodes::new();
        host.add_async_shortcode("slow", delayed(80));
        host.add_async_shortcode("fast", delayed(0));

        let out = host
            .render(r#"{% slow "1" %}{% fast "2" %}{% slow "3" %}"#)
            .await
            .unwrap();
        assert_eq!(out, "[1][2][3]");
    }

    #[tokio::test]
    async fn failing_shortcode_fails_render() {
        let mut host = Shortcodes::new();
        host.add_async_shortcode("pic", echo("pic"));
        host.add_async_shortcode(
            "broken",
            Arc::new(|arg| async move { Err::<String, _>(ShortcodeError::Unknown(arg)) }.boxed()),
        );

        let err = host
            .render(r#"{% pic "ok" %}{% broken "nope" %}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ShortcodeError::Unknown(ref a) if a == "nope"));
    }

    #[tokio::test]
    async fn call_unknown_shortcode() {
        let host = Shortcodes::new();
        let err = host.call("immich_image", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "unknown shortcode: immich_image");
    }

    #[tokio::test]
    async fn template_without_tags_is_unchanged() {
        let host = Shortcodes::new();
        let out = host.render("<p>{{ title }}</p>").await.unwrap();
        assert_eq!(out, "<p>{{ title }}</p>");
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn missing_settings_register_nothing() {
        let mut host = Shortcodes::new();
        let result = register_with(&mut host, PluginOptions::default(), env(&[]));

        match result {
            Err(ShortcodeError::Config(ConfigError::Missing(missing))) => {
                assert_eq!(missing, vec!["api_url", "api_key"]);
            }
            Err(other) => panic!("expected missing config, got {other:?}"),
            Ok(_) => panic!("registration should fail"),
        }
        assert!(host.is_empty());
    }

    #[test]
    fn missing_key_alone_registers_nothing() {
        let mut host = Shortcodes::new();
        let result = register_with(
            &mut host,
            PluginOptions::default(),
            env(&[("IMMICH_BASE_URL", "http://immich.local")]),
        );

        assert!(matches!(
            result,
            Err(ShortcodeError::Config(ConfigError::Missing(ref m))) if m == &vec!["api_key"]
        ));
        assert!(host.is_empty());
    }

    #[test]
    fn registers_both_shortcodes_without_runtime() {
        let mut host = Shortcodes::new();
        let tmp = tempfile::TempDir::new().unwrap();
        let options = PluginOptions {
            api_url: Some("http://immich.local/".into()),
            api_key: Some("secret".into()),
            cache_dir: Some(tmp.path().to_path_buf()),
            ..PluginOptions::default()
        };

        let plugin = register_with(&mut host, options, env(&[])).unwrap();

        assert_eq!(host.names(), vec![ALBUM_SHORTCODE, IMAGE_SHORTCODE]);
        assert_eq!(plugin.config().base_url, "http://immich.local");
        assert!(!plugin.spawn_probe());
    }

    #[tokio::test]
    async fn unreachable_server_still_registers_shortcodes() {
        let mut host = Shortcodes::new();
        let tmp = tempfile::TempDir::new().unwrap();
        let options = PluginOptions {
            api_url: Some("http://127.0.0.1:9".into()),
            api_key: Some("k".into()),
            cache_dir: Some(tmp.path().to_path_buf()),
            ..PluginOptions::default()
        };

        // The background connection check starts here and fails.
        let plugin = register_with(&mut host, options, env(&[])).unwrap();
        tokio::task::yield_now().await;

        assert_eq!(host.names(), vec![ALBUM_SHORTCODE, IMAGE_SHORTCODE]);
        assert!(plugin.spawn_probe());
        let err = plugin.probe().await.unwrap_err();
        assert!(err.url.ends_with("/api/users/me"));
        assert!(matches!(err.kind, crate::client::FetchErrorKind::Network(_)));

        let rendered = host.render(r#"{% immich_image "a1" %}"#).await;
        assert!(rendered.is_err());
    }

    #[test]
    fn options_from_env_lookup() {
        let mut host = Shortcodes::new();
        let plugin = register_with(
            &mut host,
            PluginOptions::default(),
            env(&[
                ("IMMICH_BASE_URL", "https://photos.example.org"),
                ("IMMICH_API_KEY", "k"),
                ("IMMICH_CACHE_DURATION", "*"),
            ]),
        )
        .unwrap();

        assert!(host.contains(IMAGE_SHORTCODE));
        assert_eq!(
            plugin.config().api_url("albums/a"),
            "https://photos.example.org/api/albums/a"
        );
    }
}
