//! HTML fragments for single assets and whole albums.
//!
//! ## Album markup
//!
//! ```html
//! <div class="immich-album">
//!   <h2>{album name}</h2>
//!   <p>{description}</p>            <!-- only when non-empty -->
//!   <div class="immich-album-assets">
//!     {one image fragment per asset, in album order}
//!   </div>
//! </div>
//! ```
//!
//! Assets are fetched and rendered concurrently, at most
//! `max_concurrency` at a time. `buffered` yields results in input order,
//! so the output never depends on which request finished first. The first
//! failure aborts the album; there are no partial albums.

use crate::ShortcodeError;
use crate::client::AssetSource;
use crate::imaging::{ImageAttributes, ImageDeriver, ImageError, generate_html};
use crate::types::{AlbumData, AssetImageData};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use maud::{Markup, html};
use tracing::debug;

/// Render one asset as a responsive `<img>` (or `<picture>`).
pub async fn render_image(
    deriver: &ImageDeriver,
    asset: AssetImageData,
) -> Result<Markup, ImageError> {
    let attrs = ImageAttributes::lazy(asset.metadata.alt_text());
    let set = deriver.derive(asset.original).await?;
    Ok(generate_html(&set, &attrs))
}

/// Render an album: heading, optional description, then every asset.
pub async fn render_album(
    source: &dyn AssetSource,
    deriver: &ImageDeriver,
    album: &AlbumData,
    max_concurrency: usize,
) -> Result<Markup, ShortcodeError> {
    debug!(
        album = %album.album_name,
        assets = album.assets.len(),
        "rendering album"
    );

    // Owned ids keep each future independent of the borrowed album.
    let renders: Vec<BoxFuture<'_, Result<Markup, ShortcodeError>>> = album
        .assets
        .iter()
        .map(|asset| {
            let id = asset.id.clone();
            async move {
                let data = source.asset(&id).await?;
                Ok(render_image(deriver, data).await?)
            }
            .boxed()
        })
        .collect();

    let fragments: Vec<Markup> = stream::iter(renders)
        .buffered(max_concurrency.max(1))
        .try_collect()
        .await?;

    Ok(html! {
        div.immich-album {
            h2 { (album.album_name) }
            @if let Some(description) = album.visible_description() {
                p { (description) }
            }
            div.immich-album-assets {
                @for fragment in &fragments {
                    (fragment)
                }
            }
        }
    })
}
