//! Responsive `<img>` / `<picture>` markup for a derivative set.
//!
//! All attribute values go through maud and are HTML-escaped, including alt
//! text that originates from the photo server.

use super::derivatives::{FormatVariants, ImageDerivativeSet};
use maud::{Markup, html};

/// Fallback alt text for assets without an EXIF description.
pub const NO_DESCRIPTION_ALT: &str = "No image description available";

/// Attributes applied to the generated `<img>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttributes {
    pub alt: String,
    /// Entries of the `sizes` attribute; omitted entirely when empty.
    pub sizes: Vec<String>,
    pub loading: String,
    pub decoding: String,
}

impl ImageAttributes {
    /// Lazy-loaded, async-decoded image with no sizing hints.
    pub fn lazy(alt: impl Into<String>) -> Self {
        Self {
            alt: alt.into(),
            sizes: Vec::new(),
            loading: "lazy".to_string(),
            decoding: "async".to_string(),
        }
    }
}

fn srcset(group: &FormatVariants) -> String {
    group
        .variants
        .iter()
        .map(|d| format!("{} {}w", d.url, d.width))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render the markup for a derivative set.
///
/// A single format yields one `<img>`; several formats yield a `<picture>`
/// with a `<source>` per non-fallback format. `src` points at the smallest
/// fallback variant and `width`/`height` describe the largest.
pub fn generate_html(set: &ImageDerivativeSet, attrs: &ImageAttributes) -> Markup {
    let Some(fallback) = set.fallback() else {
        return html! {};
    };
    let (Some(smallest), Some(largest)) = (fallback.variants.first(), fallback.variants.last())
    else {
        return html! {};
    };

    let sizes = (!attrs.sizes.is_empty()).then(|| attrs.sizes.join(", "));
    let img_srcset = (fallback.variants.len() > 1).then(|| srcset(fallback));

    let img = html! {
        img alt=(attrs.alt)
            src=(smallest.url)
            width=(largest.width)
            height=(largest.height)
            srcset=[img_srcset]
            sizes=[sizes.as_deref()]
            loading=(attrs.loading)
            decoding=(attrs.decoding);
    };

    if set.formats.len() == 1 {
        return img;
    }

    html! {
        picture {
            @for group in set.formats.iter().filter(|g| g.format != fallback.format) {
                source type=(group.format.mime_type()) srcset=(srcset(group)) sizes=[sizes.as_deref()];
            }
            (img)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagePolicy;
    use crate::imaging::{Dimensions, OutputFormat, plan_derivatives};

    fn set_for(formats: Vec<OutputFormat>, original: (u32, u32)) -> ImageDerivativeSet {
        let policy = ImagePolicy {
            formats,
            ..ImagePolicy::default()
        };
        let original = Dimensions {
            width: original.0,
            height: original.1,
        };
        ImageDerivativeSet {
            id: "0123456789".into(),
            original,
            formats: plan_derivatives("0123456789", original, &policy)
                .into_iter()
                .map(|(g, _)| g)
                .collect(),
        }
    }

    #[test]
    fn single_format_renders_lone_img() {
        let set = set_for(vec![OutputFormat::Jpeg], (1200, 900));
        let html = generate_html(&set, &ImageAttributes::lazy("Sunset")).into_string();

        assert_eq!(
            html,
            concat!(
                r#"<img alt="Sunset" src="/media/img/0123456789-300.jpeg" width="600" height="450" "#,
                r#"srcset="/media/img/0123456789-300.jpeg 300w, /media/img/0123456789-600.jpeg 600w" "#,
                r#"loading="lazy" decoding="async">"#
            )
        );
    }

    #[test]
    fn single_variant_has_no_srcset() {
        let set = set_for(vec![OutputFormat::Jpeg], (200, 100));
        let html = generate_html(&set, &ImageAttributes::lazy("small")).into_string();

        assert!(!html.contains("srcset"));
        assert!(html.contains(r#"src="/media/img/0123456789-200.jpeg""#));
        assert!(html.contains(r#"width="200" height="100""#));
    }

    #[test]
    fn sizes_emitted_only_when_given() {
        let set = set_for(vec![OutputFormat::Jpeg], (1200, 900));
        let mut attrs = ImageAttributes::lazy("x");
        assert!(!generate_html(&set, &attrs).into_string().contains("sizes="));

        attrs.sizes = vec!["(min-width: 800px) 50vw".into(), "100vw".into()];
        let html = generate_html(&set, &attrs).into_string();
        assert!(html.contains(r#"sizes="(min-width: 800px) 50vw, 100vw""#));
    }

    #[test]
    fn multiple_formats_render_picture_with_sources() {
        let set = set_for(vec![OutputFormat::Avif, OutputFormat::Jpeg], (1200, 900));
        let html = generate_html(&set, &ImageAttributes::lazy("x")).into_string();

        assert!(html.starts_with("<picture><source type=\"image/avif\""));
        assert!(html.contains("0123456789-600.avif 600w"));
        assert!(html.contains(r#"<img alt="x" src="/media/img/0123456789-300.jpeg""#));
        assert!(html.ends_with("</picture>"));
        assert!(!html.contains(r#"type="image/jpeg""#));
    }

    #[test]
    fn alt_text_is_escaped() {
        let set = set_for(vec![OutputFormat::Jpeg], (1200, 900));
        let html =
            generate_html(&set, &ImageAttributes::lazy(r#""><script>alert(1)</script>"#))
                .into_string();

        assert!(!html.contains("<script>"));
        assert!(html.contains("&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn lazy_attributes() {
        let attrs = ImageAttributes::lazy("a");
        assert_eq!(attrs.loading, "lazy");
        assert_eq!(attrs.decoding, "async");
        assert!(attrs.sizes.is_empty());
    }
}
