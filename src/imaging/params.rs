//! Parameter types for image operations.
//!
//! These structs describe *what* to encode, not *how*. They are the interface
//! between [`derivatives`](super::derivatives), which plans the variants of a
//! source image, and the [`backend`](super::backend), which does the pixel
//! work. A mock backend can therefore stand in for tests.
//!
//! ## Types
//!
//! - [`OutputFormat`]: Encoded format of a derivative (JPEG by default).
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`ResizeParams`]: One variant: target dimensions, format, quality.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded format of a generated derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl OutputFormat {
    /// File extension used for generated files.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    /// MIME type for `<source type=...>`.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Parameters for encoding one resized variant of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: Quality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn format_names_accept_jpg_alias() {
        let formats: Vec<OutputFormat> =
            serde_json::from_str(r#"["jpeg", "jpg", "webp", "avif", "png"]"#).unwrap();
        assert_eq!(
            formats,
            vec![
                OutputFormat::Jpeg,
                OutputFormat::Jpeg,
                OutputFormat::Webp,
                OutputFormat::Avif,
                OutputFormat::Png
            ]
        );
    }

    #[test]
    fn format_extension_and_mime() {
        assert_eq!(OutputFormat::Jpeg.extension(), "jpeg");
        assert_eq!(OutputFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(OutputFormat::Avif.to_string(), "avif");
    }
}
