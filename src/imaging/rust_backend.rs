//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageDecoder::dimensions` + `orientation` (header only) |
//! | Decode (JPEG, PNG, TIFF, WebP) | `DynamicImage::from_decoder` + `apply_orientation` |
//! | Resize | `image::imageops::resize` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` with quality |
//! | Encode → PNG / WebP | `image` encoders (lossless) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//!
//! Camera originals usually store pixels in sensor order with an EXIF
//! Orientation tag. Both identify and decode honour that tag, so reported
//! dimensions and encoded pixels are upright. Derivatives carry no EXIF.
//!
//! Variants of one source are encoded in parallel with rayon.

use super::backend::{Dimensions, ImageBackend, ImageError};
use super::params::{OutputFormat, ResizeParams};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use rayon::prelude::*;
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reader(source: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, ImageError> {
    let reader = ImageReader::new(Cursor::new(source)).with_guessed_format()?;
    match reader.format() {
        Some(_) => Ok(reader),
        None => Err(ImageError::Decode("unrecognised image format".into())),
    }
}

fn decode_err(e: image::ImageError) -> ImageError {
    ImageError::Decode(e.to_string())
}

/// EXIF orientation of the source; unreadable metadata counts as upright.
fn orientation(decoder: &mut impl ImageDecoder) -> Orientation {
    decoder.orientation().unwrap_or(Orientation::NoTransforms)
}

/// Whether applying `orientation` swaps width and height.
fn swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

/// Decode an in-memory image, upright.
fn load_image(source: &[u8]) -> Result<DynamicImage, ImageError> {
    let mut decoder = reader(source)?.into_decoder().map_err(decode_err)?;
    let orientation = orientation(&mut decoder);
    let mut img = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Encode a DynamicImage to bytes in the requested format.
fn encode(img: &DynamicImage, format: OutputFormat, quality: u32) -> Result<Vec<u8>, ImageError> {
    let encode_err = |e: image::ImageError| ImageError::Encode {
        format: format.to_string(),
        reason: e.to_string(),
    };
    let mut out = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality as u8);
            rgb.write_with_encoder(encoder).map_err(encode_err)?;
        }
        OutputFormat::Avif => {
            let encoder =
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut out, 6, quality as u8);
            img.write_with_encoder(encoder).map_err(encode_err)?;
        }
        OutputFormat::Png => img
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(encode_err)?,
        OutputFormat::Webp => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)
            .map_err(encode_err)?,
    }
    Ok(out)
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &[u8]) -> Result<Dimensions, ImageError> {
        let mut decoder = reader(source)?.into_decoder().map_err(decode_err)?;
        let (width, height) = decoder.dimensions();
        Ok(if swaps_axes(orientation(&mut decoder)) {
            Dimensions {
                width: height,
                height: width,
            }
        } else {
            Dimensions { width, height }
        })
    }

    fn resize(&self, source: &[u8], variants: &[ResizeParams]) -> Result<Vec<Vec<u8>>, ImageError> {
        let img = load_image(source)?;
        variants
            .par_iter()
            .map(|params| {
                let resized = if params.width == img.width() && params.height == img.height() {
                    img.clone()
                } else {
                    img.resize_exact(params.width, params.height, FilterType::Lanczos3)
                };
                encode(&resized, params.format, params.quality.value())
            })
            .collect()
    }
}
