//! Image processing: pure Rust, in memory.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Resize → JPEG/PNG/WebP/AVIF** | Lanczos3 + `image` encoders |
//! | **Content addressing** | SHA-256 over source bytes + quality |
//! | **Markup** | maud `<img>` / `<picture>` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Derivatives**: Planning, encoding and reuse of the files on disk
//! - **HTML**: Responsive markup for a derivative set

pub mod backend;
mod calculations;
pub mod derivatives;
pub mod html;
mod params;
pub mod rust_backend;

pub use backend::{Dimensions, ImageBackend, ImageError};
pub use calculations::{VariantSize, calculate_variant_sizes};
pub use derivatives::{
    Derivative, FormatVariants, ImageDerivativeSet, ImageDeriver, derivative_id,
    generate_derivatives, plan_derivatives,
};
pub use html::{ImageAttributes, NO_DESCRIPTION_ALT, generate_html};
pub use params::{OutputFormat, Quality, ResizeParams};
pub use rust_backend::RustBackend;
