//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every backend must
//! support: identify and resize. Both work on in-memory bytes, because the
//! originals arrive over HTTP and never touch the content directory.
//!
//! The production implementation,
//! [`RustBackend`](super::rust_backend::RustBackend), is pure Rust and
//! statically linked.

use super::params::ResizeParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode {format}: {reason}")]
    Encode { format: String, reason: String },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
pub trait ImageBackend: Send + Sync {
    /// Read image dimensions from the header, without a full decode.
    fn identify(&self, source: &[u8]) -> Result<Dimensions, ImageError>;

    /// Decode `source` once and encode one output per entry in `variants`,
    /// returned in the same order.
    fn resize(&self, source: &[u8], variants: &[ResizeParams]) -> Result<Vec<Vec<u8>>, ImageError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::{OutputFormat, Quality};
    use std::sync::Mutex;

    /// Mock backend that records operations without decoding anything.
    /// Every source is reported as `dimensions`; encoded outputs are short
    /// descriptive byte strings.
    pub struct MockBackend {
        pub dimensions: Dimensions,
        pub fail_decode: bool,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify { len: usize },
        Resize {
            width: u32,
            height: u32,
            format: OutputFormat,
            quality: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::with_dimensions(4000, 3000)
        }

        pub fn with_dimensions(width: u32, height: u32) -> Self {
            Self {
                dimensions: Dimensions { width, height },
                fail_decode: false,
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_decode: true,
                ..Self::new()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn resize_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Resize { .. }))
                .count()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, source: &[u8]) -> Result<Dimensions, ImageError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify { len: source.len() });
            if self.fail_decode {
                return Err(ImageError::Decode("mock: not an image".into()));
            }
            Ok(self.dimensions)
        }

        fn resize(
            &self,
            _source: &[u8],
            variants: &[ResizeParams],
        ) -> Result<Vec<Vec<u8>>, ImageError> {
            if self.fail_decode {
                return Err(ImageError::Decode("mock: not an image".into()));
            }
            let mut ops = self.operations.lock().unwrap();
            Ok(variants
                .iter()
                .map(|v| {
                    ops.push(RecordedOp::Resize {
                        width: v.width,
                        height: v.height,
                        format: v.format,
                        quality: v.quality.value(),
                    });
                    format!("{}x{}.{}", v.width, v.height, v.format).into_bytes()
                })
                .collect())
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_dimensions(800, 600);

        let dims = backend.identify(b"abcd").unwrap();
        assert_eq!(dims, Dimensions { width: 800, height: 600 });

        let ops = backend.get_operations();
        assert_eq!(ops, vec![RecordedOp::Identify { len: 4 }]);
    }

    #[test]
    fn mock_records_resize_in_order() {
        let backend = MockBackend::new();
        let outputs = backend
            .resize(
                b"src",
                &[
                    ResizeParams {
                        width: 300,
                        height: 225,
                        format: OutputFormat::Jpeg,
                        quality: Quality::new(80),
                    },
                    ResizeParams {
                        width: 600,
                        height: 450,
                        format: OutputFormat::Jpeg,
                        quality: Quality::new(80),
                    },
                ],
            )
            .unwrap();

        assert_eq!(outputs[0], b"300x225.jpeg");
        assert_eq!(outputs[1], b"600x450.jpeg");
        assert_eq!(backend.resize_count(), 2);
    }

    #[test]
    fn failing_mock_reports_decode_error() {
        let backend = MockBackend::failing();
        assert!(matches!(
            backend.identify(b"junk"),
            Err(ImageError::Decode(_))
        ));
    }
}
