//! Derivative generation: plan the variants of a source image, encode the
//! ones that are not on disk yet, and describe where they ended up.
//!
//! ## Content addressing
//!
//! Output files are named `{id}-{width}.{ext}`, where `id` is the first 10
//! hex digits of a SHA-256 over the source bytes and the encoding quality.
//! The same original therefore always maps to the same files, whichever
//! album or page it is rendered from, and a second render of an unchanged
//! asset finds every file present and skips decoding entirely.
//!
//! Files are written to a temporary name and renamed into place, so two
//! concurrent renders of the same asset never expose a half-written file.

use super::backend::{Dimensions, ImageBackend, ImageError};
use super::calculations::calculate_variant_sizes;
use super::params::{OutputFormat, Quality, ResizeParams};
use crate::config::ImagePolicy;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Length of the content-addressed id used in derivative filenames.
const ID_LEN: usize = 10;

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub filename: String,
    /// Location on disk, under the policy's `output_dir`.
    pub path: PathBuf,
    /// Public URL, under the policy's `url_path`.
    pub url: String,
}

/// All widths generated for one format, smallest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatVariants {
    pub format: OutputFormat,
    pub variants: Vec<Derivative>,
}

/// Every derivative of one source image, grouped by format in policy order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDerivativeSet {
    pub id: String,
    pub original: Dimensions,
    pub formats: Vec<FormatVariants>,
}

impl ImageDerivativeSet {
    /// The format used for the `<img>` element itself: JPEG when generated,
    /// then PNG, otherwise the last configured format.
    pub fn fallback(&self) -> Option<&FormatVariants> {
        [OutputFormat::Jpeg, OutputFormat::Png]
            .iter()
            .find_map(|wanted| self.formats.iter().find(|f| f.format == *wanted))
            .or_else(|| self.formats.last())
    }

    pub fn all(&self) -> impl Iterator<Item = &Derivative> {
        self.formats.iter().flat_map(|f| f.variants.iter())
    }
}

/// Content-addressed id for a source image at a given quality.
pub fn derivative_id(source: &[u8], quality: Quality) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"derivative\0");
    hasher.update(source);
    hasher.update(quality.value().to_le_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(ID_LEN);
    hex
}

fn public_url(url_path: &str, filename: &str) -> String {
    format!("{}/{}", url_path.trim_end_matches('/'), filename)
}

/// Plan every derivative for a source of the given dimensions.
///
/// Pure: no I/O, no encoding. Returns each file alongside the parameters
/// needed to produce it, grouped by format in policy order.
pub fn plan_derivatives(
    id: &str,
    original: Dimensions,
    policy: &ImagePolicy,
) -> Vec<(FormatVariants, Vec<ResizeParams>)> {
    let sizes = calculate_variant_sizes((original.width, original.height), &policy.widths);
    let quality = Quality::new(policy.quality);

    policy
        .formats
        .iter()
        .map(|&format| {
            let (variants, params): (Vec<Derivative>, Vec<ResizeParams>) = sizes
                .iter()
                .map(|size| {
                    let filename = format!("{}-{}.{}", id, size.width, format.extension());
                    let derivative = Derivative {
                        format,
                        width: size.width,
                        height: size.height,
                        path: policy.output_dir.join(&filename),
                        url: public_url(&policy.url_path, &filename),
                        filename,
                    };
                    let params = ResizeParams {
                        width: size.width,
                        height: size.height,
                        format,
                        quality,
                    };
                    (derivative, params)
                })
                .unzip();
            (FormatVariants { format, variants }, params)
        })
        .collect()
}

/// Generate (or reuse) every derivative of `source` according to `policy`.
pub fn generate_derivatives(
    backend: &dyn ImageBackend,
    source: &[u8],
    policy: &ImagePolicy,
) -> Result<ImageDerivativeSet, ImageError> {
    let original = backend.identify(source)?;
    let id = derivative_id(source, Quality::new(policy.quality));
    let plan = plan_derivatives(&id, original, policy);

    let (targets, params): (Vec<&Derivative>, Vec<ResizeParams>) = plan
        .iter()
        .flat_map(|(group, params)| group.variants.iter().zip(params.iter().copied()))
        .filter(|(derivative, _)| !derivative.path.exists())
        .unzip();

    if targets.is_empty() {
        debug!(id = %id, "derivatives already on disk");
    } else {
        std::fs::create_dir_all(&policy.output_dir)?;
        let encoded = backend.resize(source, &params)?;
        for (derivative, bytes) in targets.iter().zip(encoded) {
            write_atomic(&derivative.path, &bytes)?;
        }
        debug!(id = %id, written = targets.len(), "derivatives encoded");
    }

    Ok(ImageDerivativeSet {
        id,
        original,
        formats: plan.into_iter().map(|(group, _)| group).collect(),
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}-{}.tmp", std::process::id(), seq));
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

/// Shared handle that runs derivative generation off the async executor.
#[derive(Clone)]
pub struct ImageDeriver {
    backend: Arc<dyn ImageBackend>,
    policy: Arc<ImagePolicy>,
}

impl ImageDeriver {
    pub fn new(backend: Arc<dyn ImageBackend>, policy: ImagePolicy) -> Self {
        Self {
            backend,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &ImagePolicy {
        &self.policy
    }

    /// Generate derivatives on the blocking thread pool.
    pub async fn derive(&self, source: Bytes) -> Result<ImageDerivativeSet, ImageError> {
        let backend = Arc::clone(&self.backend);
        let policy = Arc::clone(&self.policy);
        tokio::task::spawn_blocking(move || generate_derivatives(backend.as_ref(), &source, &policy))
            .await
            .map_err(|e| ImageError::ProcessingFailed(format!("image task failed: {e}")))?
    }
}
