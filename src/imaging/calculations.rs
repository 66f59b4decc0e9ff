//! Pure calculation functions for derivative dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// A single derivative width to generate, with its aspect-preserving height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSize {
    pub width: u32,
    pub height: u32,
}

/// Calculate which widths to generate and their heights.
///
/// Widths larger than the original are skipped (no upscaling) and duplicates
/// are dropped; the result is sorted ascending. If every requested width
/// exceeds the original, the original width is used as the only entry.
///
/// # Examples
/// ```
/// # use immich_shortcodes::imaging::calculate_variant_sizes;
/// let sizes = calculate_variant_sizes((1200, 800), &[600, 300]);
/// assert_eq!(sizes[0].width, 300);
/// assert_eq!(sizes[0].height, 200);
/// assert_eq!(sizes[1].width, 600);
/// ```
pub fn calculate_variant_sizes(original: (u32, u32), widths: &[u32]) -> Vec<VariantSize> {
    let (orig_w, orig_h) = original;

    let mut targets: Vec<u32> = widths
        .iter()
        .copied()
        .filter(|&w| w > 0 && w <= orig_w)
        .collect();
    targets.sort_unstable();
    targets.dedup();

    if targets.is_empty() {
        return vec![VariantSize {
            width: orig_w,
            height: orig_h,
        }];
    }

    targets
        .into_iter()
        .map(|width| VariantSize {
            width,
            height: scaled_height(original, width),
        })
        .collect()
}

/// Height for `width` preserving the original aspect ratio (never below 1px).
fn scaled_height((orig_w, orig_h): (u32, u32), width: u32) -> u32 {
    if orig_w == 0 {
        return orig_h;
    }
    let h = (orig_h as f64 * width as f64 / orig_w as f64).round() as u32;
    h.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_keeps_aspect_ratio() {
        let sizes = calculate_variant_sizes((4000, 3000), &[300, 600]);
        assert_eq!(
            sizes,
            vec![
                VariantSize {
                    width: 300,
                    height: 225
                },
                VariantSize {
                    width: 600,
                    height: 450
                },
            ]
        );
    }

    #[test]
    fn portrait_keeps_aspect_ratio() {
        let sizes = calculate_variant_sizes((3000, 4000), &[300]);
        assert_eq!(sizes[0].height, 400);
    }

    #[test]
    fn skips_widths_larger_than_original() {
        let sizes = calculate_variant_sizes((500, 500), &[300, 600]);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].width, 300);
    }

    #[test]
    fn falls_back_to_original_when_all_too_large() {
        let sizes = calculate_variant_sizes((200, 100), &[300, 600]);
        assert_eq!(
            sizes,
            vec![VariantSize {
                width: 200,
                height: 100
            }]
        );
    }

    #[test]
    fn exact_original_width_is_kept() {
        let sizes = calculate_variant_sizes((600, 400), &[300, 600]);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[1].width, 600);
        assert_eq!(sizes[1].height, 400);
    }

    #[test]
    fn sorts_and_dedups_requested_widths() {
        let sizes = calculate_variant_sizes((2000, 1000), &[600, 300, 600]);
        let widths: Vec<u32> = sizes.iter().map(|s| s.width).collect();
        assert_eq!(widths, vec![300, 600]);
    }

    #[test]
    fn extreme_panorama_height_never_zero() {
        let sizes = calculate_variant_sizes((10_000, 10), &[300]);
        assert_eq!(sizes[0].height, 1);
    }
}
