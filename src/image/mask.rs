//! Alpha classification and pick masks.
//!
//! Both work on raw client pixel data. [`analyze_alpha`] decides whether an
//! alpha channel is binary enough to be drawn with an alpha test instead of
//! blending. [`PickMask`] keeps one bit per 2×2 block so hit tests against
//! translucent sprites don't need the pixels.

use std::sync::Once;

use log::warn;

use crate::config::AlphaMaskTuning;

const BUCKETS: usize = 16;

/// Result of [`analyze_alpha`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaAnalysis {
    /// The alpha channel is effectively binary.
    pub is_mask: bool,
    /// Fraction of pixels with alpha strictly between the mid bounds.
    pub mid_percentile: f32,
    /// Error of treating the image as a 1-bit mask, `f32::MAX` when the
    /// alpha range doesn't span 0 to 255.
    pub rmse: f32,
}

impl Default for AlphaAnalysis {
    fn default() -> Self {
        Self {
            is_mask: false,
            mid_percentile: 1.0,
            rmse: 1.0,
        }
    }
}

struct Histogram<'t> {
    tuning: &'t AlphaMaskTuning,
    sample: [u32; BUCKETS],
    total: u64,
    min: u32,
    max: u32,
    mids: u32,
    sum: f64,
}

impl Histogram<'_> {
    fn add(&mut self, alpha: u32) {
        self.total += u64::from(alpha);
        self.sample[(alpha / 16) as usize] += 1;
        self.track(alpha);
    }

    fn track(&mut self, alpha: u32) {
        self.min = self.min.min(alpha);
        self.max = self.max.max(alpha);
        let (low, high) = (u32::from(self.tuning.mid_low), u32::from(self.tuning.mid_high));
        if alpha > low && alpha < high {
            self.mids += 1;
        }
    }

    fn add_error(&mut self, avg: u32, weight: f64, length: f64) {
        let mut avg = f64::from(avg);
        if avg >= 128.0 {
            avg -= 255.0;
        }
        self.sum += avg * avg * weight / length;
    }

    fn bucket_total(&self, range: std::ops::Range<usize>) -> u64 {
        self.sample
            .get(range)
            .map_or(0, |buckets| buckets.iter().map(|&n| u64::from(n)).sum())
    }
}

/// Classify the alpha channel of a `width`×`height` image.
///
/// `offset` is the byte offset of alpha within a pixel and `stride` the
/// pixel size. Images with even sides of at least 2 also histogram a 2×2
/// box-filtered copy, which skews aliasing-prone high-frequency alpha
/// towards the mid range. Smaller or odd images are analysed per pixel.
///
/// This is a pure function of its inputs.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn analyze_alpha(
    data: &[u8],
    width: u32,
    height: u32,
    offset: usize,
    stride: usize,
    tuning: &AlphaMaskTuning,
) -> AlphaAnalysis {
    let (w, h) = (width as usize, height as usize);
    let pixels = w * h;
    if pixels == 0 || stride == 0 {
        return AlphaAnalysis::default();
    }
    let alpha = |pixel: usize| data.get(offset + pixel * stride).copied().map_or(0, u32::from);

    let mut hist = Histogram {
        tuning,
        sample: [0; BUCKETS],
        total: 0,
        min: 255,
        max: 0,
        mids: 0,
        sum: 0.0,
    };
    let mut length = pixels as u64;

    if w >= 2 && h >= 2 && w % 2 == 0 && h % 2 == 0 {
        let len = length as f64;
        for y in (0..h).step_by(2) {
            for x in (0..w).step_by(2) {
                let top = y * w + x;
                let block = [alpha(top), alpha(top + w), alpha(top + 1), alpha(top + w + 1)];
                for &s in &block {
                    hist.add(s);
                }
                let block_sum: u32 = block.iter().sum();
                hist.total += u64::from(block_sum);
                hist.sample[(block_sum / (16 * 4)) as usize] += 4;
                hist.add_error(block_sum / 4, 4.0, len);
            }
        }
        // every pixel was counted once raw and once box filtered
        length *= 2;
    } else {
        let len = length as f64;
        for i in 0..pixels {
            let s1 = alpha(i);
            hist.add(s1);
            if i % 2 == 0 && i + 1 < pixels {
                let s2 = alpha(i + 1);
                hist.track(s2);
                hist.add_error((s1 + s2) / 2, 2.0, len);
            }
        }
    }

    let (mid_start, mid_end) = tuning.midrange_buckets;
    let midrange = hist.bucket_total(mid_start..mid_end);
    let lower = hist.bucket_total(0..BUCKETS / 2);
    let upper = hist.bucket_total(BUCKETS / 2..BUCKETS);
    let divisor = u64::from(tuning.midrange_divisor.max(1));

    let is_mask = !(midrange > length / divisor
        || (lower == length && hist.total != 0)
        || (upper == length && hist.total != 255 * length));

    let rmse = if (hist.max.saturating_sub(hist.min)) % 255 == 0 {
        (hist.sum.sqrt() / 255.0) as f32
    } else {
        f32::MAX
    };

    AlphaAnalysis {
        is_mask,
        mid_percentile: hist.mids as f32 / pixels as f32,
        rmse,
    }
}

static NON_FINITE_PICK: Once = Once::new();
static OUT_OF_RANGE_PICK: Once = Once::new();

/// Half resolution, bit packed opacity map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickMask {
    bits: Vec<u8>,
    width: u32,
    height: u32,
}

impl PickMask {
    /// Sample the alpha of every 2×2 block's first pixel from tightly
    /// packed RGBA8 `pixels`.
    #[must_use]
    pub fn build(width: u32, height: u32, pixels: &[u8], threshold: u8) -> Self {
        let pick_width = width / 2 + 1;
        let pick_height = height / 2 + 1;
        let size = (pick_width as usize * pick_height as usize).div_ceil(8);
        let mut bits = vec![0u8; size];

        let (w, h) = (width as usize, height as usize);
        let mut bit = 0usize;
        for y in (0..h).step_by(2) {
            for x in (0..w).step_by(2) {
                let alpha = pixels.get((y * w + x) * 4 + 3).copied().unwrap_or(0);
                if alpha > threshold {
                    if let Some(byte) = bits.get_mut(bit / 8) {
                        *byte |= 1 << (bit % 8);
                    }
                }
                bit += 1;
            }
        }

        Self {
            bits,
            width: pick_width - 1,
            height: pick_height - 1,
        }
    }

    /// Mask width in blocks.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height in blocks.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the block under texture coordinate `(u, v)` is opaque.
    ///
    /// Coordinates wrap, so only the fractional part matters.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn contains(&self, u: f32, v: f32) -> bool {
        let (mut u, mut v) = if u.is_finite() && v.is_finite() {
            (u - u.floor(), v - v.floor())
        } else {
            NON_FINITE_PICK.call_once(|| warn!(target: "ImageGL", "non-finite u/v in mask pick"));
            (0.0, 0.0)
        };
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            OUT_OF_RANGE_PICK.call_once(|| warn!(target: "ImageGL", "u/v out of range in mask pick"));
            u = 0.0;
            v = 0.0;
        }

        let x = ((u * self.width as f32).floor() as u32).min(self.width);
        let y = ((v * self.height as f32).floor() as u32).min(self.height);
        let index = y as usize * self.width as usize + x as usize;
        self.bits
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rgba(width: u32, height: u32, alpha: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[255, 0, 0, alpha(x, y)]);
            }
        }
        data
    }

    fn classify(data: &[u8], width: u32, height: u32) -> AlphaAnalysis {
        analyze_alpha(data, width, height, 3, 4, &AlphaMaskTuning::default())
    }

    #[test]
    fn hard_edged_alpha_is_a_mask() {
        let data = rgba(16, 16, |x, _| if x < 8 { 0 } else { 255 });
        let analysis = classify(&data, 16, 16);
        assert!(analysis.is_mask);
        assert_eq!(analysis.mid_percentile, 0.0);
        assert!(analysis.rmse < f32::MAX);
    }

    #[test]
    fn gradient_alpha_is_not_a_mask() {
        let data = rgba(16, 16, |x, y| u8::try_from((x + y * 16) % 256).unwrap());
        assert!(!classify(&data, 16, 16).is_mask);
    }

    #[test]
    fn uniform_translucency_is_not_a_mask() {
        // all samples in the lower half without being fully transparent
        let data = rgba(4, 4, |_, _| 10);
        assert!(!classify(&data, 4, 4).is_mask);
        // fully transparent is fine
        let data = rgba(4, 4, |_, _| 0);
        assert!(classify(&data, 4, 4).is_mask);
    }

    #[test]
    fn single_pixel_images_skip_box_sampling() {
        let data = [0, 0, 0, 255];
        let analysis = classify(&data, 1, 1);
        assert!(analysis.is_mask);
        let data = [0, 0, 0, 128];
        assert!(!classify(&data, 1, 1).is_mask);
    }

    #[test]
    fn analysis_is_deterministic() {
        let data = rgba(8, 6, |x, y| u8::try_from((x * 37 + y * 91) % 256).unwrap());
        let first = classify(&data, 8, 6);
        for _ in 0..4 {
            assert_eq!(classify(&data, 8, 6), first);
        }
    }

    #[test]
    fn opaque_mask_hits_everywhere() {
        let data = rgba(8, 8, |_, _| 255);
        let mask = PickMask::build(8, 8, &data, 32);
        assert_eq!((mask.width(), mask.height()), (4, 4));
        for i in 0..10 {
            for j in 0..10 {
                assert!(mask.contains(i as f32 / 10.0, j as f32 / 10.0));
            }
        }
    }

    #[test]
    fn transparent_mask_misses_everywhere() {
        let data = rgba(8, 8, |_, _| 0);
        let mask = PickMask::build(8, 8, &data, 32);
        for i in 0..10 {
            for j in 0..10 {
                assert!(!mask.contains(i as f32 / 10.0, j as f32 / 10.0));
            }
        }
    }

    #[test]
    fn coordinates_wrap_and_survive_nan() {
        let data = rgba(8, 8, |x, _| if x < 4 { 255 } else { 0 });
        let mask = PickMask::build(8, 8, &data, 32);
        assert!(mask.contains(0.1, 0.5));
        assert!(mask.contains(1.1, -0.5));
        assert!(!mask.contains(0.9, 0.5));
        assert!(mask.contains(f32::NAN, 0.5));
    }
}
