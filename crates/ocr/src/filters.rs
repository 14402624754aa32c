use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use std::io::Cursor;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{PreprocessVariant, VariantKind};

/// Rows processed between cooperative yields.
const CHUNK_ROWS: u32 = 64;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Size-derived filter parameters. Small crops get a larger adaptive bias and
/// a lower contrast threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    pub block_size: u32,
    pub bias: u8,
    pub contrast_threshold: u8,
    pub equalized_threshold: u8,
}

impl FilterParams {
    pub fn for_size(width: u32, height: u32) -> Self {
        let short_edge = width.min(height);
        let small = short_edge < 500 || height < 200;
        Self {
            block_size: (short_edge / 20).max(5),
            bias: if small { 10 } else { 5 },
            contrast_threshold: if small { 140 } else { 150 },
            equalized_threshold: 130,
        }
    }
}

/// `0.3R + 0.59G + 0.11B`, rounded.
pub fn luminance(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        let lum = 0.3 * r as f32 + 0.59 * g as f32 + 0.11 * b as f32;
        Luma([lum.round().clamp(0.0, 255.0) as u8])
    })
}

/// Per-filter state computed once over the whole image, then applied row by row.
enum Kernel {
    Adaptive { integral: Vec<u64>, stride: usize, block: u32, bias: f32 },
    Contrast { threshold: f32 },
    Equalized { lut: [u8; 256], threshold: u8 },
    Grayscale,
}

impl Kernel {
    fn prepare(kind: VariantKind, luma: &GrayImage, params: &FilterParams) -> Self {
        match kind {
            VariantKind::Adaptive => {
                let (integral, stride) = integral_image(luma);
                Kernel::Adaptive {
                    integral,
                    stride,
                    block: params.block_size,
                    bias: params.bias as f32,
                }
            }
            VariantKind::Contrast => Kernel::Contrast {
                threshold: params.contrast_threshold as f32,
            },
            VariantKind::Equalized => Kernel::Equalized {
                lut: equalization_lut(luma),
                threshold: params.equalized_threshold,
            },
            VariantKind::Grayscale => Kernel::Grayscale,
        }
    }

    fn fill_rows(&self, luma: &GrayImage, out: &mut GrayImage, rows: Range<u32>) {
        let (width, height) = luma.dimensions();
        for y in rows {
            for x in 0..width {
                let v = luma.get_pixel(x, y)[0];
                let white = match self {
                    Kernel::Adaptive { integral, stride, block, bias } => {
                        let mean = local_mean(integral, *stride, width, height, x, y, *block);
                        v as f32 >= mean - bias
                    }
                    // Compositing under 30% white: 0.7·lum + 0.3·255.
                    Kernel::Contrast { threshold } => 0.7 * v as f32 + 76.5 >= *threshold,
                    Kernel::Equalized { lut, threshold } => lut[v as usize] >= *threshold,
                    Kernel::Grayscale => {
                        out.put_pixel(x, y, Luma([v]));
                        continue;
                    }
                };
                out.put_pixel(x, y, Luma([if white { 255 } else { 0 }]));
            }
        }
    }
}

// Summed-area table with a zero row/column, (w+1)·(h+1) entries.
fn integral_image(luma: &GrayImage) -> (Vec<u64>, usize) {
    let (w, h) = (luma.width() as usize, luma.height() as usize);
    let stride = w + 1;
    let mut table = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += luma.get_pixel(x as u32, y as u32)[0] as u64;
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
        }
    }
    (table, stride)
}

fn local_mean(
    integral: &[u64],
    stride: usize,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    block: u32,
) -> f32 {
    let half = block / 2;
    let x0 = x.saturating_sub(half) as usize;
    let y0 = y.saturating_sub(half) as usize;
    let x1 = (x + half).min(width - 1) as usize + 1;
    let y1 = (y + half).min(height - 1) as usize + 1;
    let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
        - integral[y0 * stride + x1]
        - integral[y1 * stride + x0];
    let count = ((x1 - x0) * (y1 - y0)) as f32;
    sum as f32 / count
}

fn equalization_lut(luma: &GrayImage) -> [u8; 256] {
    let mut hist = [0u64; 256];
    for p in luma.pixels() {
        hist[p[0] as usize] += 1;
    }
    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (i, count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }
    let total = running;
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);

    let mut lut = [255u8; 256];
    if total == cdf_min {
        // Single-valued image: nothing to spread.
        return lut;
    }
    let range = (total - cdf_min) as f64;
    for (v, slot) in lut.iter_mut().enumerate() {
        let c = cdf[v].saturating_sub(cdf_min) as f64;
        *slot = (c * 255.0 / range).round() as u8;
    }
    lut
}

/// Produces the ordered set of binarized variants for a profile.
#[derive(Debug, Clone)]
pub struct FilterBank {
    kinds: Vec<VariantKind>,
}

impl FilterBank {
    pub fn new(kinds: Vec<VariantKind>) -> Self {
        Self { kinds }
    }

    /// Adaptive + contrast.
    pub fn standard() -> Self {
        Self::new(vec![VariantKind::Adaptive, VariantKind::Contrast])
    }

    /// Adaptive + contrast + histogram-equalized.
    pub fn food_label() -> Self {
        Self::new(vec![
            VariantKind::Adaptive,
            VariantKind::Contrast,
            VariantKind::Equalized,
        ])
    }

    pub fn kinds(&self) -> &[VariantKind] {
        &self.kinds
    }

    /// Blocking variant builder.
    pub fn build_variants(&self, image: &RgbaImage) -> Result<Vec<PreprocessVariant>, FilterError> {
        let luma = luminance(image);
        let params = FilterParams::for_size(image.width(), image.height());
        let variants = self
            .kinds
            .iter()
            .filter_map(|&kind| {
                let kernel = Kernel::prepare(kind, &luma, &params);
                let mut out = GrayImage::new(luma.width(), luma.height());
                kernel.fill_rows(&luma, &mut out, 0..luma.height());
                encode_variant(kind, out)
            })
            .collect();
        finish(variants, luma)
    }

    /// Same output as [`build_variants`](Self::build_variants), yielding to the
    /// runtime between row chunks so large images do not starve other tasks.
    pub async fn build_variants_async(
        &self,
        image: &RgbaImage,
    ) -> Result<Vec<PreprocessVariant>, FilterError> {
        let luma = luminance(image);
        tokio::task::yield_now().await;
        let params = FilterParams::for_size(image.width(), image.height());
        let height = luma.height();

        let mut variants = Vec::with_capacity(self.kinds.len());
        for &kind in &self.kinds {
            let kernel = Kernel::prepare(kind, &luma, &params);
            let mut out = GrayImage::new(luma.width(), height);
            let mut start = 0;
            while start < height {
                let end = (start + CHUNK_ROWS).min(height);
                kernel.fill_rows(&luma, &mut out, start..end);
                start = end;
                tokio::task::yield_now().await;
            }
            if let Some(variant) = encode_variant(kind, out) {
                variants.push(variant);
            }
        }
        finish(variants, luma)
    }
}

// Guarantees at least one variant: plain luminance when every filter failed.
fn finish(
    variants: Vec<PreprocessVariant>,
    luma: GrayImage,
) -> Result<Vec<PreprocessVariant>, FilterError> {
    if !variants.is_empty() {
        return Ok(variants);
    }
    tracing::warn!("all filters failed, falling back to grayscale");
    let (width, height) = luma.dimensions();
    let encoded = encode_png(luma)?;
    Ok(vec![PreprocessVariant {
        kind: VariantKind::Grayscale,
        width,
        height,
        encoded: encoded.into(),
    }])
}

fn encode_variant(kind: VariantKind, out: GrayImage) -> Option<PreprocessVariant> {
    let (width, height) = out.dimensions();
    match encode_png(out) {
        Ok(bytes) => Some(PreprocessVariant {
            kind,
            width,
            height,
            encoded: Arc::from(bytes),
        }),
        Err(e) => {
            tracing::warn!(variant = %kind, error = %e, "dropping variant");
            None
        }
    }
}

fn encode_png(img: GrayImage) -> Result<Vec<u8>, FilterError> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| FilterError::Encode(e.to_string()))?;
    Ok(buf)
}
