use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::digest;
use crate::recognizer::OcrBackend;

/// Longest edge of the copy handed to orientation detection.
const ORIENTATION_PROBE_MAX: u32 = 1000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Pixel buffer of {len} bytes does not match {width}x{height} RGBA")]
    PixelSize { width: u32, height: u32, len: usize },
    #[error("Image has no pixels")]
    Empty,
    #[error("Image decode was interrupted: {0}")]
    Interrupted(String),
    #[error("Could not fetch image from {url}: {reason}")]
    Fetch { url: String, reason: String },
}

/// Anything that can be decoded to pixels.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Decoded(DynamicImage),
    /// Raw RGBA surface, row-major.
    Pixels { width: u32, height: u32, rgba: Vec<u8> },
    /// Encoded PNG / JPEG / WEBP / … bytes.
    Encoded(Vec<u8>),
    /// `data:image/...;base64,` URI, or bare base64.
    DataUri(String),
    Path(PathBuf),
    /// `http://` or `https://` address of an encoded image.
    Url(String),
}

impl ImageSource {
    /// Download a [`ImageSource::Url`] into [`ImageSource::Encoded`] bytes.
    /// Every other source is returned unchanged.
    pub async fn fetched(self) -> Result<Self, DecodeError> {
        match self {
            ImageSource::Url(url) => Ok(ImageSource::Encoded(fetch(&url).await?)),
            other => Ok(other),
        }
    }
}

async fn fetch(url: &str) -> Result<Vec<u8>, DecodeError> {
    let fail = |reason: String| DecodeError::Fetch { url: url.to_string(), reason };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(fail("only http and https addresses are supported".into()));
    }
    let http = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| fail(e.to_string()))?;
    let response = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| fail(e.to_string()))?;
    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    tracing::debug!(url, len = bytes.len(), "fetched image");
    Ok(bytes.to_vec())
}

/// Decoded, bounded and upright image ready for filtering.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: RgbaImage,
    pub original_width: u32,
    pub original_height: u32,
    /// Clockwise rotation applied, in degrees.
    pub rotation: f32,
    /// Digest of the source, used to correlate log lines.
    pub scan_id: String,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_dimension: u32,
    detect_orientation: bool,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self { max_dimension: 1500, detect_orientation: true }
    }
}

impl ImageNormalizer {
    pub fn new(max_dimension: u32, detect_orientation: bool) -> Self {
        Self { max_dimension: max_dimension.max(1), detect_orientation }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Decode, bound and (when enabled) rotate upright.
    pub async fn normalize<R>(
        &self,
        source: ImageSource,
        backend: &Arc<R>,
    ) -> Result<NormalizedImage, DecodeError>
    where
        R: OcrBackend + ?Sized + 'static,
    {
        let normalized = self.decode_and_fit(source).await?;
        Ok(self.orient(normalized, backend).await)
    }

    /// Rotate upright using the backend's orientation estimate. A no-op when
    /// detection is disabled or fails.
    pub async fn orient<R>(&self, mut normalized: NormalizedImage, backend: &Arc<R>) -> NormalizedImage
    where
        R: OcrBackend + ?Sized + 'static,
    {
        if !self.detect_orientation {
            return normalized;
        }
        let angle = detect_angle(&normalized.image, backend).await;
        if angle != 0.0 {
            tracing::info!(scan_id = %normalized.scan_id, angle, "correcting orientation");
            normalized.image = rotate(&normalized.image, angle);
            normalized.rotation = angle;
        }
        normalized
    }

    /// Decode on the blocking pool and scale down to the edge bound.
    pub async fn decode_and_fit(&self, source: ImageSource) -> Result<NormalizedImage, DecodeError> {
        let max = self.max_dimension;
        let source = source.fetched().await?;
        tokio::task::spawn_blocking(move || {
            let (img, scan_id) = decode(source)?;
            let (original_width, original_height) = (img.width(), img.height());
            if original_width == 0 || original_height == 0 {
                return Err(DecodeError::Empty);
            }
            let image = fit_within(img.into_rgba8(), max);
            tracing::debug!(
                scan_id = %scan_id,
                original_width,
                original_height,
                width = image.width(),
                height = image.height(),
                "decoded image"
            );
            Ok(NormalizedImage {
                image,
                original_width,
                original_height,
                rotation: 0.0,
                scan_id,
            })
        })
        .await
        .map_err(|e| DecodeError::Interrupted(e.to_string()))?
    }
}

fn decode(source: ImageSource) -> Result<(DynamicImage, String), DecodeError> {
    match source {
        ImageSource::Decoded(img) => {
            let id = digest::scan_id(img.as_bytes());
            Ok((img, id))
        }
        ImageSource::Pixels { width, height, rgba } => {
            let id = digest::scan_id(&rgba);
            let len = rgba.len();
            let buf = RgbaImage::from_raw(width, height, rgba)
                .filter(|_| len as u64 == width as u64 * height as u64 * 4)
                .ok_or(DecodeError::PixelSize { width, height, len })?;
            Ok((DynamicImage::ImageRgba8(buf), id))
        }
        ImageSource::Encoded(bytes) => {
            let id = digest::scan_id(&bytes);
            Ok((image::load_from_memory(&bytes)?, id))
        }
        ImageSource::DataUri(uri) => {
            let bytes = decode_data_uri(&uri)?;
            let id = digest::scan_id(&bytes);
            Ok((image::load_from_memory(&bytes)?, id))
        }
        ImageSource::Path(path) => {
            let bytes = std::fs::read(&path)
                .map_err(|e| DecodeError::Image(image::ImageError::IoError(e)))?;
            let id = digest::scan_id(&bytes);
            Ok((image::load_from_memory(&bytes)?, id))
        }
        ImageSource::Url(url) => Err(DecodeError::Fetch {
            url,
            reason: "address was not fetched before decoding".into(),
        }),
    }
}

/// Strip an optional `data:...;base64,` prefix and decode the payload.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match uri.split_once("base64,") {
        Some((_, rest)) => rest,
        None => uri,
    };
    base64::engine::general_purpose::STANDARD.decode(payload.trim())
}

/// Target dimensions for an image bounded to `max` on its longest edge.
pub fn fitted_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = (max as f64 / width as f64).min(max as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, max);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max);
    (w, h)
}

fn fit_within(img: RgbaImage, max: u32) -> RgbaImage {
    let (w, h) = fitted_dimensions(img.width(), img.height(), max);
    if (w, h) == img.dimensions() {
        img
    } else {
        imageops::resize(&img, w, h, FilterType::Triangle)
    }
}

// Orientation failures of any kind mean "leave it as is".
async fn detect_angle<R>(image: &RgbaImage, backend: &Arc<R>) -> f32
where
    R: OcrBackend + ?Sized + 'static,
{
    let probe = fit_within(image.clone(), ORIENTATION_PROBE_MAX);
    let mut bytes = Vec::new();
    if let Err(e) = DynamicImage::ImageRgba8(probe)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
    {
        tracing::debug!(error = %e, "could not encode orientation probe");
        return 0.0;
    }

    let backend = Arc::clone(backend);
    match tokio::task::spawn_blocking(move || backend.detect_orientation(&bytes)).await {
        Ok(Ok(orientation)) if orientation.angle.is_finite() => {
            orientation.angle.rem_euclid(360.0)
        }
        Ok(Ok(_)) => 0.0,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "orientation detection failed, keeping image as is");
            0.0
        }
        Err(e) => {
            tracing::debug!(error = %e, "orientation detection aborted");
            0.0
        }
    }
}

/// Rotate clockwise by `angle` degrees. Right angles are exact and swap
/// dimensions for 90/270; anything else rotates about the center on white.
pub fn rotate(image: &RgbaImage, angle: f32) -> RgbaImage {
    let angle = angle.rem_euclid(360.0);
    if angle == 90.0 {
        imageops::rotate90(image)
    } else if angle == 180.0 {
        imageops::rotate180(image)
    } else if angle == 270.0 {
        imageops::rotate270(image)
    } else if angle == 0.0 {
        image.clone()
    } else {
        rotate_about_center(
            image,
            angle.to_radians(),
            Interpolation::Bilinear,
            Rgba([255, 255, 255, 255]),
        )
    }
}
