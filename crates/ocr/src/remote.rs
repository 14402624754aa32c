use base64::Engine as _;
use glutenscan_ingredients::TextNormalizer;
use image::codecs::jpeg::JpegEncoder;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::ScanError;
use crate::preprocess::{ImageNormalizer, ImageSource};
use crate::progress::{Progress, ProgressSink, ScanStage};

const JPEG_QUALITY: u8 = 90;
const GENERIC_FAILURE: &str = "Failed to connect to OCR server";

/// Body of `POST /api/ocr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRequest {
    /// Base64 image, optionally with a `data:image/...;base64,` prefix.
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrResponse {
    pub fn ok(text: impl Into<String>, confidence: f32) -> Self {
        Self { success: true, text: Some(text.into()), confidence: Some(confidence), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, text: None, confidence: None, error: Some(error.into()) }
    }
}

/// Text recognized by the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteText {
    pub text: String,
    pub confidence: f32,
}

/// Client for a server exposing `POST /api/ocr`.
#[derive(Debug, Clone)]
pub struct RemoteOcrClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RemoteOcrClient {
    /// `base_url` is the server root, e.g. `http://localhost:5000`.
    pub fn new(base_url: &str) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ScanError::Remote(format!("{GENERIC_FAILURE}: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/ocr", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn recognize(&self, image: &RgbaImage) -> Result<RemoteText, ScanError> {
        let jpeg = encode_jpeg(image)?;
        let body = OcrRequest {
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScanError::Remote(format!("{GENERIC_FAILURE}: {e}")))?;
        let status = response.status();
        // Error responses still carry a JSON body with the reason.
        let parsed: OcrResponse = response.json().await.map_err(|e| {
            ScanError::Remote(format!("{GENERIC_FAILURE}: HTTP {status}: {e}"))
        })?;

        if !parsed.success {
            return Err(ScanError::Remote(
                parsed.error.unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            ));
        }
        Ok(RemoteText {
            text: parsed.text.unwrap_or_default(),
            confidence: parsed.confidence.unwrap_or(0.0),
        })
    }
}

fn encode_jpeg(image: &RgbaImage) -> Result<Vec<u8>, ScanError> {
    // JPEG has no alpha channel.
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ScanError::Remote(format!("failed to encode image: {e}")))?;
    Ok(buf)
}

/// Server-mode scan: bound the image locally, recognize remotely, clean up
/// the text locally. Fails without partial text.
pub struct RemoteScanner {
    client: RemoteOcrClient,
    image: ImageNormalizer,
    text: TextNormalizer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteScan {
    pub scan_id: String,
    pub raw_text: String,
    pub text: String,
    pub confidence: f32,
}

impl RemoteScanner {
    pub fn new(client: RemoteOcrClient) -> Self {
        Self {
            client,
            image: ImageNormalizer::default(),
            text: TextNormalizer::default(),
        }
    }

    pub fn with_image_normalizer(mut self, image: ImageNormalizer) -> Self {
        self.image = image;
        self
    }

    pub fn with_text_normalizer(mut self, text: TextNormalizer) -> Self {
        self.text = text;
        self
    }

    pub async fn scan(
        &self,
        source: ImageSource,
        progress: &dyn ProgressSink,
    ) -> Result<RemoteScan, ScanError> {
        let result = self.run(source, progress).await;
        match &result {
            Ok(_) => progress.notify(Progress::new(ScanStage::Done, 1.0)),
            Err(e) => {
                tracing::warn!(endpoint = %self.client.endpoint(), error = %e, "remote scan failed");
                progress.notify(Progress::reset());
            }
        }
        result
    }

    async fn run(
        &self,
        source: ImageSource,
        progress: &dyn ProgressSink,
    ) -> Result<RemoteScan, ScanError> {
        progress.notify(Progress::new(ScanStage::Decode, 0.0));
        let normalized = self.image.decode_and_fit(source).await?;

        progress.notify(Progress::new(ScanStage::Recognition { pass: 0, total: 1 }, 0.3));
        let remote = self.client.recognize(&normalized.image).await?;

        progress.notify(Progress::new(ScanStage::Normalization, 0.95));
        let text = self.text.normalize(&remote.text);
        tracing::info!(
            scan_id = %normalized.scan_id,
            confidence = remote.confidence,
            chars = text.len(),
            "remote scan complete"
        );
        Ok(RemoteScan {
            scan_id: normalized.scan_id,
            raw_text: remote.text,
            text,
            confidence: remote.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_omits_absent_fields() {
        let json = serde_json::to_value(OcrResponse::failed("No image provided")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "No image provided"}));

        let parsed: OcrResponse =
            serde_json::from_str(r#"{"success": true, "text": "RICE", "confidence": 91.5}"#).unwrap();
        assert_eq!(parsed, OcrResponse::ok("RICE", 91.5));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = RemoteOcrClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:5000/api/ocr");
    }

    #[test]
    fn jpeg_drops_alpha() {
        let img = RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 0]));
        let jpeg = encode_jpeg(&img).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_remote_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = RemoteOcrClient::new("http://127.0.0.1:9").unwrap();
        let scanner = RemoteScanner::new(client);
        let source = ImageSource::Decoded(image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            image::Rgba([255, 255, 255, 255]),
        )));
        let err = scanner.scan(source, &()).await.unwrap_err();
        match err {
            ScanError::Remote(msg) => assert!(msg.starts_with(GENERIC_FAILURE)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
