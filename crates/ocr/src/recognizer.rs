use std::time::Duration;
use thiserror::Error;

use crate::types::{Orientation, RecognitionOptions, RecognitionResult};

#[derive(Debug, Clone, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR pass timed out after {0:?}")]
    Timeout(Duration),
    #[error("OCR engine not available; build with `tesseract` feature or use a remote endpoint")]
    NotAvailable,
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG/JPEG image bytes and return recognized text.
pub trait OcrBackend: Send + Sync {
    fn recognize(
        &self,
        image_bytes: &[u8],
        options: &RecognitionOptions,
    ) -> Result<RecognitionResult, OcrError>;

    /// Report how far the image must be rotated to read upright.
    fn detect_orientation(&self, _image_bytes: &[u8]) -> Result<Orientation, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set result. Useful for exercising the pipeline without
/// requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
    pub confidence: f32,
    pub orientation: Option<Orientation>,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), confidence: 90.0, orientation: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_orientation(mut self, angle: f32) -> Self {
        self.orientation = Some(Orientation { angle });
        self
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(
        &self,
        _image_bytes: &[u8],
        _options: &RecognitionOptions,
    ) -> Result<RecognitionResult, OcrError> {
        Ok(RecognitionResult::new(self.text.clone(), self.confidence, vec![]))
    }

    fn detect_orientation(&self, _image_bytes: &[u8]) -> Result<Orientation, OcrError> {
        self.orientation.ok_or(OcrError::NotAvailable)
    }
}

/// Stand-in used when no engine was compiled in; every pass fails.
pub struct UnavailableRecognizer;

impl OcrBackend for UnavailableRecognizer {
    fn recognize(
        &self,
        _image_bytes: &[u8],
        _options: &RecognitionOptions,
    ) -> Result<RecognitionResult, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use crate::types::{BoundingBox, RecognitionOptions, RecognitionResult, Word};
    use leptess::{LepTess, Variable};

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(
            &self,
            image_bytes: &[u8],
            options: &RecognitionOptions,
        ) -> Result<RecognitionResult, OcrError> {
            let lang = if options.language.is_empty() { &self.lang } else { &options.language };
            let mut lt = LepTess::new(self.data_path.as_deref(), lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;

            let psm = options.page_segmentation.as_tesseract().to_string();
            lt.set_variable(Variable::TesseditPagesegMode, &psm)
                .map_err(|e| OcrError::Engine(format!("{e:?}")))?;
            if let Some(whitelist) = &options.char_whitelist {
                lt.set_variable(Variable::TesseditCharWhitelist, whitelist)
                    .map_err(|e| OcrError::Engine(format!("{e:?}")))?;
            }
            let spaces = if options.preserve_interword_spaces { "1" } else { "0" };
            lt.set_variable(Variable::PreserveInterwordSpaces, spaces)
                .map_err(|e| OcrError::Engine(format!("{e:?}")))?;

            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(format!("{e:?}")))?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let confidence = lt.mean_text_conf() as f32;

            let words = if options.word_boxes {
                let height = lt.get_image_dimensions().map_or(0, |(_, h)| h);
                let boxes = lt
                    .get_word_str_box_text(0)
                    .map_err(|e| OcrError::Engine(e.to_string()))?;
                parse_word_str_boxes(&boxes, height)
            } else {
                vec![]
            };

            Ok(RecognitionResult::new(text, confidence, words))
        }
    }

    // Lines look like `WordStr left bottom right top page #text`, with a
    // bottom-left origin.
    fn parse_word_str_boxes(raw: &str, image_height: u32) -> Vec<Word> {
        raw.lines()
            .filter_map(|line| {
                let (coords, text) = line.split_once('#')?;
                let nums: Vec<u32> = coords
                    .split_whitespace()
                    .skip(1)
                    .take(4)
                    .filter_map(|n| n.parse().ok())
                    .collect();
                let [left, bottom, right, top] = nums[..] else { return None };
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(Word {
                    text: text.to_string(),
                    bbox: BoundingBox {
                        x: left,
                        y: image_height.saturating_sub(top),
                        width: right.saturating_sub(left),
                        height: top.saturating_sub(bottom),
                    },
                })
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_preset_text() {
        let r = MockRecognizer::new("INGREDIENTS: RICE, SALT");
        let result = r.recognize(b"fake image data", &RecognitionOptions::default()).unwrap();
        assert_eq!(result.text(), "INGREDIENTS: RICE, SALT");
        assert_eq!(result.confidence(), 90.0);
    }

    #[test]
    fn mock_ignores_image_content() {
        let r = MockRecognizer::new("hello").with_confidence(42.0);
        let opts = RecognitionOptions::default();
        assert_eq!(r.recognize(b"anything", &opts).unwrap().text(), "hello");
        assert_eq!(r.recognize(b"", &opts).unwrap().confidence(), 42.0);
    }

    #[test]
    fn mock_orientation_defaults_to_unavailable() {
        let r = MockRecognizer::new("");
        assert!(matches!(r.detect_orientation(b""), Err(OcrError::NotAvailable)));
        let r = r.with_orientation(90.0);
        assert_eq!(r.detect_orientation(b"").unwrap().angle, 90.0);
    }

    #[test]
    fn unavailable_always_fails() {
        let r = UnavailableRecognizer;
        assert!(matches!(
            r.recognize(b"", &RecognitionOptions::default()),
            Err(OcrError::NotAvailable)
        ));
    }
}
