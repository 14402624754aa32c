use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tesseract-style page segmentation modes the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    Auto,
    SingleColumn,
    #[default]
    SingleBlock,
    SingleLine,
    SingleWord,
    Sparse,
}

impl PageSegMode {
    /// The numeric `--psm` value understood by Tesseract.
    pub fn as_tesseract(&self) -> u8 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SingleWord => 8,
            PageSegMode::Sparse => 11,
        }
    }
}

impl fmt::Display for PageSegMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSegMode::Auto => write!(f, "auto"),
            PageSegMode::SingleColumn => write!(f, "single_column"),
            PageSegMode::SingleBlock => write!(f, "single_block"),
            PageSegMode::SingleLine => write!(f, "single_line"),
            PageSegMode::SingleWord => write!(f, "single_word"),
            PageSegMode::Sparse => write!(f, "sparse"),
        }
    }
}

impl std::str::FromStr for PageSegMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(PageSegMode::Auto),
            "single_column" => Ok(PageSegMode::SingleColumn),
            "single_block" => Ok(PageSegMode::SingleBlock),
            "single_line" => Ok(PageSegMode::SingleLine),
            "single_word" => Ok(PageSegMode::SingleWord),
            "sparse" => Ok(PageSegMode::Sparse),
            other => Err(format!("Unknown page segmentation mode: '{other}'")),
        }
    }
}

/// Options for a single recognition pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOptions {
    pub language: String,
    /// Only these characters may be recognized, when set.
    pub char_whitelist: Option<String>,
    pub page_segmentation: PageSegMode,
    pub preserve_interword_spaces: bool,
    /// Ask the engine for per-word bounding boxes.
    pub word_boxes: bool,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            char_whitelist: None,
            page_segmentation: PageSegMode::SingleBlock,
            preserve_interword_spaces: true,
            word_boxes: false,
        }
    }
}

impl RecognitionOptions {
    /// Shallow merge: every key set in `overrides` replaces the value here.
    pub fn merged(&self, overrides: &RecognitionOverrides) -> Self {
        Self {
            language: overrides.language.clone().unwrap_or_else(|| self.language.clone()),
            char_whitelist: overrides
                .char_whitelist
                .clone()
                .or_else(|| self.char_whitelist.clone()),
            page_segmentation: overrides.page_segmentation.unwrap_or(self.page_segmentation),
            preserve_interword_spaces: overrides
                .preserve_interword_spaces
                .unwrap_or(self.preserve_interword_spaces),
            word_boxes: overrides.word_boxes.unwrap_or(self.word_boxes),
        }
    }
}

/// Caller-supplied option keys; unset keys keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOverrides {
    pub language: Option<String>,
    pub char_whitelist: Option<String>,
    pub page_segmentation: Option<PageSegMode>,
    pub preserve_interword_spaces: Option<bool>,
    pub word_boxes: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Output of one recognition pass. Confidence is always within 0–100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    text: String,
    confidence: f32,
    words: Vec<Word>,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, confidence: f32, words: Vec<Word>) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self { text: text.into(), confidence, words }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }
}

/// Clockwise rotation, in degrees, that brings an image upright.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Orientation {
    pub angle: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Adaptive,
    Contrast,
    Equalized,
    /// Plain luminance; only produced when every other filter failed.
    Grayscale,
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantKind::Adaptive => write!(f, "adaptive"),
            VariantKind::Contrast => write!(f, "contrast"),
            VariantKind::Equalized => write!(f, "equalized"),
            VariantKind::Grayscale => write!(f, "grayscale"),
        }
    }
}

/// One preprocessed rendition of the source image, PNG-encoded.
#[derive(Debug, Clone)]
pub struct PreprocessVariant {
    pub kind: VariantKind,
    pub width: u32,
    pub height: u32,
    pub encoded: Arc<[u8]>,
}
