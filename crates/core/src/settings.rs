use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::safety::{SafetyPolicy, DEFAULT_CAUTION_SUFFIX, DEFAULT_UNSAFE_THRESHOLD};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration, usually loaded from `glutenscan.toml`.
/// Every table and key is optional; missing values take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub scan: ScanSettings,
    pub text: TextSettings,
    pub safety: SafetySettings,
    pub rules: RuleSettings,
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::info!(path = %path.display(), "loaded settings");
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    /// Longest edge, in pixels, an input image is scaled down to.
    pub max_dimension: u32,
    /// Profile name: `basic`, `enhanced` or `food_label`.
    pub profile: String,
    /// Per-pass OCR timeout.
    pub pass_timeout_secs: u64,
    pub parallel_passes: bool,
    pub detect_orientation: bool,
    pub language: String,
    /// Remote OCR endpoint; when set, scans go to the server instead of a local engine.
    pub remote_url: Option<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_dimension: 1500,
            profile: "enhanced".to_string(),
            pass_timeout_secs: 30,
            parallel_passes: false,
            detect_orientation: true,
            language: "eng".to_string(),
            remote_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextSettings {
    /// Start from the built-in OCR correction table before applying `corrections`.
    pub use_default_corrections: bool,
    /// Extra `misread = "correct"` pairs; these win over built-in entries.
    pub corrections: BTreeMap<String, String>,
    /// Replaces the built-in culinary keyword list used by keyword fusion.
    pub keywords: Option<Vec<String>>,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            use_default_corrections: true,
            corrections: BTreeMap::new(),
            keywords: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetySettings {
    pub unsafe_threshold: f32,
    pub caution_suffix: String,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            unsafe_threshold: DEFAULT_UNSAFE_THRESHOLD,
            caution_suffix: DEFAULT_CAUTION_SUFFIX.to_string(),
        }
    }
}

impl SafetySettings {
    pub fn policy(&self) -> SafetyPolicy {
        SafetyPolicy::new(self.unsafe_threshold, self.caution_suffix.clone())
    }
}

/// One entry of the ingredient rule lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngredientRule {
    pub name: String,
    pub reason: String,
    pub confidence: f32,
}

impl IngredientRule {
    pub fn new(name: &str, reason: &str, confidence: f32) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleSettings {
    /// Replaces the built-in list of gluten-containing ingredients.
    pub gluten: Option<Vec<IngredientRule>>,
    /// Replaces the built-in list of ambiguous ingredients.
    pub ambiguous: Option<Vec<IngredientRule>>,
    /// Similarity (0.0–1.0) for OCR-tolerant matching; `None` disables it.
    pub fuzzy_threshold: Option<f32>,
}
