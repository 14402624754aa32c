use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence above which a single flagged ingredient makes a product unsafe.
pub const DEFAULT_UNSAFE_THRESHOLD: f32 = 0.5;

pub const UNSAFE_MESSAGE: &str = "Potentially unsafe: Contains suspicious ingredients.";
pub const CAUTION_MESSAGE: &str = "Exercise caution: Some ingredients need verification.";
pub const DEFAULT_CAUTION_SUFFIX: &str =
    "Note: Cross-contamination is still possible. Check for a certified gluten-free label.";

/// An ingredient an upstream rules engine considers potentially gluten-containing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlaggedIngredient {
    pub name: String,
    /// How sure the rules engine is that this ingredient contains gluten (0.0–1.0).
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FlaggedIngredient {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self { name: name.into(), confidence, reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Structured flag input consumed by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagResult {
    pub is_gluten_free: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub flagged_ingredients: Vec<FlaggedIngredient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Unsafe,
    Caution,
    Clear,
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyLevel::Unsafe => write!(f, "unsafe"),
            SafetyLevel::Caution => write!(f, "caution"),
            SafetyLevel::Clear => write!(f, "clear"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyVerdict {
    pub is_gluten_free: bool,
    pub level: SafetyLevel,
    pub message: String,
    pub flagged_ingredients: Vec<FlaggedIngredient>,
}

/// Tunables for the classifier. The threshold can only be lowered from the
/// default; anything above it (or non-finite) falls back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyPolicy {
    unsafe_threshold: f32,
    caution_suffix: String,
}

impl SafetyPolicy {
    pub fn new(unsafe_threshold: f32, caution_suffix: impl Into<String>) -> Self {
        let unsafe_threshold = if unsafe_threshold.is_finite() {
            unsafe_threshold.clamp(0.0, DEFAULT_UNSAFE_THRESHOLD)
        } else {
            DEFAULT_UNSAFE_THRESHOLD
        };
        Self { unsafe_threshold, caution_suffix: caution_suffix.into() }
    }

    pub fn unsafe_threshold(&self) -> f32 {
        self.unsafe_threshold
    }

    pub fn caution_suffix(&self) -> &str {
        &self.caution_suffix
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UNSAFE_THRESHOLD, DEFAULT_CAUTION_SUFFIX)
    }
}

/// Turns an upstream flag result into a conservative verdict.
///
/// The classifier only ever moves a verdict towards "not gluten free": a
/// confident flag overrides an upstream "gluten free" claim, while a clean
/// flag list never upgrades an upstream "contains gluten".
#[derive(Debug, Clone, Default)]
pub struct SafetyClassifier {
    policy: SafetyPolicy,
}

impl SafetyClassifier {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    pub fn classify(&self, flags: &FlagResult) -> SafetyVerdict {
        let threshold = self.policy.unsafe_threshold;
        let flagged = &flags.flagged_ingredients;

        let (level, mut is_gluten_free, mut message) = if flagged.is_empty() {
            (SafetyLevel::Clear, flags.is_gluten_free, flags.message.clone())
        } else if flagged.iter().any(|f| effective_confidence(f) > threshold) {
            (SafetyLevel::Unsafe, false, UNSAFE_MESSAGE.to_string())
        } else {
            (SafetyLevel::Caution, flags.is_gluten_free, CAUTION_MESSAGE.to_string())
        };

        if level == SafetyLevel::Unsafe {
            is_gluten_free = false;
        }

        if is_gluten_free && !self.policy.caution_suffix.is_empty() {
            message = if message.trim().is_empty() {
                self.policy.caution_suffix.clone()
            } else {
                format!("{} {}", message.trim_end(), self.policy.caution_suffix)
            };
        }

        tracing::debug!(
            level = %level,
            is_gluten_free,
            flagged = flagged.len(),
            "classified flag result"
        );

        SafetyVerdict {
            is_gluten_free,
            level,
            message,
            flagged_ingredients: flagged.clone(),
        }
    }
}

// A confidence that cannot be compared is treated as certain.
fn effective_confidence(f: &FlaggedIngredient) -> f32 {
    if f.confidence.is_finite() {
        f.confidence
    } else {
        1.0
    }
}
