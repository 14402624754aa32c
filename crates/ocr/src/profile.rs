use serde::{Deserialize, Serialize};

use crate::filters::FilterBank;
use crate::fusion::FusionMode;
use crate::types::{PageSegMode, RecognitionOverrides, VariantKind};

/// Characters that can appear on an ingredient panel.
pub const INGREDIENT_WHITELIST: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789,.:;()[]%-/&' ";

/// One recognition pass: which variant to read and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSpec {
    pub variant: VariantKind,
    #[serde(default)]
    pub options: RecognitionOverrides,
}

impl PassSpec {
    pub fn new(variant: VariantKind) -> Self {
        Self { variant, options: RecognitionOverrides::default() }
    }

    pub fn with_options(mut self, options: RecognitionOverrides) -> Self {
        self.options = options;
        self
    }
}

/// Named bundle of variants, passes and fusion mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProfile {
    pub name: String,
    pub variants: Vec<VariantKind>,
    pub passes: Vec<PassSpec>,
    pub fusion: FusionMode,
}

impl ScanProfile {
    /// Two variants, one default pass over the adaptive rendition.
    pub fn basic() -> Self {
        Self {
            name: "basic".to_string(),
            variants: FilterBank::standard().kinds().to_vec(),
            passes: vec![PassSpec::new(VariantKind::Adaptive)],
            fusion: FusionMode::Best,
        }
    }

    pub fn enhanced() -> Self {
        Self {
            name: "enhanced".to_string(),
            variants: FilterBank::standard().kinds().to_vec(),
            passes: enhanced_passes(),
            fusion: FusionMode::Combine,
        }
    }

    /// Adds the equalized variant and a block pass over it; keyword fusion.
    pub fn food_label() -> Self {
        let mut passes = enhanced_passes();
        passes.push(PassSpec::new(VariantKind::Equalized).with_options(RecognitionOverrides {
            page_segmentation: Some(PageSegMode::SingleBlock),
            ..Default::default()
        }));
        Self {
            name: "food_label".to_string(),
            variants: FilterBank::food_label().kinds().to_vec(),
            passes,
            fusion: FusionMode::FoodLabel,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "basic" => Some(Self::basic()),
            "enhanced" => Some(Self::enhanced()),
            "food_label" => Some(Self::food_label()),
            _ => None,
        }
    }

    pub fn filter_bank(&self) -> FilterBank {
        FilterBank::new(self.variants.clone())
    }
}

impl std::str::FromStr for ScanProfile {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::by_name(s).ok_or_else(|| format!("Unknown scan profile: '{s}'"))
    }
}

fn enhanced_passes() -> Vec<PassSpec> {
    vec![
        PassSpec::new(VariantKind::Adaptive),
        PassSpec::new(VariantKind::Contrast).with_options(RecognitionOverrides {
            char_whitelist: Some(INGREDIENT_WHITELIST.to_string()),
            word_boxes: Some(true),
            ..Default::default()
        }),
        PassSpec::new(VariantKind::Adaptive).with_options(RecognitionOverrides {
            page_segmentation: Some(PageSegMode::SingleColumn),
            ..Default::default()
        }),
    ]
}
