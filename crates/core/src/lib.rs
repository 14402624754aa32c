pub mod safety;
pub mod settings;

pub use safety::{
    FlagResult, FlaggedIngredient, SafetyClassifier, SafetyLevel, SafetyPolicy, SafetyVerdict,
};
pub use settings::{
    IngredientRule, RuleSettings, SafetySettings, ScanSettings, Settings, SettingsError,
    TextSettings,
};
