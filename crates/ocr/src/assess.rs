use glutenscan_core::{FlagResult, SafetyClassifier, SafetyVerdict};
use glutenscan_ingredients::IngredientRuleEngine;
use serde::Serialize;

/// Rule-engine flags for a text and the verdict derived from them.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub flags: FlagResult,
    pub verdict: SafetyVerdict,
}

pub fn assess(text: &str, rules: &IngredientRuleEngine, classifier: &SafetyClassifier) -> Assessment {
    let flags = rules.analyze(text);
    let verdict = classifier.classify(&flags);
    Assessment { flags, verdict }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glutenscan_core::SafetyLevel;

    #[test]
    fn wheat_label_is_unsafe() {
        let a = assess(
            "Ingredients: enriched wheat flour, sugar, salt",
            &IngredientRuleEngine::default(),
            &SafetyClassifier::default(),
        );
        assert!(!a.flags.is_gluten_free);
        assert_eq!(a.verdict.level, SafetyLevel::Unsafe);
        assert!(!a.verdict.is_gluten_free);
    }

    #[test]
    fn plain_rice_label_is_clear_with_suffix() {
        let a = assess(
            "Ingredients: rice, salt",
            &IngredientRuleEngine::default(),
            &SafetyClassifier::default(),
        );
        assert_eq!(a.verdict.level, SafetyLevel::Clear);
        assert!(a.verdict.is_gluten_free);
        assert!(a.verdict.message.starts_with(&a.flags.message));
    }
}
