use std::sync::OnceLock;

use glutenscan_core::{FlagResult, FlaggedIngredient, IngredientRule, RuleSettings};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::util::similarity;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Failed to parse rules TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

fn re_allergen_statement() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)contains\s*:.*?(wheat|barley|rye|gluten)").expect("invalid regex")
    })
}

fn re_gluten_free_label() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)gluten[\s-]*free").expect("invalid regex"))
}

/// Confidence above which a definite match is reported as "likely".
const LIKELY_CONFIDENCE: f32 = 0.7;
/// Names shorter than this never fuzzy-match.
const MIN_FUZZY_LEN: usize = 5;

pub const MSG_ALLERGEN_STATEMENT: &str =
    "Product explicitly states it contains gluten ingredients.";
pub const MSG_LABELED_GLUTEN_FREE: &str = "Product is labeled as gluten-free.";
pub const MSG_NONE_DETECTED: &str = "No gluten-containing ingredients detected.";
pub const MSG_LIKELY: &str = "This product contains ingredients that likely have gluten.";
pub const MSG_POSSIBLE: &str =
    "This product contains ingredients that may have gluten. Caution is advised.";

fn builtin_gluten() -> Vec<IngredientRule> {
    [
        ("wheat", "Contains gluten protein", 1.0),
        ("barley", "Contains gluten protein", 1.0),
        ("rye", "Contains gluten protein", 1.0),
        ("malt", "Usually derived from barley", 0.9),
        ("brewer's yeast", "Often made from barley", 0.8),
        ("oats", "May be cross-contaminated", 0.6),
        ("flour", "Usually wheat-based unless specified", 0.8),
        ("semolina", "Made from wheat", 1.0),
        ("durum", "Type of wheat", 1.0),
        ("kamut", "Ancient type of wheat", 1.0),
        ("spelt", "Ancient type of wheat", 1.0),
        ("farina", "Usually made from wheat", 0.9),
        ("seitan", "Made from wheat gluten", 1.0),
        ("triticale", "Cross between wheat and rye", 1.0),
        ("couscous", "Made from wheat", 1.0),
        ("bulgur", "Made from wheat", 1.0),
        ("farro", "Type of wheat", 1.0),
        ("graham", "Type of wheat flour", 1.0),
        ("hydrolyzed wheat protein", "Derived from wheat", 1.0),
        ("soy sauce", "Often contains wheat, unless labeled GF", 0.7),
    ]
    .into_iter()
    .map(|(name, reason, confidence)| IngredientRule::new(name, reason, confidence))
    .collect()
}

fn builtin_ambiguous() -> Vec<IngredientRule> {
    [
        ("natural flavors", "May contain gluten, specific source not disclosed", 0.5),
        ("caramel color", "Sometimes made from barley malt", 0.4),
        ("dextrin", "Can be derived from wheat", 0.5),
        ("modified food starch", "Can be derived from wheat", 0.5),
        ("hydrolyzed vegetable protein", "Can be derived from wheat", 0.5),
        ("vegetable protein", "Source may include wheat", 0.5),
    ]
    .into_iter()
    .map(|(name, reason, confidence)| IngredientRule::new(name, reason, confidence))
    .collect()
}

/// Internal pairing of a rule with its precompiled word-boundary pattern.
struct CompiledRule {
    rule: IngredientRule,
    pattern: Regex,
    fuzzy: bool,
}

impl CompiledRule {
    fn compile(rule: IngredientRule) -> Option<Self> {
        let name = rule.name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        let pattern = match Regex::new(&format!(r"\b{}\b", regex::escape(&name))) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(rule = %rule.name, error = %e, "skipping ingredient rule");
                return None;
            }
        };
        let fuzzy = !name.contains(char::is_whitespace) && name.chars().count() >= MIN_FUZZY_LEN;
        Some(Self { rule, pattern, fuzzy })
    }

    fn matches(&self, segment: &str, fuzzy_threshold: Option<f32>) -> bool {
        if self.pattern.is_match(segment) {
            return true;
        }
        match fuzzy_threshold {
            Some(threshold) if self.fuzzy => {
                let name = self.rule.name.to_lowercase();
                segment
                    .split(|c: char| !c.is_alphanumeric() && c != '\'')
                    .filter(|w| w.chars().count() >= MIN_FUZZY_LEN)
                    .any(|w| similarity(w, &name) >= threshold)
            }
            _ => false,
        }
    }

    fn flag(&self) -> FlaggedIngredient {
        FlaggedIngredient::new(self.rule.name.clone(), self.rule.confidence)
            .with_reason(self.rule.reason.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    gluten: Option<Vec<IngredientRule>>,
    #[serde(default)]
    ambiguous: Option<Vec<IngredientRule>>,
    #[serde(default)]
    fuzzy_threshold: Option<f32>,
}

/// Flags potentially gluten-containing ingredients in normalized label text.
///
/// Definite rules are checked first; ambiguous rules only contribute when no
/// definite rule matched.
pub struct IngredientRuleEngine {
    gluten: Vec<CompiledRule>,
    ambiguous: Vec<CompiledRule>,
    fuzzy_threshold: Option<f32>,
}

impl Default for IngredientRuleEngine {
    fn default() -> Self {
        Self::new(builtin_gluten(), builtin_ambiguous(), None)
    }
}

impl IngredientRuleEngine {
    pub fn new(
        gluten: Vec<IngredientRule>,
        ambiguous: Vec<IngredientRule>,
        fuzzy_threshold: Option<f32>,
    ) -> Self {
        Self {
            gluten: gluten.into_iter().filter_map(CompiledRule::compile).collect(),
            ambiguous: ambiguous.into_iter().filter_map(CompiledRule::compile).collect(),
            fuzzy_threshold: fuzzy_threshold.map(|t| t.clamp(0.0, 1.0)),
        }
    }

    pub fn from_settings(settings: &RuleSettings) -> Self {
        Self::new(
            settings.gluten.clone().unwrap_or_else(builtin_gluten),
            settings.ambiguous.clone().unwrap_or_else(builtin_ambiguous),
            settings.fuzzy_threshold,
        )
    }

    /// Parse a standalone rules file with optional `[[gluten]]`,
    /// `[[ambiguous]]` and `fuzzy_threshold` entries.
    pub fn from_toml(toml_content: &str) -> Result<Self, RulesError> {
        let file: RulesFile = toml::from_str(toml_content)?;
        Ok(Self::new(
            file.gluten.unwrap_or_else(builtin_gluten),
            file.ambiguous.unwrap_or_else(builtin_ambiguous),
            file.fuzzy_threshold,
        ))
    }

    pub fn analyze(&self, ingredients_text: &str) -> FlagResult {
        let text = ingredients_text.to_lowercase();

        if re_allergen_statement().is_match(&text) {
            return FlagResult {
                is_gluten_free: false,
                message: MSG_ALLERGEN_STATEMENT.to_string(),
                flagged_ingredients: vec![FlaggedIngredient::new("Allergen statement", 1.0)
                    .with_reason("Contains gluten (see 'contains' statement)")],
            };
        }

        if re_gluten_free_label().is_match(&text) {
            return FlagResult {
                is_gluten_free: true,
                message: MSG_LABELED_GLUTEN_FREE.to_string(),
                flagged_ingredients: vec![],
            };
        }

        let segments: Vec<&str> = text
            .split([',', ';', '\n', '(', ')'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut flagged = self.match_list(&self.gluten, &segments);
        if flagged.is_empty() {
            flagged = self.match_list(&self.ambiguous, &segments);
        }

        tracing::debug!(segments = segments.len(), flagged = flagged.len(), "analyzed ingredients");

        if flagged.is_empty() {
            FlagResult {
                is_gluten_free: true,
                message: MSG_NONE_DETECTED.to_string(),
                flagged_ingredients: vec![],
            }
        } else if flagged.iter().any(|f| f.confidence > LIKELY_CONFIDENCE) {
            FlagResult {
                is_gluten_free: false,
                message: MSG_LIKELY.to_string(),
                flagged_ingredients: flagged,
            }
        } else {
            FlagResult {
                is_gluten_free: false,
                message: MSG_POSSIBLE.to_string(),
                flagged_ingredients: flagged,
            }
        }
    }

    fn match_list(&self, rules: &[CompiledRule], segments: &[&str]) -> Vec<FlaggedIngredient> {
        rules
            .iter()
            .filter(|r| segments.iter().any(|s| r.matches(s, self.fuzzy_threshold)))
            .map(CompiledRule::flag)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(result: &FlagResult) -> Vec<&str> {
        result
            .flagged_ingredients
            .iter()
            .map(|f| f.name.as_str())
            .collect()
    }

    #[test]
    fn allergen_statement_short_circuits() {
        let result = IngredientRuleEngine::default()
            .analyze("Ingredients: rice, sugar\nCONTAINS: wheat, soy");
        assert!(!result.is_gluten_free);
        assert_eq!(result.message, MSG_ALLERGEN_STATEMENT);
        assert_eq!(names(&result), vec!["Allergen statement"]);
        assert_eq!(result.flagged_ingredients[0].confidence, 1.0);
    }

    #[test]
    fn gluten_free_label_wins_over_list() {
        let result = IngredientRuleEngine::default().analyze("Certified Gluten-Free oats, honey");
        assert!(result.is_gluten_free);
        assert_eq!(result.message, MSG_LABELED_GLUTEN_FREE);
        assert!(result.flagged_ingredients.is_empty());
    }

    #[test]
    fn definite_ingredients_are_flagged() {
        let result = IngredientRuleEngine::default()
            .analyze("Ingredients: enriched wheat flour, sugar, malt extract (barley)");
        assert!(!result.is_gluten_free);
        assert_eq!(result.message, MSG_LIKELY);
        assert_eq!(names(&result), vec!["wheat", "barley", "malt", "flour"]);
    }

    #[test]
    fn word_boundaries_prevent_partial_matches() {
        // "malt" inside "maltodextrin" and "wheat" inside "buckwheats" do not count.
        let result = IngredientRuleEngine::default().analyze("maltodextrin; buckwheats");
        assert!(result.is_gluten_free);
    }

    #[test]
    fn ambiguous_only_when_no_definite_match() {
        let engine = IngredientRuleEngine::default();
        let result = engine.analyze("water, caramel color, natural flavors");
        assert!(!result.is_gluten_free);
        assert_eq!(result.message, MSG_POSSIBLE);
        assert_eq!(names(&result), vec!["natural flavors", "caramel color"]);

        let result = engine.analyze("rye, caramel color");
        assert_eq!(names(&result), vec!["rye"]);
    }

    #[test]
    fn lower_confidence_definite_match_is_possible_not_likely() {
        let result = IngredientRuleEngine::default().analyze("rolled oats, soy sauce");
        assert_eq!(result.message, MSG_POSSIBLE);
        assert_eq!(names(&result), vec!["oats", "soy sauce"]);
    }

    #[test]
    fn clean_list_is_gluten_free() {
        let result = IngredientRuleEngine::default().analyze("rice, water, salt");
        assert!(result.is_gluten_free);
        assert_eq!(result.message, MSG_NONE_DETECTED);
    }

    #[test]
    fn fuzzy_matching_tolerates_ocr_noise() {
        let strict = IngredientRuleEngine::default();
        assert!(strict.analyze("semo1ina, water").is_gluten_free);

        let fuzzy = IngredientRuleEngine::new(builtin_gluten(), builtin_ambiguous(), Some(0.85));
        let result = fuzzy.analyze("semo1ina, water");
        assert_eq!(names(&result), vec!["semolina"]);
    }

    #[test]
    fn rules_from_toml_replace_lists() {
        let engine = IngredientRuleEngine::from_toml(
            r#"
            [[gluten]]
            name = "einkorn"
            reason = "Ancient wheat"
            confidence = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(names(&engine.analyze("einkorn flour")), vec!["einkorn"]);
        // Ambiguous list falls back to the built-in one.
        assert_eq!(names(&engine.analyze("dextrin")), vec!["dextrin"]);
    }

    #[test]
    fn invalid_toml_is_error() {
        assert!(IngredientRuleEngine::from_toml("[[gluten]]\nname = 3").is_err());
    }

    #[test]
    fn from_settings_uses_overrides() {
        let settings = RuleSettings {
            gluten: Some(vec![IngredientRule::new("freekeh", "Young wheat", 0.95)]),
            ambiguous: Some(vec![]),
            fuzzy_threshold: None,
        };
        let engine = IngredientRuleEngine::from_settings(&settings);
        assert_eq!(names(&engine.analyze("freekeh")), vec!["freekeh"]);
        assert!(engine.analyze("wheat").is_gluten_free);
    }
}
