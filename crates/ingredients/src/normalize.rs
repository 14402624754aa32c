use std::sync::OnceLock;

use glutenscan_core::TextSettings;
use regex::{Captures, NoExpand, Regex};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_nutrition_block,
    r"(?is)\bnutrition(?:al)?\b.*?(\n[ \t]*\n|ingredients|\z)");
re!(re_serving_block,
    r"(?is)\bserving\s+size\b.*?(\n[ \t]*\n|ingredients|\z)");
re!(re_calories_block,
    r"(?is)\bcalories\b.*?(\n[ \t]*\n|ingredients|\z)");
re!(re_ingredients_header,
    r"(?i)ingredients[:.\s]+");
re!(re_repeated_commas, r",(?:\s*,)+");
re!(re_repeated_periods, r"\.(?:\s*\.)+");
re!(re_space_before_period, r"\s+\.");
re!(re_comma_spacing, r"\s*,\s*");
re!(re_colon_spacing, r"\s*:\s*");
re!(re_whitespace, r"\s+");
re!(re_may_contain,
    r"(?i)\bmay\s+contain\b[:.\s]*(.*?)(?:\.|$)");
re!(re_contains,
    r"(?i)\bcontains\b[:.\s]*(.*?)(?:\.|$)");

/// Built-in OCR confusions seen on food labels: `(misread, correct)`.
const DEFAULT_CORRECTIONS: &[(&str, &str)] = &[
    ("lngredients", "ingredients"),
    ("1ngredients", "ingredients"),
    ("|ngredients", "ingredients"),
    ("ingredlents", "ingredients"),
    ("ingred1ents", "ingredients"),
    ("c0rn", "corn"),
    ("g1uten", "gluten"),
    ("glutcn", "gluten"),
    ("mi1k", "milk"),
    ("m1lk", "milk"),
    ("rnilk", "milk"),
    ("wh3at", "wheat"),
    ("whcat", "wheat"),
    ("barlcy", "barley"),
    ("bar1ey", "barley"),
    ("rnalt", "malt"),
    ("ma1t", "malt"),
    ("sall", "salt"),
    ("sa1t", "salt"),
    ("sugan", "sugar"),
    ("f1our", "flour"),
    ("fiour", "flour"),
    ("0il", "oil"),
    ("s0y", "soy"),
    ("oa1s", "oats"),
    ("0ats", "oats"),
    ("starcb", "starch"),
    ("yeasl", "yeast"),
];

/// The OCR correction table: misread words mapped to their intended spelling.
/// Matching is whole-word and case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionTable {
    entries: Vec<(String, String)>,
}

impl CorrectionTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (from, to) in DEFAULT_CORRECTIONS {
            table.insert(*from, *to);
        }
        table
    }

    pub fn from_settings(settings: &TextSettings) -> Self {
        let mut table = if settings.use_default_corrections {
            Self::builtin()
        } else {
            Self::default()
        };
        for (from, to) in &settings.corrections {
            table.insert(from.as_str(), to.as_str());
        }
        table
    }

    /// Add or replace an entry. Keys are compared case-insensitively.
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        if from.trim().is_empty() {
            return;
        }
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&from))
        {
            Some(entry) => entry.1 = to,
            None => self.entries.push((from, to)),
        }
    }

    pub fn with(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.insert(from, to);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn compile(&self) -> Vec<(Regex, String)> {
        self.entries
            .iter()
            .filter_map(|(from, to)| {
                let pattern = format!(
                    "(?i){}{}{}",
                    word_boundary(from.chars().next()),
                    regex::escape(from),
                    word_boundary(from.chars().last()),
                );
                match Regex::new(&pattern) {
                    Ok(re) => Some((re, to.clone())),
                    Err(e) => {
                        tracing::warn!(entry = %from, error = %e, "skipping correction entry");
                        None
                    }
                }
            })
            .collect()
    }
}

// `\b` only makes sense next to a word character.
fn word_boundary(c: Option<char>) -> &'static str {
    match c {
        Some(c) if c.is_alphanumeric() || c == '_' => r"\b",
        _ => "",
    }
}

/// Cleans raw OCR output of an ingredient label into a stable, labelled form.
///
/// Steps, in order: correction table, nutrition/serving/calorie block removal,
/// ingredients-section isolation, punctuation cleanup, and relocation of
/// "contains" / "may contain" clauses to trailing lines. The result is
/// idempotent for the built-in correction table.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    corrections: Vec<(Regex, String)>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(&CorrectionTable::builtin())
    }
}

impl TextNormalizer {
    pub fn new(table: &CorrectionTable) -> Self {
        Self { corrections: table.compile() }
    }

    pub fn from_settings(settings: &TextSettings) -> Self {
        Self::new(&CorrectionTable::from_settings(settings))
    }

    pub fn normalize(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }
        let text = self.apply_corrections(text);
        let text = strip_nutrition(&text);
        let text = isolate_ingredients(&text);
        let text = clean_punctuation(&text);
        relocate_allergen_clauses(&text)
    }

    /// Step 1: replace known OCR misreads.
    pub fn apply_corrections(&self, text: &str) -> String {
        self.corrections
            .iter()
            .fold(text.to_string(), |acc, (re, to)| {
                re.replace_all(&acc, NoExpand(to.as_str())).into_owned()
            })
    }
}

/// Step 2: drop nutrition facts, serving size and calorie blocks. Each block
/// runs to the next blank line, the word "ingredients", or the end of text.
pub fn strip_nutrition(text: &str) -> String {
    [re_nutrition_block(), re_serving_block(), re_calories_block()]
        .iter()
        .fold(text.to_string(), |acc, re| {
            re.replace_all(&acc, |c: &Captures| {
                let end = c.get(1).map_or("", |m| m.as_str());
                if end.is_empty() {
                    String::new()
                } else if end.trim().is_empty() {
                    "\n\n".to_string()
                } else {
                    // Keep the "ingredients" header that terminated the block.
                    end.to_string()
                }
            })
            .into_owned()
        })
}

/// Step 3: keep only what follows the ingredients header, if there is one.
pub fn isolate_ingredients(text: &str) -> String {
    match re_ingredients_header().find(text) {
        Some(m) => format!("Ingredients: {}", text[m.end()..].trim())
            .trim_end()
            .to_string(),
        None => text.to_string(),
    }
}

/// Step 4: collapse repeated punctuation and normalize spacing.
pub fn clean_punctuation(text: &str) -> String {
    let text = re_repeated_commas().replace_all(text, ",");
    let text = re_repeated_periods().replace_all(&text, ".");
    let text = re_space_before_period().replace_all(&text, ".");
    let text = re_comma_spacing().replace_all(&text, ", ");
    let text = re_colon_spacing().replace_all(&text, ": ");
    let text = re_whitespace().replace_all(&text, " ");
    text.trim().to_string()
}

/// Step 5: move "may contain" and "contains" clauses to their own labelled lines.
pub fn relocate_allergen_clauses(text: &str) -> String {
    let (body, may_contain) = extract_clauses(text, re_may_contain());
    let (body, contains) = extract_clauses(&body, re_contains());
    let body = clean_punctuation(&body);

    let mut lines = Vec::with_capacity(3);
    if !body.is_empty() {
        lines.push(body);
    }
    if !contains.is_empty() {
        lines.push(format!("CONTAINS: {}", contains.join(", ")));
    }
    if !may_contain.is_empty() {
        lines.push(format!("MAY CONTAIN: {}", may_contain.join(", ")));
    }
    lines.join("\n")
}

// Removes every clause matched by `re`, returning the remaining body and the
// non-empty clause texts in order. A dangling marker is dropped so it cannot
// swallow a relabelled clause on the next pass.
fn extract_clauses(text: &str, re: &Regex) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let body = re.replace_all(text, |c: &Captures| {
        let clause = c
            .get(1)
            .map_or("", |m| m.as_str())
            .trim()
            .trim_end_matches([',', ';'])
            .trim_end();
        if !clause.is_empty() {
            clauses.push(clause.to_string());
        }
        " ".to_string()
    });
    (body.into_owned(), clauses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::default()
    }

    #[test]
    fn corrections_and_isolation_fix_header_and_words() {
        let n = normalizer();
        let text = n.apply_corrections("lngredients: c0rn starch, g1uten, sall");
        assert_eq!(
            isolate_ingredients(&text),
            "Ingredients: corn starch, gluten, salt"
        );
        assert_eq!(
            n.normalize("lngredients: c0rn starch, g1uten, sall"),
            "Ingredients: corn starch, gluten, salt"
        );
    }

    #[test]
    fn corrections_are_whole_word_and_case_insensitive() {
        let n = normalizer();
        assert_eq!(n.apply_corrections("C0RN syrup"), "corn syrup");
        // "sall" inside a longer word must survive.
        assert_eq!(n.apply_corrections("sallow"), "sallow");
    }

    #[test]
    fn correction_table_is_extensible() {
        let table = CorrectionTable::builtin().with("wh3at", "WHEAT").with("spe1t", "spelt");
        let n = TextNormalizer::new(&table);
        assert_eq!(n.apply_corrections("wh3at and spe1t"), "WHEAT and spelt");
    }

    #[test]
    fn table_from_settings_can_drop_builtins() {
        let mut settings = TextSettings {
            use_default_corrections: false,
            ..TextSettings::default()
        };
        settings.corrections.insert("r1ce".into(), "rice".into());
        let table = CorrectionTable::from_settings(&settings);
        assert_eq!(table.len(), 1);
        let n = TextNormalizer::new(&table);
        assert_eq!(n.apply_corrections("c0rn r1ce"), "c0rn rice");
    }

    #[test]
    fn non_word_prefix_entry_still_matches() {
        let n = normalizer();
        assert_eq!(n.apply_corrections("|ngredients: water"), "ingredients: water");
    }

    #[test]
    fn nutrition_block_stripped_until_ingredients() {
        let text = "Nutrition Facts 100 kcal fat 2g INGREDIENTS: water, salt";
        assert_eq!(strip_nutrition(text), "INGREDIENTS: water, salt");
    }

    #[test]
    fn nutrition_block_stripped_until_blank_line() {
        let text = "Nutritional info\nfat 2g\n\nMade in Canada";
        assert_eq!(strip_nutrition(text).trim(), "Made in Canada");
    }

    #[test]
    fn serving_and_calorie_blocks_stripped_to_end() {
        let text = "Ingredients: oats, honey. Serving size 30g Calories 120";
        assert_eq!(strip_nutrition(text).trim(), "Ingredients: oats, honey.");
    }

    #[test]
    fn isolation_without_header_leaves_text() {
        assert_eq!(isolate_ingredients("water, salt"), "water, salt");
    }

    #[test]
    fn punctuation_cleanup() {
        assert_eq!(
            clean_punctuation("water ,,salt ..  sugar:rice\n\nflour"),
            "water, salt. sugar: rice flour"
        );
    }

    #[test]
    fn allergen_clauses_are_relocated() {
        let n = normalizer();
        let out = n.normalize(
            "Ingredients: flour, sugar. Contains: wheat, soy. May contain: tree nuts.",
        );
        assert_eq!(
            out,
            "Ingredients: flour, sugar.\nCONTAINS: wheat, soy\nMAY CONTAIN: tree nuts"
        );
    }

    #[test]
    fn multiple_contains_clauses_are_joined() {
        let out = relocate_allergen_clauses("rice. Contains: milk. Contains: egg.");
        assert_eq!(out, "rice.\nCONTAINS: milk, egg");
    }

    #[test]
    fn dangling_markers_are_dropped() {
        let n = normalizer();
        assert_eq!(
            n.normalize("Ingredients: rice, salt. Contains: milk. May contain:"),
            "Ingredients: rice, salt.\nCONTAINS: milk"
        );
        assert_eq!(
            n.normalize("Ingredients: sugar, cocoa. Contains: milk, soy. Allergen info: may contain"),
            "Ingredients: sugar, cocoa. Allergen info:\nCONTAINS: milk, soy"
        );
    }

    #[test]
    fn definite_allergens_stay_definite_on_renormalize() {
        let n = normalizer();
        let once = n.normalize("Ingredients: rice. Contains: milk. May contain:");
        let twice = n.normalize(&once);
        assert!(twice.contains("CONTAINS: milk"));
        assert!(!twice.contains("MAY CONTAIN"));
    }

    #[test]
    fn empty_input_is_empty() {
        let n = normalizer();
        assert_eq!(n.normalize(""), "");
        assert_eq!(n.normalize("   \n "), "");
        assert_eq!(strip_nutrition(""), "");
        assert_eq!(isolate_ingredients(""), "");
        assert_eq!(clean_punctuation(""), "");
        assert_eq!(relocate_allergen_clauses(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let n = normalizer();
        let samples = [
            "lngredients: c0rn starch, g1uten, sall",
            "NUTRITION FACTS\nServing size 1 cup\n\nINGREDIENTS:: enriched f1our,, sugar .. Contains: wh3at. May contain: peanuts",
            "water , salt ; vinegar",
            "Contains: milk",
            "Ingredients:",
            "Calories 200 Ingredients. rice, mi1k",
            "random text with no structure at all",
            "Ingredients: oats. CONTAINS: wheat MAY CONTAIN: barley",
            "Ingredients: rice, salt. Contains: milk. May contain:",
            "Ingredients: sugar, cocoa. Contains: milk, soy. Allergen info: may contain",
            "Ingredients: rice, allergen info contains",
        ];
        for sample in samples {
            let once = n.normalize(sample);
            assert_eq!(n.normalize(&once), once, "not idempotent for {sample:?}");
        }
    }
}
