use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::types::RecognitionResult;

/// Words that suggest a candidate read part of an ingredient panel.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "flour", "sugar", "salt", "oil", "water", "wheat", "starch", "milk", "corn", "soy", "yeast",
    "contains",
];

const INGREDIENTS_SCORE: u32 = 100;
const KEYWORD_SCORE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Longest text plus every missing word from the other passes.
    #[default]
    Combine,
    /// Highest-confidence pass wins.
    Best,
    /// Keyword-scored selection, union when nothing scores.
    FoodLabel,
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionMode::Combine => write!(f, "combine"),
            FusionMode::Best => write!(f, "best"),
            FusionMode::FoodLabel => write!(f, "food_label"),
        }
    }
}

impl std::str::FromStr for FusionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combine" => Ok(FusionMode::Combine),
            "best" => Ok(FusionMode::Best),
            "food_label" => Ok(FusionMode::FoodLabel),
            other => Err(format!("Unknown fusion mode: '{other}'")),
        }
    }
}

/// Merge recognized candidates into one text. `None` only when `results` is empty.
pub fn fuse(results: &[RecognitionResult], mode: FusionMode, keywords: &[String]) -> Option<String> {
    match results {
        [] => None,
        [only] => Some(only.text().to_string()),
        _ => Some(match mode {
            FusionMode::Combine => union(results),
            FusionMode::Best => best_confidence(results).to_string(),
            FusionMode::FoodLabel => by_keywords(results, keywords),
        }),
    }
}

/// Union fusion. The base is the longest text (earliest on ties); any token
/// longer than two characters that is not already a case-insensitive
/// substring of the growing base is appended in first-seen order.
pub fn union(results: &[RecognitionResult]) -> String {
    let Some(base_idx) = longest(results) else {
        return String::new();
    };
    let mut fused = results[base_idx].text().to_string();
    let mut fused_lower = fused.to_lowercase();
    let mut seen = HashSet::new();

    for result in results {
        for token in result.text().split_whitespace() {
            let token = token.to_lowercase();
            if token.chars().count() <= 2 || !seen.insert(token.clone()) {
                continue;
            }
            if fused_lower.contains(&token) {
                continue;
            }
            if !fused.is_empty() {
                fused.push(' ');
                fused_lower.push(' ');
            }
            fused.push_str(&token);
            fused_lower.push_str(&token);
        }
    }
    fused
}

fn longest(results: &[RecognitionResult]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (i, r) in results.iter().enumerate() {
        let len = r.text().chars().count();
        if best.map_or(true, |(_, l)| len > l) {
            best = Some((i, len));
        }
    }
    best.map(|(i, _)| i)
}

fn best_confidence(results: &[RecognitionResult]) -> &str {
    let mut best = &results[0];
    for r in &results[1..] {
        if r.confidence() > best.confidence() {
            best = r;
        }
    }
    best.text()
}

fn keyword_score(text: &str, keywords: &[String]) -> u32 {
    let lower = text.to_lowercase();
    let mut score = 0;
    if lower.contains("ingredients") {
        score += INGREDIENTS_SCORE;
    }
    if keywords.iter().any(|k| !k.is_empty() && lower.contains(&k.to_lowercase())) {
        score += KEYWORD_SCORE;
    }
    score
}

fn by_keywords(results: &[RecognitionResult], keywords: &[String]) -> String {
    let mut best: Option<(&RecognitionResult, u32, usize)> = None;
    for r in results {
        let score = keyword_score(r.text(), keywords);
        let len = r.text().chars().count();
        let better = match best {
            None => true,
            Some((_, s, l)) => (score, len) > (s, l),
        };
        if better {
            best = Some((r, score, len));
        }
    }
    match best {
        Some((r, score, _)) if score > 0 => r.text().to_string(),
        _ => {
            tracing::debug!("no keyword matched, falling back to union");
            union(results)
        }
    }
}

pub fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}
