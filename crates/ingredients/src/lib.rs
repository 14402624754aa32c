pub mod normalize;
pub mod rules;
pub(crate) mod util;

pub use normalize::{CorrectionTable, TextNormalizer};
pub use rules::{IngredientRuleEngine, RulesError};
