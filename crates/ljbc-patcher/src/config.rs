//! Patcher configuration

use serde::{Deserialize, Serialize};

/// How per-prototype similarity contributions are scaled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMode {
    /// Divide each contribution by `1 + constant_count_bonus`, keeping scores in [0, 1]
    #[default]
    Normalized,
    /// Instruction term plus the bonus, unscaled; identical images score above 1
    Raw,
}

/// Tunables for comparison and patching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Added to a prototype's score when both constant pools have the same length
    pub constant_count_bonus: f64,
    /// Scaling of per-prototype scores
    pub similarity_mode: SimilarityMode,
    /// Refuse reorders that separate a conditional test from its jump
    pub keep_test_jump_pairs: bool,
    /// Let structural patches copy the reference's JIT hint flags
    pub adopt_hint_flags: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            constant_count_bonus: 0.1,
            similarity_mode: SimilarityMode::Normalized,
            keep_test_jump_pairs: true,
            adopt_hint_flags: true,
        }
    }
}

impl PatchConfig {
    /// Configuration reproducing the unnormalised scoring
    pub fn raw_similarity() -> Self {
        Self {
            similarity_mode: SimilarityMode::Raw,
            ..Self::default()
        }
    }
}
