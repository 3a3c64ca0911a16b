//! Structural comparison of two bytecode images
//!
//! The comparator never mutates its inputs. Work is done pairwise over the
//! prototypes both images share by index.

use ljbc_bytecode::{Bytecode, Constant, Instruction, Prototype};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PatchConfig, SimilarityMode};
use crate::diff::{BytecodeDiff, ConstantMapping};

/// Similarity terms of one prototype pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrototypeScore {
    /// Fraction of positions holding identical instructions
    pub instruction_term: f64,
    /// Bonus granted for equal constant counts
    pub constant_bonus: f64,
    /// Value entering the mean
    pub contribution: f64,
}

/// Structural comparator
#[derive(Debug, Clone)]
pub struct Comparator {
    constant_count_bonus: f64,
    mode: SimilarityMode,
}

impl Comparator {
    /// Create a comparator with default scoring
    pub fn new() -> Self {
        Self::with_config(&PatchConfig::default())
    }

    /// Create a comparator scoring as `config` says
    pub fn with_config(config: &PatchConfig) -> Self {
        Self {
            constant_count_bonus: config.constant_count_bonus,
            mode: config.similarity_mode,
        }
    }

    /// Describe how `target` differs from `reference`
    ///
    /// Constant mappings send reference positions to target positions, the
    /// form [`crate::remap_constant_indices`] applies to the target.
    pub fn compare(&self, reference: &Bytecode, target: &Bytecode) -> BytecodeDiff {
        let mut diff = BytecodeDiff {
            header_different: reference.header != target.header,
            prototype_count_different: reference.prototypes.len() != target.prototypes.len(),
            ..BytecodeDiff::default()
        };

        for (index, (r, t)) in reference.prototypes.iter().zip(&target.prototypes).enumerate() {
            let index = index as u32;
            if !r.same_shape(t) {
                diff.different_prototypes.push(index);
            }

            if r.instructions.len() == t.instructions.len() {
                let positions = opcode_diffs(&r.instructions, &t.instructions);
                if !positions.is_empty() {
                    diff.instruction_order_different = true;
                    diff.instruction_order_diffs.insert(index, positions);
                }
            }

            if let Some(mapping) = align_constants(&r.constants, &t.constants)
                && mapping.iter().any(|(new, old)| new != old)
            {
                diff.constant_indices_different = true;
                diff.constant_index_mapping.insert(index, mapping);
            }
        }

        diff.similarity = self.similarity(reference, target);
        debug!(
            target: "ljbc::compare",
            similarity = diff.similarity,
            header = diff.header_different,
            count = diff.prototype_count_different,
            shapes = diff.different_prototypes.len(),
            reordered = diff.instruction_order_diffs.len(),
            remapped = diff.constant_index_mapping.len(),
            "images compared"
        );
        diff
    }

    /// Similarity score, 0 when prototype counts differ
    ///
    /// Mean of the per-prototype contributions. Two images without
    /// prototypes score 1.
    pub fn similarity(&self, a: &Bytecode, b: &Bytecode) -> f64 {
        if a.prototypes.len() != b.prototypes.len() {
            return 0.0;
        }
        if a.prototypes.is_empty() {
            return 1.0;
        }
        let scores = self.similarity_breakdown(a, b);
        scores.iter().map(|s| s.contribution).sum::<f64>() / scores.len() as f64
    }

    /// Per-prototype scores over the prototypes both images share
    pub fn similarity_breakdown(&self, a: &Bytecode, b: &Bytecode) -> Vec<PrototypeScore> {
        a.prototypes
            .iter()
            .zip(&b.prototypes)
            .map(|(pa, pb)| self.score(pa, pb))
            .collect()
    }

    fn score(&self, a: &Prototype, b: &Prototype) -> PrototypeScore {
        let instruction_term = instruction_term(&a.instructions, &b.instructions);
        let constant_bonus = if a.constants.len() == b.constants.len() {
            self.constant_count_bonus
        } else {
            0.0
        };
        let contribution = match self.mode {
            SimilarityMode::Normalized => {
                (instruction_term + constant_bonus) / (1.0 + self.constant_count_bonus)
            }
            SimilarityMode::Raw => instruction_term + constant_bonus,
        };
        PrototypeScore {
            instruction_term,
            constant_bonus,
            contribution,
        }
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new()
    }
}

fn instruction_term(a: &[Instruction], b: &[Instruction]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    if a.is_empty() {
        return 1.0;
    }
    let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
    same as f64 / a.len() as f64
}

/// Positions whose opcode differs between two streams of equal length
pub fn opcode_diffs(reference: &[Instruction], target: &[Instruction]) -> Vec<u32> {
    reference
        .iter()
        .zip(target)
        .enumerate()
        .filter(|(_, (r, t))| r.op != t.op)
        .map(|(pc, _)| pc as u32)
        .collect()
}

/// Align two constant pools of equal length
///
/// Returns reference position -> target position. Each reference constant
/// first keeps its own position when the target holds the same value there,
/// then takes the first unused target constant of equal value, then the
/// first unused one that is semantically equal. `None` when some constant
/// finds no partner.
pub fn align_constants(reference: &[Constant], target: &[Constant]) -> Option<ConstantMapping> {
    if reference.len() != target.len() {
        return None;
    }

    let mut assigned: Vec<Option<usize>> = vec![None; reference.len()];
    let mut used = vec![false; target.len()];

    for (new, constant) in reference.iter().enumerate() {
        if constant.value_eq(&target[new]) {
            assigned[new] = Some(new);
            used[new] = true;
        }
    }

    let passes: [fn(&Constant, &Constant) -> bool; 2] =
        [Constant::value_eq, Constant::semantic_eq];
    for matches in passes {
        for (new, constant) in reference.iter().enumerate() {
            if assigned[new].is_some() {
                continue;
            }
            let found =
                (0..target.len()).find(|&old| !used[old] && matches(constant, &target[old]));
            if let Some(old) = found {
                assigned[new] = Some(old);
                used[old] = true;
            }
        }
    }

    assigned
        .into_iter()
        .enumerate()
        .map(|(new, old)| old.map(|old| (new as u32, old as u32)))
        .collect()
}
