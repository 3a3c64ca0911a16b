//! Comparator output

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Constant index mapping for one prototype: new (reference) index -> old (target) index
pub type ConstantMapping = BTreeMap<u32, u32>;

/// Differences between a reference image and a target image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BytecodeDiff {
    /// Version, flags or chunk name differ
    pub header_different: bool,
    /// Prototype counts differ
    pub prototype_count_different: bool,
    /// Some prototype has opcodes at different positions
    pub instruction_order_different: bool,
    /// Some prototype holds the same constants in a different order
    pub constant_indices_different: bool,

    /// Shared prototype indices whose shape differs
    pub different_prototypes: Vec<u32>,
    /// Prototype index -> instruction positions whose opcode differs
    pub instruction_order_diffs: BTreeMap<u32, Vec<u32>>,
    /// Prototype index -> constant alignment
    pub constant_index_mapping: BTreeMap<u32, ConstantMapping>,

    /// Similarity score
    pub similarity: f64,
}

impl BytecodeDiff {
    /// No structural difference was found
    pub fn is_identical(&self) -> bool {
        !self.header_different
            && !self.prototype_count_different
            && !self.instruction_order_different
            && !self.constant_indices_different
            && self.different_prototypes.is_empty()
    }
}

impl fmt::Display for BytecodeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "similarity: {:.2}%", self.similarity * 100.0)?;
        if self.is_identical() {
            return writeln!(f, "structurally identical");
        }
        if self.header_different {
            writeln!(f, "header differs")?;
        }
        if self.prototype_count_different {
            writeln!(f, "prototype count differs")?;
        }
        if !self.different_prototypes.is_empty() {
            writeln!(f, "prototypes with different shape: {:?}", self.different_prototypes)?;
        }
        for (proto, positions) in &self.instruction_order_diffs {
            writeln!(f, "prototype {proto}: opcodes differ at {positions:?}")?;
        }
        for (proto, mapping) in &self.constant_index_mapping {
            let moves: Vec<String> = mapping
                .iter()
                .filter(|(new, old)| new != old)
                .map(|(new, old)| format!("{old}->{new}"))
                .collect();
            writeln!(f, "prototype {proto}: constants move {}", moves.join(", "))?;
        }
        Ok(())
    }
}
