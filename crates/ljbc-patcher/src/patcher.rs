//! Patch driver
//!
//! Rewrites a target image so it structurally resembles a reference image.
//! Every strategy checks its whole-image preconditions before touching
//! anything; after that, failures are per prototype and recorded in the
//! returned [`PatchReport`] while the remaining prototypes are still patched.

use ljbc_bytecode::{Bytecode, Instruction, ProtoFlags, Prototype};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compare::Comparator;
use crate::config::PatchConfig;
use crate::diff::BytecodeDiff;
use crate::error::{PatchError, PatchResult};
use crate::remap::remap_constant_indices;
use crate::reorder::reorder_instructions;

/// Patch strategies, from least to most invasive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    /// Adopt value-equal constant representations only
    ConstantsOnly,
    /// Reorder instructions to follow the reference
    InstructionOrder,
    /// Prototype header fields, then the combined patch, then constants
    FullStructural,
}

/// What a patch run changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    /// Header copied from the reference
    pub header_replaced: bool,
    /// Constant slots whose representation was adopted
    pub constants_adopted: usize,
    /// Prototypes whose constant pool was permuted
    pub remapped: Vec<u32>,
    /// Prototypes whose instructions were reordered
    pub reordered: Vec<u32>,
    /// Prototypes whose header fields changed
    pub restructured: Vec<u32>,
    /// Prototypes left untouched, with the reason
    pub skipped: Vec<(u32, PatchError)>,
}

impl PatchReport {
    /// Nothing was skipped
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Fold the results of a later step into this report
    pub fn merge(&mut self, other: PatchReport) {
        self.header_replaced |= other.header_replaced;
        self.constants_adopted += other.constants_adopted;
        self.remapped.extend(other.remapped);
        self.reordered.extend(other.reordered);
        self.restructured.extend(other.restructured);
        self.skipped.extend(other.skipped);
    }

    fn skip(&mut self, proto: u32, err: PatchError) {
        warn!(target: "ljbc::patch", proto, error = %err, "prototype skipped");
        self.skipped.push((proto, err));
    }
}

/// Bytecode patcher
#[derive(Debug, Clone, Default)]
pub struct BytecodePatcher {
    config: PatchConfig,
}

impl BytecodePatcher {
    /// Create a patcher with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a patcher with the given configuration
    pub fn with_config(config: PatchConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Compare `target` against `reference`, see [`Comparator::compare`]
    pub fn compare(&self, reference: &Bytecode, target: &Bytecode) -> BytecodeDiff {
        Comparator::with_config(&self.config).compare(reference, target)
    }

    /// Similarity score, see [`Comparator::similarity`]
    pub fn similarity(&self, a: &Bytecode, b: &Bytecode) -> f64 {
        Comparator::with_config(&self.config).similarity(a, b)
    }

    /// Run one strategy end to end
    pub fn apply(
        &self,
        strategy: PatchStrategy,
        target: &mut Bytecode,
        reference: &Bytecode,
    ) -> PatchResult<PatchReport> {
        debug!(target: "ljbc::patch", ?strategy, "applying patch strategy");
        match strategy {
            PatchStrategy::ConstantsOnly => self.patch_constants_only(target, reference),
            PatchStrategy::InstructionOrder => self.patch_instruction_order(target, reference),
            PatchStrategy::FullStructural => {
                let mut report = self.patch_prototype_structure(target, reference)?;
                let diff = self.compare(reference, target);
                report.merge(self.patch(target, reference, &diff)?);
                report.merge(self.patch_constants_only(target, reference)?);
                Ok(report)
            }
        }
    }

    /// Apply what `diff` asks for
    ///
    /// Header first, then every constant remap, then instruction reordering
    /// for the prototypes with opcode differences. A prototype whose remap
    /// failed is not reordered.
    pub fn patch(
        &self,
        target: &mut Bytecode,
        reference: &Bytecode,
        diff: &BytecodeDiff,
    ) -> PatchResult<PatchReport> {
        let mut report = PatchReport::default();

        if diff.header_different {
            target.header = reference.header.clone();
            report.header_replaced = true;
            debug!(target: "ljbc::patch", version = ?target.header.version, "header replaced");
        }

        for (&index, mapping) in &diff.constant_index_mapping {
            let result = target
                .prototypes
                .get_mut(index as usize)
                .ok_or(PatchError::PrototypeOutOfRange(index))
                .and_then(|proto| remap_constant_indices(proto, mapping));
            match result {
                Ok(()) => report.remapped.push(index),
                Err(err) => report.skip(index, err),
            }
        }

        for &index in diff.instruction_order_diffs.keys() {
            if report.skipped.iter().any(|(p, _)| *p == index) {
                continue;
            }
            match self.reorder_like(target, reference, index) {
                Ok(true) => report.reordered.push(index),
                Ok(false) => {}
                Err(err) => report.skip(index, err),
            }
        }

        debug!(
            target: "ljbc::patch",
            remapped = report.remapped.len(),
            reordered = report.reordered.len(),
            skipped = report.skipped.len(),
            "combined patch done"
        );
        Ok(report)
    }

    /// Adopt reference constants that hold the same value as the target's
    ///
    /// Only positions whose constants are value-equal change, so operands
    /// keep referring to the same values. Instructions are never touched and
    /// a second run changes nothing.
    pub fn patch_constants_only(
        &self,
        target: &mut Bytecode,
        reference: &Bytecode,
    ) -> PatchResult<PatchReport> {
        check_counts(target, reference)?;
        let mut report = PatchReport::default();

        for (t, r) in target.prototypes.iter_mut().zip(&reference.prototypes) {
            if t.constants.len() == r.constants.len() {
                for (tc, rc) in t.constants.iter_mut().zip(&r.constants) {
                    if tc != rc && tc.value_eq(rc) {
                        *tc = rc.clone();
                        report.constants_adopted += 1;
                    }
                }
            }
            if t.number_constants.len() == r.number_constants.len() {
                for (tn, rn) in t.number_constants.iter_mut().zip(&r.number_constants) {
                    if tn.tag() != rn.tag() && tn.value_eq(rn) {
                        *tn = *rn;
                        report.constants_adopted += 1;
                    }
                }
            }
        }

        debug!(target: "ljbc::patch", adopted = report.constants_adopted, "constants patched");
        Ok(report)
    }

    /// Reorder every prototype's instructions to follow the reference
    pub fn patch_instruction_order(
        &self,
        target: &mut Bytecode,
        reference: &Bytecode,
    ) -> PatchResult<PatchReport> {
        check_counts(target, reference)?;
        let mut report = PatchReport::default();

        for index in 0..target.prototypes.len() as u32 {
            match self.reorder_like(target, reference, index) {
                Ok(true) => report.reordered.push(index),
                Ok(false) => {}
                Err(err) => report.skip(index, err),
            }
        }
        Ok(report)
    }

    /// Bring prototype header fields in line with the reference
    ///
    /// Parameter count and the vararg flag must already agree. The frame
    /// grows to the reference's size when that is larger, and JIT hint flags
    /// are copied when configured.
    pub fn patch_prototype_structure(
        &self,
        target: &mut Bytecode,
        reference: &Bytecode,
    ) -> PatchResult<PatchReport> {
        check_counts(target, reference)?;
        let mut report = PatchReport::default();

        let pairs = target.prototypes.iter_mut().zip(&reference.prototypes);
        for (index, (t, r)) in pairs.enumerate() {
            let index = index as u32;
            match restructure(t, r, self.config.adopt_hint_flags, index) {
                Ok(true) => report.restructured.push(index),
                Ok(false) => {}
                Err(err) => report.skip(index, err),
            }
        }
        Ok(report)
    }

    /// Reorder prototype `index` of `target` after its reference twin
    ///
    /// `Ok(false)` when the instructions already line up.
    fn reorder_like(
        &self,
        target: &mut Bytecode,
        reference: &Bytecode,
        index: u32,
    ) -> PatchResult<bool> {
        let r = reference
            .prototypes
            .get(index as usize)
            .ok_or(PatchError::PrototypeOutOfRange(index))?;
        let t = target
            .prototypes
            .get_mut(index as usize)
            .ok_or(PatchError::PrototypeOutOfRange(index))?;

        if t.instructions.len() != r.instructions.len() {
            return Err(PatchError::LengthMismatch {
                proto: index,
                what: "instruction",
                target: t.instructions.len(),
                reference: r.instructions.len(),
            });
        }

        let order = match_instructions(&r.instructions, &t.instructions)
            .ok_or(PatchError::NoInstructionMatch(index))?;
        if order.iter().enumerate().all(|(new, &old)| new == old as usize) {
            return Ok(false);
        }
        reorder_instructions(t, &order, &self.config)?;
        debug!(target: "ljbc::patch", proto = index, "instructions reordered");
        Ok(true)
    }
}

fn check_counts(target: &Bytecode, reference: &Bytecode) -> PatchResult<()> {
    if target.prototypes.len() != reference.prototypes.len() {
        return Err(PatchError::PrototypeCountMismatch {
            target: target.prototypes.len(),
            reference: reference.prototypes.len(),
        });
    }
    Ok(())
}

fn restructure(
    target: &mut Prototype,
    reference: &Prototype,
    adopt_hints: bool,
    index: u32,
) -> PatchResult<bool> {
    if target.param_count != reference.param_count {
        return Err(PatchError::IncompatibleShape {
            proto: index,
            what: "parameter count",
        });
    }
    if target.is_vararg() != reference.is_vararg() {
        return Err(PatchError::IncompatibleShape {
            proto: index,
            what: "vararg flag",
        });
    }

    let mut changed = false;
    if reference.frame_size > target.frame_size {
        target.frame_size = reference.frame_size;
        changed = true;
    }
    if adopt_hints {
        let hints = ProtoFlags::HINTS.bits();
        let flags = ProtoFlags::from_bits(
            (target.flags.bits() & !hints) | (reference.flags.bits() & hints),
        );
        if flags != target.flags {
            target.flags = flags;
            changed = true;
        }
    }
    Ok(changed)
}

/// Matching key: jumps are paired by opcode and A since their offsets change
fn match_key(instr: &Instruction) -> Instruction {
    if instr.op.is_jump() {
        Instruction::ad(instr.op, instr.a, 0)
    } else {
        *instr
    }
}

/// Permutation (new -> old) placing target instructions where the reference
/// has them
///
/// Instructions already at a matching position stay. The rest take the
/// lowest unused matching target position.
fn match_instructions(reference: &[Instruction], target: &[Instruction]) -> Option<Vec<u32>> {
    let mut order: Vec<Option<u32>> = vec![None; reference.len()];
    let mut used = vec![false; target.len()];

    for (pc, (r, t)) in reference.iter().zip(target).enumerate() {
        if match_key(r) == match_key(t) {
            order[pc] = Some(pc as u32);
            used[pc] = true;
        }
    }

    let mut candidates: FxHashMap<Instruction, Vec<u32>> = FxHashMap::default();
    for (pc, t) in target.iter().enumerate().rev() {
        if !used[pc] {
            candidates.entry(match_key(t)).or_default().push(pc as u32);
        }
    }

    for (slot, r) in order.iter_mut().zip(reference) {
        if slot.is_none() {
            *slot = Some(candidates.get_mut(&match_key(r))?.pop()?);
        }
    }
    order.into_iter().collect()
}
