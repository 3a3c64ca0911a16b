//! Coupled constant-pool permutation

use ljbc_bytecode::Prototype;
use tracing::trace;

use crate::diff::ConstantMapping;
use crate::error::{PatchError, PatchResult};

/// Permute the GC constants of `proto` and rewrite every operand that
/// indexes them
///
/// `mapping` sends a new index to the old index whose constant moves there.
/// Keys and values must be the same set of in-range indices; positions not
/// named stay where they are. Either the pool and all operands change
/// together or nothing changes.
pub fn remap_constant_indices(
    proto: &mut Prototype,
    mapping: &ConstantMapping,
) -> PatchResult<()> {
    let len = proto.constants.len();
    let new_to_old = permutation(len, mapping)?;

    let mut old_to_new = vec![0u32; len];
    for (new, &old) in new_to_old.iter().enumerate() {
        old_to_new[old as usize] = new as u32;
    }

    let mut instructions = proto.instructions.clone();
    for (pc, instr) in instructions.iter_mut().enumerate() {
        let Some(old) = instr.constant_index() else {
            continue;
        };
        let new = *old_to_new
            .get(old as usize)
            .ok_or(PatchError::ConstantOperandOutOfRange { pc, index: old })?;
        if new != old {
            *instr = instr
                .with_constant_index(new)
                .ok_or(PatchError::ConstantOperandOverflow { pc, index: new })?;
            trace!(target: "ljbc::patch", pc, old, new, "constant operand rewritten");
        }
    }

    let constants = new_to_old
        .iter()
        .map(|&old| proto.constants[old as usize].clone())
        .collect();

    proto.constants = constants;
    proto.instructions = instructions;
    Ok(())
}

/// Expand a partial mapping into a full new -> old table
fn permutation(len: usize, mapping: &ConstantMapping) -> PatchResult<Vec<u32>> {
    let mut new_to_old: Vec<u32> = (0..len as u32).collect();
    let mut targets: Vec<u32> = mapping.values().copied().collect();
    targets.sort_unstable();

    if !targets.iter().copied().eq(mapping.keys().copied()) {
        return Err(PatchError::InvalidPermutation(format!(
            "mapping keys {:?} and values {:?} differ",
            mapping.keys().collect::<Vec<_>>(),
            targets
        )));
    }
    for (&new, &old) in mapping {
        if new as usize >= len {
            return Err(PatchError::InvalidPermutation(format!(
                "index {new} outside a pool of {len}"
            )));
        }
        new_to_old[new as usize] = old;
    }
    Ok(new_to_old)
}
