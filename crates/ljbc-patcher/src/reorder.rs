//! Instruction permutation with jump retargeting

use ljbc_bytecode::{JumpOffset, Prototype, VarInfo};
use tracing::{debug, trace, warn};

use crate::config::PatchConfig;
use crate::dataflow::check_dependencies;
use crate::error::{PatchError, PatchResult};

/// Rearrange the instructions of `proto`
///
/// `new_order[new]` is the old position of the instruction placed at `new`.
/// The permutation is refused when it would break a register or memory
/// dependency or split a test from its jump. Jumps are re-encoded to land on
/// the same instruction as before (a jump to the end of the stream stays at
/// the end) and the debug line map follows the instructions. Variable scope
/// ranges are not rewritten. Nothing is modified on error.
pub fn reorder_instructions(
    proto: &mut Prototype,
    new_order: &[u32],
    config: &PatchConfig,
) -> PatchResult<()> {
    let len = proto.instructions.len();
    let position = inverse(new_order, len)?;
    check_dependencies(&proto.instructions, new_order, config.keep_test_jump_pairs)?;

    let mut instructions = Vec::with_capacity(len);
    for (new, &old) in new_order.iter().enumerate() {
        let old = old as usize;
        let mut instr = proto.instructions[old];
        if let Some(target) = instr.jump_target(old) {
            let new_target = match usize::try_from(target) {
                Ok(t) if t < len => position[t],
                Ok(t) if t == len => len,
                _ => return Err(PatchError::JumpOutOfRange { pc: old, target }),
            };
            let offset = JumpOffset::between(new, new_target);
            instr.d = offset.to_d().ok_or(PatchError::JumpOffsetOverflow {
                pc: new,
                offset: offset.offset(),
            })?;
            trace!(
                target: "ljbc::patch",
                op = instr.op.name(),
                from = new,
                to = new_target,
                "jump retargeted"
            );
        }
        instructions.push(instr);
    }

    if let Some(info) = proto.debug.as_mut() {
        if info.line_map.len() == len {
            info.line_map = new_order.iter().map(|&old| info.line_map[old as usize]).collect();
        } else {
            warn!(
                target: "ljbc::patch",
                lines = info.line_map.len(),
                instructions = len,
                "line map does not cover the instructions, left as is"
            );
        }
        let named = info
            .variables
            .iter()
            .filter(|v| matches!(v, VarInfo::Named { .. }))
            .count();
        if named > 0 {
            debug!(target: "ljbc::patch", named, "variable scope ranges kept as is");
        }
    }
    proto.instructions = instructions;
    Ok(())
}

/// Validate `new_order` and return old -> new positions
fn inverse(new_order: &[u32], len: usize) -> PatchResult<Vec<usize>> {
    if new_order.len() != len {
        return Err(PatchError::InvalidPermutation(format!(
            "{} positions for {len} instructions",
            new_order.len()
        )));
    }
    let mut position = vec![usize::MAX; len];
    for (new, &old) in new_order.iter().enumerate() {
        match position.get_mut(old as usize) {
            Some(slot) if *slot == usize::MAX => *slot = new,
            Some(_) => {
                return Err(PatchError::InvalidPermutation(format!(
                    "position {old} used twice"
                )));
            }
            None => {
                return Err(PatchError::InvalidPermutation(format!(
                    "position {old} outside {len} instructions"
                )));
            }
        }
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ljbc_bytecode::{DebugInfo, Instruction, Opcode};

    fn kshort(reg: u8) -> Instruction {
        Instruction::ad(Opcode::KShort, reg, reg as u16)
    }

    /// 2 jumps over 3 and 4 to 5
    fn jumping() -> Prototype {
        Prototype::builder()
            .frame_size(6)
            .instruction(kshort(0))
            .instruction(kshort(1))
            .instruction(Instruction::ad(Opcode::Jmp, 0, 0x8002))
            .instruction(kshort(2))
            .instruction(kshort(3))
            .instruction(kshort(5))
            .instruction(Instruction::ad(Opcode::Ret1, 5, 2))
            .build()
    }

    #[test]
    fn test_jump_follows_its_target() {
        let mut p = jumping();
        reorder_instructions(&mut p, &[0, 5, 1, 2, 3, 4, 6], &PatchConfig::default()).unwrap();

        assert_eq!(p.instructions[1], kshort(5));
        assert_eq!(p.instructions[3].op, Opcode::Jmp);
        assert_eq!(p.instructions[3].d, 0x7FFD);
        assert_eq!(p.instructions[3].jump_target(3), Some(1));
    }

    #[test]
    fn test_jump_to_end() {
        let mut p = Prototype::builder()
            .instruction(Instruction::ad(Opcode::Jmp, 0, 0x8002))
            .instruction(kshort(0))
            .instruction(kshort(1))
            .build();
        reorder_instructions(&mut p, &[1, 2, 0], &PatchConfig::default()).unwrap();
        assert_eq!(p.instructions[2].jump_target(2), Some(3));
    }

    #[test]
    fn test_line_map_follows() {
        let mut p = jumping();
        p.debug = Some(DebugInfo {
            line_map: vec![10, 11, 12, 13, 14, 15, 16],
            ..DebugInfo::default()
        });
        reorder_instructions(&mut p, &[1, 0, 2, 3, 4, 5, 6], &PatchConfig::default()).unwrap();
        assert_eq!(p.debug.unwrap().line_map, vec![11, 10, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn test_scope_ranges_kept() {
        let mut p = jumping();
        let local = VarInfo::Named {
            name: "x".to_owned(),
            is_parameter: false,
            scope_begin: 1,
            scope_end: 6,
        };
        p.debug = Some(DebugInfo {
            line_map: vec![1; 7],
            variables: vec![VarInfo::ForIndex, local.clone()],
            ..DebugInfo::default()
        });
        reorder_instructions(&mut p, &[1, 0, 2, 3, 4, 5, 6], &PatchConfig::default()).unwrap();
        let info = p.debug.unwrap();
        assert_eq!(info.variables, vec![VarInfo::ForIndex, local]);
        assert_eq!(p.instructions[0], kshort(1));
    }

    #[test]
    fn test_rejects_bad_permutations() {
        let mut p = jumping();
        let before = p.clone();
        let config = PatchConfig::default();
        for order in [&[0, 1, 2][..], &[0, 0, 1, 2, 3, 4, 5], &[0, 1, 2, 3, 4, 5, 9]] {
            assert!(matches!(
                reorder_instructions(&mut p, order, &config),
                Err(PatchError::InvalidPermutation(_))
            ));
        }
        assert_eq!(p, before);
    }

    #[test]
    fn test_rejects_dependency_violation() {
        let mut p = jumping();
        let before = p.clone();
        let err = reorder_instructions(&mut p, &[0, 1, 2, 3, 4, 6, 5], &PatchConfig::default());
        assert!(matches!(err, Err(PatchError::DependencyViolation { register: 5, .. })));
        assert_eq!(p, before);
    }

    #[test]
    fn test_backward_and_forward_jumps_move_together() {
        let mut p = Prototype::builder()
            .frame_size(4)
            .instruction(kshort(0))
            .instruction(kshort(1))
            .instruction(Instruction::jump(Opcode::Jmp, 0, 2, 4).unwrap())
            .instruction(kshort(2))
            .instruction(kshort(3))
            .instruction(Instruction::jump(Opcode::Jmp, 0, 5, 1).unwrap())
            .instruction(Instruction::ad(Opcode::Ret0, 0, 1))
            .build();
        assert_eq!(p.instructions[5].d, 0x7FFB);

        reorder_instructions(&mut p, &[1, 0, 4, 2, 5, 3, 6], &PatchConfig::default()).unwrap();

        // forward jump now points back, backward jump reaches further
        assert_eq!(p.instructions[3].d, 0x7FFE);
        assert_eq!(p.instructions[3].jump_target(3), Some(2));
        assert_eq!(p.instructions[2], kshort(3));
        assert_eq!(p.instructions[4].d, 0x7FFB);
        assert_eq!(p.instructions[4].jump_target(4), Some(0));
        assert_eq!(p.instructions[0], kshort(1));
    }

    #[test]
    fn test_rejects_global_swap() {
        let mut p = Prototype::builder()
            .frame_size(2)
            .instruction(Instruction::ad(Opcode::GSet, 0, 0))
            .instruction(Instruction::ad(Opcode::GGet, 1, 0))
            .instruction(Instruction::ad(Opcode::Ret1, 1, 2))
            .build();
        let before = p.clone();
        let err = reorder_instructions(&mut p, &[1, 0, 2], &PatchConfig::default());
        assert!(matches!(err, Err(PatchError::MemoryDependency { earlier: 0, later: 1, .. })));
        assert_eq!(p, before);
    }

    #[test]
    fn test_rejects_wild_jump() {
        let mut p = Prototype::builder()
            .instruction(kshort(0))
            .instruction(Instruction::ad(Opcode::Jmp, 0, 0x8010))
            .build();
        let before = p.clone();
        assert_eq!(
            reorder_instructions(&mut p, &[1, 0], &PatchConfig::default()),
            Err(PatchError::JumpOutOfRange { pc: 1, target: 18 })
        );
        assert_eq!(p, before);
    }
}
