//! End-to-end patch scenarios
//!
//! Each test builds a target and a reference image, runs the comparator and
//! a patch strategy, and checks the result through the encoder.

use ljbc_bytecode::{
    Bytecode, BytecodeVersion, Constant, ConstantTable, Header, Instruction, Opcode, ProtoFlags,
    ProtoIndex, Prototype, TableConstant, encode,
};
use ljbc_patcher::{
    BytecodePatcher, ConstantMapping, PatchConfig, PatchError, PatchStrategy,
    remap_constant_indices,
};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn image(prototypes: Vec<Prototype>) -> Bytecode {
    let main = ProtoIndex::new(prototypes.len().saturating_sub(1) as u32);
    Bytecode::new(Header::stripped(BytecodeVersion::Modified), prototypes, main)
}

fn kshort(reg: u8) -> Instruction {
    Instruction::ad(Opcode::KShort, reg, reg as u16)
}

fn three_with(strings: [&str; 2]) -> Prototype {
    Prototype::builder()
        .frame_size(2)
        .instruction(kshort(0))
        .instruction(Instruction::ad(Opcode::Mov, 1, 0))
        .instruction(Instruction::ad(Opcode::Ret0, 0, 1))
        .constant(Constant::string(strings[0]))
        .constant(Constant::string(strings[1]))
        .build()
}

#[test]
fn test_swapped_string_constants() {
    init_tracing();
    let a = image(vec![three_with(["x", "y"])]);
    let mut b = image(vec![three_with(["y", "x"])]);

    let raw = BytecodePatcher::with_config(PatchConfig::raw_similarity());
    assert!((raw.similarity(&a, &b) - 1.1).abs() < 1e-12);

    let patcher = BytecodePatcher::new();
    let diff = patcher.compare(&a, &b);
    assert_eq!(diff.similarity, 1.0);
    assert!(diff.constant_indices_different);
    let mapping = ConstantMapping::from([(0, 1), (1, 0)]);
    assert_eq!(diff.constant_index_mapping[&0], mapping);

    let instructions = b.prototypes[0].instructions.clone();
    remap_constant_indices(&mut b.prototypes[0], &mapping).unwrap();
    assert_eq!(b.prototypes[0].constants, a.prototypes[0].constants);
    assert_eq!(b.prototypes[0].instructions, instructions);
}

#[test]
fn test_jump_retargeted_after_reorder() {
    init_tracing();
    let target_proto = Prototype::builder()
        .frame_size(6)
        .instruction(kshort(0))
        .instruction(kshort(1))
        .instruction(Instruction::jump(Opcode::Jmp, 0, 2, 5).unwrap())
        .instruction(kshort(2))
        .instruction(kshort(3))
        .instruction(kshort(5))
        .instruction(Instruction::ad(Opcode::Ret1, 5, 2))
        .build();
    assert_eq!(target_proto.instructions[2].d, 0x8002);

    let order = [0u32, 5, 1, 2, 3, 4, 6];
    let mut expected = target_proto.clone();
    expected.instructions = order
        .iter()
        .map(|&old| target_proto.instructions[old as usize])
        .collect();
    expected.instructions[3] = Instruction::ad(Opcode::Jmp, 0, 0x7FFD);

    let mut target = image(vec![target_proto]);
    let reference = image(vec![expected]);
    let report = BytecodePatcher::new()
        .apply(PatchStrategy::InstructionOrder, &mut target, &reference)
        .unwrap();

    assert_eq!(report.reordered, vec![0]);
    let jmp = target.prototypes[0].instructions[3];
    assert_eq!(jmp.d, 0x7FFD);
    assert_eq!(jmp.jump_target(3), Some(1));
    assert_eq!(target.prototypes[0].instructions[1], kshort(5));
    assert_eq!(encode(&target).unwrap(), encode(&reference).unwrap());
}

fn closure_main(constants: Vec<Constant>, indices: [u16; 3]) -> Prototype {
    let mut proto = Prototype::builder()
        .frame_size(3)
        .instruction(Instruction::ad(Opcode::FNew, 0, indices[0]))
        .instruction(Instruction::ad(Opcode::GGet, 1, indices[1]))
        .instruction(Instruction::ad(Opcode::KStr, 2, indices[2]))
        .instruction(Instruction::abc(Opcode::Call, 1, 1, 2))
        .instruction(Instruction::ad(Opcode::Ret0, 0, 1))
        .flags(ProtoFlags::CHILD)
        .build();
    proto.constants = constants;
    proto
}

fn leaf() -> Prototype {
    Prototype::builder()
        .instruction(Instruction::ad(Opcode::Ret0, 0, 1))
        .build()
}

#[test]
fn test_combined_patch_keeps_operands_coupled() {
    init_tracing();
    let mut target = image(vec![
        leaf(),
        closure_main(
            vec![Constant::child(0), Constant::string("print"), Constant::string("x")],
            [0, 1, 2],
        ),
    ]);
    let reference = image(vec![
        leaf(),
        closure_main(
            vec![Constant::string("x"), Constant::child(0), Constant::string("print")],
            [1, 2, 0],
        ),
    ]);

    let patcher = BytecodePatcher::new();
    let diff = patcher.compare(&reference, &target);
    assert_eq!(
        diff.constant_index_mapping[&1],
        ConstantMapping::from([(0, 2), (1, 0), (2, 1)])
    );
    assert!(!diff.instruction_order_different);

    let before = target.prototypes[1].clone();
    let report = patcher.patch(&mut target, &reference, &diff).unwrap();
    assert_eq!(report.remapped, vec![1]);

    let after = &target.prototypes[1];
    for (old_instr, new_instr) in before.instructions.iter().zip(&after.instructions) {
        if let (Some(old), Some(new)) = (old_instr.constant_index(), new_instr.constant_index()) {
            assert!(before.constants[old as usize].semantic_eq(&after.constants[new as usize]));
        }
    }
    assert_eq!(encode(&target).unwrap(), encode(&reference).unwrap());
}

#[test]
fn test_constants_only_is_idempotent() {
    init_tracing();
    let entry =
        |k: &str, v: i32| (TableConstant::Str(k.as_bytes().to_vec()), TableConstant::Int(v));
    let table = |hash| {
        Constant::Table(ConstantTable {
            array: vec![TableConstant::Nil, TableConstant::Num(0.5)],
            hash,
        })
    };
    let proto = |t: Constant| {
        Prototype::builder()
            .frame_size(1)
            .instruction(Instruction::ad(Opcode::TDup, 0, 0))
            .instruction(Instruction::ad(Opcode::Ret1, 0, 2))
            .constant(t)
            .build()
    };
    let mut target = image(vec![proto(table(vec![entry("a", 1), entry("b", 2)]))]);
    let reference = image(vec![proto(table(vec![entry("b", 2), entry("a", 1)]))]);

    let patcher = BytecodePatcher::new();
    let first = patcher
        .apply(PatchStrategy::ConstantsOnly, &mut target, &reference)
        .unwrap();
    assert_eq!(first.constants_adopted, 1);
    let once = encode(&target).unwrap();
    assert_eq!(once, encode(&reference).unwrap());

    let second = patcher
        .apply(PatchStrategy::ConstantsOnly, &mut target, &reference)
        .unwrap();
    assert_eq!(second.constants_adopted, 0);
    assert_eq!(encode(&target).unwrap(), once);
}

#[test]
fn test_count_mismatch_leaves_target_untouched() {
    init_tracing();
    let mut target = image(vec![three_with(["x", "y"])]);
    let reference = image(vec![leaf(), three_with(["y", "x"])]);
    let before = encode(&target).unwrap();

    let err = BytecodePatcher::new()
        .patch_constants_only(&mut target, &reference)
        .unwrap_err();
    assert_eq!(err, PatchError::PrototypeCountMismatch { target: 1, reference: 2 });
    assert_eq!(encode(&target).unwrap(), before);
}

#[test]
fn test_rejected_reorder_is_reported() {
    init_tracing();
    // r1 = r0 depends on the load before it
    let target = Prototype::builder()
        .frame_size(2)
        .instruction(kshort(0))
        .instruction(Instruction::ad(Opcode::Mov, 1, 0))
        .instruction(Instruction::ad(Opcode::Ret0, 0, 1))
        .build();
    let mut reference = target.clone();
    reference.instructions.swap(0, 1);

    let mut target = image(vec![target]);
    let before = target.clone();
    let report = BytecodePatcher::new()
        .apply(PatchStrategy::InstructionOrder, &mut target, &image(vec![reference]))
        .unwrap();

    assert!(!report.is_clean());
    assert!(matches!(report.skipped[0], (0, PatchError::DependencyViolation { register: 0, .. })));
    assert_eq!(target, before);
}

fn arb_instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        (0u8..8, any::<u16>()).prop_map(|(a, d)| Instruction::ad(Opcode::KShort, a, d)),
        (0u8..8, 0u16..8).prop_map(|(a, d)| Instruction::ad(Opcode::Mov, a, d)),
        (0u8..8, 0u8..8, 0u8..8).prop_map(|(a, b, c)| Instruction::abc(Opcode::AddVV, a, b, c)),
    ]
}

fn arb_prototype() -> impl Strategy<Value = Prototype> {
    (prop::collection::vec(arb_instruction(), 0..8), 0usize..3).prop_map(|(code, strings)| {
        let mut builder = Prototype::builder().frame_size(8).instructions(code);
        for i in 0..strings {
            builder = builder.constant(Constant::string(format!("s{i}")));
        }
        builder.build()
    })
}

fn arb_image() -> impl Strategy<Value = Bytecode> {
    prop::collection::vec(arb_prototype(), 1..5).prop_map(image)
}

proptest! {
    #[test]
    fn prop_similarity_bounds(a in arb_image(), b in arb_image()) {
        let patcher = BytecodePatcher::new();
        prop_assert_eq!(patcher.similarity(&a, &a), 1.0);

        let score = patcher.similarity(&a, &b);
        if a.prototypes.len() != b.prototypes.len() {
            prop_assert_eq!(score, 0.0);
        } else {
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn prop_accepted_reorders_keep_jump_targets(
        order in Just((0u32..6).collect::<Vec<_>>()).prop_shuffle(),
        target in 0usize..=6,
    ) {
        // six independent loads with a jump in front; the jump stays first
        let mut code = vec![Instruction::jump(Opcode::Jmp, 0, 0, target + 1).unwrap()];
        code.extend((0..6).map(kshort));
        let mut proto = Prototype::builder().frame_size(8).instructions(code.clone()).build();

        let mut full = vec![0u32];
        full.extend(order.iter().map(|o| o + 1));
        ljbc_patcher::reorder_instructions(&mut proto, &full, &PatchConfig::default()).unwrap();

        let landed = proto.instructions[0].jump_target(0).unwrap() as usize;
        let expected = code.get(target + 1).copied();
        prop_assert_eq!(proto.instructions.get(landed).copied(), expected);
    }

    #[test]
    fn prop_loop_and_branch_jumps_keep_landing(
        prefix in Just(vec![0u32, 1, 2]).prop_shuffle(),
        body in Just(vec![3u32, 4, 5, 6]).prop_shuffle(),
    ) {
        // JMP over a load, then a numeric for loop with a branch in its body
        let code = vec![
            Instruction::jump(Opcode::Jmp, 0, 0, 2).unwrap(),
            kshort(7),
            Instruction::jump(Opcode::ForI, 0, 2, 8).unwrap(),
            kshort(4),
            Instruction::jump(Opcode::Jmp, 0, 4, 6).unwrap(),
            kshort(5),
            kshort(6),
            Instruction::jump(Opcode::ForL, 0, 7, 3).unwrap(),
            Instruction::ad(Opcode::Ret0, 0, 1),
        ];
        let mut proto = Prototype::builder().frame_size(8).instructions(code.clone()).build();
        let before = proto.clone();

        let mut full = prefix.clone();
        full.extend(&body);
        full.extend([7, 8]);
        let load_first = prefix.iter().position(|&o| o == 1) < prefix.iter().position(|&o| o == 2);

        match ljbc_patcher::reorder_instructions(&mut proto, &full, &PatchConfig::default()) {
            Ok(()) => {
                prop_assert!(load_first);
                for (new, &old) in full.iter().enumerate() {
                    let old = old as usize;
                    let Some(target) = code[old].jump_target(old) else {
                        prop_assert_eq!(proto.instructions[new], code[old]);
                        continue;
                    };
                    let landed = proto.instructions[new].jump_target(new).unwrap() as usize;
                    prop_assert_eq!(proto.instructions[new].op, code[old].op);
                    prop_assert_eq!(full[landed] as i64, target);
                }
            }
            Err(err) => {
                prop_assert!(!load_first);
                let is_dependency = matches!(err, PatchError::DependencyViolation { .. });
                prop_assert!(is_dependency);
                prop_assert_eq!(proto, before);
            }
        }
    }
}
