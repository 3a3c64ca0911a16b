//! Dependency analysis for instruction reordering
//!
//! Every instruction gets a conservative read set and write set over the 256
//! frame slots, plus the shared state outside the frame it loads or stores
//! (globals, table contents, upvalues). A permutation is safe when no pair of
//! instructions that touch a common register or memory channel swaps
//! relative order. Calls, returns, loops and iterators act as barriers by
//! touching every slot and every channel.
//!
//! The check is straight-line: jumps carry no effects and are not barriers
//! themselves. Conditional tests can be pinned to the JMP that follows them,
//! but an instruction inside a branch can still be hoisted above the test
//! guarding it.

use ljbc_bytecode::{Instruction, Opcode, Register};

use crate::error::{Hazard, MemoryChannel, PatchError, PatchResult};

/// Set of frame slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegSet([u64; 4]);

impl RegSet {
    /// No slots
    pub const EMPTY: RegSet = RegSet([0; 4]);
    /// Every slot
    pub const ALL: RegSet = RegSet([u64::MAX; 4]);

    /// Set holding one register
    pub fn single(reg: u8) -> Self {
        let mut set = Self::EMPTY;
        set.insert(Register::new(reg));
        set
    }

    /// Slots `from..to`, clamped to the frame
    pub fn range(from: usize, to: usize) -> Self {
        let mut set = Self::EMPTY;
        for reg in from..to.min(256) {
            set.insert(Register::new(reg as u8));
        }
        set
    }

    /// Add a register
    #[inline]
    pub fn insert(&mut self, reg: Register) {
        let i = reg.index() as usize;
        self.0[i / 64] |= 1 << (i % 64);
    }

    /// Register is in the set
    #[inline]
    pub fn contains(&self, reg: Register) -> bool {
        let i = reg.index() as usize;
        self.0[i / 64] & (1 << (i % 64)) != 0
    }

    /// Union of two sets
    #[inline]
    pub fn union(self, other: Self) -> Self {
        let mut out = self;
        for (word, o) in out.0.iter_mut().zip(other.0) {
            *word |= o;
        }
        out
    }

    /// Lowest register present in both sets
    pub fn first_common(&self, other: &Self) -> Option<u8> {
        self.0
            .iter()
            .zip(&other.0)
            .enumerate()
            .find_map(|(w, (a, b))| {
                let both = a & b;
                (both != 0).then(|| (w * 64 + both.trailing_zeros() as usize) as u8)
            })
    }

    /// No register present
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }
}

/// Memory channels outside the register frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemSet(u8);

impl MemSet {
    /// No channel
    pub const EMPTY: MemSet = MemSet(0);
    /// Global variables
    pub const GLOBALS: MemSet = MemSet(0x01);
    /// Table contents
    pub const TABLES: MemSet = MemSet(0x02);
    /// Upvalues of the running closure
    pub const UPVALUES: MemSet = MemSet(0x04);
    /// Every channel
    pub const ALL: MemSet = MemSet(0x07);

    /// Union of two sets
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        MemSet(self.0 | other.0)
    }

    /// No channel present
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// First channel present in both sets
    pub fn first_common(&self, other: &Self) -> Option<MemoryChannel> {
        let both = self.0 & other.0;
        [
            (Self::GLOBALS, MemoryChannel::Globals),
            (Self::TABLES, MemoryChannel::Tables),
            (Self::UPVALUES, MemoryChannel::Upvalues),
        ]
        .into_iter()
        .find_map(|(set, channel)| (both & set.0 != 0).then_some(channel))
    }
}

/// Globals live in the environment table
const ENV: MemSet = MemSet::GLOBALS.union(MemSet::TABLES);

/// Registers and memory an instruction reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    /// Slots read
    pub reads: RegSet,
    /// Slots written
    pub writes: RegSet,
    /// Channels loaded from
    pub loads: MemSet,
    /// Channels stored to
    pub stores: MemSet,
}

impl Effects {
    const NONE: Self = Self {
        reads: RegSet::EMPTY,
        writes: RegSet::EMPTY,
        loads: MemSet::EMPTY,
        stores: MemSet::EMPTY,
    };

    const BARRIER: Self = Self {
        reads: RegSet::ALL,
        writes: RegSet::ALL,
        loads: MemSet::ALL,
        stores: MemSet::ALL,
    };

    fn reads(reads: RegSet) -> Self {
        Self { reads, ..Self::NONE }
    }

    fn writes(writes: RegSet) -> Self {
        Self { writes, ..Self::NONE }
    }

    fn read_write(reads: RegSet, writes: RegSet) -> Self {
        Self {
            reads,
            writes,
            ..Self::NONE
        }
    }

    fn loading(self, loads: MemSet) -> Self {
        Self { loads, ..self }
    }

    fn storing(self, stores: MemSet) -> Self {
        Self { stores, ..self }
    }

    fn is_pure(&self) -> bool {
        self.reads.is_empty()
            && self.writes.is_empty()
            && self.loads.is_empty()
            && self.stores.is_empty()
    }
}

/// Conservative effects of `instr`
pub fn effects(instr: &Instruction) -> Effects {
    use Opcode::*;

    let a = RegSet::single(instr.a);
    let b = RegSet::single(instr.b);
    let c = RegSet::single(instr.c);
    // D names a register only for the opcodes that use it that way
    let d = RegSet::single(instr.d as u8);

    match instr.op {
        IsLt | IsGe | IsLe | IsGt | IsEqV | IsNeV => Effects::reads(a.union(d)),
        IsEqS | IsNeS | IsEqN | IsNeN | IsEqP | IsNeP | IsType | IsNum => Effects::reads(a),
        IsTc | IsFc => Effects::read_write(d, a),
        IsT | IsF => Effects::reads(d),

        Mov | Not | Unm | Len => Effects::read_write(d, a),
        AddVN | SubVN | MulVN | DivVN | ModVN | AddNV | SubNV | MulNV | DivNV | ModNV => {
            Effects::read_write(b, a)
        }
        AddVV | SubVV | MulVV | DivVV | ModVV | Pow => Effects::read_write(b.union(c), a),
        Cat => Effects::read_write(RegSet::range(instr.b as usize, instr.c as usize + 1), a),

        KStr | KCdata | KShort | KNum | KPri => Effects::writes(a),
        KNil => Effects::writes(RegSet::range(instr.a as usize, instr.d as usize + 1)),

        UGet => Effects::writes(a).loading(MemSet::UPVALUES),
        USetV => Effects::reads(d).storing(MemSet::UPVALUES),
        USetS | USetN | USetP => Effects::NONE.storing(MemSet::UPVALUES),
        UClo => {
            let closed = RegSet::range(instr.a as usize, 256);
            Effects::read_write(closed, closed).storing(MemSet::UPVALUES)
        }
        FNew => Effects::writes(a).loading(MemSet::UPVALUES),

        TNew | TDup => Effects::writes(a),
        GGet => Effects::writes(a).loading(ENV),
        GSet => Effects::reads(a).storing(ENV),
        TGetV | TGetR => Effects::read_write(b.union(c), a).loading(MemSet::TABLES),
        TGetS | TGetB => Effects::read_write(b, a).loading(MemSet::TABLES),
        TSetV | TSetR => Effects::reads(a.union(b).union(c)).storing(MemSet::TABLES),
        TSetS | TSetB => Effects::reads(a.union(b)).storing(MemSet::TABLES),
        TSetM => Effects::reads(RegSet::range((instr.a as usize).saturating_sub(1), 256))
            .storing(MemSet::TABLES),

        CallM | Call | CallMT | CallT | IterC | IterN | VArg | IsNext => Effects::BARRIER,
        RetM | Ret | Ret0 | Ret1 => Effects::BARRIER,
        ForI | JForI | ForL | IForL | JForL | IterL | IIterL | JIterL => Effects::BARRIER,
        Loop | ILoop | JLoop | Jmp => Effects::NONE,
        FuncF | IFuncF | JFuncF | FuncV | IFuncV | JFuncV | FuncC | FuncCW => Effects::BARRIER,
    }
}

/// First dependency an earlier (reads, writes) pair has on a later one
fn first_hazard<S, T>(
    earlier: (&S, &S),
    later: (&S, &S),
    common: impl Fn(&S, &S) -> Option<T>,
) -> Option<(T, Hazard)> {
    let (reads, writes) = earlier;
    let (later_reads, later_writes) = later;
    common(writes, later_reads)
        .map(|x| (x, Hazard::ReadAfterWrite))
        .or_else(|| common(reads, later_writes).map(|x| (x, Hazard::WriteAfterRead)))
        .or_else(|| common(writes, later_writes).map(|x| (x, Hazard::WriteAfterWrite)))
}

/// Check that `new_order` (new position -> old position) keeps every
/// register and memory dependency of `instructions` in its original order
///
/// `new_order` must already be a permutation of `0..instructions.len()`.
pub fn check_dependencies(
    instructions: &[Instruction],
    new_order: &[u32],
    keep_test_jump_pairs: bool,
) -> PatchResult<()> {
    let mut position = vec![0usize; instructions.len()];
    for (new, &old) in new_order.iter().enumerate() {
        position[old as usize] = new;
    }

    let per_instr: Vec<Effects> = instructions.iter().map(effects).collect();

    for (earlier, first) in per_instr.iter().enumerate() {
        if first.is_pure() {
            continue;
        }
        for (later, second) in per_instr.iter().enumerate().skip(earlier + 1) {
            if position[earlier] < position[later] {
                continue;
            }
            let registers = first_hazard(
                (&first.reads, &first.writes),
                (&second.reads, &second.writes),
                RegSet::first_common,
            );
            if let Some((register, hazard)) = registers {
                return Err(PatchError::DependencyViolation {
                    register,
                    hazard,
                    earlier,
                    later,
                });
            }
            let memory = first_hazard(
                (&first.loads, &first.stores),
                (&second.loads, &second.stores),
                MemSet::first_common,
            );
            if let Some((channel, hazard)) = memory {
                return Err(PatchError::MemoryDependency {
                    channel,
                    hazard,
                    earlier,
                    later,
                });
            }
        }
    }

    if keep_test_jump_pairs {
        for (pc, pair) in instructions.windows(2).enumerate() {
            if pair[0].op.is_conditional_test()
                && pair[1].op == Opcode::Jmp
                && position[pc + 1] != position[pc] + 1
            {
                return Err(PatchError::SplitTestJump(pc));
            }
        }
    }

    Ok(())
}
