//! Function prototype representation

use serde::{Deserialize, Serialize};

use crate::constant::{Constant, NumberConstant};
use crate::instruction::Instruction;
use crate::operand::ProtoIndex;

/// Prototype flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProtoFlags(u8);

impl ProtoFlags {
    /// No flags
    pub const NONE: ProtoFlags = ProtoFlags(0);
    /// Has child prototypes
    pub const CHILD: ProtoFlags = ProtoFlags(0x01);
    /// Vararg function
    pub const VARARG: ProtoFlags = ProtoFlags(0x02);
    /// Uses the FFI
    pub const FFI: ProtoFlags = ProtoFlags(0x04);
    /// JIT disabled for this function
    pub const NOJIT: ProtoFlags = ProtoFlags(0x08);
    /// Patched bytecode with ILOOP etc.
    pub const ILOOP: ProtoFlags = ProtoFlags(0x10);

    /// Flags that only steer the JIT and do not change what the function computes
    pub const HINTS: ProtoFlags = ProtoFlags(0x08 | 0x10);

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// From raw bits
    #[inline]
    pub const fn from_bits(bits: u8) -> ProtoFlags {
        ProtoFlags(bits)
    }

    /// All bits of `other` are set
    #[inline]
    pub const fn contains(self, other: ProtoFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Set the bits of `other`
    #[inline]
    pub fn insert(&mut self, other: ProtoFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    #[inline]
    pub fn remove(&mut self, other: ProtoFlags) {
        self.0 &= !other.0;
    }
}

/// Variable-scope record from the debug block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarInfo {
    /// Hidden numeric-for index slot
    ForIndex,
    /// Hidden numeric-for limit slot
    ForStop,
    /// Hidden numeric-for step slot
    ForStep,
    /// Hidden generic-for generator slot
    ForGenerator,
    /// Hidden generic-for state slot
    ForState,
    /// Hidden generic-for control slot
    ForControl,
    /// Named local variable
    Named {
        /// Variable name
        name: String,
        /// Declared as a parameter
        is_parameter: bool,
        /// First instruction of the scope
        scope_begin: u32,
        /// Instruction ending the scope
        scope_end: u32,
    },
}

impl VarInfo {
    /// Tag terminating the variable list
    pub const END_TAG: u32 = 0;
    /// Tag of a named local
    pub const NAMED_TAG: u32 = 7;

    /// Wire tag
    pub fn tag(&self) -> u32 {
        match self {
            Self::ForIndex => 1,
            Self::ForStop => 2,
            Self::ForStep => 3,
            Self::ForGenerator => 4,
            Self::ForState => 5,
            Self::ForControl => 6,
            Self::Named { .. } => Self::NAMED_TAG,
        }
    }
}

/// Optional debug tables of a prototype
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// First source line of the function
    pub first_line: u32,
    /// Number of source lines spanned
    pub line_count: u32,
    /// Source line of every instruction
    pub line_map: Vec<u32>,
    /// Upvalue names, in upvalue order
    pub upvalue_names: Vec<String>,
    /// Variable-scope records
    pub variables: Vec<VarInfo>,
}

/// A function prototype
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    /// Prototype flags
    pub flags: ProtoFlags,
    /// Number of fixed parameters
    pub param_count: u8,
    /// Number of register slots needed
    pub frame_size: u8,
    /// Instruction stream (without the function header instruction)
    pub instructions: Vec<Instruction>,
    /// GC-managed constants, in logical index order
    pub constants: Vec<Constant>,
    /// Number constants
    pub number_constants: Vec<NumberConstant>,
    /// Upvalue slot references
    pub upvalues: Vec<u16>,
    /// Debug tables
    pub debug: Option<DebugInfo>,
}

impl Prototype {
    /// Create a new prototype builder
    pub fn builder() -> PrototypeBuilder {
        PrototypeBuilder::new()
    }

    /// Child prototypes, in ascending constant index order
    pub fn children(&self) -> impl Iterator<Item = ProtoIndex> + '_ {
        self.constants.iter().filter_map(Constant::as_child)
    }

    /// Check if function is vararg
    #[inline]
    pub fn is_vararg(&self) -> bool {
        self.flags.contains(ProtoFlags::VARARG)
    }

    /// Structural shape check: header fields and sequence lengths
    pub fn same_shape(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.param_count == other.param_count
            && self.frame_size == other.frame_size
            && self.instructions.len() == other.instructions.len()
            && self.constants.len() == other.constants.len()
            && self.upvalues.len() == other.upvalues.len()
    }
}

/// Builder for creating prototypes
#[derive(Debug, Default)]
pub struct PrototypeBuilder {
    proto: Prototype,
}

impl PrototypeBuilder {
    /// Create a new prototype builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set flags
    pub fn flags(mut self, flags: ProtoFlags) -> Self {
        self.proto.flags = flags;
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u8) -> Self {
        self.proto.param_count = count;
        self
    }

    /// Set frame size
    pub fn frame_size(mut self, size: u8) -> Self {
        self.proto.frame_size = size;
        self
    }

    /// Add a single instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.proto.instructions.push(instruction);
        self
    }

    /// Set all instructions
    pub fn instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.proto.instructions = instructions;
        self
    }

    /// Add a GC constant
    pub fn constant(mut self, constant: Constant) -> Self {
        self.proto.constants.push(constant);
        self
    }

    /// Add a child prototype reference and mark the prototype as a parent
    pub fn child(mut self, index: u32) -> Self {
        self.proto.constants.push(Constant::child(index));
        self.proto.flags.insert(ProtoFlags::CHILD);
        self
    }

    /// Add a number constant
    pub fn number(mut self, number: NumberConstant) -> Self {
        self.proto.number_constants.push(number);
        self
    }

    /// Add an upvalue slot reference
    pub fn upvalue(mut self, slot: u16) -> Self {
        self.proto.upvalues.push(slot);
        self
    }

    /// Attach debug tables
    pub fn debug(mut self, debug: DebugInfo) -> Self {
        self.proto.debug = Some(debug);
        self
    }

    /// Build the prototype
    pub fn build(self) -> Prototype {
        self.proto
    }
}
