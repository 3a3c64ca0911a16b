//! Patch errors

use thiserror::Error;

/// Kind of dependency a reorder would break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hazard {
    /// A read would move above the write it consumes
    ReadAfterWrite,
    /// A write would move above an earlier read of the old value
    WriteAfterRead,
    /// Two writes to the same location would swap
    WriteAfterWrite,
}

/// State outside the register frame that instructions load and store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryChannel {
    /// Global variables
    Globals,
    /// Table contents
    Tables,
    /// Upvalues
    Upvalues,
}

/// Reasons a patch step is refused
///
/// Every variant means nothing was mutated for the unit of work it names.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// The images have different prototype counts
    #[error("Prototype count mismatch: target has {target}, reference has {reference}")]
    PrototypeCountMismatch {
        /// Target prototype count
        target: usize,
        /// Reference prototype count
        reference: usize,
    },

    /// A prototype index is outside the image
    #[error("Prototype {0} is out of range")]
    PrototypeOutOfRange(u32),

    /// Two sequences that must line up have different lengths
    #[error("Prototype {proto}: {what} length mismatch ({target} vs {reference})")]
    LengthMismatch {
        /// Prototype index
        proto: u32,
        /// Sequence name
        what: &'static str,
        /// Target length
        target: usize,
        /// Reference length
        reference: usize,
    },

    /// The index mapping is not a permutation of in-range positions
    #[error("Invalid permutation: {0}")]
    InvalidPermutation(String),

    /// An instruction references a constant that does not exist
    #[error("Instruction {pc} references constant {index} outside the pool")]
    ConstantOperandOutOfRange {
        /// Instruction position
        pc: usize,
        /// Referenced index
        index: u32,
    },

    /// The remapped constant index does not fit the operand field
    #[error("Instruction {pc} cannot hold constant index {index}")]
    ConstantOperandOverflow {
        /// Instruction position
        pc: usize,
        /// New index
        index: u32,
    },

    /// The reorder would break a register dependency
    #[error("Register {register}: {hazard:?} between instructions {earlier} and {later}")]
    DependencyViolation {
        /// Register involved
        register: u8,
        /// Broken dependency kind
        hazard: Hazard,
        /// Original position of the first instruction
        earlier: usize,
        /// Original position of the second instruction
        later: usize,
    },

    /// The reorder would swap two accesses to shared state
    #[error("{channel:?}: {hazard:?} between instructions {earlier} and {later}")]
    MemoryDependency {
        /// Channel both instructions touch
        channel: MemoryChannel,
        /// Broken dependency kind
        hazard: Hazard,
        /// Original position of the first instruction
        earlier: usize,
        /// Original position of the second instruction
        later: usize,
    },

    /// A conditional test would be separated from the jump it guards
    #[error("Test at {0} would be separated from its jump")]
    SplitTestJump(usize),

    /// A jump lands outside the instruction stream
    #[error("Jump at {pc} targets {target}, outside the instruction stream")]
    JumpOutOfRange {
        /// Instruction position
        pc: usize,
        /// Resolved target
        target: i64,
    },

    /// The retargeted jump distance does not fit the D operand
    #[error("Jump at {pc} cannot encode offset {offset}")]
    JumpOffsetOverflow {
        /// New instruction position
        pc: usize,
        /// Required offset
        offset: i32,
    },

    /// No ordering of the target matches the reference instructions
    #[error("Prototype {0}: instructions cannot be matched to the reference")]
    NoInstructionMatch(u32),

    /// The prototypes differ in ways a structural patch must not change
    #[error("Prototype {proto}: incompatible {what}")]
    IncompatibleShape {
        /// Prototype index
        proto: u32,
        /// Differing attribute
        what: &'static str,
    },
}

/// Result type for patch operations
pub type PatchResult<T> = Result<T, PatchError>;
