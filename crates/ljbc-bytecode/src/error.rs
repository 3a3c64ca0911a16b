//! Bytecode model and encoding errors

use thiserror::Error;

use crate::bytecode::BytecodeVersion;

/// Errors that can occur while validating or encoding a bytecode image
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Chunk name presence disagrees with the strip flag
    #[error("Header is {state} but chunk name is {name}")]
    InconsistentHeader {
        /// Strip state from the flags
        state: &'static str,
        /// Whether a chunk name is set
        name: &'static str,
    },

    /// The designated main prototype is not part of the prototype set
    #[error("Main prototype {0} is out of range")]
    InvalidMainPrototype(u32),

    /// A child constant points outside the prototype set
    #[error("Prototype {parent} references missing child prototype {child}")]
    DanglingChild {
        /// Prototype holding the constant
        parent: u32,
        /// Referenced index
        child: u32,
    },

    /// A prototype is referenced as a child more than once, or is the main prototype
    #[error("Prototype {0} is referenced more than once")]
    SharedChild(u32),

    /// A prototype cannot be reached from the main prototype
    #[error("Prototype {0} is not reachable from the main prototype")]
    OrphanPrototype(u32),

    /// The opcode has no encoding in the requested format version
    #[error("Opcode {opcode} cannot be encoded for version {version:?}")]
    UnsupportedOpcode {
        /// Opcode mnemonic
        opcode: &'static str,
        /// Target version
        version: BytecodeVersion,
    },

    /// A count does not fit its wire field
    #[error("Too many {what}: {count}")]
    CountOverflow {
        /// Counted item
        what: &'static str,
        /// Actual count
        count: usize,
    },

    /// Debug line map length disagrees with the instruction count
    #[error("Prototype {proto} has {lines} line entries for {instructions} instructions")]
    LineMapMismatch {
        /// Prototype index
        proto: u32,
        /// Line map entries
        lines: usize,
        /// Instruction count
        instructions: usize,
    },

    /// IO error while writing to the sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
