//! # LJBC Bytecode
//!
//! In-memory model of a LuaJIT-style bytecode image and the encoder that
//! turns it back into bytes the VM loader accepts.
//!
//! ## Design Principles
//!
//! - **Arena-owned**: a [`Bytecode`] owns every [`Prototype`]; child references
//!   are plain [`ProtoIndex`] values, never pointers
//! - **Closed variants**: constants and opcodes are exhaustive enums, so every
//!   consumer matches all cases
//! - **Byte-exact**: [`writer::encode`] reproduces the loader's framing,
//!   including size prefixes and reverse constant linkage

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bytecode;
pub mod constant;
pub mod error;
pub mod instruction;
pub mod leb128;
pub mod operand;
pub mod prototype;
pub mod writer;

pub use bytecode::{Bytecode, BytecodeVersion, Header, HeaderFlags};
pub use constant::{Constant, ConstantKind, ConstantTable, NumberConstant, TableConstant, WideKind};
pub use error::{BytecodeError, Result};
pub use instruction::{ConstantSlot, Instruction, Opcode, OperandShape};
pub use operand::{JumpOffset, ProtoIndex, Register};
pub use prototype::{DebugInfo, ProtoFlags, Prototype, PrototypeBuilder, VarInfo};
pub use writer::{BytecodeWriter, encode, write_to};

/// Magic bytes of the legacy (version 1) image format
pub const LEGACY_MAGIC: [u8; 3] = [0x1B, b'L', b'J'];

/// Magic bytes of the modified image format
pub const MODIFIED_MAGIC: [u8; 3] = [0x1B, b'L', b'M'];
