//! Bytecode operands

use serde::{Deserialize, Serialize};

/// Virtual register (0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub u8);

impl Register {
    /// Create a new register
    #[inline]
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl From<u8> for Register {
    fn from(index: u8) -> Self {
        Self(index)
    }
}

/// Index into the owning image's prototype set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProtoIndex(pub u32);

impl ProtoIndex {
    /// Create a new prototype index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Index as a `usize` for slice access
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Relative jump distance, measured from the instruction after the jump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Bias applied to jump distances stored in the D operand
    pub const BIAS: i32 = 0x8000;

    /// Create a new jump offset
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Get offset value
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }

    /// Decode a biased D operand
    #[inline]
    pub const fn from_d(d: u16) -> Self {
        Self(d as i32 - Self::BIAS)
    }

    /// Encode as a biased D operand, `None` when the distance does not fit
    #[inline]
    pub fn to_d(self) -> Option<u16> {
        u16::try_from(self.0 + Self::BIAS).ok()
    }

    /// Offset that lands on `target` when taken from the instruction at `pc`
    #[inline]
    pub fn between(pc: usize, target: usize) -> Self {
        Self(target as i32 - pc as i32 - 1)
    }

    /// Instruction index reached when taken from `pc`
    #[inline]
    pub fn target_from(self, pc: usize) -> i64 {
        pc as i64 + 1 + self.0 as i64
    }
}
