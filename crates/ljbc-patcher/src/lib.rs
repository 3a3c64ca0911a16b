//! # ljbc patcher
//!
//! Compares two LuaJIT-style bytecode images and rewrites one so that it
//! structurally resembles the other without changing what it computes.
//!
//! ## Pipeline
//!
//! 1. Compare the target against the reference ([`Comparator`])
//! 2. Permute constant pools, rewriting the operands that index them
//! 3. Reorder instructions where dependencies allow, retargeting jumps
//! 4. Re-encode with [`ljbc_bytecode::encode`]

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod compare;
pub mod config;
pub mod dataflow;
pub mod diff;
pub mod error;
pub mod patcher;
pub mod remap;
pub mod reorder;

pub use compare::{Comparator, PrototypeScore, align_constants};
pub use config::{PatchConfig, SimilarityMode};
pub use diff::{BytecodeDiff, ConstantMapping};
pub use error::{Hazard, MemoryChannel, PatchError, PatchResult};
pub use patcher::{BytecodePatcher, PatchReport, PatchStrategy};
pub use remap::remap_constant_indices;
pub use reorder::reorder_instructions;
