//! Bytecode image: header plus the prototype arena

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::operand::ProtoIndex;
use crate::prototype::Prototype;
use crate::{LEGACY_MAGIC, MODIFIED_MAGIC};

/// Image format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BytecodeVersion {
    /// Legacy version 1 (narrower opcode numbering)
    V1,
    /// Modified variant
    Modified,
}

impl BytecodeVersion {
    /// Three-byte magic selecting the variant
    pub const fn magic(self) -> [u8; 3] {
        match self {
            Self::V1 => LEGACY_MAGIC,
            Self::Modified => MODIFIED_MAGIC,
        }
    }

    /// Version byte following the magic
    pub const fn code(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::Modified => 2,
        }
    }
}

/// Header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    /// No flags
    pub const NONE: HeaderFlags = HeaderFlags(0);
    /// Big-endian image
    pub const BE: HeaderFlags = HeaderFlags(0x01);
    /// Debug info stripped
    pub const STRIP: HeaderFlags = HeaderFlags(0x02);
    /// Uses the FFI
    pub const FFI: HeaderFlags = HeaderFlags(0x04);
    /// Two-slot frame info
    pub const FR2: HeaderFlags = HeaderFlags(0x08);

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// From raw bits
    #[inline]
    pub const fn from_bits(bits: u8) -> HeaderFlags {
        HeaderFlags(bits)
    }

    /// All bits of `other` are set
    #[inline]
    pub const fn contains(self, other: HeaderFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Set the bits of `other`
    #[inline]
    pub fn insert(&mut self, other: HeaderFlags) {
        self.0 |= other.0;
    }
}

/// Image header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Format version
    pub version: BytecodeVersion,
    /// Flag bits
    pub flags: HeaderFlags,
    /// Chunk name, only kept in unstripped images
    pub chunk_name: Option<String>,
}

impl Header {
    /// Header of a stripped image
    pub fn stripped(version: BytecodeVersion) -> Self {
        Self {
            version,
            flags: HeaderFlags::STRIP,
            chunk_name: None,
        }
    }

    /// Header of an unstripped image carrying a chunk name
    pub fn named(version: BytecodeVersion, chunk_name: impl Into<String>) -> Self {
        Self {
            version,
            flags: HeaderFlags::NONE,
            chunk_name: Some(chunk_name.into()),
        }
    }

    /// Debug info stripped
    #[inline]
    pub fn is_stripped(&self) -> bool {
        self.flags.contains(HeaderFlags::STRIP)
    }

    /// Chunk name is present exactly when the image is not stripped
    pub fn is_consistent(&self) -> bool {
        self.chunk_name.is_some() != self.is_stripped()
    }
}

/// A bytecode image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    /// Image header
    pub header: Header,
    /// Prototype arena
    pub prototypes: Vec<Prototype>,
    /// Top-level chunk function
    pub main: ProtoIndex,
}

impl Bytecode {
    /// Create an image from its parts
    pub fn new(header: Header, prototypes: Vec<Prototype>, main: ProtoIndex) -> Self {
        Self {
            header,
            prototypes,
            main,
        }
    }

    /// Get a prototype by index
    pub fn prototype(&self, index: ProtoIndex) -> Option<&Prototype> {
        self.prototypes.get(index.as_usize())
    }

    /// Get the main prototype
    pub fn main_prototype(&self) -> Option<&Prototype> {
        self.prototype(self.main)
    }

    /// Check that every reference resolves, see [`Bytecode::emission_order`]
    pub fn validate(&self) -> Result<()> {
        self.emission_order().map(|_| ())
    }

    /// Order in which prototypes must be written
    ///
    /// Post-order from the main prototype: children in ascending constant
    /// index order, each fully before its parent, main last. Every prototype
    /// must be reachable from main and referenced by exactly one parent.
    pub fn emission_order(&self) -> Result<Vec<ProtoIndex>> {
        let count = self.prototypes.len();
        if self.main.as_usize() >= count {
            return Err(BytecodeError::InvalidMainPrototype(self.main.index()));
        }

        let mut seen = vec![false; count];
        let mut order = Vec::with_capacity(count);
        // (prototype, next child position to visit)
        let mut stack = vec![(self.main, 0usize)];
        seen[self.main.as_usize()] = true;

        while let Some((current, next)) = stack.pop() {
            let proto = &self.prototypes[current.as_usize()];
            match proto.children().nth(next) {
                Some(child) => {
                    stack.push((current, next + 1));
                    if child.as_usize() >= count {
                        return Err(BytecodeError::DanglingChild {
                            parent: current.index(),
                            child: child.index(),
                        });
                    }
                    if std::mem::replace(&mut seen[child.as_usize()], true) {
                        return Err(BytecodeError::SharedChild(child.index()));
                    }
                    stack.push((child, 0));
                }
                None => order.push(current),
            }
        }

        if let Some(orphan) = seen.iter().position(|s| !s) {
            return Err(BytecodeError::OrphanPrototype(orphan as u32));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Constant;

    fn leaf() -> Prototype {
        Prototype::builder().build()
    }

    fn image(prototypes: Vec<Prototype>, main: u32) -> Bytecode {
        Bytecode::new(
            Header::stripped(BytecodeVersion::Modified),
            prototypes,
            ProtoIndex(main),
        )
    }

    #[test]
    fn test_header_consistency() {
        assert!(Header::stripped(BytecodeVersion::V1).is_consistent());
        assert!(Header::named(BytecodeVersion::V1, "@a.lua").is_consistent());
        let mut bad = Header::stripped(BytecodeVersion::V1);
        bad.chunk_name = Some("x".into());
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_emission_order_children_first() {
        // main(3) -> [1, 2]; 1 -> [0]
        let protos = vec![
            leaf(),
            Prototype::builder().child(0).build(),
            leaf(),
            Prototype::builder()
                .constant(Constant::string("f"))
                .child(1)
                .child(2)
                .build(),
        ];
        let order = image(protos, 3).emission_order().unwrap();
        assert_eq!(
            order,
            vec![ProtoIndex(0), ProtoIndex(1), ProtoIndex(2), ProtoIndex(3)]
        );
    }

    #[test]
    fn test_emission_order_follows_constant_order() {
        let protos = vec![leaf(), leaf(), Prototype::builder().child(1).child(0).build()];
        let order = image(protos, 2).emission_order().unwrap();
        assert_eq!(order, vec![ProtoIndex(1), ProtoIndex(0), ProtoIndex(2)]);
    }

    #[test]
    fn test_dangling_child() {
        let protos = vec![Prototype::builder().child(5).build()];
        assert!(matches!(
            image(protos, 0).validate(),
            Err(BytecodeError::DanglingChild { parent: 0, child: 5 })
        ));
    }

    #[test]
    fn test_shared_child_and_cycle() {
        let protos = vec![leaf(), Prototype::builder().child(0).child(0).build()];
        assert!(matches!(
            image(protos, 1).validate(),
            Err(BytecodeError::SharedChild(0))
        ));

        let protos = vec![Prototype::builder().child(0).build()];
        assert!(matches!(
            image(protos, 0).validate(),
            Err(BytecodeError::SharedChild(0))
        ));
    }

    #[test]
    fn test_orphan_and_main_range() {
        assert!(matches!(
            image(vec![leaf(), leaf()], 1).validate(),
            Err(BytecodeError::OrphanPrototype(0))
        ));
        assert!(matches!(
            image(vec![leaf()], 3).validate(),
            Err(BytecodeError::InvalidMainPrototype(3))
        ));
    }
}
