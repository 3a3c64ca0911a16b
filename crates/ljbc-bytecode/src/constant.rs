//! Constant pools of a prototype

use serde::{Deserialize, Serialize};

use crate::operand::ProtoIndex;

/// Wire tag of a GC-managed constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConstantKind {
    /// Child prototype
    Child = 0,
    /// Template table
    Table = 1,
    /// Signed 64-bit integer cdata
    Int64 = 2,
    /// Unsigned 64-bit integer cdata
    UInt64 = 3,
    /// Complex cdata
    Complex = 4,
    /// Byte string
    String = 5,
}

impl ConstantKind {
    /// Tag value written on the wire
    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Interpretation of a 64-bit cdata payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WideKind {
    /// `int64_t`
    Int64,
    /// `uint64_t`
    UInt64,
    /// `complex`
    Complex,
}

/// A GC-managed constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// Reference to another prototype of the same image
    Child(ProtoIndex),
    /// Template table
    Table(ConstantTable),
    /// 64-bit numeric cdata, raw payload
    Wide {
        /// Payload interpretation
        kind: WideKind,
        /// Raw bits
        payload: u64,
    },
    /// Byte string
    String(Vec<u8>),
}

impl Constant {
    /// Create a string constant
    #[inline]
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Self::String(bytes.into())
    }

    /// Create a child prototype reference
    #[inline]
    pub fn child(index: u32) -> Self {
        Self::Child(ProtoIndex(index))
    }

    /// Create a signed 64-bit constant
    #[inline]
    pub fn int64(value: i64) -> Self {
        Self::Wide {
            kind: WideKind::Int64,
            payload: value as u64,
        }
    }

    /// Create an unsigned 64-bit constant
    #[inline]
    pub fn uint64(value: u64) -> Self {
        Self::Wide {
            kind: WideKind::UInt64,
            payload: value,
        }
    }

    /// Wire tag
    pub fn kind(&self) -> ConstantKind {
        match self {
            Self::Child(_) => ConstantKind::Child,
            Self::Table(_) => ConstantKind::Table,
            Self::Wide { kind, .. } => match kind {
                WideKind::Int64 => ConstantKind::Int64,
                WideKind::UInt64 => ConstantKind::UInt64,
                WideKind::Complex => ConstantKind::Complex,
            },
            Self::String(_) => ConstantKind::String,
        }
    }

    /// Child prototype index if this is a child reference
    #[inline]
    pub fn as_child(&self) -> Option<ProtoIndex> {
        match self {
            Self::Child(idx) => Some(*idx),
            _ => None,
        }
    }

    /// Get as bytes if this is a string constant
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    /// Shallow semantic equality used by the comparator
    ///
    /// Tables only compare part lengths. Child references always compare
    /// equal; the referenced prototypes are compared on their own.
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (
                Self::Wide { kind: ka, payload: a },
                Self::Wide { kind: kb, payload: b },
            ) => ka == kb && a == b,
            (Self::Table(a), Self::Table(b)) => {
                a.array.len() == b.array.len() && a.hash.len() == b.hash.len()
            }
            (Self::Child(_), Self::Child(_)) => true,
            (Self::Child(_) | Self::Table(_) | Self::Wide { .. } | Self::String(_), _) => false,
        }
    }

    /// Deep value equality
    ///
    /// Tables compare as maps (hash part order ignored), floats by bit
    /// pattern, children by index.
    pub fn value_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (
                Self::Wide { kind: ka, payload: a },
                Self::Wide { kind: kb, payload: b },
            ) => ka == kb && a == b,
            (Self::Table(a), Self::Table(b)) => a.value_eq(b),
            (Self::Child(a), Self::Child(b)) => a == b,
            (Self::Child(_) | Self::Table(_) | Self::Wide { .. } | Self::String(_), _) => false,
        }
    }
}

/// Entry of a template table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableConstant {
    /// `nil`
    Nil,
    /// `false`
    False,
    /// `true`
    True,
    /// 32-bit integer
    Int(i32),
    /// 64-bit float
    Num(f64),
    /// Byte string
    Str(Vec<u8>),
}

impl TableConstant {
    /// Wire tag
    pub fn tag(&self) -> u8 {
        match self {
            Self::Nil => 0,
            Self::False => 1,
            Self::True => 2,
            Self::Int(_) => 3,
            Self::Num(_) => 4,
            Self::Str(_) => 5,
        }
    }

    /// Value equality with floats compared by bit pattern
    pub fn value_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.to_bits() == b.to_bits(),
            (
                Self::Nil | Self::False | Self::True | Self::Int(_) | Self::Num(_) | Self::Str(_),
                _,
            ) => self == other,
        }
    }
}

/// Template table: array part plus ordered hash part
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantTable {
    /// Array part, in index order
    pub array: Vec<TableConstant>,
    /// Hash part as (key, value) pairs, in wire order
    pub hash: Vec<(TableConstant, TableConstant)>,
}

impl ConstantTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables hold the same entries; hash part order is not significant
    pub fn value_eq(&self, other: &Self) -> bool {
        if self.array.len() != other.array.len() || self.hash.len() != other.hash.len() {
            return false;
        }
        if !self.array.iter().zip(&other.array).all(|(a, b)| a.value_eq(b)) {
            return false;
        }
        let mut used = vec![false; other.hash.len()];
        self.hash.iter().all(|(key, value)| {
            let found = other.hash.iter().enumerate().position(|(i, (k, v))| {
                !used[i] && k.value_eq(key) && v.value_eq(value)
            });
            match found {
                Some(i) => {
                    used[i] = true;
                    true
                }
                None => false,
            }
        })
    }
}

/// A number constant from the separate numeric pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumberConstant {
    /// 32-bit integer
    Int(i32),
    /// 64-bit float
    Num(f64),
}

impl NumberConstant {
    /// Wire tag
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Num(_) => 1,
        }
    }

    /// Numeric value as a float
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Num(n) => *n,
        }
    }

    /// Same numeric value, regardless of representation
    pub fn value_eq(&self, other: &Self) -> bool {
        self.as_f64().to_bits() == other.as_f64().to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(hash: Vec<(TableConstant, TableConstant)>) -> Constant {
        Constant::Table(ConstantTable {
            array: vec![TableConstant::Nil, TableConstant::Int(1)],
            hash,
        })
    }

    #[test]
    fn test_semantic_eq_by_kind() {
        assert!(Constant::string("x").semantic_eq(&Constant::string("x")));
        assert!(!Constant::string("x").semantic_eq(&Constant::string("y")));
        assert!(!Constant::int64(1).semantic_eq(&Constant::uint64(1)));
        assert!(Constant::int64(-1).semantic_eq(&Constant::int64(-1)));
        assert!(Constant::child(1).semantic_eq(&Constant::child(4)));
        assert!(!Constant::child(1).semantic_eq(&Constant::string("x")));
    }

    #[test]
    fn test_table_semantic_eq_is_shallow() {
        let a = table(vec![(TableConstant::Str(b"k".to_vec()), TableConstant::True)]);
        let b = table(vec![(TableConstant::Str(b"z".to_vec()), TableConstant::False)]);
        assert!(a.semantic_eq(&b));
        assert!(!a.value_eq(&b));
    }

    #[test]
    fn test_table_value_eq_ignores_hash_order() {
        let k1 = (TableConstant::Str(b"a".to_vec()), TableConstant::Int(1));
        let k2 = (TableConstant::Str(b"b".to_vec()), TableConstant::Num(2.5));
        let a = table(vec![k1.clone(), k2.clone()]);
        let b = table(vec![k2, k1]);
        assert!(a.value_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_child_value_eq_by_index() {
        assert!(Constant::child(2).value_eq(&Constant::child(2)));
        assert!(!Constant::child(2).value_eq(&Constant::child(3)));
    }

    #[test]
    fn test_value_eq_across_kinds() {
        let all = [
            Constant::child(0),
            Constant::Table(ConstantTable::new()),
            Constant::int64(0),
            Constant::uint64(0),
            Constant::string(""),
        ];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                assert_eq!(a.value_eq(b), i == j, "{a:?} vs {b:?}");
                assert_eq!(a.semantic_eq(b), i == j, "{a:?} vs {b:?}");
            }
        }
        assert!(!TableConstant::Int(0).value_eq(&TableConstant::Num(0.0)));
        assert!(TableConstant::Num(f64::NAN).value_eq(&TableConstant::Num(f64::NAN)));
    }

    #[test]
    fn test_number_value_eq() {
        assert!(NumberConstant::Int(1).value_eq(&NumberConstant::Num(1.0)));
        assert!(!NumberConstant::Int(0).value_eq(&NumberConstant::Num(-0.0)));
        assert!(NumberConstant::Num(f64::NAN).value_eq(&NumberConstant::Num(f64::NAN)));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Constant::child(0).kind().tag(), 0);
        assert_eq!(Constant::Table(ConstantTable::new()).kind().tag(), 1);
        assert_eq!(Constant::int64(0).kind().tag(), 2);
        assert_eq!(Constant::uint64(0).kind().tag(), 3);
        assert_eq!(
            Constant::Wide { kind: WideKind::Complex, payload: 0 }.kind().tag(),
            4
        );
        assert_eq!(Constant::string("").kind().tag(), 5);
    }
}
