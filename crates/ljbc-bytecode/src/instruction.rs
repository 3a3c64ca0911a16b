//! Bytecode instructions (opcodes)

use serde::{Deserialize, Serialize};

use crate::bytecode::BytecodeVersion;
use crate::operand::JumpOffset;

/// Bytecode opcodes
///
/// Numbered as in the modified (2.1-style) format. Legacy version 1 images
/// use a narrower numbering, see [`Opcode::to_v1_byte`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Comparisons ====================
    /// Jump if A < D
    IsLt = 0,
    /// Jump if A >= D
    IsGe = 1,
    /// Jump if A <= D
    IsLe = 2,
    /// Jump if A > D
    IsGt = 3,
    /// Jump if A == D (variables)
    IsEqV = 4,
    /// Jump if A ~= D (variables)
    IsNeV = 5,
    /// Jump if A == string constant D
    IsEqS = 6,
    /// Jump if A ~= string constant D
    IsNeS = 7,
    /// Jump if A == number constant D
    IsEqN = 8,
    /// Jump if A ~= number constant D
    IsNeN = 9,
    /// Jump if A == primitive D
    IsEqP = 10,
    /// Jump if A ~= primitive D
    IsNeP = 11,

    // ==================== Unary tests ====================
    /// Copy D to A and jump if D is truthy
    IsTc = 12,
    /// Copy D to A and jump if D is falsy
    IsFc = 13,
    /// Jump if D is truthy
    IsT = 14,
    /// Jump if D is falsy
    IsF = 15,
    /// Type check A against D
    IsType = 16,
    /// Number check A against D
    IsNum = 17,

    // ==================== Unary ops ====================
    /// A = D
    Mov = 18,
    /// A = not D
    Not = 19,
    /// A = -D
    Unm = 20,
    /// A = #D
    Len = 21,

    // ==================== Binary ops ====================
    /// A = B + number constant C
    AddVN = 22,
    /// A = B - number constant C
    SubVN = 23,
    /// A = B * number constant C
    MulVN = 24,
    /// A = B / number constant C
    DivVN = 25,
    /// A = B % number constant C
    ModVN = 26,
    /// A = number constant C + B
    AddNV = 27,
    /// A = number constant C - B
    SubNV = 28,
    /// A = number constant C * B
    MulNV = 29,
    /// A = number constant C / B
    DivNV = 30,
    /// A = number constant C % B
    ModNV = 31,
    /// A = B + C
    AddVV = 32,
    /// A = B - C
    SubVV = 33,
    /// A = B * C
    MulVV = 34,
    /// A = B / C
    DivVV = 35,
    /// A = B % C
    ModVV = 36,
    /// A = B ^ C
    Pow = 37,
    /// A = B .. ~ .. C
    Cat = 38,

    // ==================== Constants ====================
    /// A = string constant D
    KStr = 39,
    /// A = cdata constant D
    KCdata = 40,
    /// A = signed 16-bit literal D
    KShort = 41,
    /// A = number constant D
    KNum = 42,
    /// A = primitive D
    KPri = 43,
    /// Set A..=D to nil
    KNil = 44,

    // ==================== Upvalues and closures ====================
    /// A = upvalue D
    UGet = 45,
    /// Upvalue A = D
    USetV = 46,
    /// Upvalue A = string constant D
    USetS = 47,
    /// Upvalue A = number constant D
    USetN = 48,
    /// Upvalue A = primitive D
    USetP = 49,
    /// Close upvalues for slots >= A and jump to D
    UClo = 50,
    /// A = closure of child prototype constant D
    FNew = 51,

    // ==================== Tables ====================
    /// A = new table of size D
    TNew = 52,
    /// A = copy of table constant D
    TDup = 53,
    /// A = _G[string constant D]
    GGet = 54,
    /// _G[string constant D] = A
    GSet = 55,
    /// A = B[C]
    TGetV = 56,
    /// A = B[string constant C]
    TGetS = 57,
    /// A = B[literal C]
    TGetB = 58,
    /// A = B[C] (raw)
    TGetR = 59,
    /// B[C] = A
    TSetV = 60,
    /// B[string constant C] = A
    TSetS = 61,
    /// B[literal C] = A
    TSetB = 62,
    /// (A-1)[D], (A-1)[D+1], ... = A, A+1, ...
    TSetM = 63,
    /// B[C] = A (raw)
    TSetR = 64,

    // ==================== Calls and iterators ====================
    /// Call with multiple results
    CallM = 65,
    /// Call
    Call = 66,
    /// Tail call with multiple results
    CallMT = 67,
    /// Tail call
    CallT = 68,
    /// Generic iterator call
    IterC = 69,
    /// Specialized next() iterator call
    IterN = 70,
    /// Copy varargs
    VArg = 71,
    /// Verify next() iteration and jump
    IsNext = 72,

    // ==================== Returns ====================
    /// Return multiple results
    RetM = 73,
    /// Return A..A+D-2
    Ret = 74,
    /// Return nothing
    Ret0 = 75,
    /// Return A
    Ret1 = 76,

    // ==================== Loops and branches ====================
    /// Numeric for loop init
    ForI = 77,
    /// Numeric for loop init, JIT-compiled
    JForI = 78,
    /// Numeric for loop step
    ForL = 79,
    /// Numeric for loop step, interpreter only
    IForL = 80,
    /// Numeric for loop step, trace entry
    JForL = 81,
    /// Iterator loop step
    IterL = 82,
    /// Iterator loop step, interpreter only
    IIterL = 83,
    /// Iterator loop step, trace entry
    JIterL = 84,
    /// Generic loop marker
    Loop = 85,
    /// Generic loop marker, interpreter only
    ILoop = 86,
    /// Generic loop marker, trace entry
    JLoop = 87,
    /// Unconditional jump
    Jmp = 88,

    // ==================== Function headers ====================
    /// Fixed-arg Lua function header
    FuncF = 89,
    /// Fixed-arg Lua function header, interpreter only
    IFuncF = 90,
    /// Fixed-arg Lua function header, JIT-compiled
    JFuncF = 91,
    /// Vararg Lua function header
    FuncV = 92,
    /// Vararg Lua function header, interpreter only
    IFuncV = 93,
    /// Vararg Lua function header, JIT-compiled
    JFuncV = 94,
    /// C function header
    FuncC = 95,
    /// Wrapped C function header
    FuncCW = 96,
}

/// Every opcode, indexed by its byte value
const ALL_OPCODES: [Opcode; 97] = {
    use Opcode::*;
    [
        IsLt, IsGe, IsLe, IsGt, IsEqV, IsNeV, IsEqS, IsNeS, IsEqN, IsNeN, IsEqP, IsNeP, IsTc, IsFc,
        IsT, IsF, IsType, IsNum, Mov, Not, Unm, Len, AddVN, SubVN, MulVN, DivVN, ModVN, AddNV,
        SubNV, MulNV, DivNV, ModNV, AddVV, SubVV, MulVV, DivVV, ModVV, Pow, Cat, KStr, KCdata,
        KShort, KNum, KPri, KNil, UGet, USetV, USetS, USetN, USetP, UClo, FNew, TNew, TDup, GGet,
        GSet, TGetV, TGetS, TGetB, TGetR, TSetV, TSetS, TSetB, TSetM, TSetR, CallM, Call, CallMT,
        CallT, IterC, IterN, VArg, IsNext, RetM, Ret, Ret0, Ret1, ForI, JForI, ForL, IForL, JForL,
        IterL, IIterL, JIterL, Loop, ILoop, JLoop, Jmp, FuncF, IFuncF, JFuncF, FuncV, IFuncV,
        JFuncV, FuncC, FuncCW,
    ]
};

const OPCODE_NAMES: [&str; 97] = [
    "ISLT", "ISGE", "ISLE", "ISGT", "ISEQV", "ISNEV", "ISEQS", "ISNES", "ISEQN", "ISNEN", "ISEQP",
    "ISNEP", "ISTC", "ISFC", "IST", "ISF", "ISTYPE", "ISNUM", "MOV", "NOT", "UNM", "LEN", "ADDVN",
    "SUBVN", "MULVN", "DIVVN", "MODVN", "ADDNV", "SUBNV", "MULNV", "DIVNV", "MODNV", "ADDVV",
    "SUBVV", "MULVV", "DIVVV", "MODVV", "POW", "CAT", "KSTR", "KCDATA", "KSHORT", "KNUM", "KPRI",
    "KNIL", "UGET", "USETV", "USETS", "USETN", "USETP", "UCLO", "FNEW", "TNEW", "TDUP", "GGET",
    "GSET", "TGETV", "TGETS", "TGETB", "TGETR", "TSETV", "TSETS", "TSETB", "TSETM", "TSETR",
    "CALLM", "CALL", "CALLMT", "CALLT", "ITERC", "ITERN", "VARG", "ISNEXT", "RETM", "RET", "RET0",
    "RET1", "FORI", "JFORI", "FORL", "IFORL", "JFORL", "ITERL", "IITERL", "JITERL", "LOOP",
    "ILOOP", "JLOOP", "JMP", "FUNCF", "IFUNCF", "JFUNCF", "FUNCV", "IFUNCV", "JFUNCV", "FUNCC",
    "FUNCCW",
];

/// Operand layout of an instruction on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandShape {
    /// Three one-byte operands A, B, C (written A, C, B)
    Abc,
    /// One-byte A and a 16-bit D
    Ad,
}

/// Operand field that holds a GC-constant pool index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantSlot {
    /// One-byte C operand
    C,
    /// 16-bit D operand
    D,
}

impl Opcode {
    /// Convert byte to opcode
    pub fn from_byte(byte: u8) -> Option<Self> {
        ALL_OPCODES.get(byte as usize).copied()
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get opcode mnemonic
    pub const fn name(self) -> &'static str {
        OPCODE_NAMES[self as usize]
    }

    /// Iterate over every opcode in numbering order
    pub fn all() -> impl Iterator<Item = Opcode> {
        ALL_OPCODES.into_iter()
    }

    /// Wire shape of the operands
    pub fn shape(self) -> OperandShape {
        use Opcode::*;
        match self {
            AddVN | SubVN | MulVN | DivVN | ModVN | AddNV | SubNV | MulNV | DivNV | ModNV
            | AddVV | SubVV | MulVV | DivVV | ModVV | Pow | Cat | TGetV | TGetS | TGetB
            | TGetR | TSetV | TSetS | TSetB | TSetR | CallM | Call | IterC | IterN | VArg => {
                OperandShape::Abc
            }
            IsLt | IsGe | IsLe | IsGt | IsEqV | IsNeV | IsEqS | IsNeS | IsEqN | IsNeN | IsEqP
            | IsNeP | IsTc | IsFc | IsT | IsF | IsType | IsNum | Mov | Not | Unm | Len | KStr
            | KCdata | KShort | KNum | KPri | KNil | UGet | USetV | USetS | USetN | USetP | UClo
            | FNew | TNew | TDup | GGet | GSet | TSetM | CallMT | CallT | IsNext | RetM | Ret
            | Ret0 | Ret1 | ForI | JForI | ForL | IForL | JForL | IterL | IIterL | JIterL | Loop
            | ILoop | JLoop | Jmp | FuncF | IFuncF | JFuncF | FuncV | IFuncV | JFuncV | FuncC
            | FuncCW => OperandShape::Ad,
        }
    }

    /// Operand slot that indexes the GC-constant pool, if any
    pub fn constant_slot(self) -> Option<ConstantSlot> {
        use Opcode::*;
        match self {
            KStr | KCdata | TDup | FNew | GGet | GSet | IsEqS | IsNeS | USetS => {
                Some(ConstantSlot::D)
            }
            TGetS | TSetS => Some(ConstantSlot::C),
            IsLt | IsGe | IsLe | IsGt | IsEqV | IsNeV | IsEqN | IsNeN | IsEqP | IsNeP | IsTc
            | IsFc | IsT | IsF | IsType | IsNum | Mov | Not | Unm | Len | AddVN | SubVN | MulVN
            | DivVN | ModVN | AddNV | SubNV | MulNV | DivNV | ModNV | AddVV | SubVV | MulVV
            | DivVV | ModVV | Pow | Cat | KShort | KNum | KPri | KNil | UGet | USetV | USetN
            | USetP | UClo | TNew | TGetV | TGetB | TGetR | TSetV | TSetB | TSetM | TSetR
            | CallM | Call | CallMT | CallT | IterC | IterN | VArg | IsNext | RetM | Ret | Ret0
            | Ret1 | ForI | JForI | ForL | IForL | JForL | IterL | IIterL | JIterL | Loop | ILoop
            | JLoop | Jmp | FuncF | IFuncF | JFuncF | FuncV | IFuncV | JFuncV | FuncC | FuncCW => {
                None
            }
        }
    }

    /// D holds a biased relative jump
    pub fn is_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            UClo | IsNext | ForI | JForI | ForL | IForL | IterL | IIterL | Loop | ILoop | Jmp
        )
    }

    /// Conditional test that is always followed by the JMP it guards
    pub fn is_conditional_test(self) -> bool {
        (self as u8) <= Opcode::IsNum as u8
    }

    /// Byte value under the legacy version 1 numbering
    ///
    /// Version 1 lacks ISTYPE, ISNUM, TGETR and TSETR; everything after each
    /// gap shifts down.
    pub fn to_v1_byte(self) -> Option<u8> {
        let op = self as u8;
        match op {
            0..=15 => Some(op),
            16 | 17 | 59 | 64 => None,
            18..=58 => Some(op - 2),
            60..=63 => Some(op - 3),
            _ => Some(op - 4),
        }
    }

    /// Opcode for a legacy version 1 byte value
    pub fn from_v1_byte(byte: u8) -> Option<Self> {
        let op = match byte {
            0..=15 => byte,
            16..=56 => byte + 2,
            57..=60 => byte + 3,
            _ => byte.checked_add(4)?,
        };
        Self::from_byte(op)
    }

    /// Byte value written for `version`
    pub fn encode_for(self, version: BytecodeVersion) -> Option<u8> {
        match version {
            BytecodeVersion::V1 => self.to_v1_byte(),
            BytecodeVersion::Modified => Some(self.to_byte()),
        }
    }
}

/// A single instruction: opcode plus the four operand fields
///
/// Only the fields selected by [`Opcode::shape`] are meaningful; the others
/// are kept at zero by the constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    /// Opcode
    pub op: Opcode,
    /// A operand
    pub a: u8,
    /// B operand (ABC shape)
    pub b: u8,
    /// C operand (ABC shape)
    pub c: u8,
    /// D operand (AD shape)
    pub d: u16,
}

impl Instruction {
    /// Create an ABC-shaped instruction
    #[inline]
    pub const fn abc(op: Opcode, a: u8, b: u8, c: u8) -> Self {
        Self { op, a, b, c, d: 0 }
    }

    /// Create an AD-shaped instruction
    #[inline]
    pub const fn ad(op: Opcode, a: u8, d: u16) -> Self {
        Self { op, a, b: 0, c: 0, d }
    }

    /// Create a jump-style instruction landing on `target` when placed at `pc`
    pub fn jump(op: Opcode, a: u8, pc: usize, target: usize) -> Option<Self> {
        let d = JumpOffset::between(pc, target).to_d()?;
        Some(Self::ad(op, a, d))
    }

    /// Wire shape of this instruction
    #[inline]
    pub fn shape(&self) -> OperandShape {
        self.op.shape()
    }

    /// GC-constant index referenced by this instruction
    pub fn constant_index(&self) -> Option<u32> {
        match self.op.constant_slot()? {
            ConstantSlot::C => Some(self.c as u32),
            ConstantSlot::D => Some(self.d as u32),
        }
    }

    /// Return a copy whose GC-constant operand is `index`
    ///
    /// `None` when the opcode has no constant operand or the index does not
    /// fit the operand field.
    pub fn with_constant_index(&self, index: u32) -> Option<Self> {
        let mut out = *self;
        match self.op.constant_slot()? {
            ConstantSlot::C => out.c = u8::try_from(index).ok()?,
            ConstantSlot::D => out.d = u16::try_from(index).ok()?,
        }
        Some(out)
    }

    /// Jump distance, for jump-style opcodes
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        self.op.is_jump().then(|| JumpOffset::from_d(self.d))
    }

    /// Absolute instruction index this jump lands on when placed at `pc`
    pub fn jump_target(&self, pc: usize) -> Option<i64> {
        self.jump_offset().map(|off| off.target_from(pc))
    }
}
