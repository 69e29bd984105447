//! The bytecode instruction set.
//!
//! One byte per opcode, organised in sixteen rows by high nibble: stack
//! management, literal loads, variable I/O (with depth-0..7 shorthand rows),
//! property access, structural primitives, arity-specialised calls and tail
//! calls, branches and till/try control, the well-known unary/binary
//! operator row, and the pseudo-ops that exist only in the compiler's
//! intermediate form.
//!
//! An emitted instruction is an `(opcode, operand)` pair; the operand is one
//! 64-bit union interpreted per opcode (immediate, relative branch offset,
//! table index, or a packed `(hi, lo)` pair for two-part operands).

use strum::{FromRepr, IntoStaticStr};

/// One instruction in an emitted segment.
///
/// `loc` indexes the program's source-location table, for traceback
/// attribution.
#[derive(Debug, Clone, Copy)]
pub struct Instr {
    pub op: Opcode,
    pub operand: i64,
    pub loc: u32,
}

impl Instr {
    /// Splits a packed two-part operand.
    #[must_use]
    pub fn operand_pair(self) -> (i32, i32) {
        ((self.operand >> 32) as i32, self.operand as i32)
    }
}

/// Packs a two-part operand.
#[must_use]
pub fn pack_pair(hi: i32, lo: i32) -> i64 {
    (i64::from(hi) << 32) | i64::from(lo as u32)
}

/// The opcode set. Discriminants are the wire encoding and match the
/// sixteen-row layout; gaps are unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum Opcode {
    // 0x: state management.
    Nop = 0x00,
    Dup1 = 0x01,
    Dup2 = 0x02,
    Dup = 0x03,
    Pop1 = 0x05,
    Pop2 = 0x06,
    Pop = 0x07,
    Rep1 = 0x09,
    Rep2 = 0x0A,
    Rep = 0x0B,
    Brk = 0x0F,

    // 1x: literal loads for non-float scalars.
    LdNull = 0x10,
    LdBool = 0x11,
    LdStr = 0x12,
    LdSym = 0x13,
    LdObj = 0x14,
    LdClos = 0x15,
    LdCh = 0x16,
    LdUni = 0x17,
    Ld8 = 0x18,
    Ld16 = 0x19,
    Ld32 = 0x1A,
    Ld64 = 0x1B,

    // 2x: real/float literal loads. The 16-bit slots are reserved but never
    // emitted; no literal form produces them.
    LdR32 = 0x22,
    LdR64 = 0x23,
    LdR128 = 0x24,
    LdF32 = 0x2A,
    LdF64 = 0x2B,

    // 3x: generic variable I/O. Operand packs (scope depth, slot) for
    // locals/args; symbol id for globals.
    LdLoc = 0x30,
    StLoc = 0x31,
    StpLoc = 0x32,
    LdArg = 0x34,
    StArg = 0x35,
    StpArg = 0x36,
    LdX = 0x38,
    StX = 0x39,
    StpX = 0x3A,

    // 4x: shorthand loads scoped by depth 0..7.
    LdArg0 = 0x40,
    LdArg1 = 0x41,
    LdArg2 = 0x42,
    LdArg3 = 0x43,
    LdArg4 = 0x44,
    LdArg5 = 0x45,
    LdArg6 = 0x46,
    LdArg7 = 0x47,
    LdLoc0 = 0x48,
    LdLoc1 = 0x49,
    LdLoc2 = 0x4A,
    LdLoc3 = 0x4B,
    LdLoc4 = 0x4C,
    LdLoc5 = 0x4D,
    LdLoc6 = 0x4E,
    LdLoc7 = 0x4F,

    // 5x: shorthand stores.
    StArg0 = 0x50,
    StArg1 = 0x51,
    StArg2 = 0x52,
    StArg3 = 0x53,
    StArg4 = 0x54,
    StArg5 = 0x55,
    StArg6 = 0x56,
    StArg7 = 0x57,
    StLoc0 = 0x58,
    StLoc1 = 0x59,
    StLoc2 = 0x5A,
    StLoc3 = 0x5B,
    StLoc4 = 0x5C,
    StLoc5 = 0x5D,
    StLoc6 = 0x5E,
    StLoc7 = 0x5F,

    // 6x: shorthand store-and-pops.
    StpArg0 = 0x60,
    StpArg1 = 0x61,
    StpArg2 = 0x62,
    StpArg3 = 0x63,
    StpArg4 = 0x64,
    StpArg5 = 0x65,
    StpArg6 = 0x66,
    StpArg7 = 0x67,
    StpLoc0 = 0x68,
    StpLoc1 = 0x69,
    StpLoc2 = 0x6A,
    StpLoc3 = 0x6B,
    StpLoc4 = 0x6C,
    StpLoc5 = 0x6D,
    StpLoc6 = 0x6E,
    StpLoc7 = 0x6F,

    // 7x: property access.
    LdProp = 0x70,
    StProp = 0x71,
    StpProp = 0x72,
    LdMember = 0x74,
    StMember = 0x75,
    StpMember = 0x76,

    // 8x: pair/list primitives and dispatch primitives.
    Cons = 0x80,
    Car = 0x81,
    Cdr = 0x82,
    NewPair = 0x84,
    Left = 0x85,
    Right = 0x86,
    NewFn = 0x88,
    NewObj = 0x89,
    SuperEq = 0x8B,
    SuperNe = 0x8C,
    Not = 0x8D,
    Is = 0x8E,
    TypeOf = 0x8F,

    // 9x: direct calls by arity.
    Call0 = 0x90,
    Call1 = 0x91,
    Call2 = 0x92,
    Call3 = 0x93,
    Call4 = 0x94,
    Call5 = 0x95,
    Call6 = 0x96,
    Call7 = 0x97,
    Met0 = 0x98,
    Met1 = 0x99,
    Met2 = 0x9A,
    Met3 = 0x9B,
    Met4 = 0x9C,
    Met5 = 0x9D,
    Met6 = 0x9E,
    Met7 = 0x9F,

    // Ax: tail variants.
    TCall0 = 0xA0,
    TCall1 = 0xA1,
    TCall2 = 0xA2,
    TCall3 = 0xA3,
    TCall4 = 0xA4,
    TCall5 = 0xA5,
    TCall6 = 0xA6,
    TCall7 = 0xA7,
    TMet0 = 0xA8,
    TMet1 = 0xA9,
    TMet2 = 0xAA,
    TMet3 = 0xAB,
    TMet4 = 0xAC,
    TMet5 = 0xAD,
    TMet6 = 0xAE,
    TMet7 = 0xAF,

    // Bx: branches, variadic calls, till ops, exception ops, return.
    Jmp = 0xB0,
    Bt = 0xB1,
    Bf = 0xB2,
    Met = 0xB4,
    TMet = 0xB5,
    Call = 0xB6,
    TCall = 0xB7,
    NewTill = 0xB8,
    EndTill = 0xB9,
    TillEsc = 0xBA,
    Try = 0xBC,
    EndTry = 0xBD,
    Ret = 0xBF,

    // Cx: well-known binary operators (method dispatch on the receiver).
    Add = 0xC0,
    Sub = 0xC1,
    Mul = 0xC2,
    Div = 0xC3,
    Mod = 0xC4,
    Rem = 0xC5,
    RangeTo = 0xC7,
    Eq = 0xC8,
    Ne = 0xC9,
    Lt = 0xCA,
    Gt = 0xCB,
    Le = 0xCC,
    Ge = 0xCD,
    Cmp = 0xCE,
    Compare = 0xCF,

    // Dx: well-known binary/unary collection operators.
    Each = 0xD0,
    Map = 0xD1,
    Where = 0xD2,
    Count = 0xD4,
    Any = 0xD5,
    Join = 0xD6,
    UCount = 0xD8,
    UAny = 0xD9,
    UJoin = 0xDA,
    Neg = 0xDB,
    Bool = 0xDC,
    Int = 0xDD,
    Str = 0xDE,
    Hash = 0xDF,

    // Ex: well-known unary predicates and shorthand property reads.
    NullQ = 0xE0,
    ListQ = 0xE1,
    PairQ = 0xE2,
    FnQ = 0xE3,
    BoolQ = 0xE4,
    IntQ = 0xE5,
    StrQ = 0xE6,
    SymbolQ = 0xE7,
    LdA = 0xE8,
    LdD = 0xE9,
    LdLeft = 0xEA,
    LdRight = 0xEB,
    LdStart = 0xEC,
    LdEnd = 0xED,
    LdCount = 0xEE,
    LdLength = 0xEF,

    // Fx: state-machine re-entry and the IR-only pseudo-ops.
    StateMachStart = 0xF0,
    StateMachBody = 0xF1,
    Pseudo = 0xF8,
    EndBlock = 0xFD,
    Label = 0xFE,
    Block = 0xFF,
}

impl Opcode {
    /// The fixed stack effect of this opcode, when it has one. Opcodes whose
    /// effect depends on their operand (`Dup`/`Pop`/`Rep`/variadic calls and
    /// object construction) return `None` and the emitter computes the
    /// effect from the operand.
    #[must_use]
    pub fn stack_effect(self) -> Option<i32> {
        use Opcode as Op;
        Some(match self {
            Op::Nop | Op::Brk => 0,
            Op::Dup1 | Op::Dup2 => 1,
            Op::Pop1 | Op::Rep1 => -1,
            Op::Pop2 | Op::Rep2 => -2,
            Op::Dup | Op::Pop | Op::Rep | Op::NewObj | Op::Met | Op::TMet | Op::Call | Op::TCall => return None,

            Op::LdNull
            | Op::LdBool
            | Op::LdStr
            | Op::LdSym
            | Op::LdObj
            | Op::LdClos
            | Op::LdCh
            | Op::LdUni
            | Op::Ld8
            | Op::Ld16
            | Op::Ld32
            | Op::Ld64
            | Op::LdR32
            | Op::LdR64
            | Op::LdR128
            | Op::LdF32
            | Op::LdF64 => 1,

            Op::LdLoc | Op::LdArg | Op::LdX => 1,
            Op::StLoc | Op::StArg | Op::StX => 0,
            Op::StpLoc | Op::StpArg | Op::StpX => -1,

            Op::LdArg0
            | Op::LdArg1
            | Op::LdArg2
            | Op::LdArg3
            | Op::LdArg4
            | Op::LdArg5
            | Op::LdArg6
            | Op::LdArg7
            | Op::LdLoc0
            | Op::LdLoc1
            | Op::LdLoc2
            | Op::LdLoc3
            | Op::LdLoc4
            | Op::LdLoc5
            | Op::LdLoc6
            | Op::LdLoc7 => 1,

            Op::StArg0
            | Op::StArg1
            | Op::StArg2
            | Op::StArg3
            | Op::StArg4
            | Op::StArg5
            | Op::StArg6
            | Op::StArg7
            | Op::StLoc0
            | Op::StLoc1
            | Op::StLoc2
            | Op::StLoc3
            | Op::StLoc4
            | Op::StLoc5
            | Op::StLoc6
            | Op::StLoc7 => 0,

            Op::StpArg0
            | Op::StpArg1
            | Op::StpArg2
            | Op::StpArg3
            | Op::StpArg4
            | Op::StpArg5
            | Op::StpArg6
            | Op::StpArg7
            | Op::StpLoc0
            | Op::StpLoc1
            | Op::StpLoc2
            | Op::StpLoc3
            | Op::StpLoc4
            | Op::StpLoc5
            | Op::StpLoc6
            | Op::StpLoc7 => -1,

            Op::LdProp => 0,
            Op::StProp => -1,
            Op::StpProp => -2,
            Op::LdMember => -1,
            Op::StMember => -2,
            Op::StpMember => -3,

            Op::Cons | Op::NewPair => -1,
            Op::Car | Op::Cdr | Op::Left | Op::Right => 0,
            Op::NewFn => 1,
            Op::SuperEq | Op::SuperNe | Op::Is => -1,
            Op::Not | Op::TypeOf => 0,

            Op::Call0 | Op::TCall0 => 0,
            Op::Call1 | Op::TCall1 => -1,
            Op::Call2 | Op::TCall2 => -2,
            Op::Call3 | Op::TCall3 => -3,
            Op::Call4 | Op::TCall4 => -4,
            Op::Call5 | Op::TCall5 => -5,
            Op::Call6 | Op::TCall6 => -6,
            Op::Call7 | Op::TCall7 => -7,
            // Met N pops the target plus N args and pushes the result.
            Op::Met0 | Op::TMet0 => 0,
            Op::Met1 | Op::TMet1 => -1,
            Op::Met2 | Op::TMet2 => -2,
            Op::Met3 | Op::TMet3 => -3,
            Op::Met4 | Op::TMet4 => -4,
            Op::Met5 | Op::TMet5 => -5,
            Op::Met6 | Op::TMet6 => -6,
            Op::Met7 | Op::TMet7 => -7,

            Op::Jmp => 0,
            Op::Bt | Op::Bf => -1,
            Op::NewTill => 1,
            Op::EndTill => -1,
            Op::TillEsc => -1,
            Op::Try | Op::EndTry => 0,
            Op::Ret => 0,

            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Rem
            | Op::RangeTo
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Gt
            | Op::Le
            | Op::Ge
            | Op::Cmp
            | Op::Compare
            | Op::Each
            | Op::Map
            | Op::Where
            | Op::Count
            | Op::Any
            | Op::Join => -1,

            Op::UCount
            | Op::UAny
            | Op::UJoin
            | Op::Neg
            | Op::Bool
            | Op::Int
            | Op::Str
            | Op::Hash
            | Op::NullQ
            | Op::ListQ
            | Op::PairQ
            | Op::FnQ
            | Op::BoolQ
            | Op::IntQ
            | Op::StrQ
            | Op::SymbolQ
            | Op::LdA
            | Op::LdD
            | Op::LdLeft
            | Op::LdRight
            | Op::LdStart
            | Op::LdEnd
            | Op::LdCount
            | Op::LdLength => 0,

            Op::StateMachStart | Op::StateMachBody => 0,
            Op::Pseudo | Op::EndBlock | Op::Label | Op::Block => 0,
        })
    }

    /// True for the IR-only pseudo-ops.
    #[must_use]
    pub fn is_pseudo(self) -> bool {
        matches!(self, Self::Pseudo | Self::EndBlock | Self::Label | Self::Block)
    }

    /// True for the branch opcodes whose operand is a relative offset.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Jmp | Self::Bt | Self::Bf | Self::Try)
    }

    /// The mnemonic, for disassembly.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Renders one segment, one instruction per line, as `addr: Op operand`.
#[must_use]
pub fn disassemble(segment: &[Instr]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for (addr, instr) in segment.iter().enumerate() {
        let _ = write!(out, "{addr:5}: {}", instr.op.name());
        if instr.op.is_branch() {
            let target = addr as i64 + instr.operand;
            let _ = write!(out, " ->{target}");
        } else if instr.operand != 0 {
            let _ = write!(out, " {}", instr.operand);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_follow_the_row_layout() {
        assert_eq!(Opcode::Nop as u8, 0x00);
        assert_eq!(Opcode::LdNull as u8, 0x10);
        assert_eq!(Opcode::LdLoc as u8, 0x30);
        assert_eq!(Opcode::LdArg0 as u8, 0x40);
        assert_eq!(Opcode::Cons as u8, 0x80);
        assert_eq!(Opcode::Call0 as u8, 0x90);
        assert_eq!(Opcode::TCall0 as u8, 0xA0);
        assert_eq!(Opcode::Jmp as u8, 0xB0);
        assert_eq!(Opcode::NewTill as u8, 0xB8);
        assert_eq!(Opcode::Add as u8, 0xC0);
        assert_eq!(Opcode::Label as u8, 0xFE);
    }

    #[test]
    fn from_repr_round_trips() {
        for op in [Opcode::Nop, Opcode::Ret, Opcode::TillEsc, Opcode::LdLength] {
            assert_eq!(Opcode::from_repr(op as u8), Some(op));
        }
        // A gap decodes as nothing.
        assert_eq!(Opcode::from_repr(0x04), None);
    }

    #[test]
    fn pair_packing_round_trips() {
        let packed = pack_pair(-3, 70_000);
        let instr = Instr {
            op: Opcode::LdLoc,
            operand: packed,
            loc: 0,
        };
        assert_eq!(instr.operand_pair(), (-3, 70_000));
    }
}
