// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Macro-unit instruction encoding.
//!
//! | Bits    | Field                                       |
//! |---------|---------------------------------------------|
//! | 2:0     | Operation                                   |
//! | 6:4     | Result operation (branch: bit 4 condition, bit 5 annul) |
//! | 7       | Exit                                        |
//! | 10:8    | Destination register                        |
//! | 13:11   | Source register A                           |
//! | 16:14   | Source register B                           |
//! | 31:14   | Signed 18-bit immediate                     |
//! | 21:17   | ALU operation / bitfield source bit         |
//! | 26:22   | Bitfield size                               |
//! | 31:27   | Bitfield destination bit                    |

use std::fmt;

// ── Instruction field enums ──────────────────────────────────────────────────

/// Primary operation encoded in bits[2:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Operation {
    Alu = 0,
    AddImmediate = 1,
    ExtractInsert = 2,
    ExtractShiftLeftImmediate = 3,
    ExtractShiftLeftRegister = 4,
    Read = 5,
    Unused = 6,
    Branch = 7,
}

impl Operation {
    pub fn from_raw(v: u32) -> Self {
        match v & 0x7 {
            0 => Self::Alu,
            1 => Self::AddImmediate,
            2 => Self::ExtractInsert,
            3 => Self::ExtractShiftLeftImmediate,
            4 => Self::ExtractShiftLeftRegister,
            5 => Self::Read,
            6 => Self::Unused,
            _ => Self::Branch,
        }
    }
}

/// ALU sub-operation encoded in bits[21:17].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AluOp {
    Add = 0,
    AddWithCarry = 1,
    Subtract = 2,
    SubtractWithBorrow = 3,
    Xor = 8,
    Or = 9,
    And = 10,
    AndNot = 11,
    Nand = 12,
}

impl AluOp {
    pub fn from_raw(v: u32) -> Self {
        match v {
            0 => Self::Add,
            1 => Self::AddWithCarry,
            2 => Self::Subtract,
            3 => Self::SubtractWithBorrow,
            8 => Self::Xor,
            9 => Self::Or,
            10 => Self::And,
            11 => Self::AndNot,
            12 => Self::Nand,
            _ => {
                log::warn!("Unknown ALU operation {}, defaulting to Add", v);
                Self::Add
            }
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::AddWithCarry => "addc",
            Self::Subtract => "sub",
            Self::SubtractWithBorrow => "subb",
            Self::Xor => "xor",
            Self::Or => "or",
            Self::And => "and",
            Self::AndNot => "andn",
            Self::Nand => "nand",
        }
    }
}

/// Result operation encoded in bits[6:4].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultOp {
    IgnoreAndFetch = 0,
    Move = 1,
    MoveAndSetMethod = 2,
    FetchAndSend = 3,
    MoveAndSend = 4,
    FetchAndSetMethod = 5,
    MoveAndSetMethodFetchAndSend = 6,
    MoveAndSetMethodSend = 7,
}

impl ResultOp {
    pub fn from_raw(v: u32) -> Self {
        match v & 0x7 {
            0 => Self::IgnoreAndFetch,
            1 => Self::Move,
            2 => Self::MoveAndSetMethod,
            3 => Self::FetchAndSend,
            4 => Self::MoveAndSend,
            5 => Self::FetchAndSetMethod,
            6 => Self::MoveAndSetMethodFetchAndSend,
            _ => Self::MoveAndSetMethodSend,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::IgnoreAndFetch => " [fetch]",
            Self::Move => "",
            Self::MoveAndSetMethod => " [mthd]",
            Self::FetchAndSend => " [fetch, send]",
            Self::MoveAndSend => " [send]",
            Self::FetchAndSetMethod => " [fetch, mthd]",
            Self::MoveAndSetMethodFetchAndSend => " [mthd, fetch-send]",
            Self::MoveAndSetMethodSend => " [mthd, send-inc]",
        }
    }
}

/// Branch condition encoded in bit[4].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BranchCondition {
    Zero = 0,
    NotZero = 1,
}

impl BranchCondition {
    pub fn from_raw(v: u32) -> Self {
        if v & 1 == 0 {
            Self::Zero
        } else {
            Self::NotZero
        }
    }
}

// ── Opcode ───────────────────────────────────────────────────────────────────

/// Smallest and largest value of the signed 18-bit immediate.
pub const IMM_MIN: i32 = -(1 << 17);
pub const IMM_MAX: i32 = (1 << 17) - 1;

/// `addimm $r0, $r0, 0` with a move: the canonical no-op. An all-zero word
/// would fetch a parameter, so it cannot serve as padding.
pub const NOP: u32 = 0x11;

/// Whether `v` fits the signed 18-bit immediate field.
pub fn imm_fits(v: i64) -> bool {
    (IMM_MIN as i64..=IMM_MAX as i64).contains(&v)
}

/// A 32-bit macro opcode with accessors for each field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Opcode(pub u32);

impl Opcode {
    pub fn operation(&self) -> Operation {
        Operation::from_raw(self.0 & 0x7)
    }

    pub fn result_operation(&self) -> ResultOp {
        ResultOp::from_raw((self.0 >> 4) & 0x7)
    }

    pub fn branch_condition(&self) -> BranchCondition {
        BranchCondition::from_raw((self.0 >> 4) & 0x1)
    }

    /// Branch annul flag (bit[5]). A taken annulled branch skips its delay slot.
    pub fn branch_annul(&self) -> bool {
        (self.0 >> 5) & 1 != 0
    }

    /// Exit flag (bit[7]). Execution stops after the following delay slot.
    pub fn is_exit(&self) -> bool {
        (self.0 >> 7) & 1 != 0
    }

    pub fn dst(&self) -> u32 {
        (self.0 >> 8) & 0x7
    }

    pub fn src_a(&self) -> u32 {
        (self.0 >> 11) & 0x7
    }

    pub fn src_b(&self) -> u32 {
        (self.0 >> 14) & 0x7
    }

    /// Signed 18-bit immediate (bits[31:14]).
    pub fn immediate(&self) -> i32 {
        (self.0 as i32) >> 14
    }

    pub fn alu_operation(&self) -> AluOp {
        AluOp::from_raw((self.0 >> 17) & 0x1F)
    }

    pub fn bf_src_bit(&self) -> u32 {
        (self.0 >> 17) & 0x1F
    }

    pub fn bf_size(&self) -> u32 {
        (self.0 >> 22) & 0x1F
    }

    pub fn bf_dst_bit(&self) -> u32 {
        (self.0 >> 27) & 0x1F
    }

    /// `(1 << size) - 1`; a zero size selects nothing.
    pub fn bitfield_mask(&self) -> u32 {
        (1u32 << self.bf_size()).wrapping_sub(1)
    }
}

// ── Encoders ─────────────────────────────────────────────────────────────────

fn encode_base(op: Operation, result: ResultOp, dst: u32, src_a: u32, src_b: u32) -> u32 {
    (op as u32)
        | ((result as u32) << 4)
        | ((dst & 0x7) << 8)
        | ((src_a & 0x7) << 11)
        | ((src_b & 0x7) << 14)
}

/// Register-register ALU operation.
pub fn encode_alu(alu: AluOp, result: ResultOp, dst: u32, src_a: u32, src_b: u32) -> u32 {
    encode_base(Operation::Alu, result, dst, src_a, src_b) | ((alu as u32) << 17)
}

/// `dst = src_a + imm`. The immediate must satisfy [`imm_fits`].
pub fn encode_add_imm(result: ResultOp, dst: u32, src_a: u32, imm: i32) -> u32 {
    debug_assert!(imm_fits(imm as i64));
    encode_base(Operation::AddImmediate, result, dst, src_a, 0) & 0x3FFF | ((imm as u32) << 14)
}

/// Bitfield operation (insert or either extract-shift form).
#[allow(clippy::too_many_arguments)]
pub fn encode_bitfield(
    op: Operation,
    result: ResultOp,
    dst: u32,
    src_a: u32,
    src_b: u32,
    src_bit: u32,
    size: u32,
    dst_bit: u32,
) -> u32 {
    debug_assert!(matches!(
        op,
        Operation::ExtractInsert
            | Operation::ExtractShiftLeftImmediate
            | Operation::ExtractShiftLeftRegister
    ));
    encode_base(op, result, dst, src_a, src_b)
        | ((src_bit & 0x1F) << 17)
        | ((size & 0x1F) << 22)
        | ((dst_bit & 0x1F) << 27)
}

/// `dst = read(src_a + imm)`; the address is a method word address.
pub fn encode_read(result: ResultOp, dst: u32, src_a: u32, imm: i32) -> u32 {
    debug_assert!(imm_fits(imm as i64));
    encode_base(Operation::Read, result, dst, src_a, 0) & 0x3FFF | ((imm as u32) << 14)
}

/// Branch on `src_a` to `pc + offset` (in instructions).
pub fn encode_branch(cond: BranchCondition, annul: bool, src_a: u32, offset: i32) -> u32 {
    debug_assert!(imm_fits(offset as i64));
    (Operation::Branch as u32)
        | ((cond as u32) << 4)
        | ((annul as u32) << 5)
        | ((src_a & 0x7) << 11)
        | ((offset as u32) << 14)
}

/// Set the exit bit on an encoded instruction.
pub fn with_exit(word: u32) -> u32 {
    word | (1 << 7)
}

// ── Disassembly ──────────────────────────────────────────────────────────────

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exit = if self.is_exit() { "exit " } else { "" };
        let (d, a, b) = (self.dst(), self.src_a(), self.src_b());
        match self.operation() {
            Operation::Alu => write!(
                f,
                "{}{} $r{}, $r{}, $r{}{}",
                exit,
                self.alu_operation().mnemonic(),
                d,
                a,
                b,
                self.result_operation().suffix()
            ),
            Operation::AddImmediate => write!(
                f,
                "{}addimm $r{}, $r{}, {}{}",
                exit,
                d,
                a,
                self.immediate(),
                self.result_operation().suffix()
            ),
            Operation::ExtractInsert => write!(
                f,
                "{}ins $r{}, $r{}, $r{} (src {}, size {}, dst {}){}",
                exit,
                d,
                a,
                b,
                self.bf_src_bit(),
                self.bf_size(),
                self.bf_dst_bit(),
                self.result_operation().suffix()
            ),
            Operation::ExtractShiftLeftImmediate => write!(
                f,
                "{}extshl $r{}, ($r{} >> $r{}) size {} << {}{}",
                exit,
                d,
                b,
                a,
                self.bf_size(),
                self.bf_dst_bit(),
                self.result_operation().suffix()
            ),
            Operation::ExtractShiftLeftRegister => write!(
                f,
                "{}extshlr $r{}, ($r{} >> {}) size {} << $r{}{}",
                exit,
                d,
                b,
                self.bf_src_bit(),
                self.bf_size(),
                a,
                self.result_operation().suffix()
            ),
            Operation::Read => write!(
                f,
                "{}read $r{}, [$r{} + 0x{:x}]{}",
                exit,
                d,
                a,
                self.immediate(),
                self.result_operation().suffix()
            ),
            Operation::Branch => write!(
                f,
                "{}b{}{} $r{}, {:+}",
                exit,
                match self.branch_condition() {
                    BranchCondition::Zero => "z",
                    BranchCondition::NotZero => "nz",
                },
                if self.branch_annul() { ".a" } else { "" },
                a,
                self.immediate()
            ),
            Operation::Unused => write!(f, "{}unused 0x{:08x}", exit, self.0),
        }
    }
}

/// One line per instruction: index, raw word and mnemonic.
pub fn disassemble(code: &[u32]) -> String {
    code.iter()
        .enumerate()
        .map(|(i, &w)| format!("{:4}: {:08x}  {}\n", i, w, Opcode(w)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_fields() {
        let w = encode_alu(AluOp::Xor, ResultOp::MoveAndSend, 3, 5, 6);
        let op = Opcode(w);
        assert_eq!(op.operation(), Operation::Alu);
        assert_eq!(op.alu_operation(), AluOp::Xor);
        assert_eq!(op.result_operation(), ResultOp::MoveAndSend);
        assert_eq!(op.dst(), 3);
        assert_eq!(op.src_a(), 5);
        assert_eq!(op.src_b(), 6);
        assert!(!op.is_exit());
    }

    #[test]
    fn test_immediate_sign_extension() {
        let w = encode_add_imm(ResultOp::Move, 1, 0, -5);
        assert_eq!(Opcode(w).immediate(), -5);
        let w = encode_add_imm(ResultOp::Move, 1, 0, IMM_MAX);
        assert_eq!(Opcode(w).immediate(), IMM_MAX);
        let w = encode_add_imm(ResultOp::Move, 1, 0, IMM_MIN);
        assert_eq!(Opcode(w).immediate(), IMM_MIN);
    }

    #[test]
    fn test_imm_fits() {
        assert!(imm_fits(0x1FFFF));
        assert!(!imm_fits(0x20000));
        assert!(imm_fits(-0x20000));
        assert!(!imm_fits(-0x20001));
    }

    #[test]
    fn test_nop_encoding() {
        let op = Opcode(NOP);
        assert_eq!(op.operation(), Operation::AddImmediate);
        assert_eq!(op.result_operation(), ResultOp::Move);
        assert_eq!(op.dst(), 0);
        assert_eq!(op.immediate(), 0);
        assert_eq!(encode_add_imm(ResultOp::Move, 0, 0, 0), NOP);
    }

    #[test]
    fn test_bitfield_fields() {
        let w = encode_bitfield(Operation::ExtractInsert, ResultOp::Move, 2, 2, 4, 0, 2, 26);
        let op = Opcode(w);
        assert_eq!(op.operation(), Operation::ExtractInsert);
        assert_eq!(op.bf_src_bit(), 0);
        assert_eq!(op.bf_size(), 2);
        assert_eq!(op.bf_dst_bit(), 26);
        assert_eq!(op.bitfield_mask(), 0x3);
    }

    #[test]
    fn test_branch_fields() {
        let w = encode_branch(BranchCondition::NotZero, true, 4, -3);
        let op = Opcode(w);
        assert_eq!(op.operation(), Operation::Branch);
        assert_eq!(op.branch_condition(), BranchCondition::NotZero);
        assert!(op.branch_annul());
        assert_eq!(op.src_a(), 4);
        assert_eq!(op.immediate(), -3);
    }

    #[test]
    fn test_exit_bit() {
        assert!(Opcode(with_exit(NOP)).is_exit());
    }

    #[test]
    fn test_disassemble() {
        let text = disassemble(&[encode_add_imm(ResultOp::MoveAndSend, 0, 1, 4), with_exit(NOP)]);
        assert!(text.contains("addimm $r0, $r1, 4 [send]"));
        assert!(text.contains("exit addimm $r0, $r0, 0"));
    }
}
