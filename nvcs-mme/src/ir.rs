// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Intermediate representation produced by the builder and consumed by the
//! assembler, plus the reference-counted register arena.

use crate::isa::{AluOp, BranchCondition, Operation, ResultOp};
use crate::MmeError;

/// Number of general-purpose registers ($r0..$r7).
pub const NUM_REGISTERS: usize = 8;

/// A physical macro register. `$r0` always reads zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub(crate) u8);

impl Reg {
    pub const ZERO: Reg = Reg(0);
    /// Holds the first call argument on entry.
    pub const ARG0: Reg = Reg(1);

    pub fn index(self) -> u32 {
        self.0 as u32
    }
}

/// An operand: a register or a 32-bit constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Reg(Reg),
    Imm(u32),
}

impl Value {
    pub const ZERO: Value = Value::Imm(0);

    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Imm(0) | Value::Reg(Reg::ZERO))
    }
}

impl From<Reg> for Value {
    fn from(r: Reg) -> Self {
        Value::Reg(r)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Imm(v)
    }
}

/// A 64-bit quantity held in two registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value64 {
    pub hi: Reg,
    pub lo: Reg,
}

/// A branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

/// One IR instruction over physical registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    AddImm {
        result: ResultOp,
        dst: Reg,
        src: Reg,
        imm: i32,
    },
    Alu {
        result: ResultOp,
        op: AluOp,
        dst: Reg,
        a: Reg,
        b: Reg,
    },
    Bitfield {
        op: Operation,
        result: ResultOp,
        dst: Reg,
        a: Reg,
        b: Reg,
        src_bit: u32,
        size: u32,
        dst_bit: u32,
    },
    Read {
        dst: Reg,
        base: Reg,
        imm: i32,
    },
    /// Annulled branch on `src`.
    Branch {
        cond: BranchCondition,
        src: Reg,
        target: Label,
    },
    /// Places a label at the next instruction.
    Bind(Label),
    /// Stops the program: an exit-flagged no-op and its delay slot.
    Exit,
}

// ── Register arena ───────────────────────────────────────────────────────────

/// Reference-counted allocator over `$r1..$r7`.
///
/// `$r1` is withheld until the program's first argument load claims it, since
/// it holds the first argument on entry.
#[derive(Debug, Clone)]
pub struct RegArena {
    refs: [u8; NUM_REGISTERS],
    free: Vec<u8>,
    arg0_claimed: bool,
}

impl Default for RegArena {
    fn default() -> Self {
        Self::new()
    }
}

impl RegArena {
    pub fn new() -> Self {
        Self {
            refs: [0; NUM_REGISTERS],
            // Popped from the back: lowest register first.
            free: (2..NUM_REGISTERS as u8).rev().collect(),
            arg0_claimed: false,
        }
    }

    pub fn alloc(&mut self) -> Result<Reg, MmeError> {
        let idx = self.free.pop().ok_or(MmeError::OutOfRegisters)?;
        self.refs[idx as usize] = 1;
        Ok(Reg(idx))
    }

    /// Claim `$r1` for the first argument. Returns `None` if already claimed.
    pub fn claim_arg0(&mut self) -> Option<Reg> {
        if self.arg0_claimed {
            return None;
        }
        self.arg0_claimed = true;
        self.refs[1] = 1;
        Some(Reg::ARG0)
    }

    pub fn arg0_claimed(&self) -> bool {
        self.arg0_claimed
    }

    pub fn retain(&mut self, reg: Reg) {
        if reg != Reg::ZERO {
            debug_assert!(self.refs[reg.0 as usize] > 0, "retain of free register");
            self.refs[reg.0 as usize] += 1;
        }
    }

    pub fn release(&mut self, reg: Reg) {
        if reg == Reg::ZERO {
            return;
        }
        let refs = &mut self.refs[reg.0 as usize];
        debug_assert!(*refs > 0, "double free of $r{}", reg.0);
        *refs = refs.saturating_sub(1);
        if *refs == 0 {
            self.free.push(reg.0);
            // Keep allocation order deterministic.
            self.free.sort_unstable_by(|a, b| b.cmp(a));
        }
    }

    /// Re-take a specific register that was released earlier.
    pub fn reacquire(&mut self, reg: Reg) -> Result<(), MmeError> {
        let pos = self
            .free
            .iter()
            .position(|&r| r == reg.0)
            .ok_or(MmeError::OutOfRegisters)?;
        self.free.remove(pos);
        self.refs[reg.0 as usize] = 1;
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.refs.iter().filter(|&&r| r > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_allocates_lowest_first() {
        let mut arena = RegArena::new();
        assert_eq!(arena.alloc(), Ok(Reg(2)));
        assert_eq!(arena.alloc(), Ok(Reg(3)));
    }

    #[test]
    fn test_arena_exhaustion() {
        let mut arena = RegArena::new();
        for _ in 0..6 {
            arena.alloc().unwrap();
        }
        assert_eq!(arena.alloc(), Err(MmeError::OutOfRegisters));
        assert_eq!(arena.claim_arg0(), Some(Reg::ARG0));
        assert_eq!(arena.live_count(), 7);
    }

    #[test]
    fn test_arena_refcount() {
        let mut arena = RegArena::new();
        let r = arena.alloc().unwrap();
        arena.retain(r);
        arena.release(r);
        assert_eq!(arena.alloc(), Ok(Reg(3)));
        arena.release(r);
        assert_eq!(arena.alloc(), Ok(Reg(2)));
    }

    #[test]
    fn test_arena_arg0_released_to_pool() {
        let mut arena = RegArena::new();
        let r1 = arena.claim_arg0().unwrap();
        assert_eq!(arena.claim_arg0(), None);
        arena.release(r1);
        assert_eq!(arena.alloc(), Ok(Reg::ARG0));
    }

    #[test]
    fn test_arena_reacquire() {
        let mut arena = RegArena::new();
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        arena.release(b);
        assert_eq!(arena.reacquire(b), Ok(()));
        assert_eq!(arena.reacquire(a), Err(MmeError::OutOfRegisters));
    }

    #[test]
    fn test_value_zero() {
        assert!(Value::ZERO.is_zero());
        assert!(Value::from(Reg::ZERO).is_zero());
        assert!(!Value::from(5u32).is_zero());
    }
}
