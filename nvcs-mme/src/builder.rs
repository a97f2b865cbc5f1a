// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Microprogram builder.
//!
//! Programs are written against a small set of operations (moves, ALU,
//! bitfields, compare-and-branch control flow, method emission and argument
//! loads). The builder lowers each operation to IR over physical registers
//! taken from a reference-counted arena, and records the first error it hits
//! so that program code can stay free of `?` chains; [`MmeBuilder::finish`]
//! reports it.

use nvcs_common::methods::{self, MME_METHOD_LIMIT};
use nvcs_common::types::ClassGen;

use crate::assembler;
use crate::ir::{Instr, Label, Reg, RegArena, Value, Value64};
use crate::isa::{imm_fits, AluOp, BranchCondition, Operation, ResultOp};
use crate::MmeError;

/// Comparison predicate for `if`/`while`. Ordered comparisons are unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Ult,
    Ule,
}

#[derive(Debug)]
enum Frame {
    If { end: Label },
    While { top: Label, end: Label },
    Loop { counter: Reg, top: Label, end: Label },
}

pub struct MmeBuilder {
    gen: ClassGen,
    instrs: Vec<Instr>,
    regs: RegArena,
    next_label: u32,
    frames: Vec<Frame>,
    error: Option<MmeError>,
}

impl MmeBuilder {
    pub fn new(gen: ClassGen) -> Self {
        Self {
            gen,
            instrs: Vec::new(),
            regs: RegArena::new(),
            next_label: 0,
            frames: Vec::new(),
            error: None,
        }
    }

    pub fn gen(&self) -> ClassGen {
        self.gen
    }

    pub fn ir(&self) -> &[Instr] {
        &self.instrs
    }

    /// Close the program and assemble it.
    pub fn finish(mut self) -> Result<Vec<u32>, MmeError> {
        if !self.frames.is_empty() {
            self.fail(MmeError::UnbalancedControlFlow);
        }
        self.push(Instr::Exit);
        if let Some(err) = self.error {
            return Err(err);
        }
        assembler::assemble(&self.instrs)
    }

    fn fail(&mut self, err: MmeError) {
        if self.error.is_none() {
            log::debug!("MME builder error: {}", err);
            self.error = Some(err);
        }
    }

    fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn add_imm(&mut self, result: ResultOp, dst: Reg, src: Reg, imm: i32) {
        if !imm_fits(imm as i64) {
            self.fail(MmeError::ImmediateOutOfRange(imm as i64));
        }
        self.push(Instr::AddImm { result, dst, src, imm });
    }

    #[allow(clippy::too_many_arguments)]
    fn bitfield(
        &mut self,
        op: Operation,
        dst: Reg,
        a: Reg,
        b: Reg,
        src_bit: u32,
        size: u32,
        dst_bit: u32,
    ) {
        if src_bit > 31 || size > 31 || dst_bit > 31 {
            self.fail(MmeError::ImmediateOutOfRange(size.max(src_bit).max(dst_bit) as i64));
        }
        self.push(Instr::Bitfield {
            op,
            result: ResultOp::Move,
            dst,
            a,
            b,
            src_bit,
            size,
            dst_bit,
        });
    }

    // ── Registers ──────────────────────────────────────────────────────────

    pub fn alloc_reg(&mut self) -> Reg {
        match self.regs.alloc() {
            Ok(reg) => reg,
            Err(err) => {
                self.fail(err);
                Reg::ZERO
            }
        }
    }

    pub fn retain_reg(&mut self, reg: Reg) {
        self.regs.retain(reg);
    }

    pub fn free_reg(&mut self, reg: Reg) {
        self.regs.release(reg);
    }

    pub fn free_value(&mut self, v: Value) {
        if let Value::Reg(reg) = v {
            self.free_reg(reg);
        }
    }

    pub fn free_value64(&mut self, v: Value64) {
        self.free_reg(v.hi);
        self.free_reg(v.lo);
    }

    /// Register holding `v`, materialising constants into a temporary.
    /// The flag tells whether the register must be released afterwards.
    fn operand(&mut self, v: Value) -> (Reg, bool) {
        match v {
            Value::Reg(reg) => (reg, false),
            Value::Imm(0) => (Reg::ZERO, false),
            Value::Imm(k) => {
                let tmp = self.alloc_reg();
                self.load_imm(ResultOp::Move, tmp, k);
                (tmp, true)
            }
        }
    }

    fn release_operand(&mut self, (reg, temp): (Reg, bool)) {
        if temp {
            self.free_reg(reg);
        }
    }

    /// Load a 32-bit constant. Values outside the 18-bit immediate are built
    /// from two 16-bit halves; `result` applies to the final instruction.
    fn load_imm(&mut self, result: ResultOp, dst: Reg, k: u32) {
        let signed = k as i32;
        if imm_fits(signed as i64) {
            self.add_imm(result, dst, Reg::ZERO, signed);
            return;
        }
        debug_assert!(dst != Reg::ZERO);
        self.add_imm(ResultOp::Move, dst, Reg::ZERO, (k >> 16) as i32);
        self.bitfield(Operation::ExtractInsert, dst, Reg::ZERO, dst, 0, 16, 16);
        self.add_imm(result, dst, dst, (k & 0xFFFF) as i32);
    }

    // ── Arguments ──────────────────────────────────────────────────────────

    /// Next call argument. The first load returns `$r1`.
    pub fn load(&mut self) -> Reg {
        if let Some(reg) = self.regs.claim_arg0() {
            return reg;
        }
        let dst = self.alloc_reg();
        self.add_imm(ResultOp::IgnoreAndFetch, dst, Reg::ZERO, 0);
        dst
    }

    /// Next call argument into an existing register.
    pub fn load_to(&mut self, dst: Reg) {
        if let Some(arg0) = self.regs.claim_arg0() {
            self.add_imm(ResultOp::Move, dst, arg0, 0);
            self.free_reg(arg0);
            return;
        }
        self.add_imm(ResultOp::IgnoreAndFetch, dst, Reg::ZERO, 0);
    }

    /// A 64-bit address passed as (high, low) arguments.
    pub fn load_addr64(&mut self) -> Value64 {
        let hi = self.load();
        let lo = self.load();
        Value64 { hi, lo }
    }

    // ── Moves and arithmetic ───────────────────────────────────────────────

    pub fn mov(&mut self, v: impl Into<Value>) -> Reg {
        let dst = self.alloc_reg();
        self.mov_to(dst, v);
        dst
    }

    pub fn mov_to(&mut self, dst: Reg, v: impl Into<Value>) {
        match v.into() {
            Value::Reg(src) => self.add_imm(ResultOp::Move, dst, src, 0),
            Value::Imm(k) => self.load_imm(ResultOp::Move, dst, k),
        }
    }

    fn alu_to(&mut self, op: AluOp, dst: Reg, a: Value, b: Value) {
        let ra = self.operand(a);
        let rb = self.operand(b);
        self.push(Instr::Alu {
            result: ResultOp::Move,
            op,
            dst,
            a: ra.0,
            b: rb.0,
        });
        self.release_operand(rb);
        self.release_operand(ra);
    }

    pub fn add(&mut self, a: impl Into<Value>, b: impl Into<Value>) -> Reg {
        let dst = self.alloc_reg();
        self.add_to(dst, a, b);
        dst
    }

    pub fn add_to(&mut self, dst: Reg, a: impl Into<Value>, b: impl Into<Value>) {
        match (a.into(), b.into()) {
            (Value::Imm(x), Value::Imm(y)) => self.mov_to(dst, x.wrapping_add(y)),
            (Value::Reg(r), Value::Imm(k)) | (Value::Imm(k), Value::Reg(r))
                if imm_fits(k as i32 as i64) =>
            {
                self.add_imm(ResultOp::Move, dst, r, k as i32)
            }
            (a, b) => self.alu_to(AluOp::Add, dst, a, b),
        }
    }

    pub fn sub(&mut self, a: impl Into<Value>, b: impl Into<Value>) -> Reg {
        let dst = self.alloc_reg();
        self.sub_to(dst, a, b);
        dst
    }

    pub fn sub_to(&mut self, dst: Reg, a: impl Into<Value>, b: impl Into<Value>) {
        match (a.into(), b.into()) {
            (Value::Imm(x), Value::Imm(y)) => self.mov_to(dst, x.wrapping_sub(y)),
            (Value::Reg(r), Value::Imm(k)) if imm_fits(-(k as i32 as i64)) => {
                self.add_imm(ResultOp::Move, dst, r, -(k as i32))
            }
            (a, b) => self.alu_to(AluOp::Subtract, dst, a, b),
        }
    }

    pub fn and(&mut self, a: impl Into<Value>, b: impl Into<Value>) -> Reg {
        let dst = self.alloc_reg();
        self.and_to(dst, a, b);
        dst
    }

    pub fn and_to(&mut self, dst: Reg, a: impl Into<Value>, b: impl Into<Value>) {
        self.alu_to(AluOp::And, dst, a.into(), b.into());
    }

    pub fn or(&mut self, a: impl Into<Value>, b: impl Into<Value>) -> Reg {
        let dst = self.alloc_reg();
        self.or_to(dst, a, b);
        dst
    }

    pub fn or_to(&mut self, dst: Reg, a: impl Into<Value>, b: impl Into<Value>) {
        self.alu_to(AluOp::Or, dst, a.into(), b.into());
    }

    pub fn xor_to(&mut self, dst: Reg, a: impl Into<Value>, b: impl Into<Value>) {
        self.alu_to(AluOp::Xor, dst, a.into(), b.into());
    }

    /// `dst = a << n` for a constant shift.
    pub fn sll_to(&mut self, dst: Reg, a: impl Into<Value>, n: u32) {
        match a.into() {
            Value::Imm(x) => self.mov_to(dst, x.checked_shl(n).unwrap_or(0)),
            v if n == 0 => self.mov_to(dst, v),
            _ if n >= 32 => self.mov_to(dst, 0u32),
            Value::Reg(r) => {
                self.bitfield(Operation::ExtractInsert, dst, Reg::ZERO, r, 0, 32 - n, n)
            }
        }
    }

    pub fn sll(&mut self, a: impl Into<Value>, n: u32) -> Reg {
        let dst = self.alloc_reg();
        self.sll_to(dst, a, n);
        dst
    }

    /// `dst = a >> n` for a constant shift.
    pub fn srl_to(&mut self, dst: Reg, a: impl Into<Value>, n: u32) {
        match a.into() {
            Value::Imm(x) => self.mov_to(dst, x.checked_shr(n).unwrap_or(0)),
            v if n == 0 => self.mov_to(dst, v),
            _ if n >= 32 => self.mov_to(dst, 0u32),
            Value::Reg(r) => {
                self.bitfield(Operation::ExtractInsert, dst, Reg::ZERO, r, n, 32 - n, 0)
            }
        }
    }

    pub fn srl(&mut self, a: impl Into<Value>, n: u32) -> Reg {
        let dst = self.alloc_reg();
        self.srl_to(dst, a, n);
        dst
    }

    /// `dst = (v >> pos) & ((1 << bits) - 1)`; `pos` may be a register.
    pub fn bfe_to(&mut self, dst: Reg, v: impl Into<Value>, pos: impl Into<Value>, bits: u32) {
        let rv = self.operand(v.into());
        match pos.into() {
            Value::Imm(p) => {
                self.bitfield(Operation::ExtractInsert, dst, Reg::ZERO, rv.0, p, bits, 0)
            }
            Value::Reg(p) => {
                self.bitfield(Operation::ExtractShiftLeftImmediate, dst, p, rv.0, 0, bits, 0)
            }
        }
        self.release_operand(rv);
    }

    pub fn bfe(&mut self, v: impl Into<Value>, pos: impl Into<Value>, bits: u32) -> Reg {
        let dst = self.alloc_reg();
        self.bfe_to(dst, v, pos, bits);
        dst
    }

    /// `dst = x` with bits `[dst_pos, dst_pos + bits)` replaced by
    /// `(y >> src_pos) & mask`.
    pub fn merge_to(
        &mut self,
        dst: Reg,
        x: impl Into<Value>,
        y: impl Into<Value>,
        dst_pos: u32,
        bits: u32,
        src_pos: u32,
    ) {
        let rx = self.operand(x.into());
        let ry = self.operand(y.into());
        self.bitfield(Operation::ExtractInsert, dst, rx.0, ry.0, src_pos, bits, dst_pos);
        self.release_operand(ry);
        self.release_operand(rx);
    }

    /// `dst += v` across both halves.
    pub fn add64_to(&mut self, dst: Value64, v: impl Into<Value>) {
        let rv = self.operand(v.into());
        self.push(Instr::Alu {
            result: ResultOp::Move,
            op: AluOp::Add,
            dst: dst.lo,
            a: dst.lo,
            b: rv.0,
        });
        self.push(Instr::Alu {
            result: ResultOp::Move,
            op: AluOp::AddWithCarry,
            dst: dst.hi,
            a: dst.hi,
            b: Reg::ZERO,
        });
        self.release_operand(rv);
    }

    // ── Methods ────────────────────────────────────────────────────────────

    fn method_word(&mut self, method: u32) -> i32 {
        if method >= MME_METHOD_LIMIT || method % 4 != 0 {
            self.fail(MmeError::ImmediateOutOfRange(method as i64));
            return 0;
        }
        (method >> 2) as i32
    }

    /// Select the method that following `emit`s write, incrementing by one
    /// word after each.
    pub fn mthd(&mut self, method: u32) {
        let word = self.method_word(method);
        self.add_imm(ResultOp::MoveAndSetMethod, Reg::ZERO, Reg::ZERO, (1 << 12) | word);
    }

    /// Select `method + 4 * idx`.
    pub fn mthd_idx(&mut self, method: u32, idx: impl Into<Value>) {
        match idx.into() {
            Value::Imm(i) => self.mthd(method + i * 4),
            Value::Reg(r) => {
                let word = self.method_word(method);
                self.add_imm(ResultOp::MoveAndSetMethod, Reg::ZERO, r, (1 << 12) | word);
            }
        }
    }

    /// Write `v` to the selected method.
    pub fn emit(&mut self, v: impl Into<Value>) {
        match v.into() {
            Value::Reg(r) => self.add_imm(ResultOp::MoveAndSend, Reg::ZERO, r, 0),
            Value::Imm(k) if imm_fits(k as i32 as i64) => {
                self.add_imm(ResultOp::MoveAndSend, Reg::ZERO, Reg::ZERO, k as i32)
            }
            Value::Imm(k) => {
                let tmp = self.alloc_reg();
                self.load_imm(ResultOp::MoveAndSend, tmp, k);
                self.free_reg(tmp);
            }
        }
    }

    /// Read the shadowed value of a method.
    pub fn state_to(&mut self, dst: Reg, method: u32) {
        let word = self.method_word(method);
        self.push(Instr::Read { dst, base: Reg::ZERO, imm: word });
    }

    pub fn state(&mut self, method: u32) -> Reg {
        let dst = self.alloc_reg();
        self.state_to(dst, method);
        dst
    }

    /// Queue `count` words from `addr` behind the remaining call arguments.
    pub fn read_fifoed(&mut self, addr: Value64, count: impl Into<Value>) {
        self.mthd(methods::SET_MME_MEM_ADDRESS_A);
        self.emit(addr.hi);
        self.emit(addr.lo);
        self.mthd(methods::MME_DMA_READ_FIFOED);
        self.emit(count);
    }

    /// Release a 32-bit payload to memory at `addr`.
    pub fn store(&mut self, addr: Value64, v: impl Into<Value>) {
        use nvcs_common::fields::{
            report_semaphore_d, PipelineLocation, ReportKind, ReportOperation,
        };
        self.mthd(methods::SET_REPORT_SEMAPHORE_A);
        self.emit(addr.hi);
        self.emit(addr.lo);
        self.emit(v);
        self.emit(report_semaphore_d(
            ReportOperation::Release,
            PipelineLocation::None,
            ReportKind::Payload,
            0,
        ));
    }

    /// Park `reg` in a scratch slot and release it.
    pub fn spill(&mut self, reg: Reg, slot: u32) {
        self.mthd(methods::set_mme_shadow_scratch(slot));
        self.emit(reg);
        self.free_reg(reg);
    }

    /// Re-take the register released by [`Self::spill`] and reload it.
    pub fn unspill(&mut self, reg: Reg, slot: u32) {
        if let Err(err) = self.regs.reacquire(reg) {
            self.fail(err);
        }
        self.state_to(reg, methods::set_mme_shadow_scratch(slot));
    }

    // ── Control flow ───────────────────────────────────────────────────────

    /// Zero iff `a == b`.
    fn difference(&mut self, a: Value, b: Value) -> (Reg, bool) {
        if b.is_zero() {
            return self.operand(a);
        }
        if a.is_zero() {
            return self.operand(b);
        }
        let tmp = self.alloc_reg();
        match (a, b) {
            (Value::Reg(r), Value::Imm(k)) | (Value::Imm(k), Value::Reg(r))
                if imm_fits(-(k as i32 as i64)) =>
            {
                self.add_imm(ResultOp::Move, tmp, r, -(k as i32))
            }
            _ => self.alu_to(AluOp::Xor, tmp, a, b),
        }
        (tmp, true)
    }

    /// Non-zero iff `a < b` (unsigned): the borrow of `a - b`, spread to all
    /// bits by a subtract-with-borrow from zero.
    fn less_than(&mut self, a: Value, b: Value) -> Reg {
        let tmp = self.alloc_reg();
        self.alu_to(AluOp::Subtract, tmp, a, b);
        self.push(Instr::Alu {
            result: ResultOp::Move,
            op: AluOp::SubtractWithBorrow,
            dst: tmp,
            a: Reg::ZERO,
            b: Reg::ZERO,
        });
        tmp
    }

    /// Branch to `target` when `a cmp b` does not hold.
    fn branch_unless(&mut self, cmp: Cmp, a: Value, b: Value, target: Label) {
        let (src, cond, temp) = match cmp {
            Cmp::Eq => {
                let (r, t) = self.difference(a, b);
                (r, BranchCondition::NotZero, t)
            }
            Cmp::Ne => {
                let (r, t) = self.difference(a, b);
                (r, BranchCondition::Zero, t)
            }
            Cmp::Ult => (self.less_than(a, b), BranchCondition::Zero, true),
            Cmp::Ule => (self.less_than(b, a), BranchCondition::NotZero, true),
        };
        self.push(Instr::Branch { cond, src, target });
        if temp {
            self.free_reg(src);
        }
    }

    pub fn start_if(&mut self, cmp: Cmp, a: impl Into<Value>, b: impl Into<Value>) {
        let end = self.new_label();
        self.branch_unless(cmp, a.into(), b.into(), end);
        self.frames.push(Frame::If { end });
    }

    pub fn end_if(&mut self) {
        match self.frames.pop() {
            Some(Frame::If { end }) => self.push(Instr::Bind(end)),
            _ => self.fail(MmeError::UnbalancedControlFlow),
        }
    }

    /// Loop while `a cmp b`; the condition is checked before every iteration,
    /// so the body may run zero times.
    pub fn start_while(&mut self, cmp: Cmp, a: impl Into<Value>, b: impl Into<Value>) {
        let top = self.new_label();
        let end = self.new_label();
        self.push(Instr::Bind(top));
        self.branch_unless(cmp, a.into(), b.into(), end);
        self.frames.push(Frame::While { top, end });
    }

    pub fn end_while(&mut self) {
        match self.frames.pop() {
            Some(Frame::While { top, end }) => {
                self.push(Instr::Branch {
                    cond: BranchCondition::Zero,
                    src: Reg::ZERO,
                    target: top,
                });
                self.push(Instr::Bind(end));
            }
            _ => self.fail(MmeError::UnbalancedControlFlow),
        }
    }

    /// Repeat the body `count` times using a private counter.
    pub fn start_loop(&mut self, count: impl Into<Value>) {
        let counter = self.mov(count);
        let top = self.new_label();
        let end = self.new_label();
        self.push(Instr::Branch {
            cond: BranchCondition::Zero,
            src: counter,
            target: end,
        });
        self.push(Instr::Bind(top));
        self.frames.push(Frame::Loop { counter, top, end });
    }

    pub fn end_loop(&mut self) {
        match self.frames.pop() {
            Some(Frame::Loop { counter, top, end }) => {
                self.add_imm(ResultOp::Move, counter, counter, -1);
                self.push(Instr::Branch {
                    cond: BranchCondition::NotZero,
                    src: counter,
                    target: top,
                });
                self.push(Instr::Bind(end));
                self.free_reg(counter);
            }
            _ => self.fail(MmeError::UnbalancedControlFlow),
        }
    }

    pub fn if_then(
        &mut self,
        cmp: Cmp,
        a: impl Into<Value>,
        b: impl Into<Value>,
        body: impl FnOnce(&mut Self),
    ) {
        self.start_if(cmp, a, b);
        body(self);
        self.end_if();
    }

    pub fn while_loop(
        &mut self,
        cmp: Cmp,
        a: impl Into<Value>,
        b: impl Into<Value>,
        body: impl FnOnce(&mut Self),
    ) {
        self.start_while(cmp, a, b);
        body(self);
        self.end_while();
    }

    pub fn loop_n(&mut self, count: impl Into<Value>, body: impl FnOnce(&mut Self)) {
        self.start_loop(count);
        body(self);
        self.end_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{MacroInterpreter, MacroProcessor};
    use std::collections::HashMap;

    const OUT: u32 = methods::SET_VERTEX_ARRAY_START;

    #[derive(Default)]
    struct Recorder {
        regs: HashMap<u32, u32>,
        writes: Vec<(u32, u32)>,
    }

    impl MacroProcessor for Recorder {
        fn macro_read(&self, method: u32) -> u32 {
            self.regs.get(&(method << 2)).copied().unwrap_or(0)
        }

        fn macro_write(&mut self, method: u32, value: u32) {
            self.regs.insert(method << 2, value);
            self.writes.push((method << 2, value));
        }
    }

    fn run(code: &[u32], params: &[u32]) -> Recorder {
        let mut interp = MacroInterpreter::new();
        for (i, &w) in code.iter().enumerate() {
            interp.upload_code(i as u32, w);
        }
        interp.set_position(0, 0);
        let mut rec = Recorder::default();
        assert!(interp.execute(0, params, &mut rec));
        rec
    }

    fn values(rec: &Recorder) -> Vec<u32> {
        rec.writes.iter().map(|&(_, v)| v).collect()
    }

    fn builder() -> MmeBuilder {
        MmeBuilder::new(ClassGen::Turing)
    }

    #[test]
    fn test_emit_immediates() {
        let mut b = builder();
        b.mthd(methods::set_ct_write(0));
        b.emit(5u32);
        b.emit(0xDEAD_BEEFu32);
        b.emit(0xFFFF_FFFFu32);
        let rec = run(&b.finish().unwrap(), &[]);
        assert_eq!(
            rec.writes,
            vec![
                (methods::set_ct_write(0), 5),
                (methods::set_ct_write(1), 0xDEAD_BEEF),
                (methods::set_ct_write(2), 0xFFFF_FFFF),
            ]
        );
    }

    #[test]
    fn test_load_arguments() {
        let mut b = builder();
        let x = b.load();
        let y = b.load();
        assert_eq!(x, Reg::ARG0);
        b.mthd(OUT);
        b.emit(y);
        b.emit(x);
        let rec = run(&b.finish().unwrap(), &[7, 9]);
        assert_eq!(values(&rec), vec![9, 7]);
    }

    #[test]
    fn test_load_to_first_argument() {
        let mut b = builder();
        let dst = b.alloc_reg();
        b.load_to(dst);
        b.mthd(OUT);
        b.emit(dst);
        let rec = run(&b.finish().unwrap(), &[42]);
        assert_eq!(values(&rec), vec![42]);
    }

    #[test]
    fn test_loop_counts() {
        for n in [0u32, 1, 3] {
            let mut b = builder();
            let count = b.load();
            b.loop_n(count, |b| {
                b.mthd(OUT);
                b.emit(1u32);
            });
            let rec = run(&b.finish().unwrap(), &[n]);
            assert_eq!(rec.writes.len(), n as usize);
        }
    }

    #[test]
    fn test_while_ult() {
        let mut b = builder();
        let n = b.load();
        let i = b.mov(0u32);
        b.while_loop(Cmp::Ult, i, n, |b| {
            b.mthd(OUT);
            b.emit(i);
            b.add_to(i, i, 1u32);
        });
        let code = b.finish().unwrap();
        assert_eq!(values(&run(&code, &[4])), vec![0, 1, 2, 3]);
        assert!(run(&code, &[0]).writes.is_empty());
    }

    #[test]
    fn test_if_predicates() {
        let cases = [
            (Cmp::Eq, 3u32, 3u32, true),
            (Cmp::Eq, 3, 4, false),
            (Cmp::Ne, 3, 4, true),
            (Cmp::Ne, 0, 0, false),
            (Cmp::Ult, 2, 5, true),
            (Cmp::Ult, 5, 5, false),
            (Cmp::Ult, 0xFFFF_FFFF, 1, false),
            (Cmp::Ule, 5, 5, true),
            (Cmp::Ule, 6, 5, false),
            (Cmp::Ule, 1, 0xFFFF_FFFF, true),
        ];
        for (cmp, x, y, taken) in cases {
            let mut b = builder();
            let a = b.load();
            let c = b.load();
            b.if_then(cmp, a, c, |b| {
                b.mthd(OUT);
                b.emit(1u32);
            });
            let rec = run(&b.finish().unwrap(), &[x, y]);
            assert_eq!(!rec.writes.is_empty(), taken, "{:?} {} {}", cmp, x, y);
        }
    }

    #[test]
    fn test_if_against_immediate() {
        let mut b = builder();
        let a = b.load();
        b.if_then(Cmp::Eq, a, 0x1234_5678u32, |b| {
            b.mthd(OUT);
            b.emit(1u32);
        });
        b.if_then(Cmp::Ne, a, 32u32, |b| {
            b.mthd(OUT);
            b.emit(2u32);
        });
        let code = b.finish().unwrap();
        assert_eq!(values(&run(&code, &[0x1234_5678])), vec![1, 2]);
        assert!(run(&code, &[32]).writes.is_empty());
    }

    #[test]
    fn test_bitfield_ops() {
        let mut b = builder();
        let v = b.load();
        let pos = b.load();
        let lo = b.bfe(v, 4u32, 8);
        let dynamic = b.bfe(v, pos, 1);
        let shl = b.sll(v, 8);
        let shr = b.srl(v, 28);
        let merged = b.mov(0u32);
        b.merge_to(merged, merged, v, 26, 2, 0);
        b.mthd(OUT);
        for r in [lo, dynamic, shl, shr, merged] {
            b.emit(r);
        }
        let rec = run(&b.finish().unwrap(), &[0xF00D_BEEF, 3]);
        assert_eq!(
            values(&rec),
            vec![0xEE, 1, 0x0DBE_EF00, 0xF, 3 << 26]
        );
    }

    #[test]
    fn test_add_sub() {
        let mut b = builder();
        let a = b.load();
        let c = b.load();
        let sum = b.add(a, c);
        let diff = b.sub(a, 10u32);
        let big = b.add(a, 0x8000_0000u32);
        b.mthd(OUT);
        b.emit(sum);
        b.emit(diff);
        b.emit(big);
        let rec = run(&b.finish().unwrap(), &[100, 23]);
        assert_eq!(values(&rec), vec![123, 90, 0x8000_0064]);
    }

    #[test]
    fn test_add64_carry() {
        let mut b = builder();
        let addr = b.load_addr64();
        b.add64_to(addr, 0x20u32);
        b.mthd(OUT);
        b.emit(addr.hi);
        b.emit(addr.lo);
        let rec = run(&b.finish().unwrap(), &[0, 0xFFFF_FFF0]);
        assert_eq!(values(&rec), vec![1, 0x10]);
    }

    #[test]
    fn test_state_read() {
        let mut b = builder();
        let v = b.state(methods::SET_DEPTH_TEST);
        b.mthd(OUT);
        b.emit(v);
        let code = b.finish().unwrap();
        let mut interp = MacroInterpreter::new();
        for (i, &w) in code.iter().enumerate() {
            interp.upload_code(i as u32, w);
        }
        let mut rec = Recorder::default();
        rec.regs.insert(methods::SET_DEPTH_TEST, 0x77);
        interp.execute(0, &[], &mut rec);
        assert_eq!(rec.writes, vec![(OUT, 0x77)]);
    }

    #[test]
    fn test_spill_unspill() {
        let mut b = builder();
        let a = b.load();
        let c = b.load();
        b.spill(a, 5);
        let clobber = b.mov(0xABCu32);
        b.free_reg(clobber);
        b.unspill(a, 5);
        b.mthd(OUT);
        b.emit(a);
        b.emit(c);
        let rec = run(&b.finish().unwrap(), &[11, 22]);
        assert_eq!(
            rec.writes,
            vec![(methods::set_mme_shadow_scratch(5), 11), (OUT, 11), (OUT + 4, 22)]
        );
    }

    #[test]
    fn test_mthd_idx_register() {
        let mut b = builder();
        let idx = b.load();
        b.mthd_idx(methods::set_ct_write(0), idx);
        b.emit(0xFu32);
        let rec = run(&b.finish().unwrap(), &[3]);
        assert_eq!(rec.writes, vec![(methods::set_ct_write(3), 0xF)]);
    }

    #[test]
    fn test_out_of_registers() {
        let mut b = builder();
        for _ in 0..7 {
            b.alloc_reg();
        }
        assert_eq!(b.finish(), Err(MmeError::OutOfRegisters));
    }

    #[test]
    fn test_unbalanced_control_flow() {
        let mut b = builder();
        let a = b.load();
        b.start_if(Cmp::Eq, a, 0u32);
        assert_eq!(b.finish(), Err(MmeError::UnbalancedControlFlow));

        let mut b = builder();
        b.end_loop();
        assert_eq!(b.finish(), Err(MmeError::UnbalancedControlFlow));
    }

    #[test]
    fn test_method_out_of_range() {
        let mut b = builder();
        b.mthd(methods::SET_INDEX_BUFFER_SIZE_A);
        assert_eq!(
            b.finish(),
            Err(MmeError::ImmediateOutOfRange(methods::SET_INDEX_BUFFER_SIZE_A as i64))
        );
    }
}
