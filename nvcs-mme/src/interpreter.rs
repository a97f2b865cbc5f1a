// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Macro-unit interpreter.
//!
//! Executes assembled bytecode against a [`MacroProcessor`] that stands in for
//! the 3D class: method reads come from its shadow state, sends become method
//! writes. Used by the replay model and by tests to check what a program
//! actually writes.

use crate::image::MmeImage;
use crate::ir::NUM_REGISTERS;
use crate::isa::{AluOp, BranchCondition, Opcode, Operation, ResultOp};

/// Number of macro start-address slots.
pub const NUM_MACRO_SLOTS: usize = 128;

/// Upper bound on executed instructions per call; a program that runs longer
/// is treated as hung.
pub const MAX_STEPS: usize = 1 << 20;

// ── MethodAddress ────────────────────────────────────────────────────────────

/// Packed method address with auto-increment: bits[11:0] = address,
/// bits[17:12] = increment.
#[derive(Clone, Copy, Debug, Default)]
struct MethodAddress {
    raw: u32,
}

impl MethodAddress {
    fn address(&self) -> u32 {
        self.raw & 0xFFF
    }

    fn increment(&self) -> u32 {
        (self.raw >> 12) & 0x3F
    }

    fn advance(&mut self) {
        let addr = self.address() + self.increment();
        self.raw = (self.raw & !0xFFF) | (addr & 0xFFF);
    }
}

// ── MacroProcessor trait ─────────────────────────────────────────────────────

/// The class state a macro reads and writes. Method addresses are word
/// addresses (byte offset >> 2).
pub trait MacroProcessor {
    fn macro_read(&self, method: u32) -> u32;

    fn macro_write(&mut self, method: u32, value: u32);

    /// Words queued by a `MME_DMA_READ_FIFOED` write, appended to the
    /// remaining call arguments.
    fn take_fifoed(&mut self) -> Vec<u32> {
        Vec::new()
    }
}

// ── MacroInterpreter ─────────────────────────────────────────────────────────

pub struct MacroInterpreter {
    code: Vec<u32>,
    positions: [u32; NUM_MACRO_SLOTS],
    /// $r0..$r7; $r0 reads as zero.
    registers: [u32; NUM_REGISTERS],
    pc: u32,
    delayed_pc: Option<u32>,
    method_address: MethodAddress,
    carry: bool,
    params: Vec<u32>,
    next_param_index: usize,
    steps: usize,
}

impl Default for MacroInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroInterpreter {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            positions: [0u32; NUM_MACRO_SLOTS],
            registers: [0u32; NUM_REGISTERS],
            pc: 0,
            delayed_pc: None,
            method_address: MethodAddress::default(),
            carry: false,
            params: Vec::new(),
            next_param_index: 0,
            steps: 0,
        }
    }

    /// Upload a code word at the given word offset.
    pub fn upload_code(&mut self, offset: u32, word: u32) {
        let idx = offset as usize;
        if idx >= self.code.len() {
            self.code.resize(idx + 1, 0);
        }
        self.code[idx] = word;
    }

    /// Set the start position (word offset) for a macro slot.
    pub fn set_position(&mut self, slot: u32, start: u32) {
        let idx = slot as usize;
        if idx < NUM_MACRO_SLOTS {
            self.positions[idx] = start;
        } else {
            log::warn!("Macro: start slot {} out of range", slot);
        }
    }

    /// Install a whole image: code at offset zero, one start per slot.
    pub fn load_image(&mut self, image: &MmeImage) {
        self.code.clear();
        for (i, &word) in image.code().iter().enumerate() {
            self.upload_code(i as u32, word);
        }
        for (slot, &start) in image.starts().iter().enumerate() {
            self.set_position(slot as u32, start);
        }
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Run the macro in `slot`. Returns `false` if it hit [`MAX_STEPS`].
    pub fn execute(
        &mut self,
        slot: u32,
        params: &[u32],
        processor: &mut dyn MacroProcessor,
    ) -> bool {
        self.registers = [0u32; NUM_REGISTERS];
        self.carry = false;
        self.delayed_pc = None;
        self.method_address = MethodAddress::default();
        self.next_param_index = 1;
        self.steps = 0;

        // $r1 receives the first parameter.
        if let Some(&first) = params.first() {
            self.registers[1] = first;
        }
        self.params = params.to_vec();

        self.pc = self
            .positions
            .get(slot as usize)
            .copied()
            .unwrap_or(0);

        loop {
            if self.steps >= MAX_STEPS {
                log::error!("Macro slot {}: step limit reached at PC {}", slot, self.pc);
                return false;
            }
            if !self.step(false, processor) {
                break;
            }
        }

        if self.next_param_index < self.params.len() {
            log::warn!(
                "Macro slot {}: consumed {} of {} parameters",
                slot,
                self.next_param_index,
                self.params.len()
            );
        }
        true
    }

    /// Execute one instruction. Returns `false` once the program has exited.
    fn step(&mut self, is_delay_slot: bool, processor: &mut dyn MacroProcessor) -> bool {
        self.steps += 1;
        let base_pc = self.pc;
        let opcode = self.get_opcode();
        self.pc += 1;

        if let Some(target) = self.delayed_pc.take() {
            debug_assert!(is_delay_slot);
            self.pc = target;
        }

        let src_a = self.get_register(opcode.src_a());
        let src_b = self.get_register(opcode.src_b());
        let result = match opcode.operation() {
            Operation::Alu => Some(self.alu(opcode.alu_operation(), src_a, src_b)),
            Operation::AddImmediate => Some(src_a.wrapping_add(opcode.immediate() as u32)),
            Operation::ExtractInsert => {
                let mask = opcode.bitfield_mask();
                let extracted = (src_b >> opcode.bf_src_bit()) & mask;
                let cleared = src_a & !(mask << opcode.bf_dst_bit());
                Some(cleared | (extracted << opcode.bf_dst_bit()))
            }
            Operation::ExtractShiftLeftImmediate => Some(
                (src_b.checked_shr(src_a).unwrap_or(0) & opcode.bitfield_mask())
                    << opcode.bf_dst_bit(),
            ),
            Operation::ExtractShiftLeftRegister => Some(
                ((src_b >> opcode.bf_src_bit()) & opcode.bitfield_mask())
                    .checked_shl(src_a)
                    .unwrap_or(0),
            ),
            Operation::Read => {
                Some(processor.macro_read(src_a.wrapping_add(opcode.immediate() as u32)))
            }
            Operation::Branch => {
                debug_assert!(!is_delay_slot, "branch in delay slot");
                let taken = match opcode.branch_condition() {
                    BranchCondition::Zero => src_a == 0,
                    BranchCondition::NotZero => src_a != 0,
                };
                if taken {
                    let target = (base_pc as i32 + opcode.immediate()) as u32;
                    if opcode.branch_annul() {
                        self.pc = target;
                        return true;
                    }
                    self.delayed_pc = Some(target);
                    return self.step(true, processor);
                }
                None
            }
            Operation::Unused => {
                log::warn!("Macro: unused operation at PC {}", base_pc);
                None
            }
        };

        if let Some(value) = result {
            self.process_result(opcode.result_operation(), opcode.dst(), value, processor);
        }

        // Exit: run the delay slot, then stop.
        if opcode.is_exit() && !is_delay_slot {
            self.step(true, processor);
            return false;
        }
        true
    }

    fn process_result(
        &mut self,
        op: ResultOp,
        dst: u32,
        result: u32,
        processor: &mut dyn MacroProcessor,
    ) {
        match op {
            ResultOp::IgnoreAndFetch => {
                let param = self.fetch_param();
                self.set_register(dst, param);
            }
            ResultOp::Move => self.set_register(dst, result),
            ResultOp::MoveAndSetMethod => {
                self.set_register(dst, result);
                self.method_address.raw = result;
            }
            ResultOp::FetchAndSend => {
                let param = self.fetch_param();
                self.set_register(dst, param);
                self.send(result, processor);
            }
            ResultOp::MoveAndSend => {
                self.set_register(dst, result);
                self.send(result, processor);
            }
            ResultOp::FetchAndSetMethod => {
                let param = self.fetch_param();
                self.set_register(dst, param);
                self.method_address.raw = result;
            }
            ResultOp::MoveAndSetMethodFetchAndSend => {
                self.set_register(dst, result);
                self.method_address.raw = result;
                let param = self.fetch_param();
                self.send(param, processor);
            }
            ResultOp::MoveAndSetMethodSend => {
                self.set_register(dst, result);
                self.method_address.raw = result;
                self.send((result >> 12) & 0x3F, processor);
            }
        }
    }

    fn alu(&mut self, op: AluOp, a: u32, b: u32) -> u32 {
        match op {
            AluOp::Add => {
                let (r, c) = a.overflowing_add(b);
                self.carry = c;
                r
            }
            AluOp::AddWithCarry => {
                let r = a as u64 + b as u64 + self.carry as u64;
                self.carry = r > u32::MAX as u64;
                r as u32
            }
            AluOp::Subtract => {
                // Carry means no borrow.
                self.carry = a >= b;
                a.wrapping_sub(b)
            }
            AluOp::SubtractWithBorrow => {
                let borrow = !self.carry as u64;
                self.carry = a as u64 >= b as u64 + borrow;
                a.wrapping_sub(b).wrapping_sub(borrow as u32)
            }
            AluOp::Xor => a ^ b,
            AluOp::Or => a | b,
            AluOp::And => a & b,
            AluOp::AndNot => a & !b,
            AluOp::Nand => !(a & b),
        }
    }

    fn send(&mut self, value: u32, processor: &mut dyn MacroProcessor) {
        processor.macro_write(self.method_address.address(), value);
        self.method_address.advance();
        let fifoed = processor.take_fifoed();
        if !fifoed.is_empty() {
            self.params.extend(fifoed);
        }
    }

    fn get_opcode(&self) -> Opcode {
        match self.code.get(self.pc as usize) {
            Some(&word) => Opcode(word),
            None => {
                log::warn!("Macro: PC {} out of bounds (code size {})", self.pc, self.code.len());
                Opcode(0)
            }
        }
    }

    fn get_register(&self, id: u32) -> u32 {
        if id == 0 {
            0
        } else {
            self.registers[id as usize & 0x7]
        }
    }

    fn set_register(&mut self, id: u32, value: u32) {
        if id != 0 {
            self.registers[id as usize & 0x7] = value;
        }
    }

    fn fetch_param(&mut self) -> u32 {
        match self.params.get(self.next_param_index) {
            Some(&val) => {
                self.next_param_index += 1;
                val
            }
            None => {
                log::warn!("Macro: parameter fetch out of bounds (index {})", self.next_param_index);
                0
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
