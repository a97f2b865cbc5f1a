// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Lowers IR to bytecode: assigns instruction indices, resolves labels and
//! encodes each instruction.

use std::collections::HashMap;

use crate::ir::{Instr, Label};
use crate::isa::{self, imm_fits, ResultOp};
use crate::MmeError;

/// Number of words an IR instruction occupies.
fn width(instr: &Instr) -> usize {
    match instr {
        Instr::Bind(_) => 0,
        Instr::Exit => 2,
        _ => 1,
    }
}

pub fn assemble(instrs: &[Instr]) -> Result<Vec<u32>, MmeError> {
    let mut labels: HashMap<Label, usize> = HashMap::new();
    let mut pc = 0usize;
    for instr in instrs {
        if let Instr::Bind(label) = instr {
            labels.insert(*label, pc);
        }
        pc += width(instr);
    }

    let mut code = Vec::with_capacity(pc);
    for instr in instrs {
        match *instr {
            Instr::AddImm { result, dst, src, imm } => {
                check_imm(imm as i64)?;
                code.push(isa::encode_add_imm(result, dst.index(), src.index(), imm));
            }
            Instr::Alu { result, op, dst, a, b } => {
                code.push(isa::encode_alu(op, result, dst.index(), a.index(), b.index()));
            }
            Instr::Bitfield { op, result, dst, a, b, src_bit, size, dst_bit } => {
                if src_bit > 31 || size > 31 || dst_bit > 31 {
                    return Err(MmeError::ImmediateOutOfRange(size.max(src_bit).max(dst_bit) as i64));
                }
                code.push(isa::encode_bitfield(
                    op,
                    result,
                    dst.index(),
                    a.index(),
                    b.index(),
                    src_bit,
                    size,
                    dst_bit,
                ));
            }
            Instr::Read { dst, base, imm } => {
                check_imm(imm as i64)?;
                code.push(isa::encode_read(ResultOp::Move, dst.index(), base.index(), imm));
            }
            Instr::Branch { cond, src, target } => {
                let target_pc = *labels.get(&target).ok_or(MmeError::UnbalancedControlFlow)?;
                let offset = target_pc as i64 - code.len() as i64;
                if !imm_fits(offset) {
                    return Err(MmeError::BranchOutOfRange);
                }
                code.push(isa::encode_branch(cond, true, src.index(), offset as i32));
            }
            Instr::Bind(_) => {}
            Instr::Exit => {
                code.push(isa::with_exit(isa::NOP));
                code.push(isa::NOP);
            }
        }
    }
    debug_assert_eq!(code.len(), pc);
    Ok(code)
}

fn check_imm(imm: i64) -> Result<(), MmeError> {
    if imm_fits(imm) {
        Ok(())
    } else {
        Err(MmeError::ImmediateOutOfRange(imm))
    }
}
