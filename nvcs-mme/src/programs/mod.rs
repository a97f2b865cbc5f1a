// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The microprogram library. Every program has a fixed id, which is also its
//! start-address slot in the uploaded image.

mod cbuf;
mod draw;
mod state;
mod xfb;

pub use draw::{DRAW_INDEXED_RECORD_WORDS, DRAW_RECORD_WORDS};

use nvcs_common::methods;
use nvcs_common::types::ClassGen;

use crate::builder::MmeBuilder;
use crate::ir::Reg;
use crate::MmeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MmeProgram {
    SetPrivReg = 0,
    BindCbufDesc,
    SetWriteMask,
    Draw,
    DrawIndexed,
    DrawIndirect,
    DrawIndexedIndirect,
    DrawIndirectCount,
    DrawIndexedIndirectCount,
    XfbCounterLoad,
    XfbDrawIndirect,
}

impl MmeProgram {
    pub const COUNT: usize = 11;

    pub const ALL: [MmeProgram; Self::COUNT] = [
        Self::SetPrivReg,
        Self::BindCbufDesc,
        Self::SetWriteMask,
        Self::Draw,
        Self::DrawIndexed,
        Self::DrawIndirect,
        Self::DrawIndexedIndirect,
        Self::DrawIndirectCount,
        Self::DrawIndexedIndirectCount,
        Self::XfbCounterLoad,
        Self::XfbDrawIndirect,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SetPrivReg => "SET_PRIV_REG",
            Self::BindCbufDesc => "BIND_CBUF_DESC",
            Self::SetWriteMask => "SET_WRITE_MASK",
            Self::Draw => "DRAW",
            Self::DrawIndexed => "DRAW_INDEXED",
            Self::DrawIndirect => "DRAW_INDIRECT",
            Self::DrawIndexedIndirect => "DRAW_INDEXED_INDIRECT",
            Self::DrawIndirectCount => "DRAW_INDIRECT_COUNT",
            Self::DrawIndexedIndirectCount => "DRAW_INDEXED_INDIRECT_COUNT",
            Self::XfbCounterLoad => "XFB_COUNTER_LOAD",
            Self::XfbDrawIndirect => "XFB_DRAW_INDIRECT",
        }
    }

    /// Method that starts a call of this program; the first argument goes
    /// with it, the rest to [`Self::data_method`].
    pub fn call_method(self) -> u32 {
        methods::call_mme_macro(self.id())
    }

    pub fn data_method(self) -> u32 {
        methods::call_mme_data(self.id())
    }
}

/// Shadow scratch slots shared between host code and programs. Slots 0..=2
/// belong to the privileged-register handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MmeScratch {
    ViewMask = 3,
    DrawBegin = 4,
    DrawCount = 5,
    DrawPadDw = 6,
    DrawIdx = 7,
    WriteMaskDyn = 8,
    WriteMaskPipeline = 9,
    DrawAddrHi = 10,
    DrawAddrLo = 11,
    DrawStride = 12,
}

impl MmeScratch {
    /// Slots zeroed at context initialisation.
    pub const NUM_SLOTS: u32 = 13;

    pub fn slot(self) -> u32 {
        self as u32
    }

    pub fn method(self) -> u32 {
        methods::set_mme_shadow_scratch(self as u32)
    }
}

/// Build one program for `gen`.
pub fn build(program: MmeProgram, gen: ClassGen) -> Result<Vec<u32>, MmeError> {
    let mut b = MmeBuilder::new(gen);
    match program {
        MmeProgram::SetPrivReg => state::set_priv_reg(&mut b),
        MmeProgram::BindCbufDesc => cbuf::bind_cbuf_desc(&mut b),
        MmeProgram::SetWriteMask => state::set_write_mask(&mut b),
        MmeProgram::Draw => draw::draw(&mut b),
        MmeProgram::DrawIndexed => draw::draw_indexed(&mut b),
        MmeProgram::DrawIndirect => draw::draw_indirect(&mut b),
        MmeProgram::DrawIndexedIndirect => draw::draw_indexed_indirect(&mut b),
        MmeProgram::DrawIndirectCount => draw::draw_indirect_count(&mut b),
        MmeProgram::DrawIndexedIndirectCount => draw::draw_indexed_indirect_count(&mut b),
        MmeProgram::XfbCounterLoad => xfb::counter_load(&mut b),
        MmeProgram::XfbDrawIndirect => xfb::draw_indirect(&mut b),
    }
    let code = b.finish()?;
    log::debug!("MME program {} ({:?}): {} words", program.name(), gen, code.len());
    Ok(code)
}

// ── Scratch helpers ──────────────────────────────────────────────────────────

fn load_to_scratch(b: &mut MmeBuilder, slot: MmeScratch) {
    let v = b.load();
    b.mthd(slot.method());
    b.emit(v);
    b.free_reg(v);
}

fn load_scratch(b: &mut MmeBuilder, slot: MmeScratch) -> Reg {
    b.state(slot.method())
}

fn spill(b: &mut MmeBuilder, slot: MmeScratch, reg: Reg) {
    b.spill(reg, slot.slot());
}

fn unspill(b: &mut MmeBuilder, slot: MmeScratch, reg: Reg) {
    b.unspill(reg, slot.slot());
}

/// Shared test harness: a 3D-register model that executes programs on the
/// interpreter and records their writes.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use nvcs_common::methods;
    use nvcs_common::types::ClassGen;

    use super::{build, MmeProgram};
    use crate::interpreter::{MacroInterpreter, MacroProcessor};

    #[derive(Default)]
    pub struct Model {
        pub regs: HashMap<u32, u32>,
        pub writes: Vec<(u32, u32)>,
        /// Word-addressed memory for fifoed reads.
        pub memory: HashMap<u64, u32>,
        pending: Vec<u32>,
    }

    impl Model {
        pub fn reg(&self, method: u32) -> u32 {
            self.regs.get(&method).copied().unwrap_or(0)
        }

        pub fn set_reg(&mut self, method: u32, value: u32) {
            self.regs.insert(method, value);
        }

        pub fn write_memory(&mut self, addr: u64, words: &[u32]) {
            for (i, &w) in words.iter().enumerate() {
                self.memory.insert(addr + 4 * i as u64, w);
            }
        }

        /// Values written to `method`, in order.
        pub fn values_of(&self, method: u32) -> Vec<u32> {
            self.writes
                .iter()
                .filter(|&&(m, _)| m == method)
                .map(|&(_, v)| v)
                .collect()
        }

        pub fn methods(&self) -> Vec<u32> {
            self.writes.iter().map(|&(m, _)| m).collect()
        }
    }

    impl MacroProcessor for Model {
        fn macro_read(&self, method: u32) -> u32 {
            self.reg(method << 2)
        }

        fn macro_write(&mut self, method: u32, value: u32) {
            let method = method << 2;
            self.regs.insert(method, value);
            self.writes.push((method, value));
            match method {
                methods::SET_FALCON04 => {
                    self.regs.insert(methods::set_mme_shadow_scratch(0), 1);
                }
                methods::MME_DMA_READ_FIFOED => {
                    let addr = ((self.reg(methods::SET_MME_MEM_ADDRESS_A) as u64) << 32)
                        | self.reg(methods::SET_MME_MEM_ADDRESS_B) as u64;
                    self.pending = (0..value as u64)
                        .map(|i| self.memory.get(&(addr + 4 * i)).copied().unwrap_or(0))
                        .collect();
                }
                _ => {}
            }
        }

        fn take_fifoed(&mut self) -> Vec<u32> {
            std::mem::take(&mut self.pending)
        }
    }

    /// Build `program` for `gen`, run it once with `params` and return the
    /// model.
    pub fn run(program: MmeProgram, gen: ClassGen, params: &[u32], model: &mut Model) {
        let code = build(program, gen).unwrap();
        let mut interp = MacroInterpreter::new();
        for (i, &w) in code.iter().enumerate() {
            interp.upload_code(i as u32, w);
        }
        assert!(interp.execute(0, params, model), "{} did not finish", program.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_ids_dense() {
        for (i, p) in MmeProgram::ALL.iter().enumerate() {
            assert_eq!(p.id(), i as u32);
            assert_eq!(MmeProgram::from_id(i as u32), Some(*p));
        }
        assert_eq!(MmeProgram::from_id(MmeProgram::COUNT as u32), None);
    }

    #[test]
    fn test_call_methods() {
        assert_eq!(MmeProgram::SetPrivReg.call_method(), 0x3800);
        assert_eq!(MmeProgram::Draw.call_method(), 0x3818);
        assert_eq!(MmeProgram::Draw.data_method(), 0x381c);
    }

    #[test]
    fn test_every_program_builds() {
        for gen in ClassGen::ALL {
            for program in MmeProgram::ALL {
                let code = build(program, gen)
                    .unwrap_or_else(|e| panic!("{} on {:?}: {}", program.name(), gen, e));
                assert!(code.len() >= 2);
            }
        }
    }

    #[test]
    fn test_indirect_count_empty_before_turing() {
        let code = build(MmeProgram::DrawIndirectCount, ClassGen::Pascal).unwrap();
        assert_eq!(code.len(), 2);
        let code = build(MmeProgram::DrawIndirectCount, ClassGen::Turing).unwrap();
        assert!(code.len() > 2);
    }

    #[test]
    fn test_scratch_methods() {
        assert_eq!(MmeScratch::ViewMask.method(), 0x340c);
        assert!(MmeScratch::DrawStride.slot() < MmeScratch::NUM_SLOTS);
    }
}
