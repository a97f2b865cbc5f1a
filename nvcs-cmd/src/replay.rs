// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Replay of recorded push streams against a model of the 3D class.
//!
//! The model keeps the last value of every method, runs macro calls on the
//! interpreter, follows indirect segments and fifoed reads through a
//! [`GpuMemory`] and records what was drawn. It is what the encoder's output
//! is checked against.

use std::collections::HashMap;

use nvcs_common::fields::{get_field, ReportKind, ReportOperation};
use nvcs_common::methods;
use nvcs_common::types::AddrRange;
use nvcs_mme::interpreter::{MacroInterpreter, MacroProcessor, NUM_MACRO_SLOTS};
use nvcs_mme::MmeImage;

use crate::decoder::{DecodeError, Decoder, MethodWrite};
use crate::cmd_buffer::CommandBuffer;
use crate::heap::{GpuHeap, GpuMemory};
use crate::push::{PushWriter, SUBC_COPY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    Array,
    Indexed,
    /// Vertex count derived from a stream-out byte count.
    Auto,
}

/// One primitive range as the front end saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    pub kind: DrawKind,
    pub begin: u32,
    /// First vertex or index; the byte count for `Auto`.
    pub first: u32,
    pub count: u32,
    pub base_vertex: u32,
    pub base_instance: u32,
    pub layer: u32,
}

/// Register state and side effects of the 3D class.
#[derive(Default)]
struct ClassModel {
    regs: HashMap<u32, u32>,
    writes: Vec<MethodWrite>,
    draws: Vec<DrawRecord>,
}

impl ClassModel {
    fn reg(&self, method: u32) -> u32 {
        self.regs.get(&method).copied().unwrap_or(0)
    }

    fn addr(&self, hi: u32, lo: u32) -> u64 {
        AddrRange::join_addr(self.reg(hi), self.reg(lo))
    }

    fn record_draw(&mut self, kind: DrawKind, first: u32, count: u32) {
        self.draws.push(DrawRecord {
            kind,
            begin: self.reg(methods::BEGIN),
            first,
            count,
            base_vertex: self.reg(methods::SET_GLOBAL_BASE_VERTEX_INDEX),
            base_instance: self.reg(methods::SET_GLOBAL_BASE_INSTANCE_INDEX),
            layer: self.reg(methods::SET_RT_LAYER),
        });
    }

    /// Apply one write. Returns words queued for the macro argument fifo.
    fn write(&mut self, mem: &mut dyn GpuMemory, method: u32, value: u32) -> Vec<u32> {
        log::trace!("Replay: 0x{:04x} = 0x{:x}", method, value);
        self.regs.insert(method, value);
        self.writes.push(MethodWrite::new(method, value));

        match method {
            methods::SET_FALCON04 => {
                // Firmware acknowledges the privileged write immediately.
                self.regs.insert(methods::set_mme_shadow_scratch(0), 1);
            }
            methods::MME_DMA_READ_FIFOED => {
                let addr =
                    self.addr(methods::SET_MME_MEM_ADDRESS_A, methods::SET_MME_MEM_ADDRESS_B);
                return mem.read_words(addr, value as usize);
            }
            methods::SET_VERTEX_ARRAY_COUNT => {
                let first = self.reg(methods::SET_VERTEX_ARRAY_START);
                self.record_draw(DrawKind::Array, first, value);
            }
            methods::SET_INDEX_BUFFER_G => {
                let first = self.reg(methods::SET_INDEX_BUFFER_F);
                self.record_draw(DrawKind::Indexed, first, value);
            }
            methods::DRAW_AUTO => self.record_draw(DrawKind::Auto, value, 0),
            methods::SET_REPORT_SEMAPHORE_D => {
                let op = get_field(value, 0, 2);
                let kind = get_field(value, 23, 5);
                let addr =
                    self.addr(methods::SET_REPORT_SEMAPHORE_A, methods::SET_REPORT_SEMAPHORE_B);
                if op == ReportOperation::Release as u32 {
                    // A release writes the payload whatever the report kind.
                    mem.write_words(addr, &[self.reg(methods::SET_REPORT_SEMAPHORE_C)]);
                } else if op == ReportOperation::ReportOnly as u32
                    && kind == ReportKind::StreamingByteCount as u32
                {
                    // No vertices are captured here, so a stream's byte count
                    // is where its write pointer was loaded.
                    let stream = get_field(value, 5, 3);
                    let count = self.reg(methods::set_stream_out_buffer_load_write_pointer(stream));
                    mem.write_words(addr, &[count]);
                } else {
                    log::warn!("Replay: unmodelled report 0x{:x}", value);
                }
            }
            m if (methods::load_constant_buffer(0)..=methods::load_constant_buffer(15))
                .contains(&m) =>
            {
                let base = self.addr(
                    methods::SET_CONSTANT_BUFFER_SELECTOR_B,
                    methods::SET_CONSTANT_BUFFER_SELECTOR_C,
                );
                let offset = self.reg(methods::LOAD_CONSTANT_BUFFER_OFFSET);
                mem.write_words(base + offset as u64, &[value]);
                self.regs.insert(methods::LOAD_CONSTANT_BUFFER_OFFSET, offset + 4);
            }
            _ => {}
        }
        Vec::new()
    }
}

/// The DMA copy class: pitch-to-pitch copies launched by `LAUNCH_DMA`.
#[derive(Default)]
struct CopyModel {
    regs: HashMap<u32, u32>,
    launches: usize,
}

impl CopyModel {
    fn reg(&self, method: u32) -> u32 {
        self.regs.get(&method).copied().unwrap_or(0)
    }

    fn write(&mut self, mem: &mut dyn GpuMemory, method: u32, value: u32) {
        log::trace!("Replay: copy 0x{:04x} = 0x{:x}", method, value);
        self.regs.insert(method, value);
        if method != methods::copy::LAUNCH_DMA {
            return;
        }
        let src = AddrRange::join_addr(
            self.reg(methods::copy::OFFSET_IN_UPPER),
            self.reg(methods::copy::OFFSET_IN_LOWER),
        );
        let dst = AddrRange::join_addr(
            self.reg(methods::copy::OFFSET_OUT_UPPER),
            self.reg(methods::copy::OFFSET_OUT_LOWER),
        );
        let len = self.reg(methods::copy::LINE_LENGTH_IN) as usize;
        let (pitch_in, pitch_out) = (
            self.reg(methods::copy::PITCH_IN) as u64,
            self.reg(methods::copy::PITCH_OUT) as u64,
        );
        let mut line = vec![0u8; len];
        for i in 0..self.reg(methods::copy::LINE_COUNT) as u64 {
            mem.read(src + i * pitch_in, &mut line);
            mem.write(dst + i * pitch_out, &line);
        }
        self.launches += 1;
    }
}

/// What a running macro sees: the class model plus memory.
struct MacroBus<'a> {
    model: &'a mut ClassModel,
    mem: &'a mut dyn GpuMemory,
    fifo: Vec<u32>,
}

impl MacroProcessor for MacroBus<'_> {
    fn macro_read(&self, method: u32) -> u32 {
        self.model.reg(method << 2)
    }

    fn macro_write(&mut self, method: u32, value: u32) {
        let words = self.model.write(self.mem, method << 2, value);
        self.fifo.extend(words);
    }

    fn take_fifoed(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.fifo)
    }
}

/// A macro call whose arguments are still arriving.
struct PendingCall {
    slot: u32,
    params: Vec<u32>,
}

pub struct Replay {
    model: ClassModel,
    copy: CopyModel,
    interp: MacroInterpreter,
    decoder: Decoder,
    call: Option<PendingCall>,
    calls: Vec<(u32, usize)>,
    hung: bool,
}

impl Default for Replay {
    fn default() -> Self {
        Self::new()
    }
}

fn macro_slot(method: u32, first: u32) -> Option<u32> {
    let end = first + 8 * NUM_MACRO_SLOTS as u32;
    (method >= first && method < end && (method - first) % 8 == 0).then(|| (method - first) / 8)
}

impl Replay {
    pub fn new() -> Self {
        Self {
            model: ClassModel::default(),
            copy: CopyModel::default(),
            interp: MacroInterpreter::new(),
            decoder: Decoder::new(),
            call: None,
            calls: Vec::new(),
            hung: false,
        }
    }

    /// A model whose macro memory already holds `image`, as after context
    /// initialisation.
    pub fn with_image(image: &MmeImage) -> Self {
        let mut replay = Self::new();
        replay.interp.load_image(image);
        replay
    }

    /// Replay every segment of `push`, reading indirect segments from `mem`.
    pub fn run(&mut self, push: &PushWriter, mem: &mut dyn GpuMemory) -> Result<(), DecodeError> {
        for seg in push.segments() {
            let words = match push.segment_words(seg) {
                Some(words) => words.to_vec(),
                None => mem.read_words(seg.addr, seg.len as usize),
            };
            self.run_segment(&words, mem)?;
        }
        self.finish(mem)
    }

    /// Replay one self-contained stream.
    pub fn run_words(&mut self, words: &[u32], mem: &mut dyn GpuMemory) -> Result<(), DecodeError> {
        self.run_segment(words, mem)?;
        self.finish(mem)
    }

    fn run_segment(&mut self, words: &[u32], mem: &mut dyn GpuMemory) -> Result<(), DecodeError> {
        let mut writes = Vec::new();
        self.decoder.feed(words, &mut writes)?;
        for w in writes {
            if w.subchannel == SUBC_COPY {
                self.flush_call(mem);
                self.copy.write(mem, w.method, w.value);
            } else {
                self.write(mem, w.method, w.value);
            }
        }
        Ok(())
    }

    fn finish(&mut self, mem: &mut dyn GpuMemory) -> Result<(), DecodeError> {
        self.flush_call(mem);
        self.decoder.finish()
    }

    fn write(&mut self, mem: &mut dyn GpuMemory, method: u32, value: u32) {
        if let Some(slot) = macro_slot(method, methods::call_mme_data(0)) {
            match self.call.as_mut() {
                Some(call) if call.slot == slot => call.params.push(value),
                _ => log::warn!("Replay: macro data for slot {} without a call", slot),
            }
            return;
        }

        self.flush_call(mem);
        if let Some(slot) = macro_slot(method, methods::call_mme_macro(0)) {
            self.call = Some(PendingCall {
                slot,
                params: vec![value],
            });
            return;
        }

        match method {
            methods::LOAD_MME_INSTRUCTION_RAM => {
                let ptr = self.model.reg(methods::LOAD_MME_INSTRUCTION_RAM_POINTER);
                self.interp.upload_code(ptr, value);
                self.model.regs.insert(methods::LOAD_MME_INSTRUCTION_RAM_POINTER, ptr + 1);
            }
            methods::LOAD_MME_START_ADDRESS_RAM => {
                let ptr = self.model.reg(methods::LOAD_MME_START_ADDRESS_RAM_POINTER);
                self.interp.set_position(ptr, value);
                self.model.regs.insert(methods::LOAD_MME_START_ADDRESS_RAM_POINTER, ptr + 1);
            }
            _ => {}
        }
        self.model.write(mem, method, value);
    }

    fn flush_call(&mut self, mem: &mut dyn GpuMemory) {
        let Some(call) = self.call.take() else {
            return;
        };
        log::trace!("Replay: macro {} with {} arguments", call.slot, call.params.len());
        self.calls.push((call.slot, call.params.len()));
        let mut bus = MacroBus {
            model: &mut self.model,
            mem,
            fifo: Vec::new(),
        };
        if !self.interp.execute(call.slot, &call.params, &mut bus) {
            self.hung = true;
        }
    }

    pub fn reg(&self, method: u32) -> u32 {
        self.model.reg(method)
    }

    /// Last value of a copy-class method.
    pub fn copy_reg(&self, method: u32) -> u32 {
        self.copy.reg(method)
    }

    /// Copies the copy class has carried out.
    pub fn copy_launches(&self) -> usize {
        self.copy.launches
    }

    /// Every 3D write, including those made by macros.
    pub fn writes(&self) -> &[MethodWrite] {
        &self.model.writes
    }

    pub fn values_of(&self, method: u32) -> Vec<u32> {
        self.model
            .writes
            .iter()
            .filter(|w| w.method == method)
            .map(|w| w.value)
            .collect()
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.model.draws
    }

    /// Executed macro calls as (slot, argument count).
    pub fn calls(&self) -> &[(u32, usize)] {
        &self.calls
    }

    /// A macro hit the interpreter's step limit.
    pub fn hung(&self) -> bool {
        self.hung
    }
}

impl<H: GpuHeap + GpuMemory> CommandBuffer<H> {
    /// Replay everything recorded so far against `replay`, reading indirect
    /// segments from this command buffer's heap.
    pub fn replay_into(&mut self, replay: &mut Replay) -> Result<(), DecodeError> {
        self.push.finish(&mut self.heap);
        replay.run(&self.push, &mut self.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HostArena;
    use crate::push::{header, PushMode};
    use nvcs_common::fields::{begin, InstanceId, PrimitiveOp};
    use nvcs_common::types::ClassGen;
    use nvcs_mme::MmeProgram;

    fn immd(method: u32, value: u32) -> u32 {
        header(PushMode::Immd, 0, method, value)
    }

    #[test]
    fn test_plain_draw_recorded() {
        let mut mem = HostArena::default();
        let mut replay = Replay::new();
        let words = vec![
            immd(methods::BEGIN, 4),
            header(PushMode::Inc, 0, methods::SET_VERTEX_ARRAY_START, 2),
            6,
            3,
            immd(methods::END, 0),
        ];
        replay.run_words(&words, &mut mem).unwrap();
        assert_eq!(replay.draws().len(), 1);
        let d = replay.draws()[0];
        assert_eq!((d.kind, d.begin, d.first, d.count), (DrawKind::Array, 4, 6, 3));
    }

    #[test]
    fn test_macro_upload_and_call() {
        let image = MmeImage::build(ClassGen::Turing).unwrap();
        let mut mem = HostArena::default();
        let mut replay = Replay::new();

        let mut words = vec![immd(methods::LOAD_MME_INSTRUCTION_RAM_POINTER, 0)];
        let code_len = image.code().len() as u32;
        words.push(header(PushMode::NonInc, 0, methods::LOAD_MME_INSTRUCTION_RAM, code_len));
        words.extend_from_slice(image.code());
        words.push(immd(methods::LOAD_MME_START_ADDRESS_RAM_POINTER, 0));
        let slots = image.starts().len() as u32;
        words.push(header(PushMode::NonInc, 0, methods::LOAD_MME_START_ADDRESS_RAM, slots));
        words.extend_from_slice(image.starts());

        let draw_begin = begin(PrimitiveOp::Triangles, InstanceId::First);
        words.push(header(PushMode::OneInc, 0, MmeProgram::Draw.call_method(), 6));
        words.extend_from_slice(&[draw_begin, 0, 3, 2, 0, 0]);
        replay.run_words(&words, &mut mem).unwrap();

        assert!(!replay.hung());
        assert_eq!(replay.calls(), &[(MmeProgram::Draw.id(), 6)]);
        assert_eq!(replay.draws().len(), 2);
        assert_eq!(
            InstanceId::from_raw(replay.draws()[1].begin >> 26),
            InstanceId::Subsequent
        );
    }

    #[test]
    fn test_constant_buffer_loads_land_in_memory() {
        let mut mem = HostArena::default();
        let mut replay = Replay::new();
        let words = vec![
            header(PushMode::Inc, 0, methods::SET_CONSTANT_BUFFER_SELECTOR_A, 3),
            0x100,
            0x1,
            0x2000,
            immd(methods::LOAD_CONSTANT_BUFFER_OFFSET, 8),
            header(PushMode::NonInc, 0, methods::load_constant_buffer(0), 2),
            0xAA,
            0xBB,
        ];
        replay.run_words(&words, &mut mem).unwrap();
        assert_eq!(mem.read_words(0x1_0000_2008, 2), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_semaphore_release() {
        let mut mem = HostArena::default();
        let mut replay = Replay::new();
        let words = vec![
            header(PushMode::Inc, 0, methods::SET_REPORT_SEMAPHORE_A, 4),
            0x1,
            0x40,
            0xCAFE,
            0,
        ];
        replay.run_words(&words, &mut mem).unwrap();
        assert_eq!(mem.read_words(0x1_0000_0040, 1), vec![0xCAFE]);
    }

    #[test]
    fn test_stream_byte_count_report() {
        use nvcs_common::fields::{report_semaphore_d, PipelineLocation};
        let mut mem = HostArena::default();
        let mut replay = Replay::new();
        let d = report_semaphore_d(
            ReportOperation::ReportOnly,
            PipelineLocation::StreamingOutput,
            ReportKind::StreamingByteCount,
            3,
        );
        let words = vec![
            immd(methods::set_stream_out_buffer_load_write_pointer(3), 0x120),
            header(PushMode::Inc, 0, methods::SET_REPORT_SEMAPHORE_A, 4),
            0x1,
            0x80,
            0xCAFE,
            d,
        ];
        replay.run_words(&words, &mut mem).unwrap();
        assert_eq!(mem.read_words(0x1_0000_0080, 1), vec![0x120]);
    }

    #[test]
    fn test_copy_engine_launch() {
        let mut mem = HostArena::default();
        mem.write_words(0x2000, &[0x11, 0x22]);
        let mut replay = Replay::new();
        let mut words = vec![header(PushMode::Inc, SUBC_COPY, methods::copy::OFFSET_IN_UPPER, 8)];
        words.extend([0, 0x2004, 0, 0x3000, 4, 4, 4, 1]);
        words.push(header(PushMode::Immd, SUBC_COPY, methods::copy::LAUNCH_DMA, 0x385));
        replay.run_words(&words, &mut mem).unwrap();
        assert_eq!(replay.copy_launches(), 1);
        assert_eq!(mem.read_words(0x3000, 1), vec![0x22]);
        // Copy-class writes do not touch 3D registers.
        assert_eq!(replay.reg(methods::copy::OFFSET_IN_LOWER), 0);
        assert!(replay.writes().is_empty());
    }

    #[test]
    fn test_macro_slot_ranges() {
        assert_eq!(macro_slot(methods::call_mme_macro(3), methods::call_mme_macro(0)), Some(3));
        assert_eq!(macro_slot(methods::call_mme_data(3), methods::call_mme_macro(0)), None);
        assert_eq!(macro_slot(methods::BEGIN, methods::call_mme_macro(0)), None);
    }
}
