// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Draw emission.
//!
//! Every draw first flushes dynamic state and then constant buffers, so the
//! buffer selector points at the root table when draw parameters are
//! loaded. A single-instance draw outside multiview is written directly by
//! the host; everything else goes through a microprogram.

use ash::vk;

use nvcs_common::fields::{begin, InstanceId};
use nvcs_common::methods;
use nvcs_common::root;
use nvcs_common::settings::DebugFlags;
use nvcs_mme::programs::{DRAW_INDEXED_RECORD_WORDS, DRAW_RECORD_WORDS};
use nvcs_mme::MmeProgram;

use crate::cmd_buffer::{CommandBuffer, PrimitiveState};
use crate::heap::GpuHeap;
use crate::vk_tables;

/// Draw parameters written into the root table and base registers.
struct DirectParams {
    base_vertex: u32,
    first_vertex: u32,
    first_instance: u32,
    draw_idx: u32,
}

impl<H: GpuHeap> CommandBuffer<H> {
    /// Packed `BEGIN` word for the first instance of a draw.
    pub(crate) fn begin_word(&self) -> u32 {
        let topology = self.dynamic.values().topology;
        begin(vk_tables::primitive_op(topology), InstanceId::First)
    }

    /// Flush state ahead of a draw. False once the buffer has failed.
    pub(crate) fn prepare_draw(&mut self) -> bool {
        self.flush_dynamic_state();
        self.flush_descriptors();
        self.error().is_none()
    }

    pub(crate) fn finish_draw(&mut self) {
        if self.device.settings().has_debug(DebugFlags::PUSH_SYNC) {
            if let Some(p) = self.push(2) {
                p.immd(methods::WAIT_FOR_IDLE, 0);
            }
        }
    }

    fn is_direct(&self, instance_count: u32) -> bool {
        instance_count == 1 && self.view_mask() == 0
    }

    fn begin_primitive(&mut self, begin: u32) {
        debug_assert_eq!(self.primitive, PrimitiveState::Idle);
        if let Some(p) = self.push(2) {
            p.immd(methods::BEGIN, begin);
            self.primitive = PrimitiveState::Open;
        }
    }

    fn end_primitive(&mut self) {
        if let Some(p) = self.push(2) {
            p.immd(methods::END, 0);
        }
        self.primitive = PrimitiveState::Idle;
    }

    /// Host-side equivalent of the draw programs for a single instance.
    fn emit_direct(&mut self, params: DirectParams, range_method: u32, first: u32, count: u32) {
        let begin = self.begin_word();
        if let Some(p) = self.push(13) {
            p.immd(methods::LOAD_CONSTANT_BUFFER_OFFSET, root::DRAW_BASE_VERTEX);
            p.multi(
                methods::load_constant_buffer(0),
                &[params.first_vertex, params.first_instance, params.draw_idx, 0],
            );
            p.immd(methods::SET_GLOBAL_BASE_VERTEX_INDEX, params.base_vertex);
            p.immd(methods::SET_VERTEX_ID_BASE, params.base_vertex);
            p.immd(methods::SET_GLOBAL_BASE_INSTANCE_INDEX, params.first_instance);
        }
        self.begin_primitive(begin);
        if let Some(p) = self.push(3) {
            p.multi(range_method, &[first, count]);
        }
        self.end_primitive();
    }

    /// Call `program` with `args` inline.
    fn call_program(&mut self, program: MmeProgram, args: &[u32]) {
        if let Some(p) = self.push(1 + args.len()) {
            p.one_inc(program.call_method());
            args.iter().for_each(|&a| p.data(a));
        }
    }

    // ── Direct draws ────────────────────────────────────────────────────────

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        log::trace!(
            "Draw: {} vertices from {}, {} instances from {}",
            vertex_count,
            first_vertex,
            instance_count,
            first_instance
        );
        if !self.prepare_draw() {
            return;
        }
        self.emit_draw(0, vertex_count, instance_count, first_vertex, first_instance);
        self.finish_draw();
    }

    fn emit_draw(
        &mut self,
        draw_idx: u32,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        if self.is_direct(instance_count) {
            let params = DirectParams {
                base_vertex: 0,
                first_vertex,
                first_instance,
                draw_idx,
            };
            self.emit_direct(params, methods::SET_VERTEX_ARRAY_START, first_vertex, vertex_count);
        } else {
            let begin = self.begin_word();
            self.call_program(
                MmeProgram::Draw,
                &[begin, draw_idx, vertex_count, instance_count, first_vertex, first_instance],
            );
        }
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        log::trace!(
            "Draw: {} indices from {}, vertex offset {}, {} instances",
            index_count,
            first_index,
            vertex_offset,
            instance_count
        );
        if !self.prepare_draw() {
            return;
        }
        self.emit_draw_indexed(
            0,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        self.finish_draw();
    }

    fn emit_draw_indexed(
        &mut self,
        draw_idx: u32,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        let vertex_offset = vertex_offset as u32;
        if self.is_direct(instance_count) {
            let params = DirectParams {
                base_vertex: vertex_offset,
                first_vertex: vertex_offset,
                first_instance,
                draw_idx,
            };
            self.emit_direct(params, methods::SET_INDEX_BUFFER_F, first_index, index_count);
        } else {
            let begin = self.begin_word();
            self.call_program(
                MmeProgram::DrawIndexed,
                &[
                    begin,
                    draw_idx,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                ],
            );
        }
    }

    /// One draw per entry; `gl_DrawID` counts entries.
    pub fn draw_multi(
        &mut self,
        draws: &[vk::MultiDrawInfoEXT],
        instance_count: u32,
        first_instance: u32,
    ) {
        if draws.is_empty() || !self.prepare_draw() {
            return;
        }
        for (i, d) in draws.iter().enumerate() {
            self.emit_draw(i as u32, d.vertex_count, instance_count, d.first_vertex, first_instance);
        }
        self.finish_draw();
    }

    /// As [`Self::draw_multi`]; a `vertex_offset` overrides every entry's.
    pub fn draw_multi_indexed(
        &mut self,
        draws: &[vk::MultiDrawIndexedInfoEXT],
        instance_count: u32,
        first_instance: u32,
        vertex_offset: Option<i32>,
    ) {
        if draws.is_empty() || !self.prepare_draw() {
            return;
        }
        for (i, d) in draws.iter().enumerate() {
            self.emit_draw_indexed(
                i as u32,
                d.index_count,
                instance_count,
                d.first_index,
                vertex_offset.unwrap_or(d.vertex_offset),
                first_instance,
            );
        }
        self.finish_draw();
    }

    // ── Indirect draws ──────────────────────────────────────────────────────

    pub fn draw_indirect(&mut self, addr: u64, draw_count: u32, stride: u32) {
        self.indirect(MmeProgram::DrawIndirect, DRAW_RECORD_WORDS, addr, draw_count, stride);
    }

    pub fn draw_indexed_indirect(&mut self, addr: u64, draw_count: u32, stride: u32) {
        self.indirect(
            MmeProgram::DrawIndexedIndirect,
            DRAW_INDEXED_RECORD_WORDS,
            addr,
            draw_count,
            stride,
        );
    }

    fn indirect(
        &mut self,
        program: MmeProgram,
        record_words: u32,
        addr: u64,
        draw_count: u32,
        stride: u32,
    ) {
        let record = 4 * record_words;
        if draw_count > 1 {
            assert!(stride >= record && stride % 4 == 0, "indirect stride {}", stride);
        }
        log::trace!("Draw: {} indirect from 0x{:X}, stride {}", draw_count, addr, stride);
        if draw_count == 0 || !self.prepare_draw() {
            return;
        }
        let begin = self.begin_word();

        if self.device.info().has_fast_indirect_loads {
            let hi = (addr >> 32) as u32;
            self.call_program(program, &[begin, hi, addr as u32, draw_count, stride]);
            self.finish_draw();
            return;
        }

        // Splice the records into the call, as many per chunk as one method
        // count allows. The draw index restarts in every chunk.
        let stride = if draw_count == 1 { record } else { stride };
        let pad_dw = (stride - record) / 4;
        let max_count = self.push.max_count();
        let per_chunk = ((max_count - 3) * 4) / stride;
        assert!(per_chunk > 0, "stride {} over the method count limit", stride);

        let mut addr = addr;
        let mut remaining = draw_count;
        while remaining > 0 {
            let count = remaining.min(per_chunk);
            let bytes = count * stride;
            let Some(p) = self.push(4) else {
                return;
            };
            p.one_inc(program.call_method());
            p.data(begin);
            p.data(count);
            p.data(pad_dw);
            p.update_count(bytes / 4);
            p.push_indirect(addr, bytes as u64);
            addr += bytes as u64;
            remaining -= count;
        }
        self.finish_draw();
    }

    pub fn draw_indirect_count(
        &mut self,
        addr: u64,
        count_addr: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        self.indirect_count(
            MmeProgram::DrawIndirectCount,
            DRAW_RECORD_WORDS,
            addr,
            count_addr,
            max_draw_count,
            stride,
        );
    }

    pub fn draw_indexed_indirect_count(
        &mut self,
        addr: u64,
        count_addr: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        self.indirect_count(
            MmeProgram::DrawIndexedIndirectCount,
            DRAW_INDEXED_RECORD_WORDS,
            addr,
            count_addr,
            max_draw_count,
            stride,
        );
    }

    fn indirect_count(
        &mut self,
        program: MmeProgram,
        record_words: u32,
        addr: u64,
        count_addr: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        assert!(
            self.device.info().has_fast_indirect_loads,
            "indirect count draws need fast indirect loads"
        );
        assert!(stride >= 4 * record_words && stride % 4 == 0, "indirect stride {}", stride);
        if max_draw_count == 0 || !self.prepare_draw() {
            return;
        }
        let begin = self.begin_word();
        self.call_program(
            program,
            &[
                begin,
                (addr >> 32) as u32,
                addr as u32,
                (count_addr >> 32) as u32,
                count_addr as u32,
                max_draw_count,
                stride,
            ],
        );
        self.finish_draw();
    }
}
