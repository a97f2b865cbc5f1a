// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Draw programs.
//!
//! Every draw program starts with the packed `BEGIN` word, which it parks in
//! the `DrawBegin` scratch slot. Direct draws then take one record of
//! parameters inline. Indirect draws walk records in memory: on Turing and
//! later by pulling them into the argument queue with fifoed reads, before
//! that by having the host splice the records into the call itself.

use nvcs_common::fields::{InstanceId, BEGIN_INSTANCE_ID_BITS, BEGIN_INSTANCE_ID_SHIFT};
use nvcs_common::methods;
use nvcs_common::root;
use nvcs_common::types::ClassGen;

use super::{load_scratch, load_to_scratch, spill, unspill, MmeScratch};
use crate::builder::{Cmp, MmeBuilder};
use crate::ir::{Reg, Value, Value64};

/// Words in a non-indexed indirect record.
pub const DRAW_RECORD_WORDS: u32 = 4;
/// Words in an indexed indirect record.
pub const DRAW_INDEXED_RECORD_WORDS: u32 = 5;

pub(super) struct DrawParams {
    pub base_vertex: Value,
    pub first_vertex: Value,
    pub first_instance: Value,
    pub draw_idx: Value,
}

/// Write the draw fields of the root table and the matching base registers.
pub(super) fn set_draw_params(b: &mut MmeBuilder, p: &DrawParams) {
    b.mthd(methods::LOAD_CONSTANT_BUFFER_OFFSET);
    b.emit(root::DRAW_BASE_VERTEX);
    b.mthd(methods::load_constant_buffer(0));
    b.emit(p.first_vertex);
    b.emit(p.first_instance);
    b.emit(p.draw_idx);
    b.emit(0u32);

    b.mthd(methods::SET_GLOBAL_BASE_VERTEX_INDEX);
    b.emit(p.base_vertex);
    b.mthd(methods::SET_VERTEX_ID_BASE);
    b.emit(p.base_vertex);

    b.mthd(methods::SET_GLOBAL_BASE_INSTANCE_INDEX);
    b.emit(p.first_instance);
}

fn emit_view_index(b: &mut MmeBuilder, view: Reg) {
    b.mthd(methods::LOAD_CONSTANT_BUFFER_OFFSET);
    b.emit(root::DRAW_VIEW_INDEX);
    b.mthd(methods::load_constant_buffer(0));
    b.emit(view);

    // The layer select field sits at bit 0 and zero selects the layer.
    b.mthd(methods::SET_RT_LAYER);
    b.emit(view);
}

/// One `BEGIN`/`END` bracket per instance. `body` emits the range.
pub(super) fn instance_loop(
    b: &mut MmeBuilder,
    instance_count: Reg,
    body: &dyn Fn(&mut MmeBuilder),
) {
    let begin = load_scratch(b, MmeScratch::DrawBegin);
    b.loop_n(instance_count, |b| {
        b.mthd(methods::BEGIN);
        b.emit(begin);
        body(b);
        b.mthd(methods::END);
        b.emit(0u32);
        b.merge_to(
            begin,
            begin,
            InstanceId::Subsequent as u32,
            BEGIN_INSTANCE_ID_SHIFT,
            BEGIN_INSTANCE_ID_BITS,
            0,
        );
    });
    b.free_reg(begin);
}

/// Run `instance_loop` once, or once per set bit of the view mask.
pub(super) fn for_each_view(b: &mut MmeBuilder, draw_loop: &dyn Fn(&mut MmeBuilder)) {
    let view_mask = load_scratch(b, MmeScratch::ViewMask);
    b.start_if(Cmp::Eq, view_mask, 0u32);
    b.free_reg(view_mask);
    draw_loop(b);
    b.end_if();

    let view_mask = load_scratch(b, MmeScratch::ViewMask);
    b.start_if(Cmp::Ne, view_mask, 0u32);
    b.free_reg(view_mask);
    let view = b.mov(0u32);
    b.while_loop(Cmp::Ne, view, 32u32, |b| {
        let view_mask = load_scratch(b, MmeScratch::ViewMask);
        let has_view = b.bfe(view_mask, view, 1);
        b.free_reg(view_mask);
        b.if_then(Cmp::Ne, has_view, 0u32, |b| {
            b.free_reg(has_view);
            emit_view_index(b, view);
            draw_loop(b);
        });
        b.add_to(view, view, 1u32);
    });
    b.free_reg(view);
    b.end_if();
}

/// One non-indexed draw; arguments in `VkDrawIndirectCommand` order.
fn build_draw(b: &mut MmeBuilder, draw_idx: Reg) {
    let vertex_count = b.load();
    let instance_count = b.load();
    let first_vertex = b.load();
    let first_instance = b.load();

    set_draw_params(
        b,
        &DrawParams {
            base_vertex: Value::ZERO,
            first_vertex: first_vertex.into(),
            first_instance: first_instance.into(),
            draw_idx: draw_idx.into(),
        },
    );
    b.free_reg(first_instance);

    spill(b, MmeScratch::DrawIdx, draw_idx);
    for_each_view(b, &|b| {
        instance_loop(b, instance_count, &|b| {
            b.mthd(methods::SET_VERTEX_ARRAY_START);
            b.emit(first_vertex);
            b.emit(vertex_count);
        })
    });
    b.free_reg(instance_count);
    b.free_reg(first_vertex);
    b.free_reg(vertex_count);
    unspill(b, MmeScratch::DrawIdx, draw_idx);
}

/// One indexed draw; arguments in `VkDrawIndexedIndirectCommand` order.
fn build_draw_indexed(b: &mut MmeBuilder, draw_idx: Reg) {
    let index_count = b.load();
    let instance_count = b.load();
    let first_index = b.load();
    let vertex_offset = b.load();
    let first_instance = b.load();

    set_draw_params(
        b,
        &DrawParams {
            base_vertex: vertex_offset.into(),
            first_vertex: vertex_offset.into(),
            first_instance: first_instance.into(),
            draw_idx: draw_idx.into(),
        },
    );
    b.free_reg(vertex_offset);
    b.free_reg(first_instance);

    spill(b, MmeScratch::DrawIdx, draw_idx);
    for_each_view(b, &|b| {
        instance_loop(b, instance_count, &|b| {
            b.mthd(methods::SET_INDEX_BUFFER_F);
            b.emit(first_index);
            b.emit(index_count);
        })
    });
    b.free_reg(instance_count);
    b.free_reg(first_index);
    b.free_reg(index_count);
    unspill(b, MmeScratch::DrawIdx, draw_idx);
}

/// Arguments: begin, draw index, then one record.
pub fn draw(b: &mut MmeBuilder) {
    load_to_scratch(b, MmeScratch::DrawBegin);
    let draw_idx = b.load();
    build_draw(b, draw_idx);
    b.free_reg(draw_idx);
}

pub fn draw_indexed(b: &mut MmeBuilder) {
    load_to_scratch(b, MmeScratch::DrawBegin);
    let draw_idx = b.load();
    build_draw_indexed(b, draw_idx);
    b.free_reg(draw_idx);
}

/// Walk `count` records of `words` words, `stride` bytes apart, starting at
/// `addr`. Loop state lives in scratch slots while a record is drawn.
fn fifoed_draw_loop(
    b: &mut MmeBuilder,
    addr: Value64,
    count: Reg,
    stride: Reg,
    words: u32,
    build: fn(&mut MmeBuilder, Reg),
) {
    spill(b, MmeScratch::DrawStride, stride);
    let draw = b.mov(0u32);
    b.while_loop(Cmp::Ult, draw, count, |b| {
        b.read_fifoed(addr, words);
        spill(b, MmeScratch::DrawAddrHi, addr.hi);
        spill(b, MmeScratch::DrawAddrLo, addr.lo);
        spill(b, MmeScratch::DrawCount, count);

        build(b, draw);
        b.add_to(draw, draw, 1u32);

        unspill(b, MmeScratch::DrawCount, count);
        unspill(b, MmeScratch::DrawAddrLo, addr.lo);
        unspill(b, MmeScratch::DrawAddrHi, addr.hi);
        let stride = load_scratch(b, MmeScratch::DrawStride);
        b.add64_to(addr, stride);
        b.free_reg(stride);
    });
    b.free_reg(draw);
    b.free_reg(count);
    b.free_value64(addr);
}

/// Records spliced into the call: each is followed by `pad_dw` words of
/// stride padding, which are fetched and dropped.
fn inline_draw_loop(b: &mut MmeBuilder, count: Reg, build: fn(&mut MmeBuilder, Reg)) {
    load_to_scratch(b, MmeScratch::DrawPadDw);
    let draw = b.mov(0u32);
    b.while_loop(Cmp::Ne, draw, count, |b| {
        spill(b, MmeScratch::DrawCount, count);

        build(b, draw);
        b.add_to(draw, draw, 1u32);

        let pad_dw = load_scratch(b, MmeScratch::DrawPadDw);
        b.loop_n(pad_dw, |b| {
            let pad = b.load();
            b.free_reg(pad);
        });
        b.free_reg(pad_dw);

        unspill(b, MmeScratch::DrawCount, count);
    });
    b.free_reg(draw);
    b.free_reg(count);
}

/// Turing+ arguments: begin, addr hi, addr lo, draw count, stride.
/// Older: begin, draw count, pad words per record, then the records.
fn indirect(b: &mut MmeBuilder, words: u32, build: fn(&mut MmeBuilder, Reg)) {
    load_to_scratch(b, MmeScratch::DrawBegin);
    if b.gen() >= ClassGen::Turing {
        let addr = b.load_addr64();
        let count = b.load();
        let stride = b.load();
        fifoed_draw_loop(b, addr, count, stride, words, build);
    } else {
        let count = b.load();
        inline_draw_loop(b, count, build);
    }
}

pub fn draw_indirect(b: &mut MmeBuilder) {
    indirect(b, DRAW_RECORD_WORDS, build_draw);
}

pub fn draw_indexed_indirect(b: &mut MmeBuilder) {
    indirect(b, DRAW_INDEXED_RECORD_WORDS, build_draw_indexed);
}

/// Turing+ only. Arguments: begin, addr hi/lo, count addr hi/lo, max draws,
/// stride. The draw count is `min(*count_addr, max)`.
fn indirect_count(b: &mut MmeBuilder, words: u32, build: fn(&mut MmeBuilder, Reg)) {
    if b.gen() < ClassGen::Turing {
        return;
    }
    load_to_scratch(b, MmeScratch::DrawBegin);
    let addr = b.load_addr64();
    let count_addr = b.load_addr64();
    let draw_max = b.load();
    let stride = b.load();

    b.read_fifoed(count_addr, 1u32);
    b.free_value64(count_addr);
    let draw_count = b.load();
    b.if_then(Cmp::Ule, draw_count, draw_max, |b| {
        b.mov_to(draw_max, draw_count);
    });
    b.free_reg(draw_count);

    fifoed_draw_loop(b, addr, draw_max, stride, words, build);
}

pub fn draw_indirect_count(b: &mut MmeBuilder) {
    indirect_count(b, DRAW_RECORD_WORDS, build_draw);
}

pub fn draw_indexed_indirect_count(b: &mut MmeBuilder) {
    indirect_count(b, DRAW_INDEXED_RECORD_WORDS, build_draw_indexed);
}
