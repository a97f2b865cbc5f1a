// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transform-feedback programs: loading stream-out write pointers from
//! counter buffers and drawing by captured byte count.

use nvcs_common::methods;
use nvcs_common::types::ClassGen;

use super::draw::{for_each_view, instance_loop, set_draw_params, DrawParams};
use super::{load_to_scratch, MmeScratch};
use crate::builder::MmeBuilder;
use crate::ir::{Reg, Value};

/// Next argument, or on Turing+ the word behind the (hi, lo) address that
/// is the next argument pair.
fn load_counter(b: &mut MmeBuilder) -> Reg {
    if b.gen() >= ClassGen::Turing {
        let addr = b.load_addr64();
        b.read_fifoed(addr, 1u32);
        b.free_value64(addr);
    }
    b.load()
}

/// Arguments: stream-out buffer index times 8 (the write-pointer array
/// stride in words), then the counter address (Turing+) or the counter
/// value spliced from memory.
pub fn counter_load(b: &mut MmeBuilder) {
    let buffer = b.load();
    let counter = load_counter(b);

    b.mthd_idx(methods::set_stream_out_buffer_load_write_pointer(0), buffer);
    b.emit(counter);

    b.free_reg(counter);
    b.free_reg(buffer);
}

/// Arguments: begin, instance count, first instance, then the counter as in
/// [`counter_load`].
pub fn draw_indirect(b: &mut MmeBuilder) {
    load_to_scratch(b, MmeScratch::DrawBegin);
    let instance_count = b.load();
    let first_instance = b.load();
    let counter = load_counter(b);

    set_draw_params(
        b,
        &DrawParams {
            base_vertex: Value::ZERO,
            first_vertex: Value::ZERO,
            first_instance: first_instance.into(),
            draw_idx: Value::ZERO,
        },
    );
    b.free_reg(first_instance);

    for_each_view(b, &|b| {
        instance_loop(b, instance_count, &|b| {
            b.mthd(methods::DRAW_AUTO);
            b.emit(counter);
        })
    });

    b.free_reg(instance_count);
    b.free_reg(counter);
}
