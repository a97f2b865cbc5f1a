// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! 3D class method offsets.
//!
//! All offsets are byte addresses as seen by the push stream (the header
//! stores `offset >> 2`). Array methods are exposed as `const fn` taking the
//! element index. [`METHOD_TABLE`] describes every method for the push dump
//! and is checked for overlaps by [`self_check`].

use std::collections::BTreeMap;

/// Methods below this offset are addressable by the macro unit, whose method
/// register holds a 12-bit word address.
pub const MME_METHOD_LIMIT: u32 = 0x4000;

// ── Object and macro upload ─────────────────────────────────────────────────

pub const SET_OBJECT: u32 = 0x0000;
pub const NO_OPERATION: u32 = 0x0100;
pub const WAIT_FOR_IDLE: u32 = 0x0110;
pub const LOAD_MME_INSTRUCTION_RAM_POINTER: u32 = 0x0114;
pub const LOAD_MME_INSTRUCTION_RAM: u32 = 0x0118;
pub const LOAD_MME_START_ADDRESS_RAM_POINTER: u32 = 0x011c;
pub const LOAD_MME_START_ADDRESS_RAM: u32 = 0x0120;
pub const SET_MME_SHADOW_RAM_CONTROL: u32 = 0x0124;
pub const SET_FALCON04: u32 = 0x0510;
pub const SET_MME_MEM_ADDRESS_A: u32 = 0x0550;
pub const SET_MME_MEM_ADDRESS_B: u32 = 0x0554;
pub const MME_DMA_READ_FIFOED: u32 = 0x0564;

pub const fn set_mme_shadow_scratch(i: u32) -> u32 {
    0x3400 + i * 4
}

pub const fn call_mme_macro(id: u32) -> u32 {
    0x3800 + id * 8
}

pub const fn call_mme_data(id: u32) -> u32 {
    0x3804 + id * 8
}

// ── Draw ────────────────────────────────────────────────────────────────────

pub const BEGIN: u32 = 0x1618;
pub const END: u32 = 0x1614;
pub const SET_VERTEX_ARRAY_START: u32 = 0x0d74;
pub const SET_VERTEX_ARRAY_COUNT: u32 = 0x0d78;
pub const SET_INDEX_BUFFER_A: u32 = 0x17c8;
pub const SET_INDEX_BUFFER_B: u32 = 0x17cc;
pub const SET_INDEX_BUFFER_C: u32 = 0x17d0;
pub const SET_INDEX_BUFFER_D: u32 = 0x17d4;
pub const SET_INDEX_BUFFER_E: u32 = 0x17d8;
pub const SET_INDEX_BUFFER_F: u32 = 0x17dc;
pub const SET_INDEX_BUFFER_G: u32 = 0x17e0;
pub const SET_INDEX_BUFFER_SIZE_A: u32 = 0x5f00;
pub const SET_INDEX_BUFFER_SIZE_B: u32 = 0x5f04;
pub const SET_GLOBAL_BASE_VERTEX_INDEX: u32 = 0x1434;
pub const SET_GLOBAL_BASE_INSTANCE_INDEX: u32 = 0x1438;
pub const SET_VERTEX_ID_BASE: u32 = 0x1444;
pub const SET_RT_LAYER: u32 = 0x0d44;
pub const SET_DRAW_AUTO_START: u32 = 0x07b0;
pub const SET_DRAW_AUTO_STRIDE: u32 = 0x07b4;
pub const DRAW_AUTO: u32 = 0x07b8;

// ── Constant buffers ────────────────────────────────────────────────────────

pub const SET_CONSTANT_BUFFER_SELECTOR_A: u32 = 0x2380;
pub const SET_CONSTANT_BUFFER_SELECTOR_B: u32 = 0x2384;
pub const SET_CONSTANT_BUFFER_SELECTOR_C: u32 = 0x2388;
pub const LOAD_CONSTANT_BUFFER_OFFSET: u32 = 0x238c;

pub const fn load_constant_buffer(i: u32) -> u32 {
    0x2390 + i * 4
}

pub const fn bind_group_constant_buffer(group: u32) -> u32 {
    0x2410 + group * 0x20
}

// ── Depth / stencil ─────────────────────────────────────────────────────────

pub const SET_DEPTH_TEST: u32 = 0x12cc;
pub const SET_DEPTH_WRITE: u32 = 0x12e8;
pub const SET_DEPTH_FUNC: u32 = 0x130c;
pub const SET_DEPTH_BOUNDS_TEST: u32 = 0x19bc;
pub const SET_DEPTH_BOUNDS_MIN: u32 = 0x0f9c;
pub const SET_DEPTH_BOUNDS_MAX: u32 = 0x0fa0;
pub const SET_STENCIL_TEST: u32 = 0x1380;
pub const SET_STENCIL_OP_FAIL: u32 = 0x1384;
pub const SET_STENCIL_OP_ZFAIL: u32 = 0x1388;
pub const SET_STENCIL_OP_ZPASS: u32 = 0x138c;
pub const SET_STENCIL_FUNC: u32 = 0x1390;
pub const SET_STENCIL_FUNC_REF: u32 = 0x1394;
pub const SET_STENCIL_FUNC_MASK: u32 = 0x1398;
pub const SET_STENCIL_MASK: u32 = 0x139c;
pub const SET_STENCIL_TWO_SIDE: u32 = 0x1594;
pub const SET_BACK_STENCIL_OP_FAIL: u32 = 0x1598;
pub const SET_BACK_STENCIL_OP_ZFAIL: u32 = 0x159c;
pub const SET_BACK_STENCIL_OP_ZPASS: u32 = 0x15a0;
pub const SET_BACK_STENCIL_FUNC: u32 = 0x15a4;
pub const SET_BACK_STENCIL_FUNC_REF: u32 = 0x0f54;
pub const SET_BACK_STENCIL_MASK: u32 = 0x0f58;
pub const SET_BACK_STENCIL_FUNC_MASK: u32 = 0x0f5c;

// ── Blend / colour write ────────────────────────────────────────────────────

pub const SET_BLEND_CONST_RED: u32 = 0x131c;
pub const SET_BLEND_CONST_GREEN: u32 = 0x1320;
pub const SET_BLEND_CONST_BLUE: u32 = 0x1324;
pub const SET_BLEND_CONST_ALPHA: u32 = 0x1328;
pub const SET_BLEND_STATE_PER_TARGET: u32 = 0x12e4;
pub const SET_LOGIC_OP: u32 = 0x19c4;
pub const SET_LOGIC_OP_FUNC: u32 = 0x19c8;
pub const SET_SINGLE_CT_WRITE_CONTROL: u32 = 0x0f90;
pub const SET_CT_SELECT: u32 = 0x121c;

pub const fn set_blend(i: u32) -> u32 {
    0x1360 + i * 4
}

pub const fn set_ct_write(i: u32) -> u32 {
    0x1a00 + i * 4
}

pub const fn blend_per_target_separate_for_alpha(i: u32) -> u32 {
    0x1e00 + i * 0x20
}

pub const fn blend_per_target_color_op(i: u32) -> u32 {
    0x1e04 + i * 0x20
}

pub const fn blend_per_target_color_source_coeff(i: u32) -> u32 {
    0x1e08 + i * 0x20
}

pub const fn blend_per_target_color_dest_coeff(i: u32) -> u32 {
    0x1e0c + i * 0x20
}

pub const fn blend_per_target_alpha_op(i: u32) -> u32 {
    0x1e10 + i * 0x20
}

pub const fn blend_per_target_alpha_source_coeff(i: u32) -> u32 {
    0x1e14 + i * 0x20
}

pub const fn blend_per_target_alpha_dest_coeff(i: u32) -> u32 {
    0x1e18 + i * 0x20
}

// ── Rasterisation ───────────────────────────────────────────────────────────

pub const OGL_SET_CULL: u32 = 0x1918;
pub const OGL_SET_FRONT_FACE: u32 = 0x191c;
pub const OGL_SET_CULL_FACE: u32 = 0x1920;
pub const SET_FRONT_POLYGON_MODE: u32 = 0x0dac;
pub const SET_BACK_POLYGON_MODE: u32 = 0x0db0;
pub const SET_LINE_WIDTH_FLOAT: u32 = 0x13b0;
pub const SET_ALIASED_LINE_WIDTH_FLOAT: u32 = 0x13b4;
pub const SET_ANTI_ALIASED_LINE: u32 = 0x1570;
pub const SET_LINE_STIPPLE: u32 = 0x1520;
pub const SET_LINE_STIPPLE_PARAMETERS: u32 = 0x1524;
pub const SET_DEPTH_BIAS: u32 = 0x15bc;
pub const SET_SLOPE_SCALE_DEPTH_BIAS: u32 = 0x156c;
pub const SET_DEPTH_BIAS_CLAMP: u32 = 0x187c;
pub const SET_POLY_OFFSET_POINT: u32 = 0x0dc0;
pub const SET_POLY_OFFSET_LINE: u32 = 0x0dc4;
pub const SET_POLY_OFFSET_FILL: u32 = 0x0dc8;
pub const SET_RASTER_ENABLE: u32 = 0x037c;
pub const SET_RASTER_INPUT: u32 = 0x0740;
pub const SET_PROVOKING_VERTEX: u32 = 0x1684;
pub const SET_DA_PRIMITIVE_RESTART: u32 = 0x1644;
pub const SET_DA_PRIMITIVE_RESTART_INDEX: u32 = 0x1648;
pub const SET_PATCH: u32 = 0x0dcc;
pub const SET_TESSELLATION_PARAMETERS: u32 = 0x0d3c;

// ── Viewport / scissor ──────────────────────────────────────────────────────

pub const SET_VIEWPORT_Z_CLIP: u32 = 0x0d7c;
pub const SET_VIEWPORT_CLIP_CONTROL: u32 = 0x059c;

pub const fn set_viewport_scale_x(j: u32) -> u32 {
    0x0a00 + j * 0x20
}

pub const fn set_viewport_scale_y(j: u32) -> u32 {
    0x0a04 + j * 0x20
}

pub const fn set_viewport_scale_z(j: u32) -> u32 {
    0x0a08 + j * 0x20
}

pub const fn set_viewport_offset_x(j: u32) -> u32 {
    0x0a0c + j * 0x20
}

pub const fn set_viewport_offset_y(j: u32) -> u32 {
    0x0a10 + j * 0x20
}

pub const fn set_viewport_offset_z(j: u32) -> u32 {
    0x0a14 + j * 0x20
}

pub const fn set_viewport_coordinate_swizzle(j: u32) -> u32 {
    0x0a18 + j * 0x20
}

pub const fn set_viewport_clip_horizontal(j: u32) -> u32 {
    0x0c00 + j * 0x10
}

pub const fn set_viewport_clip_vertical(j: u32) -> u32 {
    0x0c04 + j * 0x10
}

pub const fn set_viewport_clip_min_z(j: u32) -> u32 {
    0x0c08 + j * 0x10
}

pub const fn set_viewport_clip_max_z(j: u32) -> u32 {
    0x0c0c + j * 0x10
}

pub const fn set_scissor_enable(j: u32) -> u32 {
    0x0e00 + j * 0x10
}

pub const fn set_scissor_horizontal(j: u32) -> u32 {
    0x0e04 + j * 0x10
}

pub const fn set_scissor_vertical(j: u32) -> u32 {
    0x0e08 + j * 0x10
}

// ── Vertex input ────────────────────────────────────────────────────────────

pub const fn set_vertex_attribute_a(i: u32) -> u32 {
    0x1160 + i * 4
}

pub const fn set_vertex_stream_a_format(j: u32) -> u32 {
    0x1c00 + j * 0x10
}

pub const fn set_vertex_stream_a_location_a(j: u32) -> u32 {
    0x1c04 + j * 0x10
}

pub const fn set_vertex_stream_a_location_b(j: u32) -> u32 {
    0x1c08 + j * 0x10
}

pub const fn set_vertex_stream_a_frequency(j: u32) -> u32 {
    0x1c0c + j * 0x10
}

pub const fn set_vertex_stream_limit_a_a(j: u32) -> u32 {
    0x1f00 + j * 8
}

pub const fn set_vertex_stream_limit_a_b(j: u32) -> u32 {
    0x1f04 + j * 8
}

pub const fn set_vertex_stream_size_a(j: u32) -> u32 {
    0x5180 + j * 8
}

pub const fn set_vertex_stream_size_b(j: u32) -> u32 {
    0x5184 + j * 8
}

pub const fn set_vertex_stream_instance_a(i: u32) -> u32 {
    0x1880 + i * 4
}

// ── Transform feedback / reports ────────────────────────────────────────────

pub const SET_STREAM_OUTPUT: u32 = 0x0744;
pub const SET_REPORT_SEMAPHORE_A: u32 = 0x1b00;
pub const SET_REPORT_SEMAPHORE_B: u32 = 0x1b04;
pub const SET_REPORT_SEMAPHORE_C: u32 = 0x1b08;
pub const SET_REPORT_SEMAPHORE_D: u32 = 0x1b0c;

pub const fn set_stream_out_buffer_enable(j: u32) -> u32 {
    0x0380 + j * 0x20
}

pub const fn set_stream_out_buffer_address_a(j: u32) -> u32 {
    0x0384 + j * 0x20
}

pub const fn set_stream_out_buffer_address_b(j: u32) -> u32 {
    0x0388 + j * 0x20
}

pub const fn set_stream_out_buffer_size(j: u32) -> u32 {
    0x038c + j * 0x20
}

pub const fn set_stream_out_buffer_load_write_pointer(j: u32) -> u32 {
    0x0390 + j * 0x20
}

// ── Render targets ──────────────────────────────────────────────────────────

pub const SET_ZT_A: u32 = 0x0fe0;
pub const SET_ZT_B: u32 = 0x0fe4;
pub const SET_ZT_FORMAT: u32 = 0x0fe8;
pub const SET_ZT_BLOCK_SIZE: u32 = 0x0fec;
pub const SET_ZT_ARRAY_PITCH: u32 = 0x0ff0;
pub const SET_SURFACE_CLIP_HORIZONTAL: u32 = 0x0ff4;
pub const SET_SURFACE_CLIP_VERTICAL: u32 = 0x0ff8;
pub const SET_ZT_SIZE_A: u32 = 0x1228;
pub const SET_ZT_SIZE_B: u32 = 0x122c;
pub const SET_ZT_SIZE_C: u32 = 0x1230;
pub const SET_ZT_SELECT: u32 = 0x1538;
pub const SET_ANTI_ALIAS: u32 = 0x1534;
pub const SET_RENDER_ENABLE_A: u32 = 0x1550;
pub const SET_RENDER_ENABLE_B: u32 = 0x1554;
pub const SET_RENDER_ENABLE_C: u32 = 0x1558;

pub const fn set_color_target_a(j: u32) -> u32 {
    0x0800 + j * 0x40
}

pub const fn set_color_target_b(j: u32) -> u32 {
    0x0804 + j * 0x40
}

pub const fn set_color_target_width(j: u32) -> u32 {
    0x0808 + j * 0x40
}

pub const fn set_color_target_height(j: u32) -> u32 {
    0x080c + j * 0x40
}

pub const fn set_color_target_format(j: u32) -> u32 {
    0x0810 + j * 0x40
}

pub const fn set_color_target_memory(j: u32) -> u32 {
    0x0814 + j * 0x40
}

pub const fn set_color_target_third_dimension(j: u32) -> u32 {
    0x0818 + j * 0x40
}

pub const fn set_color_target_array_pitch(j: u32) -> u32 {
    0x081c + j * 0x40
}

pub const fn set_color_target_layer(j: u32) -> u32 {
    0x0820 + j * 0x40
}

// ── Multisample ─────────────────────────────────────────────────────────────

pub const SET_ANTI_ALIAS_ALPHA_CONTROL: u32 = 0x1210;
pub const SET_SAMPLE_MASK_X0_Y0: u32 = 0x0fd0;
pub const SET_SAMPLE_MASK_X1_Y0: u32 = 0x0fd4;
pub const SET_SAMPLE_MASK_X0_Y1: u32 = 0x0fd8;
pub const SET_SAMPLE_MASK_X1_Y1: u32 = 0x0fdc;

pub const fn set_anti_alias_sample_positions(i: u32) -> u32 {
    0x11e0 + i * 4
}

// ── Copy engine ─────────────────────────────────────────────────────────────

/// DMA copy class methods. The copy class is bound on its own subchannel and
/// these offsets overlap the 3D ones, so they live apart from
/// [`METHOD_TABLE`].
pub mod copy {
    pub const SET_OBJECT: u32 = 0x0000;
    pub const LAUNCH_DMA: u32 = 0x0300;
    pub const OFFSET_IN_UPPER: u32 = 0x0400;
    pub const OFFSET_IN_LOWER: u32 = 0x0404;
    pub const OFFSET_OUT_UPPER: u32 = 0x0408;
    pub const OFFSET_OUT_LOWER: u32 = 0x040c;
    pub const PITCH_IN: u32 = 0x0410;
    pub const PITCH_OUT: u32 = 0x0414;
    pub const LINE_LENGTH_IN: u32 = 0x0418;
    pub const LINE_COUNT: u32 = 0x041c;

    const NAMES: &[(u32, &str)] = &[
        (SET_OBJECT, "SET_OBJECT"),
        (LAUNCH_DMA, "LAUNCH_DMA"),
        (OFFSET_IN_UPPER, "OFFSET_IN_UPPER"),
        (OFFSET_IN_LOWER, "OFFSET_IN_LOWER"),
        (OFFSET_OUT_UPPER, "OFFSET_OUT_UPPER"),
        (OFFSET_OUT_LOWER, "OFFSET_OUT_LOWER"),
        (PITCH_IN, "PITCH_IN"),
        (PITCH_OUT, "PITCH_OUT"),
        (LINE_LENGTH_IN, "LINE_LENGTH_IN"),
        (LINE_COUNT, "LINE_COUNT"),
    ];

    pub fn method_name(mthd: u32) -> Option<&'static str> {
        NAMES.iter().find(|&&(m, _)| m == mthd).map(|&(_, name)| name)
    }
}

// ── Method table ────────────────────────────────────────────────────────────

/// Description of one method or a uniformly strided method array.
#[derive(Debug, Clone, Copy)]
pub struct MethodDesc {
    pub name: &'static str,
    pub base: u32,
    pub count: u32,
    pub stride: u32,
}

const fn single(name: &'static str, base: u32) -> MethodDesc {
    MethodDesc { name, base, count: 1, stride: 4 }
}

const fn array(name: &'static str, base: u32, count: u32, stride: u32) -> MethodDesc {
    MethodDesc { name, base, count, stride }
}

impl MethodDesc {
    /// Element index if `mthd` belongs to this entry.
    pub fn index_of(&self, mthd: u32) -> Option<u32> {
        if mthd < self.base {
            return None;
        }
        let delta = mthd - self.base;
        if delta % self.stride != 0 {
            return None;
        }
        let idx = delta / self.stride;
        (idx < self.count).then_some(idx)
    }

    fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.count).map(move |i| self.base + i * self.stride)
    }
}

/// Every method the encoder emits or decodes by name.
pub static METHOD_TABLE: &[MethodDesc] = &[
    single("SET_OBJECT", SET_OBJECT),
    single("NO_OPERATION", NO_OPERATION),
    single("WAIT_FOR_IDLE", WAIT_FOR_IDLE),
    single("LOAD_MME_INSTRUCTION_RAM_POINTER", LOAD_MME_INSTRUCTION_RAM_POINTER),
    single("LOAD_MME_INSTRUCTION_RAM", LOAD_MME_INSTRUCTION_RAM),
    single("LOAD_MME_START_ADDRESS_RAM_POINTER", LOAD_MME_START_ADDRESS_RAM_POINTER),
    single("LOAD_MME_START_ADDRESS_RAM", LOAD_MME_START_ADDRESS_RAM),
    single("SET_MME_SHADOW_RAM_CONTROL", SET_MME_SHADOW_RAM_CONTROL),
    single("SET_FALCON04", SET_FALCON04),
    single("SET_MME_MEM_ADDRESS_A", SET_MME_MEM_ADDRESS_A),
    single("SET_MME_MEM_ADDRESS_B", SET_MME_MEM_ADDRESS_B),
    single("MME_DMA_READ_FIFOED", MME_DMA_READ_FIFOED),
    array("SET_MME_SHADOW_SCRATCH", set_mme_shadow_scratch(0), 256, 4),
    array("CALL_MME_MACRO", call_mme_macro(0), 128, 8),
    array("CALL_MME_DATA", call_mme_data(0), 128, 8),
    // Draw
    single("BEGIN", BEGIN),
    single("END", END),
    single("SET_VERTEX_ARRAY_START", SET_VERTEX_ARRAY_START),
    single("SET_VERTEX_ARRAY_COUNT", SET_VERTEX_ARRAY_COUNT),
    single("SET_INDEX_BUFFER_A", SET_INDEX_BUFFER_A),
    single("SET_INDEX_BUFFER_B", SET_INDEX_BUFFER_B),
    single("SET_INDEX_BUFFER_C", SET_INDEX_BUFFER_C),
    single("SET_INDEX_BUFFER_D", SET_INDEX_BUFFER_D),
    single("SET_INDEX_BUFFER_E", SET_INDEX_BUFFER_E),
    single("SET_INDEX_BUFFER_F", SET_INDEX_BUFFER_F),
    single("SET_INDEX_BUFFER_G", SET_INDEX_BUFFER_G),
    single("SET_INDEX_BUFFER_SIZE_A", SET_INDEX_BUFFER_SIZE_A),
    single("SET_INDEX_BUFFER_SIZE_B", SET_INDEX_BUFFER_SIZE_B),
    single("SET_GLOBAL_BASE_VERTEX_INDEX", SET_GLOBAL_BASE_VERTEX_INDEX),
    single("SET_GLOBAL_BASE_INSTANCE_INDEX", SET_GLOBAL_BASE_INSTANCE_INDEX),
    single("SET_VERTEX_ID_BASE", SET_VERTEX_ID_BASE),
    single("SET_RT_LAYER", SET_RT_LAYER),
    single("SET_DRAW_AUTO_START", SET_DRAW_AUTO_START),
    single("SET_DRAW_AUTO_STRIDE", SET_DRAW_AUTO_STRIDE),
    single("DRAW_AUTO", DRAW_AUTO),
    // Constant buffers
    single("SET_CONSTANT_BUFFER_SELECTOR_A", SET_CONSTANT_BUFFER_SELECTOR_A),
    single("SET_CONSTANT_BUFFER_SELECTOR_B", SET_CONSTANT_BUFFER_SELECTOR_B),
    single("SET_CONSTANT_BUFFER_SELECTOR_C", SET_CONSTANT_BUFFER_SELECTOR_C),
    single("LOAD_CONSTANT_BUFFER_OFFSET", LOAD_CONSTANT_BUFFER_OFFSET),
    array("LOAD_CONSTANT_BUFFER", load_constant_buffer(0), 16, 4),
    array("BIND_GROUP_CONSTANT_BUFFER", bind_group_constant_buffer(0), 5, 0x20),
    // Depth / stencil
    single("SET_DEPTH_TEST", SET_DEPTH_TEST),
    single("SET_DEPTH_WRITE", SET_DEPTH_WRITE),
    single("SET_DEPTH_FUNC", SET_DEPTH_FUNC),
    single("SET_DEPTH_BOUNDS_TEST", SET_DEPTH_BOUNDS_TEST),
    single("SET_DEPTH_BOUNDS_MIN", SET_DEPTH_BOUNDS_MIN),
    single("SET_DEPTH_BOUNDS_MAX", SET_DEPTH_BOUNDS_MAX),
    single("SET_STENCIL_TEST", SET_STENCIL_TEST),
    single("SET_STENCIL_OP_FAIL", SET_STENCIL_OP_FAIL),
    single("SET_STENCIL_OP_ZFAIL", SET_STENCIL_OP_ZFAIL),
    single("SET_STENCIL_OP_ZPASS", SET_STENCIL_OP_ZPASS),
    single("SET_STENCIL_FUNC", SET_STENCIL_FUNC),
    single("SET_STENCIL_FUNC_REF", SET_STENCIL_FUNC_REF),
    single("SET_STENCIL_FUNC_MASK", SET_STENCIL_FUNC_MASK),
    single("SET_STENCIL_MASK", SET_STENCIL_MASK),
    single("SET_STENCIL_TWO_SIDE", SET_STENCIL_TWO_SIDE),
    single("SET_BACK_STENCIL_OP_FAIL", SET_BACK_STENCIL_OP_FAIL),
    single("SET_BACK_STENCIL_OP_ZFAIL", SET_BACK_STENCIL_OP_ZFAIL),
    single("SET_BACK_STENCIL_OP_ZPASS", SET_BACK_STENCIL_OP_ZPASS),
    single("SET_BACK_STENCIL_FUNC", SET_BACK_STENCIL_FUNC),
    single("SET_BACK_STENCIL_FUNC_REF", SET_BACK_STENCIL_FUNC_REF),
    single("SET_BACK_STENCIL_MASK", SET_BACK_STENCIL_MASK),
    single("SET_BACK_STENCIL_FUNC_MASK", SET_BACK_STENCIL_FUNC_MASK),
    // Blend / colour write
    single("SET_BLEND_CONST_RED", SET_BLEND_CONST_RED),
    single("SET_BLEND_CONST_GREEN", SET_BLEND_CONST_GREEN),
    single("SET_BLEND_CONST_BLUE", SET_BLEND_CONST_BLUE),
    single("SET_BLEND_CONST_ALPHA", SET_BLEND_CONST_ALPHA),
    single("SET_BLEND_STATE_PER_TARGET", SET_BLEND_STATE_PER_TARGET),
    single("SET_LOGIC_OP", SET_LOGIC_OP),
    single("SET_LOGIC_OP_FUNC", SET_LOGIC_OP_FUNC),
    single("SET_SINGLE_CT_WRITE_CONTROL", SET_SINGLE_CT_WRITE_CONTROL),
    single("SET_CT_SELECT", SET_CT_SELECT),
    array("SET_BLEND", set_blend(0), 8, 4),
    array("SET_CT_WRITE", set_ct_write(0), 8, 4),
    array("SET_BLEND_PER_TARGET_SEPARATE_FOR_ALPHA", blend_per_target_separate_for_alpha(0), 8, 0x20),
    array("SET_BLEND_PER_TARGET_COLOR_OP", blend_per_target_color_op(0), 8, 0x20),
    array("SET_BLEND_PER_TARGET_COLOR_SOURCE_COEFF", blend_per_target_color_source_coeff(0), 8, 0x20),
    array("SET_BLEND_PER_TARGET_COLOR_DEST_COEFF", blend_per_target_color_dest_coeff(0), 8, 0x20),
    array("SET_BLEND_PER_TARGET_ALPHA_OP", blend_per_target_alpha_op(0), 8, 0x20),
    array("SET_BLEND_PER_TARGET_ALPHA_SOURCE_COEFF", blend_per_target_alpha_source_coeff(0), 8, 0x20),
    array("SET_BLEND_PER_TARGET_ALPHA_DEST_COEFF", blend_per_target_alpha_dest_coeff(0), 8, 0x20),
    // Rasterisation
    single("OGL_SET_CULL", OGL_SET_CULL),
    single("OGL_SET_FRONT_FACE", OGL_SET_FRONT_FACE),
    single("OGL_SET_CULL_FACE", OGL_SET_CULL_FACE),
    single("SET_FRONT_POLYGON_MODE", SET_FRONT_POLYGON_MODE),
    single("SET_BACK_POLYGON_MODE", SET_BACK_POLYGON_MODE),
    single("SET_LINE_WIDTH_FLOAT", SET_LINE_WIDTH_FLOAT),
    single("SET_ALIASED_LINE_WIDTH_FLOAT", SET_ALIASED_LINE_WIDTH_FLOAT),
    single("SET_ANTI_ALIASED_LINE", SET_ANTI_ALIASED_LINE),
    single("SET_LINE_STIPPLE", SET_LINE_STIPPLE),
    single("SET_LINE_STIPPLE_PARAMETERS", SET_LINE_STIPPLE_PARAMETERS),
    single("SET_DEPTH_BIAS", SET_DEPTH_BIAS),
    single("SET_SLOPE_SCALE_DEPTH_BIAS", SET_SLOPE_SCALE_DEPTH_BIAS),
    single("SET_DEPTH_BIAS_CLAMP", SET_DEPTH_BIAS_CLAMP),
    single("SET_POLY_OFFSET_POINT", SET_POLY_OFFSET_POINT),
    single("SET_POLY_OFFSET_LINE", SET_POLY_OFFSET_LINE),
    single("SET_POLY_OFFSET_FILL", SET_POLY_OFFSET_FILL),
    single("SET_RASTER_ENABLE", SET_RASTER_ENABLE),
    single("SET_RASTER_INPUT", SET_RASTER_INPUT),
    single("SET_PROVOKING_VERTEX", SET_PROVOKING_VERTEX),
    single("SET_DA_PRIMITIVE_RESTART", SET_DA_PRIMITIVE_RESTART),
    single("SET_DA_PRIMITIVE_RESTART_INDEX", SET_DA_PRIMITIVE_RESTART_INDEX),
    single("SET_PATCH", SET_PATCH),
    single("SET_TESSELLATION_PARAMETERS", SET_TESSELLATION_PARAMETERS),
    // Viewport / scissor
    single("SET_VIEWPORT_Z_CLIP", SET_VIEWPORT_Z_CLIP),
    single("SET_VIEWPORT_CLIP_CONTROL", SET_VIEWPORT_CLIP_CONTROL),
    array("SET_VIEWPORT_SCALE_X", set_viewport_scale_x(0), 16, 0x20),
    array("SET_VIEWPORT_SCALE_Y", set_viewport_scale_y(0), 16, 0x20),
    array("SET_VIEWPORT_SCALE_Z", set_viewport_scale_z(0), 16, 0x20),
    array("SET_VIEWPORT_OFFSET_X", set_viewport_offset_x(0), 16, 0x20),
    array("SET_VIEWPORT_OFFSET_Y", set_viewport_offset_y(0), 16, 0x20),
    array("SET_VIEWPORT_OFFSET_Z", set_viewport_offset_z(0), 16, 0x20),
    array("SET_VIEWPORT_COORDINATE_SWIZZLE", set_viewport_coordinate_swizzle(0), 16, 0x20),
    array("SET_VIEWPORT_CLIP_HORIZONTAL", set_viewport_clip_horizontal(0), 16, 0x10),
    array("SET_VIEWPORT_CLIP_VERTICAL", set_viewport_clip_vertical(0), 16, 0x10),
    array("SET_VIEWPORT_CLIP_MIN_Z", set_viewport_clip_min_z(0), 16, 0x10),
    array("SET_VIEWPORT_CLIP_MAX_Z", set_viewport_clip_max_z(0), 16, 0x10),
    array("SET_SCISSOR_ENABLE", set_scissor_enable(0), 16, 0x10),
    array("SET_SCISSOR_HORIZONTAL", set_scissor_horizontal(0), 16, 0x10),
    array("SET_SCISSOR_VERTICAL", set_scissor_vertical(0), 16, 0x10),
    // Vertex input
    array("SET_VERTEX_ATTRIBUTE_A", set_vertex_attribute_a(0), 32, 4),
    array("SET_VERTEX_STREAM_A_FORMAT", set_vertex_stream_a_format(0), 32, 0x10),
    array("SET_VERTEX_STREAM_A_LOCATION_A", set_vertex_stream_a_location_a(0), 32, 0x10),
    array("SET_VERTEX_STREAM_A_LOCATION_B", set_vertex_stream_a_location_b(0), 32, 0x10),
    array("SET_VERTEX_STREAM_A_FREQUENCY", set_vertex_stream_a_frequency(0), 32, 0x10),
    array("SET_VERTEX_STREAM_LIMIT_A_A", set_vertex_stream_limit_a_a(0), 32, 8),
    array("SET_VERTEX_STREAM_LIMIT_A_B", set_vertex_stream_limit_a_b(0), 32, 8),
    array("SET_VERTEX_STREAM_SIZE_A", set_vertex_stream_size_a(0), 32, 8),
    array("SET_VERTEX_STREAM_SIZE_B", set_vertex_stream_size_b(0), 32, 8),
    array("SET_VERTEX_STREAM_INSTANCE_A", set_vertex_stream_instance_a(0), 32, 4),
    // Transform feedback / reports
    single("SET_STREAM_OUTPUT", SET_STREAM_OUTPUT),
    single("SET_REPORT_SEMAPHORE_A", SET_REPORT_SEMAPHORE_A),
    single("SET_REPORT_SEMAPHORE_B", SET_REPORT_SEMAPHORE_B),
    single("SET_REPORT_SEMAPHORE_C", SET_REPORT_SEMAPHORE_C),
    single("SET_REPORT_SEMAPHORE_D", SET_REPORT_SEMAPHORE_D),
    array("SET_STREAM_OUT_BUFFER_ENABLE", set_stream_out_buffer_enable(0), 4, 0x20),
    array("SET_STREAM_OUT_BUFFER_ADDRESS_A", set_stream_out_buffer_address_a(0), 4, 0x20),
    array("SET_STREAM_OUT_BUFFER_ADDRESS_B", set_stream_out_buffer_address_b(0), 4, 0x20),
    array("SET_STREAM_OUT_BUFFER_SIZE", set_stream_out_buffer_size(0), 4, 0x20),
    array("SET_STREAM_OUT_BUFFER_LOAD_WRITE_POINTER", set_stream_out_buffer_load_write_pointer(0), 4, 0x20),
    // Render targets
    single("SET_ZT_A", SET_ZT_A),
    single("SET_ZT_B", SET_ZT_B),
    single("SET_ZT_FORMAT", SET_ZT_FORMAT),
    single("SET_ZT_BLOCK_SIZE", SET_ZT_BLOCK_SIZE),
    single("SET_ZT_ARRAY_PITCH", SET_ZT_ARRAY_PITCH),
    single("SET_SURFACE_CLIP_HORIZONTAL", SET_SURFACE_CLIP_HORIZONTAL),
    single("SET_SURFACE_CLIP_VERTICAL", SET_SURFACE_CLIP_VERTICAL),
    single("SET_ZT_SIZE_A", SET_ZT_SIZE_A),
    single("SET_ZT_SIZE_B", SET_ZT_SIZE_B),
    single("SET_ZT_SIZE_C", SET_ZT_SIZE_C),
    single("SET_ZT_SELECT", SET_ZT_SELECT),
    single("SET_ANTI_ALIAS", SET_ANTI_ALIAS),
    single("SET_RENDER_ENABLE_A", SET_RENDER_ENABLE_A),
    single("SET_RENDER_ENABLE_B", SET_RENDER_ENABLE_B),
    single("SET_RENDER_ENABLE_C", SET_RENDER_ENABLE_C),
    array("SET_COLOR_TARGET_A", set_color_target_a(0), 8, 0x40),
    array("SET_COLOR_TARGET_B", set_color_target_b(0), 8, 0x40),
    array("SET_COLOR_TARGET_WIDTH", set_color_target_width(0), 8, 0x40),
    array("SET_COLOR_TARGET_HEIGHT", set_color_target_height(0), 8, 0x40),
    array("SET_COLOR_TARGET_FORMAT", set_color_target_format(0), 8, 0x40),
    array("SET_COLOR_TARGET_MEMORY", set_color_target_memory(0), 8, 0x40),
    array("SET_COLOR_TARGET_THIRD_DIMENSION", set_color_target_third_dimension(0), 8, 0x40),
    array("SET_COLOR_TARGET_ARRAY_PITCH", set_color_target_array_pitch(0), 8, 0x40),
    array("SET_COLOR_TARGET_LAYER", set_color_target_layer(0), 8, 0x40),
    // Multisample
    single("SET_ANTI_ALIAS_ALPHA_CONTROL", SET_ANTI_ALIAS_ALPHA_CONTROL),
    single("SET_SAMPLE_MASK_X0_Y0", SET_SAMPLE_MASK_X0_Y0),
    single("SET_SAMPLE_MASK_X1_Y0", SET_SAMPLE_MASK_X1_Y0),
    single("SET_SAMPLE_MASK_X0_Y1", SET_SAMPLE_MASK_X0_Y1),
    single("SET_SAMPLE_MASK_X1_Y1", SET_SAMPLE_MASK_X1_Y1),
    array("SET_ANTI_ALIAS_SAMPLE_POSITIONS", set_anti_alias_sample_positions(0), 4, 4),
];

/// Printable name of a method offset, with the array index for arrays.
pub fn method_name(mthd: u32) -> Option<String> {
    METHOD_TABLE.iter().find_map(|desc| {
        desc.index_of(mthd).map(|idx| {
            if desc.count == 1 {
                desc.name.to_string()
            } else {
                format!("{}({})", desc.name, idx)
            }
        })
    })
}

/// Verify the method table: offsets word aligned, no method described twice,
/// every array fitting the header's 13-bit word address.
pub fn self_check() -> Result<(), String> {
    let mut seen: BTreeMap<u32, &'static str> = BTreeMap::new();
    for desc in METHOD_TABLE {
        if desc.base % 4 != 0 || desc.stride % 4 != 0 || desc.stride == 0 {
            return Err(format!("{}: misaligned offset or stride", desc.name));
        }
        for offset in desc.offsets() {
            if offset >> 2 > 0x1FFF {
                return Err(format!("{}: offset 0x{:x} out of range", desc.name, offset));
            }
            if let Some(prev) = seen.insert(offset, desc.name) {
                return Err(format!(
                    "method 0x{:04x} described by both {} and {}",
                    offset, prev, desc.name
                ));
            }
        }
    }
    log::debug!("Method table: {} offsets checked", seen.len());
    Ok(())
}
