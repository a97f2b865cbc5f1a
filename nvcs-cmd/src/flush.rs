// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Dynamic-state flush: one encoder per dirty category.

use ash::vk;

use nvcs_common::fields::{
    self, anti_alias_alpha_control, anti_alias_samples_mode, scissor_span, viewport_clip,
    ClipControl, IndexSize, ZClipRange,
};
use nvcs_common::methods;
use nvcs_common::root::MAX_SAMPLES;
use nvcs_common::types::DeviceInfo;
use nvcs_mme::{MmeProgram, MmeScratch};

use crate::cmd_buffer::CommandBuffer;
use crate::dynamic_state::{DynDirty, DynamicGraphicsState, MAX_TARGETS};
use crate::heap::GpuHeap;
use crate::pipeline::TessParams;
use crate::vk_tables;

/// Everything outside the dynamic values that an encoding depends on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushEnv {
    pub info: DeviceInfo,
    pub has_depth: bool,
    pub has_stencil: bool,
    pub color_count: u32,
    pub samples: u32,
    pub index_size: IndexSize,
    pub write_masks: u32,
    pub tess: Option<TessParams>,
}

type Writes = Vec<(u32, u32)>;
type Encoder = fn(&DynamicGraphicsState, &FlushEnv) -> Writes;

/// Encoders in emission order.
static ENCODERS: &[(DynDirty, Encoder)] = &[
    (DynDirty::IA_PRIMITIVE_RESTART, primitive_restart),
    (DynDirty::TS_PATCH_CONTROL_POINTS, patch_control_points),
    (DynDirty::TS_DOMAIN_ORIGIN, domain_origin),
    (DynDirty::VP_VIEWPORTS, viewports),
    (DynDirty::VP_SCISSORS, scissors),
    (DynDirty::VP_DEPTH_CLIP_NEGATIVE_ONE_TO_ONE, z_clip_range),
    (DynDirty::RS_DEPTH_CLIP_CLAMP, depth_clip_clamp),
    (DynDirty::RS_RASTERIZER_DISCARD, rasterizer_discard),
    (DynDirty::RS_POLYGON_MODE, polygon_mode),
    (DynDirty::RS_CULL_MODE, cull_mode),
    (DynDirty::RS_FRONT_FACE, front_face),
    (DynDirty::RS_PROVOKING_VERTEX, provoking_vertex),
    (DynDirty::RS_DEPTH_BIAS_ENABLE, depth_bias_enable),
    (DynDirty::RS_DEPTH_BIAS_FACTORS, depth_bias_factors),
    (DynDirty::RS_LINE_WIDTH, line_width),
    (DynDirty::RS_LINE_STIPPLE_ENABLE, line_stipple_enable),
    (DynDirty::RS_LINE_STIPPLE, line_stipple),
    (DynDirty::MS_RASTERIZATION_SAMPLES, rasterization_samples),
    (DynDirty::MS_SAMPLE_MASK, sample_mask),
    (DynDirty::MS_ALPHA_CONTROL, alpha_control),
    (DynDirty::MS_SAMPLE_LOCATIONS, sample_locations),
    (DynDirty::DS_DEPTH_TEST_ENABLE, depth_test_enable),
    (DynDirty::DS_DEPTH_WRITE_ENABLE, depth_write_enable),
    (DynDirty::DS_DEPTH_COMPARE_OP, depth_compare_op),
    (DynDirty::DS_DEPTH_BOUNDS_TEST_ENABLE, depth_bounds_test_enable),
    (DynDirty::DS_DEPTH_BOUNDS, depth_bounds),
    (DynDirty::DS_STENCIL_TEST_ENABLE, stencil_test_enable),
    (DynDirty::DS_STENCIL_OP, stencil_op),
    (DynDirty::DS_STENCIL_COMPARE_MASK, stencil_compare_mask),
    (DynDirty::DS_STENCIL_WRITE_MASK, stencil_write_mask),
    (DynDirty::DS_STENCIL_REFERENCE, stencil_reference),
    (DynDirty::CB_LOGIC_OP_ENABLE, logic_op_enable),
    (DynDirty::CB_LOGIC_OP, logic_op),
    (DynDirty::CB_BLEND_ENABLES, blend_enables),
    (DynDirty::CB_BLEND_EQUATIONS, blend_equations),
    (DynDirty::CB_BLEND_CONSTANTS, blend_constants),
    (DynDirty::CB_WRITE_MASKS, write_masks),
];

// ── Input assembly / tessellation ───────────────────────────────────────────

fn primitive_restart(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    vec![
        (methods::SET_DA_PRIMITIVE_RESTART, s.primitive_restart_enable as u32),
        (methods::SET_DA_PRIMITIVE_RESTART_INDEX, env.index_size.restart_index()),
    ]
}

fn patch_control_points(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::SET_PATCH, s.patch_control_points)]
}

const TESS_TRIANGLES_CW: u32 = 2;
const TESS_TRIANGLES_CCW: u32 = 3;

/// A lower-left domain origin flips triangle winding.
fn domain_origin(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    let Some(t) = env.tess else {
        return Vec::new();
    };
    let mut prims = t.output_prims;
    if s.domain_origin == vk::TessellationDomainOrigin::LOWER_LEFT {
        prims = match prims {
            TESS_TRIANGLES_CW => TESS_TRIANGLES_CCW,
            TESS_TRIANGLES_CCW => TESS_TRIANGLES_CW,
            other => other,
        };
    }
    vec![(
        methods::SET_TESSELLATION_PARAMETERS,
        fields::tessellation_parameters(t.domain, t.spacing, prims),
    )]
}

// ── Viewport ────────────────────────────────────────────────────────────────

fn pixel(v: f32) -> u32 {
    v.clamp(0.0, 65535.0) as u32
}

fn viewports(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    let mut w = Vec::new();
    for (j, vp) in s.viewports.iter().enumerate() {
        let j = j as u32;
        let half_w = vp.width * 0.5;
        let half_h = vp.height * 0.5;
        let (scale_z, offset_z) = if s.depth_clip_negative_one_to_one {
            (
                (vp.max_depth - vp.min_depth) * 0.5,
                (vp.max_depth + vp.min_depth) * 0.5,
            )
        } else {
            (vp.max_depth - vp.min_depth, vp.min_depth)
        };
        w.extend([
            (methods::set_viewport_scale_x(j), half_w.to_bits()),
            (methods::set_viewport_scale_y(j), half_h.to_bits()),
            (methods::set_viewport_scale_z(j), scale_z.to_bits()),
            (methods::set_viewport_offset_x(j), (vp.x + half_w).to_bits()),
            (methods::set_viewport_offset_y(j), (vp.y + half_h).to_bits()),
            (methods::set_viewport_offset_z(j), offset_z.to_bits()),
        ]);
        if env.info.has_viewport_swizzle() {
            w.push((
                methods::set_viewport_coordinate_swizzle(j),
                fields::viewport_swizzle_identity(),
            ));
        }

        // Negative extents flip the viewport; the clip box covers both.
        let x0 = pixel(vp.x.min(vp.x + vp.width).floor());
        let x1 = pixel(vp.x.max(vp.x + vp.width).ceil());
        let y0 = pixel(vp.y.min(vp.y + vp.height).floor());
        let y1 = pixel(vp.y.max(vp.y + vp.height).ceil());
        w.extend([
            (methods::set_viewport_clip_horizontal(j), viewport_clip(x0, x1 - x0)),
            (methods::set_viewport_clip_vertical(j), viewport_clip(y0, y1 - y0)),
            (
                methods::set_viewport_clip_min_z(j),
                vp.min_depth.min(vp.max_depth).to_bits(),
            ),
            (
                methods::set_viewport_clip_max_z(j),
                vp.min_depth.max(vp.max_depth).to_bits(),
            ),
        ]);
    }
    w
}

fn scissors(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let mut w = Vec::new();
    for (j, sc) in s.scissors.iter().enumerate() {
        let j = j as u32;
        let x = sc.offset.x.max(0) as u32;
        let y = sc.offset.y.max(0) as u32;
        let x_max = x.saturating_add(sc.extent.width).min(0xFFFF);
        let y_max = y.saturating_add(sc.extent.height).min(0xFFFF);
        w.extend([
            (methods::set_scissor_enable(j), 1),
            (methods::set_scissor_horizontal(j), scissor_span(x, x_max)),
            (methods::set_scissor_vertical(j), scissor_span(y, y_max)),
        ]);
    }
    w
}

fn z_clip_range(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let range = if s.depth_clip_negative_one_to_one {
        ZClipRange::NegativeWToPositiveW
    } else {
        ZClipRange::ZeroToPositiveW
    };
    vec![(methods::SET_VIEWPORT_Z_CLIP, range as u32)]
}

fn depth_clip_clamp(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let clip = s.depth_clip_enable && !s.depth_clamp_enable;
    let control = ClipControl {
        min_z_zero_max_z_one: false,
        pixel_clip_z: clip,
        geometry_guardband: 0,
        line_point_cull_guardband: 0,
        geometry_clip: if clip { 3 } else { 4 },
        geometry_guardband_z: if clip { 0 } else { 2 },
    };
    vec![(
        methods::SET_VIEWPORT_CLIP_CONTROL,
        fields::viewport_clip_control(control),
    )]
}

// ── Rasterizer ──────────────────────────────────────────────────────────────

fn rasterizer_discard(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::SET_RASTER_ENABLE, !s.rasterizer_discard_enable as u32)]
}

fn polygon_mode(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let mode = vk_tables::polygon_mode(s.polygon_mode);
    vec![
        (methods::SET_FRONT_POLYGON_MODE, mode),
        (methods::SET_BACK_POLYGON_MODE, mode),
    ]
}

fn cull_mode(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    match vk_tables::cull_face(s.cull_mode) {
        Some(face) => vec![(methods::OGL_SET_CULL, 1), (methods::OGL_SET_CULL_FACE, face)],
        None => vec![(methods::OGL_SET_CULL, 0)],
    }
}

fn front_face(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::OGL_SET_FRONT_FACE, vk_tables::front_face(s.front_face))]
}

fn provoking_vertex(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let last = s.provoking_vertex == vk::ProvokingVertexModeEXT::LAST_VERTEX;
    vec![(methods::SET_PROVOKING_VERTEX, last as u32)]
}

fn depth_bias_enable(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let e = s.depth_bias_enable as u32;
    vec![
        (methods::SET_POLY_OFFSET_POINT, e),
        (methods::SET_POLY_OFFSET_LINE, e),
        (methods::SET_POLY_OFFSET_FILL, e),
    ]
}

fn depth_bias_factors(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![
        (methods::SET_DEPTH_BIAS, s.depth_bias.constant.to_bits()),
        (methods::SET_SLOPE_SCALE_DEPTH_BIAS, s.depth_bias.slope.to_bits()),
        (methods::SET_DEPTH_BIAS_CLAMP, s.depth_bias.clamp.to_bits()),
    ]
}

fn line_width(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![
        (methods::SET_LINE_WIDTH_FLOAT, s.line_width.to_bits()),
        (methods::SET_ALIASED_LINE_WIDTH_FLOAT, s.line_width.to_bits()),
    ]
}

fn line_stipple_enable(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::SET_LINE_STIPPLE, s.line_stipple_enable as u32)]
}

fn line_stipple(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let params = fields::field(s.line_stipple_factor.saturating_sub(1), 0, 8)
        | fields::field(s.line_stipple_pattern as u32, 8, 16);
    vec![(methods::SET_LINE_STIPPLE_PARAMETERS, params)]
}

// ── Multisample ─────────────────────────────────────────────────────────────

fn rasterization_samples(_: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    vec![(methods::SET_ANTI_ALIAS, anti_alias_samples_mode(env.samples))]
}

fn sample_mask(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let mask = s.sample_mask & 0xFFFF;
    vec![
        (methods::SET_SAMPLE_MASK_X0_Y0, mask),
        (methods::SET_SAMPLE_MASK_X1_Y0, mask),
        (methods::SET_SAMPLE_MASK_X0_Y1, mask),
        (methods::SET_SAMPLE_MASK_X1_Y1, mask),
    ]
}

fn alpha_control(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let control = anti_alias_alpha_control(s.alpha_to_coverage_enable, s.alpha_to_one_enable);
    vec![(methods::SET_ANTI_ALIAS_ALPHA_CONTROL, control)]
}

// Standard sample positions in 1/16 pixel units.
static POSITIONS_1X: [(u8, u8); 1] = [(8, 8)];
static POSITIONS_2X: [(u8, u8); 2] = [(12, 12), (4, 4)];
static POSITIONS_4X: [(u8, u8); 4] = [(6, 2), (14, 6), (2, 10), (10, 14)];
static POSITIONS_8X: [(u8, u8); 8] = [
    (9, 5),
    (7, 11),
    (13, 9),
    (5, 3),
    (3, 13),
    (1, 7),
    (11, 15),
    (15, 1),
];
static POSITIONS_16X: [(u8, u8); 16] = [
    (9, 9),
    (7, 5),
    (5, 10),
    (12, 7),
    (3, 6),
    (10, 13),
    (13, 11),
    (11, 3),
    (6, 14),
    (8, 1),
    (4, 2),
    (2, 12),
    (0, 8),
    (15, 4),
    (14, 15),
    (1, 0),
];

pub fn standard_sample_positions(samples: u32) -> &'static [(u8, u8)] {
    match samples {
        2 => &POSITIONS_2X,
        4 => &POSITIONS_4X,
        8 => &POSITIONS_8X,
        16 => &POSITIONS_16X,
        _ => &POSITIONS_1X,
    }
}

fn sixteenths(v: f32) -> u8 {
    (v * 16.0).clamp(0.0, 15.0) as u8
}

/// Positions for all [`MAX_SAMPLES`] grid entries: the sample count's
/// positions repeated, entry `i` taking sample `i % samples`.
pub fn sample_grid(s: &DynamicGraphicsState, samples: u32) -> [(u8, u8); MAX_SAMPLES] {
    let samples = samples.max(1) as usize;
    let custom: Vec<(u8, u8)>;
    let positions = if s.sample_locations_enable && !s.sample_locations.is_empty() {
        custom = s
            .sample_locations
            .iter()
            .map(|&(x, y)| (sixteenths(x), sixteenths(y)))
            .collect();
        &custom[..]
    } else {
        standard_sample_positions(samples as u32)
    };
    std::array::from_fn(|i| positions[(i % samples) % positions.len()])
}

/// Root-table packing: x in bits 3:0, y in bits 7:4.
pub fn pack_sample_grid(grid: &[(u8, u8); MAX_SAMPLES]) -> [u8; MAX_SAMPLES] {
    (*grid).map(|(x, y)| (x & 0xF) | (y & 0xF) << 4)
}

fn sample_locations(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    if !env.info.has_sample_positions() {
        return Vec::new();
    }
    let grid = sample_grid(s, env.samples);
    (0..MAX_SAMPLES / 4)
        .map(|i| {
            let quad = [grid[4 * i], grid[4 * i + 1], grid[4 * i + 2], grid[4 * i + 3]];
            (
                methods::set_anti_alias_sample_positions(i as u32),
                fields::sample_positions(quad),
            )
        })
        .collect()
}

// ── Depth / stencil ─────────────────────────────────────────────────────────

fn depth_test_enable(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    vec![(methods::SET_DEPTH_TEST, (s.depth_test_enable && env.has_depth) as u32)]
}

fn depth_write_enable(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    vec![(methods::SET_DEPTH_WRITE, (s.depth_write_enable && env.has_depth) as u32)]
}

fn depth_compare_op(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::SET_DEPTH_FUNC, vk_tables::compare_func(s.depth_compare_op))]
}

fn depth_bounds_test_enable(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    let enable = s.depth_bounds_test_enable && env.has_depth;
    vec![(methods::SET_DEPTH_BOUNDS_TEST, enable as u32)]
}

fn depth_bounds(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![
        (methods::SET_DEPTH_BOUNDS_MIN, s.depth_bounds.0.to_bits()),
        (methods::SET_DEPTH_BOUNDS_MAX, s.depth_bounds.1.to_bits()),
    ]
}

fn stencil_test_enable(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    vec![(methods::SET_STENCIL_TEST, (s.stencil_test_enable && env.has_stencil) as u32)]
}

fn stencil_op(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let (f, b) = (&s.stencil_front, &s.stencil_back);
    vec![
        (methods::SET_STENCIL_OP_FAIL, vk_tables::stencil_op(f.fail_op)),
        (methods::SET_STENCIL_OP_ZFAIL, vk_tables::stencil_op(f.depth_fail_op)),
        (methods::SET_STENCIL_OP_ZPASS, vk_tables::stencil_op(f.pass_op)),
        (methods::SET_STENCIL_FUNC, vk_tables::compare_func(f.compare_op)),
        (methods::SET_BACK_STENCIL_OP_FAIL, vk_tables::stencil_op(b.fail_op)),
        (methods::SET_BACK_STENCIL_OP_ZFAIL, vk_tables::stencil_op(b.depth_fail_op)),
        (methods::SET_BACK_STENCIL_OP_ZPASS, vk_tables::stencil_op(b.pass_op)),
        (methods::SET_BACK_STENCIL_FUNC, vk_tables::compare_func(b.compare_op)),
        (methods::SET_STENCIL_TWO_SIDE, 1),
    ]
}

fn stencil_compare_mask(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![
        (methods::SET_STENCIL_FUNC_MASK, s.stencil_front.compare_mask & 0xFF),
        (methods::SET_BACK_STENCIL_FUNC_MASK, s.stencil_back.compare_mask & 0xFF),
    ]
}

fn stencil_write_mask(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![
        (methods::SET_STENCIL_MASK, s.stencil_front.write_mask & 0xFF),
        (methods::SET_BACK_STENCIL_MASK, s.stencil_back.write_mask & 0xFF),
    ]
}

fn stencil_reference(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![
        (methods::SET_STENCIL_FUNC_REF, s.stencil_front.reference & 0xFF),
        (methods::SET_BACK_STENCIL_FUNC_REF, s.stencil_back.reference & 0xFF),
    ]
}

// ── Colour blend ────────────────────────────────────────────────────────────

fn logic_op_enable(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::SET_LOGIC_OP, s.logic_op_enable as u32)]
}

fn logic_op(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    vec![(methods::SET_LOGIC_OP_FUNC, vk_tables::logic_op(s.logic_op))]
}

fn blend_enables(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    (0..MAX_TARGETS as u32)
        .map(|i| (methods::set_blend(i), (s.blend_enables >> i) & 1))
        .collect()
}

fn blend_equations(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let mut w = vec![(methods::SET_BLEND_STATE_PER_TARGET, 1)];
    for (i, eq) in s.blend_equations.iter().enumerate() {
        let i = i as u32;
        w.extend([
            (methods::blend_per_target_separate_for_alpha(i), 1),
            (methods::blend_per_target_color_op(i), vk_tables::blend_op(eq.color_op)),
            (
                methods::blend_per_target_color_source_coeff(i),
                vk_tables::blend_factor(eq.src_color),
            ),
            (
                methods::blend_per_target_color_dest_coeff(i),
                vk_tables::blend_factor(eq.dst_color),
            ),
            (methods::blend_per_target_alpha_op(i), vk_tables::blend_op(eq.alpha_op)),
            (
                methods::blend_per_target_alpha_source_coeff(i),
                vk_tables::blend_factor(eq.src_alpha),
            ),
            (
                methods::blend_per_target_alpha_dest_coeff(i),
                vk_tables::blend_factor(eq.dst_alpha),
            ),
        ]);
    }
    w
}

fn blend_constants(s: &DynamicGraphicsState, _: &FlushEnv) -> Writes {
    let [r, g, b, a] = s.blend_constants;
    vec![
        (methods::SET_BLEND_CONST_RED, r.to_bits()),
        (methods::SET_BLEND_CONST_GREEN, g.to_bits()),
        (methods::SET_BLEND_CONST_BLUE, b.to_bits()),
        (methods::SET_BLEND_CONST_ALPHA, a.to_bits()),
    ]
}

/// Dynamic write-enable nibbles: full mask for enabled targets that exist.
fn dynamic_write_mask(s: &DynamicGraphicsState, env: &FlushEnv) -> u32 {
    (0..env.color_count.min(MAX_TARGETS as u32))
        .filter(|i| (s.color_write_enables >> i) & 1 != 0)
        .fold(0, |mask, i| mask | 0xF << (4 * i))
}

/// Masks go to scratch; the program combines them per target.
fn write_masks(s: &DynamicGraphicsState, env: &FlushEnv) -> Writes {
    vec![
        (MmeScratch::WriteMaskDyn.method(), dynamic_write_mask(s, env)),
        (MmeScratch::WriteMaskPipeline.method(), env.write_masks),
        (MmeProgram::SetWriteMask.call_method(), env.info.max_color_targets),
    ]
}

impl<H: GpuHeap> CommandBuffer<H> {
    pub(crate) fn flush_env(&self) -> FlushEnv {
        let rendering = self.rendering.as_ref();
        let values = self.dynamic.values();
        let samples = if values.rasterization_samples != 0 {
            values.rasterization_samples
        } else {
            rendering.map_or(1, |r| r.samples.max(1))
        };
        FlushEnv {
            info: *self.device.info(),
            has_depth: rendering.is_some_and(|r| r.has_depth()),
            has_stencil: rendering.is_some_and(|r| r.has_stencil()),
            color_count: rendering.map_or(0, |r| r.color.len() as u32),
            samples,
            index_size: self.index.map_or(IndexSize::FourBytes, |i| i.size),
            write_masks: self.pipeline.as_ref().map_or(u32::MAX, |p| p.write_masks),
            tess: self.pipeline.as_ref().and_then(|p| p.tess),
        }
    }

    /// Emit every dirty category whose encoding changed since it was last
    /// emitted.
    pub(crate) fn flush_dynamic_state(&mut self) {
        let dirty = self.dynamic.take_dirty();
        if dirty.is_empty() {
            return;
        }
        let env = self.flush_env();

        let mut writes = Vec::new();
        for &(flag, encode) in ENCODERS {
            if !dirty.contains(flag) {
                continue;
            }
            let encoded = encode(self.dynamic.values(), &env);
            if let Some(w) = self.dynamic.changed(flag, encoded) {
                writes.extend(w);
            }
        }

        // Shaders read sample locations from the root table on every
        // generation.
        if dirty.contains(DynDirty::MS_SAMPLE_LOCATIONS) {
            let grid = sample_grid(self.dynamic.values(), env.samples);
            if self.descriptors.root.set_sample_locations(&pack_sample_grid(&grid)) {
                self.descriptors.mark_dirty();
            }
        }

        log::trace!("Flush: {:?} -> {} writes", dirty, writes.len());
        self.emit_writes(&writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nvcs_common::fields::TargetLayout;
    use nvcs_common::types::ClassGen;

    use crate::cmd_buffer::testing::*;
    use crate::pipeline::GraphicsPipeline;
    use crate::rendering::{ImageView, RenderingAttachment, RenderingInfo};

    fn view() -> ImageView {
        ImageView {
            addr: 0x2_0000_0000,
            width: 64,
            height: 64,
            layers: 1,
            array_pitch: 0,
            hw_format: 0xE9,
            layout: TargetLayout::Pitch,
        }
    }

    fn rendering(colors: usize, depth: bool) -> RenderingInfo {
        RenderingInfo {
            area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: 64,
                    height: 64,
                },
            },
            layer_count: 1,
            view_mask: 0,
            samples: 4,
            color: (0..colors)
                .map(|_| RenderingAttachment::new(vk::Format::R8G8B8A8_UNORM, view()))
                .collect(),
            depth: depth.then(|| RenderingAttachment::new(vk::Format::D32_SFLOAT, view())),
            stencil: None,
        }
    }

    #[test]
    fn test_flush_twice_emits_nothing() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic_state_mut().set_cull_mode(vk::CullModeFlags::BACK);
        cmd.flush_dynamic_state();
        let after_first = emitted_words(&cmd);
        assert!(after_first > 0);
        cmd.flush_dynamic_state();
        assert_eq!(emitted_words(&cmd), after_first);
    }

    #[test]
    fn test_same_value_not_reemitted() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic_state_mut().set_line_width(2.0);
        cmd.flush_dynamic_state();
        let before = emitted_words(&cmd);

        cmd.dynamic_state_mut().set_line_width(2.0);
        cmd.flush_dynamic_state();
        assert_eq!(emitted_words(&cmd), before);

        cmd.dynamic_state_mut().set_line_width(3.0);
        cmd.flush_dynamic_state();
        assert!(emitted_words(&cmd) > before);
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::SET_LINE_WIDTH_FLOAT), 3.0f32.to_bits());
    }

    #[test]
    fn test_depth_forced_off_without_attachment() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic_state_mut().set_depth_test_enable(true);
        cmd.dynamic_state_mut().set_depth_write_enable(true);
        cmd.flush_dynamic_state();
        cmd.begin_rendering(&rendering(1, true));
        cmd.flush_dynamic_state();
        cmd.end_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(replay.values_of(methods::SET_DEPTH_TEST), vec![0, 1]);
        assert_eq!(replay.values_of(methods::SET_DEPTH_WRITE), vec![0, 1]);
    }

    #[test]
    fn test_sample_grid_replicates() {
        let s = DynamicGraphicsState::default();
        let grid = sample_grid(&s, 4);
        for i in 0..MAX_SAMPLES {
            assert_eq!(grid[i], POSITIONS_4X[i % 4]);
        }
        assert_eq!(pack_sample_grid(&grid)[1], 14 | 6 << 4);

        let custom = DynamicGraphicsState {
            sample_locations_enable: true,
            sample_locations: vec![(0.25, 0.75), (0.5, 0.5)],
            ..DynamicGraphicsState::default()
        };
        let grid = sample_grid(&custom, 2);
        assert_eq!(grid[0], (4, 12));
        assert_eq!(grid[3], (8, 8));
    }

    #[test]
    fn test_sample_positions_per_generation() {
        for (gen, writes) in [(ClassGen::MaxwellA, 0), (ClassGen::Turing, 4)] {
            let mut cmd = recorder(gen);
            cmd.begin_rendering(&rendering(1, false));
            cmd.flush_dynamic_state();
            let root = cmd.descriptors.root().sample_locations().to_vec();
            assert_eq!(root, pack_sample_grid(&sample_grid(&Default::default(), 4)).to_vec());
            cmd.end_rendering();
            let replay = replay(&mut cmd);
            let positions: usize = (0..4)
                .map(|i| replay.values_of(methods::set_anti_alias_sample_positions(i)).len())
                .sum();
            assert_eq!(positions, writes);
            assert_eq!(replay.reg(methods::SET_ANTI_ALIAS), anti_alias_samples_mode(4));
        }
    }

    #[test]
    fn test_write_masks_through_program() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.bind_pipeline(Arc::new(GraphicsPipeline {
            write_masks: 0x77,
            ..GraphicsPipeline::default()
        }));
        cmd.begin_rendering(&rendering(2, false));
        cmd.flush_dynamic_state();
        cmd.end_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(MmeScratch::WriteMaskDyn.method()), 0xFF);
        assert_eq!(replay.reg(methods::set_ct_write(0)), 0x0111);
        assert_eq!(replay.reg(methods::set_ct_write(1)), 0x0111);
        assert_eq!(replay.reg(methods::set_ct_write(2)), 0);
        assert!(replay.calls().contains(&(MmeProgram::SetWriteMask.id(), 1)));
    }

    #[test]
    fn test_viewport_encoding() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic_state_mut().set_viewports(
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 50.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        cmd.flush_dynamic_state();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_viewport_scale_x(0)), 50.0f32.to_bits());
        assert_eq!(replay.reg(methods::set_viewport_offset_y(0)), 25.0f32.to_bits());
        assert_eq!(replay.reg(methods::set_viewport_scale_z(0)), 1.0f32.to_bits());
        assert_eq!(replay.reg(methods::set_viewport_clip_horizontal(0)), viewport_clip(0, 100));
        assert_eq!(
            replay.reg(methods::set_viewport_coordinate_swizzle(0)),
            fields::viewport_swizzle_identity()
        );
    }

    #[test]
    fn test_negative_one_to_one_depth() {
        let mut cmd = recorder(ClassGen::Turing);
        let vp = vk::Viewport {
            width: 8.0,
            height: 8.0,
            min_depth: 0.0,
            max_depth: 1.0,
            ..Default::default()
        };
        cmd.dynamic_state_mut().set_viewports(0, &[vp]);
        cmd.dynamic_state_mut().set_depth_clip_negative_one_to_one(true);
        cmd.flush_dynamic_state();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_viewport_scale_z(0)), 0.5f32.to_bits());
        assert_eq!(replay.reg(methods::set_viewport_offset_z(0)), 0.5f32.to_bits());
        assert_eq!(
            replay.reg(methods::SET_VIEWPORT_Z_CLIP),
            ZClipRange::NegativeWToPositiveW as u32
        );
    }

    #[test]
    fn test_cull_encoding() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic_state_mut().set_cull_mode(vk::CullModeFlags::FRONT);
        cmd.dynamic_state_mut().set_front_face(vk::FrontFace::CLOCKWISE);
        cmd.flush_dynamic_state();
        cmd.dynamic_state_mut().set_cull_mode(vk::CullModeFlags::NONE);
        cmd.flush_dynamic_state();
        let replay = replay(&mut cmd);
        assert_eq!(replay.values_of(methods::OGL_SET_CULL), vec![1, 0]);
        assert_eq!(replay.values_of(methods::OGL_SET_CULL_FACE), vec![vk_tables::CULL_FRONT]);
        assert_eq!(replay.reg(methods::OGL_SET_FRONT_FACE), vk_tables::FRONT_FACE_CW);
    }

    #[test]
    fn test_restart_index_follows_index_size() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic_state_mut().set_primitive_restart_enable(true);
        cmd.bind_index_buffer(
            nvcs_common::types::AddrRange::new(0x1000, 64),
            vk::IndexType::UINT16,
        );
        cmd.flush_dynamic_state();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::SET_DA_PRIMITIVE_RESTART), 1);
        assert_eq!(replay.reg(methods::SET_DA_PRIMITIVE_RESTART_INDEX), 0xFFFF);
    }

    #[test]
    fn test_domain_origin_flips_winding() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.bind_pipeline(Arc::new(GraphicsPipeline {
            tess: Some(TessParams {
                domain: 1,
                spacing: 0,
                output_prims: TESS_TRIANGLES_CW,
            }),
            ..GraphicsPipeline::default()
        }));
        cmd.dynamic_state_mut()
            .set_tessellation_domain_origin(vk::TessellationDomainOrigin::LOWER_LEFT);
        cmd.flush_dynamic_state();
        let replay = replay(&mut cmd);
        assert_eq!(
            replay.reg(methods::SET_TESSELLATION_PARAMETERS),
            fields::tessellation_parameters(1, 0, TESS_TRIANGLES_CCW)
        );
    }
}
