// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Dynamic graphics state.
//!
//! Setters store a value and mark its category dirty. At draw time every
//! dirty category is encoded to method writes, and those writes are emitted
//! only if they differ from what was last emitted for the category. Setting
//! a value twice, or back to what the hardware already has, costs nothing.

use std::collections::HashMap;

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Categories of dynamic state, one per group of registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DynDirty: u64 {
        const IA_PRIMITIVE_RESTART              = 1 << 0;
        const TS_PATCH_CONTROL_POINTS           = 1 << 1;
        const TS_DOMAIN_ORIGIN                  = 1 << 2;
        const VP_VIEWPORTS                      = 1 << 3;
        const VP_SCISSORS                       = 1 << 4;
        const VP_DEPTH_CLIP_NEGATIVE_ONE_TO_ONE = 1 << 5;
        const RS_DEPTH_CLIP_CLAMP               = 1 << 6;
        const RS_RASTERIZER_DISCARD             = 1 << 7;
        const RS_POLYGON_MODE                   = 1 << 8;
        const RS_CULL_MODE                      = 1 << 9;
        const RS_FRONT_FACE                     = 1 << 10;
        const RS_PROVOKING_VERTEX               = 1 << 11;
        const RS_DEPTH_BIAS_ENABLE              = 1 << 12;
        const RS_DEPTH_BIAS_FACTORS             = 1 << 13;
        const RS_LINE_WIDTH                     = 1 << 14;
        const RS_LINE_STIPPLE_ENABLE            = 1 << 15;
        const RS_LINE_STIPPLE                   = 1 << 16;
        const MS_RASTERIZATION_SAMPLES          = 1 << 17;
        const MS_SAMPLE_MASK                    = 1 << 18;
        const MS_ALPHA_CONTROL                  = 1 << 19;
        const MS_SAMPLE_LOCATIONS               = 1 << 20;
        const DS_DEPTH_TEST_ENABLE              = 1 << 21;
        const DS_DEPTH_WRITE_ENABLE             = 1 << 22;
        const DS_DEPTH_COMPARE_OP               = 1 << 23;
        const DS_DEPTH_BOUNDS_TEST_ENABLE       = 1 << 24;
        const DS_DEPTH_BOUNDS                   = 1 << 25;
        const DS_STENCIL_TEST_ENABLE            = 1 << 26;
        const DS_STENCIL_OP                     = 1 << 27;
        const DS_STENCIL_COMPARE_MASK           = 1 << 28;
        const DS_STENCIL_WRITE_MASK             = 1 << 29;
        const DS_STENCIL_REFERENCE              = 1 << 30;
        const CB_LOGIC_OP_ENABLE                = 1 << 31;
        const CB_LOGIC_OP                       = 1 << 32;
        const CB_BLEND_ENABLES                  = 1 << 33;
        const CB_BLEND_EQUATIONS                = 1 << 34;
        const CB_BLEND_CONSTANTS                = 1 << 35;
        const CB_WRITE_MASKS                    = 1 << 36;
    }
}

impl DynDirty {
    /// Categories whose encoding depends on the bound attachments.
    pub const ATTACHMENT_DEPENDENT: Self = Self::DS_DEPTH_TEST_ENABLE
        .union(Self::DS_DEPTH_WRITE_ENABLE)
        .union(Self::DS_DEPTH_BOUNDS_TEST_ENABLE)
        .union(Self::DS_STENCIL_TEST_ENABLE)
        .union(Self::MS_RASTERIZATION_SAMPLES)
        .union(Self::MS_SAMPLE_LOCATIONS)
        .union(Self::CB_WRITE_MASKS);
}

pub const MAX_TARGETS: usize = 8;
pub const MAX_VIEWPORTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEquation {
    pub color_op: vk::BlendOp,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
}

impl Default for BlendEquation {
    fn default() -> Self {
        Self {
            color_op: vk::BlendOp::ADD,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilFace {
    pub fail_op: vk::StencilOp,
    pub pass_op: vk::StencilOp,
    pub depth_fail_op: vk::StencilOp,
    pub compare_op: vk::CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            compare_mask: 0xFF,
            write_mask: 0xFF,
            reference: 0,
        }
    }
}

/// Every dynamic value. Copied wholesale by meta save/restore.
#[derive(Debug, Clone)]
pub struct DynamicGraphicsState {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart_enable: bool,

    pub patch_control_points: u32,
    pub domain_origin: vk::TessellationDomainOrigin,

    pub viewports: Vec<vk::Viewport>,
    pub scissors: Vec<vk::Rect2D>,
    pub depth_clip_negative_one_to_one: bool,

    pub depth_clip_enable: bool,
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub provoking_vertex: vk::ProvokingVertexModeEXT,
    pub depth_bias_enable: bool,
    pub depth_bias: DepthBias,
    pub line_width: f32,
    pub line_stipple_enable: bool,
    pub line_stipple_factor: u32,
    pub line_stipple_pattern: u16,

    /// Zero follows the rendering scope's sample count.
    pub rasterization_samples: u32,
    pub sample_mask: u32,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
    pub sample_locations_enable: bool,
    /// Per-sample positions in [0, 1), repeated over the pixel grid.
    pub sample_locations: Vec<(f32, f32)>,

    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub depth_bounds_test_enable: bool,
    pub depth_bounds: (f32, f32),
    pub stencil_test_enable: bool,
    pub stencil_front: StencilFace,
    pub stencil_back: StencilFace,

    pub logic_op_enable: bool,
    pub logic_op: vk::LogicOp,
    /// One bit per target.
    pub color_write_enables: u32,
    /// One bit per target.
    pub blend_enables: u32,
    pub blend_equations: [BlendEquation; MAX_TARGETS],
    pub blend_constants: [f32; 4],
}

impl Default for DynamicGraphicsState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: false,
            patch_control_points: 1,
            domain_origin: vk::TessellationDomainOrigin::UPPER_LEFT,
            viewports: Vec::new(),
            scissors: Vec::new(),
            depth_clip_negative_one_to_one: false,
            depth_clip_enable: true,
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            provoking_vertex: vk::ProvokingVertexModeEXT::FIRST_VERTEX,
            depth_bias_enable: false,
            depth_bias: DepthBias::default(),
            line_width: 1.0,
            line_stipple_enable: false,
            line_stipple_factor: 1,
            line_stipple_pattern: 0xFFFF,
            rasterization_samples: 0,
            sample_mask: 0xFFFF,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
            sample_locations_enable: false,
            sample_locations: Vec::new(),
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: vk::CompareOp::ALWAYS,
            depth_bounds_test_enable: false,
            depth_bounds: (0.0, 1.0),
            stencil_test_enable: false,
            stencil_front: StencilFace::default(),
            stencil_back: StencilFace::default(),
            logic_op_enable: false,
            logic_op: vk::LogicOp::COPY,
            color_write_enables: (1 << MAX_TARGETS) - 1,
            blend_enables: 0,
            blend_equations: [BlendEquation::default(); MAX_TARGETS],
            blend_constants: [0.0; 4],
        }
    }
}

/// Which faces a stencil setter applies to.
fn faces(
    state: &mut DynamicGraphicsState,
    mask: vk::StencilFaceFlags,
    f: impl Fn(&mut StencilFace),
) {
    if mask.contains(vk::StencilFaceFlags::FRONT) {
        f(&mut state.stencil_front);
    }
    if mask.contains(vk::StencilFaceFlags::BACK) {
        f(&mut state.stencil_back);
    }
}

/// Setter for a field that maps to a single category.
macro_rules! setter {
    ($(#[$doc:meta])* $name:ident, $field:ident: $ty:ty, $flag:ident) => {
        $(#[$doc])*
        pub fn $name(&mut self, value: $ty) {
            self.values.$field = value;
            self.dirty |= DynDirty::$flag;
        }
    };
}

#[derive(Debug, Clone)]
pub struct DynamicState {
    values: DynamicGraphicsState,
    dirty: DynDirty,
    /// Encoding last emitted per category, keyed by the category bit.
    emitted: HashMap<u64, Vec<(u32, u32)>>,
}

impl Default for DynamicState {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicState {
    pub fn new() -> Self {
        Self {
            values: DynamicGraphicsState::default(),
            dirty: DynDirty::all(),
            emitted: HashMap::new(),
        }
    }

    pub fn values(&self) -> &DynamicGraphicsState {
        &self.values
    }

    pub fn dirty(&self) -> DynDirty {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self, flags: DynDirty) {
        self.dirty |= flags;
    }

    /// Dirty `flags` and forget what was emitted for them, so the next flush
    /// writes them even if the values are unchanged.
    pub(crate) fn force_dirty(&mut self, flags: DynDirty) {
        self.dirty |= flags;
        for flag in flags.iter() {
            self.emitted.remove(&flag.bits());
        }
    }

    /// Hardware state is unknown: re-emit everything at the next flush.
    pub fn invalidate_all(&mut self) {
        self.dirty = DynDirty::all();
        self.emitted.clear();
    }

    pub(crate) fn take_dirty(&mut self) -> DynDirty {
        std::mem::take(&mut self.dirty)
    }

    /// Remember `writes` as the encoding of `flag`. Returns them if they
    /// differ from what was emitted before.
    pub(crate) fn changed(
        &mut self,
        flag: DynDirty,
        writes: Vec<(u32, u32)>,
    ) -> Option<Vec<(u32, u32)>> {
        match self.emitted.get(&flag.bits()) {
            Some(last) if *last == writes => None,
            _ => {
                self.emitted.insert(flag.bits(), writes.clone());
                Some(writes)
            }
        }
    }

    /// Replace every value, as after a meta operation.
    pub(crate) fn restore(&mut self, values: DynamicGraphicsState) {
        self.values = values;
        self.invalidate_all();
    }

    // ── Input assembly / tessellation ───────────────────────────────────────

    /// Read at draw time; no register of its own.
    pub fn set_primitive_topology(&mut self, topology: vk::PrimitiveTopology) {
        self.values.topology = topology;
    }

    setter!(set_primitive_restart_enable, primitive_restart_enable: bool, IA_PRIMITIVE_RESTART);
    setter!(set_patch_control_points, patch_control_points: u32, TS_PATCH_CONTROL_POINTS);
    setter!(
        set_tessellation_domain_origin,
        domain_origin: vk::TessellationDomainOrigin,
        TS_DOMAIN_ORIGIN
    );

    // ── Viewport ────────────────────────────────────────────────────────────

    pub fn set_viewports(&mut self, first: u32, viewports: &[vk::Viewport]) {
        let end = first as usize + viewports.len();
        assert!(end <= MAX_VIEWPORTS, "viewport {} out of range", end);
        if self.values.viewports.len() < end {
            self.values.viewports.resize(end, vk::Viewport::default());
        }
        self.values.viewports[first as usize..end].copy_from_slice(viewports);
        self.dirty |= DynDirty::VP_VIEWPORTS;
    }

    pub fn set_scissors(&mut self, first: u32, scissors: &[vk::Rect2D]) {
        let end = first as usize + scissors.len();
        assert!(end <= MAX_VIEWPORTS, "scissor {} out of range", end);
        if self.values.scissors.len() < end {
            self.values.scissors.resize(end, vk::Rect2D::default());
        }
        self.values.scissors[first as usize..end].copy_from_slice(scissors);
        self.dirty |= DynDirty::VP_SCISSORS;
    }

    /// The depth range also changes how viewport z is scaled.
    pub fn set_depth_clip_negative_one_to_one(&mut self, enable: bool) {
        self.values.depth_clip_negative_one_to_one = enable;
        self.dirty |= DynDirty::VP_DEPTH_CLIP_NEGATIVE_ONE_TO_ONE | DynDirty::VP_VIEWPORTS;
    }

    // ── Rasterizer ──────────────────────────────────────────────────────────

    setter!(set_depth_clip_enable, depth_clip_enable: bool, RS_DEPTH_CLIP_CLAMP);
    setter!(set_depth_clamp_enable, depth_clamp_enable: bool, RS_DEPTH_CLIP_CLAMP);
    setter!(set_rasterizer_discard_enable, rasterizer_discard_enable: bool, RS_RASTERIZER_DISCARD);
    setter!(set_polygon_mode, polygon_mode: vk::PolygonMode, RS_POLYGON_MODE);
    setter!(set_cull_mode, cull_mode: vk::CullModeFlags, RS_CULL_MODE);
    setter!(set_front_face, front_face: vk::FrontFace, RS_FRONT_FACE);
    setter!(
        set_provoking_vertex,
        provoking_vertex: vk::ProvokingVertexModeEXT,
        RS_PROVOKING_VERTEX
    );
    setter!(set_depth_bias_enable, depth_bias_enable: bool, RS_DEPTH_BIAS_ENABLE);
    setter!(set_depth_bias, depth_bias: DepthBias, RS_DEPTH_BIAS_FACTORS);
    setter!(set_line_width, line_width: f32, RS_LINE_WIDTH);
    setter!(set_line_stipple_enable, line_stipple_enable: bool, RS_LINE_STIPPLE_ENABLE);

    pub fn set_line_stipple(&mut self, factor: u32, pattern: u16) {
        self.values.line_stipple_factor = factor;
        self.values.line_stipple_pattern = pattern;
        self.dirty |= DynDirty::RS_LINE_STIPPLE;
    }

    // ── Multisample ─────────────────────────────────────────────────────────

    pub fn set_rasterization_samples(&mut self, samples: vk::SampleCountFlags) {
        self.values.rasterization_samples = samples.as_raw();
        self.dirty |= DynDirty::MS_RASTERIZATION_SAMPLES | DynDirty::MS_SAMPLE_LOCATIONS;
    }

    setter!(set_sample_mask, sample_mask: u32, MS_SAMPLE_MASK);
    setter!(set_alpha_to_coverage_enable, alpha_to_coverage_enable: bool, MS_ALPHA_CONTROL);
    setter!(set_alpha_to_one_enable, alpha_to_one_enable: bool, MS_ALPHA_CONTROL);
    setter!(set_sample_locations_enable, sample_locations_enable: bool, MS_SAMPLE_LOCATIONS);

    pub fn set_sample_locations(&mut self, locations: &[(f32, f32)]) {
        self.values.sample_locations = locations.to_vec();
        self.dirty |= DynDirty::MS_SAMPLE_LOCATIONS;
    }

    // ── Depth / stencil ─────────────────────────────────────────────────────

    setter!(set_depth_test_enable, depth_test_enable: bool, DS_DEPTH_TEST_ENABLE);
    setter!(set_depth_write_enable, depth_write_enable: bool, DS_DEPTH_WRITE_ENABLE);
    setter!(set_depth_compare_op, depth_compare_op: vk::CompareOp, DS_DEPTH_COMPARE_OP);
    setter!(
        set_depth_bounds_test_enable,
        depth_bounds_test_enable: bool,
        DS_DEPTH_BOUNDS_TEST_ENABLE
    );

    pub fn set_depth_bounds(&mut self, min: f32, max: f32) {
        self.values.depth_bounds = (min, max);
        self.dirty |= DynDirty::DS_DEPTH_BOUNDS;
    }

    setter!(set_stencil_test_enable, stencil_test_enable: bool, DS_STENCIL_TEST_ENABLE);

    pub fn set_stencil_op(
        &mut self,
        face: vk::StencilFaceFlags,
        fail_op: vk::StencilOp,
        pass_op: vk::StencilOp,
        depth_fail_op: vk::StencilOp,
        compare_op: vk::CompareOp,
    ) {
        faces(&mut self.values, face, |s| {
            s.fail_op = fail_op;
            s.pass_op = pass_op;
            s.depth_fail_op = depth_fail_op;
            s.compare_op = compare_op;
        });
        self.dirty |= DynDirty::DS_STENCIL_OP;
    }

    pub fn set_stencil_compare_mask(&mut self, face: vk::StencilFaceFlags, mask: u32) {
        faces(&mut self.values, face, |s| s.compare_mask = mask);
        self.dirty |= DynDirty::DS_STENCIL_COMPARE_MASK;
    }

    pub fn set_stencil_write_mask(&mut self, face: vk::StencilFaceFlags, mask: u32) {
        faces(&mut self.values, face, |s| s.write_mask = mask);
        self.dirty |= DynDirty::DS_STENCIL_WRITE_MASK;
    }

    pub fn set_stencil_reference(&mut self, face: vk::StencilFaceFlags, reference: u32) {
        faces(&mut self.values, face, |s| s.reference = reference);
        self.dirty |= DynDirty::DS_STENCIL_REFERENCE;
    }

    // ── Colour blend ────────────────────────────────────────────────────────

    setter!(set_logic_op_enable, logic_op_enable: bool, CB_LOGIC_OP_ENABLE);
    setter!(set_logic_op, logic_op: vk::LogicOp, CB_LOGIC_OP);
    setter!(
        /// One enable bit per colour target.
        set_color_write_enables, color_write_enables: u32, CB_WRITE_MASKS
    );
    setter!(set_blend_constants, blend_constants: [f32; 4], CB_BLEND_CONSTANTS);

    pub fn set_blend_enable(&mut self, target: u32, enable: bool) {
        assert!((target as usize) < MAX_TARGETS);
        if enable {
            self.values.blend_enables |= 1 << target;
        } else {
            self.values.blend_enables &= !(1 << target);
        }
        self.dirty |= DynDirty::CB_BLEND_ENABLES;
    }

    pub fn set_blend_equation(&mut self, target: u32, equation: BlendEquation) {
        assert!((target as usize) < MAX_TARGETS);
        self.values.blend_equations[target as usize] = equation;
        self.dirty |= DynDirty::CB_BLEND_EQUATIONS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_all_dirty() {
        let s = DynamicState::new();
        assert_eq!(s.dirty(), DynDirty::all());
        assert_eq!(s.values().line_width, 1.0);
    }

    #[test]
    fn test_setter_marks_category() {
        let mut s = DynamicState::new();
        s.take_dirty();
        s.set_cull_mode(vk::CullModeFlags::BACK);
        s.set_stencil_reference(vk::StencilFaceFlags::FRONT_AND_BACK, 3);
        assert_eq!(s.dirty(), DynDirty::RS_CULL_MODE | DynDirty::DS_STENCIL_REFERENCE);
        assert_eq!(s.values().stencil_back.reference, 3);
        assert_eq!(s.take_dirty().bits().count_ones(), 2);
        assert!(s.dirty().is_empty());
    }

    #[test]
    fn test_topology_not_a_category() {
        let mut s = DynamicState::new();
        s.take_dirty();
        s.set_primitive_topology(vk::PrimitiveTopology::LINE_LIST);
        assert!(s.dirty().is_empty());
    }

    #[test]
    fn test_changed_compares_last_emission() {
        let mut s = DynamicState::new();
        let w = vec![(0x1918, 1)];
        assert_eq!(s.changed(DynDirty::RS_CULL_MODE, w.clone()), Some(w.clone()));
        assert_eq!(s.changed(DynDirty::RS_CULL_MODE, w.clone()), None);
        s.force_dirty(DynDirty::RS_CULL_MODE);
        assert_eq!(s.changed(DynDirty::RS_CULL_MODE, w.clone()), Some(w));
    }

    #[test]
    fn test_viewports_grow() {
        let mut s = DynamicState::new();
        let vp = vk::Viewport {
            width: 64.0,
            height: 32.0,
            max_depth: 1.0,
            ..Default::default()
        };
        s.set_viewports(2, &[vp]);
        assert_eq!(s.values().viewports.len(), 3);
        assert_eq!(s.values().viewports[2].width, 64.0);
    }

    #[test]
    fn test_blend_enable_bits() {
        let mut s = DynamicState::new();
        s.set_blend_enable(3, true);
        s.set_blend_enable(1, true);
        s.set_blend_enable(3, false);
        assert_eq!(s.values().blend_enables, 0b10);
    }

    #[test]
    fn test_attachment_dependent_set() {
        assert!(DynDirty::ATTACHMENT_DEPENDENT.contains(DynDirty::CB_WRITE_MASKS));
        assert!(!DynDirty::ATTACHMENT_DEPENDENT.contains(DynDirty::RS_CULL_MODE));
    }
}
