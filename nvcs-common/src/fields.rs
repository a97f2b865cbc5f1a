// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Typed packers for bit-packed method data.
//!
//! Each packer takes named fields and returns the word written to the method.
//! Field widths are checked with `debug_assert!`; values are masked so release
//! builds never bleed into neighbouring fields.

/// Place `value` into a `width`-bit field starting at bit `lo`.
#[inline]
pub fn field(value: u32, lo: u32, width: u32) -> u32 {
    let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    debug_assert!(value & !mask == 0, "value 0x{:x} exceeds {}-bit field", value, width);
    (value & mask) << lo
}

/// Extract a `width`-bit field starting at bit `lo`.
#[inline]
pub fn get_field(word: u32, lo: u32, width: u32) -> u32 {
    let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    (word >> lo) & mask
}

// ── BEGIN ───────────────────────────────────────────────────────────────────

/// Primitive type in `BEGIN` bits [15:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PrimitiveOp {
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
    Quads = 7,
    QuadStrip = 8,
    Polygon = 9,
    LineListAdjacency = 10,
    LineStripAdjacency = 11,
    TriangleListAdjacency = 12,
    TriangleStripAdjacency = 13,
    Patch = 14,
}

impl PrimitiveOp {
    pub fn from_raw(value: u32) -> Self {
        match value & 0xFFFF {
            0 => Self::Points,
            1 => Self::Lines,
            2 => Self::LineLoop,
            3 => Self::LineStrip,
            4 => Self::Triangles,
            5 => Self::TriangleStrip,
            6 => Self::TriangleFan,
            7 => Self::Quads,
            8 => Self::QuadStrip,
            9 => Self::Polygon,
            10 => Self::LineListAdjacency,
            11 => Self::LineStripAdjacency,
            12 => Self::TriangleListAdjacency,
            13 => Self::TriangleStripAdjacency,
            14 => Self::Patch,
            other => {
                log::warn!("Unknown primitive op {}, defaulting to Triangles", other);
                Self::Triangles
            }
        }
    }
}

/// Instance numbering mode in `BEGIN` bits [27:26].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InstanceId {
    First = 0,
    Subsequent = 1,
    Unchanged = 2,
}

impl InstanceId {
    pub fn from_raw(value: u32) -> Self {
        match value & 0x3 {
            0 => Self::First,
            1 => Self::Subsequent,
            _ => Self::Unchanged,
        }
    }
}

pub const BEGIN_INSTANCE_ID_SHIFT: u32 = 26;
pub const BEGIN_INSTANCE_ID_BITS: u32 = 2;

/// `BEGIN`: primitive op, primitive-id reset (bit 24 clear = reset to first),
/// instance numbering and normal split mode.
pub fn begin(op: PrimitiveOp, instance_id: InstanceId) -> u32 {
    field(op as u32, 0, 16)
        | field(0, 24, 1)
        | field(instance_id as u32, BEGIN_INSTANCE_ID_SHIFT, BEGIN_INSTANCE_ID_BITS)
        | field(0, 29, 2)
}

/// Decoded `BEGIN` word.
pub fn unpack_begin(word: u32) -> (PrimitiveOp, InstanceId) {
    (
        PrimitiveOp::from_raw(get_field(word, 0, 16)),
        InstanceId::from_raw(get_field(word, BEGIN_INSTANCE_ID_SHIFT, BEGIN_INSTANCE_ID_BITS)),
    )
}

// ── Constant buffers ────────────────────────────────────────────────────────

/// `BIND_GROUP_CONSTANT_BUFFER`: valid bit and shader slot.
pub fn bind_group_cbuf(valid: bool, shader_slot: u32) -> u32 {
    field(valid as u32, 0, 1) | field(shader_slot, 4, 5)
}

// ── Index buffer ────────────────────────────────────────────────────────────

/// `SET_INDEX_BUFFER_E` index size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IndexSize {
    OneByte = 0,
    TwoBytes = 1,
    FourBytes = 2,
}

impl IndexSize {
    pub fn bytes(self) -> u32 {
        match self {
            Self::OneByte => 1,
            Self::TwoBytes => 2,
            Self::FourBytes => 4,
        }
    }

    /// Primitive-restart index implied by the index size.
    pub fn restart_index(self) -> u32 {
        match self {
            Self::OneByte => 0xFF,
            Self::TwoBytes => 0xFFFF,
            Self::FourBytes => 0xFFFF_FFFF,
        }
    }
}

// ── Viewport / scissor ──────────────────────────────────────────────────────

/// `SET_VIEWPORT_CLIP_HORIZONTAL` / `_VERTICAL`: origin and extent.
pub fn viewport_clip(origin: u32, extent: u32) -> u32 {
    field(origin, 0, 16) | field(extent, 16, 16)
}

/// `SET_SCISSOR_HORIZONTAL` / `_VERTICAL` and surface clip: min and max.
pub fn scissor_span(min: u32, max: u32) -> u32 {
    field(min, 0, 16) | field(max, 16, 16)
}

/// Identity `SET_VIEWPORT_COORDINATE_SWIZZLE` (POS_X, POS_Y, POS_Z, POS_W).
pub fn viewport_swizzle_identity() -> u32 {
    field(0, 0, 3) | field(2, 4, 3) | field(4, 8, 3) | field(6, 12, 3)
}

/// `SET_VIEWPORT_Z_CLIP` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ZClipRange {
    NegativeWToPositiveW = 0,
    ZeroToPositiveW = 1,
}

/// Fields of `SET_VIEWPORT_CLIP_CONTROL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClipControl {
    pub min_z_zero_max_z_one: bool,
    /// Clip (rather than clamp) fragment depth against the viewport range.
    pub pixel_clip_z: bool,
    /// 0 = SCALE_256, 1 = SCALE_1.
    pub geometry_guardband: u32,
    pub line_point_cull_guardband: u32,
    /// 1 = PASSTHRU, 3 = FRUSTUM_XYZ_CLIP, 4 = FRUSTUM_XY_CLIP.
    pub geometry_clip: u32,
    /// 0 = SAME_AS_XY, 2 = SCALE_1.
    pub geometry_guardband_z: u32,
}

pub fn viewport_clip_control(c: ClipControl) -> u32 {
    field(c.min_z_zero_max_z_one as u32, 0, 1)
        | field(c.pixel_clip_z as u32, 1, 1)
        | field(c.pixel_clip_z as u32, 2, 1)
        | field(c.geometry_guardband, 4, 3)
        | field(c.line_point_cull_guardband, 7, 3)
        | field(c.geometry_clip, 11, 3)
        | field(c.geometry_guardband_z, 22, 2)
}

// ── Vertex input ────────────────────────────────────────────────────────────

/// Fields of `SET_VERTEX_ATTRIBUTE_A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexAttribute {
    pub stream: u32,
    pub inactive: bool,
    pub offset: u32,
    pub component_bit_widths: u32,
    pub numerical_type: u32,
    pub swap_r_and_b: bool,
}

pub fn vertex_attribute(a: VertexAttribute) -> u32 {
    field(a.stream, 0, 5)
        | field(a.inactive as u32, 6, 1)
        | field(a.offset, 7, 14)
        | field(a.component_bit_widths, 21, 6)
        | field(a.numerical_type, 27, 3)
        | field(a.swap_r_and_b as u32, 31, 1)
}

/// `SET_VERTEX_STREAM_A_FORMAT`: stride and enable.
pub fn vertex_stream_format(stride: u32, enable: bool) -> u32 {
    field(stride, 0, 12) | field(enable as u32, 12, 1)
}

// ── Tessellation ────────────────────────────────────────────────────────────

/// `SET_TESSELLATION_PARAMETERS`: domain, spacing and output primitives.
pub fn tessellation_parameters(domain: u32, spacing: u32, output_prims: u32) -> u32 {
    field(domain, 0, 2) | field(spacing, 4, 2) | field(output_prims, 8, 2)
}

// ── Colour targets ──────────────────────────────────────────────────────────

/// `SET_CT_WRITE`: one enable per component, spaced four bits apart.
pub fn ct_write(mask: u32) -> u32 {
    field(mask & 1, 0, 1)
        | field((mask >> 1) & 1, 4, 1)
        | field((mask >> 2) & 1, 8, 1)
        | field((mask >> 3) & 1, 12, 1)
}

/// `SET_CT_SELECT`: target count followed by 3-bit target indices.
pub fn ct_select(targets: &[u32]) -> u32 {
    debug_assert!(targets.len() <= 8);
    targets
        .iter()
        .enumerate()
        .fold(field(targets.len() as u32, 0, 4), |acc, (i, &t)| {
            acc | field(t, 4 + 3 * i as u32, 3)
        })
}

/// Block-linear or pitch memory layout of a colour target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLayout {
    BlockLinear { height_log2: u32, depth_log2: u32 },
    Pitch,
}

/// `SET_COLOR_TARGET_MEMORY` and `SET_ZT_BLOCK_SIZE`.
pub fn target_memory(layout: TargetLayout, third_dimension_is_depth: bool) -> u32 {
    let (h, d, pitch) = match layout {
        TargetLayout::BlockLinear { height_log2, depth_log2 } => (height_log2, depth_log2, 0),
        TargetLayout::Pitch => (0, 0, 1),
    };
    field(0, 0, 4)
        | field(h, 4, 4)
        | field(d, 8, 4)
        | field(pitch, 12, 1)
        | field(third_dimension_is_depth as u32, 16, 1)
}

/// `SET_ZT_SIZE_C`: layer count with array semantics.
pub fn zt_size_c(layers: u32) -> u32 {
    field(layers, 0, 16)
}

// ── Multisample ─────────────────────────────────────────────────────────────

/// `SET_ANTI_ALIAS_SAMPLE_POSITIONS`: four (x, y) pairs of 4-bit fixed point.
pub fn sample_positions(pairs: [(u8, u8); 4]) -> u32 {
    pairs.iter().enumerate().fold(0, |acc, (i, &(x, y))| {
        acc | field(x as u32, 8 * i as u32, 4) | field(y as u32, 8 * i as u32 + 4, 4)
    })
}

/// `SET_ANTI_ALIAS_ALPHA_CONTROL`.
pub fn anti_alias_alpha_control(alpha_to_coverage: bool, alpha_to_one: bool) -> u32 {
    field(alpha_to_coverage as u32, 0, 1) | field(alpha_to_one as u32, 4, 1)
}

/// `SET_ANTI_ALIAS` samples mode for a sample count.
pub fn anti_alias_samples_mode(samples: u32) -> u32 {
    match samples {
        0 | 1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        other => {
            log::warn!("Unsupported sample count {}, using 1x", other);
            0
        }
    }
}

// ── Conditional rendering ───────────────────────────────────────────────────

/// `SET_RENDER_ENABLE_C` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RenderEnableMode {
    False = 0,
    True = 1,
    Conditional = 2,
    RenderIfEqual = 3,
    RenderIfNotEqual = 4,
}

// ── Copy engine ─────────────────────────────────────────────────────────────

/// `LAUNCH_DMA` for a pipelined, flushed, multi-line copy between pitch
/// surfaces with no semaphore or interrupt.
pub fn launch_dma_pitch() -> u32 {
    field(1, 0, 2) // pipelined
        | field(1, 2, 1) // flush
        | field(1, 7, 1) // source pitch
        | field(1, 8, 1) // destination pitch
        | field(1, 9, 1) // multi-line
}

// ── Report semaphore ────────────────────────────────────────────────────────

/// `SET_REPORT_SEMAPHORE_D` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReportOperation {
    Release = 0,
    Acquire = 1,
    ReportOnly = 2,
    Trap = 3,
}

/// What a report semaphore writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReportKind {
    /// Write the 32-bit payload in `SET_REPORT_SEMAPHORE_C`.
    Payload = 0,
    /// Write a stream-out byte count.
    StreamingByteCount = 0x1a,
}

/// Pipeline stage a report waits for before sampling its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PipelineLocation {
    None = 0,
    StreamingOutput = 5,
    All = 0xf,
}

/// `SET_REPORT_SEMAPHORE_D`: operation, pipeline location, one-word
/// structure, report kind and sub-report (stream index).
///
/// Counter reports use [`ReportOperation::ReportOnly`]; a release always
/// writes the `SET_REPORT_SEMAPHORE_C` payload.
pub fn report_semaphore_d(
    op: ReportOperation,
    location: PipelineLocation,
    kind: ReportKind,
    sub_report: u32,
) -> u32 {
    field(op as u32, 0, 2)
        | field(sub_report, 5, 3)
        | field(location as u32, 12, 4)
        | field(kind as u32, 23, 5)
        | field(1, 28, 1)
}
