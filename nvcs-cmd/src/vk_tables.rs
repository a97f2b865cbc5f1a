// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Vulkan enum to hardware constant tables.
//!
//! Tables are indexed by the Vulkan raw value. Values outside a table are
//! logged and mapped to a fallback.

use ash::vk;

use nvcs_common::fields::{IndexSize, PrimitiveOp};

static PRIMITIVE_OPS: [PrimitiveOp; 11] = [
    PrimitiveOp::Points,
    PrimitiveOp::Lines,
    PrimitiveOp::LineStrip,
    PrimitiveOp::Triangles,
    PrimitiveOp::TriangleStrip,
    PrimitiveOp::TriangleFan,
    PrimitiveOp::LineListAdjacency,
    PrimitiveOp::LineStripAdjacency,
    PrimitiveOp::TriangleListAdjacency,
    PrimitiveOp::TriangleStripAdjacency,
    PrimitiveOp::Patch,
];

// GL-style values accepted by the OGL_* and SET_*_FUNC methods.
static COMPARE_FUNCS: [u32; 8] = [0x200, 0x201, 0x202, 0x203, 0x204, 0x205, 0x206, 0x207];

static STENCIL_OPS: [u32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

static LOGIC_OPS: [u32; 16] = [
    0x1500, 0x1501, 0x1502, 0x1503, 0x1504, 0x1505, 0x1506, 0x1507, 0x1508, 0x1509, 0x150A,
    0x150B, 0x150C, 0x150D, 0x150E, 0x150F,
];

static POLYGON_MODES: [u32; 3] = [0x1B02, 0x1B01, 0x1B00];

static BLEND_OPS: [u32; 5] = [0x8006, 0x800A, 0x800B, 0x8007, 0x8008];

static BLEND_FACTORS: [u32; 19] = [
    0x4000, // ZERO
    0x4001, // ONE
    0x4300, // SRC_COLOR
    0x4301, // ONE_MINUS_SRC_COLOR
    0x4306, // DST_COLOR
    0x4307, // ONE_MINUS_DST_COLOR
    0x4302, // SRC_ALPHA
    0x4303, // ONE_MINUS_SRC_ALPHA
    0x4304, // DST_ALPHA
    0x4305, // ONE_MINUS_DST_ALPHA
    0xC001, // CONSTANT_COLOR
    0xC002, // ONE_MINUS_CONSTANT_COLOR
    0xC003, // CONSTANT_ALPHA
    0xC004, // ONE_MINUS_CONSTANT_ALPHA
    0x4308, // SRC_ALPHA_SATURATE
    0xC900, // SRC1_COLOR
    0xC901, // ONE_MINUS_SRC1_COLOR
    0xC902, // SRC1_ALPHA
    0xC903, // ONE_MINUS_SRC1_ALPHA
];

pub const CULL_FRONT: u32 = 0x0404;
pub const CULL_BACK: u32 = 0x0405;
pub const CULL_FRONT_AND_BACK: u32 = 0x0408;

pub const FRONT_FACE_CW: u32 = 0x0900;
pub const FRONT_FACE_CCW: u32 = 0x0901;

fn lookup<T: Copy>(table: &[T], raw: i32, what: &str, fallback: T) -> T {
    usize::try_from(raw)
        .ok()
        .and_then(|i| table.get(i).copied())
        .unwrap_or_else(|| {
            log::warn!("Unknown {} {}, using fallback", what, raw);
            fallback
        })
}

pub fn primitive_op(topology: vk::PrimitiveTopology) -> PrimitiveOp {
    lookup(&PRIMITIVE_OPS, topology.as_raw(), "primitive topology", PrimitiveOp::Triangles)
}

pub fn compare_func(op: vk::CompareOp) -> u32 {
    lookup(&COMPARE_FUNCS, op.as_raw(), "compare op", COMPARE_FUNCS[7])
}

pub fn stencil_op(op: vk::StencilOp) -> u32 {
    lookup(&STENCIL_OPS, op.as_raw(), "stencil op", STENCIL_OPS[0])
}

pub fn logic_op(op: vk::LogicOp) -> u32 {
    lookup(&LOGIC_OPS, op.as_raw(), "logic op", LOGIC_OPS[3])
}

pub fn polygon_mode(mode: vk::PolygonMode) -> u32 {
    lookup(&POLYGON_MODES, mode.as_raw(), "polygon mode", POLYGON_MODES[0])
}

pub fn blend_op(op: vk::BlendOp) -> u32 {
    lookup(&BLEND_OPS, op.as_raw(), "blend op", BLEND_OPS[0])
}

pub fn blend_factor(factor: vk::BlendFactor) -> u32 {
    lookup(&BLEND_FACTORS, factor.as_raw(), "blend factor", BLEND_FACTORS[1])
}

pub fn front_face(face: vk::FrontFace) -> u32 {
    if face == vk::FrontFace::CLOCKWISE {
        FRONT_FACE_CW
    } else {
        FRONT_FACE_CCW
    }
}

/// Face to cull, or `None` when culling is off.
pub fn cull_face(mode: vk::CullModeFlags) -> Option<u32> {
    match mode {
        vk::CullModeFlags::FRONT => Some(CULL_FRONT),
        vk::CullModeFlags::BACK => Some(CULL_BACK),
        vk::CullModeFlags::FRONT_AND_BACK => Some(CULL_FRONT_AND_BACK),
        _ => None,
    }
}

pub fn index_size(index_type: vk::IndexType) -> IndexSize {
    match index_type {
        vk::IndexType::UINT8_EXT => IndexSize::OneByte,
        vk::IndexType::UINT16 => IndexSize::TwoBytes,
        vk::IndexType::UINT32 => IndexSize::FourBytes,
        other => panic!("invalid index type {:?}", other),
    }
}

fn check_distinct(name: &str, table: &[u32]) -> Result<(), String> {
    for (i, a) in table.iter().enumerate() {
        if table[i + 1..].contains(a) {
            return Err(format!("{}: value 0x{:x} appears twice", name, a));
        }
    }
    Ok(())
}

/// Verify table sizes against the Vulkan enums and that no two entries
/// collide.
pub fn self_check() -> Result<(), String> {
    let sizes = [
        ("primitive ops", PRIMITIVE_OPS.len(), vk::PrimitiveTopology::PATCH_LIST.as_raw()),
        ("compare funcs", COMPARE_FUNCS.len(), vk::CompareOp::ALWAYS.as_raw()),
        ("stencil ops", STENCIL_OPS.len(), vk::StencilOp::DECREMENT_AND_WRAP.as_raw()),
        ("logic ops", LOGIC_OPS.len(), vk::LogicOp::SET.as_raw()),
        ("polygon modes", POLYGON_MODES.len(), vk::PolygonMode::POINT.as_raw()),
        ("blend ops", BLEND_OPS.len(), vk::BlendOp::MAX.as_raw()),
        ("blend factors", BLEND_FACTORS.len(), vk::BlendFactor::ONE_MINUS_SRC1_ALPHA.as_raw()),
    ];
    for (name, len, last) in sizes {
        if len != last as usize + 1 {
            return Err(format!("{}: {} entries for {} values", name, len, last + 1));
        }
    }

    check_distinct("compare funcs", &COMPARE_FUNCS)?;
    check_distinct("stencil ops", &STENCIL_OPS)?;
    check_distinct("logic ops", &LOGIC_OPS)?;
    check_distinct("polygon modes", &POLYGON_MODES)?;
    check_distinct("blend ops", &BLEND_OPS)?;
    check_distinct("blend factors", &BLEND_FACTORS)?;
    Ok(())
}
