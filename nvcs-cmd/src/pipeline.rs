// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use nvcs_common::types::{AddrRange, ShaderStage};

/// Where a shader's constant-buffer slot gets its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbufSource {
    /// The root descriptor table. Bound after every other slot.
    Root,
    /// A range the host already knows.
    Range(AddrRange),
    /// A buffer descriptor inside a bound descriptor set, only readable by
    /// the GPU.
    Desc { set: u32, offset: u32 },
}

/// Constant-buffer slots of one stage, indexed by shader slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCbufs {
    pub stage: ShaderStage,
    pub slots: Vec<CbufSource>,
}

/// Tessellator setup baked into the pipeline; the output winding follows the
/// dynamic domain origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TessParams {
    pub domain: u32,
    pub spacing: u32,
    /// Output primitives with an upper-left domain origin.
    pub output_prims: u32,
}

/// The parts of a compiled graphics pipeline the encoder consumes.
#[derive(Debug, Clone, Default)]
pub struct GraphicsPipeline {
    pub cbufs: Vec<StageCbufs>,
    /// Colour write masks, one `rgba` nibble per target.
    pub write_masks: u32,
    pub tess: Option<TessParams>,
    /// Pre-encoded state (shader programs, vertex layout) written on bind.
    pub state: Vec<(u32, u32)>,
}
