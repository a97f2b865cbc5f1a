// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Byte layout of the root descriptor table.
//!
//! The root table is a per-draw constant buffer holding draw parameters,
//! sample locations, push constants and descriptor-set addresses. Host code
//! fills it and microprograms patch the draw fields through
//! `LOAD_CONSTANT_BUFFER`, so both sides share these offsets.

/// Constant-buffer slot the root table is bound to in every stage.
pub const ROOT_CBUF_SLOT: u32 = 0;

pub const MAX_SAMPLES: usize = 16;
pub const MAX_PUSH_SIZE: usize = 128;
pub const MAX_SETS: usize = 32;
pub const MAX_DYNAMIC_BUFFERS: usize = 16;

/// Address of the table itself.
pub const ROOT_DESC_ADDR: u32 = 0x00;
pub const DRAW_BASE_VERTEX: u32 = 0x08;
pub const DRAW_BASE_INSTANCE: u32 = 0x0c;
pub const DRAW_ID: u32 = 0x10;
pub const DRAW_VIEW_INDEX: u32 = 0x14;
/// One byte per sample: x in bits 3:0, y in bits 7:4.
pub const SAMPLE_LOCATIONS: u32 = 0x18;
/// One u16 per sample.
pub const SAMPLE_MASKS: u32 = SAMPLE_LOCATIONS + MAX_SAMPLES as u32;
pub const PUSH_CONSTANTS: u32 = 0x50;
/// One u64 address per descriptor set.
pub const SET_ADDRS: u32 = PUSH_CONSTANTS + MAX_PUSH_SIZE as u32;
/// One {u64 addr, u32 size, u32 pad} record per dynamic buffer.
pub const DYNAMIC_BUFFERS: u32 = SET_ADDRS + 8 * MAX_SETS as u32;

pub const ROOT_TABLE_SIZE: usize = 0x300;
