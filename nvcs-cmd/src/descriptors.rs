// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Root descriptor table and constant-buffer binding.
//!
//! The root table is a host-side byte image (see `nvcs_common::root` for the
//! layout). A fresh copy is uploaded whenever descriptor state changes, and
//! bound last so that it ends up in the constant-buffer selector that the
//! draw programs patch through `LOAD_CONSTANT_BUFFER`. Uploaded copies are
//! never written again by the host; draws that share one only differ in the
//! fields patched on the GPU.
//!
//! Push descriptor sets are host-side too. Their bytes are uploaded before
//! the root table and their set address points at the upload.

use byteorder::{ByteOrder, LittleEndian};

use nvcs_common::fields::bind_group_cbuf;
use nvcs_common::methods;
use nvcs_common::root::{self, MAX_DYNAMIC_BUFFERS, MAX_PUSH_SIZE, MAX_SAMPLES, MAX_SETS};
use nvcs_common::settings::DebugFlags;
use nvcs_common::types::{AddrRange, ClassGen, MAX_CBUF_SIZE};
use nvcs_mme::MmeProgram;

use crate::cmd_buffer::CommandBuffer;
use crate::heap::GpuHeap;
use crate::pipeline::CbufSource;

/// Words in a buffer descriptor: address lo, address hi, size.
const CBUF_DESC_BYTES: u64 = 12;

/// Bytes of descriptor data in one push descriptor set.
pub const PUSH_DESCRIPTOR_SET_SIZE: usize = 512;

type PushDescriptorSet = Box<[u8; PUSH_DESCRIPTOR_SET_SIZE]>;

#[derive(Clone)]
pub struct RootTable {
    bytes: Box<[u8; root::ROOT_TABLE_SIZE]>,
}

impl Default for RootTable {
    fn default() -> Self {
        Self {
            bytes: Box::new([0u8; root::ROOT_TABLE_SIZE]),
        }
    }
}

impl RootTable {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    pub fn read_u32(&self, offset: u32) -> u32 {
        let o = offset as usize;
        LittleEndian::read_u32(&self.bytes[o..o + 4])
    }

    pub fn read_u64(&self, offset: u32) -> u64 {
        let o = offset as usize;
        LittleEndian::read_u64(&self.bytes[o..o + 8])
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        let o = offset as usize;
        LittleEndian::write_u32(&mut self.bytes[o..o + 4], value);
    }

    fn write_u64(&mut self, offset: u32, value: u64) {
        let o = offset as usize;
        LittleEndian::write_u64(&mut self.bytes[o..o + 8], value);
    }

    pub fn set_root_addr(&mut self, addr: u64) {
        self.write_u64(root::ROOT_DESC_ADDR, addr);
    }

    /// Packed sample locations. Returns whether the table changed.
    pub fn set_sample_locations(&mut self, locations: &[u8; MAX_SAMPLES]) -> bool {
        let o = root::SAMPLE_LOCATIONS as usize;
        let dst = &mut self.bytes[o..o + MAX_SAMPLES];
        if dst == &locations[..] {
            return false;
        }
        dst.copy_from_slice(locations);
        true
    }

    pub fn sample_locations(&self) -> &[u8] {
        let o = root::SAMPLE_LOCATIONS as usize;
        &self.bytes[o..o + MAX_SAMPLES]
    }

    pub fn set_push_constants(&mut self, offset: u32, data: &[u8]) {
        assert!(
            offset as usize + data.len() <= MAX_PUSH_SIZE,
            "push constants {}+{} out of range",
            offset,
            data.len()
        );
        let o = (root::PUSH_CONSTANTS + offset) as usize;
        self.bytes[o..o + data.len()].copy_from_slice(data);
    }

    pub fn push_constants(&self) -> &[u8] {
        let o = root::PUSH_CONSTANTS as usize;
        &self.bytes[o..o + MAX_PUSH_SIZE]
    }

    pub fn set_set_addr(&mut self, set: u32, addr: u64) {
        assert!((set as usize) < MAX_SETS, "descriptor set {}", set);
        self.write_u64(root::SET_ADDRS + 8 * set, addr);
    }

    pub fn set_addr(&self, set: u32) -> u64 {
        assert!((set as usize) < MAX_SETS, "descriptor set {}", set);
        self.read_u64(root::SET_ADDRS + 8 * set)
    }

    pub fn set_dynamic_buffer(&mut self, index: u32, range: AddrRange) {
        assert!((index as usize) < MAX_DYNAMIC_BUFFERS, "dynamic buffer {}", index);
        let o = root::DYNAMIC_BUFFERS + 16 * index;
        self.write_u64(o, range.addr);
        self.write_u32(o + 8, range.range.min(u32::MAX as u64) as u32);
        self.write_u32(o + 12, 0);
    }
}

/// Descriptor-side state of a command buffer.
#[derive(Clone, Default)]
pub struct DescriptorState {
    pub(crate) root: RootTable,
    dirty: bool,
    /// Where the last root table upload landed.
    root_addr: Option<u64>,
    push_sets: [Option<PushDescriptorSet>; MAX_SETS],
    /// One bit per push set written since its last upload.
    push_dirty: u32,
}

impl DescriptorState {
    pub fn new() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    pub fn root(&self) -> &RootTable {
        &self.root
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn root_addr(&self) -> Option<u64> {
        self.root_addr
    }

    pub fn push_set(&self, set: u32) -> Option<&[u8]> {
        self.push_sets.get(set as usize)?.as_deref().map(|d| &d[..])
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Selector size for a direct bind: the range aligned up and clamped.
fn cbuf_size(range: u64, align: u32) -> u32 {
    let size = range.min(MAX_CBUF_SIZE as u64) as u32;
    size.next_multiple_of(align).min(MAX_CBUF_SIZE)
}

impl<H: GpuHeap> CommandBuffer<H> {
    pub fn bind_descriptor_set(&mut self, set: u32, addr: u64) {
        log::trace!("CommandBuffer: set {} at 0x{:X}", set, addr);
        self.descriptors.root.set_set_addr(set, addr);
        self.descriptors.push_dirty &= !(1 << set);
        self.descriptors.mark_dirty();
    }

    /// Write descriptor bytes into push set `set` at `offset`. The set is
    /// uploaded and bound at the next draw.
    pub fn push_descriptor_set(&mut self, set: u32, offset: u32, data: &[u8]) {
        assert!((set as usize) < MAX_SETS, "descriptor set {}", set);
        assert!(
            offset as usize + data.len() <= PUSH_DESCRIPTOR_SET_SIZE,
            "push descriptors {}+{} out of range",
            offset,
            data.len()
        );
        let desc = &mut self.descriptors;
        let push = desc.push_sets[set as usize]
            .get_or_insert_with(|| Box::new([0u8; PUSH_DESCRIPTOR_SET_SIZE]));
        let o = offset as usize;
        push[o..o + data.len()].copy_from_slice(data);
        desc.push_dirty |= 1 << set;
        desc.mark_dirty();
    }

    pub fn push_constants(&mut self, offset: u32, data: &[u8]) {
        self.descriptors.root.set_push_constants(offset, data);
        self.descriptors.mark_dirty();
    }

    pub fn set_dynamic_buffer(&mut self, index: u32, range: AddrRange) {
        self.descriptors.root.set_dynamic_buffer(index, range);
        self.descriptors.mark_dirty();
    }

    /// Bind `range` directly into `slot` of `group`. A null range unbinds.
    fn bind_cbuf_range(&mut self, group: u32, slot: u32, range: AddrRange) {
        let align = self.device.info().min_cbuf_alignment;
        let Some(p) = self.push(6) else {
            return;
        };
        if range.is_null() {
            p.immd(methods::bind_group_constant_buffer(group), bind_group_cbuf(false, slot));
            return;
        }
        p.multi(
            methods::SET_CONSTANT_BUFFER_SELECTOR_A,
            &[cbuf_size(range.range, align), range.addr_hi(), range.addr_lo()],
        );
        p.immd(methods::bind_group_constant_buffer(group), bind_group_cbuf(true, slot));
    }

    /// Bind from the buffer descriptor at `desc_addr`, which only the GPU
    /// can read.
    fn bind_cbuf_desc(&mut self, group: u32, slot: u32, desc_addr: u64) {
        let arg = group | slot << 4;
        let fast = self.device.info().gen >= ClassGen::Turing;
        let Some(p) = self.push(4) else {
            return;
        };
        p.one_inc(MmeProgram::BindCbufDesc.call_method());
        p.data(arg);
        if fast {
            p.data((desc_addr >> 32) as u32);
            p.data(desc_addr as u32);
        } else {
            p.update_count((CBUF_DESC_BYTES / 4) as u32);
            p.push_indirect(desc_addr, CBUF_DESC_BYTES);
        }
    }

    /// Upload every push set written since its last upload and point its
    /// set address at the copy. Returns false once an upload failed.
    fn flush_push_descriptors(&mut self) -> bool {
        let align = self.device.info().min_cbuf_alignment as u64;
        while self.descriptors.push_dirty != 0 {
            let set = self.descriptors.push_dirty.trailing_zeros();
            self.descriptors.push_dirty &= !(1 << set);
            let Some(data) = self.descriptors.push_sets[set as usize].clone() else {
                continue;
            };
            let Some(addr) = self.upload(&data[..], align) else {
                return false;
            };
            log::trace!("CommandBuffer: push set {} at 0x{:X}", set, addr);
            self.descriptors.root.set_set_addr(set, addr);
        }
        true
    }

    fn upload_root(&mut self) -> Option<u64> {
        let align = self.device.info().min_cbuf_alignment as u64;
        let addr = self.upload_alloc(root::ROOT_TABLE_SIZE as u64, align)?;
        self.descriptors.root.set_root_addr(addr);
        self.heap.write(addr, self.descriptors.root.as_bytes());
        self.descriptors.root_addr = Some(addr);
        Some(addr)
    }

    /// Bind every constant-buffer slot of the current pipeline, the root
    /// table last. Runs before a draw when descriptor state changed.
    pub(crate) fn flush_descriptors(&mut self) {
        if !self.descriptors.dirty {
            return;
        }
        let Some(pipeline) = self.pipeline.clone() else {
            return;
        };
        if self.error().is_some() || !self.flush_push_descriptors() {
            return;
        }
        let no_cbuf_mme = self.device.settings().has_debug(DebugFlags::NO_CBUF_MME);

        let mut root_slots = Vec::new();
        for stage in &pipeline.cbufs {
            let group = stage.stage.cbuf_group();
            for (slot, source) in stage.slots.iter().enumerate() {
                let slot = slot as u32;
                match *source {
                    CbufSource::Root => root_slots.push((group, slot)),
                    CbufSource::Range(range) => self.bind_cbuf_range(group, slot, range),
                    CbufSource::Desc { .. } if no_cbuf_mme => {
                        self.bind_cbuf_range(group, slot, AddrRange::NULL)
                    }
                    CbufSource::Desc { set, offset } => {
                        let desc_addr = self.descriptors.root.set_addr(set) + offset as u64;
                        self.bind_cbuf_desc(group, slot, desc_addr);
                    }
                }
            }
        }

        let Some(root_addr) = self.upload_root() else {
            return;
        };
        log::trace!("CommandBuffer: root table at 0x{:X}", root_addr);
        let root_range = AddrRange::new(root_addr, root::ROOT_TABLE_SIZE as u64);
        if let Some(p) = self.push(4 + 2 * root_slots.len()) {
            p.multi(
                methods::SET_CONSTANT_BUFFER_SELECTOR_A,
                &[
                    root::ROOT_TABLE_SIZE as u32,
                    root_range.addr_hi(),
                    root_range.addr_lo(),
                ],
            );
            for &(group, slot) in &root_slots {
                p.immd(methods::bind_group_constant_buffer(group), bind_group_cbuf(true, slot));
            }
        }
        self.descriptors.dirty = false;
    }
}
