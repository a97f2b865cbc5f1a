// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command buffer: the recording entry point.
//!
//! Encoding is spread over several modules that each add an `impl` block:
//! `descriptors` (constant-buffer binding), `flush` (dynamic state), `draw`,
//! `rendering`, `xfb` and `meta`. This file owns the recording lifecycle,
//! context initialisation and the simple bind commands.
//!
//! Errors are sticky. Once an allocation fails the command buffer drops
//! further writes, and [`CommandBuffer::end`] returns the first error.

use std::sync::Arc;

use ash::vk;

use nvcs_common::error::{CmdError, CmdResult};
use nvcs_common::fields::{launch_dma_pitch, IndexSize, RenderEnableMode};
use nvcs_common::methods;
use nvcs_common::settings::DebugFlags;
use nvcs_common::types::{AddrRange, ClassGen};
use nvcs_mme::{MmeProgram, MmeScratch};

use crate::decoder;
use crate::descriptors::DescriptorState;
use crate::device::Device;
use crate::dynamic_state::{DynDirty, DynamicState};
use crate::heap::GpuHeap;
use crate::pipeline::GraphicsPipeline;
use crate::push::{PushSegment, PushWriter, SUBC_COPY};
use crate::rendering::{RenderingInfo, ResolveRequest};
use crate::vk_tables;

/// Privileged register patched once per context on Maxwell B and later.
const PRIV_REG_SM_DISP_CTRL: u32 = 0x0041_9ba4;
const PRIV_REG_SM_DISP_CTRL_BIT: u32 = 1 << 3;

/// The render-enable predicate must sit at a 64-byte aligned address.
const COND_RENDER_ALIGN: u64 = 64;

/// Whether a `BEGIN` is waiting for its `END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrimitiveState {
    Idle,
    Open,
}

/// Bound index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexBinding {
    pub range: AddrRange,
    pub size: IndexSize,
}

pub struct CommandBuffer<H: GpuHeap> {
    pub(crate) device: Arc<Device>,
    pub(crate) heap: H,
    pub(crate) push: PushWriter,
    error: Option<CmdError>,
    recording: bool,
    pub(crate) primitive: PrimitiveState,

    pub(crate) dynamic: DynamicState,
    pub(crate) pipeline: Option<Arc<GraphicsPipeline>>,
    pub(crate) descriptors: DescriptorState,
    /// Vertex stream 0, shadowed so meta operations can restore it.
    pub(crate) vb0: AddrRange,
    pub(crate) index: Option<IndexBinding>,
    pub(crate) rendering: Option<RenderingInfo>,
    pub(crate) resolves: Vec<ResolveRequest>,
}

impl<H: GpuHeap> CommandBuffer<H> {
    pub fn new(device: Arc<Device>, heap: H) -> Self {
        let push = PushWriter::new(device.settings());
        Self {
            device,
            heap,
            push,
            error: None,
            recording: false,
            primitive: PrimitiveState::Idle,
            dynamic: DynamicState::new(),
            pipeline: None,
            descriptors: DescriptorState::new(),
            vb0: AddrRange::NULL,
            index: None,
            rendering: None,
            resolves: Vec::new(),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut H {
        &mut self.heap
    }

    pub fn push_writer(&self) -> &PushWriter {
        &self.push
    }

    /// Segments closed so far; complete after [`Self::end`].
    pub fn segments(&self) -> &[PushSegment] {
        self.push.segments()
    }

    pub fn unflushed_bytes(&self) -> u64 {
        self.push.unflushed_bytes()
    }

    pub fn error(&self) -> Option<CmdError> {
        self.error
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn dynamic_state(&self) -> &DynamicState {
        &self.dynamic
    }

    /// Dynamic state setters; values reach the hardware at the next draw.
    pub fn dynamic_state_mut(&mut self) -> &mut DynamicState {
        &mut self.dynamic
    }

    /// Resolves collected from finished rendering scopes.
    pub fn resolves(&self) -> &[ResolveRequest] {
        &self.resolves
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    pub fn begin(&mut self) {
        if self.recording {
            self.set_error(CmdError::InvalidState("begin while recording"));
            return;
        }
        self.recording = true;
        self.dynamic.invalidate_all();
        self.descriptors.mark_dirty();
        log::debug!("CommandBuffer: begin");
    }

    /// Close the stream and report the first error hit while recording.
    pub fn end(&mut self) -> CmdResult<()> {
        if !self.recording {
            return Err(CmdError::InvalidState("end without begin"));
        }
        if self.rendering.is_some() {
            self.set_error(CmdError::InvalidState("rendering scope left open"));
        }
        self.recording = false;
        self.push.finish(&mut self.heap);

        log::debug!(
            "CommandBuffer: end, {} segments, {} bytes",
            self.push.segments().len(),
            self.push.unflushed_bytes()
        );
        if self.device.settings().has_debug(DebugFlags::PUSH_DUMP) {
            self.dump_segments();
        }

        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dump_segments(&self) {
        for seg in self.push.segments() {
            match self.push.segment_words(seg) {
                Some(words) => log::info!(
                    "Push segment 0x{:X} +{} words:\n{}",
                    seg.addr,
                    seg.len,
                    decoder::dump(words)
                ),
                None => log::info!("Push segment 0x{:X} +{} words (indirect)", seg.addr, seg.len),
            }
        }
    }

    /// Record `e` unless an error is already recorded.
    pub(crate) fn set_error(&mut self, e: CmdError) {
        if self.error.is_none() {
            log::error!("CommandBuffer: {}", e);
            self.error = Some(e);
        }
    }

    /// Writer with room for `n` words, or `None` once the buffer has failed.
    pub(crate) fn push(&mut self, n: usize) -> Option<&mut PushWriter> {
        if self.error.is_some() {
            return None;
        }
        if !self.recording {
            self.set_error(CmdError::InvalidState("not recording"));
            return None;
        }
        if let Err(e) = self.push.reserve(&mut self.heap, n) {
            self.set_error(e);
            return None;
        }
        Some(&mut self.push)
    }

    /// Upload `data` into GPU memory owned by this recording.
    pub(crate) fn upload(&mut self, data: &[u8], align: u64) -> Option<u64> {
        let addr = self.upload_alloc(data.len() as u64, align)?;
        self.heap.write(addr, data);
        Some(addr)
    }

    /// Upload space the caller fills in itself, or `None` once the buffer has
    /// failed.
    pub(crate) fn upload_alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        if self.error.is_some() {
            return None;
        }
        match self.heap.alloc(size, align) {
            Ok(addr) => Some(addr),
            Err(_) => {
                self.set_error(CmdError::OutOfDeviceMemory);
                None
            }
        }
    }

    /// Emit `(method, value)` pairs, each as an immediate where it fits.
    pub(crate) fn emit_writes(&mut self, writes: &[(u32, u32)]) {
        if writes.is_empty() {
            return;
        }
        if let Some(p) = self.push(2 * writes.len()) {
            for &(method, value) in writes {
                p.immd(method, value);
            }
        }
    }

    // ── Context ─────────────────────────────────────────────────────────────

    /// Bind the 3D class, upload the microprogram image and clear the shared
    /// scratch slots. Runs once per queue context, before any draw.
    pub fn init_context(&mut self) {
        let image = Arc::clone(self.device.image());
        let gen = self.device.info().gen;
        let max = self.push.max_count() as usize;
        log::debug!("CommandBuffer: init context for {:?}", gen);

        if let Some(p) = self.push(6) {
            p.immd(methods::SET_OBJECT, gen.class_id());
            p.immd_on(SUBC_COPY, methods::copy::SET_OBJECT, gen.copy_class_id());
            p.immd(methods::LOAD_MME_START_ADDRESS_RAM_POINTER, 0);
        }
        for starts in image.starts().chunks(max) {
            if let Some(p) = self.push(1 + starts.len()) {
                p.ninc(methods::LOAD_MME_START_ADDRESS_RAM);
                starts.iter().for_each(|&s| p.data(s));
            }
        }

        if let Some(p) = self.push(1) {
            p.immd(methods::LOAD_MME_INSTRUCTION_RAM_POINTER, 0);
        }
        for code in image.code().chunks(max) {
            if let Some(p) = self.push(1 + code.len()) {
                p.ninc(methods::LOAD_MME_INSTRUCTION_RAM);
                code.iter().for_each(|&w| p.data(w));
            }
        }

        let slots = MmeScratch::NUM_SLOTS as usize;
        if let Some(p) = self.push(slots + slots.div_ceil(max)) {
            p.multi(methods::set_mme_shadow_scratch(0), &vec![0; slots]);
        }

        if gen >= ClassGen::MaxwellB {
            if let Some(p) = self.push(4) {
                p.one_inc(MmeProgram::SetPrivReg.call_method());
                p.data(PRIV_REG_SM_DISP_CTRL);
                p.data(PRIV_REG_SM_DISP_CTRL_BIT);
                p.data(PRIV_REG_SM_DISP_CTRL_BIT);
            }
        }

        self.dynamic.invalidate_all();
        self.descriptors.mark_dirty();
    }

    // ── Bind commands ───────────────────────────────────────────────────────

    pub fn bind_pipeline(&mut self, pipeline: Arc<GraphicsPipeline>) {
        log::debug!("CommandBuffer: bind pipeline, {} state words", pipeline.state.len());
        let state = pipeline.state.clone();
        self.emit_writes(&state);
        self.pipeline = Some(pipeline);
        // Write masks and tessellation winding combine pipeline and dynamic
        // values; the constant-buffer layout may have changed.
        self.dynamic
            .mark_dirty(DynDirty::CB_WRITE_MASKS | DynDirty::TS_DOMAIN_ORIGIN);
        self.descriptors.mark_dirty();
    }

    pub fn bind_index_buffer(&mut self, range: AddrRange, index_type: vk::IndexType) {
        let size = vk_tables::index_size(index_type);
        let info = *self.device.info();
        if let Some(p) = self.push(8) {
            p.multi(methods::SET_INDEX_BUFFER_A, &[range.addr_hi(), range.addr_lo()]);
            if info.has_range_size() {
                p.multi(
                    methods::SET_INDEX_BUFFER_SIZE_A,
                    &[(range.range >> 32) as u32, range.range as u32],
                );
            } else {
                let limit = range.limit();
                p.multi(methods::SET_INDEX_BUFFER_C, &[(limit >> 32) as u32, limit as u32]);
            }
            p.immd(methods::SET_INDEX_BUFFER_E, size as u32);
        }
        if self.index.map(|i| i.size) != Some(size) {
            self.dynamic.mark_dirty(DynDirty::IA_PRIMITIVE_RESTART);
        }
        self.index = Some(IndexBinding { range, size });
    }

    /// Program vertex stream `binding`. A null range leaves the stream with
    /// no memory behind it.
    pub fn bind_vertex_buffer(&mut self, binding: u32, range: AddrRange) {
        let info = *self.device.info();
        if let Some(p) = self.push(6) {
            p.multi(
                methods::set_vertex_stream_a_location_a(binding),
                &[range.addr_hi(), range.addr_lo()],
            );
            if info.has_range_size() {
                p.multi(
                    methods::set_vertex_stream_size_a(binding),
                    &[(range.range >> 32) as u32, range.range as u32],
                );
            } else {
                let limit = range.limit();
                p.multi(
                    methods::set_vertex_stream_limit_a_a(binding),
                    &[(limit >> 32) as u32, limit as u32],
                );
            }
        }
        if binding == 0 {
            self.vb0 = range;
        }
    }

    // ── Conditional rendering ───────────────────────────────────────────────

    /// Predicate later draws on the 32-bit value at `addr` being non-zero
    /// (zero when `inverted`). A misaligned predicate is first copied to
    /// aligned upload space by the copy engine.
    pub fn begin_conditional_rendering(&mut self, addr: u64, inverted: bool) {
        let mode = if inverted {
            RenderEnableMode::RenderIfEqual
        } else {
            RenderEnableMode::RenderIfNotEqual
        };

        let mut addr = addr;
        if addr % COND_RENDER_ALIGN != 0 {
            let Some(tmp) = self.upload_alloc(COND_RENDER_ALIGN, COND_RENDER_ALIGN) else {
                return;
            };
            log::trace!("CommandBuffer: predicate 0x{:X} copied to 0x{:X}", addr, tmp);
            let (src, dst) = (AddrRange::new(addr, 4), AddrRange::new(tmp, 4));
            let Some(p) = self.push(12) else {
                return;
            };
            p.multi_on(
                SUBC_COPY,
                methods::copy::OFFSET_IN_UPPER,
                &[src.addr_hi(), src.addr_lo(), dst.addr_hi(), dst.addr_lo(), 4, 4, 4, 1],
            );
            p.immd_on(SUBC_COPY, methods::copy::LAUNCH_DMA, launch_dma_pitch());
            addr = tmp;
        }

        let range = AddrRange::new(addr, 4);
        if let Some(p) = self.push(4) {
            p.multi(
                methods::SET_RENDER_ENABLE_A,
                &[range.addr_hi(), range.addr_lo() & !0xf, mode as u32],
            );
        }
    }

    pub fn end_conditional_rendering(&mut self) {
        if let Some(p) = self.push(4) {
            p.multi(
                methods::SET_RENDER_ENABLE_A,
                &[0, 0, RenderEnableMode::True as u32],
            );
        }
    }
}

/// Helpers shared by the encoder tests: a recording command buffer over a
/// host arena and a replay of what it emitted.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use nvcs_common::settings::Settings;
    use nvcs_common::types::DeviceInfo;

    use crate::decoder::{decode, MethodWrite};
    use crate::heap::HostArena;
    use crate::replay::Replay;

    pub fn device_with(gen: ClassGen, settings: Settings) -> Arc<Device> {
        Device::new(DeviceInfo::new(gen), settings).unwrap()
    }

    /// A command buffer that has begun recording.
    pub fn recorder_with(gen: ClassGen, settings: Settings) -> CommandBuffer<HostArena> {
        let mut cmd = CommandBuffer::new(device_with(gen, settings), HostArena::default());
        cmd.begin();
        cmd
    }

    pub fn recorder(gen: ClassGen) -> CommandBuffer<HostArena> {
        recorder_with(gen, Settings::default())
    }

    /// Close the stream and run it on a class model with the image loaded.
    pub fn replay(cmd: &mut CommandBuffer<HostArena>) -> Replay {
        cmd.end().unwrap();
        let mut replay = Replay::with_image(cmd.device.image());
        replay.run(&cmd.push, &mut cmd.heap).unwrap();
        assert!(!replay.hung());
        replay
    }

    /// Host-emitted writes only (macro calls are not expanded).
    pub fn host_writes(cmd: &mut CommandBuffer<HostArena>) -> Vec<MethodWrite> {
        cmd.push.finish(&mut cmd.heap);
        let mut words = Vec::new();
        for seg in cmd.push.segments() {
            if let Some(w) = cmd.push.segment_words(seg) {
                words.extend_from_slice(w);
            }
        }
        decode(&words).unwrap()
    }

    /// Number of words emitted so far.
    pub fn emitted_words(cmd: &CommandBuffer<HostArena>) -> u64 {
        cmd.push.unflushed_bytes() / 4
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::heap::{GpuMemory, HostArena};
    use nvcs_common::settings::Settings;

    #[test]
    fn test_push_outside_recording_fails() {
        let dev = device_with(ClassGen::Turing, Settings::default());
        let mut cmd = CommandBuffer::new(dev, HostArena::default());
        cmd.bind_vertex_buffer(0, AddrRange::new(0x1000, 64));
        assert_eq!(cmd.error(), Some(CmdError::InvalidState("not recording")));
        assert_eq!(cmd.end(), Err(CmdError::InvalidState("end without begin")));
    }

    #[test]
    fn test_first_error_sticks() {
        let dev = device_with(ClassGen::Turing, Settings::default());
        let mut cmd = CommandBuffer::new(dev, HostArena::new(0x1000, 64));
        cmd.begin();
        cmd.bind_vertex_buffer(0, AddrRange::new(0x1000, 64));
        assert_eq!(cmd.error(), Some(CmdError::OutOfHostMemory));
        cmd.set_error(CmdError::OutOfDeviceMemory);
        assert_eq!(cmd.end(), Err(CmdError::OutOfHostMemory));
    }

    #[test]
    fn test_init_context_uploads_image() {
        for gen in [ClassGen::Pascal, ClassGen::Turing] {
            let mut cmd = recorder(gen);
            cmd.init_context();
            let replay = replay(&mut cmd);
            assert_eq!(replay.reg(methods::SET_OBJECT), gen.class_id());
            assert_eq!(replay.copy_reg(methods::copy::SET_OBJECT), gen.copy_class_id());
            let image = cmd.device().image();
            assert_eq!(
                replay.values_of(methods::LOAD_MME_INSTRUCTION_RAM).len(),
                image.code().len()
            );
            assert_eq!(
                replay.values_of(methods::LOAD_MME_START_ADDRESS_RAM),
                image.starts().to_vec()
            );
            assert_eq!(replay.reg(MmeScratch::ViewMask.method()), 0);
            // The privileged-register handshake ran and was acknowledged.
            assert_eq!(replay.calls(), &[(MmeProgram::SetPrivReg.id(), 3)]);
            assert_eq!(replay.reg(methods::SET_FALCON04), PRIV_REG_SM_DISP_CTRL_BIT);
        }
    }

    #[test]
    fn test_init_context_splits_upload() {
        let settings = Settings {
            max_push_count: 16,
            ..Settings::default()
        };
        let mut cmd = recorder_with(ClassGen::Turing, settings);
        cmd.init_context();
        let replay = replay(&mut cmd);
        let image = cmd.device().image();
        assert_eq!(
            replay.values_of(methods::LOAD_MME_INSTRUCTION_RAM),
            image.code().to_vec()
        );
    }

    #[test]
    fn test_index_buffer_size_or_limit() {
        let range = AddrRange::new(0x2_0000_0000, 0x100);

        let mut cmd = recorder(ClassGen::Turing);
        cmd.bind_index_buffer(range, vk::IndexType::UINT16);
        let turing = replay(&mut cmd);
        assert_eq!(turing.reg(methods::SET_INDEX_BUFFER_A), 2);
        assert_eq!(turing.reg(methods::SET_INDEX_BUFFER_SIZE_B), 0x100);
        assert_eq!(turing.reg(methods::SET_INDEX_BUFFER_E), IndexSize::TwoBytes as u32);

        let mut cmd = recorder(ClassGen::Pascal);
        cmd.bind_index_buffer(range, vk::IndexType::UINT32);
        let pascal = replay(&mut cmd);
        assert_eq!(pascal.reg(methods::SET_INDEX_BUFFER_D), 0xFF);
        assert!(pascal.values_of(methods::SET_INDEX_BUFFER_SIZE_B).is_empty());
    }

    #[test]
    fn test_index_type_change_dirties_restart() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic.take_dirty();
        cmd.bind_index_buffer(AddrRange::new(0x1000, 16), vk::IndexType::UINT16);
        assert!(cmd.dynamic.dirty().contains(DynDirty::IA_PRIMITIVE_RESTART));
        cmd.dynamic.take_dirty();
        cmd.bind_index_buffer(AddrRange::new(0x2000, 16), vk::IndexType::UINT16);
        assert!(cmd.dynamic.dirty().is_empty());
    }

    #[test]
    fn test_vertex_buffer_shadow() {
        let mut cmd = recorder(ClassGen::Pascal);
        let range = AddrRange::new(0x1000, 0x40);
        cmd.bind_vertex_buffer(0, range);
        cmd.bind_vertex_buffer(3, AddrRange::new(0x9000, 0x10));
        assert_eq!(cmd.vb0, range);
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_vertex_stream_limit_a_b(0)), 0x103F);
        assert_eq!(replay.reg(methods::set_vertex_stream_a_location_b(3)), 0x9000);
    }

    #[test]
    fn test_vertex_buffer_from_buffer_ref() {
        use nvcs_common::types::{BufferRef, WHOLE_SIZE};
        let buf = BufferRef::new(0x2_0000_0000, 0x400);
        let mut cmd = recorder(ClassGen::Turing);
        cmd.bind_vertex_buffer(1, buf.addr_range(0x100, WHOLE_SIZE));
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_vertex_stream_a_location_b(1)), 0x100);
        assert_eq!(replay.reg(methods::set_vertex_stream_size_b(1)), 0x300);
    }

    #[test]
    fn test_conditional_rendering_modes() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.begin_conditional_rendering(0x3_0000_0040, true);
        let writes = host_writes(&mut cmd);
        assert!(writes.contains(&decoder::MethodWrite::new(
            methods::SET_RENDER_ENABLE_C,
            RenderEnableMode::RenderIfEqual as u32
        )));
        cmd.end_conditional_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::SET_RENDER_ENABLE_C), RenderEnableMode::True as u32);
        assert_eq!(
            replay.values_of(methods::SET_RENDER_ENABLE_B),
            vec![0x40, 0]
        );
        assert_eq!(replay.copy_launches(), 0);
    }

    #[test]
    fn test_conditional_rendering_unaligned_predicate() {
        let mut cmd = recorder(ClassGen::Turing);
        let pred = 0x3_0000_0044;
        cmd.heap_mut().write_words(pred, &[7]);
        cmd.begin_conditional_rendering(pred, false);
        let replay = replay(&mut cmd);

        assert_eq!(replay.copy_launches(), 1);
        assert_eq!(replay.copy_reg(methods::copy::LAUNCH_DMA), launch_dma_pitch());
        let addr = AddrRange::join_addr(
            replay.reg(methods::SET_RENDER_ENABLE_A),
            replay.reg(methods::SET_RENDER_ENABLE_B),
        );
        assert_eq!(addr % COND_RENDER_ALIGN, 0);
        assert_eq!(cmd.heap().read_words(addr, 1), vec![7]);
        assert_eq!(
            replay.reg(methods::SET_RENDER_ENABLE_C),
            RenderEnableMode::RenderIfNotEqual as u32
        );
    }

    #[test]
    fn test_pipeline_state_emitted_on_bind() {
        let mut cmd = recorder(ClassGen::Turing);
        let pipeline = GraphicsPipeline {
            state: vec![(methods::set_vertex_stream_a_format(0), 0x1010)],
            ..GraphicsPipeline::default()
        };
        cmd.bind_pipeline(Arc::new(pipeline));
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_vertex_stream_a_format(0)), 0x1010);
    }
}
