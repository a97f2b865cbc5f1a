// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rendering scopes: colour and depth/stencil target setup.

use ash::vk;

use nvcs_common::error::CmdError;
use nvcs_common::fields::{anti_alias_samples_mode, ct_select, scissor_span, target_memory};
use nvcs_common::fields::{zt_size_c, TargetLayout};
use nvcs_common::methods;
use nvcs_common::types::AddrRange;
use nvcs_mme::MmeScratch;

use crate::cmd_buffer::CommandBuffer;
use crate::dynamic_state::{DynDirty, MAX_TARGETS};
use crate::heap::GpuHeap;

/// An image view already resolved to hardware terms by the image layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageView {
    pub addr: u64,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    /// Layer stride in bytes.
    pub array_pitch: u32,
    /// Colour or depth format as the 3D class encodes it.
    pub hw_format: u32,
    pub layout: TargetLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderingAttachment {
    pub format: vk::Format,
    pub view: Option<ImageView>,
    pub resolve_mode: vk::ResolveModeFlags,
    pub resolve_view: Option<ImageView>,
}

impl RenderingAttachment {
    pub fn new(format: vk::Format, view: ImageView) -> Self {
        Self {
            format,
            view: Some(view),
            resolve_mode: vk::ResolveModeFlags::NONE,
            resolve_view: None,
        }
    }

    fn is_bound(&self) -> bool {
        self.view.is_some() && self.format != vk::Format::UNDEFINED
    }
}

#[derive(Debug, Clone)]
pub struct RenderingInfo {
    pub area: vk::Rect2D,
    pub layer_count: u32,
    /// Non-zero for multiview: one bit per view.
    pub view_mask: u32,
    pub samples: u32,
    pub color: Vec<RenderingAttachment>,
    pub depth: Option<RenderingAttachment>,
    pub stencil: Option<RenderingAttachment>,
}

impl RenderingInfo {
    pub fn has_depth(&self) -> bool {
        self.depth.as_ref().is_some_and(RenderingAttachment::is_bound)
    }

    pub fn has_stencil(&self) -> bool {
        self.stencil.as_ref().is_some_and(RenderingAttachment::is_bound)
    }

    /// View bound as the depth/stencil target.
    fn zeta_view(&self) -> Option<ImageView> {
        [self.depth.as_ref(), self.stencil.as_ref()]
            .into_iter()
            .flatten()
            .filter(|a| a.is_bound())
            .find_map(|a| a.view)
    }
}

/// A multisample resolve left for the meta layer after a rendering scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveRequest {
    pub src: ImageView,
    pub dst: ImageView,
    pub mode: vk::ResolveModeFlags,
    pub aspect: vk::ImageAspectFlags,
    pub area: vk::Rect2D,
}

fn resolve_request(
    att: &RenderingAttachment,
    aspect: vk::ImageAspectFlags,
    area: vk::Rect2D,
) -> Option<ResolveRequest> {
    if att.resolve_mode == vk::ResolveModeFlags::NONE {
        return None;
    }
    Some(ResolveRequest {
        src: att.view?,
        dst: att.resolve_view?,
        mode: att.resolve_mode,
        aspect,
        area,
    })
}

impl<H: GpuHeap> CommandBuffer<H> {
    pub fn begin_rendering(&mut self, info: &RenderingInfo) {
        if self.rendering.is_some() {
            self.set_error(CmdError::InvalidState("nested rendering scope"));
            return;
        }
        assert!(info.color.len() <= MAX_TARGETS, "{} colour targets", info.color.len());
        log::debug!(
            "CommandBuffer: begin rendering, {} colour, depth {}, stencil {}, {}x",
            info.color.len(),
            info.has_depth(),
            info.has_stencil(),
            info.samples
        );

        let x = (info.area.offset.x.max(0) as u32).min(0xFFFF);
        let y = (info.area.offset.y.max(0) as u32).min(0xFFFF);
        let clip = [
            scissor_span(x, x.saturating_add(info.area.extent.width).min(0xFFFF)),
            scissor_span(y, y.saturating_add(info.area.extent.height).min(0xFFFF)),
        ];

        // Colour targets, with a disabled placeholder when there are none so
        // the target select is never empty.
        let targets = info.color.len().max(1);
        let mut writes = Vec::with_capacity(9 * targets + 12);
        for j in 0..targets {
            let t = j as u32;
            match info.color.get(j).filter(|a| a.is_bound()).and_then(|a| a.view) {
                Some(v) => {
                    let range = AddrRange::new(v.addr, 0);
                    writes.extend([
                        (methods::set_color_target_a(t), range.addr_hi()),
                        (methods::set_color_target_b(t), range.addr_lo()),
                        (methods::set_color_target_width(t), v.width),
                        (methods::set_color_target_height(t), v.height),
                        (methods::set_color_target_format(t), v.hw_format),
                        (methods::set_color_target_memory(t), target_memory(v.layout, false)),
                        (methods::set_color_target_third_dimension(t), v.layers),
                        (methods::set_color_target_array_pitch(t), v.array_pitch >> 2),
                        (methods::set_color_target_layer(t), 0),
                    ]);
                }
                None => writes.extend([
                    (methods::set_color_target_a(t), 0),
                    (methods::set_color_target_b(t), 0),
                    (methods::set_color_target_width(t), 64),
                    (methods::set_color_target_height(t), 0),
                    (methods::set_color_target_format(t), 0),
                ]),
            }
        }
        let select: Vec<u32> = (0..targets as u32).collect();
        writes.push((methods::SET_CT_SELECT, ct_select(&select)));

        match info.zeta_view() {
            Some(v) => {
                let range = AddrRange::new(v.addr, 0);
                writes.extend([
                    (methods::SET_ZT_A, range.addr_hi()),
                    (methods::SET_ZT_B, range.addr_lo()),
                    (methods::SET_ZT_FORMAT, v.hw_format),
                    (methods::SET_ZT_BLOCK_SIZE, target_memory(v.layout, false)),
                    (methods::SET_ZT_ARRAY_PITCH, v.array_pitch >> 2),
                    (methods::SET_ZT_SIZE_A, v.width),
                    (methods::SET_ZT_SIZE_B, v.height),
                    (methods::SET_ZT_SIZE_C, zt_size_c(v.layers)),
                    (methods::SET_ZT_SELECT, 1),
                ]);
            }
            None => writes.push((methods::SET_ZT_SELECT, 0)),
        }
        writes.push((methods::SET_ANTI_ALIAS, anti_alias_samples_mode(info.samples)));
        writes.push((MmeScratch::ViewMask.method(), info.view_mask));

        if let Some(p) = self.push(4) {
            p.multi(methods::SET_SURFACE_CLIP_HORIZONTAL, &clip);
        }
        self.emit_writes(&writes);

        self.rendering = Some(info.clone());
        self.dynamic.force_dirty(DynDirty::ATTACHMENT_DEPENDENT);
    }

    /// Close the scope and queue any resolves it asked for.
    pub fn end_rendering(&mut self) {
        let Some(info) = self.rendering.take() else {
            self.set_error(CmdError::InvalidState("end_rendering outside a scope"));
            return;
        };
        if info.view_mask != 0 {
            if let Some(p) = self.push(2) {
                p.immd(MmeScratch::ViewMask.method(), 0);
            }
        }
        let color = info
            .color
            .iter()
            .filter_map(|a| resolve_request(a, vk::ImageAspectFlags::COLOR, info.area));
        let depth = info
            .depth
            .iter()
            .filter_map(|a| resolve_request(a, vk::ImageAspectFlags::DEPTH, info.area));
        let stencil = info
            .stencil
            .iter()
            .filter_map(|a| resolve_request(a, vk::ImageAspectFlags::STENCIL, info.area));
        let before = self.resolves.len();
        self.resolves.extend(color.chain(depth).chain(stencil));
        log::debug!(
            "CommandBuffer: end rendering, {} resolves",
            self.resolves.len() - before
        );
    }

    pub fn view_mask(&self) -> u32 {
        self.rendering.as_ref().map_or(0, |r| r.view_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvcs_common::types::ClassGen;

    use crate::cmd_buffer::testing::*;

    fn view(addr: u64) -> ImageView {
        ImageView {
            addr,
            width: 128,
            height: 64,
            layers: 2,
            array_pitch: 0x8000,
            hw_format: 0xD5,
            layout: TargetLayout::BlockLinear {
                height_log2: 4,
                depth_log2: 0,
            },
        }
    }

    fn info(color: Vec<RenderingAttachment>) -> RenderingInfo {
        RenderingInfo {
            area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: 128,
                    height: 64,
                },
            },
            layer_count: 1,
            view_mask: 0,
            samples: 1,
            color,
            depth: None,
            stencil: None,
        }
    }

    #[test]
    fn test_color_targets() {
        let mut cmd = recorder(ClassGen::Turing);
        let mut unbound = RenderingAttachment::new(vk::Format::UNDEFINED, view(0));
        unbound.view = None;
        cmd.begin_rendering(&info(vec![
            RenderingAttachment::new(vk::Format::R8G8B8A8_UNORM, view(0x3_0000_1000)),
            unbound,
        ]));
        cmd.end_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_color_target_a(0)), 3);
        assert_eq!(replay.reg(methods::set_color_target_b(0)), 0x1000);
        assert_eq!(replay.reg(methods::set_color_target_format(0)), 0xD5);
        assert_eq!(replay.reg(methods::set_color_target_array_pitch(0)), 0x2000);
        assert_eq!(replay.reg(methods::set_color_target_format(1)), 0);
        assert_eq!(replay.reg(methods::SET_CT_SELECT), ct_select(&[0, 1]));
        assert_eq!(replay.reg(methods::SET_ZT_SELECT), 0);
        assert_eq!(replay.reg(methods::SET_SURFACE_CLIP_HORIZONTAL), scissor_span(0, 128));
    }

    #[test]
    fn test_placeholder_without_color() {
        let mut cmd = recorder(ClassGen::Turing);
        let mut i = info(Vec::new());
        i.depth = Some(RenderingAttachment::new(vk::Format::D24_UNORM_S8_UINT, view(0x5000)));
        i.view_mask = 0b11;
        cmd.begin_rendering(&i);
        assert!(cmd.rendering.as_ref().is_some_and(RenderingInfo::has_depth));
        cmd.end_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::SET_CT_SELECT), ct_select(&[0]));
        assert_eq!(replay.reg(methods::set_color_target_format(0)), 0);
        assert_eq!(replay.reg(methods::SET_ZT_SELECT), 1);
        assert_eq!(replay.reg(methods::SET_ZT_B), 0x5000);
        assert_eq!(replay.reg(methods::SET_ZT_SIZE_C), zt_size_c(2));
        assert_eq!(
            replay.values_of(MmeScratch::ViewMask.method()),
            vec![0b11, 0]
        );
    }

    #[test]
    fn test_view_mask_cleared_at_end() {
        let mut cmd = recorder(ClassGen::Turing);
        let mut multiview = info(Vec::new());
        multiview.view_mask = 0b101;
        cmd.begin_rendering(&multiview);
        assert_eq!(cmd.view_mask(), 0b101);
        cmd.end_rendering();
        assert_eq!(cmd.view_mask(), 0);
        cmd.begin_rendering(&info(Vec::new()));
        cmd.end_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(
            replay.values_of(MmeScratch::ViewMask.method()),
            vec![0b101, 0, 0]
        );
    }

    #[test]
    fn test_surface_clip_saturates() {
        let mut cmd = recorder(ClassGen::Turing);
        let mut huge = info(Vec::new());
        huge.area.offset.x = 0x7000;
        huge.area.extent.width = u32::MAX;
        huge.area.extent.height = 0x20000;
        cmd.begin_rendering(&huge);
        cmd.end_rendering();
        let replay = replay(&mut cmd);
        assert_eq!(
            replay.reg(methods::SET_SURFACE_CLIP_HORIZONTAL),
            scissor_span(0x7000, 0xFFFF)
        );
        assert_eq!(
            replay.reg(methods::SET_SURFACE_CLIP_VERTICAL),
            scissor_span(0, 0xFFFF)
        );
    }

    #[test]
    fn test_attachment_states_forced() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.dynamic.take_dirty();
        cmd.begin_rendering(&info(Vec::new()));
        assert_eq!(cmd.dynamic.dirty(), DynDirty::ATTACHMENT_DEPENDENT);
    }

    #[test]
    fn test_resolves_collected() {
        let mut cmd = recorder(ClassGen::Turing);
        let mut att = RenderingAttachment::new(vk::Format::R8G8B8A8_UNORM, view(0x1000));
        att.resolve_mode = vk::ResolveModeFlags::AVERAGE;
        att.resolve_view = Some(view(0x9000));
        let plain = RenderingAttachment::new(vk::Format::R8G8B8A8_UNORM, view(0x2000));
        cmd.begin_rendering(&info(vec![att, plain]));
        cmd.end_rendering();
        assert_eq!(cmd.resolves().len(), 1);
        assert_eq!(cmd.resolves()[0].dst.addr, 0x9000);
        assert_eq!(cmd.resolves()[0].aspect, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_scope_misuse() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.end_rendering();
        assert_eq!(
            cmd.end(),
            Err(CmdError::InvalidState("end_rendering outside a scope"))
        );
    }
}
