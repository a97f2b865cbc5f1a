// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Save and restore around internal operations (clears, blits, resolves)
//! that record their own draws into a user command buffer.

use std::sync::Arc;

use nvcs_common::root::MAX_PUSH_SIZE;
use nvcs_common::types::AddrRange;

use crate::cmd_buffer::CommandBuffer;
use crate::dynamic_state::DynamicGraphicsState;
use crate::heap::GpuHeap;
use crate::pipeline::GraphicsPipeline;

/// User-visible state an internal operation may clobber.
#[derive(Debug, Clone)]
pub struct MetaSave {
    dynamic: DynamicGraphicsState,
    pipeline: Option<Arc<GraphicsPipeline>>,
    vb0: AddrRange,
    push_constants: [u8; MAX_PUSH_SIZE],
    set0: u64,
}

impl MetaSave {
    pub fn vb0(&self) -> AddrRange {
        self.vb0
    }
}

impl<H: GpuHeap> CommandBuffer<H> {
    pub fn meta_begin(&mut self) -> MetaSave {
        let root = &self.descriptors.root;
        let mut push_constants = [0u8; MAX_PUSH_SIZE];
        push_constants.copy_from_slice(root.push_constants());
        log::trace!("CommandBuffer: meta begin, vb0 {:?}", self.vb0);
        MetaSave {
            dynamic: self.dynamic.values().clone(),
            pipeline: self.pipeline.clone(),
            vb0: self.vb0,
            push_constants,
            set0: root.set_addr(0),
        }
    }

    /// Put back everything `save` captured. Dynamic state is re-emitted in
    /// full at the next draw.
    pub fn meta_end(&mut self, save: MetaSave) {
        log::trace!("CommandBuffer: meta end, vb0 {:?}", save.vb0);
        self.dynamic.restore(save.dynamic);
        match save.pipeline {
            Some(pipeline) => self.bind_pipeline(pipeline),
            None => self.pipeline = None,
        }
        self.bind_vertex_buffer(0, save.vb0);

        let root = &mut self.descriptors.root;
        root.set_push_constants(0, &save.push_constants);
        root.set_set_addr(0, save.set0);
        self.descriptors.mark_dirty();
    }
}
