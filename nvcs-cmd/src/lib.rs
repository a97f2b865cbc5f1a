// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command recording for the 3D class: push streams, dynamic state,
//! constant-buffer binding and draws.

pub mod cmd_buffer;
pub mod decoder;
pub mod descriptors;
pub mod device;
pub mod draw;
pub mod dynamic_state;
pub mod flush;
pub mod heap;
pub mod meta;
pub mod pipeline;
pub mod push;
pub mod rendering;
pub mod replay;
pub mod vk_tables;
pub mod xfb;

pub use cmd_buffer::CommandBuffer;
pub use device::Device;
pub use heap::{GpuHeap, GpuMemory, HostArena};
pub use push::{PushSegment, PushWriter};
