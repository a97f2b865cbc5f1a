// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transform feedback: stream-out buffers, their counters and draws by
//! captured byte count.
//!
//! Counter buffers hold the byte offset a stream stopped at. Loading one
//! back needs its value on the GPU, so it goes through a program; before
//! Turing the counter word is spliced into the call from memory.

use nvcs_common::fields::{report_semaphore_d, PipelineLocation, ReportKind, ReportOperation};
use nvcs_common::methods;
use nvcs_common::types::AddrRange;
use nvcs_mme::MmeProgram;

use crate::cmd_buffer::CommandBuffer;
use crate::heap::GpuHeap;

/// Stream-out buffers the class exposes.
pub const MAX_XFB_BUFFERS: u32 = 4;

/// Words between consecutive stream-out buffer register blocks.
const XFB_BUFFER_STRIDE_WORDS: u32 = 8;

impl<H: GpuHeap> CommandBuffer<H> {
    /// Bind `buffers` starting at stream-out buffer `first`. Null ranges
    /// disable their buffer.
    pub fn bind_transform_feedback_buffers(&mut self, first: u32, buffers: &[AddrRange]) {
        assert!(first + buffers.len() as u32 <= MAX_XFB_BUFFERS);
        for (j, range) in (first..).zip(buffers) {
            let Some(p) = self.push(6) else {
                return;
            };
            if range.is_null() {
                p.immd(methods::set_stream_out_buffer_enable(j), 0);
                continue;
            }
            p.multi(
                methods::set_stream_out_buffer_enable(j),
                &[1, range.addr_hi(), range.addr_lo(), range.range as u32],
            );
        }
    }

    /// Enable stream output and load write pointers. Every buffer starts at
    /// zero; `counters[i]` then reloads buffer `first + i` from its counter.
    pub fn begin_transform_feedback(&mut self, first: u32, counters: &[Option<u64>]) {
        assert!(first + counters.len() as u32 <= MAX_XFB_BUFFERS);
        let fast = self.device.info().has_fast_indirect_loads;
        log::debug!("CommandBuffer: begin transform feedback, {} counters", counters.len());

        if let Some(p) = self.push(2 + 2 * MAX_XFB_BUFFERS as usize) {
            p.immd(methods::SET_STREAM_OUTPUT, 1);
            for j in 0..MAX_XFB_BUFFERS {
                p.immd(methods::set_stream_out_buffer_load_write_pointer(j), 0);
            }
        }
        for (j, counter) in (first..).zip(counters) {
            let Some(addr) = *counter else {
                continue;
            };
            let Some(p) = self.push(4) else {
                return;
            };
            p.one_inc(MmeProgram::XfbCounterLoad.call_method());
            p.data(j * XFB_BUFFER_STRIDE_WORDS);
            if fast {
                p.data((addr >> 32) as u32);
                p.data(addr as u32);
            } else {
                p.update_count(1);
                p.push_indirect(addr, 4);
            }
        }
    }

    /// Disable stream output and write each buffer's byte count to its
    /// counter.
    pub fn end_transform_feedback(&mut self, first: u32, counters: &[Option<u64>]) {
        assert!(first + counters.len() as u32 <= MAX_XFB_BUFFERS);
        if let Some(p) = self.push(2) {
            p.immd(methods::SET_STREAM_OUTPUT, 0);
        }
        for (j, counter) in (first..).zip(counters) {
            let Some(addr) = *counter else {
                continue;
            };
            let range = AddrRange::new(addr, 4);
            let d = report_semaphore_d(
                ReportOperation::ReportOnly,
                PipelineLocation::StreamingOutput,
                ReportKind::StreamingByteCount,
                j,
            );
            if let Some(p) = self.push(5) {
                p.multi(
                    methods::SET_REPORT_SEMAPHORE_A,
                    &[range.addr_hi(), range.addr_lo(), 0, d],
                );
            }
        }
        log::debug!("CommandBuffer: end transform feedback");
    }

    /// Draw the vertices a stream captured: the count is the counter's byte
    /// count, less `counter_offset`, over `vertex_stride`.
    pub fn draw_indirect_byte_count(
        &mut self,
        instance_count: u32,
        first_instance: u32,
        counter_addr: u64,
        counter_offset: u32,
        vertex_stride: u32,
    ) {
        assert!(vertex_stride > 0);
        if !self.prepare_draw() {
            return;
        }
        let begin = self.begin_word();
        let fast = self.device.info().has_fast_indirect_loads;
        let program = MmeProgram::XfbDrawIndirect;

        let Some(p) = self.push(10) else {
            return;
        };
        p.multi(methods::SET_DRAW_AUTO_START, &[counter_offset, vertex_stride]);
        p.one_inc(program.call_method());
        p.data(begin);
        p.data(instance_count);
        p.data(first_instance);
        if fast {
            p.data((counter_addr >> 32) as u32);
            p.data(counter_addr as u32);
        } else {
            p.update_count(1);
            p.push_indirect(counter_addr, 4);
        }
        self.finish_draw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvcs_common::fields::get_field;
    use nvcs_common::types::ClassGen;

    use crate::cmd_buffer::testing::*;
    use crate::heap::{GpuHeap, GpuMemory};
    use crate::replay::DrawKind;

    #[test]
    fn test_bind_buffers() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.bind_transform_feedback_buffers(
            1,
            &[AddrRange::new(0x3_0000_0100, 0x400), AddrRange::NULL],
        );
        let replay = replay(&mut cmd);
        assert_eq!(replay.reg(methods::set_stream_out_buffer_enable(1)), 1);
        assert_eq!(replay.reg(methods::set_stream_out_buffer_address_a(1)), 3);
        assert_eq!(replay.reg(methods::set_stream_out_buffer_address_b(1)), 0x100);
        assert_eq!(replay.reg(methods::set_stream_out_buffer_size(1)), 0x400);
        assert_eq!(replay.values_of(methods::set_stream_out_buffer_enable(2)), vec![0]);
    }

    #[test]
    fn test_begin_loads_counters() {
        for gen in [ClassGen::Pascal, ClassGen::Turing] {
            let mut cmd = recorder(gen);
            let counter = cmd.heap_mut().upload(&0x240u32.to_le_bytes(), 4).unwrap();
            cmd.begin_transform_feedback(0, &[None, Some(counter)]);
            let replay = replay(&mut cmd);
            assert_eq!(replay.reg(methods::SET_STREAM_OUTPUT), 1);
            assert_eq!(
                replay.values_of(methods::set_stream_out_buffer_load_write_pointer(0)),
                vec![0]
            );
            assert_eq!(
                replay.values_of(methods::set_stream_out_buffer_load_write_pointer(1)),
                vec![0, 0x240]
            );
        }
    }

    #[test]
    fn test_begin_resets_every_write_pointer() {
        let mut cmd = recorder(ClassGen::Turing);
        let counter = cmd.heap_mut().upload(&0x80u32.to_le_bytes(), 4).unwrap();
        cmd.begin_transform_feedback(2, &[Some(counter)]);
        cmd.end_transform_feedback(2, &[Some(counter)]);
        cmd.begin_transform_feedback(0, &[]);
        let replay = replay(&mut cmd);
        for j in 0..MAX_XFB_BUFFERS {
            let loads = replay.values_of(methods::set_stream_out_buffer_load_write_pointer(j));
            assert_eq!(loads.last(), Some(&0), "buffer {}", j);
        }
        assert_eq!(
            replay.values_of(methods::set_stream_out_buffer_load_write_pointer(2)),
            vec![0, 0x80, 0]
        );
    }

    #[test]
    fn test_end_reports_byte_counts() {
        let mut cmd = recorder(ClassGen::Turing);
        cmd.end_transform_feedback(2, &[Some(0x5_0000_0040), None]);
        let replay = replay(&mut cmd);
        let reports = replay.values_of(methods::SET_REPORT_SEMAPHORE_D);
        assert_eq!(reports.len(), 1);
        assert_eq!(get_field(reports[0], 0, 2), ReportOperation::ReportOnly as u32);
        assert_eq!(
            get_field(reports[0], 12, 4),
            PipelineLocation::StreamingOutput as u32
        );
        assert_eq!(get_field(reports[0], 23, 5), ReportKind::StreamingByteCount as u32);
        assert_eq!(get_field(reports[0], 5, 3), 2);
        assert_eq!(replay.reg(methods::SET_REPORT_SEMAPHORE_A), 5);
        assert_eq!(replay.reg(methods::SET_REPORT_SEMAPHORE_B), 0x40);
        assert_eq!(replay.reg(methods::SET_STREAM_OUTPUT), 0);

        // Stream output is off before the first report.
        let writes = replay.writes();
        let off = writes
            .iter()
            .position(|w| w.method == methods::SET_STREAM_OUTPUT)
            .unwrap();
        let report = writes
            .iter()
            .position(|w| w.method == methods::SET_REPORT_SEMAPHORE_D)
            .unwrap();
        assert!(off < report);
    }

    #[test]
    fn test_counter_round_trip() {
        // The byte count saved at end is where the stream was resumed from.
        let mut cmd = recorder(ClassGen::Pascal);
        let resume = cmd.heap_mut().upload(&0x1c0u32.to_le_bytes(), 4).unwrap();
        let saved = cmd.heap_mut().upload(&0u32.to_le_bytes(), 4).unwrap();
        cmd.begin_transform_feedback(1, &[Some(resume)]);
        cmd.end_transform_feedback(1, &[Some(saved)]);
        let replay = replay(&mut cmd);
        assert_eq!(cmd.heap().read_words(saved, 1), vec![0x1c0]);
        assert_eq!(
            replay.reg(methods::set_stream_out_buffer_load_write_pointer(1)),
            0x1c0
        );
    }

    #[test]
    fn test_draw_by_byte_count() {
        for gen in [ClassGen::MaxwellB, ClassGen::Turing] {
            let mut cmd = recorder(gen);
            let counter = cmd.heap_mut().upload(&960u32.to_le_bytes(), 4).unwrap();
            cmd.draw_indirect_byte_count(2, 1, counter, 16, 12);
            let replay = replay(&mut cmd);
            assert_eq!(replay.reg(methods::SET_DRAW_AUTO_START), 16);
            assert_eq!(replay.reg(methods::SET_DRAW_AUTO_STRIDE), 12);
            let draws = replay.draws();
            assert_eq!(draws.len(), 2);
            assert!(draws.iter().all(|d| d.kind == DrawKind::Auto && d.first == 960));
            assert!(draws.iter().all(|d| d.base_instance == 1));
            assert_eq!(cmd.heap().read_words(counter, 1), vec![960]);
        }
    }
}
