// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Push-stream writer.
//!
//! Words are written into chunks of GPU memory obtained from the heap. A
//! segment is a contiguous run of words handed to the GPU front end as one
//! entry; it ends when a chunk fills up, when an indirect segment (words that
//! live in a user buffer) is spliced in, or when the recording finishes.
//!
//! ## Method header (32 bits)
//!
//! | Bits  | Field                     |
//! |-------|---------------------------|
//! | 12:0  | Method address >> 2       |
//! | 15:13 | Subchannel                |
//! | 28:16 | Count / immediate data    |
//! | 31:29 | Mode                      |

use nvcs_common::error::{CmdError, CmdResult};
use nvcs_common::settings::{DebugFlags, Settings, MAX_SEGMENT_WORDS};

use crate::heap::{words_to_bytes, GpuHeap};

/// The 3D class is bound on subchannel 0.
pub const SUBC_3D: u32 = 0;

/// The DMA copy class is bound on subchannel 4.
pub const SUBC_COPY: u32 = 4;

/// Largest value an immediate-mode header can carry.
pub const MAX_IMMD: u32 = 0x1FFF;

/// Header mode, bits [31:29].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PushMode {
    /// Each data word goes to the next method.
    Inc = 1,
    /// Every data word goes to the same method.
    NonInc = 3,
    /// The value is carried in the header itself.
    Immd = 4,
    /// The first word goes to the method, the rest to the method after it.
    OneInc = 5,
}

impl PushMode {
    pub fn from_raw(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Inc),
            3 => Some(Self::NonInc),
            4 => Some(Self::Immd),
            5 => Some(Self::OneInc),
            _ => None,
        }
    }
}

/// Encode a method header. `method` is a byte offset.
pub fn header(mode: PushMode, subc: u32, method: u32, count: u32) -> u32 {
    debug_assert!(method % 4 == 0 && method >> 2 <= 0x1FFF, "method 0x{:x}", method);
    debug_assert!(count <= 0x1FFF);
    (mode as u32) << 29 | (count & 0x1FFF) << 16 | (subc & 0x7) << 13 | ((method >> 2) & 0x1FFF)
}

/// One entry for the GPU front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushSegment {
    pub addr: u64,
    /// Length in words.
    pub len: u32,
    /// Words live in a user buffer rather than in a push chunk.
    pub no_prefetch: bool,
}

/// A block of push memory and the host copy of what has been written to it.
#[derive(Debug)]
struct PushChunk {
    addr: u64,
    capacity: usize,
    words: Vec<u32>,
}

impl PushChunk {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.addr + 4 * self.capacity as u64
    }
}

pub struct PushWriter {
    chunk_words: usize,
    max_count: u32,
    zero_memory: bool,
    chunks: Vec<PushChunk>,
    segments: Vec<PushSegment>,
    /// Index in the current chunk where the open segment starts.
    seg_start: usize,
    /// End of the last reservation in the current chunk.
    limit: usize,
    /// Position of the header that `data` words extend.
    last_header: Option<usize>,
    unflushed_bytes: u64,
}

impl PushWriter {
    pub fn new(settings: &Settings) -> Self {
        let chunk_words = settings.push_chunk_words.min(MAX_SEGMENT_WORDS) as usize;
        Self {
            chunk_words: chunk_words.max(1),
            max_count: settings.max_push_count.min(0x1FFF),
            zero_memory: settings.has_debug(DebugFlags::ZERO_MEMORY),
            chunks: Vec::new(),
            segments: Vec::new(),
            seg_start: 0,
            limit: 0,
            last_header: None,
            unflushed_bytes: 0,
        }
    }

    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Closed segments, in submission order.
    pub fn segments(&self) -> &[PushSegment] {
        &self.segments
    }

    pub fn unflushed_bytes(&self) -> u64 {
        self.unflushed_bytes
    }

    /// Make room for `n` more words in the open segment, starting a new
    /// chunk (and segment) if the current one cannot hold them.
    pub fn reserve<H: GpuHeap + ?Sized>(&mut self, heap: &mut H, n: usize) -> CmdResult<()> {
        assert!(n <= MAX_SEGMENT_WORDS as usize, "reservation of {} words", n);
        self.unflushed_bytes += 4 * n as u64;

        if let Some(chunk) = self.chunks.last() {
            let used = chunk.words.len();
            let seg_len = used - self.seg_start;
            if used + n <= chunk.capacity && seg_len + n <= MAX_SEGMENT_WORDS as usize {
                self.limit = used + n;
                return Ok(());
            }
        }

        self.close_segment();
        self.commit(heap);

        let capacity = self.chunk_words.max(n);
        let addr = heap
            .alloc(4 * capacity as u64, 4)
            .map_err(|_| CmdError::OutOfHostMemory)?;
        if self.zero_memory {
            heap.write(addr, &vec![0u8; 4 * capacity]);
        }
        log::debug!("Push: new chunk at 0x{:X}, {} words", addr, capacity);

        self.chunks.push(PushChunk {
            addr,
            capacity,
            words: Vec::with_capacity(capacity),
        });
        self.seg_start = 0;
        self.limit = n;
        self.last_header = None;
        Ok(())
    }

    /// Close the open segment and write every chunk's words to the heap.
    pub fn finish<H: GpuHeap + ?Sized>(&mut self, heap: &mut H) {
        self.close_segment();
        self.commit(heap);
    }

    fn commit<H: GpuHeap + ?Sized>(&mut self, heap: &mut H) {
        if let Some(chunk) = self.chunks.last() {
            if !chunk.words.is_empty() {
                heap.write(chunk.addr, &words_to_bytes(&chunk.words));
            }
        }
    }

    fn close_segment(&mut self) {
        let Some(chunk) = self.chunks.last() else {
            return;
        };
        let len = chunk.words.len() - self.seg_start;
        if len > 0 {
            let seg = PushSegment {
                addr: chunk.addr + 4 * self.seg_start as u64,
                len: len as u32,
                no_prefetch: false,
            };
            log::debug!("Push: segment 0x{:X} +{} words", seg.addr, seg.len);
            self.segments.push(seg);
        }
        self.seg_start = chunk.words.len();
    }

    /// Host copy of a segment written by this writer.
    pub fn segment_words(&self, seg: &PushSegment) -> Option<&[u32]> {
        if seg.no_prefetch {
            return None;
        }
        let chunk = self.chunks.iter().find(|c| c.contains(seg.addr))?;
        let start = ((seg.addr - chunk.addr) / 4) as usize;
        chunk.words.get(start..start + seg.len as usize)
    }

    // ── Emission ────────────────────────────────────────────────────────────

    fn word(&mut self, w: u32) -> Option<usize> {
        let chunk = self.chunks.last_mut()?;
        debug_assert!(chunk.words.len() < self.limit, "push overflow: missing reserve");
        chunk.words.push(w);
        Some(chunk.words.len() - 1)
    }

    fn start_header(&mut self, mode: PushMode, subc: u32, method: u32) {
        log::trace!("Push: {:?} sc{} 0x{:04x}", mode, subc, method);
        self.last_header = self.word(header(mode, subc, method, 0));
    }

    fn add_to_count(&mut self, extra: u32) {
        let (Some(idx), Some(chunk)) = (self.last_header, self.chunks.last_mut()) else {
            debug_assert!(false, "data without a method header");
            return;
        };
        let hdr = chunk.words[idx];
        let count = ((hdr >> 16) & 0x1FFF) + extra;
        assert!(count <= self.max_count, "method count {} over {}", count, self.max_count);
        chunk.words[idx] = (hdr & !(0x1FFF << 16)) | count << 16;
    }

    /// Start an incrementing method; follow with [`Self::data`].
    pub fn inc(&mut self, method: u32) {
        self.start_header(PushMode::Inc, SUBC_3D, method);
    }

    pub fn ninc(&mut self, method: u32) {
        self.start_header(PushMode::NonInc, SUBC_3D, method);
    }

    /// Start a one-increment method; used for macro calls.
    pub fn one_inc(&mut self, method: u32) {
        self.start_header(PushMode::OneInc, SUBC_3D, method);
    }

    /// Append one data word to the last header.
    pub fn data(&mut self, value: u32) {
        if self.word(value).is_some() {
            self.add_to_count(1);
        }
    }

    /// Single method write, immediate when the value fits.
    pub fn immd(&mut self, method: u32, value: u32) {
        self.immd_on(SUBC_3D, method, value);
    }

    /// [`Self::immd`] for the class bound on `subc`.
    pub fn immd_on(&mut self, subc: u32, method: u32, value: u32) {
        if value <= MAX_IMMD {
            log::trace!("Push: IMMD sc{} 0x{:04x} = 0x{:x}", subc, method, value);
            self.word(header(PushMode::Immd, subc, method, value));
            self.last_header = None;
        } else {
            self.start_header(PushMode::OneInc, subc, method);
            self.data(value);
        }
    }

    /// Consecutive methods starting at `method`, split into as many headers
    /// as the count limit requires.
    pub fn multi(&mut self, method: u32, values: &[u32]) {
        self.multi_on(SUBC_3D, method, values);
    }

    /// [`Self::multi`] for the class bound on `subc`.
    pub fn multi_on(&mut self, subc: u32, method: u32, values: &[u32]) {
        for (i, chunk) in values.chunks(self.max_count as usize).enumerate() {
            let first = method + 4 * (i * self.max_count as usize) as u32;
            self.start_header(PushMode::Inc, subc, first);
            for &v in chunk {
                self.data(v);
            }
        }
    }

    /// Copy pre-encoded words.
    pub fn raw(&mut self, words: &[u32]) {
        for &w in words {
            self.word(w);
        }
        self.last_header = None;
    }

    /// Grow the last header's count by `extra` words supplied from elsewhere
    /// (an indirect segment that follows).
    pub fn update_count(&mut self, extra: u32) {
        self.add_to_count(extra);
    }

    /// Splice `range` bytes at `addr` into the stream as their own segment.
    pub fn push_indirect(&mut self, addr: u64, range: u64) {
        debug_assert!(range % 4 == 0);
        debug_assert!(range / 4 <= MAX_SEGMENT_WORDS as u64);
        self.close_segment();
        self.segments.push(PushSegment {
            addr,
            len: (range / 4) as u32,
            no_prefetch: true,
        });
        log::debug!("Push: indirect segment 0x{:X} +{} bytes", addr, range);
        self.unflushed_bytes += range;
        self.last_header = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{GpuMemory, HostArena};

    fn writer(chunk_words: u32) -> PushWriter {
        PushWriter::new(&Settings {
            push_chunk_words: chunk_words,
            ..Settings::default()
        })
    }

    #[test]
    fn test_header_layout() {
        let h = header(PushMode::Inc, 0, 0x1618, 3);
        assert_eq!(h >> 29, 1);
        assert_eq!((h >> 16) & 0x1FFF, 3);
        assert_eq!((h >> 13) & 0x7, 0);
        assert_eq!(h & 0x1FFF, 0x1618 >> 2);
    }

    #[test]
    fn test_immd_or_one_inc() {
        let mut heap = HostArena::default();
        let mut p = writer(64);
        p.reserve(&mut heap, 3).unwrap();
        p.immd(0x0110, 0x1FFF);
        p.immd(0x0110, 0x2000);
        p.finish(&mut heap);

        let seg = p.segments()[0];
        let words = p.segment_words(&seg).unwrap();
        assert_eq!(words[0], header(PushMode::Immd, 0, 0x0110, 0x1FFF));
        assert_eq!(words[1], header(PushMode::OneInc, 0, 0x0110, 1));
        assert_eq!(words[2], 0x2000);
        assert_eq!(heap.read_words(seg.addr, 3), words.to_vec());
    }

    #[test]
    fn test_data_grows_count() {
        let mut heap = HostArena::default();
        let mut p = writer(64);
        p.reserve(&mut heap, 4).unwrap();
        p.inc(0x1384);
        p.data(1);
        p.data(2);
        p.data(3);
        p.finish(&mut heap);
        let seg = p.segments()[0];
        assert_eq!(p.segment_words(&seg).unwrap()[0], header(PushMode::Inc, 0, 0x1384, 3));
    }

    #[test]
    fn test_multi_splits_at_max_count() {
        let mut heap = HostArena::default();
        let mut p = PushWriter::new(&Settings {
            max_push_count: 2,
            ..Settings::default()
        });
        p.reserve(&mut heap, 8).unwrap();
        p.multi(0x100, &[1, 2, 3, 4, 5]);
        p.finish(&mut heap);
        let words = p.segment_words(&p.segments()[0]).unwrap().to_vec();
        assert_eq!(words.len(), 8);
        assert_eq!(words[0], header(PushMode::Inc, 0, 0x100, 2));
        assert_eq!(words[3], header(PushMode::Inc, 0, 0x108, 2));
        assert_eq!(words[6], header(PushMode::Inc, 0, 0x110, 1));
    }

    #[test]
    fn test_other_subchannel() {
        let mut heap = HostArena::default();
        let mut p = writer(64);
        p.reserve(&mut heap, 6).unwrap();
        p.multi_on(SUBC_COPY, 0x0400, &[1, 2]);
        p.immd_on(SUBC_COPY, 0x0300, 0x385);
        p.immd(0x0110, 0);
        p.finish(&mut heap);
        let words = p.segment_words(&p.segments()[0]).unwrap().to_vec();
        assert_eq!(words[0], header(PushMode::Inc, SUBC_COPY, 0x0400, 2));
        assert_eq!(words[3], header(PushMode::Immd, SUBC_COPY, 0x0300, 0x385));
        assert_eq!((words[4] >> 13) & 0x7, SUBC_3D);
    }

    #[test]
    fn test_overflow_starts_new_segment() {
        let mut heap = HostArena::default();
        let mut p = writer(16);
        p.reserve(&mut heap, 10).unwrap();
        p.raw(&[0; 10]);
        p.reserve(&mut heap, 10).unwrap();
        p.raw(&[1; 10]);
        p.finish(&mut heap);

        let segs = p.segments();
        assert_eq!(segs.len(), 2);
        assert_ne!(segs[0].addr, segs[1].addr);
        assert!(segs.iter().all(|s| s.len == 10 && s.len <= MAX_SEGMENT_WORDS));
        assert_eq!(p.unflushed_bytes(), 80);
    }

    #[test]
    fn test_oversized_reservation_gets_own_chunk() {
        let mut heap = HostArena::default();
        let mut p = writer(16);
        p.reserve(&mut heap, 40).unwrap();
        p.raw(&[7; 40]);
        p.finish(&mut heap);
        assert_eq!(p.segments().len(), 1);
        assert_eq!(p.segments()[0].len, 40);
    }

    #[test]
    fn test_indirect_splits_segment() {
        let mut heap = HostArena::default();
        let mut p = writer(64);
        p.reserve(&mut heap, 4).unwrap();
        p.one_inc(0x3800);
        p.data(0x10);
        p.update_count(3);
        p.push_indirect(0x2000, 12);
        p.immd(0x0100, 0);
        p.finish(&mut heap);

        let segs = p.segments();
        assert_eq!(segs.len(), 3);
        assert_eq!(
            p.segment_words(&segs[0]).unwrap(),
            &[header(PushMode::OneInc, 0, 0x3800, 4), 0x10]
        );
        assert_eq!(
            segs[1],
            PushSegment {
                addr: 0x2000,
                len: 3,
                no_prefetch: true
            }
        );
        assert_eq!(p.segment_words(&segs[1]), None);
        assert_eq!(segs[2].addr, segs[0].addr + 8);
    }

    #[test]
    fn test_zero_memory_flag() {
        let mut heap = HostArena::default();
        heap.write_words(0x1_0000_0000, &[0xFFFF_FFFF; 4]);
        let mut p = PushWriter::new(&Settings {
            push_chunk_words: 4,
            debug_flags: DebugFlags::ZERO_MEMORY,
            ..Settings::default()
        });
        p.reserve(&mut heap, 1).unwrap();
        p.immd(0x100, 0);
        p.finish(&mut heap);
        assert_eq!(heap.read_words(0x1_0000_0004, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_allocation_failure() {
        let mut heap = HostArena::new(0x1000, 16);
        let mut p = writer(64);
        assert_eq!(p.reserve(&mut heap, 1), Err(CmdError::OutOfHostMemory));
    }
}
