// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU memory as seen by the encoder.
//!
//! The encoder never owns device memory. It asks a [`GpuHeap`] for space
//! (push chunks, root tables) and writes bytes into it. [`GpuMemory`] is the
//! read side, used by the replay model to follow indirect segments and
//! fifoed reads. [`HostArena`] implements both over host pages and stands in
//! for the device allocator in tests and in the dump tool.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use nvcs_common::error::{CmdError, CmdResult};

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_BITS;

/// Allocator collaborator: hands out GPU-visible memory and accepts writes.
pub trait GpuHeap {
    /// Reserve `size` bytes aligned to `align` (a power of two).
    fn alloc(&mut self, size: u64, align: u64) -> CmdResult<u64>;

    fn write(&mut self, addr: u64, data: &[u8]);

    /// Allocate and fill in one step.
    fn upload(&mut self, data: &[u8], align: u64) -> CmdResult<u64> {
        let addr = self.alloc(data.len() as u64, align)?;
        self.write(addr, data);
        Ok(addr)
    }
}

/// Read/write access to GPU virtual memory.
pub trait GpuMemory {
    /// Fill `dst` from `addr`. Unbacked bytes read as zero.
    fn read(&self, addr: u64, dst: &mut [u8]);

    fn write(&mut self, addr: u64, src: &[u8]);

    fn read_words(&self, addr: u64, count: usize) -> Vec<u32> {
        let mut bytes = vec![0u8; count * 4];
        self.read(addr, &mut bytes);
        bytes_to_words(&bytes)
    }

    fn write_words(&mut self, addr: u64, words: &[u32]) {
        self.write(addr, &words_to_bytes(words));
    }
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

/// Little-endian words; a trailing partial word is dropped.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut words = vec![0u32; bytes.len() / 4];
    LittleEndian::read_u32_into(&bytes[..words.len() * 4], &mut words);
    words
}

/// Bump allocator over a GPU VA window, backed by sparse host pages.
pub struct HostArena {
    base: u64,
    next: u64,
    end: u64,
    pages: HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
}

impl HostArena {
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            next: base,
            end: base + size,
            pages: HashMap::new(),
        }
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> u64 {
        self.next - self.base
    }

    fn page_mut(&mut self, page: u64) -> &mut [u8; PAGE_SIZE as usize] {
        self.pages
            .entry(page)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE as usize]))
    }
}

impl Default for HostArena {
    fn default() -> Self {
        // Above 4 GiB so address halves are both exercised.
        Self::new(0x1_0000_0000, 0x1000_0000)
    }
}

impl GpuHeap for HostArena {
    fn alloc(&mut self, size: u64, align: u64) -> CmdResult<u64> {
        debug_assert!(align.is_power_of_two());
        let addr = (self.next + align - 1) & !(align - 1);
        if addr + size > self.end {
            log::debug!(
                "HostArena: allocation of 0x{:X} bytes failed (0x{:X} free)",
                size,
                self.end.saturating_sub(addr)
            );
            return Err(CmdError::OutOfDeviceMemory);
        }
        self.next = addr + size;
        Ok(addr)
    }

    fn write(&mut self, addr: u64, data: &[u8]) {
        GpuMemory::write(self, addr, data);
    }
}

impl GpuMemory for HostArena {
    fn read(&self, addr: u64, dst: &mut [u8]) {
        let mut offset = 0usize;
        while offset < dst.len() {
            let va = addr + offset as u64;
            let page_off = (va & (PAGE_SIZE - 1)) as usize;
            let chunk = (dst.len() - offset).min(PAGE_SIZE as usize - page_off);
            match self.pages.get(&(va >> PAGE_BITS)) {
                Some(page) => {
                    dst[offset..offset + chunk].copy_from_slice(&page[page_off..page_off + chunk])
                }
                None => dst[offset..offset + chunk].fill(0),
            }
            offset += chunk;
        }
    }

    fn write(&mut self, addr: u64, src: &[u8]) {
        let mut offset = 0usize;
        while offset < src.len() {
            let va = addr + offset as u64;
            let page_off = (va & (PAGE_SIZE - 1)) as usize;
            let chunk = (src.len() - offset).min(PAGE_SIZE as usize - page_off);
            let page = self.page_mut(va >> PAGE_BITS);
            page[page_off..page_off + chunk].copy_from_slice(&src[offset..offset + chunk]);
            offset += chunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_alignment() {
        let mut arena = HostArena::new(0x1000, 0x1000);
        let a = arena.alloc(3, 4).unwrap();
        let b = arena.alloc(16, 256).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x1100);
        assert_eq!(arena.used(), 0x110);
    }

    #[test]
    fn test_alloc_exhaustion() {
        let mut arena = HostArena::new(0x1000, 0x100);
        assert!(arena.alloc(0x80, 4).is_ok());
        assert_eq!(arena.alloc(0x100, 4), Err(CmdError::OutOfDeviceMemory));
    }

    #[test]
    fn test_write_read_cross_page() {
        let mut arena = HostArena::default();
        let addr = 0x1_0000_0FFC;
        arena.write_words(addr, &[0x1111_2222, 0x3333_4444, 0x5555_6666]);
        assert_eq!(arena.read_words(addr, 3), vec![0x1111_2222, 0x3333_4444, 0x5555_6666]);
        assert_eq!(arena.read_words(addr + 4, 1), vec![0x3333_4444]);
    }

    #[test]
    fn test_unbacked_reads_zero() {
        let arena = HostArena::default();
        assert_eq!(arena.read_words(0x1234_5678, 2), vec![0, 0]);
    }

    #[test]
    fn test_upload() {
        let mut arena = HostArena::default();
        let addr = arena.upload(&words_to_bytes(&[7, 8]), 64).unwrap();
        assert_eq!(addr % 64, 0);
        assert_eq!(arena.read_words(addr, 2), vec![7, 8]);
    }

    #[test]
    fn test_word_conversion() {
        let bytes = words_to_bytes(&[0x0403_0201]);
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        assert_eq!(bytes_to_words(&[1, 2, 3, 4, 5]), vec![0x0403_0201]);
    }
}
