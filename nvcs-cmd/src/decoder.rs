// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Push-stream decoder.
//!
//! Expands method headers back into individual register writes. A method
//! whose data continues in the next segment (a macro call whose arguments
//! are spliced from an indirect buffer) is carried over by [`Decoder`].

use std::fmt::Write;

use thiserror::Error;

use nvcs_common::methods;

use crate::push::{PushMode, SUBC_COPY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("stream truncated at word {pos}: {needed} data words missing")]
    Truncated { pos: usize, needed: u32 },
    #[error("unsupported header mode {mode} at word {pos}")]
    UnsupportedMode { mode: u32, pos: usize },
}

/// One register write. `method` is a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodWrite {
    pub subchannel: u32,
    pub method: u32,
    pub value: u32,
}

impl MethodWrite {
    pub fn new(method: u32, value: u32) -> Self {
        Self {
            subchannel: 0,
            method,
            value,
        }
    }
}

/// A parsed method header.
#[derive(Debug, Clone, Copy)]
struct CompressedMethod(u32);

impl CompressedMethod {
    /// Method byte offset.
    fn method(&self) -> u32 {
        (self.0 & 0x1FFF) << 2
    }

    fn subchannel(&self) -> u32 {
        (self.0 >> 13) & 0x7
    }

    /// Count, or immediate data.
    fn count(&self) -> u32 {
        (self.0 >> 16) & 0x1FFF
    }

    fn mode(&self) -> u32 {
        self.0 >> 29
    }
}

/// Data words still owed to the last header.
#[derive(Debug, Clone, Copy)]
struct Pending {
    mode: PushMode,
    subchannel: u32,
    method: u32,
    remaining: u32,
    first: bool,
}

impl Pending {
    fn next_write(&mut self, value: u32) -> MethodWrite {
        let write = MethodWrite {
            subchannel: self.subchannel,
            method: self.method,
            value,
        };
        match self.mode {
            PushMode::Inc => self.method += 4,
            PushMode::OneInc if self.first => self.method += 4,
            _ => {}
        }
        self.first = false;
        self.remaining -= 1;
        write
    }
}

#[derive(Debug, Default)]
pub struct Decoder {
    pending: Option<Pending>,
    /// Words consumed across all segments.
    pos: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one segment, appending its writes to `out`.
    pub fn feed(&mut self, words: &[u32], out: &mut Vec<MethodWrite>) -> Result<(), DecodeError> {
        for &word in words {
            let pos = self.pos;
            self.pos += 1;

            if let Some(pending) = self.pending.as_mut() {
                let write = pending.next_write(word);
                log::trace!("Decoder: 0x{:04x} = 0x{:x}", write.method, write.value);
                out.push(write);
                if pending.remaining == 0 {
                    self.pending = None;
                }
                continue;
            }

            let header = CompressedMethod(word);
            let mode = PushMode::from_raw(header.mode()).ok_or(DecodeError::UnsupportedMode {
                mode: header.mode(),
                pos,
            })?;
            match mode {
                PushMode::Immd => out.push(MethodWrite {
                    subchannel: header.subchannel(),
                    method: header.method(),
                    value: header.count(),
                }),
                _ if header.count() == 0 => {}
                _ => {
                    self.pending = Some(Pending {
                        mode,
                        subchannel: header.subchannel(),
                        method: header.method(),
                        remaining: header.count(),
                        first: true,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fail if the last header is still owed data.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        match self.pending.take() {
            Some(p) => Err(DecodeError::Truncated {
                pos: self.pos,
                needed: p.remaining,
            }),
            None => Ok(()),
        }
    }
}

/// Decode a self-contained stream.
pub fn decode(words: &[u32]) -> Result<Vec<MethodWrite>, DecodeError> {
    let mut decoder = Decoder::new();
    let mut out = Vec::new();
    decoder.feed(words, &mut out)?;
    decoder.finish()?;
    Ok(out)
}

/// `[sc0] NAME = 0x...`, with the raw offset for methods the tables lack.
pub fn format_write(w: &MethodWrite) -> String {
    let name = if w.subchannel == SUBC_COPY {
        methods::copy::method_name(w.method).map(str::to_string)
    } else {
        methods::method_name(w.method)
    };
    let name = name.unwrap_or_else(|| format!("0x{:04x}", w.method));
    format!("[sc{}] {} = 0x{:x}", w.subchannel, name, w.value)
}

/// Human-readable listing of a stream. Decoding stops at the first error,
/// which is reported on the last line.
pub fn dump(words: &[u32]) -> String {
    let mut decoder = Decoder::new();
    let mut writes = Vec::new();
    let result = decoder.feed(words, &mut writes).and_then(|_| decoder.finish());

    let mut text = String::new();
    for w in &writes {
        let _ = writeln!(text, "{}", format_write(w));
    }
    if let Err(e) = result {
        let _ = writeln!(text, "error: {}", e);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::header;

    #[test]
    fn test_inc_method() {
        let data = vec![header(PushMode::Inc, 0, 0x40, 2), 0xAAAA, 0xBBBB];
        let writes = decode(&data).unwrap();
        assert_eq!(writes, vec![MethodWrite::new(0x40, 0xAAAA), MethodWrite::new(0x44, 0xBBBB)]);
    }

    #[test]
    fn test_non_inc_method() {
        let data = vec![header(PushMode::NonInc, 0, 0x80, 3), 0x11, 0x22, 0x33];
        let writes = decode(&data).unwrap();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w.method == 0x80));
        assert_eq!(writes[2].value, 0x33);
    }

    #[test]
    fn test_immd_method() {
        let data = vec![header(PushMode::Immd, 0, 0xc0, 0x42)];
        assert_eq!(decode(&data).unwrap(), vec![MethodWrite::new(0xc0, 0x42)]);
    }

    #[test]
    fn test_one_inc() {
        let data = vec![header(PushMode::OneInc, 0, 0x140, 3), 0xAA, 0xBB, 0xCC];
        let writes = decode(&data).unwrap();
        assert_eq!(writes[0], MethodWrite::new(0x140, 0xAA));
        assert_eq!(writes[1], MethodWrite::new(0x144, 0xBB));
        assert_eq!(writes[2], MethodWrite::new(0x144, 0xCC));
    }

    #[test]
    fn test_subchannel_field() {
        let data = vec![header(PushMode::Immd, 5, 0x100, 1)];
        assert_eq!(decode(&data).unwrap()[0].subchannel, 5);
    }

    #[test]
    fn test_copy_subchannel_names() {
        let data = vec![
            header(PushMode::Immd, SUBC_COPY, methods::copy::LAUNCH_DMA, 0x385),
            header(PushMode::Immd, 0, methods::copy::LAUNCH_DMA, 1),
        ];
        let text = dump(&data);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[sc4] LAUNCH_DMA = 0x385");
        assert!(!lines[1].contains("LAUNCH_DMA"));
    }

    #[test]
    fn test_truncated() {
        let data = vec![header(PushMode::Inc, 0, 0x40, 3), 1];
        assert_eq!(decode(&data), Err(DecodeError::Truncated { pos: 2, needed: 2 }));
    }

    #[test]
    fn test_unsupported_mode() {
        let data = vec![header(PushMode::Immd, 0, 0x40, 1), 7 << 29];
        assert_eq!(decode(&data), Err(DecodeError::UnsupportedMode { mode: 7, pos: 1 }));
    }

    #[test]
    fn test_data_continues_across_segments() {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        decoder.feed(&[header(PushMode::OneInc, 0, 0x3800, 3), 0x10], &mut out).unwrap();
        decoder.feed(&[0x20, 0x30], &mut out).unwrap();
        decoder.finish().unwrap();
        let methods: Vec<u32> = out.iter().map(|w| w.method).collect();
        assert_eq!(methods, vec![0x3800, 0x3804, 0x3804]);
    }

    #[test]
    fn test_dump_names() {
        let data = vec![
            header(PushMode::Immd, 0, methods::BEGIN, 4),
            header(PushMode::Immd, 0, 0x7ffc, 1),
        ];
        let text = dump(&data);
        assert_eq!(text, "[sc0] BEGIN = 0x4\n[sc0] 0x7ffc = 0x1\n");

        let text = dump(&[header(PushMode::Inc, 0, methods::END, 1)]);
        assert!(text.ends_with("error: stream truncated at word 1: 1 data words missing\n"));
    }
}
