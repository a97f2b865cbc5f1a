// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared types: hardware generations, device capabilities and GPU buffer
//! address ranges.

/// Sentinel range meaning "from the offset to the end of the buffer".
pub const WHOLE_SIZE: u64 = u64::MAX;

/// Largest constant-buffer range the select registers accept.
pub const MAX_CBUF_SIZE: u32 = 0x10000;

// ── Hardware generation ─────────────────────────────────────────────────────

/// 3D class generation. Ordered oldest to newest so capability checks can be
/// written as `gen >= ClassGen::Turing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClassGen {
    Fermi,
    Kepler,
    MaxwellA,
    MaxwellB,
    Pascal,
    Volta,
    Turing,
    Ampere,
}

impl ClassGen {
    pub const ALL: [ClassGen; 8] = [
        Self::Fermi,
        Self::Kepler,
        Self::MaxwellA,
        Self::MaxwellB,
        Self::Pascal,
        Self::Volta,
        Self::Turing,
        Self::Ampere,
    ];

    /// 3D class number bound on subchannel 0 with `SET_OBJECT`.
    pub fn class_id(self) -> u32 {
        match self {
            Self::Fermi => 0x9097,
            Self::Kepler => 0xA197,
            Self::MaxwellA => 0xB097,
            Self::MaxwellB => 0xB197,
            Self::Pascal => 0xC097,
            Self::Volta => 0xC397,
            Self::Turing => 0xC597,
            Self::Ampere => 0xC697,
        }
    }

    /// DMA copy class paired with this 3D class.
    pub fn copy_class_id(self) -> u32 {
        match self {
            Self::Fermi => 0x90B5,
            Self::Kepler => 0xA0B5,
            Self::MaxwellA | Self::MaxwellB => 0xB0B5,
            Self::Pascal => 0xC0B5,
            Self::Volta => 0xC3B5,
            Self::Turing => 0xC5B5,
            Self::Ampere => 0xC6B5,
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "fermi" => Self::Fermi,
            "kepler" => Self::Kepler,
            "maxwell_a" | "maxwella" | "maxwell" => Self::MaxwellA,
            "maxwell_b" | "maxwellb" => Self::MaxwellB,
            "pascal" => Self::Pascal,
            "volta" => Self::Volta,
            "turing" => Self::Turing,
            "ampere" => Self::Ampere,
            other => {
                log::warn!("Unknown class generation '{}', defaulting to Turing", other);
                Self::Turing
            }
        }
    }
}

// ── Device capabilities ─────────────────────────────────────────────────────

/// Read-only device capabilities consulted while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub gen: ClassGen,
    pub max_viewports: u32,
    pub max_color_targets: u32,
    /// Required alignment of constant-buffer addresses and sizes, in bytes.
    pub min_cbuf_alignment: u32,
    /// The macro unit can pull memory words into its parameter queue.
    pub has_fast_indirect_loads: bool,
}

impl DeviceInfo {
    pub fn new(gen: ClassGen) -> Self {
        Self {
            gen,
            max_viewports: 16,
            max_color_targets: 8,
            min_cbuf_alignment: if gen >= ClassGen::Turing { 64 } else { 256 },
            has_fast_indirect_loads: gen >= ClassGen::Turing,
        }
    }

    /// Index buffer and vertex stream ranges are programmed as a byte size
    /// rather than an inclusive limit address.
    pub fn has_range_size(&self) -> bool {
        self.gen >= ClassGen::Turing
    }

    pub fn has_viewport_swizzle(&self) -> bool {
        self.gen >= ClassGen::MaxwellB
    }

    /// Programmable sample positions are only available from Maxwell B.
    pub fn has_sample_positions(&self) -> bool {
        self.gen >= ClassGen::MaxwellB
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new(ClassGen::Turing)
    }
}

// ── Buffer addressing ───────────────────────────────────────────────────────

/// A GPU virtual address with a byte range. A zero range means "unbound".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AddrRange {
    pub addr: u64,
    pub range: u64,
}

impl AddrRange {
    pub const NULL: Self = Self { addr: 0, range: 0 };

    pub fn new(addr: u64, range: u64) -> Self {
        Self { addr, range }
    }

    /// High 32 bits of the address, as written to `*_A` address methods.
    pub fn addr_hi(&self) -> u32 {
        (self.addr >> 32) as u32
    }

    /// Low 32 bits of the address, as written to `*_B` address methods.
    pub fn addr_lo(&self) -> u32 {
        self.addr as u32
    }

    /// Reassemble an address from its method halves.
    pub fn join_addr(hi: u32, lo: u32) -> u64 {
        ((hi as u64) << 32) | lo as u64
    }

    /// Inclusive last byte address; used for pre-Turing limit registers.
    pub fn limit(&self) -> u64 {
        if self.range == 0 {
            self.addr
        } else {
            self.addr + self.range - 1
        }
    }

    pub fn is_null(&self) -> bool {
        self.range == 0
    }
}

/// A buffer as handed to the encoder by the memory collaborator: a base
/// address and a size in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferRef {
    pub base: u64,
    pub size: u64,
}

impl BufferRef {
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    pub fn address(&self, offset: u64) -> u64 {
        self.base + offset
    }

    /// Address of `offset` and the range clamped to the end of the buffer.
    /// `size == WHOLE_SIZE` selects everything from `offset` onwards.
    pub fn addr_range(&self, offset: u64, size: u64) -> AddrRange {
        let available = self.size.saturating_sub(offset);
        let range = if size == WHOLE_SIZE {
            available
        } else {
            size.min(available)
        };
        AddrRange {
            addr: self.address(offset),
            range,
        }
    }
}

// ── Shader stages ───────────────────────────────────────────────────────────

/// Graphics shader stage. Each stage owns one constant-buffer bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub const COUNT: usize = 5;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        Self::Vertex,
        Self::TessCtrl,
        Self::TessEval,
        Self::Geometry,
        Self::Fragment,
    ];

    /// Index of the stage's `BIND_GROUP_CONSTANT_BUFFER` group.
    pub fn cbuf_group(self) -> u32 {
        match self {
            Self::Vertex => 0,
            Self::TessCtrl => 1,
            Self::TessEval => 2,
            Self::Geometry => 3,
            Self::Fragment => 4,
        }
    }

    pub fn index(self) -> usize {
        self.cbuf_group() as usize
    }
}
