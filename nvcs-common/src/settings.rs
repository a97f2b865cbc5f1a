// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use bitflags::bitflags;

use crate::types::ClassGen;

/// Hardware maximum for the count field of a method header.
pub const MAX_PUSH_COUNT: u32 = 0x1FFF;

/// Hardware maximum length of a single push segment, in words.
pub const MAX_SEGMENT_WORDS: u32 = 0x1F_FFFF;

/// Environment variable holding comma-separated debug flags.
pub const DEBUG_ENV_VAR: &str = "NVCS_DEBUG";

bitflags! {
    /// Debugging switches for the encoder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Log a decoded dump of every segment when a recording ends.
        const PUSH_DUMP   = 1 << 0;
        /// Wait for idle after every draw.
        const PUSH_SYNC   = 1 << 1;
        /// Zero-fill push chunks when they are allocated.
        const ZERO_MEMORY = 1 << 2;
        /// Never bind constant buffers through the descriptor-read program.
        const NO_CBUF_MME = 1 << 3;
    }
}

impl DebugFlags {
    /// Parse a comma-separated flag list such as `push_dump,push_sync`.
    /// Unknown names are logged and skipped.
    pub fn from_str_or_default(s: &str) -> Self {
        let mut flags = Self::empty();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_lowercase().as_str() {
                "push_dump" => flags |= Self::PUSH_DUMP,
                "push_sync" => flags |= Self::PUSH_SYNC,
                "zero_memory" => flags |= Self::ZERO_MEMORY,
                "no_cbuf_mme" => flags |= Self::NO_CBUF_MME,
                other => log::warn!("Unknown debug flag '{}'", other),
            }
        }
        flags
    }

    /// Flags from `NVCS_DEBUG`, or none if it is unset.
    pub fn from_env() -> Self {
        match std::env::var(DEBUG_ENV_VAR) {
            Ok(value) => Self::from_str_or_default(&value),
            Err(_) => Self::empty(),
        }
    }
}

/// Encoder settings, populated from defaults, the environment and the
/// optional config INI.
#[derive(Debug, Clone)]
pub struct Settings {
    // Debug
    pub debug_flags: DebugFlags,

    // Push stream
    /// Largest count written into a single method header.
    pub max_push_count: u32,
    /// Size of each push chunk allocation, in words.
    pub push_chunk_words: u32,

    // Device
    pub generation: ClassGen,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_flags: DebugFlags::empty(),
            max_push_count: MAX_PUSH_COUNT,
            push_chunk_words: 0x4000,
            generation: ClassGen::Turing,
        }
    }
}

impl Settings {
    /// Defaults with debug flags taken from the environment.
    pub fn from_env() -> Self {
        Self {
            debug_flags: DebugFlags::from_env(),
            ..Self::default()
        }
    }

    pub fn has_debug(&self, flag: DebugFlags) -> bool {
        self.debug_flags.contains(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flags_parse() {
        let flags = DebugFlags::from_str_or_default("push_dump, PUSH_SYNC,,bogus");
        assert_eq!(flags, DebugFlags::PUSH_DUMP | DebugFlags::PUSH_SYNC);
        assert_eq!(DebugFlags::from_str_or_default(""), DebugFlags::empty());
    }

    #[test]
    fn test_settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.max_push_count, 0x1FFF);
        assert!(s.push_chunk_words <= MAX_SEGMENT_WORDS);
        assert!(!s.has_debug(DebugFlags::PUSH_DUMP));
    }
}
