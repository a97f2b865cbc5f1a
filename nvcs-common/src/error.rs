// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

/// Error recorded by a command buffer while encoding.
///
/// The first error sticks: once a command buffer has failed, later recording
/// calls are dropped and `end()` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CmdError {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("invalid command buffer state: {0}")]
    InvalidState(&'static str),
}

/// Result alias for command-encoding operations.
pub type CmdResult<T> = Result<T, CmdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(CmdError::OutOfHostMemory.to_string(), "out of host memory");
        assert_eq!(
            CmdError::InvalidState("not recording").to_string(),
            "invalid command buffer state: not recording"
        );
    }
}
