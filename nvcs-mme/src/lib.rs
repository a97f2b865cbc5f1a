// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Macro-unit microprograms: instruction encoding, a small builder with a
//! register arena, the program library and an interpreter that executes the
//! assembled bytecode.

pub mod assembler;
pub mod builder;
pub mod image;
pub mod interpreter;
pub mod ir;
pub mod isa;
pub mod programs;

use thiserror::Error;

pub use builder::{Cmp, MmeBuilder};
pub use image::MmeImage;
pub use ir::{Reg, Value, Value64};
pub use programs::{MmeProgram, MmeScratch};

/// Errors raised while building or assembling a microprogram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MmeError {
    #[error("out of macro registers")]
    OutOfRegisters,
    #[error("immediate {0} does not fit its instruction field")]
    ImmediateOutOfRange(i64),
    #[error("unbalanced control flow")]
    UnbalancedControlFlow,
    #[error("branch target out of range")]
    BranchOutOfRange,
    #[error("macro image too large: {words} words (max {max})")]
    ImageTooLarge { words: usize, max: usize },
}
