// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The instruction-memory image: every program for one generation, laid out
//! back to back, with one start address per program id.

use nvcs_common::types::ClassGen;

use crate::programs::{self, MmeProgram};
use crate::MmeError;

/// Instruction RAM size in words.
pub fn max_words(gen: ClassGen) -> usize {
    if gen >= ClassGen::Turing {
        3072
    } else {
        2048
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmeImage {
    gen: ClassGen,
    code: Vec<u32>,
    starts: Vec<u32>,
}

impl MmeImage {
    pub fn build(gen: ClassGen) -> Result<Self, MmeError> {
        let mut code = Vec::new();
        let mut starts = Vec::with_capacity(MmeProgram::COUNT);
        for program in MmeProgram::ALL {
            starts.push(code.len() as u32);
            code.extend(programs::build(program, gen)?);
        }

        let max = max_words(gen);
        if code.len() > max {
            return Err(MmeError::ImageTooLarge { words: code.len(), max });
        }
        log::debug!("MME image for {:?}: {} programs, {} words", gen, starts.len(), code.len());
        Ok(Self { gen, code, starts })
    }

    pub fn gen(&self) -> ClassGen {
        self.gen
    }

    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Start address of each program, indexed by program id.
    pub fn starts(&self) -> &[u32] {
        &self.starts
    }

    pub fn start(&self, program: MmeProgram) -> u32 {
        self.starts[program.id() as usize]
    }

    /// Words belonging to `program`.
    pub fn program_code(&self, program: MmeProgram) -> &[u32] {
        let id = program.id() as usize;
        let start = self.starts[id] as usize;
        let end = self.starts.get(id + 1).map_or(self.code.len(), |&s| s as usize);
        &self.code[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::MacroInterpreter;
    use crate::programs::testing::Model;
    use nvcs_common::methods;

    #[test]
    fn test_image_fits_every_generation() {
        for gen in ClassGen::ALL {
            let image = MmeImage::build(gen).unwrap();
            assert!(image.code().len() <= max_words(gen));
            assert_eq!(image.starts().len(), MmeProgram::COUNT);
            assert_eq!(image.start(MmeProgram::SetPrivReg), 0);
        }
    }

    #[test]
    fn test_starts_are_program_boundaries() {
        let image = MmeImage::build(ClassGen::Turing).unwrap();
        for program in MmeProgram::ALL {
            let code = programs::build(program, ClassGen::Turing).unwrap();
            assert_eq!(image.program_code(program), &code[..]);
        }
    }

    #[test]
    fn test_slot_execution_from_image() {
        let image = MmeImage::build(ClassGen::Turing).unwrap();
        let mut interp = MacroInterpreter::new();
        interp.load_image(&image);
        let mut m = Model::default();
        assert!(interp.execute(MmeProgram::Draw.id(), &[0x4, 0, 3, 1, 0, 0], &mut m));
        assert_eq!(m.values_of(methods::SET_VERTEX_ARRAY_COUNT), vec![3]);
    }
}
