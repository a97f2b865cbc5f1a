// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use nvcs_common::methods;

use super::{load_scratch, MmeScratch};
use crate::builder::{Cmp, MmeBuilder};

/// Privileged-register write through the firmware handshake.
///
/// Arguments: register address, value, mask. Scratch 0 is cleared, the
/// arguments go to scratch 1..=2 and the mask to `SET_FALCON04`; the firmware
/// sets scratch 0 to 1 once the write is done, which the program waits for.
pub fn set_priv_reg(b: &mut MmeBuilder) {
    b.mthd(methods::WAIT_FOR_IDLE);
    b.emit(0u32);

    b.mthd(methods::set_mme_shadow_scratch(0));
    b.emit(0u32);
    for _ in 0..2 {
        let v = b.load();
        b.emit(v);
        b.free_reg(v);
    }

    // Scratch 26 is read before the FALCON04 write.
    let s26 = b.state(methods::set_mme_shadow_scratch(26));
    b.free_reg(s26);

    b.mthd(methods::SET_FALCON04);
    let v = b.load();
    b.emit(v);
    b.free_reg(v);

    let done = b.mov(0u32);
    b.while_loop(Cmp::Ne, done, 1u32, |b| {
        b.state_to(done, methods::set_mme_shadow_scratch(0));
        b.mthd(methods::NO_OPERATION);
        b.emit(0u32);
    });
    b.free_reg(done);
}

/// Colour write masks: the dynamic write-enable bits ANDed with the
/// pipeline's masks, one nibble per target (`abgr`, target 0 in bits 3:0).
///
/// Argument: number of targets. Emits one `SET_CT_WRITE` per target, then
/// enables single-target write control when every target's mask matches the
/// first.
pub fn set_write_mask(b: &mut MmeBuilder) {
    let count = b.load();
    let pipeline = load_scratch(b, MmeScratch::WriteMaskPipeline);
    let dynamic = load_scratch(b, MmeScratch::WriteMaskDyn);
    let mask = b.and(pipeline, dynamic);
    b.free_reg(pipeline);
    b.free_reg(dynamic);

    let common = b.mov(1u32);
    let first = b.and(mask, 0xFu32);
    let i = b.mov(0u32);
    b.while_loop(Cmp::Ne, i, count, |b| {
        // Spread abgr to bits 0, 4, 8 and 12.
        let val = b.bfe(mask, 0u32, 1);
        b.merge_to(val, val, mask, 4, 1, 1);
        b.merge_to(val, val, mask, 8, 1, 2);
        b.merge_to(val, val, mask, 12, 1, 3);
        b.mthd_idx(methods::set_ct_write(0), i);
        b.emit(val);
        b.free_reg(val);

        let cur = b.and(mask, 0xFu32);
        b.if_then(Cmp::Ne, first, cur, |b| {
            b.mov_to(common, 0u32);
        });
        b.free_reg(cur);

        b.srl_to(mask, mask, 4);
        b.add_to(i, i, 1u32);
    });

    b.mthd(methods::SET_SINGLE_CT_WRITE_CONTROL);
    b.emit(common);

    for r in [count, mask, common, first, i] {
        b.free_reg(r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::{run, Model};
    use crate::programs::MmeProgram;
    use nvcs_common::types::ClassGen;

    #[test]
    fn test_priv_reg_handshake() {
        let mut m = Model::default();
        run(MmeProgram::SetPrivReg, ClassGen::MaxwellB, &[0x418800, 0x1, 0x3], &mut m);
        assert_eq!(m.values_of(methods::WAIT_FOR_IDLE), vec![0]);
        assert_eq!(m.values_of(methods::set_mme_shadow_scratch(1)), vec![0x418800]);
        assert_eq!(m.values_of(methods::set_mme_shadow_scratch(2)), vec![0x1]);
        assert_eq!(m.values_of(methods::SET_FALCON04), vec![0x3]);
        // The model acknowledges immediately: one poll.
        assert_eq!(m.values_of(methods::NO_OPERATION).len(), 1);
    }

    #[test]
    fn test_write_mask_composition() {
        let mut m = Model::default();
        // Pipeline: target 0 rgba, target 1 rgba. Dynamic: target 0 only.
        m.set_reg(MmeScratch::WriteMaskPipeline.method(), 0xFF);
        m.set_reg(MmeScratch::WriteMaskDyn.method(), 0x0F);
        run(MmeProgram::SetWriteMask, ClassGen::Turing, &[2], &mut m);
        assert_eq!(m.values_of(methods::set_ct_write(0)), vec![0x1111]);
        assert_eq!(m.values_of(methods::set_ct_write(1)), vec![0]);
        assert_eq!(m.values_of(methods::SET_SINGLE_CT_WRITE_CONTROL), vec![0]);
    }

    #[test]
    fn test_write_mask_common() {
        let mut m = Model::default();
        m.set_reg(MmeScratch::WriteMaskPipeline.method(), 0x5555);
        m.set_reg(MmeScratch::WriteMaskDyn.method(), 0xFFFF);
        run(MmeProgram::SetWriteMask, ClassGen::Turing, &[4], &mut m);
        assert_eq!(m.values_of(methods::set_ct_write(3)), vec![0x0101]);
        assert_eq!(m.values_of(methods::SET_SINGLE_CT_WRITE_CONTROL), vec![1]);
    }
}
