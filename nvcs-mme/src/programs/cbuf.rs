// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use nvcs_common::methods;
use nvcs_common::types::{ClassGen, DeviceInfo, MAX_CBUF_SIZE};

use crate::builder::{Cmp, MmeBuilder};

/// Bind a constant buffer described by a buffer descriptor in memory.
///
/// Arguments: `group | slot << 4`, then on Turing+ the descriptor address
/// (hi, lo), which is read with a fifoed load; before Turing the host splices
/// the descriptor words into the call. The descriptor is `{addr lo, addr hi,
/// size}`. A zero size binds the slot invalid; otherwise the size is aligned
/// up and clamped to [`MAX_CBUF_SIZE`].
pub fn bind_cbuf_desc(b: &mut MmeBuilder) {
    let group_slot = b.load();

    if b.gen() >= ClassGen::Turing {
        let addr = b.load_addr64();
        b.read_fifoed(addr, 3u32);
        b.free_value64(addr);
    }

    let addr_lo = b.load();
    let addr_hi = b.load();
    let size = b.load();

    let cb = b.alloc_reg();
    b.if_then(Cmp::Eq, size, 0u32, |b| {
        // Valid bit clear, shader slot in bits 8:4.
        b.merge_to(cb, 0u32, group_slot, 4, 5, 4);
    });

    b.if_then(Cmp::Ne, size, 0u32, |b| {
        let align = DeviceInfo::new(b.gen()).min_cbuf_alignment;
        b.add_to(size, size, align - 1);
        b.and_to(size, size, !(align - 1));

        let is_large = b.and(size, !(MAX_CBUF_SIZE - 1));
        b.if_then(Cmp::Ne, is_large, 0u32, |b| {
            b.mov_to(size, MAX_CBUF_SIZE);
        });
        b.free_reg(is_large);

        b.mthd(methods::SET_CONSTANT_BUFFER_SELECTOR_A);
        b.emit(size);
        b.emit(addr_hi);
        b.emit(addr_lo);

        b.merge_to(cb, 1u32, group_slot, 4, 5, 4);
    });

    b.free_reg(addr_hi);
    b.free_reg(addr_lo);
    b.free_reg(size);

    // BIND_GROUP_CONSTANT_BUFFER has an 8-word stride.
    let group = b.alloc_reg();
    b.merge_to(group, 0u32, group_slot, 3, 4, 0);
    b.mthd_idx(methods::bind_group_constant_buffer(0), group);
    b.emit(cb);

    b.free_reg(group);
    b.free_reg(cb);
    b.free_reg(group_slot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::{run, Model};
    use crate::programs::MmeProgram;
    use nvcs_common::fields::bind_group_cbuf;

    fn group_slot(group: u32, slot: u32) -> u32 {
        group | slot << 4
    }

    #[test]
    fn test_bind_from_memory() {
        let mut m = Model::default();
        m.write_memory(0x5000, &[0x2000_0000, 0x1, 100]);
        run(MmeProgram::BindCbufDesc, ClassGen::Turing, &[group_slot(3, 5), 0, 0x5000], &mut m);
        assert_eq!(
            m.writes.iter().filter(|w| w.0 == methods::SET_CONSTANT_BUFFER_SELECTOR_A).count(),
            1
        );
        assert_eq!(m.values_of(methods::SET_CONSTANT_BUFFER_SELECTOR_A), vec![128]);
        assert_eq!(m.values_of(methods::SET_CONSTANT_BUFFER_SELECTOR_B), vec![0x1]);
        assert_eq!(m.values_of(methods::SET_CONSTANT_BUFFER_SELECTOR_C), vec![0x2000_0000]);
        assert_eq!(
            m.values_of(methods::bind_group_constant_buffer(3)),
            vec![bind_group_cbuf(true, 5)]
        );
    }

    #[test]
    fn test_zero_size_binds_invalid() {
        let mut m = Model::default();
        run(MmeProgram::BindCbufDesc, ClassGen::Pascal, &[group_slot(4, 7), 0, 0, 0], &mut m);
        assert!(m.values_of(methods::SET_CONSTANT_BUFFER_SELECTOR_A).is_empty());
        assert_eq!(
            m.values_of(methods::bind_group_constant_buffer(4)),
            vec![bind_group_cbuf(false, 7)]
        );
    }

    #[test]
    fn test_size_clamped_and_aligned() {
        let mut m = Model::default();
        run(MmeProgram::BindCbufDesc, ClassGen::Pascal, &[group_slot(0, 1), 0, 0, 0x20001], &mut m);
        assert_eq!(m.values_of(methods::SET_CONSTANT_BUFFER_SELECTOR_A), vec![MAX_CBUF_SIZE]);

        let mut m = Model::default();
        run(MmeProgram::BindCbufDesc, ClassGen::Pascal, &[group_slot(0, 1), 0, 0, 300], &mut m);
        assert_eq!(m.values_of(methods::SET_CONSTANT_BUFFER_SELECTOR_A), vec![512]);
    }
}
