// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! PMP and `mstatus` CSR access on the current hart.

use core::arch::asm;

use crate::pmp::{pmpcfg_word, PMPCfg, PMPHardware, PMPCFG_STRIDE};

/// Modify PRiVilege: machine-mode loads and stores use the privilege in MPP.
const MSTATUS_MPRV: usize = 1 << 17;
/// Machine Previous Privilege, two bits.
const MSTATUS_MPP: usize = 0b11 << 11;

/// CSR numbers are immediates, so a runtime index has to be dispatched to one
/// instruction per register.
macro_rules! pmpaddr_dispatch {
    ($index:expr, $op:ident, $($n:literal)*) => {
        match $index {
            $($n => $op!($n),)*
            _ => unreachable_pmp_entry(),
        }
    };
}

macro_rules! pmpcfg_dispatch {
    ($index:expr, $op:ident) => {
        match $index {
            0 => $op!(0),
            1 => $op!(1),
            2 => $op!(2),
            3 => $op!(3),
            _ => unreachable_pmp_entry(),
        }
    };
}

#[cold]
fn unreachable_pmp_entry() -> ! {
    kernel::halt(kernel::MpuError::InvariantViolation("PMP register index out of range"))
}

/// The PMP of the hart this code runs on, with `ENTRIES` implemented entries.
pub struct CsrPMP<const ENTRIES: usize> {
    _private: (),
}

impl<const ENTRIES: usize> CsrPMP<ENTRIES> {
    const CONST_ASSERT_CHECK: () = assert!(ENTRIES > 0 && ENTRIES <= 16);

    /// # Safety
    ///
    /// Must run in machine mode, on a hart implementing at least `ENTRIES`
    /// PMP entries. Only one instance may exist per hart.
    pub const unsafe fn new() -> Self {
        let _: () = Self::CONST_ASSERT_CHECK;
        CsrPMP { _private: () }
    }

    fn write_pmpaddr(&mut self, index: usize, value: usize) {
        macro_rules! csrw {
            ($n:literal) => {
                // SAFETY: writing a PMP address register has no effect on
                // memory safety of machine-mode code without MPRV.
                unsafe { asm!(concat!("csrw pmpaddr", stringify!($n), ", {0}"), in(reg) value) }
            };
        }
        pmpaddr_dispatch!(index, csrw, 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15)
    }

    fn read_pmpaddr(&self, index: usize) -> usize {
        let value: usize;
        macro_rules! csrr {
            ($n:literal) => {
                // SAFETY: reading a CSR has no side effects.
                unsafe { asm!(concat!("csrr {0}, pmpaddr", stringify!($n)), out(reg) value) }
            };
        }
        pmpaddr_dispatch!(index, csrr, 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15);
        value
    }

    /// Number of the `pmpcfgX` CSR holding configuration word `word`. RV64
    /// only has the even-numbered ones.
    fn pmpcfg_csr(word: usize) -> usize {
        word * (PMPCFG_STRIDE / 4)
    }

    fn write_pmpcfg(&mut self, word: usize, value: usize) {
        macro_rules! csrw {
            ($n:literal) => {
                // SAFETY: see `write_pmpaddr`. Locked octets ignore writes.
                unsafe { asm!(concat!("csrw pmpcfg", stringify!($n), ", {0}"), in(reg) value) }
            };
        }
        pmpcfg_dispatch!(Self::pmpcfg_csr(word), csrw)
    }

    fn read_pmpcfg(&self, word: usize) -> usize {
        let value: usize;
        macro_rules! csrr {
            ($n:literal) => {
                // SAFETY: reading a CSR has no side effects.
                unsafe { asm!(concat!("csrr {0}, pmpcfg", stringify!($n)), out(reg) value) }
            };
        }
        pmpcfg_dispatch!(Self::pmpcfg_csr(word), csrr);
        value
    }
}

impl<const ENTRIES: usize> PMPHardware for CsrPMP<ENTRIES> {
    fn entries(&self) -> usize {
        ENTRIES
    }

    fn write_entries(
        &mut self,
        start: usize,
        end: usize,
        clear_trailing: bool,
        pmpaddr: &[usize],
        pmpcfg: &[PMPCfg],
    ) {
        for index in start..end {
            self.write_pmpaddr(index, pmpaddr[index]);
        }

        let last_word = (end - 1) / PMPCFG_STRIDE;
        for word in start / PMPCFG_STRIDE..=last_word {
            self.write_pmpcfg(word, pmpcfg_word(pmpcfg, word));
        }

        if clear_trailing {
            for word in last_word + 1..ENTRIES.div_ceil(PMPCFG_STRIDE) {
                self.write_pmpcfg(word, 0);
            }
        }
    }

    fn read_entry(&self, index: usize) -> (usize, PMPCfg) {
        let word = self.read_pmpcfg(index / PMPCFG_STRIDE);
        let octet = (word >> (8 * (index % PMPCFG_STRIDE))) as u8;
        (self.read_pmpaddr(index), PMPCfg::new(octet))
    }

    fn disable_machine_enforcement(&mut self) {
        // SAFETY: only widens what machine mode may access.
        unsafe { asm!("csrc mstatus, {0}", in(reg) MSTATUS_MPRV | MSTATUS_MPP) }
    }

    fn enable_machine_enforcement(&mut self) {
        // SAFETY: the caller has programmed the entries that now apply to
        // machine-mode loads and stores, including a whole-space fallback.
        unsafe { asm!("csrs mstatus, {0}", in(reg) MSTATUS_MPRV) }
    }
}
