// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Access to the PMP registers and committing shadow tables to them.

use core::ops::{Deref, DerefMut};

use kernel::{halt, MpuError};

use super::{PMPCfg, PMPShadow};

/// The PMP registers of the current hart, plus the `mstatus` bits that make
/// non-locked entries apply to machine mode.
///
/// Implementations do no validation; [`write_pmp_entries`] does.
pub trait PMPHardware {
    /// Number of implemented PMP entries.
    fn entries(&self) -> usize;

    /// Write `pmpaddr[start..end]` to the address registers, and every
    /// `pmpcfgX` word holding one of those entries from `pmpcfg`.
    ///
    /// With `clear_trailing`, all configuration words after the last one
    /// written are set to zero, turning their entries off.
    fn write_entries(
        &mut self,
        start: usize,
        end: usize,
        clear_trailing: bool,
        pmpaddr: &[usize],
        pmpcfg: &[PMPCfg],
    );

    /// Read back the address register and configuration octet of entry
    /// `index`.
    fn read_entry(&self, index: usize) -> (usize, PMPCfg);

    /// Clear `mstatus.MPRV` and `mstatus.MPP`. Machine-mode accesses then only
    /// obey locked entries.
    fn disable_machine_enforcement(&mut self);

    /// Set `mstatus.MPRV`: machine-mode loads and stores are checked like
    /// user-mode ones, so non-locked entries apply to them.
    ///
    /// `mstatus.MPP` must still be clear, see
    /// [`PMPHardware::disable_machine_enforcement`].
    fn enable_machine_enforcement(&mut self);
}

/// Keeps non-locked entries out of machine mode while it is alive.
///
/// Enforcement is turned off on creation and back on when the guard goes out
/// of scope, on every path.
pub struct EnforcementGuard<'a, H: PMPHardware> {
    hw: &'a mut H,
}

impl<'a, H: PMPHardware> EnforcementGuard<'a, H> {
    pub fn new(hw: &'a mut H) -> Self {
        hw.disable_machine_enforcement();
        EnforcementGuard { hw }
    }
}

impl<H: PMPHardware> Deref for EnforcementGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.hw
    }
}

impl<H: PMPHardware> DerefMut for EnforcementGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.hw
    }
}

impl<H: PMPHardware> Drop for EnforcementGuard<'_, H> {
    fn drop(&mut self) {
        self.hw.enable_machine_enforcement();
    }
}

/// Commit slots `[start, end)` of `table` to the hardware.
///
/// With `clear_trailing`, configuration octets following `end - 1` in its
/// `pmpcfgX` word are turned off first, in the table itself, and the hardware
/// turns off every later word, so no entry of a previously committed table
/// survives past `end`.
///
/// Halts unless `start < end <= SLOTS <= hw.entries()`.
pub fn write_pmp_entries<H: PMPHardware, const SLOTS: usize>(
    hw: &mut H,
    start: usize,
    end: usize,
    clear_trailing: bool,
    table: &mut PMPShadow<SLOTS>,
    banner: &str,
) {
    if !(start < end && end <= SLOTS && SLOTS <= hw.entries()) {
        log::error!("bad PMP range (start={} end={})", start, end);
        halt(MpuError::InvariantViolation("bad PMP range"));
    }

    if clear_trailing {
        table.clear_trailing(end);
    }

    log::debug!("PMP {}:\r\n{}", banner, table);

    hw.write_entries(start, end, clear_trailing, table.pmpaddr(), table.pmpcfg());
}
