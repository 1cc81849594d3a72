// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A software model of the PMP registers for unit tests.

use std::vec::Vec;

use super::{PMPCfg, PMPEntry, PMPHardware, PMPCFG_STRIDE};

pub struct SimulatedPMP<const ENTRIES: usize> {
    pmpaddr: [usize; ENTRIES],
    pmpcfg: [PMPCfg; ENTRIES],
    mprv: bool,
    mpp_clear: bool,
    writes: Vec<(usize, usize, bool)>,
}

impl<const ENTRIES: usize> SimulatedPMP<ENTRIES> {
    pub fn new() -> Self {
        SimulatedPMP {
            pmpaddr: [0; ENTRIES],
            pmpcfg: [PMPCfg::OFF; ENTRIES],
            mprv: false,
            mpp_clear: false,
            writes: Vec::new(),
        }
    }

    pub fn cfg(&self, index: usize) -> PMPCfg {
        self.pmpcfg[index]
    }

    pub fn mprv(&self) -> bool {
        self.mprv
    }

    /// Every `write_entries` call so far, as `(start, end, clear_trailing)`.
    pub fn writes(&self) -> &[(usize, usize, bool)] {
        &self.writes
    }

    /// The entry deciding an access to `[addr, addr + size)` that is subject
    /// to non-locked entries, together with whether it matches every byte.
    fn first_match(&self, addr: usize, size: usize) -> Option<(PMPCfg, bool)> {
        let last = addr + (size - 1);
        (0..ENTRIES).find_map(|i| {
            let prev = if i == 0 { 0 } else { self.pmpaddr[i - 1] };
            let range = PMPEntry::decode(self.pmpaddr[i], self.pmpcfg[i]).matched_range(prev)?;
            let touches = *range.start() <= last && addr <= *range.end();
            touches.then(|| (self.pmpcfg[i], range.contains(&addr) && range.contains(&last)))
        })
    }

    fn permits(cfg: PMPCfg, write: bool) -> bool {
        if write {
            cfg.writable()
        } else {
            cfg.readable()
        }
    }

    /// Whether a user-mode load or store of `size` bytes at `addr` succeeds.
    ///
    /// The lowest-numbered entry matching any byte decides, and it has to
    /// match all of them. Unmatched accesses fail.
    pub fn user_access(&self, addr: usize, size: usize, write: bool) -> bool {
        match self.first_match(addr, size) {
            Some((cfg, whole)) => whole && Self::permits(cfg, write),
            None => false,
        }
    }

    /// Whether a machine-mode load or store succeeds.
    ///
    /// With `mstatus.MPRV` set (and `MPP` cleared to user) the access is
    /// checked like a user-mode one. Otherwise only locked entries apply, and
    /// unmatched accesses succeed.
    pub fn machine_access(&self, addr: usize, size: usize, write: bool) -> bool {
        if self.mprv && self.mpp_clear {
            return self.user_access(addr, size, write);
        }
        match self.first_match(addr, size) {
            Some((cfg, whole)) if cfg.is_locked() => whole && Self::permits(cfg, write),
            _ => true,
        }
    }
}

impl<const ENTRIES: usize> PMPHardware for SimulatedPMP<ENTRIES> {
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
        self.writes.push((start, end, clear_trailing));

        self.pmpaddr[start..end].copy_from_slice(&pmpaddr[start..end]);

        let first_octet = start / PMPCFG_STRIDE * PMPCFG_STRIDE;
        let word_end = ((end - 1) / PMPCFG_STRIDE + 1) * PMPCFG_STRIDE;
        for index in first_octet..word_end.min(ENTRIES) {
            self.pmpcfg[index] = pmpcfg.get(index).copied().unwrap_or(PMPCfg::OFF);
        }

        if clear_trailing {
            for index in word_end.min(ENTRIES)..ENTRIES {
                self.pmpcfg[index] = PMPCfg::OFF;
            }
        }
    }

    fn read_entry(&self, index: usize) -> (usize, PMPCfg) {
        (self.pmpaddr[index], self.pmpcfg[index])
    }

    fn disable_machine_enforcement(&mut self) {
        self.mprv = false;
        self.mpp_clear = true;
    }

    fn enable_machine_enforcement(&mut self) {
        self.mprv = true;
    }
}
