// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! In-memory copies of PMP register contents and the region encoder.

use kernel::{halt, MpuError};

use super::entry::PMPEntry;
use super::{PMPCfg, PMPCFG_STRIDE};

/// A shadow copy of the PMP registers.
///
/// Entry `i` of the table describes PMP slot `i`. Tables are only ever
/// written by [`PMPShadow::push_region`] and copied to hardware by
/// [`write_pmp_entries`](super::write_pmp_entries), so a committed table is
/// an exact picture of what the hardware enforces for its slots.
///
/// Slots below `base` belong to the global region set and are never written
/// to hardware from a thread table. The table keeps their configuration
/// octets sharing the first `pmpcfgX` word, since that word is always written
/// as a whole. Addresses are kept for the first `inherited` slots only: those
/// hold the same value on every core, so a TOR entry at `base` may use them
/// as its lower bound.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PMPShadow<const SLOTS: usize> {
    pmpaddr: [usize; SLOTS],
    pmpcfg: [PMPCfg; SLOTS],
    base: usize,
    inherited: usize,
    end: usize,
}

impl<const SLOTS: usize> PMPShadow<SLOTS> {
    pub const fn new() -> Self {
        PMPShadow {
            pmpaddr: [0; SLOTS],
            pmpcfg: [PMPCfg::OFF; SLOTS],
            base: 0,
            inherited: 0,
            end: 0,
        }
    }

    /// Index of the first slot after the entries encoded so far.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Index of the first slot this table owns.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn pmpaddr(&self) -> &[usize] {
        &self.pmpaddr
    }

    pub fn pmpcfg(&self) -> &[PMPCfg] {
        &self.pmpcfg
    }

    pub fn entry(&self, index: usize) -> PMPEntry {
        PMPEntry::decode(self.pmpaddr[index], self.pmpcfg[index])
    }

    /// Empty the table and make it start at slot `base`.
    ///
    /// `prefix_cfg` holds the configuration octets of the slots below
    /// `base`. Only those sharing the first `pmpcfgX` word are copied.
    /// `prefix_addr` holds the address registers of the leading slots whose
    /// value doesn't depend on the core.
    pub fn seed(&mut self, base: usize, prefix_cfg: &[PMPCfg], prefix_addr: &[usize]) {
        *self = Self::new();
        let shared = prefix_cfg.len().min(PMPCFG_STRIDE).min(SLOTS);
        self.pmpcfg[..shared].copy_from_slice(&prefix_cfg[..shared]);
        let inherited = prefix_addr.len().min(base).min(SLOTS);
        self.pmpaddr[..inherited].copy_from_slice(&prefix_addr[..inherited]);
        self.base = base;
        self.inherited = inherited;
        self.end = base;
    }

    /// Drop every entry from slot `end` onward, keeping the slots below it.
    pub fn truncate(&mut self, end: usize) {
        let end = end.max(self.base);
        for index in end..self.end {
            self.pmpaddr[index] = 0;
            self.pmpcfg[index] = PMPCfg::OFF;
        }
        self.end = self.end.min(end);
    }

    /// Turn off the configuration octets that follow slot `end - 1` in the
    /// same `pmpcfgX` word.
    pub(crate) fn clear_trailing(&mut self, end: usize) {
        let word_end = end.next_multiple_of(PMPCFG_STRIDE).min(SLOTS);
        for cfg in self.pmpcfg[end.min(word_end)..word_end].iter_mut() {
            *cfg = PMPCfg::OFF;
        }
    }

    /// Replace the address register of the last encoded slot.
    pub(crate) fn override_last_pmpaddr(&mut self, pmpaddr: usize) {
        if self.end > self.base {
            self.pmpaddr[self.end - 1] = pmpaddr;
        }
    }

    fn set(&mut self, index: usize, entry: PMPEntry, perm: PMPCfg) {
        let cfg = perm.with_mode(entry.mode());
        self.pmpaddr[index] = entry.pmpaddr();
        self.pmpcfg[index] = cfg;
        log::trace!(
            "PMP slot {}: pmpaddr={:#x} cfg={:#04x} {:?}",
            index,
            self.pmpaddr[index],
            cfg.get(),
            entry
        );
    }

    /// Append entries granting `perm` over `[start, start + size)`.
    ///
    /// Picks the cheapest encoding available at the current end of the table:
    ///
    /// - a single TOR entry when the previous slot already ends at `start`
    ///   (or the region starts at 0 in slot 0),
    /// - a single NA4/NAPOT entry for naturally aligned power-of-two regions,
    /// - otherwise an OFF entry holding the lower bound followed by a TOR
    ///   entry.
    ///
    /// `start = 0, size = 0` stands for the whole address space and always
    /// takes exactly one NAPOT slot.
    ///
    /// Regions are neither merged, reordered nor checked for overlap; entries
    /// already in the table take precedence over later ones. On
    /// [`MpuError::SlotExhaustion`] the table is left unchanged.
    ///
    /// Misaligned or wrapping regions are a programming error and halt.
    pub fn push_region(&mut self, perm: PMPCfg, start: usize, size: usize) -> Result<(), MpuError> {
        if start & 0x3 != 0 {
            halt(MpuError::InvariantViolation("misaligned start address"));
        }
        if size & 0x3 != 0 {
            halt(MpuError::InvariantViolation("misaligned size"));
        }

        let index = self.end;
        if index >= SLOTS {
            log::error!("out of PMP slots");
            return Err(MpuError::SlotExhaustion {
                needed: 1,
                available: 0,
            });
        }

        if size == 0 {
            if start != 0 {
                halt(MpuError::InvariantViolation("empty PMP region"));
            }
            self.set(index, PMPEntry::napot(0, 0), perm);
            self.end = index + 1;
            return Ok(());
        }

        let naturally_aligned = size.is_power_of_two() && start & (size - 1) == 0;
        let end = match start.checked_add(size) {
            Some(end) => end,
            // A NAPOT entry can end at the top of the address space, TOR
            // can't express that bound.
            None if naturally_aligned && start.wrapping_add(size) == 0 => 0,
            None => halt(MpuError::InvariantViolation("PMP region wraps around")),
        };

        // The previous address is usable if this table wrote it, or if it was
        // inherited from a global entry that is the same on every core.
        let previous_known = index > self.base || (index > 0 && index <= self.inherited);
        let follows_previous = (index == 0 && start == 0)
            || (previous_known && self.pmpaddr[index - 1] == start >> 2);

        if follows_previous && end != 0 {
            self.set(index, PMPEntry::Tor { end }, perm);
            self.end = index + 1;
        } else if naturally_aligned {
            let entry = if size == 4 {
                PMPEntry::Na4 { start }
            } else {
                PMPEntry::napot(start, size)
            };
            self.set(index, entry, perm);
            self.end = index + 1;
        } else if index + 1 >= SLOTS {
            log::error!("out of PMP slots");
            return Err(MpuError::SlotExhaustion {
                needed: 2,
                available: SLOTS - index,
            });
        } else {
            self.set(
                index,
                PMPEntry::Off {
                    pmpaddr: start >> 2,
                },
                PMPCfg::OFF,
            );
            self.set(index + 1, PMPEntry::Tor { end }, perm);
            self.end = index + 2;
        }
        Ok(())
    }
}

impl<const SLOTS: usize> Default for PMPShadow<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}
