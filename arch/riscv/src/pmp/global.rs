// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! PMP entries shared by every thread on every core.

use kernel::config::CONFIG;
use kernel::platform::mpu::{Permissions, Region};
use kernel::{halt, MpuError};

use super::{
    pmpcfg_word, write_pmp_entries, PMPCfg, PMPHardware, PMPRegisterDump, PMPShadow, PMPCFG_STRIDE,
};

/// Maximum number of slots taken by global entries.
pub const GLOBAL_SLOTS: usize = 4;

// Thread tables restore the global configuration octets by rewriting the
// first `pmpcfgX` word, so all of them have to live in it.
const _: () = assert!(GLOBAL_SLOTS <= PMPCFG_STRIDE);

/// Board memory layout relevant to memory protection.
pub struct PMPLayout {
    /// The read-only part of the kernel image (code and constants). It stays
    /// readable and executable in every mode.
    pub rom: Region,
    /// Size of the inaccessible area at the bottom of each stack. `None`
    /// disables stack guards.
    pub stack_guard_size: Option<usize>,
    /// Lowest address of each core's interrupt stack, by core id.
    pub interrupt_stacks: &'static [usize],
}

/// The global PMP entries of a core.
///
/// These take the lowest slots and are never rewritten after boot: a locked
/// read/execute entry over the read-only region and, with stack guards
/// enabled, an inaccessible entry at the bottom of the core's interrupt
/// stack. Every core must end up with the same number of entries and the same
/// configuration octets, since thread tables are built once and run on any
/// core. The read-only entries also carry the same addresses everywhere.
pub struct GlobalRegionSet {
    table: PMPShadow<GLOBAL_SLOTS>,
    /// End of the entries whose addresses don't depend on the core.
    rom_end: usize,
}

impl GlobalRegionSet {
    /// Program the global entries of core `core_id` and turn off all others.
    ///
    /// Secondary cores pass the set computed by the boot core as `primary`;
    /// a different result halts.
    pub fn init<H: PMPHardware>(
        hw: &mut H,
        layout: &PMPLayout,
        core_id: usize,
        primary: Option<&GlobalRegionSet>,
    ) -> GlobalRegionSet {
        let mut table = PMPShadow::new();

        if let Err(err) = table.push_region(
            PMPCfg::locked(Permissions::ReadExecuteOnly),
            layout.rom.start(),
            layout.rom.size(),
        ) {
            halt(err);
        }
        let rom_end = table.end();

        if let Some(guard_size) = layout.stack_guard_size {
            let Some(&irq_stack) = layout.interrupt_stacks.get(core_id) else {
                halt(MpuError::InvariantViolation("no interrupt stack for this core"));
            };
            if let Err(err) = table.push_region(PMPCfg::NO_ACCESS, irq_stack, guard_size) {
                halt(err);
            }
        }

        let end = table.end();
        write_pmp_entries(hw, 0, end, true, &mut table, "global");

        let set = GlobalRegionSet { table, rom_end };
        if let Some(primary) = primary {
            if primary.end_index() != set.end_index()
                || primary.pmpcfg_word0() != set.pmpcfg_word0()
                || primary.rom_pmpaddr() != set.rom_pmpaddr()
            {
                log::error!(
                    "core {}: global PMP entries differ (end {} vs {}, pmpcfg0 {:#x} vs {:#x})",
                    core_id,
                    set.end_index(),
                    primary.end_index(),
                    set.pmpcfg_word0(),
                    primary.pmpcfg_word0()
                );
                halt(MpuError::InvariantViolation("global PMP entries differ between cores"));
            }
        }

        if CONFIG.debug_pmp_dump {
            log::debug!("initial register dump\r\n{}", PMPRegisterDump(hw));
        }

        set
    }

    /// Index of the first slot available to threads.
    pub fn end_index(&self) -> usize {
        self.table.end()
    }

    /// Value of the first `pmpcfgX` word, which holds all global octets.
    pub fn pmpcfg_word0(&self) -> usize {
        pmpcfg_word(self.table.pmpcfg(), 0)
    }

    pub fn table(&self) -> &PMPShadow<GLOBAL_SLOTS> {
        &self.table
    }

    fn rom_pmpaddr(&self) -> &[usize] {
        &self.table.pmpaddr()[..self.rom_end]
    }

    /// Reset a thread table to start right after the global entries.
    pub fn seed<const SLOTS: usize>(&self, table: &mut PMPShadow<SLOTS>) {
        table.seed(self.end_index(), self.table.pmpcfg(), self.rom_pmpaddr());
    }
}
