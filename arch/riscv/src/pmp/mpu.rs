// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The PMP-backed implementation of the kernel's [`MPU`] trait.

use kernel::config::CONFIG;
use kernel::memory_domain::DomainPartitions;
use kernel::platform::mpu::{Permissions, Region, UserRegionSync, MPU};
use kernel::{halt, MpuError, Partition, Thread};

use super::thread::UNSYNCED;
use super::{
    write_pmp_entries, EnforcementGuard, GlobalRegionSet, PMPCfg, PMPHardware, PMPLayout,
    PMPRegisterDump, PMPShadow, PMPThreadConfig, GLOBAL_SLOTS,
};

/// Memory protection through `SLOTS` PMP entries of the hardware `H`.
///
/// Machine mode is protected by per-thread stack guards, enforced through
/// `mstatus.MPRV`, when the layout enables them. User mode gets access to its
/// stack, the read-only region and the partitions of its memory domain.
///
/// Each core owns one instance, created with [`PMPDomainMPU::new`] on the boot
/// core and [`PMPDomainMPU::new_secondary`] on the others.
pub struct PMPDomainMPU<const SLOTS: usize, H: PMPHardware> {
    hw: H,
    layout: PMPLayout,
    global: GlobalRegionSet,
}

impl<const SLOTS: usize, H: PMPHardware> PMPDomainMPU<SLOTS, H> {
    // Thread entries need at least one slot past the global ones, and the
    // hardware has at most 64 entries.
    const CONST_ASSERT_CHECK: () = assert!(SLOTS > GLOBAL_SLOTS && SLOTS <= 64);

    /// Set up the boot core, programming its global entries.
    pub fn new(hw: H, layout: PMPLayout, core_id: usize) -> Self {
        Self::init(hw, layout, core_id, None)
    }

    /// Set up another core. Its global entries have to match `primary`'s.
    pub fn new_secondary(
        hw: H,
        layout: PMPLayout,
        core_id: usize,
        primary: &GlobalRegionSet,
    ) -> Self {
        Self::init(hw, layout, core_id, Some(primary))
    }

    fn init(
        mut hw: H,
        layout: PMPLayout,
        core_id: usize,
        primary: Option<&GlobalRegionSet>,
    ) -> Self {
        let _: () = Self::CONST_ASSERT_CHECK;

        if hw.entries() < SLOTS {
            halt(MpuError::InvariantViolation("fewer PMP entries than slots"));
        }

        let global = GlobalRegionSet::init(&mut hw, &layout, core_id, primary);
        PMPDomainMPU { hw, layout, global }
    }

    pub fn global(&self) -> &GlobalRegionSet {
        &self.global
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    fn stack_guard_enabled(&self) -> bool {
        self.layout.stack_guard_size.is_some()
    }

    fn dump(&self, banner: &str) {
        if CONFIG.debug_pmp_dump {
            log::debug!("{}\r\n{}", banner, PMPRegisterDump(&self.hw));
        }
    }

    /// Rebuild the partition entries of a user table from `domain`.
    ///
    /// Must be called with the domain lock held. Running out of slots is
    /// fatal: the domain admitted the partition on an optimistic estimate.
    fn resync(config: &mut PMPThreadConfig<SLOTS>, domain: &DomainPartitions) {
        let u_mode = &mut config.u_mode;
        u_mode.truncate(config.u_mode_domain_offset);

        let mut remaining = domain.num_partitions();
        for partition in domain.partitions() {
            if partition.size < 4 {
                // 4 bytes is the minimum we can map.
                log::error!("non-empty partition too small");
                halt(MpuError::InvariantViolation("non-empty partition too small"));
            }

            if let Err(err) =
                u_mode.push_region(PMPCfg::from(partition.attr), partition.start, partition.size)
            {
                log::error!("no PMP slot left for {} remaining partitions", remaining);
                halt(err);
            }
            remaining -= 1;
        }

        config.u_mode_sync_version = domain.generation();
        log::debug!(
            "PMP user entries resynced to domain generation {} ({} slots)",
            domain.generation(),
            u_mode.end() - config.u_mode_domain_offset
        );
    }
}

impl<const SLOTS: usize, H: PMPHardware> MPU for PMPDomainMPU<SLOTS, H> {
    type ThreadConfig = PMPThreadConfig<SLOTS>;

    fn stackguard_prepare(&self, thread: &mut Thread<'_, Self::ThreadConfig>) {
        let Some(guard_size) = self.layout.stack_guard_size else {
            return;
        };

        // Make the bottom addresses of the privileged stack inaccessible.
        let stack_bottom = thread.privileged_stack_bottom();
        let m_mode = &mut thread.arch.m_mode;
        self.global.seed(m_mode);

        // Anything not matched by an entry must stay accessible, as it is for
        // machine mode without MPRV.
        let result = m_mode
            .push_region(PMPCfg::NO_ACCESS, stack_bottom, guard_size)
            .and_then(|()| m_mode.push_region(PMPCfg::from(Permissions::ReadWriteExecute), 0, 0));
        if let Err(err) = result {
            halt(err);
        }

        if CONFIG.qemu_pmp_workaround {
            // QEMU misreads the correct whole-address-space NAPOT value, but
            // understands all ones.
            m_mode.override_last_pmpaddr(usize::MAX);
        }
    }

    fn stackguard_enable(&mut self, thread: &mut Thread<'_, Self::ThreadConfig>) {
        if !self.stack_guard_enabled() {
            return;
        }
        log::debug!("pmp_stackguard_enable for stack at {:#x}", thread.stack_info.start);

        let m_mode = &mut thread.arch.m_mode;
        let end = m_mode.end();
        {
            // Non-locked entries must not apply to machine mode while they are
            // being rewritten.
            let mut hw = EnforcementGuard::new(&mut self.hw);
            write_pmp_entries(&mut *hw, self.global.end_index(), end, false, m_mode, "m-mode");
        }
        self.dump("m-mode register dump");
    }

    fn usermode_init(&self, thread: &mut Thread<'_, Self::ThreadConfig>) {
        thread.arch.u_mode = PMPShadow::new();
        thread.arch.u_mode_domain_offset = 0;
        thread.arch.u_mode_sync_version = UNSYNCED;
    }

    fn usermode_prepare(&self, thread: &mut Thread<'_, Self::ThreadConfig>) {
        let stack = thread.stack_info;
        let config = &mut thread.arch;
        self.global.seed(&mut config.u_mode);

        if let Err(err) = config.u_mode.push_region(
            PMPCfg::from(Permissions::ReadWriteOnly),
            stack.start,
            stack.size,
        ) {
            halt(err);
        }

        config.u_mode_domain_offset = config.u_mode.end();
        config.u_mode_sync_version = UNSYNCED;
    }

    fn usermode_enable(&mut self, thread: &mut Thread<'_, Self::ThreadConfig>) -> UserRegionSync {
        if !thread.arch.usermode_prepared() {
            return UserRegionSync::NotPrepared;
        }

        let mut sync = UserRegionSync::InSync;
        match thread.mem_domain() {
            Some(domain) => {
                let partitions = domain.lock();
                if thread.arch.u_mode_sync_version != partitions.generation() {
                    Self::resync(&mut thread.arch, &partitions);
                    sync = UserRegionSync::Resynced;
                }
            }
            None => {
                let config = &mut thread.arch;
                if config.u_mode.end() != config.u_mode_domain_offset {
                    config.u_mode.truncate(config.u_mode_domain_offset);
                    sync = UserRegionSync::Resynced;
                }
                config.u_mode_sync_version = UNSYNCED;
            }
        }
        log::debug!(
            "pmp_usermode_enable for stack at {:#x}: {:?}",
            thread.stack_info.start,
            sync
        );

        if self.stack_guard_enabled() {
            // The stack guard entries are about to be overwritten. They are
            // turned back on by the next `stackguard_enable`.
            self.hw.disable_machine_enforcement();
        }

        let u_mode = &mut thread.arch.u_mode;
        let end = u_mode.end();
        write_pmp_entries(&mut self.hw, self.global.end_index(), end, true, u_mode, "u-mode");
        self.dump("u-mode register dump");

        sync
    }

    fn buffer_validate(
        &self,
        thread: &Thread<'_, Self::ThreadConfig>,
        addr: usize,
        size: usize,
        write: bool,
    ) -> bool {
        if thread.stack_info.region().contains(addr, size) {
            return true;
        }

        if !write && self.layout.rom.contains(addr, size) {
            return true;
        }

        let Some(domain) = thread.mem_domain() else {
            return false;
        };
        let partitions = domain.lock();
        let allowed = partitions
            .partitions()
            .find(|p| p.region().contains(addr, size))
            .is_some_and(|p| {
                if write {
                    p.attr.writable()
                } else {
                    p.attr.readable()
                }
            });
        allowed
    }

    fn max_partitions(&self) -> usize {
        // One slot per partition, after the global entries and the user
        // stack. Partitions needing two slots are only caught at resync.
        SLOTS.saturating_sub(self.global.end_index() + 1)
    }

    fn partition_check(&self, partition: &Partition) -> Result<(), MpuError> {
        // Global entries come first in every user table and would shadow the
        // partition.
        let region = partition.region();
        if region.overlaps(&self.layout.rom) {
            return Err(MpuError::InvariantViolation(
                "partition overlaps the read-only region",
            ));
        }
        if let Some(guard_size) = self.layout.stack_guard_size {
            let guarded = self
                .layout
                .interrupt_stacks
                .iter()
                .any(|&stack| Region::new(stack, guard_size).overlaps(&region));
            if guarded {
                return Err(MpuError::InvariantViolation(
                    "partition overlaps an interrupt stack guard",
                ));
            }
        }
        Ok(())
    }

    fn domain_init(&self, domain: &mut DomainPartitions) {
        domain.reset_generation();
    }

    fn partition_add(&self, domain: &mut DomainPartitions, _partition_id: usize) {
        // Force resynchronization for every thread using this domain.
        domain.advance_generation();
    }

    fn partition_remove(&self, domain: &mut DomainPartitions, _partition_id: usize) {
        domain.advance_generation();
    }

    fn thread_add(&self, thread: &mut Thread<'_, Self::ThreadConfig>) {
        thread.arch.u_mode_sync_version = UNSYNCED;
    }

    fn thread_remove(&self, _thread: &mut Thread<'_, Self::ThreadConfig>) {}
}
