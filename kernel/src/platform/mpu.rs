// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface for configuring the Memory Protection Unit.

use crate::config::MAX_DOMAIN_PARTITIONS;
use crate::errorcode::MpuError;
use crate::memory_domain::{DomainPartitions, Partition};
use crate::thread::Thread;

/// Access permissions of a memory region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Permissions {
    ReadWriteExecute,
    ReadWriteOnly,
    ReadExecuteOnly,
    ReadOnly,
    ExecuteOnly,
}

impl Permissions {
    pub const fn readable(self) -> bool {
        !matches!(self, Permissions::ExecuteOnly)
    }

    pub const fn writable(self) -> bool {
        matches!(
            self,
            Permissions::ReadWriteExecute | Permissions::ReadWriteOnly
        )
    }

    pub const fn executable(self) -> bool {
        matches!(
            self,
            Permissions::ReadWriteExecute | Permissions::ReadExecuteOnly | Permissions::ExecuteOnly
        )
    }
}

/// A contiguous range of memory, `[start, start + size)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// The memory address where the region starts.
    start: usize,

    /// The number of bytes of memory in the region.
    size: usize,
}

impl Region {
    /// Create a new region with a given starting point and length in bytes.
    pub const fn new(start: usize, size: usize) -> Region {
        Region { start, size }
    }

    /// Getter: retrieve the address of the start of the region.
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Getter: retrieve the length of the region in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether `[start, start + size)` lies entirely inside this region.
    ///
    /// The end offset is never computed directly, so ranges reaching the top
    /// of the address space cannot wrap around into a false positive.
    pub const fn contains(&self, start: usize, size: usize) -> bool {
        start >= self.start && size <= self.size && start - self.start <= self.size - size
    }

    /// Whether this region shares at least one byte with `other`.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.size == 0 || other.size == 0 {
            return false;
        }
        // Compare inclusive ends so regions touching the top of the address
        // space don't overflow.
        let self_last = self.start.saturating_add(self.size - 1);
        let other_last = other.start.saturating_add(other.size - 1);
        self.start <= other_last && other.start <= self_last
    }
}

/// Outcome of [`MPU::usermode_enable`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UserRegionSync {
    /// The thread never ran in user mode; nothing was written.
    NotPrepared,
    /// The cached user-mode table was current and has been committed as is.
    InSync,
    /// The cached table lagged its memory domain and was rebuilt before being
    /// committed.
    Resynced,
}

/// The generic trait that particular memory protection unit implementations
/// need to implement.
///
/// The scheduler drives this interface from non-preemptible sections:
/// thread creation, domain updates and context switches. It decides *when* a
/// switch happens; the implementation only guarantees what is programmed into
/// the protection hardware by the time each call returns.
pub trait MPU {
    /// MPU-specific state kept for every thread.
    ///
    /// This caches the thread's precomputed protection tables so that a
    /// context switch only has to write them to hardware. It is `Default` so
    /// that empty state can be created along with the thread.
    type ThreadConfig: Default;

    /// Prepare the privileged-mode stack guard for a new thread.
    ///
    /// Called once during thread creation.
    fn stackguard_prepare(&self, thread: &mut Thread<'_, Self::ThreadConfig>);

    /// Activate the stack guard of `thread`.
    ///
    /// Called on every context switch into `thread`. Calling it repeatedly
    /// without switching leaves the hardware in the same state.
    fn stackguard_enable(&mut self, thread: &mut Thread<'_, Self::ThreadConfig>);

    /// Mark the user-mode configuration of a new thread as not prepared.
    fn usermode_init(&self, thread: &mut Thread<'_, Self::ThreadConfig>);

    /// Build the user-mode configuration of `thread`.
    ///
    /// Called once, before the thread drops to user mode for the first time.
    fn usermode_prepare(&self, thread: &mut Thread<'_, Self::ThreadConfig>);

    /// Write the user-mode configuration of `thread` to hardware.
    ///
    /// Called on every switch into user mode. The cached configuration is
    /// rebuilt first if the thread's memory domain changed since it was last
    /// computed.
    fn usermode_enable(&mut self, thread: &mut Thread<'_, Self::ThreadConfig>) -> UserRegionSync;

    /// Check whether `thread` may access `[addr, addr + size)` from user mode.
    ///
    /// Used to validate buffers passed across the user/kernel boundary without
    /// relying on a hardware fault. Must agree with what the hardware enforces
    /// for the thread's user-mode configuration.
    fn buffer_validate(
        &self,
        thread: &Thread<'_, Self::ThreadConfig>,
        addr: usize,
        size: usize,
        write: bool,
    ) -> bool;

    /// Maximum number of partitions a memory domain may hold.
    ///
    /// Admission into a domain is checked against this value. It may be
    /// optimistic: a partition that turns out to need more hardware resources
    /// than estimated is only detected once a thread's table is built.
    fn max_partitions(&self) -> usize;

    /// Reject partitions clashing with memory the implementation protects on
    /// its own.
    ///
    /// Called when a partition is admitted into a domain, after the
    /// architecture-independent checks. Entries that take precedence over the
    /// partitions would make the hardware deny accesses that
    /// [`MPU::buffer_validate`] allows.
    fn partition_check(&self, _partition: &Partition) -> Result<(), MpuError> {
        Ok(())
    }

    /// Reset the architecture state of a freshly created domain.
    fn domain_init(&self, domain: &mut DomainPartitions);

    /// A partition was added to `domain` at index `partition_id`.
    fn partition_add(&self, domain: &mut DomainPartitions, partition_id: usize);

    /// The partition at index `partition_id` was removed from `domain`.
    fn partition_remove(&self, domain: &mut DomainPartitions, partition_id: usize);

    /// `thread` was assigned to a (possibly different) memory domain.
    fn thread_add(&self, thread: &mut Thread<'_, Self::ThreadConfig>);

    /// `thread` is leaving its memory domain.
    fn thread_remove(&self, thread: &mut Thread<'_, Self::ThreadConfig>);
}

/// Implement default MPU trait for unit.
///
/// Used on platforms without memory protection: nothing is ever enforced, so
/// every access is reported as allowed.
impl MPU for () {
    type ThreadConfig = ();

    fn stackguard_prepare(&self, _thread: &mut Thread<'_, ()>) {}

    fn stackguard_enable(&mut self, _thread: &mut Thread<'_, ()>) {}

    fn usermode_init(&self, _thread: &mut Thread<'_, ()>) {}

    fn usermode_prepare(&self, _thread: &mut Thread<'_, ()>) {}

    fn usermode_enable(&mut self, _thread: &mut Thread<'_, ()>) -> UserRegionSync {
        UserRegionSync::NotPrepared
    }

    fn buffer_validate(&self, _thread: &Thread<'_, ()>, _addr: usize, _size: usize, _write: bool) -> bool {
        true
    }

    fn max_partitions(&self) -> usize {
        MAX_DOMAIN_PARTITIONS
    }

    fn domain_init(&self, domain: &mut DomainPartitions) {
        domain.reset_generation();
    }

    fn partition_add(&self, domain: &mut DomainPartitions, _partition_id: usize) {
        domain.advance_generation();
    }

    fn partition_remove(&self, domain: &mut DomainPartitions, _partition_id: usize) {
        domain.advance_generation();
    }

    fn thread_add(&self, _thread: &mut Thread<'_, ()>) {}

    fn thread_remove(&self, _thread: &mut Thread<'_, ()>) {}
}
