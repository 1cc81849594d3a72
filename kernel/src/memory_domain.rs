// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Memory domains: sets of memory partitions shared by a group of threads.
//!
//! A domain grants every thread assigned to it user-mode access to its
//! partitions. The partitions are kept behind a spin lock since they are
//! edited from whichever core runs the management code, while every core
//! reads them when (re)building the protection table of a thread it is about
//! to run.
//!
//! Each change to the partition list advances the domain's generation. MPU
//! implementations record the generation a thread's table was built from and
//! rebuild it lazily when they notice a newer one.

use core::ptr;

use spin::{Mutex, MutexGuard};

use crate::config::MAX_DOMAIN_PARTITIONS;
use crate::errorcode::MpuError;
use crate::platform::mpu::{Permissions, Region, MPU};
use crate::thread::Thread;

/// Generation of a freshly initialized domain.
///
/// Never zero, so that a thread whose table was never synchronized (recorded
/// generation 0) always looks stale.
pub const INITIAL_GENERATION: u64 = 1;

/// A range of memory granted to the threads of a domain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub start: usize,
    /// Size in bytes. Zero marks an unused entry.
    pub size: usize,
    pub attr: Permissions,
}

impl Partition {
    /// An unused partition entry.
    pub const EMPTY: Partition = Partition {
        start: 0,
        size: 0,
        attr: Permissions::ReadOnly,
    };

    pub const fn new(start: usize, size: usize, attr: Permissions) -> Partition {
        Partition { start, size, attr }
    }

    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub const fn region(&self) -> Region {
        Region::new(self.start, self.size)
    }
}

/// The lock-protected contents of a [`MemoryDomain`].
pub struct DomainPartitions {
    partitions: [Partition; MAX_DOMAIN_PARTITIONS],
    num_partitions: usize,
    generation: u64,
}

impl DomainPartitions {
    const fn new() -> DomainPartitions {
        DomainPartitions {
            partitions: [Partition::EMPTY; MAX_DOMAIN_PARTITIONS],
            num_partitions: 0,
            generation: INITIAL_GENERATION,
        }
    }

    /// Iterate over the partitions in use, in slot order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> + '_ {
        self.partitions.iter().filter(|p| !p.is_empty())
    }

    /// The partition stored at `partition_id`, if that entry is in use.
    pub fn get(&self, partition_id: usize) -> Option<&Partition> {
        self.partitions
            .get(partition_id)
            .filter(|p| !p.is_empty())
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a change of the partition list.
    pub fn advance_generation(&mut self) {
        self.generation += 1;
    }

    pub fn reset_generation(&mut self) {
        self.generation = INITIAL_GENERATION;
    }

    fn admit<M: MPU>(&self, mpu: &M, partition: &Partition) -> Result<usize, MpuError> {
        if partition.is_empty() {
            return Err(MpuError::InvariantViolation("empty partition"));
        }
        if partition.start % 4 != 0 || partition.size % 4 != 0 {
            return Err(MpuError::InvariantViolation("partition not 4-byte aligned"));
        }
        if partition.start.checked_add(partition.size - 1).is_none() {
            return Err(MpuError::InvariantViolation("partition wraps the address space"));
        }
        let region = partition.region();
        if self.partitions().any(|p| p.region().overlaps(&region)) {
            return Err(MpuError::InvariantViolation("partition overlaps an existing one"));
        }
        mpu.partition_check(partition)?;

        let limit = mpu.max_partitions().min(MAX_DOMAIN_PARTITIONS);
        if self.num_partitions >= limit {
            return Err(MpuError::SlotExhaustion {
                needed: 1,
                available: 0,
            });
        }
        self.partitions
            .iter()
            .position(Partition::is_empty)
            .ok_or(MpuError::SlotExhaustion {
                needed: 1,
                available: 0,
            })
    }
}

/// A set of partitions shared by the threads assigned to it.
pub struct MemoryDomain {
    inner: Mutex<DomainPartitions>,
}

impl MemoryDomain {
    /// A domain without partitions.
    ///
    /// The MPU has not seen this domain yet; prefer [`MemoryDomain::new`].
    pub const fn empty() -> MemoryDomain {
        MemoryDomain {
            inner: Mutex::new(DomainPartitions::new()),
        }
    }

    /// Create a domain and admit `initial` into it, in order.
    pub fn new<M: MPU>(mpu: &M, initial: &[Partition]) -> Result<MemoryDomain, MpuError> {
        let domain = MemoryDomain::empty();
        mpu.domain_init(&mut domain.lock());
        for partition in initial {
            domain.add_partition(mpu, *partition)?;
        }
        Ok(domain)
    }

    /// Lock the partition list.
    ///
    /// Keep the guard only for the duration of a scan; other cores spin on it.
    pub fn lock(&self) -> MutexGuard<'_, DomainPartitions> {
        self.inner.lock()
    }

    /// Add a partition, returning the index it was stored at.
    ///
    /// The partition is rejected when it is empty, misaligned, wraps around
    /// the address space, overlaps a partition already in the domain, fails
    /// `mpu.partition_check()`, or when the domain already holds
    /// `mpu.max_partitions()` partitions. Rejected partitions leave the domain
    /// untouched.
    pub fn add_partition<M: MPU>(&self, mpu: &M, partition: Partition) -> Result<usize, MpuError> {
        let mut partitions = self.lock();
        let partition_id = partitions.admit(mpu, &partition)?;

        partitions.partitions[partition_id] = partition;
        partitions.num_partitions += 1;
        mpu.partition_add(&mut partitions, partition_id);

        log::debug!(
            "domain partition {} added: {:#x}..={:#x} {:?}, generation {}",
            partition_id,
            partition.start,
            partition.start + (partition.size - 1),
            partition.attr,
            partitions.generation
        );
        Ok(partition_id)
    }

    /// Remove the partition stored at `partition_id`, returning it.
    pub fn remove_partition<M: MPU>(&self, mpu: &M, partition_id: usize) -> Option<Partition> {
        let mut partitions = self.lock();
        let removed = *partitions.get(partition_id)?;

        partitions.partitions[partition_id] = Partition::EMPTY;
        partitions.num_partitions -= 1;
        mpu.partition_remove(&mut partitions, partition_id);

        log::debug!(
            "domain partition {} removed, generation {}",
            partition_id,
            partitions.generation
        );
        Some(removed)
    }

    /// Assign `thread` to this domain, leaving its previous domain first.
    pub fn add_thread<'d, M: MPU>(&'d self, mpu: &M, thread: &mut Thread<'d, M::ThreadConfig>) {
        if let Some(previous) = thread.mem_domain() {
            if ptr::eq(previous, self) {
                return;
            }
            previous.remove_thread(mpu, thread);
        }
        thread.set_mem_domain(self);
        mpu.thread_add(thread);
    }

    /// Take `thread` out of this domain. Threads of other domains are left
    /// alone.
    pub fn remove_thread<M: MPU>(&self, mpu: &M, thread: &mut Thread<'_, M::ThreadConfig>) {
        if thread.mem_domain().is_some_and(|d| ptr::eq(d, self)) {
            mpu.thread_remove(thread);
            thread.clear_mem_domain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::StackInfo;

    const RW: Permissions = Permissions::ReadWriteOnly;

    /// Holds at most `.0` partitions and keeps `RESERVED` to itself.
    struct LimitedMPU(usize);

    const RESERVED: Region = Region::new(0xf000_0000, 0x1000);

    impl MPU for LimitedMPU {
        type ThreadConfig = ();

        fn stackguard_prepare(&self, _thread: &mut Thread<'_, ()>) {}
        fn stackguard_enable(&mut self, _thread: &mut Thread<'_, ()>) {}
        fn usermode_init(&self, _thread: &mut Thread<'_, ()>) {}
        fn usermode_prepare(&self, _thread: &mut Thread<'_, ()>) {}
        fn usermode_enable(
            &mut self,
            _thread: &mut Thread<'_, ()>,
        ) -> crate::platform::mpu::UserRegionSync {
            crate::platform::mpu::UserRegionSync::NotPrepared
        }
        fn buffer_validate(&self, _: &Thread<'_, ()>, _: usize, _: usize, _: bool) -> bool {
            false
        }
        fn max_partitions(&self) -> usize {
            self.0
        }
        fn partition_check(&self, partition: &Partition) -> Result<(), MpuError> {
            if partition.region().overlaps(&RESERVED) {
                return Err(MpuError::InvariantViolation("reserved"));
            }
            Ok(())
        }
        fn domain_init(&self, domain: &mut DomainPartitions) {
            domain.reset_generation();
        }
        fn partition_add(&self, domain: &mut DomainPartitions, _: usize) {
            domain.advance_generation();
        }
        fn partition_remove(&self, domain: &mut DomainPartitions, _: usize) {
            domain.advance_generation();
        }
        fn thread_add(&self, _thread: &mut Thread<'_, ()>) {}
        fn thread_remove(&self, _thread: &mut Thread<'_, ()>) {}
    }

    #[test]
    fn generation_advances_on_every_change() {
        let domain = MemoryDomain::new(&(), &[]).unwrap();
        assert_eq!(domain.lock().generation(), INITIAL_GENERATION);

        let a = domain.add_partition(&(), Partition::new(0x8000_0000, 0x100, RW)).unwrap();
        let b = domain.add_partition(&(), Partition::new(0x8000_1000, 0x100, RW)).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(domain.lock().generation(), INITIAL_GENERATION + 2);

        assert_eq!(
            domain.remove_partition(&(), a),
            Some(Partition::new(0x8000_0000, 0x100, RW))
        );
        assert_eq!(domain.lock().generation(), INITIAL_GENERATION + 3);
        assert_eq!(domain.lock().num_partitions(), 1);

        // Removing an unused entry changes nothing.
        assert_eq!(domain.remove_partition(&(), a), None);
        assert_eq!(domain.remove_partition(&(), MAX_DOMAIN_PARTITIONS), None);
        assert_eq!(domain.lock().generation(), INITIAL_GENERATION + 3);
    }

    #[test]
    fn freed_entries_are_reused_and_skipped() {
        let domain = MemoryDomain::new(
            &(),
            &[
                Partition::new(0x1000, 0x100, RW),
                Partition::new(0x2000, 0x100, RW),
                Partition::new(0x3000, 0x100, RW),
            ],
        )
        .unwrap();
        domain.remove_partition(&(), 1);
        let starts: std::vec::Vec<usize> = domain.lock().partitions().map(|p| p.start).collect();
        assert_eq!(starts, [0x1000, 0x3000]);

        assert_eq!(domain.add_partition(&(), Partition::new(0x4000, 0x100, RW)), Ok(1));
    }

    #[test]
    fn admission_rejects_bad_partitions() {
        let domain = MemoryDomain::new(&(), &[Partition::new(0x1000, 0x100, RW)]).unwrap();
        let generation = domain.lock().generation();

        for bad in [
            Partition::new(0x2000, 0, RW),
            Partition::new(0x2002, 0x100, RW),
            Partition::new(0x2000, 0x102, RW),
            Partition::new(0x2000, 2, RW),
            Partition::new(usize::MAX - 3, 8, RW),
            Partition::new(0x10fc, 8, RW),
            Partition::new(0x0f00, 0x400, RW),
        ] {
            assert!(matches!(
                domain.add_partition(&(), bad),
                Err(MpuError::InvariantViolation(_))
            ));
        }
        assert_eq!(domain.lock().num_partitions(), 1);
        assert_eq!(domain.lock().generation(), generation);

        // Touching but not overlapping is fine.
        assert!(domain.add_partition(&(), Partition::new(0x1100, 0x100, RW)).is_ok());
    }

    #[test]
    fn admission_honors_max_partitions() {
        let mpu = LimitedMPU(2);
        let domain = MemoryDomain::new(&mpu, &[]).unwrap();
        domain.add_partition(&mpu, Partition::new(0x1000, 0x10, RW)).unwrap();
        domain.add_partition(&mpu, Partition::new(0x2000, 0x10, RW)).unwrap();
        assert_eq!(
            domain.add_partition(&mpu, Partition::new(0x3000, 0x10, RW)),
            Err(MpuError::SlotExhaustion {
                needed: 1,
                available: 0
            })
        );

        domain.remove_partition(&mpu, 0);
        assert_eq!(domain.add_partition(&mpu, Partition::new(0x3000, 0x10, RW)), Ok(0));
    }

    #[test]
    fn admission_consults_the_mpu() {
        let mpu = LimitedMPU(4);
        let domain = MemoryDomain::new(&mpu, &[]).unwrap();
        let generation = domain.lock().generation();

        assert_eq!(
            domain.add_partition(&mpu, Partition::new(0xefff_ff00, 0x200, RW)),
            Err(MpuError::InvariantViolation("reserved"))
        );
        assert_eq!(domain.lock().num_partitions(), 0);
        assert_eq!(domain.lock().generation(), generation);

        assert!(domain
            .add_partition(&mpu, Partition::new(0xf000_1000, 0x100, RW))
            .is_ok());
    }

    #[test]
    fn domain_never_exceeds_its_storage() {
        let domain = MemoryDomain::new(&(), &[]).unwrap();
        for i in 0..MAX_DOMAIN_PARTITIONS {
            domain
                .add_partition(&(), Partition::new(0x1000 * (i + 1), 0x100, RW))
                .unwrap();
        }
        assert!(matches!(
            domain.add_partition(&(), Partition::new(0x10_0000, 0x100, RW)),
            Err(MpuError::SlotExhaustion { .. })
        ));
    }

    #[test]
    fn threads_move_between_domains() {
        let first = MemoryDomain::new(&(), &[]).unwrap();
        let second = MemoryDomain::new(&(), &[]).unwrap();
        let mut thread: Thread<'_, ()> = Thread::new(StackInfo::new(0x8000_0000, 0x400, 0), None);

        first.add_thread(&(), &mut thread);
        assert!(ptr::eq(thread.mem_domain().unwrap(), &first));

        // Only the owning domain can remove the thread.
        second.remove_thread(&(), &mut thread);
        assert!(ptr::eq(thread.mem_domain().unwrap(), &first));

        second.add_thread(&(), &mut thread);
        assert!(ptr::eq(thread.mem_domain().unwrap(), &second));

        second.remove_thread(&(), &mut thread);
        assert!(thread.mem_domain().is_none());
    }
}
