// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Thread metadata consumed by the memory protection unit.

use crate::memory_domain::MemoryDomain;
use crate::platform::mpu::Region;

/// Bounds of a thread's stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackInfo {
    /// Lowest address of the part of the stack the thread may use.
    pub start: usize,
    /// Usable stack size in bytes.
    pub size: usize,
    /// Bytes reserved directly below `start` for kernel use, e.g. the stack
    /// guard area. The privileged stack bottom is `start - reserved`.
    pub reserved: usize,
}

impl StackInfo {
    pub const fn new(start: usize, size: usize, reserved: usize) -> StackInfo {
        StackInfo {
            start,
            size,
            reserved,
        }
    }

    /// The usable part of the stack as a region.
    pub const fn region(&self) -> Region {
        Region::new(self.start, self.size)
    }
}

/// A schedulable thread as seen by the MPU.
///
/// `C` is the architecture-owned per-thread state, normally
/// [`MPU::ThreadConfig`](crate::platform::mpu::MPU::ThreadConfig).
pub struct Thread<'d, C> {
    pub stack_info: StackInfo,
    /// Start of the separate privileged stack used by user threads while
    /// they execute system calls, if they have one.
    pub priv_stack_start: Option<usize>,
    mem_domain: Option<&'d MemoryDomain>,
    pub arch: C,
}

impl<'d, C: Default> Thread<'d, C> {
    pub fn new(stack_info: StackInfo, priv_stack_start: Option<usize>) -> Thread<'d, C> {
        Thread {
            stack_info,
            priv_stack_start,
            mem_domain: None,
            arch: C::default(),
        }
    }
}

impl<'d, C> Thread<'d, C> {
    /// The memory domain this thread belongs to, if any.
    pub fn mem_domain(&self) -> Option<&'d MemoryDomain> {
        self.mem_domain
    }

    pub(crate) fn set_mem_domain(&mut self, domain: &'d MemoryDomain) {
        self.mem_domain = Some(domain);
    }

    pub(crate) fn clear_mem_domain(&mut self) {
        self.mem_domain = None;
    }

    /// Lowest address of the stack used while the thread runs privileged.
    ///
    /// This is where the stack guard goes: a thread with a private
    /// privileged stack overflows that one, every other thread overflows the
    /// reserved area below its stack.
    pub fn privileged_stack_bottom(&self) -> usize {
        match self.priv_stack_start {
            Some(start) => start,
            None => self.stack_info.start.wrapping_sub(self.stack_info.reserved),
        }
    }
}
