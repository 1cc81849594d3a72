// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Per-thread PMP state.

use super::PMPShadow;

/// Domain generation recorded by a table that was never synchronized.
/// Domains start counting above it, so such a table always looks stale.
pub(crate) const UNSYNCED: u64 = 0;

/// Precomputed PMP tables of a thread.
///
/// Both tables start with the configuration octets of the global entries;
/// their own entries begin at the global end index.
#[derive(Default)]
pub struct PMPThreadConfig<const SLOTS: usize> {
    /// Stack guard entries, applied to machine mode through `mstatus.MPRV`.
    pub(crate) m_mode: PMPShadow<SLOTS>,
    /// User stack followed by the memory domain's partitions. An end index of
    /// 0 means user mode was never prepared.
    pub(crate) u_mode: PMPShadow<SLOTS>,
    /// First slot of the partition entries, right after the user stack.
    pub(crate) u_mode_domain_offset: usize,
    /// Domain generation `u_mode` was built from.
    pub(crate) u_mode_sync_version: u64,
}

impl<const SLOTS: usize> PMPThreadConfig<SLOTS> {
    pub fn m_mode(&self) -> &PMPShadow<SLOTS> {
        &self.m_mode
    }

    pub fn u_mode(&self) -> &PMPShadow<SLOTS> {
        &self.u_mode
    }

    pub fn domain_offset(&self) -> usize {
        self.u_mode_domain_offset
    }

    pub fn sync_version(&self) -> u64 {
        self.u_mode_sync_version
    }

    pub fn usermode_prepared(&self) -> bool {
        self.u_mode.end() != 0
    }
}
