// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Errors raised while building or committing memory protection tables.
//!
//! A denied buffer access is not an error: access validation returns a plain
//! `bool` to its caller.

/// Failure while computing a memory protection configuration.
///
/// Whether an error is recoverable depends on where it surfaces. A
/// [`MpuError::SlotExhaustion`] returned while admitting a partition into a
/// domain can simply be reported to the caller. Once a table is being
/// (re)built for a thread there is no safe way to run with half of it, so the
/// same error is passed to [`halt`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MpuError {
    /// Encoding a region needs more protection slots than remain.
    #[error("out of PMP slots ({needed} needed, {available} available)")]
    SlotExhaustion { needed: usize, available: usize },

    /// Caller-supplied data violates an invariant of the protection table,
    /// e.g. a misaligned region or an inconsistent global prefix.
    #[error("memory protection invariant violated: {0}")]
    InvariantViolation(&'static str),
}

/// Stop the core after an unrecoverable memory protection failure.
///
/// Enforcing a partially written or wrong protection table is worse than not
/// running at all, so every fatal path ends here.
#[cold]
#[track_caller]
pub fn halt(err: MpuError) -> ! {
    log::error!("{}", err);
    panic!("{}", err)
}
