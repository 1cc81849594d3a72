// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Compile-time switches of the memory protection code.
//!
//! Code behind a switch is still type-checked when the switch is off, and
//! the optimizer drops it. Boards turn switches on through the kernel crate's
//! cargo features, see `kernel/Cargo.toml`.

/// Upper bound on the number of partition slots a single memory domain can
/// store. Empty slots are skipped, so a domain's partitions need not be
/// packed.
pub const MAX_DOMAIN_PARTITIONS: usize = 16;

/// Compile-time options of the memory protection subsystem.
pub struct Config {
    /// Whether to dump the hardware PMP registers after every write of
    /// protection entries.
    ///
    /// This is very chatty and only useful while bringing up a board.
    pub debug_pmp_dump: bool,

    /// Whether to work around the QEMU NAPOT decoding bug for the
    /// whole-address-space fallback entry used with the stack guard.
    ///
    /// QEMU fails to interpret the correctly encoded NAPOT value covering the
    /// full address space; setting all bits of the address word gives it the
    /// intended meaning. Real hardware must not enable this.
    pub qemu_pmp_workaround: bool,
}

/// The switches in effect for this build.
///
/// Cargo features are read here and nowhere else; other code tests the
/// fields of this constant instead of using `#[cfg(feature = ..)]`.
pub const CONFIG: Config = Config {
    debug_pmp_dump: cfg!(feature = "debug_pmp_dump"),
    qemu_pmp_workaround: cfg!(feature = "qemu_pmp_workaround"),
};
