// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Memory protection through the RISC-V PMP.
//!
//! The PMP consists of a number of entries, or slots. Every slot has its own
//! `pmpaddrX` address register, while the much smaller configuration octets
//! are packed several to a `pmpcfgX` register. All entries a thread needs are
//! precomputed into [`PMPShadow`] tables kept in ordinary memory, so a
//! context switch only has to copy them into the registers.
//!
//! The lowest slots hold the [`GlobalRegionSet`], which is the same for every
//! thread and never rewritten after boot. Thread-specific entries follow it:
//! a privileged stack guard table used while running in machine mode, and a
//! user-mode table mapping the thread's stack and the partitions of its
//! memory domain.

use core::fmt;

use kernel::platform::mpu::Permissions;
use tock_registers::fields::FieldValue;
use tock_registers::{register_bitfields, LocalRegisterCopy};

mod dump;
mod entry;
mod global;
mod hardware;
mod mpu;
mod shadow;
mod thread;

#[cfg(test)]
pub(crate) mod sim;

pub use dump::PMPRegisterDump;
pub use entry::PMPEntry;
pub use global::{GlobalRegionSet, PMPLayout, GLOBAL_SLOTS};
pub use hardware::{write_pmp_entries, EnforcementGuard, PMPHardware};
pub use mpu::PMPDomainMPU;
pub use shadow::PMPShadow;
pub use thread::PMPThreadConfig;

register_bitfields![u8,
    /// Generic `pmpcfg` octet.
    ///
    /// A single `pmpcfgX` CSR holds multiple octets, each affecting the
    /// access permission, addressing mode and "lock" attributes of a single
    /// `pmpaddrX` CSR.
    pub pmpcfg_octet [
        r OFFSET(0) NUMBITS(1) [],
        w OFFSET(1) NUMBITS(1) [],
        x OFFSET(2) NUMBITS(1) [],
        a OFFSET(3) NUMBITS(2) [
            OFF = 0,
            TOR = 1,
            NA4 = 2,
            NAPOT = 3
        ],
        l OFFSET(7) NUMBITS(1) []
    ]
];

/// Number of `pmpcfg` octets packed into one `pmpcfgX` CSR: 4 on RV32, 8 on
/// RV64.
pub const PMPCFG_STRIDE: usize = core::mem::size_of::<usize>();

/// A single `pmpcfg` octet.
///
/// Before an entry is encoded, only the permission and lock bits are
/// meaningful; the encoder picks the addressing mode.
#[derive(Copy, Clone)]
pub struct PMPCfg(LocalRegisterCopy<u8, pmpcfg_octet::Register>);

impl PMPCfg {
    /// Entry disabled.
    pub const OFF: PMPCfg = PMPCfg(LocalRegisterCopy::new(0));

    /// Matching accesses are denied in every mode the entry applies to.
    pub const NO_ACCESS: PMPCfg = PMPCfg(LocalRegisterCopy::new(0));

    pub const fn new(raw: u8) -> PMPCfg {
        PMPCfg(LocalRegisterCopy::new(raw))
    }

    /// Permission bits with the lock bit set: the entry then also binds
    /// machine mode and cannot be changed until reset.
    pub fn locked(perm: Permissions) -> PMPCfg {
        let mut reg = PMPCfg::from(perm).0;
        reg.modify(pmpcfg_octet::l::SET);
        PMPCfg(reg)
    }

    /// Extract the `u8` representation of the octet.
    pub fn get(&self) -> u8 {
        self.0.get()
    }

    /// The same permissions with the addressing mode replaced by `mode`.
    pub fn with_mode(self, mode: FieldValue<u8, pmpcfg_octet::Register>) -> PMPCfg {
        let mut reg = self.0;
        reg.modify(mode);
        PMPCfg(reg)
    }

    pub fn mode(&self) -> Option<pmpcfg_octet::a::Value> {
        self.0.read_as_enum(pmpcfg_octet::a)
    }

    pub fn is_locked(&self) -> bool {
        self.0.is_set(pmpcfg_octet::l)
    }

    pub fn readable(&self) -> bool {
        self.0.is_set(pmpcfg_octet::r)
    }

    pub fn writable(&self) -> bool {
        self.0.is_set(pmpcfg_octet::w)
    }

    pub fn executable(&self) -> bool {
        self.0.is_set(pmpcfg_octet::x)
    }
}

impl Default for PMPCfg {
    fn default() -> PMPCfg {
        PMPCfg::OFF
    }
}

impl PartialEq for PMPCfg {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Eq for PMPCfg {}

impl fmt::Debug for PMPCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PMPCfg({:#04x})", self.get())
    }
}

impl From<Permissions> for PMPCfg {
    fn from(p: Permissions) -> Self {
        let fv = match p {
            Permissions::ReadWriteExecute => {
                pmpcfg_octet::r::SET + pmpcfg_octet::w::SET + pmpcfg_octet::x::SET
            }
            Permissions::ReadWriteOnly => {
                pmpcfg_octet::r::SET + pmpcfg_octet::w::SET + pmpcfg_octet::x::CLEAR
            }
            Permissions::ReadExecuteOnly => {
                pmpcfg_octet::r::SET + pmpcfg_octet::w::CLEAR + pmpcfg_octet::x::SET
            }
            Permissions::ReadOnly => {
                pmpcfg_octet::r::SET + pmpcfg_octet::w::CLEAR + pmpcfg_octet::x::CLEAR
            }
            Permissions::ExecuteOnly => {
                pmpcfg_octet::r::CLEAR + pmpcfg_octet::w::CLEAR + pmpcfg_octet::x::SET
            }
        };

        PMPCfg(LocalRegisterCopy::new(
            (fv + pmpcfg_octet::l::CLEAR + pmpcfg_octet::a::OFF).value,
        ))
    }
}

/// Pack the octets of `pmpcfgX` word `word` into its CSR value.
///
/// Octets past the end of `cfg` read as zero.
pub fn pmpcfg_word(cfg: &[PMPCfg], word: usize) -> usize {
    (0..PMPCFG_STRIDE).fold(0, |acc, octet| {
        let raw = cfg
            .get(word * PMPCFG_STRIDE + octet)
            .map_or(0, |c| c.get() as usize);
        acc | (raw << (8 * octet))
    })
}
