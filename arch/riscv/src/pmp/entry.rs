// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Decoded view of a single PMP entry.

use core::ops::RangeInclusive;

use tock_registers::fields::FieldValue;

use super::{pmpcfg_octet, PMPCfg};

/// A PMP entry's address register, interpreted according to the addressing
/// mode of its configuration octet.
///
/// All addresses are byte addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PMPEntry {
    /// Disabled entry. Its address register still serves as the lower bound
    /// of a following TOR entry.
    Off { pmpaddr: usize },
    /// Top of range: matches `[previous entry's address, end)`.
    Tor { end: usize },
    /// Naturally aligned four-byte region.
    Na4 { start: usize },
    /// Naturally aligned power-of-two region of at least eight bytes,
    /// `[start, last]`.
    Napot { start: usize, last: usize },
}

impl PMPEntry {
    /// A NAPOT entry covering `size` bytes from `start`.
    ///
    /// `size` must be a power of two, and `start` aligned to it. A size of
    /// zero stands for the whole address space.
    pub fn napot(start: usize, size: usize) -> PMPEntry {
        PMPEntry::Napot {
            start,
            last: start.wrapping_add(size.wrapping_sub(1)),
        }
    }

    /// Value for the `pmpaddrX` register.
    pub fn pmpaddr(&self) -> usize {
        match *self {
            PMPEntry::Off { pmpaddr } => pmpaddr,
            PMPEntry::Tor { end } => end >> 2,
            PMPEntry::Na4 { start } => start >> 2,
            PMPEntry::Napot { start, last } => (start | ((last - start) >> 1)) >> 2,
        }
    }

    /// Addressing mode field for the `pmpcfg` octet.
    pub fn mode(&self) -> FieldValue<u8, pmpcfg_octet::Register> {
        match self {
            PMPEntry::Off { .. } => pmpcfg_octet::a::OFF,
            PMPEntry::Tor { .. } => pmpcfg_octet::a::TOR,
            PMPEntry::Na4 { .. } => pmpcfg_octet::a::NA4,
            PMPEntry::Napot { .. } => pmpcfg_octet::a::NAPOT,
        }
    }

    /// Interpret a `pmpaddrX` value under the addressing mode of `cfg`.
    pub fn decode(pmpaddr: usize, cfg: PMPCfg) -> PMPEntry {
        match cfg.mode() {
            Some(pmpcfg_octet::a::Value::TOR) => PMPEntry::Tor { end: pmpaddr << 2 },
            Some(pmpcfg_octet::a::Value::NA4) => PMPEntry::Na4 {
                start: pmpaddr << 2,
            },
            Some(pmpcfg_octet::a::Value::NAPOT) => {
                // The trailing ones of the address word encode the size.
                let tmp = (pmpaddr << 2) | 0x3;
                PMPEntry::Napot {
                    start: tmp & tmp.wrapping_add(1),
                    last: tmp | tmp.wrapping_add(1),
                }
            }
            Some(pmpcfg_octet::a::Value::OFF) | None => PMPEntry::Off { pmpaddr },
        }
    }

    /// The addresses this entry matches, given the address register of the
    /// entry before it (0 for entry 0).
    pub fn matched_range(&self, prev_pmpaddr: usize) -> Option<RangeInclusive<usize>> {
        match *self {
            PMPEntry::Off { .. } => None,
            PMPEntry::Tor { end } => {
                let start = prev_pmpaddr << 2;
                (end > start).then(|| start..=end - 1)
            }
            PMPEntry::Na4 { start } => Some(start..=start + 3),
            PMPEntry::Napot { start, last } => Some(start..=last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mode: FieldValue<u8, pmpcfg_octet::Register>) -> PMPCfg {
        PMPCfg::OFF.with_mode(mode)
    }

    #[test]
    fn napot_encoding() {
        assert_eq!(PMPEntry::napot(0x2000_0000, 0x1_0000).pmpaddr(), 0x0800_1fff);
        assert_eq!(PMPEntry::napot(0x8002_0000, 0x1000).pmpaddr(), 0x2000_81ff);
        assert_eq!(PMPEntry::napot(0x1000, 8).pmpaddr(), 0x400);
        // The whole address space.
        assert_eq!(PMPEntry::napot(0, 0).pmpaddr(), (usize::MAX >> 1) >> 2);
    }

    #[test]
    fn napot_decoding() {
        assert_eq!(
            PMPEntry::decode(0x0800_1fff, cfg(pmpcfg_octet::a::NAPOT)),
            PMPEntry::Napot {
                start: 0x2000_0000,
                last: 0x2000_ffff
            }
        );
        assert_eq!(
            PMPEntry::decode(0x400, cfg(pmpcfg_octet::a::NAPOT)),
            PMPEntry::napot(0x1000, 8)
        );

        let everything = PMPEntry::Napot {
            start: 0,
            last: usize::MAX,
        };
        assert_eq!(
            PMPEntry::decode((usize::MAX >> 1) >> 2, cfg(pmpcfg_octet::a::NAPOT)),
            everything
        );
        // All ones, as written by the QEMU workaround, means the same.
        assert_eq!(
            PMPEntry::decode(usize::MAX, cfg(pmpcfg_octet::a::NAPOT)),
            everything
        );
    }

    #[test]
    fn other_modes() {
        assert_eq!(
            PMPEntry::decode(0x2000_0400, cfg(pmpcfg_octet::a::TOR)),
            PMPEntry::Tor { end: 0x8000_1000 }
        );
        assert_eq!(
            PMPEntry::decode(0x400, cfg(pmpcfg_octet::a::NA4)),
            PMPEntry::Na4 { start: 0x1000 }
        );
        assert_eq!(
            PMPEntry::decode(0x1234, PMPCfg::OFF),
            PMPEntry::Off { pmpaddr: 0x1234 }
        );
        assert_eq!(PMPEntry::Na4 { start: 0x1000 }.pmpaddr(), 0x400);
        assert_eq!(PMPEntry::Tor { end: 0x8000_1000 }.pmpaddr(), 0x2000_0400);
    }

    #[test]
    fn matched_ranges() {
        let tor = PMPEntry::Tor { end: 0x3000 };
        assert_eq!(tor.matched_range(0x1000 >> 2), Some(0x1000..=0x2fff));
        assert_eq!(tor.matched_range(0), Some(0..=0x2fff));
        // A lower bound at or above the top matches nothing.
        assert_eq!(tor.matched_range(0x3000 >> 2), None);
        assert_eq!(tor.matched_range(0x4000 >> 2), None);

        assert_eq!(
            PMPEntry::Na4 { start: 0x1000 }.matched_range(0),
            Some(0x1000..=0x1003)
        );
        assert_eq!(
            PMPEntry::napot(0x8000, 0x100).matched_range(0),
            Some(0x8000..=0x80ff)
        );
        assert_eq!(PMPEntry::Off { pmpaddr: 0x400 }.matched_range(0), None);
    }
}
