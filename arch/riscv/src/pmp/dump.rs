// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Human-readable dumps of shadow tables and of the PMP registers.

use core::fmt;

use super::{PMPCfg, PMPEntry, PMPHardware, PMPShadow};

fn format_pmp_entry(
    f: &mut fmt::Formatter<'_>,
    index: usize,
    pmpaddr: usize,
    prev_pmpaddr: usize,
    pmpcfg: PMPCfg,
) -> fmt::Result {
    // Ternary operator shortcut function, to avoid bulky formatting...
    fn t<T>(cond: bool, a: T, b: T) -> T {
        if cond {
            a
        } else {
            b
        }
    }

    let entry = PMPEntry::decode(pmpaddr, pmpcfg);
    let mode = match entry {
        PMPEntry::Off { .. } => "OFF",
        PMPEntry::Tor { .. } => "TOR",
        PMPEntry::Na4 { .. } => "NA4",
        PMPEntry::Napot { .. } => "NAPOT",
    };

    match entry.matched_range(prev_pmpaddr) {
        None => write!(
            f,
            "  [{:02}]: pmpaddr={:#010X}, cfg={:#04X} ({})\r\n",
            index,
            pmpaddr,
            pmpcfg.get(),
            mode
        ),
        Some(range) => write!(
            f,
            "  [{:02}]: pmpaddr={:#010X}, cfg={:#04X} ({}) --> {:#010X}-{:#010X} {}{}{}{}\r\n",
            index,
            pmpaddr,
            pmpcfg.get(),
            mode,
            range.start(),
            range.end(),
            t(pmpcfg.readable(), "R", "-"),
            t(pmpcfg.writable(), "W", "-"),
            t(pmpcfg.executable(), "X", "-"),
            t(pmpcfg.is_locked(), " LOCKED", ""),
        ),
    }
}

/// Lists the slots a table owns, `[base, end)`.
impl<const SLOTS: usize> fmt::Display for PMPShadow<SLOTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for index in self.base()..self.end() {
            let prev = if index == 0 {
                0
            } else {
                self.pmpaddr()[index - 1]
            };
            format_pmp_entry(f, index, self.pmpaddr()[index], prev, self.pmpcfg()[index])?;
        }
        Ok(())
    }
}

impl<const SLOTS: usize> fmt::Debug for PMPShadow<SLOTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PMPShadow [{}, {}) {{\r\n{}}}", self.base(), self.end(), self)
    }
}

/// Reads back and formats every PMP entry of the hardware.
pub struct PMPRegisterDump<'a, H: PMPHardware>(pub &'a H);

impl<H: PMPHardware> fmt::Display for PMPRegisterDump<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " PMP hardware configuration -- entries: {}\r\n",
            self.0.entries()
        )?;
        let mut prev = 0;
        for index in 0..self.0.entries() {
            let (pmpaddr, pmpcfg) = self.0.read_entry(index);
            format_pmp_entry(f, index, pmpaddr, prev, pmpcfg)?;
            prev = pmpaddr;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmp::sim::SimulatedPMP;
    use crate::pmp::write_pmp_entries;
    use kernel::platform::mpu::Permissions;
    use std::format;

    fn sample() -> PMPShadow<8> {
        let mut table = PMPShadow::new();
        table
            .push_region(PMPCfg::locked(Permissions::ReadExecuteOnly), 0x2000_0000, 0x1_0000)
            .unwrap();
        table
            .push_region(PMPCfg::from(Permissions::ReadWriteOnly), 0x8010_0000, 0x3000)
            .unwrap();
        table
    }

    #[test]
    fn shadow_dump_decodes_ranges() {
        let dump = format!("{}", sample());
        let lines: std::vec::Vec<&str> = dump.lines().collect();
        assert_eq!(
            lines,
            [
                "  [00]: pmpaddr=0x08001FFF, cfg=0x9D (NAPOT) --> 0x20000000-0x2000FFFF R-X LOCKED",
                "  [01]: pmpaddr=0x20040000, cfg=0x00 (OFF)",
                "  [02]: pmpaddr=0x20040C00, cfg=0x0B (TOR) --> 0x80100000-0x80102FFF RW-",
            ]
        );
    }

    #[test]
    fn register_dump_lists_every_entry() {
        let mut hw = SimulatedPMP::<8>::new();
        let mut table = sample();
        write_pmp_entries(&mut hw, 0, 3, true, &mut table, "dump");

        let dump = format!("{}", PMPRegisterDump(&hw));
        assert!(dump.starts_with(" PMP hardware configuration -- entries: 8\r\n"));
        assert_eq!(dump.lines().count(), 9);
        assert!(dump.contains("0x80100000-0x80102FFF RW-"));
        assert!(dump.contains("  [07]: pmpaddr=0x00000000, cfg=0x00 (OFF)"));
    }
}
