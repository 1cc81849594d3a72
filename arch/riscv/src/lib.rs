// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for the RISC-V Physical Memory Protection unit.

#![cfg_attr(not(test), no_std)]

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub mod csr;
pub mod pmp;
