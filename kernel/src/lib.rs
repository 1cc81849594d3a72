// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Architecture-independent half of the memory protection subsystem.
//!
//! This crate holds the types that scheduler and memory-management code own
//! (threads, memory domains and their partitions) together with the
//! [`platform::mpu::MPU`] trait through which that code drives a concrete
//! memory protection implementation. Architecture crates implement the trait;
//! nothing in here touches hardware.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod errorcode;
pub mod memory_domain;
pub mod platform;
pub mod thread;

pub use crate::errorcode::{halt, MpuError};
pub use crate::memory_domain::{DomainPartitions, MemoryDomain, Partition};
pub use crate::thread::{StackInfo, Thread};
