// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Support for the Cortex-M33 security extension as used by the non-secure
//! fault relay: exception-context capture, EXC_RETURN discipline, and the
//! scrubbed secure-to-non-secure control transfer.

#![no_std]

pub mod fault;
pub mod handoff;
pub mod scb;
pub mod support;
pub mod tz;

mod static_ref;
pub use static_ref::StaticRef;

/// Build configuration resolved to a single capability descriptor.
///
/// The `fpu` and `trustzone` cargo features are consulted here and nowhere
/// else (the two assembly variants of [`handoff::ns_branch`] excepted, since
/// an FPU scrub cannot be a runtime decision on a core without the
/// instructions). Code that needs to know what the build supports reads
/// [`CAPABILITIES`].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// The floating-point extension is implemented and its register bank must
    /// be scrubbed before leaving the secure world.
    pub has_fpu: bool,
    /// The security extension is implemented. Without it there is no second
    /// world to relay a fault to.
    pub has_trustzone: bool,
}

pub const CAPABILITIES: Capabilities = Capabilities {
    has_fpu: cfg!(feature = "fpu"),
    has_trustzone: cfg!(feature = "trustzone"),
};

/// Offset of the first external interrupt in the exception number space.
pub const NVIC_USER_IRQ_OFFSET: usize = 16;

/// Architecture-assigned exception numbers relevant to fault handling.
pub const HARDFAULT_EXCEPTION: usize = 3;
pub const BUSFAULT_EXCEPTION: usize = 5;
pub const SECUREFAULT_EXCEPTION: usize = 7;

// Table 2-10 in ARM Cortex-M33 Devices Generic User Guide.
pub fn ipsr_isr_number_to_str(isr_number: usize) -> &'static str {
    match isr_number {
        0 => "Thread Mode",
        1 => "Reset",
        2 => "NMI",
        3 => "HardFault",
        4 => "MemManage",
        5 => "BusFault",
        6 => "UsageFault",
        7 => "SecureFault",
        8..=10 => "Reserved",
        11 => "SVCall",
        12 => "DebugMonitor",
        13 => "Reserved",
        14 => "PendSV",
        15 => "SysTick",
        16..=255 => "IRQn",
        _ => "(Unknown! Illegal value?)",
    }
}
