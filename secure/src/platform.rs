// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Secure platform hooks: initialization and the terminal halt/reset paths.
//!
//! Both terminal paths attempt the non-secure relay first. If the fault is
//! eligible the attempt does not return; otherwise the system is parked or
//! reset locally. A second fault during the relay lands back here and, now
//! carrying a Secure-stack EXC_RETURN, takes the local path immediately.

use core::fmt::Write;

use cortexm33::{fault, scb, CAPABILITIES};
use nrf53::spu::Spu;

use crate::ErrorCode;

/// One-time Secure platform initialization for the fault relay.
///
/// Enables the UsageFault/BusFault/SecureFault handlers, arms the SPU
/// violation-event interrupts, and optionally opens SYSRESETREQ to the
/// Non-secure world so the RTOS fatal path can reset the system itself.
///
/// ## Safety
///
/// Must run once, before the Non-secure image starts.
pub unsafe fn init(allow_ns_reset: bool) -> Result<(), ErrorCode> {
    let spu = Spu::new();
    if CAPABILITIES.has_trustzone && !spu.is_trustzone_capable() {
        return Err(ErrorCode::NoSupport);
    }

    scb::enable_fault_handlers();
    spu.enable_event_interrupts();

    if allow_ns_reset {
        scb::allow_nonsecure_reset();
    }

    Ok(())
}

/// Print the captured context of the most recent fault, if any.
///
/// For boards that have a debug sink on the local terminal path. Writes
/// nothing when no fault has been captured.
pub fn dump_exception_info(writer: &mut dyn Write) {
    if let Some(info) = fault::exception_info_get() {
        fault::print_exception_info(writer, &info);
    }
}

/// Park the system after attempting the relay.
///
/// Interrupts are masked so every thread stops, not just the one that hit
/// the fault; the WFE loop keeps power down if a stray event wakes the core.
#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
pub unsafe fn system_halt() -> ! {
    use cortexm33::support;

    crate::relay::ns_fault_handling();

    support::disable_interrupts();
    loop {
        support::wfe();
    }
}

/// Reset the system after attempting the relay.
#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
pub unsafe fn system_reset() -> ! {
    crate::relay::ns_fault_handling();

    cortexm33::support::reset()
}

/// Terminal continuation of the fault-entry trampoline.
///
/// The trampoline has already captured the exception context. The SPU events
/// are latched here, while the registers still hold the cause, before the
/// relay attempt; a relayed context then carries them, and a declined one
/// costs nothing.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
pub unsafe extern "C" fn secure_fault_policy() -> ! {
    crate::service::save_spu_events();
    system_reset()
}
