// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Trust-boundary discrimination and the relay itself.
//!
//! Exceptions are banked or not on Armv8-M: HardFault, MemManage,
//! UsageFault, SVCall, PendSV, and SysTick have per-world pending state and
//! target the world they were taken from, while BusFault and SecureFault are
//! not banked and (with AIRCR.BFHFNMINS clear) always target the Secure
//! world, as does the SPU violation interrupt, which is routed to the Secure
//! state. Those three are therefore the only exceptions that can trap into
//! Secure firmware for a purely Non-secure root cause, and they form the
//! relay allow-list.

use cortexm33::fault::{CalleeSaved, ExceptionInfo, RelayContext};
use cortexm33::{tz, BUSFAULT_EXCEPTION, CAPABILITIES, NVIC_USER_IRQ_OFFSET, SECUREFAULT_EXCEPTION};

/// Exception number of the SPU violation interrupt on the nRF53 application
/// core.
pub const SPUFAULT_EXCEPTION: usize = NVIC_USER_IRQ_OFFSET + nrf53::app_peripheral_ids::SPU as usize;

/// Why a captured fault was not relayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeclineReason {
    /// The build has no TrustZone; there is no Non-secure world.
    NoTrustZone,
    /// No fault has been captured (EXC_RETURN is zero).
    NoCapture,
    /// The excepting context was running on a Secure stack: this is a genuine
    /// Secure-side fault and must never leave the Secure world.
    SecureStack,
    /// The active exception is not one that a Non-secure root cause can
    /// produce in the Secure world.
    ExceptionNotEligible,
    /// No Non-secure handler has been registered.
    NoHandler,
}

/// The outcome of trust-boundary discrimination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RelayDecision {
    /// Hand the context to the Non-secure handler, entering it with this
    /// translated EXC_RETURN.
    Relay { ns_exc_return: u32 },
    /// Fall through to local terminal handling.
    Local(DeclineReason),
}

/// Decide whether a captured fault may be relayed.
///
/// Relay requires all of: a valid capture, a Non-secure faulting stack, an
/// allow-listed exception number, and a registered handler. This is a hard
/// safety boundary: declining only costs diagnostic detail, while relaying
/// wrongly would leak Secure state or jump through an invalid pointer.
pub fn relay_decision(
    info: &ExceptionInfo,
    handler_registered: bool,
    control_ns_spsel: bool,
) -> RelayDecision {
    if !CAPABILITIES.has_trustzone {
        return RelayDecision::Local(DeclineReason::NoTrustZone);
    }
    if info.exc_return == 0 {
        return RelayDecision::Local(DeclineReason::NoCapture);
    }
    if tz::is_secure_stack(info.exc_return) {
        return RelayDecision::Local(DeclineReason::SecureStack);
    }

    match info.active_exception_number() {
        BUSFAULT_EXCEPTION | SECUREFAULT_EXCEPTION | SPUFAULT_EXCEPTION => {}
        _ => return RelayDecision::Local(DeclineReason::ExceptionNotEligible),
    }

    if !handler_registered {
        return RelayDecision::Local(DeclineReason::NoHandler);
    }

    RelayDecision::Relay {
        ns_exc_return: tz::translate_exc_return(info.exc_return, control_ns_spsel),
    }
}

/// Write the captured context into the registered relay buffer.
///
/// Every field is populated before `valid` is set; `valid` is the only
/// readiness signal the Non-secure consumer has. `spu_events` is not touched
/// here: the SPU violation handler latches it separately, before the fault
/// escalates.
///
/// ## Safety
///
/// `context` must be the registered, live relay buffer, and the caller must
/// be in fault context (single writer).
pub unsafe fn populate_context(context: *mut RelayContext, info: &ExceptionInfo) {
    let context = &mut *context;
    context.frame = info.frame;
    // Callee-saved registers are not captured by the fault entry; report
    // zeros rather than stack garbage.
    context.registers = CalleeSaved::zeroed();
    context.status = info.status;
    context.exc_return = info.exc_return;
    context.valid = true;
}

/// Attempt to relay the most recent captured fault to the Non-secure world.
///
/// Returns normally when the fault is not eligible, in which case the caller
/// owns terminal handling. On relay this function does not return: the
/// context is populated, every Secure register is scrubbed, and control
/// transfers to the registered Non-secure callback.
#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
pub unsafe fn ns_fault_handling() {
    use cortexm33::{fault, handoff};

    let info = match fault::exception_info_get() {
        Some(info) => info,
        None => return,
    };

    let registration = crate::service::registration();
    let decision = relay_decision(&info, registration.is_some(), tz::control_ns_spsel());

    match (decision, registration) {
        (RelayDecision::Relay { ns_exc_return }, Some(registration)) => {
            populate_context(registration.context, &info);
            #[cfg(feature = "defmt")]
            defmt::error!(
                "relaying fault (exception {}) to non-secure handler",
                info.active_exception_number()
            );
            handoff::ns_branch(registration.callback as usize as u32, ns_exc_return);
        }
        (RelayDecision::Local(_reason), _) => {
            #[cfg(feature = "defmt")]
            defmt::error!(
                "fault not relayed (exception {}): {}",
                info.active_exception_number(),
                _reason
            );
        }
        // Unreachable: a Relay decision implies a registration.
        (RelayDecision::Relay { .. }, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexm33::fault::{ExceptionFrame, FaultStatus};
    use cortexm33::tz::{EXC_RETURN_ES, EXC_RETURN_S, EXC_RETURN_SPSEL};

    // EXC_RETURN for a Non-secure thread-mode context on the process stack,
    // as delivered to a Secure handler.
    const NS_THREAD_PSP: u32 = 0xFFFF_FFBC;

    fn captured(exc_return: u32, exception_number: usize) -> ExceptionInfo {
        ExceptionInfo {
            frame: ExceptionFrame {
                r0: 0x11,
                r1: 0x22,
                r2: 0x33,
                r3: 0x44,
                r12: 0x55,
                lr: 0x66,
                pc: 0x0800_1000,
                xpsr: 0x0100_0000,
            },
            status: FaultStatus::zeroed(),
            exc_return,
            ipsr: exception_number as u32,
        }
    }

    #[test]
    fn secure_stack_faults_never_relay() {
        let info = captured(NS_THREAD_PSP | EXC_RETURN_S | EXC_RETURN_ES, BUSFAULT_EXCEPTION);
        assert_eq!(
            relay_decision(&info, true, false),
            RelayDecision::Local(DeclineReason::SecureStack)
        );
    }

    #[test]
    fn missing_capture_never_relays() {
        let info = captured(0, BUSFAULT_EXCEPTION);
        assert_eq!(
            relay_decision(&info, true, false),
            RelayDecision::Local(DeclineReason::NoCapture)
        );
    }

    #[test]
    fn unregistered_handler_never_relays() {
        let info = captured(NS_THREAD_PSP, BUSFAULT_EXCEPTION);
        assert_eq!(
            relay_decision(&info, false, false),
            RelayDecision::Local(DeclineReason::NoHandler)
        );
    }

    #[test]
    fn only_allow_listed_exceptions_relay() {
        for exception in [2usize, 3, 4, 6, 11, 14, 15, 16, 20] {
            let info = captured(NS_THREAD_PSP, exception);
            assert_eq!(
                relay_decision(&info, true, false),
                RelayDecision::Local(DeclineReason::ExceptionNotEligible),
                "exception {} must not be relayed",
                exception
            );
        }
        for exception in [
            BUSFAULT_EXCEPTION,
            SECUREFAULT_EXCEPTION,
            SPUFAULT_EXCEPTION,
        ] {
            let info = captured(NS_THREAD_PSP, exception);
            assert!(
                matches!(
                    relay_decision(&info, true, false),
                    RelayDecision::Relay { .. }
                ),
                "exception {} must be relayed",
                exception
            );
        }
    }

    #[test]
    fn relay_translates_exc_return() {
        let info = captured(NS_THREAD_PSP | EXC_RETURN_ES, SECUREFAULT_EXCEPTION);
        match relay_decision(&info, true, true) {
            RelayDecision::Relay { ns_exc_return } => {
                assert_eq!(ns_exc_return & EXC_RETURN_ES, 0);
                assert_ne!(ns_exc_return & EXC_RETURN_SPSEL, 0);
            }
            local => panic!("expected relay, got {:?}", local),
        }
    }

    #[test]
    fn populate_fills_every_field_then_valid() {
        let info = captured(NS_THREAD_PSP, BUSFAULT_EXCEPTION);
        let mut context = RelayContext::empty();
        context.spu_events = nrf53::spu::EVENT_RAMACCERR;

        unsafe { populate_context(&mut context, &info) };

        assert!(context.valid);
        assert_eq!(context.frame, info.frame);
        assert_eq!(context.registers, CalleeSaved::zeroed());
        assert_eq!(context.exc_return, NS_THREAD_PSP);
        // Latched separately by the SPU violation path; population must not
        // disturb it.
        assert_eq!(context.spu_events, nrf53::spu::EVENT_RAMACCERR);
    }
}
