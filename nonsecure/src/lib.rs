// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Non-secure fault sink.
//!
//! The Secure world relays faults of Non-secure origin here so the kernel's
//! fatal-error path sees them exactly as if they had trapped natively:
//! [`init`] registers a statically allocated [`RelayContext`] and the sink
//! callback with the Secure service, the callback rebuilds the kernel's
//! fault-frame representation from the relayed context, and diagnostics code
//! can fetch the raw context afterwards through [`last_fault_context`].
//!
//! Without this relay a fault that targets the Secure world (BusFault,
//! SecureFault, SPU violation) would reset the system with no Non-secure
//! record of the root cause at all.

#![no_std]

use core::ptr::{addr_of, addr_of_mut};

use cortexm33::fault::{CalleeSaved, ExceptionFrame, RelayContext};
use ns_fault_service::{service, ErrorCode};

/// Fatal error classes the kernel entry point distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    /// A CPU exception, with an accompanying fault frame.
    CpuException,
    /// An unrecoverable kernel condition without hardware fault state.
    KernelPanic,
    /// An interrupt with no registered handler.
    SpuriousInterrupt,
}

/// The kernel's native fault-frame representation.
///
/// The basic frame carries the eight hardware-stacked registers faithfully
/// from the relayed context. The callee-saved block is reported as zero until
/// the Secure side captures it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KernelFaultFrame {
    pub basic: ExceptionFrame,
    pub exc_return: u32,
    pub msp: u32,
    pub psp: u32,
    pub callee: CalleeSaved,
}

/// The kernel's fatal-error entry point. Decides halt vs reset; never
/// returns.
pub type FatalHandler = fn(FatalError, &KernelFaultFrame) -> !;

/// The relay buffer shared with the Secure world. Written by the Secure
/// producer once per relayed fault, consumed here once before the fatal path
/// ends the session.
static mut CONTEXT: RelayContext = RelayContext::empty();

static mut FATAL_HANDLER: Option<FatalHandler> = None;

/// Register the fault sink with the Secure world.
///
/// Must run during Non-secure initialization, before faults can occur.
/// Calling it again replaces the previous registration (last-writer-wins).
///
/// ## Safety
///
/// Must not race with fault handling or another `init` call; intended to be
/// called once from the init sequence.
pub unsafe fn init(fatal: FatalHandler) -> Result<(), ErrorCode> {
    addr_of_mut!(FATAL_HANDLER).write(Some(fatal));

    let result = service::set_handler(addr_of_mut!(CONTEXT), relayed_fault_callback);

    #[cfg(feature = "defmt")]
    if result.is_err() {
        defmt::error!("non-secure fault handler registration failed");
    }

    result
}

/// Rebuild the kernel fault frame from a relayed context.
///
/// Returns `None` unless the producer has marked the context valid.
pub fn reconstruct(context: &RelayContext) -> Option<KernelFaultFrame> {
    if !context.valid {
        return None;
    }

    Some(KernelFaultFrame {
        basic: context.frame,
        exc_return: context.exc_return,
        msp: context.status.msp_ns,
        psp: context.status.psp_ns,
        callee: context.registers,
    })
}

/// The sink itself: entered from the Secure world's scrubbed branch with the
/// translated EXC_RETURN in the link register.
///
/// Re-enters the registered fatal handler tagged as a CPU exception. The
/// fatal handler owns the halt-or-reset decision; if somehow nothing is
/// registered or the context is not valid, the only safe move left is a
/// reset.
pub unsafe extern "C" fn relayed_fault_callback() {
    let context = &*addr_of!(CONTEXT);

    match (reconstruct(context), *addr_of!(FATAL_HANDLER)) {
        (Some(frame), Some(fatal)) => fatal(FatalError::CpuException, &frame),
        _ => cortexm33::support::reset(),
    }
}

/// The last relayed fault context, for crash-report enrichment.
///
/// Returns `None` until a fault has actually been relayed; the buffer
/// contents are meaningless before the valid flag is set.
pub fn last_fault_context() -> Option<&'static RelayContext> {
    let context = unsafe { &*addr_of!(CONTEXT) };
    if context.valid {
        Some(context)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexm33::fault::{ExceptionInfo, FaultStatus};
    use cortexm33::handoff::HandoffImage;
    use cortexm33::tz::{EXC_RETURN_ES, EXC_RETURN_S, EXC_RETURN_SPSEL};
    use ns_fault_service::relay::{
        populate_context, relay_decision, DeclineReason, RelayDecision,
    };
    use ns_fault_service::service::RegistrationTable;

    const NS_THREAD_PSP: u32 = 0xFFFF_FFBC;
    const BUSFAULT_EXCEPTION: usize = 5;

    fn bus_fault_capture() -> ExceptionInfo {
        ExceptionInfo {
            frame: ExceptionFrame {
                r0: 0xA0A0_0001,
                r1: 0xA0A0_0002,
                r2: 0xA0A0_0003,
                r3: 0xA0A0_0004,
                r12: 0xA0A0_000C,
                lr: 0x0004_2005,
                pc: 0x0004_1FF8,
                xpsr: 0x2100_0000,
            },
            status: FaultStatus {
                cfsr: 1 << 9, // PRECISERR
                hfsr: 0,
                sfsr: 0,
                bfar: 0x5000_8000,
                mmfar: 0,
                sfar: 0,
                msp_ns: 0x2003_F000,
                psp_ns: 0x2002_0000,
            },
            exc_return: NS_THREAD_PSP,
            ipsr: BUSFAULT_EXCEPTION as u32,
        }
    }

    unsafe extern "C" fn sink_stub() {}

    #[test]
    fn no_context_before_any_fault() {
        // The shared static starts invalid; the accessor must say "none"
        // rather than expose zeroed garbage.
        assert!(last_fault_context().is_none());
    }

    #[test]
    fn reconstruct_requires_valid_flag() {
        let context = RelayContext::empty();
        assert!(reconstruct(&context).is_none());
    }

    #[test]
    fn round_trip_preserves_basic_registers() {
        let info = bus_fault_capture();
        let mut context = RelayContext::empty();
        unsafe { populate_context(&mut context, &info) };

        let frame = reconstruct(&context).unwrap();
        assert_eq!(frame.basic, info.frame);
        assert_eq!(frame.exc_return, NS_THREAD_PSP);
        assert_eq!(frame.msp, 0x2003_F000);
        assert_eq!(frame.psp, 0x2002_0000);
        // Known incompleteness: callee-saved registers are relayed as zero.
        assert_eq!(frame.callee, CalleeSaved::zeroed());
    }

    // Scenario: a BusFault with a Non-secure EXC_RETURN is relayed end to
    // end, and the frame the kernel's fatal path would receive matches the
    // captured one register for register.
    #[test]
    fn non_secure_bus_fault_relays_to_kernel_frame() {
        let mut context = RelayContext::empty();
        let mut table = RegistrationTable::new();
        table.set(&mut context, sink_stub).unwrap();

        let info = bus_fault_capture();
        let decision = relay_decision(&info, table.is_registered(), false);
        let ns_exc_return = match decision {
            RelayDecision::Relay { ns_exc_return } => ns_exc_return,
            local => panic!("expected relay, got {:?}", local),
        };
        assert_eq!(ns_exc_return & EXC_RETURN_ES, 0);
        assert_eq!(ns_exc_return & EXC_RETURN_SPSEL, 0);

        let registration = table.get().unwrap();
        unsafe { populate_context(registration.context, &info) };

        // The scrubbed transfer must expose nothing but the two arguments.
        let image = HandoffImage::compute(registration.callback as usize as u32, ns_exc_return);
        assert!(image.gp[1..].iter().all(|&r| r == 0));
        assert_eq!(image.lr, ns_exc_return);

        let frame = reconstruct(&context).unwrap();
        assert_eq!(frame.basic, info.frame);
        assert_eq!(frame.basic.pc, 0x0004_1FF8);
        assert_eq!(frame.basic.xpsr, 0x2100_0000);
    }

    // Scenario: the same trap but with a Secure-stack EXC_RETURN takes the
    // local path and the sink's context is never touched.
    #[test]
    fn secure_origin_fault_is_never_relayed() {
        let mut context = RelayContext::empty();
        let mut table = RegistrationTable::new();
        table.set(&mut context, sink_stub).unwrap();

        let mut info = bus_fault_capture();
        info.exc_return |= EXC_RETURN_S;

        assert_eq!(
            relay_decision(&info, table.is_registered(), false),
            RelayDecision::Local(DeclineReason::SecureStack)
        );
        assert!(!context.valid);
        assert!(reconstruct(&context).is_none());
    }
}
