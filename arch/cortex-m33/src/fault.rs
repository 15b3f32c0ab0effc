// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Exception-context capture for faults that trap into the Secure world.
//!
//! The fault-entry trampoline records the hardware-stacked register frame and
//! the fault status registers into a single static slot before any policy
//! code runs. Faults are serviced strictly one at a time (the core masks at
//! the fault priority), so a single slot is sufficient and no locking is
//! involved. The captured context may describe either world; deciding what to
//! do with it is the platform's job, reached through the
//! `secure_fault_policy` symbol.

use core::fmt::Write;

/// The eight register values the hardware pushes on exception entry.
///
/// Immutable once captured; the relay copies it across the trust boundary and
/// never rewrites it in place.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

impl ExceptionFrame {
    pub const fn zeroed() -> ExceptionFrame {
        ExceptionFrame {
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: 0,
            pc: 0,
            xpsr: 0,
        }
    }

    /// Copy the eight hardware-stacked words starting at `stack`.
    ///
    /// ## Safety
    ///
    /// `stack` must point at a live exception frame, i.e. the stack pointer
    /// value the hardware used for stacking on the most recent exception
    /// entry.
    pub unsafe fn copy_from_stack(stack: *const u32) -> ExceptionFrame {
        ExceptionFrame {
            r0: *stack.offset(0),
            r1: *stack.offset(1),
            r2: *stack.offset(2),
            r3: *stack.offset(3),
            r12: *stack.offset(4),
            lr: *stack.offset(5),
            pc: *stack.offset(6),
            xpsr: *stack.offset(7),
        }
    }
}

/// Callee-saved registers r4-r11.
///
/// Carried in the relayed context for layout compatibility with the native
/// fault frame, but currently always zero: the fault entry does not stack
/// them. TODO: capture r4-r11 in the fault-entry trampoline so the relayed
/// context stops reporting zeros for them.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalleeSaved {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
}

impl CalleeSaved {
    pub const fn zeroed() -> CalleeSaved {
        CalleeSaved {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
        }
    }
}

/// Fault status registers latched once per fault, plus the two Non-secure
/// stack pointers read live from the register bank.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultStatus {
    pub cfsr: u32,
    pub hfsr: u32,
    pub sfsr: u32,
    pub bfar: u32,
    pub mmfar: u32,
    pub sfar: u32,
    pub msp_ns: u32,
    pub psp_ns: u32,
}

impl FaultStatus {
    pub const fn zeroed() -> FaultStatus {
        FaultStatus {
            cfsr: 0,
            hfsr: 0,
            sfsr: 0,
            bfar: 0,
            mmfar: 0,
            sfar: 0,
            msp_ns: 0,
            psp_ns: 0,
        }
    }
}

/// Everything the fault-entry trampoline captures about one fault.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExceptionInfo {
    pub frame: ExceptionFrame,
    pub status: FaultStatus,
    /// EXC_RETURN as delivered to the fault handler. Zero means no fault has
    /// been captured since reset.
    pub exc_return: u32,
    /// IPSR of the handler itself: the exception number being serviced.
    pub ipsr: u32,
}

impl ExceptionInfo {
    pub const fn zeroed() -> ExceptionInfo {
        ExceptionInfo {
            frame: ExceptionFrame::zeroed(),
            status: FaultStatus::zeroed(),
            exc_return: 0,
            ipsr: 0,
        }
    }

    /// The exception number that trapped, from the handler's IPSR.
    pub fn active_exception_number(&self) -> usize {
        (self.ipsr & 0xff) as usize
    }
}

/// The structure shared across the trust boundary.
///
/// Allocated statically by the Non-secure side, registered once with the
/// Secure side, written exactly once per relayed fault by the Secure side,
/// and consumed exactly once by the Non-secure fault sink. `valid` is set
/// only after every other field is populated and is the only readiness
/// signal; consumers must check it before trusting anything else here.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelayContext {
    pub frame: ExceptionFrame,
    pub registers: CalleeSaved,
    pub status: FaultStatus,
    pub exc_return: u32,
    /// Peripheral-protection event bitmask, captured separately from the
    /// generic fault status. The bit assignment is owned by the chip crate.
    pub spu_events: u32,
    pub valid: bool,
}

impl RelayContext {
    pub const fn empty() -> RelayContext {
        RelayContext {
            frame: ExceptionFrame::zeroed(),
            registers: CalleeSaved::zeroed(),
            status: FaultStatus::zeroed(),
            exc_return: 0,
            spu_events: 0,
            valid: false,
        }
    }
}

/// Single capture slot, written by `exception_info_save` in fault context
/// only.
static mut EXCEPTION_INFO: ExceptionInfo = ExceptionInfo::zeroed();

/// The captured context of the most recent fault, or `None` if nothing has
/// trapped since reset (EXC_RETURN can never legitimately be zero).
pub fn exception_info_get() -> Option<ExceptionInfo> {
    let info = unsafe { core::ptr::addr_of!(EXCEPTION_INFO).read() };
    if info.exc_return == 0 {
        None
    } else {
        Some(info)
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
fn ipsr() -> u32 {
    use core::arch::asm;
    let ipsr: u32;
    unsafe {
        asm!("mrs {}, ipsr", out(reg) ipsr, options(nomem, nostack, preserves_flags));
    }
    ipsr
}

/// Continuation of the fault-entry trampoline. Copies the stacked frame and
/// latches the fault status registers into the capture slot.
///
/// `stack` is the stack-pointer value the hardware stacked the frame onto,
/// already selected from the EXC_RETURN S and SPSEL bits by the trampoline.
#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
#[no_mangle]
unsafe extern "C" fn exception_info_save(stack: *const u32, exc_return: u32) {
    use crate::{scb, tz};

    let frame = if stack.is_null() {
        ExceptionFrame::zeroed()
    } else {
        ExceptionFrame::copy_from_stack(stack)
    };

    let info = ExceptionInfo {
        frame,
        status: FaultStatus {
            cfsr: scb::configurable_fault_status(),
            hfsr: scb::hard_fault_status(),
            sfsr: scb::secure_fault_status(),
            bfar: scb::bus_fault_address(),
            mmfar: scb::mem_fault_address(),
            sfar: scb::secure_fault_address(),
            msp_ns: tz::msp_ns(),
            psp_ns: tz::psp_ns(),
        },
        exc_return,
        ipsr: ipsr(),
    };

    core::ptr::addr_of_mut!(EXCEPTION_INFO).write(info);
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
extern "C" {
    /// Terminal fault policy provided by the Secure platform crate. Decides
    /// between relaying the captured context to the Non-secure world and
    /// local handling (reset or halt). Must never return.
    fn secure_fault_policy() -> !;

    /// Fault-entry trampoline for the Secure image's HardFault, BusFault, and
    /// SecureFault vectors (and the platform's protection-unit violation
    /// vector when that is escalated to a fault).
    pub fn secure_fault_handler_arm_v8m();
}

// Select the stack the hardware pushed the frame onto from the EXC_RETURN S
// bit (Secure vs Non-secure bank) and SPSEL bit (main vs process), save the
// captured context, then hand over to the platform policy. The policy
// diverges, so nothing here ever returns.
#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
core::arch::global_asm!(
    "
    .section .secure_fault_handler_arm_v8m, \"ax\"
    .global secure_fault_handler_arm_v8m
    .thumb_func
  secure_fault_handler_arm_v8m:
    mov r1, lr                        // r1 = EXC_RETURN
    tst lr, #0x40                     // EXC_RETURN bit 6: Secure stack?
    beq 100f // ns_stack
    tst lr, #0x4                      // EXC_RETURN bit 2: process stack?
    ite eq
    mrseq r0, msp                     // r0 = faulting stack pointer
    mrsne r0, psp
    b 200f // save
  100: // ns_stack
    tst lr, #0x4
    ite eq
    mrseq r0, msp_ns
    mrsne r0, psp_ns
  200: // save
    push {{r4, lr}}                   // keep the frame 8-byte aligned
    bl {save}
    pop {{r4, lr}}
    b {policy}
    ",
    save = sym exception_info_save,
    policy = sym secure_fault_policy,
);

/// Decode and print the latched fault status registers.
///
/// Follows the same shape as the generic Cortex-M state printer: only bits
/// that are set produce a line, followed by the raw register values.
pub fn print_fault_status(writer: &mut dyn Write, status: &FaultStatus) {
    let cfsr = status.cfsr;
    let hfsr = status.hfsr;
    let sfsr = status.sfsr;

    let iaccviol = (cfsr & 0x01) == 0x01;
    let daccviol = (cfsr & 0x02) == 0x02;
    let munstkerr = (cfsr & 0x08) == 0x08;
    let mstkerr = (cfsr & 0x10) == 0x10;
    let mlsperr = (cfsr & 0x20) == 0x20;
    let mmfarvalid = (cfsr & 0x80) == 0x80;

    let ibuserr = ((cfsr >> 8) & 0x01) == 0x01;
    let preciserr = ((cfsr >> 8) & 0x02) == 0x02;
    let impreciserr = ((cfsr >> 8) & 0x04) == 0x04;
    let unstkerr = ((cfsr >> 8) & 0x08) == 0x08;
    let stkerr = ((cfsr >> 8) & 0x10) == 0x10;
    let lsperr = ((cfsr >> 8) & 0x20) == 0x20;
    let bfarvalid = ((cfsr >> 8) & 0x80) == 0x80;

    let undefinstr = ((cfsr >> 16) & 0x01) == 0x01;
    let invstate = ((cfsr >> 16) & 0x02) == 0x02;
    let invpc = ((cfsr >> 16) & 0x04) == 0x04;
    let nocp = ((cfsr >> 16) & 0x08) == 0x08;
    let unaligned = ((cfsr >> 16) & 0x100) == 0x100;
    let divbyzero = ((cfsr >> 16) & 0x200) == 0x200;

    let vecttbl = (hfsr & 0x02) == 0x02;
    let forced = (hfsr & 0x40000000) == 0x40000000;

    let invep = (sfsr & 0x01) == 0x01;
    let invis = (sfsr & 0x02) == 0x02;
    let inver = (sfsr & 0x04) == 0x04;
    let auviol = (sfsr & 0x08) == 0x08;
    let invtran = (sfsr & 0x10) == 0x10;
    let slsperr = (sfsr & 0x20) == 0x20;
    let sfarvalid = (sfsr & 0x40) == 0x40;
    let slserr = (sfsr & 0x80) == 0x80;

    let _ = writer.write_fmt(format_args!("\r\n---| Fault Status |---\r\n"));

    if iaccviol {
        let _ = writer.write_fmt(format_args!("Instruction Access Violation:       true\r\n"));
    }
    if daccviol {
        let _ = writer.write_fmt(format_args!("Data Access Violation:              true\r\n"));
    }
    if munstkerr {
        let _ = writer.write_fmt(format_args!("Memory Management Unstacking Fault: true\r\n"));
    }
    if mstkerr {
        let _ = writer.write_fmt(format_args!("Memory Management Stacking Fault:   true\r\n"));
    }
    if mlsperr {
        let _ = writer.write_fmt(format_args!("Memory Management Lazy FP Fault:    true\r\n"));
    }
    if ibuserr {
        let _ = writer.write_fmt(format_args!("Instruction Bus Error:              true\r\n"));
    }
    if preciserr {
        let _ = writer.write_fmt(format_args!("Precise Data Bus Error:             true\r\n"));
    }
    if impreciserr {
        let _ = writer.write_fmt(format_args!("Imprecise Data Bus Error:           true\r\n"));
    }
    if unstkerr {
        let _ = writer.write_fmt(format_args!("Bus Unstacking Fault:               true\r\n"));
    }
    if stkerr {
        let _ = writer.write_fmt(format_args!("Bus Stacking Fault:                 true\r\n"));
    }
    if lsperr {
        let _ = writer.write_fmt(format_args!("Bus Lazy FP Fault:                  true\r\n"));
    }
    if undefinstr {
        let _ = writer.write_fmt(format_args!("Undefined Instruction Usage Fault:  true\r\n"));
    }
    if invstate {
        let _ = writer.write_fmt(format_args!("Invalid State Usage Fault:          true\r\n"));
    }
    if invpc {
        let _ = writer.write_fmt(format_args!("Invalid PC Load Usage Fault:        true\r\n"));
    }
    if nocp {
        let _ = writer.write_fmt(format_args!("No Coprocessor Usage Fault:         true\r\n"));
    }
    if unaligned {
        let _ = writer.write_fmt(format_args!("Unaligned Access Usage Fault:       true\r\n"));
    }
    if divbyzero {
        let _ = writer.write_fmt(format_args!("Divide By Zero:                     true\r\n"));
    }
    if vecttbl {
        let _ = writer.write_fmt(format_args!("Bus Fault on Vector Table Read:     true\r\n"));
    }
    if forced {
        let _ = writer.write_fmt(format_args!("Forced Hard Fault:                  true\r\n"));
    }
    if invep {
        let _ = writer.write_fmt(format_args!("Invalid Secure Entry Point:         true\r\n"));
    }
    if invis {
        let _ = writer.write_fmt(format_args!("Invalid Integrity Signature:        true\r\n"));
    }
    if inver {
        let _ = writer.write_fmt(format_args!("Invalid Exception Return:           true\r\n"));
    }
    if auviol {
        let _ = writer.write_fmt(format_args!("Attribution Unit Violation:         true\r\n"));
    }
    if invtran {
        let _ = writer.write_fmt(format_args!("Invalid NS to S Transition:         true\r\n"));
    }
    if slsperr {
        let _ = writer.write_fmt(format_args!("Secure Lazy FP Fault:               true\r\n"));
    }
    if slserr {
        let _ = writer.write_fmt(format_args!("Secure Lazy Activation Fault:       true\r\n"));
    }

    if mmfarvalid {
        let _ = writer.write_fmt(format_args!(
            "Faulting Memory Address:            {:#010X}\r\n",
            status.mmfar
        ));
    }
    if bfarvalid {
        let _ = writer.write_fmt(format_args!(
            "Bus Fault Address:                  {:#010X}\r\n",
            status.bfar
        ));
    }
    if sfarvalid {
        let _ = writer.write_fmt(format_args!(
            "Secure Fault Address:               {:#010X}\r\n",
            status.sfar
        ));
    }

    if cfsr == 0 && hfsr == 0 && sfsr == 0 {
        let _ = writer.write_fmt(format_args!("No faults detected.\r\n"));
    } else {
        let _ = writer.write_fmt(format_args!(
            "Fault Status Register (CFSR):       {:#010X}\r\n",
            cfsr
        ));
        let _ = writer.write_fmt(format_args!(
            "Hard Fault Status Register (HFSR):  {:#010X}\r\n",
            hfsr
        ));
        let _ = writer.write_fmt(format_args!(
            "Secure Fault Status Register (SFSR): {:#010X}\r\n",
            sfsr
        ));
    }
}

/// Print the captured frame and the decoded fault status.
pub fn print_exception_info(writer: &mut dyn Write, info: &ExceptionInfo) {
    let _ = writer.write_fmt(format_args!(
        "Fault in exception {} ({})\r\n\
         \tr0  {:#010X}\r\n\
         \tr1  {:#010X}\r\n\
         \tr2  {:#010X}\r\n\
         \tr3  {:#010X}\r\n\
         \tr12 {:#010X}\r\n\
         \tlr  {:#010X}\r\n\
         \tpc  {:#010X}\r\n\
         \txpsr {:#010X}\r\n\
         \tEXC_RETURN {:#010X}\r\n",
        info.active_exception_number(),
        crate::ipsr_isr_number_to_str(info.active_exception_number()),
        info.frame.r0,
        info.frame.r1,
        info.frame.r2,
        info.frame.r3,
        info.frame.r12,
        info.frame.lr,
        info.frame.pc,
        info.frame.xpsr,
        info.exc_return,
    ));
    print_fault_status(writer, &info.status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt;

    struct BufWriter {
        buf: [u8; 2048],
        len: usize,
    }

    impl BufWriter {
        fn new() -> BufWriter {
            BufWriter {
                buf: [0; 2048],
                len: 0,
            }
        }

        fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap()
        }
    }

    impl fmt::Write for BufWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let bytes = s.as_bytes();
            if self.len + bytes.len() > self.buf.len() {
                return Err(fmt::Error);
            }
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            Ok(())
        }
    }

    #[test]
    fn copy_from_stack_orders_registers() {
        let stacked: [u32; 8] = [1, 2, 3, 4, 12, 0xFFFF_FFBC, 0x0800_1234, 0x0100_0005];
        let frame = unsafe { ExceptionFrame::copy_from_stack(stacked.as_ptr()) };
        assert_eq!(frame.r0, 1);
        assert_eq!(frame.r1, 2);
        assert_eq!(frame.r2, 3);
        assert_eq!(frame.r3, 4);
        assert_eq!(frame.r12, 12);
        assert_eq!(frame.lr, 0xFFFF_FFBC);
        assert_eq!(frame.pc, 0x0800_1234);
        assert_eq!(frame.xpsr, 0x0100_0005);
    }

    #[test]
    fn active_exception_number_from_ipsr() {
        let mut info = ExceptionInfo::zeroed();
        info.ipsr = 0x0000_0105;
        assert_eq!(info.active_exception_number(), 5);
    }

    #[test]
    fn no_capture_means_none() {
        // The capture slot starts zeroed, and EXC_RETURN zero is reserved as
        // the "nothing captured" marker.
        assert!(exception_info_get().is_none());
    }

    #[test]
    fn printer_names_set_bits() {
        let status = FaultStatus {
            cfsr: (1 << 8) | (1 << 9) | (1 << 15), // IBUSERR, PRECISERR, BFARVALID
            hfsr: 0x4000_0000,                     // FORCED
            sfsr: 0x48,                            // AUVIOL, SFARVALID
            bfar: 0x2000_0000,
            mmfar: 0,
            sfar: 0x5000_3000,
            msp_ns: 0,
            psp_ns: 0,
        };
        let mut writer = BufWriter::new();
        print_fault_status(&mut writer, &status);
        let out = writer.as_str();
        assert!(out.contains("Instruction Bus Error"));
        assert!(out.contains("Precise Data Bus Error"));
        assert!(out.contains("Forced Hard Fault"));
        assert!(out.contains("Attribution Unit Violation"));
        assert!(out.contains("Bus Fault Address:                  0x20000000"));
        assert!(out.contains("Secure Fault Address:               0x50003000"));
        assert!(!out.contains("Divide By Zero"));
    }

    #[test]
    fn printer_reports_clean_status() {
        let mut writer = BufWriter::new();
        print_fault_status(&mut writer, &FaultStatus::zeroed());
        assert!(writer.as_str().contains("No faults detected."));
    }

    #[test]
    fn empty_relay_context_is_invalid() {
        let context = RelayContext::empty();
        assert!(!context.valid);
        assert_eq!(context.registers, CalleeSaved::zeroed());
    }
}
