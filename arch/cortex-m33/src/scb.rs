// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! ARM System Control Block, Armv8-M Mainline flavor.
//!
//! Covers the subset of the System Control Space the fault relay reads and
//! writes: reset control, fault enables, and the fault status and address
//! registers (including the security extension's SFSR/SFAR).

use crate::static_ref::StaticRef;
use tock_registers::interfaces::{ReadWriteable, Readable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

register_structs! {
    ScbRegisters {
        /// 0xE000ED00-08, CPUID/ICSR/VTOR.
        (0x000 => _reserved0),

        /// Application Interrupt and Reset Control Register
        (0x00c => aircr: ReadWrite<u32, ApplicationInterruptAndReset::Register>),

        /// 0xE000ED10-20, SCR/CCR/SHPR.
        (0x010 => _reserved1),

        /// System Handler Control and State Register
        (0x024 => shcsr: ReadWrite<u32, SystemHandlerControlAndState::Register>),

        /// Configurable Fault Status Register
        (0x028 => cfsr: ReadWrite<u32, ConfigurableFaultStatus::Register>),

        /// HardFault Status Register
        (0x02c => hfsr: ReadWrite<u32, HardFaultStatus::Register>),

        /// Debug Fault Status Register
        (0x030 => _reserved2),

        /// MemManage Fault Address Register
        (0x034 => mmfar: ReadWrite<u32>),

        /// BusFault Address Register
        (0x038 => bfar: ReadWrite<u32>),

        /// 0xE000ED3C-E0, AFSR, CPUID scheme, CPACR/NSACR, MPU, SAU.
        (0x03c => _reserved3),

        /// Secure Fault Status Register
        (0x0e4 => sfsr: ReadWrite<u32, SecureFaultStatus::Register>),

        /// Secure Fault Address Register
        (0x0e8 => sfar: ReadWrite<u32>),

        (0x0ec => @END),
    }
}

register_bitfields![u32,
    ApplicationInterruptAndReset [
        /// Key field. Must write 0x05FA or the write is ignored.
        VECTKEY         OFFSET(16)  NUMBITS(16),

        /// 0=Little endian, 1=Big endian.
        ENDIANNESS      OFFSET(15)  NUMBITS(1),

        /// Prioritize Secure exceptions over Non-secure. Combining this with
        /// BFHFNMINS is UNDEFINED.
        PRIS            OFFSET(14)  NUMBITS(1),

        /// BusFault, HardFault, and NMI target the Non-secure state.
        BFHFNMINS       OFFSET(13)  NUMBITS(1),

        /// Binary point position for priority grouping.
        PRIGROUP        OFFSET(8)   NUMBITS(3),

        /// When set, only Secure writes to SYSRESETREQ are acted on.
        SYSRESETREQS    OFFSET(3)   NUMBITS(1),

        /// Writing 1 to this bit requests a system reset.
        SYSRESETREQ     OFFSET(2)   NUMBITS(1),

        /// Writing 1 clears all state information for exceptions.
        /// WARN: Writing this bit when not in a Debug halt is UNPREDICTABLE.
        VECTCLRACTIVE   OFFSET(1)   NUMBITS(1)
    ],

    SystemHandlerControlAndState [
        /// Enable the SecureFault exception (security extension only).
        SECUREFAULTENA  OFFSET(19)  NUMBITS(1),
        USGFAULTENA     OFFSET(18)  NUMBITS(1),
        BUSFAULTENA     OFFSET(17)  NUMBITS(1),
        MEMFAULTENA     OFFSET(16)  NUMBITS(1),
        SVCALLPENDED    OFFSET(15)  NUMBITS(1),
        BUSFAULTPENDED  OFFSET(14)  NUMBITS(1),
        SYSTICKACT      OFFSET(11)  NUMBITS(1),
        PENDSVACT       OFFSET(10)  NUMBITS(1),
        MONITORACT      OFFSET(8)   NUMBITS(1),
        SVCALLACT       OFFSET(7)   NUMBITS(1),
        USGFAULTACT     OFFSET(3)   NUMBITS(1),
        BUSFAULTACT     OFFSET(1)   NUMBITS(1),
        MEMFAULTACT     OFFSET(0)   NUMBITS(1)
    ],

    ConfigurableFaultStatus [
        UsageFault      OFFSET(16)  NUMBITS(16),
        BusFault        OFFSET(8)   NUMBITS(8),
        MemManage       OFFSET(0)   NUMBITS(8)
    ],

    HardFaultStatus [
        DEBUGEVT        OFFSET(31)  NUMBITS(1),
        FORCED          OFFSET(30)  NUMBITS(1),
        VECTTBL         OFFSET(1)   NUMBITS(1)
    ],

    SecureFaultStatus [
        /// A lazy floating-point state preservation error occurred.
        LSERR           OFFSET(7)   NUMBITS(1),
        /// SFAR holds a valid fault address.
        SFARVALID       OFFSET(6)   NUMBITS(1),
        /// Lazy state preservation error during exception entry.
        LSPERR          OFFSET(5)   NUMBITS(1),
        /// Invalid transition from the Non-secure to the Secure state.
        INVTRAN         OFFSET(4)   NUMBITS(1),
        /// Attribution unit violation.
        AUVIOL          OFFSET(3)   NUMBITS(1),
        /// Invalid exception return state.
        INVER           OFFSET(2)   NUMBITS(1),
        /// Invalid integrity signature found on exception return.
        INVIS           OFFSET(1)   NUMBITS(1),
        /// Invalid Secure state entry point.
        INVEP           OFFSET(0)   NUMBITS(1)
    ]
];

const SCB: StaticRef<ScbRegisters> = unsafe { StaticRef::new(0xE000ED00 as *const ScbRegisters) };

/// Software reset using the ARM System Control Block.
pub unsafe fn reset() {
    SCB.aircr.modify(
        ApplicationInterruptAndReset::VECTKEY.val(0x05FA)
            + ApplicationInterruptAndReset::SYSRESETREQ::SET,
    );
}

/// Permit SYSRESETREQ writes from the Non-secure world.
///
/// By default only Secure code can request a system reset on a core with the
/// security extension. The write must carry the VECTKEY or it is ignored.
pub unsafe fn allow_nonsecure_reset() {
    SCB.aircr.modify(
        ApplicationInterruptAndReset::VECTKEY.val(0x05FA)
            + ApplicationInterruptAndReset::SYSRESETREQS::CLEAR,
    );
}

/// Enable the UsageFault, BusFault, and SecureFault system handlers so these
/// faults are taken at their own vectors rather than escalating to HardFault.
pub unsafe fn enable_fault_handlers() {
    SCB.shcsr.modify(
        SystemHandlerControlAndState::SECUREFAULTENA::SET
            + SystemHandlerControlAndState::USGFAULTENA::SET
            + SystemHandlerControlAndState::BUSFAULTENA::SET,
    );
}

/// Configurable Fault Status Register, as last written by the hardware.
pub fn configurable_fault_status() -> u32 {
    SCB.cfsr.get()
}

/// HardFault Status Register.
pub fn hard_fault_status() -> u32 {
    SCB.hfsr.get()
}

/// Secure Fault Status Register.
pub fn secure_fault_status() -> u32 {
    SCB.sfsr.get()
}

/// MemManage fault address. Only meaningful while CFSR.MMARVALID is set.
pub fn mem_fault_address() -> u32 {
    SCB.mmfar.get()
}

/// BusFault address. Only meaningful while CFSR.BFARVALID is set.
pub fn bus_fault_address() -> u32 {
    SCB.bfar.get()
}

/// SecureFault address. Only meaningful while SFSR.SFARVALID is set.
pub fn secure_fault_address() -> u32 {
    SCB.sfar.get()
}
