// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! System Protection Unit (SPU) for the nRF53, scoped to violation events.
//!
//! The SPU raises one of three events when a bus access violates the
//! configured security map: RAM access error, flash access error, or
//! peripheral access error. The fault relay latches these into a bitmask that
//! travels with the relayed context; region and peripheral permission
//! configuration is owned by the board's TrustZone setup and is not part of
//! this driver.

use cortexm33::StaticRef;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

const SPU_BASE: StaticRef<SpuRegisters> =
    unsafe { StaticRef::new(0x50003000 as *const SpuRegisters) };

register_structs! {
    SpuRegisters {
        (0x000 => _reserved0),
        /// A security violation has been detected for the RAM memory space.
        (0x100 => events_ramaccerr: ReadWrite<u32, Event::Register>),
        /// A security violation has been detected for the flash memory space.
        (0x104 => events_flashaccerr: ReadWrite<u32, Event::Register>),
        /// A security violation has been detected on one or several peripherals.
        (0x108 => events_periphaccerr: ReadWrite<u32, Event::Register>),
        (0x10C => _reserved1),
        /// Enable interrupt.
        (0x304 => intenset: ReadWrite<u32, Interrupt::Register>),
        /// Disable interrupt.
        (0x308 => intenclr: ReadWrite<u32, Interrupt::Register>),
        (0x30C => _reserved2),
        /// Show implemented features for the current device.
        (0x400 => cap: ReadOnly<u32, Cap::Register>),
        (0x404 => @END),
    }
}

register_bitfields! [u32,
    Event [
        GENERATED OFFSET(0) NUMBITS(1)
    ],

    Interrupt [
        RAMACCERR 0,
        FLASHACCERR 1,
        PERIPHACCERR 2
    ],

    Cap [
        /// Show Arm TrustZone status.
        TZM OFFSET(0) NUMBITS(1) [
            /// Arm TrustZone support not available.
            NotAvailable = 0,
            /// Arm TrustZone support is available.
            Enabled = 1
        ]
    ]
];

/// Violation-event bits as carried in a relayed fault context.
///
/// This bit assignment is the wire format of `RelayContext::spu_events`; it
/// matches the SPU's own event ordering, not any architectural register.
pub const EVENT_RAMACCERR: u32 = 1 << 0;
pub const EVENT_FLASHACCERR: u32 = 1 << 1;
pub const EVENT_PERIPHACCERR: u32 = 1 << 2;

pub struct Spu {
    registers: StaticRef<SpuRegisters>,
}

impl Spu {
    pub const fn new() -> Spu {
        Spu {
            registers: SPU_BASE,
        }
    }

    /// Whether this device implements Arm TrustZone.
    pub fn is_trustzone_capable(&self) -> bool {
        self.registers.cap.matches_all(Cap::TZM::Enabled)
    }

    /// Enable the interrupt for all three violation events so a violation
    /// traps while its event register still holds the cause.
    pub fn enable_event_interrupts(&self) {
        self.registers.intenset.write(
            Interrupt::RAMACCERR::SET + Interrupt::FLASHACCERR::SET + Interrupt::PERIPHACCERR::SET,
        );
    }

    /// Disable the violation-event interrupts.
    pub fn disable_event_interrupts(&self) {
        self.registers.intenclr.write(
            Interrupt::RAMACCERR::SET + Interrupt::FLASHACCERR::SET + Interrupt::PERIPHACCERR::SET,
        );
    }

    /// Snapshot the pending violation events as a bitmask.
    ///
    /// Best effort: the events are level registers that other handlers may
    /// clear, so an absent bit means "not observed", never "did not occur".
    pub fn latch_events(&self) -> u32 {
        let mut events = 0;
        if self.registers.events_ramaccerr.is_set(Event::GENERATED) {
            events |= EVENT_RAMACCERR;
        }
        if self.registers.events_flashaccerr.is_set(Event::GENERATED) {
            events |= EVENT_FLASHACCERR;
        }
        if self.registers.events_periphaccerr.is_set(Event::GENERATED) {
            events |= EVENT_PERIPHACCERR;
        }
        events
    }
}
