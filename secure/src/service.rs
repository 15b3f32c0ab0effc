// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Non-secure handler registration.
//!
//! The Non-secure world hands the Secure world two things at initialization:
//! a pointer to its statically allocated [`RelayContext`] and the callback to
//! branch to when a fault is relayed. Both live in a single-slot table.
//! Registration happens once, before any fault can occur; a second
//! registration silently replaces the first (last-writer-wins). The slot is
//! only ever read from fault context, which is strictly single-threaded, so
//! the table needs no locking.

use cortexm33::fault::RelayContext;
use cortexm33::CAPABILITIES;
use nrf53::spu::Spu;

use crate::ErrorCode;

/// The Non-secure function the relay branches to. Entered by a scrubbed
/// `bxns`, with the translated EXC_RETURN in the link register.
pub type NsFaultCallback = unsafe extern "C" fn();

/// One registered Non-secure fault handler.
#[derive(Clone, Copy, Debug)]
pub struct Registration {
    pub context: *mut RelayContext,
    pub callback: NsFaultCallback,
}

/// Single-slot registration table. Starts empty; [`RegistrationTable::set`]
/// is the only writer.
pub struct RegistrationTable {
    slot: Option<Registration>,
}

impl RegistrationTable {
    pub const fn new() -> RegistrationTable {
        RegistrationTable { slot: None }
    }

    /// Register a context buffer and callback, replacing any previous
    /// registration.
    pub fn set(
        &mut self,
        context: *mut RelayContext,
        callback: NsFaultCallback,
    ) -> Result<(), ErrorCode> {
        if !CAPABILITIES.has_trustzone {
            return Err(ErrorCode::NoSupport);
        }
        if context.is_null() {
            return Err(ErrorCode::Inval);
        }

        #[cfg(feature = "defmt")]
        if self.slot.is_some() {
            defmt::warn!("ns fault handler re-registered, replacing previous");
        }

        self.slot = Some(Registration { context, callback });
        Ok(())
    }

    pub fn get(&self) -> Option<Registration> {
        self.slot
    }

    pub fn is_registered(&self) -> bool {
        self.slot.is_some()
    }
}

/// The process-wide table. Written once at Non-secure initialization, read
/// from fault context only.
static mut REGISTRATION: RegistrationTable = RegistrationTable::new();

/// Register the Non-secure fault handler.
///
/// The documented entry point for Non-secure initialization code. Must be
/// called before any relay-eligible fault can occur; nothing unregisters a
/// handler.
///
/// ## Safety
///
/// `context` must point to a `RelayContext` that lives (and stays writable
/// by the Secure world) until reset. Must not be called concurrently with
/// fault handling.
pub unsafe fn set_handler(
    context: *mut RelayContext,
    callback: NsFaultCallback,
) -> Result<(), ErrorCode> {
    (*core::ptr::addr_of_mut!(REGISTRATION)).set(context, callback)
}

/// The current registration, if any.
pub fn registration() -> Option<Registration> {
    unsafe { (*core::ptr::addr_of!(REGISTRATION)).get() }
}

/// Latch the SPU violation events into the registered context.
///
/// Called from the SPU violation handler before the fault escalates, because
/// the event registers are transient and may be cleared before the relay
/// runs. No-op when nothing is registered.
///
/// ## Safety
///
/// Must only be called from fault/interrupt context, where nothing else can
/// be touching the registered context.
pub unsafe fn save_spu_events() {
    if let Some(registration) = registration() {
        let spu = Spu::new();
        (*registration.context).spu_events = spu.latch_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn test_callback() {}

    #[test]
    fn table_starts_empty() {
        let table = RegistrationTable::new();
        assert!(table.get().is_none());
        assert!(!table.is_registered());
    }

    #[test]
    fn null_context_rejected() {
        let mut table = RegistrationTable::new();
        let result = table.set(core::ptr::null_mut(), test_callback);
        assert_eq!(result, Err(ErrorCode::Inval));
        assert!(!table.is_registered());
    }

    #[test]
    fn registration_stores_context_and_callback() {
        let mut context = RelayContext::empty();
        let mut table = RegistrationTable::new();
        assert_eq!(table.set(&mut context, test_callback), Ok(()));
        let registration = table.get().unwrap();
        assert_eq!(registration.context, &mut context as *mut RelayContext);
    }

    #[test]
    fn second_registration_wins() {
        let mut first = RelayContext::empty();
        let mut second = RelayContext::empty();
        let mut table = RegistrationTable::new();
        table.set(&mut first, test_callback).unwrap();
        table.set(&mut second, test_callback).unwrap();
        assert_eq!(
            table.get().unwrap().context,
            &mut second as *mut RelayContext
        );
    }
}
