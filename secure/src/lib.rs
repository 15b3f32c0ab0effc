// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Secure-world half of the non-secure fault relay.
//!
//! When a fault traps into the Secure image but the excepting code was
//! Non-secure, resetting on the spot destroys the only accurate record of the
//! root cause. This crate decides, per captured fault, whether the context
//! may be handed back to a registered Non-secure handler for diagnostic
//! capture, and owns the terminal halt/reset paths that attempt that handoff
//! first.
//!
//! The safety boundary is one-directional: a fault that originated on a
//! Secure stack, an exception outside the small allow-list, or the absence of
//! a registered handler all force local handling. Relaying never retries and
//! never recurses; a fault inside the relayed handler re-traps with the
//! Secure-stack bit set and is declined.

#![no_std]

pub mod platform;
pub mod relay;
pub mod service;

/// Errors returned by the registration and init surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// An argument was invalid (null context or callback).
    Inval,
    /// The device or build has no TrustZone, so there is no second world to
    /// relay to.
    NoSupport,
}
