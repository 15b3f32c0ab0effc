// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Scrubbed control transfer from the Secure world into Non-secure code.
//!
//! This is a plain branch, not an exception return: the Non-secure target is
//! entered with whatever the register file holds at the `bxns`. The scrub
//! contract is therefore expressed as data ([`HandoffImage`]) so it can be
//! checked independently of the branch itself, and [`ns_branch`] is the
//! minimal audited primitive that realizes it.

use crate::CAPABILITIES;

/// Sealing pattern written to the Secure stack before leaving it.
///
/// The architecture reserves 0xFEF5EDA5 as an illegal EXC_RETURN/integrity
/// signature value, so a later attempt to unstack through the seal faults
/// instead of resuming with attacker-chosen state.
pub const STACK_SEAL: u32 = 0xFEF5_EDA5;

/// The register file [`ns_branch`] guarantees at the instant of the branch.
///
/// `gp[0]` is r0, still holding the branch target (it is one of the two
/// transfer arguments); `gp[1..=12]` are r1-r12 and are always zero. `lr`
/// carries the translated EXC_RETURN for the Non-secure handler to emulate
/// exception entry with. When the build has a floating-point unit, d0-d15 and
/// FPSCR are zero and CONTROL.FPCA/SFPA are clear, so no lazy state
/// preservation can fire against Secure floating-point state after the
/// transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandoffImage {
    /// r0-r12 at the branch.
    pub gp: [u32; 13],
    /// Link register at the branch: the translated EXC_RETURN.
    pub lr: u32,
    /// d0-d15 and FPSCR are zeroed.
    pub fp_scrubbed: bool,
    /// CONTROL.FPCA and CONTROL.SFPA are cleared.
    pub fpca_cleared: bool,
}

impl HandoffImage {
    /// The register file produced for a transfer to `target` carrying
    /// `exc_return`.
    pub fn compute(target: u32, exc_return: u32) -> HandoffImage {
        let mut gp = [0; 13];
        // bxns requires bit 0 clear to mark the destination Non-secure.
        gp[0] = target & !1;
        HandoffImage {
            gp,
            lr: exc_return,
            fp_scrubbed: CAPABILITIES.has_fpu,
            fpca_cleared: CAPABILITIES.has_fpu,
        }
    }

    /// The address the branch lands on.
    pub fn branch_target(&self) -> u32 {
        self.gp[0]
    }
}

#[cfg(any(doc, all(target_arch = "arm", target_os = "none")))]
extern "C" {
    /// Transfer control to a Non-secure function, never to return.
    ///
    /// `target` is the Non-secure entry point, `exc_return` the translated
    /// return-state value. The register file at the branch is exactly
    /// `HandoffImage::compute(target, exc_return)`; the Secure stack is
    /// sealed with two [`STACK_SEAL`] words first.
    ///
    /// This path cannot fail. If the target itself faults, the fault re-traps
    /// into the Secure fault handler, where the captured EXC_RETURN now
    /// carries the Secure-stack bit and the discriminator forces local
    /// handling, so the relay cannot loop.
    pub fn ns_branch(target: u32, exc_return: u32) -> !;
}

#[cfg(all(any(doc, all(target_arch = "arm", target_os = "none")), feature = "fpu"))]
core::arch::global_asm!(
    "
    .section .ns_branch_arm_v8m, \"ax\"
    .global ns_branch
    .thumb_func
  ns_branch:
    // r0 = Non-secure entry point, r1 = translated EXC_RETURN.
    mov lr, r1
    bic r0, r0, #1                    // bxns interworking: bit 0 must be clear
    // Seal the Secure stack before leaving it by plain branch.
    movw r1, #0xEDA5
    movt r1, #0xFEF5
    push {{r1}}
    push {{r1}}
    // Scrub the floating-point bank and deactivate the FP context so the
    // Non-secure side can neither read Secure FP state nor trigger a lazy
    // save of it.
    mov r1, #0
    vmov d0, r1, r1
    vmov d1, r1, r1
    vmov d2, r1, r1
    vmov d3, r1, r1
    vmov d4, r1, r1
    vmov d5, r1, r1
    vmov d6, r1, r1
    vmov d7, r1, r1
    vmov d8, r1, r1
    vmov d9, r1, r1
    vmov d10, r1, r1
    vmov d11, r1, r1
    vmov d12, r1, r1
    vmov d13, r1, r1
    vmov d14, r1, r1
    vmov d15, r1, r1
    vmsr fpscr, r1
    mrs r2, control
    bic r2, r2, #0xC                  // clear CONTROL.FPCA and CONTROL.SFPA
    msr control, r2
    isb
    // Zero every general-purpose register not carrying a transfer argument.
    mov r2, #0
    mov r3, #0
    mov r4, #0
    mov r5, #0
    mov r6, #0
    mov r7, #0
    mov r8, #0
    mov r9, #0
    mov r10, #0
    mov r11, #0
    mov r12, #0
    bxns r0
    "
);

#[cfg(all(
    any(doc, all(target_arch = "arm", target_os = "none")),
    not(feature = "fpu")
))]
core::arch::global_asm!(
    "
    .section .ns_branch_arm_v8m, \"ax\"
    .global ns_branch
    .thumb_func
  ns_branch:
    // r0 = Non-secure entry point, r1 = translated EXC_RETURN.
    mov lr, r1
    bic r0, r0, #1                    // bxns interworking: bit 0 must be clear
    // Seal the Secure stack before leaving it by plain branch.
    movw r1, #0xEDA5
    movt r1, #0xFEF5
    push {{r1}}
    push {{r1}}
    // Zero every general-purpose register not carrying a transfer argument.
    mov r1, #0
    mov r2, #0
    mov r3, #0
    mov r4, #0
    mov r5, #0
    mov r6, #0
    mov r7, #0
    mov r8, #0
    mov r9, #0
    mov r10, #0
    mov r11, #0
    mov r12, #0
    bxns r0
    "
);

// Mock implementation for tests on the host.
#[cfg(not(any(doc, all(target_arch = "arm", target_os = "none"))))]
pub unsafe fn ns_branch(_target: u32, _exc_return: u32) -> ! {
    unimplemented!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transfer_arguments_survive() {
        let image = HandoffImage::compute(0x0004_1000, 0xFFFF_FFBC);
        // r0 and lr are the two transfer arguments; everything else must be
        // zero so no Secure register state crosses the boundary.
        assert_eq!(image.gp[0], 0x0004_1000);
        assert!(image.gp[1..].iter().all(|&r| r == 0));
        assert_eq!(image.lr, 0xFFFF_FFBC);
    }

    #[test]
    fn branch_target_interworking_bit_cleared() {
        let image = HandoffImage::compute(0x0004_1001, 0xFFFF_FFBC);
        assert_eq!(image.branch_target(), 0x0004_1000);
    }

    #[test]
    fn fp_scrub_follows_capabilities() {
        let image = HandoffImage::compute(0x0004_1000, 0xFFFF_FFBC);
        assert_eq!(image.fp_scrubbed, crate::CAPABILITIES.has_fpu);
        assert_eq!(image.fpca_cleared, crate::CAPABILITIES.has_fpu);
    }

    #[test]
    fn seal_pattern_is_reserved_exc_return() {
        // The seal must be a value that can never be a legal EXC_RETURN or
        // integrity signature.
        assert_eq!(STACK_SEAL, 0xFEF5_EDA5);
    }
}
