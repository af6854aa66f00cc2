//! Register conventions of the synchronization contract on aarch64.
//!
//! The harness parks with its own pid staged in `x13`, leaving `x12` as the
//! controller's write channel. aarch64 has no `PTRACE_PEEKUSER`; controllers
//! read and write the GPR set with `PTRACE_GETREGSET`/`PTRACE_SETREGSET` and
//! `NT_PRSTATUS`, indexing into [`user_pt_regs::regs`].

use std::arch::asm;

use nix::unistd::Pid;

pub const PTRACE_GETREGSET: u32 = 0x4204;
pub const PTRACE_SETREGSET: u32 = 0x4205;

/// Linux constant defined in `include/uapi/linux/elf.h`.
pub const NT_PRSTATUS: i32 = 0x1;

/// Index of the observable slot (`x12`) in [`user_pt_regs::regs`].
pub const OBSERVABLE_REG: usize = 12;

/// Index of the identity register (`x13`) in [`user_pt_regs::regs`].
pub const IDENTITY_REG: usize = 13;

/// Defined in `arch/arm64/include/uapi/asm/ptrace.h`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[allow(non_camel_case_types)]
pub struct user_pt_regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

/// Stage `identity` in `x13`, zero the slot, and park by sending `SIGTRAP` to
/// ourselves with a raw `kill` syscall. Returns the slot's value at the
/// instant of resume.
///
/// A single asm block spans the stop, so no compiler-generated instruction
/// can touch `x12` or `x13` between the signal and the sample taken on
/// resume.
///
/// If no tracer consumes the `SIGTRAP`, its default disposition kills the
/// process inside this call.
pub(crate) fn stage_and_trap(identity: Pid) -> u64 {
    let raw = identity.as_raw() as u64;
    let slot: u64;

    // kill(identity, SIGTRAP). The kernel clobbers only x0.
    unsafe {
        asm!(
            "mov x12, xzr",
            "mov x0, x13",
            "mov x1, #5",   // SIGTRAP
            "mov x8, #129", // __NR_kill
            "svc #0",
            inout("x13") raw => _,
            out("x12") slot,
            out("x0") _,
            out("x1") _,
            out("x8") _,
            options(nostack),
        );
    }

    slot
}
