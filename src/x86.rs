//! Register conventions of the synchronization contract on x86_64.
//!
//! The harness parks with its own pid staged in `r13`, leaving `r12` as the
//! slot a controller writes while the harness sits in its first stop. Both
//! are callee-saved and preserved by the kernel across syscalls, so they hold
//! their values for the whole stop.

use std::arch::asm;

use nix::unistd::Pid;

/// Offset of the identity register (`r13`) in the virtual `user` struct, for
/// `PTRACE_PEEKUSER`.
pub fn identity_user_offset() -> u64 {
    regs_offset() + memoffset::offset_of!(libc::user_regs_struct, r13) as u64
}

/// Offset of the observable slot (`r12`) in the virtual `user` struct, for
/// `PTRACE_PEEKUSER` and `PTRACE_POKEUSER`.
pub fn observable_user_offset() -> u64 {
    regs_offset() + memoffset::offset_of!(libc::user_regs_struct, r12) as u64
}

fn regs_offset() -> u64 {
    memoffset::offset_of!(libc::user, regs) as u64
}

/// Stage `identity` in `r13`, zero the slot, and park by sending `SIGTRAP` to
/// ourselves with a raw `kill` syscall. Returns the slot's value at the
/// instant of resume.
///
/// A single asm block spans the stop, so no compiler-generated instruction
/// can touch `r12` or `r13` between the signal and the sample taken on
/// resume.
///
/// If no tracer consumes the `SIGTRAP`, its default disposition kills the
/// process inside this call.
pub(crate) fn stage_and_trap(identity: Pid) -> u64 {
    let raw = identity.as_raw() as u64;
    let slot: u64;

    // kill(identity, SIGTRAP). The kernel clobbers only rax, rcx, and r11.
    unsafe {
        asm!(
            "xor r12d, r12d",
            "mov rdi, r13",
            "mov esi, 5",  // SIGTRAP
            "mov eax, 62", // SYS_kill
            "syscall",
            inout("r13") raw => _,
            out("r12") slot,
            out("rdi") _,
            out("rsi") _,
            out("rax") _,
            out("rcx") _,
            out("r11") _,
            options(nostack),
        );
    }

    slot
}
