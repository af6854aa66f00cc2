//! A minimal controller: just enough ptrace to drive the harness through its
//! stops and exercise the register channel.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// Spawn the harness binary with a pre-exec `PTRACE_TRACEME` request, stdout
/// piped so the output record can be inspected.
///
/// The tracee stops with `SIGTRAP` on `execve()`, before any harness code has
/// run.
pub fn spawn_traced() -> io::Result<Child> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_decoy"));
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());

    unsafe {
        cmd.pre_exec(|| {
            ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32))
        });
    }

    cmd.spawn()
}

pub fn pid_of(child: &Child) -> Pid {
    Pid::from_raw(child.id() as i32)
}

/// Wait for the next stop of `pid`, requiring delivery of `expected`.
pub fn expect_stop(pid: Pid, expected: Signal) -> anyhow::Result<()> {
    match waitpid(pid, None)? {
        WaitStatus::Stopped(_, signal) if signal == expected => Ok(()),
        status => anyhow::bail!("expected stop with {:?}, got {:?}", expected, status),
    }
}

/// Resume `pid`, suppressing the pending signal.
pub fn resume(pid: Pid) -> anyhow::Result<()> {
    ptrace::cont(pid, None)?;

    Ok(())
}

#[cfg(target_arch = "x86_64")]
pub fn read_identity_register(pid: Pid) -> anyhow::Result<u64> {
    peek_user(pid, decoy::x86::identity_user_offset())
}

#[cfg(target_arch = "x86_64")]
pub fn write_observable_register(pid: Pid, value: u64) -> anyhow::Result<()> {
    poke_user(pid, decoy::x86::observable_user_offset(), value)
}

#[cfg(target_arch = "x86_64")]
fn peek_user(pid: Pid, off: u64) -> anyhow::Result<u64> {
    // `off` is not used as a pointer offset by the kernel, so it needs no
    // validation here.
    let data = unsafe { libc::ptrace(libc::PTRACE_PEEKUSER, pid.as_raw(), off, 0) };

    Ok(data as u64)
}

#[cfg(target_arch = "x86_64")]
fn poke_user(pid: Pid, off: u64, data: u64) -> anyhow::Result<()> {
    let res = unsafe { libc::ptrace(libc::PTRACE_POKEUSER, pid.as_raw(), off, data) };
    nix::errno::Errno::result(res)?;

    Ok(())
}

#[cfg(target_arch = "aarch64")]
pub fn read_identity_register(pid: Pid) -> anyhow::Result<u64> {
    Ok(registers(pid)?.regs[decoy::aarch64::IDENTITY_REG])
}

#[cfg(target_arch = "aarch64")]
pub fn write_observable_register(pid: Pid, value: u64) -> anyhow::Result<()> {
    let mut regs = registers(pid)?;
    regs.regs[decoy::aarch64::OBSERVABLE_REG] = value;
    set_registers(pid, regs)
}

#[cfg(target_arch = "aarch64")]
fn registers(pid: Pid) -> anyhow::Result<decoy::aarch64::user_pt_regs> {
    use decoy::aarch64::{user_pt_regs, NT_PRSTATUS, PTRACE_GETREGSET};

    let mut data = std::mem::MaybeUninit::<user_pt_regs>::uninit();
    let mut rv = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut libc::c_void,
        iov_len: std::mem::size_of::<user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(
            PTRACE_GETREGSET,
            pid.as_raw(),
            NT_PRSTATUS,
            &mut rv as *mut _ as *mut libc::c_void,
        )
    };
    nix::errno::Errno::result(res)?;

    Ok(unsafe { data.assume_init() })
}

#[cfg(target_arch = "aarch64")]
fn set_registers(pid: Pid, regs: decoy::aarch64::user_pt_regs) -> anyhow::Result<()> {
    use decoy::aarch64::{NT_PRSTATUS, PTRACE_SETREGSET};

    let mut rv = libc::iovec {
        iov_base: &regs as *const _ as *mut libc::c_void,
        iov_len: std::mem::size_of_val(&regs),
    };

    let res = unsafe {
        libc::ptrace(
            PTRACE_SETREGSET,
            pid.as_raw(),
            NT_PRSTATUS,
            &mut rv as *mut _ as *mut libc::c_void,
        )
    };
    nix::errno::Errno::result(res)?;

    Ok(())
}
