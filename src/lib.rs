//! `decoy` is a cooperative tracee for testing ptrace-based debuggers.
//!
//! The harness stages its own pid in a conventional register, parks itself
//! twice by raising `SIGTRAP`, and between the two stops prints the value of
//! a second conventional register in hex. A controller that writes that
//! register while the harness sits in its first stop can verify the write
//! took effect by reading the harness's stdout.
//!
//! The two-stop lifecycle is modeled explicitly in [`harness`], with the
//! external-resume seam behind [`harness::StopPoint`] so the contract is
//! testable without a live tracer. Per-architecture register conventions
//! live in [`x86`] and [`aarch64`].

pub mod error;
pub mod harness;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "x86_64")]
pub mod x86;

pub use error::Error;
pub use harness::{
    self_identity, Harness, Outcome, OutputRecord, Phase, Pid, SignalStop, StopOutcome, StopPoint,
    TraceeState,
};
