//! The two-stop tracee lifecycle, and the synchronization contract it offers
//! a controller.
//!
//! A controller that wants to prove its register-write path works needs a
//! target that (1) can be signaled at a known pause, (2) is guaranteed not to
//! touch the written register itself, and (3) turns the register's value into
//! something externally observable. The [`Harness`] provides exactly that:
//!
//! ```text
//! Started -> AwaitingFirstResume -> Emitting -> AwaitingSecondResume -> Terminated
//! ```
//!
//! Both `Awaiting*` phases are exited only by an external resume. With no
//! tracer attached, the stop signal's default disposition kills the process
//! instead, which is the `AwaitingFirstResume -> Terminated` edge.

use std::fmt;
use std::io::Write;

use nix::sys::signal::{self, Signal};
use tracing::debug;

use crate::error::{Error, Result};

#[cfg(target_arch = "aarch64")]
use crate::aarch64 as arch;

#[cfg(target_arch = "x86_64")]
use crate::x86 as arch;

pub use nix::unistd::Pid;

/// Own pid, via a direct `getpid` syscall.
///
/// Bypasses any library-level caching, so the value is fresh even if the
/// process was forked or re-exec'd into this image.
pub fn self_identity() -> Pid {
    let raw = unsafe { libc::syscall(libc::SYS_getpid) };
    Pid::from_raw(raw as libc::pid_t)
}

/// Lifecycle phase of the harness.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Started,
    AwaitingFirstResume,
    Emitting,
    AwaitingSecondResume,
    Terminated,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;

        matches!(
            (self, next),
            (Started, AwaitingFirstResume)
                | (AwaitingFirstResume, Emitting)
                | (AwaitingFirstResume, Terminated)
                | (Emitting, AwaitingSecondResume)
                | (AwaitingSecondResume, Terminated)
        )
    }
}

/// Explicit harness state threaded between phases.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TraceeState {
    identity: Pid,
    slot: Option<u64>,
}

impl TraceeState {
    fn new(identity: Pid) -> Self {
        Self { identity, slot: None }
    }

    /// Own pid, fixed at startup and never mutated.
    pub fn identity(&self) -> Pid {
        self.identity
    }

    /// Last sampled value of the observable register slot, or `None` if the
    /// first stop has not been resumed yet.
    pub fn slot(&self) -> Option<u64> {
        self.slot
    }
}

/// The single line the harness emits: the observable slot's value at the
/// instant of emission, rendered in hex.
///
/// This is the oracle a controller's test suite reads to decide whether a
/// register write landed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputRecord {
    value: u64,
}

impl OutputRecord {
    pub fn new(value: u64) -> Self {
        Self { value }
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.value)
    }
}

/// How a stop point ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopOutcome<T> {
    /// Something external resumed the harness.
    Resumed(T),

    /// Nothing consumed the stop signal, and its default disposition applied.
    ///
    /// Only scripted stop points return this. When a real `SIGTRAP` finds no
    /// tracer, the kernel kills the process inside the stop and the call
    /// never returns.
    DefaultDisposition,
}

/// A point where the harness parks until something external resumes it.
///
/// The real implementation ([`SignalStop`]) raises `SIGTRAP` against the
/// harness's own pid. Test doubles script the controller's half of the
/// exchange instead, so the state machine is testable without OS tracing.
pub trait StopPoint {
    /// Park with `identity` staged in the identity register. Returns the
    /// observable slot's value at the instant of resume.
    fn park_with_identity(&mut self, identity: Pid) -> Result<StopOutcome<u64>>;

    /// Park again, after the output record has been emitted.
    fn park(&mut self) -> Result<StopOutcome<()>>;
}

/// Stop points realized by raising `SIGTRAP` against our own pid.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalStop;

impl StopPoint for SignalStop {
    fn park_with_identity(&mut self, identity: Pid) -> Result<StopOutcome<u64>> {
        let slot = arch::stage_and_trap(identity);

        Ok(StopOutcome::Resumed(slot))
    }

    fn park(&mut self) -> Result<StopOutcome<()>> {
        // No register constraints apply here: the record is already flushed.
        signal::raise(Signal::SIGTRAP).map_err(|source| Error::SelfStop { source })?;

        Ok(StopOutcome::Resumed(()))
    }
}

/// Terminal result of a harness run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Both stops were resumed and the record was emitted.
    Completed { record: OutputRecord },

    /// The first stop was never resumed; nothing was emitted.
    KilledAtFirstStop,

    /// The record was emitted, but the second stop was never resumed.
    KilledAtSecondStop { record: OutputRecord },
}

/// Drives a [`TraceeState`] through the two-stop lifecycle, emitting the
/// output record to `sink` between the stops.
pub struct Harness<S, W> {
    state: TraceeState,
    phase: Phase,
    stops: S,
    sink: W,
}

impl<S, W> Harness<S, W>
where
    S: StopPoint,
    W: Write,
{
    pub fn new(identity: Pid, stops: S, sink: W) -> Self {
        Self {
            state: TraceeState::new(identity),
            phase: Phase::Started,
            stops,
            sink,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TraceeState {
        &self.state
    }

    fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(Error::Phase { from: self.phase, to: next });
        }

        debug!(from = ?self.phase, to = ?next, "advancing harness phase");
        self.phase = next;

        Ok(())
    }

    /// Run the harness to termination.
    ///
    /// Blocks inside each stop until resumed by a controller. The slot value
    /// sampled on the first resume is emitted as one line, `0x<hex>`, and
    /// explicitly flushed before the second stop, so it is readable while the
    /// harness is still parked.
    pub fn run(&mut self) -> Result<Outcome> {
        debug!(identity = self.state.identity.as_raw(), "harness started");

        self.advance(Phase::AwaitingFirstResume)?;
        let slot = match self.stops.park_with_identity(self.state.identity)? {
            StopOutcome::Resumed(slot) => slot,
            StopOutcome::DefaultDisposition => {
                self.advance(Phase::Terminated)?;
                return Ok(Outcome::KilledAtFirstStop);
            },
        };

        self.state.slot = Some(slot);
        self.advance(Phase::Emitting)?;

        let record = OutputRecord::new(slot);
        writeln!(self.sink, "{}", record)?;
        self.sink.flush()?;

        self.advance(Phase::AwaitingSecondResume)?;
        let outcome = match self.stops.park()? {
            StopOutcome::Resumed(()) => Outcome::Completed { record },
            StopOutcome::DefaultDisposition => Outcome::KilledAtSecondStop { record },
        };
        self.advance(Phase::Terminated)?;

        Ok(outcome)
    }
}
