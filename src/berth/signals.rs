//! Interrupt handling while a protected command runs
//!
//! The parent must outlive its child so it can tear down. Interrupt-class
//! signals are therefore caught instead of killing the parent:
//!
//! - HUP, TERM, USR1, USR2 are usually aimed at one pid and are forwarded
//!   to the running child.
//! - INT and QUIT are held when stdin is a terminal, which already delivers
//!   them to the child's process group. Without a terminal they can only
//!   have been sent to the parent, so they are forwarded too.
//! - ABRT and ALRM are swallowed.
//!
//! Caught handlers revert to the default on exec, so the child sees normal
//! signal behaviour.

use crate::error::Result;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

/// Pid of the running child, 0 when none
static CHILD_PID: AtomicI32 = AtomicI32::new(0);

/// Signals relayed to the child
pub const FORWARDED: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

/// Signals a terminal sends to the whole foreground process group
pub const TERMINAL: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

/// Signals the parent survives without relaying
pub const SWALLOWED: [Signal; 2] = [Signal::SIGABRT, Signal::SIGALRM];

/// Forwarded and held signals for a run with or without a controlling tty
pub fn policy(interactive: bool) -> (Vec<Signal>, Vec<Signal>) {
    let mut forwarded = FORWARDED.to_vec();
    let mut held = SWALLOWED.to_vec();
    if interactive {
        held.extend(TERMINAL);
    } else {
        forwarded.extend(TERMINAL);
    }
    (forwarded, held)
}

extern "C" fn forward(signo: libc::c_int) {
    let pid = CHILD_PID.load(Ordering::SeqCst);
    if pid > 0 {
        // kill(2) is async-signal-safe
        unsafe {
            libc::kill(pid, signo);
        }
    }
}

extern "C" fn hold(_signo: libc::c_int) {}

/// Record the child that forwarded signals go to
pub fn track_child(pid: u32) {
    CHILD_PID.store(i32::try_from(pid).unwrap_or(0), Ordering::SeqCst);
}

/// Stop forwarding
pub fn untrack_child() {
    CHILD_PID.store(0, Ordering::SeqCst);
}

/// Relayable signals kept pending on this thread until dropped
///
/// Covers the gap between spawning the child and recording its pid; a
/// signal arriving there is delivered once the pid is known.
pub struct Deferred {
    set: SigSet,
}

/// Block every signal that may be forwarded
pub fn defer_forwarded() -> Result<Deferred> {
    let mut set = SigSet::empty();
    for signal in FORWARDED.iter().chain(TERMINAL.iter()) {
        set.add(*signal);
    }
    set.thread_block().map_err(io::Error::from)?;
    Ok(Deferred { set })
}

impl Drop for Deferred {
    fn drop(&mut self) {
        let _ = self.set.thread_unblock();
    }
}

/// Installed handlers; the previous dispositions come back on drop
pub struct SignalGuard {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalGuard {
    /// Install handlers, holding INT and QUIT only when stdin is a terminal
    pub fn install() -> Result<Self> {
        Self::install_with(io::stdin().is_terminal())
    }

    pub fn install_with(interactive: bool) -> Result<Self> {
        let (forwarded, held) = policy(interactive);
        let mut guard = Self {
            previous: Vec::with_capacity(forwarded.len() + held.len()),
        };

        let forwarding = SigAction::new(
            SigHandler::Handler(forward),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let holding = SigAction::new(
            SigHandler::Handler(hold),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for (signal, action) in forwarded
            .iter()
            .map(|s| (*s, &forwarding))
            .chain(held.iter().map(|s| (*s, &holding)))
        {
            // SAFETY: both handlers only touch an atomic and call kill(2)
            let previous = unsafe { sigaction(signal, action) }.map_err(io::Error::from)?;
            guard.previous.push((signal, previous));
        }

        debug!(interactive, "Interrupt signals held for the lifecycle");
        Ok(guard)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        untrack_child();
        for (signal, action) in self.previous.drain(..).rev() {
            // SAFETY: restoring a disposition previously returned by sigaction
            let _ = unsafe { sigaction(signal, &action) };
        }
    }
}
