//! Terminal ownership and signal dispositions for job control.
//!
//! The interactive shell puts itself in its own process group, ignores the
//! job-control and keyboard signals, and hands the terminal to the foreground
//! job's process group while it runs. Children get the default dispositions
//! back before they start their program.
//!
//! Changing signal dispositions requires unsafe per POSIX; it is limited to
//! installing `SIG_IGN`/`SIG_DFL`, never a custom handler.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{self, Pid};
use std::io::{self, IsTerminal};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};

/// Signals the shell ignores while interactive and restores in children.
const JOB_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

fn set_disposition(sig: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN and SIG_DFL are well-defined dispositions; no handler
    // code runs in signal context.
    unsafe { signal::sigaction(sig, &action) }?;
    Ok(())
}

/// Restores default dispositions for the job-control signals.
///
/// Meant to run in a freshly forked child right before `exec`: ignored
/// signals survive `exec`, so without this a job could not be interrupted or
/// stopped from the keyboard. SIGPIPE is included because the Rust runtime
/// ignores it in the shell itself. Only calls `sigaction`, which is
/// async-signal-safe.
pub fn reset_job_signals() -> io::Result<()> {
    for sig in JOB_SIGNALS.into_iter().chain([Signal::SIGPIPE]) {
        set_disposition(sig, SigHandler::SigDfl).map_err(io::Error::from)?;
    }
    Ok(())
}

/// True if standard input is a terminal we can do job control on.
pub fn stdin_is_terminal() -> bool {
    io::stdin().is_terminal()
}

/// Terminal state for interactive job control.
///
/// Created once at start-up when stdin is a terminal. Manages signal
/// disposition and the terminal's foreground process group.
#[derive(Debug)]
pub struct TerminalState {
    /// The shell's own process group ID.
    shell_pgid: Pid,
    /// Close-on-exec duplicate of the controlling terminal.
    tty: OwnedFd,
}

impl TerminalState {
    /// Initialize terminal state for interactive job control.
    ///
    /// - Puts the shell in its own process group
    /// - Ignores SIGINT, SIGQUIT, SIGTSTP, SIGTTIN and SIGTTOU
    /// - Takes the terminal foreground
    pub fn init() -> io::Result<Self> {
        let shell_pid = unistd::getpid();
        let tty = io::stdin().as_fd().try_clone_to_owned()?;

        // EPERM means we are a session leader, which already owns its group.
        match unistd::setpgid(shell_pid, shell_pid) {
            Ok(()) | Err(nix::errno::Errno::EPERM) => {}
            Err(e) => return Err(e.into()),
        }

        // SIGTTOU first so tcsetpgrp doesn't stop us.
        set_disposition(Signal::SIGTTOU, SigHandler::SigIgn)?;
        unistd::tcsetpgrp(&tty, shell_pid)?;

        for sig in JOB_SIGNALS {
            set_disposition(sig, SigHandler::SigIgn)?;
        }

        log::debug!("interactive job control enabled, shell pgid {}", shell_pid);
        Ok(Self {
            shell_pgid: shell_pid,
            tty,
        })
    }

    /// Raw terminal descriptor, valid in a forked child until `exec`.
    pub fn raw_fd(&self) -> RawFd {
        self.tty.as_raw_fd()
    }

    /// Give the terminal foreground to a process group.
    pub fn give_terminal_to(&self, pgid: Pid) -> nix::Result<()> {
        unistd::tcsetpgrp(&self.tty, pgid)
    }

    /// Reclaim the terminal foreground for the shell.
    pub fn reclaim_terminal(&self) -> nix::Result<()> {
        unistd::tcsetpgrp(&self.tty, self.shell_pgid)
    }
}
