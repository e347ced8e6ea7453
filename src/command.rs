use nix::sys::signal::Signal;
use std::fmt;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// How a command or a pipeline finished.
///
/// Abnormal termination by a signal is kept distinct from a normal exit so the
/// prompt (or any other consumer) can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Exited normally with a code.
    Exited(ExitCode),
    /// Killed by a signal.
    Signaled(i32),
    /// Stopped by a signal and moved to the job table.
    Stopped(i32),
}

impl Status {
    pub const SUCCESS: Status = Status::Exited(0);

    /// Integer form following the usual shell convention: the exit code, or
    /// 128 plus the signal number.
    pub fn code(self) -> ExitCode {
        match self {
            Status::Exited(code) => code,
            Status::Signaled(sig) | Status::Stopped(sig) => 128 + sig,
        }
    }

    pub fn success(self) -> bool {
        self == Status::SUCCESS
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::SUCCESS
    }
}

fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|_| format!("signal {sig}"))
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Status::Exited(0) => write!(f, "Done"),
            Status::Exited(code) => write!(f, "Exit {code}"),
            Status::Signaled(sig) => write!(f, "Killed ({})", signal_name(sig)),
            Status::Stopped(sig) => write!(f, "Stopped ({})", signal_name(sig)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_shell_convention() {
        assert_eq!(Status::Exited(3).code(), 3);
        assert_eq!(Status::Signaled(9).code(), 137);
        assert_eq!(Status::Stopped(20).code(), 148);
        assert!(Status::default().success());
        assert!(!Status::Signaled(0).success());
    }

    #[test]
    fn display_names_signals() {
        assert_eq!(Status::Exited(0).to_string(), "Done");
        assert_eq!(Status::Exited(2).to_string(), "Exit 2");
        assert_eq!(
            Status::Signaled(Signal::SIGKILL as i32).to_string(),
            "Killed (SIGKILL)"
        );
    }
}
