//! A small interactive Unix shell with pipelines, redirection and job control.
//!
//! Each input line is split into words, leading `NAME=VALUE` assignments are
//! taken off, `$NAME` words are resolved and the rest is parsed into a
//! [`parser::Pipeline`]. A single unredirected stage naming a builtin runs
//! in-process; anything else becomes a job: one process per stage, all in one
//! process group, connected by pipes.
//!
//! The main entry point is [`Interpreter`]. Line input is abstracted by
//! [`readline::LineReader`], so the same loop serves a terminal (with
//! completion from [`completion`]) and plain streams.

mod builtin;
pub mod command;
pub mod completion;
pub mod env;
pub mod error;
mod expand;
mod external;
pub mod job;
mod interpreter;
mod lexer;
pub mod parser;
pub mod readline;
pub mod terminal;

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;

pub use builtin::{Builtin, BuiltinContext};
pub use command::{ExitCode, Status};
pub use error::{ParseError, RuntimeError, ShellError};

/// Serializes tests that change the process working directory.
#[cfg(test)]
pub(crate) fn lock_current_dir() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
