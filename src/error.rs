//! Error taxonomy of the shell.
//!
//! [`ParseError`]s are always recovered by the prompt loop: the line is
//! discarded and the loop continues. [`RuntimeError`]s carry the underlying OS
//! error so the user sees its text.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while turning a raw line into a pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A token contained `"`, `'` or a backtick.
    #[error("double quotes, single quotes and backticks not allowed")]
    DisallowedQuoting,
    /// Splitting on `|` produced a stage with no arguments.
    #[error("syntax error: empty pipeline stage")]
    EmptyStage,
    /// A redirection operator was last or was followed by another operator.
    #[error("syntax error: missing file name after `{0}`")]
    MissingRedirectTarget(String),
    /// Input redirection on a non-first stage, or output on a non-last stage.
    #[error("syntax error: `{0}` is not allowed in this pipeline position")]
    MisplacedRedirect(String),
}

/// Errors raised while executing a parsed line.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cd: {}: {source}", path.display())]
    ChangeDirFailed { path: PathBuf, source: io::Error },

    #[error("ls: {}: {source}", path.display())]
    DirectoryUnreadable { path: PathBuf, source: io::Error },

    #[error("{program}: {source}")]
    ExecFailed { program: String, source: io::Error },

    #[error("{}: {source}", path.display())]
    RedirectOpenFailed { path: PathBuf, source: io::Error },

    #[error("cannot create pipe: {0}")]
    PipeFailed(#[source] nix::Error),

    #[error("{0}: no such job")]
    NoSuchJob(String),

    #[error("job control: {0}")]
    JobControl(#[from] nix::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RuntimeError {
    /// Status a stage reports when it could not be started because of `self`.
    ///
    /// 127 for a missing program, 126 for one that exists but cannot be run,
    /// 1 for everything else.
    pub fn stage_code(&self) -> i32 {
        match self {
            RuntimeError::ExecFailed { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                127
            }
            RuntimeError::ExecFailed { .. } => 126,
            _ => 1,
        }
    }
}

/// Any error the interpreter can report for one line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
