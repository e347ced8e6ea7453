//! Program lookup and the process launcher.
//!
//! Every pipe end and redirected file is an [`OwnedFd`]/[`File`] that is moved
//! into exactly one child's [`Command`]. Dropping the `Command` after `spawn`
//! closes the parent's copy, and all descriptors are created close-on-exec,
//! so a child only ever holds the three standard streams it was given.

use crate::env::Environment;
use crate::error::RuntimeError;
use crate::parser::{Pipeline, Redirect, RedirectKind, Stage};
use crate::terminal;
use nix::fcntl::OFlag;
use nix::unistd::{self, Pid};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A unidirectional pipe whose ends are handed out at most once.
struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    fn new() -> Result<Self, RuntimeError> {
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(RuntimeError::PipeFailed)?;
        Ok(Self {
            read: Some(read),
            write: Some(write),
        })
    }
}

/// What happened when one stage was started.
#[derive(Debug)]
pub enum StageStart {
    /// The stage runs as this process.
    Running(Pid),
    /// The stage never got a process.
    Failed(RuntimeError),
}

/// Outcome of starting every stage of a pipeline.
#[derive(Debug)]
pub struct Launch {
    /// Process group of the job; `None` if no stage could be started.
    pub pgid: Option<Pid>,
    /// One entry per stage, in pipeline order.
    pub stages: Vec<StageStart>,
}

/// Starts every stage of `pipeline` in one new process group.
///
/// Stage *i* reads from pipe *i-1* and writes to pipe *i*; explicit
/// redirections replace that wiring. A stage that cannot be started is
/// recorded as [`StageStart::Failed`] and its pipe ends are closed at once,
/// so its neighbours see end-of-file or a broken pipe instead of blocking.
/// The remaining stages are still started.
///
/// `tty` is the terminal descriptor to hand to the job when it runs in the
/// foreground of an interactive shell.
///
/// Only pipe creation failure aborts the launch; no process exists yet at
/// that point and the pipes created so far are closed on return.
pub fn launch_pipeline(
    pipeline: &Pipeline,
    env: &Environment,
    tty: Option<RawFd>,
) -> Result<Launch, RuntimeError> {
    let count = pipeline.stages.len();
    let mut pipes = (1..count)
        .map(|_| Pipe::new())
        .collect::<Result<Vec<_>, _>>()?;

    let mut pgid: Option<Pid> = None;
    let mut stages = Vec::with_capacity(count);
    for (i, stage) in pipeline.stages.iter().enumerate() {
        let from_pipe = i
            .checked_sub(1)
            .and_then(|prev| pipes.get_mut(prev))
            .and_then(|p| p.read.take());
        let to_pipe = pipes.get_mut(i).and_then(|p| p.write.take());

        let start = match spawn_stage(stage, from_pipe, to_pipe, pipeline, env, pgid, tty) {
            Ok(pid) => {
                let group = *pgid.get_or_insert(pid);
                log::debug!("stage {} {:?} started as pid {} in group {}", i, stage.argv, pid, group);
                StageStart::Running(pid)
            }
            Err(e) => {
                log::debug!("stage {} {:?} failed to start: {}", i, stage.argv, e);
                StageStart::Failed(e)
            }
        };
        stages.push(start);
    }
    // Whatever the children did not take is closed here.
    drop(pipes);

    Ok(Launch { pgid, stages })
}

fn open_redirect(redirect: &Redirect) -> Result<File, RuntimeError> {
    let mut options = OpenOptions::new();
    match redirect.kind {
        RedirectKind::Input => options.read(true),
        RedirectKind::Output => options.write(true).create(true).truncate(true),
        RedirectKind::Append => options.append(true).create(true),
    };
    options
        .open(&redirect.target)
        .map_err(|source| RuntimeError::RedirectOpenFailed {
            path: redirect.target.clone(),
            source,
        })
}

fn stdio_for(redirect: Option<&Redirect>, pipe_end: Option<OwnedFd>) -> Result<Stdio, RuntimeError> {
    if let Some(redirect) = redirect {
        return Ok(open_redirect(redirect)?.into());
    }
    Ok(pipe_end.map_or_else(Stdio::inherit, Stdio::from))
}

/// Locates the program of `stage` and starts it in process group `pgid`
/// (or a new group led by itself when `pgid` is `None`).
fn spawn_stage(
    stage: &Stage,
    from_pipe: Option<OwnedFd>,
    to_pipe: Option<OwnedFd>,
    pipeline: &Pipeline,
    env: &Environment,
    pgid: Option<Pid>,
    tty: Option<RawFd>,
) -> Result<Pid, RuntimeError> {
    let stdin = stdio_for(stage.stdin.as_ref(), from_pipe)?;
    let stdout = stdio_for(stage.stdout.as_ref(), to_pipe)?;

    let Some((name, args)) = stage.argv.split_first() else {
        return Err(RuntimeError::ExecFailed {
            program: String::new(),
            source: io::ErrorKind::NotFound.into(),
        });
    };
    let search_paths = env.get_var("PATH").unwrap_or_else(|| DEFAULT_PATH.to_owned());
    let program = find_command_path(OsStr::new(&search_paths), Path::new(name)).ok_or_else(|| {
        RuntimeError::ExecFailed {
            program: name.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "command not found"),
        }
    })?;

    let mut cmd = Command::new(program.as_ref());
    cmd.arg0(name)
        .args(args)
        .envs(env.exported_vars())
        .envs(pipeline.assignments.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(stdin)
        .stdout(stdout)
        .process_group(pgid.map_or(0, Pid::as_raw));

    // SAFETY: the closure runs between fork and exec and only performs
    // async-signal-safe calls (getpgrp, tcsetpgrp, sigaction).
    unsafe {
        cmd.pre_exec(move || {
            if let Some(fd) = tty {
                // The parent does the same; whichever runs first wins.
                let _ = unistd::tcsetpgrp(BorrowedFd::borrow_raw(fd), unistd::getpgrp());
            }
            terminal::reset_job_signals()
        });
    }

    let child = cmd.spawn().map_err(|source| RuntimeError::ExecFailed {
        program: name.clone(),
        source,
    })?;
    // The child is reaped through its process group, not through `Child`.
    Ok(Pid::from_raw(child.id() as i32))
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - `./foo`: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first executable regular file with that name.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() || path.starts_with("./") {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|path| is_executable(path))
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

/// True for a regular file with at least one execute bit set.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}
