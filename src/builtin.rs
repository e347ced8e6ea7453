use crate::command::Status;
use crate::env::{Environment, is_valid_name};
use crate::error::RuntimeError;
use crate::expand::split_assignment;
use crate::job::JobController;
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// Shell state a builtin may read or change.
pub struct BuiltinContext<'a> {
    pub env: &'a mut Environment,
    pub jobs: &'a mut JobController,
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Executes the command, writing its output to `stdout`.
    ///
    /// Return value should follow shell conventions: exit code 0 for success,
    /// non-zero for error.
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError>;
}

/// Parses `argv` (argument 0 is the command name) into `T` and runs it.
///
/// `--help` and usage errors are handled here: the text argh produced is
/// printed and the status is 0 or 1 respectively.
fn invoke<T: BuiltinCommand>(
    argv: &[String],
    stdout: &mut dyn Write,
    ctx: &mut BuiltinContext<'_>,
) -> Result<Status, RuntimeError> {
    let (name, args) = match argv.split_first() {
        Some((name, args)) => (name.as_str(), args),
        None => return Ok(Status::SUCCESS),
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match T::from_args(&[name], &args) {
        Ok(cmd) => cmd.execute(stdout, ctx),
        Err(EarlyExit { output, status }) => {
            writeln!(stdout, "{}", output.trim_end())?;
            Ok(Status::Exited(if status.is_err() { 1 } else { 0 }))
        }
    }
}

/// The fixed set of builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cd,
    Ls,
    Pwd,
    Echo,
    Exit,
    Export,
    Jobs,
    Fg,
    Bg,
}

impl Builtin {
    pub const ALL: [Builtin; 9] = [
        Builtin::Cd,
        Builtin::Ls,
        Builtin::Pwd,
        Builtin::Echo,
        Builtin::Exit,
        Builtin::Export,
        Builtin::Jobs,
        Builtin::Fg,
        Builtin::Bg,
    ];

    /// Canonical name of the command, e.g. "echo" or "cd".
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Cd => "cd",
            Builtin::Ls => "ls",
            Builtin::Pwd => "pwd",
            Builtin::Echo => "echo",
            Builtin::Exit => "exit",
            Builtin::Export => "export",
            Builtin::Jobs => "jobs",
            Builtin::Fg => "fg",
            Builtin::Bg => "bg",
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Runs the builtin with the stage's argument vector.
    pub fn run(
        self,
        argv: &[String],
        stdout: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<Status, RuntimeError> {
        log::debug!("builtin {:?}", argv);
        match self {
            Builtin::Cd => invoke::<Cd>(argv, stdout, ctx),
            Builtin::Ls => invoke::<Ls>(argv, stdout, ctx),
            Builtin::Pwd => invoke::<Pwd>(argv, stdout, ctx),
            Builtin::Echo => invoke::<Echo>(argv, stdout, ctx),
            Builtin::Exit => invoke::<Exit>(argv, stdout, ctx),
            Builtin::Export => invoke::<Export>(argv, stdout, ctx),
            Builtin::Jobs => invoke::<Jobs>(argv, stdout, ctx),
            Builtin::Fg => invoke::<Fg>(argv, stdout, ctx),
            Builtin::Bg => invoke::<Bg>(argv, stdout, ctx),
        }
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        // A deleted working directory still has a name: the last one `cd` saw.
        let dir = match env::current_dir() {
            Ok(dir) => dir.display().to_string(),
            Err(e) => {
                log::debug!("current directory unavailable: {}", e);
                ctx.env.get_var("PWD").unwrap_or_else(|| ".".to_owned())
            }
        };
        writeln!(stdout, "{dir}")?;
        Ok(Status::SUCCESS)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        let target = match self.target.filter(|t| !t.is_empty()) {
            Some(t) => PathBuf::from(t),
            None => match ctx.env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => {
                    return Err(RuntimeError::ChangeDirFailed {
                        path: PathBuf::from("~"),
                        source: io::Error::new(io::ErrorKind::NotFound, "HOME not set"),
                    });
                }
            },
        };

        env::set_current_dir(&target)
            .map_err(|source| RuntimeError::ChangeDirFailed { path: target, source })?;
        if let Ok(dir) = env::current_dir() {
            ctx.env.set_var("PWD", dir.display().to_string());
        }
        Ok(Status::SUCCESS)
    }
}

#[derive(FromArgs)]
/// List the entries of a directory, one per line, sorted by name.
pub struct Ls {
    #[argh(positional, default = "String::from(\".\")")]
    /// directory to list. Defaults to the current directory.
    pub dir: String,
}

impl BuiltinCommand for Ls {
    fn execute(self, stdout: &mut dyn Write, _ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        let path = PathBuf::from(&self.dir);
        let unreadable = |source| RuntimeError::DirectoryUnreadable {
            path: path.clone(),
            source,
        };

        let mut names = fs::read_dir(&path)
            .map_err(unreadable)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(unreadable)?;
        names.sort();

        for name in names {
            writeln!(stdout, "{name}")?;
        }
        Ok(Status::SUCCESS)
    }
}

/// Exit shell process
#[derive(FromArgs)]
pub struct Exit {
    #[argh(positional, default = "0")]
    /// exit code of the shell. Defaults to 0.
    pub code: i32,
}

impl BuiltinCommand for Exit {
    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        ctx.env.exit_code = Some(self.code);
        Ok(Status::Exited(self.code))
    }
}

/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
///
/// Arguments are free text, so only a leading `-n` is interpreted.
pub struct Echo {
    /// do not output the trailing newline.
    pub no_newline: bool,
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let (no_newline, args) = match args.split_first() {
            Some((&"-n", rest)) => (true, rest),
            _ => (false, args),
        };
        Ok(Echo {
            no_newline,
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl BuiltinCommand for Echo {
    fn execute(self, stdout: &mut dyn Write, _ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(Status::SUCCESS)
    }
}

#[derive(FromArgs)]
/// Mark variables as exported to child processes, assigning them first when
/// given as NAME=VALUE. Without arguments, list the exported variables.
pub struct Export {
    #[argh(positional, greedy)]
    /// NAME or NAME=VALUE.
    pub names: Vec<String>,
}

impl BuiltinCommand for Export {
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        if self.names.is_empty() {
            for (name, value) in ctx.env.exported_vars() {
                writeln!(stdout, "export {name}={value}")?;
            }
            return Ok(Status::SUCCESS);
        }

        let mut status = Status::SUCCESS;
        for word in &self.names {
            match split_assignment(word) {
                Some((name, value)) => {
                    ctx.env.set_var(name, value);
                    ctx.env.export(name);
                }
                None if is_valid_name(word) => ctx.env.export(word),
                None => {
                    writeln!(stdout, "export: `{word}': not a valid name")?;
                    status = Status::Exited(1);
                }
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// List background and stopped jobs.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        for job in ctx.jobs.jobs() {
            writeln!(stdout, "[{}] {}  {}", job.id, job.state(), job.command)?;
        }
        Ok(Status::SUCCESS)
    }
}

/// Parses a job reference: `N` or `%N`.
fn parse_job_id(job: Option<&str>) -> Result<Option<usize>, RuntimeError> {
    job.map(|s| {
        s.strip_prefix('%')
            .unwrap_or(s)
            .parse()
            .map_err(|_| RuntimeError::NoSuchJob(s.to_owned()))
    })
    .transpose()
}

#[derive(FromArgs)]
/// Continue a job in the foreground. Defaults to the most recent job.
pub struct Fg {
    #[argh(positional)]
    /// job number, optionally prefixed with %.
    pub job: Option<String>,
}

impl BuiltinCommand for Fg {
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        let id = parse_job_id(self.job.as_deref())?;
        let job = ctx.jobs.get(id).ok_or_else(|| {
            RuntimeError::NoSuchJob(self.job.clone().unwrap_or_else(|| "current".to_owned()))
        })?;
        let job_id = job.id;
        writeln!(stdout, "{}", job.command)?;
        stdout.flush()?;

        let (command, status) = ctx.jobs.foreground(Some(job_id))?;
        if let Status::Stopped(_) = status {
            writeln!(stdout, "\n[{job_id}]+ {status}  {command}")?;
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Continue a stopped job in the background. Defaults to the most recent job.
pub struct Bg {
    #[argh(positional)]
    /// job number, optionally prefixed with %.
    pub job: Option<String>,
}

impl BuiltinCommand for Bg {
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<Status, RuntimeError> {
        let id = parse_job_id(self.job.as_deref())?;
        let id = ctx.jobs.background(id)?;
        if let Some(job) = ctx.jobs.jobs().find(|j| j.id == id) {
            writeln!(stdout, "[{}] {} &", job.id, job.command)?;
        }
        Ok(Status::SUCCESS)
    }
}
