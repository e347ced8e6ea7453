use crate::builtin::{Builtin, BuiltinContext};
use crate::command::{ExitCode, Status};
use crate::env::Environment;
use crate::error::{ParseError, RuntimeError, ShellError};
use crate::expand::{Invocation, extract_assignments, resolve_variables};
use crate::job::JobController;
use crate::lexer;
use crate::parser::{Pipeline, parse_pipeline};
use crate::readline::LineReader;
use crate::terminal::TerminalState;
use std::io::{self, Write};

/// A minimal shell-like interpreter that runs builtins in-process and
/// everything else as jobs of external programs.
///
/// The interpreter owns the shell-local [`Environment`], the job table and the
/// status of the last line.
///
/// Example
/// ```
/// use jobsh::Interpreter;
/// let mut sh = Interpreter::default();
/// let mut out = Vec::new();
/// let status = sh
///     .execute_line_with_redefined_output("echo hello world", &mut out, &mut std::io::sink())
///     .unwrap();
/// assert!(status.success());
/// assert_eq!(out, b"hello world\n");
/// ```
pub struct Interpreter {
    env: Environment,
    jobs: JobController,
    last_status: Status,
}

impl Interpreter {
    /// Create a new interpreter.
    ///
    /// An interactive interpreter takes over the controlling terminal for job
    /// control; if that fails it keeps running without job control.
    pub fn new(interactive: bool) -> Self {
        let terminal = if interactive {
            TerminalState::init()
                .inspect_err(|e| log::warn!("job control disabled: {}", e))
                .ok()
        } else {
            None
        };
        Self {
            env: Environment::new(),
            jobs: JobController::new(terminal),
            last_status: Status::SUCCESS,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    /// Runs one input line with the shell's own standard streams.
    pub fn execute_line(&mut self, line: &str) -> Result<Status, ShellError> {
        self.execute_line_with_redefined_output(line, &mut io::stdout(), &mut io::stderr())
    }

    /// Runs one input line.
    ///
    /// Builtin output goes to `out`; job notices and per-stage failures go to
    /// `err`. External programs always write to the inherited descriptors.
    pub fn execute_line_with_redefined_output(
        &mut self,
        line: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Status, ShellError> {
        let Some(pipeline) = self.prepare(line)? else {
            return Ok(Status::SUCCESS);
        };
        let status = self.execute_pipeline(&pipeline, out, err)?;
        self.last_status = status;
        Ok(status)
    }

    /// Tokenizes, extracts assignments, resolves variables and parses.
    ///
    /// Returns `None` for a line with nothing to run.
    fn prepare(&mut self, line: &str) -> Result<Option<Pipeline>, ParseError> {
        let tokens = lexer::split_into_tokens(line)?;
        if tokens.is_empty() {
            return Ok(None);
        }

        let Invocation {
            assignments,
            mut words,
        } = extract_assignments(tokens, &mut self.env);
        if words.is_empty() {
            return Ok(None);
        }
        resolve_variables(&mut words, &assignments, &self.env);

        let mut pipeline = parse_pipeline(words)?;
        pipeline.assignments = assignments;
        Ok(Some(pipeline))
    }

    fn execute_pipeline(
        &mut self,
        pipeline: &Pipeline,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Status, RuntimeError> {
        let builtin = pipeline
            .single_simple_stage()
            .filter(|_| !pipeline.background)
            .and_then(|stage| Some((stage, Builtin::lookup(stage.argv.first()?)?)));
        if let Some((stage, builtin)) = builtin {
            let mut ctx = BuiltinContext {
                env: &mut self.env,
                jobs: &mut self.jobs,
            };
            return builtin.run(&stage.argv, out, &mut ctx);
        }

        // Children write to the real descriptors; keep our output ordered.
        out.flush()?;
        let report = self.jobs.run(pipeline, &self.env)?;
        for (_, failure) in &report.failures {
            writeln!(err, "jobsh: {failure}")?;
        }
        if let Some((id, pgid)) = report.background {
            writeln!(err, "[{id}] {pgid}")?;
        }
        if let Some(id) = report.stopped {
            writeln!(err, "\n[{id}]+ {}  {}", report.status, pipeline.text)?;
        }
        Ok(report.status)
    }

    /// Reaps background jobs that have finished and announces each one.
    pub fn report_finished_jobs(&mut self, err: &mut dyn Write) -> io::Result<()> {
        for done in self.jobs.reap() {
            writeln!(err, "[{}]+ {}  {}", done.id, done.status, done.command)?;
        }
        Ok(())
    }

    /// Number of jobs still tracked in the background or stopped.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.jobs().count()
    }

    fn prompt(&self) -> String {
        match self.last_status.code() {
            0 => "$ ".to_owned(),
            code => format!("[{code}] $ "),
        }
    }

    /// Read-Eval-Print Loop.
    ///
    /// Runs until end of input or `exit`. Returns the code the shell process
    /// should exit with: 0 at end of input, the argument of `exit` otherwise.
    pub fn repl(&mut self, reader: &mut dyn LineReader) -> ExitCode {
        loop {
            if let Err(e) = self.report_finished_jobs(&mut io::stderr()) {
                log::warn!("cannot report jobs: {}", e);
            }
            reader.set_completion_variables(self.env.local_names().map(str::to_owned).collect());

            let line = match reader.read_line(&self.prompt()) {
                Ok(Some(line)) => line,
                Ok(None) => return 0,
                Err(e) => {
                    eprintln!("jobsh: cannot read input: {e}");
                    return 1;
                }
            };
            log::trace!("read line {:?}", line);

            if let Err(e) = self.execute_line(&line) {
                eprintln!("jobsh: {e}");
                self.last_status = match e {
                    ShellError::Parse(_) => Status::Exited(2),
                    ShellError::Runtime(_) => Status::Exited(1),
                };
            }
            if let Some(code) = self.env.exit_code {
                return code;
            }
        }
    }
}

impl Default for Interpreter {
    /// A non-interactive interpreter: no terminal hand-off.
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use crate::readline::StreamReader;
    use std::fs;
    use std::io::Cursor;

    fn run(sh: &mut Interpreter, line: &str) -> (Result<Status, ShellError>, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let res = sh.execute_line_with_redefined_output(line, &mut out, &mut err);
        (
            res,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_echo_is_a_builtin() {
        let mut sh = Interpreter::default();
        let (res, out, _) = run(&mut sh, "echo a b c");
        assert_eq!(res.unwrap(), Status::SUCCESS);
        assert_eq!(out, "a b c\n");
    }

    #[test]
    fn quoted_line_is_a_no_op() {
        let mut sh = Interpreter::default();
        let (res, out, _) = run(&mut sh, "X=1 echo \"bar");
        assert!(matches!(
            res,
            Err(ShellError::Parse(ParseError::DisallowedQuoting))
        ));
        assert!(out.is_empty());
        assert_eq!(sh.env().get_local("X"), None);
    }

    #[test]
    fn assignment_then_reference() {
        let mut sh = Interpreter::default();
        assert!(run(&mut sh, "FOO=bar").0.is_ok());
        let (_, out, _) = run(&mut sh, "echo $FOO $JOBSH_UNDEFINED_IN_TESTS end");
        assert_eq!(out, "bar  end\n");
    }

    #[test]
    fn prefix_assignment_reaches_only_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("env.txt");
        let mut sh = Interpreter::default();

        let (res, _, _) = run(&mut sh, &format!("JOBSH_SCOPED=yes env > {}", file.display()));
        assert!(res.unwrap().success());
        let text = fs::read_to_string(&file).unwrap();
        assert!(text.lines().any(|l| l == "JOBSH_SCOPED=yes"));
        assert_eq!(sh.env().get_local("JOBSH_SCOPED"), None);
    }

    #[test]
    fn prefix_assignment_resolves_on_the_same_line() {
        let mut sh = Interpreter::default();
        let (res, out, _) = run(&mut sh, "JOBSH_INLINE_X=1 echo $JOBSH_INLINE_X");
        assert_eq!(res.unwrap(), Status::SUCCESS);
        assert_eq!(out, "1\n");
        assert_eq!(sh.env().get_local("JOBSH_INLINE_X"), None);

        let (_, out, _) = run(&mut sh, "echo $JOBSH_INLINE_X");
        assert_eq!(out, "\n");
    }

    #[test]
    fn builtin_with_redirect_runs_externally() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.txt");
        let mut sh = Interpreter::default();

        let (res, out, _) = run(&mut sh, &format!("echo via program > {}", file.display()));
        assert!(res.unwrap().success());
        assert!(out.is_empty());
        assert_eq!(fs::read_to_string(&file).unwrap(), "via program\n");
    }

    #[test]
    fn missing_program_reports_per_stage() {
        let mut sh = Interpreter::default();
        let (res, _, err) = run(&mut sh, "jobsh-no-such-program arg");
        assert_eq!(res.unwrap(), Status::Exited(127));
        assert!(err.starts_with("jobsh: jobsh-no-such-program:"), "{err}");
        assert_eq!(sh.last_status().code(), 127);
        assert_eq!(sh.prompt(), "[127] $ ");
    }

    #[test]
    fn parse_errors_surface() {
        let mut sh = Interpreter::default();
        assert!(matches!(
            run(&mut sh, "ls | | wc").0,
            Err(ShellError::Parse(ParseError::EmptyStage))
        ));
        assert!(matches!(
            run(&mut sh, "cat >").0,
            Err(ShellError::Parse(ParseError::MissingRedirectTarget(_)))
        ));
    }

    #[test]
    fn repl_stops_at_exit_with_its_code() {
        let mut sh = Interpreter::default();
        let script = "FOO=1\nfoo \"bar\nexit 4\necho never\n";
        let mut reader = StreamReader::new(Cursor::new(script.as_bytes().to_vec()));
        assert_eq!(sh.repl(&mut reader), 4);
        assert_eq!(sh.env().get_local("FOO"), Some("1"));
    }

    #[test]
    fn exit_inside_a_pipeline_keeps_the_shell() {
        let mut sh = Interpreter::default();
        let (res, _, err) = run(&mut sh, "echo a | exit 3 | cat");
        assert_eq!(res.unwrap(), Status::SUCCESS);
        assert!(err.contains("exit"), "{err}");
        assert_eq!(sh.env().exit_code, None);
    }

    #[test]
    fn repl_reads_on_after_exit_in_a_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("after.txt");
        let script = format!(
            "echo a | exit 3 | cat\necho after > {}\nexit 4\n",
            file.display()
        );
        let mut sh = Interpreter::default();
        let mut reader = StreamReader::new(Cursor::new(script.into_bytes()));
        assert_eq!(sh.repl(&mut reader), 4);
        assert_eq!(fs::read_to_string(&file).unwrap(), "after\n");
    }

    #[test]
    fn repl_ends_cleanly_at_end_of_input() {
        let mut sh = Interpreter::default();
        let mut reader = StreamReader::new(Cursor::new(b"false\n".to_vec()));
        assert_eq!(sh.repl(&mut reader), 0);
        assert_eq!(sh.last_status(), Status::Exited(1));
    }
}
