//! Line readers the prompt loop pulls input from.

use crate::completion::{Candidates, classify};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::io::{self, BufRead};

/// Source of input lines.
pub trait LineReader {
    /// Shows `prompt` and reads one line without its newline.
    ///
    /// `Ok(None)` means end of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Tells the reader which shell-local variables exist, for completion.
    fn set_completion_variables(&mut self, _names: Vec<String>) {}
}

/// rustyline helper offering the shell's completion candidates.
#[derive(Default)]
struct ShellHelper {
    variables: Vec<String>,
}

impl Helper for ShellHelper {}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let Some(request) = classify(line, pos) else {
            return Ok((pos, Vec::new()));
        };
        let pairs = Candidates::new(&request.prefix, request.context, &self.variables)
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((request.start, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

fn to_io(err: ReadlineError) -> io::Error {
    match err {
        ReadlineError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

/// Interactive reader backed by the `rustyline` editor.
///
/// History is kept in memory for the session only.
pub struct EditorReader {
    editor: Editor<ShellHelper, DefaultHistory>,
}

impl EditorReader {
    pub fn new() -> rustyline::Result<Self> {
        let mut editor = Editor::new()?;
        editor.set_helper(Some(ShellHelper::default()));
        Ok(Self { editor })
    }
}

impl LineReader for EditorReader {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.editor.add_history_entry(line.as_str()).map_err(to_io)?;
                }
                Ok(Some(line))
            }
            // Ctrl-C drops the current line and shows a fresh prompt.
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(to_io(err)),
        }
    }

    fn set_completion_variables(&mut self, names: Vec<String>) {
        if let Some(helper) = self.editor.helper_mut() {
            helper.variables = names;
        }
    }
}

/// Reads lines from any buffered input, without showing a prompt.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub struct StreamReader<R> {
    input: R,
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> LineReader for StreamReader<R> {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        if self.input.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}
