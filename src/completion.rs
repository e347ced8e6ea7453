//! Tab-completion context and candidate generation.
//!
//! The shell only classifies where the cursor is; the line editor asks
//! [`Candidates`] for the matching strings. A fresh [`Candidates`] is built
//! for every request, so no completion state outlives one key press.

use crate::builtin::Builtin;
use crate::external::is_executable;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;

/// What kind of word is being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionContext {
    /// The first word of the line: a builtin or a program in `PATH`.
    CommandPosition,
    /// An argument of `cd`: a directory.
    AfterCd,
    /// An argument of `echo $...`: a variable reference.
    AfterEchoDollar,
}

/// The word under the cursor and how to complete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Byte offset where the word starts; candidates replace `line[start..pos]`.
    pub start: usize,
    pub prefix: String,
    pub context: CompletionContext,
}

/// Classifies the word ending at byte offset `pos` of `line`.
///
/// Returns `None` when the shell has nothing to offer there.
pub fn classify(line: &str, pos: usize) -> Option<CompletionRequest> {
    let before = line.get(..pos)?;
    let start = before
        .rfind(char::is_whitespace)
        .map_or(0, |i| i + before[i..].chars().next().map_or(1, char::len_utf8));
    let prefix = before[start..].to_owned();

    let context = if before[..start].trim().is_empty() {
        CompletionContext::CommandPosition
    } else if line.starts_with("cd ") {
        CompletionContext::AfterCd
    } else if line.starts_with("echo $") {
        CompletionContext::AfterEchoDollar
    } else {
        return None;
    };

    log::trace!("completing {:?} at {} as {:?}", prefix, start, context);
    Some(CompletionRequest {
        start,
        prefix,
        context,
    })
}

/// Candidate strings for one completion request.
///
/// Nothing is read from the file system until the first call to `next`.
/// [`Candidates::restart`] rewinds to the first candidate.
#[derive(Debug, Clone)]
pub struct Candidates {
    prefix: String,
    context: CompletionContext,
    variables: Vec<String>,
    items: Option<Vec<String>>,
    cursor: usize,
}

impl Candidates {
    /// `variables` are the shell-local variable names, offered together
    /// with the process environment after `echo $`.
    pub fn new(prefix: &str, context: CompletionContext, variables: &[String]) -> Self {
        Self {
            prefix: prefix.to_owned(),
            context,
            variables: variables.to_vec(),
            items: None,
            cursor: 0,
        }
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    fn collect(&self) -> Vec<String> {
        let found: BTreeSet<String> = match self.context {
            CompletionContext::CommandPosition => self.commands(),
            CompletionContext::AfterCd => self.directories(),
            CompletionContext::AfterEchoDollar => self.variable_refs(),
        };
        found.into_iter().collect()
    }

    fn commands(&self) -> BTreeSet<String> {
        let mut found: BTreeSet<String> = Builtin::ALL
            .iter()
            .map(|b| b.name())
            .filter(|name| name.starts_with(&self.prefix))
            .map(str::to_owned)
            .collect();

        let Some(path) = env::var_os("PATH") else {
            return found;
        };
        for dir in env::split_paths(&path) {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(&self.prefix) && is_executable(&entry.path()) {
                    found.insert(name);
                }
            }
        }
        found
    }

    fn directories(&self) -> BTreeSet<String> {
        let (parent, stem) = match self.prefix.rfind('/') {
            Some(i) => self.prefix.split_at(i + 1),
            None => ("", self.prefix.as_str()),
        };
        let dir = if parent.is_empty() { Path::new(".") } else { Path::new(parent) };

        let Ok(entries) = fs::read_dir(dir) else {
            return BTreeSet::new();
        };
        entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(stem))
            .filter(|name| stem.starts_with('.') || !name.starts_with('.'))
            .map(|name| format!("{parent}{name}/"))
            .collect()
    }

    fn variable_refs(&self) -> BTreeSet<String> {
        env::vars_os()
            .map(|(k, _)| k.to_string_lossy().into_owned())
            .chain(self.variables.iter().cloned())
            .map(|name| format!("${name}"))
            .filter(|word| word.starts_with(&self.prefix))
            .collect()
    }
}

impl Iterator for Candidates {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.items.is_none() {
            self.items = Some(Candidates::collect(self));
        }
        let item = self.items.as_ref()?.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }
}
