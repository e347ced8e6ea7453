//! Local-assignment extraction and `$NAME` resolution.
//!
//! Both run on the flat word list produced by the lexer, before the parser
//! groups the words into pipeline stages.

use crate::env::{Environment, is_valid_name};

/// Words left to execute after leading `NAME=VALUE` words were taken off.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Assignments that apply only to the child environment of this line.
    pub assignments: Vec<(String, String)>,
    /// The command words. Empty if the line consisted only of assignments.
    pub words: Vec<String>,
}

/// Splits `NAME=VALUE` at the first `=`, if `NAME` is a valid name.
pub fn split_assignment(word: &str) -> Option<(&str, &str)> {
    let (name, value) = word.split_once('=')?;
    is_valid_name(name).then_some((name, value))
}

/// Takes leading `NAME=VALUE` words off `tokens`.
///
/// A line made only of assignments updates `env` and yields no words. When a
/// command follows, the assignments are returned in
/// [`Invocation::assignments`] and `env` is left untouched: they apply to
/// that command's children only.
pub fn extract_assignments(tokens: Vec<String>, env: &mut Environment) -> Invocation {
    let count = tokens
        .iter()
        .take_while(|t| split_assignment(t).is_some())
        .count();
    if count == 0 {
        return Invocation {
            assignments: Vec::new(),
            words: tokens,
        };
    }

    let mut words = tokens;
    let rest = words.split_off(count);
    let assignments: Vec<(String, String)> = words
        .iter()
        .filter_map(|w| split_assignment(w))
        .map(|(n, v)| (n.to_owned(), v.to_owned()))
        .collect();

    if rest.is_empty() {
        for (name, value) in assignments {
            env.set_var(name, value);
        }
        return Invocation::default();
    }

    Invocation {
        assignments,
        words: rest,
    }
}

/// Replaces every word that starts with `$` by the value of the named
/// variable.
///
/// Lookup order: the line's own prefix `assignments` (the last one of a
/// repeated name wins), then [`Environment::get_var`]. The whole word is
/// replaced; there is no partial-word substitution and no word splitting of
/// the result. Undefined names resolve to the empty string.
pub fn resolve_variables(
    words: &mut [String],
    assignments: &[(String, String)],
    env: &Environment,
) {
    for word in words.iter_mut() {
        if let Some(name) = word.strip_prefix('$') {
            let inline = assignments
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone());
            *word = inline.or_else(|| env.get_var(name)).unwrap_or_default();
        }
    }
}
