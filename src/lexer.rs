//! Lexical analysis of a raw input line.
//!
//! The shell only understands whitespace-separated words. Operators such as
//! `|`, `<`, `>`, `>>` and `&` are ordinary words at this stage and are given
//! meaning by the parser.

use crate::error::ParseError;

/// Characters that make a whole line invalid.
const DISALLOWED: [char; 3] = ['"', '\'', '`'];

/// Splits `line` into words on runs of whitespace.
///
/// No quoting or escape interpretation is performed. If any word contains a
/// quote or backtick the whole line is rejected and no words are returned.
///
/// # Returns
/// `Result<Vec<String>, ParseError>`: the words in order, or
/// [`ParseError::DisallowedQuoting`].
pub fn split_into_tokens(line: &str) -> Result<Vec<String>, ParseError> {
    let tokens: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
    if tokens.iter().any(|t| t.contains(DISALLOWED)) {
        return Err(ParseError::DisallowedQuoting);
    }
    log::trace!("tokens = {:?}", tokens);
    Ok(tokens)
}
