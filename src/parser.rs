use crate::error::ParseError;
use std::path::PathBuf;

/// Kind of redirection
///
/// Defines the specific operation mode for an I/O redirection (`<`, `>`, `>>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Input redirection (`<`): Reads standard input from a specified file.
    Input,
    /// Output redirection (`>`): Writes standard output to a file, **truncating** the file if it exists.
    Output,
    /// Output redirection with append (`>>`): Writes standard output to a file, **appending** to the file if it exists.
    Append,
}

impl RedirectKind {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "<" => Some(RedirectKind::Input),
            ">" => Some(RedirectKind::Output),
            ">>" => Some(RedirectKind::Append),
            _ => None,
        }
    }

    pub fn operator(self) -> &'static str {
        match self {
            RedirectKind::Input => "<",
            RedirectKind::Output => ">",
            RedirectKind::Append => ">>",
        }
    }
}

/// An **I/O redirection** of a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    /// The file the stream is connected to.
    pub target: PathBuf,
}

/// One program invocation within a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    /// Command name followed by its arguments. Never empty.
    pub argv: Vec<String>,
    /// `< path`, allowed on the first stage only.
    pub stdin: Option<Redirect>,
    /// `> path` or `>> path`, allowed on the last stage only.
    pub stdout: Option<Redirect>,
}

impl Stage {
    pub fn has_redirects(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some()
    }
}

/// An ordered chain of stages connected by pipes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    /// At least one stage.
    pub stages: Vec<Stage>,
    /// A trailing `&` was given.
    pub background: bool,
    /// `NAME=VALUE` words that prefixed the line; passed to every child.
    pub assignments: Vec<(String, String)>,
    /// The words of the line, used when reporting the job.
    pub text: String,
}

impl Pipeline {
    /// A line resolves to a builtin only when it is a single, unredirected stage.
    pub fn single_simple_stage(&self) -> Option<&Stage> {
        match self.stages.as_slice() {
            [stage] if !stage.has_redirects() => Some(stage),
            _ => None,
        }
    }
}

const PIPE: &str = "|";
const BACKGROUND: &str = "&";

fn is_operator(word: &str) -> bool {
    word == PIPE || RedirectKind::from_operator(word).is_some()
}

struct PipelineBuilder {
    tokens: Vec<String>,
    pos: usize,
}

impl PipelineBuilder {
    fn from(tokens: Vec<String>) -> Self {
        PipelineBuilder { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn consume(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a pipeline: stage ('|' stage)*
    fn parse_stages(&mut self) -> Result<Vec<Stage>, ParseError> {
        let mut stages = vec![self.parse_stage()?];
        while self.peek() == Some(PIPE) {
            self.consume();
            stages.push(self.parse_stage()?);
        }
        Ok(stages)
    }

    /// Parse a stage: (word | redirect)*, up to the next '|' or the end.
    fn parse_stage(&mut self) -> Result<Stage, ParseError> {
        let mut stage = Stage::default();

        while let Some(token) = self.peek() {
            if token == PIPE {
                break;
            }
            match RedirectKind::from_operator(token) {
                Some(kind) => {
                    let redirect = self.parse_redirect(kind)?;
                    // a repeated redirection replaces the earlier one
                    if kind == RedirectKind::Input {
                        stage.stdin = Some(redirect);
                    } else {
                        stage.stdout = Some(redirect);
                    }
                }
                None => {
                    if let Some(word) = self.consume() {
                        stage.argv.push(word);
                    }
                }
            }
        }

        if stage.argv.is_empty() {
            return Err(ParseError::EmptyStage);
        }
        Ok(stage)
    }

    /// Parse a redirect: ('<' | '>' | '>>') word
    fn parse_redirect(&mut self, kind: RedirectKind) -> Result<Redirect, ParseError> {
        self.consume();
        match self.peek() {
            Some(target) if !is_operator(target) => {
                let target = PathBuf::from(target);
                self.consume();
                Ok(Redirect { kind, target })
            }
            _ => Err(ParseError::MissingRedirectTarget(kind.operator().to_owned())),
        }
    }
}

/// Checks that only the first stage reads from a file and only the last one
/// writes to a file.
fn check_placement(stages: &[Stage]) -> Result<(), ParseError> {
    let last = stages.len().saturating_sub(1);
    for (i, stage) in stages.iter().enumerate() {
        if let Some(r) = stage.stdin.as_ref().filter(|_| i > 0) {
            return Err(ParseError::MisplacedRedirect(r.kind.operator().to_owned()));
        }
        if let Some(r) = stage.stdout.as_ref().filter(|_| i < last) {
            return Err(ParseError::MisplacedRedirect(r.kind.operator().to_owned()));
        }
    }
    Ok(())
}

/// Groups resolved words into a [`Pipeline`].
///
/// Words are split into stages on `|`; `<`, `>` and `>>` together with the
/// following word become redirections of their stage. A trailing `&` makes
/// the pipeline a background job.
///
/// # Returns
///
/// * `Result<Pipeline, ParseError>` - the pipeline, or the first syntax
///   problem found: [`ParseError::EmptyStage`],
///   [`ParseError::MissingRedirectTarget`] or [`ParseError::MisplacedRedirect`].
pub fn parse_pipeline(mut words: Vec<String>) -> Result<Pipeline, ParseError> {
    let background = words.last().is_some_and(|w| w == BACKGROUND);
    if background {
        words.pop();
    }
    let text = words.join(" ");

    let mut builder = PipelineBuilder::from(words);
    let stages = builder.parse_stages()?;
    check_placement(&stages)?;

    log::debug!("parsed {} stage(s), background={}: {:?}", stages.len(), background, stages);
    Ok(Pipeline {
        stages,
        background,
        assignments: Vec::new(),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Pipeline, ParseError> {
        parse_pipeline(line.split_whitespace().map(str::to_owned).collect())
    }

    fn argv(stage: &Stage) -> Vec<&str> {
        stage.argv.iter().map(String::as_str).collect()
    }

    #[test]
    fn single_stage() {
        let p = parse("ls -l /tmp").unwrap();
        assert_eq!(p.stages.len(), 1);
        assert_eq!(argv(&p.stages[0]), vec!["ls", "-l", "/tmp"]);
        assert!(!p.background);
        assert!(p.single_simple_stage().is_some());
    }

    #[test]
    fn three_stage_pipeline() {
        let p = parse("cat f | grep x | wc -l").unwrap();
        let stages: Vec<_> = p.stages.iter().map(argv).collect();
        assert_eq!(
            stages,
            vec![vec!["cat", "f"], vec!["grep", "x"], vec!["wc", "-l"]]
        );
        assert!(p.single_simple_stage().is_none());
    }

    #[test]
    fn redirections_are_removed_from_argv() {
        let p = parse("sort < in.txt -r >> out.txt").unwrap();
        let stage = &p.stages[0];
        assert_eq!(argv(stage), vec!["sort", "-r"]);
        assert_eq!(
            stage.stdin,
            Some(Redirect {
                kind: RedirectKind::Input,
                target: PathBuf::from("in.txt")
            })
        );
        assert_eq!(
            stage.stdout,
            Some(Redirect {
                kind: RedirectKind::Append,
                target: PathBuf::from("out.txt")
            })
        );
        assert!(p.single_simple_stage().is_none());
    }

    #[test]
    fn last_redirection_wins() {
        let p = parse("echo hi > a > b").unwrap();
        let out = p.stages[0].stdout.as_ref().unwrap();
        assert_eq!(out.kind, RedirectKind::Output);
        assert_eq!(out.target, PathBuf::from("b"));
    }

    #[test]
    fn trailing_ampersand_means_background() {
        let p = parse("sleep 5 &").unwrap();
        assert!(p.background);
        assert_eq!(argv(&p.stages[0]), vec!["sleep", "5"]);
        assert_eq!(p.text, "sleep 5");
    }

    #[test]
    fn inner_ampersand_is_a_word() {
        let p = parse("echo & done").unwrap();
        assert!(!p.background);
        assert_eq!(argv(&p.stages[0]), vec!["echo", "&", "done"]);
    }

    #[test]
    fn empty_stages_are_rejected() {
        assert_eq!(parse("ls | | wc"), Err(ParseError::EmptyStage));
        assert_eq!(parse("| wc"), Err(ParseError::EmptyStage));
        assert_eq!(parse("ls |"), Err(ParseError::EmptyStage));
        assert_eq!(parse("> out"), Err(ParseError::EmptyStage));
        assert_eq!(parse("&"), Err(ParseError::EmptyStage));
    }

    #[test]
    fn missing_redirect_target() {
        assert_eq!(
            parse("ls >"),
            Err(ParseError::MissingRedirectTarget(">".into()))
        );
        assert_eq!(
            parse("cat < > f"),
            Err(ParseError::MissingRedirectTarget("<".into()))
        );
        assert_eq!(
            parse("ls >> | wc"),
            Err(ParseError::MissingRedirectTarget(">>".into()))
        );
        assert_eq!(
            parse("ls > &"),
            Err(ParseError::MissingRedirectTarget(">".into()))
        );
    }

    #[test]
    fn misplaced_redirects() {
        assert_eq!(
            parse("ls | wc < f"),
            Err(ParseError::MisplacedRedirect("<".into()))
        );
        assert_eq!(
            parse("ls > f | wc"),
            Err(ParseError::MisplacedRedirect(">".into()))
        );
        assert!(parse("cat < in | sort | uniq > out").is_ok());
    }
}
