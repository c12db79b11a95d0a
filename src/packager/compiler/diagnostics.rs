//! Compiler output classification.
//!
//! A diagnostic spans up to four lines:
//!
//! ```text
//! src/com/acme/Main.java:12: cannot find symbol
//! symbol  : variable count
//!         count++;
//!         ^
//! ```
//!
//! [`step`] is a pure transition `(state, line) -> (state, completed problem)`
//! over [`ParserState`]. Lines it does not recognise while idle are left for
//! the caller to pass through.

use crate::packager::problem::{Problem, Severity};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static LOCATED_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?):(\d+):\s*(.*)$").expect("static regex"));
static PREFIXED_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Error|Warning)!:\s*(.*)$").expect("static regex"));
static SYMBOL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(symbol|location)\s*:\s*(.*)$").expect("static regex"));
static CARET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)\^\s*$").expect("static regex"));

/// Where the parser is inside a multi-line diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Idle,
    AfterErrorStart(Problem),
    AfterSymbolLine(Problem),
    /// Holds the echoed source line for span computation
    AfterSourceLine(Problem, String),
}

/// Result of feeding one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ParserState,
    /// A diagnostic finished by this line
    pub completed: Option<Problem>,
    /// `false` if the line was not part of a diagnostic
    pub consumed: bool,
}

enum Line {
    Start(Problem),
    Symbol(String),
    Caret(usize),
    Other,
}

fn classify(line: &str, base_dir: &Path) -> Line {
    if let Some(caps) = PREFIXED_START.captures(line) {
        let severity = if &caps[1] == "Warning" {
            Severity::Warning
        } else {
            Severity::Error
        };
        return Line::Start(Problem::new(severity, caps[2].trim()));
    }
    if let Some(caps) = SYMBOL_LINE.captures(line) {
        return Line::Symbol(format!("{}: {}", &caps[1], caps[2].trim()));
    }
    if let Some(caps) = CARET_LINE.captures(line) {
        return Line::Caret(caps[1].chars().count());
    }
    if let Some(caps) = LOCATED_START.captures(line) {
        let (severity, message) = split_severity(caps[3].trim());
        let file = base_dir.join(caps[1].trim());
        return Line::Start(Problem {
            severity,
            file: Some(file),
            line: caps[2].parse().unwrap_or(0),
            span: None,
            message: message.to_string(),
        });
    }
    Line::Other
}

fn split_severity(message: &str) -> (Severity, &str) {
    for (prefix, severity) in [
        ("Warning!:", Severity::Warning),
        ("warning:", Severity::Warning),
        ("Error!:", Severity::Error),
        ("error:", Severity::Error),
    ] {
        if let Some(rest) = message.strip_prefix(prefix) {
            return (severity, rest.trim());
        }
    }
    (Severity::Error, message)
}

/// Column range covered by the identifier at `column` in `source`.
fn span_at(source: &str, column: usize) -> (u32, u32) {
    let width = source
        .chars()
        .skip(column)
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .count()
        .max(1);
    (column as u32, (column + width) as u32)
}

fn pending(state: ParserState) -> Option<Problem> {
    match state {
        ParserState::Idle => None,
        ParserState::AfterErrorStart(p)
        | ParserState::AfterSymbolLine(p)
        | ParserState::AfterSourceLine(p, _) => Some(p),
    }
}

/// Feeds one output line. Relative file names resolve against `base_dir`.
pub fn step(state: ParserState, line: &str, base_dir: &Path) -> Transition {
    let class = classify(line, base_dir);

    match (state, class) {
        (state, Line::Start(problem)) => Transition {
            completed: pending(state),
            state: ParserState::AfterErrorStart(problem),
            consumed: true,
        },
        (ParserState::AfterErrorStart(mut problem), Line::Symbol(symbol))
        | (ParserState::AfterSymbolLine(mut problem), Line::Symbol(symbol)) => {
            problem.message = format!("{} ({})", problem.message, symbol);
            Transition {
                state: ParserState::AfterSymbolLine(problem),
                completed: None,
                consumed: true,
            }
        }
        (ParserState::AfterErrorStart(mut problem), Line::Caret(column))
        | (ParserState::AfterSymbolLine(mut problem), Line::Caret(column)) => {
            problem.span = Some((column as u32, column as u32 + 1));
            Transition {
                state: ParserState::Idle,
                completed: Some(problem),
                consumed: true,
            }
        }
        (ParserState::AfterErrorStart(problem), Line::Other)
        | (ParserState::AfterSymbolLine(problem), Line::Other) => Transition {
            state: ParserState::AfterSourceLine(problem, line.to_string()),
            completed: None,
            consumed: true,
        },
        (ParserState::AfterSourceLine(mut problem, source), Line::Caret(column)) => {
            problem.span = Some(span_at(&source, column));
            Transition {
                state: ParserState::Idle,
                completed: Some(problem),
                consumed: true,
            }
        }
        (ParserState::AfterSourceLine(problem, _), _) => Transition {
            state: ParserState::Idle,
            completed: Some(problem),
            consumed: false,
        },
        (ParserState::Idle, _) => Transition {
            state: ParserState::Idle,
            completed: None,
            consumed: false,
        },
    }
}

/// Flushes a diagnostic still pending at end of output.
pub fn finish(state: ParserState) -> Option<Problem> {
    pending(state)
}

/// Parses a complete output, returning problems and passed-through lines.
pub fn parse_output<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    base_dir: &Path,
) -> (Vec<Problem>, Vec<&'a str>) {
    let mut state = ParserState::Idle;
    let mut problems = Vec::new();
    let mut passthrough = Vec::new();

    for line in lines {
        let transition = step(state, line, base_dir);
        state = transition.state;
        problems.extend(transition.completed);
        if !transition.consumed {
            passthrough.push(line);
        }
    }
    problems.extend(finish(state));
    (problems, passthrough)
}
