//! Parser for the recovery-routine command language.
//!
//! One command per line:
//!
//! ```text
//! # comment
//! set NAME "text with {var}"
//! emit "text"
//! wait 25
//! fail "message"
//! return "receipt text"
//! ```
//!
//! Strings are double-quoted with `\"`, `\\`, `\n`, and `\{` escapes.
//! `{name}` interpolates a builtin or a variable set on an earlier line.

use std::collections::HashSet;

/// Variables every routine can read.
pub const BUILTIN_VARS: [&str; 4] = ["snapshot_id", "instance_name", "steward", "covenant"];

/// Longest single `wait` accepted, in milliseconds.
pub const MAX_WAIT_MS: u64 = 60_000;

/// A syntax error with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Var(String),
}

/// An interpolated string literal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Set { name: String, value: Template },
    Emit(Template),
    Wait(u64),
    Fail(Template),
    Return(Template),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub line: usize,
    pub op: Op,
}

/// A parsed routine, ready to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routine {
    pub commands: Vec<Command>,
}

impl Routine {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Parse a routine. An empty or comment-only text is a valid empty routine.
pub fn parse_routine(source: &str) -> Result<Routine, ParseError> {
    let mut defined: HashSet<String> = BUILTIN_VARS.iter().map(|v| v.to_string()).collect();
    let mut commands = Vec::new();
    let mut returned = false;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        if returned {
            return Err(err(line, "unreachable command after return"));
        }

        let (keyword, rest) = split_word(text);
        let op = match keyword {
            "set" => {
                let (name, rest) = split_word(rest);
                if !is_identifier(name) {
                    return Err(err(line, format!("invalid variable name '{name}'")));
                }
                if BUILTIN_VARS.contains(&name) {
                    return Err(err(line, format!("cannot reassign builtin '{name}'")));
                }
                let value = parse_string_arg(rest, line, &defined)?;
                defined.insert(name.to_string());
                Op::Set {
                    name: name.to_string(),
                    value,
                }
            }
            "emit" => Op::Emit(parse_string_arg(rest, line, &defined)?),
            "fail" => Op::Fail(parse_string_arg(rest, line, &defined)?),
            "return" => {
                returned = true;
                Op::Return(parse_string_arg(rest, line, &defined)?)
            }
            "wait" => {
                let (amount, trailing) = split_word(rest);
                if !trailing.is_empty() && !trailing.starts_with('#') {
                    return Err(err(line, "unexpected text after wait duration"));
                }
                let ms: u64 = amount
                    .parse()
                    .map_err(|_| err(line, format!("invalid wait duration '{amount}'")))?;
                if ms > MAX_WAIT_MS {
                    return Err(err(
                        line,
                        format!("wait duration {ms} exceeds {MAX_WAIT_MS} ms"),
                    ));
                }
                Op::Wait(ms)
            }
            other => return Err(err(line, format!("unknown command '{other}'"))),
        };
        commands.push(Command { line, op });
    }

    Ok(Routine { commands })
}

fn err(line: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        line,
        message: message.into(),
    }
}

fn split_word(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim_start()),
        None => (text, ""),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse exactly one quoted string, optionally followed by a comment.
fn parse_string_arg(
    text: &str,
    line: usize,
    defined: &HashSet<String>,
) -> Result<Template, ParseError> {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return Err(err(line, "expected a quoted string")),
    }

    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut end = None;

    while let Some((pos, c)) = chars.next() {
        match c {
            '"' => {
                end = Some(pos + 1);
                break;
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => buf.push('\n'),
                Some((_, e @ ('"' | '\\' | '{' | '}'))) => buf.push(e),
                Some((_, e)) => return Err(err(line, format!("unknown escape '\\{e}'"))),
                None => break,
            },
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(err(line, "unterminated '{' in string"));
                }
                if !is_identifier(&name) {
                    return Err(err(line, format!("invalid variable reference '{{{name}}}'")));
                }
                if !defined.contains(&name) {
                    return Err(err(line, format!("undefined variable '{name}'")));
                }
                if !buf.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut buf)));
                }
                segments.push(Segment::Var(name));
            }
            other => buf.push(other),
        }
    }

    let end = end.ok_or_else(|| err(line, "unterminated string"))?;
    let trailing = text[end..].trim();
    if !trailing.is_empty() && !trailing.starts_with('#') {
        return Err(err(line, "unexpected text after string"));
    }
    if !buf.is_empty() {
        segments.push(Segment::Text(buf));
    }
    Ok(Template { segments })
}
