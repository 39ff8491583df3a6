//! Minimal Python source scanner.
//!
//! Splits source into logical lines (joining bracketed and backslash-continued
//! lines, dropping comments and string contents) and recognises the handful of
//! statements the structure analysis needs: `class`, `def`, `import`, `from ...
//! import`. Anything else is ignored.

use crate::error::{AgentError, Result};

const TAB_WIDTH: usize = 8;

/// One logical line of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based line where the statement starts
    pub number: usize,
    /// Indentation width of the first physical line
    pub indent: usize,
    /// Statement text with comments removed and string contents blanked
    pub text: String,
}

/// A recognised statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `class Name(...):`
    Class {
        /// Class name
        name: String,
    },
    /// `def name(args):` or `async def name(args):`
    Function {
        /// Function name
        name: String,
        /// Positional parameters, in order
        args: Vec<String>,
    },
    /// `import a, b.c as d` or `from m import x`
    Import {
        /// Imported names
        names: Vec<String>,
    },
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .fold(0, |width, c| {
            if c == '\t' {
                (width / TAB_WIDTH + 1) * TAB_WIDTH
            } else {
                width + 1
            }
        })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single(char),
    Triple(char),
}

/// Split `source` into logical lines.
///
/// # Errors
///
/// Returns [`AgentError::Parse`] for unterminated strings and unbalanced
/// brackets.
pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>> {
    let mut lines = Vec::new();
    let mut text = String::new();
    let mut start = 0;
    let mut indent = 0;
    let mut depth: usize = 0;
    let mut quote: Option<Quote> = None;

    for (index, raw) in source.lines().enumerate() {
        let number = index + 1;
        if text.is_empty() && depth == 0 && quote.is_none() {
            start = number;
            indent = indent_width(raw);
        }

        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        let mut continued = false;
        while i < chars.len() {
            let c = chars[i];
            match quote {
                Some(Quote::Triple(q)) => {
                    if c == '\\' {
                        i += 1;
                    } else if chars[i..].starts_with(&[q, q, q]) {
                        text.push(q);
                        quote = None;
                        i += 2;
                    }
                }
                Some(Quote::Single(q)) => {
                    if c == '\\' {
                        i += 1;
                    } else if c == q {
                        text.push(q);
                        quote = None;
                    }
                }
                None => match c {
                    '#' => break,
                    '"' | '\'' => {
                        text.push(c);
                        if chars[i..].starts_with(&[c, c, c]) {
                            quote = Some(Quote::Triple(c));
                            i += 2;
                        } else {
                            quote = Some(Quote::Single(c));
                        }
                    }
                    '(' | '[' | '{' => {
                        depth += 1;
                        text.push(c);
                    }
                    ')' | ']' | '}' => {
                        depth = depth.checked_sub(1).ok_or_else(|| AgentError::Parse {
                            line: number,
                            message: format!("unmatched '{c}'"),
                        })?;
                        text.push(c);
                    }
                    '\\' if i + 1 == chars.len() => continued = true,
                    _ => text.push(c),
                },
            }
            i += 1;
        }

        if matches!(quote, Some(Quote::Single(_))) && !raw.ends_with('\\') {
            return Err(AgentError::Parse {
                line: number,
                message: "unterminated string literal".to_string(),
            });
        }

        if continued || depth > 0 || quote.is_some() {
            text.push(' ');
            continue;
        }

        let statement = text.trim();
        if !statement.is_empty() {
            lines.push(LogicalLine {
                number: start,
                indent,
                text: statement.to_string(),
            });
        }
        text.clear();
    }

    if quote.is_some() {
        return Err(AgentError::Parse {
            line: start,
            message: "unterminated string literal".to_string(),
        });
    }
    if depth > 0 {
        return Err(AgentError::Parse {
            line: start,
            message: "unclosed bracket".to_string(),
        });
    }
    Ok(lines)
}

fn keyword<'a>(text: &'a str, kw: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(kw)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim_start())
}

fn identifier(text: &str) -> String {
    text.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Split on commas outside brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut from = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[from..i]);
                from = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[from..]);
    parts
}

/// Text between the first `(` and its matching `)`.
fn parenthesised(text: &str) -> Option<&str> {
    let open = text.find('(')?;
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open + 1..open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Positional parameters: everything before a bare `*`, `*args` or `**kwargs`,
/// minus positional-only ones (those before `/`).
fn positional_params(params: &str) -> Vec<String> {
    let mut args = Vec::new();
    for param in split_top_level(params) {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        if param == "/" {
            args.clear();
            continue;
        }
        if param.starts_with('*') {
            break;
        }
        let name = identifier(param);
        if !name.is_empty() {
            args.push(name);
        }
    }
    args
}

fn imported_name(item: &str) -> Option<String> {
    let name = item.trim().split_whitespace().next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Recognise the statement on one logical line.
#[must_use]
pub fn parse_statement(text: &str) -> Option<Statement> {
    if text.starts_with('@') {
        return None;
    }

    if let Some(rest) = keyword(text, "class") {
        let name = identifier(rest);
        return (!name.is_empty()).then_some(Statement::Class { name });
    }

    let def = keyword(text, "def").or_else(|| keyword(text, "async").and_then(|r| keyword(r, "def")));
    if let Some(rest) = def {
        let name = identifier(rest);
        if name.is_empty() {
            return None;
        }
        let args = parenthesised(rest).map(positional_params).unwrap_or_default();
        return Some(Statement::Function { name, args });
    }

    if let Some(rest) = keyword(text, "import") {
        let names = split_top_level(rest).into_iter().filter_map(imported_name).collect();
        return Some(Statement::Import { names });
    }

    if let Some(rest) = keyword(text, "from") {
        let (module, items) = rest.split_once(" import ")?;
        let items = items.trim().trim_start_matches('(').trim_end_matches(')');
        let first = split_top_level(items).into_iter().find_map(imported_name)?;
        return Some(Statement::Import {
            names: vec![format!("{}.{first}", module.trim())],
        });
    }

    None
}
