/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tokenizers for template source and tag markup.
//!
//! [`tokenize`] splits a template into text, `{{ output }}` and `{% tag %}`
//! tokens, applying `-` whitespace control. [`MarkupLexer`] then scans the
//! markup inside a delimiter into expression tokens.

use crate::error::{TemplateError, TemplateResult};

/// A top-level template token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    /// Markup of a `{{ ... }}` output, trimmed.
    Output { markup: String, line: usize },
    /// Markup of a `{% ... %}` tag, trimmed.
    Tag { markup: String, line: usize },
}

/// Split template source into tokens.
pub fn tokenize(source: &str) -> TemplateResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next_text = false;

    while !rest.is_empty() {
        let Some(start) = find_open(rest) else {
            push_text(&mut tokens, rest, trim_next_text, false);
            break;
        };

        let (text, after_text) = rest.split_at(start);
        let is_output = after_text.starts_with("{{");
        let close = if is_output { "}}" } else { "%}" };
        let inner = &after_text[2..];
        let trim_before = inner.starts_with('-');

        push_text(&mut tokens, text, trim_next_text, trim_before);
        line += text.matches('\n').count();

        let Some(end) = inner.find(close) else {
            let kind = if is_output { "Variable" } else { "Tag" };
            let snippet: String = after_text.chars().take(20).collect();
            return Err(TemplateError::syntax(
                line,
                format!(
                    "{} '{}' was not properly terminated with '{}'",
                    kind, snippet, close
                ),
            ));
        };

        let mut markup = &inner[..end];
        if trim_before {
            markup = &markup[1..];
        }
        trim_next_text = markup.ends_with('-');
        if trim_next_text {
            markup = &markup[..markup.len() - 1];
        }

        let markup = markup.trim().to_string();
        tokens.push(if is_output {
            Token::Output { markup, line }
        } else {
            Token::Tag { markup, line }
        });

        line += inner[..end].matches('\n').count();
        rest = &inner[end + close.len()..];
    }

    Ok(tokens)
}

fn find_open(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b'{' && (bytes[i + 1] == b'{' || bytes[i + 1] == b'%'))
}

fn push_text(tokens: &mut Vec<Token>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

/// Comparison operators usable in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
}

/// A token inside tag or output markup.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkupToken {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Compare(CompareOp),
    Assign,
    Dot,
    DotDot,
    Comma,
    Colon,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

/// Scanner over tag markup.
pub struct MarkupLexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
    line: usize,
}

impl<'a> MarkupLexer<'a> {
    pub fn new(source: &'a str, line: usize) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
            line,
        }
    }

    /// Scan the whole markup into tokens.
    pub fn tokens(mut self) -> TemplateResult<Vec<MarkupToken>> {
        let mut out = Vec::new();
        while let Some(token) = self.next_token()? {
            out.push(token);
        }
        Ok(out)
    }

    fn next_token(&mut self) -> TemplateResult<Option<MarkupToken>> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some((start, c)) = self.chars.next() else {
            return Ok(None);
        };

        let token = match c {
            '\'' | '"' => self.string(c)?,
            '0'..='9' => self.number(start, false)?,
            '-' if self.peek_is(|c| c.is_ascii_digit()) => self.number(start, true)?,
            c if c.is_alphabetic() || c == '_' => self.ident(start, c),
            '.' if self.chars.next_if(|(_, c)| *c == '.').is_some() => MarkupToken::DotDot,
            '.' => MarkupToken::Dot,
            ',' => MarkupToken::Comma,
            ':' => MarkupToken::Colon,
            '|' => MarkupToken::Pipe,
            '(' => MarkupToken::LParen,
            ')' => MarkupToken::RParen,
            '[' => MarkupToken::LBracket,
            ']' => MarkupToken::RBracket,
            '=' if self.eat('=') => MarkupToken::Compare(CompareOp::Eq),
            '=' => MarkupToken::Assign,
            '!' if self.eat('=') => MarkupToken::Compare(CompareOp::Ne),
            '<' if self.eat('>') => MarkupToken::Compare(CompareOp::Ne),
            '<' if self.eat('=') => MarkupToken::Compare(CompareOp::Le),
            '<' => MarkupToken::Compare(CompareOp::Lt),
            '>' if self.eat('=') => MarkupToken::Compare(CompareOp::Ge),
            '>' => MarkupToken::Compare(CompareOp::Gt),
            other => {
                return Err(TemplateError::syntax(
                    self.line,
                    format!("Unexpected character '{}' in \"{}\"", other, self.source),
                ));
            }
        };
        Ok(Some(token))
    }

    fn peek_is(&mut self, f: impl Fn(char) -> bool) -> bool {
        self.chars.peek().is_some_and(|(_, c)| f(*c))
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn string(&mut self, quote: char) -> TemplateResult<MarkupToken> {
        let mut value = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == quote {
                return Ok(MarkupToken::Str(value));
            }
            value.push(c);
        }
        Err(TemplateError::syntax(
            self.line,
            format!("Unterminated string in \"{}\"", self.source),
        ))
    }

    fn number(&mut self, start: usize, negative: bool) -> TemplateResult<MarkupToken> {
        let mut end = start + 1;
        let mut is_float = false;
        if negative {
            if let Some((i, _)) = self.chars.next() {
                end = i + 1;
            }
        }
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.chars.next();
                end = i + 1;
            } else if c == '.' && !is_float && self.next_is_digit_after(i) {
                self.chars.next();
                is_float = true;
                end = i + 1;
            } else {
                break;
            }
        }

        let text = &self.source[start..end];
        let invalid = || {
            TemplateError::syntax(self.line, format!("Invalid number literal '{}'", text))
        };
        if is_float {
            text.parse().map(MarkupToken::Float).map_err(|_| invalid())
        } else {
            text.parse().map(MarkupToken::Int).map_err(|_| invalid())
        }
    }

    // `1.5` is a float; `1..5` is a range.
    fn next_is_digit_after(&self, dot_index: usize) -> bool {
        self.source[dot_index + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn ident(&mut self, start: usize, first: char) -> MarkupToken {
        let mut end = start + first.len_utf8();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '?' {
                self.chars.next();
                end = i + c.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.source[start..end];
        if text == "contains" {
            MarkupToken::Compare(CompareOp::Contains)
        } else {
            MarkupToken::Ident(text.to_string())
        }
    }
}
