/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parser.
//!
//! Converts the token stream from [`crate::lexer`] into the template AST.
//! How forgiving the parser is depends on the [`ErrorMode`] reported by the
//! [`ParseContext`], which in turn depends on whether a partial is being
//! parsed at the moment.

use crate::ast::{
    Assign, Condition, Conditional, Expr, Filter, FilteredExpr, ForLoop, Include, Output,
    PartialName, Render, TemplateNode,
};
use crate::context::TemplateValue;
use crate::diagnostics::{CODE_UNKNOWN_TAG, Diagnostic};
use crate::error::{TemplateError, TemplateResult};
use crate::lexer::{MarkupLexer, MarkupToken, Token, tokenize};
use std::cell::Cell;

/// How the parser treats markup it does not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Unknown tags and trailing markup are syntax errors.
    Strict,
    /// Unknown tags and trailing markup are dropped with a warning.
    Warn,
    /// Unknown tags and trailing markup are dropped silently.
    #[default]
    Lax,
}

impl ErrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorMode::Strict => "strict",
            ErrorMode::Warn => "warn",
            ErrorMode::Lax => "lax",
        }
    }
}

impl TryFrom<&str> for ErrorMode {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(ErrorMode::Strict),
            "warn" => Ok(ErrorMode::Warn),
            "lax" => Ok(ErrorMode::Lax),
            _ => Err(format!("Unknown error mode: {}", s)),
        }
    }
}

/// Parse options shared by every template parsed in a render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub error_mode: ErrorMode,
    /// Error mode used while a partial is being parsed. Falls back to `error_mode`.
    pub partial_error_mode: Option<ErrorMode>,
}

/// Parse-time configuration.
///
/// Besides the options, this carries the transient "currently parsing a
/// partial" indicator. The partial cache sets it around each partial parse
/// and restores the previous value afterwards.
#[derive(Debug, Default)]
pub struct ParseContext {
    options: ParseOptions,
    partial: Cell<bool>,
}

impl ParseContext {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            partial: Cell::new(false),
        }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Whether a partial is being parsed right now.
    pub fn is_partial(&self) -> bool {
        self.partial.get()
    }

    /// Set the partial indicator, returning its previous value.
    pub fn set_partial(&self, partial: bool) -> bool {
        self.partial.replace(partial)
    }

    /// The error mode in effect for the parse currently running.
    pub fn error_mode(&self) -> ErrorMode {
        match (self.is_partial(), self.options.partial_error_mode) {
            (true, Some(mode)) => mode,
            _ => self.options.error_mode,
        }
    }
}

/// A parsed template ready for rendering. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub(crate) nodes: Vec<TemplateNode>,
    pub(crate) name: Option<String>,
    pub(crate) warnings: Vec<Diagnostic>,
}

impl Template {
    /// Parse a template with default (lax) options.
    pub fn compile(source: &str) -> TemplateResult<Self> {
        Self::parse(source, &ParseContext::default())
    }

    /// Parse an anonymous template.
    pub fn parse(source: &str, context: &ParseContext) -> TemplateResult<Self> {
        let mut parser = Parser::new(context);
        let nodes = parser.parse_document(tokenize(source)?)?;
        Ok(Template {
            nodes,
            name: None,
            warnings: parser.warnings,
        })
    }

    /// Parse a template that is known under `name`.
    ///
    /// Syntax errors and warnings are attributed to `name`.
    pub fn parse_named(name: &str, source: &str, context: &ParseContext) -> TemplateResult<Self> {
        let mut template =
            Self::parse(source, context).map_err(|e| e.with_template_name(name))?;
        template.name = Some(name.to_string());
        for warning in &mut template.warnings {
            warning.template_name = Some(name.to_string());
        }
        Ok(template)
    }

    /// Get the AST nodes of this template.
    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// The name this template was loaded under, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Warnings produced while parsing.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }
}

/// Names of tags that close or split a block.
const DELIMITER_TAGS: &[&str] = &[
    "else",
    "elsif",
    "endif",
    "endunless",
    "endfor",
    "endcomment",
];

/// The tag that ended a block.
struct BlockEnd {
    tag: String,
    markup: String,
    line: usize,
}

struct Parser<'a> {
    context: &'a ParseContext,
    warnings: Vec<Diagnostic>,
    tokens: std::vec::IntoIter<Token>,
}

impl<'a> Parser<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self {
            context,
            warnings: Vec::new(),
            tokens: Vec::new().into_iter(),
        }
    }

    fn parse_document(&mut self, tokens: Vec<Token>) -> TemplateResult<Vec<TemplateNode>> {
        self.tokens = tokens.into_iter();
        let (nodes, end) = self.parse_block(&[])?;
        match end {
            None => Ok(nodes),
            Some(end) => Err(TemplateError::syntax(
                end.line,
                format!("Unexpected tag '{}'", end.tag),
            )),
        }
    }

    /// Parse nodes until one of `delimiters` (or end of input).
    fn parse_block(
        &mut self,
        delimiters: &[&str],
    ) -> TemplateResult<(Vec<TemplateNode>, Option<BlockEnd>)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(TemplateNode::Text(text)),
                Token::Output { markup, line } => {
                    let mut m = self.markup(&markup, line)?;
                    let value = m.filtered_expr()?;
                    self.finish(&m, "output")?;
                    nodes.push(TemplateNode::Output(Output { value, line }));
                }
                Token::Tag { markup, line } => {
                    let (tag, rest) = split_tag(&markup);
                    if DELIMITER_TAGS.contains(&tag) {
                        if delimiters.contains(&tag) {
                            return Ok((
                                nodes,
                                Some(BlockEnd {
                                    tag: tag.to_string(),
                                    markup: rest.to_string(),
                                    line,
                                }),
                            ));
                        }
                        return Err(TemplateError::syntax(
                            line,
                            format!("Unexpected tag '{}'", tag),
                        ));
                    }
                    if let Some(node) = self.parse_tag(tag, rest, line)? {
                        nodes.push(node);
                    }
                }
            }
        }

        Ok((nodes, None))
    }

    fn parse_tag(
        &mut self,
        tag: &str,
        rest: &str,
        line: usize,
    ) -> TemplateResult<Option<TemplateNode>> {
        let node = match tag {
            "assign" => TemplateNode::Assign(self.parse_assign(rest, line)?),
            "if" => TemplateNode::Conditional(self.parse_conditional(rest, line, false)?),
            "unless" => TemplateNode::Conditional(self.parse_conditional(rest, line, true)?),
            "for" => TemplateNode::ForLoop(self.parse_for(rest, line)?),
            "break" => TemplateNode::Break,
            "continue" => TemplateNode::Continue,
            "comment" => {
                self.skip_comment(line)?;
                return Ok(None);
            }
            "include" => TemplateNode::Include(self.parse_include(rest, line)?),
            "render" => TemplateNode::Render(self.parse_render(rest, line)?),
            unknown => {
                self.lenient(line, format!("Unknown tag '{}'", unknown))?;
                return Ok(None);
            }
        };
        Ok(Some(node))
    }

    fn parse_assign(&mut self, rest: &str, line: usize) -> TemplateResult<Assign> {
        let mut m = self.markup(rest, line)?;
        let name = m.ident("variable name after 'assign'")?;
        m.expect(&MarkupToken::Assign, "'=' in assign")?;
        let value = m.filtered_expr()?;
        self.finish(&m, "assign")?;
        Ok(Assign { name, value, line })
    }

    fn parse_conditional(
        &mut self,
        rest: &str,
        line: usize,
        negate: bool,
    ) -> TemplateResult<Conditional> {
        let open = if negate { "unless" } else { "if" };
        let close = if negate { "endunless" } else { "endif" };

        let mut branches = Vec::new();
        let mut else_branch = None;
        let mut condition = self.condition(rest, line)?;

        loop {
            let (body, end) = self.parse_block(&["elsif", "else", close])?;
            let Some(end) = end else {
                return Err(never_closed(open, line));
            };
            match end.tag.as_str() {
                "elsif" => {
                    branches.push((condition, body));
                    condition = self.condition(&end.markup, end.line)?;
                }
                "else" => {
                    branches.push((condition, body));
                    let (body, end) = self.parse_block(&[close])?;
                    if end.is_none() {
                        return Err(never_closed(open, line));
                    }
                    else_branch = Some(body);
                    break;
                }
                _ => {
                    branches.push((condition, body));
                    break;
                }
            }
        }

        Ok(Conditional {
            branches,
            else_branch,
            negate,
        })
    }

    fn parse_for(&mut self, rest: &str, line: usize) -> TemplateResult<ForLoop> {
        let mut m = self.markup(rest, line)?;
        let var = m.ident("loop variable after 'for'")?;
        match m.next() {
            Some(MarkupToken::Ident(kw)) if kw == "in" => {}
            _ => return Err(m.error("Expected 'in' in for loop")),
        }
        let collection = m.expr()?;
        self.finish(&m, "for")?;

        let (body, end) = self.parse_block(&["else", "endfor"])?;
        let Some(end) = end else {
            return Err(never_closed("for", line));
        };
        let else_branch = if end.tag == "else" {
            let (body, end) = self.parse_block(&["endfor"])?;
            if end.is_none() {
                return Err(never_closed("for", line));
            }
            Some(body)
        } else {
            None
        };

        Ok(ForLoop {
            var,
            collection,
            body,
            else_branch,
        })
    }

    fn skip_comment(&mut self, line: usize) -> TemplateResult<()> {
        let mut depth = 1;
        for token in self.tokens.by_ref() {
            if let Token::Tag { markup, .. } = token {
                match split_tag(&markup).0 {
                    "comment" => depth += 1,
                    "endcomment" => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(());
                        }
                    }
                    _ => {}
                }
            }
        }
        Err(never_closed("comment", line))
    }

    fn parse_include(&mut self, rest: &str, line: usize) -> TemplateResult<Include> {
        let mut m = self.markup(rest, line)?;
        let name = match m.expr()? {
            Expr::Literal(TemplateValue::String(name)) => PartialName::Literal(name),
            other => PartialName::Dynamic(other),
        };
        let args = m.named_args()?;
        self.finish(&m, "include")?;
        Ok(Include { name, args, line })
    }

    fn parse_render(&mut self, rest: &str, line: usize) -> TemplateResult<Render> {
        let mut m = self.markup(rest, line)?;
        let name = match m.next() {
            Some(MarkupToken::Str(name)) => name,
            _ => {
                return Err(TemplateError::syntax(
                    line,
                    "Template name in 'render' must be a quoted string",
                ));
            }
        };
        let args = m.named_args()?;
        self.finish(&m, "render")?;
        Ok(Render { name, args, line })
    }

    fn condition(&mut self, markup: &str, line: usize) -> TemplateResult<Condition> {
        let mut m = self.markup(markup, line)?;
        let condition = m.condition()?;
        self.finish(&m, "condition")?;
        Ok(condition)
    }

    fn markup(&self, markup: &str, line: usize) -> TemplateResult<MarkupParser> {
        Ok(MarkupParser {
            tokens: MarkupLexer::new(markup, line).tokens()?,
            pos: 0,
            line,
        })
    }

    /// Report markup left over after a complete tag.
    fn finish(&mut self, m: &MarkupParser, what: &str) -> TemplateResult<()> {
        if m.at_end() {
            return Ok(());
        }
        self.lenient(m.line, format!("Unexpected trailing markup in {}", what))
    }

    /// Fail, warn or ignore depending on the active error mode.
    fn lenient(&mut self, line: usize, message: String) -> TemplateResult<()> {
        match self.context.error_mode() {
            ErrorMode::Strict => Err(TemplateError::syntax(line, message)),
            ErrorMode::Warn => {
                self.warnings.push(
                    Diagnostic::warning(message)
                        .with_line(line)
                        .with_code(CODE_UNKNOWN_TAG),
                );
                Ok(())
            }
            ErrorMode::Lax => Ok(()),
        }
    }
}

fn split_tag(markup: &str) -> (&str, &str) {
    match markup.split_once(char::is_whitespace) {
        Some((tag, rest)) => (tag, rest.trim()),
        None => (markup, ""),
    }
}

fn never_closed(tag: &str, line: usize) -> TemplateError {
    TemplateError::syntax(line, format!("'{}' tag was never closed", tag))
}

/// Recursive-descent parser over the tokens of one tag's markup.
struct MarkupParser {
    tokens: Vec<MarkupToken>,
    pos: usize,
    line: usize,
}

impl MarkupParser {
    fn peek(&self) -> Option<&MarkupToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<MarkupToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &MarkupToken) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &MarkupToken, what: &str) -> TemplateResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("Expected {}", what)))
        }
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::syntax(self.line, message)
    }

    fn ident(&mut self, what: &str) -> TemplateResult<String> {
        match self.next() {
            Some(MarkupToken::Ident(name)) => Ok(name),
            _ => Err(self.error(format!("Expected {}", what))),
        }
    }

    fn filtered_expr(&mut self) -> TemplateResult<FilteredExpr> {
        let expr = self.expr()?;
        let mut filters = Vec::new();
        while self.eat(&MarkupToken::Pipe) {
            let name = self.ident("filter name after '|'")?;
            let mut args = Vec::new();
            if self.eat(&MarkupToken::Colon) {
                args.push(self.expr()?);
                while self.eat(&MarkupToken::Comma) {
                    args.push(self.expr()?);
                }
            }
            filters.push(Filter { name, args });
        }
        Ok(FilteredExpr { expr, filters })
    }

    fn expr(&mut self) -> TemplateResult<Expr> {
        match self.next() {
            Some(MarkupToken::Str(s)) => Ok(Expr::Literal(TemplateValue::String(s))),
            Some(MarkupToken::Int(i)) => Ok(Expr::Literal(TemplateValue::Int(i))),
            Some(MarkupToken::Float(f)) => Ok(Expr::Literal(TemplateValue::Float(f))),
            Some(MarkupToken::LParen) => {
                let start = self.expr()?;
                self.expect(&MarkupToken::DotDot, "'..' in range")?;
                let end = self.expr()?;
                self.expect(&MarkupToken::RParen, "')' closing range")?;
                Ok(Expr::Range(Box::new(start), Box::new(end)))
            }
            Some(MarkupToken::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(TemplateValue::Bool(true))),
                "false" => Ok(Expr::Literal(TemplateValue::Bool(false))),
                "nil" | "null" => Ok(Expr::Literal(TemplateValue::Nil)),
                _ => self.variable_path(name),
            },
            Some(other) => Err(self.error(format!("Unexpected token {:?}", other))),
            None => Err(self.error("Expected an expression")),
        }
    }

    fn variable_path(&mut self, first: String) -> TemplateResult<Expr> {
        let mut path = vec![first];
        loop {
            if self.eat(&MarkupToken::Dot) {
                path.push(self.ident("field name after '.'")?);
            } else if self.eat(&MarkupToken::LBracket) {
                let key = match self.next() {
                    Some(MarkupToken::Int(i)) => i.to_string(),
                    Some(MarkupToken::Str(s)) => s,
                    _ => return Err(self.error("Expected index or key inside '[]'")),
                };
                self.expect(&MarkupToken::RBracket, "']'")?;
                path.push(key);
            } else {
                return Ok(Expr::Variable(path));
            }
        }
    }

    /// `a == b and c or d`, grouped right to left as in Liquid.
    fn condition(&mut self) -> TemplateResult<Condition> {
        let left = self.expr()?;
        let mut condition = match self.peek() {
            Some(MarkupToken::Compare(op)) => {
                let op = *op;
                self.pos += 1;
                Condition::Compare(left, op, self.expr()?)
            }
            _ => Condition::Truthy(left),
        };

        if let Some(MarkupToken::Ident(kw)) = self.peek() {
            let is_and = kw == "and";
            if is_and || kw == "or" {
                self.pos += 1;
                let right = Box::new(self.condition()?);
                condition = if is_and {
                    Condition::And(Box::new(condition), right)
                } else {
                    Condition::Or(Box::new(condition), right)
                };
            }
        }
        Ok(condition)
    }

    /// `, key: expr, key: expr` (leading comma optional).
    fn named_args(&mut self) -> TemplateResult<Vec<(String, Expr)>> {
        let mut args = Vec::new();
        loop {
            self.eat(&MarkupToken::Comma);
            let Some(MarkupToken::Ident(_)) = self.peek() else {
                return Ok(args);
            };
            if self.tokens.get(self.pos + 1) != Some(&MarkupToken::Colon) {
                return Ok(args);
            }
            let key = self.ident("argument name")?;
            self.pos += 1;
            args.push((key, self.expr()?));
        }
    }
}
