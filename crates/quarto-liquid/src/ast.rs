/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Abstract syntax tree for parsed templates.

use crate::context::TemplateValue;
use crate::lexer::CompareOp;

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Literal text.
    Text(String),

    /// `{{ expr | filter }}`
    Output(Output),

    /// `{% assign name = expr %}`
    Assign(Assign),

    /// `{% if %}` / `{% unless %}`
    Conditional(Conditional),

    /// `{% for x in expr %}`
    ForLoop(ForLoop),

    /// `{% break %}`
    Break,

    /// `{% continue %}`
    Continue,

    /// `{% include %}`: renders a partial in the caller's scope.
    Include(Include),

    /// `{% render %}`: renders a partial in an isolated scope.
    Render(Render),
}

/// An expression with an optional filter chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredExpr {
    pub expr: Expr,
    pub filters: Vec<Filter>,
}

/// A filter application: `| name: arg, arg`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub name: String,
    pub args: Vec<Expr>,
}

/// A value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(TemplateValue),

    /// A variable lookup: `product.title`, `items[0]`.
    Variable(Vec<String>),

    /// An integer range: `(1..3)`.
    Range(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Dotted name for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Expr::Literal(value) => value.render(),
            Expr::Variable(path) => path.join("."),
            Expr::Range(start, end) => format!("({}..{})", start.describe(), end.describe()),
        }
    }
}

/// Output node.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: FilteredExpr,
    pub line: usize,
}

/// Assignment node.
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub name: String,
    pub value: FilteredExpr,
    pub line: usize,
}

/// A boolean condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Truthiness of a single expression.
    Truthy(Expr),

    /// Binary comparison.
    Compare(Expr, CompareOp, Expr),

    And(Box<Condition>, Box<Condition>),

    Or(Box<Condition>, Box<Condition>),
}

/// Conditional node.
///
/// `unless` is represented with `negate` set on the first branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub branches: Vec<(Condition, Vec<TemplateNode>)>,
    pub else_branch: Option<Vec<TemplateNode>>,
    pub negate: bool,
}

/// For loop node.
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub var: String,
    pub collection: Expr,
    pub body: Vec<TemplateNode>,
    pub else_branch: Option<Vec<TemplateNode>>,
}

/// How the partial's name is given.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialName {
    /// A quoted string.
    Literal(String),

    /// Any other expression, evaluated at render time (`include` only).
    Dynamic(Expr),
}

/// `{% include name, key: value %}`
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub name: PartialName,
    pub args: Vec<(String, Expr)>,
    pub line: usize,
}

/// `{% render 'name', key: value %}`
#[derive(Debug, Clone, PartialEq)]
pub struct Render {
    pub name: String,
    pub args: Vec<(String, Expr)>,
    pub line: usize,
}
