/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template evaluation engine.
//!
//! Renders a parsed [`Template`] against a [`TemplateContext`]. Partials are
//! loaded through the pass's [`PartialCache`] by two tags:
//!
//! - `include` renders the partial in the caller's scope. Assignments leak
//!   back out and `break`/`continue` reach an enclosing loop.
//! - `render` renders the partial in a fresh scope holding only the named
//!   arguments. Nothing leaks in either direction.
//!
//! Both go through [`RenderPass::enter_partial`], so they share one
//! recursion limit.

use crate::ast::{
    Condition, Conditional, Expr, FilteredExpr, ForLoop, Include, Output, PartialName, Render,
    TemplateNode,
};
use crate::context::{TemplateContext, TemplateValue};
use crate::diagnostics::{CODE_TAINTED, CODE_UNKNOWN_FILTER, Diagnostic, DiagnosticKind};
use crate::error::{TemplateError, TemplateResult};
use crate::filters::apply_filter;
use crate::lexer::CompareOp;
use crate::parser::{ParseContext, Template};
use crate::partial_cache::PartialCache;
use crate::render_pass::{RenderPass, TaintMode};
use std::collections::HashMap;

/// Everything a render needs besides the variables.
#[derive(Debug, Clone, Copy)]
pub struct RenderState<'a> {
    pub pass: &'a RenderPass,
    /// Parse configuration used for partials loaded during the render.
    pub parse_context: &'a ParseContext,
    /// Name of the template being rendered (`None` for the root template).
    pub template_name: Option<&'a str>,
}

impl<'a> RenderState<'a> {
    pub fn new(pass: &'a RenderPass, parse_context: &'a ParseContext) -> Self {
        Self {
            pass,
            parse_context,
            template_name: None,
        }
    }

    fn partials(&self) -> PartialCache<'a> {
        PartialCache::bind(self.pass, self.parse_context)
    }

    fn diagnostic(&self, kind: DiagnosticKind, error: &TemplateError, code: &str, line: Option<usize>) {
        let mut diagnostic = Diagnostic::from_error(kind, error)
            .with_code(code)
            .with_template_name(self.template_name);
        diagnostic.line = line;
        self.pass.push_diagnostic(diagnostic);
    }
}

/// Control flow signal from a rendered node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

impl Template {
    /// Render this template.
    ///
    /// `context` is mutated by `assign` tags. Non-fatal problems are
    /// recorded in the pass diagnostics; errors abort the render.
    pub fn render(
        &self,
        state: &RenderState<'_>,
        context: &mut TemplateContext,
    ) -> TemplateResult<String> {
        let state = RenderState {
            template_name: self.name().or(state.template_name),
            ..*state
        };
        let mut out = String::new();
        render_nodes(&self.nodes, &state, context, &mut out).map_err(|e| {
            match state.template_name {
                Some(name) => e.with_template_name(name),
                None => e,
            }
        })?;
        Ok(out)
    }
}

fn render_nodes(
    nodes: &[TemplateNode],
    state: &RenderState<'_>,
    context: &mut TemplateContext,
    out: &mut String,
) -> TemplateResult<Flow> {
    for node in nodes {
        let flow = render_node(node, state, context, out)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn render_node(
    node: &TemplateNode,
    state: &RenderState<'_>,
    context: &mut TemplateContext,
    out: &mut String,
) -> TemplateResult<Flow> {
    match node {
        TemplateNode::Text(text) => out.push_str(text),
        TemplateNode::Output(output) => render_output(output, state, context, out)?,
        TemplateNode::Assign(assign) => {
            let value = eval_filtered(&assign.value, Some(assign.line), state, context)?;
            context.insert(assign.name.clone(), value);
        }
        TemplateNode::Conditional(cond) => return render_conditional(cond, state, context, out),
        TemplateNode::ForLoop(for_loop) => return render_for(for_loop, state, context, out),
        TemplateNode::Break => return Ok(Flow::Break),
        TemplateNode::Continue => return Ok(Flow::Continue),
        TemplateNode::Include(include) => return render_include(include, state, context, out),
        TemplateNode::Render(render) => render_isolated(render, state, context, out)?,
    }
    Ok(Flow::Normal)
}

fn render_output(
    output: &Output,
    state: &RenderState<'_>,
    context: &TemplateContext,
    out: &mut String,
) -> TemplateResult<()> {
    let value = eval_filtered(&output.value, Some(output.line), state, context)?;
    if !value.is_tainted() {
        out.push_str(&value.render());
        return Ok(());
    }

    let error = TemplateError::Tainted {
        template_name: state.template_name.map(str::to_string),
        variable: output.value.expr.describe(),
    };
    match state.pass.taint_mode() {
        TaintMode::Lax => out.push_str(&value.render()),
        TaintMode::Warn => {
            tracing::warn!(line = output.line, "{}", error);
            state.diagnostic(DiagnosticKind::Warning, &error, CODE_TAINTED, Some(output.line));
            out.push_str(&value.render());
        }
        TaintMode::Error => {
            state.diagnostic(DiagnosticKind::Error, &error, CODE_TAINTED, Some(output.line))
        }
    }
    Ok(())
}

fn render_conditional(
    cond: &Conditional,
    state: &RenderState<'_>,
    context: &mut TemplateContext,
    out: &mut String,
) -> TemplateResult<Flow> {
    for (i, (condition, body)) in cond.branches.iter().enumerate() {
        let mut matched = eval_condition(condition, context)?;
        if i == 0 && cond.negate {
            matched = !matched;
        }
        if matched {
            return render_nodes(body, state, context, out);
        }
    }

    match &cond.else_branch {
        Some(body) => render_nodes(body, state, context, out),
        None => Ok(Flow::Normal),
    }
}

/// The sequence a for loop walks over.
enum LoopItems {
    /// `len` integers counting up from `start`; `start + len - 1` never overflows.
    Range { start: i64, len: usize },
    List(Vec<TemplateValue>),
}

impl LoopItems {
    /// The inclusive range `start..end`, or an error if its length does not fit an `i64`.
    fn range(start: i64, end: i64) -> TemplateResult<Self> {
        let len = (i128::from(end) - i128::from(start) + 1).max(0);
        i64::try_from(len)
            .ok()
            .and_then(|len| usize::try_from(len).ok())
            .map(|len| LoopItems::Range { start, len })
            .ok_or_else(|| {
                TemplateError::evaluation(format!("Range ({}..{}) is too large", start, end))
            })
    }

    fn len(&self) -> usize {
        match self {
            LoopItems::Range { len, .. } => *len,
            LoopItems::List(items) => items.len(),
        }
    }

    fn get(&self, index: usize) -> TemplateValue {
        match self {
            // index < len, so the sum stays within start..=end.
            LoopItems::Range { start, .. } => TemplateValue::Int(start.wrapping_add(index as i64)),
            LoopItems::List(items) => items[index].clone(),
        }
    }
}

fn loop_items(collection: &Expr, context: &TemplateContext) -> TemplateResult<LoopItems> {
    if let Expr::Range(start, end) = collection {
        let (start, end) = eval_range_bounds(start, end, context)?;
        return LoopItems::range(start, end);
    }

    let items = match eval_expr(collection, context)? {
        TemplateValue::List(items) => items,
        TemplateValue::Map(map) => {
            // Maps iterate as sorted [key, value] pairs.
            let mut pairs: Vec<(String, TemplateValue)> = map.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs
                .into_iter()
                .map(|(k, v)| TemplateValue::List(vec![TemplateValue::String(k), v]))
                .collect()
        }
        value @ (TemplateValue::String(_) | TemplateValue::Untrusted(_)) => vec![value],
        _ => Vec::new(),
    };
    Ok(LoopItems::List(items))
}

fn forloop_object(index: usize, length: usize) -> TemplateValue {
    let mut map = HashMap::new();
    map.insert("index".to_string(), TemplateValue::Int(index as i64 + 1));
    map.insert("index0".to_string(), TemplateValue::Int(index as i64));
    map.insert("first".to_string(), TemplateValue::Bool(index == 0));
    map.insert("last".to_string(), TemplateValue::Bool(index + 1 == length));
    map.insert("length".to_string(), TemplateValue::Int(length as i64));
    TemplateValue::Map(map)
}

fn render_for(
    for_loop: &ForLoop,
    state: &RenderState<'_>,
    context: &mut TemplateContext,
    out: &mut String,
) -> TemplateResult<Flow> {
    let items = loop_items(&for_loop.collection, context)?;
    let length = items.len();

    if length == 0 {
        return match &for_loop.else_branch {
            Some(body) => render_nodes(body, state, context, out),
            None => Ok(Flow::Normal),
        };
    }

    context.with_frame(|ctx| -> TemplateResult<Flow> {
        for index in 0..length {
            ctx.insert_local(for_loop.var.clone(), items.get(index));
            ctx.insert_local("forloop", forloop_object(index, length));
            if render_nodes(&for_loop.body, state, ctx, out)? == Flow::Break {
                break;
            }
        }
        Ok(Flow::Normal)
    })
}

fn render_include(
    include: &Include,
    state: &RenderState<'_>,
    context: &mut TemplateContext,
    out: &mut String,
) -> TemplateResult<Flow> {
    let name = match &include.name {
        PartialName::Literal(name) => name.clone(),
        PartialName::Dynamic(expr) => match eval_expr(expr, context)? {
            TemplateValue::String(name) | TemplateValue::Untrusted(name) => name,
            other => {
                return Err(TemplateError::evaluation(format!(
                    "include name '{}' must evaluate to a string, got '{}' (line {})",
                    expr.describe(),
                    other.render(),
                    include.line
                )));
            }
        },
    };

    let _depth = state.pass.enter_partial(&name)?;
    let partial = state.partials().load(&name)?;
    let inner_state = RenderState {
        template_name: Some(name.as_str()),
        ..*state
    };

    let mut args = Vec::with_capacity(include.args.len());
    for (key, expr) in &include.args {
        args.push((key.clone(), eval_expr(expr, context)?));
    }

    context
        .with_frame(|ctx| {
            for (key, value) in args {
                ctx.insert_local(key, value);
            }
            render_nodes(partial.nodes(), &inner_state, ctx, out)
        })
        .map_err(|e| e.with_template_name(&name))
}

fn render_isolated(
    render: &Render,
    state: &RenderState<'_>,
    context: &TemplateContext,
    out: &mut String,
) -> TemplateResult<()> {
    let _depth = state.pass.enter_partial(&render.name)?;
    let partial = state.partials().load(&render.name)?;
    let inner_state = RenderState {
        template_name: Some(render.name.as_str()),
        ..*state
    };

    let mut scope = TemplateContext::new();
    for (key, expr) in &render.args {
        scope.insert(key.clone(), eval_expr(expr, context)?);
    }

    // Interrupts stop at the partial boundary.
    render_nodes(partial.nodes(), &inner_state, &mut scope, out)
        .map_err(|e| e.with_template_name(&render.name))?;
    Ok(())
}

fn eval_filtered(
    value: &FilteredExpr,
    line: Option<usize>,
    state: &RenderState<'_>,
    context: &TemplateContext,
) -> TemplateResult<TemplateValue> {
    let mut current = eval_expr(&value.expr, context)?;
    for filter in &value.filters {
        let args = filter
            .args
            .iter()
            .map(|arg| eval_expr(arg, context))
            .collect::<TemplateResult<Vec<_>>>()?;
        current = match apply_filter(&filter.name, current.clone(), &args) {
            Ok(result) => result,
            Err(error @ TemplateError::UnknownFilter { .. }) => {
                state.diagnostic(DiagnosticKind::Warning, &error, CODE_UNKNOWN_FILTER, line);
                current
            }
            Err(error) => return Err(error),
        };
    }
    Ok(current)
}

fn eval_expr(expr: &Expr, context: &TemplateContext) -> TemplateResult<TemplateValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(path) => {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            Ok(context.get_path(&path).unwrap_or_default())
        }
        Expr::Range(start, end) => {
            let (start, end) = eval_range_bounds(start, end, context)?;
            Ok(TemplateValue::String(format!("{}..{}", start, end)))
        }
    }
}

fn eval_range_bounds(
    start: &Expr,
    end: &Expr,
    context: &TemplateContext,
) -> TemplateResult<(i64, i64)> {
    let bound = |expr: &Expr| -> TemplateResult<i64> {
        match eval_expr(expr, context)? {
            TemplateValue::Int(i) => Ok(i),
            TemplateValue::Float(f) => Ok(f as i64),
            TemplateValue::String(s) => s.trim().parse().map_err(|_| range_error(expr)),
            _ => Err(range_error(expr)),
        }
    };
    Ok((bound(start)?, bound(end)?))
}

fn range_error(expr: &Expr) -> TemplateError {
    TemplateError::evaluation(format!(
        "Range bound '{}' is not an integer",
        expr.describe()
    ))
}

fn eval_condition(condition: &Condition, context: &TemplateContext) -> TemplateResult<bool> {
    match condition {
        Condition::Truthy(expr) => Ok(eval_expr(expr, context)?.is_truthy()),
        Condition::Compare(left, op, right) => {
            let left = eval_expr(left, context)?;
            let right = eval_expr(right, context)?;
            Ok(compare(&left, *op, &right))
        }
        Condition::And(left, right) => {
            Ok(eval_condition(left, context)? && eval_condition(right, context)?)
        }
        Condition::Or(left, right) => {
            Ok(eval_condition(left, context)? || eval_condition(right, context)?)
        }
    }
}

fn values_equal(left: &TemplateValue, right: &TemplateValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => match (left.as_str(), right.as_str()) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}

fn compare(left: &TemplateValue, op: CompareOp, right: &TemplateValue) -> bool {
    use std::cmp::Ordering;

    let ordering = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left.as_str(), right.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };

    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Contains => match left {
            TemplateValue::String(s) | TemplateValue::Untrusted(s) => {
                right.as_str().is_some_and(|needle| s.contains(needle))
            }
            TemplateValue::List(items) => items.iter().any(|item| values_equal(item, right)),
            TemplateValue::Map(map) => right.as_str().is_some_and(|key| map.contains_key(key)),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DefaultReader, MemoryReader};
    use std::sync::Arc;

    fn render_with(source: &str, vars: serde_json::Value, partials: &[(&str, &str)]) -> String {
        let pass = RenderPass::with_reader(Arc::new(MemoryReader::with_templates(
            partials.iter().copied(),
        )));
        let parse_context = ParseContext::default();
        let template = Template::parse(source, &parse_context).expect("template should parse");
        let mut context = TemplateContext::from_json(vars);
        template
            .render(&RenderState::new(&pass, &parse_context), &mut context)
            .expect("template should render")
    }

    fn render(source: &str, vars: serde_json::Value) -> String {
        render_with(source, vars, &[])
    }

    #[test]
    fn test_literal_text() {
        assert_eq!(render("Hello, world!", serde_json::json!({})), "Hello, world!");
    }

    #[test]
    fn test_variable_and_missing_variable() {
        let vars = serde_json::json!({ "name": "Alice" });
        assert_eq!(render("Hello, {{ name }}!", vars), "Hello, Alice!");
        assert_eq!(render("Hello, {{ name }}!", serde_json::json!({})), "Hello, !");
    }

    #[test]
    fn test_nested_variable() {
        let vars = serde_json::json!({ "employee": { "salary": 50000 } });
        assert_eq!(render("Salary: {{ employee.salary }}", vars), "Salary: 50000");
    }

    #[test]
    fn test_filters() {
        let vars = serde_json::json!({ "name": "alice" });
        assert_eq!(
            render("{{ name | capitalize | append: '!' }}", vars),
            "Alice!"
        );
    }

    #[test]
    fn test_unknown_filter_is_skipped_with_warning() {
        let pass = RenderPass::new(DefaultReader::default());
        let parse_context = ParseContext::default();
        let template = Template::compile("a\n{{ 'x' | frobnicate }}").unwrap();
        let output = template
            .render(
                &RenderState::new(&pass, &parse_context),
                &mut TemplateContext::new(),
            )
            .unwrap();
        assert_eq!(output, "a\nx");
        assert_eq!(pass.diagnostics().warnings().count(), 1);
        assert_eq!(pass.diagnostics().diagnostics()[0].line, Some(2));
    }

    #[test]
    fn test_assign() {
        assert_eq!(
            render("{% assign x = 'hi' | upcase %}{{ x }}", serde_json::json!({})),
            "HI"
        );
    }

    #[test]
    fn test_conditionals() {
        let vars = serde_json::json!({ "a": 1, "b": "x", "flag": false });
        assert_eq!(render("{% if a == 1 %}yes{% endif %}", vars.clone()), "yes");
        assert_eq!(
            render("{% if flag %}A{% elsif b == 'x' %}B{% else %}C{% endif %}", vars.clone()),
            "B"
        );
        assert_eq!(render("{% unless flag %}shown{% endunless %}", vars.clone()), "shown");
        assert_eq!(render("{% if a > 0 and b %}both{% endif %}", vars.clone()), "both");
        assert_eq!(render("{% if flag or a < 0 %}x{% else %}none{% endif %}", vars), "none");
    }

    #[test]
    fn test_contains() {
        let vars = serde_json::json!({ "tags": ["a", "b"], "title": "Hello" });
        assert_eq!(render("{% if tags contains 'b' %}y{% endif %}", vars.clone()), "y");
        assert_eq!(render("{% if title contains 'ell' %}y{% endif %}", vars), "y");
    }

    #[test]
    fn test_for_loop_over_list_and_range() {
        let vars = serde_json::json!({ "items": ["a", "b", "c"] });
        assert_eq!(
            render("{% for x in items %}{{ x }}{% unless forloop.last %}, {% endunless %}{% endfor %}", vars),
            "a, b, c"
        );
        assert_eq!(
            render("{% for i in (1..3) %}{{ forloop.index0 }}{{ i }}{% endfor %}", serde_json::json!({})),
            "011223"
        );
    }

    #[test]
    fn test_for_loop_else_and_break_continue() {
        let vars = serde_json::json!({ "items": [] });
        assert_eq!(render("{% for x in items %}x{% else %}empty{% endfor %}", vars), "empty");
        assert_eq!(
            render(
                "{% for i in (1..5) %}{% if i == 2 %}{% continue %}{% endif %}{% if i == 4 %}{% break %}{% endif %}{{ i }}{% endfor %}",
                serde_json::json!({})
            ),
            "13"
        );
    }

    #[test]
    fn test_range_at_integer_limits() {
        assert_eq!(
            render(
                "{% for i in (9223372036854775806..9223372036854775807) %}{{ i }};{% endfor %}",
                serde_json::json!({})
            ),
            "9223372036854775806;9223372036854775807;"
        );
        assert_eq!(
            render(
                "{% for i in (-9223372036854775807..-9223372036854775806) %}{{ forloop.index }}{% endfor %}",
                serde_json::json!({})
            ),
            "12"
        );
    }

    #[test]
    fn test_oversized_range_is_an_error() {
        let pass = RenderPass::new(DefaultReader::default());
        let parse_context = ParseContext::default();
        let template =
            Template::compile("{% for i in (-2..9223372036854775807) %}{% break %}{% endfor %}")
                .unwrap();
        let err = template
            .render(
                &RenderState::new(&pass, &parse_context),
                &mut TemplateContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TemplateError::Evaluation { .. }));
    }

    #[test]
    fn test_plus_overflow_is_an_error() {
        let pass = RenderPass::new(DefaultReader::default());
        let parse_context = ParseContext::default();
        let template = Template::compile("{{ 9223372036854775807 | plus: 1 }}").unwrap();
        let err = template
            .render(
                &RenderState::new(&pass, &parse_context),
                &mut TemplateContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidFilterArgs { .. }));
    }

    #[test]
    fn test_loop_variable_does_not_leak() {
        assert_eq!(
            render("{% for i in (1..2) %}{% endfor %}[{{ i }}]", serde_json::json!({})),
            "[]"
        );
    }

    #[test]
    fn test_include_shares_scope() {
        let output = render_with(
            "{% assign greeting = 'hi' %}{% include 'inner' %}{{ set_inside }}",
            serde_json::json!({}),
            &[("inner", "{{ greeting }} {% assign set_inside = 'leaked' %}")],
        );
        assert_eq!(output, "hi leaked");
    }

    #[test]
    fn test_include_with_dynamic_name_and_args() {
        let output = render_with(
            "{% assign which = 'card' %}{% include which, title: 'T' %}[{{ title }}]",
            serde_json::json!({}),
            &[("card", "<{{ title }}>")],
        );
        assert_eq!(output, "<T>[]");
    }

    #[test]
    fn test_include_break_reaches_loop() {
        let output = render_with(
            "{% for i in (1..3) %}{{ i }}{% include 'break' %}{{ i }}{% endfor %}",
            serde_json::json!({}),
            &[("break", "{% break %}")],
        );
        assert_eq!(output, "1");
    }

    #[test]
    fn test_include_non_string_name_is_error() {
        let pass = RenderPass::new(DefaultReader::default());
        let parse_context = ParseContext::default();
        let template = Template::compile("{% include 42 %}").unwrap();
        let err = template
            .render(
                &RenderState::new(&pass, &parse_context),
                &mut TemplateContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TemplateError::Evaluation { .. }));
    }

    #[test]
    fn test_compare_numbers_across_types() {
        assert!(compare(&TemplateValue::Int(2), CompareOp::Eq, &TemplateValue::Float(2.0)));
        assert!(compare(&TemplateValue::Int(1), CompareOp::Lt, &TemplateValue::Float(1.5)));
        assert!(!compare(&TemplateValue::Nil, CompareOp::Gt, &TemplateValue::Int(0)));
        assert!(compare(&TemplateValue::from("a"), CompareOp::Le, &TemplateValue::from("b")));
    }
}
