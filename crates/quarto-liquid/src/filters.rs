/*
 * filters.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in output filters.
//!
//! String filters keep the taint of their input: upcasing an untrusted
//! string yields an untrusted string. Only `escape` produces trusted output.

use crate::context::TemplateValue;
use crate::error::{TemplateError, TemplateResult};

/// Apply the filter `name` to `input`.
pub fn apply_filter(
    name: &str,
    input: TemplateValue,
    args: &[TemplateValue],
) -> TemplateResult<TemplateValue> {
    let value = match name {
        "upcase" => map_str(input, |s| s.to_uppercase()),
        "downcase" => map_str(input, |s| s.to_lowercase()),
        "capitalize" => map_str(input, capitalize),
        "strip" => map_str(input, |s| s.trim().to_string()),
        "escape" | "h" => TemplateValue::String(escape_html(&input.render())),
        "append" => concat(input, arg(name, args, 0)?, false),
        "prepend" => concat(input, arg(name, args, 0)?, true),
        "default" => {
            let fallback = arg(name, args, 0)?;
            if is_blank(&input) {
                fallback.clone()
            } else {
                input
            }
        }
        "size" => input.size().unwrap_or(TemplateValue::Int(0)),
        "first" => match input {
            TemplateValue::List(items) => items.into_iter().next().unwrap_or_default(),
            _ => TemplateValue::Nil,
        },
        "last" => match input {
            TemplateValue::List(items) => items.into_iter().next_back().unwrap_or_default(),
            _ => TemplateValue::Nil,
        },
        "join" => {
            let sep = match args.first() {
                Some(sep) => sep.render(),
                None => " ".to_string(),
            };
            match input {
                TemplateValue::List(items) => {
                    let tainted = items.iter().any(|v| v.is_tainted());
                    let joined = items
                        .iter()
                        .map(|v| v.render())
                        .collect::<Vec<_>>()
                        .join(&sep);
                    wrap(joined, tainted)
                }
                other => other,
            }
        }
        "plus" => arithmetic(name, input, arg(name, args, 0)?, i64::checked_add, |a, b| a + b)?,
        "minus" => arithmetic(name, input, arg(name, args, 0)?, i64::checked_sub, |a, b| a - b)?,
        unknown => {
            return Err(TemplateError::unknown_filter(unknown));
        }
    };
    Ok(value)
}

fn arg<'a>(filter: &str, args: &'a [TemplateValue], index: usize) -> TemplateResult<&'a TemplateValue> {
    args.get(index).ok_or_else(|| {
        TemplateError::invalid_filter_args(
            filter,
            format!("expected at least {} argument(s)", index + 1),
        )
    })
}

fn wrap(s: String, tainted: bool) -> TemplateValue {
    if tainted {
        TemplateValue::Untrusted(s)
    } else {
        TemplateValue::String(s)
    }
}

fn map_str(input: TemplateValue, f: impl Fn(&str) -> String) -> TemplateValue {
    match input {
        TemplateValue::Untrusted(s) => TemplateValue::Untrusted(f(&s)),
        TemplateValue::Nil => TemplateValue::Nil,
        other => TemplateValue::String(f(&other.render())),
    }
}

fn concat(input: TemplateValue, other: &TemplateValue, prepend: bool) -> TemplateValue {
    let tainted = input.is_tainted() || other.is_tainted();
    let (a, b) = (input.render(), other.render());
    let joined = if prepend { b + &a } else { a + &b };
    wrap(joined, tainted)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_blank(value: &TemplateValue) -> bool {
    match value {
        TemplateValue::Nil | TemplateValue::Bool(false) => true,
        TemplateValue::String(s) | TemplateValue::Untrusted(s) => s.is_empty(),
        TemplateValue::List(items) => items.is_empty(),
        TemplateValue::Map(m) => m.is_empty(),
        _ => false,
    }
}

fn arithmetic(
    filter: &str,
    input: TemplateValue,
    other: &TemplateValue,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> TemplateResult<TemplateValue> {
    match (&input, other) {
        (TemplateValue::Int(a), TemplateValue::Int(b)) => int_op(*a, *b)
            .map(TemplateValue::Int)
            .ok_or_else(|| {
                TemplateError::invalid_filter_args(
                    filter,
                    format!("integer overflow computing {} {} {}", a, filter, b),
                )
            }),
        _ => match (input.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Ok(TemplateValue::Float(float_op(a, b))),
            _ => Err(TemplateError::invalid_filter_args(filter, "expected numbers")),
        },
    }
}

/// Escape `&`, `<`, `>`, `"` and `'` for HTML output.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
