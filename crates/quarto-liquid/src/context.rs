/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template value and variable scope types.
//!
//! Values follow Liquid semantics: only `nil` and `false` are falsy, and
//! untrusted strings are tracked so the evaluator can report them when they
//! reach the output unescaped.

use std::collections::HashMap;
use std::fmt::Write as _;

/// A value that can be used in template evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TemplateValue {
    /// A null/missing value.
    #[default]
    Nil,

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating point value.
    Float(f64),

    /// A string value.
    String(String),

    /// A string from an untrusted origin. Must be escaped before output.
    Untrusted(String),

    /// A list of values.
    List(Vec<TemplateValue>),

    /// A map of string keys to values.
    Map(HashMap<String, TemplateValue>),
}

impl TemplateValue {
    /// Truthiness rules (matching Liquid): only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, TemplateValue::Nil | TemplateValue::Bool(false))
    }

    /// Whether this value, or anything nested in it, is untrusted.
    pub fn is_tainted(&self) -> bool {
        match self {
            TemplateValue::Untrusted(_) => true,
            TemplateValue::List(items) => items.iter().any(|v| v.is_tainted()),
            TemplateValue::Map(m) => m.values().any(|v| v.is_tainted()),
            _ => false,
        }
    }

    /// Mark every string in this value, however deeply nested, as untrusted.
    pub fn into_untrusted(self) -> Self {
        match self {
            TemplateValue::String(s) => TemplateValue::Untrusted(s),
            TemplateValue::List(items) => {
                TemplateValue::List(items.into_iter().map(Self::into_untrusted).collect())
            }
            TemplateValue::Map(m) => TemplateValue::Map(
                m.into_iter().map(|(k, v)| (k, v.into_untrusted())).collect(),
            ),
            other => other,
        }
    }

    /// Get a nested field by path.
    ///
    /// Maps are indexed by key. Lists accept numeric indices and the
    /// `size`, `first` and `last` pseudo-fields.
    pub fn get_path(&self, path: &[&str]) -> Option<&TemplateValue> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };

        let next = match self {
            TemplateValue::Map(m) => m.get(*first),
            TemplateValue::List(items) => match *first {
                "first" => items.first(),
                "last" => items.last(),
                index => index.parse::<usize>().ok().and_then(|i| items.get(i)),
            },
            _ => None,
        };
        next.and_then(|v| v.get_path(rest))
    }

    /// Lookup that also resolves computed properties such as `size`.
    pub fn get_path_owned(&self, path: &[&str]) -> Option<TemplateValue> {
        if let Some(found) = self.get_path(path) {
            return Some(found.clone());
        }
        let (last, init) = path.split_last()?;
        if *last != "size" {
            return None;
        }
        self.get_path(init).and_then(TemplateValue::size)
    }

    /// Length of strings, lists and maps.
    pub fn size(&self) -> Option<TemplateValue> {
        let len = match self {
            TemplateValue::String(s) | TemplateValue::Untrusted(s) => s.chars().count(),
            TemplateValue::List(items) => items.len(),
            TemplateValue::Map(m) => m.len(),
            _ => return None,
        };
        Some(TemplateValue::Int(len as i64))
    }

    /// Render this value as a string for output.
    ///
    /// - Nil: ""
    /// - Bool: "true" / "false"
    /// - List: concatenation of rendered elements
    /// - Map: key/value pairs, sorted by key
    pub fn render(&self) -> String {
        match self {
            TemplateValue::Nil => String::new(),
            TemplateValue::Bool(b) => b.to_string(),
            TemplateValue::Int(i) => i.to_string(),
            TemplateValue::Float(f) => format_float(*f),
            TemplateValue::String(s) | TemplateValue::Untrusted(s) => s.clone(),
            TemplateValue::List(items) => items.iter().map(|v| v.render()).collect(),
            TemplateValue::Map(m) => {
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                let mut out = String::new();
                for key in keys {
                    let _ = write!(out, "{}{}", key, m[key].render());
                }
                out
            }
        }
    }

    /// Borrow the string payload, trusted or not.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TemplateValue::String(s) | TemplateValue::Untrusted(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TemplateValue::Int(i) => Some(*i as f64),
            TemplateValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::String(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::String(s)
    }
}

impl From<bool> for TemplateValue {
    fn from(b: bool) -> Self {
        TemplateValue::Bool(b)
    }
}

impl From<i64> for TemplateValue {
    fn from(i: i64) -> Self {
        TemplateValue::Int(i)
    }
}

impl From<serde_json::Value> for TemplateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TemplateValue::Nil,
            serde_json::Value::Bool(b) => TemplateValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => TemplateValue::Int(i),
                None => TemplateValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => TemplateValue::String(s),
            serde_json::Value::Array(items) => {
                TemplateValue::List(items.into_iter().map(TemplateValue::from).collect())
            }
            serde_json::Value::Object(map) => TemplateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, TemplateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Variable bindings for one template scope.
///
/// Frames are pushed for loop bodies. `assign` always writes to the
/// outermost frame, so assignments made inside a loop (or an `include`d
/// partial sharing this context) stay visible afterwards.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    frames: Vec<HashMap<String, TemplateValue>>,
}

impl Default for TemplateContext {
    fn default() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }
}

impl TemplateContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object. Non-object values yield an empty context.
    pub fn from_json(value: serde_json::Value) -> Self {
        let mut ctx = Self::new();
        if let serde_json::Value::Object(map) = value {
            for (key, value) in map {
                ctx.insert(key, TemplateValue::from(value));
            }
        }
        ctx
    }

    /// Like [`TemplateContext::from_json`], with every string marked untrusted.
    pub fn from_untrusted_json(value: serde_json::Value) -> Self {
        let mut ctx = Self::new();
        if let serde_json::Value::Object(map) = value {
            for (key, value) in map {
                ctx.insert(key, TemplateValue::from(value).into_untrusted());
            }
        }
        ctx
    }

    /// Insert a variable into the outermost frame.
    pub fn insert(&mut self, key: impl Into<String>, value: TemplateValue) {
        self.frames[0].insert(key.into(), value);
    }

    /// Bind a variable in the innermost frame only.
    pub fn insert_local(&mut self, key: impl Into<String>, value: TemplateValue) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(key.into(), value);
        }
    }

    /// Get a variable, innermost frame first.
    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        self.frames.iter().rev().find_map(|frame| frame.get(key))
    }

    /// Get a variable by path (e.g., `["product", "title"]`).
    pub fn get_path(&self, path: &[&str]) -> Option<TemplateValue> {
        let (first, rest) = path.split_first()?;
        self.get(first).and_then(|v| v.get_path_owned(rest))
    }

    /// Run `f` with a fresh innermost frame that is dropped afterwards.
    pub fn with_frame<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.frames.push(HashMap::new());
        let result = f(self);
        self.frames.pop();
        result
    }
}
