/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Liquid-style template engine for Quarto.
//!
//! This crate implements a subset of the [Liquid](https://shopify.github.io/liquid/)
//! template language:
//!
//! - Output: `{{ product.title | upcase }}`
//! - Variables: `{% assign x = 'value' %}`
//! - Conditionals: `{% if %}`, `{% elsif %}`, `{% else %}`, `{% unless %}`
//! - Loops: `{% for x in items %}`, `{% break %}`, `{% continue %}`
//! - Partials: `{% include 'name' %}` and `{% render 'name', key: value %}`
//! - Comments and whitespace control: `{% comment %}`, `{%-` / `-%}`
//!
//! # Partials and render passes
//!
//! Every top-level render runs in a [`RenderPass`]. The pass owns the
//! source reader resolved for that render, the parsed partials, and the
//! nesting depth. [`PartialCache`] is a handle onto that state: within a
//! pass each partial is read and parsed once, however many times it is
//! included. Nothing is shared between passes.
//!
//! # Example
//!
//! ```ignore
//! use quarto_liquid::{Engine, EngineConfig, TemplateContext};
//!
//! let config = EngineConfig {
//!     template_dir: Some("_includes".into()),
//!     ..EngineConfig::default()
//! };
//! let engine = Engine::new(config);
//!
//! let rendered = engine.render_str(
//!     "{% render 'card', title: page.title %}",
//!     TemplateContext::from_json(serde_json::json!({ "page": { "title": "Home" } })),
//! )?;
//! println!("{}", rendered.output);
//! ```

pub mod ast;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod filters;
pub mod lexer;
pub mod parser;
pub mod partial_cache;
pub mod render_pass;
pub mod source;

// Re-export main types at crate root
pub use ast::TemplateNode;
pub use config::EngineConfig;
pub use context::{TemplateContext, TemplateValue};
pub use diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind};
pub use engine::{Engine, Rendered};
pub use error::{TemplateError, TemplateResult};
pub use evaluator::RenderState;
pub use parser::{ErrorMode, ParseContext, ParseOptions, Template};
pub use partial_cache::PartialCache;
pub use render_pass::{DEFAULT_MAX_DEPTH, DepthGuard, MAX_DEPTH_LIMIT, RenderPass, TaintMode};
pub use source::{BlankReader, DefaultReader, FileSystemReader, MemoryReader, SourceReader};
