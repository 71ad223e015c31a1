/*
 * render_tag_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Scope, control flow and taint behavior of the include and render tags.
 */

use pretty_assertions::assert_eq;
use quarto_liquid::{
    DefaultReader, DiagnosticKind, Engine, EngineConfig, MemoryReader, Rendered, TaintMode,
    TemplateContext, TemplateError,
};
use std::sync::Arc;

fn engine_with(config: EngineConfig, partials: &[(&str, &str)]) -> Engine {
    let reader = MemoryReader::with_templates(partials.iter().copied());
    Engine::with_default_reader(config, DefaultReader::shared(Arc::new(reader)))
}

fn render(source: &str, vars: serde_json::Value, partials: &[(&str, &str)]) -> Rendered {
    engine_with(EngineConfig::default(), partials)
        .render_str(source, TemplateContext::from_json(vars))
        .unwrap()
}

#[test]
fn test_render_does_not_inherit_scope() {
    let rendered = render(
        "{% assign secret = 'outer' %}{% render 'product' %}",
        serde_json::json!({ "product": "outer product" }),
        &[("product", "[{{ product }}|{{ secret }}]")],
    );
    assert_eq!(rendered.output, "[|]");
}

#[test]
fn test_render_passes_named_arguments() {
    let rendered = render(
        "{% render 'card', title: page.title, count: 3 %}",
        serde_json::json!({ "page": { "title": "Home" } }),
        &[("card", "{{ title }}:{{ count }}")],
    );
    assert_eq!(rendered.output, "Home:3");
}

#[test]
fn test_render_does_not_mutate_parent_scope() {
    let rendered = render(
        "{% assign x = 'parent' %}{% render 'set' %}{{ x }}",
        serde_json::json!({}),
        &[("set", "{% assign x = 'child' %}{{ x }} ")],
    );
    assert_eq!(rendered.output, "child parent");
}

#[test]
fn test_include_inherits_and_mutates_scope() {
    let rendered = render(
        "{% assign x = 'parent' %}{% include 'set' %}{{ x }}",
        serde_json::json!({ "name": "Ada" }),
        &[("set", "{{ name }}:{{ x }} {% assign x = 'child' %}")],
    );
    assert_eq!(rendered.output, "Ada:parent child");
}

#[test]
fn test_break_does_not_escape_render() {
    let rendered = render(
        "{% for i in (1..3) %}{{ i }}{% render 'break' %}{{ i }}{% endfor %}",
        serde_json::json!({}),
        &[("break", "{% break %}")],
    );
    assert_eq!(rendered.output, "112233");
}

#[test]
fn test_continue_escapes_include() {
    let rendered = render(
        "{% for i in (1..3) %}{{ i }}{% include 'skip' %}{{ i }}{% endfor %}",
        serde_json::json!({}),
        &[("skip", "{% continue %}")],
    );
    assert_eq!(rendered.output, "123");
}

#[test]
fn test_render_inside_conditional() {
    let partials = [("shown", "visible")];
    let source = "{% if show %}{% render 'shown' %}{% else %}hidden{% endif %}";

    assert_eq!(
        render(source, serde_json::json!({ "show": true }), &partials).output,
        "visible"
    );
    assert_eq!(
        render(source, serde_json::json!({ "show": false }), &partials).output,
        "hidden"
    );
}

#[test]
fn test_render_with_variable_name_is_syntax_error() {
    let engine = engine_with(EngineConfig::default(), &[("snippet", "x")]);
    let err = engine.parse("{% render name %}").unwrap_err();
    assert!(matches!(err, TemplateError::Syntax { .. }));
}

#[test]
fn test_include_with_variable_name() {
    let rendered = render(
        "{% include partial_name %}",
        serde_json::json!({ "partial_name": "snippet" }),
        &[("snippet", "dynamic")],
    );
    assert_eq!(rendered.output, "dynamic");
}

#[test]
fn test_taint_warning_names_the_partial() {
    let engine = engine_with(
        EngineConfig {
            taint_mode: TaintMode::Warn,
            ..EngineConfig::default()
        },
        &[("snippet", "<p>{{ html }}</p>")],
    );
    let rendered = engine
        .render_str(
            "{% render 'snippet', html: body %}",
            TemplateContext::from_untrusted_json(serde_json::json!({ "body": "<b>hi</b>" })),
        )
        .unwrap();

    assert_eq!(rendered.output, "<p><b>hi</b></p>");
    assert_eq!(rendered.diagnostics.len(), 1);
    let diagnostic = &rendered.diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::Warning);
    assert_eq!(diagnostic.template_name.as_deref(), Some("snippet"));
    assert_eq!(diagnostic.code.as_deref(), Some("Q-20-1"));
}

#[test]
fn test_taint_error_suppresses_output() {
    let engine = engine_with(
        EngineConfig {
            taint_mode: TaintMode::Error,
            ..EngineConfig::default()
        },
        &[],
    );
    let rendered = engine
        .render_str(
            "a{{ body }}b{{ body | escape }}",
            TemplateContext::from_untrusted_json(serde_json::json!({ "body": "<i>" })),
        )
        .unwrap();

    assert_eq!(rendered.output, "ab&lt;i&gt;");
    assert!(rendered.has_errors());
    assert_eq!(rendered.diagnostics[0].template_name, None);
}

#[test]
fn test_taint_lax_is_silent() {
    let rendered = engine_with(EngineConfig::default(), &[])
        .render_str(
            "{{ body }}",
            TemplateContext::from_untrusted_json(serde_json::json!({ "body": "<i>" })),
        )
        .unwrap();
    assert_eq!(rendered.output, "<i>");
    assert!(rendered.diagnostics.is_empty());
}
