/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! High-level entry point tying configuration, readers and render passes together.

use crate::config::EngineConfig;
use crate::context::TemplateContext;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::TemplateResult;
use crate::evaluator::RenderState;
use crate::parser::{ParseContext, Template};
use crate::render_pass::RenderPass;
use crate::source::{BlankReader, DefaultReader, FileSystemReader, SourceReader};
use std::sync::Arc;

/// Output of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub output: String,
    /// Warnings and non-fatal errors, grouped by template and sorted by line.
    pub diagnostics: Vec<Diagnostic>,
}

impl Rendered {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Error)
    }
}

/// A configured template engine.
///
/// The engine itself holds no per-render state and can be shared between
/// threads. Each call to [`Engine::render`] runs in its own [`RenderPass`].
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    default_reader: DefaultReader,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let reader: Arc<dyn SourceReader> = match &config.template_dir {
            Some(dir) => Arc::new(FileSystemReader::new(dir).with_pattern(&config.file_pattern)),
            None => Arc::new(BlankReader),
        };
        Self::with_default_reader(config, DefaultReader::shared(reader))
    }

    pub fn with_default_reader(config: EngineConfig, default_reader: DefaultReader) -> Self {
        Self {
            config,
            default_reader,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn parse_context(&self) -> ParseContext {
        ParseContext::new(self.config.parse_options())
    }

    /// Parse a root template.
    pub fn parse(&self, source: &str) -> TemplateResult<Template> {
        Template::parse(source, &self.parse_context())
    }

    /// Create an empty render pass using this engine's reader and limits.
    pub fn new_pass(&self) -> RenderPass {
        RenderPass::new(self.default_reader.clone())
            .with_max_depth(self.config.max_depth)
            .with_taint_mode(self.config.taint_mode)
    }

    /// Render `template` in a fresh pass.
    ///
    /// The pass is dropped when rendering fails, so the diagnostics it collected
    /// up to the failure are logged as warnings instead of being returned.
    pub fn render(&self, template: &Template, context: TemplateContext) -> TemplateResult<Rendered> {
        let pass = self.new_pass();
        self.render_in(template, &pass, context).inspect_err(|_| {
            for diagnostic in pass.take_diagnostics().into_diagnostics() {
                tracing::warn!("{}", diagnostic.to_text());
            }
        })
    }

    /// Render `template` in an existing pass, reusing its cached partials.
    ///
    /// Diagnostics collected by the pass so far are moved into the result. When
    /// rendering fails they stay in `pass` and can be read with
    /// [`RenderPass::take_diagnostics`].
    pub fn render_in(
        &self,
        template: &Template,
        pass: &RenderPass,
        mut context: TemplateContext,
    ) -> TemplateResult<Rendered> {
        let parse_context = self.parse_context();
        pass.extend_diagnostics(template.warnings().iter().cloned());

        let output = template.render(&RenderState::new(pass, &parse_context), &mut context)?;
        Ok(Rendered {
            output,
            diagnostics: pass.take_diagnostics().into_diagnostics(),
        })
    }

    /// Parse and render `source` in a fresh pass.
    pub fn render_str(&self, source: &str, context: TemplateContext) -> TemplateResult<Rendered> {
        let template = self.parse(source)?;
        self.render(&template, context)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::source::MemoryReader;
    use pretty_assertions::assert_eq;

    fn engine_with(templates: &[(&str, &str)]) -> Engine {
        let reader = MemoryReader::with_templates(templates.iter().copied());
        Engine::with_default_reader(EngineConfig::default(), DefaultReader::shared(Arc::new(reader)))
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_render_str() {
        let engine = engine_with(&[("greeting", "Hello, {{ who }}!")]);
        let rendered = engine
            .render_str(
                "{% render 'greeting', who: name %}",
                TemplateContext::from_json(serde_json::json!({ "name": "World" })),
            )
            .unwrap();
        assert_eq!(rendered.output, "Hello, World!");
        assert!(rendered.diagnostics.is_empty());
    }

    #[test]
    fn test_default_engine_disallows_partials() {
        let err = Engine::default()
            .render_str("{% include 'x' %}", TemplateContext::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::IncludesNotAllowed { .. }));
    }

    #[test]
    fn test_root_warnings_are_reported() {
        let config = EngineConfig {
            error_mode: crate::parser::ErrorMode::Warn,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config);
        let rendered = engine
            .render_str("a{% frobnicate %}b", TemplateContext::new())
            .unwrap();
        assert_eq!(rendered.output, "ab");
        assert_eq!(rendered.diagnostics.len(), 1);
        assert!(!rendered.has_errors());
    }

    #[test]
    fn test_failed_render_keeps_diagnostics_in_pass() {
        let config = EngineConfig {
            error_mode: crate::parser::ErrorMode::Warn,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config);
        let template = engine
            .parse("{% frobnicate %}\n{{ 'x' | nope }}\n{% for i in (1..'z') %}{% endfor %}")
            .unwrap();
        let pass = engine.new_pass();

        let err = engine
            .render_in(&template, &pass, TemplateContext::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Evaluation { .. }));

        let diagnostics = pass.take_diagnostics().into_diagnostics();
        let lines: Vec<_> = diagnostics.iter().map(|d| d.line).collect();
        assert_eq!(lines, [Some(1), Some(2)]);
        assert!(pass.diagnostics().is_empty());
    }

    #[test]
    fn test_config_limits_apply_to_passes() {
        let config = EngineConfig {
            max_depth: 3,
            taint_mode: crate::render_pass::TaintMode::Warn,
            ..EngineConfig::default()
        };
        let pass = Engine::new(config).new_pass();
        assert_eq!(pass.max_depth(), 3);
        assert_eq!(pass.taint_mode(), crate::render_pass::TaintMode::Warn);
    }
}
