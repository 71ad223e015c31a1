/*
 * diagnostics.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Non-fatal diagnostics collected while parsing and rendering.
//!
//! Fatal problems are returned as [`TemplateError`]s. Everything that lets
//! rendering continue (ignored tags, tainted output in warn mode, ...) is
//! recorded here instead, attributed to the template that produced it.

use crate::error::TemplateError;

/// Error code: an untrusted value reached the output.
pub const CODE_TAINTED: &str = "Q-20-1";
/// Error code: an unknown tag was dropped by a lax parser.
pub const CODE_UNKNOWN_TAG: &str = "Q-20-2";
/// Error code: an unknown filter was skipped.
pub const CODE_UNKNOWN_FILTER: &str = "Q-20-3";

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Error,
    Warning,
}

/// A single diagnostic message.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Name of the partial the diagnostic belongs to (`None` for the root template).
    pub template_name: Option<String>,
    /// 1-based source line within that template, when known.
    pub line: Option<usize>,
    pub code: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            message: message.into(),
            template_name: None,
            line: None,
            code: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            message: message.into(),
            template_name: None,
            line: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Attribute the diagnostic to a template, unless it already is.
    pub fn with_template_name(mut self, name: Option<&str>) -> Self {
        if self.template_name.is_none() {
            self.template_name = name.map(str::to_string);
        }
        self
    }

    /// Build a diagnostic from an error, keeping its template attribution.
    pub fn from_error(kind: DiagnosticKind, error: &TemplateError) -> Self {
        Self {
            kind,
            message: error.to_string(),
            template_name: error.template_name().map(str::to_string),
            line: None,
            code: None,
        }
    }

    /// Render for terminal output.
    pub fn to_text(&self) -> String {
        let label = match self.kind {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
        };
        let code = self
            .code
            .as_deref()
            .map(|c| format!("[{}] ", c))
            .unwrap_or_default();
        match (&self.template_name, self.line) {
            (Some(name), Some(line)) => {
                format!("{}: {}{} (in '{}', line {})", label, code, self.message, name, line)
            }
            (Some(name), None) => format!("{}: {}{} (in '{}')", label, code, self.message, name),
            (None, Some(line)) => format!("{}: {}{} (line {})", label, code, self.message, line),
            (None, None) => format!("{}: {}{}", label, code, self.message),
        }
    }
}

/// Collector for diagnostic messages.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    /// Check if any errors were collected (warnings don't count).
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Error)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Warning)
    }

    /// Consume the collector and return the diagnostics, grouped by template
    /// (root first) and sorted by line. The sort is stable, so diagnostics on
    /// the same line keep the order they were recorded in.
    pub fn into_diagnostics(mut self) -> Vec<Diagnostic> {
        self.diagnostics
            .sort_by(|a, b| (a.template_name.as_deref(), a.line).cmp(&(b.template_name.as_deref(), b.line)));
        self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_counts_only_errors() {
        let mut collector = DiagnosticCollector::new();
        assert!(collector.is_empty());

        collector.add(Diagnostic::warning("careful"));
        assert!(!collector.has_errors());

        collector.add(Diagnostic::error("broken").with_code(CODE_TAINTED));
        assert!(collector.has_errors());
        assert_eq!(collector.errors().count(), 1);
        assert_eq!(collector.warnings().count(), 1);
    }

    #[test]
    fn test_with_template_name_keeps_first() {
        let diag = Diagnostic::warning("w")
            .with_template_name(Some("inner"))
            .with_template_name(Some("outer"));
        assert_eq!(diag.template_name.as_deref(), Some("inner"));
    }

    #[test]
    fn test_to_text() {
        let diag = Diagnostic::error("Tainted value 'x' output")
            .with_code(CODE_TAINTED)
            .with_template_name(Some("snippet"));
        assert_eq!(
            diag.to_text(),
            "error: [Q-20-1] Tainted value 'x' output (in 'snippet')"
        );
        assert_eq!(
            Diagnostic::warning("Unknown tag 'x'").with_line(3).to_text(),
            "warning: Unknown tag 'x' (line 3)"
        );
    }

    #[test]
    fn test_into_diagnostics_sorts_by_template_and_line() {
        let mut collector = DiagnosticCollector::new();
        collector.add(Diagnostic::warning("p7").with_line(7).with_template_name(Some("p")));
        collector.add(Diagnostic::warning("root9").with_line(9));
        collector.add(Diagnostic::warning("p2").with_line(2).with_template_name(Some("p")));
        collector.add(Diagnostic::error("root2").with_line(2));
        collector.add(Diagnostic::warning("root2 again").with_line(2));

        let messages: Vec<_> = collector
            .into_diagnostics()
            .into_iter()
            .map(|d| d.message)
            .collect();
        assert_eq!(messages, ["root2", "root2 again", "root9", "p2", "p7"]);
    }
}
