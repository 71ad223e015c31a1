/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template loading, parsing and rendering.

use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The source reader has no template with this name.
    #[error("Partial not found: {name}")]
    PartialNotFound { name: String },

    /// The source reader found the template but could not read it.
    #[error("Failed to read partial '{name}': {source}")]
    ReadFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The name cannot be mapped onto the backing store.
    #[error("Illegal template name '{name}'")]
    IllegalTemplateName { name: String },

    /// The render pass has no source reader capable of loading partials.
    #[error("This template context does not allow includes (requested '{name}')")]
    IncludesNotAllowed { name: String },

    /// Error parsing the template syntax.
    #[error("{}", format_syntax(template_name.as_deref(), *line, message))]
    Syntax {
        template_name: Option<String>,
        line: usize,
        message: String,
    },

    /// Nested partial loads exceeded the configured depth. Fatal for the pass.
    #[error("Stack level too deep (depth > {max_depth}) while rendering partial '{name}'")]
    StackLevel { name: String, max_depth: usize },

    /// An untrusted value reached the output without being escaped.
    #[error("{}", format_tainted(template_name.as_deref(), variable))]
    Tainted {
        template_name: Option<String>,
        variable: String,
    },

    /// Error evaluating the template.
    #[error("Evaluation error{}: {message}", in_template(template_name.as_deref()))]
    Evaluation {
        template_name: Option<String>,
        message: String,
    },

    /// Unknown filter name.
    #[error("Unknown filter{}: {name}", in_template(template_name.as_deref()))]
    UnknownFilter {
        template_name: Option<String>,
        name: String,
    },

    /// Invalid filter arguments.
    #[error(
        "Invalid arguments for filter '{filter}'{}: {message}",
        in_template(template_name.as_deref())
    )]
    InvalidFilterArgs {
        template_name: Option<String>,
        filter: String,
        message: String,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error (e.g., reading a configuration file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn in_template(template_name: Option<&str>) -> String {
    match template_name {
        Some(name) => format!(" in '{}'", name),
        None => String::new(),
    }
}

fn format_syntax(template_name: Option<&str>, line: usize, message: &str) -> String {
    match template_name {
        Some(name) => format!("Syntax error in '{}' (line {}): {}", name, line, message),
        None => format!("Syntax error (line {}): {}", line, message),
    }
}

fn format_tainted(template_name: Option<&str>, variable: &str) -> String {
    match template_name {
        Some(name) => format!("Tainted value '{}' output in '{}'", variable, name),
        None => format!("Tainted value '{}' output", variable),
    }
}

impl TemplateError {
    /// Build a syntax error without a template name.
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            template_name: None,
            line,
            message: message.into(),
        }
    }

    /// Build an evaluation error without a template name.
    pub fn evaluation(message: impl Into<String>) -> Self {
        TemplateError::Evaluation {
            template_name: None,
            message: message.into(),
        }
    }

    pub fn unknown_filter(name: impl Into<String>) -> Self {
        TemplateError::UnknownFilter {
            template_name: None,
            name: name.into(),
        }
    }

    pub fn invalid_filter_args(filter: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::InvalidFilterArgs {
            template_name: None,
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// The template name this error is attributed to, if any.
    pub fn template_name(&self) -> Option<&str> {
        match self {
            TemplateError::Syntax { template_name, .. }
            | TemplateError::Tainted { template_name, .. }
            | TemplateError::Evaluation { template_name, .. }
            | TemplateError::UnknownFilter { template_name, .. }
            | TemplateError::InvalidFilterArgs { template_name, .. } => template_name.as_deref(),
            TemplateError::PartialNotFound { name }
            | TemplateError::ReadFailed { name, .. }
            | TemplateError::IllegalTemplateName { name }
            | TemplateError::IncludesNotAllowed { name }
            | TemplateError::StackLevel { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Attach a template name to errors that carry one.
    ///
    /// A name that is already present is kept, so an error raised several
    /// partials deep stays attributed to the innermost partial.
    pub fn with_template_name(mut self, name: &str) -> Self {
        match &mut self {
            TemplateError::Syntax { template_name, .. }
            | TemplateError::Tainted { template_name, .. }
            | TemplateError::Evaluation { template_name, .. }
            | TemplateError::UnknownFilter { template_name, .. }
            | TemplateError::InvalidFilterArgs { template_name, .. } => {
                if template_name.is_none() {
                    *template_name = Some(name.to_string());
                }
            }
            _ => {}
        }
        self
    }

    /// Whether this error must terminate the render pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TemplateError::StackLevel { .. })
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_template_name_sets_missing_name() {
        let err = TemplateError::syntax(3, "bad tag").with_template_name("header");
        assert_eq!(err.template_name(), Some("header"));
        assert_eq!(
            err.to_string(),
            "Syntax error in 'header' (line 3): bad tag"
        );
    }

    #[test]
    fn test_with_template_name_keeps_inner_name() {
        let err = TemplateError::syntax(1, "bad tag")
            .with_template_name("inner")
            .with_template_name("outer");
        assert_eq!(err.template_name(), Some("inner"));
    }

    #[test]
    fn test_reader_errors_are_attributed() {
        let err = TemplateError::PartialNotFound {
            name: "footer".to_string(),
        };
        assert_eq!(err.with_template_name("page").template_name(), Some("footer"));
    }

    #[test]
    fn test_stack_level_is_fatal() {
        let err = TemplateError::StackLevel {
            name: "loop".to_string(),
            max_depth: 100,
        };
        assert!(err.is_fatal());
        assert!(!TemplateError::syntax(1, "x").is_fatal());
    }

    #[test]
    fn test_render_errors_are_attributed() {
        let err = TemplateError::evaluation("Range bound 'abc' is not an integer")
            .with_template_name("inner")
            .with_template_name("outer");
        assert_eq!(err.template_name(), Some("inner"));
        assert_eq!(
            err.to_string(),
            "Evaluation error in 'inner': Range bound 'abc' is not an integer"
        );

        let err = TemplateError::invalid_filter_args("plus", "expected numbers").with_template_name("card");
        assert_eq!(err.template_name(), Some("card"));
        assert_eq!(
            TemplateError::unknown_filter("nope").to_string(),
            "Unknown filter: nope"
        );
    }
}
