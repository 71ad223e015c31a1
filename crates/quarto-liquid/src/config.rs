/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Engine configuration.
//!
//! Configuration is read from YAML with kebab-case keys, either at the top
//! level of the document or nested under a `liquid:` key:
//!
//! ```yaml
//! liquid:
//!   max-depth: 50
//!   error-mode: warn
//!   partial-error-mode: strict
//!   taint-mode: error
//!   template-dir: _includes
//!   file-pattern: "_%s.liquid"
//! ```

use crate::error::{TemplateError, TemplateResult};
use crate::parser::{ErrorMode, ParseOptions};
use crate::render_pass::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT, TaintMode};
use crate::source::DEFAULT_FILE_PATTERN;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum nesting of `include`/`render` tags.
    pub max_depth: usize,
    pub error_mode: ErrorMode,
    /// Error mode used while parsing partials; falls back to `error_mode`.
    pub partial_error_mode: Option<ErrorMode>,
    pub taint_mode: TaintMode,
    /// Directory partials are read from. No directory means partials are disabled.
    pub template_dir: Option<PathBuf>,
    /// File name pattern for partials, `%s` being the last name segment.
    pub file_pattern: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            error_mode: ErrorMode::default(),
            partial_error_mode: None,
            taint_mode: TaintMode::default(),
            template_dir: None,
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
        }
    }
}

impl EngineConfig {
    /// Read a configuration file.
    ///
    /// A relative `template-dir` is resolved against the file's directory.
    pub fn from_file(path: &Path) -> TemplateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content).map_err(|e| match e {
            TemplateError::Config { message } => TemplateError::Config {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })?;

        if let (Some(dir), Some(parent)) = (&config.template_dir, path.parent())
            && dir.is_relative()
        {
            config.template_dir = Some(parent.join(dir));
        }
        Ok(config)
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml_str(content: &str) -> TemplateResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value =
            serde_yaml::from_str(content).map_err(|e| TemplateError::Config {
                message: format!("Failed to parse configuration: {}", e),
            })?;

        let section = match value.get("liquid") {
            Some(section) => section.clone(),
            None => value,
        };
        if !(section.is_object() || section.is_null()) {
            return Err(config_error("configuration must be a mapping"));
        }

        let mut config = Self::default();

        if let Some(v) = section.get("max-depth") {
            config.max_depth = v
                .as_u64()
                .filter(|&n| n > 0)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| config_error("'max-depth' must be a positive integer"))?;
            if config.max_depth > MAX_DEPTH_LIMIT {
                return Err(config_error(format!(
                    "'max-depth' must be at most {}, got {}",
                    MAX_DEPTH_LIMIT, config.max_depth
                )));
            }
        }
        if let Some(mode) = string_field(&section, "error-mode")? {
            config.error_mode = ErrorMode::try_from(mode).map_err(config_error)?;
        }
        if let Some(mode) = string_field(&section, "partial-error-mode")? {
            config.partial_error_mode = Some(ErrorMode::try_from(mode).map_err(config_error)?);
        }
        if let Some(mode) = string_field(&section, "taint-mode")? {
            config.taint_mode = TaintMode::try_from(mode).map_err(config_error)?;
        }
        if let Some(dir) = string_field(&section, "template-dir")? {
            config.template_dir = Some(PathBuf::from(dir));
        }
        if let Some(pattern) = string_field(&section, "file-pattern")? {
            if !pattern.contains("%s") {
                return Err(config_error("'file-pattern' must contain '%s'"));
            }
            config.file_pattern = pattern.to_string();
        }

        Ok(config)
    }

    /// Parse options derived from this configuration.
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            error_mode: self.error_mode,
            partial_error_mode: self.partial_error_mode,
        }
    }

    /// Strict parsing everywhere and taint reported as an error.
    pub fn strict(mut self) -> Self {
        self.error_mode = ErrorMode::Strict;
        self.partial_error_mode = Some(ErrorMode::Strict);
        self.taint_mode = TaintMode::Error;
        self
    }
}

fn config_error(message: impl Into<String>) -> TemplateError {
    TemplateError::Config {
        message: message.into(),
    }
}

fn string_field<'a>(section: &'a serde_json::Value, key: &str) -> TemplateResult<Option<&'a str>> {
    match section.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| config_error(format!("'{}' must be a string", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_gives_defaults() {
        assert_eq!(EngineConfig::from_yaml_str("").unwrap(), EngineConfig::default());
        assert_eq!(EngineConfig::default().max_depth, 100);
    }

    #[test]
    fn test_nested_section() {
        let config = EngineConfig::from_yaml_str(
            "liquid:\n  max-depth: 5\n  error-mode: warn\n  partial-error-mode: strict\n  taint-mode: error\n  template-dir: partials\n",
        )
        .unwrap();
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.error_mode, ErrorMode::Warn);
        assert_eq!(config.partial_error_mode, Some(ErrorMode::Strict));
        assert_eq!(config.taint_mode, TaintMode::Error);
        assert_eq!(config.template_dir, Some(PathBuf::from("partials")));
        assert_eq!(config.file_pattern, "_%s.liquid");
    }

    #[test]
    fn test_top_level_keys() {
        let config = EngineConfig::from_yaml_str("file-pattern: \"%s.html\"\n").unwrap();
        assert_eq!(config.file_pattern, "%s.html");
    }

    #[test]
    fn test_invalid_values() {
        for yaml in [
            "max-depth: 0",
            "max-depth: deep",
            "error-mode: loud",
            "taint-mode: 3",
            "file-pattern: partial.liquid",
            "- a list",
        ] {
            assert!(
                matches!(
                    EngineConfig::from_yaml_str(yaml),
                    Err(TemplateError::Config { .. })
                ),
                "expected config error for {:?}",
                yaml
            );
        }
    }

    #[test]
    fn test_max_depth_upper_bound() {
        let at_limit = EngineConfig::from_yaml_str(&format!("max-depth: {}", MAX_DEPTH_LIMIT));
        assert_eq!(at_limit.unwrap().max_depth, MAX_DEPTH_LIMIT);

        let err = EngineConfig::from_yaml_str("liquid:\n  max-depth: 100000\n").unwrap_err();
        assert!(matches!(err, TemplateError::Config { .. }));
        assert!(err.to_string().contains("at most 1000"));
    }

    #[test]
    fn test_strict() {
        let config = EngineConfig::default().strict();
        assert_eq!(
            config.parse_options(),
            ParseOptions {
                error_mode: ErrorMode::Strict,
                partial_error_mode: Some(ErrorMode::Strict),
            }
        );
        assert_eq!(config.taint_mode, TaintMode::Error);
    }
}
