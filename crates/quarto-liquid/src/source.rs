/*
 * source.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Partial template sources.
//!
//! A [`SourceReader`] turns a template name into raw source text. Readers
//! may be shared by many concurrent render passes, so they must be safe for
//! concurrent read-only use. Caching parsed partials is not their concern:
//! that happens per render pass in [`crate::partial_cache`].

use crate::error::{TemplateError, TemplateResult};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for loading partial template source.
pub trait SourceReader: Send + Sync {
    /// Read the source of the template called `name`.
    fn read_template_file(&self, name: &str) -> TemplateResult<String>;
}

impl<R: SourceReader + ?Sized> SourceReader for Arc<R> {
    fn read_template_file(&self, name: &str) -> TemplateResult<String> {
        (**self).read_template_file(name)
    }
}

/// Reader that refuses every request.
///
/// This is the default when no template directory is configured.
#[derive(Debug, Clone, Default)]
pub struct BlankReader;

impl SourceReader for BlankReader {
    fn read_template_file(&self, name: &str) -> TemplateResult<String> {
        Err(TemplateError::IncludesNotAllowed {
            name: name.to_string(),
        })
    }
}

/// Reader that loads partials from an in-memory map.
///
/// Useful for testing and for templates bundled into the application.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    templates: HashMap<String, String>,
}

impl MemoryReader {
    /// Create a new empty memory reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template to the reader.
    pub fn add(&mut self, name: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), content.into());
        self
    }

    /// Create a reader with the given templates.
    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut reader = Self::new();
        for (name, content) in templates {
            reader.add(name, content);
        }
        reader
    }
}

impl SourceReader for MemoryReader {
    fn read_template_file(&self, name: &str) -> TemplateResult<String> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::PartialNotFound {
                name: name.to_string(),
            })
    }
}

/// Default file name pattern; `%s` is replaced by the partial's base name.
pub const DEFAULT_FILE_PATTERN: &str = "_%s.liquid";

/// Reader that loads partials from a directory.
///
/// Path resolution follows Liquid's local file system rules:
/// - names may only contain ASCII letters, digits, `_` and `/`
/// - the last path segment is substituted into the file pattern
///   (`"products/card"` → `<root>/products/_card.liquid`)
#[derive(Debug, Clone)]
pub struct FileSystemReader {
    root: PathBuf,
    pattern: String,
}

impl FileSystemReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pattern: DEFAULT_FILE_PATTERN.to_string(),
        }
    }

    /// Use a different file name pattern (must contain `%s`).
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a template name onto a file path under the root.
    pub fn full_path(&self, name: &str) -> TemplateResult<PathBuf> {
        if !is_legal_template_name(name) {
            return Err(TemplateError::IllegalTemplateName {
                name: name.to_string(),
            });
        }

        let (dir, base) = match name.rsplit_once('/') {
            Some((dir, base)) => (Some(dir), base),
            None => (None, name),
        };
        let file_name = self.pattern.replace("%s", base);

        let mut path = self.root.clone();
        if let Some(dir) = dir {
            path.push(dir);
        }
        path.push(file_name);
        Ok(path)
    }
}

impl SourceReader for FileSystemReader {
    fn read_template_file(&self, name: &str) -> TemplateResult<String> {
        let path = self.full_path(name)?;
        std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::PartialNotFound {
                    name: name.to_string(),
                }
            } else {
                TemplateError::ReadFailed {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }
}

fn is_legal_template_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    first != '.'
        && first != '/'
        && !name.ends_with('/')
        && !name.contains("//")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/')
}

/// Injected source of the process-wide default reader.
///
/// A render pass that was not given an explicit reader asks its
/// `DefaultReader` for one the first time a partial is loaded, and keeps
/// the answer for the rest of the pass.
#[derive(Clone)]
pub struct DefaultReader {
    factory: Arc<dyn Fn() -> Arc<dyn SourceReader> + Send + Sync>,
}

impl DefaultReader {
    /// Always hand out the same shared reader.
    pub fn shared(reader: Arc<dyn SourceReader>) -> Self {
        Self {
            factory: Arc::new(move || Arc::clone(&reader)),
        }
    }

    /// Build the reader lazily with `f`, once per resolving pass.
    pub fn from_fn(f: impl Fn() -> Arc<dyn SourceReader> + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(f),
        }
    }

    /// Produce the default reader.
    pub fn resolve(&self) -> Arc<dyn SourceReader> {
        (self.factory)()
    }
}

impl Default for DefaultReader {
    fn default() -> Self {
        Self::shared(Arc::new(BlankReader))
    }
}

impl fmt::Debug for DefaultReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultReader").finish_non_exhaustive()
    }
}
