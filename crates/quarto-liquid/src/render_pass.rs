/*
 * render_pass.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Render-pass scoped state.
//!
//! A [`RenderPass`] lives exactly as long as one top-level render and its
//! whole tree of partial loads. It is the only home of partial cache state,
//! so two passes never observe each other's cached partials, even when
//! they share a source reader.
//!
//! A pass is single-threaded: all state sits behind `Cell`/`RefCell`, which
//! makes `RenderPass` `!Sync` by construction.

use crate::diagnostics::{Diagnostic, DiagnosticCollector};
use crate::error::{TemplateError, TemplateResult};
use crate::parser::Template;
use crate::source::{DefaultReader, SourceReader};
use once_cell::unsync::OnceCell;
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Default limit for nested partial loads.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Largest accepted nesting limit. Each level is a native stack frame chain,
/// so deeper limits would overflow the thread stack before `StackLevel` fires.
pub const MAX_DEPTH_LIMIT: usize = 1000;

/// What to do when an untrusted value reaches the output unescaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaintMode {
    /// Output the value; record nothing.
    #[default]
    Lax,
    /// Output the value and record a warning.
    Warn,
    /// Suppress the value and record an error.
    Error,
}

impl TaintMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintMode::Lax => "lax",
            TaintMode::Warn => "warn",
            TaintMode::Error => "error",
        }
    }
}

impl TryFrom<&str> for TaintMode {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, <Self as TryFrom<&str>>::Error> {
        match s.to_lowercase().as_str() {
            "lax" => Ok(TaintMode::Lax),
            "warn" => Ok(TaintMode::Warn),
            "error" => Ok(TaintMode::Error),
            _ => Err(format!("Unknown taint mode: {}", s)),
        }
    }
}

/// State for one render pass.
pub struct RenderPass {
    /// Resolved source reader; set at most once per pass.
    reader: OnceCell<Arc<dyn SourceReader>>,
    default_reader: DefaultReader,
    /// Partial name → parsed template.
    partials: RefCell<HashMap<String, Rc<Template>>>,
    depth: Cell<usize>,
    max_depth: usize,
    taint_mode: TaintMode,
    diagnostics: RefCell<DiagnosticCollector>,
}

impl RenderPass {
    /// Create a pass that resolves its reader from `default_reader` on first use.
    pub fn new(default_reader: DefaultReader) -> Self {
        Self {
            reader: OnceCell::new(),
            default_reader,
            partials: RefCell::new(HashMap::new()),
            depth: Cell::new(0),
            max_depth: DEFAULT_MAX_DEPTH,
            taint_mode: TaintMode::default(),
            diagnostics: RefCell::new(DiagnosticCollector::new()),
        }
    }

    /// Create a pass with an explicitly registered reader.
    ///
    /// The default reader is never consulted for such a pass.
    pub fn with_reader(reader: Arc<dyn SourceReader>) -> Self {
        let pass = Self::new(DefaultReader::default());
        // A freshly created cell is always empty.
        let _ = pass.reader.set(reader);
        pass
    }

    /// Set the nesting limit, capped at [`MAX_DEPTH_LIMIT`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.min(MAX_DEPTH_LIMIT);
        self
    }

    pub fn with_taint_mode(mut self, taint_mode: TaintMode) -> Self {
        self.taint_mode = taint_mode;
        self
    }

    /// The source reader for this pass, resolving the default on first use.
    pub fn reader(&self) -> Arc<dyn SourceReader> {
        Arc::clone(self.reader.get_or_init(|| {
            tracing::debug!("Resolving default source reader for render pass");
            self.default_reader.resolve()
        }))
    }

    pub fn has_resolved_reader(&self) -> bool {
        self.reader.get().is_some()
    }

    /// Cached partial for `name`, if it has been loaded in this pass.
    pub fn cached_partial(&self, name: &str) -> Option<Rc<Template>> {
        self.partials.borrow().get(name).cloned()
    }

    pub fn cached_partial_count(&self) -> usize {
        self.partials.borrow().len()
    }

    pub(crate) fn store_partial(&self, name: &str, template: Rc<Template>) {
        self.partials
            .borrow_mut()
            .insert(name.to_string(), template);
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Current partial nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn taint_mode(&self) -> TaintMode {
        self.taint_mode
    }

    /// Enter one level of partial nesting.
    ///
    /// Fails with [`TemplateError::StackLevel`] once the depth would exceed
    /// `max_depth`. The returned guard leaves the level when dropped.
    pub fn enter_partial(&self, name: &str) -> TemplateResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            return Err(TemplateError::StackLevel {
                name: name.to_string(),
                max_depth: self.max_depth,
            });
        }
        tracing::debug!(partial = name, depth, "Entering partial");
        self.depth.set(depth);
        Ok(DepthGuard { depth: &self.depth })
    }

    pub fn push_diagnostic(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().add(diagnostic);
    }

    pub fn extend_diagnostics(&self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.borrow_mut().extend(diagnostics);
    }

    pub fn diagnostics(&self) -> Ref<'_, DiagnosticCollector> {
        self.diagnostics.borrow()
    }

    /// Move out the diagnostics collected so far.
    pub fn take_diagnostics(&self) -> DiagnosticCollector {
        self.diagnostics.take()
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("has_resolved_reader", &self.has_resolved_reader())
            .field("cached_partials", &self.cached_partial_count())
            .field("depth", &self.depth.get())
            .field("max_depth", &self.max_depth)
            .field("taint_mode", &self.taint_mode)
            .finish()
    }
}

/// Leaves one level of partial nesting on drop.
#[must_use = "the nesting level is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}
