/*
 * partial_cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Per-render-pass partial cache.
//!
//! [`PartialCache`] resolves a partial name to a parsed [`Template`],
//! reading and parsing each name at most once per [`RenderPass`]. The
//! handle itself holds no data: the cache map and the resolved reader live
//! in the pass, so any number of handles bound to one pass see the same
//! entries and handles bound to different passes never share any.

use crate::error::TemplateResult;
use crate::parser::{ParseContext, Template};
use crate::render_pass::RenderPass;
use std::rc::Rc;

/// A handle binding a render pass to the parse configuration used for partials.
#[derive(Debug, Clone, Copy)]
pub struct PartialCache<'a> {
    pass: &'a RenderPass,
    parse_context: &'a ParseContext,
}

impl<'a> PartialCache<'a> {
    /// Bind a handle. Performs no I/O.
    pub fn bind(pass: &'a RenderPass, parse_context: &'a ParseContext) -> Self {
        Self {
            pass,
            parse_context,
        }
    }

    /// Load `name` once through a temporary handle.
    pub fn load_once(
        pass: &RenderPass,
        parse_context: &ParseContext,
        name: &str,
    ) -> TemplateResult<Rc<Template>> {
        PartialCache::bind(pass, parse_context).load(name)
    }

    /// The cached template for `name`, without loading it.
    pub fn cached(&self, name: &str) -> Option<Rc<Template>> {
        self.pass.cached_partial(name)
    }

    /// Return the parsed partial called `name`.
    ///
    /// The first call in a pass reads the source and parses it with the
    /// "parsing a partial" flag raised; every later call returns the same
    /// template. Read and parse failures propagate unchanged and leave no
    /// entry behind, so a later call starts from scratch.
    pub fn load(&self, name: &str) -> TemplateResult<Rc<Template>> {
        if let Some(cached) = self.cached(name) {
            tracing::trace!(partial = name, "Partial cache hit");
            return Ok(cached);
        }

        tracing::debug!(partial = name, "Loading partial");
        let source = self.pass.reader().read_template_file(name)?;

        let template = {
            let _partial = PartialParseGuard::enter(self.parse_context);
            Template::parse_named(name, &source, self.parse_context)?
        };

        self.pass.extend_diagnostics(template.warnings().iter().cloned());
        let template = Rc::new(template);
        self.pass.store_partial(name, Rc::clone(&template));
        Ok(template)
    }
}

/// Raises the "parsing a partial" flag and restores its previous value on drop.
struct PartialParseGuard<'a> {
    context: &'a ParseContext,
    previous: bool,
}

impl<'a> PartialParseGuard<'a> {
    fn enter(context: &'a ParseContext) -> Self {
        let previous = context.set_partial(true);
        Self { context, previous }
    }
}

impl Drop for PartialParseGuard<'_> {
    fn drop(&mut self) {
        self.context.set_partial(self.previous);
    }
}
