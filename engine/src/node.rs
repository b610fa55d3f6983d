//! The minimal node-like interface element lines satisfy.
//!
//! The engine does not implement a DOM. It only needs enough of one to build
//! a tree: serialize an element's open/close form, know its fixed capability
//! set, and call its optional hooks. A real DOM or custom-element layer plugs
//! in by implementing [`ElementNode`]; [`HtmlElement`] is the plain
//! tag-and-attributes implementation used by the renderer's open-element
//! command.

use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;

use weft_types::{Capabilities, escape_html};

use crate::errors::RenderError;

/// Node interface an element line must satisfy.
///
/// Capabilities are fixed at construction: the scheduler asks once and never
/// probes again. Hooks take an `Rc<Self>` receiver so the returned futures
/// can be `'static` and scheduled alongside the rest of a task group.
pub trait ElementNode {
    /// Element tag, for diagnostics.
    fn tag(&self) -> &str;

    /// Append the element's opening form (`<tag ...>`).
    fn write_open(&self, out: &mut String);

    /// Append the element's closing form (`</tag>`), or nothing for void
    /// elements.
    fn write_close(&self, out: &mut String);

    /// Fixed capability set, decided at construction.
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Pre-processing hook, run only during a genuine assembly pass and only
    /// when `capabilities()` contains `PRE_ASSEMBLE`.
    fn pre_assemble(self: Rc<Self>) -> LocalBoxFuture<'static, Result<(), RenderError>> {
        futures_util::future::ready(Ok(())).boxed_local()
    }

    /// Deferred-content hook: produce rendered inner markup that supersedes
    /// the element's children. Only called when `capabilities()` contains
    /// `RESOLVE_CONTENT`.
    fn resolve_content(self: Rc<Self>) -> LocalBoxFuture<'static, Result<String, RenderError>> {
        futures_util::future::ready(Ok(String::new())).boxed_local()
    }
}

/// A plain HTML element: tag, attributes, optional void form.
#[derive(Debug, Clone)]
pub struct HtmlElement {
    tag: String,
    attributes: Vec<(String, String)>,
    void: bool,
}

impl HtmlElement {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            void: false,
        }
    }

    /// Void elements serialize without a closing tag.
    #[must_use]
    pub fn void(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            void: true,
        }
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }
}

impl ElementNode for HtmlElement {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn write_open(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_html(value));
            out.push('"');
        }
        out.push('>');
    }

    fn write_close(&self, out: &mut String) {
        if !self.void {
            out.push_str("</");
            out.push_str(&self.tag);
            out.push('>');
        }
    }
}
