//! Lines: the appendable units inside a block.
//!
//! A line is a tagged union of text, element (recursive, owns child lines),
//! nested block, or placeholder. Ownership runs one way - blocks own lines,
//! element lines own their children - and parent links are non-owning weak
//! back-references used only for dirty propagation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures_util::future::LocalBoxFuture;

use weft_types::{Capabilities, DirtyFlags, LineId};

use crate::block::Block;
use crate::errors::RenderError;
use crate::node::ElementNode;
use crate::placeholder::Placeholder;

/// A registered pre-task: must complete before any content task of the same
/// scheduler walk starts.
pub type PreTask = LocalBoxFuture<'static, Result<(), RenderError>>;

pub(crate) enum LineKind {
    Text(String),
    Element {
        node: Rc<dyn ElementNode>,
        children: Vec<Line>,
        /// Deferred content write-back; supersedes children when set.
        resolved: Option<String>,
    },
    Block(Block),
    Placeholder(Placeholder),
}

pub(crate) struct LineInner {
    id: LineId,
    kind: LineKind,
    caps: Capabilities,
    /// Which dirty bits this line can ever carry; cached at creation.
    applicable: DirtyFlags,
    dirty: DirtyFlags,
    parent: Option<WeakLine>,
    pre_tasks: Vec<PreTask>,
}

/// Handle to one line. Clones share the same underlying line.
#[derive(Clone)]
pub struct Line {
    inner: Rc<RefCell<LineInner>>,
}

/// Non-owning back-reference to a line, for dirty propagation.
#[derive(Clone)]
pub(crate) struct WeakLine(Weak<RefCell<LineInner>>);

impl WeakLine {
    pub(crate) fn upgrade(&self) -> Option<Line> {
        self.0.upgrade().map(|inner| Line { inner })
    }
}

/// Cloned view of a line's kind for the scheduler walk; handles only, no
/// borrows held.
pub(crate) enum LineView {
    Text,
    Element {
        node: Rc<dyn ElementNode>,
        children: Vec<Line>,
    },
    Block(Block),
    Placeholder(Placeholder),
}

impl Line {
    fn with_inner(inner: LineInner) -> Self {
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    fn build(id: LineId, kind: LineKind, caps: Capabilities, dirty: DirtyFlags) -> Self {
        let applicable = DirtyFlags::applicable_to(caps);
        let mut initial = DirtyFlags::CLEAN;
        initial.mark(dirty, applicable);
        Self::with_inner(LineInner {
            id,
            kind,
            caps,
            applicable,
            dirty: initial,
            parent: None,
            pre_tasks: Vec::new(),
        })
    }

    pub(crate) fn text(id: LineId, content: String) -> Self {
        Self::build(id, LineKind::Text(content), Capabilities::NONE, DirtyFlags::CLEAN)
    }

    pub(crate) fn element(id: LineId, node: Rc<dyn ElementNode>) -> Self {
        let caps = Capabilities::HAS_CHILDREN | node.capabilities();
        let dirty = if node.capabilities().contains(Capabilities::RESOLVE_CONTENT)
            || node.capabilities().contains(Capabilities::PRE_ASSEMBLE)
        {
            DirtyFlags::NEEDS_RENDER
        } else {
            DirtyFlags::CLEAN
        };
        Self::build(
            id,
            LineKind::Element {
                node,
                children: Vec::new(),
                resolved: None,
            },
            caps,
            dirty,
        )
    }

    pub(crate) fn block(id: LineId, block: Block) -> Self {
        Self::build(
            id,
            LineKind::Block(block),
            Capabilities::NESTED_BLOCK,
            DirtyFlags::NEEDS_ASSEMBLY,
        )
    }

    pub(crate) fn placeholder(id: LineId, placeholder: Placeholder) -> Self {
        let line = Self::build(
            id,
            LineKind::Placeholder(placeholder.clone()),
            Capabilities::RESOLVE_CONTENT,
            DirtyFlags::NEEDS_RENDER,
        );
        placeholder.attach_owner(line.downgrade());
        line
    }

    pub(crate) fn downgrade(&self) -> WeakLine {
        WeakLine(Rc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn id(&self) -> LineId {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn dirty(&self) -> DirtyFlags {
        self.inner.borrow().dirty
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.inner.borrow().caps
    }

    /// Whether any dirty bit can ever apply to this line.
    #[must_use]
    pub fn can_be_marked_dirty(&self) -> bool {
        !self.inner.borrow().applicable.is_clean()
    }

    pub(crate) fn view(&self) -> LineView {
        match &self.inner.borrow().kind {
            LineKind::Text(_) => LineView::Text,
            LineKind::Element { node, children, .. } => LineView::Element {
                node: node.clone(),
                children: children.clone(),
            },
            LineKind::Block(block) => LineView::Block(block.clone()),
            LineKind::Placeholder(placeholder) => LineView::Placeholder(placeholder.clone()),
        }
    }

    pub(crate) fn set_parent(&self, parent: &Line) {
        self.inner.borrow_mut().parent = Some(parent.downgrade());
        if !self.dirty().is_clean() {
            self.mark_ancestors();
        }
    }

    /// Mark this line as needing render and propagate `HAS_DIRTY_CHILDREN`
    /// up the parent chain, short-circuiting at the first already-marked
    /// ancestor (its own ancestors are therefore already marked).
    pub fn mark_branch_dirty(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            let applicable = inner.applicable;
            inner.dirty.mark(DirtyFlags::NEEDS_RENDER, applicable);
        }
        self.mark_ancestors();
    }

    fn mark_ancestors(&self) {
        let mut current = self.inner.borrow().parent.clone();
        while let Some(parent) = current.and_then(|weak| weak.upgrade()) {
            let mut inner = parent.inner.borrow_mut();
            if inner.dirty.contains(DirtyFlags::HAS_DIRTY_CHILDREN) {
                break;
            }
            inner.dirty.set(DirtyFlags::HAS_DIRTY_CHILDREN);
            current = inner.parent.clone();
        }
    }

    /// Register a task that must run before any content task of the walk
    /// that picks this line up.
    pub fn add_pre_task(&self, task: PreTask) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.pre_tasks.push(task);
            // A pre-task list makes the line renderable even if its kind alone
            // would not be.
            inner.applicable |= DirtyFlags::NEEDS_RENDER;
            inner.dirty.set(DirtyFlags::NEEDS_RENDER);
        }
        self.mark_ancestors();
    }

    pub(crate) fn has_pre_tasks(&self) -> bool {
        !self.inner.borrow().pre_tasks.is_empty()
    }

    pub(crate) fn take_pre_tasks(&self) -> Vec<PreTask> {
        std::mem::take(&mut self.inner.borrow_mut().pre_tasks)
    }

    pub(crate) fn append_child(&self, child: &Line) {
        {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.kind {
                LineKind::Element { children, .. } => children.push(child.clone()),
                _ => panic!("append_child on a non-element line"),
            }
        }
        child.set_parent(self);
    }

    pub(crate) fn set_resolved(&self, content: String) {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.kind {
            LineKind::Element { resolved, .. } => *resolved = Some(content),
            _ => panic!("set_resolved on a non-element line"),
        }
    }

    pub(crate) fn clear_dirty(&self, bits: DirtyFlags) {
        self.inner.borrow_mut().dirty.clear(bits);
    }

    /// Serialize this line. Valid only after the owning block's assembly
    /// settled; unsettled placeholders contribute nothing (best-effort).
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    pub(crate) fn write_html(&self, out: &mut String) {
        let inner = self.inner.borrow();
        match &inner.kind {
            LineKind::Text(text) => out.push_str(text),
            LineKind::Element {
                node,
                children,
                resolved,
            } => {
                node.write_open(out);
                if let Some(content) = resolved {
                    out.push_str(content);
                } else {
                    for child in children {
                        child.write_html(out);
                    }
                }
                node.write_close(out);
            }
            LineKind::Block(block) => out.push_str(&block.to_html()),
            LineKind::Placeholder(placeholder) => {
                if let Some(Ok(content)) = placeholder.cached() {
                    out.push_str(&content);
                }
            }
        }
    }
}
