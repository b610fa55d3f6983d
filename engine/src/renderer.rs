//! The renderer: a namespace of named blocks plus the command surface
//! compiled template code drives.
//!
//! Template execution is synchronous: print/open/close/start-expression calls
//! append lines into the innermost open block. `finish()` then switches to the
//! async phase: pre-finish tasks drain, known placeholders get a bounded wait,
//! and the named block assembles. Child renderers give isolated sub-scopes a
//! private namespace while sharing the root's id counters and script/style/
//! head registries; they republish their blocks into the root under a
//! disambiguating suffix at finish time.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use weft_types::{BlockId, ContentMode, LineId};

use crate::block::{Block, Content};
use crate::config::RenderConfig;
use crate::errors::RenderError;
use crate::line::Line;
use crate::node::ElementNode;
use crate::placeholder::Placeholder;
use crate::scheduler::{self, Task};

/// State shared by a root renderer and all of its children: configuration,
/// id counters, the delayed-line set, the placeholder registry, and the
/// root script/style/head collections.
pub(crate) struct RenderShared {
    pub(crate) config: RenderConfig,
    next_block_id: Cell<u64>,
    next_line_id: Cell<u64>,
    next_suffix: Cell<u64>,
    delayed: RefCell<HashSet<LineId>>,
    placeholders: RefCell<Vec<Placeholder>>,
    scripts: RefCell<Vec<String>>,
    styles: RefCell<Vec<String>>,
    head_tags: RefCell<Vec<String>>,
}

impl RenderShared {
    fn new(config: RenderConfig) -> Self {
        Self {
            config,
            next_block_id: Cell::new(0),
            next_line_id: Cell::new(0),
            next_suffix: Cell::new(1),
            delayed: RefCell::new(HashSet::new()),
            placeholders: RefCell::new(Vec::new()),
            scripts: RefCell::new(Vec::new()),
            styles: RefCell::new(Vec::new()),
            head_tags: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn next_block_id(&self) -> BlockId {
        let id = self.next_block_id.get();
        self.next_block_id.set(id + 1);
        BlockId::new(id)
    }

    pub(crate) fn next_line_id(&self) -> LineId {
        let id = self.next_line_id.get();
        self.next_line_id.set(id + 1);
        LineId::new(id)
    }

    /// Monotonic counter for every disambiguation need: retired replace-mode
    /// instances, spliced-out blocks, child-scope republishing.
    pub(crate) fn next_suffix(&self) -> u64 {
        let n = self.next_suffix.get();
        self.next_suffix.set(n + 1);
        n
    }

    pub(crate) fn delayed_snapshot(&self) -> HashSet<LineId> {
        self.delayed.borrow().clone()
    }

    fn register_placeholder(&self, placeholder: Placeholder) {
        self.placeholders.borrow_mut().push(placeholder);
    }

    /// Placeholders worth waiting on: resolver registered or running.
    /// Resolver-less ones are left alone so a resolver can still be attached
    /// mid-wait; they settle empty at assembly if none ever arrives.
    fn pending_placeholders(&self) -> Vec<Placeholder> {
        self.placeholders
            .borrow()
            .iter()
            .filter(|ph| ph.is_pending())
            .cloned()
            .collect()
    }

    fn add_unique(registry: &RefCell<Vec<String>>, entry: String) -> bool {
        let mut entries = registry.borrow_mut();
        if entries.contains(&entry) {
            return false;
        }
        entries.push(entry);
        true
    }
}

#[derive(Default)]
struct RendererInner {
    blocks: HashMap<String, Block>,
    /// Block names in declaration order.
    order: Vec<String>,
    /// Stack of open block instances; writes land in the top.
    open_blocks: Vec<Block>,
    /// Tasks that must complete before the wait loop and final assembly.
    pre_finish: Vec<Task>,
}

/// Drives template execution for one scope. Clones share the same scope.
#[derive(Clone)]
pub struct Renderer {
    shared: Rc<RenderShared>,
    inner: Rc<RefCell<RendererInner>>,
    /// Root namespace to republish into; `None` on the root renderer.
    root: Option<Weak<RefCell<RendererInner>>>,
    /// Disambiguation suffix assigned at child creation; unused on the root.
    suffix: u64,
}

impl Renderer {
    #[must_use]
    pub fn new(config: RenderConfig) -> Self {
        Self {
            shared: Rc::new(RenderShared::new(config)),
            inner: Rc::new(RefCell::new(RendererInner::default())),
            root: None,
            suffix: 0,
        }
    }

    /// Create a child renderer: private block namespace, shared counters and
    /// root registries. Its blocks republish into the root at finish time.
    #[must_use]
    pub fn child(&self) -> Renderer {
        let root = match &self.root {
            Some(weak) => Some(weak.clone()),
            None => Some(Rc::downgrade(&self.inner)),
        };
        Renderer {
            shared: self.shared.clone(),
            inner: Rc::new(RefCell::new(RendererInner::default())),
            root,
            suffix: self.shared.next_suffix(),
        }
    }

    /// Open the named block and make it the write target.
    ///
    /// Unseen names create a block. A push-mode restart of a push-mode name
    /// creates a sibling instance that merges at assembly; any other restart
    /// retires the previous instance under a suffixed name and replaces it.
    pub fn start_block(&self, name: &str, mode: ContentMode) -> Block {
        let mut inner = self.inner.borrow_mut();
        let block = match inner.blocks.get(name).cloned() {
            None => {
                let block = Block::new(name.to_string(), mode, self.shared.clone());
                inner.blocks.insert(name.to_string(), block.clone());
                inner.order.push(name.to_string());
                block
            }
            Some(head) if mode.is_push() && head.mode().is_push() => {
                let sibling = Block::new(name.to_string(), mode, self.shared.clone());
                head.add_other(sibling.clone());
                sibling
            }
            Some(previous) => {
                let retired = format!("{name}__{}", self.shared.next_suffix());
                tracing::debug!(name, retired = %retired, "replacing block instance");
                inner.blocks.insert(retired.clone(), previous);
                inner.order.push(retired);
                let block = Block::new(name.to_string(), mode, self.shared.clone());
                inner.blocks.insert(name.to_string(), block.clone());
                block
            }
        };
        inner.open_blocks.push(block.clone());
        block
    }

    /// Close the innermost open block.
    ///
    /// # Panics
    /// Panics when no block is open.
    pub fn end_block(&self) {
        let popped = self.inner.borrow_mut().open_blocks.pop();
        assert!(popped.is_some(), "end_block without a matching start_block");
    }

    fn current(&self) -> Block {
        self.inner
            .borrow()
            .open_blocks
            .last()
            .cloned()
            .unwrap_or_else(|| panic!("no open block; template code must start a block first"))
    }

    /// Look up a block by name in this scope.
    #[must_use]
    pub fn block(&self, name: &str) -> Option<Block> {
        self.inner.borrow().blocks.get(name).cloned()
    }

    /// Append raw markup produced by compiled template code.
    pub fn print(&self, text: impl Into<String>) -> Line {
        self.current().push(Content::Text(text.into()))
    }

    /// Append an expression-evaluator value, coerced to escaped text.
    pub fn print_value(&self, value: serde_json::Value) -> Line {
        self.current().push(Content::Value(value))
    }

    /// Append a nested block line.
    pub fn print_block(&self, block: Block) -> Line {
        self.current().push(Content::Block(block))
    }

    /// Open an element; writes nest inside it until `close_element`.
    pub fn open_element(&self, node: Rc<dyn ElementNode>) -> Line {
        self.current().push_element(node)
    }

    pub fn close_element(&self) {
        self.current().close_element();
    }

    /// Append a placeholder line for a deferred expression and register it
    /// with the wait loop. The caller attaches the resolver.
    pub fn begin_expression(&self) -> Placeholder {
        let placeholder = Placeholder::new();
        self.current()
            .push(Content::Placeholder(placeholder.clone()));
        self.shared.register_placeholder(placeholder.clone());
        placeholder
    }

    /// Exclude a line's subtree from normal scheduler flow; its work is
    /// driven explicitly later.
    pub fn delay(&self, line: &Line) {
        self.shared.delayed.borrow_mut().insert(line.id());
    }

    /// Register work that must complete before the placeholder wait loop and
    /// final assembly run.
    pub fn add_pre_finish_task<F>(&self, task: F)
    where
        F: Future<Output = Result<(), RenderError>> + 'static,
    {
        self.inner.borrow_mut().pre_finish.push(Box::pin(task));
    }

    /// Register a script on the shared root collection; duplicates are
    /// dropped.
    pub fn add_script(&self, script: impl Into<String>) -> bool {
        RenderShared::add_unique(&self.shared.scripts, script.into())
    }

    pub fn add_style(&self, style: impl Into<String>) -> bool {
        RenderShared::add_unique(&self.shared.styles, style.into())
    }

    pub fn add_head_tag(&self, tag: impl Into<String>) -> bool {
        RenderShared::add_unique(&self.shared.head_tags, tag.into())
    }

    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.shared.scripts.borrow().clone()
    }

    #[must_use]
    pub fn styles(&self) -> Vec<String> {
        self.shared.styles.borrow().clone()
    }

    #[must_use]
    pub fn head_tags(&self) -> Vec<String> {
        self.shared.head_tags.borrow().clone()
    }

    /// Finish the named block: drain pre-finish tasks, wait for known
    /// placeholders (bounded, best-effort), assemble, and - on child
    /// renderers - republish this scope's blocks into the root.
    ///
    /// Returns `None` when the name was never started. Task failures fail the
    /// returned future; wait-loop timeouts do not.
    pub async fn finish(&self, name: &str) -> Result<Option<Block>, RenderError> {
        let pre_finish = std::mem::take(&mut self.inner.borrow_mut().pre_finish);
        scheduler::run_group(pre_finish, self.shared.config.max_concurrent_tasks).await?;

        self.wait_for_placeholders().await;

        let block = self.inner.borrow().blocks.get(name).cloned();
        let Some(block) = block else {
            tracing::debug!(name, "finish on unknown block");
            return Ok(None);
        };
        block.assemble().await?;

        self.republish();
        Ok(Some(block))
    }

    /// Iteratively resolve every known unfinished placeholder. Resolving one
    /// may register new ones (a title depending on sibling content), so the
    /// snapshot is retaken each round up to the configured retry bound, then
    /// the render proceeds best-effort with whatever settled.
    async fn wait_for_placeholders(&self) {
        let retries = self.shared.config.placeholder_wait_retries;
        let timeout = self.shared.config.placeholder_timeout();

        for attempt in 0..=retries {
            let pending = self.shared.pending_placeholders();
            if pending.is_empty() {
                return;
            }
            if attempt == retries {
                tracing::warn!(
                    pending = pending.len(),
                    retries,
                    "placeholder wait exhausted; proceeding with resolved content only"
                );
                return;
            }
            for placeholder in pending {
                match tokio::time::timeout(timeout, placeholder.content()).await {
                    Ok(Ok(_)) => {}
                    // The failed settlement is cached; assembly of the owning
                    // block reports it.
                    Ok(Err(error)) => {
                        tracing::warn!(%error, "placeholder resolver failed during wait");
                    }
                    Err(_) => {
                        tracing::warn!(?timeout, "placeholder timed out during wait");
                    }
                }
            }
        }
    }

    /// Publish a child scope's blocks into the root namespace under this
    /// child's suffix. No-op on the root renderer.
    fn republish(&self) {
        let Some(root) = self.root.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let mut root_inner = root.borrow_mut();
        let inner = self.inner.borrow();
        for name in &inner.order {
            if let Some(block) = inner.blocks.get(name) {
                let published = format!("{name}__{}", self.suffix);
                tracing::debug!(name = %name, published = %published, "republishing child block");
                root_inner.blocks.insert(published.clone(), block.clone());
                root_inner.order.push(published);
            }
        }
    }
}
