//! Named, ordered content buffers and their assembly.
//!
//! A block collects lines during synchronous template execution, then
//! `assemble()` resolves whatever async content the lines carry and fixes the
//! final serialization. Assembly is memoized: every call returns the same
//! shared pledge, and the pledge replays one settlement - success or error -
//! to every awaiter. Serialization before the pledge settles successfully is
//! a contract violation and panics.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, Shared};

use weft_types::{
    BlockId, ContentMode, escape_html, is_blank_markup, trim_leading_whitespace,
    trim_trailing_whitespace,
};

use crate::errors::RenderError;
use crate::line::{Line, LineView};
use crate::node::{ElementNode, HtmlElement};
use crate::placeholder::Placeholder;
use crate::renderer::RenderShared;
use crate::scheduler::{self, WalkOptions};

/// The memoized assembly future of one block instance.
pub type AssemblyPledge = Shared<LocalBoxFuture<'static, Result<(), RenderError>>>;

/// Appendable content. Values without a rendering capability are coerced to
/// escaped text, since arbitrary objects cannot be tree children.
pub enum Content {
    /// Raw markup emitted by compiled template code; trusted, not escaped.
    Text(String),
    Element(Rc<dyn ElementNode>),
    Block(Block),
    Placeholder(Placeholder),
    /// An expression-evaluator value, coerced to escaped text.
    Value(serde_json::Value),
}

/// One serialized unit of a block's output.
#[derive(Clone)]
pub enum OutputPart {
    Text(String),
    Element(Line),
}

impl OutputPart {
    #[must_use]
    pub fn to_html(&self) -> String {
        match self {
            OutputPart::Text(text) => text.clone(),
            OutputPart::Element(line) => line.to_html(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrimPoint {
    /// Buffer index the point was recorded at.
    index: usize,
    /// Whether whole blank lines back to the previous checkpoint are deleted.
    blank: bool,
}

struct BlockInner {
    id: BlockId,
    name: String,
    mode: ContentMode,
    lines: Vec<Line>,
    /// Currently open element lines; writes land in the innermost.
    open_elements: Vec<Line>,
    pledge: Option<AssemblyPledge>,
    done: bool,
    /// Sibling instances accumulated under the same name, push mode only,
    /// in `start()` order.
    others: Vec<Block>,
    /// Disabled on merge participants to prevent recursive joining.
    join_enabled: bool,
    /// Push-mode container wrapper, created at assembly time.
    container: Option<Line>,
    trim_points: Vec<TrimPoint>,
    checkpoints: Vec<usize>,
    shared: Rc<RenderShared>,
}

/// A named ordered buffer of lines. Clones share the same instance.
#[derive(Clone)]
pub struct Block {
    inner: Rc<RefCell<BlockInner>>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Block")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("mode", &inner.mode)
            .field("lines", &inner.lines.len())
            .field("done", &inner.done)
            .finish_non_exhaustive()
    }
}

impl Block {
    pub(crate) fn new(name: String, mode: ContentMode, shared: Rc<RenderShared>) -> Self {
        let id = shared.next_block_id();
        tracing::debug!(%id, name = %name, ?mode, "block created");
        Self {
            inner: Rc::new(RefCell::new(BlockInner {
                id,
                name,
                mode,
                lines: Vec::new(),
                open_elements: Vec::new(),
                pledge: None,
                done: false,
                others: Vec::new(),
                join_enabled: true,
                container: None,
                trim_points: Vec::new(),
                checkpoints: Vec::new(),
                shared,
            })),
        }
    }

    #[must_use]
    pub fn id(&self) -> BlockId {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    #[must_use]
    pub fn mode(&self) -> ContentMode {
        self.inner.borrow().mode
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.borrow().done
    }

    /// Number of top-level lines in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().lines.is_empty()
    }

    fn assert_mutable(inner: &BlockInner, op: &str) {
        assert!(
            inner.pledge.is_none() && !inner.done,
            "Block::{op} after assembly started; blocks are mutable only during template execution"
        );
    }

    /// Append content: to the buffer, or into the innermost open element.
    pub fn push(&self, content: Content) -> Line {
        let line = {
            let inner = self.inner.borrow();
            Self::assert_mutable(&inner, "push");
            let id = inner.shared.next_line_id();
            match content {
                Content::Text(text) => Line::text(id, text),
                Content::Element(node) => Line::element(id, node),
                Content::Block(block) => Line::block(id, block),
                Content::Placeholder(placeholder) => Line::placeholder(id, placeholder),
                Content::Value(value) => Line::text(id, coerce_value(&value)),
            }
        };
        self.append_line(&line);
        line
    }

    /// `push` an element and keep it open: subsequent writes nest inside it
    /// until the matching `close_element`.
    pub fn push_element(&self, node: Rc<dyn ElementNode>) -> Line {
        let line = self.push(Content::Element(node));
        self.inner.borrow_mut().open_elements.push(line.clone());
        line
    }

    /// Close the innermost open element.
    ///
    /// # Panics
    /// Panics when no element is open; compiled template code must emit
    /// balanced open/close pairs.
    pub fn close_element(&self) {
        let popped = self.inner.borrow_mut().open_elements.pop();
        assert!(popped.is_some(), "close_element without a matching open element");
    }

    fn append_line(&self, line: &Line) {
        let open = self.inner.borrow().open_elements.last().cloned();
        match open {
            Some(element) => element.append_child(line),
            None => self.inner.borrow_mut().lines.push(line.clone()),
        }
    }

    /// Record a trim point at the current buffer index: trailing whitespace
    /// before it and leading whitespace after it are erased at serialization.
    pub fn trim(&self) {
        let mut inner = self.inner.borrow_mut();
        let index = inner.lines.len();
        inner.trim_points.push(TrimPoint { index, blank: false });
    }

    /// Like [`trim`](Self::trim), but additionally deletes whole lines back to
    /// the previous checkpoint when everything between produced only
    /// whitespace markup.
    pub fn trim_blank(&self) {
        let mut inner = self.inner.borrow_mut();
        let index = inner.lines.len();
        inner.trim_points.push(TrimPoint { index, blank: true });
    }

    /// Record a checkpoint bounding later `trim_blank` deletion.
    pub fn checkpoint(&self) {
        let mut inner = self.inner.borrow_mut();
        let index = inner.lines.len();
        inner.checkpoints.push(index);
    }

    pub(crate) fn add_other(&self, other: Block) {
        self.inner.borrow_mut().others.push(other);
    }

    fn set_join_enabled(&self, enabled: bool) {
        self.inner.borrow_mut().join_enabled = enabled;
    }

    /// Extract `count` lines starting at `index` into an independent block.
    ///
    /// The new block must be assembled separately if it holds async content.
    pub fn splice(&self, index: usize, count: usize) -> Block {
        let mut inner = self.inner.borrow_mut();
        Self::assert_mutable(&inner, "splice");
        let end = (index + count).min(inner.lines.len());
        let index = index.min(end);

        let extracted = Block::new(
            format!("{}@{}", inner.name, inner.shared.next_suffix()),
            inner.mode,
            inner.shared.clone(),
        );
        {
            let mut target = extracted.inner.borrow_mut();
            target.lines = inner.lines.drain(index..end).collect();

            let mut kept = Vec::new();
            for point in inner.trim_points.drain(..) {
                if point.index >= index && point.index < end {
                    target.trim_points.push(TrimPoint {
                        index: point.index - index,
                        blank: point.blank,
                    });
                } else if point.index >= end {
                    kept.push(TrimPoint {
                        index: point.index - (end - index),
                        blank: point.blank,
                    });
                } else {
                    kept.push(point);
                }
            }
            inner.trim_points = kept;

            let mut kept_checkpoints = Vec::new();
            for checkpoint in inner.checkpoints.drain(..) {
                if checkpoint >= index && checkpoint < end {
                    target.checkpoints.push(checkpoint - index);
                } else if checkpoint >= end {
                    kept_checkpoints.push(checkpoint - (end - index));
                } else {
                    kept_checkpoints.push(checkpoint);
                }
            }
            inner.checkpoints = kept_checkpoints;
        }
        extracted
    }

    /// Assemble the block: idempotent, returns the memoized pledge on every
    /// call.
    pub fn assemble(&self) -> AssemblyPledge {
        let mut inner = self.inner.borrow_mut();
        if let Some(pledge) = &inner.pledge {
            return pledge.clone();
        }
        tracing::debug!(id = %inner.id, name = %inner.name, "assembly started");
        let fut: LocalBoxFuture<'static, Result<(), RenderError>> =
            Box::pin(assemble_future(self.clone()));
        let pledge = fut.shared();
        inner.pledge = Some(pledge.clone());
        pledge
    }

    /// Run the scheduler over this instance's own lines and, in push mode,
    /// wrap the result into one container element.
    async fn assemble_own(&self) -> Result<(), RenderError> {
        let (lines, delayed, limit, forced) = {
            let inner = self.inner.borrow();
            (
                inner.lines.clone(),
                inner.shared.delayed_snapshot(),
                inner.shared.config.max_concurrent_tasks,
                // Dirty state is only trusted in incremental renders.
                !inner.shared.config.incremental,
            )
        };

        let groups = scheduler::collect_tasks(
            &lines,
            &delayed,
            WalkOptions {
                forced,
                assembly_pass: true,
            },
        );
        scheduler::run_group(groups.pre_tasks, limit).await?;
        scheduler::run_group(groups.content_tasks, limit).await?;
        scheduler::clear_settled(&lines, &delayed);

        let mut inner = self.inner.borrow_mut();
        if inner.mode.is_push() {
            let tag = inner.shared.config.container_tag.clone();
            let node: Rc<dyn ElementNode> = Rc::new(HtmlElement::new(tag));
            let container = Line::element(inner.shared.next_line_id(), node);
            // Children are the trimmed output parts, so every post-assembly
            // serialization of the container shows the same markup.
            let trimmed = trimmed_groups(&inner.lines, &inner.trim_points, &inner.checkpoints);
            for part in trimmed {
                match part {
                    OutputPart::Text(text) => {
                        container.append_child(&Line::text(inner.shared.next_line_id(), text));
                    }
                    OutputPart::Element(line) => container.append_child(&line),
                }
            }
            inner.container = Some(container);
        }
        Ok(())
    }

    fn mark_done(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.done = true;
        tracing::debug!(id = %inner.id, name = %inner.name, "assembly done");
    }

    /// Serialize to markup. Valid only after assembly settled successfully.
    #[must_use]
    pub fn to_html(&self) -> String {
        self.to_elements().iter().map(OutputPart::to_html).collect()
    }

    /// The assembled output as an ordered list of nodes and strings.
    /// Valid only after assembly settled successfully.
    #[must_use]
    pub fn to_elements(&self) -> Vec<OutputPart> {
        let inner = self.inner.borrow();
        Self::assert_done(&inner);

        let mut parts = match &inner.container {
            Some(container) => vec![OutputPart::Element(container.clone())],
            None => trimmed_groups(&inner.lines, &inner.trim_points, &inner.checkpoints),
        };
        for other in &inner.others {
            parts.extend(other.to_elements());
        }
        parts
    }

    fn assert_done(inner: &BlockInner) {
        assert!(
            inner.done,
            "Block `{}` serialized before assembly settled",
            inner.name
        );
    }
}

async fn assemble_future(block: Block) -> Result<(), RenderError> {
    let (mode, join_enabled, others) = {
        let inner = block.inner.borrow();
        (inner.mode, inner.join_enabled, inner.others.clone())
    };

    if mode.is_push() && join_enabled && !others.is_empty() {
        // Merge path: assemble every sibling instance and self with joining
        // disabled, then concatenation happens at serialization in
        // declaration order.
        block.set_join_enabled(false);
        for other in &others {
            other.set_join_enabled(false);
        }
        block.assemble_own().await?;
        for other in &others {
            other.assemble().await?;
        }
    } else {
        block.assemble_own().await?;
    }

    block.mark_done();
    Ok(())
}

fn coerce_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => escape_html(text),
        other => escape_html(&other.to_string()),
    }
}

/// Render lines to output parts and apply trim points at line boundaries.
fn trimmed_groups(
    lines: &[Line],
    trim_points: &[TrimPoint],
    checkpoints: &[usize],
) -> Vec<OutputPart> {
    let mut groups: Vec<Vec<OutputPart>> = lines.iter().map(line_parts).collect();

    for point in trim_points {
        let boundary = point.index.min(groups.len());

        if point.blank {
            let checkpoint = checkpoints
                .iter()
                .copied()
                .filter(|c| *c <= boundary)
                .max()
                .unwrap_or(0);
            let span: Vec<&OutputPart> = groups[checkpoint..boundary].iter().flatten().collect();
            let all_blank = span
                .iter()
                .all(|part| matches!(part, OutputPart::Text(text) if is_blank_markup(text)));
            if all_blank {
                for group in &mut groups[checkpoint..boundary] {
                    group.clear();
                }
            }
        }

        // Trailing whitespace immediately before the boundary.
        'backward: for group in groups[..boundary].iter_mut().rev() {
            for part in group.iter_mut().rev() {
                match part {
                    OutputPart::Text(text) => {
                        trim_trailing_whitespace(text);
                        if !text.is_empty() {
                            break 'backward;
                        }
                    }
                    OutputPart::Element(_) => break 'backward,
                }
            }
        }

        // Leading whitespace at and after the boundary.
        'forward: for group in groups[boundary..].iter_mut() {
            for part in group.iter_mut() {
                match part {
                    OutputPart::Text(text) => {
                        trim_leading_whitespace(text);
                        if !text.is_empty() {
                            break 'forward;
                        }
                    }
                    OutputPart::Element(_) => break 'forward,
                }
            }
        }
    }

    groups.into_iter().flatten().collect()
}

fn line_parts(line: &Line) -> Vec<OutputPart> {
    match line.view() {
        LineView::Text => vec![OutputPart::Text(line.to_html())],
        LineView::Element { .. } => vec![OutputPart::Element(line.clone())],
        LineView::Block(block) => block.to_elements(),
        LineView::Placeholder(placeholder) => {
            let text = match placeholder.cached() {
                Some(Ok(content)) => content,
                // Unsettled or errored: nothing to contribute; an errored
                // placeholder already failed its assembly attempt.
                _ => String::new(),
            };
            vec![OutputPart::Text(text)]
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;
    use weft_types::ContentMode;

    use super::{Block, Content};
    use crate::config::RenderConfig;
    use crate::errors::RenderError;
    use crate::node::HtmlElement;
    use crate::placeholder::Placeholder;
    use crate::renderer::Renderer;

    fn block(mode: ContentMode) -> Block {
        let renderer = Renderer::new(RenderConfig::default());
        let block = renderer.start_block("test", mode);
        renderer.end_block();
        block
    }

    #[tokio::test]
    async fn repeat_assemble_returns_the_same_pledge() {
        let block = block(ContentMode::Replace);
        block.push(Content::Text("x".to_string()));

        let first = block.assemble();
        let second = block.assemble();
        assert!(first.ptr_eq(&second));

        first.await.expect("assembly");
        assert!(block.is_done());
        assert_eq!(block.to_html(), "x");
    }

    #[tokio::test]
    async fn open_elements_nest_subsequent_writes() {
        let block = block(ContentMode::Replace);
        block.push_element(Rc::new(HtmlElement::new("ul")));
        block.push_element(Rc::new(HtmlElement::new("li")));
        block.push(Content::Text("one".to_string()));
        block.close_element();
        block.close_element();
        block.push(Content::Text("after".to_string()));

        block.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "<ul><li>one</li></ul>after");
    }

    #[tokio::test]
    async fn values_coerce_to_escaped_text() {
        let block = block(ContentMode::Replace);
        block.push(Content::Value(json!("a<b>")));
        block.push(Content::Value(json!(42)));
        block.push(Content::Value(json!(null)));
        block.push(Content::Value(json!(true)));

        block.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "a&lt;b&gt;42true");
    }

    #[tokio::test]
    async fn trim_point_erases_surrounding_whitespace() {
        let block = block(ContentMode::Replace);
        block.push(Content::Text("a".to_string()));
        block.push(Content::Text("   ".to_string()));
        block.trim();
        block.push(Content::Text("\n  b".to_string()));

        block.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "ab");
    }

    #[tokio::test]
    async fn trim_blank_deletes_back_to_checkpoint() {
        let block = block(ContentMode::Replace);
        block.push(Content::Text("keep".to_string()));
        block.checkpoint();
        block.push(Content::Text("  ".to_string()));
        block.push(Content::Text("\n\t".to_string()));
        block.trim_blank();
        block.push(Content::Text("tail".to_string()));

        block.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "keeptail");
    }

    #[tokio::test]
    async fn trim_blank_keeps_non_blank_spans() {
        let block = block(ContentMode::Replace);
        block.checkpoint();
        block.push(Content::Text("real".to_string()));
        block.push(Content::Text(" ".to_string()));
        block.trim_blank();

        block.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "real");
    }

    #[tokio::test]
    async fn splice_extracts_an_independent_block() {
        let block = block(ContentMode::Replace);
        for text in ["a", "b", "c", "d"] {
            block.push(Content::Text(text.to_string()));
        }

        let extracted = block.splice(1, 2);
        assert_eq!(block.len(), 2);
        assert_eq!(extracted.len(), 2);

        block.assemble().await.expect("assembly");
        extracted.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "ad");
        assert_eq!(extracted.to_html(), "bc");
    }

    #[tokio::test]
    async fn failed_content_task_fails_the_pledge_and_replays() {
        let block = block(ContentMode::Replace);
        let ph = Placeholder::new();
        ph.set_resolver(|| async { Err(RenderError::resolver("boom")) });
        block.push(Content::Placeholder(ph));

        let first = block.assemble().await.expect_err("assembly must fail");
        let second = block.assemble().await.expect_err("replayed failure");
        assert_eq!(first, second);
        assert!(!block.is_done());
    }

    #[tokio::test]
    async fn push_mode_wraps_lines_in_a_container() {
        let block = block(ContentMode::Push);
        block.push(Content::Text("inner".to_string()));

        block.assemble().await.expect("assembly");
        assert_eq!(block.to_html(), "<div>inner</div>");

        let parts = block.to_elements();
        assert_eq!(parts.len(), 1);
        assert!(matches!(parts[0], super::OutputPart::Element(_)));
    }

    #[tokio::test]
    async fn container_serializations_agree_on_trims() {
        let block = block(ContentMode::Push);
        block.push(Content::Text("x  ".to_string()));
        block.trim();

        block.assemble().await.expect("assembly");
        // Both post-assembly forms must show the trimmed markup.
        assert_eq!(block.to_html(), "<div>x</div>");
        assert_eq!(block.to_elements()[0].to_html(), "<div>x</div>");
    }

    #[test]
    fn debug_output_names_the_block() {
        let block = block(ContentMode::Replace);
        block.push(Content::Text("x".to_string()));
        let repr = format!("{block:?}");
        assert!(repr.contains("\"test\""));
        assert!(repr.contains("done: false"));
    }

    #[test]
    #[should_panic(expected = "before assembly settled")]
    fn serializing_before_assembly_panics() {
        let block = block(ContentMode::Replace);
        block.push(Content::Text("x".to_string()));
        let _ = block.to_html();
    }

    #[test]
    #[should_panic(expected = "after assembly started")]
    fn pushing_after_assembly_started_panics() {
        let block = block(ContentMode::Replace);
        let _pledge = block.assemble();
        block.push(Content::Text("late".to_string()));
    }

    #[test]
    #[should_panic(expected = "matching open element")]
    fn unbalanced_close_element_panics() {
        let block = block(ContentMode::Replace);
        block.close_element();
    }
}
