//! Cross-module tests for the engine crate: full renders through the public
//! surface, exercising ordering, phasing, and dirty-tracking guarantees that
//! no single module owns.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;

use weft_types::{Capabilities, ContentMode, DirtyFlags};

use crate::config::RenderConfig;
use crate::errors::RenderError;
use crate::node::ElementNode;
use crate::placeholder::Placeholder;
use crate::renderer::Renderer;
use crate::{Block, Content};

fn test_renderer() -> Renderer {
    Renderer::new(RenderConfig::default())
}

/// An element whose content comes from an async hook and whose pre-assembly
/// hook must have run first.
struct AsyncCard {
    body: String,
    prepared: Rc<Cell<bool>>,
}

impl ElementNode for AsyncCard {
    fn tag(&self) -> &str {
        "card"
    }

    fn write_open(&self, out: &mut String) {
        out.push_str("<card>");
    }

    fn write_close(&self, out: &mut String) {
        out.push_str("</card>");
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PRE_ASSEMBLE | Capabilities::RESOLVE_CONTENT
    }

    fn pre_assemble(self: Rc<Self>) -> LocalBoxFuture<'static, Result<(), RenderError>> {
        let prepared = self.prepared.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(3)).await;
            prepared.set(true);
            Ok(())
        }
        .boxed_local()
    }

    fn resolve_content(self: Rc<Self>) -> LocalBoxFuture<'static, Result<String, RenderError>> {
        async move {
            if !self.prepared.get() {
                return Err(RenderError::content("content resolved before preparation"));
            }
            Ok(self.body.clone())
        }
        .boxed_local()
    }
}

#[tokio::test]
async fn pre_tasks_complete_before_content_tasks() {
    let r = test_renderer();
    let prepared = Rc::new(Cell::new(false));
    r.start_block("main", ContentMode::Replace);
    r.open_element(Rc::new(AsyncCard {
        body: "ready".to_string(),
        prepared,
    }));
    r.close_element();
    r.end_block();

    // The content hook errors if its pre-assembly hook has not finished, so a
    // successful render proves the phase ordering.
    let block = r.finish("main").await.expect("render").expect("known name");
    assert_eq!(block.to_html(), "<card>ready</card>");
}

#[tokio::test]
async fn declaration_order_survives_out_of_order_resolution() {
    let r = test_renderer();
    r.start_block("main", ContentMode::Replace);
    for (text, delay_ms) in [("a", 9u64), ("b", 1), ("c", 5)] {
        let ph = r.begin_expression();
        let text = text.to_string();
        ph.set_resolver(move || async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(text)
        });
    }
    r.end_block();

    let block = r.finish("main").await.expect("render").expect("known name");
    assert_eq!(block.to_html(), "abc");
}

#[tokio::test]
async fn nested_blocks_assemble_with_their_parent() {
    let r = test_renderer();
    let inner = {
        r.start_block("inner", ContentMode::Replace);
        let ph = r.begin_expression();
        ph.set_resolver(|| async { Ok("deep".to_string()) });
        r.end_block();
        r.block("inner").expect("just created")
    };

    r.start_block("outer", ContentMode::Replace);
    r.print("[");
    r.print_block(inner);
    r.print("]");
    r.end_block();

    let block = r.finish("outer").await.expect("render").expect("known name");
    assert_eq!(block.to_html(), "[deep]");
}

#[tokio::test]
async fn delayed_subtrees_keep_their_dirty_state() {
    let r = test_renderer();
    let block: Block = r.start_block("main", ContentMode::Replace);
    let element = r.open_element(Rc::new(crate::HtmlElement::new("div")));
    // Hand-built placeholder, deliberately not registered with the wait loop.
    block.push(Content::Placeholder(Placeholder::new()));
    r.close_element();
    r.end_block();
    r.delay(&element);

    let block = r.finish("main").await.expect("render").expect("known name");
    // The delayed subtree was skipped: its placeholder never settled and its
    // pending work is still marked.
    assert_eq!(block.to_html(), "<div></div>");
    assert!(element.dirty().contains(DirtyFlags::HAS_DIRTY_CHILDREN));
}

#[tokio::test]
async fn failed_assembly_yields_no_partial_output() {
    let r = test_renderer();
    r.start_block("main", ContentMode::Replace);
    r.print("visible");
    let ph = r.begin_expression();
    ph.set_resolver(|| async { Err(RenderError::resolver("backend down")) });
    r.end_block();

    let err = r.finish("main").await.expect_err("finish must fail");
    assert_eq!(err, RenderError::resolver("backend down"));
    let block = r.block("main").expect("block exists");
    assert!(!block.is_done());
}

#[tokio::test]
async fn incremental_render_still_processes_marked_lines() {
    let config = RenderConfig {
        incremental: true,
        ..RenderConfig::default()
    };
    let r = Renderer::new(config);
    r.start_block("main", ContentMode::Replace);
    r.print("static ");
    let ph = r.begin_expression();
    ph.set_resolver(|| async { Ok("dynamic".to_string()) });
    r.end_block();

    // Placeholder lines are born dirty, so a dirty-trusting walk finds them.
    let block = r.finish("main").await.expect("render").expect("known name");
    assert_eq!(block.to_html(), "static dynamic");
}

#[tokio::test]
async fn push_mode_merge_respects_trims_per_instance() {
    let r = test_renderer();
    r.start_block("list", ContentMode::Push);
    r.print("one  ");
    let first = r.block("list").expect("head instance");
    first.trim();
    r.end_block();

    r.start_block("list", ContentMode::Push);
    r.print("two");
    r.end_block();

    let block = r.finish("list").await.expect("render").expect("known name");
    assert_eq!(block.to_html(), "<div>one</div><div>two</div>");
}
