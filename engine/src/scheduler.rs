//! Task discovery and bounded-parallel draining.
//!
//! The scheduler walks a line list depth-first and splits outstanding work
//! into two ordered groups: pre-tasks, which must fully finish first, and
//! content tasks, which may run with bounded concurrency. Results are written
//! back into fixed line slots, so serialization order never depends on task
//! completion order.

use std::collections::HashSet;

use futures_util::StreamExt;
use futures_util::future::LocalBoxFuture;
use futures_util::stream;

use weft_types::{Capabilities, DirtyFlags, LineId};

use crate::errors::RenderError;
use crate::line::{Line, LineView};

pub(crate) type Task = LocalBoxFuture<'static, Result<(), RenderError>>;

pub(crate) struct TaskGroups {
    pub pre_tasks: Vec<Task>,
    pub content_tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkOptions {
    /// Process every line even when its dirty bit is unset. Used where dirty
    /// state cannot be trusted: one-shot complete renders, post-mutation.
    pub forced: bool,
    /// Whether this walk belongs to a genuine assembly pass; pre-assembly
    /// hooks run only then.
    pub assembly_pass: bool,
}

/// Depth-first walk producing the two ordered task groups.
///
/// Callers must fully drain `pre_tasks` before starting `content_tasks`.
pub(crate) fn collect_tasks(
    lines: &[Line],
    delayed: &HashSet<LineId>,
    opts: WalkOptions,
) -> TaskGroups {
    let mut groups = TaskGroups {
        pre_tasks: Vec::new(),
        content_tasks: Vec::new(),
    };
    walk(lines, delayed, opts, &mut groups);
    groups
}

fn walk(lines: &[Line], delayed: &HashSet<LineId>, opts: WalkOptions, groups: &mut TaskGroups) {
    for line in lines {
        let dirty = line.dirty();
        if !opts.forced && dirty.is_clean() {
            continue;
        }

        let caps = line.capabilities();
        let view = line.view();

        if opts.assembly_pass
            && caps.contains(Capabilities::PRE_ASSEMBLE)
            && let LineView::Element { node, .. } = &view
        {
            groups.pre_tasks.push(node.clone().pre_assemble());
        }

        // Registered pre-task lists drain ahead of every content task.
        if line.has_pre_tasks() {
            groups.pre_tasks.append(&mut line.take_pre_tasks());
        }

        match view {
            LineView::Text => {}
            LineView::Placeholder(placeholder) => {
                groups.content_tasks.push(Box::pin(async move {
                    placeholder.content().await?;
                    Ok(())
                }));
            }
            LineView::Block(block) => {
                if dirty.contains(DirtyFlags::NEEDS_ASSEMBLY) || (opts.forced && !block.is_done()) {
                    let line = line.clone();
                    groups.content_tasks.push(Box::pin(async move {
                        block.assemble().await?;
                        line.clear_dirty(DirtyFlags::NEEDS_ASSEMBLY);
                        Ok(())
                    }));
                }
            }
            LineView::Element { node, children } => {
                if caps.contains(Capabilities::RESOLVE_CONTENT) {
                    let line = line.clone();
                    groups.content_tasks.push(Box::pin(async move {
                        let content = node.resolve_content().await?;
                        line.set_resolved(content);
                        Ok(())
                    }));
                }
                // Lines explicitly deferred past normal flow are skipped here
                // to avoid double-processing.
                let recurse = !delayed.contains(&line.id())
                    && (opts.forced || dirty.contains(DirtyFlags::HAS_DIRTY_CHILDREN));
                if recurse {
                    walk(&children, delayed, opts, groups);
                }
            }
        }
    }
}

/// Drain one task group with at most `limit` tasks in flight; excess work
/// queues FIFO. The first error aborts the group: remaining in-flight tasks
/// are dropped and the error propagates.
pub(crate) async fn run_group(tasks: Vec<Task>, limit: usize) -> Result<(), RenderError> {
    if tasks.is_empty() {
        return Ok(());
    }
    let limit = limit.max(1);
    tracing::debug!(tasks = tasks.len(), limit, "draining task group");

    let mut in_flight = stream::iter(tasks).buffer_unordered(limit);
    while let Some(result) = in_flight.next().await {
        result?;
    }
    Ok(())
}

/// Clear render/child dirty bits after a walk's tasks all settled.
///
/// Delayed subtrees keep their bits: their work has not run yet.
pub(crate) fn clear_settled(lines: &[Line], delayed: &HashSet<LineId>) {
    for line in lines {
        if delayed.contains(&line.id()) {
            continue;
        }
        line.clear_dirty(DirtyFlags::NEEDS_RENDER | DirtyFlags::HAS_DIRTY_CHILDREN);
        if let LineView::Element { children, .. } = line.view() {
            clear_settled(&children, delayed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::time::Duration;

    use weft_types::{DirtyFlags, LineId};

    use super::{WalkOptions, collect_tasks, run_group};
    use crate::errors::RenderError;
    use crate::line::Line;
    use crate::node::HtmlElement;
    use crate::placeholder::Placeholder;

    fn element(id: u64) -> Line {
        Line::element(LineId::new(id), Rc::new(HtmlElement::new("div")))
    }

    fn placeholder_line(id: u64) -> Line {
        let ph = Placeholder::new();
        ph.set_resolver(|| async { Ok("v".to_string()) });
        Line::placeholder(LineId::new(id), ph)
    }

    #[test]
    fn non_forced_walk_skips_clean_subtrees() {
        let clean_branch = element(1);
        let settled = placeholder_line(2);
        settled.clear_dirty(DirtyFlags::NEEDS_RENDER);
        clean_branch.append_child(&settled);
        clean_branch.clear_dirty(DirtyFlags::HAS_DIRTY_CHILDREN);

        let dirty_branch = element(3);
        dirty_branch.append_child(&placeholder_line(4));

        let lines = vec![clean_branch, dirty_branch];
        let delayed = HashSet::new();

        let lazy = collect_tasks(
            &lines,
            &delayed,
            WalkOptions {
                forced: false,
                assembly_pass: true,
            },
        );
        assert_eq!(lazy.content_tasks.len(), 1);

        let forced = collect_tasks(
            &lines,
            &delayed,
            WalkOptions {
                forced: true,
                assembly_pass: true,
            },
        );
        assert_eq!(forced.content_tasks.len(), 2);
    }

    #[test]
    fn delayed_lines_are_not_recursed_into() {
        let parent = element(1);
        parent.append_child(&placeholder_line(2));

        let mut delayed = HashSet::new();
        delayed.insert(parent.id());

        let groups = collect_tasks(
            std::slice::from_ref(&parent),
            &delayed,
            WalkOptions {
                forced: true,
                assembly_pass: true,
            },
        );
        assert!(groups.content_tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_stays_within_bound() {
        let current = Rc::new(Cell::new(0usize));
        let peak = Rc::new(Cell::new(0usize));

        let tasks: Vec<super::Task> = (0..4)
            .map(|_| {
                let current = current.clone();
                let peak = peak.clone();
                let task: super::Task = Box::pin(async move {
                    current.set(current.get() + 1);
                    peak.set(peak.get().max(current.get()));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.set(current.get() - 1);
                    Ok(())
                });
                task
            })
            .collect();

        run_group(tasks, 2).await.expect("group must succeed");
        assert!(peak.get() <= 2, "peak in-flight {} exceeded bound", peak.get());
    }

    #[tokio::test]
    async fn first_error_aborts_the_group() {
        let completions = Rc::new(Cell::new(0u32));
        let seen = completions.clone();
        let ok_task: super::Task = Box::pin(async move {
            seen.set(seen.get() + 1);
            Ok(())
        });
        let failing: super::Task =
            Box::pin(async { Err(RenderError::content("late failure")) });

        let err = run_group(vec![failing, ok_task], 1)
            .await
            .expect_err("group must fail");
        assert_eq!(err, RenderError::content("late failure"));
        // With limit 1 the failing task runs first; the group aborts before
        // the second task is admitted.
        assert_eq!(completions.get(), 0);
    }
}
