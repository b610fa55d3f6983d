//! Deferred values with at-most-once resolution.
//!
//! A placeholder carries an optional resolver. The first `content()` call
//! consumes and runs it; every later call replays the cached settlement,
//! value or error alike. Concurrent calls during the in-flight window park on
//! oneshot waiters so the resolver still runs exactly once.

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use tokio::sync::oneshot;

use crate::errors::RenderError;
use crate::line::WeakLine;

type ResolverFuture = LocalBoxFuture<'static, Result<String, RenderError>>;
type Resolver = Box<dyn FnOnce() -> ResolverFuture>;
type Settlement = Result<String, RenderError>;

enum ResolveState {
    /// No resolver registered. Resolving settles empty.
    Unset,
    /// Resolver registered, not yet run.
    Ready(Resolver),
    /// Resolver running; concurrent callers park here.
    InFlight(Vec<oneshot::Sender<Settlement>>),
    /// Resolver ran (or was cancelled); the settlement replays forever.
    Settled(Settlement),
}

struct PlaceholderInner {
    state: ResolveState,
    /// Owning line, for dirty propagation when a resolver is registered late.
    owner: Option<WeakLine>,
}

/// A deferred value wrapper with at-most-once resolution.
#[derive(Clone)]
pub struct Placeholder {
    inner: Rc<RefCell<PlaceholderInner>>,
}

impl Placeholder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(PlaceholderInner {
                state: ResolveState::Unset,
                owner: None,
            })),
        }
    }

    /// Register the resolver.
    ///
    /// # Panics
    /// A resolver may be registered at most once; registering a second one
    /// (or registering after resolution started) is a contract violation.
    pub fn set_resolver<F, Fut>(&self, resolver: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<String, RenderError>> + 'static,
    {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(
                matches!(inner.state, ResolveState::Unset),
                "placeholder resolver may only be registered once"
            );
            inner.state = ResolveState::Ready(Box::new(move || resolver().boxed_local()));
        }
        self.mark_owner_dirty();
    }

    pub(crate) fn attach_owner(&self, owner: WeakLine) {
        self.inner.borrow_mut().owner = Some(owner);
    }

    fn mark_owner_dirty(&self) {
        let owner = self.inner.borrow().owner.clone();
        if let Some(line) = owner.and_then(|weak| weak.upgrade()) {
            line.mark_branch_dirty();
        }
    }

    /// Whether the placeholder has settled (value, error, or cancelled-empty).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.inner.borrow().state, ResolveState::Settled(_))
    }

    /// Whether a resolver is registered or already running.
    ///
    /// The wait loop only awaits pending placeholders: awaiting a resolver-less
    /// one would consume it and settle it empty, breaking the case where a
    /// sibling's resolver attaches this one's resolver later in the same round.
    /// Resolver-less placeholders still settle (empty) when assembly resolves
    /// their line.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(
            self.inner.borrow().state,
            ResolveState::Ready(_) | ResolveState::InFlight(_)
        )
    }

    /// The cached settlement, if any. Used at serialization time; an
    /// unsettled placeholder serializes as nothing (best-effort give-up).
    #[must_use]
    pub fn cached(&self) -> Option<Settlement> {
        match &self.inner.borrow().state {
            ResolveState::Settled(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Resolve the placeholder, running the resolver at most once.
    ///
    /// Cancellation-safe in the best-effort sense: if the driving future is
    /// dropped mid-resolution (wait-loop timeout, aborted task group), the
    /// placeholder settles empty rather than wedging later callers.
    pub async fn content(&self) -> Settlement {
        enum Action {
            Done(Settlement),
            Wait(oneshot::Receiver<Settlement>),
            Run(Resolver),
        }

        let action = {
            let mut inner = self.inner.borrow_mut();
            match std::mem::replace(&mut inner.state, ResolveState::InFlight(Vec::new())) {
                ResolveState::Settled(result) => {
                    inner.state = ResolveState::Settled(result.clone());
                    Action::Done(result)
                }
                ResolveState::Unset => {
                    // No resolver: finished with empty content.
                    inner.state = ResolveState::Settled(Ok(String::new()));
                    Action::Done(Ok(String::new()))
                }
                ResolveState::InFlight(mut waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    inner.state = ResolveState::InFlight(waiters);
                    Action::Wait(rx)
                }
                ResolveState::Ready(resolver) => Action::Run(resolver),
            }
        };

        match action {
            Action::Done(result) => result,
            Action::Wait(rx) => rx.await.unwrap_or_else(|_| {
                Err(RenderError::resolver("resolver dropped before settling"))
            }),
            Action::Run(resolver) => {
                let mut guard = SettleOnDrop {
                    placeholder: self.clone(),
                    armed: true,
                };
                let result = resolver().await;
                guard.armed = false;
                self.settle(result.clone());
                result
            }
        }
    }

    fn settle(&self, result: Settlement) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            let previous = std::mem::replace(&mut inner.state, ResolveState::Settled(result.clone()));
            match previous {
                ResolveState::InFlight(waiters) => waiters,
                _ => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Default for Placeholder {
    fn default() -> Self {
        Self::new()
    }
}

/// Settles the placeholder empty if its driver is dropped before settling.
///
/// The at-most-once contract forbids re-running the (already consumed)
/// resolver, so a cancelled resolution becomes "finished with nothing" - the
/// documented best-effort outcome of the wait-loop timeout.
struct SettleOnDrop {
    placeholder: Placeholder,
    armed: bool,
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("placeholder resolver cancelled before settling; settling empty");
            self.placeholder.settle(Ok(String::new()));
        }
    }
}
