//! Hierarchical cancellation scopes.
//!
//! A [`Scope`] owns a set of child scopes and a list of stop hooks. Stopping
//! a scope is synchronous and ordered:
//!
//! ```text
//! stop(parent)
//!   ├── stop(children)   most recent first, recursively
//!   ├── run hooks        most recent first
//!   └── wake async waiters of stopped()
//! ```
//!
//! Every piece of work a resource binding starts hangs off one of these
//! scopes, so tearing down a key or an ownership episode is a single `stop()`
//! that has finished all cleanup by the time it returns.
//!
//! Hooks registered after the scope stopped run immediately. A panicking hook
//! is reported and does not prevent the remaining hooks from running.
//!
//! Work that finishes on its own calls [`Scope::complete`] instead: hooks are
//! dropped unrun, the scope never reports itself stopped, and a later stop of
//! an ancestor passes over it.

use crate::error::{ScopeError, SwrResult};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type StopHook = Box<dyn FnOnce() + Send + 'static>;

/// Node in a tree of cancellation contexts.
///
/// Cloning a `Scope` yields another handle to the same node.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    label: &'static str,
    state: Mutex<ScopeState>,
    stopped: watch::Sender<bool>,
}

#[derive(Default)]
struct ScopeState {
    stopped: bool,
    completed: bool,
    children: Vec<Scope>,
    hooks: Vec<StopHook>,
}

impl Scope {
    /// Create a detached root scope.
    pub fn root(label: &'static str) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                label,
                state: Mutex::new(ScopeState::default()),
                stopped,
            }),
        }
    }

    /// Label used in diagnostics.
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Create a child scope that is stopped whenever this scope stops.
    ///
    /// A child of an already stopped scope is born stopped.
    pub fn child(&self, label: &'static str) -> Scope {
        let child = Scope::root(label);
        {
            let mut state = self.lock();
            if !state.stopped {
                state.children.retain(Scope::is_active);
                state.children.push(child.clone());
                return child;
            }
        }
        child.stop();
        child
    }

    /// Like [`Scope::child`], but fails instead of handing out a stopped child.
    pub fn try_child(&self, label: &'static str) -> SwrResult<Scope> {
        if self.is_stopped() {
            return Err(ScopeError::Stopped {
                scope: self.label().to_string(),
            }
            .into());
        }
        Ok(self.child(label))
    }

    /// Register a hook to run when this scope stops.
    ///
    /// If the scope is already stopped the hook runs before this call returns.
    /// On a completed scope the hook is dropped without running.
    pub fn on_stop<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let hook: StopHook = Box::new(hook);
        let hook = {
            let mut state = self.lock();
            if state.completed {
                return;
            }
            if !state.stopped {
                state.hooks.push(hook);
                return;
            }
            hook
        };
        self.run_hook(hook);
    }

    /// Stop this scope, its children, and run its hooks.
    ///
    /// Returns false if the scope had already been stopped or completed.
    pub fn stop(&self) -> bool {
        let (children, hooks) = {
            let mut state = self.lock();
            if state.stopped || state.completed {
                return false;
            }
            state.stopped = true;
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.hooks),
            )
        };
        self.inner.stopped.send_replace(true);

        for child in children.into_iter().rev() {
            child.stop();
        }
        for hook in hooks.into_iter().rev() {
            self.run_hook(hook);
        }
        true
    }

    /// Mark the work under this scope as finished without cancelling it.
    ///
    /// Hooks are dropped unrun and children are completed too. The scope
    /// stays unstopped, and stopping an ancestor later leaves it alone.
    /// Returns false if the scope had already been stopped or completed.
    pub fn complete(&self) -> bool {
        let (children, hooks) = {
            let mut state = self.lock();
            if state.stopped || state.completed {
                return false;
            }
            state.completed = true;
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.hooks),
            )
        };
        drop(hooks);
        for child in children {
            child.complete();
        }
        true
    }

    /// True once [`Scope::stop`] has been called on this scope or an ancestor.
    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// True once [`Scope::complete`] has been called on this scope or an ancestor.
    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    /// Neither stopped nor completed.
    pub fn is_active(&self) -> bool {
        let state = self.lock();
        !state.stopped && !state.completed
    }

    /// Resolves once the scope is stopped.
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        // The sender lives as long as `self`, so this only returns after a stop.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Number of children that have been neither stopped nor completed.
    pub fn live_children(&self) -> usize {
        self.lock()
            .children
            .iter()
            .filter(|c| c.is_active())
            .count()
    }

    /// Observer-only view of this scope, handed to fetch operations.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            scope: self.clone(),
        }
    }

    /// True if both handles point at the same node.
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        // Hooks never run under this lock, so a poisoned guard still holds consistent state.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run_hook(&self, hook: StopHook) -> bool {
        match catch_unwind(AssertUnwindSafe(hook)) {
            Ok(()) => true,
            Err(payload) => {
                let err = ScopeError::HookPanicked {
                    scope: self.label().to_string(),
                    message: panic_message(payload.as_ref()),
                };
                tracing::warn!(error = %err, "Stop hook failed, continuing with remaining hooks");
                false
            }
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("label", &self.label())
            .field("stopped", &self.is_stopped())
            .field("completed", &self.is_completed())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// ABORT SIGNAL
// ============================================================================

/// Cancellation token passed to fetch operations.
///
/// A fetch may poll [`AbortSignal::is_aborted`], await
/// [`AbortSignal::aborted`], or register any number of abort hooks. The engine
/// ignores the fetch's result once the signal is aborted, whatever the fetch
/// does with it.
#[derive(Clone)]
pub struct AbortSignal {
    scope: Scope,
}

impl AbortSignal {
    /// A signal that is never aborted.
    pub fn never() -> Self {
        Scope::root("detached").signal()
    }

    /// True once the fetch this signal belongs to was cancelled.
    pub fn is_aborted(&self) -> bool {
        self.scope.is_stopped()
    }

    /// Resolves once the signal is aborted.
    pub async fn aborted(&self) {
        self.scope.stopped().await
    }

    /// Register a hook to run on abort. Runs immediately if already aborted.
    pub fn on_abort<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scope.on_stop(hook)
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
