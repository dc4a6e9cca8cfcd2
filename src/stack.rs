//! Execution-context-local stack of active scopes.
//!
//! Each thread owns a stack. Futures driven through [Scope::run](crate::Scope::run) or one of the
//! helpers below carry their own task-local stack instead, so concurrent tasks sharing a worker
//! thread never observe each other's scopes. A spawned task inherits its parent's scopes only
//! when it is started through [spawn_with_scope_context] or wrapped with [with_scope_context].

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::scope::Scope;

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

/// Active scopes of one execution context.
///
/// `generation` counts the calls to [clear_scope_stack] on this stack.
struct Stack {
    id: u64,
    generation: u64,
    scopes: Vec<Scope>,
}

impl Stack {
    fn new(scopes: Vec<Scope>) -> Self {
        Self {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            scopes,
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            stack: self.id,
            generation: self.generation,
        }
    }
}

/// Stack and generation a scope was pushed on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Mark {
    stack: u64,
    generation: u64,
}

thread_local! {
    static THREAD_STACK: RefCell<Stack> = RefCell::new(Stack::new(Vec::new()));
}

tokio::task_local! {
    static TASK_STACK: RefCell<Stack>;
}

/// Apply `f` to the stack of the current task, or of the current thread outside scoped tasks
fn with_stack<R>(f: impl Fn(&mut Stack) -> R) -> R {
    TASK_STACK
        .try_with(|stack| f(&mut stack.borrow_mut()))
        .unwrap_or_else(|_| THREAD_STACK.with(|stack| f(&mut stack.borrow_mut())))
}

pub(crate) fn push(scope: &Scope) -> Mark {
    with_stack(|stack| {
        stack.scopes.push(scope.clone());
        stack.mark()
    })
}

/// Remove `scope` from the top of the stack it was pushed on.
///
/// A scope missing from that stack is accepted only if the stack was cleared after the push.
pub(crate) fn pop(scope: &Scope, mark: Mark) -> Result<()> {
    with_stack(|stack| {
        if stack.id != mark.stack {
            return Err(Error::invalid(format!(
                "scope {scope} must be exited in the thread or task that entered it"
            )));
        }
        match stack.scopes.iter().rposition(|s| s == scope) {
            None if stack.generation != mark.generation => Ok(()),
            None => Err(Error::invalid(format!("scope {scope} is not on the scope stack"))),
            Some(i) if i + 1 == stack.scopes.len() => {
                stack.scopes.pop();
                Ok(())
            }
            Some(_) => Err(Error::ScopeExitOrder {
                scope: scope.to_string(),
                top: stack.scopes.last().map(ToString::to_string).unwrap_or_default(),
            }),
        }
    })
}

/// Remove `scope` wherever it sits in the stack
pub(crate) fn remove(scope: &Scope) {
    with_stack(|stack| stack.scopes.retain(|s| s != scope));
}

/// Active scopes of the current context, outermost first
pub fn get_active_scopes() -> Vec<Scope> {
    with_stack(|stack| stack.scopes.clone())
}

/// Empty the scope stack of the current context.
///
/// Scopes removed this way are not exited: their guards still clear them when dropped.
pub fn clear_scope_stack() {
    let cleared = with_stack(|stack| {
        stack.generation += 1;
        std::mem::take(&mut stack.scopes).len()
    });
    tracing::debug!(cleared, "Cleared scope stack");
}

/// Drive `fut` with its own copy of `stack`
pub(crate) async fn run_with_stack<F: Future>(stack: Vec<Scope>, fut: F) -> F::Output {
    TASK_STACK.scope(RefCell::new(Stack::new(stack)), fut).await
}

/// Make `fut` run with the scopes active at the time of this call
pub fn with_scope_context<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    run_with_stack(get_active_scopes(), fut)
}

/// Run `fut`, inside `scope` when one is given
pub async fn run_with_scope_context<F: Future>(fut: F, scope: Option<Scope>) -> Result<F::Output> {
    match scope {
        Some(scope) => scope.run(fut).await,
        None => Ok(fut.await),
    }
}

/// Spawn a tokio task inheriting the scopes active in the caller
pub fn spawn_with_scope_context<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(with_scope_context(fut))
}

/// Await all futures concurrently, each with a private copy of the current scope stack.
///
/// Scopes entered inside one future are invisible to the others.
pub async fn gather_with_scope_isolation<I>(futures: I) -> Vec<<I::Item as Future>::Output>
where
    I: IntoIterator,
    I::Item: Future,
{
    let stack = get_active_scopes();
    join_all(futures.into_iter().map(|fut| run_with_stack(stack.clone(), fut))).await
}
