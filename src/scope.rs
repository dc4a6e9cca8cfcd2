//! Isolated registry with stack-based activation.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::entry::{AsyncResolver, Entry, Resolver};
use crate::error::{Error, Result};
use crate::graph::check_acyclic;
use crate::key::Key;
use crate::resolve;
use crate::signature::{downcast, Value};
use crate::stack;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a scope.
///
/// An exited scope cannot be entered again: its registry has been cleared and
/// a new [Scope] must be created instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Created,
    Active,
    Exited,
}

#[derive(Default)]
pub(crate) struct ScopeState {
    pub(crate) registry: HashMap<Key, Entry>,
    pub(crate) cache: HashMap<Key, Value>,
    pub(crate) phase: Phase,
}

struct ScopeInner {
    id: u64,
    name: Option<String>,
    state: ReentrantMutex<RefCell<ScopeState>>,
}

/// Dependency registry with its own cache and lifetime.
///
/// `Scope` is a cheap handle: clones refer to the same registry, and equality is identity.
///
/// ```
/// # use tsunagi::*;
/// # fn main() -> Result<(), Error> {
/// let scope = Scope::new();
/// scope
///     .register_value("db_host", String::from("localhost"))?
///     .register_resolver(
///         "url",
///         Resolver::new(|args| Ok(format!("postgres://{}", args.get::<String>("host")?)))
///             .inject("host", "db_host"),
///     )?;
///
/// let guard = scope.enter()?;
/// let url: std::sync::Arc<String> = resolve_dependency_as("url")?;
/// assert_eq!(*url, "postgres://localhost");
/// guard.exit()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::build(None)
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope whose name shows up in logs and diagnostics
    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(name: Option<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                name,
                state: ReentrantMutex::new(RefCell::new(ScopeState::default())),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub(crate) fn state(&self) -> ReentrantMutexGuard<'_, RefCell<ScopeState>> {
        self.inner.state.lock()
    }

    pub fn phase(&self) -> Phase {
        self.state().borrow().phase
    }

    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Active
    }

    /// Register a static value
    pub fn register_value<T: Any + Send + Sync>(&self, key: impl Into<Key>, value: T) -> Result<&Self> {
        self.register_shared(key, Arc::new(value))
    }

    /// Register an already shared value
    pub fn register_shared(&self, key: impl Into<Key>, value: Value) -> Result<&Self> {
        self.register(key.into(), |_| Ok(Entry::Value(value)))
    }

    pub fn register_resolver(&self, key: impl Into<Key>, resolver: Resolver) -> Result<&Self> {
        self.register(key.into(), |key| Entry::resolver(key, resolver))
    }

    /// Register a resolver that can only be used on the async resolution path
    pub fn register_async_resolver(&self, key: impl Into<Key>, resolver: AsyncResolver) -> Result<&Self> {
        self.register(key.into(), |key| Entry::async_resolver(key, resolver))
    }

    /// Validate and commit a registration atomically
    fn register(&self, key: Key, entry: impl FnOnce(&Key) -> Result<Entry>) -> Result<&Self> {
        let guard = self.state();
        let mut state = guard.borrow_mut();
        if state.phase == Phase::Exited {
            return Err(Error::invalid(format!(
                "cannot register '{key}' into exited scope {self}"
            )));
        }
        if state.registry.contains_key(&key) {
            return Err(Error::DuplicateRegistration { key });
        }

        let entry = entry(&key)?;
        check_acyclic(&state.registry, &key, entry.dependencies())?;

        tracing::debug!(scope = self.id(), key = %key, entry = ?entry, "Registered dependency");
        if let Entry::Value(value) = &entry {
            state.cache.insert(key.clone(), value.clone());
        }
        state.registry.insert(key, entry);
        Ok(self)
    }

    /// Is `key` registered in this scope?
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.state().borrow().registry.contains_key(&key.into())
    }

    /// Keys registered in this scope
    pub fn keys(&self) -> Vec<Key> {
        self.state().borrow().registry.keys().cloned().collect()
    }

    /// Resolve a key registered in this scope.
    ///
    /// Dependencies of a resolver are looked up in the active scopes, with this scope searched first.
    pub fn lookup(&self, key: impl Into<Key>) -> Result<Value> {
        resolve::resolve_local(self, &key.into(), &self.search_chain())
    }

    pub fn lookup_as<T: Any + Send + Sync>(&self, key: impl Into<Key>) -> Result<Arc<T>> {
        let key = key.into();
        downcast(&key, self.lookup(key.clone())?)
    }

    /// Resolve a key registered in this scope, awaiting async resolvers
    pub async fn lookup_async(&self, key: impl Into<Key>) -> Result<Value> {
        resolve::resolve_local_async(self.clone(), key.into(), self.search_chain()).await
    }

    pub async fn lookup_as_async<T: Any + Send + Sync>(&self, key: impl Into<Key>) -> Result<Arc<T>> {
        let key = key.into();
        downcast(&key, self.lookup_async(key.clone()).await?)
    }

    /// The active scopes, with this scope moved innermost
    fn search_chain(&self) -> Vec<Scope> {
        let mut chain = stack::get_active_scopes();
        chain.retain(|s| s != self);
        chain.push(self.clone());
        chain
    }

    /// Activate the scope and push it on the current scope stack.
    ///
    /// Outside [Scope::run] and the context helpers this is the stack of the current thread,
    /// shared by every task the thread polls. Async code activates scopes with [Scope::run] or
    /// [run_with_scope_context](crate::run_with_scope_context) instead; the returned guard is
    /// not `Send` and cannot be held across an await in a spawned task.
    pub fn enter(&self) -> Result<ScopeGuard> {
        self.activate()?;
        let mark = stack::push(self);
        Ok(ScopeGuard {
            scope: self.clone(),
            mark,
            exited: false,
            _not_send: PhantomData,
        })
    }

    /// Run `fut` with this scope active on top of the inherited scopes.
    ///
    /// The scope is exited when the future completes, panics or is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.activate()?;
        let _finish = FinishOnDrop(self);
        let mut scopes = stack::get_active_scopes();
        scopes.push(self.clone());
        Ok(stack::run_with_stack(scopes, fut).await)
    }

    fn activate(&self) -> Result<()> {
        let guard = self.state();
        let mut state = guard.borrow_mut();
        match state.phase {
            Phase::Created => {
                state.phase = Phase::Active;
                tracing::debug!(scope = self.id(), "Entered scope");
                Ok(())
            }
            Phase::Active => Err(Error::invalid(format!("scope {self} is already active"))),
            Phase::Exited => Err(Error::invalid(format!(
                "scope {self} has already exited and cannot be re-entered"
            ))),
        }
    }

    /// Clear registry and cache, and mark the scope exited
    fn finish(&self) {
        let guard = self.state();
        let mut state = guard.borrow_mut();
        state.registry.clear();
        state.cache.clear();
        state.phase = Phase::Exited;
        tracing::debug!(scope = self.id(), "Exited scope");
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "'{name}'#{}", self.id()),
            None => write!(f, "#{}", self.id()),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

struct FinishOnDrop<'a>(&'a Scope);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Keeps a scope active until exited or dropped.
///
/// Guards must be released in reverse order of entry, in the thread or task that entered them.
/// Dropping a guard out of order panics, unless the thread is already unwinding.
///
/// A guard stays on the context that created it:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<tsunagi::ScopeGuard>();
/// ```
#[must_use = "the scope is exited when the guard is dropped"]
pub struct ScopeGuard {
    scope: Scope,
    mark: stack::Mark,
    exited: bool,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Exit the scope, reporting out-of-order exits instead of panicking.
    ///
    /// On an out-of-order exit the scope is still removed from the current stack and cleared,
    /// leaving the scopes entered after it in place.
    pub fn exit(mut self) -> Result<()> {
        let result = self.try_exit();
        if result.is_err() {
            self.force_exit();
        }
        result
    }

    fn force_exit(&mut self) {
        stack::remove(&self.scope);
        self.exited = true;
        self.scope.finish();
    }

    fn try_exit(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        stack::pop(&self.scope, self.mark)?;
        self.exited = true;
        self.scope.finish();
        Ok(())
    }
}

impl Deref for ScopeGuard {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Err(err) = self.try_exit() {
            if std::thread::panicking() {
                tracing::warn!(scope = self.scope.id(), error = %err, "Removing scope out of order while unwinding");
                self.force_exit();
            } else {
                panic!("{err}");
            }
        }
    }
}

/// Create a fresh scope and enter it
pub fn dependency_scope() -> Result<ScopeGuard> {
    Scope::new().enter()
}
