//! Resolution of keys against a chain of scopes.
//!
//! The chain is searched from its last element (innermost) to its first. When a resolver is found,
//! its declared parameters are resolved against the same chain, which lets an inner scope compose
//! values registered further out.
//!
//! On the synchronous path the lock of the scope owning a resolver is held while the resolver runs,
//! so an `evaluate_once` resolver executes at most once per scope. The asynchronous path never holds
//! a lock across an await point: concurrent first resolutions may run the resolver more than once,
//! and the first result stored in the cache wins.

use std::any::Any;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::entry::{AsyncResolver, Entry, Resolver};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::scope::Scope;
use crate::signature::{downcast, Args, Param, Value};
use crate::stack::get_active_scopes;

/// Where a lookup was requested from, named in async-boundary and missing-dependency errors
#[derive(Clone, Debug)]
pub(crate) struct Site {
    pub(crate) function: String,
    pub(crate) parameter: String,
}

impl Site {
    fn direct(key: &Key) -> Self {
        Self {
            function: "resolve".to_string(),
            parameter: key.to_string(),
        }
    }

    fn param(owner: &Key, param: &Param) -> Self {
        Self {
            function: owner.to_string(),
            parameter: param.name.clone(),
        }
    }

    /// Name the injected parameter in a missing-dependency error, keeping the engine's as source
    pub(crate) fn not_found(&self, err: Error) -> Error {
        match err {
            Error::DependencyNotFound {
                key,
                requested_by: None,
                available,
                source,
            } => Error::DependencyNotFound {
                key: key.clone(),
                requested_by: Some(format!("parameter '{}' of '{}'", self.parameter, self.function)),
                available: available.clone(),
                source: Some(Box::new(Error::DependencyNotFound {
                    key,
                    requested_by: None,
                    available,
                    source,
                })),
            },
            other => other,
        }
    }
}

/// Resolver currently being evaluated, identified by owning scope and key
type InFlight = Vec<(u64, Key)>;

/// Resolve `key` against `scopes`, innermost (last) first
pub fn resolve(key: impl Into<Key>, scopes: &[Scope]) -> Result<Value> {
    let key = key.into();
    let site = Site::direct(&key);
    resolve_at(&key, scopes, &site)
}

pub fn resolve_as<T: Any + Send + Sync>(key: impl Into<Key>, scopes: &[Scope]) -> Result<Arc<T>> {
    let key = key.into();
    downcast(&key, resolve(key.clone(), scopes)?)
}

/// Resolve `key` against the active scopes of the current context
pub fn resolve_dependency(key: impl Into<Key>) -> Result<Value> {
    resolve(key, &get_active_scopes())
}

pub fn resolve_dependency_as<T: Any + Send + Sync>(key: impl Into<Key>) -> Result<Arc<T>> {
    resolve_as(key, &get_active_scopes())
}

/// Resolve `key` against `scopes`, awaiting async resolvers and their dependencies
pub async fn resolve_async(key: impl Into<Key>, scopes: Vec<Scope>) -> Result<Value> {
    let key = key.into();
    lookup_boxed(scopes.into(), key, InFlight::new()).await
}

pub async fn resolve_as_async<T: Any + Send + Sync>(key: impl Into<Key>, scopes: Vec<Scope>) -> Result<Arc<T>> {
    let key = key.into();
    downcast(&key, resolve_async(key.clone(), scopes).await?)
}

/// Resolve `key` against the active scopes of the current task
pub async fn resolve_dependency_async(key: impl Into<Key>) -> Result<Value> {
    resolve_async(key, get_active_scopes()).await
}

pub async fn resolve_dependency_as_async<T: Any + Send + Sync>(key: impl Into<Key>) -> Result<Arc<T>> {
    resolve_as_async(key, get_active_scopes()).await
}

pub(crate) fn resolve_at(key: &Key, scopes: &[Scope], site: &Site) -> Result<Value> {
    Resolution {
        scopes,
        in_flight: InFlight::new(),
    }
    .lookup(key, site)
}

/// Resolve a key found in `scope` itself, its dependencies using `scopes`
pub(crate) fn resolve_local(scope: &Scope, key: &Key, scopes: &[Scope]) -> Result<Value> {
    let mut resolution = Resolution {
        scopes,
        in_flight: InFlight::new(),
    };
    match resolution.lookup_in(scope, key, &Site::direct(key))? {
        Some(value) => Ok(value),
        None => Err(not_found(key, std::slice::from_ref(scope))),
    }
}

pub(crate) async fn resolve_local_async(scope: Scope, key: Key, scopes: Vec<Scope>) -> Result<Value> {
    let scopes: Arc<[Scope]> = scopes.into();
    match lookup_in_async(scope.clone(), key.clone(), scopes, InFlight::new()).await? {
        Some(value) => Ok(value),
        None => Err(not_found(&key, &[scope])),
    }
}

struct Resolution<'s> {
    scopes: &'s [Scope],
    in_flight: InFlight,
}

impl Resolution<'_> {
    fn lookup(&mut self, key: &Key, site: &Site) -> Result<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = self.lookup_in(scope, key, site)? {
                return Ok(value);
            }
        }
        Err(not_found(key, self.scopes))
    }

    /// Resolve `key` if `scope` holds it, keeping the scope locked while its resolver runs
    fn lookup_in(&mut self, scope: &Scope, key: &Key, site: &Site) -> Result<Option<Value>> {
        let guard = scope.state();
        let entry = {
            let state = guard.borrow();
            if let Some(value) = state.cache.get(key) {
                tracing::trace!(scope = scope.id(), key = %key, "Cache hit");
                return Ok(Some(value.clone()));
            }
            match state.registry.get(key) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        };

        let resolver = match entry {
            Entry::Value(value) => return Ok(Some(value)),
            Entry::Async(..) => {
                return Err(Error::AsyncDependency {
                    function: site.function.clone(),
                    parameter: site.parameter.clone(),
                    key: key.clone(),
                })
            }
            Entry::Sync(resolver, _) => resolver,
        };

        enter_flight(&mut self.in_flight, scope, key)?;
        let result = self.invoke(key, &resolver);
        self.in_flight.pop();
        let value = result?;

        if resolver.is_evaluated_once() {
            let mut state = guard.borrow_mut();
            return Ok(Some(state.cache.entry(key.clone()).or_insert(value).clone()));
        }
        Ok(Some(value))
    }

    fn invoke(&mut self, key: &Key, resolver: &Resolver) -> Result<Value> {
        tracing::trace!(key = %key, "Invoking resolver");
        let mut args = Args::new();
        for param in resolver.params() {
            let dep = param.dependency();
            match self.lookup(&dep, &Site::param(key, param)) {
                Ok(value) => args.insert(param.name.clone(), value),
                Err(err) if skippable(&err, param, &dep) => {
                    tracing::trace!(key = %key, parameter = %param.name, "Skipping unregistered parameter");
                }
                Err(err) => return Err(err),
            }
        }
        resolver.invoke(&args)
    }
}

fn lookup_boxed(scopes: Arc<[Scope]>, key: Key, in_flight: InFlight) -> BoxFuture<'static, Result<Value>> {
    async move {
        for scope in scopes.iter().rev() {
            let found = lookup_in_async(scope.clone(), key.clone(), scopes.clone(), in_flight.clone()).await?;
            if let Some(value) = found {
                return Ok(value);
            }
        }
        Err(not_found(&key, &scopes))
    }
    .boxed()
}

enum Probe {
    Missing,
    Ready(Value),
    Call(Callee),
}

enum Callee {
    Sync(Arc<Resolver>),
    Async(Arc<AsyncResolver>),
}

impl Callee {
    fn params(&self) -> &[Param] {
        match self {
            Callee::Sync(r) => r.params(),
            Callee::Async(r) => r.params(),
        }
    }

    fn is_evaluated_once(&self) -> bool {
        match self {
            Callee::Sync(r) => r.is_evaluated_once(),
            Callee::Async(r) => r.is_evaluated_once(),
        }
    }

    async fn call(&self, key: &Key, args: Args) -> Result<Value> {
        match self {
            Callee::Sync(r) => {
                tracing::trace!(key = %key, "Invoking resolver");
                r.invoke(&args)
            }
            Callee::Async(r) => {
                tracing::trace!(key = %key, "Awaiting async resolver");
                r.invoke(args).await
            }
        }
    }
}

fn probe(scope: &Scope, key: &Key) -> Probe {
    let guard = scope.state();
    let state = guard.borrow();
    if let Some(value) = state.cache.get(key) {
        return Probe::Ready(value.clone());
    }
    match state.registry.get(key) {
        None => Probe::Missing,
        Some(Entry::Value(value)) => Probe::Ready(value.clone()),
        Some(Entry::Sync(resolver, _)) => Probe::Call(Callee::Sync(resolver.clone())),
        Some(Entry::Async(resolver, _)) => Probe::Call(Callee::Async(resolver.clone())),
    }
}

async fn lookup_in_async(
    scope: Scope,
    key: Key,
    scopes: Arc<[Scope]>,
    mut in_flight: InFlight,
) -> Result<Option<Value>> {
    let callee = match probe(&scope, &key) {
        Probe::Missing => return Ok(None),
        Probe::Ready(value) => {
            tracing::trace!(scope = scope.id(), key = %key, "Cache hit");
            return Ok(Some(value));
        }
        Probe::Call(callee) => callee,
    };

    enter_flight(&mut in_flight, &scope, &key)?;
    let args = arguments_async(&key, callee.params(), &scopes, &in_flight).await?;
    let value = callee.call(&key, args).await?;

    if callee.is_evaluated_once() {
        let guard = scope.state();
        let mut state = guard.borrow_mut();
        return Ok(Some(state.cache.entry(key).or_insert(value).clone()));
    }
    Ok(Some(value))
}

async fn arguments_async(owner: &Key, params: &[Param], scopes: &Arc<[Scope]>, in_flight: &InFlight) -> Result<Args> {
    let mut args = Args::new();
    for param in params {
        let dep = param.dependency();
        match lookup_boxed(scopes.clone(), dep.clone(), in_flight.clone()).await {
            Ok(value) => args.insert(param.name.clone(), value),
            Err(err) if skippable(&err, param, &dep) => {
                tracing::trace!(key = %owner, parameter = %param.name, "Skipping unregistered parameter");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(args)
}

/// Parameters matched by name are skipped when their own key is absent everywhere
fn skippable(err: &Error, param: &Param, dep: &Key) -> bool {
    !param.is_injected() && matches!(err, Error::DependencyNotFound { key, .. } if key == dep)
}

fn enter_flight(in_flight: &mut InFlight, scope: &Scope, key: &Key) -> Result<()> {
    let token = (scope.id(), key.clone());
    if in_flight.contains(&token) {
        let mut chain: Vec<Key> = in_flight.iter().map(|(_, k)| k.clone()).collect();
        chain.push(key.clone());
        return Err(Error::CircularDependency { chain });
    }
    in_flight.push(token);
    Ok(())
}

fn not_found(key: &Key, scopes: &[Scope]) -> Error {
    let mut available: Vec<Key> = Vec::new();
    for scope in scopes.iter().rev() {
        for k in scope.keys() {
            if !available.contains(&k) {
                available.push(k);
            }
        }
    }
    Error::DependencyNotFound {
        key: key.clone(),
        requested_by: None,
        available,
        source: None,
    }
}
