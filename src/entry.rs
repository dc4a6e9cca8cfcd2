//! Registry entries: static values and resolvers.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{Error, Result};
use crate::key::Key;
use crate::signature::{Args, Param, Value};

type SyncFn = Arc<dyn Fn(&Args) -> Result<Value> + Send + Sync>;
type AsyncFn = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Factory producing a value on demand from its resolved parameters.
///
/// ```
/// # use tsunagi::*;
/// let url = Resolver::new(|args| Ok(format!("postgres://{}", args.get::<String>("host")?)))
///     .inject("host", "db_host");
/// ```
#[derive(Clone)]
pub struct Resolver {
    params: Vec<Param>,
    evaluate_once: bool,
    call: SyncFn,
}

impl Resolver {
    pub fn new<T, F>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            evaluate_once: false,
            call: Arc::new(move |args: &Args| f(args).map(|v| Arc::new(v) as Value)),
        }
    }

    /// Declare a parameter resolved from an explicit key
    pub fn inject(self, name: impl Into<String>, key: impl Into<Key>) -> Self {
        self.param(Param::inject(name, key))
    }

    /// Declare a parameter resolved from the key of the same name
    pub fn named(self, name: impl Into<String>) -> Self {
        self.param(Param::named(name))
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Cache the first result in the owning scope
    pub fn evaluate_once(mut self) -> Self {
        self.evaluate_once = true;
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn is_evaluated_once(&self) -> bool {
        self.evaluate_once
    }

    pub(crate) fn invoke(&self, args: &Args) -> Result<Value> {
        (self.call)(args)
    }
}

/// Asynchronous counterpart of [Resolver], only usable on the async resolution path
#[derive(Clone)]
pub struct AsyncResolver {
    params: Vec<Param>,
    evaluate_once: bool,
    call: AsyncFn,
}

impl AsyncResolver {
    pub fn new<T, F, Fut>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            params: Vec::new(),
            evaluate_once: false,
            call: Arc::new(move |args: Args| f(args).map(|r| r.map(|v| Arc::new(v) as Value)).boxed()),
        }
    }

    pub fn inject(self, name: impl Into<String>, key: impl Into<Key>) -> Self {
        self.param(Param::inject(name, key))
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        self.param(Param::named(name))
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn evaluate_once(mut self) -> Self {
        self.evaluate_once = true;
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn is_evaluated_once(&self) -> bool {
        self.evaluate_once
    }

    pub(crate) fn invoke(&self, args: Args) -> BoxFuture<'static, Result<Value>> {
        (self.call)(args)
    }
}

/// Content of a registry slot
#[derive(Clone)]
pub(crate) enum Entry {
    Value(Value),
    Sync(Arc<Resolver>, Arc<[Key]>),
    Async(Arc<AsyncResolver>, Arc<[Key]>),
}

impl Entry {
    pub(crate) fn resolver(key: &Key, resolver: Resolver) -> Result<Self> {
        let deps = dependencies(key, resolver.params())?;
        Ok(Entry::Sync(Arc::new(resolver), deps))
    }

    pub(crate) fn async_resolver(key: &Key, resolver: AsyncResolver) -> Result<Self> {
        let deps = dependencies(key, resolver.params())?;
        Ok(Entry::Async(Arc::new(resolver), deps))
    }

    /// Keys this entry depends on, computed at registration
    pub(crate) fn dependencies(&self) -> &[Key] {
        match self {
            Entry::Value(_) => &[],
            Entry::Sync(_, deps) | Entry::Async(_, deps) => deps,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value(_) => f.write_str("Value"),
            Entry::Sync(_, deps) => f.debug_tuple("Sync").field(deps).finish(),
            Entry::Async(_, deps) => f.debug_tuple("Async").field(deps).finish(),
        }
    }
}

/// Validate parameter kinds and collect the dependency keys
fn dependencies(key: &Key, params: &[Param]) -> Result<Arc<[Key]>> {
    params
        .iter()
        .map(|p| {
            if p.kind.accepts_keyword() {
                Ok(p.dependency())
            } else {
                Err(Error::UnsupportedParameter {
                    resolver: key.to_string(),
                    parameter: p.name.clone(),
                    kind: p.kind,
                })
            }
        })
        .collect()
}
