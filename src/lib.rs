//! Scoped dependency injection with lazy resolution, optional memoization and cycle detection.
//!
//! # Simple use case
//!
//! ```
//! # use tsunagi::*;
//! # fn main() -> Result<(), Error> {
//! // Register a value and a resolver depending on it
//! let scope = Scope::new();
//! scope.register_value("db_host", String::from("localhost"))?;
//! scope.register_resolver(
//!     "url",
//!     Resolver::new(|args| Ok(format!("postgres://{}", args.get::<String>("host")?)))
//!         .inject("host", "db_host"),
//! )?;
//!
//! // Activate the scope and resolve from the active scopes
//! let _guard = scope.enter()?;
//! let url = resolve_dependency_as::<String>("url")?;
//! assert_eq!(*url, "postgres://localhost");
//! # Ok(())
//! # }
//! ```
//!
//! # Mechanism
//!
//! Dependencies are addressed by a [Key], either a name or a Rust type.
//!
//! * A [Scope] is a registry associating keys to static values or resolvers, with a cache for
//!   resolvers marked `evaluate_once`. Registering a resolver validates its declared parameters and
//!   rejects any dependency cycle among the resolvers of the scope.
//! * Entering a scope pushes it on the scope stack of the current thread, or of the current task
//!   when running under [Scope::run]. Exiting pops it and clears its registry: a scope is used for
//!   a single activation.
//! * Resolution walks the active scopes from the innermost one. Resolvers receive their parameters
//!   as [Args], resolved recursively from the same chain of scopes.
//! * Resolvers registered with [Scope::register_async_resolver] are only reachable from the async
//!   path ([resolve_async], [Injector::call_async]); the sync path reports an
//!   [Error::AsyncDependency] instead of handing out an unresolved future.
//!
//! Call sites declare which of their parameters are injected with an [Injector], or receive
//! type-keyed `Arc<T>` parameters with [inject_and_call].

mod entry;
mod error;
mod graph;
mod inject;
mod key;
mod resolve;
mod scope;
mod signature;
mod stack;

pub use entry::{AsyncResolver, Resolver};
pub use error::{BoxError, Error, Result};
pub use inject::{inject_active, inject_and_call, Callable, Injector};
pub use key::Key;
pub use resolve::{
    resolve, resolve_as, resolve_as_async, resolve_async, resolve_dependency, resolve_dependency_as,
    resolve_dependency_as_async, resolve_dependency_async,
};
pub use scope::{dependency_scope, Phase, Scope, ScopeGuard};
pub use signature::{Args, Marker, Param, ParamKind, Value};
pub use stack::{
    clear_scope_stack, gather_with_scope_isolation, get_active_scopes, run_with_scope_context,
    spawn_with_scope_context, with_scope_context,
};
