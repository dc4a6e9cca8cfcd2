use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::resolve::{self, Site};
use crate::scope::Scope;
use crate::signature::{Args, Marker, Param, ParamKind, Value};
use crate::stack::get_active_scopes;

/// Function whose injected parameters are supplied from the scope chain on every call.
///
/// The wrapped function receives all its arguments as [Args]: the ones given by the caller,
/// completed with the values of the parameters carrying an [Marker::Inject] marker.
/// Arguments passed explicitly always take precedence over injection.
///
/// ```
/// # use tsunagi::*;
/// # fn main() -> Result<(), Error> {
/// let greet = Injector::new(
///     "greet",
///     [Param::named("name"), Param::inject("greeting", "greeting")],
///     |args: Args| -> Result<String, Error> {
///         Ok(format!("{}, {}", args.get::<String>("greeting")?, args.get::<String>("name")?))
///     },
/// )?;
///
/// let scope = dependency_scope()?;
/// scope.register_value("greeting", String::from("Hello"))?;
/// let text = greet.call(Args::new().with("name", String::from("Alice")))??;
/// assert_eq!(text, "Hello, Alice");
/// # Ok(())
/// # }
/// ```
pub struct Injector<F> {
    name: String,
    params: Vec<Param>,
    scopes: Option<Vec<Scope>>,
    func: F,
}

impl<F> Injector<F> {
    /// Wrap `func`, declared with the given parameters.
    ///
    /// Fails if a positional-only parameter carries an inject marker, since such a parameter
    /// cannot be supplied by name.
    pub fn new(name: impl Into<String>, params: impl IntoIterator<Item = Param>, func: F) -> Result<Self> {
        let name = name.into();
        let params: Vec<Param> = params.into_iter().collect();
        if let Some(p) = params
            .iter()
            .find(|p| p.kind == ParamKind::PositionalOnly && p.is_injected())
        {
            return Err(Error::PositionalOnlyInjection {
                function: name,
                parameter: p.name.clone(),
            });
        }
        Ok(Self {
            name,
            params,
            scopes: None,
            func,
        })
    }

    /// Resolve from these scopes, last one first, instead of the active scopes
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = Some(scopes.into_iter().collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> Vec<Scope> {
        match &self.scopes {
            Some(scopes) => scopes.clone(),
            None => get_active_scopes(),
        }
    }

    /// Injected parameters the caller did not supply
    fn pending<'a>(&'a self, args: &'a Args) -> impl Iterator<Item = (&'a Param, &'a Key)> + 'a {
        self.params.iter().filter_map(move |p| match &p.marker {
            Marker::Inject(key) if !args.contains(&p.name) => Some((p, key)),
            _ => None,
        })
    }

    fn site(&self, parameter: &str) -> Site {
        Site {
            function: self.name.clone(),
            parameter: parameter.to_string(),
        }
    }

    fn complete(&self, mut args: Args) -> Result<Args> {
        let chain = self.chain();
        let mut resolved: Vec<(String, Value)> = Vec::new();
        for (param, key) in self.pending(&args) {
            let site = self.site(&param.name);
            let value = resolve::resolve_at(key, &chain, &site).map_err(|e| site.not_found(e))?;
            resolved.push((param.name.clone(), value));
        }
        for (name, value) in resolved {
            args.insert(name, value);
        }
        Ok(args)
    }

    async fn complete_async(&self, mut args: Args) -> Result<Args> {
        let chain = self.chain();
        let pending: Vec<(String, Key)> = self
            .pending(&args)
            .map(|(p, k)| (p.name.clone(), k.clone()))
            .collect();
        for (name, key) in pending {
            let site = self.site(&name);
            let value = resolve::resolve_async(key, chain.clone())
                .await
                .map_err(|e| site.not_found(e))?;
            args.insert(name, value);
        }
        Ok(args)
    }

    /// Call the function after injecting its dependencies.
    ///
    /// Async resolvers cannot be reached from here: use [Injector::call_async].
    pub fn call<R>(&self, args: Args) -> Result<R>
    where
        F: Fn(Args) -> R,
    {
        let args = self.complete(args)?;
        Ok((self.func)(args))
    }

    /// Call the function with dependencies resolved on the async path, including async resolvers
    pub async fn call_async<Fut>(&self, args: Args) -> Result<Fut::Output>
    where
        F: Fn(Args) -> Fut,
        Fut: Future,
    {
        let args = self.complete_async(args).await?;
        Ok((self.func)(args).await)
    }
}

/*
 * Type-keyed injection: every parameter of a callable is an `Arc<T>`
 * resolved from the key `Key::of::<T>()`.
 */

/// Function whose parameters are all shared values resolved by type.
///
/// `Deps` lists the types behind the `Arc`s, so a closure `|db: Arc<Database>, cfg: Arc<Config>|`
/// is a `Callable<(Database, Config), _>`. Each parameter `Arc<T>` receives the value registered
/// under [Key::of::<T>()](Key::of). Implemented for functions of up to 10 parameters.
pub trait Callable<Deps, Out> {
    /// Resolve every parameter from `scopes`, innermost (last) first, then call the function
    fn call_in(&self, scopes: &[Scope]) -> Result<Out>;
}

fn inject_typed<T: Any + Send + Sync>(scopes: &[Scope]) -> Result<Arc<T>> {
    resolve::resolve_as::<T>(Key::of::<T>(), scopes)
}

macro_rules! typed_callable ({ $($dep:ident)* } => {
    impl<Func, Out, $($dep,)*> Callable<($($dep,)*), Out> for Func
    where
        Func: Fn($(Arc<$dep>),*) -> Out,
        $($dep: Any + Send + Sync,)*
    {
        fn call_in(&self, _scopes: &[Scope]) -> Result<Out> {
            Ok((self)($(inject_typed::<$dep>(_scopes)?),*))
        }
    }
});

typed_callable! {}
typed_callable! { A }
typed_callable! { A B }
typed_callable! { A B C }
typed_callable! { A B C D }
typed_callable! { A B C D E }
typed_callable! { A B C D E F }
typed_callable! { A B C D E F G }
typed_callable! { A B C D E F G H }
typed_callable! { A B C D E F G H I }
typed_callable! { A B C D E F G H I J }

/// Call a function after resolving each of its `Arc<T>` parameters by type from `scopes`
pub fn inject_and_call<F, D, O>(scopes: &[Scope], f: F) -> Result<O>
where
    F: Callable<D, O>,
{
    f.call_in(scopes)
}

/// Same as [inject_and_call], using the active scopes
pub fn inject_active<F, D, O>(f: F) -> Result<O>
where
    F: Callable<D, O>,
{
    inject_and_call(&get_active_scopes(), f)
}
