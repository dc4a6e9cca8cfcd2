use thiserror::Error;

use crate::key::Key;
use crate::signature::ParamKind;

/// Error raised by a resolver body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors triggered while wiring or resolving dependencies
#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "Dependency '{key}' not found{}{}",
        requester_hint(.requested_by),
        available_hint(.available)
    )]
    DependencyNotFound {
        key: Key,
        /// Parameter the call site was resolving, when raised by an [Injector](crate::Injector)
        requested_by: Option<String>,
        /// Keys registered in the searched scopes
        available: Vec<Key>,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("Key '{key}' is already registered in this scope")]
    DuplicateRegistration { key: Key },

    #[error("Circular dependency detected: {}", format_chain(.chain))]
    CircularDependency { chain: Vec<Key> },

    #[error(
        "Cannot resolve async dependency '{key}' for parameter '{parameter}' of '{function}' \
         on the synchronous path. Use the async resolution path (`call_async`, `resolve_async`) instead"
    )]
    AsyncDependency {
        function: String,
        parameter: String,
        key: Key,
    },

    #[error(
        "Parameter '{parameter}' of '{function}' is positional-only and cannot receive an injected value"
    )]
    PositionalOnlyInjection { function: String, parameter: String },

    #[error("Invalid operation: {reason}")]
    InvalidStoreOperation { reason: String },

    #[error("Resolver '{resolver}' has unsupported parameter kind {kind:?} for parameter '{parameter}'")]
    UnsupportedParameter {
        resolver: String,
        parameter: String,
        kind: ParamKind,
    },

    #[error("No value supplied for parameter '{parameter}'")]
    MissingArgument { parameter: String },

    #[error("Value for '{key}' is not of type {expected}")]
    TypeMismatch { key: Key, expected: &'static str },

    #[error("Argument '{parameter}' is not of type {expected}")]
    ArgumentMismatch {
        parameter: String,
        expected: &'static str,
    },

    #[error("Scope {scope} exited out of order: scope {top} was entered after it and is still active")]
    ScopeExitOrder { scope: String, top: String },

    /// Failure raised inside a resolver, passed through untouched
    #[error(transparent)]
    Resolver(BoxError),
}

impl Error {
    /// Wrap an application error raised by a resolver
    pub fn resolver(err: impl Into<BoxError>) -> Self {
        Error::Resolver(err.into())
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidStoreOperation {
            reason: reason.into(),
        }
    }

    /// Borrow the application error of a failed resolver, if it has type `E`
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Resolver(e) => e.downcast_ref(),
            _ => None,
        }
    }

    /// The key a not-found error refers to
    pub fn missing_key(&self) -> Option<&Key> {
        match self {
            Error::DependencyNotFound { key, .. } => Some(key),
            _ => None,
        }
    }

    /// The keys that were available when a lookup failed
    pub fn available_keys(&self) -> Option<&[Key]> {
        match self {
            Error::DependencyNotFound { available, .. } => Some(available),
            _ => None,
        }
    }
}

fn requester_hint(requested_by: &Option<String>) -> String {
    match requested_by {
        Some(requester) => format!(" for {requester}"),
        None => String::new(),
    }
}

fn available_hint(available: &[Key]) -> String {
    if available.is_empty() {
        return String::new();
    }
    let keys: Vec<String> = available.iter().map(|k| format!("'{k}'")).collect();
    format!(". Available keys: {}", keys.join(", "))
}

fn format_chain(chain: &[Key]) -> String {
    let keys: Vec<String> = chain.iter().map(ToString::to_string).collect();
    keys.join(" -> ")
}
