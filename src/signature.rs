//! Explicit declaration of the parameters a callable expects.
//!
//! Resolvers and injected functions do not introspect their own signature: they declare it.
//! Each [Param] carries its name, its [ParamKind], and an optional [Marker] naming the key
//! whose value it should receive. Once resolved, the values are handed to the callable as [Args].

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::key::Key;

/// Shared, type-erased resolved value
pub type Value = Arc<dyn Any + Send + Sync>;

/// How a parameter may be supplied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

impl ParamKind {
    /// Can the parameter be supplied by name?
    pub fn accepts_keyword(self) -> bool {
        matches!(self, ParamKind::PositionalOrKeyword | ParamKind::KeywordOnly)
    }
}

/// Default attached to a parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Marker {
    /// Resolved from the key matching the parameter name, skipped when absent
    None,
    /// Resolved from an explicit key, failing when absent
    Inject(Key),
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub marker: Marker,
}

impl Param {
    /// Parameter resolved from the key of the same name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::PositionalOrKeyword,
            marker: Marker::None,
        }
    }

    /// Parameter receiving the value registered under `key`
    pub fn inject(name: impl Into<String>, key: impl Into<Key>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::PositionalOrKeyword,
            marker: Marker::Inject(key.into()),
        }
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn keyword_only(self) -> Self {
        self.with_kind(ParamKind::KeywordOnly)
    }

    pub fn positional_only(self) -> Self {
        self.with_kind(ParamKind::PositionalOnly)
    }

    /// The key this parameter depends on
    pub fn dependency(&self) -> Key {
        match &self.marker {
            Marker::Inject(key) => key.clone(),
            Marker::None => Key::name(self.name.clone()),
        }
    }

    pub fn is_injected(&self) -> bool {
        matches!(self.marker, Marker::Inject(_))
    }
}

/// Keyword arguments handed to a resolver or an injected function
#[derive(Clone, Default)]
pub struct Args(HashMap<String, Value>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, replacing any previous value for the same name
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, Arc::new(value));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Typed access to a supplied argument
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.try_get(name)?.ok_or_else(|| Error::MissingArgument {
            parameter: name.to_string(),
        })
    }

    /// Typed access to an argument that may have been skipped
    pub fn try_get<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => v
                .clone()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| Error::ArgumentMismatch {
                    parameter: name.to_string(),
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Clone the argument out of its shared handle
    pub fn cloned<T: Any + Send + Sync + Clone>(&self, name: &str) -> Result<T> {
        self.get::<T>(name).map(|v| v.as_ref().clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(key: &Key, value: Value) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| Error::TypeMismatch {
        key: key.clone(),
        expected: type_name::<T>(),
    })
}
