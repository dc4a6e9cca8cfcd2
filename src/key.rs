use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::fmt;

/// Identifier of a registered dependency.
///
/// Named keys compare by value, type keys compare by [TypeId].
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Name(Cow<'static, str>),
    Type { id: TypeId, name: &'static str },
}

impl Key {
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Key::Name(name.into())
    }

    /// Key addressing a dependency by its Rust type
    pub fn of<T: ?Sized + 'static>() -> Self {
        Key::Type {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Returns the string for named keys
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Name(n) => Some(n),
            Key::Type { .. } => None,
        }
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Key::Name(Cow::Borrowed(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(Cow::Owned(name))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(n) => f.write_str(n),
            Key::Type { name, .. } => f.write_str(name),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(n) => write!(f, "{n:?}"),
            Key::Type { name, .. } => write!(f, "type {name}"),
        }
    }
}
