//! Injection tokens.
//!
//! A [`Token`] is compared by identity, never by name: two tokens built with
//! [`Token::named`] and the same label are distinct keys. Type tokens are keyed
//! by [`TypeId`], so `Token::of::<T>()` always yields the same key for `T`.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Clone)]
enum TokenKey {
    Type(TypeId),
    Unique(Arc<str>),
}

/// Identity key for a dependency-injection binding.
#[derive(Clone)]
pub struct Token {
    key: TokenKey,
    name: Arc<str>,
}

impl Token {
    /// Token keyed by a Rust type.
    pub fn of<T: ?Sized + Any>() -> Self {
        Self {
            key: TokenKey::Type(TypeId::of::<T>()),
            name: Arc::from(short_type_name(std::any::type_name::<T>())),
        }
    }

    /// A fresh token that only equals its own clones.
    ///
    /// Identity is carried by the allocation, so no process-wide registry is
    /// involved and the label is used for diagnostics only.
    pub fn named(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        Self {
            key: TokenKey::Unique(name.clone()),
            name,
        }
    }

    /// Human readable label used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> (u8, usize, Option<TypeId>) {
        match &self.key {
            TokenKey::Type(id) => (0, 0, Some(*id)),
            TokenKey::Unique(label) => (1, Arc::as_ptr(label) as *const u8 as usize, None),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (&self.key, &other.key) {
            (TokenKey::Type(a), TokenKey::Type(b)) => a == b,
            (TokenKey::Unique(a), TokenKey::Unique(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            TokenKey::Type(_) => write!(f, "Token({})", self.name),
            TokenKey::Unique(_) => write!(f, "Token(\"{}\")", self.name),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Strip module paths from a type name, keeping generic arguments readable.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        match ch {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' => {
                out.push_str(&segment);
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(&segment);
    out
}
