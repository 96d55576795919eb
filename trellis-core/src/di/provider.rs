// Provider recipes and their scopes

use super::token::Token;
use crate::error::DiError;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A resolved value held by an injector.
pub type Instance = Arc<dyn Any + Send + Sync>;

type FactoryFn = dyn Fn(&mut Args) -> Result<Instance, DiError> + Send + Sync;

/// Lifetime and sharing boundary of a provided value.
///
/// Scopes are ordered from the broadest to the narrowest, so
/// `Scope::Application < Scope::Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Application,
    Module,
    Route,
    Request,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Application, Scope::Module, Scope::Route, Scope::Request];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Application => "application",
            Scope::Module => "module",
            Scope::Route => "route",
            Scope::Request => "request",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency declared by a class or factory provider.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub token: Token,
    pub optional: bool,
    pub skip_self: bool,
}

impl Dependency {
    pub fn of<T: Any>() -> Self {
        Self::token(Token::of::<T>())
    }

    pub fn token(token: Token) -> Self {
        Self {
            token,
            optional: false,
            skip_self: false,
        }
    }

    /// Resolve to nothing instead of failing when no provider exists.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Start the lookup at the parent of the injector owning the provider.
    pub fn skip_self(mut self) -> Self {
        self.skip_self = true;
        self
    }
}

/// The set of values produced by a multi-provider token.
pub struct MultiInstance(pub Vec<Instance>);

/// Resolved dependencies handed to a factory, in declaration order.
pub struct Args {
    owner: String,
    values: VecDeque<(Token, Option<Instance>)>,
}

impl Args {
    pub(crate) fn new(owner: &Token, values: Vec<(Token, Option<Instance>)>) -> Self {
        Self {
            owner: owner.name().to_string(),
            values: values.into(),
        }
    }

    fn pop(&mut self) -> Result<(Token, Option<Instance>), DiError> {
        self.values.pop_front().ok_or_else(|| DiError::FactoryFailed {
            token: self.owner.clone(),
            message: "requested more arguments than declared dependencies".to_string(),
        })
    }

    /// Take the next dependency as a `T`.
    pub fn next<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>, DiError> {
        let (token, value) = self.pop()?;
        match value {
            Some(value) => downcast(&token, value),
            None => Err(DiError::NoProviderFound {
                token: token.name().to_string(),
                path: vec![self.owner.clone(), token.name().to_string()],
            }),
        }
    }

    /// Take the next optional dependency.
    pub fn next_optional<T: Any + Send + Sync>(&mut self) -> Result<Option<Arc<T>>, DiError> {
        let (token, value) = self.pop()?;
        value.map(|value| downcast(&token, value)).transpose()
    }

    /// Take the next dependency as every value registered for a multi token.
    pub fn next_all<T: Any + Send + Sync>(&mut self) -> Result<Vec<Arc<T>>, DiError> {
        let (token, value) = self.pop()?;
        match value {
            Some(value) => downcast_all(&token, value),
            None => Ok(Vec::new()),
        }
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(token: &Token, value: Instance) -> Result<Arc<T>, DiError> {
    value.downcast::<T>().map_err(|_| DiError::TypeMismatch {
        token: token.name().to_string(),
        expected: std::any::type_name::<T>(),
    })
}

pub(crate) fn downcast_all<T: Any + Send + Sync>(
    token: &Token,
    value: Instance,
) -> Result<Vec<Arc<T>>, DiError> {
    let multi = downcast::<MultiInstance>(token, value)?;
    multi
        .0
        .iter()
        .map(|item| downcast::<T>(token, item.clone()))
        .collect()
}

/// A type the injector can construct from its declared dependencies.
///
/// ```
/// use std::sync::Arc;
/// use trellis_core::di::{Args, Dependency, Injectable};
/// use trellis_core::DiError;
///
/// struct Config { url: String }
/// struct Client { config: Arc<Config> }
///
/// impl Injectable for Client {
///     fn dependencies() -> Vec<Dependency> {
///         vec![Dependency::of::<Config>()]
///     }
///
///     fn construct(args: &mut Args) -> Result<Self, DiError> {
///         Ok(Self { config: args.next()? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    fn construct(args: &mut Args) -> Result<Self, DiError>;
}

#[derive(Clone)]
pub(crate) enum ProviderKind {
    Value(Instance),
    Factory {
        deps: Vec<Dependency>,
        factory: Arc<FactoryFn>,
    },
    Alias(Token),
}

#[derive(Clone)]
struct ProviderInner {
    token: Token,
    kind: ProviderKind,
    multi: bool,
    label: String,
}

/// Binding recipe for a token: a value, a class, a factory or an alias.
///
/// Clones share identity; two providers built separately are different
/// even when they bind the same token.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl Provider {
    fn new(token: Token, kind: ProviderKind, label: String) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                token,
                kind,
                multi: false,
                label,
            }),
        }
    }

    /// Bind `Token::of::<T>()` to an already built value.
    pub fn value_of<T: Any + Send + Sync>(value: T) -> Self {
        Self::value(Token::of::<T>(), value)
    }

    /// Bind a token to an already built value.
    pub fn value<T: Any + Send + Sync>(token: Token, value: T) -> Self {
        let label = format!("value {}", token.name());
        Self::new(token, ProviderKind::Value(Arc::new(value)), label)
    }

    /// Bind a token to a shared instance without wrapping it again.
    pub fn instance(token: Token, instance: Instance) -> Self {
        let label = format!("value {}", token.name());
        Self::new(token, ProviderKind::Value(instance), label)
    }

    /// Bind `Token::of::<T>()` to the class `T`.
    pub fn class<T: Injectable>() -> Self {
        Self::class_for::<T>(Token::of::<T>())
    }

    /// Bind an arbitrary token to the class `T`.
    pub fn class_for<T: Injectable>(token: Token) -> Self {
        let label = format!("class {}", super::token::short_type_name(std::any::type_name::<T>()));
        let factory: Arc<FactoryFn> =
            Arc::new(|args: &mut Args| T::construct(args).map(|value| Arc::new(value) as Instance));
        Self::new(
            token,
            ProviderKind::Factory {
                deps: T::dependencies(),
                factory,
            },
            label,
        )
    }

    /// Bind a token to a factory with its own declared dependencies.
    pub fn factory<F>(token: Token, deps: Vec<Dependency>, factory: F) -> Self
    where
        F: Fn(&mut Args) -> Result<Instance, DiError> + Send + Sync + 'static,
    {
        let label = format!("factory {}", token.name());
        Self::new(
            token,
            ProviderKind::Factory {
                deps,
                factory: Arc::new(factory),
            },
            label,
        )
    }

    /// Make `token` resolve to whatever `target` resolves to.
    pub fn alias(token: Token, target: Token) -> Self {
        let label = format!("alias {} -> {}", token.name(), target.name());
        Self::new(token, ProviderKind::Alias(target), label)
    }

    /// Mark this provider as one of several values for its token.
    pub fn multi(self) -> Self {
        let mut inner = (*self.inner).clone();
        inner.multi = true;
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn token(&self) -> &Token {
        &self.inner.token
    }

    pub fn is_multi(&self) -> bool {
        self.inner.multi
    }

    /// Tokens this provider needs, with their modifiers.
    pub fn dependencies(&self) -> &[Dependency] {
        match &self.inner.kind {
            ProviderKind::Factory { deps, .. } => deps,
            _ => &[],
        }
    }

    /// Identity comparison: clones of one provider are the same provider.
    pub fn same_as(&self, other: &Provider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn kind(&self) -> &ProviderKind {
        &self.inner.kind
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("token", &self.inner.token)
            .field("recipe", &self.inner.label)
            .field("multi", &self.inner.multi)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Config;

    #[test]
    fn test_scope_ordering() {
        assert!(Scope::Application < Scope::Module);
        assert!(Scope::Route < Scope::Request);
        assert_eq!(Scope::Request.to_string(), "request");
    }

    #[test]
    fn test_provider_identity() {
        let provider = Provider::value_of(Config);
        let clone = provider.clone();
        assert!(provider.same_as(&clone));
        assert!(!provider.same_as(&Provider::value_of(Config)));
        assert!(!provider.same_as(&provider.clone().multi()));
    }

    #[test]
    fn test_args_reports_missing_values() {
        let token = Token::of::<Config>();
        let mut args = Args::new(&Token::named("owner"), vec![(token, None)]);
        assert!(matches!(
            args.next::<Config>(),
            Err(DiError::NoProviderFound { .. })
        ));
        assert!(args.next_optional::<Config>().is_err());
    }
}
