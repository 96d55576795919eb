// Hierarchical dependency injection container

use super::provider::{downcast, downcast_all, Args, Instance, MultiInstance, Provider, ProviderKind, Scope};
use super::token::Token;
use crate::error::DiError;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Clone)]
enum Registration {
    Single(Provider),
    Multi(Vec<Provider>),
}

type DisposeHook = Box<dyn FnOnce() + Send>;

struct InjectorInner {
    scope: Scope,
    name: String,
    parent: Option<Injector>,
    registry: RwLock<HashMap<Token, Registration>>,
    cache: Mutex<HashMap<Token, Instance>>,
    dispose_hooks: Mutex<Vec<DisposeHook>>,
}

/// A scope-bound provider map with a link to its parent injector.
///
/// Lookups walk the local map first and then the ancestors up to the
/// application injector. Class and factory providers are instantiated once
/// per owning injector and cached there, so sibling injectors that register
/// the same provider hold independent instances.
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

#[derive(Default)]
struct ResolutionPath {
    stack: Vec<(usize, Token)>,
}

impl ResolutionPath {
    fn contains(&self, injector: usize, token: &Token) -> bool {
        self.stack.iter().any(|(id, t)| *id == injector && t == token)
    }

    fn chain_with(&self, token: &Token) -> Vec<String> {
        self.stack
            .iter()
            .map(|(_, t)| t.name().to_string())
            .chain(std::iter::once(token.name().to_string()))
            .collect()
    }
}

impl Injector {
    /// Create the application-scope root injector.
    pub fn root(name: impl Into<String>) -> Self {
        Self::with_parent(Scope::Application, name.into(), None)
    }

    fn with_parent(scope: Scope, name: String, parent: Option<Injector>) -> Self {
        debug!(scope = %scope, injector = %name, "Creating injector");
        Self {
            inner: Arc::new(InjectorInner {
                scope,
                name,
                parent,
                registry: RwLock::new(HashMap::new()),
                cache: Mutex::new(HashMap::new()),
                dispose_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an empty child injector. The child's scope is expected to be
    /// narrower than this injector's.
    pub fn create_child(&self, scope: Scope, name: impl Into<String>) -> Injector {
        Self::with_parent(scope, name.into(), Some(self.clone()))
    }

    /// Create a child injector and register `providers` in it.
    pub fn create_child_with(
        &self,
        scope: Scope,
        name: impl Into<String>,
        providers: &[Provider],
    ) -> Result<Injector, DiError> {
        let child = self.create_child(scope, name);
        for provider in providers {
            child.register(provider.clone())?;
        }
        Ok(child)
    }

    pub fn scope(&self) -> Scope {
        self.inner.scope
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Injector> {
        self.inner.parent.as_ref()
    }

    /// Nearest injector (self included) with the given scope.
    pub fn ancestor(&self, scope: Scope) -> Option<&Injector> {
        let mut current = Some(self);
        while let Some(injector) = current {
            if injector.inner.scope == scope {
                return Some(injector);
            }
            current = injector.parent();
        }
        None
    }

    /// Register a provider in this injector.
    ///
    /// A single provider replaces an earlier single provider for the same
    /// token; multi providers accumulate in registration order.
    pub fn register(&self, provider: Provider) -> Result<(), DiError> {
        let token = provider.token().clone();
        let mut registry = self.inner.registry.write();

        match (registry.get_mut(&token), provider.is_multi()) {
            (None, false) => {
                registry.insert(token.clone(), Registration::Single(provider));
            }
            (None, true) => {
                registry.insert(token.clone(), Registration::Multi(vec![provider]));
            }
            (Some(Registration::Single(existing)), false) => {
                trace!(token = %token, injector = %self.inner.name, "Overriding provider");
                *existing = provider;
            }
            (Some(Registration::Multi(list)), true) => {
                if !list.iter().any(|p| p.same_as(&provider)) {
                    list.push(provider);
                }
            }
            _ => {
                return Err(DiError::MixedMultiProvider {
                    token: token.name().to_string(),
                    injector: self.describe(),
                });
            }
        }
        drop(registry);

        self.inner.cache.lock().remove(&token);
        trace!(token = %token, injector = %self.inner.name, "Provider registered");
        Ok(())
    }

    /// Register a provider in the nearest injector of `scope`.
    pub fn register_in(&self, scope: Scope, provider: Provider) -> Result<(), DiError> {
        self.ancestor(scope)
            .ok_or_else(|| DiError::ScopeUnavailable {
                scope,
                injector: self.describe(),
            })?
            .register(provider)
    }

    /// Whether this injector or an ancestor provides `token`.
    pub fn contains(&self, token: &Token) -> bool {
        let mut current = Some(self);
        while let Some(injector) = current {
            if injector.contains_local(token) {
                return true;
            }
            current = injector.parent();
        }
        false
    }

    pub fn contains_local(&self, token: &Token) -> bool {
        self.inner.registry.read().contains_key(token)
    }

    /// Resolve `token`, walking up the hierarchy on a local miss.
    pub fn resolve(&self, token: &Token) -> Result<Instance, DiError> {
        self.resolve_from(token, &mut ResolutionPath::default())
    }

    /// Resolve `token` starting at the nearest injector of `scope`.
    pub fn resolve_in(&self, scope: Scope, token: &Token) -> Result<Instance, DiError> {
        self.ancestor(scope)
            .ok_or_else(|| DiError::ScopeUnavailable {
                scope,
                injector: self.describe(),
            })?
            .resolve(token)
    }

    /// Resolve `Token::of::<T>()` as a `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, DiError> {
        self.get_by(&Token::of::<T>())
    }

    /// Resolve an arbitrary token as a `T`.
    pub fn get_by<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>, DiError> {
        downcast(token, self.resolve(token)?)
    }

    /// Resolve every value registered for a multi token.
    pub fn get_all<T: Any + Send + Sync>(&self, token: &Token) -> Result<Vec<Arc<T>>, DiError> {
        downcast_all(token, self.resolve(token)?)
    }

    /// Register a release hook run by [`Injector::dispose`].
    pub fn on_dispose(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.dispose_hooks.lock().push(Box::new(hook));
    }

    /// Run release hooks and drop every instance cached by this injector.
    pub fn dispose(&self) {
        let hooks: Vec<DisposeHook> = std::mem::take(&mut *self.inner.dispose_hooks.lock());
        for hook in hooks.into_iter().rev() {
            hook();
        }
        let released = {
            let mut cache = self.inner.cache.lock();
            let count = cache.len();
            cache.clear();
            count
        };
        trace!(injector = %self.inner.name, released, "Injector disposed");
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn describe(&self) -> String {
        format!("{}[{}]", self.inner.scope, self.inner.name)
    }

    fn resolve_from(&self, token: &Token, path: &mut ResolutionPath) -> Result<Instance, DiError> {
        let mut searched = Vec::new();
        let mut current = Some(self);
        while let Some(injector) = current {
            if let Some(instance) = injector.resolve_local(token, path)? {
                return Ok(instance);
            }
            searched.push(injector.describe());
            current = injector.parent();
        }

        debug!(token = %token, "Provider not found in injector hierarchy");
        let mut chain = path.chain_with(token);
        chain.push(format!("searched {}", searched.join(", ")));
        Err(DiError::NoProviderFound {
            token: token.name().to_string(),
            path: chain,
        })
    }

    fn resolve_local(&self, token: &Token, path: &mut ResolutionPath) -> Result<Option<Instance>, DiError> {
        let cached = self.inner.cache.lock().get(token).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let registration = self.inner.registry.read().get(token).cloned();
        let Some(registration) = registration else {
            return Ok(None);
        };

        let id = self.id();
        if path.contains(id, token) {
            return Err(DiError::CyclicDependency {
                chain: path.chain_with(token),
            });
        }

        path.stack.push((id, token.clone()));
        let result = match &registration {
            Registration::Single(provider) => self.instantiate(provider, path),
            Registration::Multi(providers) => providers
                .iter()
                .map(|provider| self.instantiate(provider, path))
                .collect::<Result<Vec<_>, _>>()
                .map(|items| Arc::new(MultiInstance(items)) as Instance),
        };
        path.stack.pop();

        let instance = result?;
        let instance = self
            .inner
            .cache
            .lock()
            .entry(token.clone())
            .or_insert(instance)
            .clone();
        trace!(token = %token, injector = %self.inner.name, "Provider resolved");
        Ok(Some(instance))
    }

    fn instantiate(&self, provider: &Provider, path: &mut ResolutionPath) -> Result<Instance, DiError> {
        match provider.kind() {
            ProviderKind::Value(value) => Ok(value.clone()),
            ProviderKind::Alias(target) => self.resolve_from(target, path),
            ProviderKind::Factory { deps, factory } => {
                let mut values = Vec::with_capacity(deps.len());
                for dep in deps {
                    let start = if dep.skip_self { self.parent() } else { Some(self) };
                    let value = match start {
                        Some(injector) if !dep.optional || injector.contains(&dep.token) => {
                            Some(injector.resolve_from(&dep.token, path)?)
                        }
                        None if !dep.optional => {
                            return Err(DiError::NoProviderFound {
                                token: dep.token.name().to_string(),
                                path: path.chain_with(&dep.token),
                            });
                        }
                        _ => None,
                    };
                    values.push((dep.token.clone(), value));
                }
                factory(&mut Args::new(provider.token(), values))
            }
        }
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("scope", &self.inner.scope)
            .field("name", &self.inner.name)
            .field("parent", &self.inner.parent.as_ref().map(|p| p.describe()))
            .finish()
    }
}
