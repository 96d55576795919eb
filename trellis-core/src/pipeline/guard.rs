// Guards for route protection

use super::context::RequestContext;
use crate::di::{short_type_name, Injectable, Injector, Instance, Provider, Token};
use crate::error::Error;
use async_trait::async_trait;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanActivate {
    Allow,
    Deny { status: u16 },
}

impl CanActivate {
    /// Deny with `401 Unauthorized`.
    pub fn deny() -> Self {
        CanActivate::Deny { status: 401 }
    }

    pub fn deny_with(status: u16) -> Self {
        CanActivate::Deny { status }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, CanActivate::Allow)
    }
}

impl From<bool> for CanActivate {
    fn from(allowed: bool) -> Self {
        if allowed {
            CanActivate::Allow
        } else {
            CanActivate::deny()
        }
    }
}

/// Guard trait for protecting routes
///
/// `params` are the static parameters attached where the guard was declared,
/// so one guard type can serve several routes with different settings.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    async fn can_activate(&self, ctx: &RequestContext, params: &[Value]) -> Result<CanActivate, Error>;
}

pub(crate) struct GuardInstance(pub(crate) Arc<dyn Guard>);

struct GuardSlot<G>(PhantomData<G>);

/// A guard declaration: which guard to resolve and its static parameters.
#[derive(Clone)]
pub struct GuardItem {
    provider: Provider,
    name: String,
    params: Vec<Value>,
}

impl GuardItem {
    /// A guard built by the injector, so it may depend on other providers.
    pub fn of<G: Guard + Injectable>() -> Self {
        let token = Token::of::<GuardSlot<G>>();
        let provider = Provider::factory(token, G::dependencies(), |args| {
            let guard = G::construct(args)?;
            Ok(Arc::new(GuardInstance(Arc::new(guard))) as Instance)
        });
        Self {
            provider,
            name: short_type_name(std::any::type_name::<G>()),
            params: Vec::new(),
        }
    }

    /// A guard built up front and shared by every request.
    pub fn instance<G: Guard>(guard: G) -> Self {
        let name = short_type_name(std::any::type_name::<G>());
        let provider = Provider::value(Token::named(format!("guard {name}")), GuardInstance(Arc::new(guard)));
        Self {
            provider,
            name,
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn token(&self) -> &Token {
        self.provider.token()
    }

    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    pub(crate) fn resolve(&self, injector: &Injector) -> Result<Arc<dyn Guard>, Error> {
        Ok(injector.get_by::<GuardInstance>(self.token())?.0.clone())
    }
}

impl std::fmt::Debug for GuardItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardItem")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Guard that checks a header against a fixed set of API keys.
pub struct ApiKeyGuard {
    header: String,
    valid_keys: Vec<String>,
}

impl ApiKeyGuard {
    pub fn new(header: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            header: header.into(),
            valid_keys: keys,
        }
    }
}

#[async_trait]
impl Guard for ApiKeyGuard {
    async fn can_activate(&self, ctx: &RequestContext, _params: &[Value]) -> Result<CanActivate, Error> {
        let allowed = ctx
            .header(&self.header)
            .is_some_and(|key| self.valid_keys.iter().any(|valid| valid == key));
        Ok(allowed.into())
    }
}

/// Closure-backed guard, handy for one-off checks.
pub struct FnGuard<F> {
    predicate: F,
}

impl<F> FnGuard<F>
where
    F: Fn(&RequestContext, &[Value]) -> Result<CanActivate, Error> + Send + Sync + 'static,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&RequestContext, &[Value]) -> Result<CanActivate, Error> + Send + Sync + 'static,
{
    async fn can_activate(&self, ctx: &RequestContext, params: &[Value]) -> Result<CanActivate, Error> {
        (self.predicate)(ctx, params)
    }
}
