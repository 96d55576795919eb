// Controller and route declarations

use super::context::RequestContext;
use super::guard::GuardItem;
use super::interceptor::InterceptorItem;
use crate::di::{short_type_name, Injectable, Instance, Provider};
use crate::error::Error;
use crate::http::{HttpMethod, HttpResponse};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// How a controller instance is bound to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerScope {
    /// A fresh Request injector per request; the controller, its guards and
    /// interceptors are built for that request only.
    #[default]
    Injector,
    /// Controller, guards and interceptors are resolved once when the route
    /// is registered; requests only get a [`RequestContext`].
    Context,
}

/// Type-erased route handler taking the controller instance.
pub type Handler =
    Arc<dyn Fn(Instance, RequestContext) -> BoxFuture<'static, Result<HttpResponse, Error>> + Send + Sync>;

/// One route declared on a controller.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub guards: Vec<GuardItem>,
    pub interceptors: Vec<InterceptorItem>,
    pub(crate) handler: Handler,
}

/// A controller as consumed by the module graph.
#[derive(Clone)]
pub struct ControllerDescriptor {
    pub name: String,
    pub path: String,
    pub scope: ControllerScope,
    pub guards: Vec<GuardItem>,
    pub interceptors: Vec<InterceptorItem>,
    pub routes: Vec<RouteDescriptor>,
    pub(crate) provider: Provider,
}

/// Per-route guards and interceptors.
#[derive(Clone, Default)]
pub struct RouteOptions {
    guards: Vec<GuardItem>,
    interceptors: Vec<InterceptorItem>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, guard: GuardItem) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn interceptor(mut self, interceptor: InterceptorItem) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

/// Builder for a controller of type `C`.
///
/// ```
/// use std::sync::Arc;
/// use trellis_core::di::{Args, Injectable};
/// use trellis_core::http::HttpResponse;
/// use trellis_core::pipeline::{Controller, ControllerDescriptor};
/// use trellis_core::DiError;
///
/// struct HealthController;
///
/// impl Injectable for HealthController {
///     fn construct(_args: &mut Args) -> Result<Self, DiError> {
///         Ok(HealthController)
///     }
/// }
///
/// let controller: ControllerDescriptor = Controller::<HealthController>::new("/health")
///     .get("/", |_ctrl, _ctx| async { Ok(HttpResponse::ok().with_text("up")) })
///     .into();
/// assert_eq!(controller.routes.len(), 1);
/// ```
pub struct Controller<C> {
    descriptor: ControllerDescriptor,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Injectable> Controller<C> {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            descriptor: ControllerDescriptor {
                name: short_type_name(std::any::type_name::<C>()),
                path: path.into(),
                scope: ControllerScope::default(),
                guards: Vec::new(),
                interceptors: Vec::new(),
                routes: Vec::new(),
                provider: Provider::class::<C>(),
            },
            _marker: PhantomData,
        }
    }

    pub fn scope(mut self, scope: ControllerScope) -> Self {
        self.descriptor.scope = scope;
        self
    }

    /// Guard applied to every route of this controller.
    pub fn guard(mut self, guard: GuardItem) -> Self {
        self.descriptor.guards.push(guard);
        self
    }

    pub fn interceptor(mut self, interceptor: InterceptorItem) -> Self {
        self.descriptor.interceptors.push(interceptor);
        self
    }

    pub fn route<F, Fut>(self, method: HttpMethod, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.route_with(method, path, RouteOptions::default(), handler)
    }

    pub fn route_with<F, Fut>(
        mut self,
        method: HttpMethod,
        path: impl Into<String>,
        options: RouteOptions,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        let name = self.descriptor.name.clone();
        let handler: Handler = Arc::new(move |instance: Instance, ctx: RequestContext| {
            let fut: BoxFuture<'static, Result<HttpResponse, Error>> = match instance.downcast::<C>() {
                Ok(controller) => Box::pin(handler(controller, ctx)),
                Err(_) => {
                    let message = format!("controller instance is not a {name}");
                    Box::pin(async move { Err(Error::Internal(message)) })
                }
            };
            fut
        });
        self.descriptor.routes.push(RouteDescriptor {
            method,
            path: path.into(),
            guards: options.guards,
            interceptors: options.interceptors,
            handler,
        });
        self
    }

    pub fn get<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.route(HttpMethod::GET, path, handler)
    }

    pub fn post<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.route(HttpMethod::POST, path, handler)
    }

    pub fn put<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.route(HttpMethod::PUT, path, handler)
    }

    pub fn delete<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.route(HttpMethod::DELETE, path, handler)
    }

    pub fn build(self) -> ControllerDescriptor {
        self.descriptor
    }
}

impl<C: Injectable> From<Controller<C>> for ControllerDescriptor {
    fn from(controller: Controller<C>) -> Self {
        controller.build()
    }
}
