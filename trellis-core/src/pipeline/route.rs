// Route records and their executable pipelines

use super::context::RequestContext;
use super::controller::{ControllerScope, Handler};
use super::error_handler::ErrorHandlerRef;
use super::guard::{CanActivate, Guard, GuardItem};
use super::interceptor::{Interceptor, InterceptorItem, Next, Terminal};
use crate::di::{Injector, Instance, Provider, Scope, Token};
use crate::error::Error;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::logging::LogMediatorRef;
use crate::module::ModuleId;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// A route collected from a module's mount points, before any injector is
/// attached to it. Guards are ordered mount, controller, then route.
#[derive(Clone)]
pub struct RouteMeta {
    pub module: ModuleId,
    pub module_name: String,
    pub controller: String,
    pub method: HttpMethod,
    pub path: String,
    pub scope: ControllerScope,
    pub guards: Vec<GuardItem>,
    pub interceptors: Vec<InterceptorItem>,
    pub route_providers: Vec<Provider>,
    pub request_providers: Vec<Provider>,
    pub(crate) controller_provider: Provider,
    pub(crate) handler: Handler,
}

enum Binding {
    Injector {
        providers: Arc<[Provider]>,
    },
    Context {
        controller: Instance,
        guards: Vec<Arc<dyn Guard>>,
        interceptors: Arc<[Arc<dyn Interceptor>]>,
    },
}

/// Disposes the Request injector when the pipeline finishes or is dropped.
struct RequestScope(Injector);

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// An immutable route record bound to its Route injector.
pub struct PreparedRoute {
    method: HttpMethod,
    pattern: Arc<str>,
    module: Arc<str>,
    controller: String,
    controller_token: Token,
    guards: Vec<GuardItem>,
    interceptors: Vec<InterceptorItem>,
    handler: Handler,
    injector: Injector,
    binding: Binding,
    error_handler: ErrorHandlerRef,
    log: LogMediatorRef,
}

impl PreparedRoute {
    /// Create the Route injector under `module_injector` and bind the
    /// controller according to its scope.
    pub fn build(meta: &RouteMeta, pattern: &str, module_injector: &Injector) -> Result<Self, Error> {
        let injector = module_injector.create_child_with(
            Scope::Route,
            format!("{} {}", meta.method, pattern),
            &meta.route_providers,
        )?;

        let binding = match meta.scope {
            ControllerScope::Injector => {
                let mut providers = meta.request_providers.clone();
                providers.push(meta.controller_provider.clone());
                providers.extend(meta.guards.iter().map(|g| g.provider().clone()));
                providers.extend(meta.interceptors.iter().map(|i| i.provider().clone()));
                Binding::Injector {
                    providers: providers.into(),
                }
            }
            ControllerScope::Context => {
                injector.register(meta.controller_provider.clone())?;
                for guard in &meta.guards {
                    injector.register(guard.provider().clone())?;
                }
                for interceptor in &meta.interceptors {
                    injector.register(interceptor.provider().clone())?;
                }
                Binding::Context {
                    controller: injector.resolve(meta.controller_provider.token())?,
                    guards: meta
                        .guards
                        .iter()
                        .map(|g| g.resolve(&injector))
                        .collect::<Result<_, _>>()?,
                    interceptors: meta
                        .interceptors
                        .iter()
                        .map(|i| i.resolve(&injector))
                        .collect::<Result<Vec<_>, _>>()?
                        .into(),
                }
            }
        };

        let error_handler = (*injector.get::<ErrorHandlerRef>()?).clone();
        let log = (*injector.get::<LogMediatorRef>()?).clone();

        Ok(Self {
            method: meta.method,
            pattern: Arc::from(pattern),
            module: Arc::from(meta.module_name.as_str()),
            controller: meta.controller.clone(),
            controller_token: meta.controller_provider.token().clone(),
            guards: meta.guards.clone(),
            interceptors: meta.interceptors.clone(),
            handler: meta.handler.clone(),
            injector,
            binding,
            error_handler,
            log,
        })
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    pub fn guards(&self) -> &[GuardItem] {
        &self.guards
    }

    pub fn scope(&self) -> ControllerScope {
        match self.binding {
            Binding::Injector { .. } => ControllerScope::Injector,
            Binding::Context { .. } => ControllerScope::Context,
        }
    }

    /// Run guards, interceptors and the handler for `request`. Errors are
    /// turned into responses by the route's error handler.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let request_id = Uuid::new_v4().to_string();
        let (injector, _scope) = match self.binding {
            Binding::Injector { .. } => {
                let injector = self.injector.create_child(Scope::Request, request_id.clone());
                (injector.clone(), Some(RequestScope(injector)))
            }
            Binding::Context { .. } => (self.injector.clone(), None),
        };
        let ctx = RequestContext::new(
            request,
            injector,
            request_id,
            self.pattern.clone(),
            self.module.clone(),
        );

        match self.execute(&ctx).await {
            Ok(response) => response,
            Err(error) => self.error_handler.0.handle(&error, &ctx).await,
        }
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<HttpResponse, Error> {
        let injector = ctx.injector();
        if let Binding::Injector { providers } = &self.binding {
            injector.register(Provider::value_of(ctx.request().clone()))?;
            for provider in providers.iter() {
                injector.register(provider.clone())?;
            }
        }

        let guards = match &self.binding {
            Binding::Injector { .. } => self
                .guards
                .iter()
                .map(|g| g.resolve(injector))
                .collect::<Result<Vec<_>, _>>()?,
            Binding::Context { guards, .. } => guards.clone(),
        };
        for (guard, item) in guards.iter().zip(&self.guards) {
            if let CanActivate::Deny { status } = guard.can_activate(ctx, item.params()).await? {
                self.log.guard_denied(ctx, item.name(), status);
                return Ok(HttpResponse::new(status));
            }
            trace!(guard = item.name(), route = %self.pattern, "Guard passed");
        }

        let (controller, interceptors): (Instance, Arc<[Arc<dyn Interceptor>]>) = match &self.binding {
            Binding::Injector { .. } => (
                injector.resolve(&self.controller_token)?,
                self.interceptors
                    .iter()
                    .map(|i| i.resolve(injector))
                    .collect::<Result<Vec<_>, _>>()?
                    .into(),
            ),
            Binding::Context {
                controller,
                interceptors,
                ..
            } => (controller.clone(), interceptors.clone()),
        };

        let handler = self.handler.clone();
        let terminal: Arc<Terminal> = Arc::new(move |ctx: RequestContext| handler(controller.clone(), ctx));
        Next::new(interceptors, terminal).run(ctx.clone()).await
    }
}

impl std::fmt::Debug for PreparedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRoute")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("module", &self.module)
            .field("controller", &self.controller)
            .field("scope", &self.scope())
            .finish()
    }
}
