// Built-in groups that turn controllers into a compiled router

use super::engine::{Extension, ExtensionContext, ExtensionRegistration, StageValue};
use crate::config::ApplicationOptions;
use crate::di::{Args, Dependency, Injectable, Scope, Token};
use crate::error::{DiError, Error};
use crate::logging::LogMediatorRef;
use crate::module::NormalizedModule;
use crate::pipeline::{PreparedRoute, RouteMeta};
use crate::router::{join_paths, Router};
use async_trait::async_trait;
use std::sync::Arc;

/// Group whose extensions publish [`ModuleRoutes`].
pub struct RoutesGroup;

/// Group that compiles the router once every module's routes are known.
pub struct PreRouterGroup;

pub fn routes_group() -> Token {
    Token::of::<RoutesGroup>()
}

pub fn pre_router_group() -> Token {
    Token::of::<PreRouterGroup>()
}

/// Routes contributed by one module.
#[derive(Clone, Default)]
pub struct ModuleRoutes(pub Vec<RouteMeta>);

/// The application router, published by the last module of the pre-router
/// group.
pub struct CompiledRoutes {
    pub router: Router<Arc<PreparedRoute>>,
}

/// Registrations added to every module.
pub(crate) fn builtin_extensions() -> Vec<ExtensionRegistration> {
    vec![
        ExtensionRegistration::new::<RoutesExtension>(routes_group()),
        ExtensionRegistration::new::<PreRouterExtension>(pre_router_group()),
    ]
}

/// Collects route records from each mount point of a module.
pub struct RoutesExtension;

impl Injectable for RoutesExtension {
    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(RoutesExtension)
    }
}

#[async_trait]
impl Extension for RoutesExtension {
    async fn init(&self, ctx: &ExtensionContext, _is_last_module: bool) -> Result<StageValue, Error> {
        Ok(Arc::new(ModuleRoutes(collect_routes(ctx.module()))))
    }
}

/// Every (mount, controller, route) combination of `module`.
pub(crate) fn collect_routes(module: &NormalizedModule) -> Vec<RouteMeta> {
    let route_providers = module.providers.get(Scope::Route);
    let request_providers = module.providers.get(Scope::Request);

    let mut routes = Vec::new();
    for mount in &module.mounts {
        for controller in &module.controllers {
            let base = join_paths(&mount.prefix, &controller.path);
            for route in &controller.routes {
                let mut guards = mount.guards.clone();
                guards.extend(controller.guards.iter().cloned());
                guards.extend(route.guards.iter().cloned());

                let mut interceptors = controller.interceptors.clone();
                interceptors.extend(route.interceptors.iter().cloned());

                routes.push(RouteMeta {
                    module: module.id,
                    module_name: module.name.clone(),
                    controller: controller.name.clone(),
                    method: route.method,
                    path: join_paths(&base, &route.path),
                    scope: controller.scope,
                    guards,
                    interceptors,
                    route_providers: route_providers.to_vec(),
                    request_providers: request_providers.to_vec(),
                    controller_provider: controller.provider.clone(),
                    handler: route.handler.clone(),
                });
            }
        }
    }
    routes
}

/// Builds a [`PreparedRoute`] per collected route and registers it.
pub struct PreRouterExtension {
    options: Arc<ApplicationOptions>,
    log: Arc<LogMediatorRef>,
}

impl Injectable for PreRouterExtension {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::of::<ApplicationOptions>(),
            Dependency::of::<LogMediatorRef>(),
        ]
    }

    fn construct(args: &mut Args) -> Result<Self, DiError> {
        Ok(Self {
            options: args.next()?,
            log: args.next()?,
        })
    }
}

#[async_trait]
impl Extension for PreRouterExtension {
    async fn init(&self, ctx: &ExtensionContext, is_last_module: bool) -> Result<StageValue, Error> {
        if !is_last_module {
            return Ok(Arc::new(()));
        }

        let mut router = Router::new();
        for result in ctx.stage_per_app(&routes_group()).await? {
            let injector = ctx.injector_of(result.module()).ok_or_else(|| {
                Error::Internal(format!("no injector for module {}", result.module_name()))
            })?;
            for routes in result.downcast::<ModuleRoutes>() {
                for meta in &routes.0 {
                    let pattern = join_paths(&self.options.path_prefix, &meta.path);
                    let prepared = PreparedRoute::build(meta, &pattern, injector)?;
                    router.add_route(meta.method, &pattern, Arc::new(prepared))?;
                    self.log
                        .route_registered(meta.method, &pattern, &meta.module_name, &meta.controller);
                }
            }
        }

        if router.is_empty() {
            self.log.no_routes();
        }
        Ok(Arc::new(CompiledRoutes { router }))
    }
}
