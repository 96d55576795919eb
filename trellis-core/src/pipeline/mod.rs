//! Request pipelines: guards, interceptors and the terminal handler.
//!
//! Every registered route becomes a [`PreparedRoute`] that runs
//! `guard1 → … → guardN → interceptor1 → … → handler`. The first guard that
//! denies ends the request with its status; errors from any step go to the
//! route's [`HttpErrorHandler`].

mod context;
mod controller;
mod error_handler;
mod guard;
mod interceptor;
mod route;

pub use context::RequestContext;
pub use controller::{
    Controller, ControllerDescriptor, ControllerScope, Handler, RouteDescriptor, RouteOptions,
};
pub use error_handler::{DefaultErrorHandler, ErrorHandlerRef, HttpErrorHandler};
pub use guard::{ApiKeyGuard, CanActivate, FnGuard, Guard, GuardItem};
pub use interceptor::{Interceptor, InterceptorItem, LoggingInterceptor, Next, TransformInterceptor};
pub use route::{PreparedRoute, RouteMeta};
