// Core library for the Trellis HTTP runtime
// Module graph, hierarchical injectors, staged extensions and request pipelines

pub mod application;
pub mod config;
pub mod di;
pub mod error;
pub mod extension;
pub mod http;
pub mod logging;
pub mod module;
pub mod pipeline;
pub mod router;

// Re-export commonly used types
pub use application::Application;
pub use config::ApplicationOptions;
pub use di::{Args, Dependency, Injectable, Injector, Instance, Provider, Scope, Token};
pub use error::*;
pub use extension::{
    Extension, ExtensionContext, ExtensionRegistration, ExtensionsManager, GroupResult, StageValue,
};
pub use http::{HttpMethod, HttpRequest, HttpResponse, PathParams};
pub use module::{Import, Module, ModuleGraph, ModuleId, ModuleMetadata, ModuleWithParams};
pub use pipeline::{
    CanActivate, Controller, ControllerScope, Guard, GuardItem, HttpErrorHandler, Interceptor,
    InterceptorItem, Next, RequestContext, RouteOptions,
};
pub use router::{RouteMatch, Router};
