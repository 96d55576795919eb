// Trellis - a modular HTTP runtime for Rust
//
// Applications are composed from modules that declare providers, controllers,
// imports and exports. The runtime resolves the module graph, builds a
// hierarchy of injectors and compiles every controller route into a request
// pipeline of guards, interceptors and a handler.

// Re-export core functionality
pub use trellis_core::*;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Application,
        ApplicationOptions,
        Args,
        CanActivate,
        Controller,
        ControllerScope,
        Dependency,
        Error,
        Extension,
        ExtensionContext,
        ExtensionRegistration,
        Guard,
        GuardItem,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        Import,
        Injectable,
        Injector,
        Interceptor,
        InterceptorItem,
        Module,
        ModuleId,
        ModuleMetadata,
        ModuleWithParams,
        Next,
        Provider,
        RequestContext,
        RouteOptions,
        Scope,
        StageValue,
        Token,
    };
    pub use async_trait::async_trait;
}
