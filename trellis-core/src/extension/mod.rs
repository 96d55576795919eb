//! Staged application initialization.
//!
//! Extensions are grouped under a [`Token`](crate::di::Token). The
//! [`ExtensionsManager`] runs a group once per module, in module traversal
//! order, and keeps the result; later requests for the same group and module
//! get the cached [`GroupResult`]. An extension can ask for another group's
//! results while it runs, which is how stages depend on each other. Waiting
//! on oneself, directly or through other groups, fails with
//! [`ExtensionError::DetectedCircularDependenciesForExtensions`](crate::ExtensionError).
//!
//! Routing is itself built from two groups: [`routes_group`] collects route
//! records per module and [`pre_router_group`] compiles them into the
//! application router.

mod engine;
mod routing;

pub use engine::{
    Extension, ExtensionContext, ExtensionRegistration, ExtensionValue, ExtensionsManager, GroupResult,
    StageValue,
};
pub use routing::{
    pre_router_group, routes_group, CompiledRoutes, ModuleRoutes, PreRouterExtension, PreRouterGroup,
    RoutesExtension, RoutesGroup,
};

pub(crate) use routing::builtin_extensions;
