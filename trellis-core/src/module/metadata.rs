// Declarative module descriptors consumed by the graph resolver

use crate::di::{short_type_name, Provider, Scope, Token};
use crate::extension::ExtensionRegistration;
use crate::pipeline::{ControllerDescriptor, GuardItem};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Identity of a module in the graph.
///
/// Plain modules are identified by their Rust type. A parameterized import is
/// its own node, identified by the allocation that holds its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    Type(TypeId),
    Params(usize),
}

impl ModuleId {
    pub fn of<M: Module>() -> Self {
        ModuleId::Type(TypeId::of::<M>())
    }
}

/// A unit of composition: providers, controllers, imports and exports.
///
/// Named tokens compare by identity, so a token shared between modules
/// lives in a `static`.
///
/// ```
/// use std::sync::LazyLock;
/// use trellis_core::di::{Provider, Scope, Token};
/// use trellis_core::module::{Module, ModuleMetadata};
///
/// static DATABASE_URL: LazyLock<Token> = LazyLock::new(|| Token::named("DATABASE_URL"));
///
/// struct ConfigModule;
///
/// impl Module for ConfigModule {
///     fn metadata(&self) -> ModuleMetadata {
///         ModuleMetadata::new()
///             .provide(
///                 Scope::Module,
///                 Provider::value(DATABASE_URL.clone(), String::from("postgres://db")),
///             )
///             .export(DATABASE_URL.clone())
///     }
/// }
///
/// struct RepoModule;
///
/// impl Module for RepoModule {
///     fn metadata(&self) -> ModuleMetadata {
///         ModuleMetadata::new().import(ConfigModule)
///     }
/// }
/// ```
pub trait Module: Send + Sync + 'static {
    /// Produce this module's descriptor. Called once per graph resolution.
    fn metadata(&self) -> ModuleMetadata;

    fn module_id(&self) -> ModuleId {
        ModuleId::Type(TypeId::of::<Self>())
    }

    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }
}

pub type ModuleRef = Arc<dyn Module>;

/// A module imported together with extra providers, a route prefix and
/// guards for the routes it mounts.
pub struct ModuleWithParams {
    pub module: ModuleRef,
    pub path: Option<String>,
    pub guards: Vec<GuardItem>,
    pub providers: ScopedProviders,
}

impl ModuleWithParams {
    pub fn new(module: impl Module) -> Self {
        Self {
            module: Arc::new(module),
            path: None,
            guards: Vec::new(),
            providers: ScopedProviders::default(),
        }
    }

    /// Mount the module's controllers under `path`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn guard(mut self, guard: GuardItem) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn provide(mut self, scope: Scope, provider: Provider) -> Self {
        self.providers.push(scope, provider);
        self
    }
}

type ForwardFn = dyn Fn() -> Import + Send + Sync;

/// One entry of a module's `imports` list.
#[derive(Clone)]
pub enum Import {
    Module(ModuleRef),
    WithParams(Arc<ModuleWithParams>),
    /// Dereferenced only after every directly reachable module is loaded,
    /// which lets two modules import each other.
    Forward(Arc<ForwardFn>),
}

impl Import {
    pub fn module(module: impl Module) -> Self {
        Import::Module(Arc::new(module))
    }

    pub fn with_params(params: ModuleWithParams) -> Self {
        Import::WithParams(Arc::new(params))
    }

    pub fn forward(resolve: impl Fn() -> Import + Send + Sync + 'static) -> Self {
        Import::Forward(Arc::new(resolve))
    }
}

impl fmt::Debug for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Import::Module(module) => write!(f, "Import({})", module.name()),
            Import::WithParams(params) => write!(
                f,
                "Import({}, path: {:?})",
                params.module.name(),
                params.path
            ),
            Import::Forward(_) => f.write_str("Import(forward)"),
        }
    }
}

/// A module mounted under the appending module's prefix and guards, whose
/// providers stay private to it.
#[derive(Clone)]
pub struct Append {
    pub module: ModuleRef,
    pub path: String,
}

/// One entry of a module's `exports` list.
#[derive(Debug, Clone)]
pub enum Export {
    Token(Token),
    Module(ModuleId),
}

/// Names the import whose provider wins when several imports export the
/// same token.
#[derive(Debug, Clone)]
pub struct ResolvedCollision {
    pub scope: Scope,
    pub token: Token,
    pub winner: ModuleId,
}

/// Providers partitioned by scope.
#[derive(Debug, Clone, Default)]
pub struct ScopedProviders {
    per_app: Vec<Provider>,
    per_mod: Vec<Provider>,
    per_rou: Vec<Provider>,
    per_req: Vec<Provider>,
}

impl ScopedProviders {
    pub fn get(&self, scope: Scope) -> &[Provider] {
        match scope {
            Scope::Application => &self.per_app,
            Scope::Module => &self.per_mod,
            Scope::Route => &self.per_rou,
            Scope::Request => &self.per_req,
        }
    }

    fn get_mut(&mut self, scope: Scope) -> &mut Vec<Provider> {
        match scope {
            Scope::Application => &mut self.per_app,
            Scope::Module => &mut self.per_mod,
            Scope::Route => &mut self.per_rou,
            Scope::Request => &mut self.per_req,
        }
    }

    pub fn push(&mut self, scope: Scope, provider: Provider) {
        self.get_mut(scope).push(provider);
    }

    pub fn set(&mut self, scope: Scope, providers: Vec<Provider>) {
        *self.get_mut(scope) = providers;
    }

    pub fn extend(&mut self, other: &ScopedProviders) {
        for scope in Scope::ALL {
            self.get_mut(scope).extend(other.get(scope).iter().cloned());
        }
    }

    /// Every provider with its scope, broadest scope first.
    pub fn iter(&self) -> impl Iterator<Item = (Scope, &Provider)> {
        Scope::ALL
            .into_iter()
            .flat_map(move |scope| self.get(scope).iter().map(move |p| (scope, p)))
    }

    pub fn len(&self) -> usize {
        self.per_app.len() + self.per_mod.len() + self.per_rou.len() + self.per_req.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalizable description of a module, built with chained calls.
#[derive(Clone, Default)]
pub struct ModuleMetadata {
    pub imports: Vec<Import>,
    pub appends: Vec<Append>,
    pub providers: ScopedProviders,
    pub exports: Vec<Export>,
    pub resolved_collisions: Vec<ResolvedCollision>,
    pub controllers: Vec<ControllerDescriptor>,
    pub extensions: Vec<ExtensionRegistration>,
}

impl ModuleMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a module for its exported providers.
    pub fn import(mut self, module: impl Module) -> Self {
        self.imports.push(Import::module(module));
        self
    }

    /// Import a module with parameters; with a `path` its controllers are
    /// mounted too.
    pub fn import_with(mut self, params: ModuleWithParams) -> Self {
        self.imports.push(Import::with_params(params));
        self
    }

    pub fn import_forward(mut self, resolve: impl Fn() -> Import + Send + Sync + 'static) -> Self {
        self.imports.push(Import::forward(resolve));
        self
    }

    pub fn append(mut self, path: impl Into<String>, module: impl Module) -> Self {
        self.appends.push(Append {
            module: Arc::new(module),
            path: path.into(),
        });
        self
    }

    pub fn provide(mut self, scope: Scope, provider: Provider) -> Self {
        self.providers.push(scope, provider);
        self
    }

    pub fn export(mut self, token: Token) -> Self {
        self.exports.push(Export::Token(token));
        self
    }

    /// Re-export everything an imported module exports.
    pub fn export_module<M: Module>(mut self) -> Self {
        self.exports.push(Export::Module(ModuleId::of::<M>()));
        self
    }

    pub fn resolve_collision(mut self, scope: Scope, token: Token, winner: ModuleId) -> Self {
        self.resolved_collisions.push(ResolvedCollision {
            scope,
            token,
            winner,
        });
        self
    }

    pub fn controller(mut self, controller: impl Into<ControllerDescriptor>) -> Self {
        self.controllers.push(controller.into());
        self
    }

    pub fn extension(mut self, extension: ExtensionRegistration) -> Self {
        self.extensions.push(extension);
        self
    }
}
