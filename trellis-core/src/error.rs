// Error types for the Trellis runtime

use crate::di::Scope;
use http::StatusCode;
use thiserror::Error;

/// Errors raised while building or using an injector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiError {
    #[error("No provider for {token}; resolution path: {}", .path.join(" -> "))]
    NoProviderFound { token: String, path: Vec<String> },

    #[error("Cyclic dependency detected: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("Provider for {token} does not produce a value of type {expected}")]
    TypeMismatch {
        token: String,
        expected: &'static str,
    },

    #[error("Cannot mix multi and single providers for {token} in injector {injector}")]
    MixedMultiProvider { token: String, injector: String },

    #[error("No {scope} injector above injector {injector}")]
    ScopeUnavailable { scope: Scope, injector: String },

    #[error("Factory for {token} failed: {message}")]
    FactoryFailed { token: String, message: String },
}

/// Errors raised while normalizing the module graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Circular module import: {}", .chain.join(" -> "))]
    CircularModuleImport { chain: Vec<String> },

    #[error(
        "Import collision in {module}: {scope} token {token} is exported by {}; declare which import wins",
        .contributors.join(" and ")
    )]
    ModuleImportCollision {
        module: String,
        token: String,
        scope: Scope,
        contributors: Vec<String>,
    },

    #[error("{module} exports {token}, but neither provides it nor imports a module exporting it")]
    InvalidExport { module: String, token: String },

    #[error("{module} re-exports {exported}, which it does not import")]
    ReexportNotImported { module: String, exported: String },

    #[error("{module} resolves the collision on {token} in favour of {winner}, which does not export it")]
    InvalidCollisionResolution {
        module: String,
        token: String,
        winner: String,
    },

    #[error(
        "{module}: {scope} provider {token} depends on {dependency}, which is only provided in {dependency_scope} scope"
    )]
    ScopeViolation {
        module: String,
        token: String,
        scope: Scope,
        dependency: String,
        dependency_scope: Scope,
    },
}

/// Errors raised by the staged extension engine.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("Detected circular dependencies for extensions: {}", .chain.join(" -> "))]
    DetectedCircularDependenciesForExtensions { chain: Vec<String> },

    #[error("Extension {extension} in module {module} failed while initializing group {group}")]
    ExtensionFailed {
        module: String,
        extension: String,
        group: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Group {group} was aborted in module {module} by an earlier failure")]
    StageAborted { group: String, module: String },
}

/// Conflicts detected while registering routes in the router trie.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("{method} {path}: a catch-all segment must be the last segment")]
    CatchAllNotLast { method: String, path: String },

    #[error("{method} {path}: wildcard overlaps existing route {existing}")]
    WildcardOverlap {
        method: String,
        path: String,
        existing: String,
    },

    #[error("{method} {path}: duplicate handle, route is already registered")]
    DuplicateHandle { method: String, path: String },

    #[error("{method} {path}: parameter :{new} conflicts with :{existing} at the same position")]
    ParamNameConflict {
        method: String,
        path: String,
        existing: String,
        new: String,
    },

    #[error("{method} {path}: invalid route pattern, {reason}")]
    InvalidPattern {
        method: String,
        path: String,
        reason: String,
    },
}

/// The crate-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Di(#[from] DiError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an error carrying an explicit response status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        let status = match self {
            Error::RouteNotFound(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::BadRequest(_) | Error::Validation(_) | Error::Deserialization(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.as_u16()
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
