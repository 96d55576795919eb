// Per-request context handed to guards, interceptors and handlers

use crate::di::Injector;
use crate::error::Error;
use crate::http::HttpRequest;
use std::any::Any;
use std::sync::Arc;

struct ContextInner {
    request: HttpRequest,
    injector: Injector,
    request_id: String,
    route: Arc<str>,
    module: Arc<str>,
}

/// Cheap to clone; every clone refers to the same request.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    pub(crate) fn new(
        request: HttpRequest,
        injector: Injector,
        request_id: String,
        route: Arc<str>,
        module: Arc<str>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request,
                injector,
                request_id,
                route,
                module,
            }),
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.inner.request
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.request.param(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.inner.request.query(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.request.header(name)
    }

    /// The Request injector for injector-scoped controllers, the Route
    /// injector for context-scoped ones.
    pub fn injector(&self) -> &Injector {
        &self.inner.injector
    }

    /// Resolve `Token::of::<T>()` from [`RequestContext::injector`].
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, Error> {
        Ok(self.inner.injector.get::<T>()?)
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Registered pattern of the matched route.
    pub fn route(&self) -> &str {
        &self.inner.route
    }

    pub fn module(&self) -> &str {
        &self.inner.module
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("method", &self.inner.request.method)
            .field("path", &self.inner.request.path)
            .field("route", &self.inner.route)
            .finish()
    }
}
