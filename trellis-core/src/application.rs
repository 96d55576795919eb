// Application bootstrapper and HTTP server

use crate::config::ApplicationOptions;
use crate::di::{Injector, Provider, Scope};
use crate::error::Error;
use crate::extension::{
    builtin_extensions, pre_router_group, CompiledRoutes, ExtensionRegistration, ExtensionsManager,
};
use crate::http::{HttpRequest, HttpResponse};
use crate::logging::LogMediatorRef;
use crate::module::{Module, ModuleGraph, ModuleRef};
use crate::pipeline::{DefaultErrorHandler, PreparedRoute};
use crate::router::Router;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// A bootstrapped application: resolved module graph, injector tree and
/// compiled router.
pub struct Application {
    options: Arc<ApplicationOptions>,
    graph: Arc<ModuleGraph>,
    injector: Injector,
    extensions: ExtensionsManager,
    routes: Arc<CompiledRoutes>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("options", &self.options)
            .field("modules", &self.graph.len())
            .field("routes", &self.routes.router.len())
            .finish()
    }
}

impl Application {
    /// Bootstrap the application rooted at `root`.
    pub async fn create(root: impl Module, options: ApplicationOptions) -> Result<Self, Error> {
        Self::create_with(Arc::new(root), options, Vec::new()).await
    }

    /// Bootstrap with extra extensions added to every module.
    pub async fn create_with(
        root: ModuleRef,
        options: ApplicationOptions,
        extensions: Vec<ExtensionRegistration>,
    ) -> Result<Self, Error> {
        info!(root = %root.name(), "Bootstrapping application");

        let graph = Arc::new(ModuleGraph::resolve(root)?);

        let injector = Injector::root("application");
        injector.register(Provider::value_of(options.clone()))?;
        injector.register(Provider::value_of(LogMediatorRef::default()))?;
        injector.register(DefaultErrorHandler::provider())?;
        for provider in graph.app_providers() {
            injector.register(provider.clone())?;
        }
        let log = injector.get::<LogMediatorRef>()?;

        let mut module_injectors = Vec::with_capacity(graph.len());
        for module in graph.modules() {
            let providers = module.providers.get(Scope::Module);
            let module_injector = injector.create_child_with(Scope::Module, module.name.clone(), providers)?;
            log.module_loaded(&module.name, providers.len());
            module_injectors.push(module_injector);
        }

        let mut global = builtin_extensions();
        global.extend(extensions);
        let manager = ExtensionsManager::new(graph.clone(), injector.clone(), module_injectors, &global)?;
        manager.init_all().await?;

        let routes = manager
            .request_stage(&pre_router_group())
            .await?
            .iter()
            .rev()
            .find_map(|result| result.first::<CompiledRoutes>())
            .ok_or_else(|| Error::Internal("router was not compiled".to_string()))?;

        info!(
            modules = graph.len(),
            routes = routes.router.len(),
            "Application bootstrap complete"
        );

        Ok(Self {
            options: Arc::new(options),
            graph,
            injector,
            extensions: manager,
            routes,
        })
    }

    pub fn options(&self) -> &ApplicationOptions {
        &self.options
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    /// The application-scope injector.
    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    pub fn extensions(&self) -> &ExtensionsManager {
        &self.extensions
    }

    pub fn router(&self) -> &Router<Arc<PreparedRoute>> {
        &self.routes.router
    }

    /// Route `request` and run its pipeline.
    pub async fn handle(&self, mut request: HttpRequest) -> HttpResponse {
        request.split_query();
        let (route, params) = match self.routes.router.lookup(&request.method, &request.path) {
            Ok(found) => (found.value.clone(), found.params),
            Err(error) => {
                debug!(method = %request.method, path = %request.path, error = %error, "No route");
                return error_response(&error);
            }
        };
        request.path_params = params;
        route.handle(request).await
    }

    /// Start the HTTP server on the configured host and port.
    pub async fn listen(self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.options.socket_addr()).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve connections from `listener` until `shutdown` completes.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let addr = listener.local_addr()?;
        let log = self.injector.get::<LogMediatorRef>()?;
        log.server_listening(&addr.to_string());

        let app = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            let (stream, _) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => break,
            };
            let io = TokioIo::new(stream);
            let app = app.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let app = app.clone();
                    async move { handle_request(req, app).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(error = ?err, "Error serving connection");
                }
            });
        }

        info!("Server stopped");
        app.close();
        Ok(())
    }

    /// Dispose every module injector, then the application injector.
    pub fn close(&self) {
        for injector in self.extensions.injectors() {
            injector.dispose();
        }
        self.injector.dispose();
    }
}

fn error_response(error: &Error) -> HttpResponse {
    let status = error.status_code();
    let body = serde_json::json!({
        "statusCode": status,
        "message": error.to_string(),
    });
    HttpResponse::new(status)
        .with_json(&body)
        .unwrap_or_else(|_| HttpResponse::new(status))
}

/// Handle an incoming HTTP request
async fn handle_request(
    req: Request<IncomingBody>,
    app: Arc<Application>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = HttpRequest::new(method, path);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.to_string(), value.to_string());
        }
    }
    request.body = req.collect().await?.to_bytes().to_vec();

    let response = app.handle(request).await;

    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        builder = builder.header(key, value);
    }
    match builder.body(Full::new(Bytes::from(response.body))) {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(error = %err, "Invalid response");
            let mut fallback = Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(fallback)
        }
    }
}
