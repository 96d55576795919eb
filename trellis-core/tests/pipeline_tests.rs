// Tests for request pipelines driven through the application

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_core::di::{Args, Dependency, Injectable, Provider, Scope};
use trellis_core::http::{HttpMethod, HttpRequest, HttpResponse};
use trellis_core::module::{Module, ModuleMetadata, ModuleWithParams};
use trellis_core::pipeline::{
    ApiKeyGuard, CanActivate, Controller, ControllerScope, FnGuard, Guard, GuardItem, Interceptor,
    InterceptorItem, Next, RequestContext, RouteOptions,
};
use trellis_core::{Application, ApplicationOptions, DiError, Error};

struct Hits(AtomicUsize);

struct CounterController {
    hits: Arc<Hits>,
    local: AtomicUsize,
}

impl Injectable for CounterController {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Hits>()]
    }

    fn construct(args: &mut Args) -> Result<Self, DiError> {
        Ok(Self {
            hits: args.next()?,
            local: AtomicUsize::new(0),
        })
    }
}

impl CounterController {
    fn bump(&self) -> HttpResponse {
        self.hits.0.fetch_add(1, Ordering::SeqCst);
        let local = self.local.fetch_add(1, Ordering::SeqCst) + 1;
        HttpResponse::ok().with_text(local.to_string())
    }
}

fn get(path: &str) -> HttpRequest {
    HttpRequest::new("GET", path)
}

fn hits(app: &Application) -> usize {
    app.injector().get::<Hits>().unwrap().0.load(Ordering::SeqCst)
}

// Guards

struct SecretModule;
impl Module for SecretModule {
    fn metadata(&self) -> ModuleMetadata {
        let key_guard = GuardItem::instance(ApiKeyGuard::new("x-api-key", vec!["k1".to_string()]));
        ModuleMetadata::new()
            .provide(Scope::Application, Provider::value_of(Hits(AtomicUsize::new(0))))
            .controller(
                Controller::<CounterController>::new("/")
                    .route_with(
                        HttpMethod::GET,
                        "/secret",
                        RouteOptions::new().guard(key_guard),
                        |ctrl, _ctx| async move { Ok(ctrl.bump()) },
                    )
                    .get("/open", |ctrl, _ctx| async move { Ok(ctrl.bump()) }),
            )
    }
}

#[tokio::test]
async fn test_denying_guard_skips_handler() {
    let app = Application::create(SecretModule, ApplicationOptions::default()).await.unwrap();

    let denied = app.handle(get("/secret")).await;
    assert_eq!(denied.status, 401);
    assert_eq!(hits(&app), 0);

    let allowed = app.handle(get("/secret").with_header("X-Api-Key", "k1")).await;
    assert_eq!(allowed.status, 200);
    assert_eq!(hits(&app), 1);

    let open = app.handle(get("/open")).await;
    assert_eq!(open.status, 200);
    assert_eq!(hits(&app), 2);
}

struct RoleGuard;

impl Injectable for RoleGuard {
    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(RoleGuard)
    }
}

#[async_trait]
impl Guard for RoleGuard {
    async fn can_activate(&self, ctx: &RequestContext, params: &[Value]) -> Result<CanActivate, Error> {
        let required = params.first().and_then(Value::as_str).unwrap_or_default();
        if ctx.header("x-role") == Some(required) {
            Ok(CanActivate::Allow)
        } else {
            Ok(CanActivate::deny_with(403))
        }
    }
}

struct AdminModule;
impl Module for AdminModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new().controller(
            Controller::<CounterController>::new("/stats")
                .guard(GuardItem::of::<RoleGuard>().with_params(vec![json!("admin")]))
                .get("/", |ctrl, _ctx| async move { Ok(ctrl.bump()) }),
        )
    }
}

struct MountedRoot;
impl Module for MountedRoot {
    fn metadata(&self) -> ModuleMetadata {
        let tenant_guard = FnGuard::new(|ctx: &RequestContext, _params: &[Value]| {
            Ok(ctx.header("x-tenant").is_some().into())
        });
        ModuleMetadata::new()
            .provide(Scope::Application, Provider::value_of(Hits(AtomicUsize::new(0))))
            .import_with(
                ModuleWithParams::new(AdminModule)
                    .path("admin")
                    .guard(GuardItem::instance(tenant_guard)),
            )
    }
}

#[tokio::test]
async fn test_mount_guards_run_before_controller_guards() {
    let options = ApplicationOptions::default().path_prefix("/api");
    let app = Application::create(MountedRoot, options).await.unwrap();

    let no_tenant = app.handle(get("/api/admin/stats").with_header("x-role", "admin")).await;
    assert_eq!(no_tenant.status, 401);

    let wrong_role = app
        .handle(get("/api/admin/stats").with_header("x-tenant", "t1").with_header("x-role", "guest"))
        .await;
    assert_eq!(wrong_role.status, 403);

    let allowed = app
        .handle(get("/api/admin/stats").with_header("x-tenant", "t1").with_header("x-role", "admin"))
        .await;
    assert_eq!(allowed.status, 200);
    assert_eq!(hits(&app), 1);
}

// Controller scopes

struct ScopedModule;
impl Module for ScopedModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new()
            .provide(Scope::Application, Provider::value_of(Hits(AtomicUsize::new(0))))
            .controller(
                Controller::<CounterController>::new("/fresh").get("/", |ctrl, _ctx| async move { Ok(ctrl.bump()) }),
            )
    }
}

#[tokio::test]
async fn test_injector_scope_builds_controller_per_request() {
    let app = Application::create(ScopedModule, ApplicationOptions::default()).await.unwrap();

    let responses = join_all((0..10).map(|_| app.handle(get("/fresh")))).await;
    assert!(responses.iter().all(|r| r.status == 200 && r.body_str() == "1"));
    assert_eq!(hits(&app), 10);
}

struct ContextScopedModule;
impl Module for ContextScopedModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new()
            .provide(Scope::Application, Provider::value_of(Hits(AtomicUsize::new(0))))
            .controller(
                Controller::<CounterController>::new("/shared")
                    .scope(ControllerScope::Context)
                    .get("/", |ctrl, _ctx| async move { Ok(ctrl.bump()) }),
            )
    }
}

#[tokio::test]
async fn test_context_scope_reuses_controller() {
    let app = Application::create(ContextScopedModule, ApplicationOptions::default()).await.unwrap();

    for expected in ["1", "2", "3"] {
        let response = app.handle(get("/shared")).await;
        assert_eq!(response.body_str(), expected);
    }
}

// Request-scoped providers

struct CurrentUser(String);

impl Injectable for CurrentUser {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<HttpRequest>()]
    }

    fn construct(args: &mut Args) -> Result<Self, DiError> {
        let request = args.next::<HttpRequest>()?;
        Ok(CurrentUser(request.header("x-user").unwrap_or("anonymous").to_string()))
    }
}

struct ProfileController {
    user: Arc<CurrentUser>,
}

impl Injectable for ProfileController {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<CurrentUser>()]
    }

    fn construct(args: &mut Args) -> Result<Self, DiError> {
        Ok(Self { user: args.next()? })
    }
}

static DISPOSED: AtomicUsize = AtomicUsize::new(0);

struct ProfileModule;
impl Module for ProfileModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new()
            .provide(Scope::Request, Provider::class::<CurrentUser>())
            .controller(
                Controller::<ProfileController>::new("/profile")
                    .get("/", |ctrl, ctx| async move {
                        ctx.injector().on_dispose(|| {
                            DISPOSED.fetch_add(1, Ordering::SeqCst);
                        });
                        Ok(HttpResponse::ok().with_text(ctrl.user.0.clone()))
                    })
                    .get("/:section", |ctrl, ctx| async move {
                        let section = ctx.param("section").unwrap_or_default().to_string();
                        let verbose = ctx.query("verbose").unwrap_or("no").to_string();
                        Ok(HttpResponse::ok().with_text(format!("{}:{section}:{verbose}", ctrl.user.0)))
                    }),
            )
    }
}

#[tokio::test]
async fn test_request_providers_see_the_request() {
    let app = Application::create(ProfileModule, ApplicationOptions::default()).await.unwrap();

    let alice = app.handle(get("/profile").with_header("x-user", "alice")).await;
    let anonymous = app.handle(get("/profile")).await;
    assert_eq!(alice.body_str(), "alice");
    assert_eq!(anonymous.body_str(), "anonymous");
    assert_eq!(DISPOSED.load(Ordering::SeqCst), 2);

    let detailed = app.handle(get("/profile/settings?verbose=yes").with_header("x-user", "bob")).await;
    assert_eq!(detailed.body_str(), "bob:settings:yes");
}

// Interceptors

struct Wrap(&'static str);

#[async_trait]
impl Interceptor for Wrap {
    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<HttpResponse, Error> {
        let response = next.run(ctx).await?;
        let body = format!("{}({})", self.0, response.body_str());
        Ok(response.with_text(body))
    }
}

struct ShortCircuit;

#[async_trait]
impl Interceptor for ShortCircuit {
    async fn intercept(&self, _ctx: RequestContext, _next: Next) -> Result<HttpResponse, Error> {
        Ok(HttpResponse::new(503).with_text("maintenance"))
    }
}

struct InterceptedModule;
impl Module for InterceptedModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new()
            .provide(Scope::Application, Provider::value_of(Hits(AtomicUsize::new(0))))
            .controller(
                Controller::<CounterController>::new("/wrapped")
                    .interceptor(InterceptorItem::instance(Wrap("outer")))
                    .route_with(
                        HttpMethod::GET,
                        "/",
                        RouteOptions::new().interceptor(InterceptorItem::instance(Wrap("inner"))),
                        |_ctrl, _ctx| async move { Ok(HttpResponse::ok().with_text("body")) },
                    )
                    .route_with(
                        HttpMethod::GET,
                        "/closed",
                        RouteOptions::new().interceptor(InterceptorItem::instance(ShortCircuit)),
                        |ctrl, _ctx| async move { Ok(ctrl.bump()) },
                    ),
            )
    }
}

#[tokio::test]
async fn test_interceptors_wrap_in_declaration_order() {
    let app = Application::create(InterceptedModule, ApplicationOptions::default()).await.unwrap();

    let wrapped = app.handle(get("/wrapped")).await;
    assert_eq!(wrapped.body_str(), "outer(inner(body))");

    let closed = app.handle(get("/wrapped/closed")).await;
    assert_eq!(closed.status, 503);
    assert_eq!(closed.body_str(), "outer(maintenance)");
    assert_eq!(hits(&app), 0);
}

// Errors

struct FailingController;

impl Injectable for FailingController {
    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(FailingController)
    }
}

struct FailingModule;
impl Module for FailingModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new().controller(
            Controller::<FailingController>::new("/fail")
                .get("/server", |_ctrl, _ctx| async move {
                    Err(Error::Internal("db password is hunter2".to_string()))
                })
                .post("/client", |_ctrl, _ctx| async move { Err(Error::BadRequest("missing name".to_string())) }),
        )
    }
}

fn body_json(response: &HttpResponse) -> Value {
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn test_server_error_details_are_hidden() {
    let app = Application::create(FailingModule, ApplicationOptions::default()).await.unwrap();

    let response = app.handle(get("/fail/server")).await;
    assert_eq!(response.status, 500);
    let body = body_json(&response);
    assert_eq!(body["statusCode"], 500);
    assert_eq!(body["message"], "Internal server error");
    assert!(body["requestId"].as_str().is_some_and(|id| !id.is_empty()));

    let response = app.handle(HttpRequest::new("POST", "/fail/client")).await;
    assert_eq!(response.status, 400);
    assert_eq!(body_json(&response)["message"], "Bad Request: missing name");
}

#[tokio::test]
async fn test_server_error_details_can_be_exposed() {
    let options = ApplicationOptions::default().expose_error_details(true);
    let app = Application::create(FailingModule, options).await.unwrap();

    let response = app.handle(get("/fail/server")).await;
    let message = body_json(&response)["message"].as_str().unwrap_or_default().to_string();
    assert!(message.contains("hunter2"));
}

#[tokio::test]
async fn test_unknown_routes_and_methods() {
    let app = Application::create(FailingModule, ApplicationOptions::default()).await.unwrap();

    assert_eq!(app.handle(get("/nowhere")).await.status, 404);
    assert_eq!(app.handle(HttpRequest::new("DELETE", "/fail/server")).await.status, 405);
}
