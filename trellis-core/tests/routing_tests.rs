// Tests for route registration at bootstrap

use trellis_core::di::{Args, Injectable};
use trellis_core::extension::{routes_group, ModuleRoutes};
use trellis_core::http::{HttpMethod, HttpResponse};
use trellis_core::module::{Module, ModuleMetadata, ModuleWithParams};
use trellis_core::pipeline::Controller;
use trellis_core::{Application, ApplicationOptions, DiError, Error, ExtensionError, HttpRequest, RouteError};

struct PingController;

impl Injectable for PingController {
    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(PingController)
    }
}

fn ping(path: &str) -> Controller<PingController> {
    Controller::<PingController>::new(path).get("/", |_ctrl, ctx| async move {
        Ok(HttpResponse::ok().with_text(ctx.route().to_string()))
    })
}

struct DuplicateModule;
impl Module for DuplicateModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new().controller(ping("/ping")).controller(ping("/ping/"))
    }
}

#[tokio::test]
async fn test_duplicate_routes_fail_bootstrap() {
    let err = tokio_test::assert_err!(Application::create(DuplicateModule, ApplicationOptions::default()).await);
    match err {
        Error::Extension(ExtensionError::ExtensionFailed { extension, source, .. }) => {
            assert_eq!(extension, "PreRouterExtension");
            assert!(matches!(*source, Error::Route(RouteError::DuplicateHandle { .. })));
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct ChildModule;
impl Module for ChildModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new().controller(ping("/ping"))
    }
}

struct TwiceMounted;
impl Module for TwiceMounted {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new()
            .controller(ping("/ping"))
            .import_with(ModuleWithParams::new(ChildModule).path("v1"))
            .import_with(ModuleWithParams::new(ChildModule).path("v2"))
            .append("legacy", ChildModule)
    }
}

#[tokio::test]
async fn test_every_mount_gets_its_routes() {
    let app = tokio_test::assert_ok!(Application::create(TwiceMounted, ApplicationOptions::default()).await);

    for pattern in ["/ping", "/v1/ping", "/v2/ping", "/legacy/ping"] {
        let found = app.router().find(HttpMethod::GET, pattern).unwrap();
        assert_eq!(found.pattern, pattern);
    }
    assert_eq!(app.router().len(), 4);

    let response = app.handle(HttpRequest::new("GET", "/v2/ping")).await;
    assert_eq!(response.body_str(), "/v2/ping");
}

#[tokio::test]
async fn test_route_records_are_published_per_module() {
    let app = Application::create(TwiceMounted, ApplicationOptions::default()).await.unwrap();
    let results = app.extensions().request_stage(&routes_group()).await.unwrap();

    let mut paths: Vec<String> = results
        .iter()
        .flat_map(|r| r.downcast::<ModuleRoutes>().collect::<Vec<_>>())
        .flat_map(|routes| routes.0.iter().map(|meta| meta.path.clone()).collect::<Vec<_>>())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/legacy/ping", "/ping", "/v1/ping", "/v2/ping"]);
}
