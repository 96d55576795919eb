//! Integration tests for common Trellis workflows.
//!
//! These drive a whole application: options loading, bootstrap, and
//! requests over a real socket.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use trellis::prelude::*;
use trellis::DiError;

struct Greeting(String);

struct GreetController {
    greeting: Arc<Greeting>,
}

impl Injectable for GreetController {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Greeting>()]
    }

    fn construct(args: &mut Args) -> Result<Self, DiError> {
        Ok(Self { greeting: args.next()? })
    }
}

struct GreetModule;
impl Module for GreetModule {
    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata::new()
            .provide(Scope::Module, Provider::value_of(Greeting("hello".to_string())))
            .controller(
                Controller::<GreetController>::new("/greet").get("/:name", |ctrl, ctx| async move {
                    let name = ctx.param("name").unwrap_or("nobody").to_string();
                    Ok(HttpResponse::ok().with_text(format!("{} {}", ctrl.greeting.0, name)))
                }),
            )
    }
}

async fn send(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_serve_answers_over_tcp() {
    let app = tokio_test::assert_ok!(Application::create(GreetModule, ApplicationOptions::default()).await);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(app.serve(listener, async {
        let _ = stopped.await;
    }));

    let ok = send(addr, "/greet/world").await;
    assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
    assert!(ok.ends_with("hello world"), "{ok}");

    let missing = send(addr, "/nowhere").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    stop.send(()).unwrap();
    tokio_test::assert_ok!(server.await.unwrap());
}

#[tokio::test]
async fn test_path_prefix_from_toml_options() {
    let options = tokio_test::assert_ok!(ApplicationOptions::from_toml_str(
        r#"
        path_prefix = "/api"
        expose_error_details = true
        "#
    ));
    let app = Application::create(GreetModule, options).await.unwrap();

    let response = app.handle(HttpRequest::new("GET", "/api/greet/ada")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_str(), "hello ada");

    let unprefixed = app.handle(HttpRequest::new("GET", "/greet/ada")).await;
    assert_eq!(unprefixed.status, 404);
}

#[test]
fn test_options_from_file_and_variables() {
    let dir = std::env::temp_dir().join(format!("trellis-options-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("app.json");
    std::fs::write(&path, r#"{ "host": "0.0.0.0", "port": 8081 }"#).unwrap();

    let options = ApplicationOptions::from_file(&path)
        .unwrap()
        .apply_vars(|key| match key {
            "TRELLIS_PORT" => Some("9090".to_string()),
            "TRELLIS_PATH_PREFIX" => Some("/v1".to_string()),
            _ => None,
        })
        .unwrap();

    assert_eq!(options.socket_addr(), "0.0.0.0:9090");
    assert_eq!(options.path_prefix, "/v1");

    let bad = ApplicationOptions::default().apply_vars(|key| {
        (key == "TRELLIS_PORT").then(|| "not-a-port".to_string())
    });
    assert!(matches!(bad, Err(Error::Config(_))));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_log_section_installs_subscriber() {
    let dir = std::env::temp_dir().join(format!("trellis-logs-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("trellis.log");

    let options = ApplicationOptions::from_toml_str(&format!(
        r#"
        [log]
        level = "debug"
        format = "json"
        filter = "trellis_core=debug"
        file = {:?}
        "#,
        file.display().to_string()
    ))
    .unwrap();

    let guard = tokio_test::assert_ok!(options.init_logging());
    let app = Application::create(GreetModule, options.clone()).await.unwrap();
    app.close();
    drop(guard);

    let written = std::fs::read_to_string(&file).unwrap();
    assert!(written.contains("Module initialized"), "{written}");
    assert!(written.contains("\"level\":\"DEBUG\""), "{written}");

    let again = options.init_logging();
    assert!(matches!(again, Err(Error::Config(_))));

    std::fs::remove_dir_all(&dir).unwrap();
}
