// Tests for the hierarchical injector

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_core::di::{Args, Dependency, Injectable, Injector, Instance, Provider, Scope, Token};
use trellis_core::DiError;

struct Config {
    name: &'static str,
}

struct Repository {
    config: Arc<Config>,
}

impl Injectable for Repository {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Config>()]
    }

    fn construct(args: &mut Args) -> Result<Self, DiError> {
        Ok(Self { config: args.next()? })
    }
}

struct Chicken;
struct Egg;

impl Injectable for Chicken {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Egg>()]
    }

    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(Chicken)
    }
}

impl Injectable for Egg {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Chicken>()]
    }

    fn construct(_args: &mut Args) -> Result<Self, DiError> {
        Ok(Egg)
    }
}

fn hierarchy() -> (Injector, Injector, Injector, Injector) {
    let app = Injector::root("app");
    let module = app.create_child(Scope::Module, "users");
    let route = module.create_child(Scope::Route, "GET /users");
    let request = route.create_child(Scope::Request, "req-1");
    (app, module, route, request)
}

#[test]
fn test_nearest_ancestor_wins() {
    let (app, module, _route, request) = hierarchy();
    app.register(Provider::value_of(Config { name: "app" })).unwrap();
    module.register(Provider::value_of(Config { name: "module" })).unwrap();

    assert_eq!(request.get::<Config>().unwrap().name, "module");
    assert_eq!(app.get::<Config>().unwrap().name, "app");
}

#[test]
fn test_resolution_is_idempotent_per_owner() {
    let (app, module, route, request) = hierarchy();
    app.register(Provider::value_of(Config { name: "app" })).unwrap();
    module.register(Provider::class::<Repository>()).unwrap();

    let from_request = request.get::<Repository>().unwrap();
    let from_route = route.get::<Repository>().unwrap();
    let from_module = module.get::<Repository>().unwrap();
    assert!(Arc::ptr_eq(&from_request, &from_route));
    assert!(Arc::ptr_eq(&from_route, &from_module));
    assert_eq!(from_module.config.name, "app");
}

#[test]
fn test_missing_provider_reports_searched_injectors() {
    let (_app, _module, _route, request) = hierarchy();
    let err = request.get::<Config>().err().unwrap();

    match err {
        DiError::NoProviderFound { token, path } => {
            assert_eq!(token, "Config");
            let searched = path.last().unwrap();
            assert!(searched.starts_with("searched"));
            assert!(searched.contains("request[req-1]"));
            assert!(searched.contains("application[app]"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_dependency_names_requesting_provider() {
    let app = Injector::root("app");
    app.register(Provider::class::<Repository>()).unwrap();

    let err = app.get::<Repository>().err().unwrap();
    let message = err.to_string();
    assert!(message.contains("No provider for Config"));
    assert!(message.contains("Repository -> Config"));
}

#[test]
fn test_cycle_is_detected() {
    let app = Injector::root("app");
    app.register(Provider::class::<Chicken>()).unwrap();
    app.register(Provider::class::<Egg>()).unwrap();

    let err = app.get::<Chicken>().err().unwrap();
    assert_eq!(
        err,
        DiError::CyclicDependency {
            chain: vec!["Chicken".into(), "Egg".into(), "Chicken".into()]
        }
    );
}

#[test]
fn test_named_tokens_are_distinct_identities() {
    let app = Injector::root("app");
    let first = Token::named("URL");
    let second = Token::named("URL");
    app.register(Provider::value(first.clone(), "a".to_string())).unwrap();

    assert_eq!(app.get_by::<String>(&first).unwrap().as_str(), "a");
    assert!(app.get_by::<String>(&second).is_err());
}

#[test]
fn test_multi_providers_collect_in_order() {
    let app = Injector::root("app");
    let plugins = Token::named("PLUGINS");
    app.register(Provider::value(plugins.clone(), "auth").multi()).unwrap();
    app.register(Provider::value(plugins.clone(), "cache").multi()).unwrap();

    let all = app.get_all::<&'static str>(&plugins).unwrap();
    let names: Vec<&str> = all.iter().map(|p| **p).collect();
    assert_eq!(names, vec!["auth", "cache"]);
}

#[test]
fn test_alias_resolves_target() {
    let app = Injector::root("app");
    let legacy = Token::named("LEGACY_CONFIG");
    app.register(Provider::value_of(Config { name: "current" })).unwrap();
    app.register(Provider::alias(legacy.clone(), Token::of::<Config>())).unwrap();

    let via_alias = app.get_by::<Config>(&legacy).unwrap();
    let direct = app.get::<Config>().unwrap();
    assert!(Arc::ptr_eq(&via_alias, &direct));
}

#[test]
fn test_optional_and_skip_self_dependencies() {
    let app = Injector::root("app");
    app.register(Provider::value_of(Config { name: "parent" })).unwrap();
    let module = app.create_child(Scope::Module, "m");
    module.register(Provider::value_of(Config { name: "local" })).unwrap();

    let token = Token::named("DESCRIPTION");
    module
        .register(Provider::factory(
            token.clone(),
            vec![
                Dependency::of::<Config>().skip_self(),
                Dependency::of::<Repository>().optional(),
            ],
            |args| {
                let config = args.next::<Config>()?;
                let repository = args.next_optional::<Repository>()?;
                Ok(Arc::new(format!("{}:{}", config.name, repository.is_some())) as Instance)
            },
        ))
        .unwrap();

    assert_eq!(module.get_by::<String>(&token).unwrap().as_str(), "parent:false");
}

#[test]
fn test_resolve_in_targets_scope() {
    let (app, module, _route, request) = hierarchy();
    app.register(Provider::value_of(Config { name: "app" })).unwrap();
    module.register(Provider::value_of(Config { name: "module" })).unwrap();

    let value = request.resolve_in(Scope::Application, &Token::of::<Config>()).unwrap();
    assert_eq!(value.downcast::<Config>().ok().unwrap().name, "app");

    let lonely = Injector::root("other");
    let err = lonely.resolve_in(Scope::Request, &Token::of::<Config>()).err().unwrap();
    assert!(matches!(err, DiError::ScopeUnavailable { .. }));
}

#[test]
fn test_dispose_runs_hooks_in_reverse() {
    let request = Injector::root("app").create_child(Scope::Request, "req");
    let order = Arc::new(Mutex::new(Vec::new()));

    for label in ["first", "second"] {
        let order = order.clone();
        request.on_dispose(move || order.lock().push(label));
    }
    request.dispose();
    assert_eq!(*order.lock(), vec!["second", "first"]);
}

#[test]
fn test_concurrent_resolution_yields_one_instance() {
    let app = Injector::root("app");
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    app.register(Provider::factory(Token::of::<Config>(), vec![], move |_args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Config { name: "shared" }) as Instance)
    }))
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            std::thread::spawn(move || app.get::<Config>().unwrap())
        })
        .collect();
    let instances: Vec<Arc<Config>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert!(built.load(Ordering::SeqCst) >= 1);
}
