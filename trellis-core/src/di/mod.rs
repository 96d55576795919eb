//! Hierarchical dependency injection.
//!
//! Injectors form an `Application → Module → Route → Request` chain. Each
//! level owns the providers registered for its scope and caches the instances
//! it builds; a lookup that misses locally is delegated to the parent.
//!
//! ```
//! use trellis_core::di::{Injector, Provider, Scope, Token};
//!
//! let app = Injector::root("app");
//! let base_url = Token::named("BASE_URL");
//! app.register(Provider::value(base_url.clone(), String::from("https://example.com")))
//!     .unwrap();
//!
//! let module = app.create_child(Scope::Module, "users");
//! let url = module.get_by::<String>(&base_url).unwrap();
//! assert_eq!(url.as_str(), "https://example.com");
//! ```

mod injector;
mod provider;
mod token;

pub use injector::Injector;
pub use provider::{Args, Dependency, Injectable, Instance, MultiInstance, Provider, Scope};
pub use token::Token;

pub(crate) use token::short_type_name;
