//! Module graph: declarative descriptors and their normalization.
//!
//! A module declares providers per scope, the modules it imports, the tokens
//! it exports, controllers and extensions. [`ModuleGraph::resolve`] walks the
//! imports breadth-first from the root, dereferences forward references once
//! everything directly reachable is loaded, rejects import cycles, and
//! computes for every module the providers visible inside it.
//!
//! Encapsulation: a provider that is not exported stays inside its module.
//! Appended modules are mounted under the appending module's prefix but
//! export nothing to it.

mod graph;
mod metadata;

pub use graph::{ModuleGraph, MountPoint, NormalizedModule};
pub use metadata::{
    Append, Export, Import, Module, ModuleId, ModuleMetadata, ModuleRef, ModuleWithParams,
    ResolvedCollision, ScopedProviders,
};
