// Module graph resolution: loading, cycle checks, exports and collisions

use super::metadata::{Export, Import, ModuleId, ModuleMetadata, ModuleRef, ModuleWithParams, ScopedProviders};
use crate::di::{Provider, Scope, Token};
use crate::error::ModuleError;
use crate::extension::ExtensionRegistration;
use crate::pipeline::{ControllerDescriptor, GuardItem};
use crate::router::join_paths;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// Forward references that keep yielding forward references are cut off here.
const MAX_FORWARD_DEPTH: usize = 32;

const SHARED_SCOPES: [Scope; 3] = [Scope::Module, Scope::Route, Scope::Request];

/// A place where a module's controllers are mounted.
#[derive(Clone)]
pub struct MountPoint {
    pub prefix: String,
    pub guards: Vec<GuardItem>,
}

/// A module after normalization.
///
/// `providers` holds everything visible inside the module per scope: the
/// providers exported by its imports followed by its own. Application-scope
/// providers are collected once for the whole graph, see
/// [`ModuleGraph::app_providers`].
#[derive(Clone)]
pub struct NormalizedModule {
    pub id: ModuleId,
    pub name: String,
    pub providers: ScopedProviders,
    pub imports: Vec<ModuleId>,
    pub appends: Vec<ModuleId>,
    pub controllers: Vec<ControllerDescriptor>,
    pub extensions: Vec<ExtensionRegistration>,
    pub mounts: Vec<MountPoint>,
}

/// The flattened, cycle-checked module graph.
pub struct ModuleGraph {
    modules: Vec<NormalizedModule>,
    index: HashMap<ModuleId, usize>,
    app_providers: Vec<Provider>,
}

impl ModuleGraph {
    /// Resolve the graph reachable from `root`.
    pub fn resolve(root: ModuleRef) -> Result<Self, ModuleError> {
        let mut loader = Loader::default();
        loader.load_root(&root);
        loader.run()?;
        let raw = loader.modules;
        debug!(modules = raw.len(), "Module graph loaded");

        check_cycles(&raw)?;

        let mut exporter = Exporter::new(&raw);
        let app_providers = collect_app_providers(&raw)?;

        let mut mounts = vec![Vec::new(); raw.len()];
        mount(&raw, 0, "/".to_string(), Vec::new(), &mut Vec::new(), &mut mounts)?;

        let mut modules = Vec::with_capacity(raw.len());
        for (idx, module) in raw.iter().enumerate() {
            exporter.exports_of(idx)?;
            let providers = exporter.visible_providers(idx)?;
            validate_scopes(module, &app_providers, &providers)?;
            let extensions = exporter.extensions_for(idx);
            trace!(
                module = %module.name,
                providers = providers.len(),
                extensions = extensions.len(),
                "Module normalized"
            );
            modules.push(NormalizedModule {
                id: module.id,
                name: module.name.clone(),
                providers,
                imports: module.imports.iter().flatten().map(|e| raw[e.target].id).collect(),
                appends: module.appends.iter().map(|(target, _)| raw[*target].id).collect(),
                controllers: module.meta.controllers.clone(),
                extensions,
                mounts: std::mem::take(&mut mounts[idx]),
            });
        }

        let index = modules.iter().enumerate().map(|(i, m)| (m.id, i)).collect();
        Ok(Self {
            modules,
            index,
            app_providers,
        })
    }

    /// Modules in traversal order, the root first.
    pub fn modules(&self) -> &[NormalizedModule] {
        &self.modules
    }

    pub fn root(&self) -> &NormalizedModule {
        &self.modules[0]
    }

    pub fn get(&self, id: ModuleId) -> Option<&NormalizedModule> {
        self.index.get(&id).map(|&i| &self.modules[i])
    }

    /// Application-scope providers contributed by every module.
    pub fn app_providers(&self) -> &[Provider] {
        &self.app_providers
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[derive(Clone)]
struct Edge {
    target: usize,
    forward: bool,
    mount: Option<(String, Vec<GuardItem>)>,
}

struct RawModule {
    id: ModuleId,
    /// The plain module type behind a parameterized import.
    type_id: ModuleId,
    name: String,
    meta: ModuleMetadata,
    imports: Vec<Option<Edge>>,
    appends: Vec<(usize, String)>,
}

impl RawModule {
    fn matches(&self, id: ModuleId) -> bool {
        self.id == id || self.type_id == id
    }

    /// Edges that must not form a cycle.
    fn strict_edges(&self) -> impl Iterator<Item = usize> + '_ {
        self.imports
            .iter()
            .flatten()
            .filter(|edge| !edge.forward)
            .map(|edge| edge.target)
            .chain(self.appends.iter().map(|(target, _)| *target))
    }
}

enum Target {
    Module(ModuleRef),
    Params(Arc<ModuleWithParams>),
}

#[derive(Default)]
struct Loader {
    modules: Vec<RawModule>,
    index: HashMap<ModuleId, usize>,
    metadata: HashMap<ModuleId, ModuleMetadata>,
    queue: VecDeque<usize>,
    forwards: Vec<(usize, usize, Import)>,
}

impl Loader {
    fn load_root(&mut self, root: &ModuleRef) {
        self.load(Target::Module(root.clone()));
    }

    /// Breadth-first expansion; forward references are dereferenced once the
    /// queue drains and may enqueue more modules.
    fn run(&mut self) -> Result<(), ModuleError> {
        loop {
            while let Some(idx) = self.queue.pop_front() {
                self.expand(idx)?;
            }
            if self.forwards.is_empty() {
                return Ok(());
            }
            for (idx, slot, import) in std::mem::take(&mut self.forwards) {
                let target = dereference(&import, &self.modules[idx].name)?;
                let mut edge = self.edge_to(target);
                edge.forward = true;
                trace!(
                    module = %self.modules[idx].name,
                    target = %self.modules[edge.target].name,
                    "Forward reference resolved"
                );
                self.modules[idx].imports[slot] = Some(edge);
            }
        }
    }

    fn expand(&mut self, idx: usize) -> Result<(), ModuleError> {
        let imports = self.modules[idx].meta.imports.clone();
        for (slot, import) in imports.into_iter().enumerate() {
            if matches!(import, Import::Forward(_)) {
                self.forwards.push((idx, slot, import));
                continue;
            }
            let target = dereference(&import, &self.modules[idx].name)?;
            let edge = self.edge_to(target);
            self.modules[idx].imports[slot] = Some(edge);
        }

        let appends = self.modules[idx].meta.appends.clone();
        for append in appends {
            let target = self.load(Target::Module(append.module));
            self.modules[idx].appends.push((target, append.path));
        }
        Ok(())
    }

    fn edge_to(&mut self, target: Target) -> Edge {
        let mount = match &target {
            Target::Params(params) => params
                .path
                .as_ref()
                .map(|path| (path.clone(), params.guards.clone())),
            Target::Module(_) => None,
        };
        Edge {
            target: self.load(target),
            forward: false,
            mount,
        }
    }

    fn load(&mut self, target: Target) -> usize {
        let (id, type_id, module, extra) = match &target {
            Target::Module(module) => (module.module_id(), module.module_id(), module, None),
            Target::Params(params) => (
                ModuleId::Params(Arc::as_ptr(params) as usize),
                params.module.module_id(),
                &params.module,
                Some(&params.providers),
            ),
        };
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }

        let mut meta = self
            .metadata
            .entry(type_id)
            .or_insert_with(|| module.metadata())
            .clone();
        if let Some(extra) = extra {
            meta.providers.extend(extra);
        }

        let idx = self.modules.len();
        debug!(module = %module.name(), "Loading module");
        self.modules.push(RawModule {
            id,
            type_id,
            name: module.name(),
            imports: vec![None; meta.imports.len()],
            appends: Vec::new(),
            meta,
        });
        self.index.insert(id, idx);
        self.queue.push_back(idx);
        idx
    }
}

fn dereference(import: &Import, owner: &str) -> Result<Target, ModuleError> {
    let mut current = import.clone();
    for _ in 0..MAX_FORWARD_DEPTH {
        match current {
            Import::Module(module) => return Ok(Target::Module(module)),
            Import::WithParams(params) => return Ok(Target::Params(params)),
            Import::Forward(resolve) => current = resolve(),
        }
    }
    Err(ModuleError::CircularModuleImport {
        chain: vec![owner.to_string(), "forward reference never yields a module".to_string()],
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

fn check_cycles(modules: &[RawModule]) -> Result<(), ModuleError> {
    let mut marks = vec![Mark::Unvisited; modules.len()];
    let mut stack = Vec::new();
    for start in 0..modules.len() {
        if marks[start] == Mark::Unvisited {
            visit(modules, start, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}

fn visit(
    modules: &[RawModule],
    idx: usize,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Result<(), ModuleError> {
    marks[idx] = Mark::Visiting;
    stack.push(idx);
    for target in modules[idx].strict_edges() {
        match marks[target] {
            Mark::Visiting => return Err(cycle_error(modules, stack, target)),
            Mark::Unvisited => visit(modules, target, marks, stack)?,
            Mark::Done => {}
        }
    }
    stack.pop();
    marks[idx] = Mark::Done;
    Ok(())
}

fn cycle_error(modules: &[RawModule], stack: &[usize], repeated: usize) -> ModuleError {
    let start = stack.iter().position(|&i| i == repeated).unwrap_or(0);
    let mut chain: Vec<String> = stack[start..].iter().map(|&i| modules[i].name.clone()).collect();
    chain.push(modules[repeated].name.clone());
    ModuleError::CircularModuleImport { chain }
}

/// Mount the root at `/`, then every import carrying a path and every
/// append, accumulating prefixes and guards.
fn mount(
    modules: &[RawModule],
    idx: usize,
    prefix: String,
    guards: Vec<GuardItem>,
    stack: &mut Vec<usize>,
    out: &mut [Vec<MountPoint>],
) -> Result<(), ModuleError> {
    if stack.contains(&idx) {
        return Err(cycle_error(modules, stack, idx));
    }
    stack.push(idx);
    out[idx].push(MountPoint {
        prefix: prefix.clone(),
        guards: guards.clone(),
    });

    for edge in modules[idx].imports.iter().flatten() {
        if let Some((path, extra)) = &edge.mount {
            let mut nested = guards.clone();
            nested.extend(extra.iter().cloned());
            mount(modules, edge.target, join_paths(&prefix, path), nested, stack, out)?;
        }
    }
    for (target, path) in &modules[idx].appends {
        mount(modules, *target, join_paths(&prefix, path), guards.clone(), stack, out)?;
    }

    stack.pop();
    Ok(())
}

#[derive(Clone)]
struct ExportEntry {
    scope: Scope,
    provider: Provider,
}

/// Providers a module declares for `token` in the shareable scopes. Single
/// providers override each other, so only the last one counts.
fn local_entries(providers: &ScopedProviders, token: &Token) -> Vec<ExportEntry> {
    let mut entries = Vec::new();
    for scope in SHARED_SCOPES {
        let matching = providers.get(scope).iter().filter(|p| p.token() == token);
        let chosen: Vec<&Provider> = match matching.clone().last() {
            Some(last) if !last.is_multi() => vec![last],
            _ => matching.collect(),
        };
        entries.extend(chosen.into_iter().map(|provider| ExportEntry {
            scope,
            provider: provider.clone(),
        }));
    }
    entries
}

fn push_unique(entries: &mut Vec<ExportEntry>, entry: ExportEntry) {
    if !entries.iter().any(|e| e.provider.same_as(&entry.provider)) {
        entries.push(entry);
    }
}

struct Exporter<'a> {
    modules: &'a [RawModule],
    exports: HashMap<usize, Vec<ExportEntry>>,
    /// Modules whose exports are being computed, outermost first.
    in_progress: Vec<usize>,
}

/// Export entries plus the shallowest in-progress module they depend on.
/// `COMPLETE` means they depend on none and are final.
type Partial = (Vec<ExportEntry>, usize);

const COMPLETE: usize = usize::MAX;

impl<'a> Exporter<'a> {
    fn new(modules: &'a [RawModule]) -> Self {
        Self {
            modules,
            exports: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// What `idx` makes visible to the modules importing it.
    fn exports_of(&mut self, idx: usize) -> Result<Vec<ExportEntry>, ModuleError> {
        Ok(self.collect(idx)?.0)
    }

    /// A module that is already being computed higher up contributes nothing
    /// yet, which lets forward-referenced imports terminate. Results that
    /// relied on such a module are not cached; they are recomputed once the
    /// outer module is final.
    fn collect(&mut self, idx: usize) -> Result<Partial, ModuleError> {
        if let Some(done) = self.exports.get(&idx) {
            return Ok((done.clone(), COMPLETE));
        }
        if let Some(depth) = self.in_progress.iter().position(|&m| m == idx) {
            return Ok((Vec::new(), depth));
        }

        let depth = self.in_progress.len();
        self.in_progress.push(idx);
        let computed = self.compute(idx, depth);
        self.in_progress.pop();

        let (entries, low) = computed?;
        if low >= depth {
            self.exports.insert(idx, entries.clone());
            return Ok((entries, COMPLETE));
        }
        Ok((entries, low))
    }

    fn compute(&mut self, idx: usize, depth: usize) -> Result<Partial, ModuleError> {
        let modules = self.modules;
        let module = &modules[idx];
        let mut entries = Vec::new();
        let mut low = COMPLETE;
        for export in &module.meta.exports {
            match export {
                Export::Token(token) => {
                    let local = local_entries(&module.meta.providers, token);
                    if !local.is_empty() {
                        local.into_iter().for_each(|e| push_unique(&mut entries, e));
                        continue;
                    }
                    let global = module.meta.providers.get(Scope::Application);
                    if global.iter().any(|p| p.token() == token) {
                        continue;
                    }
                    let mut found = false;
                    for edge in module.imports.iter().flatten() {
                        let (imported, imported_low) = self.collect(edge.target)?;
                        low = low.min(imported_low);
                        for entry in imported {
                            if entry.provider.token() == token {
                                found = true;
                                push_unique(&mut entries, entry);
                            }
                        }
                    }
                    // A partial view may still be missing the token.
                    if !found && low >= depth {
                        return Err(ModuleError::InvalidExport {
                            module: module.name.clone(),
                            token: token.name().to_string(),
                        });
                    }
                }
                Export::Module(id) => {
                    let targets: Vec<usize> = module
                        .imports
                        .iter()
                        .flatten()
                        .filter(|edge| modules[edge.target].matches(*id))
                        .map(|edge| edge.target)
                        .collect();
                    if targets.is_empty() {
                        return Err(ModuleError::ReexportNotImported {
                            module: module.name.clone(),
                            exported: module_name(modules, *id),
                        });
                    }
                    for target in targets {
                        let (imported, imported_low) = self.collect(target)?;
                        low = low.min(imported_low);
                        for entry in imported {
                            push_unique(&mut entries, entry);
                        }
                    }
                }
            }
        }
        Ok((entries, low))
    }

    /// Imported providers merged with the module's own, per shareable scope.
    fn visible_providers(&mut self, idx: usize) -> Result<ScopedProviders, ModuleError> {
        let modules = self.modules;
        let module = &modules[idx];

        let mut contributions: Vec<(usize, ExportEntry)> = Vec::new();
        for edge in module.imports.iter().flatten() {
            for entry in self.exports_of(edge.target)? {
                contributions.push((edge.target, entry));
            }
        }

        let mut providers = ScopedProviders::default();
        for scope in SHARED_SCOPES {
            let local = module.meta.providers.get(scope);
            let mut order: Vec<Token> = Vec::new();
            let mut groups: HashMap<Token, Vec<(usize, Provider)>> = HashMap::new();
            for (via, entry) in contributions.iter().filter(|(_, e)| e.scope == scope) {
                let token = entry.provider.token();
                let group = groups.entry(token.clone()).or_insert_with(|| {
                    order.push(token.clone());
                    Vec::new()
                });
                if !group.iter().any(|(_, p)| p.same_as(&entry.provider)) {
                    group.push((*via, entry.provider.clone()));
                }
            }

            let mut resolved = Vec::new();
            for token in order {
                let group = groups.remove(&token).unwrap_or_default();
                if group.len() == 1 || group.iter().all(|(_, p)| p.is_multi()) {
                    resolved.extend(group.into_iter().map(|(_, p)| p));
                } else if !local.iter().any(|p| p.token() == &token) {
                    resolved.push(pick_winner(modules, module, scope, &token, group)?);
                }
            }
            resolved.extend(local.iter().cloned());
            providers.set(scope, resolved);
        }
        Ok(providers)
    }

    /// Own extensions plus the exported extensions of every import.
    fn extensions_for(&self, idx: usize) -> Vec<ExtensionRegistration> {
        let module = &self.modules[idx];
        let mut extensions = module.meta.extensions.clone();
        let mut seen = HashSet::new();
        for edge in module.imports.iter().flatten() {
            self.exported_extensions(edge.target, &mut seen, &mut extensions);
        }
        extensions
    }

    fn exported_extensions(
        &self,
        idx: usize,
        seen: &mut HashSet<usize>,
        out: &mut Vec<ExtensionRegistration>,
    ) {
        if !seen.insert(idx) {
            return;
        }
        let module = &self.modules[idx];
        for extension in module.meta.extensions.iter().filter(|e| e.is_exported()) {
            if !out.iter().any(|e| e.same_as(extension)) {
                out.push(extension.clone());
            }
        }
        for export in &module.meta.exports {
            if let Export::Module(id) = export {
                for edge in module.imports.iter().flatten() {
                    if self.modules[edge.target].matches(*id) {
                        self.exported_extensions(edge.target, seen, out);
                    }
                }
            }
        }
    }
}

fn module_name(modules: &[RawModule], id: ModuleId) -> String {
    modules
        .iter()
        .find(|m| m.matches(id))
        .map(|m| m.name.clone())
        .unwrap_or_else(|| format!("{id:?}"))
}

fn pick_winner(
    modules: &[RawModule],
    module: &RawModule,
    scope: Scope,
    token: &Token,
    group: Vec<(usize, Provider)>,
) -> Result<Provider, ModuleError> {
    let resolution = module
        .meta
        .resolved_collisions
        .iter()
        .find(|r| r.scope == scope && &r.token == token);

    match resolution {
        Some(resolution) => group
            .into_iter()
            .find(|(via, _)| modules[*via].matches(resolution.winner))
            .map(|(_, provider)| provider)
            .ok_or_else(|| ModuleError::InvalidCollisionResolution {
                module: module.name.clone(),
                token: token.name().to_string(),
                winner: module_name(modules, resolution.winner),
            }),
        None => {
            let mut contributors: Vec<String> = Vec::new();
            for (via, _) in &group {
                if !contributors.contains(&modules[*via].name) {
                    contributors.push(modules[*via].name.clone());
                }
            }
            Err(ModuleError::ModuleImportCollision {
                module: module.name.clone(),
                token: token.name().to_string(),
                scope,
                contributors,
            })
        }
    }
}

/// Application-scope providers of every module in traversal order. Distinct
/// modules providing the same single token collide unless the root module
/// provides it itself or some module names a winner.
fn collect_app_providers(modules: &[RawModule]) -> Result<Vec<Provider>, ModuleError> {
    let mut order: Vec<Token> = Vec::new();
    let mut groups: HashMap<Token, Vec<(usize, Provider)>> = HashMap::new();
    for (idx, module) in modules.iter().enumerate() {
        for provider in module.meta.providers.get(Scope::Application) {
            let token = provider.token();
            let group = groups.entry(token.clone()).or_insert_with(|| {
                order.push(token.clone());
                Vec::new()
            });
            if !group.iter().any(|(_, p)| p.same_as(provider)) {
                group.push((idx, provider.clone()));
            }
        }
    }

    let mut providers = Vec::new();
    for token in order {
        let group = groups.remove(&token).unwrap_or_default();
        let single_source = group.iter().all(|(idx, _)| *idx == group[0].0);
        if single_source || group.iter().all(|(_, p)| p.is_multi()) {
            providers.extend(group.into_iter().map(|(_, p)| p));
            continue;
        }
        if let Some((_, provider)) = group.iter().rev().find(|(idx, _)| *idx == 0) {
            providers.push(provider.clone());
            continue;
        }
        let resolver = modules.iter().find(|m| {
            m.meta
                .resolved_collisions
                .iter()
                .any(|r| r.scope == Scope::Application && r.token == token)
        });
        let owner = resolver.unwrap_or(&modules[0]);
        providers.push(pick_winner(modules, owner, Scope::Application, &token, group)?);
    }
    Ok(providers)
}

/// Reject providers that depend on tokens only provided in a narrower scope.
fn validate_scopes(
    module: &RawModule,
    app: &[Provider],
    visible: &ScopedProviders,
) -> Result<(), ModuleError> {
    let provided_at = |token: &Token, scope: Scope| match scope {
        Scope::Application => app.iter().any(|p| p.token() == token),
        _ => visible.get(scope).iter().any(|p| p.token() == token),
    };

    let check = |scope: Scope, provider: &Provider| -> Result<(), ModuleError> {
        for dep in provider.dependencies().iter().filter(|d| !d.optional) {
            let reachable = Scope::ALL
                .into_iter()
                .filter(|s| *s <= scope)
                .any(|s| provided_at(&dep.token, s));
            if reachable {
                continue;
            }
            let narrower = Scope::ALL
                .into_iter()
                .filter(|s| *s > scope)
                .find(|s| provided_at(&dep.token, *s));
            if let Some(dependency_scope) = narrower {
                return Err(ModuleError::ScopeViolation {
                    module: module.name.clone(),
                    token: provider.token().name().to_string(),
                    scope,
                    dependency: dep.token.name().to_string(),
                    dependency_scope,
                });
            }
        }
        Ok(())
    };

    for scope in SHARED_SCOPES {
        for provider in visible.get(scope) {
            check(scope, provider)?;
        }
    }
    for provider in module.meta.providers.get(Scope::Application) {
        check(Scope::Application, provider)?;
    }
    Ok(())
}
