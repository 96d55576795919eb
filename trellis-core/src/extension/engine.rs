// Staged, memoized execution of extension groups

use crate::di::{short_type_name, Injectable, Injector, Instance, Provider, Token};
use crate::error::{Error, ExtensionError};
use crate::logging::LogMediatorRef;
use crate::module::{ModuleGraph, ModuleId, NormalizedModule};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Value produced by one extension for one module.
pub type StageValue = Arc<dyn Any + Send + Sync>;

/// A staged initialization unit.
///
/// `init` runs once per module carrying the extension's group.
/// `is_last_module` is true only for the last such module in traversal
/// order; extensions needing every module's contribution do their real work
/// there, usually by calling [`ExtensionContext::stage_per_app`]. Calls for
/// other modules may return module-local values but should not publish
/// global state.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    async fn init(&self, ctx: &ExtensionContext, is_last_module: bool) -> Result<StageValue, Error>;
}

pub(crate) struct ExtensionInstance(pub(crate) Arc<dyn Extension>);

struct ExtensionSlot<E>(PhantomData<E>);

/// Declares an extension under a group token.
#[derive(Clone)]
pub struct ExtensionRegistration {
    group: Token,
    provider: Provider,
    name: String,
    exported: bool,
    before: Option<Token>,
}

impl ExtensionRegistration {
    /// An extension built by the module injector, once per module.
    pub fn new<E: Extension + Injectable>(group: Token) -> Self {
        let provider = Provider::factory(Token::of::<ExtensionSlot<E>>(), E::dependencies(), |args| {
            let extension = E::construct(args)?;
            Ok(Arc::new(ExtensionInstance(Arc::new(extension))) as Instance)
        });
        Self {
            group,
            provider,
            name: short_type_name(std::any::type_name::<E>()),
            exported: false,
            before: None,
        }
    }

    /// An already built extension shared by every module it is added to.
    pub fn instance<E: Extension>(group: Token, extension: E) -> Self {
        let name = short_type_name(std::any::type_name::<E>());
        let provider = Provider::value(
            Token::named(format!("extension {name}")),
            ExtensionInstance(Arc::new(extension)),
        );
        Self {
            group,
            provider,
            name,
            exported: false,
            before: None,
        }
    }

    /// Also run this extension in every module importing the declaring one.
    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }

    /// Hold back `group` in a module until this extension's group is done
    /// there.
    pub fn before(mut self, group: Token) -> Self {
        self.before = Some(group);
        self
    }

    pub fn group(&self) -> &Token {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    pub fn before_group(&self) -> Option<&Token> {
        self.before.as_ref()
    }

    pub fn token(&self) -> &Token {
        self.provider.token()
    }

    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Same extension under the same group.
    pub fn same_as(&self, other: &ExtensionRegistration) -> bool {
        self.group == other.group && self.token() == other.token()
    }
}

impl std::fmt::Debug for ExtensionRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistration")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("exported", &self.exported)
            .field("before", &self.before)
            .finish()
    }
}

/// One extension's contribution to a group result.
pub struct ExtensionValue {
    pub extension: String,
    pub value: StageValue,
}

/// Everything one group produced in one module.
pub struct GroupResult {
    group: Token,
    module: ModuleId,
    module_name: String,
    values: Vec<ExtensionValue>,
}

impl GroupResult {
    pub fn group(&self) -> &Token {
        &self.group
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn values(&self) -> &[ExtensionValue] {
        &self.values
    }

    /// Values of type `T`, in extension order.
    pub fn downcast<T: Any + Send + Sync>(&self) -> impl Iterator<Item = Arc<T>> + '_ {
        self.values
            .iter()
            .filter_map(|v| v.value.clone().downcast::<T>().ok())
    }

    pub fn first<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.downcast::<T>().next()
    }
}

impl std::fmt::Debug for GroupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupResult")
            .field("group", &self.group)
            .field("module", &self.module_name)
            .field("values", &self.values.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CellKey {
    group: Token,
    module: usize,
}

#[derive(Clone)]
enum CellState {
    Pending,
    Running,
    /// Running, but waiting for another cell.
    Blocked(CellKey),
    Done(Arc<GroupResult>),
    Failed,
}

struct Cell {
    state: watch::Sender<CellState>,
}

/// Marks a claimed cell failed if its run is dropped before settling, so
/// waiters wake instead of blocking on a cell nobody will finish.
struct Claim<'a> {
    cell: &'a Cell,
    settled: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cell.state.send_replace(CellState::Failed);
        }
    }
}

struct ManagerInner {
    graph: Arc<ModuleGraph>,
    app_injector: Injector,
    injectors: Vec<Injector>,
    registrations: Vec<Vec<ExtensionRegistration>>,
    last_module: HashMap<Token, usize>,
    cells: Mutex<HashMap<CellKey, Arc<Cell>>>,
    log: LogMediatorRef,
}

/// Runs extension groups per module on demand and caches their results.
///
/// Every (group, module) cell moves `Pending → Running → Done` exactly once;
/// a cell waiting for another group is `Blocked` on it. Requests for a cell
/// that is already running wait for it, unless following the `Blocked` links
/// leads back to the requester, which is a dependency cycle.
#[derive(Clone)]
pub struct ExtensionsManager {
    inner: Arc<ManagerInner>,
}

impl ExtensionsManager {
    /// `injectors` holds one Module injector per module, in graph order.
    /// `global` registrations are added to every module.
    pub fn new(
        graph: Arc<ModuleGraph>,
        app_injector: Injector,
        injectors: Vec<Injector>,
        global: &[ExtensionRegistration],
    ) -> Result<Self, Error> {
        if injectors.len() != graph.len() {
            return Err(Error::Internal(format!(
                "{} module injectors for {} modules",
                injectors.len(),
                graph.len()
            )));
        }

        let mut registrations = Vec::with_capacity(graph.len());
        let mut last_module = HashMap::new();
        for (idx, module) in graph.modules().iter().enumerate() {
            let mut local: Vec<ExtensionRegistration> = Vec::new();
            for registration in global.iter().chain(module.extensions.iter()) {
                if local.iter().any(|r| r.same_as(registration)) {
                    continue;
                }
                injectors[idx].register(registration.provider().clone())?;
                last_module.insert(registration.group.clone(), idx);
                local.push(registration.clone());
            }
            registrations.push(local);
        }

        let log = app_injector
            .get::<LogMediatorRef>()
            .map(|log| (*log).clone())
            .unwrap_or_default();

        Ok(Self {
            inner: Arc::new(ManagerInner {
                graph,
                app_injector,
                injectors,
                registrations,
                last_module,
                cells: Mutex::new(HashMap::new()),
                log,
            }),
        })
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.inner.graph
    }

    pub fn app_injector(&self) -> &Injector {
        &self.inner.app_injector
    }

    /// Module injectors in graph order.
    pub fn injectors(&self) -> &[Injector] {
        &self.inner.injectors
    }

    pub fn injector(&self, module: ModuleId) -> Option<&Injector> {
        let idx = self.inner.graph.modules().iter().position(|m| m.id == module)?;
        self.inner.injectors.get(idx)
    }

    /// Results of `group` for every module carrying it, in traversal order.
    pub async fn request_stage(&self, group: &Token) -> Result<Vec<Arc<GroupResult>>, Error> {
        self.stage_per_app(group.clone(), None).await
    }

    /// Result of `group` for one module.
    pub async fn request_stage_for(&self, group: &Token, module: ModuleId) -> Result<Arc<GroupResult>, Error> {
        let idx = self
            .inner
            .graph
            .modules()
            .iter()
            .position(|m| m.id == module)
            .ok_or_else(|| Error::Internal(format!("module {module:?} is not part of the graph")))?;
        self.stage(
            CellKey {
                group: group.clone(),
                module: idx,
            },
            None,
        )
        .await
    }

    /// Run every registered group in every module.
    pub async fn init_all(&self) -> Result<(), Error> {
        for (idx, registrations) in self.inner.registrations.iter().enumerate() {
            let mut groups: Vec<&Token> = Vec::new();
            for registration in registrations {
                if !groups.contains(&&registration.group) {
                    groups.push(&registration.group);
                }
            }
            for group in groups {
                let key = CellKey {
                    group: group.clone(),
                    module: idx,
                };
                self.stage(key, None).await?;
            }
        }
        debug!(modules = self.inner.graph.len(), "All extension groups initialized");
        Ok(())
    }

    fn modules_with(&self, group: &Token) -> Vec<usize> {
        self.inner
            .registrations
            .iter()
            .enumerate()
            .filter(|(_, regs)| regs.iter().any(|r| &r.group == group))
            .map(|(idx, _)| idx)
            .collect()
    }

    async fn stage_per_app(
        &self,
        group: Token,
        requester: Option<CellKey>,
    ) -> Result<Vec<Arc<GroupResult>>, Error> {
        let mut results = Vec::new();
        for module in self.modules_with(&group) {
            let key = CellKey {
                group: group.clone(),
                module,
            };
            results.push(self.stage(key, requester.clone()).await?);
        }
        Ok(results)
    }

    fn stage(
        &self,
        key: CellKey,
        requester: Option<CellKey>,
    ) -> BoxFuture<'static, Result<Arc<GroupResult>, Error>> {
        let this = self.clone();
        Box::pin(async move {
            let cell = this.cell(&key);
            if let Some(requester) = &requester {
                this.mark(requester, CellState::Blocked(key.clone()));
            }
            let result = this.await_or_run(&key, &cell, requester.as_ref()).await;
            if let Some(requester) = &requester {
                this.mark(requester, CellState::Running);
            }
            result
        })
    }

    async fn await_or_run(
        &self,
        key: &CellKey,
        cell: &Cell,
        requester: Option<&CellKey>,
    ) -> Result<Arc<GroupResult>, Error> {
        let mut rx = cell.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                CellState::Done(result) => return Ok(result),
                CellState::Failed => return Err(self.aborted(key)),
                CellState::Pending => {
                    let claimed = cell.state.send_if_modified(|state| {
                        if matches!(state, CellState::Pending) {
                            *state = CellState::Running;
                            true
                        } else {
                            false
                        }
                    });
                    if claimed {
                        return self.run_cell(key, cell).await;
                    }
                }
                CellState::Running | CellState::Blocked(_) => {
                    if let Some(chain) = requester.and_then(|r| self.find_cycle(key, r)) {
                        return Err(ExtensionError::DetectedCircularDependenciesForExtensions { chain }.into());
                    }
                    rx.changed().await.map_err(|_| self.aborted(key))?;
                }
            }
        }
    }

    async fn run_cell(&self, key: &CellKey, cell: &Cell) -> Result<Arc<GroupResult>, Error> {
        let mut claim = Claim { cell, settled: false };
        let outcome = self.execute(key).await;
        claim.settled = true;
        match outcome {
            Ok(result) => {
                cell.state.send_replace(CellState::Done(result.clone()));
                self.inner
                    .log
                    .stage_finished(key.group.name(), result.module_name(), result.values().len());
                Ok(result)
            }
            Err(error) => {
                cell.state.send_replace(CellState::Failed);
                Err(error)
            }
        }
    }

    async fn execute(&self, key: &CellKey) -> Result<Arc<GroupResult>, Error> {
        let module = &self.inner.graph.modules()[key.module];
        let registrations = &self.inner.registrations[key.module];

        for registration in registrations
            .iter()
            .filter(|r| r.before.as_ref() == Some(&key.group) && r.group != key.group)
        {
            let prerequisite = CellKey {
                group: registration.group.clone(),
                module: key.module,
            };
            self.stage(prerequisite, Some(key.clone())).await?;
        }

        let is_last = self.inner.last_module.get(&key.group) == Some(&key.module);
        let ctx = ExtensionContext {
            manager: self.clone(),
            module: key.module,
            cell: key.clone(),
        };

        let mut values = Vec::new();
        for registration in registrations.iter().filter(|r| r.group == key.group) {
            trace!(
                group = %key.group,
                module = %module.name,
                extension = %registration.name,
                is_last,
                "Initializing extension"
            );
            let extension = self.inner.injectors[key.module]
                .get_by::<ExtensionInstance>(registration.token())
                .map_err(|e| failed(module, registration, e.into()))?;
            let value = extension.0.init(&ctx, is_last).await.map_err(|e| match e {
                Error::Extension(_) => e,
                other => failed(module, registration, other),
            })?;
            values.push(ExtensionValue {
                extension: registration.name.clone(),
                value,
            });
        }

        Ok(Arc::new(GroupResult {
            group: key.group.clone(),
            module: module.id,
            module_name: module.name.clone(),
            values,
        }))
    }

    fn cell(&self, key: &CellKey) -> Arc<Cell> {
        self.inner
            .cells
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                let (state, _) = watch::channel(CellState::Pending);
                Arc::new(Cell { state })
            })
            .clone()
    }

    fn mark(&self, key: &CellKey, state: CellState) {
        if let Some(cell) = self.inner.cells.lock().get(key) {
            cell.state.send_replace(state);
        }
    }

    fn state_of(&self, key: &CellKey) -> Option<CellState> {
        let cells = self.inner.cells.lock();
        cells.get(key).map(|cell| cell.state.borrow().clone())
    }

    /// Follow `Blocked` links from `target`; reaching `requester` means the
    /// request would wait on itself.
    fn find_cycle(&self, target: &CellKey, requester: &CellKey) -> Option<Vec<String>> {
        let mut chain = vec![self.describe(requester), self.describe(target)];
        let mut current = target.clone();
        let limit = self.inner.cells.lock().len();
        for _ in 0..=limit {
            if &current == requester {
                return Some(chain);
            }
            match self.state_of(&current) {
                Some(CellState::Blocked(next)) => {
                    chain.push(self.describe(&next));
                    current = next;
                }
                _ => return None,
            }
        }
        None
    }

    fn describe(&self, key: &CellKey) -> String {
        format!("{} in {}", key.group.name(), self.module_name(key.module))
    }

    fn module_name(&self, idx: usize) -> String {
        self.inner
            .graph
            .modules()
            .get(idx)
            .map(|m| m.name.clone())
            .unwrap_or_default()
    }

    fn aborted(&self, key: &CellKey) -> Error {
        ExtensionError::StageAborted {
            group: key.group.name().to_string(),
            module: self.module_name(key.module),
        }
        .into()
    }
}

fn failed(module: &NormalizedModule, registration: &ExtensionRegistration, source: Error) -> Error {
    ExtensionError::ExtensionFailed {
        module: module.name.clone(),
        extension: registration.name.clone(),
        group: registration.group.name().to_string(),
        source: Box::new(source),
    }
    .into()
}

/// What an extension sees while it runs.
pub struct ExtensionContext {
    manager: ExtensionsManager,
    module: usize,
    cell: CellKey,
}

impl ExtensionContext {
    /// The module being initialized.
    pub fn module(&self) -> &NormalizedModule {
        &self.manager.inner.graph.modules()[self.module]
    }

    pub fn group(&self) -> &Token {
        &self.cell.group
    }

    /// The current module's injector.
    pub fn injector(&self) -> &Injector {
        &self.manager.inner.injectors[self.module]
    }

    pub fn app_injector(&self) -> &Injector {
        self.manager.app_injector()
    }

    pub fn injector_of(&self, module: ModuleId) -> Option<&Injector> {
        self.manager.injector(module)
    }

    pub fn graph(&self) -> &ModuleGraph {
        self.manager.graph()
    }

    /// Result of `group` for the current module, computed first if needed.
    pub async fn stage(&self, group: &Token) -> Result<Arc<GroupResult>, Error> {
        let key = CellKey {
            group: group.clone(),
            module: self.module,
        };
        self.manager.stage(key, Some(self.cell.clone())).await
    }

    /// Results of `group` for every module carrying it.
    pub async fn stage_per_app(&self, group: &Token) -> Result<Vec<Arc<GroupResult>>, Error> {
        self.manager
            .stage_per_app(group.clone(), Some(self.cell.clone()))
            .await
    }
}
