//! Explicit module registry.
//!
//! Modules are registered by the host binary (no link-time discovery), with
//! their dependencies and capabilities, then topo-sorted once. The registry
//! drives the ordered phases:
//! init → rest → configure → ready → start → stop.

use axum::Router;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::ModuleCtx;
use crate::contracts;
use crate::http::MiddlewareConsumer;

pub struct ModuleEntry {
    pub name: &'static str,
    pub deps: Vec<&'static str>,
    pub core: Arc<dyn contracts::Module>,
    pub rest: Option<Arc<dyn contracts::RestfulModule>>,
    pub middleware: Option<Arc<dyn contracts::MiddlewareModule>>,
    pub ready: Option<Arc<dyn contracts::ReadyModule>>,
    pub stateful: Option<Arc<dyn contracts::StatefulModule>>,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let caps: Vec<&str> = [
            ("rest", self.rest.is_some()),
            ("middleware", self.middleware.is_some()),
            ("ready", self.ready.is_some()),
            ("stateful", self.stateful.is_some()),
        ]
        .into_iter()
        .filter_map(|(cap, has)| has.then_some(cap))
        .collect();
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("capabilities", &caps)
            .finish()
    }
}

/// Topo-sorted modules plus the once-only guards for the pipeline phases.
pub struct ModuleRegistry {
    modules: Vec<ModuleEntry>,
    configured: AtomicBool,
    ready: AtomicBool,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name))
            .finish()
    }
}

impl ModuleRegistry {
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<dyn contracts::Module>> {
        self.modules
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.core.clone())
    }

    /// Entries in dependency order, each paired with a context scoped to it.
    fn scoped<'a>(
        &'a self,
        base_ctx: &'a ModuleCtx,
    ) -> impl Iterator<Item = (&'a ModuleEntry, ModuleCtx)> + 'a {
        self.modules
            .iter()
            .map(move |e| (e, base_ctx.clone().for_module(e.name)))
    }

    pub async fn run_init_phase(&self, base_ctx: &ModuleCtx) -> Result<(), RegistryError> {
        for (e, ctx) in self.scoped(base_ctx) {
            tracing::debug!(module = e.name, "init");
            if let Err(source) = e.core.init(&ctx).await {
                return Err(RegistryError::Init {
                    module: e.name,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Thread the router through every REST module, in dependency order.
    pub fn run_rest_phase(
        &self,
        base_ctx: &ModuleCtx,
        router: Router,
    ) -> Result<Router, RegistryError> {
        self.scoped(base_ctx)
            .filter_map(|(e, ctx)| e.rest.as_ref().map(|r| (e.name, r, ctx)))
            .try_fold(router, |router, (module, rest, ctx)| {
                rest.register_rest(&ctx, router)
                    .map_err(|source| RegistryError::RestRegister { module, source })
            })
    }

    /// Collect middleware registrations. A second call fails so the same
    /// middleware can never be mounted twice.
    pub fn run_configure_phase(
        &self,
        base_ctx: &ModuleCtx,
        consumer: &mut MiddlewareConsumer,
    ) -> Result<(), RegistryError> {
        if self.configured.swap(true, Ordering::AcqRel) {
            return Err(RegistryError::PhaseRepeated("configure"));
        }
        for (e, ctx) in self.scoped(base_ctx) {
            let Some(m) = &e.middleware else { continue };
            m.configure(&ctx, consumer)
                .map_err(|source| RegistryError::Configure {
                    module: e.name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Application-ready hooks. Guarded like `run_configure_phase`.
    pub async fn run_ready_phase(&self, base_ctx: &ModuleCtx) -> Result<(), RegistryError> {
        if self.ready.swap(true, Ordering::AcqRel) {
            return Err(RegistryError::PhaseRepeated("ready"));
        }
        for (e, ctx) in self.scoped(base_ctx) {
            let Some(r) = &e.ready else { continue };
            if let Err(source) = r.on_ready(&ctx).await {
                return Err(RegistryError::Ready {
                    module: e.name,
                    source,
                });
            }
        }
        Ok(())
    }

    pub async fn run_start_phase(&self, cancel: CancellationToken) -> Result<(), RegistryError> {
        for e in &self.modules {
            let Some(s) = &e.stateful else { continue };
            if let Err(source) = s.start(cancel.clone()).await {
                return Err(RegistryError::Start {
                    module: e.name,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Reverse dependency order; failures are logged and do not stop the
    /// remaining modules.
    pub async fn run_stop_phase(&self, cancel: CancellationToken) -> Result<(), RegistryError> {
        for e in self.modules.iter().rev() {
            let Some(s) = &e.stateful else { continue };
            if let Err(err) = s.stop(cancel.clone()).await {
                tracing::warn!(module = e.name, error = %err, "Failed to stop module");
            }
        }
        Ok(())
    }
}

/// Everything registered under one module name so far.
#[derive(Default)]
struct Draft {
    core: Option<Arc<dyn contracts::Module>>,
    deps: Vec<&'static str>,
    rest: Option<Arc<dyn contracts::RestfulModule>>,
    middleware: Option<Arc<dyn contracts::MiddlewareModule>>,
    ready: Option<Arc<dyn contracts::ReadyModule>>,
    stateful: Option<Arc<dyn contracts::StatefulModule>>,
}

/// Collects registrations keyed by module name. Registration problems are
/// reported together by [`RegistryBuilder::build_topo_sorted`].
#[derive(Default)]
pub struct RegistryBuilder {
    drafts: BTreeMap<&'static str, Draft>,
    errors: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// No core module registered yet.
    pub fn is_empty(&self) -> bool {
        self.drafts.values().all(|d| d.core.is_none())
    }

    pub fn register_core_with_meta(
        &mut self,
        name: &'static str,
        deps: impl IntoIterator<Item = &'static str>,
        m: Arc<dyn contracts::Module>,
    ) {
        let draft = self.drafts.entry(name).or_default();
        if draft.core.is_some() {
            self.errors
                .push(format!("Module '{name}' is already registered"));
            return;
        }
        draft.core = Some(m);
        draft.deps = deps.into_iter().collect();
    }

    pub fn register_rest_with_meta(
        &mut self,
        name: &'static str,
        m: Arc<dyn contracts::RestfulModule>,
    ) {
        self.drafts.entry(name).or_default().rest = Some(m);
    }

    pub fn register_middleware_with_meta(
        &mut self,
        name: &'static str,
        m: Arc<dyn contracts::MiddlewareModule>,
    ) {
        self.drafts.entry(name).or_default().middleware = Some(m);
    }

    pub fn register_ready_with_meta(
        &mut self,
        name: &'static str,
        m: Arc<dyn contracts::ReadyModule>,
    ) {
        self.drafts.entry(name).or_default().ready = Some(m);
    }

    pub fn register_stateful_with_meta(
        &mut self,
        name: &'static str,
        m: Arc<dyn contracts::StatefulModule>,
    ) {
        self.drafts.entry(name).or_default().stateful = Some(m);
    }

    /// Validate and order the registrations (Kahn's algorithm over names in
    /// lexical order, so the result is deterministic).
    pub fn build_topo_sorted(self) -> Result<ModuleRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        let mut entries = Vec::with_capacity(self.drafts.len());
        for (name, draft) in self.drafts {
            // a capability was registered without its core module
            let Some(core) = draft.core else {
                return Err(RegistryError::UnknownModule(name.to_string()));
            };
            entries.push(ModuleEntry {
                name,
                deps: draft.deps,
                core,
                rest: draft.rest,
                middleware: draft.middleware,
                ready: draft.ready,
                stateful: draft.stateful,
            });
        }

        let idx: HashMap<&'static str, usize> =
            entries.iter().enumerate().map(|(i, e)| (e.name, i)).collect();

        let mut dependents = vec![Vec::<usize>::new(); entries.len()];
        let mut pending = vec![0usize; entries.len()];
        for (i, e) in entries.iter().enumerate() {
            for dep in &e.deps {
                let j = *idx.get(dep).ok_or_else(|| RegistryError::UnknownDependency {
                    module: e.name.to_string(),
                    depends_on: dep.to_string(),
                })?;
                dependents[j].push(i);
                pending[i] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..entries.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(entries.len());
        while let Some(u) = queue.pop_front() {
            order.push(u);
            for &w in &dependents[u] {
                pending[w] -= 1;
                if pending[w] == 0 {
                    queue.push_back(w);
                }
            }
        }

        if order.len() < entries.len() {
            return Err(RegistryError::CycleDetected {
                path: dependency_cycle(&entries, &idx, &pending),
            });
        }

        let mut slots: Vec<Option<ModuleEntry>> = entries.into_iter().map(Some).collect();
        let modules: Vec<ModuleEntry> = order.into_iter().filter_map(|i| slots[i].take()).collect();

        tracing::info!(
            modules = ?modules.iter().map(|e| e.name).collect::<Vec<_>>(),
            "Module dependency order resolved (topo)"
        );

        Ok(ModuleRegistry {
            modules,
            configured: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        })
    }
}

/// After Kahn's pass, every module left with `pending > 0` still waits on a
/// dependency that is itself pending, so following pending dependencies from
/// any of them must revisit a module. Returns that loop, closed
/// (`a -> b -> a`).
fn dependency_cycle(
    entries: &[ModuleEntry],
    idx: &HashMap<&'static str, usize>,
    pending: &[usize],
) -> Vec<&'static str> {
    let Some(start) = pending.iter().position(|&p| p > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut cur = start;
    while let Some(next) = entries[cur]
        .deps
        .iter()
        .filter_map(|d| idx.get(d).copied())
        .find(|&j| pending[j] > 0)
    {
        if let Some(pos) = path.iter().position(|&p| p == next) {
            return path[pos..]
                .iter()
                .chain(std::iter::once(&next))
                .map(|&i| entries[i].name)
                .collect();
        }
        path.push(next);
        cur = next;
    }
    path.into_iter().map(|i| entries[i].name).collect()
}

/// Structured errors for the module registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    // Phase errors with module context
    #[error("initialization failed for module '{module}'")]
    Init {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("REST registration failed for module '{module}'")]
    RestRegister {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("middleware configuration failed for module '{module}'")]
    Configure {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("ready hook failed for module '{module}'")]
    Ready {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("start failed for '{module}'")]
    Start {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("phase '{0}' already ran")]
    PhaseRepeated(&'static str),

    // Build/topo-sort errors
    #[error("capability registered for unknown module '{0}'")]
    UnknownModule(String),
    #[error("module '{module}' depends on unknown '{depends_on}'")]
    UnknownDependency { module: String, depends_on: String },
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<&'static str> },
    #[error("invalid registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}
