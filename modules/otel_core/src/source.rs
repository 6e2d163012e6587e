//! Where the integration options come from, and how they are resolved.
//!
//! ```rust,ignore
//! // value known up front
//! OptionsSource::Direct(opts);
//!
//! // computed during init, from the module context
//! AsyncOptions::new()
//!     .use_factory(|ctx| async move { ctx.module_config_required::<OpenTelemetryOptions>() })
//!     .inject([Dependency::of::<dyn SettingsApi>()])
//!     .into_source()?;
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use modkit::client_hub::{ClientHub, ClientHubError, TypeKey};
use modkit::ModuleCtx;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::config::OpenTelemetryOptions;
use crate::error::OptionsError;

/// A provider that produces options on demand.
#[async_trait]
pub trait OptionsFactory: Send + Sync + 'static {
    async fn create_options(&self) -> anyhow::Result<OpenTelemetryOptions>;
}

/// Conversion of a container entry into an options factory. Implemented for
/// every concrete `OptionsFactory` and for `dyn OptionsFactory` itself.
pub trait AsOptionsFactory: Send + Sync + 'static {
    fn into_options_factory(self: Arc<Self>) -> Arc<dyn OptionsFactory>;
}

impl<T: OptionsFactory> AsOptionsFactory for T {
    fn into_options_factory(self: Arc<Self>) -> Arc<dyn OptionsFactory> {
        self
    }
}

impl AsOptionsFactory for dyn OptionsFactory {
    fn into_options_factory(self: Arc<Self>) -> Arc<dyn OptionsFactory> {
        self
    }
}

/// A container entry a factory needs, checked before the factory runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency(TypeKey);

impl Dependency {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(TypeKey::of::<T>())
    }

    pub fn key(&self) -> &TypeKey {
        &self.0
    }
}

pub type OptionsFuture = BoxFuture<'static, anyhow::Result<OpenTelemetryOptions>>;
type FactoryFn = Arc<dyn Fn(ModuleCtx) -> OptionsFuture + Send + Sync>;
type MakeFn = Arc<dyn Fn(&ClientHub) -> Arc<dyn OptionsFactory> + Send + Sync>;
type LookupFn =
    Arc<dyn Fn(&ClientHub) -> Result<Arc<dyn OptionsFactory>, ClientHubError> + Send + Sync>;

/// Reuse-or-construct access to an options factory type.
#[derive(Clone)]
pub struct ClassProvider {
    type_key: TypeKey,
    make: MakeFn,
}

impl ClassProvider {
    pub fn of<T: OptionsFactory + Default>() -> Self {
        Self {
            type_key: TypeKey::of::<T>(),
            make: Arc::new(|hub: &ClientHub| {
                let instance: Arc<dyn OptionsFactory> =
                    hub.get_or_register_with::<T, _>(T::default);
                instance
            }),
        }
    }
}

/// Lookup-only access to an options factory already in the container.
#[derive(Clone)]
pub struct ExistingProvider {
    type_key: TypeKey,
    lookup: LookupFn,
}

impl ExistingProvider {
    pub fn of<T: ?Sized + AsOptionsFactory>() -> Self {
        Self {
            type_key: TypeKey::of::<T>(),
            lookup: Arc::new(|hub: &ClientHub| {
                hub.get::<T>().map(<T as AsOptionsFactory>::into_options_factory)
            }),
        }
    }
}

/// How the integration obtains its options. Resolved once, during init.
#[derive(Clone)]
pub enum OptionsSource {
    Direct(OpenTelemetryOptions),
    Factory {
        factory: FactoryFn,
        inject: Vec<Dependency>,
    },
    Class(ClassProvider),
    Existing(ExistingProvider),
}

impl Default for OptionsSource {
    fn default() -> Self {
        OptionsSource::Direct(OpenTelemetryOptions::default())
    }
}

impl fmt::Debug for OptionsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsSource::Direct(opts) => f.debug_tuple("Direct").field(opts).finish(),
            OptionsSource::Factory { inject, .. } => f
                .debug_struct("Factory")
                .field("inject", inject)
                .finish_non_exhaustive(),
            OptionsSource::Class(p) => f.debug_tuple("Class").field(&p.type_key).finish(),
            OptionsSource::Existing(p) => f.debug_tuple("Existing").field(&p.type_key).finish(),
        }
    }
}

fn boxed_factory<F, Fut>(f: F) -> FactoryFn
where
    F: Fn(ModuleCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<OpenTelemetryOptions>> + Send + 'static,
{
    Arc::new(move |ctx: ModuleCtx| -> OptionsFuture { Box::pin(f(ctx)) })
}

impl OptionsSource {
    pub fn factory<F, Fut>(f: F, inject: impl IntoIterator<Item = Dependency>) -> Self
    where
        F: Fn(ModuleCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<OpenTelemetryOptions>> + Send + 'static,
    {
        OptionsSource::Factory {
            factory: boxed_factory(f),
            inject: inject.into_iter().collect(),
        }
    }

    pub fn class<T: OptionsFactory + Default>() -> Self {
        OptionsSource::Class(ClassProvider::of::<T>())
    }

    pub fn existing<T: ?Sized + AsOptionsFactory>() -> Self {
        OptionsSource::Existing(ExistingProvider::of::<T>())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OptionsSource::Direct(_) => "direct",
            OptionsSource::Factory { .. } => "factory",
            OptionsSource::Class(_) => "class",
            OptionsSource::Existing(_) => "existing",
        }
    }

    /// Produce the options. No retries: the first failure is returned.
    pub async fn resolve(&self, ctx: &ModuleCtx) -> Result<OpenTelemetryOptions, OptionsError> {
        match self {
            OptionsSource::Direct(opts) => Ok(opts.clone()),
            OptionsSource::Factory { factory, inject } => {
                let hub = ctx.client_hub();
                if let Some(missing) = inject.iter().find(|d| !hub.contains_key(d.key())) {
                    return Err(OptionsError::MissingDependency(missing.key().clone()));
                }
                factory(ctx.clone()).await.map_err(OptionsError::Factory)
            }
            OptionsSource::Class(p) => {
                let factory = (p.make)(&ctx.client_hub());
                factory
                    .create_options()
                    .await
                    .map_err(OptionsError::Factory)
            }
            OptionsSource::Existing(p) => {
                let factory = (p.lookup)(&ctx.client_hub())?;
                factory
                    .create_options()
                    .await
                    .map_err(OptionsError::Factory)
            }
        }
    }
}

/// Descriptor for options that are only known at init time.
///
/// Exactly one of `use_factory`, `use_class`, `use_existing` must be set.
/// `inject` applies to `use_factory` only. `imports` names modules that must
/// be initialized before this one.
#[derive(Default)]
pub struct AsyncOptions {
    factory: Option<FactoryFn>,
    class: Option<ClassProvider>,
    existing: Option<ExistingProvider>,
    inject: Vec<Dependency>,
    imports: Vec<&'static str>,
}

impl AsyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_factory<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ModuleCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<OpenTelemetryOptions>> + Send + 'static,
    {
        self.factory = Some(boxed_factory(f));
        self
    }

    pub fn use_class<T: OptionsFactory + Default>(mut self) -> Self {
        self.class = Some(ClassProvider::of::<T>());
        self
    }

    pub fn use_existing<T: ?Sized + AsOptionsFactory>(mut self) -> Self {
        self.existing = Some(ExistingProvider::of::<T>());
        self
    }

    pub fn inject(mut self, deps: impl IntoIterator<Item = Dependency>) -> Self {
        self.inject.extend(deps);
        self
    }

    pub fn imports(mut self, modules: impl IntoIterator<Item = &'static str>) -> Self {
        self.imports.extend(modules);
        self
    }

    pub fn imported_modules(&self) -> &[&'static str] {
        &self.imports
    }

    pub fn into_source(self) -> Result<OptionsSource, OptionsError> {
        let set: Vec<&'static str> = [
            ("use_factory", self.factory.is_some()),
            ("use_class", self.class.is_some()),
            ("use_existing", self.existing.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect();

        if set.len() > 1 {
            return Err(OptionsError::ConflictingStrategies(set));
        }
        if let Some(factory) = self.factory {
            return Ok(OptionsSource::Factory {
                factory,
                inject: self.inject,
            });
        }
        if let Some(class) = self.class {
            return Ok(OptionsSource::Class(class));
        }
        if let Some(existing) = self.existing {
            return Ok(OptionsSource::Existing(existing));
        }
        Err(OptionsError::MissingStrategy)
    }
}

impl fmt::Debug for AsyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOptions")
            .field("use_factory", &self.factory.is_some())
            .field("use_class", &self.class.as_ref().map(|c| &c.type_key))
            .field("use_existing", &self.existing.as_ref().map(|e| &e.type_key))
            .field("inject", &self.inject)
            .field("imports", &self.imports)
            .finish()
    }
}
