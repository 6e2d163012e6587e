//! Type-keyed provider container.
//!
//! - Modules register providers once under an *interface type*, which may be a
//!   trait object: `register::<dyn my::OptionsFactory>(..)`.
//! - Consumers fetch by the same type: `get::<dyn my::OptionsFactory>()`.
//! - Optional named scopes: `register_scoped / get_scoped`.
//!
//! Key = (type name, scope). We use `type_name::<T>()`, which works for `T = dyn Trait`.
//! Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! Re-registering overwrites; `Arc`s already handed out stay valid.

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Global scope constant.
pub const GLOBAL_SCOPE: &str = "global";

/// Stable type key: the fully-qualified `type_name::<T>()`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Scope name (`global`, `tenant-42`, ...).
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ScopeKey(Arc<str>);

impl ScopeKey {
    #[inline]
    fn named(s: impl Into<Arc<str>>) -> Self {
        ScopeKey(s.into())
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientHubError {
    #[error("provider not found: type={type_key:?}, scope={scope:?}")]
    NotFound { type_key: TypeKey, scope: ScopeKey },

    #[error("type mismatch in hub for type={type_key:?}, scope={scope:?}")]
    TypeMismatch { type_key: TypeKey, scope: ScopeKey },
}

type Boxed = Box<dyn Any + Send + Sync>;

/// Registry of providers keyed by (interface type, scope).
pub struct ClientHub {
    map: RwLock<HashMap<(TypeKey, ScopeKey), Boxed>>,
}

impl ClientHub {
    #[inline]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .map
            .read()
            .keys()
            .map(|(t, s)| format!("{t}@{s:?}"))
            .collect();
        f.debug_struct("ClientHub").field("providers", &keys).finish()
    }
}

impl ClientHub {
    /// Register a provider in the *global* scope under the interface type `T`.
    pub fn register<T>(&self, client: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_scoped::<T>(GLOBAL_SCOPE, client);
    }

    /// Register a provider in a *named* scope under the interface type `T`.
    pub fn register_scoped<T>(&self, scope: impl Into<Arc<str>>, client: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (TypeKey::of::<T>(), ScopeKey::named(scope));
        tracing::trace!(type_key = %key.0, scope = ?key.1, "provider registered");
        self.map.write().insert(key, Box::new(client));
    }

    /// Fetch a provider from the *global* scope by interface type `T`.
    pub fn get<T>(&self) -> Result<Arc<T>, ClientHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_scoped::<T>(GLOBAL_SCOPE)
    }

    /// Fetch a provider from a *named* scope by interface type `T`.
    pub fn get_scoped<T>(&self, scope: impl Into<Arc<str>>) -> Result<Arc<T>, ClientHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let scope_key = ScopeKey::named(scope);
        let r = self.map.read();

        let boxed = r
            .get(&(type_key.clone(), scope_key.clone()))
            .ok_or_else(|| ClientHubError::NotFound {
                type_key: type_key.clone(),
                scope: scope_key.clone(),
            })?;

        // Stored value is exactly `Arc<T>`.
        if let Some(arc_t) = boxed.downcast_ref::<Arc<T>>() {
            return Ok(arc_t.clone());
        }
        Err(ClientHubError::TypeMismatch {
            type_key,
            scope: scope_key,
        })
    }

    /// Fetch the global provider for `T`, constructing and registering it first
    /// when absent. The write lock is held across `make`, so concurrent callers
    /// observe a single instance.
    pub fn get_or_register_with<T, F>(&self, make: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let key = (TypeKey::of::<T>(), ScopeKey::named(GLOBAL_SCOPE));
        let mut w = self.map.write();
        if let Some(existing) = w.get(&key).and_then(|b| b.downcast_ref::<Arc<T>>()) {
            return existing.clone();
        }
        let created = Arc::new(make());
        w.insert(key, Box::new(created.clone()));
        created
    }

    /// Whether a provider is registered for type key `key` in the global scope.
    pub fn contains_key(&self, key: &TypeKey) -> bool {
        self.map
            .read()
            .contains_key(&(key.clone(), ScopeKey::named(GLOBAL_SCOPE)))
    }

    /// Whether a provider for `T` is registered in the global scope.
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.contains_key(&TypeKey::of::<T>())
    }

    /// Remove a provider; returns it if it was present.
    pub fn remove<T>(&self, scope: impl Into<Arc<str>>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (TypeKey::of::<T>(), ScopeKey::named(scope));
        let boxed = self.map.write().remove(&key)?;
        boxed.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    /// Total number of registered providers.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[async_trait::async_trait]
    trait TestApi: Send + Sync {
        async fn id(&self) -> usize;
    }

    struct ImplA(usize);
    #[async_trait::async_trait]
    impl TestApi for ImplA {
        async fn id(&self) -> usize {
            self.0
        }
    }

    #[tokio::test]
    async fn register_and_get_dyn_trait_global() {
        let hub = ClientHub::new();
        let api: Arc<dyn TestApi> = Arc::new(ImplA(7));
        hub.register::<dyn TestApi>(api.clone());

        let got = hub.get::<dyn TestApi>().unwrap();
        assert_eq!(got.id().await, 7);
        assert!(Arc::ptr_eq(&api, &got));
        assert!(hub.contains::<dyn TestApi>());
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let hub = ClientHub::new();
        hub.register_scoped::<dyn TestApi>("tenant-1", Arc::new(ImplA(1)));
        hub.register_scoped::<dyn TestApi>("tenant-2", Arc::new(ImplA(2)));

        assert_eq!(hub.get_scoped::<dyn TestApi>("tenant-1").unwrap().id().await, 1);
        assert_eq!(hub.get_scoped::<dyn TestApi>("tenant-2").unwrap().id().await, 2);
        assert!(matches!(
            hub.get::<dyn TestApi>(),
            Err(ClientHubError::NotFound { .. })
        ));
        assert!(!hub.contains::<dyn TestApi>());
    }

    #[test]
    fn get_or_register_with_constructs_once() {
        let hub = ClientHub::new();
        let built = AtomicUsize::new(0);

        let a = hub.get_or_register_with(|| {
            built.fetch_add(1, Ordering::SeqCst);
            ImplA(3)
        });
        let b = hub.get_or_register_with(|| {
            built.fetch_add(1, Ordering::SeqCst);
            ImplA(4)
        });

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn remove_returns_value() {
        let hub = ClientHub::new();
        hub.register::<ImplA>(Arc::new(ImplA(9)));
        let removed = hub.remove::<ImplA>(GLOBAL_SCOPE).unwrap();
        assert_eq!(removed.0, 9);
        assert!(hub.is_empty());
    }
}
