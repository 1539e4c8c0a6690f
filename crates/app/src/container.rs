// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Typed dependency graph
//!
//! This module provides the registry that turns provider functions into one shared
//! instance per capability. A capability is identified by its Rust type.
//!
//! # Construction rules
//!
//! - Every dependency a provider declares must already be registered, so the graph is
//!   built in dependency order and cycles cannot be expressed.
//! - A capability is constructed on first resolution and memoized; concurrent resolutions
//!   wait for the same construction.
//! - A provider may only resolve the capabilities it declared.
//! - A failed construction is reported to the caller and not memoized.
//!
//! Resources registered through [`ContainerBuilder::register_resource`] are closed by
//! [`Container::close`] in reverse acquisition order.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
};

use resource_client::{BoxError, Resource};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

type Instance = Arc<dyn Any + Send + Sync>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type Constructor =
    Box<dyn Fn(Resolver) -> BoxFuture<'static, Result<Instance, BoxError>> + Send + Sync>;
type CloseHook = fn(Instance) -> BoxFuture<'static, ()>;

/// Errors raised while building or resolving the dependency graph
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The capability already has a provider
    #[error("capability {capability} is already registered")]
    AlreadyRegistered {
        /// Capability name
        capability: &'static str,
    },

    /// A declared dependency has no provider registered before it
    #[error("capability {capability} depends on {dependency}, which is not registered")]
    MissingDependency {
        /// Capability being registered
        capability: &'static str,
        /// Dependency that could not be satisfied
        dependency: &'static str,
    },

    /// The capability was never registered
    #[error("capability {capability} is not registered")]
    NotRegistered {
        /// Capability name
        capability: &'static str,
    },

    /// A provider resolved a capability it did not declare
    #[error("provider of {capability} resolved undeclared dependency {dependency}")]
    UndeclaredDependency {
        /// Capability whose provider misbehaved
        capability: &'static str,
        /// Capability it tried to resolve
        dependency: &'static str,
    },

    /// The provider returned an error
    #[error("failed to construct {capability}: {source}")]
    Construction {
        /// Capability name
        capability: &'static str,
        /// Provider failure
        #[source]
        source: BoxError,
    },

    /// The stored instance is not of the requested type
    #[error("capability {capability} holds an instance of another type")]
    TypeMismatch {
        /// Capability name
        capability: &'static str,
    },
}

/// Identity of a capability in the graph
#[derive(Clone, Copy)]
pub struct Capability {
    type_id: TypeId,
    name: &'static str,
}

impl Capability {
    /// Capability provided by values of type `T`
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: short_name(type_name::<T>()),
        }
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for Capability {}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Last path segment of a type name, keeping generic arguments intact
fn short_name(full: &'static str) -> &'static str {
    let path = full.split('<').next().unwrap_or(full);
    match path.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

struct Registration {
    capability: Capability,
    dependencies: Vec<Capability>,
    constructor: Constructor,
    close_hook: Option<CloseHook>,
    instance: OnceCell<Instance>,
}

struct Acquired {
    capability: Capability,
    instance: Instance,
    close_hook: CloseHook,
}

struct Registry {
    registrations: HashMap<TypeId, Registration>,
    acquired: Mutex<Vec<Acquired>>,
}

/// Collects providers before the graph is frozen
#[derive(Default)]
pub struct ContainerBuilder {
    registrations: HashMap<TypeId, Registration>,
}

impl fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field(
                "registrations",
                &self.registrations.values().map(|r| r.capability).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ContainerBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for `T` that depends on `dependencies`
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::AlreadyRegistered` if `T` already has a provider and
    /// `ContainerError::MissingDependency` if a dependency is not registered yet.
    pub fn register<T, F, Fut>(
        &mut self,
        dependencies: &[Capability],
        constructor: F,
    ) -> Result<&mut Self, ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.insert::<T, F, Fut>(dependencies, constructor, None)
    }

    /// Register a provider for a resource that must be closed at shutdown
    ///
    /// # Errors
    ///
    /// Same as [`ContainerBuilder::register`].
    pub fn register_resource<T, F, Fut>(
        &mut self,
        dependencies: &[Capability],
        constructor: F,
    ) -> Result<&mut Self, ContainerError>
    where
        T: Resource,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.insert::<T, F, Fut>(dependencies, constructor, Some(close_instance::<T> as CloseHook))
    }

    /// Register a value that is already constructed
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::AlreadyRegistered` if `T` already has a provider.
    pub fn instance<T>(&mut self, value: T) -> Result<&mut Self, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        let capability = Capability::of::<T>();
        self.ensure_vacant(capability)?;

        let ready: Instance = Arc::new(value);
        self.registrations.insert(
            capability.type_id,
            Registration {
                capability,
                dependencies: Vec::new(),
                constructor: Box::new(
                    move |_| -> BoxFuture<'static, Result<Instance, BoxError>> {
                        let name = capability.name;
                        Box::pin(async move { Err(format!("{name} has no provider").into()) })
                    },
                ),
                close_hook: None,
                instance: OnceCell::new_with(Some(ready)),
            },
        );
        Ok(self)
    }

    /// Whether a provider for `T` has been registered
    pub fn contains<T: 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    /// Freeze the registry
    pub fn build(self) -> Container {
        Container {
            registry: Arc::new(Registry {
                registrations: self.registrations,
                acquired: Mutex::new(Vec::new()),
            }),
        }
    }

    fn insert<T, F, Fut>(
        &mut self,
        dependencies: &[Capability],
        constructor: F,
        close_hook: Option<CloseHook>,
    ) -> Result<&mut Self, ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let capability = Capability::of::<T>();
        self.ensure_vacant(capability)?;

        if let Some(missing) = dependencies
            .iter()
            .find(|dep| !self.registrations.contains_key(&dep.type_id))
        {
            return Err(ContainerError::MissingDependency {
                capability: capability.name,
                dependency: missing.name,
            });
        }

        let constructor: Constructor = Box::new(
            move |resolver| -> BoxFuture<'static, Result<Instance, BoxError>> {
                let fut = constructor(resolver);
                Box::pin(async move {
                    let value = fut.await.map_err(BoxError::from)?;
                    Ok(Arc::new(value) as Instance)
                })
            },
        );

        self.registrations.insert(
            capability.type_id,
            Registration {
                capability,
                dependencies: dependencies.to_vec(),
                constructor,
                close_hook,
                instance: OnceCell::new(),
            },
        );
        Ok(self)
    }

    fn ensure_vacant(&self, capability: Capability) -> Result<(), ContainerError> {
        if self.registrations.contains_key(&capability.type_id) {
            return Err(ContainerError::AlreadyRegistered {
                capability: capability.name,
            });
        }
        Ok(())
    }
}

fn close_instance<T: Resource>(instance: Instance) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Ok(resource) = instance.downcast::<T>() {
            resource.close().await;
        }
    })
}

/// Frozen dependency graph handing out shared instances
#[derive(Clone)]
pub struct Container {
    registry: Arc<Registry>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .registry
            .registrations
            .values()
            .map(|r| r.capability.name)
            .collect();
        names.sort_unstable();
        f.debug_struct("Container")
            .field("capabilities", &names)
            .finish()
    }
}

impl Container {
    /// Shared instance of `T`, constructing it and its dependencies on first use
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::NotRegistered` if `T` has no provider and
    /// `ContainerError::Construction` if its provider, or a dependency's, failed.
    pub async fn resolve<T>(&self) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        let capability = Capability::of::<T>();
        let instance = self.registry.resolve(capability).await?;
        instance
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                capability: capability.name,
            })
    }

    /// Whether a provider for `T` is registered
    pub fn contains<T: 'static>(&self) -> bool {
        self.registry.registrations.contains_key(&TypeId::of::<T>())
    }

    /// Close every constructed resource, most recently acquired first
    ///
    /// Later and concurrent calls find nothing left to close.
    pub async fn close(&self) {
        let acquired = std::mem::take(&mut *self.registry.acquired.lock().await);
        if acquired.is_empty() {
            return;
        }

        for Acquired {
            capability,
            instance,
            close_hook,
        } in acquired.into_iter().rev()
        {
            info!(capability = %capability, "closing resource");
            close_hook(instance).await;
        }
    }
}

impl Registry {
    fn resolve(
        self: &Arc<Self>,
        capability: Capability,
    ) -> BoxFuture<'_, Result<Instance, ContainerError>> {
        Box::pin(async move {
            let registration = self.registrations.get(&capability.type_id).ok_or(
                ContainerError::NotRegistered {
                    capability: capability.name,
                },
            )?;

            let instance = registration
                .instance
                .get_or_try_init(|| self.construct(registration))
                .await?;

            Ok(Arc::clone(instance))
        })
    }

    async fn construct(
        self: &Arc<Self>,
        registration: &Registration,
    ) -> Result<Instance, ContainerError> {
        let capability = registration.capability;

        // depth-first, in declaration order
        for dependency in &registration.dependencies {
            self.resolve(*dependency).await?;
        }

        debug!(capability = %capability, "constructing");
        let resolver = Resolver {
            registry: Arc::clone(self),
            scope: capability,
            allowed: registration.dependencies.clone(),
        };
        let instance = (registration.constructor)(resolver)
            .await
            .map_err(|source| ContainerError::Construction {
                capability: capability.name,
                source,
            })?;

        if let Some(close_hook) = registration.close_hook {
            self.acquired.lock().await.push(Acquired {
                capability,
                instance: Arc::clone(&instance),
                close_hook,
            });
        }

        Ok(instance)
    }
}

/// Handle passed to providers, limited to their declared dependencies
pub struct Resolver {
    registry: Arc<Registry>,
    scope: Capability,
    allowed: Vec<Capability>,
}

impl Resolver {
    /// Shared instance of a declared dependency
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::UndeclaredDependency` if `T` was not declared by the
    /// provider, or any error [`Container::resolve`] can return.
    pub async fn resolve<T>(&self) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        let capability = Capability::of::<T>();
        if !self.allowed.contains(&capability) {
            return Err(ContainerError::UndeclaredDependency {
                capability: self.scope.name,
                dependency: capability.name,
            });
        }

        self.registry
            .resolve(capability)
            .await?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                capability: capability.name,
            })
    }

    /// Capability being constructed
    pub fn scope(&self) -> Capability {
        self.scope
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    use resource_client::{ResourceError, testing::SpyResource};

    use super::*;

    #[derive(Debug)]
    struct Settings(u32);

    #[derive(Debug)]
    struct Service(u32);

    #[derive(Debug)]
    struct Client;

    /// Resource that records its name into a shared close log
    struct Logged {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Resource for Logged {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn ping(&self) -> Result<(), ResourceError> {
            Ok(())
        }

        async fn close(&self) {
            self.log.lock().expect("log lock").push(self.name);
        }
    }

    struct Outer(Logged);

    impl Resource for Outer {
        fn name(&self) -> &'static str {
            self.0.name
        }

        async fn ping(&self) -> Result<(), ResourceError> {
            Ok(())
        }

        async fn close(&self) {
            self.0.close().await;
        }
    }

    #[test]
    fn capability_names_are_short() {
        assert_eq!(Capability::of::<Settings>().name(), "Settings");
        assert_eq!(Capability::of::<String>().name(), "String");
    }

    #[tokio::test]
    async fn resolve_returns_the_same_instance() {
        let mut builder = ContainerBuilder::new();
        builder
            .instance(Settings(7))
            .unwrap()
            .register(&[Capability::of::<Settings>()], |r| async move {
                let settings = r.resolve::<Settings>().await?;
                anyhow::Ok(Service(settings.0 * 2))
            })
            .unwrap();
        let container = builder.build();

        let first = container.resolve::<Service>().await.unwrap();
        let second = container.resolve::<Service>().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.0, 14);
    }

    #[tokio::test]
    async fn construction_is_lazy_and_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut builder = ContainerBuilder::new();
        builder
            .register(&[], move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(Client)
                }
            })
            .unwrap();
        let container = builder.build();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        container.resolve::<Client>().await.unwrap();
        container.resolve::<Client>().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_resolution_constructs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut builder = ContainerBuilder::new();
        builder
            .register(&[], move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    anyhow::Ok(Client)
                }
            })
            .unwrap();
        let container = builder.build();

        let (a, b) = tokio::join!(container.resolve::<Client>(), container.resolve::<Client>());

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = ContainerBuilder::new();
        builder.instance(Settings(1)).unwrap();

        let err = builder.instance(Settings(2)).unwrap_err();
        assert!(matches!(
            err,
            ContainerError::AlreadyRegistered {
                capability: "Settings"
            }
        ));
    }

    #[test]
    fn dependencies_must_be_registered_first() {
        let mut builder = ContainerBuilder::new();

        let err = builder
            .register(&[Capability::of::<Settings>()], |_| async {
                anyhow::Ok(Service(0))
            })
            .err()
            .expect("settings is not registered");

        assert!(matches!(
            err,
            ContainerError::MissingDependency {
                capability: "Service",
                dependency: "Settings"
            }
        ));
        assert!(!builder.contains::<Service>());
    }

    #[tokio::test]
    async fn unknown_capability_is_not_registered() {
        let container = ContainerBuilder::new().build();

        let err = container.resolve::<Client>().await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::NotRegistered { capability: "Client" }
        ));
    }

    #[tokio::test]
    async fn undeclared_dependency_is_a_fault() {
        let mut builder = ContainerBuilder::new();
        builder
            .instance(Settings(1))
            .unwrap()
            .register(&[], |r| async move {
                r.resolve::<Settings>().await?;
                anyhow::Ok(Service(0))
            })
            .unwrap();
        let container = builder.build();

        let err = container.resolve::<Service>().await.unwrap_err();
        let ContainerError::Construction { capability, source } = err else {
            panic!("expected a construction error");
        };
        assert_eq!(capability, "Service");
        assert!(source.to_string().contains("undeclared dependency Settings"));
    }

    #[tokio::test]
    async fn failed_construction_names_the_capability_and_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut builder = ContainerBuilder::new();
        builder
            .register(&[], move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Client, _>(anyhow::anyhow!("backend unreachable"))
                }
            })
            .unwrap();
        let container = builder.build();

        let err = container.resolve::<Client>().await.unwrap_err();
        assert_eq!(err.to_string(), "failed to construct Client: backend unreachable");

        container.resolve::<Client>().await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dependency_failure_stops_dependents() {
        let mut builder = ContainerBuilder::new();
        builder
            .register(&[], |_| async {
                Err::<Settings, _>(anyhow::anyhow!("no settings"))
            })
            .unwrap()
            .register(&[Capability::of::<Settings>()], |_| async {
                anyhow::Ok(Service(0))
            })
            .unwrap();
        let container = builder.build();

        let err = container.resolve::<Service>().await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::Construction {
                capability: "Settings",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn resources_close_in_reverse_acquisition_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let inner_log = Arc::clone(&log);
        let outer_log = Arc::clone(&log);

        let mut builder = ContainerBuilder::new();
        builder
            .register_resource(&[], move |_| {
                let log = Arc::clone(&inner_log);
                async move { anyhow::Ok(Logged { name: "inner", log }) }
            })
            .unwrap()
            .register_resource(&[Capability::of::<Logged>()], move |r| {
                let log = Arc::clone(&outer_log);
                async move {
                    r.resolve::<Logged>().await?;
                    anyhow::Ok(Outer(Logged { name: "outer", log }))
                }
            })
            .unwrap();
        let container = builder.build();

        container.resolve::<Outer>().await.unwrap();
        container.close().await;

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn unconstructed_resources_are_not_closed() {
        let spy = SpyResource::healthy("spy");
        let registered = spy.clone();

        let mut builder = ContainerBuilder::new();
        builder
            .register_resource(&[], move |_| {
                let spy = registered.clone();
                async move { anyhow::Ok(spy) }
            })
            .unwrap();
        let container = builder.build();

        container.close().await;
        assert_eq!(spy.close_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_close_closes_once() {
        let spy = SpyResource::healthy("spy");
        let registered = spy.clone();

        let mut builder = ContainerBuilder::new();
        builder
            .register_resource(&[], move |_| {
                let spy = registered.clone();
                async move { anyhow::Ok(spy) }
            })
            .unwrap();
        let container = builder.build();
        container.resolve::<SpyResource>().await.unwrap();

        tokio::join!(container.close(), container.close());
        container.close().await;

        assert_eq!(spy.close_count(), 1);
    }
}
