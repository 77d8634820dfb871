//! Fixture mapping manager
//!
//! One manager per scope instance. Creation is single-flight per fixture type:
//! concurrent callers join the first caller's factory, and a failed factory is
//! remembered so it never runs twice. Disposal runs in reverse creation order.

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{Fixture, FixtureError, FixtureScope};
use crate::executor::aggregator::panic_message;
use crate::executor::ExceptionAggregator;

type Instance = Arc<dyn Any + Send + Sync>;
type Slot = Arc<OnceCell<Result<Instance, Arc<anyhow::Error>>>>;
type CreateFn =
    Arc<dyn Fn(Arc<FixtureMappingManager>) -> BoxFuture<'static, Result<(), FixtureError>> + Send + Sync>;

struct CreatedFixture {
    type_name: &'static str,
    fixture: Arc<dyn Fixture>,
}

/// Fixtures of one scope instance, with a link to the enclosing scope
pub struct FixtureMappingManager {
    scope: FixtureScope,
    unit: String,
    parent: Option<Arc<FixtureMappingManager>>,
    slots: RwLock<HashMap<TypeId, Slot>>,
    created: Mutex<Vec<CreatedFixture>>,
    disposed: AtomicBool,
}

impl FixtureMappingManager {
    pub fn new(scope: FixtureScope, unit: impl Into<String>) -> Self {
        Self {
            scope,
            unit: unit.into(),
            parent: None,
            slots: RwLock::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Nested scope that falls back to `parent` for lookups
    pub fn child_of(parent: Arc<FixtureMappingManager>, scope: FixtureScope, unit: impl Into<String>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(scope, unit)
        }
    }

    pub fn scope(&self) -> FixtureScope {
        self.scope
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Number of fixtures created in this scope so far
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cached instance of `T` in this scope, creating it with `factory` on
    /// first use. The factory runs at most once, even under concurrent first
    /// access; its failure is returned to every caller.
    pub async fn get_or_create<T, F, Fut>(&self, factory: F) -> Result<Arc<T>, FixtureError>
    where
        T: Fixture,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let type_name = std::any::type_name::<T>();
        if self.disposed.load(Ordering::Acquire) {
            return Err(FixtureError::Disposed(self.scope, self.unit.clone()));
        }

        let slot = self.slot(TypeId::of::<T>());
        let outcome = slot
            .get_or_init(|| async {
                debug!("Creating {} fixture {} for '{}'", self.scope, type_name, self.unit);
                match AssertUnwindSafe(async { factory().await }).catch_unwind().await {
                    Ok(Ok(value)) => {
                        let instance = Arc::new(value);
                        self.created
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(CreatedFixture {
                                type_name,
                                fixture: instance.clone(),
                            });
                        Ok(instance as Instance)
                    }
                    Ok(Err(err)) => Err(Arc::new(err)),
                    Err(payload) => Err(Arc::new(anyhow::anyhow!(
                        "fixture factory panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                }
            })
            .await;

        match outcome {
            Ok(instance) => instance
                .clone()
                .downcast::<T>()
                .map_err(|_| FixtureError::Missing(type_name, self.scope)),
            Err(cause) => Err(FixtureError::Creation {
                type_name,
                cause: cause.clone(),
            }),
        }
    }

    /// Look up `T` in this scope, then in enclosing scopes
    pub fn get<T: Fixture>(&self) -> Result<Arc<T>, FixtureError> {
        let type_name = std::any::type_name::<T>();
        let found = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            slots
                .get(&TypeId::of::<T>())
                .and_then(|slot| slot.get())
                .and_then(|outcome| outcome.as_ref().ok())
                .cloned()
        };

        match found {
            Some(instance) => instance
                .downcast::<T>()
                .map_err(|_| FixtureError::Missing(type_name, self.scope)),
            None => match &self.parent {
                Some(parent) => parent.get::<T>().map_err(|_| FixtureError::Missing(type_name, self.scope)),
                None => Err(FixtureError::Missing(type_name, self.scope)),
            },
        }
    }

    /// Create every declared fixture in order, stopping at the first failure
    pub async fn initialize(self: &Arc<Self>, definitions: &[FixtureDefinition]) -> Result<(), FixtureError> {
        for definition in definitions {
            (definition.create)(self.clone()).await?;
        }
        Ok(())
    }

    /// Dispose every fixture created in this scope, newest first. Failures go
    /// to the aggregator's cleanup set and never stop the remaining disposals.
    /// Only the first call does anything.
    pub async fn dispose_scope(&self, aggregator: &ExceptionAggregator) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let created = std::mem::take(&mut *self.created.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(
            "Disposing {} {} fixture(s) for '{}'",
            created.len(),
            self.scope,
            self.unit
        );

        for entry in created.into_iter().rev() {
            let type_name = entry.type_name;
            aggregator
                .run_cleanup_async(async move {
                    entry
                        .fixture
                        .dispose()
                        .await
                        .with_context(|| format!("Failed to dispose fixture {type_name}"))
                })
                .await;
        }

        if aggregator.has_cleanup_errors() {
            warn!("Fixture cleanup for {} '{}' reported failures", self.scope, self.unit);
        }

        self.slots.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn slot(&self, type_id: TypeId) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
        {
            return slot.clone();
        }

        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(type_id)
            .or_default()
            .clone()
    }
}

impl fmt::Debug for FixtureMappingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureMappingManager")
            .field("scope", &self.scope)
            .field("unit", &self.unit)
            .field("created", &self.created_count())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

/// Read access to the fixtures visible from one scope
#[derive(Clone, Debug)]
pub struct FixtureLookup(Arc<FixtureMappingManager>);

impl FixtureLookup {
    pub fn new(manager: Arc<FixtureMappingManager>) -> Self {
        Self(manager)
    }

    pub fn get<T: Fixture>(&self) -> Result<Arc<T>, FixtureError> {
        self.0.get::<T>()
    }
}

/// A fixture a scope declares, with the factory that builds it
#[derive(Clone)]
pub struct FixtureDefinition {
    type_name: &'static str,
    create: CreateFn,
}

impl FixtureDefinition {
    /// The factory receives a lookup so it can depend on fixtures of the same
    /// or an enclosing scope that were declared before it.
    pub fn new<T, F, Fut>(factory: F) -> Self
    where
        T: Fixture,
        F: Fn(FixtureLookup) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let factory = Arc::new(factory);
        let create: CreateFn = Arc::new(
            move |manager: Arc<FixtureMappingManager>| -> BoxFuture<'static, Result<(), FixtureError>> {
                let factory = factory.clone();
                Box::pin(async move {
                    let lookup = FixtureLookup::new(manager.clone());
                    manager
                        .get_or_create::<T, _, _>(move || factory(lookup))
                        .await
                        .map(|_| ())
                })
            },
        );

        Self {
            type_name: std::any::type_name::<T>(),
            create,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for FixtureDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FixtureDefinition").field(&self.type_name).finish()
    }
}
