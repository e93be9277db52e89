//! Lazy model runtime adapter.
//!
//! Wraps a pluggable loader behind an idempotent `load()`. Concurrent
//! callers coalesce onto one in-flight load; a failed load parks the
//! runtime in `Failed` until someone explicitly calls `load()` again
//! (e.g. after a settings change). `unload()` drops the native resources
//! deterministically.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::ScreenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Produces a model instance, typically by mapping weights from disk or
/// allocating a native inference session.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    type Model: Send + Sync + 'static;

    async fn load(&self) -> Result<Self::Model, ScreenError>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        "model"
    }
}

pub struct ModelRuntime<L: ModelLoader> {
    loader: L,
    // Status is mirrored outside the slot lock so `status()` stays sync and
    // cheap while a load is in flight.
    status: RwLock<ModelStatus>,
    slot: tokio::sync::Mutex<Option<Arc<L::Model>>>,
}

impl<L: ModelLoader> ModelRuntime<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            status: RwLock::new(ModelStatus::Unloaded),
            slot: tokio::sync::Mutex::new(None),
        }
    }

    pub fn status(&self) -> ModelStatus {
        self.status.read().map(|s| *s).unwrap_or(ModelStatus::Failed)
    }

    fn set_status(&self, s: ModelStatus) {
        if let Ok(mut status) = self.status.write() {
            *status = s;
        }
    }

    /// Idempotent load. Callers arriving during an in-flight load wait on
    /// the slot lock and observe its outcome; a `Failed` runtime retries
    /// only through this explicit call.
    pub async fn load(&self) -> ModelStatus {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return ModelStatus::Loaded;
        }
        self.set_status(ModelStatus::Loading);
        match self.loader.load().await {
            Ok(model) => {
                *slot = Some(Arc::new(model));
                self.set_status(ModelStatus::Loaded);
                tracing::info!(model = self.loader.name(), "model loaded");
                ModelStatus::Loaded
            }
            Err(e) => {
                self.set_status(ModelStatus::Failed);
                tracing::warn!(model = self.loader.name(), error = %e, "model load failed, staying in fallback mode");
                ModelStatus::Failed
            }
        }
    }

    /// Handle to the loaded model, if any. Does not trigger a load.
    pub async fn get(&self) -> Option<Arc<L::Model>> {
        self.slot.lock().await.clone()
    }

    /// Load if never attempted, then return the model handle. A previous
    /// failure is sticky: returns `None` without retrying.
    pub async fn get_or_load(&self) -> Option<Arc<L::Model>> {
        match self.status() {
            ModelStatus::Loaded => self.get().await,
            ModelStatus::Failed => None,
            _ => {
                self.load().await;
                self.get().await
            }
        }
    }

    /// Release the model and any native resources it owns.
    pub async fn unload(&self) {
        let mut slot = self.slot.lock().await;
        *slot = None;
        self.set_status(ModelStatus::Unloaded);
        tracing::debug!(model = self.loader.name(), "model unloaded");
    }
}

/// Erases an opaque future type behind `dyn Future`. Awaiting
/// `ModelRuntime::get_or_load` directly inside another async fn trips a
/// spurious "`Send` is not general enough" error (rust-lang/rust#100013)
/// once that outer future is `tokio::spawn`ed; callers box it instead.
pub(crate) fn boxed<'a, T>(
    fut: impl std::future::Future<Output = T> + Send + 'a,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>> {
    Box::pin(fut)
}

type LoadFuture<M> = std::pin::Pin<Box<dyn std::future::Future<Output = Result<M, ScreenError>> + Send>>;

/// Loader built from a closure, for models only known as trait objects.
pub struct DynLoader<M> {
    name: &'static str,
    factory: Box<dyn Fn() -> LoadFuture<M> + Send + Sync>,
}

impl<M> DynLoader<M> {
    pub fn new<F>(name: &'static str, factory: F) -> Self
    where
        F: Fn() -> LoadFuture<M> + Send + Sync + 'static,
    {
        Self {
            name,
            factory: Box::new(factory),
        }
    }

    /// Loader that always yields an already-built model. Handy for tests
    /// and for in-process models with no native resources.
    pub fn ready<F>(name: &'static str, build: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Send + 'static,
    {
        Self::new(name, move || {
            let model = build();
            Box::pin(async move { Ok(model) })
        })
    }

    /// Loader that always fails; keeps a service permanently on its
    /// fallback path.
    pub fn unavailable(name: &'static str, reason: &'static str) -> Self
    where
        M: Send + 'static,
    {
        Self::new(name, move || {
            Box::pin(async move { Err(ScreenError::ModelLoad(reason.to_string())) })
        })
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> ModelLoader for DynLoader<M> {
    type Model = M;

    async fn load(&self) -> Result<M, ScreenError> {
        (self.factory)().await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
