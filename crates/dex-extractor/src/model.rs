//! Shared extraction model handle
//!
//! The model is loaded lazily on first use and shared by every pipeline call.
//! Loading is guarded so concurrent first use initializes it exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use dex_core::{DexError, Result};

use crate::{ExtractionModel, ModelLoader};

/// Lazily initialized, shareable extraction model
pub struct ModelHandle {
    loader: Arc<dyn ModelLoader>,
    model: RwLock<Option<Arc<dyn ExtractionModel>>>,
    init_guard: Mutex<()>,
    loads: AtomicUsize,
}

impl ModelHandle {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: RwLock::new(None),
            init_guard: Mutex::new(()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Handle around an already constructed model
    pub fn preloaded(model: Arc<dyn ExtractionModel>) -> Self {
        let handle = Self::new(Arc::new(FixedLoader(model.clone())));
        handle.loads.store(1, Ordering::SeqCst);
        Self {
            model: RwLock::new(Some(model)),
            ..handle
        }
    }

    /// The loaded model, loading it if needed.
    ///
    /// Fails with [`DexError::ModelUnavailable`] when loading fails; the next
    /// call retries.
    pub async fn get(&self) -> Result<Arc<dyn ExtractionModel>> {
        if let Some(model) = self.model.read().await.as_ref() {
            return Ok(model.clone());
        }

        let _guard = self.init_guard.lock().await;

        // Another caller may have finished loading while we waited
        if let Some(model) = self.model.read().await.as_ref() {
            return Ok(model.clone());
        }

        tracing::info!("Loading extraction model: {}", self.loader.describe());
        let model = self.loader.load().await.map_err(|e| match e {
            DexError::ModelUnavailable(msg) => DexError::ModelUnavailable(msg),
            other => DexError::ModelUnavailable(other.to_string()),
        })?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Extraction model loaded: {}", model.name());

        *self.model.write().await = Some(model.clone());
        Ok(model)
    }

    /// Load the model now instead of on first use
    pub async fn preload(&self) -> Result<()> {
        self.get().await.map(|_| ())
    }

    /// Drop the loaded model. Returns whether one was loaded.
    pub async fn unload(&self) -> bool {
        let _guard = self.init_guard.lock().await;
        let previous = self.model.write().await.take();
        if let Some(model) = &previous {
            tracing::info!("Unloaded extraction model: {}", model.name());
        }
        previous.is_some()
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Number of successful loads so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn describe(&self) -> String {
        self.loader.describe()
    }
}

/// Loader that hands out a fixed model
struct FixedLoader(Arc<dyn ExtractionModel>);

#[async_trait::async_trait]
impl ModelLoader for FixedLoader {
    async fn load(&self) -> Result<Arc<dyn ExtractionModel>> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("in-process model {}", self.0.name())
    }
}
