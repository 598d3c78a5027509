//! Animation adapter.
//!
//! An [`AnimationLoader`] loads each (source, artboard) pair once through an
//! [`AnimationEngine`] and hands out cloneable [`AnimationHandle`]s to the
//! cached instance. Failed loads are reported and never cached.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

/// Callback invoked when a load fails.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Kind of a state-machine input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Trigger,
    Boolean,
    Number,
}

/// A loaded artboard with its state machines.
pub trait EngineInstance: Send {
    /// Kind of the input called `name`, if the state machine has one.
    fn input_kind(&self, name: &str) -> Option<InputKind>;

    /// Fire the input called `name`.
    fn fire(&mut self, name: &str);

    fn set_boolean(&mut self, name: &str, value: bool);

    fn set_number(&mut self, name: &str, value: f64);

    /// Release engine resources held by this instance.
    fn cleanup(&mut self);
}

/// The external animation runtime.
#[async_trait]
pub trait AnimationEngine: Send + Sync {
    /// One-time runtime setup. Called before the first load.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Load the artboard described by `request`.
    async fn load(&self, request: &LoadRequest) -> Result<Box<dyn EngineInstance>>;
}

/// What to load.
#[derive(Clone)]
pub struct LoadRequest {
    pub src: String,
    pub artboard: Option<String>,
    pub state_machines: Vec<String>,
    pub autoplay: bool,
    pub on_error: Option<ErrorCallback>,
}

impl LoadRequest {
    /// Load the default artboard of `src`, autoplaying.
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            artboard: None,
            state_machines: Vec::new(),
            autoplay: true,
            on_error: None,
        }
    }

    pub fn artboard(mut self, artboard: impl Into<String>) -> Self {
        self.artboard = Some(artboard.into());
        self
    }

    pub fn state_machine(mut self, name: impl Into<String>) -> Self {
        self.state_machines.push(name.into());
        self
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Cache key for this request.
    pub fn cache_key(&self) -> String {
        cache_key(&self.src, self.artboard.as_deref())
    }
}

impl std::fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRequest")
            .field("src", &self.src)
            .field("artboard", &self.artboard)
            .field("state_machines", &self.state_machines)
            .field("autoplay", &self.autoplay)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

fn cache_key(src: &str, artboard: Option<&str>) -> String {
    format!("{}-{}", src, artboard.unwrap_or("default"))
}

type Cache = Mutex<HashMap<String, AnimationHandle>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared reference to a loaded instance.
///
/// Clones refer to the same instance. After [`cleanup`](Self::cleanup) every
/// clone becomes inert.
#[derive(Clone)]
pub struct AnimationHandle {
    key: Arc<str>,
    instance: Arc<Mutex<Option<Box<dyn EngineInstance>>>>,
    cache: Weak<Cache>,
}

impl AnimationHandle {
    fn new(key: &str, instance: Box<dyn EngineInstance>, cache: Weak<Cache>) -> Self {
        Self {
            key: Arc::from(key),
            instance: Arc::new(Mutex::new(Some(instance))),
            cache,
        }
    }

    /// Cache key this handle was loaded under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fire the input called `name`; a no-op if there is none.
    pub fn trigger(&self, name: &str) {
        let mut guard = lock(&self.instance);
        match guard.as_mut() {
            Some(instance) if instance.input_kind(name).is_some() => instance.fire(name),
            Some(_) => debug!(key = %self.key, input = name, "no such input"),
            None => debug!(key = %self.key, "trigger on released instance"),
        }
    }

    /// Set a boolean input; ignored unless the input is boolean.
    pub fn set_boolean(&self, name: &str, value: bool) {
        let mut guard = lock(&self.instance);
        if let Some(instance) = guard.as_mut() {
            if instance.input_kind(name) == Some(InputKind::Boolean) {
                instance.set_boolean(name, value);
            }
        }
    }

    /// Set a number input; ignored unless the input is numeric.
    pub fn set_number(&self, name: &str, value: f64) {
        let mut guard = lock(&self.instance);
        if let Some(instance) = guard.as_mut() {
            if instance.input_kind(name) == Some(InputKind::Number) {
                instance.set_number(name, value);
            }
        }
    }

    /// Whether the engine instance has been released.
    pub fn is_released(&self) -> bool {
        lock(&self.instance).is_none()
    }

    /// Release the engine instance and evict it from the loader's cache.
    pub fn cleanup(&self) {
        self.release();

        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let mut cache = lock(&cache);
        if cache
            .get(self.key.as_ref())
            .is_some_and(|cached| Arc::ptr_eq(&cached.instance, &self.instance))
        {
            cache.remove(self.key.as_ref());
        }
    }

    fn release(&self) {
        if let Some(mut instance) = lock(&self.instance).take() {
            instance.cleanup();
        }
    }
}

impl std::fmt::Debug for AnimationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationHandle")
            .field("key", &self.key)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Loads animations through an engine and caches the results.
pub struct AnimationLoader {
    engine: Arc<dyn AnimationEngine>,
    ready: OnceCell<()>,
    cache: Arc<Cache>,
}

impl AnimationLoader {
    pub fn new(engine: Arc<dyn AnimationEngine>) -> Self {
        Self {
            engine,
            ready: OnceCell::new(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load `request`, returning the cached handle when one exists.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when initialization or loading fails. The
    /// request's error callback is invoked first.
    pub async fn load(&self, request: LoadRequest) -> Result<AnimationHandle> {
        let key = request.cache_key();
        if let Some(handle) = lock(&self.cache).get(&key) {
            debug!(key = %key, "animation cache hit");
            return Ok(handle.clone());
        }

        let loaded = match self.ensure_initialized().await {
            Ok(()) => self.engine.load(&request).await,
            Err(e) => Err(e),
        };
        let instance = match loaded {
            Ok(instance) => instance,
            Err(e) => {
                error!(src = %request.src, error = %e, "failed to load animation");
                if let Some(on_error) = &request.on_error {
                    on_error(&e);
                }
                return Err(e);
            }
        };

        let handle = AnimationHandle::new(&key, instance, Arc::downgrade(&self.cache));
        let existing = {
            let mut cache = lock(&self.cache);
            match cache.get(&key) {
                Some(existing) => Some(existing.clone()),
                None => {
                    cache.insert(key.clone(), handle.clone());
                    None
                }
            }
        };

        match existing {
            Some(existing) => {
                debug!(key = %key, "concurrent load finished first, releasing duplicate");
                handle.release();
                Ok(existing)
            }
            None => Ok(handle),
        }
    }

    /// The cached handle for `src` and `artboard`, if loaded.
    pub fn instance(&self, src: &str, artboard: Option<&str>) -> Option<AnimationHandle> {
        lock(&self.cache).get(&cache_key(src, artboard)).cloned()
    }

    /// Number of cached instances.
    pub fn loaded_count(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Release every cached instance.
    pub fn cleanup_all(&self) {
        let handles: Vec<AnimationHandle> = lock(&self.cache).drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.release();
        }
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.engine.initialize().await.inspect_err(|e| {
                    warn!(error = %e, "animation engine failed to initialize");
                })
            })
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for AnimationLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationLoader")
            .field("loaded", &self.loaded_count())
            .finish_non_exhaustive()
    }
}
