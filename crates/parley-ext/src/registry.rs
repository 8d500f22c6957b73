// ABOUTME: ExtensionRegistry tracks extensions through inactive, loading, active, error and disabled.
// ABOUTME: Loads are deduplicated per extension; lifecycle changes are broadcast as RegistryEvents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::error::{ExtensionError, Result};
use crate::hooks::Hooks;
use crate::manifest::{ExtensionManifest, PointKind};
use crate::plugin::Plugin;

/// Lifecycle state of a registered extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionStatus {
    Inactive,
    Loading,
    Active,
    Error,
    Disabled,
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtensionStatus::Inactive => "inactive",
            ExtensionStatus::Loading => "loading",
            ExtensionStatus::Active => "active",
            ExtensionStatus::Error => "error",
            ExtensionStatus::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a registered extension
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub manifest: ExtensionManifest,
    pub status: ExtensionStatus,
    pub error: Option<String>,
    pub config: Map<String, Value>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Extension {
    fn new(manifest: ExtensionManifest) -> Self {
        Self {
            manifest,
            status: ExtensionStatus::Inactive,
            error: None,
            config: Map::new(),
            loaded_at: None,
            activated_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn is_active(&self) -> bool {
        self.status == ExtensionStatus::Active
    }
}

/// What a module sees when activated or deactivated
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    pub extension: Extension,
    pub dev_mode: bool,
}

impl ExtensionContext {
    pub fn id(&self) -> &str {
        self.extension.id()
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.extension.config
    }

    /// Debug output, only in development mode
    pub fn debug(&self, message: &str) {
        if self.dev_mode {
            tracing::debug!(extension = %self.id(), "{message}");
        }
    }

    pub fn info(&self, message: &str) {
        tracing::info!(extension = %self.id(), "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(extension = %self.id(), "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(extension = %self.id(), "{message}");
    }
}

/// A loaded extension's code.
#[async_trait]
pub trait ExtensionModule: Send + Sync {
    async fn activate(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&self, _ctx: &ExtensionContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// UI contributions
    fn plugin(&self) -> Plugin {
        Plugin::default()
    }

    /// Event handlers and services
    fn hooks(&self) -> Hooks {
        Hooks::default()
    }
}

/// Produces an extension's module on demand.
#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<Arc<dyn ExtensionModule>>;
}

/// Loader for a module that is already in memory
pub struct StaticLoader(pub Arc<dyn ExtensionModule>);

#[async_trait]
impl ExtensionLoader for StaticLoader {
    async fn load(&self) -> anyhow::Result<Arc<dyn ExtensionModule>> {
        Ok(self.0.clone())
    }
}

struct FnLoader<F>(F);

#[async_trait]
impl<F, Fut> ExtensionLoader for FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Arc<dyn ExtensionModule>>> + Send + 'static,
{
    async fn load(&self) -> anyhow::Result<Arc<dyn ExtensionModule>> {
        (self.0)().await
    }
}

/// Wrap an async closure as a loader
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn ExtensionLoader>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Arc<dyn ExtensionModule>>> + Send + 'static,
{
    Arc::new(FnLoader(f))
}

/// Registry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// When false, registering an extension with a loader loads it immediately
    pub load_on_demand: bool,
    /// Enforce `allowed_permissions` against manifests
    pub enable_sandbox: bool,
    /// Permissions granted under the sandbox; "*" grants all
    pub allowed_permissions: Vec<String>,
    pub dev_mode: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            load_on_demand: false,
            enable_sandbox: false,
            allowed_permissions: Vec::new(),
            dev_mode: false,
        }
    }
}

/// A registered extension point
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionPoint {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: PointKind,
}

impl ExtensionPoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: PointKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            kind,
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered(String),
    Loaded(String),
    Activated(String),
    Deactivated(String),
    Unregistered(String),
    Error { id: String, error: String },
    PointRegistered(String),
    PointUnregistered(String),
}

type LoadFuture = Shared<BoxFuture<'static, Result<()>>>;

struct Entry {
    extension: Extension,
    loader: Option<Arc<dyn ExtensionLoader>>,
    module: Option<Arc<dyn ExtensionModule>>,
}

struct Inner {
    config: RegistryConfig,
    // In registration order
    entries: RwLock<Vec<Entry>>,
    points: RwLock<Vec<ExtensionPoint>>,
    loads: Mutex<HashMap<String, LoadFuture>>,
    events: broadcast::Sender<RegistryEvent>,
}

/// Tracks extensions and extension points. Cheap to clone.
#[derive(Clone)]
pub struct ExtensionRegistry {
    inner: Arc<Inner>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ExtensionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                entries: RwLock::new(Vec::new()),
                points: RwLock::new(Vec::new()),
                loads: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn with_entry<T>(&self, id: &str, f: impl FnOnce(&mut Entry) -> T) -> Result<T> {
        let mut entries = self.inner.entries.write().expect("lock poisoned");
        let entry = entries
            .iter_mut()
            .find(|e| e.extension.manifest.id == id)
            .ok_or_else(|| ExtensionError::NotFound(id.to_string()))?;
        Ok(f(entry))
    }

    fn context(&self, id: &str) -> Result<ExtensionContext> {
        let extension = self.get(id).ok_or_else(|| ExtensionError::NotFound(id.to_string()))?;
        Ok(ExtensionContext {
            extension,
            dev_mode: self.inner.config.dev_mode,
        })
    }

    fn check_permissions(&self, manifest: &ExtensionManifest) -> Result<()> {
        let config = &self.inner.config;
        if !config.enable_sandbox || config.allowed_permissions.iter().any(|p| p == "*") {
            return Ok(());
        }
        match manifest
            .permissions
            .iter()
            .find(|p| !config.allowed_permissions.contains(p))
        {
            Some(permission) => Err(ExtensionError::PermissionDenied {
                id: manifest.id.clone(),
                permission: permission.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Register an extension. Unless `load_on_demand` is set, an extension
    /// with a loader is loaded and activated before this returns.
    pub async fn register(
        &self,
        manifest: ExtensionManifest,
        loader: Option<Arc<dyn ExtensionLoader>>,
    ) -> Result<Extension> {
        manifest.validate()?;
        self.check_permissions(&manifest)?;

        let id = manifest.id.clone();
        let has_loader = loader.is_some();
        {
            let mut entries = self.inner.entries.write().expect("lock poisoned");
            if entries.iter().any(|e| e.extension.manifest.id == id) {
                return Err(ExtensionError::AlreadyRegistered(id));
            }
            entries.push(Entry {
                extension: Extension::new(manifest),
                loader,
                module: None,
            });
        }

        tracing::info!(extension = %id, "Registered extension");
        self.emit(RegistryEvent::Registered(id.clone()));

        if has_loader && !self.inner.config.load_on_demand {
            return self.load(&id).await;
        }
        self.get(&id).ok_or(ExtensionError::NotFound(id))
    }

    /// Load and activate an extension.
    ///
    /// Concurrent calls for the same extension share one load. Loading an
    /// already active extension returns it unchanged.
    pub async fn load(&self, id: &str) -> Result<Extension> {
        let current = self.get(id).ok_or_else(|| ExtensionError::NotFound(id.to_string()))?;
        match current.status {
            ExtensionStatus::Active => return Ok(current),
            ExtensionStatus::Disabled => return Err(ExtensionError::Disabled(id.to_string())),
            _ => {}
        }

        let load = {
            let mut loads = self.inner.loads.lock().expect("lock poisoned");
            loads
                .entry(id.to_string())
                .or_insert_with(|| {
                    let registry = self.clone();
                    let id = id.to_string();
                    async move {
                        let result = registry.run_load(&id).await;
                        registry
                            .inner
                            .loads
                            .lock()
                            .expect("lock poisoned")
                            .remove(&id);
                        result
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        load.await?;
        self.get(id).ok_or_else(|| ExtensionError::NotFound(id.to_string()))
    }

    async fn run_load(&self, id: &str) -> Result<()> {
        let span = tracing::info_span!("extension", id = %id);
        self.load_module(id).instrument(span).await
    }

    async fn load_module(&self, id: &str) -> Result<()> {
        let loader = self.with_entry(id, |entry| {
            entry.extension.status = ExtensionStatus::Loading;
            entry.extension.error = None;
            entry.loader.clone()
        })?;

        let Some(loader) = loader else {
            let err = ExtensionError::NoLoader(id.to_string());
            self.fail(id, &err);
            return Err(err);
        };

        let module = match loader.load().await {
            Ok(module) => module,
            Err(e) => {
                let err = ExtensionError::LoadFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                };
                self.fail(id, &err);
                return Err(err);
            }
        };

        // Disabled while the loader ran
        let installed = self.with_entry(id, |entry| {
            if entry.extension.status != ExtensionStatus::Loading {
                return false;
            }
            entry.module = Some(module);
            entry.extension.status = ExtensionStatus::Active;
            entry.extension.loaded_at = Some(Utc::now());
            true
        })?;
        if !installed {
            tracing::info!("Discarding module of extension disabled during load");
            return Err(ExtensionError::Disabled(id.to_string()));
        }
        tracing::info!("Loaded extension");
        self.emit(RegistryEvent::Loaded(id.to_string()));

        if let Err(err) = self.activate(id).await {
            self.fail(id, &err);
            return Err(err);
        }
        Ok(())
    }

    /// Put an extension into the error state and drop its module. A disabled
    /// extension stays disabled but records the error.
    pub fn mark_failed(&self, id: &str, err: &ExtensionError) {
        self.fail(id, err);
    }

    fn fail(&self, id: &str, err: &ExtensionError) {
        tracing::error!(extension = %id, error = %err, "Extension failed");
        let _ = self.with_entry(id, |entry| {
            entry.module = None;
            if entry.extension.status != ExtensionStatus::Disabled {
                entry.extension.status = ExtensionStatus::Error;
            }
            entry.extension.error = Some(err.to_string());
        });
        self.emit(RegistryEvent::Error {
            id: id.to_string(),
            error: err.to_string(),
        });
    }

    /// Run a loaded extension's activate hook
    pub async fn activate(&self, id: &str) -> Result<()> {
        let (status, module) =
            self.with_entry(id, |entry| (entry.extension.status, entry.module.clone()))?;
        let module = match (status, module) {
            (ExtensionStatus::Active, Some(module)) => module,
            _ => return Err(ExtensionError::NotLoaded(id.to_string())),
        };

        let ctx = self.context(id)?;
        module
            .activate(&ctx)
            .await
            .map_err(|e| ExtensionError::LifecycleFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        self.with_entry(id, |entry| entry.extension.activated_at = Some(Utc::now()))?;
        tracing::info!(extension = %id, "Activated extension");
        self.emit(RegistryEvent::Activated(id.to_string()));
        Ok(())
    }

    /// Run the deactivate hook and return the extension to inactive
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let module = self.with_entry(id, |entry| entry.module.clone())?;
        if let Some(module) = module {
            let ctx = self.context(id)?;
            module
                .deactivate(&ctx)
                .await
                .map_err(|e| ExtensionError::LifecycleFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
        }

        self.with_entry(id, |entry| {
            entry.module = None;
            entry.extension.activated_at = None;
            if entry.extension.status == ExtensionStatus::Active {
                entry.extension.status = ExtensionStatus::Inactive;
            }
        })?;
        tracing::info!(extension = %id, "Deactivated extension");
        self.emit(RegistryEvent::Deactivated(id.to_string()));
        Ok(())
    }

    /// Deactivate if needed and block further loads
    pub async fn disable(&self, id: &str) -> Result<()> {
        let status = self.with_entry(id, |entry| entry.extension.status)?;
        if status == ExtensionStatus::Active {
            self.deactivate(id).await?;
        }
        self.with_entry(id, |entry| entry.extension.status = ExtensionStatus::Disabled)?;
        tracing::info!(extension = %id, "Disabled extension");
        Ok(())
    }

    /// Allow a disabled extension to load again
    pub fn enable(&self, id: &str) -> Result<()> {
        self.with_entry(id, |entry| {
            if entry.extension.status == ExtensionStatus::Disabled {
                entry.extension.status = ExtensionStatus::Inactive;
            }
        })
    }

    /// Remove an extension, deactivating it first. Unknown ids are ignored.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let Some(extension) = self.get(id) else {
            return Ok(());
        };
        if extension.is_active() {
            self.deactivate(id).await?;
        }

        self.inner
            .entries
            .write()
            .expect("lock poisoned")
            .retain(|e| e.extension.manifest.id != id);
        tracing::info!(extension = %id, "Unregistered extension");
        self.emit(RegistryEvent::Unregistered(id.to_string()));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Extension> {
        self.inner
            .entries
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|e| e.extension.manifest.id == id)
            .map(|e| e.extension.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All extensions in registration order
    pub fn all(&self) -> Vec<Extension> {
        self.inner
            .entries
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|e| e.extension.clone())
            .collect()
    }

    pub fn by_status(&self, status: ExtensionStatus) -> Vec<Extension> {
        self.all()
            .into_iter()
            .filter(|e| e.status == status)
            .collect()
    }

    /// The loaded module of an active extension
    pub fn module(&self, id: &str) -> Option<Arc<dyn ExtensionModule>> {
        self.inner
            .entries
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|e| e.extension.manifest.id == id && e.extension.is_active())
            .and_then(|e| e.module.clone())
    }

    /// Active modules in registration order
    pub fn active_modules(&self) -> Vec<(String, Arc<dyn ExtensionModule>)> {
        self.inner
            .entries
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|e| e.extension.is_active())
            .filter_map(|e| Some((e.extension.manifest.id.clone(), e.module.clone()?)))
            .collect()
    }

    /// Shallow-merge `config` into the extension's config
    pub fn update_config(&self, id: &str, config: Map<String, Value>) -> Result<()> {
        self.with_entry(id, |entry| entry.extension.config.extend(config))
    }

    pub fn register_point(&self, point: ExtensionPoint) -> Result<()> {
        let mut points = self.inner.points.write().expect("lock poisoned");
        if points.iter().any(|p| p.id == point.id) {
            return Err(ExtensionError::PointAlreadyExists(point.id));
        }
        let id = point.id.clone();
        points.push(point);
        drop(points);

        tracing::debug!(point = %id, "Registered extension point");
        self.emit(RegistryEvent::PointRegistered(id));
        Ok(())
    }

    /// Returns whether the point existed
    pub fn unregister_point(&self, id: &str) -> bool {
        let mut points = self.inner.points.write().expect("lock poisoned");
        let before = points.len();
        points.retain(|p| p.id != id);
        let removed = points.len() != before;
        drop(points);

        if removed {
            self.emit(RegistryEvent::PointUnregistered(id.to_string()));
        }
        removed
    }

    pub fn point(&self, id: &str) -> Option<ExtensionPoint> {
        self.inner
            .points
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn points(&self) -> Vec<ExtensionPoint> {
        self.inner.points.read().expect("lock poisoned").clone()
    }

    /// Extensions that declare or consume a point
    pub fn extensions_for_point(&self, point_id: &str) -> Vec<Extension> {
        self.all()
            .into_iter()
            .filter(|e| e.manifest.touches_point(point_id))
            .collect()
    }
}
