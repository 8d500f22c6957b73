// ABOUTME: Server-side extension hooks: prioritized event handlers, services and jobs.
// ABOUTME: HookRegistry collects them from active extensions and dispatches events.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{ExtensionError, Result};
use crate::registry::ExtensionRegistry;

/// Reacts to a named event
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &str, payload: &Value) -> anyhow::Result<()>;
}

/// A background service with an optional start/stop lifecycle
#[async_trait]
pub trait Service: Send + Sync {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A unit of work an extension exposes to be run by id
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct EventHook {
    pub event: String,
    /// Lower runs first
    pub priority: i32,
    pub handler: Arc<dyn EventHandler>,
}

#[derive(Clone)]
pub struct ServiceHook {
    pub name: String,
    pub service: Arc<dyn Service>,
}

#[derive(Clone)]
pub struct JobHook {
    pub name: String,
    /// Run once as soon as the extension's hooks are registered
    pub immediate: bool,
    pub job: Arc<dyn Job>,
}

/// Hooks contributed by one extension
#[derive(Clone, Default)]
pub struct Hooks {
    pub events: Vec<EventHook>,
    pub services: Vec<ServiceHook>,
    pub jobs: Vec<JobHook>,
}

impl Hooks {
    pub fn on(mut self, event: impl Into<String>, priority: i32, handler: Arc<dyn EventHandler>) -> Self {
        self.events.push(EventHook {
            event: event.into(),
            priority,
            handler,
        });
        self
    }

    pub fn service(mut self, name: impl Into<String>, service: Arc<dyn Service>) -> Self {
        self.services.push(ServiceHook {
            name: name.into(),
            service,
        });
        self
    }

    pub fn job(mut self, name: impl Into<String>, immediate: bool, job: Arc<dyn Job>) -> Self {
        self.jobs.push(JobHook {
            name: name.into(),
            immediate,
            job,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.services.is_empty() && self.jobs.is_empty()
    }
}

#[derive(Clone)]
struct RegisteredHandler {
    extension: String,
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

#[derive(Clone)]
struct RegisteredService {
    id: String,
    service: Arc<dyn Service>,
}

#[derive(Clone)]
struct RegisteredJob {
    id: String,
    extension: String,
    job: Arc<dyn Job>,
}

/// Dispatches events to handlers of registered extensions and owns their services.
pub struct HookRegistry {
    registry: ExtensionRegistry,
    handlers: RwLock<HashMap<String, Vec<RegisteredHandler>>>,
    services: RwLock<Vec<RegisteredService>>,
    jobs: RwLock<Vec<RegisteredJob>>,
    registered: RwLock<HashSet<String>>,
}

impl HookRegistry {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self {
            registry,
            handlers: RwLock::new(HashMap::new()),
            services: RwLock::new(Vec::new()),
            jobs: RwLock::new(Vec::new()),
            registered: RwLock::new(HashSet::new()),
        }
    }

    /// Collect hooks from every active extension not seen yet.
    ///
    /// An extension whose hooks fail to register is deactivated, put in the
    /// error state and skipped; the rest still register.
    pub async fn initialize(&self) {
        for (id, module) in self.registry.active_modules() {
            let Err(err) = self.register_extension(&id, module.hooks()).await else {
                continue;
            };
            tracing::error!(extension = %id, error = %err, "Skipping extension hooks");
            if let Err(e) = self.registry.deactivate(&id).await {
                tracing::warn!(extension = %id, error = %e, "Failed to deactivate");
            }
            self.registry.mark_failed(&id, &err);
        }
    }

    /// Register one extension's hooks, starting its services and running its
    /// immediate jobs. A second call for the same extension is a no-op.
    ///
    /// If a service fails to start, services already started for this
    /// extension are stopped and none of its hooks stay registered.
    pub async fn register_extension(&self, extension_id: &str, hooks: Hooks) -> Result<()> {
        if !self
            .registered
            .write()
            .expect("lock poisoned")
            .insert(extension_id.to_string())
        {
            return Ok(());
        }

        let mut started = Vec::with_capacity(hooks.services.len());
        for hook in hooks.services {
            let id = format!("{extension_id}.{}", hook.name);
            if let Err(e) = hook.service.start().await {
                self.rollback(extension_id, started).await;
                return Err(ExtensionError::ServiceFailed {
                    id,
                    reason: e.to_string(),
                });
            }
            tracing::info!(service = %id, "Started extension service");
            started.push(RegisteredService {
                id,
                service: hook.service,
            });
        }
        self.services.write().expect("lock poisoned").extend(started);

        {
            let mut handlers = self.handlers.write().expect("lock poisoned");
            for hook in hooks.events {
                let list = handlers.entry(hook.event).or_default();
                list.push(RegisteredHandler {
                    extension: extension_id.to_string(),
                    priority: hook.priority,
                    handler: hook.handler,
                });
                list.sort_by_key(|h| h.priority);
            }
        }

        let mut immediate = Vec::new();
        {
            let mut jobs = self.jobs.write().expect("lock poisoned");
            for hook in hooks.jobs {
                let id = format!("{extension_id}.{}", hook.name);
                if hook.immediate {
                    immediate.push(id.clone());
                }
                jobs.push(RegisteredJob {
                    id,
                    extension: extension_id.to_string(),
                    job: hook.job,
                });
            }
        }
        for id in immediate {
            if let Err(e) = self.run_job(&id).await {
                tracing::error!(job = %id, error = %e, "Immediate job failed");
            }
        }
        Ok(())
    }

    async fn rollback(&self, extension_id: &str, started: Vec<RegisteredService>) {
        for registered in started {
            if let Err(e) = registered.service.stop().await {
                tracing::warn!(service = %registered.id, error = %e, "Service failed to stop");
            }
        }
        self.registered
            .write()
            .expect("lock poisoned")
            .remove(extension_id);
    }

    /// Number of handlers listening for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .expect("lock poisoned")
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Run every handler for `event` in priority order.
    ///
    /// Handler failures are logged, not returned. Handlers whose extension has
    /// since been unregistered are skipped.
    pub async fn emit(&self, event: &str, payload: &Value) {
        let handlers = self
            .handlers
            .read()
            .expect("lock poisoned")
            .get(event)
            .cloned()
            .unwrap_or_default();

        for registered in handlers {
            if !self.registry.contains(&registered.extension) {
                tracing::debug!(extension = %registered.extension, event, "Skipping handler of unregistered extension");
                continue;
            }
            if let Err(e) = registered.handler.handle(event, payload).await {
                tracing::error!(
                    extension = %registered.extension,
                    event,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }

    /// Run a job by its full "{extension}.{job}" id
    pub async fn run_job(&self, id: &str) -> Result<()> {
        let registered = self
            .jobs
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| ExtensionError::JobNotFound(id.to_string()))?;

        if !self.registry.contains(&registered.extension) {
            return Err(ExtensionError::NotFound(registered.extension));
        }
        registered.job.run().await.map_err(|e| {
            tracing::error!(job = %id, error = %e, "Job failed");
            ExtensionError::JobFailed {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;
        tracing::debug!(job = %id, "Job finished");
        Ok(())
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|j| j.id.clone())
            .collect()
    }

    /// Look up a service by its full "{extension}.{service}" id
    pub fn service(&self, id: &str) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.service.clone())
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    /// Stop every service and forget all hooks and jobs
    pub async fn shutdown(&self) {
        let services = std::mem::take(&mut *self.services.write().expect("lock poisoned"));
        for registered in services {
            match registered.service.stop().await {
                Ok(()) => tracing::info!(service = %registered.id, "Stopped extension service"),
                Err(e) => {
                    tracing::warn!(service = %registered.id, error = %e, "Service failed to stop")
                }
            }
        }
        self.handlers.write().expect("lock poisoned").clear();
        self.jobs.write().expect("lock poisoned").clear();
        self.registered.write().expect("lock poisoned").clear();
    }
}
