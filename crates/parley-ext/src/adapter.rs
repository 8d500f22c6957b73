// ABOUTME: Boots the extension system from configuration into a ready ExtensionHost.
// ABOUTME: Resolves configured and discovered extensions, loads them and composes the plugin table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ExtensionError, Result};
use crate::hooks::HookRegistry;
use crate::manifest::{ExtensionManifest, MANIFEST_FILE};
use crate::plugin::{Plugin, PluginTable};
use crate::registry::{
    ExtensionLoader, ExtensionModule, ExtensionRegistry, ExtensionStatus, RegistryConfig,
    StaticLoader,
};

/// The `[extensions]` configuration section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Scan `search_paths` for extension directories
    pub auto_discovery: bool,
    pub search_paths: Vec<PathBuf>,
    pub development: DevelopmentConfig,
    #[serde(rename = "extension")]
    pub extensions: Vec<ExtensionDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevelopmentConfig {
    pub hot_reload: bool,
    pub enable_debug_mode: bool,
}

/// One configured extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDefinition {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory holding an `extension.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl ExtensionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            path: None,
            config: Map::new(),
        }
    }
}

impl ExtensionsConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ExtensionError::Config(e.to_string()))
    }
}

/// Supplies manifests and code for extensions by id.
pub trait ModuleResolver: Send + Sync {
    /// Manifest for an extension that has no directory on disk
    fn manifest(&self, id: &str) -> Option<ExtensionManifest>;

    fn loader(&self, id: &str) -> Option<Arc<dyn ExtensionLoader>>;
}

/// Resolves extensions compiled into the binary
#[derive(Default, Clone)]
pub struct BuiltinResolver {
    modules: HashMap<String, (ExtensionManifest, Arc<dyn ExtensionModule>)>,
}

impl BuiltinResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, manifest: ExtensionManifest, module: Arc<dyn ExtensionModule>) -> Self {
        self.modules.insert(manifest.id.clone(), (manifest, module));
        self
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.modules.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ModuleResolver for BuiltinResolver {
    fn manifest(&self, id: &str) -> Option<ExtensionManifest> {
        self.modules.get(id).map(|(manifest, _)| manifest.clone())
    }

    fn loader(&self, id: &str) -> Option<Arc<dyn ExtensionLoader>> {
        self.modules
            .get(id)
            .map(|(_, module)| Arc::new(StaticLoader(module.clone())) as Arc<dyn ExtensionLoader>)
    }
}

/// Read every `*/extension.json` under `dirs`. Unreadable manifests are logged and skipped.
pub fn discover(dirs: &[PathBuf]) -> Vec<(PathBuf, ExtensionManifest)> {
    let mut found = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Skipping extension search path");
                continue;
            }
        };
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.join(MANIFEST_FILE).is_file())
            .collect();
        paths.sort();

        for path in paths {
            match ExtensionManifest::from_dir(&path) {
                Ok(manifest) => found.push((path, manifest)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring extension"),
            }
        }
    }
    found
}

/// A booted extension system
pub struct ExtensionHost {
    registry: ExtensionRegistry,
    hooks: HookRegistry,
    table: PluginTable,
}

impl ExtensionHost {
    /// Register, configure and load every enabled extension, then compose
    /// `static_plugins` followed by each active extension's plugin.
    ///
    /// An extension that fails at any step is logged and left out.
    pub async fn initialize(
        config: &ExtensionsConfig,
        static_plugins: Vec<Plugin>,
        resolver: &dyn ModuleResolver,
    ) -> Self {
        let registry = ExtensionRegistry::new(RegistryConfig {
            load_on_demand: true,
            enable_sandbox: false,
            allowed_permissions: vec!["*".to_string()],
            dev_mode: config.development.enable_debug_mode,
        });
        if config.development.hot_reload {
            tracing::warn!("Hot reload is not supported for compiled-in extensions; ignoring");
        }

        for definition in &config.extensions {
            let manifest = match Self::definition_manifest(definition, resolver) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(extension = %definition.name, error = %e, "Skipping extension");
                    continue;
                }
            };
            Self::install(&registry, manifest, definition, resolver).await;
        }

        if config.auto_discovery {
            for (path, manifest) in discover(&config.search_paths) {
                if registry.contains(&manifest.id) {
                    continue;
                }
                tracing::debug!(path = %path.display(), extension = %manifest.id, "Discovered extension");
                let definition = ExtensionDefinition::new(manifest.id.clone());
                Self::install(&registry, manifest, &definition, resolver).await;
            }
        }

        let hooks = HookRegistry::new(registry.clone());
        hooks.initialize().await;

        let plugins = static_plugins
            .into_iter()
            .chain(registry.active_modules().into_iter().map(|(_, m)| m.plugin()));
        let table = PluginTable::compose(plugins);

        tracing::info!(
            active = registry.active_modules().len(),
            routes = table.routes.len(),
            "Extension host ready"
        );

        Self {
            registry,
            hooks,
            table,
        }
    }

    fn definition_manifest(
        definition: &ExtensionDefinition,
        resolver: &dyn ModuleResolver,
    ) -> Result<ExtensionManifest> {
        match &definition.path {
            Some(path) => ExtensionManifest::from_dir(path),
            None => resolver
                .manifest(&definition.name)
                .ok_or_else(|| ExtensionError::NotFound(definition.name.clone())),
        }
    }

    async fn install(
        registry: &ExtensionRegistry,
        manifest: ExtensionManifest,
        definition: &ExtensionDefinition,
        resolver: &dyn ModuleResolver,
    ) {
        let id = manifest.id.clone();
        let loader = resolver.loader(&id);
        let has_loader = loader.is_some();

        if let Err(e) = registry.register(manifest, loader).await {
            tracing::error!(extension = %id, error = %e, "Failed to register extension");
            return;
        }
        if let Err(e) = registry.update_config(&id, definition.config.clone()) {
            tracing::error!(extension = %id, error = %e, "Failed to apply extension config");
            return;
        }

        if !definition.enabled {
            if let Err(e) = registry.disable(&id).await {
                tracing::error!(extension = %id, error = %e, "Failed to disable extension");
            }
            return;
        }
        if !has_loader {
            tracing::warn!(extension = %id, "No code available for extension; leaving it inactive");
            return;
        }
        if let Err(e) = registry.load(&id).await {
            tracing::error!(extension = %id, error = %e, "Failed to load extension");
        }
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn table(&self) -> &PluginTable {
        &self.table
    }

    /// Stop services and deactivate every active extension
    pub async fn shutdown(&self) {
        self.hooks.shutdown().await;
        for extension in self.registry.by_status(ExtensionStatus::Active) {
            if let Err(e) = self.registry.deactivate(extension.id()).await {
                tracing::warn!(extension = %extension.id(), error = %e, "Failed to deactivate");
            }
        }
    }
}
