// ABOUTME: Integration tests for ExtensionHost boot from configuration.
// ABOUTME: Covers builtin resolution, disabled and failing extensions, discovery and plugin order.

use async_trait::async_trait;
use parley_ext::{
    loader_fn, BuiltinResolver, CitationMarkers, EventHandler, ExtensionContext,
    ExtensionDefinition, ExtensionHost, ExtensionLoader, ExtensionManifest, ExtensionModule,
    ExtensionStatus, ExtensionsConfig, Hooks, ManifestBuilder, ModuleResolver, Plugin, Service,
    MANIFEST_FILE,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};

struct Citations;

#[async_trait]
impl ExtensionModule for Citations {
    fn plugin(&self) -> Plugin {
        Plugin::default().renderer(Arc::new(CitationMarkers))
    }
}

/// Contributes a composer widget and counts "message:finalized" events
#[derive(Default)]
struct Tokens {
    seen: Arc<Mutex<Vec<Value>>>,
    config: Mutex<Option<Value>>,
}

struct Seen(Arc<Mutex<Vec<Value>>>);

#[async_trait]
impl EventHandler for Seen {
    async fn handle(&self, _event: &str, payload: &Value) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[async_trait]
impl ExtensionModule for Tokens {
    async fn activate(&self, ctx: &ExtensionContext) -> anyhow::Result<()> {
        *self.config.lock().unwrap() = Some(Value::Object(ctx.config().clone()));
        Ok(())
    }

    fn plugin(&self) -> Plugin {
        Plugin::default()
            .composer("token-counter", "Tokens")
            .content("empty-state", "Count your tokens")
    }

    fn hooks(&self) -> Hooks {
        Hooks::default().on("message:finalized", 0, Arc::new(Seen(self.seen.clone())))
    }
}

/// Resolver whose one extension always fails to load
struct Failing;

impl ModuleResolver for Failing {
    fn manifest(&self, id: &str) -> Option<ExtensionManifest> {
        Some(ManifestBuilder::new(id, "1.0.0").build())
    }

    fn loader(&self, _id: &str) -> Option<Arc<dyn ExtensionLoader>> {
        Some(loader_fn(|| async {
            Err::<Arc<dyn ExtensionModule>, _>(anyhow::anyhow!("no such bundle"))
        }))
    }
}

fn resolver(tokens: Arc<Tokens>) -> BuiltinResolver {
    BuiltinResolver::new()
        .with(
            ManifestBuilder::new("citations", "1.0.0")
                .client_plugin("citations")
                .build(),
            Arc::new(Citations),
        )
        .with(
            ManifestBuilder::new("token-counter", "1.0.0")
                .client_component("TokenCount")
                .server_event("message:finalized")
                .build(),
            tokens,
        )
}

#[tokio::test]
async fn test_initialize_from_toml() {
    let config = ExtensionsConfig::from_toml(
        r#"
        [development]
        enable_debug_mode = true

        [[extension]]
        name = "token-counter"
        config = { limit = 4096 }

        [[extension]]
        name = "citations"
        enabled = false

        [[extension]]
        name = "unknown"
        "#,
    )
    .unwrap();
    assert!(config.development.enable_debug_mode);
    assert_eq!(config.extensions.len(), 3);

    let tokens = Arc::new(Tokens::default());
    let base = Plugin::default()
        .route("/", "Chat")
        .content("empty-state", "Ask anything");
    let host = ExtensionHost::initialize(&config, vec![base], &resolver(tokens.clone())).await;

    let registry = host.registry();
    assert_eq!(
        registry.get("token-counter").unwrap().status,
        ExtensionStatus::Active
    );
    assert_eq!(
        registry.get("citations").unwrap().status,
        ExtensionStatus::Disabled
    );
    assert!(registry.get("unknown").is_none());
    assert_eq!(
        *tokens.config.lock().unwrap(),
        Some(serde_json::json!({"limit": 4096}))
    );

    let table = host.table();
    assert_eq!(table.routes.len(), 1);
    assert_eq!(table.composer[0].id, "token-counter");
    assert_eq!(table.content["empty-state"], "Count your tokens");
    assert!(table.renderers.is_empty());

    host.hooks()
        .emit("message:finalized", &serde_json::json!({"tokens": 3}))
        .await;
    assert_eq!(tokens.seen.lock().unwrap().len(), 1);

    host.shutdown().await;
    assert!(registry.active_modules().is_empty());
}

#[tokio::test]
async fn test_renderers_from_active_extensions() {
    let mut config = ExtensionsConfig::default();
    config.extensions.push(ExtensionDefinition::new("citations"));

    let host = ExtensionHost::initialize(&config, Vec::new(), &resolver(Arc::default())).await;
    assert_eq!(host.table().render_markdown("One\n\nTwo"), "One [0]\n\nTwo [1]");
}

#[tokio::test]
async fn test_failing_extension_is_skipped() {
    let mut config = ExtensionsConfig::default();
    config.extensions.push(ExtensionDefinition::new("flaky"));

    let base = Plugin::default().route("/", "Chat");
    let host = ExtensionHost::initialize(&config, vec![base], &Failing).await;
    let ext = host.registry().get("flaky").unwrap();
    assert_eq!(ext.status, ExtensionStatus::Error);
    assert!(ext.error.unwrap().contains("no such bundle"));
    assert_eq!(host.table().routes.len(), 1);
}

#[tokio::test]
async fn test_auto_discovery_registers_manifests_on_disk() {
    let dir = tempfile::tempdir().unwrap();

    let with_code = dir.path().join("citations");
    std::fs::create_dir(&with_code).unwrap();
    let manifest = ManifestBuilder::new("citations", "2.0.0").build();
    std::fs::write(
        with_code.join(MANIFEST_FILE),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();

    let metadata_only = dir.path().join("notes");
    std::fs::create_dir(&metadata_only).unwrap();
    let manifest = ManifestBuilder::new("notes", "0.1.0").build();
    std::fs::write(
        metadata_only.join(MANIFEST_FILE),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();

    let broken = dir.path().join("broken");
    std::fs::create_dir(&broken).unwrap();
    std::fs::write(broken.join(MANIFEST_FILE), "{ not json").unwrap();

    let config = ExtensionsConfig {
        auto_discovery: true,
        search_paths: vec![dir.path().to_path_buf()],
        ..ExtensionsConfig::default()
    };
    let host = ExtensionHost::initialize(&config, Vec::new(), &resolver(Arc::default())).await;

    let registry = host.registry();
    let citations = registry.get("citations").unwrap();
    assert_eq!(citations.manifest.version, "2.0.0");
    assert!(citations.is_active());
    assert_eq!(
        registry.get("notes").unwrap().status,
        ExtensionStatus::Inactive
    );
    assert_eq!(registry.all().len(), 2);
}

#[tokio::test]
async fn test_definition_path_overrides_builtin_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ManifestBuilder::new("token-counter", "3.1.4")
        .name("Token Counter")
        .build();
    std::fs::write(
        dir.path().join(MANIFEST_FILE),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();

    let mut definition = ExtensionDefinition::new("token-counter");
    definition.path = Some(dir.path().to_path_buf());
    let config = ExtensionsConfig {
        extensions: vec![definition],
        ..ExtensionsConfig::default()
    };

    let host = ExtensionHost::initialize(&config, Vec::new(), &resolver(Arc::default())).await;
    let ext = host.registry().get("token-counter").unwrap();
    assert_eq!(ext.manifest.name, "Token Counter");
    assert!(ext.is_active());
}

/// Contributes a plugin slot and a service that never starts
struct Unstartable;

struct PortInUse;

#[async_trait]
impl Service for PortInUse {
    async fn start(&self) -> anyhow::Result<()> {
        anyhow::bail!("port in use")
    }
}

#[async_trait]
impl ExtensionModule for Unstartable {
    fn plugin(&self) -> Plugin {
        Plugin::default().content("banner", "from bad")
    }

    fn hooks(&self) -> Hooks {
        Hooks::default().service("listener", Arc::new(PortInUse))
    }
}

/// Counts "ping" events
#[derive(Default)]
struct Pinged(Arc<Mutex<Vec<Value>>>);

#[async_trait]
impl ExtensionModule for Pinged {
    fn hooks(&self) -> Hooks {
        Hooks::default().on("ping", 0, Arc::new(Seen(self.0.clone())))
    }
}

#[tokio::test]
async fn test_failing_hooks_skip_only_that_extension() {
    let pinged = Arc::new(Pinged::default());
    let resolver = BuiltinResolver::new()
        .with(ManifestBuilder::new("bad", "1.0.0").build(), Arc::new(Unstartable))
        .with(ManifestBuilder::new("good", "1.0.0").build(), pinged.clone());
    let config = ExtensionsConfig {
        extensions: vec![ExtensionDefinition::new("bad"), ExtensionDefinition::new("good")],
        ..ExtensionsConfig::default()
    };

    let host = ExtensionHost::initialize(&config, Vec::new(), &resolver).await;

    let bad = host.registry().get("bad").unwrap();
    assert_eq!(bad.status, ExtensionStatus::Error);
    assert!(bad.error.unwrap().contains("bad.listener"));
    assert!(!host.table().content.contains_key("banner"));
    assert!(host.hooks().service_ids().is_empty());

    assert_eq!(host.registry().get("good").unwrap().status, ExtensionStatus::Active);
    host.hooks().emit("ping", &Value::Null).await;
    assert_eq!(pinged.0.lock().unwrap().len(), 1);
}
