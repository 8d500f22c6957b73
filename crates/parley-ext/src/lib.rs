// ABOUTME: Extension system for parley: manifests, lifecycle registry, hooks and plugins.
// ABOUTME: Provides ExtensionRegistry, HookRegistry, PluginTable and ExtensionHost.

//! # parley-ext
//!
//! Extensions declare themselves with an [`ExtensionManifest`] and supply code
//! through an [`ExtensionLoader`]. The [`ExtensionRegistry`] moves them through
//! their lifecycle; active modules contribute a [`Plugin`] to the UI and
//! [`Hooks`] to the server side.
//!
//! ## Quick Start
//!
//! ```ignore
//! use parley_ext::{ExtensionModule, ExtensionRegistry, ManifestBuilder, StaticLoader};
//! use std::sync::Arc;
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl ExtensionModule for Hello {}
//!
//! let registry = ExtensionRegistry::default();
//! let manifest = ManifestBuilder::new("hello", "1.0.0").build();
//! let ext = registry
//!     .register(manifest, Some(Arc::new(StaticLoader(Arc::new(Hello)))))
//!     .await?;
//! assert!(ext.is_active());
//! ```

pub mod adapter;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod plugin;
pub mod registry;

pub use adapter::{
    discover, BuiltinResolver, DevelopmentConfig, ExtensionDefinition, ExtensionHost,
    ExtensionsConfig, ModuleResolver,
};
pub use error::{ExtensionError, Result};
pub use hooks::{EventHandler, EventHook, HookRegistry, Hooks, Job, JobHook, Service, ServiceHook};
pub use manifest::{
    Capabilities, ClientCapabilities, ExtensionManifest, ExtensionPointDecl, ManifestBuilder,
    PointKind, ServerCapabilities, SharedCapabilities, MANIFEST_FILE,
};
pub use plugin::{
    CitationMarkers, MarkdownRenderer, Plugin, PluginTable, RouteContribution, WidgetContribution,
};
pub use registry::{
    loader_fn, Extension, ExtensionContext, ExtensionLoader, ExtensionModule, ExtensionPoint,
    ExtensionRegistry, ExtensionStatus, RegistryConfig, RegistryEvent, StaticLoader,
};
