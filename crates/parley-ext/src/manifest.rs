// ABOUTME: Extension manifest types, validation and a fluent ManifestBuilder.
// ABOUTME: Manifests are camelCase JSON on disk and describe capabilities and extension points.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{ExtensionError, Result};

/// Name of the manifest file inside an extension directory
pub const MANIFEST_FILE: &str = "extension.json";

/// Describes an extension: identity, what it contributes and what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Other extensions this one needs, by id and version requirement
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,

    pub capabilities: Capabilities,

    /// Points this extension offers for others to contribute to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_points: Vec<ExtensionPointDecl>,
    /// Extension point ids this extension contributes to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
}

/// What an extension contributes, grouped by where it runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<SharedCapabilities>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCapabilities {
    pub components: Vec<String>,
    pub pages: Vec<String>,
    pub routes: Vec<String>,
    pub layouts: Vec<String>,
    pub hooks: Vec<String>,
    pub providers: Vec<String>,
    pub themes: Vec<String>,
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCapabilities {
    pub routes: Vec<String>,
    pub middleware: Vec<String>,
    pub services: Vec<String>,
    pub jobs: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedCapabilities {
    pub utils: Vec<String>,
    pub types: Vec<String>,
    pub constants: Vec<String>,
}

/// Kind of contribution an extension point accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Component,
    Page,
    Route,
    Service,
    Middleware,
    Hook,
}

impl std::fmt::Display for PointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PointKind::Component => "component",
            PointKind::Page => "page",
            PointKind::Route => "route",
            PointKind::Service => "service",
            PointKind::Middleware => "middleware",
            PointKind::Hook => "hook",
        };
        f.write_str(s)
    }
}

/// An extension point as declared in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionPointDecl {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: PointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

fn semver() -> &'static Regex {
    static SEMVER: OnceLock<Regex> = OnceLock::new();
    SEMVER.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid semver regex"))
}

impl ExtensionManifest {
    /// Parse a manifest from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| ExtensionError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read `extension.json` from an extension directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path).map_err(|e| {
            ExtensionError::InvalidManifest(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Check required fields and version format
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ExtensionError::InvalidManifest(
                "id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ExtensionError::InvalidManifest(format!(
                "extension '{}' has an empty name",
                self.id
            )));
        }
        if !semver().is_match(&self.version) {
            return Err(ExtensionError::InvalidManifest(format!(
                "extension '{}' has version '{}', expected MAJOR.MINOR.PATCH",
                self.id, self.version
            )));
        }
        for point in &self.extension_points {
            if point.id.trim().is_empty() {
                return Err(ExtensionError::InvalidManifest(format!(
                    "extension '{}' declares an extension point without an id",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Whether this extension declares or consumes the given point
    pub fn touches_point(&self, point_id: &str) -> bool {
        self.extension_points.iter().any(|p| p.id == point_id)
            || self.consumes.iter().any(|c| c == point_id)
    }
}

/// Builder for constructing an `ExtensionManifest`.
///
/// # Example
///
/// ```
/// use parley_ext::{ManifestBuilder, PointKind};
///
/// let manifest = ManifestBuilder::new("token-counter", "1.0.0")
///     .name("Token Counter")
///     .client_component("TokenCount")
///     .extension_point("composer.widgets", "Composer widgets", PointKind::Component)
///     .build();
///
/// assert_eq!(manifest.id, "token-counter");
/// assert_eq!(manifest.extension_points.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: ExtensionManifest,
}

impl ManifestBuilder {
    /// Start a manifest. The display name defaults to the id.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            manifest: ExtensionManifest {
                name: id.clone(),
                id,
                version: version.into(),
                description: None,
                author: None,
                license: None,
                keywords: Vec::new(),
                dependencies: BTreeMap::new(),
                peer_dependencies: BTreeMap::new(),
                capabilities: Capabilities::default(),
                extension_points: Vec::new(),
                consumes: Vec::new(),
                permissions: Vec::new(),
                main: None,
                client: None,
                server: None,
                config_schema: None,
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.manifest.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.manifest.description = Some(description.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.manifest.author = Some(author.into());
        self
    }

    pub fn dependency(mut self, id: impl Into<String>, requirement: impl Into<String>) -> Self {
        self.manifest
            .dependencies
            .insert(id.into(), requirement.into());
        self
    }

    pub fn client_component(mut self, name: impl Into<String>) -> Self {
        self.client().components.push(name.into());
        self
    }

    pub fn client_route(mut self, path: impl Into<String>) -> Self {
        self.client().routes.push(path.into());
        self
    }

    pub fn client_plugin(mut self, name: impl Into<String>) -> Self {
        self.client().plugins.push(name.into());
        self
    }

    pub fn server_service(mut self, name: impl Into<String>) -> Self {
        self.server().services.push(name.into());
        self
    }

    pub fn server_event(mut self, event: impl Into<String>) -> Self {
        self.server().events.push(event.into());
        self
    }

    /// Declare an extension point other extensions may contribute to
    pub fn extension_point(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        kind: PointKind,
    ) -> Self {
        self.manifest.extension_points.push(ExtensionPointDecl {
            id: id.into(),
            name: name.into(),
            description: None,
            kind,
            schema: None,
        });
        self
    }

    pub fn consumes(mut self, point_id: impl Into<String>) -> Self {
        self.manifest.consumes.push(point_id.into());
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.manifest.permissions.push(permission.into());
        self
    }

    pub fn config_schema(mut self, schema: serde_json::Value) -> Self {
        self.manifest.config_schema = Some(schema);
        self
    }

    /// Build the manifest. Validation happens at registration.
    pub fn build(self) -> ExtensionManifest {
        self.manifest
    }

    fn client(&mut self) -> &mut ClientCapabilities {
        self.manifest
            .capabilities
            .client
            .get_or_insert_with(ClientCapabilities::default)
    }

    fn server(&mut self) -> &mut ServerCapabilities {
        self.manifest
            .capabilities
            .server
            .get_or_insert_with(ServerCapabilities::default)
    }
}
