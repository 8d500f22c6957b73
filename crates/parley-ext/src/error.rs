// ABOUTME: Error types for parley-ext.
// ABOUTME: ExtensionError covers manifest validation, lifecycle misuse and module failures.

use thiserror::Error;

/// Errors that can occur in the extension registry.
///
/// Cloneable so a single in-flight load can hand its result to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// The manifest failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// An extension with this id is already registered.
    #[error("extension '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No extension with this id is registered.
    #[error("extension '{0}' not found")]
    NotFound(String),

    /// The extension was registered without a loader.
    #[error("no loader provided for extension '{0}'")]
    NoLoader(String),

    /// The loader failed.
    #[error("failed to load extension '{id}': {reason}")]
    LoadFailed { id: String, reason: String },

    /// Activation requires a loaded extension.
    #[error("extension '{0}' must be loaded before activation")]
    NotLoaded(String),

    /// The module's activate or deactivate hook failed.
    #[error("lifecycle hook failed for extension '{id}': {reason}")]
    LifecycleFailed { id: String, reason: String },

    /// The manifest asks for a permission the registry does not grant.
    #[error("extension '{id}' requests disallowed permission '{permission}'")]
    PermissionDenied { id: String, permission: String },

    /// The extension is disabled.
    #[error("extension '{0}' is disabled")]
    Disabled(String),

    /// An extension point with this id already exists.
    #[error("extension point '{0}' already exists")]
    PointAlreadyExists(String),

    /// A contributed service failed to start.
    #[error("service '{id}' failed to start: {reason}")]
    ServiceFailed { id: String, reason: String },

    /// No job with this "{extension}.{job}" id is registered.
    #[error("job '{0}' not found")]
    JobNotFound(String),

    /// A contributed job returned an error.
    #[error("job '{id}' failed: {reason}")]
    JobFailed { id: String, reason: String },

    /// Extension configuration could not be read.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ExtensionError>;
