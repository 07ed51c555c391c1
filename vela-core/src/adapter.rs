//! Provider adapter - boundary between the engine and a cloud control plane
//!
//! The engine never talks to a provider SDK directly; it goes through this
//! trait. Adapters translate a descriptor's desired configuration into
//! concrete API calls and map provider failures onto the typed errors the
//! engine branches on, replacing string matching on error messages.

use async_trait::async_trait;
use thiserror::Error;

use crate::descriptor::{ResourceDescriptor, ResourceKind};

/// Typed provider failure, discriminated by the engine.
///
/// Only `Throttled` and `Transient` are retryable; `AlreadyExists` is
/// success-equivalent for creates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("resource already exists")]
    AlreadyExists { physical_id: Option<String> },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("throttled by provider: {0}")]
    Throttled(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("fatal provider failure: {0}")]
    Fatal(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transient(_))
    }

    /// Short machine-readable code for run reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Throttled(_) => "throttled",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Control-plane surface the apply engine requires from a provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Adapter name for reports and logs (e.g., "sim").
    fn name(&self) -> &'static str;

    /// Create the resource described by `descriptor`.
    ///
    /// Returns the provider-assigned physical identifier (e.g., "vpc-0a1b").
    async fn create(&self, descriptor: &ResourceDescriptor) -> AdapterResult<String>;

    /// Reconfigure an existing resource in place to match `descriptor`.
    async fn update(&self, descriptor: &ResourceDescriptor, physical_id: &str)
        -> AdapterResult<()>;

    /// Delete a resource by physical identifier.
    async fn delete(&self, physical_id: &str, kind: ResourceKind) -> AdapterResult<()>;

    /// Whether an asynchronously provisioned resource is ready for use.
    async fn describe_status(&self, physical_id: &str, kind: ResourceKind)
        -> AdapterResult<bool>;
}
