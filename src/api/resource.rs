//! Typed resource collections and their CRUD clients.
//!
//! Every declarative object managed by the control plane belongs to exactly
//! one of a closed set of collections. Dispatch over collections is driven by
//! the [`ResourceKind`] enum; each kind shares one generic client rather than
//! a class per kind.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConfigError, Result};

use super::client::ApiClient;
use super::types::Ack;

/// The closed set of declarative resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// External data/storage connection.
    Connection,
    /// Version-control credential.
    #[serde(rename = "VCSCredential")]
    VcsCredential,
    /// Model training job.
    ModelTraining,
    /// Model deployment.
    ModelDeployment,
    /// Traffic route in front of deployments.
    ModelRoute,
    /// Model packaging job.
    ModelPackaging,
    /// Training toolchain integration.
    ToolchainIntegration,
    /// Packaging integration.
    PackagingIntegration,
}

impl ResourceKind {
    /// All supported kinds, in a stable order.
    pub const ALL: [Self; 8] = [
        Self::Connection,
        Self::VcsCredential,
        Self::ModelTraining,
        Self::ModelDeployment,
        Self::ModelRoute,
        Self::ModelPackaging,
        Self::ToolchainIntegration,
        Self::PackagingIntegration,
    ];

    /// Parses a wire-format kind string (the `kind` field of a declarative
    /// document).
    ///
    /// # Errors
    ///
    /// Returns an error for any string outside the closed set.
    pub fn from_wire(kind: &str) -> std::result::Result<Self, ConfigError> {
        match kind {
            "Connection" => Ok(Self::Connection),
            "VCSCredential" => Ok(Self::VcsCredential),
            "ModelTraining" => Ok(Self::ModelTraining),
            "ModelDeployment" => Ok(Self::ModelDeployment),
            "ModelRoute" => Ok(Self::ModelRoute),
            "ModelPackaging" => Ok(Self::ModelPackaging),
            "ToolchainIntegration" => Ok(Self::ToolchainIntegration),
            "PackagingIntegration" => Ok(Self::PackagingIntegration),
            other => Err(ConfigError::UnknownResourceKind {
                kind: other.to_string(),
            }),
        }
    }

    /// The wire-format kind string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "Connection",
            Self::VcsCredential => "VCSCredential",
            Self::ModelTraining => "ModelTraining",
            Self::ModelDeployment => "ModelDeployment",
            Self::ModelRoute => "ModelRoute",
            Self::ModelPackaging => "ModelPackaging",
            Self::ToolchainIntegration => "ToolchainIntegration",
            Self::PackagingIntegration => "PackagingIntegration",
        }
    }

    /// URL slug of the resource collection.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::VcsCredential => "vcs-credential",
            Self::ModelTraining => "model-training",
            Self::ModelDeployment => "model-deployment",
            Self::ModelRoute => "model-route",
            Self::ModelPackaging => "model-packaging",
            Self::ToolchainIntegration => "toolchain-integration",
            Self::PackagingIntegration => "packaging-integration",
        }
    }

    /// Base URL path of the collection.
    #[must_use]
    pub fn base_path(self) -> String {
        format!("/api/v1/{}", self.collection())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = ConfigError;

    /// Accepts the wire-format kind name or the collection slug.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_wire(s).or_else(|_| {
            Self::ALL
                .into_iter()
                .find(|kind| kind.collection() == s)
                .ok_or_else(|| ConfigError::UnknownResourceKind {
                    kind: s.to_string(),
                })
        })
    }
}

/// One desired resource in a declarative batch.
///
/// Identity is `(kind, name)`. Instances are built by the batch parser and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    kind: ResourceKind,
    name: String,
    payload: Value,
}

impl ResourceChange {
    /// Creates a resource change.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            payload,
        }
    }

    /// Kind of the resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Name of the resource.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared spec payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Wire document sent on create/edit: the payload wrapped with identity.
    #[must_use]
    pub fn to_document(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "spec": self.payload,
        })
    }
}

impl std::fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// CRUD operations over one resource collection.
///
/// This is the seam between the reconciler and the HTTP layer; the reconciler
/// never talks to the network directly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Fetches a resource by name. A missing resource surfaces as a request
    /// failure with status 404.
    async fn get(&self, name: &str) -> Result<Value>;

    /// Lists all resources in the collection, optionally filtered by labels.
    async fn get_all(&self, labels: Option<HashMap<String, String>>) -> Result<Vec<Value>>;

    /// Creates a resource, returning the server's acknowledgement message.
    async fn create(&self, change: &ResourceChange) -> Result<String>;

    /// Edits an existing resource, returning the acknowledgement message.
    async fn edit(&self, change: &ResourceChange) -> Result<String>;

    /// Deletes a resource by name, returning the acknowledgement message.
    async fn delete(&self, name: &str) -> Result<String>;
}

/// HTTP-backed client for one resource collection.
#[derive(Debug, Clone)]
pub struct ResourceClient {
    api: ApiClient,
    kind: ResourceKind,
}

impl ResourceClient {
    /// Creates a client for the given collection.
    #[must_use]
    pub const fn new(api: ApiClient, kind: ResourceKind) -> Self {
        Self { api, kind }
    }

    /// The collection this client operates on.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Deletes every resource matching the label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete_all(&self, labels: &HashMap<String, String>) -> Result<String> {
        let path = format!("{}?{}", self.kind.base_path(), encode_labels(labels));
        let ack: Ack = self.api.query(Method::DELETE, &path, None).await?;
        Ok(ack.message)
    }

    /// Scales a deployment to the given replica count.
    ///
    /// Only meaningful for the model-deployment collection; other collections
    /// reject the call server-side.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn scale(&self, name: &str, replicas: u32) -> Result<String> {
        let path = format!("{}/{name}/scale", self.kind.base_path());
        let body = serde_json::json!({ "replicas": replicas });
        let ack: Ack = self.api.query(Method::PUT, &path, Some(&body)).await?;
        Ok(ack.message)
    }
}

#[async_trait]
impl ResourceApi for ResourceClient {
    async fn get(&self, name: &str) -> Result<Value> {
        let path = format!("{}/{name}", self.kind.base_path());
        self.api.query(Method::GET, &path, None).await
    }

    async fn get_all(&self, labels: Option<HashMap<String, String>>) -> Result<Vec<Value>> {
        let path = labels.map_or_else(
            || self.kind.base_path(),
            |labels| format!("{}?{}", self.kind.base_path(), encode_labels(&labels)),
        );
        self.api.query(Method::GET, &path, None).await
    }

    async fn create(&self, change: &ResourceChange) -> Result<String> {
        let ack: Ack = self
            .api
            .query(
                Method::POST,
                &self.kind.base_path(),
                Some(&change.to_document()),
            )
            .await?;
        Ok(ack.message)
    }

    async fn edit(&self, change: &ResourceChange) -> Result<String> {
        // The document carries identity; the server locates it by name.
        let ack: Ack = self
            .api
            .query(
                Method::PUT,
                &self.kind.base_path(),
                Some(&change.to_document()),
            )
            .await?;
        Ok(ack.message)
    }

    async fn delete(&self, name: &str) -> Result<String> {
        let path = format!("{}/{name}", self.kind.base_path());
        let ack: Ack = self.api.query(Method::DELETE, &path, None).await?;
        Ok(ack.message)
    }
}

/// Registry mapping resource kinds to their clients.
///
/// The reconciler resolves clients through this; a kind without a registered
/// client is a per-resource error, not a panic.
pub struct ClientRegistry {
    clients: HashMap<ResourceKind, Arc<dyn ResourceApi>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Creates a registry covering every supported kind, all backed by the
    /// given API client.
    #[must_use]
    pub fn for_all_kinds(api: &ApiClient) -> Self {
        let mut registry = Self::empty();
        for kind in ResourceKind::ALL {
            registry = registry.with_client(kind, Arc::new(ResourceClient::new(api.clone(), kind)));
        }
        registry
    }

    /// Registers (or replaces) the client for a kind.
    #[must_use]
    pub fn with_client(mut self, kind: ResourceKind, client: Arc<dyn ResourceApi>) -> Self {
        self.clients.insert(kind, client);
        self
    }

    /// Resolves the client for a kind.
    #[must_use]
    pub fn resolve(&self, kind: ResourceKind) -> Option<Arc<dyn ResourceApi>> {
        self.clients.get(&kind).cloned()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("kinds", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Encodes a label selector as a query string.
fn encode_labels(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    pairs.sort();
    pairs.join("&")
}
