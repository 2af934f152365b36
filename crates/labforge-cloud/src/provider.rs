//! Cloud provider trait definition

use crate::error::Result;
use crate::security::{Direction, ObservedRule, SecurityRule};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tag key stamped on every resource the engine creates.
pub const DEPLOYMENT_TAG: &str = "labforge:deployment";

/// Cloud provider abstraction trait
///
/// The engine treats every call as an opaque external operation: it either
/// returns a result or a provider error whose message is relayed unchanged.
/// Listing failures are reported as [`CloudError::ProviderQuery`] and creation
/// failures as [`CloudError::ProviderSubmit`].
///
/// [`CloudError::ProviderQuery`]: crate::CloudError::ProviderQuery
/// [`CloudError::ProviderSubmit`]: crate::CloudError::ProviderSubmit
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "tencent-cloud", "memory")
    fn name(&self) -> &str;

    /// Regions (and their zones) the account can provision into
    async fn list_regions(&self, credential: &Credential) -> Result<Vec<RegionInfo>>;

    /// Account that owns the credential
    async fn account(&self, credential: &Credential) -> Result<AccountInfo>;

    /// Live resources of one kind
    async fn list(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
    ) -> Result<Vec<LiveResource>>;

    /// Creation quota for one kind, if the provider reports one
    async fn quota(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
    ) -> Result<Option<Quota>>;

    /// Create a resource and return its live representation
    async fn create(&self, credential: &Credential, request: &ResourceRequest)
    -> Result<LiveResource>;

    /// Fetch a single resource by id
    async fn describe(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<LiveResource>>;

    /// Rules of one direction of a security group, with their positions
    async fn list_security_rules(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
    ) -> Result<Vec<ObservedRule>>;

    /// Append rules to one direction of a security group
    async fn add_security_rules(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
        rules: &[SecurityRule],
    ) -> Result<()>;

    /// Delete rules of one direction by their provider-assigned positions
    async fn delete_security_rules(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
        indices: &[u32],
    ) -> Result<()>;
}

/// Kinds of resources created by the provisioning stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Project,
    Vpc,
    Subnet,
    SecurityGroup,
    Bucket,
    Cluster,
    Instance,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Project,
        ResourceKind::Vpc,
        ResourceKind::Subnet,
        ResourceKind::SecurityGroup,
        ResourceKind::Bucket,
        ResourceKind::Cluster,
        ResourceKind::Instance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Instance => "instance",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access key pair scoped to one provider account
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret_id: String,
    secret_key: String,
}

impl Credential {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A region and the zones inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region: String,
    pub zones: Vec<String>,
}

impl RegionInfo {
    pub fn new(region: impl Into<String>, zones: &[&str]) -> Self {
        Self {
            region: region.into(),
            zones: zones.iter().map(|z| z.to_string()).collect(),
        }
    }
}

/// Account that owns a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: String,
    pub name: Option<String>,
}

/// A resource as reported by a provider listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveResource {
    /// Provider-assigned identifier
    pub id: String,

    /// Human-readable name, unique per kind within a deployment
    pub name: String,

    /// Resource tags
    pub tags: BTreeMap<String, String>,

    /// Resource attributes (IP, state, etc.)
    pub attributes: HashMap<String, serde_json::Value>,
}

impl LiveResource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: BTreeMap::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Whether this resource was created for the given deployment
    pub fn belongs_to(&self, deployment: &str) -> bool {
        self.tags.get(DEPLOYMENT_TAG).map(String::as_str) == Some(deployment)
    }
}

/// Provider-enforced ceiling on the count of one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub used: u64,
    pub limit: u64,
}

impl Quota {
    pub fn new(used: u64, limit: u64) -> Self {
        Self { used, limit }
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// Request to create one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub kind: ResourceKind,

    /// Unique name generated by the engine
    pub name: String,

    pub region: String,

    pub zone: Option<String>,

    pub tags: BTreeMap<String, String>,

    /// Kind-specific configuration (parent ids, CIDRs, instance type, ...)
    pub config: serde_json::Value,
}

impl ResourceRequest {
    pub fn new(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
            zone: None,
            tags: BTreeMap::new(),
            config: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut self.config {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// Get a configuration value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
