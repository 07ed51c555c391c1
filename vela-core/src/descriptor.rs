//! Resource descriptors - declarative desired state for one infrastructure object

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource kinds the planner knows how to order and apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    BucketPolicy,
    BucketReplication,
    Vpc,
    Subnet,
    RouteTable,
    Route,
    InternetGateway,
    NatGateway,
    ElasticIp,
    SecurityGroup,
    SecurityGroupRule,
    Trail,
    FlowLog,
}

impl ResourceKind {
    /// Whether the provider can reconfigure this resource in place.
    ///
    /// Network primitives are fixed after creation (a VPC or subnet CIDR
    /// cannot be changed); drift on those kinds requires recreation and the
    /// engine reports it instead of guessing.
    pub fn supports_update(self) -> bool {
        !matches!(
            self,
            Self::Vpc
                | Self::Subnet
                | Self::InternetGateway
                | Self::NatGateway
                | Self::ElasticIp
                | Self::FlowLog
        )
    }

    /// Whether the provider finishes provisioning this resource after the
    /// create call has already returned an identifier.
    ///
    /// These kinds get a readiness poll before dependents are dispatched.
    pub fn provisions_asynchronously(self) -> bool {
        matches!(self, Self::Vpc | Self::NatGateway)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::BucketPolicy => "bucket_policy",
            Self::BucketReplication => "bucket_replication",
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::RouteTable => "route_table",
            Self::Route => "route",
            Self::InternetGateway => "internet_gateway",
            Self::NatGateway => "nat_gateway",
            Self::ElasticIp => "elastic_ip",
            Self::SecurityGroup => "security_group",
            Self::SecurityGroupRule => "security_group_rule",
            Self::Trail => "trail",
            Self::FlowLog => "flow_log",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative specification of one desired infrastructure resource.
///
/// Immutable once submitted to a graph for an apply run; the engine only
/// ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Logical name, unique within a manifest (e.g., "public-subnet-1").
    pub logical_name: String,
    pub kind: ResourceKind,
    /// Desired configuration. Ordered map so the config digest is stable.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Logical names of resources that must reach a successful state
    /// before this one is applied.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, logical_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, logical_name: impl Into<String>) -> Self {
        self.depends_on.insert(logical_name.into());
        self
    }

    /// Stable digest over the desired configuration, used to detect drift
    /// between runs. `BTreeMap` iterates keys in sorted order, so equal
    /// property sets always produce the same digest. Keys and rendered
    /// values are length-prefixed so boundaries cannot collide.
    pub fn config_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in &self.properties {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            let rendered = value.to_string();
            hasher.update(&(rendered.len() as u64).to_le_bytes());
            hasher.update(rendered.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_hash_ignores_insertion_order() {
        let a = ResourceDescriptor::new(ResourceKind::Bucket, "b")
            .with_property("region", json!("us-east-1"))
            .with_property("versioning", json!("Enabled"));
        let b = ResourceDescriptor::new(ResourceKind::Bucket, "b")
            .with_property("versioning", json!("Enabled"))
            .with_property("region", json!("us-east-1"));

        assert_eq!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn config_hash_changes_with_properties() {
        let a = ResourceDescriptor::new(ResourceKind::Vpc, "main")
            .with_property("cidr_block", json!("10.0.0.0/16"));
        let b = ResourceDescriptor::new(ResourceKind::Vpc, "main")
            .with_property("cidr_block", json!("10.1.0.0/16"));

        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn config_hash_keeps_key_and_value_boundaries_apart() {
        let a = ResourceDescriptor::new(ResourceKind::Bucket, "b")
            .with_property("ab", json!("c"));
        let b = ResourceDescriptor::new(ResourceKind::Bucket, "b")
            .with_property("a", json!("bc"));

        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn network_primitives_are_immutable() {
        assert!(!ResourceKind::Vpc.supports_update());
        assert!(!ResourceKind::Subnet.supports_update());
        assert!(!ResourceKind::NatGateway.supports_update());
        assert!(ResourceKind::Bucket.supports_update());
        assert!(ResourceKind::Trail.supports_update());
    }

    #[test]
    fn async_provisioning_kinds() {
        assert!(ResourceKind::Vpc.provisions_asynchronously());
        assert!(ResourceKind::NatGateway.provisions_asynchronously());
        assert!(!ResourceKind::Bucket.provisions_asynchronously());
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ResourceKind::NatGateway).unwrap();
        assert_eq!(json, "\"nat_gateway\"");

        let kind: ResourceKind = serde_json::from_str("\"security_group_rule\"").unwrap();
        assert_eq!(kind, ResourceKind::SecurityGroupRule);
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let descriptor: ResourceDescriptor =
            serde_json::from_str(r#"{"logical_name": "igw", "kind": "internet_gateway"}"#).unwrap();
        assert!(descriptor.properties.is_empty());
        assert!(descriptor.depends_on.is_empty());
    }
}
