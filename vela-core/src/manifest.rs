//! Manifest loading - declarative JSON input enumerating desired resources

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::ResourceDescriptor;
use crate::graph::{DependencyGraph, GraphError};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Desired infrastructure for one environment: a set of descriptors plus
/// run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Environment the state entries are keyed under (e.g., "lab-network").
    pub environment: String,
    /// Worker pool size for the apply engine; engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    pub resources: Vec<ResourceDescriptor>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validate the descriptor set into a graph; fails on duplicate names,
    /// dangling references, and cycles before any provider call.
    pub fn graph(&self) -> Result<DependencyGraph, GraphError> {
        DependencyGraph::build(self.resources.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ResourceKind;
    use crate::plan::Plan;

    const SAMPLE: &str = r#"{
        "environment": "lab",
        "parallelism": 2,
        "resources": [
            {
                "logical_name": "vpc",
                "kind": "vpc",
                "properties": {"cidr_block": "10.0.0.0/16"}
            },
            {
                "logical_name": "public-subnet",
                "kind": "subnet",
                "properties": {"cidr_block": "10.0.0.0/24"},
                "depends_on": ["vpc"]
            }
        ]
    }"#;

    #[test]
    fn parses_sample_manifest() {
        let manifest = Manifest::from_json(SAMPLE).unwrap();
        assert_eq!(manifest.environment, "lab");
        assert_eq!(manifest.parallelism, Some(2));
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.resources[1].kind, ResourceKind::Subnet);
        assert!(manifest.resources[1].depends_on.contains("vpc"));
    }

    #[test]
    fn dangling_reference_surfaces_as_graph_error() {
        let manifest = Manifest::from_json(
            r#"{
                "environment": "lab",
                "resources": [
                    {"logical_name": "subnet", "kind": "subnet", "depends_on": ["vpc"]}
                ]
            }"#,
        )
        .unwrap();

        let err = manifest.graph().unwrap_err();
        assert!(matches!(err, GraphError::DanglingReference { .. }));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result = Manifest::from_json(
            r#"{
                "environment": "lab",
                "resources": [{"logical_name": "x", "kind": "load_balancer"}]
            }"#,
        );
        assert!(matches!(result, Err(ManifestError::Parse(_))));
    }

    #[test]
    fn storage_demo_manifest_compiles() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../manifests/s3-replication.json");
        let manifest = Manifest::from_path(Path::new(path)).unwrap();
        let plan = Plan::compile(&manifest.graph().unwrap()).unwrap();

        // The audit trail writes into the source bucket, so the bucket
        // policy that grants those writes must be applied first.
        let policy = plan.position("source-bucket-policy").unwrap();
        let trail = plan.position("audit-trail").unwrap();
        assert!(policy < trail);

        let replication = plan.position("replication").unwrap();
        assert!(plan.position("source-bucket").unwrap() < replication);
        assert!(plan.position("replica-bucket").unwrap() < replication);

        // The flow log writes into the source bucket.
        let flow_log = plan.position("vpc-flow-log").unwrap();
        assert!(plan.position("source-bucket").unwrap() < flow_log);
    }

    #[test]
    fn network_demo_manifest_compiles() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../manifests/vpc-network.json");
        let manifest = Manifest::from_path(Path::new(path)).unwrap();
        let plan = Plan::compile(&manifest.graph().unwrap()).unwrap();

        let vpc = plan.position("vpc").unwrap();
        for name in [
            "public-subnet-1",
            "igw",
            "nat-1",
            "private-route-1",
            "app-sg",
            "flow-log",
        ] {
            assert!(vpc < plan.position(name).unwrap(), "{name} must come after vpc");
        }
        assert!(plan.position("nat-1").unwrap() < plan.position("private-route-1").unwrap());
        assert!(plan.position("nat-eip-1").unwrap() < plan.position("nat-1").unwrap());
    }
}
