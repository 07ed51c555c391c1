//! Simulated provider adapter - in-memory control plane for local runs
//!
//! Lets `apply` and `destroy` run end to end without cloud credentials.
//! Identifiers follow the provider's shape (vpc-..., subnet-...), and
//! asynchronously provisioned kinds report ready on the second status
//! poll so the engine's readiness path is exercised.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use vela_core::adapter::{AdapterError, AdapterResult, ProviderAdapter};
use vela_core::descriptor::{ResourceDescriptor, ResourceKind};

#[derive(Default)]
pub struct SimulatedAdapter {
    resources: Mutex<HashMap<String, SimResource>>,
    sequence: AtomicU64,
}

struct SimResource {
    polls_until_ready: u32,
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Bucket => "bucket",
        ResourceKind::BucketPolicy => "policy",
        ResourceKind::BucketReplication => "repl",
        ResourceKind::Vpc => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::Route => "rt",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::NatGateway => "nat",
        ResourceKind::ElasticIp => "eipalloc",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::SecurityGroupRule => "sgr",
        ResourceKind::Trail => "trail",
        ResourceKind::FlowLog => "fl",
    }
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AdapterResult<std::sync::MutexGuard<'_, HashMap<String, SimResource>>> {
        self.resources
            .lock()
            .map_err(|_| AdapterError::Fatal("simulated control plane poisoned".to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedAdapter {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> AdapterResult<String> {
        let id = format!(
            "{}-{:08x}",
            id_prefix(descriptor.kind),
            self.sequence.fetch_add(1, Ordering::SeqCst)
        );
        self.lock()?.insert(
            id.clone(),
            SimResource {
                polls_until_ready: u32::from(descriptor.kind.provisions_asynchronously()),
            },
        );
        Ok(id)
    }

    async fn update(
        &self,
        _descriptor: &ResourceDescriptor,
        physical_id: &str,
    ) -> AdapterResult<()> {
        if self.lock()?.contains_key(physical_id) {
            Ok(())
        } else {
            Err(AdapterError::NotFound(physical_id.to_string()))
        }
    }

    async fn delete(&self, physical_id: &str, _kind: ResourceKind) -> AdapterResult<()> {
        if self.lock()?.remove(physical_id).is_some() {
            Ok(())
        } else {
            Err(AdapterError::NotFound(physical_id.to_string()))
        }
    }

    async fn describe_status(
        &self,
        physical_id: &str,
        _kind: ResourceKind,
    ) -> AdapterResult<bool> {
        let mut resources = self.lock()?;
        let Some(resource) = resources.get_mut(physical_id) else {
            return Err(AdapterError::NotFound(physical_id.to_string()));
        };
        if resource.polls_until_ready > 0 {
            resource.polls_until_ready -= 1;
            Ok(false)
        } else {
            Ok(true)
        }
    }
}
