//! Service and infrastructure mapping lookup for phases.

use crate::context::{InfraMappingElement, ServiceElement};
use crate::error::StateResult;
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait InfrastructureCatalog: Send + Sync {
    async fn service(&self, app_id: &str, service_id: &str) -> StateResult<Option<ServiceElement>>;

    async fn infra_mapping(
        &self,
        app_id: &str,
        infra_mapping_id: &str,
    ) -> StateResult<Option<InfraMappingElement>>;
}

#[derive(Debug, Default)]
pub struct InMemoryInfrastructureCatalog {
    services: DashMap<(String, String), ServiceElement>,
    infra_mappings: DashMap<(String, String), InfraMappingElement>,
}

impl InMemoryInfrastructureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&self, app_id: &str, service: ServiceElement) {
        self.services
            .insert((app_id.to_string(), service.uuid.clone()), service);
    }

    pub fn add_infra_mapping(&self, app_id: &str, infra_mapping: InfraMappingElement) {
        self.infra_mappings
            .insert((app_id.to_string(), infra_mapping.uuid.clone()), infra_mapping);
    }
}

#[async_trait]
impl InfrastructureCatalog for InMemoryInfrastructureCatalog {
    async fn service(&self, app_id: &str, service_id: &str) -> StateResult<Option<ServiceElement>> {
        Ok(self
            .services
            .get(&(app_id.to_string(), service_id.to_string()))
            .map(|s| s.clone()))
    }

    async fn infra_mapping(
        &self,
        app_id: &str,
        infra_mapping_id: &str,
    ) -> StateResult<Option<InfraMappingElement>> {
        Ok(self
            .infra_mappings
            .get(&(app_id.to_string(), infra_mapping_id.to_string()))
            .map(|m| m.clone()))
    }
}
