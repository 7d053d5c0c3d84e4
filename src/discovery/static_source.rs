use crate::discovery::{
    ContainerDetails, ContainerSummary, DiscoveryError, DiscoveryFilter, DiscoverySource,
};
use async_trait::async_trait;

/// Discovery source over a fixed list of backends, typically from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    containers: Vec<ContainerDetails>,
}

impl StaticSource {
    pub fn new(containers: Vec<ContainerDetails>) -> Self {
        Self { containers }
    }

    pub fn containers(&self) -> &[ContainerDetails] {
        &self.containers
    }
}

#[async_trait]
impl DiscoverySource for StaticSource {
    async fn list_running(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<ContainerSummary>, DiscoveryError> {
        Ok(self
            .containers
            .iter()
            .filter(|c| c.matches(filter))
            .map(ContainerDetails::summary)
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, DiscoveryError> {
        self.containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
    }
}
