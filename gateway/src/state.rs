//! `FabricState` is the single aggregate the process entry point builds and
//! hands to every task and HTTP handler. Nothing here is a module-scope
//! global; every subsystem reaches the others only through this struct.

use std::{collections::HashSet, net::IpAddr, path::PathBuf, sync::Arc};

use parking_lot::RwLock;

use crate::{
    config::Config,
    error::AllocationError,
    mapping::{MappingTable, PortBinding, Protocol},
    registry::{AvailablePort, PortRegistry},
    statistics::{Statistics, StatisticsSnapshot},
};

pub struct FabricState {
    config: RwLock<Config>,
    config_path: PathBuf,
    pub registry: Arc<PortRegistry>,
    pub mappings: Arc<MappingTable>,
    pub stats: Arc<Statistics>,
}

impl FabricState {
    pub fn new(config: Config, config_path: PathBuf) -> Arc<Self> {
        let reserved: HashSet<u16> = [config.server.web_port, config.server.data_plane_port]
            .into_iter()
            .collect();
        let registry = Arc::new(PortRegistry::new(&config.port_ranges, &config.specific_ports, reserved));
        let stats = Arc::new(Statistics::default());
        let bind_host: IpAddr = config.server.bind_host;
        let mappings = MappingTable::new(registry.clone(), stats.clone(), bind_host);

        Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            registry,
            mappings,
            stats,
        })
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn replace_config(&self, config: Config) -> Result<(), crate::error::ConfigError> {
        config.validate()?;
        config.save(&self.config_path)?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn list_available(&self) -> Vec<AvailablePort> {
        self.registry.list_available()
    }

    pub fn list_active(&self) -> Vec<Arc<PortBinding>> {
        self.mappings.list_active()
    }

    pub async fn allocate_mapping(
        &self,
        local_port: u16,
        preferred: Option<u16>,
        protocol: Protocol,
        agent_mapping_id: String,
    ) -> Result<Arc<PortBinding>, AllocationError> {
        self.mappings
            .bring_up(local_port, preferred, protocol, agent_mapping_id)
            .await
    }

    pub fn release_mapping(&self, local_port: u16) -> Result<(), AllocationError> {
        self.mappings.tear_down(local_port)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }
}
