//! `AgentState` is the single aggregate the process entry point builds and
//! hands to every task and HTTP handler: the persisted configuration, the
//! Gateway client, and one running `mapping::run` task (plus its
//! `MappingControl` handle) per configured Mapping.

use std::{path::PathBuf, sync::atomic::Ordering, sync::Arc};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    config::{Config, PortMapping, Protocol},
    error::{ConfigError, GatewayError},
    gateway_client::GatewayClient,
    mapping::{self, MappingControl},
};

pub struct AgentState {
    config: RwLock<Config>,
    config_path: PathBuf,
    gateway: Arc<GatewayClient>,
    controls: RwLock<AHashMap<String, Arc<MappingControl>>>,
}

#[derive(Serialize, Clone)]
pub struct MappingStatus {
    pub id: String,
    pub name: String,
    pub local_host: String,
    pub local_port: u16,
    pub protocol: Protocol,
    pub enabled: bool,
    pub assigned_public_port: Option<u16>,
    pub active_sessions: usize,
}

impl AgentState {
    pub fn new(config: Config, config_path: PathBuf) -> Result<Arc<Self>, GatewayError> {
        let gateway = Arc::new(GatewayClient::new(config.server.base_url())?);
        Ok(Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            gateway,
            controls: RwLock::new(AHashMap::new()),
        }))
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Spawn a `mapping::run` task for every configured Mapping. Called once
    /// at startup; Mappings added later are spawned individually by
    /// `add_mapping`.
    pub fn spawn_all(self: &Arc<Self>) {
        let mappings = self.config.read().port_mappings.clone();
        for mapping in mappings {
            self.spawn_mapping(mapping);
        }
    }

    fn spawn_mapping(self: &Arc<Self>, mapping: PortMapping) -> Arc<MappingControl> {
        let control = MappingControl::new(&mapping);
        self.controls.write().insert(mapping.id.clone(), control.clone());

        let gateway = self.gateway.clone();
        let data_plane_addr = self.config.read().server.data_plane_addr();
        let connection = self.config.read().connection.clone();
        let task_control = control.clone();
        tokio::spawn(mapping::run(mapping, gateway, data_plane_addr, connection, task_control));

        control
    }

    pub fn list_mappings(&self) -> Vec<MappingStatus> {
        let controls = self.controls.read();
        self.config
            .read()
            .port_mappings
            .iter()
            .map(|mapping| {
                let control = controls.get(&mapping.id);
                MappingStatus {
                    id: mapping.id.clone(),
                    name: mapping.name.clone(),
                    local_host: mapping.local_host.clone(),
                    local_port: mapping.local_port,
                    protocol: mapping.protocol,
                    enabled: control
                        .map(|c| c.enabled.load(Ordering::Relaxed))
                        .unwrap_or(mapping.enabled),
                    assigned_public_port: control.and_then(|c| match c.assigned_public_port.load(Ordering::Relaxed) {
                        0 => None,
                        port => Some(port),
                    }),
                    active_sessions: control.map(|c| c.active_sessions.load(Ordering::Relaxed)).unwrap_or(0),
                }
            })
            .collect()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ConfigError> {
        let controls = self.controls.read();
        let control = controls.get(id).ok_or_else(|| ConfigError::UnknownMapping(id.to_string()))?;
        control.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Add a Mapping to the persisted configuration and spawn its manager
    /// task immediately.
    pub fn add_mapping(self: &Arc<Self>, mapping: PortMapping) -> Result<(), ConfigError> {
        {
            let mut config = self.config.write();
            config.port_mappings.push(mapping.clone());
            config.save(&self.config_path)?;
        }
        self.spawn_mapping(mapping);
        Ok(())
    }

    /// Disable and drop a Mapping. The manager task notices `enabled` is
    /// false on its next tick and releases the Gateway allocation itself;
    /// we do not abort it so that release happens cleanly.
    pub fn remove_mapping(&self, id: &str) -> Result<(), ConfigError> {
        {
            let controls = self.controls.read();
            if let Some(control) = controls.get(id) {
                control.enabled.store(false, Ordering::Relaxed);
            }
        }
        let mut config = self.config.write();
        let before = config.port_mappings.len();
        config.port_mappings.retain(|m| m.id != id);
        if config.port_mappings.len() == before {
            return Err(ConfigError::UnknownMapping(id.to_string()));
        }
        config.save(&self.config_path)?;
        Ok(())
    }
}
