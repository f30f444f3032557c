//! Mapping Table: the set of currently-bound public ports, each owning the
//! listener tasks and Session Pool that back it. Bring-up is atomic: if any
//! listener fails to bind, everything opened so far for that Mapping is
//! rolled back and the port is returned to the Registry.

use std::{collections::HashMap, net::IpAddr, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, net::UdpSocket, task::JoinHandle};

use crate::{
    dispatcher, error::AllocationError, pool::PortPool, registry::PortRegistry, statistics::Statistics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Both,
}

impl Protocol {
    fn wants_tcp(self) -> bool {
        matches!(self, Self::Tcp | Self::Both)
    }

    fn wants_udp(self) -> bool {
        matches!(self, Self::Udp | Self::Both)
    }
}

pub struct PortBinding {
    pub public_port: u16,
    pub local_port: u16,
    pub protocol: Protocol,
    pub agent_mapping_id: String,
    pub pool: Arc<PortPool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct MappingTable {
    by_public_port: RwLock<HashMap<u16, Arc<PortBinding>>>,
    by_local_port: RwLock<HashMap<u16, Arc<PortBinding>>>,
    registry: Arc<PortRegistry>,
    stats: Arc<Statistics>,
    bind_host: IpAddr,
}

impl MappingTable {
    pub fn new(registry: Arc<PortRegistry>, stats: Arc<Statistics>, bind_host: IpAddr) -> Arc<Self> {
        Arc::new(Self {
            by_public_port: RwLock::new(HashMap::new()),
            by_local_port: RwLock::new(HashMap::new()),
            registry,
            stats,
            bind_host,
        })
    }

    pub fn get_by_public_port(&self, port: u16) -> Option<Arc<PortBinding>> {
        self.by_public_port.read().get(&port).cloned()
    }

    pub fn get_by_local_port(&self, port: u16) -> Option<Arc<PortBinding>> {
        self.by_local_port.read().get(&port).cloned()
    }

    pub fn list_active(&self) -> Vec<Arc<PortBinding>> {
        self.by_public_port.read().values().cloned().collect()
    }

    /// Bring a Mapping up: allocate a public port, bind the listeners its
    /// protocol requires, and start the dispatcher tasks. Re-requesting the
    /// same local port returns the existing binding unchanged (idempotent).
    pub async fn bring_up(
        self: &Arc<Self>,
        local_port: u16,
        preferred: Option<u16>,
        protocol: Protocol,
        agent_mapping_id: String,
    ) -> Result<Arc<PortBinding>, AllocationError> {
        if let Some(existing) = self.get_by_local_port(local_port) {
            return Ok(existing);
        }

        let public_port = self.registry.allocate(preferred)?;
        let pool = PortPool::new(public_port, self.stats.clone());
        let mut tasks = Vec::new();

        if protocol.wants_tcp() {
            match TcpListener::bind((self.bind_host, public_port)).await {
                Ok(listener) => {
                    log::info!("bound tcp listener for public port {}", public_port);
                    tasks.push(dispatcher::spawn_tcp_listener(listener, pool.clone()));
                }
                Err(source) => {
                    self.registry.release(public_port);
                    return Err(AllocationError::BindFailed { port: public_port, protocol: "tcp", source });
                }
            }
        }

        if protocol.wants_udp() {
            match UdpSocket::bind((self.bind_host, public_port)).await {
                Ok(socket) => {
                    log::info!("bound udp listener for public port {}", public_port);
                    let socket = Arc::new(socket);
                    pool.set_udp_socket(socket.clone());
                    tasks.push(dispatcher::spawn_udp_listener(socket, pool.clone()));
                    tasks.push(pool.spawn_udp_flow_reaper());
                }
                Err(source) => {
                    for task in tasks.drain(..) {
                        task.abort();
                    }
                    self.registry.release(public_port);
                    return Err(AllocationError::BindFailed { port: public_port, protocol: "udp", source });
                }
            }
        }

        let binding = Arc::new(PortBinding {
            public_port,
            local_port,
            protocol,
            agent_mapping_id,
            pool,
            tasks: Mutex::new(tasks),
        });

        self.by_public_port.write().insert(public_port, binding.clone());
        self.by_local_port.write().insert(local_port, binding.clone());
        log::info!(
            "mapping bound: local port {} -> public port {} ({:?})",
            local_port,
            public_port,
            protocol
        );

        Ok(binding)
    }

    pub fn tear_down(&self, local_port: u16) -> Result<(), AllocationError> {
        let binding = self
            .by_local_port
            .write()
            .remove(&local_port)
            .ok_or(AllocationError::NotMapped(local_port))?;
        self.by_public_port.write().remove(&binding.public_port);

        for task in binding.tasks.lock().drain(..) {
            task.abort();
        }
        binding.pool.drain();
        self.registry.release(binding.public_port);

        log::info!(
            "mapping released: local port {} (public port {})",
            local_port,
            binding.public_port
        );
        Ok(())
    }
}
