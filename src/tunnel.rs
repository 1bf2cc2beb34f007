//! Tunnel lifecycle: one labelled runtime network plus one VPN client container,
//! with a routing table whose default route points at the container.
//!
//! Nothing about a tunnel is cached. Every lookup re-derives it from runtime
//! inspection through [`observe`], then converges the routing table.

use crate::config::TunnelSettings;
use crate::error::VpnmuxError;
use crate::net::RouteTableAllocator;
use crate::runtime::{ContainerInspect, ContainerRuntime, ContainerSpec, Labels, NetworkInspect};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const ID_LABEL: &str = "id";
pub const ROUTE_TABLE_LABEL: &str = "route-table-id";

/// Live state of one tunnel, as recovered from the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tunnel {
    pub id: String,
    pub network_id: String,
    pub container_id: String,
    pub address: Ipv4Addr,
    pub route_table: u32,
    pub running: bool,
}

/// Derive tunnel records from inspection data.
///
/// Only objects carrying the ownership label are considered. Every managed
/// container must pair with exactly one managed network through the `id` label,
/// and the two sets must have the same size.
pub fn observe(
    containers: &[ContainerInspect],
    networks: &[NetworkInspect],
    settings: &TunnelSettings,
) -> Result<Vec<Tunnel>, VpnmuxError> {
    let owned = |labels: &Labels| {
        labels.get(&settings.label_key).map(String::as_str) == Some(settings.label_value.as_str())
    };
    let containers: Vec<&ContainerInspect> =
        containers.iter().filter(|c| owned(c.labels())).collect();
    let networks: Vec<&NetworkInspect> = networks.iter().filter(|n| owned(&n.labels)).collect();

    if containers.len() != networks.len() {
        return Err(VpnmuxError::Consistency(format!(
            "found {} tunnel containers but {} tunnel networks",
            containers.len(),
            networks.len()
        )));
    }

    let mut by_id: BTreeMap<&str, &NetworkInspect> = BTreeMap::new();
    for &network in &networks {
        let id = network.label(ID_LABEL).ok_or_else(|| {
            VpnmuxError::Consistency(format!("network {} has no {ID_LABEL} label", network.id))
        })?;
        if by_id.insert(id, network).is_some() {
            return Err(VpnmuxError::Consistency(format!(
                "more than one network labelled {ID_LABEL}={id}"
            )));
        }
    }

    let mut tunnels = Vec::with_capacity(containers.len());
    for container in containers {
        let id = container.label(ID_LABEL).ok_or_else(|| {
            VpnmuxError::Consistency(format!("container {} has no {ID_LABEL} label", container.id))
        })?;
        let network = by_id.remove(id).ok_or_else(|| {
            VpnmuxError::Consistency(format!("container {} has no network for {id}", container.id))
        })?;

        let route_table = container
            .label(ROUTE_TABLE_LABEL)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| {
                VpnmuxError::Consistency(format!(
                    "container {} has no valid {ROUTE_TABLE_LABEL} label",
                    container.id
                ))
            })?;
        let address = container
            .ip_on(&network.name)
            .and_then(|ip| ip.parse().ok())
            .ok_or_else(|| {
                VpnmuxError::Consistency(format!(
                    "container {} has no address on network {}",
                    container.id, network.name
                ))
            })?;

        tunnels.push(Tunnel {
            id: id.to_string(),
            network_id: network.id.clone(),
            container_id: container.id.clone(),
            address,
            route_table,
            running: container.state.running,
        });
    }

    tunnels.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tunnels)
}

#[derive(Clone)]
pub struct TunnelController {
    runtime: Arc<dyn ContainerRuntime>,
    tables: RouteTableAllocator,
    settings: TunnelSettings,
}

impl TunnelController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tables: RouteTableAllocator,
        settings: TunnelSettings,
    ) -> Self {
        Self {
            runtime,
            tables,
            settings,
        }
    }

    fn owner(id: &str) -> String {
        format!("tunnel:{id}")
    }

    fn managed(&self) -> Labels {
        Labels::from([(self.settings.label_key.clone(), self.settings.label_value.clone())])
    }

    fn labels_for(&self, id: &str) -> Labels {
        let mut labels = self.managed();
        labels.insert(ID_LABEL.to_string(), id.to_string());
        labels
    }

    /// Create the network and container for `id`, mounting `config_dir`.
    ///
    /// A failure after the network exists leaves it in place; the route table
    /// reservation is released since no container references it.
    pub async fn create(&self, id: &str, config_dir: &Path) -> Result<Tunnel, VpnmuxError> {
        let table = self.tables.allocate(&Self::owner(id)).await?;

        if let Err(err) = self.start(id, table, config_dir).await {
            self.tables.release(table);
            return Err(err);
        }
        info!(%id, table, "tunnel created");
        self.recover(id).await
    }

    async fn start(&self, id: &str, table: u32, config_dir: &Path) -> Result<(), VpnmuxError> {
        let labels = self.labels_for(id);
        self.runtime.create_network(id, &labels).await?;

        let mut container_labels = labels;
        container_labels.insert(ROUTE_TABLE_LABEL.to_string(), table.to_string());
        let spec = ContainerSpec {
            network: id.to_string(),
            image: self.settings.image.clone(),
            config_dir: config_dir.to_path_buf(),
            labels: container_labels,
        };
        if let Err(err) = self.runtime.create_container(&spec).await {
            warn!(%id, error = %err, "tunnel container failed to start; network left behind");
            return Err(err);
        }
        Ok(())
    }

    async fn inspect_all(&self, filter: &Labels) -> Result<Vec<Tunnel>, VpnmuxError> {
        let mut containers = Vec::new();
        for cid in self.runtime.list_containers(filter).await? {
            containers.push(self.runtime.inspect_container(&cid).await?);
        }
        let mut networks = Vec::new();
        for nid in self.runtime.list_networks(filter).await? {
            networks.push(self.runtime.inspect_network(&nid).await?);
        }
        observe(&containers, &networks, &self.settings)
    }

    async fn converge(&self, tunnel: &Tunnel) -> Result<(), VpnmuxError> {
        self.tables
            .claim(tunnel.route_table, &Self::owner(&tunnel.id))?;
        self.tables
            .ensure_default_route(tunnel.route_table, tunnel.address)
            .await
    }

    /// Re-derive the tunnel for `id` from the runtime and repair its route.
    pub async fn recover(&self, id: &str) -> Result<Tunnel, VpnmuxError> {
        let mut tunnels = self.inspect_all(&self.labels_for(id)).await?;
        let tunnel = match tunnels.len() {
            0 => return Err(VpnmuxError::not_found("tunnel", id)),
            1 => tunnels.remove(0),
            n => {
                return Err(VpnmuxError::Consistency(format!(
                    "found {n} tunnels labelled {ID_LABEL}={id}"
                )));
            }
        };
        self.converge(&tunnel).await?;
        Ok(tunnel)
    }

    /// Recover every managed tunnel on the host.
    pub async fn recover_all(&self) -> Result<Vec<Tunnel>, VpnmuxError> {
        let tunnels = self.inspect_all(&self.managed()).await?;
        for tunnel in &tunnels {
            self.converge(tunnel).await?;
        }
        info!(count = tunnels.len(), "tunnels recovered");
        Ok(tunnels)
    }

    /// Tear the tunnel down. Every step is attempted; errors are aggregated.
    pub async fn close(&self, tunnel: &Tunnel) -> Result<(), VpnmuxError> {
        let mut errors = Vec::new();

        match self.runtime.remove_container(&tunnel.container_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => errors.push(err),
        }
        match self.runtime.remove_network(&tunnel.network_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => errors.push(err),
        }
        match self.tables.remove_default_route(tunnel.route_table).await {
            Ok(()) => self.tables.release(tunnel.route_table),
            Err(err) => errors.push(err),
        }

        if errors.is_empty() {
            info!(id = %tunnel.id, table = tunnel.route_table, "tunnel closed");
        }
        VpnmuxError::collect(errors)
    }
}
