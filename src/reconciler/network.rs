use super::config::ConfigReconciler;
use crate::db::Storage;
use crate::db::models::{Network, NetworkInput};
use crate::error::VpnmuxError;
use crate::tunnel::{Tunnel, TunnelController};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A persisted network together with its live tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    #[serde(flatten)]
    pub network: Network,
    pub tunnel: Tunnel,
}

#[derive(Clone)]
pub struct NetworkReconciler {
    storage: Storage,
    tunnels: TunnelController,
    configs: ConfigReconciler,
}

impl NetworkReconciler {
    pub fn new(storage: Storage, tunnels: TunnelController, configs: ConfigReconciler) -> Self {
        Self {
            storage,
            tunnels,
            configs,
        }
    }

    /// Recover every managed tunnel and pair it with its persisted network.
    ///
    /// A persisted network without a tunnel aborts startup. Tunnels without a
    /// persisted network are left running and reported.
    pub async fn startup(&self) -> Result<(), VpnmuxError> {
        let mut live: BTreeMap<String, Tunnel> = self
            .tunnels
            .recover_all()
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        let networks = self.storage.networks().list().await?;
        for network in &networks {
            if live.remove(&network.id).is_none() {
                return Err(VpnmuxError::Consistency(format!(
                    "network {} has no live tunnel",
                    network.id
                )));
            }
        }
        for orphan in live.values() {
            warn!(id = %orphan.id, container = %orphan.container_id, "tunnel has no persisted network");
        }
        info!(count = networks.len(), "networks reconciled");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Network>, VpnmuxError> {
        self.storage.networks().list().await
    }

    pub async fn check(&self, id: &str) -> Result<NetworkStatus, VpnmuxError> {
        let network = self.storage.networks().get(id).await?;
        let tunnel = match self.tunnels.recover(id).await {
            Ok(tunnel) => tunnel,
            Err(err) if err.is_not_found() => {
                return Err(VpnmuxError::Consistency(format!(
                    "network {id} has no live tunnel"
                )));
            }
            Err(err) => return Err(err),
        };
        Ok(NetworkStatus { network, tunnel })
    }

    /// Persist a network and start its tunnel from the referenced config.
    pub async fn create(&self, input: NetworkInput) -> Result<NetworkStatus, VpnmuxError> {
        let (_, rendered) = self.configs.check(&input.config_id).await?;
        let network = self.storage.networks().create(input).await?;

        let tunnel = self.tunnels.create(&network.id, rendered.dir()).await?;
        info!(id = %network.id, table = tunnel.route_table, address = %tunnel.address, "network created");
        self.check(&network.id).await
    }

    pub async fn update(&self, id: &str) -> Result<NetworkStatus, VpnmuxError> {
        self.storage.networks().get(id).await?;
        Err(VpnmuxError::Unsupported(
            "networks cannot be updated; delete and create the network instead",
        ))
    }

    async fn ensure_unused(&self, id: &str) -> Result<(), VpnmuxError> {
        if let Some(assignment) = self
            .storage
            .client_networks()
            .for_network(id)
            .await?
            .first()
        {
            return Err(VpnmuxError::InUse {
                kind: "network",
                id: id.to_string(),
                dependent: format!("client {}", assignment.client_id),
            });
        }
        match self.storage.dns().get().await {
            Ok(route) if route.network_id == id => Err(VpnmuxError::InUse {
                kind: "network",
                id: id.to_string(),
                dependent: "dns route".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let status = self.check(id).await?;
        self.ensure_unused(id).await?;
        self.storage.networks().delete(id).await?;
        self.tunnels.close(&status.tunnel).await?;
        info!(%id, "network deleted");
        Ok(())
    }
}
