use super::network::NetworkReconciler;
use crate::db::Storage;
use crate::db::models::DnsRoute;
use crate::error::VpnmuxError;
use crate::net::DnsRouter;
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsStatus {
    pub network_id: String,
    pub route_table: u32,
    pub gateway: Ipv4Addr,
}

/// Routes marked DNS traffic through the tunnel named by the singleton row.
#[derive(Clone)]
pub struct DnsReconciler {
    storage: Storage,
    router: DnsRouter,
    networks: NetworkReconciler,
}

impl DnsReconciler {
    pub fn new(storage: Storage, router: DnsRouter, networks: NetworkReconciler) -> Self {
        Self {
            storage,
            router,
            networks,
        }
    }

    pub async fn startup(&self) -> Result<(), VpnmuxError> {
        self.router.ensure_mark().await?;
        match self.check().await? {
            Some(status) => {
                info!(network = %status.network_id, table = status.route_table, "dns route reconciled")
            }
            None => info!("no dns route configured"),
        }
        Ok(())
    }

    /// Converge the kernel to the persisted route, or to no DNS table at all.
    pub async fn check(&self) -> Result<Option<DnsStatus>, VpnmuxError> {
        let route = match self.storage.dns().get().await {
            Ok(route) => route,
            Err(err) if err.is_not_found() => {
                self.router.clear().await?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let network = self.networks.check(&route.network_id).await?;
        let gateway = network.tunnel.address;
        let route_table = self.router.route(gateway).await?;
        Ok(Some(DnsStatus {
            network_id: route.network_id,
            route_table,
            gateway,
        }))
    }

    /// The current route, `NotFound` when none is configured.
    pub async fn get(&self) -> Result<DnsStatus, VpnmuxError> {
        self.check()
            .await?
            .ok_or_else(|| VpnmuxError::not_found("dns route", "default"))
    }

    /// Point DNS at `network_id`, replacing any previous choice.
    pub async fn set(&self, network_id: &str) -> Result<DnsStatus, VpnmuxError> {
        self.networks.check(network_id).await?;
        self.storage
            .dns()
            .put(&DnsRoute {
                network_id: network_id.to_string(),
            })
            .await?;
        info!(network = %network_id, "dns route set");
        self.get().await
    }

    pub async fn clear(&self) -> Result<(), VpnmuxError> {
        self.storage.dns().get().await?;
        self.storage.dns().delete().await?;
        self.router.clear().await?;
        info!("dns route cleared");
        Ok(())
    }
}
