use super::client::{ClientReconciler, parse_address};
use super::network::NetworkReconciler;
use crate::db::Storage;
use crate::db::models::ClientNetwork;
use crate::error::VpnmuxError;
use crate::net::PolicyRouter;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// A client's assignment and the route table its traffic is looked up in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentStatus {
    pub client_id: String,
    pub network_id: String,
    pub route_table: u32,
}

/// Steers each assigned client into its network's route table.
#[derive(Clone)]
pub struct ClientNetworkReconciler {
    storage: Storage,
    policy: PolicyRouter,
    clients: ClientReconciler,
    networks: NetworkReconciler,
}

impl ClientNetworkReconciler {
    pub fn new(
        storage: Storage,
        policy: PolicyRouter,
        clients: ClientReconciler,
        networks: NetworkReconciler,
    ) -> Self {
        Self {
            storage,
            policy,
            clients,
            networks,
        }
    }

    /// Converge every assignment, then clear rules left for unassigned clients.
    pub async fn startup(&self) -> Result<(), VpnmuxError> {
        let assignments = self.storage.client_networks().list().await?;
        for assignment in &assignments {
            self.check(&assignment.client_id).await?;
        }

        let assigned: BTreeSet<&str> = assignments.iter().map(|a| a.client_id.as_str()).collect();
        for client in self.storage.clients().list().await? {
            if assigned.contains(client.id.as_str()) {
                continue;
            }
            let address = parse_address(&client.address)?;
            debug!(id = %client.id, %address, "clearing rules of unassigned client");
            self.policy.clear_routes(address).await?;
        }
        info!(count = assignments.len(), "client assignments reconciled");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ClientNetwork>, VpnmuxError> {
        self.storage.client_networks().list().await
    }

    pub async fn check(&self, client_id: &str) -> Result<AssignmentStatus, VpnmuxError> {
        let assignment = self.storage.client_networks().get(client_id).await?;
        let (_, address) = self.clients.check(client_id).await?;
        let network = self.networks.check(&assignment.network_id).await?;

        self.policy
            .set_route(address, network.tunnel.route_table)
            .await?;
        Ok(AssignmentStatus {
            client_id: assignment.client_id,
            network_id: assignment.network_id,
            route_table: network.tunnel.route_table,
        })
    }

    /// Assign a client to a network, moving it if it was assigned elsewhere.
    pub async fn assign(
        &self,
        client_id: &str,
        network_id: &str,
    ) -> Result<AssignmentStatus, VpnmuxError> {
        let (_, address) = self.clients.check(client_id).await?;
        let network = self.networks.check(network_id).await?;

        let assignment = ClientNetwork {
            client_id: client_id.to_string(),
            network_id: network_id.to_string(),
        };
        self.storage.client_networks().put(&assignment).await?;
        self.policy
            .set_route(address, network.tunnel.route_table)
            .await?;
        info!(client = %client_id, network = %network_id, table = network.tunnel.route_table, "client assigned");
        self.check(client_id).await
    }

    pub async fn unassign(&self, client_id: &str) -> Result<(), VpnmuxError> {
        self.check(client_id).await?;
        let client = self.storage.clients().get(client_id).await?;
        let address = parse_address(&client.address)?;

        self.storage.client_networks().delete(client_id).await?;
        self.policy.clear_routes(address).await?;
        info!(client = %client_id, "client unassigned");
        Ok(())
    }
}
