//! Reconcilers: map persisted rows to live resources and keep them converged.
//!
//! Every entity follows the same shape. `check` loads the row and repairs the
//! live resource, `create` writes the row then provisions, `delete` checks,
//! removes the row and only then tears the live resource down. Startup runs
//! `check` for every row and fails if anything cannot be repaired.

pub mod client;
pub mod client_network;
pub mod config;
pub mod dns;
pub mod network;

pub use client::ClientReconciler;
pub use client_network::{AssignmentStatus, ClientNetworkReconciler};
pub use config::ConfigReconciler;
pub use dns::{DnsReconciler, DnsStatus};
pub use network::{NetworkReconciler, NetworkStatus};

use crate::config::Config as Settings;
use crate::db::Storage;
use crate::db::models::{Credential, CredentialInput};
use crate::error::VpnmuxError;
use crate::net::{DnsRouter, ForwardingGuard, PolicyRouter, RouteTableAllocator};
use crate::openvpn::ConfigRenderer;
use crate::runtime::ContainerRuntime;
use crate::system::CommandRunner;
use crate::tunnel::TunnelController;
use std::sync::Arc;
use tracing::info;

/// Facade over the five reconcilers plus credential management.
#[derive(Clone)]
pub struct Reconciler {
    storage: Storage,
    pub configs: ConfigReconciler,
    pub networks: NetworkReconciler,
    pub clients: ClientReconciler,
    pub assignments: ClientNetworkReconciler,
    pub dns: DnsReconciler,
}

impl Reconciler {
    /// Wire every controller from one shared command runner and route table allocator.
    pub fn new(
        storage: Storage,
        runner: Arc<dyn CommandRunner>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: &Settings,
    ) -> Self {
        let tables = RouteTableAllocator::new(runner.clone());
        let tunnels = TunnelController::new(runtime, tables.clone(), settings.tunnel_settings());
        let guard = ForwardingGuard::new(runner.clone(), settings.interfaces());
        let policy = PolicyRouter::new(runner.clone());
        let dns_router = DnsRouter::new(runner, tables, &settings.dns_settings());

        let configs = ConfigReconciler::new(
            storage.clone(),
            ConfigRenderer::new(settings.openvpn_dir.clone()),
        );
        let networks = NetworkReconciler::new(storage.clone(), tunnels, configs.clone());
        let clients = ClientReconciler::new(storage.clone(), guard);
        let assignments = ClientNetworkReconciler::new(
            storage.clone(),
            policy,
            clients.clone(),
            networks.clone(),
        );
        let dns = DnsReconciler::new(storage.clone(), dns_router, networks.clone());

        Self {
            storage,
            configs,
            networks,
            clients,
            assignments,
            dns,
        }
    }

    /// Startup recovery, dependencies first.
    pub async fn startup(&self) -> Result<(), VpnmuxError> {
        self.configs.startup().await?;
        self.networks.startup().await?;
        self.clients.startup().await?;
        self.assignments.startup().await?;
        self.dns.startup().await?;
        info!("startup reconciliation complete");
        Ok(())
    }

    pub async fn list_credentials(&self) -> Result<Vec<Credential>, VpnmuxError> {
        self.storage.credentials().list().await
    }

    pub async fn get_credential(&self, id: &str) -> Result<Credential, VpnmuxError> {
        self.storage.credentials().get(id).await
    }

    pub async fn create_credential(
        &self,
        input: CredentialInput,
    ) -> Result<Credential, VpnmuxError> {
        let cred = self.storage.credentials().create(input).await?;
        info!(id = %cred.id, name = %cred.name, "credential created");
        Ok(cred)
    }

    async fn ensure_credential_unused(&self, id: &str) -> Result<(), VpnmuxError> {
        if let Some(cfg) = self.storage.configs().referencing(id).await?.first() {
            return Err(VpnmuxError::InUse {
                kind: "credential",
                id: id.to_string(),
                dependent: format!("config {}", cfg.id),
            });
        }
        Ok(())
    }

    /// Replace a credential that no config references.
    pub async fn update_credential(
        &self,
        id: &str,
        input: CredentialInput,
    ) -> Result<Credential, VpnmuxError> {
        self.storage.credentials().get(id).await?;
        self.ensure_credential_unused(id).await?;
        let cred = Credential {
            id: id.to_string(),
            name: input.name,
            value: input.value,
        };
        self.storage.credentials().update(&cred).await?;
        info!(%id, "credential updated");
        Ok(cred)
    }

    pub async fn delete_credential(&self, id: &str) -> Result<(), VpnmuxError> {
        self.storage.credentials().get(id).await?;
        self.ensure_credential_unused(id).await?;
        self.storage.credentials().delete(id).await?;
        info!(%id, "credential deleted");
        Ok(())
    }
}
