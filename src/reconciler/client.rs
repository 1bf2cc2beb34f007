use crate::db::Storage;
use crate::db::models::{Client, ClientInput};
use crate::error::VpnmuxError;
use crate::net::ForwardingGuard;
use std::net::Ipv4Addr;
use tracing::info;

pub(crate) fn parse_address(address: &str) -> Result<Ipv4Addr, VpnmuxError> {
    address
        .trim()
        .parse()
        .map_err(|_| VpnmuxError::Invalid(format!("{address:?} is not an IPv4 address")))
}

/// Keeps a forwarding guard rule installed for every client.
#[derive(Clone)]
pub struct ClientReconciler {
    storage: Storage,
    guard: ForwardingGuard,
}

impl ClientReconciler {
    pub fn new(storage: Storage, guard: ForwardingGuard) -> Self {
        Self { storage, guard }
    }

    pub async fn startup(&self) -> Result<(), VpnmuxError> {
        let clients = self.storage.clients().list().await?;
        for client in &clients {
            self.check(&client.id).await?;
        }
        info!(count = clients.len(), "clients reconciled");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Client>, VpnmuxError> {
        self.storage.clients().list().await
    }

    pub async fn check(&self, id: &str) -> Result<(Client, Ipv4Addr), VpnmuxError> {
        let client = self.storage.clients().get(id).await?;
        let address = parse_address(&client.address)?;
        self.guard.ensure(address).await?;
        Ok((client, address))
    }

    pub async fn create(&self, mut input: ClientInput) -> Result<Client, VpnmuxError> {
        let address = parse_address(&input.address)?;
        input.address = address.to_string();
        self.ensure_address_free(address, None).await?;
        let client = self.storage.clients().create(input).await?;

        self.guard.ensure(address).await?;
        info!(id = %client.id, %address, "client created");
        let (client, _) = self.check(&client.id).await?;
        Ok(client)
    }

    async fn ensure_address_free(
        &self,
        address: Ipv4Addr,
        except: Option<&str>,
    ) -> Result<(), VpnmuxError> {
        let wanted = address.to_string();
        let taken = self
            .storage
            .clients()
            .list()
            .await?
            .into_iter()
            .any(|c| c.address == wanted && Some(c.id.as_str()) != except);
        if taken {
            return Err(VpnmuxError::Invalid(format!(
                "address {address} already belongs to another client"
            )));
        }
        Ok(())
    }

    async fn ensure_unassigned(&self, id: &str) -> Result<(), VpnmuxError> {
        match self.storage.client_networks().get(id).await {
            Ok(assignment) => Err(VpnmuxError::InUse {
                kind: "client",
                id: id.to_string(),
                dependent: format!("network {}", assignment.network_id),
            }),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Rename or re-address an unassigned client, moving its guard rule.
    pub async fn update(&self, id: &str, input: ClientInput) -> Result<Client, VpnmuxError> {
        let (current, old_address) = self.check(id).await?;
        self.ensure_unassigned(id).await?;
        let address = parse_address(&input.address)?;
        self.ensure_address_free(address, Some(id)).await?;

        let client = Client {
            id: current.id,
            name: input.name,
            address: address.to_string(),
        };
        self.storage.clients().update(&client).await?;
        if address != old_address {
            self.guard.ensure(address).await?;
            self.guard.remove(old_address).await?;
            info!(%id, old = %old_address, new = %address, "client re-addressed");
        }
        Ok(client)
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let (_, address) = self.check(id).await?;
        self.ensure_unassigned(id).await?;
        self.storage.clients().delete(id).await?;
        self.guard.remove(address).await?;
        info!(%id, %address, "client deleted");
        Ok(())
    }
}
