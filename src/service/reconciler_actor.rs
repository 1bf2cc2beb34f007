use crate::db::models::{
    Client, ClientInput, ClientNetwork, Config, ConfigInput, Credential, CredentialInput, Network,
    NetworkInput,
};
use crate::error::VpnmuxError;
use crate::reconciler::{AssignmentStatus, DnsStatus, NetworkStatus, Reconciler};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{debug, info};

type Reply<T> = RpcReplyPort<Result<T, VpnmuxError>>;

/// Every reconciler operation, executed one at a time by the actor.
#[derive(Debug)]
pub enum ReconcilerMessage {
    ListCredentials(Reply<Vec<Credential>>),
    GetCredential(String, Reply<Credential>),
    CreateCredential(CredentialInput, Reply<Credential>),
    UpdateCredential(String, CredentialInput, Reply<Credential>),
    DeleteCredential(String, Reply<()>),

    ListConfigs(Reply<Vec<Config>>),
    GetConfig(String, Reply<Config>),
    CreateConfig(ConfigInput, Reply<Config>),
    UpdateConfig(String, ConfigInput, Reply<Config>),
    DeleteConfig(String, Reply<()>),

    ListNetworks(Reply<Vec<Network>>),
    GetNetwork(String, Reply<NetworkStatus>),
    CreateNetwork(NetworkInput, Reply<NetworkStatus>),
    UpdateNetwork(String, Reply<NetworkStatus>),
    DeleteNetwork(String, Reply<()>),

    ListClients(Reply<Vec<Client>>),
    GetClient(String, Reply<Client>),
    CreateClient(ClientInput, Reply<Client>),
    UpdateClient(String, ClientInput, Reply<Client>),
    DeleteClient(String, Reply<()>),

    ListAssignments(Reply<Vec<ClientNetwork>>),
    GetAssignment(String, Reply<AssignmentStatus>),
    Assign(String, String, Reply<AssignmentStatus>),
    Unassign(String, Reply<()>),

    GetDns(Reply<DnsStatus>),
    SetDns(String, Reply<DnsStatus>),
    ClearDns(Reply<()>),
}

/// Handle for interacting with the reconciler actor.
#[derive(Clone)]
pub struct ReconcilerHandle {
    actor: ActorRef<ReconcilerMessage>,
}

macro_rules! rpc {
    ($handle:expr, $variant:ident $(, $arg:expr)*) => {
        ractor::call!($handle.actor, ReconcilerMessage::$variant $(, $arg)*).map_err(|e| {
            VpnmuxError::RactorError(format!(concat!(stringify!($variant), " RPC failed: {}"), e))
        })?
    };
}

impl ReconcilerHandle {
    pub async fn list_credentials(&self) -> Result<Vec<Credential>, VpnmuxError> {
        rpc!(self, ListCredentials)
    }

    pub async fn get_credential(&self, id: String) -> Result<Credential, VpnmuxError> {
        rpc!(self, GetCredential, id)
    }

    pub async fn create_credential(
        &self,
        input: CredentialInput,
    ) -> Result<Credential, VpnmuxError> {
        rpc!(self, CreateCredential, input)
    }

    pub async fn update_credential(
        &self,
        id: String,
        input: CredentialInput,
    ) -> Result<Credential, VpnmuxError> {
        rpc!(self, UpdateCredential, id, input)
    }

    pub async fn delete_credential(&self, id: String) -> Result<(), VpnmuxError> {
        rpc!(self, DeleteCredential, id)
    }

    pub async fn list_configs(&self) -> Result<Vec<Config>, VpnmuxError> {
        rpc!(self, ListConfigs)
    }

    pub async fn get_config(&self, id: String) -> Result<Config, VpnmuxError> {
        rpc!(self, GetConfig, id)
    }

    pub async fn create_config(&self, input: ConfigInput) -> Result<Config, VpnmuxError> {
        rpc!(self, CreateConfig, input)
    }

    pub async fn update_config(
        &self,
        id: String,
        input: ConfigInput,
    ) -> Result<Config, VpnmuxError> {
        rpc!(self, UpdateConfig, id, input)
    }

    pub async fn delete_config(&self, id: String) -> Result<(), VpnmuxError> {
        rpc!(self, DeleteConfig, id)
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>, VpnmuxError> {
        rpc!(self, ListNetworks)
    }

    pub async fn get_network(&self, id: String) -> Result<NetworkStatus, VpnmuxError> {
        rpc!(self, GetNetwork, id)
    }

    pub async fn create_network(&self, input: NetworkInput) -> Result<NetworkStatus, VpnmuxError> {
        rpc!(self, CreateNetwork, input)
    }

    pub async fn update_network(&self, id: String) -> Result<NetworkStatus, VpnmuxError> {
        rpc!(self, UpdateNetwork, id)
    }

    pub async fn delete_network(&self, id: String) -> Result<(), VpnmuxError> {
        rpc!(self, DeleteNetwork, id)
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>, VpnmuxError> {
        rpc!(self, ListClients)
    }

    pub async fn get_client(&self, id: String) -> Result<Client, VpnmuxError> {
        rpc!(self, GetClient, id)
    }

    pub async fn create_client(&self, input: ClientInput) -> Result<Client, VpnmuxError> {
        rpc!(self, CreateClient, input)
    }

    pub async fn update_client(
        &self,
        id: String,
        input: ClientInput,
    ) -> Result<Client, VpnmuxError> {
        rpc!(self, UpdateClient, id, input)
    }

    pub async fn delete_client(&self, id: String) -> Result<(), VpnmuxError> {
        rpc!(self, DeleteClient, id)
    }

    pub async fn list_assignments(&self) -> Result<Vec<ClientNetwork>, VpnmuxError> {
        rpc!(self, ListAssignments)
    }

    pub async fn get_assignment(&self, client_id: String) -> Result<AssignmentStatus, VpnmuxError> {
        rpc!(self, GetAssignment, client_id)
    }

    pub async fn assign(
        &self,
        client_id: String,
        network_id: String,
    ) -> Result<AssignmentStatus, VpnmuxError> {
        rpc!(self, Assign, client_id, network_id)
    }

    pub async fn unassign(&self, client_id: String) -> Result<(), VpnmuxError> {
        rpc!(self, Unassign, client_id)
    }

    pub async fn get_dns(&self) -> Result<DnsStatus, VpnmuxError> {
        rpc!(self, GetDns)
    }

    pub async fn set_dns(&self, network_id: String) -> Result<DnsStatus, VpnmuxError> {
        rpc!(self, SetDns, network_id)
    }

    pub async fn clear_dns(&self) -> Result<(), VpnmuxError> {
        rpc!(self, ClearDns)
    }

    /// Stop the actor after the message in flight completes.
    pub fn stop(&self) {
        self.actor.stop(Some("shutdown".to_string()));
    }
}

/// ractor-based reconciler actor; the mailbox serializes every operation.
struct ReconcilerActor;

#[ractor::async_trait]
impl Actor for ReconcilerActor {
    type Msg = ReconcilerMessage;
    type State = Reconciler;
    type Arguments = Reconciler;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        reconciler: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        reconciler
            .startup()
            .await
            .map_err(|e| ActorProcessingErr::from(format!("startup reconciliation failed: {e}")))?;
        info!("ReconcilerActor started");
        Ok(reconciler)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let r = &*state;
        match message {
            ReconcilerMessage::ListCredentials(rp) => {
                let _ = rp.send(r.list_credentials().await);
            }
            ReconcilerMessage::GetCredential(id, rp) => {
                let _ = rp.send(r.get_credential(&id).await);
            }
            ReconcilerMessage::CreateCredential(input, rp) => {
                let _ = rp.send(r.create_credential(input).await);
            }
            ReconcilerMessage::UpdateCredential(id, input, rp) => {
                let _ = rp.send(r.update_credential(&id, input).await);
            }
            ReconcilerMessage::DeleteCredential(id, rp) => {
                let _ = rp.send(r.delete_credential(&id).await);
            }

            ReconcilerMessage::ListConfigs(rp) => {
                let _ = rp.send(r.configs.list().await);
            }
            ReconcilerMessage::GetConfig(id, rp) => {
                let _ = rp.send(r.configs.check(&id).await.map(|(cfg, _)| cfg));
            }
            ReconcilerMessage::CreateConfig(input, rp) => {
                let _ = rp.send(r.configs.create(input).await);
            }
            ReconcilerMessage::UpdateConfig(id, input, rp) => {
                let _ = rp.send(r.configs.update(&id, input).await);
            }
            ReconcilerMessage::DeleteConfig(id, rp) => {
                let _ = rp.send(r.configs.delete(&id).await);
            }

            ReconcilerMessage::ListNetworks(rp) => {
                let _ = rp.send(r.networks.list().await);
            }
            ReconcilerMessage::GetNetwork(id, rp) => {
                let _ = rp.send(r.networks.check(&id).await);
            }
            ReconcilerMessage::CreateNetwork(input, rp) => {
                let _ = rp.send(r.networks.create(input).await);
            }
            ReconcilerMessage::UpdateNetwork(id, rp) => {
                let _ = rp.send(r.networks.update(&id).await);
            }
            ReconcilerMessage::DeleteNetwork(id, rp) => {
                let _ = rp.send(r.networks.delete(&id).await);
            }

            ReconcilerMessage::ListClients(rp) => {
                let _ = rp.send(r.clients.list().await);
            }
            ReconcilerMessage::GetClient(id, rp) => {
                let _ = rp.send(r.clients.check(&id).await.map(|(client, _)| client));
            }
            ReconcilerMessage::CreateClient(input, rp) => {
                let _ = rp.send(r.clients.create(input).await);
            }
            ReconcilerMessage::UpdateClient(id, input, rp) => {
                let _ = rp.send(r.clients.update(&id, input).await);
            }
            ReconcilerMessage::DeleteClient(id, rp) => {
                let _ = rp.send(r.clients.delete(&id).await);
            }

            ReconcilerMessage::ListAssignments(rp) => {
                let _ = rp.send(r.assignments.list().await);
            }
            ReconcilerMessage::GetAssignment(client_id, rp) => {
                let _ = rp.send(r.assignments.check(&client_id).await);
            }
            ReconcilerMessage::Assign(client_id, network_id, rp) => {
                let _ = rp.send(r.assignments.assign(&client_id, &network_id).await);
            }
            ReconcilerMessage::Unassign(client_id, rp) => {
                let _ = rp.send(r.assignments.unassign(&client_id).await);
            }

            ReconcilerMessage::GetDns(rp) => {
                let _ = rp.send(r.dns.get().await);
            }
            ReconcilerMessage::SetDns(network_id, rp) => {
                let _ = rp.send(r.dns.set(&network_id).await);
            }
            ReconcilerMessage::ClearDns(rp) => {
                let _ = rp.send(r.dns.clear().await);
            }
        }
        debug!("reconciler message handled");
        Ok(())
    }
}

/// Run startup recovery inside a fresh actor and return its handle.
///
/// Fails when any persisted entity cannot be converged.
pub async fn spawn(reconciler: Reconciler) -> Result<ReconcilerHandle, VpnmuxError> {
    let (actor, _jh) = Actor::spawn(None, ReconcilerActor, reconciler)
        .await
        .map_err(|e| VpnmuxError::RactorError(format!("ReconcilerActor failed to start: {e}")))?;
    Ok(ReconcilerHandle { actor })
}
