use super::{
    ContainerConfig, ContainerInspect, ContainerRuntime, ContainerSpec, ContainerState,
    EndpointSettings, Ipam, IpamConfig, Labels, NetworkInspect, NetworkSettings, matches_labels,
};
use crate::error::VpnmuxError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MockState {
    next_id: u32,
    next_octet: u32,
    networks: BTreeMap<String, MockNetwork>,
    containers: BTreeMap<String, ContainerInspect>,
    failing: BTreeSet<&'static str>,
}

#[derive(Debug, Clone)]
struct MockNetwork {
    inspect: NetworkInspect,
    octet: u32,
    next_host: u32,
}

/// In-memory container runtime with labels and a tiny IPAM: the n-th network
/// gets `172.18.n.0/24`, its gateway is `.1` and containers start at `.2`.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: RwLock<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation (e.g. `"create_container"`) fail until cleared.
    pub async fn fail(&self, operation: &'static str) {
        self.state.write().await.failing.insert(operation);
    }

    pub async fn clear_failures(&self) {
        self.state.write().await.failing.clear();
    }

    pub async fn container_count(&self) -> usize {
        self.state.read().await.containers.len()
    }

    pub async fn network_count(&self) -> usize {
        self.state.read().await.networks.len()
    }

    /// Re-address a container on `network`, as if it was recreated by the runtime.
    pub async fn readdress(&self, container: &str, network: &str, ip: &str) {
        let mut state = self.state.write().await;
        if let Some(endpoint) = state
            .containers
            .get_mut(container)
            .and_then(|c| c.network_settings.networks.get_mut(network))
        {
            endpoint.ip_address = ip.to_string();
        }
    }

    /// Remove a container without going through any controller.
    pub async fn drop_container(&self, id: &str) {
        self.state.write().await.containers.remove(id);
    }

    fn check(state: &MockState, operation: &'static str) -> Result<(), VpnmuxError> {
        if state.failing.contains(operation) {
            return Err(VpnmuxError::CommandFailed {
                command: format!("mock {operation}"),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }

    fn network_by_ref(&mut self, reference: &str) -> Option<&mut MockNetwork> {
        self.networks
            .values_mut()
            .find(|n| n.inspect.id == reference || n.inspect.name == reference)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_network(&self, name: &str, labels: &Labels) -> Result<String, VpnmuxError> {
        let mut state = self.state.write().await;
        Self::check(&state, "create_network")?;
        if state.networks.values().any(|n| n.inspect.name == name) {
            return Err(VpnmuxError::CommandFailed {
                command: format!("mock create_network {name}"),
                code: Some(1),
                stderr: format!("network with name {name} already exists"),
            });
        }

        let id = state.next_id("net");
        let octet = state.next_octet;
        state.next_octet += 1;
        let network = MockNetwork {
            inspect: NetworkInspect {
                id: id.clone(),
                name: name.to_string(),
                labels: labels.clone(),
                ipam: Ipam {
                    config: vec![IpamConfig {
                        subnet: format!("172.18.{octet}.0/24"),
                        gateway: format!("172.18.{octet}.1"),
                    }],
                },
            },
            octet,
            next_host: 2,
        };
        state.networks.insert(id.clone(), network);
        Ok(id)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, VpnmuxError> {
        let mut state = self.state.write().await;
        Self::check(&state, "create_container")?;
        let id = state.next_id("ctr");

        let Some(network) = state.network_by_ref(&spec.network) else {
            return Err(VpnmuxError::not_found("docker network", &spec.network));
        };
        let ip = format!("172.18.{}.{}", network.octet, network.next_host);
        network.next_host += 1;
        let endpoint = EndpointSettings {
            ip_address: ip,
            gateway: network.inspect.gateway().unwrap_or_default().to_string(),
        };
        let network_name = network.inspect.name.clone();

        let container = ContainerInspect {
            id: id.clone(),
            name: format!("/{id}"),
            config: ContainerConfig {
                labels: spec.labels.clone(),
            },
            state: ContainerState {
                status: "running".to_string(),
                running: true,
            },
            network_settings: NetworkSettings {
                networks: HashMap::from([(network_name, endpoint)]),
            },
        };
        state.containers.insert(id.clone(), container);
        Ok(id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, VpnmuxError> {
        let state = self.state.read().await;
        Self::check(&state, "inspect_container")?;
        state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| VpnmuxError::not_found("container", id))
    }

    async fn inspect_network(&self, id: &str) -> Result<NetworkInspect, VpnmuxError> {
        let state = self.state.read().await;
        Self::check(&state, "inspect_network")?;
        state
            .networks
            .values()
            .find(|n| n.inspect.id == id || n.inspect.name == id)
            .map(|n| n.inspect.clone())
            .ok_or_else(|| VpnmuxError::not_found("docker network", id))
    }

    async fn list_containers(&self, filter: &Labels) -> Result<Vec<String>, VpnmuxError> {
        let state = self.state.read().await;
        Self::check(&state, "list_containers")?;
        Ok(state
            .containers
            .values()
            .filter(|c| matches_labels(c.labels(), filter))
            .map(|c| c.id.clone())
            .collect())
    }

    async fn list_networks(&self, filter: &Labels) -> Result<Vec<String>, VpnmuxError> {
        let state = self.state.read().await;
        Self::check(&state, "list_networks")?;
        Ok(state
            .networks
            .values()
            .filter(|n| matches_labels(&n.inspect.labels, filter))
            .map(|n| n.inspect.id.clone())
            .collect())
    }

    async fn remove_container(&self, id: &str) -> Result<(), VpnmuxError> {
        let mut state = self.state.write().await;
        Self::check(&state, "remove_container")?;
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| VpnmuxError::not_found("container", id))
    }

    async fn remove_network(&self, id: &str) -> Result<(), VpnmuxError> {
        let mut state = self.state.write().await;
        Self::check(&state, "remove_network")?;
        let Some(network) = state.network_by_ref(id).map(|n| n.inspect.clone()) else {
            return Err(VpnmuxError::not_found("docker network", id));
        };
        let attached = state
            .containers
            .values()
            .any(|c| c.network_settings.networks.contains_key(&network.name));
        if attached {
            return Err(VpnmuxError::CommandFailed {
                command: format!("mock remove_network {id}"),
                code: Some(1),
                stderr: format!("network {} has active endpoints", network.name),
            });
        }
        state.networks.remove(&network.id);
        Ok(())
    }
}
