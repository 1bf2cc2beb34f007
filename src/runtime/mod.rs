//! Container runtime collaborator.
//!
//! The tunnel controller only needs a narrow slice of a container runtime:
//! labelled networks, labelled containers attached to them, inspection and
//! removal. [`DockerCli`] drives the docker CLI through the command port;
//! [`MockRuntime`] keeps everything in memory for tests.

pub mod docker;
pub mod mock;

pub use docker::DockerCli;
pub use mock::MockRuntime;

use crate::error::VpnmuxError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub type Labels = BTreeMap<String, String>;

/// Everything needed to start one tunnel container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub network: String,
    pub image: String,
    /// Host directory mounted at [`CONFIG_MOUNT`].
    pub config_dir: PathBuf,
    pub labels: Labels,
}

/// Where the rendered tunnel configuration appears inside the container.
pub const CONFIG_MOUNT: &str = "/etc/openvpn/config";
/// Entry point argument handed to the tunnel image.
pub const CONFIG_FILE: &str = "openvpn.conf";

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a network and return its runtime id.
    async fn create_network(&self, name: &str, labels: &Labels) -> Result<String, VpnmuxError>;

    /// Create and start a container, returning its runtime id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, VpnmuxError>;

    /// Inspect a container. `NotFound` when it does not exist.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, VpnmuxError>;

    /// Inspect a network. `NotFound` when it does not exist.
    async fn inspect_network(&self, id: &str) -> Result<NetworkInspect, VpnmuxError>;

    /// Ids of all containers carrying every label in `filter`.
    async fn list_containers(&self, filter: &Labels) -> Result<Vec<String>, VpnmuxError>;

    /// Ids of all networks carrying every label in `filter`.
    async fn list_networks(&self, filter: &Labels) -> Result<Vec<String>, VpnmuxError>;

    /// Force-remove a container.
    async fn remove_container(&self, id: &str) -> Result<(), VpnmuxError>;

    async fn remove_network(&self, id: &str) -> Result<(), VpnmuxError>;
}

/// Subset of `docker inspect` output for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

impl ContainerInspect {
    pub fn labels(&self) -> &Labels {
        &self.config.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.get(key).map(String::as_str)
    }

    /// Address assigned on `network`, if the container is attached to it.
    pub fn ip_on(&self, network: &str) -> Option<&str> {
        self.network_settings
            .networks
            .get(network)
            .map(|endpoint| endpoint.ip_address.as_str())
            .filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, deserialize_with = "nullable_labels")]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
}

/// Subset of `docker network inspect` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_labels")]
    pub labels: Labels,
    #[serde(rename = "IPAM", default)]
    pub ipam: Ipam,
}

impl NetworkInspect {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn gateway(&self) -> Option<&str> {
        self.ipam.config.first().map(|c| c.gateway.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ipam {
    #[serde(rename = "Config", default, deserialize_with = "nullable_vec")]
    pub config: Vec<IpamConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamConfig {
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub gateway: String,
}

/// Docker prints `null` rather than `{}` for objects created without labels.
fn nullable_labels<'de, D>(deserializer: D) -> Result<Labels, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Labels>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn matches_labels(labels: &Labels, filter: &Labels) -> bool {
    filter
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}
