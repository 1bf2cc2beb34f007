use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Secret material: a username, password, CA certificate or TLS key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct Credential {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct Config {
    pub id: String,
    pub name: String,
    pub host: String,
    #[sqlx(rename = "user_c")]
    pub user_cred: String,
    #[sqlx(rename = "pass_c")]
    pub pass_cred: String,
    #[sqlx(rename = "ca_c")]
    pub ca_cred: String,
    #[sqlx(rename = "ovpn_c")]
    pub ovpn_cred: String,
}

/// One tunnel instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub config_id: String,
}

/// A LAN device, identified by its IPv4 address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub address: String,
}

/// Current tunnel assignment of a client. No row means unassigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct ClientNetwork {
    pub client_id: String,
    pub network_id: String,
}

/// Tunnel that DNS queries are routed through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct DnsRoute {
    pub network_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CredentialInput {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConfigInput {
    pub name: String,
    pub host: String,
    pub user_cred: String,
    pub pass_cred: String,
    pub ca_cred: String,
    pub ovpn_cred: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NetworkInput {
    pub name: String,
    pub config_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientInput {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssignmentInput {
    pub network_id: String,
}
