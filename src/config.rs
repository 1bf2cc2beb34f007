use figment::{Figment, providers::Env};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read from `VPNMUX_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_vpn_image")]
    pub vpn_image: String,
    pub subnet_cidr: String,
    pub lan_interface: String,
    pub wan_interface: String,
    #[serde(default = "default_dns_mark")]
    pub dns_mark: u32,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_openvpn_dir")]
    pub openvpn_dir: PathBuf,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_label_key")]
    pub label_key: String,
    #[serde(default = "default_label_value")]
    pub label_value: String,
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
}

/// LAN/WAN interface pair guarded by the forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interfaces {
    pub lan: String,
    pub wan: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    pub image: String,
    pub label_key: String,
    pub label_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSettings {
    pub mark: u32,
    pub local_subnet: String,
}

impl Config {
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::prefixed("VPNMUX_")).extract()
    }

    pub fn interfaces(&self) -> Interfaces {
        Interfaces {
            lan: self.lan_interface.clone(),
            wan: self.wan_interface.clone(),
        }
    }

    pub fn tunnel_settings(&self) -> TunnelSettings {
        TunnelSettings {
            image: self.vpn_image.clone(),
            label_key: self.label_key.clone(),
            label_value: self.label_value.clone(),
        }
    }

    pub fn dns_settings(&self) -> DnsSettings {
        DnsSettings {
            mark: self.dns_mark,
            local_subnet: self.subnet_cidr.clone(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

fn default_database_url() -> String {
    "sqlite:/var/lib/vpnmux/v1.db".to_string()
}

fn default_vpn_image() -> String {
    "pricec/openvpn-client".to_string()
}

fn default_dns_mark() -> u32 {
    1
}

fn default_listen_port() -> u16 {
    8080
}

fn default_openvpn_dir() -> PathBuf {
    PathBuf::from("/var/lib/vpnmux/openvpn")
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_label_key() -> String {
    "managed-by".to_string()
}

fn default_label_value() -> String {
    "vpnmux".to_string()
}

fn default_loglevel() -> String {
    "info".to_string()
}
