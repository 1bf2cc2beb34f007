#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use vpnmux::Reconciler;
use vpnmux::config::Config;
use vpnmux::db::Storage;
use vpnmux::db::models::{ConfigInput, CredentialInput};
use vpnmux::runtime::MockRuntime;
use vpnmux::system::fake::FakeHost;

pub const LAN: &str = "lan0";
pub const WAN: &str = "wan0";

/// Host, runtime and database shared by every reconciler built from it, so a
/// second `reconciler()` call behaves like a process restart.
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub runtime: Arc<MockRuntime>,
    pub storage: Storage,
    pub settings: Config,
}

impl Harness {
    pub async fn new() -> Self {
        let openvpn_dir: PathBuf =
            std::env::temp_dir().join(format!("vpnmux-it-{}", uuid::Uuid::new_v4()));
        let settings = Config {
            database_url: "sqlite::memory:".to_string(),
            vpn_image: "pricec/openvpn-client".to_string(),
            subnet_cidr: "10.0.0.0/24".to_string(),
            lan_interface: LAN.to_string(),
            wan_interface: WAN.to_string(),
            dns_mark: 1,
            listen_port: 0,
            openvpn_dir,
            command_timeout_secs: 5,
            label_key: "managed-by".to_string(),
            label_value: "vpnmux".to_string(),
            loglevel: "debug".to_string(),
        };
        Self {
            host: Arc::new(FakeHost::new()),
            runtime: Arc::new(MockRuntime::new()),
            storage: Storage::in_memory().await.expect("in-memory database"),
            settings,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.storage.clone(),
            self.host.clone(),
            self.runtime.clone(),
            &self.settings,
        )
    }

    pub fn guard_rules(&self, address: &str) -> usize {
        self.host.filter_count(
            "filter",
            "FORWARD",
            &["-i", LAN, "-o", WAN, "-s", address, "-j", "DROP"],
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.settings.openvpn_dir);
    }
}

pub fn credential(name: &str, value: &str) -> CredentialInput {
    CredentialInput {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Create the four credentials a config needs and return the config input.
pub async fn config_input(reconciler: &Reconciler, host: &str) -> ConfigInput {
    let user = reconciler
        .create_credential(credential("user", "alice"))
        .await
        .expect("user credential");
    let pass = reconciler
        .create_credential(credential("pass", "hunter2"))
        .await
        .expect("pass credential");
    let ca = reconciler
        .create_credential(credential(
            "ca",
            "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----",
        ))
        .await
        .expect("ca credential");
    let tls = reconciler
        .create_credential(credential(
            "tls",
            "-----BEGIN OpenVPN Static key V1-----\nabcd\n-----END OpenVPN Static key V1-----",
        ))
        .await
        .expect("tls credential");

    ConfigInput {
        name: format!("{host} config"),
        host: host.to_string(),
        user_cred: user.id,
        pass_cred: pass.id,
        ca_cred: ca.id,
        ovpn_cred: tls.id,
    }
}
