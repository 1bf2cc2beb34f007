use crate::db::Storage;
use crate::db::models::{Config, ConfigInput};
use crate::error::VpnmuxError;
use crate::openvpn::{ConfigRenderer, RenderedConfig, TunnelOptions};
use tracing::{info, warn};

/// Keeps every persisted config rendered on disk.
#[derive(Clone)]
pub struct ConfigReconciler {
    storage: Storage,
    renderer: ConfigRenderer,
}

impl ConfigReconciler {
    pub fn new(storage: Storage, renderer: ConfigRenderer) -> Self {
        Self { storage, renderer }
    }

    pub async fn startup(&self) -> Result<(), VpnmuxError> {
        let configs = self.storage.configs().list().await?;
        for cfg in &configs {
            self.check(&cfg.id).await?;
        }
        info!(count = configs.len(), "configs reconciled");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Config>, VpnmuxError> {
        self.storage.configs().list().await
    }

    /// Load the config and make sure its directory exists, re-rendering it if not.
    pub async fn check(&self, id: &str) -> Result<(Config, RenderedConfig), VpnmuxError> {
        let cfg = self.storage.configs().get(id).await?;
        match self.renderer.open(id).await {
            Ok(rendered) => Ok((cfg, rendered)),
            Err(err) if err.is_not_found() => {
                warn!(%id, "config directory missing, rendering again");
                let opts = self.options(&cfg).await?;
                let rendered = self.renderer.render(id, &opts).await?;
                Ok((cfg, rendered))
            }
            Err(err) => Err(err),
        }
    }

    async fn options(&self, cfg: &Config) -> Result<TunnelOptions, VpnmuxError> {
        let creds = self.storage.credentials();
        Ok(TunnelOptions {
            host: cfg.host.clone(),
            username: creds.get(&cfg.user_cred).await?.value,
            password: creds.get(&cfg.pass_cred).await?.value,
            ca_cert: creds.get(&cfg.ca_cred).await?.value,
            tls_key: creds.get(&cfg.ovpn_cred).await?.value,
        })
    }

    async fn require_credentials(&self, input: &ConfigInput) -> Result<(), VpnmuxError> {
        let creds = self.storage.credentials();
        for id in [
            &input.user_cred,
            &input.pass_cred,
            &input.ca_cred,
            &input.ovpn_cred,
        ] {
            creds.get(id).await?;
        }
        Ok(())
    }

    /// Persist and render a config. Every referenced credential must exist.
    pub async fn create(&self, input: ConfigInput) -> Result<Config, VpnmuxError> {
        self.require_credentials(&input).await?;
        let cfg = self.storage.configs().create(input).await?;

        let opts = self.options(&cfg).await?;
        self.renderer.render(&cfg.id, &opts).await?;
        info!(id = %cfg.id, name = %cfg.name, "config created");

        let (cfg, _) = self.check(&cfg.id).await?;
        Ok(cfg)
    }

    async fn ensure_unused(&self, id: &str) -> Result<(), VpnmuxError> {
        if let Some(network) = self.storage.networks().using_config(id).await?.first() {
            return Err(VpnmuxError::InUse {
                kind: "config",
                id: id.to_string(),
                dependent: format!("network {}", network.id),
            });
        }
        Ok(())
    }

    /// Replace a config that no network uses, rendering it again.
    pub async fn update(&self, id: &str, input: ConfigInput) -> Result<Config, VpnmuxError> {
        self.storage.configs().get(id).await?;
        self.ensure_unused(id).await?;
        self.require_credentials(&input).await?;

        let cfg = Config {
            id: id.to_string(),
            name: input.name,
            host: input.host,
            user_cred: input.user_cred,
            pass_cred: input.pass_cred,
            ca_cred: input.ca_cred,
            ovpn_cred: input.ovpn_cred,
        };
        self.storage.configs().update(&cfg).await?;
        let opts = self.options(&cfg).await?;
        self.renderer.render(id, &opts).await?;
        info!(%id, "config updated");
        Ok(cfg)
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let (_, rendered) = self.check(id).await?;
        self.ensure_unused(id).await?;
        self.storage.configs().delete(id).await?;
        rendered.close().await?;
        info!(%id, "config deleted");
        Ok(())
    }
}
