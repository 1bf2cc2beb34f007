//! OpenVPN client configuration rendering.
//!
//! Each config gets its own directory holding `openvpn.conf` and the `creds`
//! file it references. The directory is mounted into the tunnel container.

use crate::error::VpnmuxError;
use crate::runtime::CONFIG_FILE;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const CREDS_FILE: &str = "creds";

const PORT: u16 = 1194;
const MTU: u32 = 1500;
const MTU_EXTRA: u32 = 32;
const MSS_FIX: u32 = 1450;
const PING: u32 = 15;
const CIPHER: &str = "AES-256-CBC";
const AUTH: &str = "SHA512";
const KEY_DIRECTION: u8 = 1;

/// Connection parameters resolved from a config and its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    pub host: String,
    pub username: String,
    pub password: String,
    pub ca_cert: String,
    pub tls_key: String,
}

pub fn render_creds(opts: &TunnelOptions) -> String {
    format!("{}\n{}\n", opts.username, opts.password)
}

pub fn render_config(opts: &TunnelOptions) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("client".to_string());
    lines.push("dev tun".to_string());
    lines.push("proto udp".to_string());
    lines.push(format!("remote {} {}", opts.host, PORT));
    lines.push("resolv-retry infinite".to_string());
    lines.push("remote-random".to_string());
    lines.push("nobind".to_string());
    lines.push(format!("tun-mtu {MTU}"));
    lines.push(format!("tun-mtu-extra {MTU_EXTRA}"));
    lines.push(format!("mssfix {MSS_FIX}"));
    lines.push("persist-key".to_string());
    lines.push("persist-tun".to_string());
    lines.push(format!("ping {PING}"));
    lines.push("ping-restart 0".to_string());
    lines.push("ping-timer-rem".to_string());
    lines.push("reneg-sec 0".to_string());
    lines.push("remote-cert-tls server".to_string());
    lines.push(format!("auth-user-pass {CREDS_FILE}"));
    lines.push("verb 3".to_string());
    lines.push("pull".to_string());
    lines.push("fast-io".to_string());
    lines.push(format!("cipher {CIPHER}"));
    lines.push(format!("auth {AUTH}"));

    // Inline CA and TLS key
    lines.push("<ca>".to_string());
    lines.push(opts.ca_cert.trim_end().to_string());
    lines.push("</ca>".to_string());
    lines.push(format!("key-direction {KEY_DIRECTION}"));
    lines.push("<tls-auth>".to_string());
    lines.push(opts.tls_key.trim_end().to_string());
    lines.push("</tls-auth>".to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Handle to a rendered config directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    dir: PathBuf,
}

impl RenderedConfig {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete the directory. Already gone is success.
    pub async fn close(self) -> Result<(), VpnmuxError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    root: PathBuf,
}

impl ConfigRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, config_id: &str) -> Result<PathBuf, VpnmuxError> {
        let valid = !config_id.is_empty()
            && config_id != "."
            && config_id != ".."
            && !config_id.contains(['/', '\\']);
        if !valid {
            return Err(VpnmuxError::Invalid(format!(
                "config id {config_id:?} is not a valid directory name"
            )));
        }
        Ok(self.root.join(config_id))
    }

    /// Write (or rewrite) the config directory for `config_id`.
    pub async fn render(
        &self,
        config_id: &str,
        opts: &TunnelOptions,
    ) -> Result<RenderedConfig, VpnmuxError> {
        let dir = self.dir_for(config_id)?;
        fs::create_dir_all(&self.root).await?;
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        builder.create(&dir).await?;

        write_read_only(&dir.join(CREDS_FILE), &render_creds(opts)).await?;
        write_read_only(&dir.join(CONFIG_FILE), &render_config(opts)).await?;
        debug!(config_id, dir = %dir.display(), "openvpn config rendered");
        Ok(RenderedConfig { dir })
    }

    /// Handle to an already rendered directory, `NotFound` if it is missing.
    pub async fn open(&self, config_id: &str) -> Result<RenderedConfig, VpnmuxError> {
        let dir = self.dir_for(config_id)?;
        let complete = fs::try_exists(dir.join(CONFIG_FILE)).await?
            && fs::try_exists(dir.join(CREDS_FILE)).await?;
        if !complete {
            return Err(VpnmuxError::not_found("config directory", config_id));
        }
        Ok(RenderedConfig { dir })
    }
}

/// Files are created mode 0400, so an old copy is removed instead of truncated.
async fn write_read_only(path: &Path, contents: &str) -> Result<(), VpnmuxError> {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o400)
        .open(path)
        .await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
