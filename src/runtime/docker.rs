use super::{
    CONFIG_FILE, CONFIG_MOUNT, ContainerInspect, ContainerRuntime, ContainerSpec, Labels,
    NetworkInspect,
};
use crate::error::VpnmuxError;
use crate::system::{CommandOutput, CommandRunner, command_line};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// [`ContainerRuntime`] backed by the `docker` CLI.
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run a docker command, mapping "No such ..." failures to `NotFound`.
    async fn docker(
        &self,
        kind: &'static str,
        id: &str,
        args: &[&str],
    ) -> Result<String, VpnmuxError> {
        let out = self.runner.output("docker", args).await?;
        if !out.success() && is_missing(&out) {
            return Err(VpnmuxError::not_found(kind, id));
        }
        out.into_stdout("docker", args)
    }

    async fn inspect<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        id: &str,
        args: &[&str],
    ) -> Result<T, VpnmuxError> {
        let raw = self.docker(kind, id, args).await?;
        let mut items: Vec<T> = serde_json::from_str(&raw)?;
        if items.len() != 1 {
            return Err(VpnmuxError::UnexpectedOutput {
                command: command_line("docker", args),
                output: raw,
            });
        }
        Ok(items.remove(0))
    }

    async fn list(&self, base: &[&str], filter: &Labels) -> Result<Vec<String>, VpnmuxError> {
        let filters = label_filters(filter);
        let mut args: Vec<&str> = base.to_vec();
        for f in &filters {
            args.push("--filter");
            args.push(f);
        }
        let out = self.runner.run("docker", &args).await?;
        Ok(ids(&out))
    }
}

fn is_missing(out: &CommandOutput) -> bool {
    out.stderr.contains("No such") || out.stderr.contains("not found")
}

fn label_args(labels: &Labels) -> Vec<String> {
    labels
        .iter()
        .flat_map(|(key, value)| ["--label".to_string(), format!("{key}={value}")])
        .collect()
}

fn label_filters(labels: &Labels) -> Vec<String> {
    labels
        .iter()
        .map(|(key, value)| format!("label={key}={value}"))
        .collect()
}

fn ids(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn single_id(command: String, output: String) -> Result<String, VpnmuxError> {
    match output.trim() {
        "" => Err(VpnmuxError::UnexpectedOutput { command, output }),
        id => Ok(id.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_network(&self, name: &str, labels: &Labels) -> Result<String, VpnmuxError> {
        let label_args = label_args(labels);
        let mut args = vec!["network", "create"];
        args.extend(label_args.iter().map(String::as_str));
        args.push(name);

        debug!(network = name, "creating docker network");
        let out = self.runner.run("docker", &args).await?;
        single_id(command_line("docker", &args), out)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, VpnmuxError> {
        let volume = format!("{}:{CONFIG_MOUNT}", spec.config_dir.display());
        let label_args = label_args(&spec.labels);
        let mut args = vec![
            "run",
            "--network",
            spec.network.as_str(),
            "--restart",
            "unless-stopped",
            "--cap-add",
            "NET_ADMIN",
            "--device",
            "/dev/net/tun",
            "-v",
            volume.as_str(),
            "-w",
            CONFIG_MOUNT,
        ];
        args.extend(label_args.iter().map(String::as_str));
        args.extend(["-d", spec.image.as_str(), CONFIG_FILE]);

        debug!(network = %spec.network, image = %spec.image, "starting tunnel container");
        let out = self.runner.run("docker", &args).await?;
        single_id(command_line("docker", &args), out)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, VpnmuxError> {
        self.inspect("container", id, &["container", "inspect", id])
            .await
    }

    async fn inspect_network(&self, id: &str) -> Result<NetworkInspect, VpnmuxError> {
        self.inspect("docker network", id, &["network", "inspect", id])
            .await
    }

    async fn list_containers(&self, filter: &Labels) -> Result<Vec<String>, VpnmuxError> {
        self.list(&["ps", "-a", "-q", "--no-trunc"], filter).await
    }

    async fn list_networks(&self, filter: &Labels) -> Result<Vec<String>, VpnmuxError> {
        self.list(&["network", "ls", "-q", "--no-trunc"], filter)
            .await
    }

    async fn remove_container(&self, id: &str) -> Result<(), VpnmuxError> {
        self.docker("container", id, &["rm", "-f", id]).await?;
        Ok(())
    }

    async fn remove_network(&self, id: &str) -> Result<(), VpnmuxError> {
        self.docker("docker network", id, &["network", "rm", id])
            .await?;
        Ok(())
    }
}
