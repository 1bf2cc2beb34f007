use super::netfilter::{FilterRule, RuleState};
use crate::config::Interfaces;
use crate::error::VpnmuxError;
use crate::system::CommandRunner;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Blocks direct LAN to WAN forwarding for managed clients, so their traffic can
/// only leave through a tunnel.
#[derive(Clone)]
pub struct ForwardingGuard {
    runner: Arc<dyn CommandRunner>,
    interfaces: Interfaces,
}

impl ForwardingGuard {
    pub fn new(runner: Arc<dyn CommandRunner>, interfaces: Interfaces) -> Self {
        Self { runner, interfaces }
    }

    fn rule(&self, source: Ipv4Addr) -> FilterRule {
        FilterRule::new(
            "filter",
            "FORWARD",
            vec![
                "-i".into(),
                self.interfaces.lan.clone(),
                "-o".into(),
                self.interfaces.wan.clone(),
                "-s".into(),
                source.to_string(),
                "-j".into(),
                "DROP".into(),
            ],
        )
    }

    pub async fn ensure(&self, source: Ipv4Addr) -> Result<(), VpnmuxError> {
        self.rule(source).ensure(self.runner.as_ref()).await
    }

    pub async fn remove(&self, source: Ipv4Addr) -> Result<(), VpnmuxError> {
        self.rule(source).remove(self.runner.as_ref()).await
    }

    pub async fn is_present(&self, source: Ipv4Addr) -> Result<bool, VpnmuxError> {
        Ok(self.rule(source).state(self.runner.as_ref()).await? == RuleState::Present)
    }
}
