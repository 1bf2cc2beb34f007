//! Policy routing for DNS traffic.
//!
//! Port 53 packets leaving the host for anything outside the local subnet are
//! marked in `mangle OUTPUT`, and a single `fwmark <mark> lookup <table>` rule
//! sends them through one shared table whose default route points at the chosen
//! tunnel's gateway.

use super::netfilter::FilterRule;
use super::policy::parse_lookup_tables;
use super::route_table::RouteTableAllocator;
use crate::config::DnsSettings;
use crate::error::VpnmuxError;
use crate::system::{CommandRunner, command_line};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reservation owner for the shared DNS table.
pub const DNS_OWNER: &str = "dns";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsRoute {
    pub table: u32,
    pub gateway: Option<Ipv4Addr>,
}

#[derive(Clone)]
pub struct DnsRouter {
    runner: Arc<dyn CommandRunner>,
    tables: RouteTableAllocator,
    mark: String,
    local_subnet: String,
}

impl DnsRouter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tables: RouteTableAllocator,
        settings: &DnsSettings,
    ) -> Self {
        Self {
            runner,
            tables,
            mark: format!("{:#x}", settings.mark),
            local_subnet: settings.local_subnet.clone(),
        }
    }

    fn mark_rule(&self, proto: &str) -> FilterRule {
        FilterRule::new(
            "mangle",
            "OUTPUT",
            vec![
                "-p".into(),
                proto.into(),
                "--dport".into(),
                "53".into(),
                "!".into(),
                "-d".into(),
                self.local_subnet.clone(),
                "-j".into(),
                "MARK".into(),
                "--set-mark".into(),
                self.mark.clone(),
            ],
        )
    }

    /// Install the tcp and udp mark rules.
    pub async fn ensure_mark(&self) -> Result<(), VpnmuxError> {
        for proto in ["tcp", "udp"] {
            self.mark_rule(proto).ensure(self.runner.as_ref()).await?;
        }
        Ok(())
    }

    async fn mark_tables(&self) -> Result<Vec<u32>, VpnmuxError> {
        let args = ["rule", "show", "fwmark", self.mark.as_str()];
        let out = self.runner.run("ip", &args).await?;
        parse_lookup_tables(&out).ok_or_else(|| VpnmuxError::UnexpectedOutput {
            command: command_line("ip", &args),
            output: out.clone(),
        })
    }

    /// The installed DNS table and its gateway, if any rule exists for the mark.
    pub async fn current(&self) -> Result<Option<DnsRoute>, VpnmuxError> {
        let Some(table) = self.mark_tables().await?.first().copied() else {
            return Ok(None);
        };
        let gateway = self.tables.default_route(table).await?;
        Ok(Some(DnsRoute { table, gateway }))
    }

    /// Route marked traffic via `gateway`, returning the DNS table.
    pub async fn route(&self, gateway: Ipv4Addr) -> Result<u32, VpnmuxError> {
        let tables = self.mark_tables().await?;
        let Some((&table, extra)) = tables.split_first() else {
            return self.setup_table(gateway).await;
        };

        for &stale in extra {
            warn!(table = stale, mark = %self.mark, "removing extra dns rule");
            self.delete_rule(stale).await?;
            if stale != table {
                self.tables.remove_default_route(stale).await?;
                self.tables.release(stale);
            }
        }

        self.tables.claim(table, DNS_OWNER)?;
        self.tables.ensure_default_route(table, gateway).await?;
        Ok(table)
    }

    async fn setup_table(&self, gateway: Ipv4Addr) -> Result<u32, VpnmuxError> {
        let table = self.tables.allocate(DNS_OWNER).await?;
        if let Err(err) = self.install(table, gateway).await {
            self.tables.release(table);
            return Err(err);
        }
        info!(table, %gateway, mark = %self.mark, "dns route installed");
        Ok(table)
    }

    async fn install(&self, table: u32, gateway: Ipv4Addr) -> Result<(), VpnmuxError> {
        self.tables.ensure_default_route(table, gateway).await?;
        let id = table.to_string();
        if let Err(err) = self
            .runner
            .run("ip", &["rule", "add", "fwmark", &self.mark, "lookup", &id])
            .await
        {
            self.tables.remove_default_route(table).await?;
            return Err(err);
        }
        Ok(())
    }

    async fn delete_rule(&self, table: u32) -> Result<(), VpnmuxError> {
        let id = table.to_string();
        self.runner
            .run("ip", &["rule", "del", "fwmark", &self.mark, "lookup", &id])
            .await?;
        Ok(())
    }

    /// Remove every mark rule together with its table's default route.
    pub async fn clear(&self) -> Result<(), VpnmuxError> {
        for table in self.mark_tables().await? {
            debug!(table, mark = %self.mark, "clearing dns route");
            self.delete_rule(table).await?;
            self.tables.remove_default_route(table).await?;
            self.tables.release(table);
        }
        Ok(())
    }
}
