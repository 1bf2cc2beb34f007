use crate::error::VpnmuxError;
use crate::system::{CommandRunner, command_line};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// First routing table ID handed out by the allocator.
pub const FIRST_TABLE: u32 = 1;
/// Last usable ID; 253-255 are the kernel's default/main/local tables.
pub const LAST_TABLE: u32 = 252;

/// iproute2 reply for a table the kernel has never populated (Linux 4.20+).
const MISSING_TABLE: &str = "FIB table does not exist";

/// Hands out routing table IDs and keeps each table's default route converged.
///
/// A table is free when it is neither reserved here nor holding any route on
/// the host. Reservation happens under a lock after the emptiness check, so two
/// concurrent callers can never leave with the same ID.
#[derive(Clone)]
pub struct RouteTableAllocator {
    runner: Arc<dyn CommandRunner>,
    first: u32,
    last: u32,
    reserved: Arc<Mutex<BTreeMap<u32, String>>>,
}

impl RouteTableAllocator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_range(runner, FIRST_TABLE, LAST_TABLE)
    }

    pub fn with_range(runner: Arc<dyn CommandRunner>, first: u32, last: u32) -> Self {
        Self {
            runner,
            first,
            last,
            reserved: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn reserved(&self) -> MutexGuard<'_, BTreeMap<u32, String>> {
        self.reserved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve the first free table for `owner`.
    pub async fn allocate(&self, owner: &str) -> Result<u32, VpnmuxError> {
        for table in self.first..=self.last {
            if self.reserved().contains_key(&table) {
                continue;
            }
            if !self.is_empty(table).await? {
                continue;
            }

            let mut reserved = self.reserved();
            if reserved.contains_key(&table) {
                continue;
            }
            reserved.insert(table, owner.to_string());
            debug!(table, owner, "route table reserved");
            return Ok(table);
        }

        Err(VpnmuxError::AllocationExhausted {
            first: self.first,
            last: self.last,
        })
    }

    /// Register a table found in use during recovery.
    pub fn claim(&self, table: u32, owner: &str) -> Result<(), VpnmuxError> {
        if !(self.first..=self.last).contains(&table) {
            return Err(VpnmuxError::Consistency(format!(
                "route table {table} claimed by {owner} is outside [{},{}]",
                self.first, self.last
            )));
        }

        let mut reserved = self.reserved();
        match reserved.get(&table) {
            Some(current) if current != owner => Err(VpnmuxError::Consistency(format!(
                "route table {table} claimed by {owner} is already owned by {current}"
            ))),
            Some(_) => Ok(()),
            None => {
                reserved.insert(table, owner.to_string());
                Ok(())
            }
        }
    }

    pub fn release(&self, table: u32) {
        if let Some(owner) = self.reserved().remove(&table) {
            debug!(table, %owner, "route table released");
        }
    }

    pub fn owner(&self, table: u32) -> Option<String> {
        self.reserved().get(&table).cloned()
    }

    /// `ip route show`, reading a table the kernel never created as empty.
    async fn show(&self, args: &[&str]) -> Result<String, VpnmuxError> {
        let out = self.runner.output("ip", args).await?;
        if out.code == Some(2) && out.stderr.contains(MISSING_TABLE) {
            return Ok(String::new());
        }
        out.into_stdout("ip", args)
    }

    async fn is_empty(&self, table: u32) -> Result<bool, VpnmuxError> {
        let id = table.to_string();
        let out = self.show(&["route", "show", "table", &id]).await?;
        Ok(out.trim().is_empty())
    }

    /// Gateway of the table's default route, if it has one.
    pub async fn default_route(&self, table: u32) -> Result<Option<Ipv4Addr>, VpnmuxError> {
        let id = table.to_string();
        let args = ["route", "show", "table", id.as_str(), "default"];
        let out = self.show(&args).await?;
        parse_default_route(&out).map_err(|reason| match reason {
            DefaultRouteError::Many(count) => VpnmuxError::Consistency(format!(
                "found {count} default routes for table {table}"
            )),
            DefaultRouteError::Unparsable => VpnmuxError::UnexpectedOutput {
                command: command_line("ip", &args),
                output: out.clone(),
            },
        })
    }

    /// Converge `table` to exactly one default route via `gateway`.
    pub async fn ensure_default_route(
        &self,
        table: u32,
        gateway: Ipv4Addr,
    ) -> Result<(), VpnmuxError> {
        let id = table.to_string();
        match self.default_route(table).await? {
            Some(current) if current == gateway => return Ok(()),
            Some(current) => {
                info!(table, %current, %gateway, "repointing default route");
                self.runner
                    .run("ip", &["route", "del", "default", "table", &id])
                    .await?;
            }
            None => {}
        }

        let via = gateway.to_string();
        self.runner
            .run("ip", &["route", "add", "default", "via", &via, "table", &id])
            .await?;
        Ok(())
    }

    /// Delete the table's default route. A table without one is left alone.
    pub async fn remove_default_route(&self, table: u32) -> Result<(), VpnmuxError> {
        if self.default_route(table).await?.is_none() {
            return Ok(());
        }
        let id = table.to_string();
        self.runner
            .run("ip", &["route", "del", "default", "table", &id])
            .await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DefaultRouteError {
    Many(usize),
    Unparsable,
}

/// Parse `ip route show table N default` output.
fn parse_default_route(output: &str) -> Result<Option<Ipv4Addr>, DefaultRouteError> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let line = match lines.as_slice() {
        [] => return Ok(None),
        [line] => *line,
        many => return Err(DefaultRouteError::Many(many.len())),
    };

    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == "via" {
            return words
                .next()
                .and_then(|addr| addr.parse().ok())
                .map(Some)
                .ok_or(DefaultRouteError::Unparsable);
        }
    }
    Err(DefaultRouteError::Unparsable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeHost;

    fn allocator(host: &Arc<FakeHost>) -> RouteTableAllocator {
        RouteTableAllocator::new(host.clone())
    }

    #[test]
    fn parses_default_route_lines() {
        assert_eq!(parse_default_route(""), Ok(None));
        assert_eq!(
            parse_default_route("default via 172.18.0.2 dev br-1234 \n"),
            Ok(Some(Ipv4Addr::new(172, 18, 0, 2)))
        );
        assert_eq!(
            parse_default_route("default dev tun0 scope link\n"),
            Err(DefaultRouteError::Unparsable)
        );
        assert_eq!(
            parse_default_route("default via 1.1.1.1 dev a\ndefault via 2.2.2.2 dev b\n"),
            Err(DefaultRouteError::Many(2))
        );
    }

    #[tokio::test]
    async fn allocate_skips_occupied_and_reserved_tables() {
        let host = Arc::new(FakeHost::new());
        host.occupy_table(1);
        host.set_default_route(2, "172.18.0.2");
        let tables = allocator(&host);

        assert_eq!(tables.allocate("tunnel:a").await.unwrap(), 3);
        assert_eq!(tables.allocate("tunnel:b").await.unwrap(), 4);
        assert_eq!(tables.owner(3).as_deref(), Some("tunnel:a"));

        tables.release(3);
        assert_eq!(tables.allocate("tunnel:c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn exhaustion_never_yields_duplicates() {
        let host = Arc::new(FakeHost::new());
        let tables = allocator(&host);

        let mut seen = std::collections::BTreeSet::new();
        for n in FIRST_TABLE..=LAST_TABLE {
            let table = tables.allocate(&format!("tunnel:{n}")).await.unwrap();
            assert!(seen.insert(table), "table {table} handed out twice");
        }
        assert_eq!(seen.len(), 252);

        let err = tables.allocate("tunnel:overflow").await.unwrap_err();
        assert!(matches!(
            err,
            VpnmuxError::AllocationExhausted {
                first: 1,
                last: 252
            }
        ));
    }

    #[tokio::test]
    async fn exhaustion_when_host_tables_are_all_busy() {
        let host = Arc::new(FakeHost::new());
        for table in FIRST_TABLE..=LAST_TABLE {
            host.occupy_table(table);
        }
        let err = allocator(&host).allocate("dns").await.unwrap_err();
        assert!(matches!(err, VpnmuxError::AllocationExhausted { .. }));
    }

    #[tokio::test]
    async fn concurrent_allocations_get_distinct_tables() {
        let host = Arc::new(FakeHost::new());
        let tables = allocator(&host);

        let (a, b) = tokio::join!(tables.allocate("tunnel:a"), tables.allocate("tunnel:b"));
        assert_ne!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn claim_rejects_a_second_owner() {
        let host = Arc::new(FakeHost::new());
        let tables = allocator(&host);
        tables.claim(7, "tunnel:a").unwrap();
        tables.claim(7, "tunnel:a").unwrap();
        assert!(matches!(
            tables.claim(7, "dns"),
            Err(VpnmuxError::Consistency(_))
        ));
        assert!(tables.claim(300, "dns").is_err());
    }

    #[tokio::test]
    async fn default_route_converges_to_latest_gateway() {
        let host = Arc::new(FakeHost::new());
        let tables = allocator(&host);
        let g1 = Ipv4Addr::new(172, 18, 0, 2);
        let g2 = Ipv4Addr::new(172, 19, 0, 2);

        tables.ensure_default_route(5, g1).await.unwrap();
        tables.ensure_default_route(5, g1).await.unwrap();
        assert_eq!(host.default_routes(5), vec!["172.18.0.2".to_string()]);

        tables.ensure_default_route(5, g2).await.unwrap();
        assert_eq!(host.default_routes(5), vec!["172.19.0.2".to_string()]);
        assert_eq!(tables.default_route(5).await.unwrap(), Some(g2));
    }

    #[tokio::test]
    async fn never_populated_tables_read_as_empty() {
        let host = Arc::new(FakeHost::new());
        let out = host
            .output("ip", &["route", "show", "table", "77"])
            .await
            .unwrap();
        assert_eq!(out.code, Some(2));

        let tables = RouteTableAllocator::with_range(host.clone(), 77, 77);
        assert_eq!(tables.default_route(77).await.unwrap(), None);
        assert_eq!(tables.allocate("tunnel:a").await.unwrap(), 77);

        let gateway = Ipv4Addr::new(172, 18, 0, 2);
        tables.ensure_default_route(77, gateway).await.unwrap();
        assert_eq!(tables.default_route(77).await.unwrap(), Some(gateway));
    }

    #[tokio::test]
    async fn other_show_failures_still_surface() {
        let host = Arc::new(FakeHost::new());
        host.fail_on("ip route show table 4");
        let err = allocator(&host).default_route(4).await.unwrap_err();
        assert!(matches!(err, VpnmuxError::CommandFailed { code: Some(2), .. }));
    }

    #[tokio::test]
    async fn remove_default_route_tolerates_empty_table() {
        let host = Arc::new(FakeHost::new());
        let tables = allocator(&host);
        tables.remove_default_route(9).await.unwrap();

        host.set_default_route(9, "172.18.0.2");
        tables.remove_default_route(9).await.unwrap();
        assert!(host.default_routes(9).is_empty());
    }
}
