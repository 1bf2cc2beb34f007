use crate::error::VpnmuxError;
use crate::system::{CommandRunner, command_line};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Maintains the `from <addr> lookup <table>` rules steering a client into a tunnel.
#[derive(Clone)]
pub struct PolicyRouter {
    runner: Arc<dyn CommandRunner>,
}

impl PolicyRouter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Tables currently targeted by rules for `source`, in rule priority order.
    pub async fn tables_for(&self, source: Ipv4Addr) -> Result<Vec<u32>, VpnmuxError> {
        let addr = source.to_string();
        let args = ["rule", "show", "from", addr.as_str()];
        let out = self.runner.run("ip", &args).await?;
        parse_lookup_tables(&out).ok_or_else(|| VpnmuxError::UnexpectedOutput {
            command: command_line("ip", &args),
            output: out.clone(),
        })
    }

    /// Converge to exactly one rule for `source`, pointing at `table`.
    ///
    /// Stale rules are removed before the new one is added, so a client is never
    /// routed through two tunnels at once.
    pub async fn set_route(&self, source: Ipv4Addr, table: u32) -> Result<(), VpnmuxError> {
        let mut found = false;
        for current in self.tables_for(source).await? {
            if current == table && !found {
                found = true;
                continue;
            }
            self.delete_rule(source, current).await?;
        }

        if !found {
            debug!(%source, table, "adding policy rule");
            let (addr, id) = (source.to_string(), table.to_string());
            self.runner
                .run("ip", &["rule", "add", "from", &addr, "lookup", &id])
                .await?;
        }
        Ok(())
    }

    /// Remove every rule for `source`. No rules is success.
    pub async fn clear_routes(&self, source: Ipv4Addr) -> Result<(), VpnmuxError> {
        for current in self.tables_for(source).await? {
            self.delete_rule(source, current).await?;
        }
        Ok(())
    }

    async fn delete_rule(&self, source: Ipv4Addr, table: u32) -> Result<(), VpnmuxError> {
        debug!(%source, table, "deleting policy rule");
        let (addr, id) = (source.to_string(), table.to_string());
        self.runner
            .run("ip", &["rule", "del", "from", &addr, "lookup", &id])
            .await?;
        Ok(())
    }
}

/// Extract the numeric `lookup <table>` target of every rule line.
pub(crate) fn parse_lookup_tables(output: &str) -> Option<Vec<u32>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut words = line.split_whitespace();
            words.find(|w| *w == "lookup")?;
            words.next()?.parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeHost;

    const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    #[test]
    fn parses_rule_listing() {
        let out = "32764:\tfrom 10.0.0.5 lookup 4\n32765:\tfrom 10.0.0.5 lookup 3\n";
        assert_eq!(parse_lookup_tables(out), Some(vec![4, 3]));
        assert_eq!(parse_lookup_tables(""), Some(vec![]));
        assert_eq!(parse_lookup_tables("0:\tfrom all lookup local\n"), None);
    }

    #[tokio::test]
    async fn set_route_leaves_a_single_rule_for_the_newest_table() {
        let host = Arc::new(FakeHost::new());
        let policy = PolicyRouter::new(host.clone());

        policy.set_route(CLIENT, 3).await.unwrap();
        policy.set_route(CLIENT, 4).await.unwrap();

        assert_eq!(host.source_rules("10.0.0.5"), vec!["4".to_string()]);
    }

    #[tokio::test]
    async fn set_route_collapses_duplicates() {
        let host = Arc::new(FakeHost::new());
        host.add_source_rule("10.0.0.5", 4);
        host.add_source_rule("10.0.0.5", 4);
        host.add_source_rule("10.0.0.5", 9);

        PolicyRouter::new(host.clone())
            .set_route(CLIENT, 4)
            .await
            .unwrap();
        assert_eq!(host.source_rules("10.0.0.5"), vec!["4".to_string()]);
    }

    #[tokio::test]
    async fn set_route_is_a_no_op_when_converged() {
        let host = Arc::new(FakeHost::new());
        let policy = PolicyRouter::new(host.clone());
        policy.set_route(CLIENT, 3).await.unwrap();
        let before = host.history().len();

        policy.set_route(CLIENT, 3).await.unwrap();
        let issued: Vec<String> = host.history()[before..].to_vec();
        assert_eq!(issued, vec!["ip rule show from 10.0.0.5".to_string()]);
    }

    #[tokio::test]
    async fn clear_routes_is_idempotent() {
        let host = Arc::new(FakeHost::new());
        let policy = PolicyRouter::new(host.clone());
        policy.set_route(CLIENT, 3).await.unwrap();

        policy.clear_routes(CLIENT).await.unwrap();
        policy.clear_routes(CLIENT).await.unwrap();
        assert!(host.source_rules("10.0.0.5").is_empty());
    }

    #[tokio::test]
    async fn partial_failure_is_reported() {
        let host = Arc::new(FakeHost::new());
        let policy = PolicyRouter::new(host.clone());
        policy.set_route(CLIENT, 3).await.unwrap();
        host.fail_on("ip rule add");

        let err = policy.set_route(CLIENT, 4).await.unwrap_err();
        assert!(matches!(err, VpnmuxError::CommandFailed { .. }));
        assert!(host.source_rules("10.0.0.5").is_empty());
    }
}
