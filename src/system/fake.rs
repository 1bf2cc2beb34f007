//! In-memory emulation of the `ip route`, `ip rule` and `iptables` surface.
//!
//! Output formats and exit codes follow iproute2/iptables closely enough for
//! the parsers in [`crate::net`] to treat it like a real host.

use super::{CommandOutput, CommandRunner, command_line};
use crate::error::VpnmuxError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

const FIRST_RULE_PRIORITY: u32 = 32765;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RuleSelector {
    From(String),
    Fwmark(String),
}

#[derive(Debug, Clone)]
struct FakeRule {
    priority: u32,
    selector: RuleSelector,
    table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeFilter {
    table: String,
    chain: String,
    spec: Vec<String>,
}

#[derive(Debug, Default)]
struct HostState {
    defaults: BTreeMap<u32, Vec<String>>,
    occupied: BTreeSet<u32>,
    rules: Vec<FakeRule>,
    next_priority: Option<u32>,
    filters: Vec<FakeFilter>,
    failures: Vec<String>,
    history: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every command whose rendered line starts with `prefix` exit with status 2.
    pub fn fail_on(&self, prefix: &str) {
        self.state().failures.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Put a non-default route into `table` so it no longer looks free.
    pub fn occupy_table(&self, table: u32) {
        self.state().occupied.insert(table);
    }

    /// Replace the default route(s) of `table` behind the controllers' backs.
    pub fn set_default_route(&self, table: u32, gateway: &str) {
        self.state()
            .defaults
            .insert(table, vec![gateway.to_string()]);
    }

    pub fn default_routes(&self, table: u32) -> Vec<String> {
        self.state()
            .defaults
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Install a `from <addr> lookup <table>` rule directly.
    pub fn add_source_rule(&self, source: &str, table: u32) {
        self.state()
            .push_rule(RuleSelector::From(source.to_string()), table.to_string());
    }

    /// Tables targeted by `from <addr>` rules, in priority order.
    pub fn source_rules(&self, source: &str) -> Vec<String> {
        self.state()
            .rules_matching(&RuleSelector::From(source.to_string()))
            .into_iter()
            .map(|rule| rule.table)
            .collect()
    }

    /// Tables targeted by `fwmark <mark>` rules.
    pub fn fwmark_rules(&self, mark: &str) -> Vec<String> {
        self.state()
            .rules_matching(&RuleSelector::Fwmark(mark.to_string()))
            .into_iter()
            .map(|rule| rule.table)
            .collect()
    }

    pub fn filter_count(&self, table: &str, chain: &str, spec: &[&str]) -> usize {
        let wanted = FakeFilter {
            table: table.to_string(),
            chain: chain.to_string(),
            spec: spec.iter().map(|s| s.to_string()).collect(),
        };
        self.state()
            .filters
            .iter()
            .filter(|filter| **filter == wanted)
            .count()
    }

    /// Every command line executed so far.
    pub fn history(&self) -> Vec<String> {
        self.state().history.clone()
    }

    fn exec(&self, program: &str, args: &[&str]) -> CommandOutput {
        let mut state = self.state();
        let line = command_line(program, args);
        state.history.push(line.clone());

        if state.failures.iter().any(|prefix| line.starts_with(prefix)) {
            return exit(2, "", "injected failure");
        }

        match program {
            "ip" => state.ip(args),
            "iptables" => state.iptables(args),
            _ => exit(127, "", &format!("{program}: command not found")),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, VpnmuxError> {
        Ok(self.exec(program, args))
    }
}

impl HostState {
    fn ip(&mut self, args: &[&str]) -> CommandOutput {
        match args {
            ["route", "show", "table", table] => match table.parse::<u32>() {
                Ok(table) if !self.table_exists(table) => missing_table(),
                Ok(table) => exit(0, &self.show_table(table, false), ""),
                Err(_) => invalid_table(table),
            },
            ["route", "show", "table", table, "default"] => match table.parse::<u32>() {
                Ok(table) if !self.table_exists(table) => missing_table(),
                Ok(table) => exit(0, &self.show_table(table, true), ""),
                Err(_) => invalid_table(table),
            },
            ["route", "add", "default", "via", gateway, "table", table] => {
                let Ok(table) = table.parse::<u32>() else {
                    return invalid_table(table);
                };
                let routes = self.defaults.entry(table).or_default();
                if !routes.is_empty() {
                    return exit(2, "", "RTNETLINK answers: File exists");
                }
                routes.push(gateway.to_string());
                exit(0, "", "")
            }
            ["route", "del", "default", "table", table] => {
                let Ok(table) = table.parse::<u32>() else {
                    return invalid_table(table);
                };
                match self.defaults.get_mut(&table) {
                    Some(routes) if !routes.is_empty() => {
                        routes.remove(0);
                        exit(0, "", "")
                    }
                    _ => exit(2, "", "RTNETLINK answers: No such process"),
                }
            }
            ["rule", "show", "from", source] => {
                let selector = RuleSelector::From(source.to_string());
                exit(0, &self.show_rules(&selector), "")
            }
            ["rule", "show", "fwmark", mark] => {
                let selector = RuleSelector::Fwmark(mark.to_string());
                exit(0, &self.show_rules(&selector), "")
            }
            ["rule", "add", "from", source, "lookup", table] => {
                self.push_rule(RuleSelector::From(source.to_string()), table.to_string());
                exit(0, "", "")
            }
            ["rule", "add", "fwmark", mark, "lookup", table] => {
                self.push_rule(RuleSelector::Fwmark(mark.to_string()), table.to_string());
                exit(0, "", "")
            }
            ["rule", "del", "from", source, "lookup", table] => {
                self.delete_rule(&RuleSelector::From(source.to_string()), table)
            }
            ["rule", "del", "fwmark", mark, "lookup", table] => {
                self.delete_rule(&RuleSelector::Fwmark(mark.to_string()), table)
            }
            _ => exit(255, "", "Command line is not complete. Try option \"help\""),
        }
    }

    fn iptables(&mut self, args: &[&str]) -> CommandOutput {
        let ["-t", table, op, chain, spec @ ..] = args else {
            return exit(2, "", "iptables: unsupported invocation");
        };
        let filter = FakeFilter {
            table: table.to_string(),
            chain: chain.to_string(),
            spec: spec.iter().map(|s| s.to_string()).collect(),
        };
        let position = self.filters.iter().position(|f| *f == filter);

        match (*op, position) {
            ("-C", Some(_)) => exit(0, "", ""),
            ("-C", None) | ("-D", None) => exit(
                1,
                "",
                "iptables: Bad rule (does a matching rule exist in that chain?).",
            ),
            ("-A", _) => {
                self.filters.push(filter);
                exit(0, "", "")
            }
            ("-D", Some(index)) => {
                self.filters.remove(index);
                exit(0, "", "")
            }
            _ => exit(2, "", "iptables: unknown option"),
        }
    }

    /// The kernel keeps a table once a route has been added to it.
    fn table_exists(&self, table: u32) -> bool {
        self.defaults.contains_key(&table) || self.occupied.contains(&table)
    }

    fn show_table(&self, table: u32, default_only: bool) -> String {
        let mut out = String::new();
        for gateway in self.defaults.get(&table).into_iter().flatten() {
            out.push_str(&format!("default via {gateway} dev eth0 \n"));
        }
        if !default_only && self.occupied.contains(&table) {
            out.push_str("10.255.0.0/24 dev eth0 proto kernel scope link \n");
        }
        out
    }

    fn show_rules(&self, selector: &RuleSelector) -> String {
        self.rules_matching(selector)
            .into_iter()
            .map(|rule| match &rule.selector {
                RuleSelector::From(source) => {
                    format!("{}:\tfrom {} lookup {}\n", rule.priority, source, rule.table)
                }
                RuleSelector::Fwmark(mark) => format!(
                    "{}:\tfrom all fwmark {} lookup {}\n",
                    rule.priority, mark, rule.table
                ),
            })
            .collect()
    }

    fn rules_matching(&self, selector: &RuleSelector) -> Vec<FakeRule> {
        let mut rules: Vec<FakeRule> = self
            .rules
            .iter()
            .filter(|rule| rule.selector == *selector)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.priority);
        rules
    }

    fn push_rule(&mut self, selector: RuleSelector, table: String) {
        let priority = self.next_priority.unwrap_or(FIRST_RULE_PRIORITY);
        self.next_priority = Some(priority.saturating_sub(1));
        self.rules.push(FakeRule {
            priority,
            selector,
            table,
        });
    }

    fn delete_rule(&mut self, selector: &RuleSelector, table: &str) -> CommandOutput {
        match self
            .rules
            .iter()
            .position(|rule| rule.selector == *selector && rule.table == table)
        {
            Some(index) => {
                self.rules.remove(index);
                exit(0, "", "")
            }
            None => exit(2, "", "RTNETLINK answers: No such file or directory"),
        }
    }
}

fn exit(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

fn missing_table() -> CommandOutput {
    exit(2, "", "Error: ipv4: FIB table does not exist.\nDump terminated\n")
}

fn invalid_table(table: &str) -> CommandOutput {
    exit(255, "", &format!("Error: argument \"{table}\" is wrong: invalid table ID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_route_add_is_not_idempotent() {
        let host = FakeHost::new();
        host.run("ip", &["route", "add", "default", "via", "172.18.0.2", "table", "5"])
            .await
            .unwrap();
        let out = host
            .output("ip", &["route", "add", "default", "via", "172.18.0.3", "table", "5"])
            .await
            .unwrap();
        assert_eq!(out.code, Some(2));

        let shown = host.run("ip", &["route", "show", "table", "5"]).await.unwrap();
        assert_eq!(shown, "default via 172.18.0.2 dev eth0 \n");
    }

    #[tokio::test]
    async fn iptables_check_reports_presence_by_exit_code() {
        let host = FakeHost::new();
        let check = ["-t", "filter", "-C", "FORWARD", "-s", "10.0.0.5", "-j", "DROP"];
        assert_eq!(host.output("iptables", &check).await.unwrap().code, Some(1));

        host.run("iptables", &["-t", "filter", "-A", "FORWARD", "-s", "10.0.0.5", "-j", "DROP"])
            .await
            .unwrap();
        assert_eq!(host.output("iptables", &check).await.unwrap().code, Some(0));
    }

    #[tokio::test]
    async fn rule_show_lists_lookups_in_priority_order() {
        let host = FakeHost::new();
        host.add_source_rule("10.0.0.5", 3);
        host.add_source_rule("10.0.0.5", 4);
        let shown = host
            .run("ip", &["rule", "show", "from", "10.0.0.5"])
            .await
            .unwrap();
        assert_eq!(
            shown,
            "32764:\tfrom 10.0.0.5 lookup 4\n32765:\tfrom 10.0.0.5 lookup 3\n"
        );
    }

    #[tokio::test]
    async fn injected_failures_exit_nonzero() {
        let host = FakeHost::new();
        host.fail_on("ip rule add");
        let out = host
            .output("ip", &["rule", "add", "from", "10.0.0.5", "lookup", "3"])
            .await
            .unwrap();
        assert_eq!(out.code, Some(2));
        assert!(host.source_rules("10.0.0.5").is_empty());
    }
}
