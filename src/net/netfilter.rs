use crate::error::VpnmuxError;
use crate::system::{CommandRunner, command_line};
use tracing::debug;

/// Upper bound on duplicate copies removed by a single [`FilterRule::remove`].
const MAX_DUPLICATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Present,
    Absent,
}

/// One iptables rule, identified by table, chain and match specification.
///
/// `ensure` and `remove` are both idempotent: the rule is checked with `-C`
/// before it is appended or deleted. `-C` exiting 0 means present, 1 means
/// absent, anything else is a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    table: &'static str,
    chain: &'static str,
    spec: Vec<String>,
}

impl FilterRule {
    pub fn new(table: &'static str, chain: &'static str, spec: Vec<String>) -> Self {
        Self { table, chain, spec }
    }

    pub fn spec(&self) -> Vec<&str> {
        self.spec.iter().map(String::as_str).collect()
    }

    fn args<'a>(&'a self, op: &'a str) -> Vec<&'a str> {
        let mut args = vec!["-t", self.table, op, self.chain];
        args.extend(self.spec.iter().map(String::as_str));
        args
    }

    pub async fn state(&self, runner: &dyn CommandRunner) -> Result<RuleState, VpnmuxError> {
        let args = self.args("-C");
        let out = runner.output("iptables", &args).await?;
        match out.code {
            Some(0) => Ok(RuleState::Present),
            Some(1) => Ok(RuleState::Absent),
            code => Err(VpnmuxError::CommandFailed {
                command: command_line("iptables", &args),
                code,
                stderr: out.stderr.trim().to_string(),
            }),
        }
    }

    pub async fn ensure(&self, runner: &dyn CommandRunner) -> Result<(), VpnmuxError> {
        if self.state(runner).await? == RuleState::Present {
            return Ok(());
        }
        debug!(table = self.table, chain = self.chain, spec = ?self.spec, "appending filter rule");
        runner.run("iptables", &self.args("-A")).await?;
        Ok(())
    }

    /// Delete every copy of the rule. Absence is success.
    pub async fn remove(&self, runner: &dyn CommandRunner) -> Result<(), VpnmuxError> {
        for _ in 0..MAX_DUPLICATES {
            if self.state(runner).await? == RuleState::Absent {
                return Ok(());
            }
            debug!(table = self.table, chain = self.chain, spec = ?self.spec, "deleting filter rule");
            runner.run("iptables", &self.args("-D")).await?;
        }
        Err(VpnmuxError::Consistency(format!(
            "filter rule {:?} still present after {MAX_DUPLICATES} deletions",
            self.spec
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeHost;

    fn drop_rule() -> FilterRule {
        FilterRule::new(
            "filter",
            "FORWARD",
            vec!["-s".into(), "10.0.0.5".into(), "-j".into(), "DROP".into()],
        )
    }

    #[tokio::test]
    async fn ensure_twice_installs_one_rule() {
        let host = FakeHost::new();
        let rule = drop_rule();
        rule.ensure(&host).await.unwrap();
        rule.ensure(&host).await.unwrap();
        assert_eq!(host.filter_count("filter", "FORWARD", &rule.spec()), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_clears_duplicates() {
        let host = FakeHost::new();
        let rule = drop_rule();
        host.run("iptables", &rule.args("-A")).await.unwrap();
        host.run("iptables", &rule.args("-A")).await.unwrap();

        rule.remove(&host).await.unwrap();
        rule.remove(&host).await.unwrap();
        assert_eq!(host.filter_count("filter", "FORWARD", &rule.spec()), 0);
    }

    #[tokio::test]
    async fn unexpected_check_status_is_an_error() {
        let host = FakeHost::new();
        host.fail_on("iptables -t filter -C");
        let err = drop_rule().ensure(&host).await.unwrap_err();
        assert!(matches!(err, VpnmuxError::CommandFailed { code: Some(2), .. }));
        assert_eq!(host.filter_count("filter", "FORWARD", &drop_rule().spec()), 0);
    }
}
