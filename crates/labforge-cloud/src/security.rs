//! Security group rules and convergence
//!
//! Rules are compared as `(protocol, port, cidr, action)` tuples. Provider
//! indices only matter when deleting.

use crate::error::{CloudError, Result};
use crate::provider::{CloudProvider, Credential};
use crate::ratelimit::{RateLimiter, action_name};
use crate::retry::{RetryConfig, retry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Direction of a rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    Accept,
    Drop,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Accept => write!(f, "ACCEPT"),
            RuleAction::Drop => write!(f, "DROP"),
        }
    }
}

/// One firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RuleDef")]
pub struct SecurityRule {
    /// "TCP", "UDP", "ICMP" or "ALL"
    pub protocol: String,

    /// Single port, range ("8000-8100") or "ALL"
    pub port: String,

    pub cidr: String,

    pub action: RuleAction,
}

impl SecurityRule {
    pub fn new(
        protocol: impl Into<String>,
        port: impl Into<String>,
        cidr: impl Into<String>,
        action: RuleAction,
    ) -> Self {
        Self {
            protocol: protocol.into().to_uppercase(),
            port: port.into().to_uppercase(),
            cidr: cidr.into(),
            action,
        }
    }

    pub fn allow(protocol: impl Into<String>, port: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self::new(protocol, port, cidr, RuleAction::Accept)
    }
}

/// Settings-file form of a rule: any case, numeric ports, action optional
#[derive(Deserialize)]
struct RuleDef {
    protocol: String,
    port: PortDef,
    cidr: String,
    #[serde(default = "default_action")]
    action: RuleAction,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortDef {
    Number(u32),
    Text(String),
}

fn default_action() -> RuleAction {
    RuleAction::Accept
}

impl From<RuleDef> for SecurityRule {
    fn from(def: RuleDef) -> Self {
        let port = match def.port {
            PortDef::Number(n) => n.to_string(),
            PortDef::Text(s) => s,
        };
        SecurityRule::new(def.protocol, port, def.cidr, def.action)
    }
}

impl std::fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{} from {}", self.action, self.protocol, self.port, self.cidr)
    }
}

/// A rule as reported by the provider, with its position in the rule list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRule {
    pub index: u32,
    pub rule: SecurityRule,
}

/// Desired rule set for one direction of a security group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub rules: Vec<SecurityRule>,
}

impl SecurityPolicy {
    pub fn new(rules: Vec<SecurityRule>) -> Self {
        Self { rules }
    }

    /// Temporary rule set used while a node is bootstrapped: the given open
    /// ports plus the shell port from anywhere.
    pub fn bootstrap(open_ports: &[SecurityRule], shell_port: u16) -> Self {
        let mut rules = open_ports.to_vec();
        let shell = SecurityRule::allow("TCP", shell_port.to_string(), "0.0.0.0/0");
        if !rules.contains(&shell) {
            rules.push(shell);
        }
        Self { rules }
    }

    /// Production rule set: everything from the intranet plus an allow-list.
    pub fn production(intranet_cidr: &str, allow_list: &[SecurityRule]) -> Self {
        let mut rules = vec![SecurityRule::allow("ALL", "ALL", intranet_cidr)];
        for rule in allow_list {
            if !rules.contains(rule) {
                rules.push(rule.clone());
            }
        }
        Self { rules }
    }
}

/// Desired tuples absent from the observed rules carrying the same action.
///
/// Duplicates in `desired` are reported once.
pub fn missing_rules(desired: &[SecurityRule], observed: &[ObservedRule]) -> Vec<SecurityRule> {
    let present: HashSet<&SecurityRule> = observed.iter().map(|o| &o.rule).collect();
    let mut seen = HashSet::new();
    desired
        .iter()
        .filter(|rule| !present.contains(rule))
        .filter(|rule| seen.insert(*rule))
        .cloned()
        .collect()
}

/// Indices of observed rules that are not part of `desired`.
pub fn surplus_indices(desired: &[SecurityRule], observed: &[ObservedRule]) -> Vec<u32> {
    let wanted: HashSet<&SecurityRule> = desired.iter().collect();
    observed
        .iter()
        .filter(|o| !wanted.contains(&o.rule))
        .map(|o| o.index)
        .collect()
}

/// How convergence treats rules that are not in the desired set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeMode {
    /// Only add missing rules
    Incremental,
    /// Add missing rules, then delete every rule outside the desired set
    Replace,
}

/// What one convergence pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    pub added: Vec<SecurityRule>,
    pub deleted: Vec<SecurityRule>,
}

impl ConvergeReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}

/// Reconciles a live security group toward a desired rule set
pub struct SecurityConverger {
    provider: Arc<dyn CloudProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl SecurityConverger {
    pub fn new(provider: Arc<dyn CloudProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            provider,
            limiter,
            retry: RetryConfig::immediate(3),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Converge with bounded retries; every attempt recomputes from live state.
    pub async fn converge(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
        desired: &SecurityPolicy,
        mode: ConvergeMode,
    ) -> Result<ConvergeReport> {
        retry(&self.retry, "security group convergence", |_| {
            self.converge_once(credential, region, group_id, direction, desired, mode)
        })
        .await
    }

    /// One convergence pass without retries.
    ///
    /// Replace mode adds before it deletes, so the group never passes through
    /// an empty rule set.
    pub async fn converge_once(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
        desired: &SecurityPolicy,
        mode: ConvergeMode,
    ) -> Result<ConvergeReport> {
        let mut report = ConvergeReport::default();

        let observed = self.observe(credential, region, group_id, direction).await?;
        let missing = missing_rules(&desired.rules, &observed);

        if !missing.is_empty() {
            tracing::info!(
                "Adding {} {} rule(s) to {}",
                missing.len(),
                direction,
                group_id
            );
            self.limiter
                .acquire(&action_name("create", "security-rule"))
                .await;
            self.provider
                .add_security_rules(credential, region, group_id, direction, &missing)
                .await
                .map_err(|e| CloudError::SecurityConvergence(e.to_string()))?;
            report.added = missing;
        }

        if mode == ConvergeMode::Replace {
            let observed = if report.added.is_empty() {
                observed
            } else {
                self.observe(credential, region, group_id, direction).await?
            };

            let surplus: Vec<&ObservedRule> = {
                let indices = surplus_indices(&desired.rules, &observed);
                observed.iter().filter(|o| indices.contains(&o.index)).collect()
            };

            if !surplus.is_empty() {
                let indices: Vec<u32> = surplus.iter().map(|o| o.index).collect();
                tracing::info!(
                    "Deleting {} {} rule(s) from {}",
                    indices.len(),
                    direction,
                    group_id
                );
                self.limiter
                    .acquire(&action_name("delete", "security-rule"))
                    .await;
                self.provider
                    .delete_security_rules(credential, region, group_id, direction, &indices)
                    .await
                    .map_err(|e| CloudError::SecurityConvergence(e.to_string()))?;
                report.deleted = surplus.into_iter().map(|o| o.rule.clone()).collect();
            }
        }

        if report.is_noop() {
            tracing::debug!("{} rules of {} already converged", direction, group_id);
        }
        Ok(report)
    }

    async fn observe(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
    ) -> Result<Vec<ObservedRule>> {
        self.limiter
            .acquire(&action_name("list", "security-rule"))
            .await;
        self.provider
            .list_security_rules(credential, region, group_id, direction)
            .await
            .map_err(|e| CloudError::SecurityConvergence(e.to_string()))
    }
}
