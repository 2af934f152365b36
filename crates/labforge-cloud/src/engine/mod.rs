//! Checkpointed stage engine
//!
//! Runs the fixed provisioning sequence. Every stage first looks for what it
//! would create, so re-running a stage that already succeeded changes nothing.
//!
//! ```text
//! Region → Account → Project → Network → SecurityGroup → SecurityPolicies
//!        → ObjectStore → ManagedCluster → ClusterNode → NodeNetworkFinalize
//! ```

mod finalize;
mod settings;
mod stages;

pub use settings::{
    BootstrapStep, BucketSettings, ClusterSettings, EngineSettings, NetworkSettings,
    NodeSettings, RemoteSettings, SecuritySettings,
};

use crate::action::{ActionType, RunReport, StageOutcome};
use crate::error::{CloudError, Result};
use crate::naming::NameGenerator;
use crate::provider::{CloudProvider, Credential, DEPLOYMENT_TAG, ResourceKind, ResourceRequest};
use crate::ratelimit::{RateLimiter, action_name};
use crate::remote::RemoteConnector;
use crate::security::SecurityConverger;
use crate::retry::RetryConfig;
use crate::state::CheckpointStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Provisioning stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Region,
    Account,
    Project,
    Network,
    SecurityGroup,
    SecurityPolicies,
    ObjectStore,
    ManagedCluster,
    ClusterNode,
    NodeNetworkFinalize,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Region,
        Stage::Account,
        Stage::Project,
        Stage::Network,
        Stage::SecurityGroup,
        Stage::SecurityPolicies,
        Stage::ObjectStore,
        Stage::ManagedCluster,
        Stage::ClusterNode,
        Stage::NodeNetworkFinalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Region => "region",
            Stage::Account => "account",
            Stage::Project => "project",
            Stage::Network => "network",
            Stage::SecurityGroup => "security-group",
            Stage::SecurityPolicies => "security-policies",
            Stage::ObjectStore => "object-store",
            Stage::ManagedCluster => "managed-cluster",
            Stage::ClusterNode => "cluster-node",
            Stage::NodeNetworkFinalize => "node-network-finalize",
        }
    }

    /// Stages from `from` to `to`, both inclusive
    pub fn range(from: Stage, to: Stage) -> &'static [Stage] {
        let all: &'static [Stage] = &Self::ALL;
        let start = from as usize;
        let end = to as usize;
        if start > end {
            return &[];
        }
        &all[start..=end]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "cluster" => return Ok(Stage::ManagedCluster),
            "node" => return Ok(Stage::ClusterNode),
            "finalize" => return Ok(Stage::NodeNetworkFinalize),
            "bucket" => return Ok(Stage::ObjectStore),
            _ => {}
        }
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Stage::ALL.iter().map(Stage::name).collect();
                format!("unknown stage `{}` (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Collaborators shared by every stage
pub struct EngineContext {
    pub provider: Arc<dyn CloudProvider>,
    pub connector: Arc<dyn RemoteConnector>,
    pub limiter: Arc<RateLimiter>,
    pub settings: EngineSettings,
}

impl EngineContext {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        connector: Arc<dyn RemoteConnector>,
        limiter: Arc<RateLimiter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            provider,
            connector,
            limiter,
            settings,
        }
    }
}

/// Runs provisioning stages against one checkpoint
pub struct StageEngine {
    ctx: EngineContext,
    checkpoint: CheckpointStore,
    converger: SecurityConverger,
}

impl StageEngine {
    pub fn new(ctx: EngineContext, checkpoint: CheckpointStore) -> Self {
        let converger = SecurityConverger::new(ctx.provider.clone(), ctx.limiter.clone())
            .with_retry(RetryConfig::immediate(
                ctx.settings.security.convergence_attempts,
            ));
        Self {
            ctx,
            checkpoint,
            converger,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn into_checkpoint(self) -> CheckpointStore {
        self.checkpoint
    }

    /// Run a single stage
    pub async fn run(&mut self, credential: &Credential, stage: Stage) -> Result<StageOutcome> {
        tracing::info!("Running stage {}", stage);
        let outcome = match stage {
            Stage::Region => self.ensure_region(credential).await,
            Stage::Account => self.ensure_account(credential).await,
            Stage::Project => self.ensure_project(credential).await,
            Stage::Network => self.ensure_network(credential).await,
            Stage::SecurityGroup => self.ensure_security_group(credential).await,
            Stage::SecurityPolicies => self.ensure_security_policies(credential).await,
            Stage::ObjectStore => self.ensure_object_store(credential).await,
            Stage::ManagedCluster => self.ensure_cluster(credential).await,
            Stage::ClusterNode => self.ensure_node(credential).await,
            Stage::NodeNetworkFinalize => self.finalize_node(credential).await,
        };

        match &outcome {
            Ok(outcome) => tracing::info!(
                "Stage {} finished ({}): {}",
                stage,
                outcome.action,
                outcome.resource_id
            ),
            Err(e) => tracing::error!("Stage {} failed: {}", stage, e),
        }
        outcome
    }

    /// Run `from..=to` in order, stopping at the first failure
    pub async fn run_range(
        &mut self,
        credential: &Credential,
        from: Stage,
        to: Stage,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::new();
        for stage in Stage::range(from, to) {
            report.push(self.run(credential, *stage).await?);
        }
        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!("Provisioning finished: {}", report.summary());
        Ok(report)
    }

    pub async fn run_all(&mut self, credential: &Credential) -> Result<RunReport> {
        self.run_range(credential, Stage::Region, Stage::NodeNetworkFinalize)
            .await
    }

    /// Recorded value of an upstream stage
    fn require(&self, field: &str, stage: Stage) -> Result<String> {
        self.checkpoint
            .state()
            .get(field)
            .map(str::to_owned)
            .ok_or(CloudError::MissingPrerequisite(stage.name()))
    }

    fn name_prefix(&self, kind: ResourceKind) -> String {
        let short = match kind {
            ResourceKind::Project => "proj",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Cluster => "cls",
            ResourceKind::Instance => "node",
        };
        format!("{}-{}", self.ctx.settings.name_prefix, short)
    }

    /// Shared existence-check-then-create template of the resource stages.
    ///
    /// `extra` is recorded next to the new id, in the same save, when the
    /// resource is created.
    async fn ensure_resource<F>(
        &mut self,
        credential: &Credential,
        stage: Stage,
        kind: ResourceKind,
        field: &str,
        extra: &[(&str, String)],
        build: F,
    ) -> Result<StageOutcome>
    where
        F: FnOnce(String) -> ResourceRequest,
    {
        let region = self.require("region", Stage::Region)?;
        let deployment = self.ctx.settings.deployment.clone();
        let recorded = self.checkpoint.state().get(field).map(str::to_owned);

        self.ctx.limiter.acquire(&action_name("list", kind)).await;
        let live = self
            .ctx
            .provider
            .list(credential, &region, kind)
            .await
            .map_err(query_failed)?;

        if let Some(id) = &recorded
            && live.iter().any(|r| &r.id == id)
        {
            tracing::debug!("{} {} already exists", kind, id);
            return Ok(StageOutcome::new(
                stage,
                ActionType::NoOp,
                id.clone(),
                format!("{} {} already exists", kind, id),
            ));
        }

        if let Some(id) = &recorded {
            tracing::warn!("Recorded {} {} is no longer live", kind, id);
        }

        if let Some(tagged) = live.iter().find(|r| r.belongs_to(&deployment)) {
            tracing::info!("Adopting {} {} ({})", kind, tagged.id, tagged.name);
            self.checkpoint.state_mut().set(field, tagged.id.clone());
            self.checkpoint.save().await?;
            return Ok(StageOutcome::new(
                stage,
                ActionType::Adopt,
                tagged.id.clone(),
                format!("adopted {} {}", kind, tagged.name),
            ));
        }

        self.ctx.limiter.acquire(&action_name("quota", kind)).await;
        let quota = self
            .ctx
            .provider
            .quota(credential, &region, kind)
            .await
            .map_err(query_failed)?;
        if let Some(quota) = quota
            && quota.is_exhausted()
        {
            return Err(CloudError::QuotaExceeded {
                kind,
                used: quota.used,
                limit: quota.limit,
            });
        }

        let taken: HashSet<String> = live.iter().map(|r| r.name.clone()).collect();
        let name = unique_name(&self.name_prefix(kind), &taken);
        let request = build(name.clone()).with_tag(DEPLOYMENT_TAG, deployment);

        tracing::info!("Creating {} {}", kind, name);
        self.ctx.limiter.acquire(&action_name("create", kind)).await;
        let created = self
            .ctx
            .provider
            .create(credential, &request)
            .await
            .map_err(|e| submit_failed(kind, e))?;

        let state = self.checkpoint.state_mut();
        state.set(field, created.id.clone());
        for (name, value) in extra {
            state.set(name, value.clone());
        }
        self.checkpoint.save().await?;

        Ok(StageOutcome::new(
            stage,
            ActionType::Create,
            created.id,
            format!("created {} {}", kind, name),
        ))
    }
}

/// Draw a name outside `taken`; kept synchronous so the RNG never lives
/// across an await point.
fn unique_name(prefix: &str, taken: &HashSet<String>) -> String {
    NameGenerator::new(prefix).generate(taken, &mut rand::thread_rng())
}

fn query_failed(e: CloudError) -> CloudError {
    match e {
        CloudError::ProviderQuery(_) => e,
        other => CloudError::ProviderQuery(other.to_string()),
    }
}

fn submit_failed(kind: ResourceKind, e: CloudError) -> CloudError {
    match e {
        CloudError::ProviderSubmit { .. } | CloudError::QuotaExceeded { .. } => e,
        other => CloudError::ProviderSubmit {
            kind,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Region < Stage::Account);
        assert!(Stage::ClusterNode < Stage::NodeNetworkFinalize);
        assert_eq!(Stage::ALL.len(), 10);
    }

    #[test]
    fn test_stage_range() {
        assert_eq!(
            Stage::range(Stage::Network, Stage::SecurityPolicies),
            &[Stage::Network, Stage::SecurityGroup, Stage::SecurityPolicies]
        );
        assert!(Stage::range(Stage::ClusterNode, Stage::Region).is_empty());
        assert_eq!(Stage::range(Stage::Region, Stage::Region), &[Stage::Region]);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("security-group".parse::<Stage>().unwrap(), Stage::SecurityGroup);
        assert_eq!("Security_Policies".parse::<Stage>().unwrap(), Stage::SecurityPolicies);
        assert_eq!("node".parse::<Stage>().unwrap(), Stage::ClusterNode);
        assert!("database".parse::<Stage>().unwrap_err().contains("unknown stage"));
    }

    #[test]
    fn test_stage_display_round_trips() {
        for stage in Stage::ALL {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_error_mapping_keeps_provider_message() {
        let e = submit_failed(ResourceKind::Vpc, CloudError::Connection("reset".into()));
        assert!(matches!(e, CloudError::ProviderSubmit { kind: ResourceKind::Vpc, .. }));
        assert!(e.to_string().contains("reset"));

        let q = query_failed(CloudError::ProviderQuery("AuthFailure".into()));
        assert_eq!(q.to_string(), "Provider query failed: AuthFailure");
    }
}
