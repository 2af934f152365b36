use super::{BootstrapStep, Stage, StageEngine};
use crate::action::{ActionType, StageOutcome};
use crate::error::{CloudError, Result};
use crate::provider::Credential;
use crate::remote::{RemoteSession, RemoteTarget, connect_with_retry};
use crate::retry::RetryConfig;
use crate::security::{ConvergeMode, ConvergeReport, Direction, ObservedRule, SecurityPolicy};
use crate::ratelimit::action_name;
use chrono::Utc;

impl StageEngine {
    /// How to reach the provisioned node
    pub fn remote_target(&self) -> Result<RemoteTarget> {
        let host = self.require("instance_ip", Stage::ClusterNode)?;
        let password = self.require("instance_password", Stage::ClusterNode)?;
        let remote = &self.ctx.settings.remote;
        Ok(RemoteTarget::new(host, remote.port, remote.user.clone(), password))
    }

    /// Open a session to the node with the configured connect retries
    pub async fn connect_node(&self) -> Result<Box<dyn RemoteSession>> {
        let target = self.remote_target()?;
        let remote = &self.ctx.settings.remote;
        let config = RetryConfig::fixed(remote.connect_attempts, remote.connect_backoff());
        connect_with_retry(self.ctx.connector.as_ref(), &target, &config).await
    }

    /// Push the deployment, bootstrap the node, then lock the security
    /// group down to the production rule set.
    pub async fn finalize_node(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let group_id = self.require("security_group_id", Stage::SecurityGroup)?;
        if self.checkpoint.state().instance_password.is_none() {
            tracing::warn!("No node password recorded; the node was adopted without one");
        }

        let mut session = self.connect_node().await?;
        tracing::info!("Connected to {}", session.host());

        let bootstrapped = self.bootstrap(session.as_mut()).await;
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close session to {}: {}", session.host(), e);
        }
        let pushed = bootstrapped?;

        let report = self
            .converge_production(credential, &region, &group_id, ConvergeMode::Replace)
            .await?;

        self.checkpoint.state_mut().finalized_at = Some(Utc::now());
        self.checkpoint.save().await?;

        Ok(StageOutcome::new(
            Stage::NodeNetworkFinalize,
            ActionType::Converge,
            group_id,
            format!(
                "pushed {} file(s), {} rule(s) added, {} removed",
                pushed,
                report.added.len(),
                report.deleted.len()
            ),
        ))
    }

    /// Create the deploy directory, push files and run the bootstrap steps.
    /// Returns the number of pushed files.
    async fn bootstrap(&self, session: &mut dyn RemoteSession) -> Result<usize> {
        let remote = &self.ctx.settings.remote;

        let mkdir = BootstrapStep::new(format!("mkdir -p {}", remote.deploy_dir), 1);
        run_step(session, &mkdir).await?;

        for file in &remote.files {
            let destination = session
                .push_file(file, &remote.deploy_dir)
                .await
                .map_err(|e| CloudError::RemoteBootstrap {
                    command: format!("push {}", file.display()),
                    output: e.to_string(),
                })?;
            tracing::info!("Pushed {} to {}", file.display(), destination);
        }

        for step in &remote.bootstrap {
            run_step(session, step).await?;
        }
        Ok(remote.files.len())
    }

    /// Rules the security group holds once the node is finalized
    pub fn production_policy(&self) -> SecurityPolicy {
        let settings = &self.ctx.settings;
        let intranet = settings
            .security
            .intranet_cidr
            .as_deref()
            .unwrap_or(settings.network.vpc_cidr.as_str());
        SecurityPolicy::production(intranet, &settings.security.allow_list)
    }

    /// Converge the security group toward the production rule set
    pub async fn converge_production(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        mode: ConvergeMode,
    ) -> Result<ConvergeReport> {
        let policy = self.production_policy();
        self.converger
            .converge(credential, region, group_id, Direction::Ingress, &policy, mode)
            .await
    }

    /// Converge the recorded security group toward the production rule set
    pub async fn converge_rules(
        &self,
        credential: &Credential,
        mode: ConvergeMode,
    ) -> Result<ConvergeReport> {
        let region = self.require("region", Stage::Region)?;
        let group_id = self.require("security_group_id", Stage::SecurityGroup)?;
        self.converge_production(credential, &region, &group_id, mode)
            .await
    }

    /// Live ingress rules of the recorded security group
    pub async fn live_rules(&self, credential: &Credential) -> Result<Vec<ObservedRule>> {
        let region = self.require("region", Stage::Region)?;
        let group_id = self.require("security_group_id", Stage::SecurityGroup)?;
        self.ctx
            .limiter
            .acquire(&action_name("list", "security-rule"))
            .await;
        self.ctx
            .provider
            .list_security_rules(credential, &region, &group_id, Direction::Ingress)
            .await
    }
}

/// Run one bootstrap step, re-running it back to back up to its attempt bound
async fn run_step(session: &mut dyn RemoteSession, step: &BootstrapStep) -> Result<()> {
    let attempts = step.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let failure = match session.run_command(&step.command).await {
            Ok(output) if output.success() => {
                tracing::info!("`{}` succeeded", step.command);
                return Ok(());
            }
            Ok(output) => format!(
                "exit status {}: {}",
                output
                    .exit_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                output.output.trim()
            ),
            Err(e) => e.to_string(),
        };

        if attempt >= attempts {
            return Err(CloudError::RemoteBootstrap {
                command: step.command.clone(),
                output: failure,
            });
        }
        tracing::info!(
            "`{}` failed (attempt {}/{}): {}",
            step.command,
            attempt,
            attempts,
            failure
        );
    }
}
