use super::{Stage, StageEngine, query_failed};
use crate::action::{ActionType, StageOutcome};
use crate::error::{CloudError, Result};
use crate::naming::generate_password;
use crate::provider::{Credential, ResourceKind, ResourceRequest};
use crate::ratelimit::action_name;
use crate::retry::{RetryConfig, retry};
use crate::security::{ConvergeMode, Direction, SecurityPolicy};
use serde_json::json;

/// Keep only the last four characters of an identifier for display
fn masked(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

fn node_password(len: usize) -> String {
    generate_password(len, &mut rand::thread_rng())
}

impl StageEngine {
    /// Select the region and zone to provision into.
    ///
    /// A recorded region and zone are kept, and it is an error if the provider
    /// no longer offers them: everything provisioned later lives there. With
    /// nothing recorded, the configured region is preferred, then the first
    /// one the provider offers. Zones are picked the same way.
    pub async fn ensure_region(&mut self, credential: &Credential) -> Result<StageOutcome> {
        self.ctx.limiter.acquire(&action_name("list", "region")).await;
        let regions = self
            .ctx
            .provider
            .list_regions(credential)
            .await
            .map_err(query_failed)?;

        let state = self.checkpoint.state();
        let settings = &self.ctx.settings;

        let region = match state.region.as_deref() {
            Some(recorded) => regions
                .iter()
                .find(|r| r.region == recorded)
                .ok_or_else(|| {
                    CloudError::ProviderQuery(format!(
                        "recorded region {} is no longer offered by the provider",
                        recorded
                    ))
                })?,
            None => settings
                .region
                .as_deref()
                .and_then(|wanted| regions.iter().find(|r| r.region == wanted))
                .or_else(|| {
                    if let Some(wanted) = &settings.region {
                        tracing::warn!("Region {} is not available, using the first one", wanted);
                    }
                    regions.first()
                })
                .ok_or_else(|| CloudError::ProviderQuery("no regions available".to_string()))?,
        };

        let zone = match state.zone.as_deref() {
            Some(recorded) if region.zones.iter().any(|z| z == recorded) => recorded.to_owned(),
            Some(recorded) => {
                return Err(CloudError::ProviderQuery(format!(
                    "recorded zone {} is no longer offered in region {}",
                    recorded, region.region
                )));
            }
            None => settings
                .zone
                .as_deref()
                .filter(|zone| region.zones.iter().any(|z| z == zone))
                .map(str::to_owned)
                .or_else(|| region.zones.first().cloned())
                .ok_or_else(|| {
                    CloudError::ProviderQuery(format!("region {} has no zones", region.region))
                })?,
        };

        let region = region.region.clone();
        let resource_id = format!("{}/{}", region, zone);

        if state.region.as_deref() == Some(region.as_str())
            && state.zone.as_deref() == Some(zone.as_str())
        {
            return Ok(StageOutcome::new(
                Stage::Region,
                ActionType::NoOp,
                resource_id,
                "region and zone already selected",
            ));
        }

        let state = self.checkpoint.state_mut();
        state.set("region", region);
        state.set("zone", zone);
        self.checkpoint.save().await?;

        Ok(StageOutcome::new(
            Stage::Region,
            ActionType::Adopt,
            resource_id,
            "selected region and zone",
        ))
    }

    /// Record the account that owns the credential.
    ///
    /// Fails if the checkpoint was written for a different account.
    pub async fn ensure_account(&mut self, credential: &Credential) -> Result<StageOutcome> {
        self.ctx
            .limiter
            .acquire(&action_name("describe", "account"))
            .await;
        let account = self
            .ctx
            .provider
            .account(credential)
            .await
            .map_err(query_failed)?;

        match self.checkpoint.state().owner_account.as_deref() {
            Some(recorded) if recorded == account.id => Ok(StageOutcome::new(
                Stage::Account,
                ActionType::NoOp,
                masked(&account.id),
                "account unchanged",
            )),
            Some(recorded) => Err(CloudError::ProviderQuery(format!(
                "credentials belong to account {}, but the checkpoint was written for account {}",
                masked(&account.id),
                masked(recorded)
            ))),
            None => {
                self.checkpoint
                    .state_mut()
                    .set("owner_account", account.id.clone());
                self.checkpoint.save().await?;
                Ok(StageOutcome::new(
                    Stage::Account,
                    ActionType::Adopt,
                    masked(&account.id),
                    "recorded owning account",
                ))
            }
        }
    }

    pub async fn ensure_project(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let description = format!("LabForge deployment {}", self.ctx.settings.deployment);

        self.ensure_resource(
            credential,
            Stage::Project,
            ResourceKind::Project,
            "project_id",
            &[],
            |name| {
                ResourceRequest::new(ResourceKind::Project, name, region)
                    .with_config("description", json!(description))
            },
        )
        .await
    }

    pub async fn ensure_vpc(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let cidr = self.ctx.settings.network.vpc_cidr.clone();

        self.ensure_resource(
            credential,
            Stage::Network,
            ResourceKind::Vpc,
            "vpc_id",
            &[],
            |name| {
                ResourceRequest::new(ResourceKind::Vpc, name, region).with_config("cidr", json!(cidr))
            },
        )
        .await
    }

    pub async fn ensure_subnet(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let zone = self.require("zone", Stage::Region)?;
        let vpc_id = self.require("vpc_id", Stage::Network)?;
        let cidr = self.ctx.settings.network.subnet_cidr.clone();

        self.ensure_resource(
            credential,
            Stage::Network,
            ResourceKind::Subnet,
            "subnet_id",
            &[],
            |name| {
                ResourceRequest::new(ResourceKind::Subnet, name, region)
                    .with_zone(zone)
                    .with_config("vpc_id", json!(vpc_id))
                    .with_config("cidr", json!(cidr))
            },
        )
        .await
    }

    /// VPC then subnet; each is checkpointed on its own.
    pub async fn ensure_network(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let vpc = self.ensure_vpc(credential).await?;
        let subnet = self.ensure_subnet(credential).await?;

        Ok(StageOutcome::new(
            Stage::Network,
            vpc.action.max(subnet.action),
            subnet.resource_id,
            format!("vpc: {}; subnet: {}", vpc.description, subnet.description),
        ))
    }

    pub async fn ensure_security_group(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let project_id = self.require("project_id", Stage::Project)?;
        let deployment = self.ctx.settings.deployment.clone();

        self.ensure_resource(
            credential,
            Stage::SecurityGroup,
            ResourceKind::SecurityGroup,
            "security_group_id",
            &[],
            |name| {
                ResourceRequest::new(ResourceKind::SecurityGroup, name, region)
                    .with_config("project_id", json!(project_id))
                    .with_config("description", json!(format!("LabForge {}", deployment)))
            },
        )
        .await
    }

    /// Open the bootstrap rule set on the security group without removing
    /// anything already there.
    pub async fn ensure_security_policies(
        &mut self,
        credential: &Credential,
    ) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let group_id = self.require("security_group_id", Stage::SecurityGroup)?;
        let settings = &self.ctx.settings;
        let policy = SecurityPolicy::bootstrap(&settings.security.open_ports, settings.remote.port);

        let report = self
            .converger
            .converge(
                credential,
                &region,
                &group_id,
                Direction::Ingress,
                &policy,
                ConvergeMode::Incremental,
            )
            .await?;

        let action = if report.is_noop() {
            ActionType::NoOp
        } else {
            ActionType::Converge
        };
        Ok(StageOutcome::new(
            Stage::SecurityPolicies,
            action,
            group_id,
            format!("{} bootstrap rule(s) added", report.added.len()),
        ))
    }

    pub async fn ensure_object_store(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let acl = self.ctx.settings.bucket.acl.clone();

        self.ensure_resource(
            credential,
            Stage::ObjectStore,
            ResourceKind::Bucket,
            "bucket_name",
            &[],
            |name| ResourceRequest::new(ResourceKind::Bucket, name, region).with_config("acl", json!(acl)),
        )
        .await
    }

    pub async fn ensure_cluster(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let project_id = self.require("project_id", Stage::Project)?;
        let vpc_id = self.require("vpc_id", Stage::Network)?;
        let subnet_id = self.require("subnet_id", Stage::Network)?;
        let cluster = self.ctx.settings.cluster.clone();

        self.ensure_resource(
            credential,
            Stage::ManagedCluster,
            ResourceKind::Cluster,
            "cluster_id",
            &[],
            |name| {
                ResourceRequest::new(ResourceKind::Cluster, name, region)
                    .with_config("project_id", json!(project_id))
                    .with_config("vpc_id", json!(vpc_id))
                    .with_config("subnet_id", json!(subnet_id))
                    .with_config("version", json!(cluster.version))
                    .with_config("cidr", json!(cluster.cidr))
            },
        )
        .await
    }

    /// Create the compute node, join it to the cluster and wait for its
    /// public address.
    ///
    /// The generated password is saved together with the instance id, so a
    /// failed address wait can be resumed.
    pub async fn ensure_node(&mut self, credential: &Credential) -> Result<StageOutcome> {
        let region = self.require("region", Stage::Region)?;
        let zone = self.require("zone", Stage::Region)?;
        let project_id = self.require("project_id", Stage::Project)?;
        let vpc_id = self.require("vpc_id", Stage::Network)?;
        let subnet_id = self.require("subnet_id", Stage::Network)?;
        let group_id = self.require("security_group_id", Stage::SecurityGroup)?;
        let cluster_id = self.require("cluster_id", Stage::ManagedCluster)?;
        let node = self.ctx.settings.node.clone();
        let password = node_password(node.password_length);

        // The id and password are checkpointed before the address wait. The
        // password cannot be read back from the provider, so a failed wait must
        // not lose it; a re-run finds the instance and only waits again.
        let outcome = self
            .ensure_resource(
                credential,
                Stage::ClusterNode,
                ResourceKind::Instance,
                "instance_id",
                &[("instance_password", password.clone())],
                |name| {
                    ResourceRequest::new(ResourceKind::Instance, name, region.clone())
                        .with_zone(zone)
                        .with_config("project_id", json!(project_id))
                        .with_config("vpc_id", json!(vpc_id))
                        .with_config("subnet_id", json!(subnet_id))
                        .with_config("security_group_id", json!(group_id))
                        .with_config("cluster_id", json!(cluster_id))
                        .with_config("instance_type", json!(node.instance_type))
                        .with_config("image", json!(node.image))
                        .with_config("disk_size_gb", json!(node.disk_size_gb))
                        .with_config("bandwidth_mbps", json!(node.bandwidth_mbps))
                        .with_config("password", json!(password))
                },
            )
            .await?;

        if outcome.action == ActionType::Adopt
            && self.checkpoint.state().instance_password.is_none()
        {
            tracing::warn!(
                "Adopted node {} has no recorded password; finalization will not be able to log in",
                outcome.resource_id
            );
        }

        if outcome.action == ActionType::NoOp && self.checkpoint.state().instance_ip.is_some() {
            return Ok(outcome);
        }

        let address = self
            .wait_for_address(credential, &region, &outcome.resource_id, &node)
            .await?;
        self.checkpoint.state_mut().set("instance_ip", address.clone());
        self.checkpoint.save().await?;

        let action = match outcome.action {
            ActionType::NoOp => ActionType::Adopt,
            other => other,
        };
        Ok(StageOutcome::new(
            Stage::ClusterNode,
            action,
            outcome.resource_id,
            format!("{}; reachable at {}", outcome.description, address),
        ))
    }

    /// Poll the node until it reports a public address
    async fn wait_for_address(
        &self,
        credential: &Credential,
        region: &str,
        instance_id: &str,
        node: &crate::engine::NodeSettings,
    ) -> Result<String> {
        let config = RetryConfig::fixed(node.ready_attempts, node.ready_interval());
        let provider = &self.ctx.provider;
        let limiter = &self.ctx.limiter;

        tracing::info!("Waiting for node {} to report a public address", instance_id);
        retry(&config, "node address wait", |_| async move {
            limiter.acquire(&action_name("describe", ResourceKind::Instance)).await;
            let instance = provider
                .describe(credential, region, ResourceKind::Instance, instance_id)
                .await
                .map_err(query_failed)?
                .ok_or_else(|| {
                    CloudError::ProviderQuery(format!("instance {} not found", instance_id))
                })?;
            instance
                .get_attribute::<String>("public_ip")
                .filter(|ip| !ip.is_empty())
                .ok_or_else(|| {
                    CloudError::ProviderQuery(format!(
                        "instance {} has no public address yet",
                        instance_id
                    ))
                })
        })
        .await
    }
}
