//! Tencent Cloud provider implementation

use crate::coscli::Coscli;
use crate::error::{Result, TencentError};
use crate::tccli::{
    AddProjectResponse, AppIdResponse, ClustersResponse, CreateClusterInstancesResponse,
    CreateClusterResponse, CreateSecurityGroupResponse, CreateSubnetResponse, CreateVpcResponse,
    InstancesResponse, PoliciesResponse, PolicyEntry, PolicySet, ProjectsResponse,
    RegionsResponse, SecurityGroupLimitsResponse, SecurityGroupsResponse, SubnetsResponse, Tag,
    Tccli, VpcLimitsResponse, VpcsResponse, ZonesResponse,
};
use async_trait::async_trait;
use labforge_cloud::{
    AccountInfo, CloudProvider, Credential, Direction, LiveResource, ObservedRule, Quota,
    RegionInfo, ResourceKind, ResourceRequest, RuleAction, SecurityRule,
};
use serde_json::json;

/// Page size of every listing call
const PAGE_SIZE: u32 = 100;

fn live(id: impl Into<String>, name: impl Into<String>, tags: &[Tag]) -> LiveResource {
    let mut resource = LiveResource::new(id, name);
    for tag in tags {
        resource.tags.insert(tag.key.clone(), tag.value.clone());
    }
    resource
}

fn request_tags(request: &ResourceRequest) -> Vec<Tag> {
    request
        .tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

fn config_str(request: &ResourceRequest, key: &str) -> Result<String> {
    request
        .get_config::<String>(key)
        .ok_or_else(|| TencentError::UnexpectedResponse {
            action: format!("create {}", request.kind),
            message: format!("missing `{}` in request", key),
        })
}

fn project_number(request: &ResourceRequest) -> u64 {
    request
        .get_config::<String>("project_id")
        .and_then(|id| id.parse().ok())
        .unwrap_or(0)
}

fn observed_rule(entry: &PolicyEntry) -> Option<ObservedRule> {
    let index = entry.policy_index?;
    let action = match entry.action.as_deref() {
        Some(a) if a.eq_ignore_ascii_case("DROP") => RuleAction::Drop,
        _ => RuleAction::Accept,
    };
    Some(ObservedRule {
        index,
        rule: SecurityRule::new(
            entry.protocol.clone().unwrap_or_else(|| "ALL".to_string()),
            entry.port.clone().unwrap_or_else(|| "ALL".to_string()),
            entry.cidr_block.clone().unwrap_or_default(),
            action,
        ),
    })
}

fn policy_entry(rule: &SecurityRule) -> PolicyEntry {
    PolicyEntry {
        policy_index: None,
        protocol: Some(rule.protocol.clone()),
        port: Some(rule.port.clone()),
        cidr_block: Some(rule.cidr.clone()),
        action: Some(rule.action.to_string()),
    }
}

fn policy_set(direction: Direction, entries: Vec<PolicyEntry>) -> PolicySet {
    match direction {
        Direction::Ingress => PolicySet {
            ingress: entries,
            ..Default::default()
        },
        Direction::Egress => PolicySet {
            egress: entries,
            ..Default::default()
        },
    }
}

/// Tencent Cloud provider
///
/// Drives the `tccli` and `coscli` command-line tools. Both must be on
/// `PATH`; credentials are handed to them per call.
#[derive(Debug, Clone, Default)]
pub struct TencentCloudProvider {
    tccli: Tccli,
    coscli: Coscli,
}

impl TencentCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(tccli: Tccli, coscli: Coscli) -> Self {
        Self { tccli, coscli }
    }

    async fn app_id(&self, credential: &Credential) -> Result<AppIdResponse> {
        self.tccli
            .call(credential, "cam", "GetUserAppId", None, &json!({}))
            .await
    }

    async fn list_kind(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
    ) -> Result<Vec<LiveResource>> {
        let page = json!({ "Offset": "0", "Limit": PAGE_SIZE.to_string() });
        let resources = match kind {
            ResourceKind::Project => {
                let response: ProjectsResponse = self
                    .tccli
                    .call(
                        credential,
                        "tag",
                        "DescribeProjects",
                        None,
                        &json!({ "AllList": 1, "Offset": 0, "Limit": 1000 }),
                    )
                    .await?;
                response
                    .projects
                    .iter()
                    .map(|p| live(p.project_id.to_string(), p.project_name.clone(), &[]))
                    .collect()
            }
            ResourceKind::Vpc => {
                let response: VpcsResponse = self
                    .tccli
                    .call(credential, "vpc", "DescribeVpcs", Some(region), &page)
                    .await?;
                response
                    .vpc_set
                    .iter()
                    .map(|v| {
                        let mut resource = live(v.vpc_id.clone(), v.vpc_name.clone(), &v.tag_set);
                        if let Some(cidr) = &v.cidr_block {
                            resource.set_attribute("cidr", json!(cidr));
                        }
                        resource
                    })
                    .collect()
            }
            ResourceKind::Subnet => {
                let response: SubnetsResponse = self
                    .tccli
                    .call(credential, "vpc", "DescribeSubnets", Some(region), &page)
                    .await?;
                response
                    .subnet_set
                    .iter()
                    .map(|s| {
                        let mut resource =
                            live(s.subnet_id.clone(), s.subnet_name.clone(), &s.tag_set);
                        if let Some(vpc) = &s.vpc_id {
                            resource.set_attribute("vpc_id", json!(vpc));
                        }
                        if let Some(zone) = &s.zone {
                            resource.set_attribute("zone", json!(zone));
                        }
                        resource
                    })
                    .collect()
            }
            ResourceKind::SecurityGroup => {
                let response: SecurityGroupsResponse = self
                    .tccli
                    .call(credential, "vpc", "DescribeSecurityGroups", Some(region), &page)
                    .await?;
                response
                    .security_group_set
                    .iter()
                    .map(|g| {
                        live(
                            g.security_group_id.clone(),
                            g.security_group_name.clone(),
                            &g.tag_set,
                        )
                    })
                    .collect()
            }
            ResourceKind::Bucket => {
                // coscli listings carry no tags, so buckets are matched by id only.
                let app_id = self.app_id(credential).await?.app_id;
                let suffix = format!("-{}", app_id);
                self.coscli
                    .list_buckets(credential, region)
                    .await?
                    .into_iter()
                    .map(|b| {
                        let short = b.name.strip_suffix(&suffix).unwrap_or(&b.name).to_string();
                        live(b.name.clone(), short, &[])
                    })
                    .collect()
            }
            ResourceKind::Cluster => {
                let response: ClustersResponse = self
                    .tccli
                    .call(
                        credential,
                        "tke",
                        "DescribeClusters",
                        Some(region),
                        &json!({ "Offset": 0, "Limit": PAGE_SIZE }),
                    )
                    .await?;
                response
                    .clusters
                    .iter()
                    .map(|c| {
                        let tags: Vec<Tag> = c
                            .tag_specification
                            .iter()
                            .flat_map(|spec| spec.tags.iter().cloned())
                            .collect();
                        let mut resource = live(c.cluster_id.clone(), c.cluster_name.clone(), &tags);
                        if let Some(status) = &c.cluster_status {
                            resource.set_attribute("state", json!(status));
                        }
                        resource
                    })
                    .collect()
            }
            ResourceKind::Instance => {
                let response: InstancesResponse = self
                    .tccli
                    .call(
                        credential,
                        "cvm",
                        "DescribeInstances",
                        Some(region),
                        &json!({ "Offset": 0, "Limit": PAGE_SIZE }),
                    )
                    .await?;
                response.instance_set.iter().map(instance_resource).collect()
            }
        };
        Ok(resources)
    }

    async fn create_kind(&self, credential: &Credential, request: &ResourceRequest) -> Result<LiveResource> {
        let region = Some(request.region.as_str());
        let tags = request_tags(request);

        match request.kind {
            ResourceKind::Project => {
                let description = request.get_config::<String>("description").unwrap_or_default();
                let response: AddProjectResponse = self
                    .tccli
                    .call(
                        credential,
                        "tag",
                        "AddProject",
                        None,
                        &json!({ "ProjectName": request.name, "Info": description }),
                    )
                    .await?;
                Ok(live(response.project_id.to_string(), request.name.clone(), &[]))
            }
            ResourceKind::Vpc => {
                let response: CreateVpcResponse = self
                    .tccli
                    .call(
                        credential,
                        "vpc",
                        "CreateVpc",
                        region,
                        &json!({
                            "VpcName": request.name,
                            "CidrBlock": config_str(request, "cidr")?,
                            "Tags": tags,
                        }),
                    )
                    .await?;
                Ok(live(response.vpc.vpc_id, response.vpc.vpc_name, &tags))
            }
            ResourceKind::Subnet => {
                let response: CreateSubnetResponse = self
                    .tccli
                    .call(
                        credential,
                        "vpc",
                        "CreateSubnet",
                        region,
                        &json!({
                            "VpcId": config_str(request, "vpc_id")?,
                            "SubnetName": request.name,
                            "CidrBlock": config_str(request, "cidr")?,
                            "Zone": request.zone,
                            "Tags": tags,
                        }),
                    )
                    .await?;
                Ok(live(response.subnet.subnet_id, response.subnet.subnet_name, &tags))
            }
            ResourceKind::SecurityGroup => {
                let response: CreateSecurityGroupResponse = self
                    .tccli
                    .call(
                        credential,
                        "vpc",
                        "CreateSecurityGroup",
                        region,
                        &json!({
                            "GroupName": request.name,
                            "GroupDescription": request.get_config::<String>("description").unwrap_or_default(),
                            "ProjectId": project_number(request).to_string(),
                            "Tags": tags,
                        }),
                    )
                    .await?;
                let group = response.security_group;
                Ok(live(group.security_group_id, group.security_group_name, &tags))
            }
            ResourceKind::Bucket => {
                let app_id = self.app_id(credential).await?.app_id;
                let bucket = format!("{}-{}", request.name, app_id);
                self.coscli
                    .make_bucket(credential, &request.region, &bucket)
                    .await?;
                Ok(live(bucket, request.name.clone(), &[]))
            }
            ResourceKind::Cluster => {
                let response: CreateClusterResponse = self
                    .tccli
                    .call(
                        credential,
                        "tke",
                        "CreateCluster",
                        region,
                        &json!({
                            "ClusterType": "MANAGED_CLUSTER",
                            "ClusterCIDRSettings": { "ClusterCIDR": config_str(request, "cidr")? },
                            "ClusterBasicSettings": {
                                "ClusterName": request.name,
                                "ClusterVersion": config_str(request, "version")?,
                                "VpcId": config_str(request, "vpc_id")?,
                                "SubnetId": config_str(request, "subnet_id")?,
                                "ProjectId": project_number(request),
                                "TagSpecification": [{ "ResourceType": "cluster", "Tags": tags }],
                            },
                        }),
                    )
                    .await?;
                Ok(live(response.cluster_id, request.name.clone(), &tags))
            }
            ResourceKind::Instance => {
                let run_instance = json!({
                    "Placement": { "Zone": request.zone, "ProjectId": project_number(request) },
                    "InstanceType": config_str(request, "instance_type")?,
                    "ImageId": config_str(request, "image")?,
                    "SystemDisk": {
                        "DiskType": "CLOUD_PREMIUM",
                        "DiskSize": request.get_config::<u32>("disk_size_gb").unwrap_or(50),
                    },
                    "VirtualPrivateCloud": {
                        "VpcId": config_str(request, "vpc_id")?,
                        "SubnetId": config_str(request, "subnet_id")?,
                    },
                    "InternetAccessible": {
                        "InternetChargeType": "TRAFFIC_POSTPAID_BY_HOUR",
                        "InternetMaxBandwidthOut": request.get_config::<u32>("bandwidth_mbps").unwrap_or(10),
                        "PublicIpAssigned": true,
                    },
                    "InstanceName": request.name,
                    "LoginSettings": { "Password": config_str(request, "password")? },
                    "SecurityGroupIds": [config_str(request, "security_group_id")?],
                    "TagSpecification": [{ "ResourceType": "instance", "Tags": tags }],
                });

                let response: CreateClusterInstancesResponse = self
                    .tccli
                    .call(
                        credential,
                        "tke",
                        "CreateClusterInstances",
                        region,
                        &json!({
                            "ClusterId": config_str(request, "cluster_id")?,
                            "RunInstancePara": run_instance.to_string(),
                        }),
                    )
                    .await?;
                let id = response.instance_id_set.into_iter().next().ok_or_else(|| {
                    TencentError::UnexpectedResponse {
                        action: "tke CreateClusterInstances".to_string(),
                        message: "no instance id returned".to_string(),
                    }
                })?;
                Ok(live(id, request.name.clone(), &tags))
            }
        }
    }
}

fn instance_resource(instance: &crate::tccli::InstanceEntry) -> LiveResource {
    let mut resource = live(
        instance.instance_id.clone(),
        instance.instance_name.clone(),
        &instance.tags,
    );
    if let Some(ip) = instance.public_ip() {
        resource.set_attribute("public_ip", json!(ip));
    }
    if let Some(state) = &instance.instance_state {
        resource.set_attribute("state", json!(state));
    }
    resource
}

#[async_trait]
impl CloudProvider for TencentCloudProvider {
    fn name(&self) -> &str {
        "tencent-cloud"
    }

    async fn list_regions(&self, credential: &Credential) -> labforge_cloud::Result<Vec<RegionInfo>> {
        let regions: RegionsResponse = self
            .tccli
            .call(credential, "cvm", "DescribeRegions", None, &json!({}))
            .await?;

        let mut result = Vec::new();
        for region in regions
            .region_set
            .iter()
            .filter(|r| r.region_state.as_deref().is_none_or(|s| s == "AVAILABLE"))
        {
            let zones: ZonesResponse = self
                .tccli
                .call(credential, "cvm", "DescribeZones", Some(&region.region), &json!({}))
                .await?;
            let available: Vec<&str> = zones
                .zone_set
                .iter()
                .filter(|z| z.zone_state.as_deref().is_none_or(|s| s == "AVAILABLE"))
                .map(|z| z.zone.as_str())
                .collect();
            result.push(RegionInfo::new(region.region.clone(), &available));
        }
        Ok(result)
    }

    async fn account(&self, credential: &Credential) -> labforge_cloud::Result<AccountInfo> {
        let response = self.app_id(credential).await?;
        Ok(AccountInfo {
            id: response.owner_uin,
            name: None,
        })
    }

    async fn list(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
    ) -> labforge_cloud::Result<Vec<LiveResource>> {
        Ok(self.list_kind(credential, region, kind).await?)
    }

    async fn quota(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
    ) -> labforge_cloud::Result<Option<Quota>> {
        let limit = match kind {
            ResourceKind::Vpc => {
                let response: VpcLimitsResponse = self
                    .tccli
                    .call(
                        credential,
                        "vpc",
                        "DescribeVpcLimits",
                        Some(region),
                        &json!({ "LimitTypes": ["appid-max-vpcs"] }),
                    )
                    .await?;
                response
                    .vpc_limit_set
                    .iter()
                    .find(|l| l.limit_type == "appid-max-vpcs")
                    .map(|l| l.limit_value)
            }
            ResourceKind::SecurityGroup => {
                let response: SecurityGroupLimitsResponse = self
                    .tccli
                    .call(
                        credential,
                        "vpc",
                        "DescribeSecurityGroupLimits",
                        Some(region),
                        &json!({}),
                    )
                    .await?;
                Some(response.security_group_limit_set.security_group_limit)
            }
            _ => None,
        };

        let Some(limit) = limit else {
            return Ok(None);
        };
        let used = self.list_kind(credential, region, kind).await?.len() as u64;
        Ok(Some(Quota::new(used, limit)))
    }

    async fn create(
        &self,
        credential: &Credential,
        request: &ResourceRequest,
    ) -> labforge_cloud::Result<LiveResource> {
        tracing::info!("Creating {} {} in {}", request.kind, request.name, request.region);
        self.create_kind(credential, request)
            .await
            .map_err(|e| e.into_submit(request.kind))
    }

    async fn describe(
        &self,
        credential: &Credential,
        region: &str,
        kind: ResourceKind,
        id: &str,
    ) -> labforge_cloud::Result<Option<LiveResource>> {
        if kind == ResourceKind::Instance {
            let response: InstancesResponse = self
                .tccli
                .call(
                    credential,
                    "cvm",
                    "DescribeInstances",
                    Some(region),
                    &json!({ "InstanceIds": [id] }),
                )
                .await?;
            return Ok(response.instance_set.first().map(instance_resource));
        }

        Ok(self
            .list_kind(credential, region, kind)
            .await?
            .into_iter()
            .find(|r| r.id == id))
    }

    async fn list_security_rules(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
    ) -> labforge_cloud::Result<Vec<ObservedRule>> {
        let response: PoliciesResponse = self
            .tccli
            .call(
                credential,
                "vpc",
                "DescribeSecurityGroupPolicies",
                Some(region),
                &json!({ "SecurityGroupId": group_id }),
            )
            .await?;
        let set = response.security_group_policy_set;
        let entries = match direction {
            Direction::Ingress => set.ingress,
            Direction::Egress => set.egress,
        };
        Ok(entries.iter().filter_map(observed_rule).collect())
    }

    async fn add_security_rules(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
        rules: &[SecurityRule],
    ) -> labforge_cloud::Result<()> {
        let set = policy_set(direction, rules.iter().map(policy_entry).collect());
        self.tccli
            .call::<serde_json::Value>(
                credential,
                "vpc",
                "CreateSecurityGroupPolicies",
                Some(region),
                &json!({ "SecurityGroupId": group_id, "SecurityGroupPolicySet": set }),
            )
            .await
            .map_err(|e| e.into_rule_write(group_id, direction))?;
        Ok(())
    }

    async fn delete_security_rules(
        &self,
        credential: &Credential,
        region: &str,
        group_id: &str,
        direction: Direction,
        indices: &[u32],
    ) -> labforge_cloud::Result<()> {
        let entries = indices
            .iter()
            .map(|&index| PolicyEntry {
                policy_index: Some(index),
                ..Default::default()
            })
            .collect();
        let set = policy_set(direction, entries);
        self.tccli
            .call::<serde_json::Value>(
                credential,
                "vpc",
                "DeleteSecurityGroupPolicies",
                Some(region),
                &json!({ "SecurityGroupId": group_id, "SecurityGroupPolicySet": set }),
            )
            .await
            .map_err(|e| e.into_rule_write(group_id, direction))?;
        Ok(())
    }
}
