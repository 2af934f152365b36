//! tccli CLI wrapper
//!
//! Every API call is one `tccli <service> <Action>` invocation. Parameters
//! are written to a private temporary file and passed with
//! `--cli-input-json`, so node passwords never show up in the process list.
//! Credentials are passed through the environment.

use crate::error::{Result, TencentError};
use labforge_cloud::Credential;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// tccli CLI wrapper
#[derive(Debug, Clone)]
pub struct Tccli {
    program: String,
    timeout: Duration,
}

impl Default for Tccli {
    fn default() -> Self {
        Self::new()
    }
}

impl Tccli {
    pub fn new() -> Self {
        Self {
            program: "tccli".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use another executable (a wrapper script, a pinned install)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Call one API action and decode its response
    pub async fn call<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        service: &str,
        action: &str,
        region: Option<&str>,
        params: &serde_json::Value,
    ) -> Result<T> {
        let output = self.run(credential, service, action, region, params).await?;
        serde_json::from_str(&output).map_err(|e| TencentError::UnexpectedResponse {
            action: format!("{} {}", service, action),
            message: e.to_string(),
        })
    }

    async fn run(
        &self,
        credential: &Credential,
        service: &str,
        action: &str,
        region: Option<&str>,
        params: &serde_json::Value,
    ) -> Result<String> {
        let label = format!("{} {}", service, action);

        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(serde_json::to_string(params)?.as_bytes())?;
        input.flush()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(service).arg(action);
        if let Some(region) = region {
            cmd.arg("--region").arg(region);
        }
        cmd.arg("--cli-input-json")
            .arg(format!("file://{}", input.path().display()));
        cmd.env("TENCENTCLOUD_SECRET_ID", &credential.secret_id);
        cmd.env("TENCENTCLOUD_SECRET_KEY", credential.secret_key());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {} (region: {:?})", self.program, label, region);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TencentError::CliNotFound(self.program.clone()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(TencentError::Timeout {
                    action: label,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(TencentError::CommandFailed {
                action: label,
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Resource tag as used by the VPC, CVM and TKE APIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegionsResponse {
    pub region_set: Vec<RegionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegionEntry {
    pub region: String,
    #[serde(default)]
    pub region_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZonesResponse {
    pub zone_set: Vec<ZoneEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneEntry {
    pub zone: String,
    #[serde(default)]
    pub zone_state: Option<String>,
}

/// `cam GetUserAppId`
#[derive(Debug, Clone, Deserialize)]
pub struct AppIdResponse {
    #[serde(rename = "OwnerUin")]
    pub owner_uin: String,
    #[serde(rename = "AppId")]
    pub app_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectsResponse {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectEntry {
    pub project_id: u64,
    pub project_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddProjectResponse {
    pub project_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcsResponse {
    #[serde(default)]
    pub vpc_set: Vec<VpcEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcEntry {
    pub vpc_id: String,
    pub vpc_name: String,
    #[serde(default)]
    pub cidr_block: Option<String>,
    #[serde(default)]
    pub tag_set: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVpcResponse {
    pub vpc: VpcEntry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcLimitsResponse {
    #[serde(default)]
    pub vpc_limit_set: Vec<VpcLimit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcLimit {
    pub limit_type: String,
    pub limit_value: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetsResponse {
    #[serde(default)]
    pub subnet_set: Vec<SubnetEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetEntry {
    pub subnet_id: String,
    pub subnet_name: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub tag_set: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSubnetResponse {
    pub subnet: SubnetEntry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupsResponse {
    #[serde(default)]
    pub security_group_set: Vec<SecurityGroupEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupEntry {
    pub security_group_id: String,
    pub security_group_name: String,
    #[serde(default)]
    pub tag_set: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSecurityGroupResponse {
    pub security_group: SecurityGroupEntry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupLimitsResponse {
    pub security_group_limit_set: SecurityGroupLimits,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupLimits {
    pub security_group_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PoliciesResponse {
    pub security_group_policy_set: PolicySet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicySet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<PolicyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<PolicyEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClustersResponse {
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterEntry {
    pub cluster_id: String,
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_status: Option<String>,
    #[serde(default)]
    pub tag_specification: Vec<TagSpecification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagSpecification {
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateClusterResponse {
    pub cluster_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstancesResponse {
    #[serde(default)]
    pub instance_set: Vec<InstanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceEntry {
    pub instance_id: String,
    pub instance_name: String,
    #[serde(default)]
    pub instance_state: Option<String>,
    #[serde(default)]
    pub public_ip_addresses: Option<Vec<String>>,
    #[serde(default)]
    pub private_ip_addresses: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl InstanceEntry {
    pub fn public_ip(&self) -> Option<String> {
        self.public_ip_addresses.as_ref()?.first().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.instance_state.as_deref() == Some("RUNNING")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateClusterInstancesResponse {
    pub instance_id_set: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vpcs_with_tags() {
        let json = r#"{
            "TotalCount": 1,
            "VpcSet": [{
                "VpcId": "vpc-2at5y1pn",
                "VpcName": "labforge-vpc-qzkxwe",
                "CidrBlock": "10.0.0.0/16",
                "TagSet": [{"Key": "labforge:deployment", "Value": "lab-a"}]
            }],
            "RequestId": "7a3b"
        }"#;

        let response: VpcsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.vpc_set.len(), 1);
        assert_eq!(response.vpc_set[0].vpc_id, "vpc-2at5y1pn");
        assert_eq!(response.vpc_set[0].tag_set[0].value, "lab-a");
    }

    #[test]
    fn test_parse_policies() {
        let json = r#"{
            "SecurityGroupPolicySet": {
                "Version": "3",
                "Ingress": [
                    {"PolicyIndex": 0, "Protocol": "TCP", "Port": "22", "CidrBlock": "0.0.0.0/0", "Action": "ACCEPT", "PolicyDescription": ""},
                    {"PolicyIndex": 1, "Protocol": "ALL", "Port": "ALL", "CidrBlock": "10.0.0.0/16", "Action": "ACCEPT", "PolicyDescription": ""}
                ],
                "Egress": []
            }
        }"#;

        let response: PoliciesResponse = serde_json::from_str(json).unwrap();
        let ingress = &response.security_group_policy_set.ingress;
        assert_eq!(ingress.len(), 2);
        assert_eq!(ingress[1].policy_index, Some(1));
        assert_eq!(ingress[1].port.as_deref(), Some("ALL"));
    }

    #[test]
    fn test_instance_public_ip() {
        let json = r#"{
            "InstanceSet": [{
                "InstanceId": "ins-r8hr2upy",
                "InstanceName": "labforge-node-abcdef",
                "InstanceState": "RUNNING",
                "PublicIpAddresses": ["203.0.113.7"],
                "PrivateIpAddresses": ["10.0.1.4"],
                "Tags": []
            }]
        }"#;

        let response: InstancesResponse = serde_json::from_str(json).unwrap();
        let instance = &response.instance_set[0];
        assert_eq!(instance.public_ip(), Some("203.0.113.7".to_string()));
        assert!(instance.is_running());
    }

    #[test]
    fn test_pending_instance_has_no_public_ip() {
        let json = r#"{"InstanceSet": [{"InstanceId": "ins-1", "InstanceName": "n", "InstanceState": "PENDING", "PublicIpAddresses": null}]}"#;
        let response: InstancesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.instance_set[0].public_ip(), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let tccli = Tccli::new().with_program("tccli-definitely-not-installed");
        let credential = Credential::new("AKID", "secret");

        let err = tccli
            .call::<serde_json::Value>(
                &credential,
                "vpc",
                "DescribeVpcs",
                Some("ap-guangzhou"),
                &serde_json::json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TencentError::CliNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_relays_message() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tccli");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '[TencentCloudSDKException] code:AuthFailure.SecretIdNotFound' >&2\nexit 255\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tccli = Tccli::new().with_program(script.display().to_string());
        let err = tccli
            .call::<serde_json::Value>(
                &Credential::new("AKID", "secret"),
                "cvm",
                "DescribeRegions",
                None,
                &serde_json::json!({}),
            )
            .await
            .unwrap_err();

        match err {
            TencentError::CommandFailed { action, message } => {
                assert_eq!(action, "cvm DescribeRegions");
                assert!(message.contains("AuthFailure"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
