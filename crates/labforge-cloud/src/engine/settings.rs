//! Engine settings
//!
//! Read from the top level of the settings file. Every field has a default,
//! so an empty file is valid.

use crate::security::SecurityRule;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_deployment() -> String {
    "labforge".to_string()
}

fn default_name_prefix() -> String {
    "labforge".to_string()
}

/// Everything the stages need besides credentials and the checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Value of the deployment tag stamped on created resources
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// Preferred region; the first available one is used otherwise
    pub region: Option<String>,

    /// Preferred zone inside the region
    pub zone: Option<String>,

    /// Prefix of every generated resource name
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    pub network: NetworkSettings,
    pub bucket: BucketSettings,
    pub cluster: ClusterSettings,
    pub node: NodeSettings,
    pub remote: RemoteSettings,
    pub security: SecuritySettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            deployment: default_deployment(),
            region: None,
            zone: None,
            name_prefix: default_name_prefix(),
            network: NetworkSettings::default(),
            bucket: BucketSettings::default(),
            cluster: ClusterSettings::default(),
            node: NodeSettings::default(),
            remote: RemoteSettings::default(),
            security: SecuritySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub vpc_cidr: String,
    pub subnet_cidr: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            vpc_cidr: "10.0.0.0/16".to_string(),
            subnet_cidr: "10.0.1.0/24".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSettings {
    pub acl: String,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            acl: "private".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub version: String,

    /// Pod network of the managed cluster
    pub cidr: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            version: "1.28.3".to_string(),
            cidr: "172.16.0.0/16".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub instance_type: String,
    pub image: String,
    pub disk_size_gb: u32,
    pub bandwidth_mbps: u32,
    pub password_length: usize,

    /// Polls of the node before giving up on its public address
    pub ready_attempts: u32,
    pub ready_interval_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            instance_type: "SA2.MEDIUM4".to_string(),
            image: "img-487zeit5".to_string(),
            disk_size_gb: 50,
            bandwidth_mbps: 10,
            password_length: 16,
            ready_attempts: 20,
            ready_interval_secs: 15,
        }
    }
}

impl NodeSettings {
    pub fn ready_interval(&self) -> Duration {
        Duration::from_secs(self.ready_interval_secs)
    }
}

/// One ordered bootstrap command with its own attempt bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStep {
    pub command: String,

    #[serde(default = "default_step_attempts")]
    pub attempts: u32,
}

fn default_step_attempts() -> u32 {
    1
}

impl BootstrapStep {
    pub fn new(command: impl Into<String>, attempts: u32) -> Self {
        Self {
            command: command.into(),
            attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub user: String,
    pub port: u16,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,

    /// Directory on the node that receives the pushed files
    pub deploy_dir: String,

    /// Local files pushed during finalization
    pub files: Vec<PathBuf>,

    pub bootstrap: Vec<BootstrapStep>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            connect_attempts: 3,
            connect_backoff_secs: 30,
            deploy_dir: "/root/labforge".to_string(),
            files: Vec::new(),
            bootstrap: vec![BootstrapStep::new("systemctl enable --now nfs-server", 3)],
        }
    }
}

impl RemoteSettings {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Opened while the node is bootstrapped, next to the shell port
    pub open_ports: Vec<SecurityRule>,

    /// Production rules next to the intranet-wide rule
    pub allow_list: Vec<SecurityRule>,

    /// Defaults to the VPC CIDR
    pub intranet_cidr: Option<String>,

    pub convergence_attempts: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            open_ports: vec![
                SecurityRule::allow("TCP", "80", "0.0.0.0/0"),
                SecurityRule::allow("TCP", "443", "0.0.0.0/0"),
            ],
            allow_list: vec![SecurityRule::allow("TCP", "443", "0.0.0.0/0")],
            intranet_cidr: None,
            convergence_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_section_uses_defaults() {
        let settings: EngineSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.node.ready_attempts, 20);
        assert_eq!(settings.remote.connect_backoff(), Duration::from_secs(30));
        assert_eq!(settings.remote.bootstrap[0].attempts, 3);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings: EngineSettings = serde_json::from_str(
            r#"{
                "deployment": "lab-a",
                "remote": { "port": 2222, "bootstrap": [{ "command": "true" }] },
                "security": { "open_ports": [{ "protocol": "tcp", "port": 8080, "cidr": "0.0.0.0/0" }] }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.deployment, "lab-a");
        assert_eq!(settings.remote.port, 2222);
        assert_eq!(settings.remote.user, "root");
        assert_eq!(settings.remote.bootstrap, vec![BootstrapStep::new("true", 1)]);
        assert_eq!(
            settings.security.open_ports,
            vec![SecurityRule::allow("TCP", "8080", "0.0.0.0/0")]
        );
        assert_eq!(settings.security.convergence_attempts, 3);
    }
}
