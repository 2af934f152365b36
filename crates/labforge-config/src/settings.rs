//! 設定ファイルの内容

use crate::error::{ConfigError, Result};
use labforge_cloud::ratelimit::DEFAULT_LIMIT;
use labforge_cloud::{EngineSettings, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_checkpoint() -> PathBuf {
    PathBuf::from(".labforge/checkpoint.json")
}

/// `labforge.yaml` の全体
///
/// エンジン設定 (deployment, region, network, node, remote, security ...) は
/// トップレベルに直接書く。
///
/// ```yaml
/// deployment: lab-a
/// region: ap-guangzhou
/// checkpoint: .labforge/checkpoint.json
/// rate_limits:
///   default: 20
///   actions:
///     "create:instance": 5
/// remote:
///   files: [deploy/compose.yaml]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// チェックポイントファイルのパス (カレントディレクトリ基準)
    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,

    #[serde(default)]
    pub rate_limits: RateLimitSettings,

    #[serde(flatten)]
    pub engine: EngineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            checkpoint: default_checkpoint(),
            rate_limits: RateLimitSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl Settings {
    /// ファイルから読み込んで検証する
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// YAML文字列をパースする (空文字列はデフォルト値)
    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;

        if engine.deployment.trim().is_empty() {
            return Err(ConfigError::Invalid("deployment must not be empty".into()));
        }

        // バケット名にも使われるため小文字英数字とハイフンのみ
        let prefix_ok = !engine.name_prefix.is_empty()
            && engine
                .name_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !prefix_ok {
            return Err(ConfigError::Invalid(format!(
                "name_prefix `{}` may only contain lowercase letters, digits and '-'",
                engine.name_prefix
            )));
        }

        if !(8..=30).contains(&engine.node.password_length) {
            return Err(ConfigError::Invalid(format!(
                "node.password_length must be between 8 and 30 (got {})",
                engine.node.password_length
            )));
        }

        if engine.remote.connect_attempts == 0 {
            return Err(ConfigError::Invalid("remote.connect_attempts must be at least 1".into()));
        }

        self.rate_limits.validate()
    }
}

/// アクション単位のレート制限 (1秒あたりの呼び出し数)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// 個別指定の無いアクションの上限
    pub default: u32,

    /// `list:vpc` や `create:instance` など、アクション名ごとの上限
    pub actions: BTreeMap<String, u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default: DEFAULT_LIMIT,
            actions: BTreeMap::new(),
        }
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<()> {
        if self.default == 0 {
            return Err(ConfigError::Invalid("rate_limits.default must be at least 1".into()));
        }
        if let Some((action, _)) = self.actions.iter().find(|(_, limit)| **limit == 0) {
            return Err(ConfigError::Invalid(format!(
                "rate_limits.actions.{} must be at least 1",
                action
            )));
        }
        Ok(())
    }

    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(self.default).with_limits(self.actions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labforge_cloud::SecurityRule;

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
        assert_eq!(Settings::parse("\n  \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_parse_full_settings() {
        let yaml = r#"
deployment: lab-a
region: ap-shanghai
zone: ap-shanghai-2
name_prefix: lab
checkpoint: state/lab-a.json
rate_limits:
  default: 10
  actions:
    "create:instance": 2
network:
  vpc_cidr: 192.168.0.0/16
  subnet_cidr: 192.168.10.0/24
node:
  instance_type: SA3.LARGE8
remote:
  port: 2222
  files:
    - deploy/compose.yaml
  bootstrap:
    - command: docker compose up -d
      attempts: 2
security:
  open_ports:
    - { protocol: tcp, port: 8080, cidr: 0.0.0.0/0 }
"#;
        let settings = Settings::parse(yaml).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.checkpoint, PathBuf::from("state/lab-a.json"));
        assert_eq!(settings.engine.deployment, "lab-a");
        assert_eq!(settings.engine.region.as_deref(), Some("ap-shanghai"));
        assert_eq!(settings.engine.name_prefix, "lab");
        assert_eq!(settings.engine.network.subnet_cidr, "192.168.10.0/24");
        assert_eq!(settings.engine.node.instance_type, "SA3.LARGE8");
        // 未指定の項目はデフォルト値のまま
        assert_eq!(settings.engine.node.disk_size_gb, 50);
        assert_eq!(settings.engine.remote.port, 2222);
        assert_eq!(settings.engine.remote.user, "root");
        assert_eq!(settings.engine.remote.bootstrap[0].attempts, 2);
        assert_eq!(
            settings.engine.security.open_ports,
            vec![SecurityRule::allow("TCP", "8080", "0.0.0.0/0")]
        );
        assert_eq!(settings.rate_limits.default, 10);
        assert_eq!(settings.rate_limits.actions.get("create:instance"), Some(&2));
    }

    #[test]
    fn test_limiter_uses_overrides() {
        let settings = Settings::parse("rate_limits:\n  default: 7\n  actions:\n    \"list:vpc\": 3\n").unwrap();
        let limiter = settings.rate_limits.limiter();
        assert_eq!(limiter.limit_for("list:vpc"), 3);
        assert_eq!(limiter.limit_for("list:subnet"), 7);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.engine.name_prefix = "Lab_Forge".to_string();
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = Settings::default();
        settings.engine.node.password_length = 4;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = Settings::default();
        settings.rate_limits.actions.insert("list:vpc".to_string(), 0);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("list:vpc"));
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labforge.yaml");
        std::fs::write(&path, "deployment: [unclosed\n").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("labforge.yaml"));
    }
}
